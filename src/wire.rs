// Data structures for the search backend's JSON payloads and their
// conversion into domain types

use crate::client::ApiError;
use crate::types::{
    Activity, ComposedPackage, DestinationId, JobId, JobStatus, Lodging, LodgingId, SearchResult,
    StatusReport,
};
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::warn;

// Date layouts observed in upstream payloads
const DATE_FORMATS: [&str; 2] = ["%Y-%m-%d", "%d/%m/%Y"];

/// Map a raw upstream status tag onto the internal status.
///
/// The backend reports "done" with two different tags (`COMPLETED` and
/// `SUCCESS`); both become `JobStatus::Completed` here and nowhere else.
pub fn normalize_status(tag: &str) -> Result<JobStatus, ApiError> {
    match tag.trim().to_ascii_uppercase().as_str() {
        "PENDING" | "QUEUED" => Ok(JobStatus::Pending),
        "STARTED" | "RUNNING" | "PROCESSING" => Ok(JobStatus::Running),
        "COMPLETED" | "SUCCESS" => Ok(JobStatus::Completed),
        "FAILED" | "FAILURE" | "ERROR" => Ok(JobStatus::Failed),
        _ => Err(ApiError::UnknownStatus(tag.to_string())),
    }
}

pub fn parse_date(raw: &str) -> Option<NaiveDate> {
    let raw = raw.trim();
    DATE_FORMATS
        .iter()
        .find_map(|format| NaiveDate::parse_from_str(raw, format).ok())
}

#[derive(Debug, Deserialize, Serialize)]
pub struct JobStatusResponse {
    pub status: String,
    #[serde(default)]
    pub job_id: Option<String>,
    #[serde(default)]
    pub message: Option<String>,
}

impl TryFrom<JobStatusResponse> for StatusReport {
    type Error = ApiError;

    fn try_from(item: JobStatusResponse) -> Result<Self, Self::Error> {
        Ok(StatusReport {
            status: normalize_status(&item.status)?,
            message: item.message,
        })
    }
}

#[derive(Debug, Deserialize, Serialize)]
pub struct SubmitSearchResponse {
    pub job_id: String,
}

impl From<SubmitSearchResponse> for JobId {
    fn from(item: SubmitSearchResponse) -> Self {
        JobId(item.job_id)
    }
}

#[derive(Debug, Deserialize, Serialize)]
pub struct TokenResponse {
    pub access_token: String,
    #[serde(default)]
    pub expires_in: Option<i64>,
    #[serde(default)]
    pub user_id: Option<String>,
}

// Upstream spells the lodging key "accomodation"
#[derive(Debug, Default, Deserialize, Serialize)]
pub struct SearchResultResponse {
    #[serde(default, rename = "accomodation")]
    pub accommodation: BTreeMap<String, Vec<WireAccommodation>>,
    #[serde(default, rename = "esperienze")]
    pub experiences: BTreeMap<String, Vec<WireExperience>>,
}

#[derive(Debug, Deserialize, Serialize)]
pub struct WireAccommodation {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub star_rating: f64,
    pub daily_prices: f64,
    #[serde(default)]
    pub checkin: String,
    #[serde(default)]
    pub checkout: String,
    #[serde(default)]
    pub description: String,
}

#[derive(Debug, Default, Deserialize, Serialize)]
pub struct WireExperience {
    #[serde(default)]
    pub alias: Vec<String>,
    #[serde(default, rename = "descrizione")]
    pub description: String,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default, rename = "tipologia")]
    pub kind: String,
}

impl WireAccommodation {
    fn into_lodging(self, destination: &DestinationId) -> Option<Lodging> {
        let (Some(check_in), Some(check_out)) = (parse_date(&self.checkin), parse_date(&self.checkout))
        else {
            warn!(
                destination = %destination,
                lodging_id = %self.id,
                checkin = %self.checkin,
                checkout = %self.checkout,
                "skipping lodging with unparseable stay dates"
            );
            return None;
        };

        Some(Lodging {
            id: LodgingId(self.id),
            destination: destination.clone(),
            display_name: self.name,
            star_rating: self.star_rating.round().clamp(0.0, 5.0) as u8,
            nightly_price: self.daily_prices,
            check_in,
            check_out,
            description: self.description,
        })
    }
}

impl WireExperience {
    fn into_activity(self, destination: &DestinationId, local_index: usize) -> Activity {
        Activity {
            local_index,
            destination: destination.clone(),
            title: self.alias.into_iter().next().unwrap_or_default(),
            description: self.description,
            tags: self.tags.into_iter().collect(),
            activity_type: self.kind,
        }
    }
}

impl From<SearchResultResponse> for SearchResult {
    fn from(item: SearchResultResponse) -> Self {
        let lodgings_by_destination = item
            .accommodation
            .into_iter()
            .map(|(city, hotels)| {
                let destination = DestinationId(city);
                let lodgings = hotels
                    .into_iter()
                    .filter_map(|hotel| hotel.into_lodging(&destination))
                    .collect();
                (destination, lodgings)
            })
            .collect();

        // Position is identity for activities, so none may be dropped here
        let activities_by_destination = item
            .experiences
            .into_iter()
            .map(|(city, experiences)| {
                let destination = DestinationId(city);
                let activities = experiences
                    .into_iter()
                    .enumerate()
                    .map(|(index, experience)| experience.into_activity(&destination, index))
                    .collect();
                (destination, activities)
            })
            .collect();

        SearchResult {
            lodgings_by_destination,
            activities_by_destination,
        }
    }
}

#[derive(Debug, Deserialize, Serialize)]
pub struct SavePackageResponse {
    pub success: bool,
    #[serde(default, alias = "reason")]
    pub message: Option<String>,
}

#[derive(Debug, Deserialize, Serialize)]
pub struct LoadPackageResponse {
    pub success: bool,
    #[serde(default)]
    pub data: Option<ComposedPackage>,
}
