// Shared domain types for search jobs, their results and composed packages

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

// Opaque identifier handed back by the search backend when preferences are submitted
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JobId(pub String);

impl JobId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.trim().is_empty()
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for JobId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

// City or region key shared by lodgings, activities and selections
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DestinationId(pub String);

impl DestinationId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for DestinationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for DestinationId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct LodgingId(pub String);

impl fmt::Display for LodgingId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for LodgingId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// Identifier of an activity within its destination's sequence.
///
/// The upstream payload carries no activity ids, so the position in the
/// destination's list is the identity. A `SearchResult` is immutable for the
/// lifetime of a job, which keeps these stable; re-ordering the upstream
/// payload between fetch and selection would misattribute selections.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ActivityId(pub usize);

impl fmt::Display for ActivityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PackageId(pub String);

impl PackageId {
    // Fresh random identifier for a composed package
    pub fn generate() -> Self {
        Self(format!("pkg-{:016x}", rand::random::<u64>()))
    }
}

impl fmt::Display for PackageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

// Normalised job status; raw upstream tags never travel past the wire layer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum JobStatus {
    Pending,
    Running,
    Completed,
    Failed,
}

impl JobStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, JobStatus::Completed | JobStatus::Failed)
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            JobStatus::Pending => write!(f, "Pending"),
            JobStatus::Running => write!(f, "Running"),
            JobStatus::Completed => write!(f, "Completed"),
            JobStatus::Failed => write!(f, "Failed"),
        }
    }
}

// One status report returned by a probe
#[derive(Debug, Clone, PartialEq)]
pub struct StatusReport {
    pub status: JobStatus,
    pub message: Option<String>,
}

impl StatusReport {
    pub fn new(status: JobStatus) -> Self {
        Self {
            status,
            message: None,
        }
    }
}

// Tracking record for one remote search job, mutated only by the poller
#[derive(Debug, Clone, PartialEq)]
pub struct Job {
    pub id: JobId,
    pub status: JobStatus,
    pub last_polled_at: Option<DateTime<Utc>>,
    pub attempt_failures: u32,
}

impl Job {
    pub fn new(id: JobId) -> Self {
        Self {
            id,
            status: JobStatus::Pending,
            last_polled_at: None,
            attempt_failures: 0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Lodging {
    pub id: LodgingId,
    pub destination: DestinationId,
    pub display_name: String,
    pub star_rating: u8,
    pub nightly_price: f64,
    pub check_in: NaiveDate,
    pub check_out: NaiveDate,
    pub description: String,
}

impl Lodging {
    // Length of stay; an inverted date range counts as zero nights
    pub fn nights(&self) -> u32 {
        (self.check_out - self.check_in).num_days().max(0) as u32
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Activity {
    pub local_index: usize,
    pub destination: DestinationId,
    pub title: String,
    pub description: String,
    pub tags: BTreeSet<String>,
    pub activity_type: String,
}

impl Activity {
    pub fn id(&self) -> ActivityId {
        ActivityId(self.local_index)
    }
}

/// Result set of a completed job, grouped by destination.
///
/// Produced once by the result fetcher and never mutated afterwards; the
/// poller hands it out behind an `Arc`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SearchResult {
    pub lodgings_by_destination: BTreeMap<DestinationId, Vec<Lodging>>,
    pub activities_by_destination: BTreeMap<DestinationId, Vec<Activity>>,
}

impl SearchResult {
    // Every destination mentioned by either lodgings or activities
    pub fn destinations(&self) -> BTreeSet<DestinationId> {
        self.lodgings_by_destination
            .keys()
            .chain(self.activities_by_destination.keys())
            .cloned()
            .collect()
    }

    pub fn lodging(&self, destination: &DestinationId, id: &LodgingId) -> Option<&Lodging> {
        self.lodgings_by_destination
            .get(destination)?
            .iter()
            .find(|lodging| &lodging.id == id)
    }

    pub fn activity(&self, destination: &DestinationId, id: ActivityId) -> Option<&Activity> {
        self.activities_by_destination
            .get(destination)?
            .iter()
            .find(|activity| activity.id() == id)
    }

    pub fn is_empty(&self) -> bool {
        self.lodgings_by_destination.values().all(Vec::is_empty)
            && self.activities_by_destination.values().all(Vec::is_empty)
    }
}

// Finalised, persistable travel offer; never mutated after composition
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ComposedPackage {
    pub id: PackageId,
    pub title: String,
    pub destinations: Vec<DestinationId>,
    pub lodgings: BTreeMap<DestinationId, Lodging>,
    pub activities: BTreeMap<DestinationId, Vec<Activity>>,
    pub total_price: f64,
}

impl ComposedPackage {
    pub fn activity_count(&self) -> usize {
        self.activities.values().map(Vec::len).sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn lodging(check_in: &str, check_out: &str) -> Lodging {
        Lodging {
            id: "h1".into(),
            destination: "Rome".into(),
            display_name: "Hotel Artemide".to_string(),
            star_rating: 4,
            nightly_price: 120.0,
            check_in: NaiveDate::parse_from_str(check_in, "%Y-%m-%d").unwrap(),
            check_out: NaiveDate::parse_from_str(check_out, "%Y-%m-%d").unwrap(),
            description: String::new(),
        }
    }

    #[test]
    fn test_job_status_terminal() {
        assert!(!JobStatus::Pending.is_terminal());
        assert!(!JobStatus::Running.is_terminal());
        assert!(JobStatus::Completed.is_terminal());
        assert!(JobStatus::Failed.is_terminal());
    }

    #[test]
    fn test_lodging_nights() {
        assert_eq!(lodging("2025-06-01", "2025-06-04").nights(), 3);
        assert_eq!(lodging("2025-06-04", "2025-06-01").nights(), 0);
    }

    #[test]
    fn test_empty_job_id() {
        assert!(JobId::new("  ").is_empty());
        assert!(!JobId::new("job-1").is_empty());
    }

    #[test]
    fn test_search_result_destinations_union() {
        let mut result = SearchResult::default();
        result
            .lodgings_by_destination
            .insert("Rome".into(), vec![lodging("2025-06-01", "2025-06-03")]);
        result
            .activities_by_destination
            .insert("Florence".into(), Vec::new());

        let destinations: Vec<_> = result.destinations().into_iter().collect();
        assert_eq!(destinations, vec![DestinationId::from("Florence"), "Rome".into()]);
        assert!(result.lodging(&"Rome".into(), &"h1".into()).is_some());
        assert!(result.lodging(&"Rome".into(), &"h2".into()).is_none());
    }

    #[test]
    fn test_ids_serialize_as_plain_strings() {
        assert_eq!(serde_json::to_string(&JobId::new("job-1")).unwrap(), "\"job-1\"");
        let parsed: JobId = serde_json::from_str("\"job-2\"").unwrap();
        assert_eq!(parsed, JobId::new("job-2"));
        assert_eq!(serde_json::to_string(&ActivityId(3)).unwrap(), "3");
    }

    #[test]
    fn test_generated_package_ids_differ() {
        let a = PackageId::generate();
        let b = PackageId::generate();
        assert!(a.0.starts_with("pkg-"));
        assert_ne!(a, b);
    }
}
