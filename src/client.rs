// Boundary to the remote search backend and the package document store.
// Every network call takes an explicit Session; nothing here caches tokens.

use crate::config::ClientConfig;
use crate::types::{ComposedPackage, JobId, PackageId, SearchResult, StatusReport};
use crate::wire::{
    JobStatusResponse, LoadPackageResponse, SavePackageResponse, SearchResultResponse,
    SubmitSearchResponse, TokenResponse,
};
use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use parking_lot::Mutex;
use reqwest::StatusCode;
use serde::de::DeserializeOwned;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, info, warn};

// Tokens are treated as stale this long before they actually expire
const TOKEN_REFRESH_MARGIN_SECS: i64 = 300;
const DEFAULT_TOKEN_LIFETIME_SECS: i64 = 3600;
const MAX_ERROR_BODY_CHARS: usize = 200;

// Errors of a single network exchange
#[derive(Error, Debug)]
pub enum ApiError {
    #[error("Network error: {0}")]
    NetworkError(String),

    #[error("Request timeout after {0}ms")]
    Timeout(u64),

    #[error("API error: {status_code} - {message}")]
    ApiResponseError {
        status_code: u16,
        message: String,
        is_retryable: bool,
    },

    #[error("Invalid payload: {0}")]
    InvalidPayload(String),

    #[error("Unknown job status tag: {0}")]
    UnknownStatus(String),

    #[error("Unauthorized")]
    Unauthorized,

    #[error("Session expired")]
    SessionExpired,
}

impl ApiError {
    pub fn is_retryable(&self) -> bool {
        match self {
            ApiError::NetworkError(_) | ApiError::Timeout(_) => true,
            ApiError::ApiResponseError { is_retryable, .. } => *is_retryable,
            _ => false,
        }
    }
}

#[derive(Error, Debug)]
pub enum ClientError {
    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Initialization error: {0}")]
    InitError(String),
}

#[derive(Error, Debug)]
pub enum PersistenceError {
    #[error("Package rejected by store: {reason}")]
    Rejected { reason: String },

    #[error("Package {id} already stored with different content")]
    Conflict { id: PackageId },

    #[error(transparent)]
    Transport(#[from] ApiError),
}

impl PersistenceError {
    // Only transport hiccups are worth another attempt; a refusal stays a refusal
    pub fn is_retryable(&self) -> bool {
        matches!(self, PersistenceError::Transport(err) if err.is_retryable())
    }
}

/// Authenticated context threaded through every boundary call.
#[derive(Clone)]
pub struct Session {
    pub access_token: String,
    pub user_id: Option<String>,
    pub expires_at: Option<DateTime<Utc>>,
}

impl Session {
    // Non-expiring session, mostly useful for tests and local stores
    pub fn new(access_token: impl Into<String>) -> Self {
        Self {
            access_token: access_token.into(),
            user_id: None,
            expires_at: None,
        }
    }

    pub fn expiring_in(access_token: impl Into<String>, seconds: i64, now: DateTime<Utc>) -> Self {
        Self {
            access_token: access_token.into(),
            user_id: None,
            expires_at: Some(now + ChronoDuration::seconds(seconds)),
        }
    }

    pub fn with_user(mut self, user_id: impl Into<String>) -> Self {
        self.user_id = Some(user_id.into());
        self
    }

    pub fn is_fresh(&self, now: DateTime<Utc>) -> bool {
        match self.expires_at {
            Some(expires_at) => expires_at > now + ChronoDuration::seconds(TOKEN_REFRESH_MARGIN_SECS),
            None => true,
        }
    }

    fn ensure_fresh(&self) -> Result<(), ApiError> {
        if self.is_fresh(Utc::now()) {
            Ok(())
        } else {
            Err(ApiError::SessionExpired)
        }
    }
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("access_token", &"***")
            .field("user_id", &self.user_id)
            .field("expires_at", &self.expires_at)
            .finish()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SaveOutcome {
    Created,
    AlreadySaved,
}

// Single status probe for one job
#[async_trait]
pub trait JobStatusProbe: Send + Sync + 'static {
    async fn probe(&self, session: &Session, job_id: &JobId) -> Result<StatusReport, ApiError>;
}

// Single result fetch for a completed job
#[async_trait]
pub trait JobResultFetcher: Send + Sync + 'static {
    async fn fetch(&self, session: &Session, job_id: &JobId) -> Result<SearchResult, ApiError>;
}

/// Document store for composed packages.
///
/// `save` must be idempotent by package id: repeating it with the same
/// package reports `AlreadySaved` instead of storing a second copy.
#[async_trait]
pub trait PersistenceGateway: Send + Sync + 'static {
    async fn save(
        &self,
        session: &Session,
        package: &ComposedPackage,
    ) -> Result<SaveOutcome, PersistenceError>;

    async fn load(
        &self,
        session: &Session,
        id: &PackageId,
    ) -> Result<Option<ComposedPackage>, PersistenceError>;
}

#[derive(Debug, Default, Clone)]
pub struct ClientStats {
    pub requests_sent: usize,
    pub requests_succeeded: usize,
    pub requests_failed: usize,
    pub requests_timeout: usize,
}

impl ClientStats {
    fn record<T>(&mut self, outcome: &Result<T, ApiError>) {
        self.requests_sent += 1;
        match outcome {
            Ok(_) => self.requests_succeeded += 1,
            Err(ApiError::Timeout(_)) => {
                self.requests_failed += 1;
                self.requests_timeout += 1;
            }
            Err(_) => self.requests_failed += 1,
        }
    }
}

fn is_retryable_status(status: StatusCode) -> bool {
    status.is_server_error()
        || status == StatusCode::REQUEST_TIMEOUT
        || status == StatusCode::TOO_MANY_REQUESTS
        || status == StatusCode::ACCEPTED
}

fn transport_error(err: reqwest::Error, timeout_ms: u64) -> ApiError {
    if err.is_timeout() {
        ApiError::Timeout(timeout_ms)
    } else {
        ApiError::NetworkError(err.to_string())
    }
}

// Check the status line and decode a JSON body
async fn read_json<T: DeserializeOwned>(
    response: reqwest::Response,
    timeout_ms: u64,
) -> Result<T, ApiError> {
    let status = response.status();
    let body: Bytes = response
        .bytes()
        .await
        .map_err(|e| transport_error(e, timeout_ms))?;

    if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
        return Err(ApiError::Unauthorized);
    }
    if !status.is_success() {
        let message: String = String::from_utf8_lossy(&body)
            .chars()
            .take(MAX_ERROR_BODY_CHARS)
            .collect();
        return Err(ApiError::ApiResponseError {
            status_code: status.as_u16(),
            message,
            is_retryable: is_retryable_status(status),
        });
    }

    serde_json::from_slice(&body).map_err(|e| ApiError::InvalidPayload(e.to_string()))
}

// 202 means the backend has not assembled the result yet
async fn read_search_result(
    response: reqwest::Response,
    timeout_ms: u64,
) -> Result<SearchResult, ApiError> {
    if response.status() == StatusCode::ACCEPTED {
        return Err(ApiError::ApiResponseError {
            status_code: StatusCode::ACCEPTED.as_u16(),
            message: "result not ready".to_string(),
            is_retryable: true,
        });
    }
    let raw = read_json::<SearchResultResponse>(response, timeout_ms).await?;
    Ok(SearchResult::from(raw))
}

// 200 on a replayed idempotency key; 201 or any other 2xx on first insert
async fn read_save_ack(
    response: reqwest::Response,
    timeout_ms: u64,
    package_id: &PackageId,
) -> Result<SaveOutcome, PersistenceError> {
    let outcome = if response.status() == StatusCode::OK {
        SaveOutcome::AlreadySaved
    } else {
        SaveOutcome::Created
    };
    let ack = read_json::<SavePackageResponse>(response, timeout_ms).await?;
    if !ack.success {
        let reason = ack.message.unwrap_or_else(|| "unspecified".to_string());
        warn!(package_id = %package_id, reason = %reason, "store rejected package");
        return Err(PersistenceError::Rejected { reason });
    }
    Ok(outcome)
}

async fn read_loaded_package(
    response: reqwest::Response,
    timeout_ms: u64,
) -> Result<Option<ComposedPackage>, PersistenceError> {
    if response.status() == StatusCode::NOT_FOUND {
        return Ok(None);
    }
    let loaded = read_json::<LoadPackageResponse>(response, timeout_ms).await?;
    Ok(loaded.data.filter(|_| loaded.success))
}

/// HTTP client for the search backend.
pub struct TravelApiClient {
    config: ClientConfig,
    http: reqwest::Client,
    stats: Arc<Mutex<ClientStats>>,
}

impl TravelApiClient {
    pub fn new(config: ClientConfig) -> Result<Self, ClientError> {
        config.validate()?;
        let http = reqwest::Client::builder()
            .timeout(config.timeout())
            .build()
            .map_err(|e| ClientError::InitError(e.to_string()))?;

        Ok(Self {
            config,
            http,
            stats: Arc::new(Mutex::new(ClientStats::default())),
        })
    }

    pub fn stats(&self) -> ClientStats {
        self.stats.lock().clone()
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.config.base_url.trim_end_matches('/'), path)
    }

    fn record<T>(&self, outcome: Result<T, ApiError>) -> Result<T, ApiError> {
        self.stats.lock().record(&outcome);
        outcome
    }

    // Exchange the configured credentials for a fresh session
    pub async fn authenticate(&self) -> Result<Session, ApiError> {
        let credentials = &self.config.credentials;
        if credentials.is_empty() {
            return Err(ApiError::Unauthorized);
        }

        let outcome: Result<TokenResponse, ApiError> = async {
            let response = self
                .http
                .post(self.url("/api/auth/token"))
                .form(&[
                    ("username", credentials.username.as_str()),
                    ("password", credentials.password.as_str()),
                ])
                .send()
                .await
                .map_err(|e| transport_error(e, self.config.timeout_ms))?;
            read_json::<TokenResponse>(response, self.config.timeout_ms).await
        }
        .await;

        let token = self.record(outcome)?;
        let lifetime = token.expires_in.unwrap_or(DEFAULT_TOKEN_LIFETIME_SECS);
        let mut session = Session::expiring_in(token.access_token, lifetime, Utc::now());
        session.user_id = token.user_id;
        info!(expires_at = ?session.expires_at, "obtained search backend session");
        Ok(session)
    }

    /// Submit an already-mapped preferences document and return the new job id.
    pub async fn submit_search(
        &self,
        session: &Session,
        preferences: &serde_json::Value,
    ) -> Result<JobId, ApiError> {
        session.ensure_fresh()?;
        let outcome: Result<SubmitSearchResponse, ApiError> = async {
            let response = self
                .http
                .post(self.url("/api/search"))
                .bearer_auth(&session.access_token)
                .json(preferences)
                .send()
                .await
                .map_err(|e| transport_error(e, self.config.timeout_ms))?;
            read_json::<SubmitSearchResponse>(response, self.config.timeout_ms).await
        }
        .await;

        let job_id = JobId::from(self.record(outcome)?);
        if job_id.is_empty() {
            return Err(ApiError::InvalidPayload("empty job_id".to_string()));
        }
        info!(job_id = %job_id, "search job submitted");
        Ok(job_id)
    }
}

#[async_trait]
impl JobStatusProbe for TravelApiClient {
    async fn probe(&self, session: &Session, job_id: &JobId) -> Result<StatusReport, ApiError> {
        session.ensure_fresh()?;
        let outcome: Result<StatusReport, ApiError> = async {
            let response = self
                .http
                .get(self.url(&format!("/api/search/{}", job_id)))
                .bearer_auth(&session.access_token)
                .send()
                .await
                .map_err(|e| transport_error(e, self.config.timeout_ms))?;
            let raw = read_json::<JobStatusResponse>(response, self.config.timeout_ms).await?;
            StatusReport::try_from(raw)
        }
        .await;

        debug!(job_id = %job_id, outcome = ?outcome, "job status probed");
        self.record(outcome)
    }
}

#[async_trait]
impl JobResultFetcher for TravelApiClient {
    async fn fetch(&self, session: &Session, job_id: &JobId) -> Result<SearchResult, ApiError> {
        session.ensure_fresh()?;
        let outcome: Result<SearchResult, ApiError> = async {
            let response = self
                .http
                .get(self.url(&format!("/api/search/{}/result", job_id)))
                .bearer_auth(&session.access_token)
                .send()
                .await
                .map_err(|e| transport_error(e, self.config.timeout_ms))?;
            read_search_result(response, self.config.timeout_ms).await
        }
        .await;

        self.record(outcome)
    }
}

/// HTTP document store for composed packages.
pub struct HttpPackageStore {
    base_url: String,
    timeout_ms: u64,
    http: reqwest::Client,
}

impl HttpPackageStore {
    pub fn new(config: &ClientConfig) -> Result<Self, ClientError> {
        config.validate()?;
        let http = reqwest::Client::builder()
            .timeout(config.timeout())
            .build()
            .map_err(|e| ClientError::InitError(e.to_string()))?;

        Ok(Self {
            base_url: config.store_base_url.trim_end_matches('/').to_string(),
            timeout_ms: config.timeout_ms,
            http,
        })
    }
}

#[async_trait]
impl PersistenceGateway for HttpPackageStore {
    async fn save(
        &self,
        session: &Session,
        package: &ComposedPackage,
    ) -> Result<SaveOutcome, PersistenceError> {
        session.ensure_fresh()?;
        let response = self
            .http
            .post(format!("{}/saved-packages", self.base_url))
            .bearer_auth(&session.access_token)
            .header("Idempotency-Key", package.id.0.as_str())
            .json(package)
            .send()
            .await
            .map_err(|e| transport_error(e, self.timeout_ms))?;
        read_save_ack(response, self.timeout_ms, &package.id).await
    }

    async fn load(
        &self,
        session: &Session,
        id: &PackageId,
    ) -> Result<Option<ComposedPackage>, PersistenceError> {
        session.ensure_fresh()?;
        let response = self
            .http
            .get(format!("{}/saved-packages/{}", self.base_url, id))
            .bearer_auth(&session.access_token)
            .send()
            .await
            .map_err(|e| transport_error(e, self.timeout_ms))?;
        read_loaded_package(response, self.timeout_ms).await
    }
}

// Scripted backend for exercising the poller and orchestrator without a network
#[cfg(test)]
pub mod mock_backend {
    use super::*;
    use crate::types::{Activity, DestinationId, Lodging};
    use crate::wire::normalize_status;
    use chrono::NaiveDate;
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use tokio::sync::Notify;

    #[derive(Debug, Clone)]
    pub enum ProbeStep {
        // Raw upstream tag, run through the real normalisation
        Status(&'static str),
        NetworkError,
        // Block until notified, then report the given tag
        Gate(Arc<Notify>, &'static str),
    }

    pub struct MockBackend {
        script: Mutex<VecDeque<ProbeStep>>,
        fallback: ProbeStep,
        result: Mutex<Option<SearchResult>>,
        fail_fetch: AtomicBool,
        fetch_gate: Mutex<Option<Arc<Notify>>>,
        probe_calls: AtomicUsize,
        fetch_calls: AtomicUsize,
    }

    impl MockBackend {
        pub fn new(result: SearchResult) -> Self {
            Self {
                script: Mutex::new(VecDeque::new()),
                fallback: ProbeStep::Status("RUNNING"),
                result: Mutex::new(Some(result)),
                fail_fetch: AtomicBool::new(false),
                fetch_gate: Mutex::new(None),
                probe_calls: AtomicUsize::new(0),
                fetch_calls: AtomicUsize::new(0),
            }
        }

        pub fn with_script(self, steps: impl IntoIterator<Item = ProbeStep>) -> Self {
            self.script.lock().extend(steps);
            self
        }

        // Step used once the script runs out
        pub fn with_fallback(mut self, step: ProbeStep) -> Self {
            self.fallback = step;
            self
        }

        pub fn fail_fetch(&self) {
            self.fail_fetch.store(true, Ordering::SeqCst);
        }

        // Hold every fetch until the gate is notified
        pub fn gate_fetch(&self, gate: Arc<Notify>) {
            *self.fetch_gate.lock() = Some(gate);
        }

        pub fn probe_calls(&self) -> usize {
            self.probe_calls.load(Ordering::SeqCst)
        }

        pub fn fetch_calls(&self) -> usize {
            self.fetch_calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl JobStatusProbe for MockBackend {
        async fn probe(&self, _session: &Session, _job_id: &JobId) -> Result<StatusReport, ApiError> {
            self.probe_calls.fetch_add(1, Ordering::SeqCst);
            let step = self
                .script
                .lock()
                .pop_front()
                .unwrap_or_else(|| self.fallback.clone());

            let tag = match step {
                ProbeStep::Status(tag) => tag,
                ProbeStep::NetworkError => {
                    return Err(ApiError::NetworkError("connection reset".to_string()))
                }
                ProbeStep::Gate(gate, tag) => {
                    gate.notified().await;
                    tag
                }
            };
            Ok(StatusReport::new(normalize_status(tag)?))
        }
    }

    #[async_trait]
    impl JobResultFetcher for MockBackend {
        async fn fetch(&self, _session: &Session, _job_id: &JobId) -> Result<SearchResult, ApiError> {
            self.fetch_calls.fetch_add(1, Ordering::SeqCst);
            let gate = self.fetch_gate.lock().clone();
            if let Some(gate) = gate {
                gate.notified().await;
            }
            if self.fail_fetch.load(Ordering::SeqCst) {
                return Err(ApiError::ApiResponseError {
                    status_code: 500,
                    message: "Internal Server Error".to_string(),
                    is_retryable: true,
                });
            }
            self.result
                .lock()
                .clone()
                .ok_or_else(|| ApiError::InvalidPayload("no result scripted".to_string()))
        }
    }

    // Store that fails every save: unreachable by default, or refusing outright
    #[derive(Default)]
    pub struct RejectingGateway {
        pub attempts: AtomicUsize,
        refuse: bool,
    }

    impl RejectingGateway {
        pub fn refusing() -> Self {
            Self {
                attempts: AtomicUsize::new(0),
                refuse: true,
            }
        }
    }

    #[async_trait]
    impl PersistenceGateway for RejectingGateway {
        async fn save(
            &self,
            _session: &Session,
            _package: &ComposedPackage,
        ) -> Result<SaveOutcome, PersistenceError> {
            self.attempts.fetch_add(1, Ordering::SeqCst);
            if self.refuse {
                return Err(PersistenceError::Rejected {
                    reason: "quota exceeded".to_string(),
                });
            }
            Err(PersistenceError::Transport(ApiError::NetworkError(
                "store unreachable".to_string(),
            )))
        }

        async fn load(
            &self,
            _session: &Session,
            _id: &PackageId,
        ) -> Result<Option<ComposedPackage>, PersistenceError> {
            Ok(None)
        }
    }

    pub fn session() -> Session {
        Session::new("test-token")
    }

    pub fn date(day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2025, 6, day).unwrap()
    }

    pub fn lodging(destination: &str, id: &str, nightly_price: f64) -> Lodging {
        Lodging {
            id: id.into(),
            destination: destination.into(),
            display_name: format!("Hotel {}", id),
            star_rating: 4,
            nightly_price,
            check_in: date(1),
            check_out: date(4),
            description: String::new(),
        }
    }

    pub fn activity(destination: &str, local_index: usize, title: &str) -> Activity {
        Activity {
            local_index,
            destination: destination.into(),
            title: title.to_string(),
            description: String::new(),
            tags: ["culture".to_string()].into_iter().collect(),
            activity_type: "tour".to_string(),
        }
    }

    // Rome and Florence with one lodging each, activities only in Rome
    pub fn rome_florence_result() -> SearchResult {
        let mut result = SearchResult::default();
        result.lodgings_by_destination.insert(
            DestinationId::from("Rome"),
            vec![lodging("Rome", "rome-1", 180.0)],
        );
        result.lodgings_by_destination.insert(
            DestinationId::from("Florence"),
            vec![lodging("Florence", "flo-1", 140.0)],
        );
        result.activities_by_destination.insert(
            DestinationId::from("Rome"),
            vec![
                activity("Rome", 0, "Colosseum tour"),
                activity("Rome", 1, "Trastevere food walk"),
            ],
        );
        result
    }
}
