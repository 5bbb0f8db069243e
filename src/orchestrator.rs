// Wires one job's poller into selection tracking, composition and persistence.
// A new job fully replaces the previous job's results and selections.

use crate::client::{
    ApiError, ClientError, JobResultFetcher, JobStatusProbe, PersistenceError, PersistenceGateway,
    SaveOutcome, Session,
};
use crate::composer::{ComposeOptions, Composition, PackageComposer};
use crate::config::{PollerConfig, RetryConfig};
use crate::poller::{FailureReason, JobPoller, PollerError, PollerState};
use crate::selection::SelectionStore;
use crate::types::{ActivityId, ComposedPackage, DestinationId, JobId, LodgingId, PackageId, SearchResult};
use futures::future::join_all;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::watch;
use tokio::time::{sleep, timeout};
use tracing::{debug, info, warn};

#[derive(Error, Debug)]
pub enum OrchestratorError {
    #[error("No job is being tracked")]
    NoActiveJob,

    #[error("Search job failed: {}", .0.user_message())]
    JobFailed(FailureReason),

    #[error("Job tracking was stopped before the search finished")]
    Stopped,

    #[error(transparent)]
    Poller(#[from] PollerError),
}

// Everything owned on behalf of the job currently being tracked
struct JobContext {
    job_id: JobId,
    poller: JobPoller,
    selections: SelectionStore,
    result: Option<Arc<SearchResult>>,
}

pub struct Orchestrator {
    probe: Arc<dyn JobStatusProbe>,
    fetcher: Arc<dyn JobResultFetcher>,
    gateway: Arc<dyn PersistenceGateway>,
    session: Session,
    poller_config: PollerConfig,
    composer: PackageComposer,
    save_retry: RetryConfig,
    current: Option<JobContext>,
}

impl Orchestrator {
    pub fn new(
        probe: Arc<dyn JobStatusProbe>,
        fetcher: Arc<dyn JobResultFetcher>,
        gateway: Arc<dyn PersistenceGateway>,
        session: Session,
        poller_config: PollerConfig,
        compose_options: ComposeOptions,
    ) -> Result<Self, ClientError> {
        poller_config.validate()?;
        Ok(Self {
            probe,
            fetcher,
            gateway,
            session,
            poller_config,
            composer: PackageComposer::new(compose_options),
            save_retry: RetryConfig::default(),
            current: None,
        })
    }

    pub fn with_save_retry(mut self, retry: RetryConfig) -> Self {
        self.save_retry = retry;
        self
    }

    /// Start tracking `job_id`, discarding any previous job's state.
    pub fn track_job(&mut self, job_id: JobId) -> Result<(), OrchestratorError> {
        if let Some(previous) = self.current.take() {
            previous.poller.stop();
            debug!(previous = %previous.job_id, next = %job_id, "replacing tracked job");
        }

        let poller = JobPoller::new(
            Arc::clone(&self.probe),
            Arc::clone(&self.fetcher),
            self.session.clone(),
            self.poller_config.clone(),
        )?;
        poller.start(job_id.clone())?;

        info!(job_id = %job_id, "tracking search job");
        self.current = Some(JobContext {
            job_id,
            poller,
            selections: SelectionStore::new(),
            result: None,
        });
        Ok(())
    }

    pub fn job_id(&self) -> Option<&JobId> {
        self.current.as_ref().map(|ctx| &ctx.job_id)
    }

    pub fn state(&self) -> PollerState {
        self.current
            .as_ref()
            .map_or(PollerState::Idle, |ctx| ctx.poller.state())
    }

    // State changes of the tracked job's poller
    pub fn subscribe(&self) -> Option<watch::Receiver<PollerState>> {
        self.current.as_ref().map(|ctx| ctx.poller.subscribe())
    }

    /// Pick up the poller's result if it has arrived and seed the selection store
    /// with its destinations. Safe to call repeatedly.
    pub fn absorb_result(&mut self) -> Option<Arc<SearchResult>> {
        let ctx = self.current.as_mut()?;
        if ctx.result.is_none() {
            let result = ctx.poller.result()?;
            if result.is_empty() {
                warn!(job_id = %ctx.job_id, "search completed without lodgings or activities");
            }
            let added = ctx.selections.initialize(&result.destinations());
            info!(job_id = %ctx.job_id, destinations = added, "search results received");
            ctx.result = Some(result);
        }
        ctx.result.clone()
    }

    /// Wait until the tracked job settles and return its results.
    pub async fn wait_for_results(&mut self) -> Result<Arc<SearchResult>, OrchestratorError> {
        let ctx = self.current.as_ref().ok_or(OrchestratorError::NoActiveJob)?;
        let job_id = ctx.job_id.clone();
        match ctx.poller.wait_for_terminal().await {
            PollerState::Completed => self.absorb_result().ok_or(OrchestratorError::Stopped),
            PollerState::Failed(reason) => {
                warn!(job_id = %job_id, reason = ?reason, "search job did not complete");
                Err(OrchestratorError::JobFailed(reason))
            }
            _ => Err(OrchestratorError::Stopped),
        }
    }

    pub fn result(&self) -> Option<Arc<SearchResult>> {
        let ctx = self.current.as_ref()?;
        ctx.result.clone().or_else(|| ctx.poller.result())
    }

    // Seeded from the result as soon as it has arrived
    pub fn selections(&mut self) -> Option<&SelectionStore> {
        self.absorb_result();
        self.current.as_ref().map(|ctx| &ctx.selections)
    }

    pub fn select_lodging(
        &mut self,
        destination: &DestinationId,
        lodging_id: LodgingId,
    ) -> Result<(), OrchestratorError> {
        self.selections_mut()?.select_lodging(destination, lodging_id);
        Ok(())
    }

    pub fn deselect_lodging(
        &mut self,
        destination: &DestinationId,
    ) -> Result<Option<LodgingId>, OrchestratorError> {
        Ok(self.selections_mut()?.deselect_lodging(destination))
    }

    pub fn toggle_activity(
        &mut self,
        destination: &DestinationId,
        activity_id: ActivityId,
        included: bool,
    ) -> Result<bool, OrchestratorError> {
        Ok(self
            .selections_mut()?
            .toggle_activity(destination, activity_id, included))
    }

    // One package per destination with a lodging chosen
    pub fn compose(&mut self) -> Composition {
        self.absorb_result();
        match self.composition_inputs() {
            Some((result, selections)) => self.composer.compose(&result, selections),
            None => Composition::default(),
        }
    }

    // A single package covering every destination with a lodging chosen
    pub fn compose_combined(&mut self) -> Composition {
        self.absorb_result();
        match self.composition_inputs() {
            Some((result, selections)) => self.composer.compose_combined(&result, selections),
            None => Composition::default(),
        }
    }

    /// Persist one package, retrying transient transport failures with backoff.
    ///
    /// The gateway is idempotent by package id, so a retry after a lost
    /// acknowledgement reports `AlreadySaved` rather than storing twice.
    /// Failures leave results and selections untouched.
    pub async fn save(&self, package: &ComposedPackage) -> Result<SaveOutcome, PersistenceError> {
        let mut retry_attempt = 0;
        loop {
            match self.save_once(package).await {
                Ok(saved) => {
                    info!(package_id = %package.id, outcome = ?saved, "package persisted");
                    return Ok(saved);
                }
                Err(err) if err.is_retryable() && retry_attempt < self.save_retry.max_retries => {
                    let delay = self.save_retry.backoff(retry_attempt);
                    retry_attempt += 1;
                    debug!(
                        package_id = %package.id,
                        attempt = retry_attempt,
                        delay_ms = delay.as_millis() as u64,
                        error = %err,
                        "retrying package save"
                    );
                    sleep(delay).await;
                }
                Err(err) => {
                    warn!(package_id = %package.id, error = %err, "package could not be persisted");
                    return Err(err);
                }
            }
        }
    }

    async fn save_once(&self, package: &ComposedPackage) -> Result<SaveOutcome, PersistenceError> {
        let limit = self.poller_config.request_timeout();
        match timeout(limit, self.gateway.save(&self.session, package)).await {
            Ok(outcome) => outcome,
            Err(_) => Err(PersistenceError::Transport(ApiError::Timeout(
                self.poller_config.request_timeout_ms,
            ))),
        }
    }

    pub async fn save_all(
        &self,
        packages: &[ComposedPackage],
    ) -> Vec<Result<SaveOutcome, PersistenceError>> {
        join_all(packages.iter().map(|package| self.save(package))).await
    }

    pub async fn load(&self, id: &PackageId) -> Result<Option<ComposedPackage>, PersistenceError> {
        self.gateway.load(&self.session, id).await
    }

    // Stop polling but keep whatever results and selections exist
    pub fn stop(&mut self) {
        if let Some(ctx) = self.current.as_ref() {
            ctx.poller.stop();
        }
    }

    // Session ended: stop polling and drop the job's state entirely
    pub fn end_session(&mut self) {
        if let Some(ctx) = self.current.take() {
            ctx.poller.stop();
            info!(job_id = %ctx.job_id, "session ended, job state discarded");
        }
    }

    fn selections_mut(&mut self) -> Result<&mut SelectionStore, OrchestratorError> {
        self.absorb_result();
        self.current
            .as_mut()
            .map(|ctx| &mut ctx.selections)
            .ok_or(OrchestratorError::NoActiveJob)
    }

    fn composition_inputs(&self) -> Option<(Arc<SearchResult>, &SelectionStore)> {
        let ctx = self.current.as_ref()?;
        Some((ctx.result.clone()?, &ctx.selections))
    }
}
