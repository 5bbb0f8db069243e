// Drives one remote search job from submission to a terminal state.
//
//   Idle ──start──> Polling ──probe: completed──> fetch ──> Completed
//                     │  ▲                           └────> Failed(result unavailable)
//                     │  └── probe: pending/running, or transient error below ceiling
//                     ├──── probe: failed ─────────────────> Failed(upstream)
//                     └──── ceiling of consecutive errors ──> Failed(communication)
//
// stop() moves Idle/Polling to Stopped and leaves terminal states alone.

use crate::client::{ApiError, ClientError, JobResultFetcher, JobStatusProbe, Session};
use crate::config::PollerConfig;
use crate::types::{Job, JobId, JobStatus, SearchResult, StatusReport};
use chrono::Utc;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{sleep, timeout};
use tracing::{debug, error, info, warn};

// Why a job ended in the Failed state
#[derive(Debug, Clone, PartialEq)]
pub enum FailureReason {
    // The backend itself reported the search as failed
    Upstream { message: Option<String> },
    // Too many consecutive probes failed without any answer from the backend
    CommunicationFailure { attempts: u32, last_error: String },
    // Status said completed but the result could not be retrieved
    ResultUnavailable { message: String },
}

impl FailureReason {
    // Whether the user should be told to try again later rather than that the search failed
    pub fn suggests_retry_later(&self) -> bool {
        matches!(self, FailureReason::CommunicationFailure { .. })
    }

    pub fn user_message(&self) -> &'static str {
        match self {
            FailureReason::Upstream { .. } => {
                "The search could not be completed. Please adjust your preferences and try again."
            }
            FailureReason::CommunicationFailure { .. } => {
                "We could not check on your search right now. Please try again later."
            }
            FailureReason::ResultUnavailable { .. } => {
                "Your search finished but its results could not be loaded. Please try again later."
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum PollerState {
    Idle,
    Polling,
    Completed,
    Failed(FailureReason),
    // Cancelled by the owner before reaching a terminal state
    Stopped,
}

impl PollerState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, PollerState::Completed | PollerState::Failed(_))
    }

    // No further transitions will happen
    pub fn is_settled(&self) -> bool {
        self.is_terminal() || matches!(self, PollerState::Stopped)
    }
}

#[derive(Error, Debug)]
pub enum PollerError {
    #[error("Job id must not be empty")]
    EmptyJobId,

    #[error("Poller already started for job {job_id}")]
    AlreadyStarted { job_id: JobId },

    #[error("Poller was stopped and cannot be restarted")]
    Stopped,

    #[error(transparent)]
    Config(#[from] ClientError),
}

// What the loop does after a probe has been applied
enum Step {
    Continue,
    Fetch,
    Done,
}

// State shared between the poller handle and its background task
struct Shared {
    job: Mutex<Option<Job>>,
    result: Mutex<Option<Arc<SearchResult>>>,
    state: watch::Sender<PollerState>,
    stopped: AtomicBool,
    fetch_claimed: AtomicBool,
}

impl Shared {
    fn new() -> Self {
        let (state, _) = watch::channel(PollerState::Idle);
        Self {
            job: Mutex::new(None),
            result: Mutex::new(None),
            state,
            stopped: AtomicBool::new(false),
            fetch_claimed: AtomicBool::new(false),
        }
    }

    fn apply_probe(&self, outcome: Result<StatusReport, ApiError>, ceiling: u32) -> Step {
        // All transitions happen under the job lock so stop() cannot interleave
        let mut guard = self.job.lock();
        if self.stopped.load(Ordering::SeqCst) {
            debug!("discarding probe outcome that arrived after stop");
            return Step::Done;
        }
        let Some(job) = guard.as_mut() else {
            return Step::Done;
        };
        job.last_polled_at = Some(Utc::now());

        match outcome {
            Ok(report) => {
                job.attempt_failures = 0;
                match report.status {
                    // Completed is recorded only once the result is in hand
                    JobStatus::Completed => {
                        // At most one fetch per job, whatever the probe keeps saying
                        if self
                            .fetch_claimed
                            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
                            .is_ok()
                        {
                            info!(job_id = %job.id, "job completed, fetching results");
                            Step::Fetch
                        } else {
                            Step::Done
                        }
                    }
                    JobStatus::Failed => {
                        job.status = JobStatus::Failed;
                        error!(job_id = %job.id, message = ?report.message, "backend reported job failure");
                        self.state.send_replace(PollerState::Failed(FailureReason::Upstream {
                            message: report.message,
                        }));
                        Step::Done
                    }
                    JobStatus::Pending | JobStatus::Running => {
                        job.status = report.status;
                        debug!(job_id = %job.id, status = %report.status, "job still in progress");
                        Step::Continue
                    }
                }
            }
            Err(err) => {
                job.attempt_failures += 1;
                warn!(
                    job_id = %job.id,
                    attempt = job.attempt_failures,
                    ceiling,
                    error = %err,
                    "job status probe failed"
                );
                if job.attempt_failures >= ceiling {
                    job.status = JobStatus::Failed;
                    error!(job_id = %job.id, "giving up after consecutive probe failures");
                    self.state.send_replace(PollerState::Failed(
                        FailureReason::CommunicationFailure {
                            attempts: job.attempt_failures,
                            last_error: err.to_string(),
                        },
                    ));
                    Step::Done
                } else {
                    Step::Continue
                }
            }
        }
    }

    fn finish_fetch(&self, outcome: Result<SearchResult, ApiError>) {
        let mut guard = self.job.lock();
        if self.stopped.load(Ordering::SeqCst) {
            debug!("discarding result fetched after stop");
            return;
        }

        match outcome {
            Ok(result) => {
                if let Some(job) = guard.as_mut() {
                    job.status = JobStatus::Completed;
                }
                *self.result.lock() = Some(Arc::new(result));
                self.state.send_replace(PollerState::Completed);
            }
            Err(err) => {
                if let Some(job) = guard.as_mut() {
                    job.status = JobStatus::Failed;
                    error!(job_id = %job.id, error = %err, "result fetch failed");
                }
                self.state.send_replace(PollerState::Failed(FailureReason::ResultUnavailable {
                    message: err.to_string(),
                }));
            }
        }
    }
}

/// Polls one job's status on a fixed cadence and fetches its result once.
///
/// Probes are strictly sequential: the next one is scheduled only after the
/// previous one resolved, so there is never more than one request in flight
/// for the job.
pub struct JobPoller {
    probe: Arc<dyn JobStatusProbe>,
    fetcher: Arc<dyn JobResultFetcher>,
    session: Session,
    config: PollerConfig,
    shared: Arc<Shared>,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl JobPoller {
    pub fn new(
        probe: Arc<dyn JobStatusProbe>,
        fetcher: Arc<dyn JobResultFetcher>,
        session: Session,
        config: PollerConfig,
    ) -> Result<Self, PollerError> {
        config.validate()?;
        Ok(Self {
            probe,
            fetcher,
            session,
            config,
            shared: Arc::new(Shared::new()),
            task: Mutex::new(None),
        })
    }

    /// Begin polling `job_id`. Must be called from within a tokio runtime.
    pub fn start(&self, job_id: JobId) -> Result<(), PollerError> {
        if job_id.is_empty() {
            return Err(PollerError::EmptyJobId);
        }

        let mut task = self.task.lock();
        {
            let mut job = self.shared.job.lock();
            if self.shared.stopped.load(Ordering::SeqCst) {
                return Err(PollerError::Stopped);
            }
            if let Some(existing) = job.as_ref() {
                return Err(PollerError::AlreadyStarted {
                    job_id: existing.id.clone(),
                });
            }
            *job = Some(Job::new(job_id.clone()));
            self.shared.state.send_replace(PollerState::Polling);
        }

        info!(job_id = %job_id, interval_ms = self.config.poll_interval_ms, "polling started");
        *task = Some(tokio::spawn(run(
            Arc::clone(&self.shared),
            Arc::clone(&self.probe),
            Arc::clone(&self.fetcher),
            self.session.clone(),
            job_id,
            self.config.clone(),
        )));
        Ok(())
    }

    /// Cancel polling. Idempotent and safe from any state; a probe or fetch
    /// still in flight is dropped and its outcome never applied.
    pub fn stop(&self) {
        {
            let _job = self.shared.job.lock();
            if self.shared.stopped.swap(true, Ordering::SeqCst) {
                return;
            }
            self.shared.state.send_if_modified(|state| {
                if state.is_settled() {
                    false
                } else {
                    *state = PollerState::Stopped;
                    true
                }
            });
        }

        if let Some(handle) = self.task.lock().take() {
            handle.abort();
        }
        debug!(state = ?self.state(), "poller stopped");
    }

    pub fn state(&self) -> PollerState {
        self.shared.state.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<PollerState> {
        self.shared.state.subscribe()
    }

    // Resolves once the poller is terminal or stopped
    pub async fn wait_for_terminal(&self) -> PollerState {
        let mut rx = self.subscribe();
        let settled = rx.wait_for(PollerState::is_settled).await.map(|s| (*s).clone());
        // the sender lives in self, so the channel cannot close while we wait
        settled.unwrap_or_else(|_| self.state())
    }

    pub fn job(&self) -> Option<Job> {
        self.shared.job.lock().clone()
    }

    pub fn result(&self) -> Option<Arc<SearchResult>> {
        self.shared.result.lock().clone()
    }

    pub fn is_stopped(&self) -> bool {
        self.shared.stopped.load(Ordering::SeqCst)
    }
}

impl Drop for JobPoller {
    fn drop(&mut self) {
        if let Some(handle) = self.task.get_mut().take() {
            handle.abort();
        }
    }
}

async fn run(
    shared: Arc<Shared>,
    probe: Arc<dyn JobStatusProbe>,
    fetcher: Arc<dyn JobResultFetcher>,
    session: Session,
    job_id: JobId,
    config: PollerConfig,
) {
    loop {
        let outcome = match timeout(config.request_timeout(), probe.probe(&session, &job_id)).await {
            Ok(outcome) => outcome,
            Err(_) => Err(ApiError::Timeout(config.request_timeout_ms)),
        };

        match shared.apply_probe(outcome, config.max_consecutive_failures) {
            Step::Continue => sleep(config.poll_interval()).await,
            Step::Fetch => {
                let outcome = match timeout(config.fetch_timeout(), fetcher.fetch(&session, &job_id)).await {
                    Ok(outcome) => outcome,
                    Err(_) => Err(ApiError::Timeout(config.fetch_timeout_ms)),
                };
                shared.finish_fetch(outcome);
                return;
            }
            Step::Done => return,
        }
    }
}
