// Travel package engine: tracks an asynchronous search job and composes
// persistable packages from the user's per-destination choices.

pub mod client;
pub mod composer;
pub mod config;
pub mod orchestrator;
pub mod poller;
pub mod selection;
pub mod store;
pub mod types;
pub mod wire;

// Re-export key types for convenience
pub use client::{
    ApiError, ClientError, ClientStats, HttpPackageStore, JobResultFetcher, JobStatusProbe,
    PersistenceError, PersistenceGateway, SaveOutcome, Session, TravelApiClient,
};
pub use composer::{ComposeOptions, Composition, CompositionWarning, PackageComposer, PricingMode};
pub use config::{ClientConfig, Credentials, PollerConfig, RetryConfig};
pub use orchestrator::{Orchestrator, OrchestratorError};
pub use poller::{FailureReason, JobPoller, PollerError, PollerState};
pub use selection::{Selection, SelectionStore};
pub use store::{InMemoryPackageStore, StoreStatsReport};
pub use types::{
    Activity, ActivityId, ComposedPackage, DestinationId, Job, JobId, JobStatus, Lodging,
    LodgingId, PackageId, SearchResult, StatusReport,
};
