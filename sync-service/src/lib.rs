pub mod config;
pub mod connectivity;
pub mod engine;
pub mod metrics_server;
pub mod observability;
pub mod queue;
pub mod remote;
pub mod repository;
pub mod upload;
pub mod worker;

#[cfg(test)]
pub(crate) mod testing;

pub use connectivity::Connectivity;
pub use engine::{SyncEngine, SyncError, SyncEvent, SyncReport, SyncState};
pub use queue::MutationQueue;
pub use remote::{HttpRemoteClient, RemoteClient, RemoteError};
pub use repository::{Repository, SubmitOutcome};
pub use worker::{Schedule, SyncHandle, SyncWorker};
