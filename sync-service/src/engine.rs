//! The sync engine: full refresh of the cache, then an in-order drain of the
//! mutation queue.
//!
//! A run moves `Idle -> Refreshing -> Draining -> Idle` and is not
//! self-scheduling; see [`crate::worker`] for the triggers. Runs never
//! overlap: `run_once` holds an async mutex for its whole duration.

use std::{
    path::Path,
    sync::Arc,
    time::{Duration, Instant},
};

use futures::StreamExt;
use meter_client::{
    domain::{derive_locations, QueuedMutation},
    LocalStore, StorageError,
};
use tokio::sync::{broadcast, watch, Mutex};

use crate::{
    queue::MutationQueue,
    remote::{with_timeout, RemoteClient, RemoteError},
    upload::ObjectStore,
};

const EVENT_CAPACITY: usize = 64;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncState {
    Idle,
    Refreshing,
    Draining,
}

/// A queued write the remote refused; it has been removed from the queue.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RejectedMutation {
    pub mutation_id: i64,
    pub endpoint: String,
    /// HTTP status, absent when the envelope was rejected locally.
    pub status: Option<u16>,
    pub message: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SyncReport {
    /// Meters written by the refresh, `None` if the refresh did not complete.
    pub refreshed_meters: Option<usize>,
    /// The refresh hit a transport failure; the cache is stale and the drain
    /// was skipped.
    pub stale: bool,
    pub sent: usize,
    pub rejected: Vec<RejectedMutation>,
    /// Mutation whose transient failure stopped the drain.
    pub blocked_on: Option<i64>,
    pub remaining: u64,
}

impl SyncReport {
    pub fn needs_retry(&self) -> bool {
        self.stale || self.blocked_on.is_some()
    }

    /// Confirmed writes are only visible locally after the next refresh.
    pub fn needs_refresh(&self) -> bool {
        self.sent > 0
    }
}

#[derive(Debug, Clone)]
pub enum SyncEvent {
    MutationRejected(RejectedMutation),
    RefreshRejected { status: u16, message: String },
    RunCompleted(SyncReport),
}

#[derive(thiserror::Error, Debug)]
pub enum SyncError {
    #[error(transparent)]
    Storage(#[from] StorageError),
    #[error("refresh rejected: {0}")]
    Refresh(RemoteError),
}

enum Delivery {
    Confirmed,
    Transient(String),
    Rejected { status: Option<u16>, message: String },
}

#[derive(serde::Deserialize)]
struct UploadBody {
    local_path: String,
}

pub struct SyncEngine {
    store: LocalStore,
    queue: MutationQueue,
    remote: Arc<dyn RemoteClient>,
    objects: Option<Arc<dyn ObjectStore>>,
    request_timeout: Duration,
    run_lock: Mutex<()>,
    state: watch::Sender<SyncState>,
    events: broadcast::Sender<SyncEvent>,
}

impl SyncEngine {
    pub fn new(store: LocalStore, remote: Arc<dyn RemoteClient>, request_timeout: Duration) -> Self {
        Self {
            queue: MutationQueue::new(store.clone()),
            store,
            remote,
            objects: None,
            request_timeout,
            run_lock: Mutex::new(()),
            state: watch::channel(SyncState::Idle).0,
            events: broadcast::channel(EVENT_CAPACITY).0,
        }
    }

    pub fn with_object_store(mut self, objects: Arc<dyn ObjectStore>) -> Self {
        self.objects = Some(objects);
        self
    }

    pub fn queue(&self) -> &MutationQueue {
        &self.queue
    }

    pub fn state(&self) -> watch::Receiver<SyncState> {
        self.state.subscribe()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SyncEvent> {
        self.events.subscribe()
    }

    /// One refresh + drain cycle. Callers arriving while a run is active wait
    /// for it to finish and then run on their own.
    pub async fn run_once(&self) -> Result<SyncReport, SyncError> {
        let _running = self.run_lock.lock().await;
        let started = Instant::now();
        metrics::counter!("sync_runs_total").increment(1);

        let result = self.run_locked().await;
        self.state.send_replace(SyncState::Idle);
        metrics::histogram!("sync_run_duration_seconds").record(started.elapsed().as_secs_f64());

        match &result {
            Ok(report) => {
                tracing::info!(
                    refreshed = ?report.refreshed_meters,
                    stale = report.stale,
                    sent = report.sent,
                    rejected = report.rejected.len(),
                    remaining = report.remaining,
                    "sync run finished"
                );
                let _ = self.events.send(SyncEvent::RunCompleted(report.clone()));
            }
            Err(e) => {
                metrics::counter!("sync_run_failures_total").increment(1);
                tracing::error!(error = %e, "sync run failed");
            }
        }

        result
    }

    async fn run_locked(&self) -> Result<SyncReport, SyncError> {
        let mut report = SyncReport::default();

        self.state.send_replace(SyncState::Refreshing);
        if self.refresh(&mut report).await? {
            self.state.send_replace(SyncState::Draining);
            self.drain(&mut report).await?;
        }

        report.remaining = self.queue.report_depth().await?;
        Ok(report)
    }

    /// Returns whether the run should go on to drain.
    async fn refresh(&self, report: &mut SyncReport) -> Result<bool, SyncError> {
        match with_timeout(self.request_timeout, self.remote.fetch_all_meters()).await {
            Ok(meters) => {
                let locations = derive_locations(&meters);
                self.store.replace_snapshot(&meters, &locations).await?;
                report.refreshed_meters = Some(meters.len());
                Ok(true)
            }
            Err(e) if e.is_transient() => {
                tracing::warn!(error = %e, "refresh failed, cache left stale");
                metrics::counter!("sync_refresh_stale_total").increment(1);
                report.stale = true;
                Ok(false)
            }
            Err(e) => {
                if let RemoteError::Server { status, message } = &e {
                    let _ = self.events.send(SyncEvent::RefreshRejected {
                        status: *status,
                        message: message.clone(),
                    });
                }
                Err(SyncError::Refresh(e))
            }
        }
    }

    async fn drain(&self, report: &mut SyncReport) -> Result<(), StorageError> {
        let mut pending = self.queue.drain_in_order();

        while let Some(mutation) = pending.next().await {
            let mutation = mutation?;

            match self.deliver(&mutation).await {
                Delivery::Confirmed => {
                    self.queue.complete(mutation.id).await?;
                    report.sent += 1;
                    metrics::counter!("sync_mutations_sent_total").increment(1);
                }
                Delivery::Transient(reason) => {
                    // Later entries may depend on this one; stop here.
                    let attempts = self.queue.record_failure(mutation.id).await?;
                    metrics::counter!("sync_mutation_retry_total").increment(1);
                    tracing::warn!(
                        mutation_id = mutation.id,
                        attempts,
                        error = %reason,
                        "mutation delivery failed, drain paused"
                    );
                    report.blocked_on = Some(mutation.id);
                    break;
                }
                Delivery::Rejected { status, message } => {
                    self.queue.complete(mutation.id).await?;
                    metrics::counter!("sync_mutations_rejected_total").increment(1);
                    tracing::warn!(
                        mutation_id = mutation.id,
                        endpoint = %mutation.endpoint,
                        ?status,
                        message = %message,
                        "mutation rejected, dropped from queue"
                    );

                    let rejected = RejectedMutation {
                        mutation_id: mutation.id,
                        endpoint: mutation.endpoint.clone(),
                        status,
                        message,
                    };
                    let _ = self.events.send(SyncEvent::MutationRejected(rejected.clone()));
                    report.rejected.push(rejected);
                }
            }
        }

        Ok(())
    }

    async fn deliver(&self, mutation: &QueuedMutation) -> Delivery {
        let request = mutation.request();
        if let Some(remote_path) = request.object_path() {
            return self.upload(remote_path, &request.body).await;
        }

        match with_timeout(self.request_timeout, self.remote.send(&request)).await {
            Ok(_) => Delivery::Confirmed,
            Err(RemoteError::Network(reason)) => Delivery::Transient(reason),
            Err(RemoteError::Server { status, message }) => Delivery::Rejected {
                status: Some(status),
                message,
            },
        }
    }

    async fn upload(&self, remote_path: &str, body: &str) -> Delivery {
        let Some(objects) = &self.objects else {
            return Delivery::Rejected {
                status: None,
                message: "no object store configured".to_string(),
            };
        };
        let local_path = match serde_json::from_str::<UploadBody>(body) {
            Ok(body) => body.local_path,
            Err(e) => {
                return Delivery::Rejected {
                    status: None,
                    message: format!("malformed upload envelope: {e}"),
                }
            }
        };

        // A source that is gone will never upload; drop it rather than block the queue.
        match tokio::fs::metadata(&local_path).await {
            Ok(meta) if meta.is_file() => {}
            Ok(_) => {
                return Delivery::Rejected {
                    status: None,
                    message: format!("upload source {local_path} is not a file"),
                }
            }
            Err(e) => {
                return Delivery::Rejected {
                    status: None,
                    message: format!("upload source {local_path} unreadable: {e}"),
                }
            }
        }

        if objects.upload(Path::new(&local_path), remote_path).await {
            Delivery::Confirmed
        } else {
            Delivery::Transient(format!("upload of {remote_path} did not complete"))
        }
    }
}
