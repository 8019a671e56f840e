//! Single entry point for callers: reads come from the local store, writes
//! go to the remote immediately when possible and through the mutation queue
//! otherwise.

use std::{path::Path, sync::Arc, time::Duration};

use futures::stream::BoxStream;
use meter_client::{
    db::{LocationFilter, MeterFilter},
    domain::{Location, Meter, MutationRequest, Reading, ReadingDraft},
    LocalStore, StorageError,
};
use uuid::Uuid;

use crate::{
    connectivity::Connectivity,
    queue::MutationQueue,
    remote::{with_timeout, RemoteClient, RemoteError},
    worker::SyncHandle,
};

/// What happened to a submitted reading.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SubmitOutcome {
    /// Confirmed by the remote.
    Submitted { reading_id: Uuid },
    /// Durably queued; will be delivered by a later sync run.
    Queued { reading_id: Uuid, mutation_id: i64 },
    /// Refused by the remote. Not queued; needs user action.
    Rejected { reading_id: Uuid, status: u16, message: String },
}

impl SubmitOutcome {
    pub fn reading_id(&self) -> Uuid {
        match self {
            Self::Submitted { reading_id } | Self::Queued { reading_id, .. } | Self::Rejected { reading_id, .. } => {
                *reading_id
            }
        }
    }
}

#[derive(Clone)]
pub struct Repository {
    store: LocalStore,
    queue: MutationQueue,
    remote: Arc<dyn RemoteClient>,
    sync: SyncHandle,
    connectivity: Connectivity,
    request_timeout: Duration,
}

impl Repository {
    pub fn new(
        store: LocalStore,
        remote: Arc<dyn RemoteClient>,
        sync: SyncHandle,
        connectivity: Connectivity,
        request_timeout: Duration,
    ) -> Self {
        Self {
            queue: MutationQueue::new(store.clone()),
            store,
            remote,
            sync,
            connectivity,
            request_timeout,
        }
    }

    pub async fn submit_reading(&self, draft: ReadingDraft) -> Result<SubmitOutcome, StorageError> {
        self.resubmit(draft.into_reading()).await
    }

    /// Submit a reading that already has its identifier.
    pub async fn resubmit(&self, reading: Reading) -> Result<SubmitOutcome, StorageError> {
        let reading_id = reading.id;

        match with_timeout(self.request_timeout, self.remote.submit_reading(&reading)).await {
            Ok(_) => {
                metrics::counter!("repository_readings_submitted_total").increment(1);
                tracing::debug!(%reading_id, meter_id = %reading.meter_id, "reading submitted");
                // Pull the new last reading into the cache.
                self.sync.trigger();
                Ok(SubmitOutcome::Submitted { reading_id })
            }
            Err(RemoteError::Network(reason)) => {
                let mutation_id = self.queue.push_request(&MutationRequest::from(&reading)).await?;
                metrics::counter!("repository_readings_queued_total").increment(1);
                tracing::info!(%reading_id, mutation_id, error = %reason, "reading queued for later delivery");
                self.trigger_if_online();
                Ok(SubmitOutcome::Queued { reading_id, mutation_id })
            }
            Err(RemoteError::Server { status, message }) => {
                metrics::counter!("repository_readings_rejected_total").increment(1);
                tracing::warn!(%reading_id, status, message = %message, "reading rejected");
                Ok(SubmitOutcome::Rejected {
                    reading_id,
                    status,
                    message,
                })
            }
        }
    }

    /// Queue a photo of a meter for upload and return the mutation id.
    pub async fn attach_photo(&self, meter_id: &str, local_path: &Path) -> Result<i64, StorageError> {
        let extension = local_path
            .extension()
            .map(|ext| format!(".{}", ext.to_string_lossy()))
            .unwrap_or_default();
        let remote_path = format!("photos/{meter_id}/{}{extension}", Uuid::new_v4());

        let id = self
            .queue
            .push_request(&MutationRequest::upload(&remote_path, local_path))
            .await?;
        self.trigger_if_online();
        Ok(id)
    }

    pub async fn meters(&self, filter: &MeterFilter) -> Result<Vec<Meter>, StorageError> {
        self.store.meters(filter).await
    }

    pub fn watch_meters(&self, filter: MeterFilter) -> BoxStream<'static, Result<Vec<Meter>, StorageError>> {
        self.store.watch_meters(filter)
    }

    pub async fn locations(&self, filter: &LocationFilter) -> Result<Vec<Location>, StorageError> {
        self.store.locations(filter).await
    }

    pub fn watch_locations(&self, filter: LocationFilter) -> BoxStream<'static, Result<Vec<Location>, StorageError>> {
        self.store.watch_locations(filter)
    }

    pub async fn pending_count(&self) -> Result<u64, StorageError> {
        self.queue.len().await
    }

    pub fn watch_pending_count(&self) -> BoxStream<'static, Result<u64, StorageError>> {
        self.store.watch_pending_count()
    }

    /// Ask for a sync run; the cache is updated when it completes.
    pub fn refresh(&self) {
        self.sync.trigger();
    }

    fn trigger_if_online(&self) {
        if self.connectivity.is_online() {
            self.sync.trigger();
        }
    }
}

#[cfg(test)]
mod tests {
    use futures::StreamExt;
    use meter_client::domain::{Method, OBJECTS_ENDPOINT_PREFIX};

    use super::*;
    use crate::{
        engine::SyncEngine,
        testing::{draft, eventually, meter, open_store, FakeRemote, Reply},
        worker::{Schedule, SyncWorker},
    };

    const TIMEOUT: Duration = Duration::from_secs(1);

    struct Fixture {
        _dir: tempfile::TempDir,
        store: LocalStore,
        remote: Arc<FakeRemote>,
        engine: Arc<SyncEngine>,
        connectivity: Connectivity,
        repository: Repository,
        worker: SyncWorker,
        handle: SyncHandle,
    }

    // The worker is only spawned by tests that exercise triggers; the rest
    // drive the engine directly.
    async fn fixture(online: bool) -> Fixture {
        let dir = tempfile::tempdir().unwrap();
        let store = open_store(&dir).await;
        let remote = FakeRemote::new();
        let connectivity = Connectivity::new(online);
        let engine = Arc::new(SyncEngine::new(store.clone(), remote.clone(), TIMEOUT));
        let schedule = Schedule {
            periodic: Duration::from_secs(3600),
            retry_backoff: Duration::from_secs(1),
            max_backoff: Duration::from_secs(1),
        };
        let (worker, handle) = SyncWorker::new(engine.clone(), connectivity.clone(), schedule);
        let repository = Repository::new(store.clone(), remote.clone(), handle.clone(), connectivity.clone(), TIMEOUT);

        Fixture {
            _dir: dir,
            store,
            remote,
            engine,
            connectivity,
            repository,
            worker,
            handle,
        }
    }

    #[tokio::test]
    async fn offline_submit_is_queued_then_delivered_once_with_original_id() {
        let fx = fixture(false).await;
        fx.remote.set_offline(true);

        let outcome = fx.repository.submit_reading(draft("m-1", 1500.0)).await.unwrap();
        let reading_id = outcome.reading_id();
        assert!(matches!(outcome, SubmitOutcome::Queued { .. }));
        assert_eq!(fx.repository.pending_count().await.unwrap(), 1);
        assert!(fx.remote.delivered().is_empty());

        fx.remote.set_offline(false);
        fx.connectivity.set_online(true);
        let report = fx.engine.run_once().await.unwrap();

        assert_eq!(report.sent, 1);
        assert_eq!(fx.repository.pending_count().await.unwrap(), 0);
        assert_eq!(fx.remote.delivered_ids(), vec![reading_id.to_string()]);
    }

    #[tokio::test]
    async fn server_rejection_is_reported_and_not_queued() {
        let fx = fixture(true).await;
        fx.remote.script_send([Reply::Server(422)]);

        let outcome = fx.repository.submit_reading(draft("m-1", -1.0)).await.unwrap();

        match outcome {
            SubmitOutcome::Rejected { status, .. } => assert_eq!(status, 422),
            other => panic!("unexpected outcome {other:?}"),
        }
        assert_eq!(fx.repository.pending_count().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn online_submit_is_confirmed_directly() {
        let fx = fixture(true).await;

        let outcome = fx.repository.submit_reading(draft("m-1", 1500.0)).await.unwrap();

        assert_eq!(
            outcome,
            SubmitOutcome::Submitted {
                reading_id: outcome.reading_id()
            }
        );
        assert_eq!(fx.repository.pending_count().await.unwrap(), 0);
        assert_eq!(fx.remote.stored_readings(), 1);
    }

    #[tokio::test]
    async fn lost_acknowledgment_does_not_duplicate_the_reading() {
        let fx = fixture(true).await;
        fx.remote.script_send([Reply::AcceptThenNetwork]);

        let outcome = fx.repository.submit_reading(draft("m-1", 1500.0)).await.unwrap();
        assert!(matches!(outcome, SubmitOutcome::Queued { .. }));

        fx.engine.run_once().await.unwrap();

        // Delivered twice under one identifier, stored once.
        let ids = fx.remote.delivered_ids();
        assert_eq!(ids.len(), 2);
        assert_eq!(ids[0], ids[1]);
        assert_eq!(ids[0], outcome.reading_id().to_string());
        assert_eq!(fx.remote.stored_readings(), 1);
        assert_eq!(fx.repository.pending_count().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn photos_are_always_queued_as_uploads() {
        let fx = fixture(true).await;

        let id = fx
            .repository
            .attach_photo("m-1", Path::new("/data/photos/IMG_1.jpg"))
            .await
            .unwrap();

        let pending = fx.store.list_pending().await.unwrap();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].id, id);
        assert_eq!(pending[0].method, Method::Put);
        assert!(pending[0].endpoint.starts_with(&format!("{OBJECTS_ENDPOINT_PREFIX}photos/m-1/")));
        assert!(pending[0].endpoint.ends_with(".jpg"));
        assert!(fx.remote.delivered().is_empty());
    }

    #[tokio::test]
    async fn watched_meters_follow_refreshes() {
        let fx = fixture(true).await;
        let mut view = fx.repository.watch_meters(MeterFilter::default());
        assert!(view.next().await.unwrap().unwrap().is_empty());

        fx.remote.set_meters(vec![meter("a", "1"), meter("b", "3")]);
        fx.engine.run_once().await.unwrap();

        let meters = view.next().await.unwrap().unwrap();
        assert_eq!(meters.len(), 2);
        let locations = fx.repository.locations(&LocationFilter::default()).await.unwrap();
        assert_eq!(locations.len(), 2);
    }

    #[tokio::test]
    async fn queued_submit_triggers_a_sync_while_online() {
        let fx = fixture(true).await;
        fx.remote.script_send([Reply::Network]);
        let task = tokio::spawn(fx.worker.run());

        let outcome = fx.repository.submit_reading(draft("m-1", 1500.0)).await.unwrap();
        assert!(matches!(outcome, SubmitOutcome::Queued { .. }));

        assert!(eventually(|| fx.remote.fetch_calls() >= 1).await);
        assert!(eventually(|| fx.remote.delivered_ids() == vec![outcome.reading_id().to_string()]).await);
        assert_eq!(fx.store.pending_count().await.unwrap(), 0);

        fx.handle.shutdown();
        task.await.unwrap();
    }

    #[tokio::test]
    async fn queued_submit_waits_while_offline() {
        let fx = fixture(false).await;
        fx.remote.set_offline(true);
        let task = tokio::spawn(fx.worker.run());

        let outcome = fx.repository.submit_reading(draft("m-1", 1500.0)).await.unwrap();
        assert!(matches!(outcome, SubmitOutcome::Queued { .. }));

        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(fx.remote.fetch_calls(), 0);
        assert_eq!(fx.repository.pending_count().await.unwrap(), 1);

        fx.handle.shutdown();
        task.await.unwrap();
    }

    #[tokio::test]
    async fn confirmed_submit_refreshes_the_cache() {
        let fx = fixture(true).await;
        fx.remote.set_meters(vec![meter("m-1", "1")]);
        let task = tokio::spawn(fx.worker.run());

        let outcome = fx.repository.submit_reading(draft("m-1", 1500.0)).await.unwrap();
        assert!(matches!(outcome, SubmitOutcome::Submitted { .. }));

        assert!(eventually(|| fx.remote.fetch_calls() >= 1).await);
        let mut view = fx.repository.watch_meters(MeterFilter::default());
        let cached = tokio::time::timeout(Duration::from_secs(2), async {
            loop {
                let meters = view.next().await.unwrap().unwrap();
                if !meters.is_empty() {
                    break meters;
                }
            }
        })
        .await
        .unwrap();
        assert_eq!(cached[0].id, "m-1");

        fx.handle.shutdown();
        task.await.unwrap();
    }
}
