//! Durable staging area for writes that could not be confirmed immediately.

use std::pin::Pin;

use futures::Stream;
use meter_client::{
    domain::{Method, MutationRequest, QueuedMutation},
    LocalStore, StorageError,
};

pub type PendingStream = Pin<Box<dyn Stream<Item = Result<QueuedMutation, StorageError>> + Send>>;

/// FIFO view over the store's mutation table.
///
/// Anyone may push; only the sync engine completes entries or records
/// failed attempts, hence the crate-private mutators.
#[derive(Clone)]
pub struct MutationQueue {
    store: LocalStore,
}

impl MutationQueue {
    pub fn new(store: LocalStore) -> Self {
        Self { store }
    }

    /// Append a write with attempt count 0. No deduplication: delivering the
    /// same logical write twice relies on the remote honouring its identifier.
    pub async fn push(&self, endpoint: &str, method: Method, body: &str) -> Result<i64, StorageError> {
        self.push_request(&MutationRequest::new(endpoint, method, body)).await
    }

    pub async fn push_request(&self, request: &MutationRequest) -> Result<i64, StorageError> {
        let id = self.store.enqueue(request).await?;
        self.report_depth().await?;
        tracing::debug!(mutation_id = id, endpoint = %request.endpoint, method = %request.method, "mutation queued");
        Ok(id)
    }

    /// Lazily yield pending mutations oldest first.
    ///
    /// Each step re-reads the store, so a new drain (after a crash or an
    /// aborted run) starts again from whatever is still queued.
    pub fn drain_in_order(&self) -> PendingStream {
        let store = self.store.clone();
        let s = async_stream::stream! {
            let mut cursor = None;
            loop {
                match store.next_pending_after(cursor).await {
                    Ok(Some(mutation)) => {
                        cursor = Some(mutation.id);
                        yield Ok(mutation);
                    }
                    Ok(None) => break,
                    Err(e) => {
                        yield Err(e);
                        break;
                    }
                }
            }
        };

        Box::pin(s)
    }

    pub async fn len(&self) -> Result<u64, StorageError> {
        self.store.pending_count().await
    }

    pub async fn is_empty(&self) -> Result<bool, StorageError> {
        Ok(self.len().await? == 0)
    }

    pub(crate) async fn complete(&self, id: i64) -> Result<bool, StorageError> {
        let removed = self.store.dequeue(id).await?;
        if removed {
            self.report_depth().await?;
        }
        Ok(removed)
    }

    /// Publish the durable queue length, which survives restarts.
    pub async fn report_depth(&self) -> Result<u64, StorageError> {
        let depth = self.len().await?;
        metrics::gauge!("sync_queue_depth").set(depth as f64);
        Ok(depth)
    }

    pub(crate) async fn record_failure(&self, id: i64) -> Result<u32, StorageError> {
        self.store.record_attempt_failure(id).await
    }
}
