use futures::{stream::BoxStream, StreamExt};
use time::OffsetDateTime;
use tokio_stream::wrappers::WatchStream;

use super::{LocalStore, StorageError};
use crate::domain::{MutationRequest, QueuedMutation};

// Row ids are assigned at insert time and never reused (AUTOINCREMENT), so
// ordering by id is creation order.
const SELECT_QUEUED: &str = "SELECT id, endpoint, method, body, created_at, attempt_count FROM mutation_queue";

impl LocalStore {
    /// Durably append a mutation with an attempt count of zero.
    pub async fn enqueue(&self, request: &MutationRequest) -> Result<i64, StorageError> {
        let id = sqlx::query(
            "INSERT INTO mutation_queue (endpoint, method, body, created_at, attempt_count) VALUES (?, ?, ?, ?, 0)",
        )
        .bind(request.endpoint.as_str())
        .bind(request.method)
        .bind(request.body.as_str())
        .bind(OffsetDateTime::now_utc())
        .execute(&self.pool)
        .await?
        .last_insert_rowid();

        self.queue_changed();
        Ok(id)
    }

    /// Remove a mutation. Returns whether it was still queued.
    pub async fn dequeue(&self, id: i64) -> Result<bool, StorageError> {
        let removed = sqlx::query("DELETE FROM mutation_queue WHERE id = ?")
            .bind(id)
            .execute(&self.pool)
            .await?
            .rows_affected()
            > 0;

        if removed {
            self.queue_changed();
        }
        Ok(removed)
    }

    /// All queued mutations, oldest first.
    pub async fn list_pending(&self) -> Result<Vec<QueuedMutation>, StorageError> {
        let rows = sqlx::query_as::<_, QueuedMutation>(&format!("{SELECT_QUEUED} ORDER BY id"))
            .fetch_all(&self.pool)
            .await?;
        Ok(rows)
    }

    /// The oldest queued mutation created after `after` (or the oldest overall).
    pub async fn next_pending_after(&self, after: Option<i64>) -> Result<Option<QueuedMutation>, StorageError> {
        let row = sqlx::query_as::<_, QueuedMutation>(&format!("{SELECT_QUEUED} WHERE id > ? ORDER BY id LIMIT 1"))
            .bind(after.unwrap_or(0))
            .fetch_optional(&self.pool)
            .await?;
        Ok(row)
    }

    /// Bump the attempt counter after a transient delivery failure and return
    /// the new count.
    pub async fn record_attempt_failure(&self, id: i64) -> Result<u32, StorageError> {
        let attempts = sqlx::query_scalar::<_, u32>(
            "UPDATE mutation_queue SET attempt_count = attempt_count + 1 WHERE id = ? RETURNING attempt_count",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?
        .ok_or(StorageError::MissingMutation(id))?;

        self.queue_changed();
        Ok(attempts)
    }

    pub async fn pending_count(&self) -> Result<u64, StorageError> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM mutation_queue")
            .fetch_one(&self.pool)
            .await?;
        Ok(count.max(0) as u64)
    }

    pub fn watch_pending_count(&self) -> BoxStream<'static, Result<u64, StorageError>> {
        let store = self.clone();
        WatchStream::new(self.queue.subscribe())
            .then(move |_| {
                let store = store.clone();
                async move { store.pending_count().await }
            })
            .boxed()
    }
}
