//! SQLite-backed local store: replaceable entity snapshots, the durable
//! mutation queue, and change notification for live views.

use std::{path::Path, sync::Arc, time::Duration};

use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions, SqliteSynchronous};
use tokio::sync::watch;

pub mod entity_queries;
pub mod mutation_queue_queries;

pub use entity_queries::{CachedEntity, LocationFilter, MeterFilter};

#[derive(thiserror::Error, Debug)]
pub enum StorageError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("queued mutation {0} not found")]
    MissingMutation(i64),
}

const SCHEMA: &[&str] = &[
    r#"
    CREATE TABLE IF NOT EXISTS meters (
        id                TEXT PRIMARY KEY NOT NULL,
        number            TEXT NOT NULL,
        energy_type       TEXT NOT NULL,
        street            TEXT NOT NULL,
        postal_code       TEXT NOT NULL,
        city              TEXT NOT NULL,
        house_number      TEXT NOT NULL,
        addition          TEXT,
        last_reading      REAL,
        last_reading_date TEXT
    )
    "#,
    r#"
    CREATE INDEX IF NOT EXISTS meters_by_location
        ON meters (street, postal_code, city, house_number, addition)
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS locations (
        street       TEXT NOT NULL,
        postal_code  TEXT NOT NULL,
        city         TEXT NOT NULL,
        house_number TEXT NOT NULL,
        addition     TEXT,
        meter_count  INTEGER NOT NULL
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS mutation_queue (
        id            INTEGER PRIMARY KEY AUTOINCREMENT,
        endpoint      TEXT NOT NULL,
        method        TEXT NOT NULL,
        body          TEXT NOT NULL,
        created_at    TEXT NOT NULL,
        attempt_count INTEGER NOT NULL DEFAULT 0
    )
    "#,
];

/// Handle to the local store. Cheap to clone; all clones share one pool and
/// one set of change notifiers.
#[derive(Clone)]
pub struct LocalStore {
    pool: SqlitePool,
    entities: Arc<watch::Sender<u64>>,
    queue: Arc<watch::Sender<u64>>,
}

impl LocalStore {
    /// Open (creating if missing) the store at `path`.
    ///
    /// WAL journaling lets a single writer commit while readers keep reading
    /// the last committed snapshot.
    pub async fn open(path: impl AsRef<Path>, max_connections: u32) -> Result<Self, StorageError> {
        let options = SqliteConnectOptions::new()
            .filename(path.as_ref())
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .synchronous(SqliteSynchronous::Full)
            .busy_timeout(Duration::from_secs(5));

        let pool = SqlitePoolOptions::new()
            .max_connections(max_connections.max(1))
            .connect_with(options)
            .await?;

        for statement in SCHEMA {
            sqlx::query(statement).execute(&pool).await?;
        }

        tracing::debug!(path = %path.as_ref().display(), "local store opened");

        Ok(Self {
            pool,
            entities: Arc::new(watch::channel(0).0),
            queue: Arc::new(watch::channel(0).0),
        })
    }

    pub async fn close(&self) {
        self.pool.close().await;
    }

    fn entities_changed(&self) {
        self.entities.send_modify(|v| *v = v.wrapping_add(1));
    }

    fn queue_changed(&self) {
        self.queue.send_modify(|v| *v = v.wrapping_add(1));
    }
}
