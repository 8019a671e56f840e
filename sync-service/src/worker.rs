//! Background scheduler for the sync engine.

use std::{sync::Arc, time::Duration};

use tokio::{
    sync::Notify,
    time::{interval_at, sleep_until, Instant, MissedTickBehavior},
};
use tokio_util::sync::CancellationToken;

use crate::{connectivity::Connectivity, engine::SyncEngine};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Schedule {
    pub periodic: Duration,
    pub retry_backoff: Duration,
    pub max_backoff: Duration,
}

impl Schedule {
    /// Linear backoff, capped.
    pub fn backoff(&self, failures: u32) -> Duration {
        self.retry_backoff.saturating_mul(failures.max(1)).min(self.max_backoff)
    }
}

/// Cloneable control surface of a running [`SyncWorker`].
#[derive(Clone)]
pub struct SyncHandle {
    trigger: Arc<Notify>,
    cancel: CancellationToken,
}

impl SyncHandle {
    /// Request a run. Requests made while a run is active collapse into one
    /// follow-up run.
    pub fn trigger(&self) {
        self.trigger.notify_one();
    }

    pub fn shutdown(&self) {
        self.cancel.cancel();
    }

    pub fn cancellation(&self) -> CancellationToken {
        self.cancel.clone()
    }
}

pub struct SyncWorker {
    engine: Arc<SyncEngine>,
    connectivity: Connectivity,
    schedule: Schedule,
    trigger: Arc<Notify>,
    cancel: CancellationToken,
}

impl SyncWorker {
    pub fn new(engine: Arc<SyncEngine>, connectivity: Connectivity, schedule: Schedule) -> (Self, SyncHandle) {
        let trigger = Arc::new(Notify::new());
        let cancel = CancellationToken::new();
        let handle = SyncHandle {
            trigger: trigger.clone(),
            cancel: cancel.clone(),
        };

        let worker = Self {
            engine,
            connectivity,
            schedule,
            trigger,
            cancel,
        };
        (worker, handle)
    }

    pub async fn run(self) {
        let mut online = self.connectivity.subscribe();
        let mut periodic = interval_at(Instant::now() + self.schedule.periodic, self.schedule.periodic);
        periodic.set_missed_tick_behavior(MissedTickBehavior::Delay);

        let mut failures: u32 = 0;
        let mut retry_at: Option<Instant> = None;

        tracing::info!(
            periodic_secs = self.schedule.periodic.as_secs(),
            "sync worker started"
        );

        loop {
            let reason = tokio::select! {
                _ = self.cancel.cancelled() => break,
                _ = self.trigger.notified() => "trigger",
                changed = online.changed() => {
                    if changed.is_err() {
                        break;
                    }
                    if !*online.borrow_and_update() {
                        continue;
                    }
                    failures = 0;
                    "reconnected"
                }
                _ = periodic.tick() => "periodic",
                _ = sleep_until(retry_at.unwrap_or_else(Instant::now)), if retry_at.is_some() => "retry",
            };

            // Any run supersedes a pending retry.
            retry_at = None;

            if !self.connectivity.is_online() {
                tracing::debug!(reason, "offline, sync deferred");
                continue;
            }

            tracing::debug!(reason, "sync run starting");
            match self.engine.run_once().await {
                Ok(report) if report.needs_retry() => {
                    failures = failures.saturating_add(1);
                    let delay = self.schedule.backoff(failures);
                    tracing::warn!(
                        attempt = failures,
                        backoff_ms = delay.as_millis() as u64,
                        "sync incomplete, retrying"
                    );
                    retry_at = Some(Instant::now() + delay);
                }
                Ok(report) => {
                    failures = 0;
                    if report.needs_refresh() {
                        self.trigger.notify_one();
                    }
                }
                // Authoritative or storage failures; left to the next trigger.
                Err(_) => failures = 0,
            }
        }

        tracing::info!("sync worker stopped");
    }
}
