//! The process-wide belief about whether the remote is reachable.

use std::{future::Future, sync::Arc, time::Duration};

use tokio::sync::watch;
use tokio_util::sync::CancellationToken;

#[derive(Clone)]
pub struct Connectivity {
    online: Arc<watch::Sender<bool>>,
}

impl Connectivity {
    pub fn new(online: bool) -> Self {
        Self {
            online: Arc::new(watch::channel(online).0),
        }
    }

    /// Update the belief. Subscribers are only woken on an actual change.
    pub fn set_online(&self, online: bool) {
        let changed = self.online.send_if_modified(|current| {
            if *current == online {
                false
            } else {
                *current = online;
                true
            }
        });
        if changed {
            tracing::info!(online, "connectivity changed");
        }
    }

    pub fn is_online(&self) -> bool {
        *self.online.borrow()
    }

    pub fn subscribe(&self) -> watch::Receiver<bool> {
        self.online.subscribe()
    }
}

/// Drive `connectivity` from a periodic reachability probe until cancelled.
pub async fn watch_reachability<P, F>(connectivity: Connectivity, every: Duration, cancel: CancellationToken, probe: P)
where
    P: Fn() -> F,
    F: Future<Output = bool>,
{
    let mut ticker = tokio::time::interval(every);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = ticker.tick() => {
                connectivity.set_online(probe().await);
            }
        }
    }
}
