//! Scripted fakes shared by the unit tests.

use std::{
    collections::{BTreeSet, VecDeque},
    path::{Path, PathBuf},
    sync::{
        atomic::{AtomicBool, AtomicUsize, Ordering},
        Arc, Mutex,
    },
    time::Duration,
};

use async_trait::async_trait;
use meter_client::{
    db::MeterFilter,
    domain::{EnergyType, Meter, MutationRequest, Reading, ReadingDraft},
    LocalStore,
};
use time::macros::date;

use crate::{
    remote::{Ack, RemoteClient, RemoteError},
    upload::ObjectStore,
};

#[derive(Debug, Clone, Copy)]
pub(crate) enum Reply {
    Ok,
    Network,
    Server(u16),
    /// The remote stores the write but the response is lost.
    AcceptThenNetwork,
}

#[derive(Default)]
pub(crate) struct FakeRemote {
    offline: AtomicBool,
    meters: Mutex<Vec<Meter>>,
    fetch_replies: Mutex<VecDeque<Reply>>,
    send_replies: Mutex<VecDeque<Reply>>,
    fetch_delay: Mutex<Option<Duration>>,
    fetch_calls: AtomicUsize,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
    delivered: Mutex<Vec<MutationRequest>>,
    stored_readings: Mutex<BTreeSet<String>>,
}

impl FakeRemote {
    pub(crate) fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub(crate) fn set_offline(&self, offline: bool) {
        self.offline.store(offline, Ordering::SeqCst);
    }

    pub(crate) fn set_meters(&self, meters: Vec<Meter>) {
        *self.meters.lock().unwrap() = meters;
    }

    pub(crate) fn script_fetch(&self, replies: impl IntoIterator<Item = Reply>) {
        self.fetch_replies.lock().unwrap().extend(replies);
    }

    pub(crate) fn script_send(&self, replies: impl IntoIterator<Item = Reply>) {
        self.send_replies.lock().unwrap().extend(replies);
    }

    pub(crate) fn set_fetch_delay(&self, delay: Duration) {
        *self.fetch_delay.lock().unwrap() = Some(delay);
    }

    pub(crate) fn fetch_calls(&self) -> usize {
        self.fetch_calls.load(Ordering::SeqCst)
    }

    pub(crate) fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }

    /// Requests that reached the remote, accepted or rejected, in arrival order.
    pub(crate) fn delivered(&self) -> Vec<MutationRequest> {
        self.delivered.lock().unwrap().clone()
    }

    pub(crate) fn delivered_ids(&self) -> Vec<String> {
        self.delivered()
            .iter()
            .map(|r| {
                let body: serde_json::Value = serde_json::from_str(&r.body).unwrap();
                body["id"].as_str().unwrap_or_default().to_string()
            })
            .collect()
    }

    /// Distinct readings stored server side, deduplicated by identifier.
    pub(crate) fn stored_readings(&self) -> usize {
        self.stored_readings.lock().unwrap().len()
    }

    fn next_reply(&self, script: &Mutex<VecDeque<Reply>>) -> Reply {
        if self.offline.load(Ordering::SeqCst) {
            return Reply::Network;
        }
        script.lock().unwrap().pop_front().unwrap_or(Reply::Ok)
    }

    fn record(&self, request: &MutationRequest, stored: bool) {
        self.delivered.lock().unwrap().push(request.clone());
        if stored {
            if let Ok(body) = serde_json::from_str::<serde_json::Value>(&request.body) {
                if let Some(id) = body["id"].as_str() {
                    self.stored_readings.lock().unwrap().insert(id.to_string());
                }
            }
        }
    }
}

#[async_trait]
impl RemoteClient for FakeRemote {
    async fn fetch_meters(&self, _filter: &MeterFilter) -> Result<Vec<Meter>, RemoteError> {
        self.fetch_calls.fetch_add(1, Ordering::SeqCst);
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);

        let delay = *self.fetch_delay.lock().unwrap();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        self.in_flight.fetch_sub(1, Ordering::SeqCst);

        match self.next_reply(&self.fetch_replies) {
            Reply::Ok => Ok(self.meters.lock().unwrap().clone()),
            Reply::Network | Reply::AcceptThenNetwork => Err(RemoteError::Network("connection refused".to_string())),
            Reply::Server(status) => Err(RemoteError::Server {
                status,
                message: "refresh rejected".to_string(),
            }),
        }
    }

    async fn submit_reading(&self, reading: &Reading) -> Result<Ack, RemoteError> {
        self.send(&MutationRequest::from(reading)).await
    }

    async fn send(&self, request: &MutationRequest) -> Result<Ack, RemoteError> {
        match self.next_reply(&self.send_replies) {
            Reply::Ok => {
                self.record(request, true);
                Ok(Ack { status: 204 })
            }
            Reply::Network => Err(RemoteError::Network("connection refused".to_string())),
            Reply::AcceptThenNetwork => {
                self.record(request, true);
                Err(RemoteError::Network("connection reset".to_string()))
            }
            Reply::Server(status) => {
                self.record(request, false);
                Err(RemoteError::Server {
                    status,
                    message: "unprocessable reading".to_string(),
                })
            }
        }
    }
}

#[derive(Default)]
pub(crate) struct FakeObjects {
    results: Mutex<VecDeque<bool>>,
    uploads: Mutex<Vec<(PathBuf, String)>>,
}

impl FakeObjects {
    pub(crate) fn script(&self, results: impl IntoIterator<Item = bool>) {
        self.results.lock().unwrap().extend(results);
    }

    pub(crate) fn uploads(&self) -> Vec<(PathBuf, String)> {
        self.uploads.lock().unwrap().clone()
    }
}

#[async_trait]
impl ObjectStore for FakeObjects {
    async fn upload(&self, local: &Path, remote_path: &str) -> bool {
        let ok = self.results.lock().unwrap().pop_front().unwrap_or(true);
        if ok {
            self.uploads.lock().unwrap().push((local.to_path_buf(), remote_path.to_string()));
        }
        ok
    }
}

pub(crate) fn meter(id: &str, house_number: &str) -> Meter {
    Meter {
        id: id.to_string(),
        number: format!("E-{id}"),
        energy_type: EnergyType::Electricity,
        street: "Dorpsstraat".to_string(),
        postal_code: "1000AA".to_string(),
        city: "Utrecht".to_string(),
        house_number: house_number.to_string(),
        addition: None,
        last_reading: Some(100.0),
        last_reading_date: Some(date!(2024 - 01 - 31)),
    }
}

pub(crate) fn draft(meter_id: &str, value: f64) -> ReadingDraft {
    ReadingDraft {
        meter_id: meter_id.to_string(),
        value,
        date: date!(2024 - 03 - 01),
        read_by: "jdoe".to_string(),
    }
}

pub(crate) async fn open_store(dir: &tempfile::TempDir) -> LocalStore {
    LocalStore::open(dir.path().join("field.db"), 4).await.unwrap()
}

/// Poll `condition` until it holds or two seconds pass.
pub(crate) async fn eventually(condition: impl Fn() -> bool) -> bool {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(2);
    while tokio::time::Instant::now() < deadline {
        if condition() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    condition()
}
