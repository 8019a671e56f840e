//! Request/response boundary to the remote API.

use std::{future::Future, time::Duration};

use meter_client::{
    db::MeterFilter,
    domain::{Meter, MutationRequest, Reading},
};

pub mod http;

pub use http::HttpRemoteClient;

/// Failure classes of a remote call.
///
/// `Network` is transport-indeterminate: the request may or may not have been
/// processed, so the write is kept and retried. `Server` is an authoritative
/// answer; resubmitting would fail the same way.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum RemoteError {
    #[error("network error: {0}")]
    Network(String),
    #[error("server error {status}: {message}")]
    Server { status: u16, message: String },
}

impl RemoteError {
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Network(_))
    }
}

/// Positive acknowledgment of a write.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Ack {
    pub status: u16,
}

#[async_trait::async_trait]
pub trait RemoteClient: Send + Sync {
    async fn fetch_meters(&self, filter: &MeterFilter) -> Result<Vec<Meter>, RemoteError>;

    async fn fetch_all_meters(&self) -> Result<Vec<Meter>, RemoteError> {
        self.fetch_meters(&MeterFilter::default()).await
    }

    async fn submit_reading(&self, reading: &Reading) -> Result<Ack, RemoteError>;

    /// Replay a queued write envelope.
    async fn send(&self, request: &MutationRequest) -> Result<Ack, RemoteError>;
}

/// Bound a remote call. An elapsed deadline is a transport failure.
pub async fn with_timeout<T, F>(limit: Duration, call: F) -> Result<T, RemoteError>
where
    F: Future<Output = Result<T, RemoteError>>,
{
    match tokio::time::timeout(limit, call).await {
        Ok(result) => result,
        Err(_) => Err(RemoteError::Network(format!("timed out after {}ms", limit.as_millis()))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn with_timeout_maps_elapsed_deadline_to_network_error() {
        let res: Result<(), RemoteError> =
            with_timeout(Duration::from_millis(20), std::future::pending()).await;
        assert!(matches!(res, Err(RemoteError::Network(_))));
        assert!(res.unwrap_err().is_transient());
    }

    #[tokio::test]
    async fn with_timeout_passes_through_server_errors() {
        let res: Result<(), RemoteError> = with_timeout(Duration::from_secs(1), async {
            Err(RemoteError::Server {
                status: 422,
                message: "bad".to_string(),
            })
        })
        .await;
        assert!(matches!(res, Err(RemoteError::Server { status: 422, .. })));
    }
}
