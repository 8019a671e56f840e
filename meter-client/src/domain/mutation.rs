use std::{fmt, path::Path};

use time::OffsetDateTime;

use super::reading::Reading;

pub const READINGS_ENDPOINT: &str = "readings";
pub const OBJECTS_ENDPOINT_PREFIX: &str = "objects/";

#[derive(Debug, Clone, Copy, PartialEq, Eq, sqlx::Type)]
#[sqlx(rename_all = "UPPERCASE")]
pub enum Method {
    Post,
    Put,
    Patch,
    Delete,
}

impl Method {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Post => "POST",
            Self::Put => "PUT",
            Self::Patch => "PATCH",
            Self::Delete => "DELETE",
        }
    }
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A write operation addressed to the remote API, relative to its base URL.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MutationRequest {
    pub endpoint: String,
    pub method: Method,
    pub body: String,
}

impl MutationRequest {
    pub fn new(endpoint: impl Into<String>, method: Method, body: impl Into<String>) -> Self {
        Self {
            endpoint: endpoint.into(),
            method,
            body: body.into(),
        }
    }

    /// Upload of a local file to the object store under `remote_path`.
    pub fn upload(remote_path: &str, local_path: &Path) -> Self {
        let body = serde_json::json!({ "local_path": local_path.to_string_lossy() }).to_string();
        Self::new(format!("{OBJECTS_ENDPOINT_PREFIX}{remote_path}"), Method::Put, body)
    }

    /// The object path if this request targets the object store.
    pub fn object_path(&self) -> Option<&str> {
        self.endpoint.strip_prefix(OBJECTS_ENDPOINT_PREFIX)
    }
}

impl From<&Reading> for MutationRequest {
    fn from(reading: &Reading) -> Self {
        Self::new(READINGS_ENDPOINT, Method::Post, reading.to_body())
    }
}

/// Durable envelope of a write that has not been confirmed by the remote.
#[derive(Debug, Clone, PartialEq, sqlx::FromRow)]
pub struct QueuedMutation {
    pub id: i64,
    pub endpoint: String,
    pub method: Method,
    pub body: String,
    pub created_at: OffsetDateTime,
    pub attempt_count: u32,
}

impl QueuedMutation {
    pub fn request(&self) -> MutationRequest {
        MutationRequest {
            endpoint: self.endpoint.clone(),
            method: self.method,
            body: self.body.clone(),
        }
    }
}
