use serde::Deserialize;
use std::{fs, path::PathBuf, time::Duration};

use anyhow::Context;

use crate::worker::Schedule;

#[derive(Debug, Clone, Deserialize)]
pub struct StoreConfig {
    pub path: PathBuf,
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RemoteConfig {
    pub base_url: String,
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
    pub auth_bearer_token: Option<String>,
    /// Photo uploads are rejected when unset.
    pub object_store_url: Option<String>,
}

impl RemoteConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct SyncConfig {
    #[serde(default = "default_periodic_interval_secs")]
    pub periodic_interval_secs: u64,
    #[serde(default = "default_retry_backoff_ms")]
    pub retry_backoff_ms: u64,
    #[serde(default = "default_max_backoff_ms")]
    pub max_backoff_ms: u64,
    #[serde(default = "default_probe_interval_secs")]
    pub probe_interval_secs: u64,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            periodic_interval_secs: default_periodic_interval_secs(),
            retry_backoff_ms: default_retry_backoff_ms(),
            max_backoff_ms: default_max_backoff_ms(),
            probe_interval_secs: default_probe_interval_secs(),
        }
    }
}

impl SyncConfig {
    pub fn schedule(&self) -> Schedule {
        Schedule {
            periodic: Duration::from_secs(self.periodic_interval_secs),
            retry_backoff: Duration::from_millis(self.retry_backoff_ms),
            max_backoff: Duration::from_millis(self.max_backoff_ms),
        }
    }

    pub fn probe_interval(&self) -> Duration {
        Duration::from_secs(self.probe_interval_secs)
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct MetricsConfig {
    pub bind_addr: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    pub store: StoreConfig,
    pub remote: RemoteConfig,
    #[serde(default)]
    pub sync: SyncConfig,
    pub metrics: Option<MetricsConfig>,
}

impl AppConfig {
    pub fn load() -> anyhow::Result<Self> {
        use std::env;

        let path = env::var("SYNC_CONFIG").unwrap_or_else(|_| "sync-config.toml".to_string());
        let contents = fs::read_to_string(&path).with_context(|| format!("failed to read config {path}"))?;
        Self::from_toml_str(&contents).with_context(|| format!("invalid config {path}"))
    }

    pub fn from_toml_str(contents: &str) -> anyhow::Result<Self> {
        let cfg: AppConfig = toml::from_str(contents)?;
        anyhow::ensure!(cfg.sync.periodic_interval_secs > 0, "sync.periodic_interval_secs must be positive");
        anyhow::ensure!(cfg.sync.probe_interval_secs > 0, "sync.probe_interval_secs must be positive");
        Ok(cfg)
    }
}

fn default_max_connections() -> u32 {
    4
}

fn default_timeout_ms() -> u64 {
    10_000
}

fn default_periodic_interval_secs() -> u64 {
    900
}

fn default_retry_backoff_ms() -> u64 {
    2_000
}

fn default_max_backoff_ms() -> u64 {
    300_000
}

fn default_probe_interval_secs() -> u64 {
    15
}
