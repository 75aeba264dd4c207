//! Typed configuration from environment variables or a TOML file.
//!
//! Loads once at startup and fails fast on missing or malformed values.
//! The library itself takes plain constructor parameters (`QueueConfig`,
//! `WorkerConfig`); this is the layer the binary builds them from.

use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::engine::{QueueConfig, WorkerConfig};
use crate::error::{Error, Result};
use crate::model::QueuePolicy;

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct Config {
    pub db_path: PathBuf,
    #[serde(default)]
    pub queue_capacity: Option<usize>,
    #[serde(default)]
    pub queue_policy: QueuePolicy,
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    #[serde(default = "default_update_interval_secs")]
    pub update_interval_secs: u64,
    #[serde(default = "default_poll_interval_secs")]
    pub poll_interval_secs: u64,
    #[serde(default)]
    pub otel_endpoint: Option<String>,
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

fn default_batch_size() -> usize {
    1
}

fn default_update_interval_secs() -> u64 {
    30
}

fn default_poll_interval_secs() -> u64 {
    5
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Config {
    /// Load configuration from environment variables.
    ///
    /// In local dev, call `dotenvy::dotenv().ok()` before this.
    pub fn from_env() -> Result<Self> {
        Self::from_env_with_db_path(None)
    }

    /// Like [`Config::from_env`], but an explicit `db_path` takes the place
    /// of `JOBQ_DB_PATH`.
    pub fn from_env_with_db_path(db_path: Option<PathBuf>) -> Result<Self> {
        let db_path = match db_path {
            Some(path) => path,
            None => PathBuf::from(required_var("JOBQ_DB_PATH")?),
        };
        Ok(Self {
            db_path,
            queue_capacity: parsed_var("JOBQ_QUEUE_CAPACITY")?,
            queue_policy: parsed_var("JOBQ_QUEUE_POLICY")?.unwrap_or_default(),
            batch_size: parsed_var("JOBQ_BATCH_SIZE")?.unwrap_or_else(default_batch_size),
            update_interval_secs: parsed_var("JOBQ_UPDATE_INTERVAL_SECS")?
                .unwrap_or_else(default_update_interval_secs),
            poll_interval_secs: parsed_var("JOBQ_POLL_INTERVAL_SECS")?
                .unwrap_or_else(default_poll_interval_secs),
            otel_endpoint: std::env::var("OTEL_ENDPOINT").ok(),
            log_level: std::env::var("LOG_LEVEL").unwrap_or_else(|_| default_log_level()),
        })
    }

    /// Load configuration from a TOML file with the same field names.
    pub fn from_toml_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        toml::from_str(&content)
            .map_err(|e| Error::Config(format!("bad config {}: {e}", path.display())))
    }

    pub fn queue_config(&self) -> QueueConfig {
        QueueConfig {
            capacity: self.queue_capacity.filter(|&c| c > 0),
            policy: self.queue_policy,
        }
    }

    pub fn worker_config(&self) -> WorkerConfig {
        WorkerConfig {
            batch_size: self.batch_size.max(1),
            update_interval: Duration::from_secs(self.update_interval_secs),
            poll_interval: Duration::from_secs(self.poll_interval_secs),
        }
    }
}

fn required_var(name: &str) -> Result<String> {
    std::env::var(name)
        .map_err(|_| Error::Config(format!("required environment variable {name} is not set")))
}

fn parsed_var<T>(name: &str) -> Result<Option<T>>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    match std::env::var(name) {
        Ok(raw) if raw.trim().is_empty() => Ok(None),
        Ok(raw) => raw
            .trim()
            .parse()
            .map(Some)
            .map_err(|e| Error::Config(format!("invalid {name}={raw}: {e}"))),
        Err(_) => Ok(None),
    }
}
