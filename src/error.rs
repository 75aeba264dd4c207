//! Error types for jobq.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    /// The store could not be opened or created. Fatal for the caller.
    #[error("store connection error: {0}")]
    StoreConnection(String),

    /// A single statement against the store failed.
    #[error("store operation error: {0}")]
    StoreOperation(#[from] rusqlite::Error),

    #[error("store already exists: {0}")]
    AlreadyExists(String),

    #[error("job not found: {0}")]
    NotFound(String),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serde(#[from] serde_json::Error),

    /// The processing function of a worker returned an error.
    #[error("job handler failed: {0}")]
    Handler(anyhow::Error),

    #[error("worker thread {0} panicked")]
    WorkerPanicked(String),

    #[error("{0}")]
    Other(String),
}

pub type Result<T> = std::result::Result<T, Error>;

/// Nothing is currently available for a job type.
///
/// Control-flow signal returned by `get_next_jobs`; not a failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("queue exhausted")]
pub struct QueueExhausted;
