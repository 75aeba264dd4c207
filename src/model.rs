//! Core data model.
//!
//! A job is a unit of work for one item, consumed by the workers bound to its
//! job type. It carries a resumable checkpoint (`start_value`) and a lazily
//! resolved terminal bound (`end_value`).

use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Job
// ---------------------------------------------------------------------------

/// A job row as stored, or a snapshot of it held in a queue.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Job {
    /// Store-assigned, monotonically increasing.
    pub id: JobId,

    /// Opaque key identifying the subject of work.
    pub item_id: String,

    /// Which queue and which workers consume this job.
    pub job_type: String,

    /// Version/priority marker used only for dedup at insertion time.
    pub init_data: Option<i64>,

    /// Resumable checkpoint. None until a worker first touches the job.
    pub start_value: Option<String>,

    /// Terminal bound, resolved lazily on first touch.
    pub end_value: Option<EndValue>,

    /// Best-effort mirror of "resident in an in-memory queue".
    pub in_queue: bool,
}

impl Job {
    /// The concrete end bound, if one was resolved.
    pub fn end_bound(&self) -> Option<&str> {
        match &self.end_value {
            Some(EndValue::Bound(v)) => Some(v),
            _ => None,
        }
    }
}

/// Newtype for job IDs (the store's autoincrement key).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct JobId(pub i64);

impl std::fmt::Display for JobId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<i64> for JobId {
    fn from(id: i64) -> Self {
        Self(id)
    }
}

// ---------------------------------------------------------------------------
// New jobs
// ---------------------------------------------------------------------------

/// A request to add a job. `(item_id, job_type, init_data)` is the dedup key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewJob {
    pub item_id: String,
    pub job_type: String,
    pub init_data: Option<i64>,
}

impl NewJob {
    pub fn new(item_id: impl Into<String>, job_type: impl Into<String>) -> Self {
        Self {
            item_id: item_id.into(),
            job_type: job_type.into(),
            init_data: None,
        }
    }

    pub fn init_data(mut self, init_data: i64) -> Self {
        self.init_data = Some(init_data);
        self
    }
}

impl<I: Into<String>, T: Into<String>> From<(I, T)> for NewJob {
    fn from((item_id, job_type): (I, T)) -> Self {
        Self::new(item_id, job_type)
    }
}

impl<I: Into<String>, T: Into<String>> From<(I, T, Option<i64>)> for NewJob {
    fn from((item_id, job_type, init_data): (I, T, Option<i64>)) -> Self {
        Self {
            item_id: item_id.into(),
            job_type: job_type.into(),
            init_data,
        }
    }
}

// ---------------------------------------------------------------------------
// End values
// ---------------------------------------------------------------------------

/// A persisted end value.
///
/// Stored as JSON text in the `end_value` column so that "no bound needed"
/// survives a restart without colliding with any caller value.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum EndValue {
    /// A concrete terminal bound.
    Bound(String),
    /// Resolved once; no bound applies and no lookup is needed on resume.
    Unbounded,
}

impl EndValue {
    pub fn bound(value: impl Into<String>) -> Self {
        Self::Bound(value.into())
    }
}

/// What a handler's end-value lookup decided for a job on first touch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EndValueResolution {
    /// Use this bound; it is persisted with the next checkpoint.
    Resolved(String),
    /// Process without a bound and skip the lookup if the job is resumed.
    NoRelookupNeeded,
    /// Nothing to do: finalize the job without processing it.
    AlreadyComplete,
}

impl From<EndValueResolution> for Option<EndValue> {
    fn from(resolution: EndValueResolution) -> Self {
        match resolution {
            EndValueResolution::Resolved(v) => Some(EndValue::Bound(v)),
            EndValueResolution::NoRelookupNeeded => Some(EndValue::Unbounded),
            EndValueResolution::AlreadyComplete => None,
        }
    }
}

// ---------------------------------------------------------------------------
// Processing
// ---------------------------------------------------------------------------

/// Result of processing one job.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProcessOutcome {
    pub completed: bool,
    pub records_processed: u64,
}

impl ProcessOutcome {
    pub fn completed(records_processed: u64) -> Self {
        Self {
            completed: true,
            records_processed,
        }
    }

    pub fn incomplete(records_processed: u64) -> Self {
        Self {
            completed: false,
            records_processed,
        }
    }
}

// ---------------------------------------------------------------------------
// Queue policy
// ---------------------------------------------------------------------------

/// Admission policy for bounded queues.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QueuePolicy {
    /// Append until full, then reject newcomers.
    #[default]
    Fifo,
    /// Push newcomers to the front, evicting from the back when full.
    Lifo,
}

impl std::fmt::Display for QueuePolicy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            QueuePolicy::Fifo => "fifo",
            QueuePolicy::Lifo => "lifo",
        };
        write!(f, "{s}")
    }
}

impl std::str::FromStr for QueuePolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "fifo" => Ok(QueuePolicy::Fifo),
            "lifo" => Ok(QueuePolicy::Lifo),
            other => Err(format!("unknown queue policy: {other}")),
        }
    }
}
