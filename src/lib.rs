//! # jobq
//!
//! Embedded durable job queue for a single process.
//!
//! Jobs live in a SQLite table and are dispatched through bounded FIFO or
//! LIFO in-memory queues, one per job type. Worker threads pull batches,
//! checkpoint progress back to the store, and delete rows when done. On
//! restart a recovery sweep re-queues everything the store still holds, so
//! delivery is at-least-once.

pub mod config;
pub mod engine;
pub mod error;
pub mod model;
pub mod queue;
pub mod storage;
pub mod telemetry;

pub use engine::{JobDb, QueueConfig};
pub use error::{Error, QueueExhausted, Result};
