//! Metric instrument factories for jobq.
//!
//! Uses the OTel Meter API with the globally-registered `MeterProvider`.
//! All instruments are created lazily from the `"jobq"` meter. Without an
//! OTLP endpoint the global provider is a no-op.

use opentelemetry::metrics::{Counter, Histogram, Meter};

/// Returns the shared meter for jobq instruments.
fn meter() -> Meter {
    opentelemetry::global::meter("jobq")
}

/// Counter: job rows inserted by `add_jobs`.
/// Labels: `job_type`.
pub fn jobs_added() -> Counter<u64> {
    meter()
        .u64_counter("jobq.jobs.added")
        .with_description("Number of jobs added to the store")
        .build()
}

/// Counter: checkpoint writes.
pub fn jobs_updated() -> Counter<u64> {
    meter()
        .u64_counter("jobq.jobs.updated")
        .with_description("Number of job checkpoint writes")
        .build()
}

/// Counter: job rows deleted.
pub fn jobs_removed() -> Counter<u64> {
    meter()
        .u64_counter("jobq.jobs.removed")
        .with_description("Number of jobs removed from the store")
        .build()
}

/// Counter: queue admission results.
/// Labels: `job_type`, `outcome` ("admitted" | "rejected" | "evicted").
pub fn queue_admissions() -> Counter<u64> {
    meter()
        .u64_counter("jobq.queue.admissions")
        .with_description("Queue admission outcomes")
        .build()
}

/// Counter: queue repopulation passes.
/// Labels: `first_call`.
pub fn populate_calls() -> Counter<u64> {
    meter()
        .u64_counter("jobq.queue.populate")
        .with_description("Number of queue repopulation passes")
        .build()
}

/// Counter: jobs finished and removed by workers.
/// Labels: `job_type`.
pub fn jobs_completed() -> Counter<u64> {
    meter()
        .u64_counter("jobq.jobs.completed")
        .with_description("Number of jobs completed by workers")
        .build()
}

/// Counter: jobs a worker returned incomplete.
/// Labels: `job_type`.
pub fn jobs_parked() -> Counter<u64> {
    meter()
        .u64_counter("jobq.jobs.parked")
        .with_description("Number of jobs left incomplete in the store")
        .build()
}

/// Counter: records reported by handlers.
/// Labels: `job_type`.
pub fn records_processed() -> Counter<u64> {
    meter()
        .u64_counter("jobq.records.processed")
        .with_description("Records processed by job handlers")
        .build()
}

/// Histogram: time from pickup to completion in milliseconds.
/// Labels: `job_type`.
pub fn job_duration_ms() -> Histogram<f64> {
    meter()
        .f64_histogram("jobq.job.duration_ms")
        .with_description("Job processing duration in milliseconds")
        .with_unit("ms")
        .build()
}
