//! Job execution span helpers.
//!
//! Every job a worker picks up runs inside one of these spans, so handler
//! logs and checkpoint events carry the job id and type.

use tracing::Span;

use crate::model::JobId;

/// Start a span for processing one job.
///
/// `job.start_value` and `job.outcome` are declared empty and filled by
/// [`record_checkpoint`] and [`record_outcome`].
pub fn start_job_span(job_type: &str, job_id: JobId) -> Span {
    tracing::info_span!(
        "job.process",
        "job.type" = job_type,
        "job.id" = job_id.0,
        "job.start_value" = tracing::field::Empty,
        "job.outcome" = tracing::field::Empty,
    )
}

/// Record a checkpoint write on the job's span.
pub fn record_checkpoint(span: &Span, start_value: Option<&str>) {
    if let Some(value) = start_value {
        span.record("job.start_value", value);
    }
    span.in_scope(|| {
        tracing::debug!(start_value, "checkpoint");
    });
}

/// Record how the job ended: "completed" or "parked".
pub fn record_outcome(span: &Span, outcome: &str) {
    span.record("job.outcome", outcome);
}
