//! Integration tests for telemetry initialization and span helpers.

use jobq::model::JobId;

#[test]
fn telemetry_initializes_without_endpoint() {
    // Note: tracing subscriber can only be set once per process.
    // Using try_init() in the implementation avoids panics if another
    // test already initialized a subscriber.
    let config = jobq::telemetry::TelemetryConfig {
        service_name: "jobq-test".to_string(),
        ..Default::default()
    };
    // This may return Err if a global subscriber was already set by
    // another test in this process; that is acceptable.
    let _guard = jobq::telemetry::init_telemetry(config);
}

#[test]
fn job_span_creates_and_records_checkpoint() {
    let span = jobq::telemetry::job::start_job_span("main", JobId(42));
    jobq::telemetry::job::record_checkpoint(&span, Some("p1"));
    jobq::telemetry::job::record_checkpoint(&span, None);
    jobq::telemetry::job::record_outcome(&span, "completed");
}

#[test]
fn metric_instruments_accept_records_without_a_provider() {
    use opentelemetry::KeyValue;

    let labels = [KeyValue::new("job_type", "main")];
    jobq::telemetry::metrics::jobs_added().add(1, &labels);
    jobq::telemetry::metrics::queue_admissions().add(2, &labels);
    jobq::telemetry::metrics::job_duration_ms().record(12.5, &labels);
}
