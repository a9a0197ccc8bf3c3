//! Metrics and observability utilities
//!
//! Prometheus metrics for the research pipeline with standardized naming.

use metrics::{counter, describe_counter, describe_gauge, describe_histogram, gauge, histogram, Unit};
use std::time::Instant;

/// Metrics prefix for all ProspectForge metrics
pub const METRICS_PREFIX: &str = "prospectforge";

/// Buckets for HTTP request latency (in seconds)
pub const LATENCY_BUCKETS: &[f64] = &[
    0.005, 0.010, 0.025, 0.050, 0.100, 0.250, 0.500, 1.000, 2.500, 5.000, 10.00,
];

/// Buckets for research webhook latency. The AI jobs run for minutes.
pub const WEBHOOK_BUCKETS: &[f64] = &[
    0.5, 1.0, 5.0, 15.0, 30.0, 60.0, 120.0, 300.0, 600.0, 1200.0, 1800.0,
];

/// Register all metric descriptions
pub fn register_metrics() {
    describe_counter!(
        format!("{}_requests_total", METRICS_PREFIX),
        Unit::Count,
        "Total number of HTTP requests"
    );

    describe_histogram!(
        format!("{}_request_duration_seconds", METRICS_PREFIX),
        Unit::Seconds,
        "HTTP request latency in seconds"
    );

    describe_counter!(
        format!("{}_webhook_calls_total", METRICS_PREFIX),
        Unit::Count,
        "Research webhook invocations by stage and outcome"
    );

    describe_histogram!(
        format!("{}_webhook_duration_seconds", METRICS_PREFIX),
        Unit::Seconds,
        "Research webhook latency in seconds"
    );

    describe_counter!(
        format!("{}_callbacks_received_total", METRICS_PREFIX),
        Unit::Count,
        "Result callbacks received from the job runner"
    );

    describe_counter!(
        format!("{}_progress_transitions_total", METRICS_PREFIX),
        Unit::Count,
        "Research progress state transitions"
    );

    describe_counter!(
        format!("{}_batches_total", METRICS_PREFIX),
        Unit::Count,
        "Research batches started"
    );

    describe_gauge!(
        format!("{}_batches_running", METRICS_PREFIX),
        Unit::Count,
        "Research batches currently running"
    );

    describe_counter!(
        format!("{}_enrichment_sent_total", METRICS_PREFIX),
        Unit::Count,
        "Prospects sent to the enrichment service"
    );

    tracing::info!("Metrics registered");
}

/// Helper to record request metrics
pub struct RequestMetrics {
    start: Instant,
    endpoint: String,
    method: String,
}

impl RequestMetrics {
    /// Start tracking a request
    pub fn start(method: &str, endpoint: &str) -> Self {
        Self {
            start: Instant::now(),
            endpoint: endpoint.to_string(),
            method: method.to_string(),
        }
    }

    /// Record request completion
    pub fn finish(self, status: u16) {
        let duration = self.start.elapsed().as_secs_f64();

        counter!(
            format!("{}_requests_total", METRICS_PREFIX),
            "method" => self.method.clone(),
            "endpoint" => self.endpoint.clone(),
            "status" => status.to_string()
        )
        .increment(1);

        histogram!(
            format!("{}_request_duration_seconds", METRICS_PREFIX),
            "method" => self.method,
            "endpoint" => self.endpoint
        )
        .record(duration);
    }
}

/// Record one research webhook call
pub fn record_webhook_call(stage: &str, outcome: &str, duration_secs: f64) {
    counter!(
        format!("{}_webhook_calls_total", METRICS_PREFIX),
        "stage" => stage.to_string(),
        "outcome" => outcome.to_string()
    )
    .increment(1);

    histogram!(
        format!("{}_webhook_duration_seconds", METRICS_PREFIX),
        "stage" => stage.to_string()
    )
    .record(duration_secs);
}

pub fn record_callback(stage: &str, outcome: &str) {
    counter!(
        format!("{}_callbacks_received_total", METRICS_PREFIX),
        "stage" => stage.to_string(),
        "outcome" => outcome.to_string()
    )
    .increment(1);
}

/// Record a progress state change
pub fn record_transition(from: &str, to: &str) {
    counter!(
        format!("{}_progress_transitions_total", METRICS_PREFIX),
        "from" => from.to_string(),
        "to" => to.to_string()
    )
    .increment(1);
}

pub fn record_batch_started(companies: usize) {
    counter!(format!("{}_batches_total", METRICS_PREFIX)).increment(1);
    gauge!(format!("{}_batches_running", METRICS_PREFIX)).increment(1.0);
    tracing::debug!(companies, "Batch metrics recorded");
}

pub fn record_batch_finished() {
    gauge!(format!("{}_batches_running", METRICS_PREFIX)).decrement(1.0);
}

pub fn record_enrichment(sent: usize) {
    counter!(format!("{}_enrichment_sent_total", METRICS_PREFIX)).increment(sent as u64);
}

/// Recorder counting `webhook_calls_total` increments, for use with
/// [`metrics::with_local_recorder`]
#[cfg(test)]
pub(crate) mod testing {
    use metrics::{Counter, Gauge, Histogram, Key, KeyName, Metadata, Recorder, SharedString, Unit};
    use std::sync::atomic::{AtomicU64, Ordering};
    use std::sync::Arc;

    #[derive(Default)]
    pub struct WebhookCallRecorder {
        calls: Arc<AtomicU64>,
    }

    impl WebhookCallRecorder {
        pub fn calls(&self) -> u64 {
            self.calls.load(Ordering::Relaxed)
        }
    }

    impl Recorder for WebhookCallRecorder {
        fn describe_counter(&self, _: KeyName, _: Option<Unit>, _: SharedString) {}
        fn describe_gauge(&self, _: KeyName, _: Option<Unit>, _: SharedString) {}
        fn describe_histogram(&self, _: KeyName, _: Option<Unit>, _: SharedString) {}

        fn register_counter(&self, key: &Key, _: &Metadata<'_>) -> Counter {
            if key.name().ends_with("_webhook_calls_total") {
                Counter::from_arc(self.calls.clone())
            } else {
                Counter::noop()
            }
        }

        fn register_gauge(&self, _: &Key, _: &Metadata<'_>) -> Gauge {
            Gauge::noop()
        }

        fn register_histogram(&self, _: &Key, _: &Metadata<'_>) -> Histogram {
            Histogram::noop()
        }
    }
}
