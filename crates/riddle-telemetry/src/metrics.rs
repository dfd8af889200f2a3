//! Prometheus metrics for the riddle client.
//!
//! All metrics follow the naming convention: `riddle_<area>_<metric>_<unit>`

use lazy_static::lazy_static;
use prometheus::{
    exponential_buckets, Counter, CounterVec, Encoder, Histogram, HistogramOpts, Opts, Registry,
    TextEncoder,
};

use crate::TelemetryError;

lazy_static! {
    /// Global metrics registry
    pub static ref REGISTRY: Registry = Registry::new();

    // =========================================================================
    // SUBMISSION METRICS
    // =========================================================================

    /// Submissions by outcome (correct, incorrect, failed)
    pub static ref SUBMISSIONS: CounterVec = CounterVec::new(
        Opts::new("riddle_submissions_total", "Answer submissions by outcome"),
        &["outcome"]
    ).expect("metric creation failed");

    /// Time from send to finalized receipt
    pub static ref FINALIZATION_DURATION: Histogram = Histogram::with_opts(
        HistogramOpts::new(
            "riddle_finalization_duration_seconds",
            "Time spent waiting for a submitted transaction to finalize"
        ).buckets(exponential_buckets(0.25, 2.0, 10).unwrap_or_default())
    ).expect("metric creation failed");

    /// Riddle publications by outcome (published, invalid, failed)
    pub static ref PUBLICATIONS: CounterVec = CounterVec::new(
        Opts::new("riddle_publications_total", "Riddle publications by outcome"),
        &["outcome"]
    ).expect("metric creation failed");

    // =========================================================================
    // SUBSCRIPTION METRICS
    // =========================================================================

    /// Lifecycle notifications received, by event name
    pub static ref NOTIFICATIONS: CounterVec = CounterVec::new(
        Opts::new("riddle_notifications_total", "Lifecycle notifications received"),
        &["event"]
    ).expect("metric creation failed");

    /// Errors reported by the notification transport
    pub static ref TRANSPORT_ERRORS: Counter = Counter::new(
        "riddle_transport_errors_total",
        "Errors delivered by the notification transport"
    ).expect("metric creation failed");

    /// State refreshes triggered by notifications
    pub static ref STATE_REFRESHES: CounterVec = CounterVec::new(
        Opts::new("riddle_state_refreshes_total", "Puzzle state refreshes"),
        &["field", "outcome"]
    ).expect("metric creation failed");

    /// WebSocket reconnection attempts
    pub static ref RECONNECTS: CounterVec = CounterVec::new(
        Opts::new("riddle_ws_reconnects_total", "WebSocket reconnection attempts"),
        &["outcome"]
    ).expect("metric creation failed");

    // =========================================================================
    // RPC METRICS
    // =========================================================================

    /// JSON-RPC requests by method and outcome
    pub static ref RPC_REQUESTS: CounterVec = CounterVec::new(
        Opts::new("riddle_rpc_requests_total", "JSON-RPC requests"),
        &["method", "outcome"]
    ).expect("metric creation failed");
}

/// Register all metrics with the global registry.
///
/// Registering twice is not an error; the second call is a no-op.
pub fn register_metrics() -> Result<(), TelemetryError> {
    let metrics: Vec<Box<dyn prometheus::core::Collector>> = vec![
        Box::new(SUBMISSIONS.clone()),
        Box::new(FINALIZATION_DURATION.clone()),
        Box::new(PUBLICATIONS.clone()),
        Box::new(NOTIFICATIONS.clone()),
        Box::new(TRANSPORT_ERRORS.clone()),
        Box::new(STATE_REFRESHES.clone()),
        Box::new(RECONNECTS.clone()),
        Box::new(RPC_REQUESTS.clone()),
    ];

    for metric in metrics {
        match REGISTRY.register(metric) {
            Ok(()) | Err(prometheus::Error::AlreadyReg) => {}
            Err(e) => return Err(TelemetryError::MetricsInit(e.to_string())),
        }
    }

    Ok(())
}

/// Encode all metrics as Prometheus text format.
pub fn render_metrics() -> Result<String, TelemetryError> {
    let encoder = TextEncoder::new();
    let metric_families = REGISTRY.gather();
    let mut buffer = Vec::new();
    encoder
        .encode(&metric_families, &mut buffer)
        .map_err(|e| TelemetryError::MetricsInit(e.to_string()))?;
    String::from_utf8(buffer).map_err(|e| TelemetryError::MetricsInit(e.to_string()))
}

/// Timer guard for automatic histogram observation.
pub struct HistogramTimer {
    histogram: Histogram,
    start: std::time::Instant,
}

impl HistogramTimer {
    /// Start a new timer for the given histogram.
    pub fn new(histogram: &Histogram) -> Self {
        Self {
            histogram: histogram.clone(),
            start: std::time::Instant::now(),
        }
    }
}

impl Drop for HistogramTimer {
    fn drop(&mut self) {
        self.histogram.observe(self.start.elapsed().as_secs_f64());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_register_twice_is_ok() {
        register_metrics().unwrap();
        register_metrics().unwrap();
    }

    #[test]
    fn test_counter_increment() {
        SUBMISSIONS.with_label_values(&["correct"]).inc();
        assert!(SUBMISSIONS.with_label_values(&["correct"]).get() >= 1.0);
    }

    #[test]
    fn test_render_contains_registered_metric() {
        register_metrics().unwrap();
        TRANSPORT_ERRORS.inc();
        let text = render_metrics().unwrap();
        assert!(text.contains("riddle_transport_errors_total"));
    }
}
