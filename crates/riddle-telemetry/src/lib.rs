//! # Riddle Telemetry
//!
//! Logging and metrics for the Onchain Riddle client.
//!
//! ## Usage
//!
//! ```rust,ignore
//! use riddle_telemetry::{init_telemetry, TelemetryConfig};
//!
//! let config = TelemetryConfig::from_env();
//! init_telemetry(&config)?;
//! ```
//!
//! ## Environment Variables
//!
//! | Variable | Default | Description |
//! |----------|---------|-------------|
//! | `RIDDLE_SERVICE_NAME` | `onchain-riddle` | Service name in logs |
//! | `RIDDLE_LOG_LEVEL` | `info` | Log level filter (falls back to `RUST_LOG`) |
//! | `RIDDLE_JSON_LOGS` | `false` | JSON formatted output |
//! | `RIDDLE_LOG_SOURCE` | `false` | Include file and line numbers |

mod config;
mod logging;
pub mod metrics;

pub use config::TelemetryConfig;
pub use logging::init_logging;
pub use metrics::{
    register_metrics, render_metrics, HistogramTimer, FINALIZATION_DURATION, NOTIFICATIONS,
    PUBLICATIONS, RECONNECTS, RPC_REQUESTS, STATE_REFRESHES, SUBMISSIONS, TRANSPORT_ERRORS,
};

use thiserror::Error;

/// Telemetry initialization errors
#[derive(Error, Debug)]
pub enum TelemetryError {
    #[error("Failed to initialize logger: {0}")]
    LoggerInit(String),

    #[error("Failed to initialize Prometheus metrics: {0}")]
    MetricsInit(String),

    #[error("Invalid configuration: {0}")]
    Config(String),
}

/// Initialize logging and register metrics.
pub fn init_telemetry(config: &TelemetryConfig) -> Result<(), TelemetryError> {
    register_metrics()?;
    init_logging(config)
}

/// Start timing for a histogram. Observation happens on drop.
#[macro_export]
macro_rules! time_histogram {
    ($histogram:expr) => {
        $crate::metrics::HistogramTimer::new(&$histogram)
    };
}
