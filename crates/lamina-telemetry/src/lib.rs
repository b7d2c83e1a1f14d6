//! Observability for Lamina functions.
//!
//! - **Logging**: structured JSON (or pretty) logs through `tracing-subscriber`
//! - **Metrics**: invocation counters and latency through the `metrics` facade,
//!   rendered by an in-process Prometheus recorder
//!
//! The engine emits its events and metrics unconditionally; nothing is
//! collected until the corresponding subsystem is initialized.
//!
//! # Example
//!
//! ```rust,ignore
//! use lamina_telemetry::{init_telemetry, TelemetryConfig};
//!
//! init_telemetry(&TelemetryConfig::production().with_service_name("orders"))?;
//!
//! // ... serve invocations ...
//!
//! if let Some(snapshot) = lamina_telemetry::metrics::render_metrics() {
//!     println!("{snapshot}");
//! }
//! ```
//!
//! # Metrics Output
//!
//! ```text
//! # TYPE lamina_invocations_total counter
//! lamina_invocations_total{service="orders",branch="ok"} 1234
//! lamina_invocations_total{service="orders",branch="fail"} 56
//! ```

#![doc(html_root_url = "https://docs.rs/lamina-telemetry/0.1.0")]
#![warn(missing_docs)]
#![forbid(unsafe_code)]

pub mod config;
pub mod error;
pub mod logging;
pub mod metrics;

pub use config::TelemetryConfig;
pub use error::TelemetryError;
pub use logging::{init_logging, LogConfig};
pub use metrics::{init_metrics, render_metrics, MetricsConfig};

/// Result type for telemetry operations.
pub type TelemetryResult<T> = Result<T, TelemetryError>;

/// Initializes logging, then metrics.
///
/// # Errors
///
/// Returns `TelemetryError` if either subsystem fails to initialize.
pub fn init_telemetry(config: &TelemetryConfig) -> TelemetryResult<()> {
    init_logging(&config.logging)?;
    init_metrics(&config.metrics)?;
    Ok(())
}
