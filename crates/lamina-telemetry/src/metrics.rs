//! Invocation metrics.
//!
//! Metrics are recorded through the `metrics` facade, so they cost nothing
//! until a recorder is installed. [`init_metrics`] installs an in-process
//! Prometheus recorder; function platforms have no scrape endpoint, so the
//! snapshot is pulled with [`render_metrics`] and flushed wherever the
//! platform expects it.
//!
//! | Metric | Type | Labels | Description |
//! |--------|------|--------|-------------|
//! | `lamina_invocations_total` | Counter | `branch` | Completed invocations |
//! | `lamina_invocation_duration_seconds` | Histogram | `branch` | Invocation latency |
//! | `lamina_teardown_faults_total` | Counter | - | Teardowns that faulted |
//! | `lamina_fallback_transforms_total` | Counter | - | Responses built by the fallback |

use crate::error::TelemetryError;
use crate::TelemetryResult;
use metrics::{counter, describe_counter, describe_histogram, histogram};
use metrics_exporter_prometheus::{Matcher, PrometheusBuilder, PrometheusHandle};
use serde::{Deserialize, Serialize};
use std::sync::OnceLock;
use std::time::Duration;

/// Completed invocations, labelled by branch.
pub const INVOCATIONS_TOTAL: &str = "lamina_invocations_total";

/// Invocation latency histogram.
pub const INVOCATION_DURATION_SECONDS: &str = "lamina_invocation_duration_seconds";

/// Teardowns that produced a fault.
pub const TEARDOWN_FAULTS_TOTAL: &str = "lamina_teardown_faults_total";

/// Responses produced by the fallback transform.
pub const FALLBACK_TRANSFORMS_TOTAL: &str = "lamina_fallback_transforms_total";

static METRICS_HANDLE: OnceLock<PrometheusHandle> = OnceLock::new();

/// Metrics configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct MetricsConfig {
    /// Whether metrics are enabled.
    pub enabled: bool,

    /// Value of the global `service` label.
    pub service_name: String,

    /// Histogram buckets for invocation duration, in seconds.
    pub duration_buckets: Vec<f64>,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            service_name: "lamina".to_string(),
            // 1ms .. 10s
            duration_buckets: vec![
                0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0,
            ],
        }
    }
}

/// Installs the Prometheus recorder.
///
/// Calling it again after a successful install is a no-op.
///
/// # Errors
///
/// Returns `TelemetryError::InvalidConfig` for an empty bucket list and
/// `TelemetryError::MetricsInit` if another recorder is already installed.
pub fn init_metrics(config: &MetricsConfig) -> TelemetryResult<()> {
    if !config.enabled || METRICS_HANDLE.get().is_some() {
        return Ok(());
    }

    let handle = PrometheusBuilder::new()
        .add_global_label("service", config.service_name.clone())
        .set_buckets_for_metric(
            Matcher::Full(INVOCATION_DURATION_SECONDS.to_string()),
            &config.duration_buckets,
        )
        .map_err(|e| TelemetryError::InvalidConfig(e.to_string()))?
        .install_recorder()
        .map_err(|e| TelemetryError::MetricsInit(e.to_string()))?;

    let _ = METRICS_HANDLE.set(handle);
    describe_metrics();

    Ok(())
}

/// Renders the current snapshot in Prometheus text format.
///
/// Returns `None` if metrics are not initialized.
#[must_use]
pub fn render_metrics() -> Option<String> {
    METRICS_HANDLE.get().map(PrometheusHandle::render)
}

fn describe_metrics() {
    describe_counter!(INVOCATIONS_TOTAL, "Completed invocations by resolution branch");
    describe_histogram!(
        INVOCATION_DURATION_SECONDS,
        metrics::Unit::Seconds,
        "Invocation duration from first middleware to end of teardown"
    );
    describe_counter!(
        TEARDOWN_FAULTS_TOTAL,
        "Invocations whose lifecycle teardown faulted"
    );
    describe_counter!(
        FALLBACK_TRANSFORMS_TOTAL,
        "Invocations resolved by the process-wide fallback transform"
    );
}

/// Records a completed invocation.
pub fn record_invocation(branch: &'static str, duration: Duration) {
    counter!(INVOCATIONS_TOTAL, "branch" => branch).increment(1);
    histogram!(INVOCATION_DURATION_SECONDS, "branch" => branch).record(duration.as_secs_f64());
}

/// Records a teardown that faulted.
pub fn record_teardown_fault() {
    counter!(TEARDOWN_FAULTS_TOTAL).increment(1);
}

/// Records a response built by the fallback transform.
pub fn record_fallback() {
    counter!(FALLBACK_TRANSFORMS_TOTAL).increment(1);
}
