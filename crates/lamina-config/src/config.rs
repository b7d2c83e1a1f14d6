//! Configuration types.
//!
//! [`LaminaConfig`] is the root: telemetry settings, fault exposure, and
//! free-form pipeline options that end up in every request's `options()`.

use lamina_core::Options;
use lamina_pipeline::transform::{EXPOSE_FAULT_DETAILS, INTERNAL_ERROR_MESSAGE};
use lamina_telemetry::{LogConfig, MetricsConfig, TelemetryConfig};
use serde::{Deserialize, Serialize};

use crate::ConfigError;

/// How the default fault transform renders faults.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct FaultConfig {
    /// Include fault cause and message in responses.
    pub expose_details: bool,

    /// Message shown in place of hidden fault details.
    pub internal_error_message: Option<String>,
}

/// Complete function configuration.
///
/// Use [`ConfigLoader`](crate::ConfigLoader) to load it from files and
/// environment variables.
///
/// # Example
///
/// ```
/// use lamina_config::LaminaConfig;
///
/// let config = LaminaConfig::default();
/// assert_eq!(config.logging.level, "info");
/// assert!(!config.faults.expose_details);
/// ```
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct LaminaConfig {
    /// Logging configuration.
    #[serde(default)]
    pub logging: LogConfig,

    /// Metrics configuration.
    #[serde(default)]
    pub metrics: MetricsConfig,

    /// Fault rendering.
    #[serde(default)]
    pub faults: FaultConfig,

    /// Options handed to every middleware creator and request.
    #[serde(default)]
    pub options: Options,
}

impl LaminaConfig {
    /// Validate the configuration.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::InvalidValue` if:
    /// - the log filter does not parse
    /// - duration buckets are empty or not strictly increasing
    /// - the internal error message is empty
    /// - an option key is empty
    pub fn validate(&self) -> Result<(), ConfigError> {
        if let Err(e) = lamina_telemetry::logging::create_env_filter(&self.logging.level) {
            return Err(ConfigError::invalid_value("logging.level", e.to_string()));
        }

        let buckets = &self.metrics.duration_buckets;
        if self.metrics.enabled && buckets.is_empty() {
            return Err(ConfigError::invalid_value(
                "metrics.duration_buckets",
                "must not be empty",
            ));
        }
        if buckets.windows(2).any(|pair| pair[0] >= pair[1]) {
            return Err(ConfigError::invalid_value(
                "metrics.duration_buckets",
                "must be strictly increasing",
            ));
        }

        if matches!(&self.faults.internal_error_message, Some(message) if message.is_empty()) {
            return Err(ConfigError::invalid_value(
                "faults.internal_error_message",
                "must not be empty",
            ));
        }

        if self.options.keys().any(str::is_empty) {
            return Err(ConfigError::invalid_value("options", "keys must not be empty"));
        }

        Ok(())
    }

    /// Development preset: pretty debug logs, fault details exposed.
    ///
    /// ```
    /// use lamina_config::LaminaConfig;
    ///
    /// let config = LaminaConfig::development();
    /// assert_eq!(config.logging.level, "debug");
    /// assert!(config.faults.expose_details);
    /// ```
    #[must_use]
    pub fn development() -> Self {
        Self {
            logging: LogConfig::development(),
            faults: FaultConfig {
                expose_details: true,
                internal_error_message: None,
            },
            ..Self::default()
        }
    }

    /// Production preset: JSON info logs, fault details hidden.
    #[must_use]
    pub fn production() -> Self {
        Self {
            logging: LogConfig::production(),
            ..Self::default()
        }
    }

    /// The options to pass to `Pipeline::opt`.
    ///
    /// Fault settings are folded in under the keys the default fault
    /// transform reads; explicit `options` entries win.
    ///
    /// ```
    /// use lamina_config::LaminaConfig;
    ///
    /// let options = LaminaConfig::development().pipeline_options();
    /// assert!(options.flag("expose_fault_details"));
    /// ```
    #[must_use]
    pub fn pipeline_options(&self) -> Options {
        let mut options = Options::new().with(EXPOSE_FAULT_DETAILS, self.faults.expose_details);
        if let Some(message) = &self.faults.internal_error_message {
            options.set(INTERNAL_ERROR_MESSAGE, message.clone());
        }
        options.merged(&self.options)
    }

    /// The telemetry part of the configuration.
    #[must_use]
    pub fn telemetry(&self) -> TelemetryConfig {
        TelemetryConfig {
            logging: self.logging.clone(),
            metrics: self.metrics.clone(),
        }
    }
}
