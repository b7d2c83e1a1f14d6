//! Typed configuration for Lamina functions.
//!
//! - TOML and JSON configuration files
//! - Environment variable overrides
//! - Strict validation (fails on unknown fields)
//! - Layered configuration (defaults → file → env)
//!
//! # Example
//!
//! ```no_run
//! use lamina_config::ConfigLoader;
//! use lamina_pipeline::Pipeline;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let config = ConfigLoader::new()
//!     .with_production()
//!     .with_optional_file("lamina.toml")?
//!     .with_env_prefix("LAMINA")
//!     .load()?;
//!
//! lamina_telemetry::init_telemetry(&config.telemetry())?;
//! let pipeline = Pipeline::new().opt(config.pipeline_options());
//! # let _ = pipeline;
//! # Ok(())
//! # }
//! ```
//!
//! # Configuration File Format
//!
//! ```toml
//! [logging]
//! level = "info"
//! json_format = true
//!
//! [metrics]
//! enabled = true
//! service_name = "orders"
//!
//! [faults]
//! expose_details = false
//! internal_error_message = "Something went wrong"
//!
//! [options]
//! table = "orders"
//! ```
//!
//! # Environment Variable Overrides
//!
//! - `LAMINA__LOGGING__LEVEL=debug`
//! - `LAMINA__FAULTS__EXPOSE_DETAILS=true`
//! - `LAMINA__OPTIONS__TABLE=orders`

#![doc(html_root_url = "https://docs.rs/lamina-config/0.1.0")]
#![warn(missing_docs)]
#![forbid(unsafe_code)]

mod config;
mod error;
mod loader;

pub use config::{FaultConfig, LaminaConfig};
pub use error::ConfigError;
pub use loader::ConfigLoader;
