//! # Lamina
//!
//! **Request pipelines for serverless functions**
//!
//! A function is composed from small pieces:
//!
//! - **Middleware** build a typed capability container for each request
//! - **Handler chains** resolve the request on one of three branches:
//!   success, declared failure, or fault
//! - **Transforms** turn the branch result into the platform response
//! - **Lifecycle hooks** run after the response is computed, end hooks in
//!   registration order, destroy hooks in reverse
//!
//! ## Quick Start
//!
//! ```
//! # tokio_test::block_on(async {
//! use lamina::prelude::*;
//! use serde_json::json;
//!
//! struct Db;
//!
//! let handler = Pipeline::new()
//!     .srv(service("db", |_request, lifecycle| async move {
//!         lifecycle.on_destroy(|| async { Ok(()) })?;
//!         Ok(Service::new().with(Db))
//!     }))
//!     .ok(|request, _| async move {
//!         request.require::<Db>()?;
//!         Ok(Flow::next(json!({"rows": 0})))
//!     })
//!     .req();
//!
//! let response = handler.invoke(json!({}), Context::new()).await.unwrap();
//! assert_eq!(response.body, r#"{"status":"success","data":{"rows":0}}"#);
//! # });
//! ```
//!
//! ## Architecture
//!
//! ```text
//! event → middleware A → middleware B ─┬→ ok chain ───┬→ transform → end hooks → destroy hooks → response
//!                                      ├→ fail chain ─┤
//!                                      └→ fatal chain ┘
//! ```

#![doc(html_root_url = "https://docs.rs/lamina/0.1.0")]
#![warn(missing_docs)]
#![forbid(unsafe_code)]

// Re-export core types
pub use lamina_core as core;

// Re-export the composer and engine
pub use lamina_pipeline as pipeline;

// Re-export observability
pub use lamina_telemetry as telemetry;

// Re-export configuration
pub use lamina_config as config;

use lamina_config::LaminaConfig;
use lamina_pipeline::Pipeline;
use lamina_telemetry::TelemetryError;

/// Installs telemetry from `config` and starts a pipeline carrying its
/// options.
///
/// # Errors
///
/// Returns `TelemetryError` if logging or metrics fail to initialize.
pub fn pipeline_from_config(config: &LaminaConfig) -> Result<Pipeline, TelemetryError> {
    lamina_telemetry::init_telemetry(&config.telemetry())?;
    Ok(Pipeline::new().opt(config.pipeline_options()))
}

/// Prelude module for convenient imports.
///
/// ```
/// use lamina::prelude::*;
/// ```
pub mod prelude {
    pub use lamina_core::{
        Context, Event, Failure, Fault, LaminaResult, Options, RequestId, Response, Service,
        TypedError,
    };

    pub use lamina_pipeline::middleware::service;
    pub use lamina_pipeline::{
        returns_when, works, works_for_err, Branch, BranchResult, CreationLifecycle, Creator,
        FailedRequest, FaultedRequest, Flow, HandlerLifecycle, HandlerResult, Middleware, Package,
        Pipeline, Request, RequestHandler, RequestLifecycle,
    };

    pub use lamina_config::{ConfigLoader, LaminaConfig};
}
