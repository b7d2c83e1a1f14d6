//! # Lamina Pipeline
//!
//! Pipeline composer and execution engine for single-invocation functions.
//!
//! A function is described as a [`Pipeline`]: middleware that build a
//! capability container for the request, and three handler chains that
//! resolve the outcome:
//!
//! ```text
//! event ─ middleware A ─ middleware B ─┬─ ok chain ────┬─ transform ─ teardown ─ response
//!                                      ├─ fail chain ──┤
//!                                      └─ fatal chain ─┘
//! ```
//!
//! | Branch | Entered when | Default response |
//! |--------|--------------|------------------|
//! | ok | every middleware succeeded | 200 success envelope |
//! | fail | a declared error was returned | 400 or the error's `code` |
//! | fatal | anything else went wrong | 500, details hidden |
//!
//! ## Key Features
//!
//! - **Immutable composition**: every composer call returns a new pipeline
//! - **Create once**: creators run once per [`Pipeline::req`], middleware once per request
//! - **Chain control**: handlers continue, stop or skip with [`Flow`]
//! - **Lifecycle hooks**: end hooks FIFO, destroy hooks LIFO, after every response
//! - **Capability contracts**: stage order is checked before serving
//!
//! ## Example
//!
//! ```
//! # tokio_test::block_on(async {
//! use lamina_core::{Context, Service, TypedError};
//! use lamina_pipeline::{middleware::service, Flow, Pipeline};
//! use serde_json::json;
//!
//! struct User(String);
//!
//! let handler = Pipeline::new()
//!     .srv(service("user", |request, _| async move {
//!         match request.event()["user"].as_str() {
//!             Some(name) => Ok(Service::new().with(User(name.to_string()))),
//!             None => Err(TypedError::new("Unauthorized").with_code(401).into()),
//!         }
//!     }))
//!     .ok(|request, _| async move {
//!         let user = request.require::<User>()?;
//!         Ok(Flow::next(format!("hello {}", user.0)))
//!     })
//!     .req();
//!
//! let ok = handler.invoke(json!({"user": "ada"}), Context::new()).await.unwrap();
//! assert_eq!(ok.status_code, 200);
//!
//! let denied = handler.invoke(json!({}), Context::new()).await.unwrap();
//! assert_eq!(denied.status_code, 401);
//! # });
//! ```

#![doc(html_root_url = "https://docs.rs/lamina-pipeline/0.1.0")]
#![warn(missing_docs)]
#![forbid(unsafe_code)]

pub mod chain;
pub mod engine;
pub mod fallback;
pub mod flow;
pub mod lifecycle;
pub mod middleware;
pub mod pipeline;
pub mod request;
pub mod transform;

// Re-export main types at crate root
pub use chain::{Branch, BranchResult, Handler};
pub use engine::RequestHandler;
pub use flow::{
    immediate, returns_when, routed, works, works_for_err, Condition, Flow, HandlerResult, Immediate,
};
pub use lifecycle::{
    CreationLifecycle, HandlerLifecycle, HookKind, HookOwner, LifecycleError, RequestLifecycle,
};
pub use middleware::{BoxFuture, Creator, FnCreator, FnMiddleware, Middleware};
pub use pipeline::{CompositionError, HandlerCounts, Package, Pipeline};
pub use request::{FailedRequest, FaultedRequest, Request};
pub use transform::{json_fail, json_fatal, json_ok, Transform};
