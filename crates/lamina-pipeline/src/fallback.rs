//! The process-wide fallback transform.
//!
//! When the fault branch itself fails (a fault handler faults, or the fault
//! transform errors) the engine has nothing left to render the response
//! with. It then hands the fault to the fallback transform, which is the
//! only piece of state shared by every pipeline in the process.
//!
//! Configure it once at startup:
//!
//! ```
//! use lamina_core::Response;
//! use lamina_pipeline::fallback;
//!
//! fallback::set(|fault| Ok(Response::new(503).with_body(fault.cause.clone())));
//! # fallback::reset();
//! ```
//!
//! Platforms that signal retries through a rejected invocation can install
//! [`reject`], which makes `RequestHandler::invoke` return the fault as an
//! error instead of a response.

use lamina_core::unwind;
use lamina_core::{Fault, Response};
use parking_lot::RwLock;
use std::sync::{Arc, OnceLock};

/// A fallback transform.
pub type Fallback = Arc<dyn Fn(&Fault) -> Result<Response, Fault> + Send + Sync + 'static>;

static FALLBACK: OnceLock<RwLock<Fallback>> = OnceLock::new();

const DEFAULT_BODY: &str =
    r#"{"status":"error","error":{"type":"Fault","message":"An internal error occurred"}}"#;

fn slot() -> &'static RwLock<Fallback> {
    FALLBACK.get_or_init(|| RwLock::new(Arc::new(default_fallback)))
}

fn default_fallback(fault: &Fault) -> Result<Response, Fault> {
    Ok(default_response(fault))
}

/// Replaces the fallback transform.
pub fn set<F>(fallback: F)
where
    F: Fn(&Fault) -> Result<Response, Fault> + Send + Sync + 'static,
{
    *slot().write() = Arc::new(fallback);
    tracing::debug!("Fallback transform replaced");
}

/// Returns the current fallback transform.
pub fn get() -> Fallback {
    Arc::clone(&slot().read())
}

/// Restores the default fallback transform.
pub fn reset() {
    set(default_fallback);
}

/// A fallback that rejects the invocation with the fault.
pub fn reject() -> impl Fn(&Fault) -> Result<Response, Fault> + Send + Sync + 'static {
    |fault: &Fault| Err(fault.clone())
}

/// The default fallback response: a bare 500 that never fails to build.
#[must_use]
pub fn default_response(_fault: &Fault) -> Response {
    Response::new(500)
        .with_header("content-type", "application/json")
        .with_body(DEFAULT_BODY)
}

/// Runs the current fallback, catching panics.
pub(crate) fn apply(fault: Fault) -> Result<Response, Fault> {
    tracing::error!(error = %fault, "Resolving through the fallback transform");
    lamina_telemetry::metrics::record_fallback();
    let fallback = get();
    match unwind::guard_sync(|| fallback(&fault)) {
        Ok(result) => result,
        Err(unwound) => Err(unwound.into_fault()),
    }
}
