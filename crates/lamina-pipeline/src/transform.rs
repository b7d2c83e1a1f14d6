//! Response transforms.
//!
//! A transform turns a branch's terminal [`BranchResult`] into the
//! platform [`Response`]. Each branch has its own transform; the defaults
//! render the JSON envelope:
//!
//! ```json
//! {"status": "success", "data": <value>}
//! {"status": "error", "error": {"type": "NotFound", "message": "..."}}
//! ```
//!
//! | Branch | Success status | Error status |
//! |--------|----------------|--------------|
//! | ok | 200 | `code` or 400 |
//! | fail | 200 | `code` or 400 |
//! | fatal | 200 | `code` or 500 |
//!
//! The reserved `Skipped` error means "did not run" and is never rendered:
//! every default transform treats it as a `null` success.
//!
//! Fault details are hidden by the fatal transform unless the
//! `expose_fault_details` option is set; the replacement message can be
//! changed with the `internal_error_message` option.

use crate::chain::BranchResult;
use crate::middleware::BoxFuture;
use crate::request::Request;
use lamina_core::{LaminaResult, Response, TypedError};
use serde::Serialize;
use serde_json::Value;
use std::future::Future;
use std::sync::Arc;

/// Option key that makes the fatal transform include fault details.
pub const EXPOSE_FAULT_DETAILS: &str = "expose_fault_details";

/// Option key overriding the message shown for hidden faults.
pub const INTERNAL_ERROR_MESSAGE: &str = "internal_error_message";

/// Message shown for hidden faults.
pub const DEFAULT_INTERNAL_ERROR_MESSAGE: &str = "An internal error occurred";

/// A type-erased branch transform.
pub type Transform = Arc<
    dyn Fn(BranchResult, Request) -> BoxFuture<'static, LaminaResult<Response>>
        + Send
        + Sync
        + 'static,
>;

/// Boxes a transform closure.
pub(crate) fn transform<F, Fut>(func: F) -> Transform
where
    F: Fn(BranchResult, Request) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = LaminaResult<Response>> + Send + 'static,
{
    Arc::new(move |result, request| -> BoxFuture<'static, LaminaResult<Response>> {
        Box::pin(func(result, request))
    })
}

/// Wraps `previous` so that `func` also receives its response.
pub(crate) fn chained<F, Fut>(previous: Transform, func: F) -> Transform
where
    F: Fn(BranchResult, Request, Response) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = LaminaResult<Response>> + Send + 'static,
{
    let func = Arc::new(func);
    Arc::new(move |result: BranchResult, request: Request| -> BoxFuture<'static, LaminaResult<Response>> {
        let previous = Arc::clone(&previous);
        let func = Arc::clone(&func);
        Box::pin(async move {
            let base = previous(result.clone(), request.clone()).await?;
            func(result, request, base).await
        })
    })
}

/// The current transform of each branch.
#[derive(Clone)]
pub(crate) struct Transforms {
    pub(crate) ok: Transform,
    pub(crate) fail: Transform,
    pub(crate) fatal: Transform,
}

impl Default for Transforms {
    fn default() -> Self {
        Self {
            ok: transform(|result, request| async move { json_ok(&result, &request) }),
            fail: transform(|result, request| async move { json_fail(&result, &request) }),
            fatal: transform(|result, request| async move { json_fatal(&result, &request) }),
        }
    }
}

#[derive(Serialize)]
struct SuccessEnvelope<'a> {
    status: &'static str,
    data: &'a Value,
}

#[derive(Serialize)]
struct ErrorEnvelope<'a> {
    status: &'static str,
    error: &'a TypedError,
}

fn success(data: &Value) -> LaminaResult<Response> {
    Ok(Response::json(
        200,
        &SuccessEnvelope {
            status: "success",
            data,
        },
    )?)
}

fn error(error: &TypedError, default_status: u16) -> LaminaResult<Response> {
    if error.is_skipped() {
        return success(&Value::Null);
    }
    Ok(Response::json(
        error.code.unwrap_or(default_status),
        &ErrorEnvelope {
            status: "error",
            error,
        },
    )?)
}

/// Default success transform.
pub fn json_ok(result: &BranchResult, _request: &Request) -> LaminaResult<Response> {
    match result {
        Ok(data) => success(data),
        Err(e) => error(e, 400),
    }
}

/// Default failure transform.
pub fn json_fail(result: &BranchResult, _request: &Request) -> LaminaResult<Response> {
    match result {
        Ok(data) => success(data),
        Err(e) => error(e, 400),
    }
}

/// Default fault transform.
///
/// Errors of kind [`TypedError::FAULT`] lose their cause and message
/// unless [`EXPOSE_FAULT_DETAILS`] is set.
pub fn json_fatal(result: &BranchResult, request: &Request) -> LaminaResult<Response> {
    match result {
        Ok(data) => success(data),
        Err(e) if e.is(TypedError::FAULT) && !request.options().flag(EXPOSE_FAULT_DETAILS) => {
            let message = request
                .options()
                .get::<String>(INTERNAL_ERROR_MESSAGE)
                .unwrap_or_else(|| DEFAULT_INTERNAL_ERROR_MESSAGE.to_string());
            let mut hidden = TypedError::new(TypedError::FAULT).with_message(message);
            hidden.code = e.code;
            error(&hidden, 500)
        }
        Err(e) => error(e, 500),
    }
}
