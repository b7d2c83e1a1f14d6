//! Handler chains.
//!
//! A chain is an ordered list of handlers for one branch. The executor runs
//! them in order and composes their results:
//!
//! - The last handler that produced a value wins, unless one stopped the
//!   chain, in which case its value wins
//! - `Flow::Skip` and the reserved `Skipped` error contribute nothing
//! - A chain where no handler produced a value resolves to `None`, and the
//!   engine substitutes the branch default
//!
//! On the failure branch a declared error, returned or raised, becomes the
//! current error: later handlers see it through [`FailedRequest::error`]
//! and may handle it. A raised error escapes only if it is still current
//! when the chain runs out. Everywhere else the engine decides from the
//! returned [`ChainEnd`].

use crate::flow::{Flow, HandlerResult};
use crate::lifecycle::{HandlerLifecycle, HookRegistry};
use crate::middleware::BoxFuture;
use crate::request::{FailedRequest, FaultedRequest, Request};
use lamina_core::unwind::{self, Unwound};
use lamina_core::{Failure, Fault, TypedError};
use serde_json::Value;
use std::fmt;
use std::future::Future;
use std::sync::Arc;

/// The three handling branches.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Branch {
    /// Every middleware succeeded.
    Ok,
    /// A middleware or success handler produced a declared error.
    Fail,
    /// Something faulted.
    Fatal,
}

impl Branch {
    /// Returns the branch name used in logs and metrics.
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::Ok => "ok",
            Self::Fail => "fail",
            Self::Fatal => "fatal",
        }
    }
}

impl fmt::Display for Branch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// The terminal result of a branch, before transformation.
pub type BranchResult = Result<Value, TypedError>;

/// A type-erased handler taking request view `R`.
pub type Handler<R> =
    Arc<dyn Fn(R, HandlerLifecycle) -> BoxFuture<'static, HandlerResult> + Send + Sync + 'static>;

/// Boxes a handler closure.
pub(crate) fn handler<R, F, Fut>(func: F) -> Handler<R>
where
    R: 'static,
    F: Fn(R, HandlerLifecycle) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = HandlerResult> + Send + 'static,
{
    Arc::new(move |request, lifecycle| -> BoxFuture<'static, HandlerResult> {
        Box::pin(func(request, lifecycle))
    })
}

struct Entry<R> {
    handler: Handler<R>,
    /// Middleware index this handler is restricted to.
    scope: Option<usize>,
}

impl<R> Clone for Entry<R> {
    fn clone(&self) -> Self {
        Self {
            handler: Arc::clone(&self.handler),
            scope: self.scope,
        }
    }
}

/// How a chain run ended.
#[derive(Debug, Clone, PartialEq)]
pub(crate) enum ChainEnd {
    /// Every applicable handler ran; `None` if none produced a value.
    Done(Option<BranchResult>),
    /// A handler escaped the chain.
    Escaped(Escape),
}

/// An error that left a chain.
#[derive(Debug, Clone, PartialEq)]
pub(crate) enum Escape {
    /// Returned declared error, success chain only.
    Declared(TypedError),
    /// Declared error thrown with `raise`.
    Raised(TypedError),
    /// Fault or panic.
    Fault(Fault),
}

/// An ordered handler list for one branch.
pub(crate) struct Chain<R> {
    branch: Branch,
    entries: Vec<Entry<R>>,
}

impl<R> Clone for Chain<R> {
    fn clone(&self) -> Self {
        Self {
            branch: self.branch,
            entries: self.entries.clone(),
        }
    }
}

/// A request view handed to chain handlers.
pub(crate) trait View: AsRef<Request> + Clone + Send + 'static {
    /// Makes `error` the current error, for views that carry one.
    fn replace_error(&mut self, _error: TypedError) {}
}

impl View for Request {}

impl View for FaultedRequest {}

impl View for FailedRequest {
    fn replace_error(&mut self, error: TypedError) {
        self.set_error(error);
    }
}

impl<R: View> Chain<R> {
    pub(crate) fn new(branch: Branch) -> Self {
        Self {
            branch,
            entries: Vec::new(),
        }
    }

    pub(crate) fn push(&mut self, handler: Handler<R>, scope: Option<usize>) {
        self.entries.push(Entry { handler, scope });
    }

    pub(crate) fn len(&self) -> usize {
        self.entries.len()
    }

    /// Runs the chain.
    ///
    /// Handlers scoped to a middleware run only when `origin` names that
    /// middleware. On the success branch a declared error escapes; on the
    /// failure branch it replaces the current error.
    pub(crate) async fn run(
        &self,
        request: &R,
        origin: Option<usize>,
        registry: &HookRegistry,
    ) -> ChainEnd {
        let request_id = request.as_ref().request_id();
        let mut view = request.clone();
        let mut current: Option<BranchResult> = None;
        // Raised on the failure branch and not yet handled.
        let mut unhandled: Option<TypedError> = None;

        for (index, entry) in self.entries.iter().enumerate() {
            if let Some(scope) = entry.scope {
                if origin != Some(scope) {
                    tracing::debug!(branch = %self.branch, handler = index, scope, "Skipping scoped handler");
                    continue;
                }
            }

            let lifecycle = HandlerLifecycle::new(self.branch, index, request_id, registry.clone());
            let outcome = unwind::guard((entry.handler)(view.clone(), lifecycle)).await;

            match outcome {
                Ok(Ok(Flow::Continue(value))) => {
                    unhandled = None;
                    current = Some(Ok(value));
                }
                Ok(Ok(Flow::Stop(value))) => {
                    tracing::debug!(branch = %self.branch, handler = index, "Handler stopped the chain");
                    return ChainEnd::Done(Some(Ok(value)));
                }
                Ok(Ok(Flow::Skip)) => {}
                Ok(Err(Failure::Declared(error))) | Err(Unwound::Raised(error))
                    if error.is_skipped() => {}
                Ok(Err(Failure::Declared(error))) => match self.branch {
                    Branch::Ok => return ChainEnd::Escaped(Escape::Declared(error)),
                    Branch::Fail => {
                        unhandled = None;
                        view.replace_error(error.clone());
                        current = Some(Err(error));
                    }
                    Branch::Fatal => current = Some(Err(error)),
                },
                Err(Unwound::Raised(error)) => {
                    if self.branch != Branch::Fail {
                        return ChainEnd::Escaped(Escape::Raised(error));
                    }
                    tracing::debug!(handler = index, error_type = %error.kind(), "Failure handler raised");
                    view.replace_error(error.clone());
                    current = Some(Err(error.clone()));
                    unhandled = Some(error);
                }
                Ok(Err(Failure::Fault(fault))) | Err(Unwound::Panicked(fault)) => {
                    tracing::warn!(branch = %self.branch, handler = index, error = %fault, "Handler faulted");
                    return ChainEnd::Escaped(Escape::Fault(fault));
                }
            }
        }

        match unhandled {
            Some(error) => ChainEnd::Escaped(Escape::Raised(error)),
            None => ChainEnd::Done(current),
        }
    }
}

impl AsRef<Request> for Request {
    fn as_ref(&self) -> &Request {
        self
    }
}

impl AsRef<Request> for FailedRequest {
    fn as_ref(&self) -> &Request {
        self.request()
    }
}

impl AsRef<Request> for FaultedRequest {
    fn as_ref(&self) -> &Request {
        self.request()
    }
}
