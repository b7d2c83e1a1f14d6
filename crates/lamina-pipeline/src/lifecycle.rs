//! Per-request lifecycle hooks.
//!
//! Middleware and handlers register teardown work while the request runs.
//! Once the response has been computed, the engine runs every hook exactly
//! once, regardless of which branch produced the response:
//!
//! - **End hooks**: run first, in registration order (FIFO)
//! - **Destroy hooks**: run second, in reverse registration order (LIFO)
//!
//! Each middleware, and each handler, may register at most one hook of each
//! kind per invocation. A hook that fails does not stop the others; the
//! failures are folded into a single [`Fault`] that the engine routes
//! through the fault branch.
//!
//! # Example
//!
//! ```rust,ignore
//! FnMiddleware::new(|_request, lifecycle: RequestLifecycle| async move {
//!     let pool = Pool::connect().await?;
//!     let handle = pool.clone();
//!     lifecycle.on_destroy(move || async move {
//!         handle.close().await;
//!         Ok(())
//!     })?;
//!     Ok(Service::new().with(pool))
//! })
//! ```

use crate::chain::Branch;
use crate::middleware::BoxFuture;
use lamina_core::unwind::{self, Unwound};
use lamina_core::{Failure, Fault, LaminaResult, RequestId, TypedError};
use parking_lot::Mutex;
use std::fmt;
use std::future::Future;
use std::sync::Arc;
use thiserror::Error;

/// A registered teardown hook.
pub type Hook = Box<dyn FnOnce() -> BoxFuture<'static, LaminaResult<()>> + Send + 'static>;

/// Error type for hook registration.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum LifecycleError {
    /// The owner already registered a hook of this kind.
    #[error("{owner} already registered an {kind} hook for this invocation")]
    AlreadyRegistered {
        /// Who tried to register.
        owner: HookOwner,
        /// Which hook kind.
        kind: HookKind,
    },

    /// Teardown has started.
    #[error("teardown has started; hooks can no longer be registered")]
    Closed,
}

/// The two hook kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HookKind {
    /// Runs first, FIFO.
    End,
    /// Runs second, LIFO.
    Destroy,
}

impl fmt::Display for HookKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::End => f.write_str("end"),
            Self::Destroy => f.write_str("destroy"),
        }
    }
}

/// Who registered a hook.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HookOwner {
    /// Middleware stage, by index.
    Middleware(usize),
    /// Handler, by branch and position in its chain.
    Handler(Branch, usize),
}

impl fmt::Display for HookOwner {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Middleware(index) => write!(f, "middleware #{index}"),
            Self::Handler(branch, index) => write!(f, "{branch} handler #{index}"),
        }
    }
}

#[derive(Default)]
struct Registry {
    end: Vec<(HookOwner, Hook)>,
    destroy: Vec<(HookOwner, Hook)>,
    closed: bool,
}

/// The hook registry of one invocation.
///
/// Shared by every lifecycle handle of that invocation and never by two
/// invocations.
#[derive(Clone, Default)]
pub(crate) struct HookRegistry {
    inner: Arc<Mutex<Registry>>,
}

impl HookRegistry {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    fn register(&self, owner: HookOwner, kind: HookKind, hook: Hook) -> Result<(), LifecycleError> {
        let mut registry = self.inner.lock();
        if registry.closed {
            return Err(LifecycleError::Closed);
        }
        let hooks = match kind {
            HookKind::End => &mut registry.end,
            HookKind::Destroy => &mut registry.destroy,
        };
        if hooks.iter().any(|(registered, _)| *registered == owner) {
            return Err(LifecycleError::AlreadyRegistered { owner, kind });
        }
        tracing::debug!(hook = %kind, owner = %owner, "Registered lifecycle hook");
        hooks.push((owner, hook));
        Ok(())
    }

    /// Number of registered (end, destroy) hooks.
    #[cfg(test)]
    pub(crate) fn counts(&self) -> (usize, usize) {
        let registry = self.inner.lock();
        (registry.end.len(), registry.destroy.len())
    }

    /// Closes the registry and runs every hook.
    ///
    /// End hooks run FIFO, then destroy hooks LIFO. All hooks run even when
    /// some fail.
    pub(crate) async fn teardown(&self) -> Result<(), Fault> {
        let (end, destroy) = {
            let mut registry = self.inner.lock();
            registry.closed = true;
            (
                std::mem::take(&mut registry.end),
                std::mem::take(&mut registry.destroy),
            )
        };

        let mut faults: Vec<Fault> = Vec::new();
        let ordered = end
            .into_iter()
            .map(|(owner, hook)| (HookKind::End, owner, hook))
            .chain(
                destroy
                    .into_iter()
                    .rev()
                    .map(|(owner, hook)| (HookKind::Destroy, owner, hook)),
            );

        for (kind, owner, hook) in ordered {
            tracing::debug!(hook = %kind, owner = %owner, "Running lifecycle hook");
            let fault = match unwind::guard(hook()).await {
                Ok(Ok(())) => continue,
                Ok(Err(Failure::Declared(error))) | Err(Unwound::Raised(error)) => {
                    Fault::from_typed(&error)
                }
                Ok(Err(Failure::Fault(fault))) | Err(Unwound::Panicked(fault)) => fault,
            };
            tracing::error!(hook = %kind, owner = %owner, error = %fault, "Lifecycle hook failed");
            faults.push(fault);
        }

        fold_faults(faults)
    }
}

/// Collapses teardown failures into one fault.
fn fold_faults(mut faults: Vec<Fault>) -> Result<(), Fault> {
    match faults.len() {
        0 => Ok(()),
        1 => Err(faults.remove(0)),
        _ => {
            let cause = faults[0].cause.clone();
            let message = faults
                .iter()
                .map(ToString::to_string)
                .collect::<Vec<_>>()
                .join("; ");
            Err(Fault::new(cause, message))
        }
    }
}

fn boxed<F, Fut>(hook: F) -> Hook
where
    F: FnOnce() -> Fut + Send + 'static,
    Fut: Future<Output = LaminaResult<()>> + Send + 'static,
{
    Box::new(move || -> BoxFuture<'static, LaminaResult<()>> { Box::pin(hook()) })
}

/// Lifecycle handle given to a middleware for one request.
#[derive(Clone)]
pub struct RequestLifecycle {
    stage: usize,
    name: &'static str,
    registry: HookRegistry,
}

impl RequestLifecycle {
    pub(crate) fn new(stage: usize, name: &'static str, registry: HookRegistry) -> Self {
        Self {
            stage,
            name,
            registry,
        }
    }

    /// Index of the middleware stage this handle belongs to.
    #[must_use]
    pub fn stage(&self) -> usize {
        self.stage
    }

    /// Name of the middleware stage this handle belongs to.
    #[must_use]
    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Registers this middleware's end hook.
    pub fn on_end<F, Fut>(&self, hook: F) -> Result<(), LifecycleError>
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = LaminaResult<()>> + Send + 'static,
    {
        self.registry
            .register(HookOwner::Middleware(self.stage), HookKind::End, boxed(hook))
    }

    /// Registers this middleware's destroy hook.
    pub fn on_destroy<F, Fut>(&self, hook: F) -> Result<(), LifecycleError>
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = LaminaResult<()>> + Send + 'static,
    {
        self.registry.register(
            HookOwner::Middleware(self.stage),
            HookKind::Destroy,
            boxed(hook),
        )
    }

    /// Aborts the middleware with a declared error tagged with this stage.
    ///
    /// Works from any depth of synchronous or asynchronous code running
    /// inside the middleware.
    pub fn raise(&self, error: TypedError) -> ! {
        unwind::raise(error.with_origin(self.stage))
    }
}

impl fmt::Debug for RequestLifecycle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RequestLifecycle")
            .field("stage", &self.stage)
            .field("name", &self.name)
            .finish_non_exhaustive()
    }
}

/// Lifecycle handle given to a handler.
#[derive(Clone)]
pub struct HandlerLifecycle {
    owner: HookOwner,
    request_id: RequestId,
    registry: HookRegistry,
}

impl HandlerLifecycle {
    pub(crate) fn new(branch: Branch, index: usize, request_id: RequestId, registry: HookRegistry) -> Self {
        Self {
            owner: HookOwner::Handler(branch, index),
            request_id,
            registry,
        }
    }

    /// The invocation's request ID.
    #[must_use]
    pub fn request_id(&self) -> RequestId {
        self.request_id
    }

    /// Registers this handler's end hook.
    ///
    /// Returns [`LifecycleError::Closed`] when called from a fault handler
    /// that is re-running after a teardown fault.
    pub fn on_end<F, Fut>(&self, hook: F) -> Result<(), LifecycleError>
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = LaminaResult<()>> + Send + 'static,
    {
        self.registry.register(self.owner, HookKind::End, boxed(hook))
    }

    /// Aborts the handler with a declared error.
    pub fn raise(&self, error: TypedError) -> ! {
        unwind::raise(error)
    }
}

impl fmt::Debug for HandlerLifecycle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HandlerLifecycle")
            .field("owner", &self.owner)
            .field("request_id", &self.request_id)
            .finish_non_exhaustive()
    }
}

/// Lifecycle handle given to a creator while the pipeline materializes.
#[derive(Debug, Clone, Copy)]
pub struct CreationLifecycle {
    stage: usize,
    name: &'static str,
}

impl CreationLifecycle {
    pub(crate) fn new(stage: usize, name: &'static str) -> Self {
        Self { stage, name }
    }

    /// Index of the stage being created.
    #[must_use]
    pub fn stage(&self) -> usize {
        self.stage
    }

    /// Name of the stage being created.
    #[must_use]
    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Aborts creation with a declared error.
    ///
    /// The pipeline instance is disabled and every invocation enters the
    /// failure branch with this error.
    pub fn raise(&self, error: TypedError) -> ! {
        unwind::raise(error.with_origin(self.stage))
    }
}
