//! Middleware and creator contracts.
//!
//! A middleware is built in two steps:
//!
//! 1. A [`Creator`] runs once, when the pipeline is materialized with
//!    `Pipeline::req()`. It receives the pipeline's merged options and
//!    returns a [`Middleware`].
//! 2. The [`Middleware`] runs once per request. It sees the container built
//!    by the stages before it and returns a [`Service`] holding the
//!    capabilities it adds.
//!
//! Creators declare the capabilities they provide and require, so the
//! pipeline can verify the stage order before serving any request.
//!
//! # Example
//!
//! ```
//! use lamina_core::{Options, Service};
//! use lamina_pipeline::{FnCreator, FnMiddleware};
//!
//! struct Table(String);
//!
//! let creator = FnCreator::new("table", |options: &Options, _| {
//!     let name = options.get::<String>("table").unwrap_or_default();
//!     Ok(FnMiddleware::new(move |_request, _lifecycle| {
//!         let name = name.clone();
//!         async move { Ok(Service::new().with(Table(name))) }
//!     }))
//! })
//! .provides::<Table>();
//! # let _ = creator;
//! ```

use crate::lifecycle::{CreationLifecycle, RequestLifecycle};
use crate::request::Request;
use lamina_core::{Capability, LaminaResult, Options, Service};
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

/// A boxed, sendable future.
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// A per-request middleware function.
///
/// # Invariants
///
/// - The returned container holds only the capabilities this stage adds
/// - A declared error ends the middleware chain and enters the failure branch
/// - Any other error, or a panic, enters the fault branch
pub trait Middleware: Send + Sync + 'static {
    /// Runs the middleware for one request.
    fn handle<'a>(
        &'a self,
        request: Request,
        lifecycle: RequestLifecycle,
    ) -> BoxFuture<'a, LaminaResult<Service>>;
}

/// Builds a [`Middleware`] once per pipeline materialization.
pub trait Creator: Send + Sync + 'static {
    /// Returns the name of this stage.
    ///
    /// This name is used for logging and diagnostics.
    fn name(&self) -> &'static str;

    /// Capabilities this stage adds to the container.
    fn provides(&self) -> Vec<Capability> {
        Vec::new()
    }

    /// Capabilities this stage expects earlier stages to provide.
    fn requires(&self) -> Vec<Capability> {
        Vec::new()
    }

    /// Creates the per-request middleware.
    ///
    /// Called exactly once, synchronously. A failure disables the pipeline
    /// instance.
    fn create(
        &self,
        options: &Options,
        lifecycle: &CreationLifecycle,
    ) -> LaminaResult<Arc<dyn Middleware>>;
}

/// A middleware built from an async closure.
///
/// ```ignore
/// let middleware = FnMiddleware::new(|request, _lifecycle| async move {
///     let user = load_user(request.event()).await?;
///     Ok(Service::new().with(user))
/// });
/// ```
///
/// Cloning shares the closure.
pub struct FnMiddleware<F> {
    func: Arc<F>,
}

impl<F, Fut> FnMiddleware<F>
where
    F: Fn(Request, RequestLifecycle) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = LaminaResult<Service>> + Send + 'static,
{
    /// Creates a new function-based middleware.
    pub fn new(func: F) -> Self {
        Self {
            func: Arc::new(func),
        }
    }
}

impl<F> Clone for FnMiddleware<F> {
    fn clone(&self) -> Self {
        Self {
            func: Arc::clone(&self.func),
        }
    }
}

impl<F, Fut> Middleware for FnMiddleware<F>
where
    F: Fn(Request, RequestLifecycle) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = LaminaResult<Service>> + Send + 'static,
{
    fn handle<'a>(
        &'a self,
        request: Request,
        lifecycle: RequestLifecycle,
    ) -> BoxFuture<'a, LaminaResult<Service>> {
        Box::pin((self.func)(request, lifecycle))
    }
}

/// A creator built from a closure.
pub struct FnCreator<F> {
    name: &'static str,
    func: F,
    provides: Vec<Capability>,
    requires: Vec<Capability>,
}

impl<F, M> FnCreator<F>
where
    F: Fn(&Options, &CreationLifecycle) -> LaminaResult<M> + Send + Sync + 'static,
    M: Middleware,
{
    /// Creates a new function-based creator.
    pub fn new(name: &'static str, func: F) -> Self {
        Self {
            name,
            func,
            provides: Vec::new(),
            requires: Vec::new(),
        }
    }
}

impl<F> FnCreator<F> {
    /// Declares a provided capability.
    #[must_use]
    pub fn provides<T: ?Sized + 'static>(mut self) -> Self {
        self.provides.push(Capability::of::<T>());
        self
    }

    /// Declares a required capability.
    #[must_use]
    pub fn requires<T: ?Sized + 'static>(mut self) -> Self {
        self.requires.push(Capability::of::<T>());
        self
    }
}

impl<F, M> Creator for FnCreator<F>
where
    F: Fn(&Options, &CreationLifecycle) -> LaminaResult<M> + Send + Sync + 'static,
    M: Middleware,
{
    fn name(&self) -> &'static str {
        self.name
    }

    fn provides(&self) -> Vec<Capability> {
        self.provides.clone()
    }

    fn requires(&self) -> Vec<Capability> {
        self.requires.clone()
    }

    fn create(
        &self,
        options: &Options,
        lifecycle: &CreationLifecycle,
    ) -> LaminaResult<Arc<dyn Middleware>> {
        let middleware = (self.func)(options, lifecycle)?;
        Ok(Arc::new(middleware))
    }
}

/// Creates a creator for a middleware that needs no options.
///
/// ```
/// use lamina_core::Service;
/// use lamina_pipeline::middleware::service;
///
/// struct Clock;
///
/// let creator = service("clock", |_request, _lifecycle| async { Ok(Service::new().with(Clock)) });
/// # let _ = creator;
/// ```
pub fn service<F, Fut>(
    name: &'static str,
    func: F,
) -> FnCreator<
    impl Fn(&Options, &CreationLifecycle) -> LaminaResult<FnMiddleware<F>> + Send + Sync + 'static,
>
where
    F: Fn(Request, RequestLifecycle) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = LaminaResult<Service>> + Send + 'static,
{
    let middleware = FnMiddleware::new(func);
    FnCreator::new(name, move |_: &Options, _: &CreationLifecycle| {
        Ok(middleware.clone())
    })
}
