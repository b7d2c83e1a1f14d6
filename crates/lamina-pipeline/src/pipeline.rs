//! The pipeline composer.
//!
//! A [`Pipeline`] is an immutable definition: middleware creators, merged
//! options, the three handler chains and the three branch transforms. Every
//! composer method returns a new definition and leaves the receiver
//! untouched, so a partially composed pipeline can be reused as the base of
//! several others.
//!
//! ```text
//! srv(A) ─ srv(B) ─ opt(..) ─ ok(h1) ─ fail(h2) ─ req()
//!                                                  │
//!                   creators run once here ────────┘
//! ```
//!
//! # Example
//!
//! ```
//! # tokio_test::block_on(async {
//! use lamina_core::{Context, Service};
//! use lamina_pipeline::{middleware::service, Flow, Pipeline};
//! use serde_json::json;
//!
//! struct Greeting(&'static str);
//!
//! let base = Pipeline::new()
//!     .srv(service("greeting", |_, _| async { Ok(Service::new().with(Greeting("hello"))) }));
//!
//! let handler = base
//!     .ok(|request, _| async move {
//!         let greeting = request.require::<Greeting>()?;
//!         Ok(Flow::next(greeting.0))
//!     })
//!     .req();
//!
//! let response = handler.invoke(json!({}), Context::new()).await.unwrap();
//! assert_eq!(response.body, r#"{"status":"success","data":"hello"}"#);
//! # });
//! ```

use crate::chain::{handler, Branch, BranchResult, Chain, Handler};
use crate::engine::RequestHandler;
use crate::flow::HandlerResult;
use crate::lifecycle::HandlerLifecycle;
use crate::middleware::Creator;
use crate::request::{FailedRequest, FaultedRequest, Request};
use crate::transform::{chained, transform, Transforms};
use lamina_core::{Capability, LaminaResult, Options, Response};
use std::collections::HashSet;
use std::fmt;
use std::future::Future;
use std::sync::Arc;
use thiserror::Error;

/// Errors found when checking a pipeline's stage order.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CompositionError {
    /// A stage requires a capability no earlier stage provides.
    #[error("stage '{stage}' (#{index}) requires {capability}, which no earlier stage provides")]
    MissingCapability {
        /// Name of the stage with the unmet requirement.
        stage: &'static str,
        /// Index of that stage.
        index: usize,
        /// The missing capability.
        capability: &'static str,
    },
}

/// Number of handlers in each chain.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct HandlerCounts {
    /// Success handlers.
    pub ok: usize,
    /// Failure handlers.
    pub fail: usize,
    /// Fault handlers.
    pub fatal: usize,
}

/// A middleware bundled with its own handlers.
///
/// The package's failure handler only runs for failures raised by the
/// package's own middleware.
///
/// ```
/// use lamina_core::Service;
/// use lamina_pipeline::{middleware::service, Flow, Package, Pipeline};
///
/// struct Auth;
///
/// let auth = Package::new(service("auth", |_, _| async { Ok(Service::new().with(Auth)) }))
///     .fail(|request, _| async move {
///         Ok(Flow::stop(format!("auth failed: {}", request.error().kind())))
///     });
///
/// let pipeline = Pipeline::new().pack(auth);
/// assert_eq!(pipeline.stage_names(), vec!["auth"]);
/// ```
pub struct Package {
    creator: Arc<dyn Creator>,
    ok: Option<Handler<Request>>,
    fail: Option<Handler<FailedRequest>>,
}

impl Package {
    /// Creates a package around a creator.
    pub fn new<C: Creator>(creator: C) -> Self {
        Self {
            creator: Arc::new(creator),
            ok: None,
            fail: None,
        }
    }

    /// Sets the package's success handler.
    #[must_use]
    pub fn ok<F, Fut>(mut self, func: F) -> Self
    where
        F: Fn(Request, HandlerLifecycle) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = HandlerResult> + Send + 'static,
    {
        self.ok = Some(handler(func));
        self
    }

    /// Sets the package's failure handler.
    #[must_use]
    pub fn fail<F, Fut>(mut self, func: F) -> Self
    where
        F: Fn(FailedRequest, HandlerLifecycle) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = HandlerResult> + Send + 'static,
    {
        self.fail = Some(handler(func));
        self
    }
}

/// An immutable pipeline definition.
#[derive(Clone)]
pub struct Pipeline {
    pub(crate) creators: Vec<Arc<dyn Creator>>,
    pub(crate) options: Options,
    pub(crate) ok: Chain<Request>,
    pub(crate) fail: Chain<FailedRequest>,
    pub(crate) fatal: Chain<FaultedRequest>,
    pub(crate) transforms: Transforms,
}

impl Default for Pipeline {
    fn default() -> Self {
        Self::new()
    }
}

impl Pipeline {
    /// Creates an empty pipeline with the default JSON transforms.
    #[must_use]
    pub fn new() -> Self {
        Self {
            creators: Vec::new(),
            options: Options::new(),
            ok: Chain::new(Branch::Ok),
            fail: Chain::new(Branch::Fail),
            fatal: Chain::new(Branch::Fatal),
            transforms: Transforms::default(),
        }
    }

    /// Appends a middleware creator.
    #[must_use]
    pub fn srv<C: Creator>(&self, creator: C) -> Self {
        self.srv_arc(Arc::new(creator))
    }

    /// Appends a shared middleware creator.
    #[must_use]
    pub fn srv_arc(&self, creator: Arc<dyn Creator>) -> Self {
        let mut next = self.clone();
        next.creators.push(creator);
        next
    }

    /// Shallow-merges `partial` into the pipeline's options.
    ///
    /// Later calls win on key conflicts. Options apply to the whole
    /// pipeline, including stages registered before this call.
    #[must_use]
    pub fn opt(&self, partial: Options) -> Self {
        let mut next = self.clone();
        next.options.merge(&partial);
        next
    }

    /// Appends a success handler.
    #[must_use]
    pub fn ok<F, Fut>(&self, func: F) -> Self
    where
        F: Fn(Request, HandlerLifecycle) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = HandlerResult> + Send + 'static,
    {
        let mut next = self.clone();
        next.ok.push(handler(func), None);
        next
    }

    /// Appends a failure handler.
    #[must_use]
    pub fn fail<F, Fut>(&self, func: F) -> Self
    where
        F: Fn(FailedRequest, HandlerLifecycle) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = HandlerResult> + Send + 'static,
    {
        let mut next = self.clone();
        next.fail.push(handler(func), None);
        next
    }

    /// Appends a fault handler.
    #[must_use]
    pub fn fatal<F, Fut>(&self, func: F) -> Self
    where
        F: Fn(FaultedRequest, HandlerLifecycle) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = HandlerResult> + Send + 'static,
    {
        let mut next = self.clone();
        next.fatal.push(handler(func), None);
        next
    }

    /// Replaces the success transform.
    #[must_use]
    pub fn on_ok<F, Fut>(&self, func: F) -> Self
    where
        F: Fn(BranchResult, Request) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = LaminaResult<Response>> + Send + 'static,
    {
        let mut next = self.clone();
        next.transforms.ok = transform(func);
        next
    }

    /// Replaces the failure transform.
    #[must_use]
    pub fn on_fail<F, Fut>(&self, func: F) -> Self
    where
        F: Fn(BranchResult, Request) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = LaminaResult<Response>> + Send + 'static,
    {
        let mut next = self.clone();
        next.transforms.fail = transform(func);
        next
    }

    /// Replaces the fault transform.
    #[must_use]
    pub fn on_fatal<F, Fut>(&self, func: F) -> Self
    where
        F: Fn(BranchResult, Request) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = LaminaResult<Response>> + Send + 'static,
    {
        let mut next = self.clone();
        next.transforms.fatal = transform(func);
        next
    }

    /// Replaces the success transform with one that also receives the
    /// previous transform's response.
    #[must_use]
    pub fn on_ok_res<F, Fut>(&self, func: F) -> Self
    where
        F: Fn(BranchResult, Request, Response) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = LaminaResult<Response>> + Send + 'static,
    {
        let mut next = self.clone();
        next.transforms.ok = chained(Arc::clone(&self.transforms.ok), func);
        next
    }

    /// Failure-branch counterpart of [`on_ok_res`](Self::on_ok_res).
    #[must_use]
    pub fn on_fail_res<F, Fut>(&self, func: F) -> Self
    where
        F: Fn(BranchResult, Request, Response) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = LaminaResult<Response>> + Send + 'static,
    {
        let mut next = self.clone();
        next.transforms.fail = chained(Arc::clone(&self.transforms.fail), func);
        next
    }

    /// Fault-branch counterpart of [`on_ok_res`](Self::on_ok_res).
    #[must_use]
    pub fn on_fatal_res<F, Fut>(&self, func: F) -> Self
    where
        F: Fn(BranchResult, Request, Response) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = LaminaResult<Response>> + Send + 'static,
    {
        let mut next = self.clone();
        next.transforms.fatal = chained(Arc::clone(&self.transforms.fatal), func);
        next
    }

    /// Adds a package: its middleware, and its handlers scoped to it.
    #[must_use]
    pub fn pack(&self, package: Package) -> Self {
        let mut next = self.clone();
        let index = next.creators.len();
        next.creators.push(package.creator);
        if let Some(ok) = package.ok {
            next.ok.push(ok, None);
        }
        if let Some(fail) = package.fail {
            next.fail.push(fail, Some(index));
        }
        next
    }

    /// Verifies that every stage's requirements are provided by earlier
    /// stages.
    pub fn check(&self) -> Result<(), CompositionError> {
        let mut provided: HashSet<Capability> = HashSet::new();
        for (index, creator) in self.creators.iter().enumerate() {
            if let Some(missing) = creator
                .requires()
                .into_iter()
                .find(|capability| !provided.contains(capability))
            {
                return Err(CompositionError::MissingCapability {
                    stage: creator.name(),
                    index,
                    capability: missing.name(),
                });
            }
            provided.extend(creator.provides());
        }
        Ok(())
    }

    /// Materializes the pipeline.
    ///
    /// Runs [`check`](Self::check), then every creator exactly once. A
    /// failure at either step yields a disabled handler; see
    /// [`RequestHandler::creation_error`].
    #[must_use]
    pub fn req(&self) -> RequestHandler {
        RequestHandler::materialize(self)
    }

    /// Names of the middleware stages, in order.
    #[must_use]
    pub fn stage_names(&self) -> Vec<&'static str> {
        self.creators.iter().map(|creator| creator.name()).collect()
    }

    /// Number of handlers in each chain.
    #[must_use]
    pub fn handler_counts(&self) -> HandlerCounts {
        HandlerCounts {
            ok: self.ok.len(),
            fail: self.fail.len(),
            fatal: self.fatal.len(),
        }
    }

    /// The merged options.
    #[must_use]
    pub fn options(&self) -> &Options {
        &self.options
    }
}

impl fmt::Debug for Pipeline {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Pipeline")
            .field("stages", &self.stage_names())
            .field("options", &self.options)
            .field("handlers", &self.handler_counts())
            .finish()
    }
}
