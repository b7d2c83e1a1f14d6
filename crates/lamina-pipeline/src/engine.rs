//! The execution engine.
//!
//! A [`RequestHandler`] is a materialized [`Pipeline`]: its creators have
//! run and it is ready to serve invocations. Each invocation moves through
//! these states:
//!
//! ```text
//! RUNNING_MIDDLEWARE ─┬─ SUCCESS ─┐
//!                     └─ FAILURE ─┴─ RESOLVING_HANDLERS ─ TRANSFORMING ─ TEARDOWN ─ DONE
//!
//!                     FAULTED is reachable from every state
//! ```
//!
//! ## Escalation
//!
//! | Where | What | Goes to |
//! |-------|------|---------|
//! | middleware | `Skipped` | nothing; the next middleware runs |
//! | middleware | declared error | failure chain |
//! | middleware | fault or panic | fault chain |
//! | success chain | declared error | failure chain |
//! | failure chain | unhandled raised error, fault or panic | fault chain |
//! | fault chain | raised error, fault or panic | fallback transform |
//! | ok or fail transform | any error | fault chain |
//! | fatal transform | any error | fallback transform |
//! | teardown | any hook failure | fault chain, re-run once |
//!
//! Invocations are independent: each has its own container, error state and
//! hook registry. Only the middleware instances are shared.

use crate::chain::{Branch, BranchResult, Chain, ChainEnd, Escape};
use crate::fallback;
use crate::lifecycle::{CreationLifecycle, HookRegistry, RequestLifecycle};
use crate::middleware::Middleware;
use crate::pipeline::Pipeline;
use crate::request::{FailedRequest, FaultedRequest, Request};
use crate::transform::Transforms;
use lamina_core::unwind::{self, Unwound};
use lamina_core::{Context, Event, Failure, Fault, Options, Response, TypedError};
use lamina_telemetry::metrics;
use serde_json::Value;
use std::fmt;
use std::sync::Arc;
use std::time::Instant;
use tracing::Instrument;

struct Stage {
    name: &'static str,
    middleware: Arc<dyn Middleware>,
}

struct Inner {
    stages: Vec<Stage>,
    options: Arc<Options>,
    ok: Chain<Request>,
    fail: Chain<FailedRequest>,
    fatal: Chain<FaultedRequest>,
    transforms: Transforms,
    creation_error: Option<Failure>,
}

/// Where the middleware chain left the request.
enum Outcome {
    Success(Request),
    Failure(FailedRequest),
    Fault(FaultedRequest),
}

impl Outcome {
    fn request(&self) -> &Request {
        match self {
            Self::Success(request) => request,
            Self::Failure(failed) => failed.request(),
            Self::Fault(faulted) => faulted.request(),
        }
    }
}

/// A resolved branch: which branch produced the response, and the response.
struct Resolution {
    branch: &'static str,
    response: Result<Response, Fault>,
}

impl Resolution {
    const FALLBACK: &'static str = "fallback";

    fn fallback(fault: Fault) -> Self {
        Self {
            branch: Self::FALLBACK,
            response: fallback::apply(fault),
        }
    }
}

/// The callable entry point of a materialized pipeline.
///
/// Cheap to clone; clones share the middleware instances.
#[derive(Clone)]
pub struct RequestHandler {
    inner: Arc<Inner>,
}

/// Marks a declared error with the stage it came from, unless already marked.
fn tag_origin(error: TypedError, stage: usize) -> TypedError {
    if error.origin().is_some() {
        error
    } else {
        error.with_origin(stage)
    }
}

impl RequestHandler {
    pub(crate) fn materialize(pipeline: &Pipeline) -> Self {
        let options = Arc::new(pipeline.options.clone());
        let mut stages = Vec::with_capacity(pipeline.creators.len());
        let mut creation_error = None;

        if let Err(e) = pipeline.check() {
            tracing::error!(error = %e, "Pipeline composition check failed");
            creation_error = Some(Failure::Fault(Fault::from_error(&e)));
        } else {
            for (index, creator) in pipeline.creators.iter().enumerate() {
                let name = creator.name();
                let lifecycle = CreationLifecycle::new(index, name);
                tracing::debug!(stage = name, index, "Creating middleware");

                let failure = match unwind::guard_sync(|| creator.create(&options, &lifecycle)) {
                    Ok(Ok(middleware)) => {
                        stages.push(Stage { name, middleware });
                        continue;
                    }
                    Ok(Err(Failure::Declared(error))) | Err(Unwound::Raised(error))
                        if error.is_skipped() =>
                    {
                        tracing::debug!(stage = name, index, "Creator skipped; stage left out");
                        continue;
                    }
                    Ok(Err(Failure::Declared(error))) | Err(Unwound::Raised(error)) => {
                        Failure::Declared(tag_origin(error, index))
                    }
                    Ok(Err(Failure::Fault(fault))) | Err(Unwound::Panicked(fault)) => {
                        Failure::Fault(fault)
                    }
                };
                tracing::error!(stage = name, index, error = %failure, "Middleware creation failed; handler disabled");
                creation_error = Some(failure);
                break;
            }
        }

        Self {
            inner: Arc::new(Inner {
                stages,
                options,
                ok: pipeline.ok.clone(),
                fail: pipeline.fail.clone(),
                fatal: pipeline.fatal.clone(),
                transforms: pipeline.transforms.clone(),
                creation_error,
            }),
        }
    }

    /// Returns `true` if creation failed and every invocation is routed to
    /// the failure or fault branch.
    #[must_use]
    pub fn is_disabled(&self) -> bool {
        self.inner.creation_error.is_some()
    }

    /// The failure captured while materializing, if any.
    #[must_use]
    pub fn creation_error(&self) -> Option<&Failure> {
        self.inner.creation_error.as_ref()
    }

    /// Runs one invocation.
    ///
    /// Always resolves to a response, unless the fallback transform rejects;
    /// see [`fallback::reject`].
    pub async fn invoke(&self, event: Event, context: Context) -> Result<Response, Fault> {
        let span = tracing::info_span!(
            "invocation",
            request_id = %context.request_id(),
            function = context.function_name().unwrap_or("-"),
        );
        let started = Instant::now();
        let resolution = self.execute(event, context).instrument(span.clone()).await;
        let elapsed = started.elapsed();
        span.in_scope(|| lamina_telemetry::log_invocation_complete!(resolution.branch, elapsed));
        metrics::record_invocation(resolution.branch, elapsed);
        resolution.response
    }

    async fn execute(&self, event: Event, context: Context) -> Resolution {
        let registry = HookRegistry::new();
        let request = Request::new(event, context, Arc::clone(&self.inner.options));

        let outcome = match &self.inner.creation_error {
            Some(Failure::Declared(error)) => Outcome::Failure(FailedRequest::new(request, error.clone())),
            Some(Failure::Fault(fault)) => Outcome::Fault(FaultedRequest::new(request, fault.clone())),
            None => self.run_middleware(request, &registry).await,
        };
        let base = outcome.request().clone();

        let resolution = match outcome {
            Outcome::Success(request) => self.resolve_ok(request, &registry).await,
            Outcome::Failure(failed) => self.resolve_fail(failed, &registry).await,
            Outcome::Fault(faulted) => self.resolve_fatal(faulted, &registry).await,
        };

        match registry.teardown().await {
            Ok(()) => resolution,
            Err(fault) => {
                tracing::error!(error = %fault, "Teardown failed; re-running the fault branch");
                metrics::record_teardown_fault();
                self.resolve_fatal(FaultedRequest::new(base, fault), &registry)
                    .await
            }
        }
    }

    async fn run_middleware(&self, mut request: Request, registry: &HookRegistry) -> Outcome {
        for (index, stage) in self.inner.stages.iter().enumerate() {
            tracing::debug!(stage = stage.name, index, "Running middleware");
            let lifecycle = RequestLifecycle::new(index, stage.name, registry.clone());

            match unwind::guard(stage.middleware.handle(request.clone(), lifecycle)).await {
                Ok(Ok(contribution)) => {
                    let conflicts = request.service_mut().absorb(contribution);
                    if !conflicts.is_empty() {
                        tracing::debug!(
                            stage = stage.name,
                            ?conflicts,
                            "Kept capabilities from earlier stages"
                        );
                    }
                }
                Ok(Err(Failure::Declared(error))) | Err(Unwound::Raised(error))
                    if error.is_skipped() =>
                {
                    tracing::debug!(stage = stage.name, index, "Middleware skipped");
                }
                Ok(Err(Failure::Declared(error))) | Err(Unwound::Raised(error)) => {
                    tracing::debug!(stage = stage.name, error_type = %error.kind(), "Middleware failed");
                    return Outcome::Failure(FailedRequest::new(request, tag_origin(error, index)));
                }
                Ok(Err(Failure::Fault(fault))) | Err(Unwound::Panicked(fault)) => {
                    tracing::warn!(stage = stage.name, error = %fault, "Middleware faulted");
                    return Outcome::Fault(FaultedRequest::new(request, fault));
                }
            }
        }
        Outcome::Success(request)
    }

    async fn resolve_ok(&self, request: Request, registry: &HookRegistry) -> Resolution {
        let result = match self.inner.ok.run(&request, None, registry).await {
            ChainEnd::Done(result) => result.unwrap_or(Ok(Value::Null)),
            ChainEnd::Escaped(Escape::Declared(error) | Escape::Raised(error)) => {
                tracing::debug!(error_type = %error.kind(), "Success chain failed");
                return self
                    .resolve_fail(FailedRequest::new(request, error), registry)
                    .await;
            }
            ChainEnd::Escaped(Escape::Fault(fault)) => {
                return self
                    .resolve_fatal(FaultedRequest::new(request, fault), registry)
                    .await;
            }
        };

        match (self.inner.transforms.ok)(result, request.clone()).await {
            Ok(response) => Resolution {
                branch: Branch::Ok.name(),
                response: Ok(response),
            },
            Err(failure) => {
                tracing::warn!(error = %failure, "Success transform failed");
                self.resolve_fatal(FaultedRequest::new(request, failure.into_fault()), registry)
                    .await
            }
        }
    }

    async fn resolve_fail(&self, failed: FailedRequest, registry: &HookRegistry) -> Resolution {
        let origin = failed.error().origin();
        let result = match self.inner.fail.run(&failed, origin, registry).await {
            ChainEnd::Done(result) => result.unwrap_or_else(|| Err(failed.error().clone())),
            ChainEnd::Escaped(escape) => {
                let fault = match escape {
                    Escape::Declared(error) | Escape::Raised(error) => Fault::from_typed(&error),
                    Escape::Fault(fault) => fault,
                };
                let (request, _) = failed.into_parts();
                return self
                    .resolve_fatal(FaultedRequest::new(request, fault), registry)
                    .await;
            }
        };

        let (request, _) = failed.into_parts();
        match (self.inner.transforms.fail)(result, request.clone()).await {
            Ok(response) => Resolution {
                branch: Branch::Fail.name(),
                response: Ok(response),
            },
            Err(failure) => {
                tracing::warn!(error = %failure, "Failure transform failed");
                self.resolve_fatal(FaultedRequest::new(request, failure.into_fault()), registry)
                    .await
            }
        }
    }

    async fn resolve_fatal(&self, faulted: FaultedRequest, registry: &HookRegistry) -> Resolution {
        tracing::debug!(error = %faulted.exception(), "Resolving fault branch");
        let result: BranchResult = match self.inner.fatal.run(&faulted, None, registry).await {
            ChainEnd::Done(result) => {
                result.unwrap_or_else(|| Err(faulted.exception().to_typed_error()))
            }
            ChainEnd::Escaped(escape) => {
                let fault = match escape {
                    Escape::Declared(error) | Escape::Raised(error) => Fault::from_typed(&error),
                    Escape::Fault(fault) => fault,
                };
                return Resolution::fallback(fault);
            }
        };

        let (request, _) = faulted.into_parts();
        match (self.inner.transforms.fatal)(result, request).await {
            Ok(response) => Resolution {
                branch: Branch::Fatal.name(),
                response: Ok(response),
            },
            Err(failure) => Resolution::fallback(failure.into_fault()),
        }
    }
}

impl fmt::Debug for RequestHandler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let stages: Vec<&str> = self.inner.stages.iter().map(|stage| stage.name).collect();
        f.debug_struct("RequestHandler")
            .field("stages", &stages)
            .field("disabled", &self.is_disabled())
            .finish_non_exhaustive()
    }
}
