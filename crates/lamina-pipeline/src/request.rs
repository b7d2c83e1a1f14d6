//! The request views handed to middleware, handlers and transforms.

use lamina_core::{Context, Event, Fault, InjectionError, Options, RequestId, Service, TypedError};
use serde::de::DeserializeOwned;
use std::ops::Deref;
use std::sync::Arc;

/// One invocation's inputs plus the capabilities built so far.
///
/// Cloning is cheap. The event, context and options are shared; the
/// service container is cloned by handle.
#[derive(Debug, Clone)]
pub struct Request {
    event: Arc<Event>,
    context: Arc<Context>,
    options: Arc<Options>,
    service: Service,
}

impl Request {
    pub(crate) fn new(event: Event, context: Context, options: Arc<Options>) -> Self {
        Self {
            event: Arc::new(event),
            context: Arc::new(context),
            options,
            service: Service::new(),
        }
    }

    /// The platform event.
    #[must_use]
    pub fn event(&self) -> &Event {
        &self.event
    }

    /// Deserializes the event.
    ///
    /// The error converts into a fault with `?`.
    pub fn event_as<T: DeserializeOwned>(&self) -> Result<T, serde_json::Error> {
        T::deserialize(&*self.event)
    }

    /// The platform context.
    #[must_use]
    pub fn context(&self) -> &Context {
        &self.context
    }

    /// Shortcut for `context().request_id()`.
    #[must_use]
    pub fn request_id(&self) -> RequestId {
        self.context.request_id()
    }

    /// The pipeline's merged options.
    #[must_use]
    pub fn options(&self) -> &Options {
        &self.options
    }

    /// The capability container accumulated so far.
    #[must_use]
    pub fn service(&self) -> &Service {
        &self.service
    }

    /// Resolves a capability.
    #[must_use]
    pub fn get<T: Send + Sync + 'static>(&self) -> Option<Arc<T>> {
        self.service.get()
    }

    /// Resolves a capability or returns an error.
    pub fn require<T: Send + Sync + 'static>(&self) -> Result<Arc<T>, InjectionError> {
        self.service.require()
    }

    pub(crate) fn service_mut(&mut self) -> &mut Service {
        &mut self.service
    }
}

/// A request whose middleware chain ended in a declared error.
///
/// The container holds only what the middleware before the failing one
/// produced.
#[derive(Debug, Clone)]
pub struct FailedRequest {
    request: Request,
    error: TypedError,
}

impl FailedRequest {
    pub(crate) fn new(request: Request, error: TypedError) -> Self {
        Self { request, error }
    }

    /// The current declared error.
    ///
    /// Starts as the error that entered the failure branch; a failure
    /// handler that returns or raises a declared error replaces it for the
    /// handlers after it.
    #[must_use]
    pub fn error(&self) -> &TypedError {
        &self.error
    }

    /// The underlying request.
    #[must_use]
    pub fn request(&self) -> &Request {
        &self.request
    }

    pub(crate) fn set_error(&mut self, error: TypedError) {
        self.error = error;
    }

    pub(crate) fn into_parts(self) -> (Request, TypedError) {
        (self.request, self.error)
    }
}

impl Deref for FailedRequest {
    type Target = Request;

    fn deref(&self) -> &Request {
        &self.request
    }
}

/// A request that faulted.
#[derive(Debug, Clone)]
pub struct FaultedRequest {
    request: Request,
    exception: Fault,
}

impl FaultedRequest {
    pub(crate) fn new(request: Request, exception: Fault) -> Self {
        Self { request, exception }
    }

    /// The caught fault.
    #[must_use]
    pub fn exception(&self) -> &Fault {
        &self.exception
    }

    /// The underlying request.
    #[must_use]
    pub fn request(&self) -> &Request {
        &self.request
    }

    pub(crate) fn into_parts(self) -> (Request, Fault) {
        (self.request, self.exception)
    }
}

impl Deref for FaultedRequest {
    type Target = Request;

    fn deref(&self) -> &Request {
        &self.request
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;
    use serde_json::json;

    #[derive(Debug, Deserialize, PartialEq)]
    struct Upload {
        bucket: String,
    }

    fn request() -> Request {
        Request::new(
            json!({"bucket": "photos"}),
            Context::new(),
            Arc::new(Options::new().with("table", "users")),
        )
    }

    #[test]
    fn test_event_as() {
        let req = request();
        assert_eq!(
            req.event_as::<Upload>().unwrap(),
            Upload {
                bucket: "photos".to_string()
            }
        );
        assert!(req.event_as::<Vec<u8>>().is_err());
    }

    #[test]
    fn test_failed_request_derefs() {
        let failed = FailedRequest::new(request(), TypedError::new("Invalid"));
        assert_eq!(failed.error().kind(), "Invalid");
        assert_eq!(failed.options().get::<String>("table").as_deref(), Some("users"));
        assert!(failed.service().is_empty());
    }

    #[test]
    fn test_faulted_request_derefs() {
        let faulted = FaultedRequest::new(request(), Fault::unknown("boom"));
        assert_eq!(faulted.exception().message, "boom");
        assert_eq!(faulted.event()["bucket"], "photos");
    }
}
