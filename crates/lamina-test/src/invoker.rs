//! Fluent invocation builder.

use crate::error::TestError;
use crate::response::TestResponse;
use lamina_core::{Context, Event, RequestId};
use lamina_pipeline::RequestHandler;
use serde::Serialize;
use serde_json::{Map, Value};

/// Builds one event and context, then invokes a [`RequestHandler`].
///
/// # Example
///
/// ```
/// # tokio_test::block_on(async {
/// use lamina_pipeline::{Flow, Pipeline};
/// use lamina_test::TestInvoker;
/// use serde_json::json;
///
/// let handler = Pipeline::new()
///     .ok(|request, _| async move { Ok(Flow::next(request.event()["name"].clone())) })
///     .req();
///
/// TestInvoker::new(&handler)
///     .field("name", "ada")
///     .send()
///     .await
///     .assert_status_code(200)
///     .assert_json_field("data", &json!("ada"));
/// # });
/// ```
#[must_use]
pub struct TestInvoker<'a> {
    handler: &'a RequestHandler,
    event: Event,
    context: Context,
}

impl<'a> TestInvoker<'a> {
    /// Starts an invocation with a null event and a fresh context.
    pub fn new(handler: &'a RequestHandler) -> Self {
        Self {
            handler,
            event: Value::Null,
            context: Context::new(),
        }
    }

    /// Replaces the event.
    pub fn event(mut self, event: Event) -> Self {
        self.event = event;
        self
    }

    /// Serializes `value` as the event.
    ///
    /// # Errors
    ///
    /// Returns `TestError::EventBuild` if serialization fails.
    pub fn json<T: Serialize>(mut self, value: &T) -> Result<Self, TestError> {
        self.event =
            serde_json::to_value(value).map_err(|e| TestError::EventBuild(e.to_string()))?;
        Ok(self)
    }

    /// Sets one top-level event field, turning a null event into an object.
    pub fn field(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        if !self.event.is_object() {
            self.event = Value::Object(Map::new());
        }
        if let Value::Object(map) = &mut self.event {
            map.insert(key.into(), value.into());
        }
        self
    }

    /// Replaces the context.
    pub fn context(mut self, context: Context) -> Self {
        self.context = context;
        self
    }

    /// Uses a fixed request ID.
    pub fn request_id(mut self, request_id: RequestId) -> Self {
        self.context = self.context.with_request_id(request_id);
        self
    }

    /// Sets the function name.
    pub fn function_name(mut self, name: impl Into<String>) -> Self {
        self.context = self.context.with_function_name(name);
        self
    }

    /// Sets the deadline (milliseconds since the Unix epoch).
    pub fn deadline_ms(mut self, deadline_ms: u64) -> Self {
        self.context = self.context.with_deadline_ms(deadline_ms);
        self
    }

    /// Attaches platform extras to the context.
    pub fn extras(mut self, extras: Value) -> Self {
        self.context = self.context.with_extras(extras);
        self
    }

    /// Invokes the handler.
    ///
    /// # Errors
    ///
    /// Returns `TestError::Rejected` if the fallback transform rejected.
    pub async fn try_send(self) -> Result<TestResponse, TestError> {
        self.handler
            .invoke(self.event, self.context)
            .await
            .map(TestResponse::new)
            .map_err(TestError::Rejected)
    }

    /// Invokes the handler.
    ///
    /// # Panics
    ///
    /// Panics if the fallback transform rejected the invocation.
    pub async fn send(self) -> TestResponse {
        match self.try_send().await {
            Ok(response) => response,
            Err(e) => panic!("{e}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use lamina_pipeline::{Flow, Pipeline};
    use serde_json::json;

    fn echo() -> RequestHandler {
        Pipeline::new()
            .ok(|request, _| async move {
                Ok(Flow::next(json!({
                    "event": request.event().clone(),
                    "function": request.context().function_name(),
                    "request_id": request.request_id().to_string(),
                })))
            })
            .req()
    }

    #[tokio::test]
    async fn test_field_builds_object_event() {
        let handler = echo();
        let response = TestInvoker::new(&handler)
            .field("a", 1)
            .field("b", "two")
            .send()
            .await;
        response.assert_json_field("data.event", &json!({"a": 1, "b": "two"}));
    }

    #[tokio::test]
    async fn test_json_event() {
        #[derive(Serialize)]
        struct Order {
            id: u32,
        }

        let handler = echo();
        let response = TestInvoker::new(&handler)
            .json(&Order { id: 7 })
            .unwrap()
            .send()
            .await;
        response.assert_json_field("data.event.id", &json!(7));
    }

    #[tokio::test]
    async fn test_context_settings() {
        let handler = echo();
        let id = RequestId::new();
        let response = TestInvoker::new(&handler)
            .function_name("thumbnailer")
            .request_id(id)
            .send()
            .await;
        response
            .assert_json_field("data.function", &json!("thumbnailer"))
            .assert_json_field("data.request_id", &json!(id.to_string()));
    }
}
