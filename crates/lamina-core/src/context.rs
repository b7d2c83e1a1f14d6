//! Invocation context types.
//!
//! The [`Context`] is the platform-supplied companion of the event: it
//! identifies the invocation and carries whatever metadata the platform
//! attaches. The engine passes it through untouched.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};
use uuid::Uuid;

/// A unique identifier for each invocation, using UUID v7.
///
/// UUID v7 is time-ordered, which makes it suitable for log correlation.
///
/// # Example
///
/// ```
/// use lamina_core::RequestId;
///
/// let id = RequestId::new();
/// println!("Request ID: {}", id);
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RequestId(Uuid);

impl RequestId {
    /// Creates a new unique request ID using UUID v7.
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::now_v7())
    }

    /// Creates a `RequestId` from an existing UUID.
    ///
    /// Useful when the platform supplies its own invocation id.
    #[must_use]
    pub const fn from_uuid(uuid: Uuid) -> Self {
        Self(uuid)
    }

    /// Returns the underlying UUID.
    #[must_use]
    pub const fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl Default for RequestId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for RequestId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<Uuid> for RequestId {
    fn from(uuid: Uuid) -> Self {
        Self(uuid)
    }
}

/// Platform context for one invocation.
///
/// # Example
///
/// ```
/// use lamina_core::Context;
///
/// let ctx = Context::new().with_function_name("thumbnailer");
/// assert_eq!(ctx.function_name(), Some("thumbnailer"));
/// ```
#[derive(Debug, Clone)]
pub struct Context {
    request_id: RequestId,
    function_name: Option<String>,
    /// Invocation deadline as milliseconds since the Unix epoch.
    deadline_ms: Option<u64>,
    extras: Value,
    started_at: Instant,
}

impl Context {
    /// Creates a context with a fresh request ID.
    #[must_use]
    pub fn new() -> Self {
        Self {
            request_id: RequestId::new(),
            function_name: None,
            deadline_ms: None,
            extras: Value::Null,
            started_at: Instant::now(),
        }
    }

    /// Uses a platform-supplied request ID.
    #[must_use]
    pub fn with_request_id(mut self, request_id: RequestId) -> Self {
        self.request_id = request_id;
        self
    }

    /// Sets the function name.
    #[must_use]
    pub fn with_function_name(mut self, name: impl Into<String>) -> Self {
        self.function_name = Some(name.into());
        self
    }

    /// Sets the invocation deadline (milliseconds since the Unix epoch).
    #[must_use]
    pub fn with_deadline_ms(mut self, deadline_ms: u64) -> Self {
        self.deadline_ms = Some(deadline_ms);
        self
    }

    /// Attaches opaque platform metadata.
    #[must_use]
    pub fn with_extras(mut self, extras: Value) -> Self {
        self.extras = extras;
        self
    }

    /// Returns the request ID.
    #[must_use]
    pub fn request_id(&self) -> RequestId {
        self.request_id
    }

    /// Returns the function name, if known.
    #[must_use]
    pub fn function_name(&self) -> Option<&str> {
        self.function_name.as_deref()
    }

    /// Returns the deadline, if known.
    #[must_use]
    pub fn deadline_ms(&self) -> Option<u64> {
        self.deadline_ms
    }

    /// Returns the opaque platform metadata.
    #[must_use]
    pub fn extras(&self) -> &Value {
        &self.extras
    }

    /// Time left until the deadline, saturating at zero.
    #[must_use]
    pub fn remaining(&self) -> Option<Duration> {
        let deadline = Duration::from_millis(self.deadline_ms?);
        let now = SystemTime::now().duration_since(UNIX_EPOCH).ok()?;
        Some(deadline.saturating_sub(now))
    }

    /// Time elapsed since the context was created.
    #[must_use]
    pub fn elapsed(&self) -> Duration {
        self.started_at.elapsed()
    }
}

impl Default for Context {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_request_id_unique() {
        assert_ne!(RequestId::new(), RequestId::new());
    }

    #[test]
    fn test_request_id_display_round_trip() {
        let id = RequestId::new();
        let parsed: Uuid = id.to_string().parse().unwrap();
        assert_eq!(RequestId::from_uuid(parsed), id);
    }

    #[test]
    fn test_context_builder() {
        let id = RequestId::new();
        let ctx = Context::new()
            .with_request_id(id)
            .with_function_name("resize")
            .with_extras(json!({"region": "eu"}));

        assert_eq!(ctx.request_id(), id);
        assert_eq!(ctx.function_name(), Some("resize"));
        assert_eq!(ctx.extras()["region"], "eu");
        assert_eq!(ctx.remaining(), None);
    }

    #[test]
    fn test_remaining_saturates() {
        let ctx = Context::new().with_deadline_ms(1);
        assert_eq!(ctx.remaining(), Some(Duration::ZERO));
    }
}
