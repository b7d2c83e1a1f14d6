//! The platform response shape.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// The value returned to the FaaS platform.
///
/// Serializes in the platform's camelCase form:
///
/// ```
/// use lamina_core::Response;
///
/// let response = Response::new(201).with_header("x-trace", "abc");
/// let json = serde_json::to_value(&response).unwrap();
/// assert_eq!(json["statusCode"], 201);
/// assert_eq!(json["headers"]["x-trace"], "abc");
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Response {
    /// HTTP status code.
    pub status_code: u16,
    /// Response headers.
    #[serde(default)]
    pub headers: BTreeMap<String, String>,
    /// Serialized body.
    #[serde(default)]
    pub body: String,
}

impl Response {
    /// Creates an empty response with the given status.
    #[must_use]
    pub fn new(status_code: u16) -> Self {
        Self {
            status_code,
            headers: BTreeMap::new(),
            body: String::new(),
        }
    }

    /// Creates a JSON response.
    ///
    /// Sets `content-type: application/json` and serializes `body`.
    pub fn json<T: Serialize>(status_code: u16, body: &T) -> Result<Self, serde_json::Error> {
        Ok(Self::new(status_code)
            .with_header("content-type", "application/json")
            .with_body(serde_json::to_string(body)?))
    }

    /// Adds a header.
    #[must_use]
    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(name.into(), value.into());
        self
    }

    /// Replaces the body.
    #[must_use]
    pub fn with_body(mut self, body: impl Into<String>) -> Self {
        self.body = body.into();
        self
    }

    /// Returns a header value.
    #[must_use]
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).map(String::as_str)
    }

    /// Parses the body as JSON.
    pub fn body_json<T: serde::de::DeserializeOwned>(&self) -> Result<T, serde_json::Error> {
        serde_json::from_str(&self.body)
    }

    /// Returns `true` for 2xx statuses.
    #[must_use]
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status_code)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::{json, Value};

    #[test]
    fn test_json_response() {
        let response = Response::json(200, &json!({"ok": true})).unwrap();
        assert_eq!(response.status_code, 200);
        assert_eq!(response.header("content-type"), Some("application/json"));
        assert_eq!(response.body_json::<Value>().unwrap(), json!({"ok": true}));
        assert!(response.is_success());
    }

    #[test]
    fn test_deserialize_defaults() {
        let response: Response = serde_json::from_str(r#"{"statusCode":204}"#).unwrap();
        assert_eq!(response, Response::new(204));
        assert!(response.is_success());
        assert!(!Response::new(500).is_success());
    }
}
