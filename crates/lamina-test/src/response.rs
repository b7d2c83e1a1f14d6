//! Test response wrapper.

use crate::error::TestError;
use lamina_core::Response;
use serde::de::DeserializeOwned;
use serde_json::Value;

/// A response with helper methods for assertions.
#[derive(Debug, Clone)]
pub struct TestResponse {
    inner: Response,
}

impl TestResponse {
    /// Wraps a response.
    #[must_use]
    pub fn new(inner: Response) -> Self {
        Self { inner }
    }

    /// Returns the wrapped response.
    #[must_use]
    pub fn into_inner(self) -> Response {
        self.inner
    }

    /// Returns the status code.
    #[must_use]
    pub fn status_code(&self) -> u16 {
        self.inner.status_code
    }

    /// Returns true if the status is successful (2xx).
    #[must_use]
    pub fn is_success(&self) -> bool {
        self.inner.is_success()
    }

    /// Returns true if the status is a client error (4xx).
    #[must_use]
    pub fn is_client_error(&self) -> bool {
        (400..500).contains(&self.inner.status_code)
    }

    /// Returns true if the status is a server error (5xx).
    #[must_use]
    pub fn is_server_error(&self) -> bool {
        (500..600).contains(&self.inner.status_code)
    }

    /// Gets a header value.
    #[must_use]
    pub fn header(&self, name: &str) -> Option<&str> {
        self.inner.header(name)
    }

    /// Returns the Content-Type header value.
    #[must_use]
    pub fn content_type(&self) -> Option<&str> {
        self.header("content-type")
    }

    /// Returns the body.
    #[must_use]
    pub fn text(&self) -> &str {
        &self.inner.body
    }

    /// Deserializes the body as JSON.
    pub fn json<T: DeserializeOwned>(&self) -> Result<T, TestError> {
        Ok(self.inner.body_json()?)
    }

    /// Deserializes the body as a JSON Value.
    pub fn json_value(&self) -> Result<Value, TestError> {
        self.json()
    }

    // Assertion methods

    /// Asserts that the status code equals the expected value.
    ///
    /// # Panics
    ///
    /// Panics if the status code doesn't match.
    pub fn assert_status_code(&self, expected: u16) -> &Self {
        assert_eq!(
            self.inner.status_code, expected,
            "Expected status {expected}, got {} with body {}",
            self.inner.status_code, self.inner.body
        );
        self
    }

    /// Asserts that the response is successful (2xx).
    ///
    /// # Panics
    ///
    /// Panics if the status is not 2xx.
    pub fn assert_success(&self) -> &Self {
        assert!(
            self.is_success(),
            "Expected success status, got {}",
            self.inner.status_code
        );
        self
    }

    /// Asserts that a header exists with the expected value.
    ///
    /// # Panics
    ///
    /// Panics if the header doesn't exist or doesn't match.
    pub fn assert_header(&self, name: &str, expected: &str) -> &Self {
        let actual = self
            .header(name)
            .unwrap_or_else(|| panic!("Header '{name}' not found"));
        assert_eq!(
            actual, expected,
            "Header '{name}': expected '{expected}', got '{actual}'"
        );
        self
    }

    /// Asserts that the body contains the expected substring.
    ///
    /// # Panics
    ///
    /// Panics if the body doesn't contain the substring.
    pub fn assert_body_contains(&self, expected: &str) -> &Self {
        assert!(
            self.inner.body.contains(expected),
            "Body should contain '{expected}', got: {}",
            self.inner.body
        );
        self
    }

    /// Asserts that the body does not contain the substring.
    ///
    /// # Panics
    ///
    /// Panics if the body contains the substring.
    pub fn assert_body_excludes(&self, unexpected: &str) -> &Self {
        assert!(
            !self.inner.body.contains(unexpected),
            "Body should not contain '{unexpected}', got: {}",
            self.inner.body
        );
        self
    }

    /// Asserts that the body equals the expected string.
    ///
    /// # Panics
    ///
    /// Panics if the body doesn't match.
    pub fn assert_body_eq(&self, expected: &str) -> &Self {
        assert_eq!(self.inner.body, expected, "Body mismatch");
        self
    }

    /// Asserts that the JSON body matches the expected value.
    ///
    /// # Panics
    ///
    /// Panics if the body is not JSON or doesn't match.
    pub fn assert_json_eq(&self, expected: &Value) -> &Self {
        let actual = self.json_value().expect("Body should be valid JSON");
        assert_eq!(&actual, expected, "JSON body mismatch");
        self
    }

    /// Asserts that a JSON field exists and equals the expected value.
    ///
    /// Paths are dot-separated; numeric segments index arrays.
    ///
    /// # Panics
    ///
    /// Panics if the field doesn't exist or doesn't match.
    pub fn assert_json_field(&self, path: &str, expected: &Value) -> &Self {
        let json = self.json_value().expect("Body should be valid JSON");
        let actual = json_path(&json, path)
            .unwrap_or_else(|| panic!("JSON path '{path}' not found in: {json}"));
        assert_eq!(
            actual, expected,
            "JSON field '{path}': expected {expected}, got {actual}"
        );
        self
    }

    /// Asserts a success envelope carrying `data`.
    ///
    /// # Panics
    ///
    /// Panics if the envelope differs.
    pub fn assert_data(&self, data: &Value) -> &Self {
        self.assert_json_field("status", &Value::from("success"))
            .assert_json_field("data", data)
    }

    /// Asserts an error envelope whose error has the given type tag.
    ///
    /// # Panics
    ///
    /// Panics if the envelope differs.
    pub fn assert_error_type(&self, kind: &str) -> &Self {
        self.assert_json_field("status", &Value::from("error"))
            .assert_json_field("error.type", &Value::from(kind))
    }
}

/// Simple JSON path accessor.
fn json_path<'a>(value: &'a Value, path: &str) -> Option<&'a Value> {
    let mut current = value;
    for segment in path.split('.') {
        if segment.is_empty() {
            continue;
        }
        current = match segment.parse::<usize>() {
            Ok(index) => current.get(index)?,
            Err(_) => current.get(segment)?,
        };
    }
    Some(current)
}
