//! Pipeline-scoped options.
//!
//! [`Options`] is a partial configuration record: every key is optional and
//! the record for a pipeline is the shallow merge of every `opt()` call made
//! while composing it. Later calls win on key conflicts.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;

/// Errors converting a value into [`Options`].
#[derive(Debug, Error)]
pub enum OptionsError {
    /// Options must be a JSON object.
    #[error("options must be a JSON object, got {0}")]
    NotAnObject(&'static str),

    /// A value could not be serialized.
    #[error("failed to serialize option value: {0}")]
    Serialize(#[from] serde_json::Error),
}

/// A shallow-mergeable configuration record.
///
/// # Example
///
/// ```
/// use lamina_core::Options;
///
/// let mut options = Options::new().with("region", "eu-west-1").with("retries", 2);
/// options.merge(&Options::new().with("retries", 5));
///
/// assert_eq!(options.get::<String>("region").as_deref(), Some("eu-west-1"));
/// assert_eq!(options.get::<u32>("retries"), Some(5));
/// ```
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Options(Map<String, Value>);

impl Options {
    /// Creates an empty record.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets a key, builder style.
    #[must_use]
    pub fn with(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.0.insert(key.into(), value.into());
        self
    }

    /// Sets a key.
    pub fn set(&mut self, key: impl Into<String>, value: impl Into<Value>) {
        self.0.insert(key.into(), value.into());
    }

    /// Builds options from any serializable value that encodes as an object.
    pub fn from_serialize<T: Serialize>(value: &T) -> Result<Self, OptionsError> {
        Self::try_from(serde_json::to_value(value)?)
    }

    /// Shallow-merges `partial` into this record; `partial` wins on conflicts.
    pub fn merge(&mut self, partial: &Options) {
        for (key, value) in &partial.0 {
            self.0.insert(key.clone(), value.clone());
        }
    }

    /// Returns a new record with `partial` merged on top.
    #[must_use]
    pub fn merged(&self, partial: &Options) -> Self {
        let mut merged = self.clone();
        merged.merge(partial);
        merged
    }

    /// Returns the raw value for a key.
    #[must_use]
    pub fn value(&self, key: &str) -> Option<&Value> {
        self.0.get(key)
    }

    /// Deserializes a key.
    ///
    /// Returns `None` when the key is absent or holds a value of another
    /// shape.
    #[must_use]
    pub fn get<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        let value = self.0.get(key)?;
        match serde_json::from_value(value.clone()) {
            Ok(v) => Some(v),
            Err(e) => {
                tracing::debug!(key, error = %e, "option has unexpected shape");
                None
            }
        }
    }

    /// Reads a boolean flag, defaulting to `false`.
    #[must_use]
    pub fn flag(&self, key: &str) -> bool {
        self.get::<bool>(key).unwrap_or(false)
    }

    /// Returns `true` if the key is set.
    #[must_use]
    pub fn contains(&self, key: &str) -> bool {
        self.0.contains_key(key)
    }

    /// Returns the keys.
    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.0.keys().map(String::as_str)
    }

    /// Returns the number of keys.
    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Returns `true` if no key is set.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Returns the record as a JSON object.
    #[must_use]
    pub fn as_map(&self) -> &Map<String, Value> {
        &self.0
    }
}

impl From<Map<String, Value>> for Options {
    fn from(map: Map<String, Value>) -> Self {
        Self(map)
    }
}

impl TryFrom<Value> for Options {
    type Error = OptionsError;

    fn try_from(value: Value) -> Result<Self, Self::Error> {
        match value {
            Value::Object(map) => Ok(Self(map)),
            Value::Null => Err(OptionsError::NotAnObject("null")),
            Value::Bool(_) => Err(OptionsError::NotAnObject("boolean")),
            Value::Number(_) => Err(OptionsError::NotAnObject("number")),
            Value::String(_) => Err(OptionsError::NotAnObject("string")),
            Value::Array(_) => Err(OptionsError::NotAnObject("array")),
        }
    }
}
