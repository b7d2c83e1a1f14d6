//! Error taxonomy for Lamina.
//!
//! Every failure that crosses a pipeline boundary is one of two things:
//!
//! | Kind | Type | Routed to |
//! |------|------|-----------|
//! | Declared error | [`TypedError`] | failure chain |
//! | Fault | [`Fault`] | fault chain |
//!
//! [`Failure`] is the union of both and is the error type of every
//! middleware, handler, lifecycle hook and transform. The `?` operator
//! converts a [`TypedError`] into [`Failure::Declared`] and any
//! `std::error::Error` into [`Failure::Fault`], so a handler can mix
//! declared errors with plain library errors:
//!
//! ```
//! use lamina_core::{Failure, TypedError};
//!
//! fn parse(input: &str) -> Result<u32, Failure> {
//!     if input.is_empty() {
//!         return Err(TypedError::new("EmptyInput").into());
//!     }
//!     // `ParseIntError` becomes a fault.
//!     Ok(input.parse::<u32>()?)
//! }
//!
//! assert!(parse("").unwrap_err().is_declared());
//! assert!(parse("x").unwrap_err().is_fault());
//! ```
//!
//! The reserved [`TypedError::SKIPPED`] kind marks "this step did not apply";
//! chains absorb it instead of treating it as a failure.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Result type used by middleware, handlers, hooks and transforms.
pub type LaminaResult<T> = Result<T, Failure>;

/// A declared, typed failure.
///
/// The `kind` string is the tag every branch decision is made on. The
/// remaining fields are optional metadata that the default JSON transforms
/// include in the response envelope when present.
///
/// `origin` records the index of the middleware stage that produced the
/// error. It is set by the execution engine, never serialized, and used to
/// scope package failure handlers to their own middleware.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TypedError {
    /// The error type tag.
    #[serde(rename = "type")]
    pub kind: String,

    /// Human-readable message.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,

    /// Name of the underlying cause, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cause: Option<String>,

    /// Explicit status code used by transforms instead of the branch default.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub code: Option<u16>,

    #[serde(skip)]
    origin: Option<usize>,
}

impl TypedError {
    /// Reserved kind for "did not apply" results.
    pub const SKIPPED: &'static str = "Skipped";

    /// Kind used when a fault is rendered as a typed error.
    pub const FAULT: &'static str = "Fault";

    /// Creates a new typed error with the given kind.
    #[must_use]
    pub fn new(kind: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            message: None,
            cause: None,
            code: None,
            origin: None,
        }
    }

    /// Creates the reserved `Skipped` sentinel.
    #[must_use]
    pub fn skipped() -> Self {
        Self::new(Self::SKIPPED)
    }

    /// Sets the message.
    #[must_use]
    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }

    /// Sets the cause name.
    #[must_use]
    pub fn with_cause(mut self, cause: impl Into<String>) -> Self {
        self.cause = Some(cause.into());
        self
    }

    /// Sets an explicit status code.
    #[must_use]
    pub fn with_code(mut self, code: u16) -> Self {
        self.code = Some(code);
        self
    }

    /// Tags the error with the middleware stage that produced it.
    #[must_use]
    pub fn with_origin(mut self, stage: usize) -> Self {
        self.origin = Some(stage);
        self
    }

    /// Returns the error type tag.
    #[must_use]
    pub fn kind(&self) -> &str {
        &self.kind
    }

    /// Returns the message, if any.
    #[must_use]
    pub fn message(&self) -> Option<&str> {
        self.message.as_deref()
    }

    /// Returns the middleware stage index that produced this error.
    ///
    /// `None` means the error came from a handler rather than a middleware.
    #[must_use]
    pub fn origin(&self) -> Option<usize> {
        self.origin
    }

    /// Returns `true` if the error has the given kind.
    #[must_use]
    pub fn is(&self, kind: &str) -> bool {
        self.kind == kind
    }

    /// Returns `true` if the kind is one of `kinds`.
    #[must_use]
    pub fn is_any(&self, kinds: &[&str]) -> bool {
        kinds.iter().any(|kind| self.is(kind))
    }

    /// Returns `true` for the reserved `Skipped` sentinel.
    #[must_use]
    pub fn is_skipped(&self) -> bool {
        self.is(Self::SKIPPED)
    }
}

impl fmt::Display for TypedError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.message {
            Some(message) => write!(f, "{}: {message}", self.kind),
            None => f.write_str(&self.kind),
        }
    }
}

/// An unanticipated failure, normalized to `{cause, message}`.
///
/// `cause` is the short type name of the value that was thrown (for
/// example `ParseIntError` or `Panic`), or `Unknown` when it cannot be
/// determined.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Fault {
    /// Type name of the thrown value.
    pub cause: String,
    /// The thrown value's message, verbatim.
    pub message: String,
}

impl Fault {
    /// Cause used when the thrown value has no recognizable type.
    pub const UNKNOWN: &'static str = "Unknown";

    /// Cause used for panics with a string payload.
    pub const PANIC: &'static str = "Panic";

    /// Creates a fault from explicit parts.
    #[must_use]
    pub fn new(cause: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            cause: cause.into(),
            message: message.into(),
        }
    }

    /// Creates a fault with an unknown cause.
    #[must_use]
    pub fn unknown(message: impl Into<String>) -> Self {
        Self::new(Self::UNKNOWN, message)
    }

    /// Creates a fault from any error, using its type name as the cause.
    #[must_use]
    pub fn from_error<E>(error: &E) -> Self
    where
        E: std::error::Error + ?Sized,
    {
        Self::new(short_type_name::<E>(), error.to_string())
    }

    /// Creates a fault from an `anyhow::Error`.
    ///
    /// A wrapped [`TypedError`] keeps its kind as the cause; anything else
    /// is reported with an unknown cause and the full context chain.
    #[must_use]
    pub fn from_anyhow(error: &anyhow::Error) -> Self {
        match error.downcast_ref::<TypedErrorSource>() {
            Some(TypedErrorSource(typed)) => Self::from_typed(typed),
            None => Self::unknown(format!("{error:#}")),
        }
    }

    /// Converts a declared error that escaped its chain into a fault.
    #[must_use]
    pub fn from_typed(error: &TypedError) -> Self {
        Self::new(
            error.kind.clone(),
            error.message.clone().unwrap_or_else(|| error.kind.clone()),
        )
    }

    /// Renders the fault as a typed error of kind [`TypedError::FAULT`].
    #[must_use]
    pub fn to_typed_error(&self) -> TypedError {
        TypedError::new(TypedError::FAULT)
            .with_cause(self.cause.clone())
            .with_message(self.message.clone())
    }
}

impl fmt::Display for Fault {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.cause, self.message)
    }
}

/// `std::error::Error` adapter for carrying a [`TypedError`] through
/// `anyhow` without losing its declared status.
#[derive(Debug, Clone)]
pub struct TypedErrorSource(pub TypedError);

impl fmt::Display for TypedErrorSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl std::error::Error for TypedErrorSource {}

/// Any failure produced inside a pipeline.
///
/// `Failure` deliberately does not implement `std::error::Error`, which
/// lets it offer a blanket `From` for every error type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Failure {
    /// A declared error, routed to the failure chain.
    Declared(TypedError),
    /// A fault, routed to the fault chain.
    Fault(Fault),
}

impl Failure {
    /// Shortcut for a declared error of the given kind.
    #[must_use]
    pub fn declared(kind: impl Into<String>) -> Self {
        Self::Declared(TypedError::new(kind))
    }

    /// Returns `true` for declared errors.
    #[must_use]
    pub const fn is_declared(&self) -> bool {
        matches!(self, Self::Declared(_))
    }

    /// Returns `true` for faults.
    #[must_use]
    pub const fn is_fault(&self) -> bool {
        matches!(self, Self::Fault(_))
    }

    /// Returns `true` for the reserved `Skipped` sentinel.
    #[must_use]
    pub fn is_skipped(&self) -> bool {
        matches!(self, Self::Declared(error) if error.is_skipped())
    }

    /// Collapses the failure into a fault.
    ///
    /// Declared errors are converted with [`Fault::from_typed`].
    #[must_use]
    pub fn into_fault(self) -> Fault {
        match self {
            Self::Declared(error) => Fault::from_typed(&error),
            Self::Fault(fault) => fault,
        }
    }
}

impl fmt::Display for Failure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Declared(error) => write!(f, "declared error {error}"),
            Self::Fault(fault) => write!(f, "fault {fault}"),
        }
    }
}

impl From<TypedError> for Failure {
    fn from(error: TypedError) -> Self {
        Self::Declared(error)
    }
}

impl From<Fault> for Failure {
    fn from(fault: Fault) -> Self {
        Self::Fault(fault)
    }
}

impl<E> From<E> for Failure
where
    E: std::error::Error + Send + Sync + 'static,
{
    fn from(error: E) -> Self {
        let any: &dyn std::any::Any = &error;
        if let Some(TypedErrorSource(typed)) = any.downcast_ref::<TypedErrorSource>() {
            return Self::Declared(typed.clone());
        }
        Self::Fault(Fault::from_error(&error))
    }
}

/// Returns the last path segment of a type name, without generics.
pub(crate) fn short_type_name<T: ?Sized>() -> &'static str {
    let full = std::any::type_name::<T>();
    let base = full.split('<').next().unwrap_or(full);
    base.rsplit("::").next().unwrap_or(base)
}
