//! Typed unwinding.
//!
//! Capability code that runs far from the pipeline (a getter deep inside a
//! service, a closure captured at creation time) cannot always return a
//! `Result`. [`raise`] lets such code abort with a [`TypedError`] anyway; the
//! engine catches the unwind at the nearest chain boundary with [`guard`]
//! and turns it back into a value.
//!
//! Any other panic is caught at the same boundary and becomes a [`Fault`].

use crate::error::{Fault, TypedError};
use futures_util::FutureExt;
use std::any::Any;
use std::future::Future;
use std::panic::AssertUnwindSafe;

/// Payload carried by a typed unwind.
struct Raised(TypedError);

/// Aborts the current middleware, handler or hook with a declared error.
///
/// Uses [`std::panic::resume_unwind`], so the process panic hook is not
/// invoked and nothing is printed.
pub fn raise(error: TypedError) -> ! {
    std::panic::resume_unwind(Box::new(Raised(error)))
}

/// What a caught unwind turned out to be.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Unwound {
    /// A typed error thrown with [`raise`].
    Raised(TypedError),
    /// Any other panic.
    Panicked(Fault),
}

impl Unwound {
    /// Classifies a panic payload.
    #[must_use]
    pub fn from_payload(payload: Box<dyn Any + Send>) -> Self {
        let payload = match payload.downcast::<Raised>() {
            Ok(raised) => return Self::Raised(raised.0),
            Err(payload) => payload,
        };
        if let Some(message) = payload.downcast_ref::<&'static str>() {
            return Self::Panicked(Fault::new(Fault::PANIC, *message));
        }
        if let Some(message) = payload.downcast_ref::<String>() {
            return Self::Panicked(Fault::new(Fault::PANIC, message.clone()));
        }
        Self::Panicked(Fault::unknown("panic with a non-string payload"))
    }

    /// Collapses the unwind into a fault.
    #[must_use]
    pub fn into_fault(self) -> Fault {
        match self {
            Self::Raised(error) => Fault::from_typed(&error),
            Self::Panicked(fault) => fault,
        }
    }
}

/// Polls `future` to completion, catching any unwind it produces.
pub async fn guard<F>(future: F) -> Result<F::Output, Unwound>
where
    F: Future,
{
    AssertUnwindSafe(future)
        .catch_unwind()
        .await
        .map_err(Unwound::from_payload)
}

/// Runs `f`, catching any unwind it produces.
pub fn guard_sync<T>(f: impl FnOnce() -> T) -> Result<T, Unwound> {
    std::panic::catch_unwind(AssertUnwindSafe(f)).map_err(Unwound::from_payload)
}
