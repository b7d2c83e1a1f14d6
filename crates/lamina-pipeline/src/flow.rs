//! Chain control.
//!
//! Every handler returns a [`Flow`] that tells the chain what to do next:
//!
//! | Flow | Result | Rest of chain |
//! |------|--------|---------------|
//! | `Continue(v)` | `v` becomes the current result | runs |
//! | `Stop(v)` | `v` is final | skipped |
//! | `Skip` | unchanged | runs |
//!
//! The combinators in this module build the common shapes: gate a body on
//! a condition ([`works`]), gate on the current error's type
//! ([`works_for_err`]) and stop when a condition holds ([`returns_when`]).
//! Conditions are either plain `bool`s or closures returning a future.
//! [`routed`] adapts router helpers that answer "not mine" with `None`.

use crate::middleware::BoxFuture;
use crate::request::FailedRequest;
use lamina_core::{LaminaResult, TypedError};
use serde_json::Value;
use std::future::Future;

/// What a handler wants the chain to do next.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Flow {
    /// Use the value as the current result and keep going.
    Continue(Value),
    /// Use the value as the final result.
    Stop(Value),
    /// Contribute nothing.
    Skip,
}

impl Flow {
    /// `Continue` with any JSON-convertible value.
    pub fn next(value: impl Into<Value>) -> Self {
        Self::Continue(value.into())
    }

    /// `Stop` with any JSON-convertible value.
    pub fn stop(value: impl Into<Value>) -> Self {
        Self::Stop(value.into())
    }

    /// `Stop` when `stop` is true, otherwise `Continue`.
    pub fn returns(stop: bool, value: impl Into<Value>) -> Self {
        if stop {
            Self::stop(value)
        } else {
            Self::next(value)
        }
    }

    /// Returns `true` for `Stop`.
    #[must_use]
    pub const fn is_stop(&self) -> bool {
        matches!(self, Self::Stop(_))
    }

    /// Returns `true` for `Skip`.
    #[must_use]
    pub const fn is_skip(&self) -> bool {
        matches!(self, Self::Skip)
    }

    /// Returns the carried value, if any.
    #[must_use]
    pub fn value(&self) -> Option<&Value> {
        match self {
            Self::Continue(value) | Self::Stop(value) => Some(value),
            Self::Skip => None,
        }
    }
}

/// What every handler returns.
pub type HandlerResult = LaminaResult<Flow>;

/// A check that gates a handler body.
///
/// Implemented for `bool` and for closures returning a `bool` future, so
/// checks can be immediate or resolved asynchronously. A plain `|| true`
/// closure cannot implement it as well (the impls would overlap); wrap it
/// with [`immediate`] or write `|| async { .. }`:
///
/// ```
/// # tokio_test::block_on(async {
/// use lamina_pipeline::flow::{works, Flow};
///
/// let skipped = works(false, || async { Ok(Flow::next("ran")) }).await.unwrap();
/// assert_eq!(skipped, Flow::Skip);
///
/// let ran = works(|| async { true }, || async { Ok(Flow::next("ran")) }).await.unwrap();
/// assert_eq!(ran, Flow::next("ran"));
/// # });
/// ```
pub trait Condition: Send {
    /// Resolves the check.
    fn check(self) -> BoxFuture<'static, bool>;
}

impl Condition for bool {
    fn check(self) -> BoxFuture<'static, bool> {
        Box::pin(std::future::ready(self))
    }
}

impl<F, Fut> Condition for F
where
    F: FnOnce() -> Fut + Send,
    Fut: Future<Output = bool> + Send + 'static,
{
    fn check(self) -> BoxFuture<'static, bool> {
        Box::pin(self())
    }
}

/// A [`Condition`] from a synchronous callable.
///
/// ```
/// # tokio_test::block_on(async {
/// use lamina_pipeline::flow::{immediate, works, Flow};
///
/// let cached = true;
/// let flow = works(immediate(move || cached), || async { Ok(Flow::next("hit")) })
///     .await
///     .unwrap();
/// assert_eq!(flow, Flow::next("hit"));
/// # });
/// ```
pub fn immediate<F>(check: F) -> Immediate<F>
where
    F: FnOnce() -> bool + Send,
{
    Immediate(check)
}

/// A synchronous check; see [`immediate`].
#[derive(Debug, Clone, Copy)]
pub struct Immediate<F>(F);

impl<F> Condition for Immediate<F>
where
    F: FnOnce() -> bool + Send,
{
    fn check(self) -> BoxFuture<'static, bool> {
        Box::pin(std::future::ready((self.0)()))
    }
}

/// Runs `body` only if `condition` holds.
///
/// A failed check contributes nothing and does not stop the chain.
pub async fn works<C, F, Fut>(condition: C, body: F) -> HandlerResult
where
    C: Condition,
    F: FnOnce() -> Fut,
    Fut: Future<Output = HandlerResult>,
{
    if condition.check().await {
        body().await
    } else {
        Ok(Flow::Skip)
    }
}

/// Runs `body` only if the request's error has one of the given types.
///
/// The body receives the narrowed error.
pub async fn works_for_err<F, Fut>(request: &FailedRequest, kinds: &[&str], body: F) -> HandlerResult
where
    F: FnOnce(TypedError) -> Fut,
    Fut: Future<Output = HandlerResult>,
{
    let error = request.error();
    if error.is_any(kinds) {
        body(error.clone()).await
    } else {
        tracing::debug!(error_type = %error.kind(), "Handler does not apply to this error");
        Ok(Flow::Skip)
    }
}

/// Stops the chain with `value` if `condition` holds, otherwise continues.
pub async fn returns_when<C>(condition: C, value: impl Into<Value>) -> HandlerResult
where
    C: Condition,
{
    Ok(Flow::returns(condition.check().await, value))
}

/// Unwraps a router helper's answer, or bails out with the reserved
/// `Skipped` error.
///
/// Chains absorb `Skipped`, so a handler whose router did not match simply
/// contributes nothing:
///
/// ```
/// use lamina_pipeline::{routed, Flow, HandlerResult};
/// use serde_json::{json, Value};
///
/// fn by_path(event: &Value) -> Option<&str> {
///     event["path"].as_str().filter(|path| path.starts_with("/users"))
/// }
///
/// fn handle(event: &Value) -> HandlerResult {
///     let path = routed(by_path(event))?;
///     Ok(Flow::next(path))
/// }
///
/// assert!(handle(&json!({"path": "/users/7"})).is_ok());
/// assert!(handle(&json!({"path": "/orders"})).unwrap_err().is_skipped());
/// ```
pub fn routed<T>(refined: Option<T>) -> Result<T, TypedError> {
    refined.ok_or_else(TypedError::skipped)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Arc;

    #[test]
    fn test_returns() {
        assert!(Flow::returns(true, 1).is_stop());
        assert_eq!(Flow::returns(false, 1), Flow::Continue(Value::from(1)));
        assert_eq!(Flow::Skip.value(), None);
        assert_eq!(Flow::stop("x").value(), Some(&Value::from("x")));
    }

    #[tokio::test]
    async fn test_works_false_has_no_side_effect() {
        let touched = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&touched);

        let flow = works(false, move || async move {
            flag.store(true, Ordering::SeqCst);
            Ok(Flow::next("ran"))
        })
        .await
        .unwrap();

        assert!(flow.is_skip());
        assert!(!touched.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn test_works_async_condition() {
        let flow = works(|| async { true }, || async { Ok(Flow::stop(3)) })
            .await
            .unwrap();
        assert_eq!(flow, Flow::Stop(Value::from(3)));
    }

    #[tokio::test]
    async fn test_immediate_condition() {
        let flow = works(immediate(|| false), || async { Ok(Flow::next("ran")) })
            .await
            .unwrap();
        assert!(flow.is_skip());
        assert!(returns_when(immediate(|| true), 1).await.unwrap().is_stop());
    }

    #[test]
    fn test_routed() {
        assert_eq!(routed(Some(4)), Ok(4));
        assert!(routed::<u8>(None).unwrap_err().is_skipped());
    }

    #[tokio::test]
    async fn test_returns_when() {
        assert!(returns_when(true, "done").await.unwrap().is_stop());
        assert!(!returns_when(|| async { false }, "done").await.unwrap().is_stop());
    }
}
