//! # Lamina Core
//!
//! Core types shared by every Lamina crate.
//!
//! - [`TypedError`], [`Fault`] and [`Failure`] - the three-branch error taxonomy
//! - [`Service`] and [`Capability`] - the per-request capability container
//! - [`Options`] - shallow-mergeable pipeline configuration
//! - [`Context`] and [`RequestId`] - platform invocation context
//! - [`Response`] - the platform response shape
//! - [`unwind`] - typed unwinding with [`raise`] and the guards that catch it

#![doc(html_root_url = "https://docs.rs/lamina-core/0.1.0")]
#![warn(missing_docs)]
#![forbid(unsafe_code)]

mod context;
mod error;
mod options;
mod response;
mod service;
pub mod unwind;

pub use context::{Context, RequestId};
pub use error::{Failure, Fault, LaminaResult, TypedError, TypedErrorSource};
pub use options::{Options, OptionsError};
pub use response::Response;
pub use service::{Capability, InjectionError, Service};
pub use unwind::raise;

/// Opaque event payload handed to the function by the platform.
pub type Event = serde_json::Value;
