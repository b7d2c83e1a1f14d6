//! # Lamina Test
//!
//! Test utilities for Lamina functions. Invocations run in-process against a
//! materialized [`RequestHandler`](lamina_pipeline::RequestHandler); nothing
//! is deployed and no platform runtime is involved.
//!
//! ## Key Features
//!
//! - **Invocation builder**: fluent event and context construction
//! - **Response assertions**: status, headers, JSON paths and envelopes
//! - **Recorder**: a shared ordered log for asserting hook and handler order
//!
//! ## Example
//!
//! ```ignore
//! use lamina_test::{Recorder, TestInvoker};
//!
//! #[tokio::test]
//! async fn test_teardown_order() {
//!     let recorder = Recorder::new();
//!     let handler = build_pipeline(recorder.clone()).req();
//!
//!     TestInvoker::new(&handler)
//!         .field("user", "ada")
//!         .send()
//!         .await
//!         .assert_status_code(200);
//!
//!     recorder.assert_order(&["end:auth", "end:db", "destroy:db", "destroy:auth"]);
//! }
//! ```

#![doc(html_root_url = "https://docs.rs/lamina-test/0.1.0")]
#![warn(missing_docs)]
#![forbid(unsafe_code)]

mod error;
mod invoker;
mod recorder;
mod response;

pub use error::TestError;
pub use invoker::TestInvoker;
pub use recorder::Recorder;
pub use response::TestResponse;
