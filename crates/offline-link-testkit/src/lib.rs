//! Offline Link Test Kit - tracing setup, structured test logs, and mock
//! collaborators for exercising the offline queue link.
//!
//! - [`MockForward`] - the next link stage, recording calls and replying from a script
//! - [`MockClient`] - a mutation client recording resubmitted requests
//! - [`LogCapture`] - structured JSONL test log sink
//! - Tracing configuration for test output
//!
//! # Example
//!
//! ```rust,ignore
//! use std::sync::Arc;
//!
//! use offline_link::{MemoryCache, QueueLink};
//! use offline_link_testkit::{MockForward, Reply};
//!
//! #[tokio::test]
//! async fn replays_after_reconnect() {
//!     offline_link_testkit::init_test_tracing();
//!
//!     let link = QueueLink::new(Arc::new(MemoryCache::new()));
//!     let forward = Arc::new(MockForward::scripted([Reply::with_id("real_1")]));
//!
//!     link.close();
//!     let results = link.request(operation, forward.clone());
//!     link.open().finished().await;
//!     assert_eq!(forward.call_count(), 1);
//! }
//! ```

#![forbid(unsafe_code)]
#![warn(clippy::all, clippy::pedantic, clippy::nursery)]
#![allow(clippy::module_name_repetitions)]

mod log_capture;
mod mocks;
mod tracing_config;

pub use log_capture::*;
pub use mocks::*;
pub use tracing_config::*;
