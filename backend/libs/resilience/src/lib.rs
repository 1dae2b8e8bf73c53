//! Resilience helpers for storage callers
//!
//! The messaging flows never retry on their own: a storage error is handed back
//! to the caller unchanged. Callers that want retry semantics wrap the call with
//! the helpers in this crate:
//! - **Retry**: exponential backoff with jitter, optionally limited to transient errors
//! - **Timeout**: enforces a time limit on a single future
//!
//! # Example: retry only transient failures
//!
//! ```rust,no_run
//! use resilience::{with_retry_if, RetryConfig};
//!
//! #[derive(Debug)]
//! enum StoreError { Busy, Corrupt }
//!
//! impl std::fmt::Display for StoreError {
//!     fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
//!         write!(f, "{:?}", self)
//!     }
//! }
//!
//! #[tokio::main]
//! async fn main() {
//!     let result = with_retry_if(
//!         RetryConfig::default(),
//!         |e: &StoreError| matches!(e, StoreError::Busy),
//!         || async { Ok::<_, StoreError>(42) },
//!     )
//!     .await;
//!     assert_eq!(result.unwrap(), 42);
//! }
//! ```

pub mod retry;
pub mod timeout;

pub use retry::{with_retry, with_retry_if, RetryConfig, RetryError};
pub use timeout::{with_timeout, with_timeout_result, Elapsed, TimeoutError};
