//! # Metering Resilience
//!
//! Resilience patterns for provider calls and metering delivery:
//! - Retry policy with exponential backoff and cancellation
//! - Retryable-error classification table

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod classify;
pub mod retry;

// Re-export main types
pub use classify::{Classification, ErrorClass, ErrorClassifier};
pub use retry::{RetryConfig, RetryPolicy, RetryPolicyBuilder, RetryResult};
