//! Integration tests for LLM metering
//!
//! Every test runs the metered client against wiremock servers standing in
//! for the Anthropic API, the Bedrock runtime and the metering collector:
//! - Metered calls and payload contents
//! - Bedrock fallback
//! - Streaming
//! - Collector delivery and retry

pub mod helpers;
pub mod mock_providers;

// Re-export commonly used items
pub use fixtures::*;
pub use helpers::*;
pub use mock_providers::*;

#[cfg(test)]
mod dispatch_tests;
#[cfg(test)]
mod fallback_tests;
#[cfg(test)]
mod metering_tests;
#[cfg(test)]
mod streaming_tests;
