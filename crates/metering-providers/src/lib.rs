//! # Metering Providers
//!
//! Provider implementations behind the metering middleware:
//! - Anthropic direct API (SSE streaming)
//! - AWS Bedrock (SigV4 signing, binary event-stream decoding)
//!
//! plus AWS credential resolution, model identifier conversion, and the
//! [`FallbackRouter`] that tries the gateway first and falls back to the
//! direct API.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod anthropic;
pub mod bedrock;
pub mod credentials;
pub mod eventstream;
mod http;
pub mod model_id;
pub mod router;
pub mod sse;

// Re-export main types
pub use anthropic::{AnthropicConfig, AnthropicProvider};
pub use bedrock::{BedrockConfig, BedrockProvider};
pub use credentials::{AwsCredentials, CredentialResolver};
pub use model_id::{construct_full_arn, is_direct_model, to_direct_model, to_gateway_model};
pub use router::{
    select_provider, BedrockFactory, FallbackRouter, GatewayFactory, RouteState, Routed,
};
