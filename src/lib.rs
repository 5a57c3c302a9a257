//! # LLM Metering
//!
//! Usage metering for message completions served by the Anthropic API or
//! AWS Bedrock.
//!
//! ## Features
//!
//! - Bedrock first when AWS credentials are configured, with retry and
//!   fallback to the direct API
//! - Token usage, timing and stop reason normalized across both providers,
//!   for plain calls and streams
//! - Optional prompt and response capture, image detection
//! - Background delivery to the metering collector with retry; metering
//!   never fails or delays the call itself
//!
//! ## Usage
//!
//! ```rust,no_run
//! use llm_metering::{CallContext, MessageRequest, MeteredClient, MeteringConfig, UsageMetadata};
//!
//! # async fn example() -> llm_metering::MeterResult<()> {
//! let config = MeteringConfig::builder().with_env().build()?;
//! let client = MeteredClient::new(config)?;
//!
//! let request = MessageRequest::new("claude-3-5-sonnet-20241022", 1024).user("Hello!");
//! let ctx = CallContext::new().with_metadata(UsageMetadata::new().task_type("greeting"));
//! let response = client.create_message(request, ctx).await?;
//! println!("{}", response.text());
//!
//! client.close().await;
//! # Ok(())
//! # }
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod client;
pub mod global;
pub mod stream;

pub use client::{CallContext, MeteredClient};
pub use global::{client, initialize, initialize_from_env, is_initialized, reset};
pub use stream::{MeteredStream, StreamHandle};

pub use metering_config::{ConfigBuilder, LogLevel, MeteringConfig};
pub use metering_core::{
    ContentBlock, Message, MessageRequest, MessageResponse, MeterError, MeterResult,
    ProviderKind, StopReason, StreamEvent, UsageMetadata, UsageRecord,
};
pub use metering_providers::{select_provider, to_direct_model, to_gateway_model};
pub use metering_telemetry::{init_logging, LoggingConfig};
