//! # Metering Core
//!
//! Core types, traits, and error handling for LLM usage metering.
//!
//! This crate provides the foundational types used throughout the workspace:
//! - Message request, response, and stream event types
//! - The provider trait implemented by the direct API and the cloud gateway
//! - Error types and handling
//! - Usage normalization for synchronous and streamed calls

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod error;
pub mod metadata;
pub mod normalize;
pub mod provider;
pub mod request;
pub mod response;
pub mod stop_reason;
pub mod streaming;

// Re-export commonly used types
pub use error::{MeterError, MeterResult};
pub use metadata::{is_reserved, UsageMetadata, RESERVED_KEYS};
pub use normalize::{estimate_input_tokens, CallTiming, StreamAccumulator, UsageRecord};
pub use provider::{CompletionProvider, ProviderKind};
pub use request::{
    ContentBlock, ImageSource, Message, MessageContent, MessageRequest, Role, SystemBlock,
    SystemPrompt,
};
pub use response::{MessageResponse, ResponseBlock, Usage};
pub use stop_reason::StopReason;
pub use streaming::{
    ContentDelta, DeltaUsage, EventStream, MessageDeltaBody, StreamErrorBody, StreamEvent,
};
