//! # Metering Telemetry
//!
//! Everything between a finished call and the metering collector:
//! - Prompt and response capture with bounded, UTF-8 safe truncation
//! - Image content detection
//! - Telemetry payload assembly
//! - Fire-and-forget delivery with retry
//! - Logging initialization

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod dispatch;
pub mod logging;
pub mod payload;
pub mod prompt;
pub mod vision;

// Re-export main types
pub use dispatch::MeteringDispatcher;
pub use logging::{init_logging, LoggingConfig};
pub use payload::{PayloadBuilder, TelemetryPayload};
pub use prompt::{
    extract_request, extract_response, extract_streamed, truncate_with_marker, PromptData,
    MAX_PROMPT_LENGTH, TRUNCATION_MARKER,
};
pub use vision::{detect, vision_attributes, VisionDetectionResult};
