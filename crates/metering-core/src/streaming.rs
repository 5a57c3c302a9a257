//! Stream event types.
//!
//! Both providers emit the same event vocabulary once the gateway's binary
//! framing has been unwrapped, so a single closed enum covers them.

use crate::response::{MessageResponse, ResponseBlock};
use crate::{MeterError, MeterResult};
use futures::stream::BoxStream;
use serde::{Deserialize, Serialize};

/// A stream of provider events
pub type EventStream = BoxStream<'static, MeterResult<StreamEvent>>;

/// A single streaming event
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StreamEvent {
    /// Stream opened; carries the message skeleton
    MessageStart {
        /// Message with empty content
        message: MessageResponse,
    },
    /// A content block started
    ContentBlockStart {
        /// Block index
        index: u32,
        /// Initial block state
        content_block: ResponseBlock,
    },
    /// Incremental block content
    ContentBlockDelta {
        /// Block index
        index: u32,
        /// The fragment
        delta: ContentDelta,
    },
    /// A content block finished
    ContentBlockStop {
        /// Block index
        index: u32,
    },
    /// Message-level update carrying stop reason and cumulative usage
    MessageDelta {
        /// Stop reason / sequence
        delta: MessageDeltaBody,
        /// Cumulative usage so far
        #[serde(default)]
        usage: Option<DeltaUsage>,
    },
    /// Stream finished
    MessageStop,
    /// Keep-alive
    Ping,
    /// Provider-reported error inside the stream
    Error {
        /// Error body
        error: StreamErrorBody,
    },
}

impl StreamEvent {
    /// Generated text carried by this event, if any
    #[must_use]
    pub fn text(&self) -> Option<&str> {
        match self {
            Self::ContentBlockDelta {
                delta: ContentDelta::TextDelta { text },
                ..
            } => Some(text),
            _ => None,
        }
    }

    /// Usage carried by a message delta
    #[must_use]
    pub fn delta_usage(&self) -> Option<&DeltaUsage> {
        match self {
            Self::MessageDelta { usage, .. } => usage.as_ref(),
            _ => None,
        }
    }

    /// Stop reason carried by a message delta
    #[must_use]
    pub fn stop_reason(&self) -> Option<&str> {
        match self {
            Self::MessageDelta { delta, .. } => delta.stop_reason.as_deref(),
            _ => None,
        }
    }

    /// Text delta helper
    pub fn text_delta(index: u32, text: impl Into<String>) -> Self {
        Self::ContentBlockDelta {
            index,
            delta: ContentDelta::TextDelta { text: text.into() },
        }
    }

    /// Message delta helper
    #[must_use]
    pub fn message_delta(stop_reason: Option<&str>, usage: Option<DeltaUsage>) -> Self {
        Self::MessageDelta {
            delta: MessageDeltaBody {
                stop_reason: stop_reason.map(ToString::to_string),
                stop_sequence: None,
            },
            usage,
        }
    }
}

/// Fragment inside a content block delta
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContentDelta {
    /// Text fragment
    TextDelta {
        /// Text
        text: String,
    },
    /// Partial tool input JSON
    InputJsonDelta {
        /// JSON fragment
        partial_json: String,
    },
    /// Extended thinking fragment
    ThinkingDelta {
        /// Thinking text
        thinking: String,
    },
    /// Thinking signature
    SignatureDelta {
        /// Signature
        signature: String,
    },
    /// A delta type this crate does not model
    #[serde(other)]
    Other,
}

/// Body of a message delta
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageDeltaBody {
    /// Raw stop reason
    #[serde(default)]
    pub stop_reason: Option<String>,
    /// Matched stop sequence
    #[serde(default)]
    pub stop_sequence: Option<String>,
}

/// Usage on a message delta; input may be omitted by the provider
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeltaUsage {
    /// Prompt tokens, when reported
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub input_tokens: Option<u64>,
    /// Generated tokens so far
    #[serde(default)]
    pub output_tokens: u64,
}

/// Error payload inside a stream
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StreamErrorBody {
    /// Error type, e.g. `overloaded_error`
    #[serde(rename = "type", default)]
    pub error_type: String,
    /// Message
    #[serde(default)]
    pub message: String,
}

impl StreamErrorBody {
    /// Convert into a provider error. Overload and server errors are
    /// retryable, everything else is not.
    #[must_use]
    pub fn to_error(&self, provider: &str) -> MeterError {
        let retryable = matches!(
            self.error_type.as_str(),
            "overloaded_error" | "api_error" | "rate_limit_error"
        );
        MeterError::provider(
            provider,
            format!("{}: {}", self.error_type, self.message),
            None,
            retryable,
        )
    }
}
