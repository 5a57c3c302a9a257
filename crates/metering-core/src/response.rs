//! Response types for message completions.

use serde::{Deserialize, Serialize};

/// A completed (non-streamed) message
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MessageResponse {
    /// Provider-assigned message id
    #[serde(default)]
    pub id: String,
    /// Always `message`
    #[serde(rename = "type", default = "message_type")]
    pub response_type: String,
    /// Always `assistant`
    #[serde(default = "assistant_role")]
    pub role: String,
    /// Model that produced the message
    #[serde(default)]
    pub model: String,
    /// Generated content blocks
    #[serde(default)]
    pub content: Vec<ResponseBlock>,
    /// Raw provider stop reason
    #[serde(default)]
    pub stop_reason: Option<String>,
    /// Matched stop sequence, if any
    #[serde(default)]
    pub stop_sequence: Option<String>,
    /// Token usage
    #[serde(default)]
    pub usage: Usage,
}

impl MessageResponse {
    /// Concatenated text of all text blocks, joined with newlines
    #[must_use]
    pub fn text(&self) -> String {
        self.content
            .iter()
            .filter_map(ResponseBlock::as_text)
            .filter(|t| !t.is_empty())
            .collect::<Vec<_>>()
            .join("\n")
    }
}

fn message_type() -> String {
    "message".to_string()
}

fn assistant_role() -> String {
    "assistant".to_string()
}

/// A generated content block
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ResponseBlock {
    /// Text output
    Text {
        /// Generated text
        text: String,
    },
    /// Tool invocation requested by the model
    ToolUse {
        /// Tool call id
        id: String,
        /// Tool name
        name: String,
        /// Tool input
        #[serde(default)]
        input: serde_json::Value,
    },
    /// Extended thinking output
    Thinking {
        /// Thinking text
        #[serde(default)]
        thinking: String,
    },
    /// A block type this crate does not model
    #[serde(other)]
    Unsupported,
}

impl ResponseBlock {
    /// Text payload, if this is a text block
    #[must_use]
    pub fn as_text(&self) -> Option<&str> {
        match self {
            Self::Text { text } => Some(text),
            _ => None,
        }
    }
}

/// Token usage reported by the provider
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Usage {
    /// Prompt tokens
    #[serde(default)]
    pub input_tokens: u64,
    /// Generated tokens
    #[serde(default)]
    pub output_tokens: u64,
    /// Tokens written to the prompt cache
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cache_creation_input_tokens: Option<u64>,
    /// Tokens served from the prompt cache
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cache_read_input_tokens: Option<u64>,
}

impl Usage {
    /// Usage with input and output counts only
    #[must_use]
    pub fn new(input_tokens: u64, output_tokens: u64) -> Self {
        Self {
            input_tokens,
            output_tokens,
            ..Self::default()
        }
    }

    /// Input plus output
    #[must_use]
    pub fn total(&self) -> u64 {
        self.input_tokens + self.output_tokens
    }
}
