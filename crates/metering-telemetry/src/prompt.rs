//! Prompt capture.
//!
//! Turns request messages and response text into bounded text fields for
//! the collector. Limits are counted in characters, so a cut never lands
//! inside a multi-byte code point. Messages are truncated one by one before
//! they are serialized; the serialized array itself is never cut.

use metering_core::{ContentBlock, Message, MessageContent, MessageRequest, MessageResponse};
use serde::Serialize;
use tracing::{debug, warn};

/// Maximum characters kept per captured field
pub const MAX_PROMPT_LENGTH: usize = 50_000;

/// Maximum characters kept per input message
pub const MAX_MESSAGE_LENGTH: usize = MAX_PROMPT_LENGTH / 2;

/// Appended to any truncated text
pub const TRUNCATION_MARKER: &str = "...[TRUNCATED]";

/// Captured prompt and response text
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PromptData {
    /// Flattened system prompt
    pub system_prompt: Option<String>,
    /// JSON array of `{role, content}` objects
    pub input_messages: Option<String>,
    /// Generated text
    pub output_response: Option<String>,
    /// Whether any field was cut
    pub truncated: bool,
}

impl PromptData {
    /// Combine request-side and response-side captures
    #[must_use]
    pub fn merge(self, other: Self) -> Self {
        Self {
            system_prompt: self.system_prompt.or(other.system_prompt),
            input_messages: self.input_messages.or(other.input_messages),
            output_response: self.output_response.or(other.output_response),
            truncated: self.truncated || other.truncated,
        }
    }

    /// Whether nothing was captured
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.system_prompt.is_none()
            && self.input_messages.is_none()
            && self.output_response.is_none()
    }
}

/// Cut `text` to at most `max_chars` characters, marker included.
///
/// Returns the text and whether it was cut. A cut result always ends with
/// [`TRUNCATION_MARKER`]; `max_chars` must be at least the marker's length,
/// otherwise the result is the bare marker and exceeds `max_chars`.
#[must_use]
pub fn truncate_with_marker(text: &str, max_chars: usize) -> (String, bool) {
    if text.chars().nth(max_chars).is_none() {
        return (text.to_string(), false);
    }

    let keep = max_chars.saturating_sub(TRUNCATION_MARKER.chars().count());
    let end = text.char_indices().nth(keep).map_or(text.len(), |(i, _)| i);
    let mut out = String::with_capacity(end + TRUNCATION_MARKER.len());
    out.push_str(&text[..end]);
    out.push_str(TRUNCATION_MARKER);
    (out, true)
}

#[derive(Serialize)]
struct CapturedMessage<'a> {
    role: &'a str,
    content: String,
}

/// Text of a message: text blocks joined with newlines, or the serialized
/// blocks when there is no text at all
fn message_text(message: &Message) -> String {
    match &message.content {
        MessageContent::Text(text) => text.clone(),
        MessageContent::Blocks(blocks) => {
            let parts: Vec<&str> = blocks
                .iter()
                .filter_map(|block| match block {
                    ContentBlock::Text { text } => Some(text.as_str()),
                    _ => None,
                })
                .collect();
            if parts.is_empty() {
                serde_json::to_string(blocks).unwrap_or_default()
            } else {
                parts.join("\n")
            }
        }
    }
}

/// Capture the system prompt and input messages of a request
#[must_use]
pub fn extract_request(request: &MessageRequest) -> PromptData {
    let mut data = PromptData::default();

    if let Some(system) = request.system.as_ref().map(|s| s.text()) {
        if !system.is_empty() {
            let (system, cut) = truncate_with_marker(&system, MAX_PROMPT_LENGTH);
            if cut {
                debug!(max = MAX_PROMPT_LENGTH, "System prompt truncated");
            }
            data.truncated |= cut;
            data.system_prompt = Some(system);
        }
    }

    if !request.messages.is_empty() {
        let messages: Vec<CapturedMessage<'_>> = request
            .messages
            .iter()
            .map(|message| {
                let (content, cut) = truncate_with_marker(&message_text(message), MAX_MESSAGE_LENGTH);
                data.truncated |= cut;
                CapturedMessage {
                    role: message.role.as_str(),
                    content,
                }
            })
            .collect();

        match serde_json::to_string(&messages) {
            Ok(json) => data.input_messages = Some(json),
            Err(e) => warn!(error = %e, "Failed to serialize input messages"),
        }
    }

    data
}

fn output_data(text: &str, truncated: bool) -> PromptData {
    let mut data = PromptData {
        truncated,
        ..PromptData::default()
    };
    if text.is_empty() {
        return data;
    }
    let (text, cut) = truncate_with_marker(text, MAX_PROMPT_LENGTH);
    if cut {
        debug!(max = MAX_PROMPT_LENGTH, "Output response truncated");
    }
    data.truncated |= cut;
    data.output_response = Some(text);
    data
}

/// Capture the text of a completed response.
///
/// `truncated` carries the flag from the request-side capture.
#[must_use]
pub fn extract_response(response: &MessageResponse, truncated: bool) -> PromptData {
    output_data(&response.text(), truncated)
}

/// Capture text accumulated from a stream
#[must_use]
pub fn extract_streamed(text: &str, truncated: bool) -> PromptData {
    output_data(text, truncated)
}
