//! Canonical stop reasons.

use serde::{Deserialize, Serialize};
use std::fmt;
use tracing::debug;

/// Provider-agnostic stop reason understood by the collector
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum StopReason {
    /// Natural completion (also the fallback for anything unrecognized)
    #[default]
    End,
    /// Output or context window limit reached
    TokenLimit,
    /// A stop sequence matched
    EndSequence,
    /// Refusal or provider error
    Error,
    /// Provider-side timeout
    Timeout,
    /// Request cancelled
    Cancelled,
}

impl StopReason {
    /// Map a raw provider stop reason. Never fails: unknown or empty values
    /// map to [`StopReason::End`].
    #[must_use]
    pub fn from_provider(raw: &str) -> Self {
        match raw {
            "end_turn" | "tool_use" | "pause_turn" => Self::End,
            "max_tokens" | "context_window_exceeded" | "model_context_window_exceeded" => {
                Self::TokenLimit
            }
            "stop_sequence" => Self::EndSequence,
            "refusal" | "error" => Self::Error,
            "timeout" => Self::Timeout,
            "cancelled" | "canceled" => Self::Cancelled,
            "" => {
                debug!("Stop reason is empty, defaulting to END");
                Self::End
            }
            other => {
                debug!(stop_reason = other, "Unknown stop reason, defaulting to END");
                Self::End
            }
        }
    }

    /// Map an optional raw stop reason
    #[must_use]
    pub fn from_optional(raw: Option<&str>) -> Self {
        Self::from_provider(raw.unwrap_or_default())
    }

    /// Wire representation
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::End => "END",
            Self::TokenLimit => "TOKEN_LIMIT",
            Self::EndSequence => "END_SEQUENCE",
            Self::Error => "ERROR",
            Self::Timeout => "TIMEOUT",
            Self::Cancelled => "CANCELLED",
        }
    }
}

impl fmt::Display for StopReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
