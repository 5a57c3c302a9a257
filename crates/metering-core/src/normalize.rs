//! Response and stream normalization into a canonical usage record.
//!
//! A synchronous response already carries authoritative usage, so
//! [`UsageRecord::from_response`] is a straight projection. Streams expose
//! usage incrementally; [`StreamAccumulator`] folds the events into the same
//! record following these rules:
//!
//! 1. the first event with non-empty text stamps the first-token time, once;
//! 2. text fragments are appended in arrival order;
//! 3. a `message_delta` carrying usage overwrites the running counters (the
//!    last one wins) and captures its stop reason;
//! 4. without any usage the input count stays at the estimate taken when the
//!    stream was opened;
//! 5. an `error` event marks the record as stopped by an error.

use crate::provider::ProviderKind;
use crate::request::MessageRequest;
use crate::response::MessageResponse;
use crate::stop_reason::StopReason;
use crate::streaming::StreamEvent;
use chrono::{DateTime, Utc};
use std::time::{Duration, Instant};
use tracing::{debug, warn};

/// Minimum value returned by [`estimate_input_tokens`]
pub const MIN_ESTIMATED_TOKENS: u64 = 10;

/// Rough characters-per-token ratio used for estimation
const CHARS_PER_TOKEN: u64 = 4;

/// Wall-clock timing of one call
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CallTiming {
    /// When the call was issued
    pub request_time: DateTime<Utc>,
    /// When the response completed
    pub response_time: DateTime<Utc>,
    /// When the first output token became available
    pub completion_start_time: DateTime<Utc>,
    /// Request start to first token
    pub time_to_first_token: Duration,
    /// Request start to completion
    pub request_duration: Duration,
}

impl CallTiming {
    /// Timing for a synchronous call. The completion is considered to start
    /// at the request time, so time to first token is zero.
    #[must_use]
    pub fn synchronous(request_time: DateTime<Utc>, request_duration: Duration) -> Self {
        Self {
            request_time,
            response_time: add_duration(request_time, request_duration),
            completion_start_time: request_time,
            time_to_first_token: Duration::ZERO,
            request_duration,
        }
    }
}

fn add_duration(at: DateTime<Utc>, duration: Duration) -> DateTime<Utc> {
    chrono::Duration::from_std(duration)
        .ok()
        .and_then(|d| at.checked_add_signed(d))
        .unwrap_or(at)
}

/// Provider-agnostic usage of a single call
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UsageRecord {
    /// Prompt tokens
    pub input_tokens: u64,
    /// Generated tokens
    pub output_tokens: u64,
    /// Always `input_tokens + output_tokens`
    pub total_tokens: u64,
    /// Tokens written to the prompt cache
    pub cache_creation_tokens: u64,
    /// Tokens served from the prompt cache
    pub cache_read_tokens: u64,
    /// Canonical stop reason
    pub stop_reason: StopReason,
    /// Model reported by the provider, or the requested one
    pub model: String,
    /// Provider that executed the call
    pub provider: ProviderKind,
    /// Whether the call was streamed
    pub is_streamed: bool,
    /// Call timing
    pub timing: CallTiming,
}

impl UsageRecord {
    /// Project a synchronous response
    #[must_use]
    pub fn from_response(
        response: &MessageResponse,
        provider: ProviderKind,
        timing: CallTiming,
    ) -> Self {
        let usage = &response.usage;
        Self {
            input_tokens: usage.input_tokens,
            output_tokens: usage.output_tokens,
            total_tokens: usage.total(),
            cache_creation_tokens: usage.cache_creation_input_tokens.unwrap_or(0),
            cache_read_tokens: usage.cache_read_input_tokens.unwrap_or(0),
            stop_reason: StopReason::from_optional(response.stop_reason.as_deref()),
            model: response.model.clone(),
            provider,
            is_streamed: false,
            timing,
        }
    }
}

/// Best-effort prompt token estimate: serialized message content plus the
/// system prompt, four characters per token, never below
/// [`MIN_ESTIMATED_TOKENS`].
#[must_use]
pub fn estimate_input_tokens(request: &MessageRequest) -> u64 {
    let messages_len = serde_json::to_string(&request.messages)
        .map(|s| s.chars().count())
        .unwrap_or(0);
    let system_len = request
        .system
        .as_ref()
        .map(|s| s.text().chars().count())
        .unwrap_or(0);

    let estimate = (messages_len + system_len) as u64 / CHARS_PER_TOKEN;
    estimate.max(MIN_ESTIMATED_TOKENS)
}

/// Running state of one stream
#[derive(Debug, Clone)]
pub struct StreamAccumulator {
    provider: ProviderKind,
    model: String,
    started: Instant,
    request_time: DateTime<Utc>,
    first_token: Option<(Instant, DateTime<Utc>)>,
    text: String,
    input_tokens: u64,
    output_tokens: u64,
    cache_creation_tokens: u64,
    cache_read_tokens: u64,
    raw_stop_reason: Option<String>,
    stream_error: Option<String>,
    saw_usage: bool,
}

impl StreamAccumulator {
    /// Start accumulating. `started` must be taken before the stream was
    /// opened so first-token latency includes connection setup.
    #[must_use]
    pub fn new(
        provider: ProviderKind,
        model: impl Into<String>,
        estimated_input_tokens: u64,
        started: Instant,
        request_time: DateTime<Utc>,
    ) -> Self {
        Self {
            provider,
            model: model.into(),
            started,
            request_time,
            first_token: None,
            text: String::new(),
            input_tokens: estimated_input_tokens,
            output_tokens: 0,
            cache_creation_tokens: 0,
            cache_read_tokens: 0,
            raw_stop_reason: None,
            stream_error: None,
            saw_usage: false,
        }
    }

    /// Fold one event into the running state
    pub fn observe(&mut self, event: &StreamEvent, now: Instant, wall: DateTime<Utc>) {
        match event {
            StreamEvent::MessageStart { message } => {
                if !message.model.is_empty() {
                    self.model.clone_from(&message.model);
                }
                if message.usage.input_tokens > 0 {
                    self.input_tokens = message.usage.input_tokens;
                    self.saw_usage = true;
                }
                if let Some(cached) = message.usage.cache_creation_input_tokens {
                    self.cache_creation_tokens = cached;
                }
                if let Some(cached) = message.usage.cache_read_input_tokens {
                    self.cache_read_tokens = cached;
                }
            }
            StreamEvent::MessageDelta { delta, usage } => {
                if let Some(usage) = usage {
                    if let Some(input) = usage.input_tokens {
                        self.input_tokens = input;
                    }
                    self.output_tokens = usage.output_tokens;
                    self.saw_usage = true;
                    debug!(
                        input_tokens = self.input_tokens,
                        output_tokens = self.output_tokens,
                        "Usage extracted from stream"
                    );
                }
                if self.raw_stop_reason.is_none() {
                    self.raw_stop_reason.clone_from(&delta.stop_reason);
                }
            }
            StreamEvent::Error { error } => {
                warn!(
                    error_type = %error.error_type,
                    message = %error.message,
                    "Provider reported an error inside the stream"
                );
                if self.stream_error.is_none() {
                    self.stream_error = Some(error.error_type.clone());
                }
            }
            other => {
                if let Some(text) = other.text() {
                    if text.is_empty() {
                        return;
                    }
                    if self.first_token.is_none() {
                        self.first_token = Some((now, wall));
                    }
                    self.text.push_str(text);
                }
            }
        }
    }

    /// Accumulated output text
    #[must_use]
    pub fn text(&self) -> &str {
        &self.text
    }

    /// Current `(input, output, total)` counters
    #[must_use]
    pub fn token_counts(&self) -> (u64, u64, u64) {
        (
            self.input_tokens,
            self.output_tokens,
            self.input_tokens + self.output_tokens,
        )
    }

    /// Provider the stream runs against
    #[must_use]
    pub fn provider(&self) -> ProviderKind {
        self.provider
    }

    /// Type of the first error event seen, if any
    #[must_use]
    pub fn stream_error(&self) -> Option<&str> {
        self.stream_error.as_deref()
    }

    /// Whether the provider reported usage at any point
    #[must_use]
    pub fn saw_usage(&self) -> bool {
        self.saw_usage
    }

    /// Time from request start to first text, if any arrived
    #[must_use]
    pub fn time_to_first_token(&self) -> Option<Duration> {
        self.first_token
            .map(|(at, _)| at.saturating_duration_since(self.started))
    }

    /// Finish the stream and produce the usage record
    #[must_use]
    pub fn into_usage_record(self, finished: Instant) -> UsageRecord {
        if !self.saw_usage {
            debug!(
                estimated_input_tokens = self.input_tokens,
                "Stream ended without usage, using estimate"
            );
        }

        let request_duration = finished.saturating_duration_since(self.started);
        let time_to_first_token = self.time_to_first_token().unwrap_or(Duration::ZERO);
        let completion_start_time = self
            .first_token
            .map_or(self.request_time, |(_, wall)| wall);

        UsageRecord {
            input_tokens: self.input_tokens,
            output_tokens: self.output_tokens,
            total_tokens: self.input_tokens + self.output_tokens,
            cache_creation_tokens: self.cache_creation_tokens,
            cache_read_tokens: self.cache_read_tokens,
            stop_reason: if self.stream_error.is_some() {
                StopReason::Error
            } else {
                StopReason::from_optional(self.raw_stop_reason.as_deref())
            },
            model: self.model,
            provider: self.provider,
            is_streamed: true,
            timing: CallTiming {
                request_time: self.request_time,
                response_time: add_duration(self.request_time, request_duration),
                completion_start_time,
                time_to_first_token,
                request_duration,
            },
        }
    }
}
