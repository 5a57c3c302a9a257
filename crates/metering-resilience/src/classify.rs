//! Retryable-error classification for provider calls.
//!
//! Structured information on the error (retryable flag, HTTP status) is
//! consulted first. Only errors that carry none of it fall through to the
//! pattern table, matched case-insensitively against the error text.

use metering_core::MeterError;
use std::fmt;
use tracing::debug;

/// Category of a transient failure
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorClass {
    /// Deadline exceeded somewhere on the path
    Timeout,
    /// TCP connect refused
    ConnectionRefused,
    /// Connection dropped mid-flight
    ConnectionReset,
    /// DNS or similar transient resolution failure
    TemporaryFailure,
    /// Upstream unavailable or erroring
    ServiceUnavailable,
    /// Provider-side throttling
    Throttling,
    /// Caller exceeded a rate limit
    RateLimit,
}

impl fmt::Display for ErrorClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Timeout => "timeout",
            Self::ConnectionRefused => "connection_refused",
            Self::ConnectionReset => "connection_reset",
            Self::TemporaryFailure => "temporary_failure",
            Self::ServiceUnavailable => "service_unavailable",
            Self::Throttling => "throttling",
            Self::RateLimit => "rate_limit",
        };
        f.write_str(name)
    }
}

/// Verdict for a single error
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Classification {
    /// Transient; worth retrying
    Retryable(ErrorClass),
    /// Permanent
    Fatal,
}

impl Classification {
    /// Whether the error should be retried
    #[must_use]
    pub fn is_retryable(self) -> bool {
        matches!(self, Self::Retryable(_))
    }
}

/// Ordered table of error classes and the text patterns that identify them
#[derive(Debug, Clone)]
pub struct ErrorClassifier {
    entries: Vec<(ErrorClass, Vec<String>)>,
}

impl Default for ErrorClassifier {
    fn default() -> Self {
        Self::new()
            .with_entry(ErrorClass::Timeout, &["timeout", "timed out", "deadline exceeded"])
            .with_entry(ErrorClass::ConnectionRefused, &["connection refused"])
            .with_entry(ErrorClass::ConnectionReset, &["connection reset", "broken pipe"])
            .with_entry(ErrorClass::TemporaryFailure, &["temporary failure"])
            .with_entry(
                ErrorClass::ServiceUnavailable,
                &[
                    "service unavailable",
                    "serviceunavailableexception",
                    "modelnotreadyexception",
                    "internalserverexception",
                ],
            )
            .with_entry(
                ErrorClass::Throttling,
                &["throttlingexception", "throttling", "overloaded"],
            )
            .with_entry(
                ErrorClass::RateLimit,
                &["rate limit", "rate exceeded", "requestlimitexceeded", "too many requests"],
            )
    }
}

impl ErrorClassifier {
    /// Empty table; only structured information is used
    #[must_use]
    pub fn new() -> Self {
        Self {
            entries: Vec::new(),
        }
    }

    /// Append patterns for a class. Patterns are matched case-insensitively.
    #[must_use]
    pub fn with_entry(mut self, class: ErrorClass, patterns: &[&str]) -> Self {
        let patterns = patterns.iter().map(|p| p.to_ascii_lowercase());
        if let Some((_, existing)) = self.entries.iter_mut().find(|(c, _)| *c == class) {
            existing.extend(patterns);
        } else {
            self.entries.push((class, patterns.collect()));
        }
        self
    }

    /// Classify an error
    #[must_use]
    pub fn classify(&self, error: &MeterError) -> Classification {
        match error {
            MeterError::Cancelled
            | MeterError::Configuration { .. }
            | MeterError::Serialization(_) => return Classification::Fatal,
            MeterError::Network { .. } => {
                let class = self
                    .match_text(&error.to_string())
                    .unwrap_or(ErrorClass::ConnectionReset);
                return Classification::Retryable(class);
            }
            MeterError::Provider {
                retryable,
                status_code,
                ..
            } => {
                match status_code {
                    Some(429) => return Classification::Retryable(ErrorClass::RateLimit),
                    Some(500..=599) => {
                        return Classification::Retryable(ErrorClass::ServiceUnavailable)
                    }
                    _ => {}
                }
                if *retryable {
                    return Classification::Retryable(
                        self.match_text(&error.to_string())
                            .unwrap_or(ErrorClass::ServiceUnavailable),
                    );
                }
                if matches!(status_code, Some(400..=499)) {
                    return Classification::Fatal;
                }
            }
            _ => {}
        }

        let text = error.to_string();
        match self.match_text(&text) {
            Some(class) => Classification::Retryable(class),
            None => {
                debug!(error = %text, "Error not covered by retry classification");
                Classification::Fatal
            }
        }
    }

    /// Shorthand for `classify(error).is_retryable()`
    #[must_use]
    pub fn is_retryable(&self, error: &MeterError) -> bool {
        self.classify(error).is_retryable()
    }

    fn match_text(&self, text: &str) -> Option<ErrorClass> {
        let text = text.to_ascii_lowercase();
        self.entries
            .iter()
            .find(|(_, patterns)| patterns.iter().any(|p| text.contains(p.as_str())))
            .map(|(class, _)| *class)
    }
}
