//! Error types for the metering middleware.
//!
//! Provider-call failures propagate to the caller. Collector failures
//! (`Network`, `Validation` with a status, `Metering`) are only ever logged
//! by the dispatcher.

use thiserror::Error;

/// Result alias used across the metering crates
pub type MeterResult<T> = Result<T, MeterError>;

/// Errors produced by the metering middleware
#[derive(Error, Debug)]
pub enum MeterError {
    /// Missing or invalid configuration; fatal to the call
    #[error("Configuration error: {message}")]
    Configuration {
        /// Description of the problem
        message: String,
    },

    /// Failure reported by (or while talking to) an LLM provider
    #[error("Provider error ({provider}): {message}")]
    Provider {
        /// Provider that produced the error
        provider: String,
        /// Error message
        message: String,
        /// HTTP status code, when the failure came from an HTTP response
        status_code: Option<u16>,
        /// Whether the provider marked the failure as transient
        retryable: bool,
    },

    /// Transport failure talking to the metering collector
    #[error("Network error: {message}")]
    Network {
        /// Error message
        message: String,
    },

    /// Rejected input: a 4xx from the collector or a malformed model identifier
    #[error("Validation error: {message}")]
    Validation {
        /// Error message
        message: String,
        /// HTTP status code, if the rejection came from the collector
        status_code: Option<u16>,
    },

    /// Metering delivery failed after exhausting retries
    #[error("Metering failed after {attempts} attempts: {last_error}")]
    Metering {
        /// Number of attempts made
        attempts: u32,
        /// The final error observed
        last_error: Box<MeterError>,
    },

    /// The caller cancelled the operation
    #[error("Operation cancelled")]
    Cancelled,

    /// JSON (de)serialization failure
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Unexpected internal failure
    #[error("Internal error: {message}")]
    Internal {
        /// Error message
        message: String,
    },
}

impl MeterError {
    /// Create a configuration error
    pub fn configuration(message: impl Into<String>) -> Self {
        Self::Configuration {
            message: message.into(),
        }
    }

    /// Create a provider error
    pub fn provider(
        provider: impl Into<String>,
        message: impl Into<String>,
        status_code: Option<u16>,
        retryable: bool,
    ) -> Self {
        Self::Provider {
            provider: provider.into(),
            message: message.into(),
            status_code,
            retryable,
        }
    }

    /// Create a network error
    pub fn network(message: impl Into<String>) -> Self {
        Self::Network {
            message: message.into(),
        }
    }

    /// Create a validation error without an HTTP status
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation {
            message: message.into(),
            status_code: None,
        }
    }

    /// Create a validation error for a collector response status
    pub fn validation_status(status: u16, message: impl Into<String>) -> Self {
        Self::Validation {
            message: message.into(),
            status_code: Some(status),
        }
    }

    /// Wrap the last error after retries ran out
    pub fn metering(attempts: u32, last_error: Self) -> Self {
        Self::Metering {
            attempts,
            last_error: Box::new(last_error),
        }
    }

    /// Create an internal error
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }

    /// Whether the error is transient by its structure alone.
    ///
    /// Provider errors without a retryable flag may still be classified as
    /// transient by their text; see the resilience crate's classifier.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Provider {
                retryable,
                status_code,
                ..
            } => *retryable || matches!(status_code, Some(429 | 500..=599)),
            Self::Network { .. } => true,
            Self::Validation { status_code, .. } => *status_code == Some(429),
            _ => false,
        }
    }

    /// HTTP status code attached to the error, if any
    #[must_use]
    pub fn status_code(&self) -> Option<u16> {
        match self {
            Self::Provider { status_code, .. } | Self::Validation { status_code, .. } => {
                *status_code
            }
            Self::Metering { last_error, .. } => last_error.status_code(),
            _ => None,
        }
    }

    /// Whether this error is a cancellation
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled)
    }
}
