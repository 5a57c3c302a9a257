//! Retry policy with exponential backoff.
//!
//! Attempts are bounded in total (the first call counts), delays grow
//! geometrically up to a cap, and every attempt and wait is raced against a
//! cancellation token.

use metering_core::{MeterError, MeterResult};
use rand::Rng;
use std::future::Future;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// Retry configuration
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Total attempts, including the first one
    pub max_attempts: u32,
    /// Delay before the second attempt
    pub base_delay: Duration,
    /// Maximum delay between attempts
    pub max_delay: Duration,
    /// Backoff multiplier
    pub multiplier: f64,
    /// Jitter factor (0.0 - 1.0)
    pub jitter: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(5),
            multiplier: 2.0,
            jitter: 0.0,
        }
    }
}

/// Retry policy implementation
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    config: RetryConfig,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::with_defaults()
    }
}

impl RetryPolicy {
    /// Create a new retry policy with the given configuration
    #[must_use]
    pub fn new(config: RetryConfig) -> Self {
        Self { config }
    }

    /// Create with default configuration
    #[must_use]
    pub fn with_defaults() -> Self {
        Self::new(RetryConfig::default())
    }

    /// Create a policy with a custom attempt budget
    #[must_use]
    pub fn with_max_attempts(max_attempts: u32) -> Self {
        Self::new(RetryConfig {
            max_attempts,
            ..Default::default()
        })
    }

    /// Start a builder
    #[must_use]
    pub fn builder() -> RetryPolicyBuilder {
        RetryPolicyBuilder::new()
    }

    /// Delay after the given failed attempt (0-indexed)
    #[must_use]
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let base = self.config.base_delay.as_millis() as f64;
        let delay = base * self.config.multiplier.powi(attempt as i32);
        let delay = delay.min(self.config.max_delay.as_millis() as f64);

        let jitter_range = delay * self.config.jitter;
        let jitter = if jitter_range > 0.0 {
            rand::thread_rng().gen_range(-jitter_range..=jitter_range)
        } else {
            0.0
        };
        let final_delay = (delay + jitter).max(0.0);

        Duration::from_millis(final_delay as u64)
    }

    /// Run an operation, retrying failures accepted by `is_retryable`.
    ///
    /// The operation receives the 1-based attempt number.
    pub async fn run<F, Fut, T, P>(
        &self,
        cancel: &CancellationToken,
        mut operation: F,
        is_retryable: P,
    ) -> RetryResult<T>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = MeterResult<T>>,
        P: Fn(&MeterError) -> bool,
    {
        let max_attempts = self.config.max_attempts.max(1);

        for attempt in 1..=max_attempts {
            if cancel.is_cancelled() {
                return RetryResult::Cancelled { attempts: attempt - 1 };
            }

            let outcome = tokio::select! {
                biased;
                () = cancel.cancelled() => return RetryResult::Cancelled { attempts: attempt },
                outcome = operation(attempt) => outcome,
            };

            let error = match outcome {
                Ok(value) => {
                    if attempt > 1 {
                        debug!(attempt, "Retry succeeded");
                    }
                    return RetryResult::Success(value);
                }
                Err(error) if error.is_cancelled() => {
                    return RetryResult::Cancelled { attempts: attempt };
                }
                Err(error) => error,
            };

            if !is_retryable(&error) {
                return RetryResult::NonRetryable { error, attempts: attempt };
            }
            if attempt == max_attempts {
                return RetryResult::Failed { error, attempts: attempt };
            }

            let delay = self.delay_for_attempt(attempt - 1);
            warn!(
                attempt,
                max_attempts,
                delay_ms = delay.as_millis() as u64,
                error = %error,
                "Retrying after error"
            );

            tokio::select! {
                biased;
                () = cancel.cancelled() => return RetryResult::Cancelled { attempts: attempt },
                () = tokio::time::sleep(delay) => {}
            }
        }

        RetryResult::Failed {
            error: MeterError::internal("Retry exhausted without error"),
            attempts: max_attempts,
        }
    }

    /// Run an operation and flatten the outcome into a result.
    ///
    /// # Errors
    /// Returns the last error when attempts run out, the first
    /// non-retryable error, or [`MeterError::Cancelled`].
    pub async fn execute<F, Fut, T, P>(
        &self,
        cancel: &CancellationToken,
        operation: F,
        is_retryable: P,
    ) -> MeterResult<T>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = MeterResult<T>>,
        P: Fn(&MeterError) -> bool,
    {
        self.run(cancel, operation, is_retryable).await.into_result()
    }

    /// Get the configuration
    #[must_use]
    pub fn config(&self) -> &RetryConfig {
        &self.config
    }
}

/// Result of a retry operation
#[derive(Debug)]
pub enum RetryResult<T> {
    /// Operation succeeded
    Success(T),
    /// Operation failed after all attempts
    Failed {
        /// The final error
        error: MeterError,
        /// Number of attempts made
        attempts: u32,
    },
    /// Operation failed with a non-retryable error
    NonRetryable {
        /// The error
        error: MeterError,
        /// Number of attempts made
        attempts: u32,
    },
    /// The cancellation token fired
    Cancelled {
        /// Attempts started before cancellation
        attempts: u32,
    },
}

impl<T> RetryResult<T> {
    /// Convert to a Result
    ///
    /// # Errors
    /// Returns the error if the operation failed
    pub fn into_result(self) -> MeterResult<T> {
        match self {
            Self::Success(value) => Ok(value),
            Self::Failed { error, .. } | Self::NonRetryable { error, .. } => Err(error),
            Self::Cancelled { .. } => Err(MeterError::Cancelled),
        }
    }

    /// Check if the operation succeeded
    #[must_use]
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Success(_))
    }

    /// Attempts made
    #[must_use]
    pub fn attempts(&self) -> Option<u32> {
        match self {
            Self::Success(_) => None,
            Self::Failed { attempts, .. }
            | Self::NonRetryable { attempts, .. }
            | Self::Cancelled { attempts } => Some(*attempts),
        }
    }
}

/// Builder for retry policy
#[derive(Debug, Default)]
pub struct RetryPolicyBuilder {
    config: RetryConfig,
}

impl RetryPolicyBuilder {
    /// Create a new builder
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the total attempt budget
    #[must_use]
    pub fn max_attempts(mut self, n: u32) -> Self {
        self.config.max_attempts = n;
        self
    }

    /// Set base delay
    #[must_use]
    pub fn base_delay(mut self, delay: Duration) -> Self {
        self.config.base_delay = delay;
        self
    }

    /// Set max delay
    #[must_use]
    pub fn max_delay(mut self, delay: Duration) -> Self {
        self.config.max_delay = delay;
        self
    }

    /// Set backoff multiplier
    #[must_use]
    pub fn multiplier(mut self, multiplier: f64) -> Self {
        self.config.multiplier = multiplier;
        self
    }

    /// Set jitter factor
    #[must_use]
    pub fn jitter(mut self, jitter: f64) -> Self {
        self.config.jitter = jitter.clamp(0.0, 1.0);
        self
    }

    /// Build the policy
    #[must_use]
    pub fn build(self) -> RetryPolicy {
        RetryPolicy::new(self.config)
    }
}
