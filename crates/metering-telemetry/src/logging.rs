//! Logging setup.
//!
//! Installs a `tracing-subscriber` fmt layer filtered by an `EnvFilter`.
//! `RUST_LOG` wins when set; otherwise the configured level applies to the
//! metering crates.

use metering_config::{LogLevel, MeteringConfig};
use tracing::debug;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

/// Crates whose level follows [`LoggingConfig::level`]
const METERING_TARGETS: &[&str] = &[
    "llm_metering",
    "metering_core",
    "metering_config",
    "metering_resilience",
    "metering_providers",
    "metering_telemetry",
];

/// Logging configuration
#[derive(Debug, Clone)]
pub struct LoggingConfig {
    /// Level for the metering crates
    pub level: LogLevel,
    /// Emit JSON lines instead of human-readable text
    pub json: bool,
    /// Include the event target
    pub with_target: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: LogLevel::Info,
            json: false,
            with_target: true,
        }
    }
}

impl LoggingConfig {
    /// Configuration at the given level
    #[must_use]
    pub fn new(level: LogLevel) -> Self {
        Self {
            level,
            ..Default::default()
        }
    }

    /// Level taken from the metering configuration
    #[must_use]
    pub fn from_metering_config(config: &MeteringConfig) -> Self {
        Self::new(config.log_level())
    }

    /// Switch to JSON output
    #[must_use]
    pub fn with_json(mut self, json: bool) -> Self {
        self.json = json;
        self
    }

    /// Toggle event targets
    #[must_use]
    pub fn with_target(mut self, with_target: bool) -> Self {
        self.with_target = with_target;
        self
    }

    /// Filter directives for the configured level
    #[must_use]
    pub fn directives(&self) -> String {
        let level = self.level.as_filter();
        let mut directives = vec!["warn".to_string()];
        directives.extend(METERING_TARGETS.iter().map(|t| format!("{t}={level}")));
        directives.join(",")
    }
}

/// Install the global subscriber.
///
/// Returns `false` when a subscriber was already installed; that call is a
/// no-op.
pub fn init_logging(config: &LoggingConfig) -> bool {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(config.directives()));

    let layer = if config.json {
        fmt::layer()
            .json()
            .with_target(config.with_target)
            .with_filter(filter)
            .boxed()
    } else {
        fmt::layer()
            .with_target(config.with_target)
            .with_filter(filter)
            .boxed()
    };

    match tracing_subscriber::registry().with(layer).try_init() {
        Ok(()) => {
            debug!(level = %config.level, "Logging initialized");
            true
        }
        Err(e) => {
            debug!(error = %e, "Logging already initialized");
            false
        }
    }
}

/// Span covering one metered call
#[macro_export]
macro_rules! metered_call_span {
    ($operation:expr, $model:expr, $streamed:expr) => {
        tracing::info_span!(
            "metered_call",
            operation = %$operation,
            model = %$model,
            streamed = $streamed,
            provider = tracing::field::Empty
        )
    };
}
