//! Process-wide client.
//!
//! [`initialize`] installs one shared [`MeteredClient`]; a second call while
//! a client is installed is a no-op. [`reset`] removes it so tests can start
//! from a clean slate.

use crate::client::MeteredClient;
use metering_config::{ConfigBuilder, MeteringConfig};
use metering_core::{MeterError, MeterResult};
use metering_telemetry::{init_logging, LoggingConfig};
use once_cell::sync::Lazy;
use parking_lot::RwLock;
use tracing::{debug, info};

static GLOBAL: Lazy<RwLock<Option<MeteredClient>>> = Lazy::new(|| RwLock::new(None));

/// Install the shared client.
///
/// Also initializes logging at the configured level unless a subscriber is
/// already installed.
pub fn initialize(config: MeteringConfig) -> MeterResult<()> {
    let mut global = GLOBAL.write();
    if global.is_some() {
        debug!("Metering already initialized");
        return Ok(());
    }

    init_logging(&LoggingConfig::from_metering_config(&config));
    info!("Initializing metering middleware");
    *global = Some(MeteredClient::new(config)?);
    info!("Metering middleware initialized");
    Ok(())
}

/// Install the shared client from `.env` files and the environment
pub fn initialize_from_env() -> MeterResult<()> {
    if is_initialized() {
        return Ok(());
    }
    initialize(ConfigBuilder::from_env().build()?)
}

/// Whether a shared client is installed
pub fn is_initialized() -> bool {
    GLOBAL.read().is_some()
}

/// The shared client
pub fn client() -> MeterResult<MeteredClient> {
    GLOBAL.read().clone().ok_or_else(|| {
        MeterError::configuration("metering not initialized, call initialize() first")
    })
}

/// Remove the shared client and wait for its pending sends
pub async fn reset() {
    let previous = GLOBAL.write().take();
    if let Some(client) = previous {
        client.close().await;
        debug!("Metering state reset");
    }
}
