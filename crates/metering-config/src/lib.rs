//! # Metering Config
//!
//! Configuration for the metering middleware: an explicit builder, optional
//! `.env` and environment loading, collector URL normalization, and
//! validation.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod config;
pub mod loader;
pub mod url;
pub mod validation;

pub use config::{ConfigBuilder, LogLevel, MeteringConfig};
pub use loader::{env_flag, load_env_files, load_env_files_from};
pub use url::{metering_endpoint, normalize_base_url, DEFAULT_BASE_URL, METERING_PATH};
pub use validation::{validate_api_key, validate_base_arn, API_KEY_PREFIX};
