//! Metering configuration and its builder.

use crate::loader::{env_flag, load_env_files, process_env};
use crate::url::normalize_base_url;
use crate::validation::{validate_api_key, validate_base_arn};
use metering_core::MeterResult;
use secrecy::{ExposeSecret, Secret};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Verbosity of the middleware's own logging
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum LogLevel {
    /// Everything, including per-event stream details
    Debug,
    /// Lifecycle messages
    #[default]
    Info,
    /// Degraded behavior such as fallbacks
    Warn,
    /// Failures only
    Error,
}

impl LogLevel {
    /// Directive understood by `tracing_subscriber::EnvFilter`
    #[must_use]
    pub fn as_filter(self) -> &'static str {
        match self {
            Self::Debug => "debug",
            Self::Info => "info",
            Self::Warn => "warn",
            Self::Error => "error",
        }
    }
}

impl FromStr for LogLevel {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "DEBUG" => Ok(Self::Debug),
            "INFO" => Ok(Self::Info),
            "WARN" | "WARNING" => Ok(Self::Warn),
            "ERROR" => Ok(Self::Error),
            other => Err(format!("unknown log level '{other}'")),
        }
    }
}

impl fmt::Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.as_filter().to_ascii_uppercase())
    }
}

/// Resolved configuration for the metering middleware
#[derive(Debug, Clone)]
pub struct MeteringConfig {
    pub(crate) metering_api_key: Secret<String>,
    pub(crate) metering_base_url: String,
    pub(crate) anthropic_api_key: Option<Secret<String>>,
    pub(crate) anthropic_base_url: Option<String>,
    pub(crate) organization_id: Option<String>,
    pub(crate) product_id: Option<String>,
    pub(crate) aws_access_key_id: Option<String>,
    pub(crate) aws_secret_access_key: Option<Secret<String>>,
    pub(crate) aws_session_token: Option<Secret<String>>,
    pub(crate) aws_region: String,
    pub(crate) aws_profile: Option<String>,
    pub(crate) aws_model_arn_base: Option<String>,
    pub(crate) bedrock_disabled: bool,
    pub(crate) log_level: LogLevel,
    pub(crate) verbose_startup: bool,
    pub(crate) capture_prompts: bool,
    pub(crate) request_timeout: Duration,
}

impl MeteringConfig {
    /// Region used when none is configured
    pub const DEFAULT_REGION: &'static str = "us-east-1";
    /// Collector request timeout
    pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(10);
    /// Value of the `middlewareSource` payload field
    pub const MIDDLEWARE_SOURCE: &'static str = "llm-metering-rust";
    /// User agent sent to the collector
    pub const USER_AGENT: &'static str = concat!("llm-metering/", env!("CARGO_PKG_VERSION"));

    /// Start building a configuration
    #[must_use]
    pub fn builder() -> ConfigBuilder {
        ConfigBuilder::default()
    }

    /// Build from `.env` files and the process environment only
    pub fn from_env() -> MeterResult<Self> {
        ConfigBuilder::from_env().build()
    }

    /// Metering API key (exposed for request headers)
    #[must_use]
    pub fn metering_api_key(&self) -> &str {
        self.metering_api_key.expose_secret()
    }

    /// Normalized collector origin
    #[must_use]
    pub fn metering_base_url(&self) -> &str {
        &self.metering_base_url
    }

    /// Direct API key, if configured
    #[must_use]
    pub fn anthropic_api_key(&self) -> Option<&str> {
        self.anthropic_api_key
            .as_ref()
            .map(|s| s.expose_secret().as_str())
    }

    /// Direct API base URL override
    #[must_use]
    pub fn anthropic_base_url(&self) -> Option<&str> {
        self.anthropic_base_url.as_deref()
    }

    /// Organization id reported when the caller does not set one
    #[must_use]
    pub fn organization_id(&self) -> Option<&str> {
        self.organization_id.as_deref()
    }

    /// Product id reported when the caller does not set one
    #[must_use]
    pub fn product_id(&self) -> Option<&str> {
        self.product_id.as_deref()
    }

    /// Static AWS access key id
    #[must_use]
    pub fn aws_access_key_id(&self) -> Option<&str> {
        self.aws_access_key_id.as_deref()
    }

    /// Static AWS secret access key
    #[must_use]
    pub fn aws_secret_access_key(&self) -> Option<&str> {
        self.aws_secret_access_key
            .as_ref()
            .map(|s| s.expose_secret().as_str())
    }

    /// Static AWS session token
    #[must_use]
    pub fn aws_session_token(&self) -> Option<&str> {
        self.aws_session_token
            .as_ref()
            .map(|s| s.expose_secret().as_str())
    }

    /// AWS region
    #[must_use]
    pub fn aws_region(&self) -> &str {
        &self.aws_region
    }

    /// Named AWS profile
    #[must_use]
    pub fn aws_profile(&self) -> Option<&str> {
        self.aws_profile.as_deref()
    }

    /// Base ARN (`arn:aws:bedrock:{region}:{account}`) for inference profiles
    #[must_use]
    pub fn aws_model_arn_base(&self) -> Option<&str> {
        self.aws_model_arn_base.as_deref()
    }

    /// Whether the gateway path is switched off
    #[must_use]
    pub fn bedrock_disabled(&self) -> bool {
        self.bedrock_disabled
    }

    /// Whether a static keypair is configured
    #[must_use]
    pub fn has_static_aws_credentials(&self) -> bool {
        self.aws_access_key_id.is_some() && self.aws_secret_access_key.is_some()
    }

    /// Whether any AWS credential source is configured explicitly
    #[must_use]
    pub fn has_aws_credentials(&self) -> bool {
        self.has_static_aws_credentials() || self.aws_profile.is_some()
    }

    /// Log verbosity
    #[must_use]
    pub fn log_level(&self) -> LogLevel {
        self.log_level
    }

    /// Whether to log the resolved configuration at startup
    #[must_use]
    pub fn verbose_startup(&self) -> bool {
        self.verbose_startup
    }

    /// Whether prompts and responses are attached to payloads
    #[must_use]
    pub fn capture_prompts(&self) -> bool {
        self.capture_prompts
    }

    /// Collector request timeout
    #[must_use]
    pub fn request_timeout(&self) -> Duration {
        self.request_timeout
    }

    /// Check required values and formats
    pub fn validate(&self) -> MeterResult<()> {
        validate_api_key(self.metering_api_key.expose_secret())?;
        if let Some(arn) = &self.aws_model_arn_base {
            validate_base_arn(arn)?;
        }
        debug!("Configuration validation passed");
        Ok(())
    }

    /// Log the resolved configuration with secrets reduced to their length
    pub fn log_summary(&self) {
        info!(
            metering_base_url = %self.metering_base_url,
            metering_key_len = self.metering_api_key.expose_secret().len(),
            anthropic_key_len = self.anthropic_api_key().map_or(0, str::len),
            organization_id = self.organization_id.as_deref().unwrap_or("-"),
            product_id = self.product_id.as_deref().unwrap_or("-"),
            aws_region = %self.aws_region,
            aws_profile = self.aws_profile.as_deref().unwrap_or("-"),
            aws_static_credentials = self.has_static_aws_credentials(),
            aws_model_arn_base = self.aws_model_arn_base.as_deref().unwrap_or("-"),
            bedrock_disabled = self.bedrock_disabled,
            log_level = %self.log_level,
            capture_prompts = self.capture_prompts,
            "Metering configuration loaded"
        );
    }
}

/// Builder for [`MeteringConfig`].
///
/// Values set explicitly always win. [`ConfigBuilder::with_env`] only fills
/// fields that are still unset, so it may be called before or after the
/// setters with the same result. Defaults apply last, in
/// [`ConfigBuilder::build`].
#[derive(Debug, Clone, Default)]
pub struct ConfigBuilder {
    metering_api_key: Option<String>,
    metering_base_url: Option<String>,
    anthropic_api_key: Option<String>,
    anthropic_base_url: Option<String>,
    organization_id: Option<String>,
    product_id: Option<String>,
    aws_access_key_id: Option<String>,
    aws_secret_access_key: Option<String>,
    aws_session_token: Option<String>,
    aws_region: Option<String>,
    aws_profile: Option<String>,
    aws_model_arn_base: Option<String>,
    bedrock_disabled: Option<bool>,
    log_level: Option<LogLevel>,
    verbose_startup: Option<bool>,
    capture_prompts: Option<bool>,
    request_timeout: Option<Duration>,
}

impl ConfigBuilder {
    /// Empty builder
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder pre-filled from `.env` files and the process environment
    #[must_use]
    pub fn from_env() -> Self {
        Self::new().with_env()
    }

    /// Load `.env.local` and `.env` from the working directory and its
    /// parent, then fill unset fields from the process environment
    #[must_use]
    pub fn with_env(self) -> Self {
        let loaded = load_env_files();
        if !loaded.is_empty() {
            debug!(files = ?loaded, "Loaded environment files");
        }
        self.with_env_lookup(process_env)
    }

    /// Fill unset fields from an arbitrary variable source.
    ///
    /// `REVENIUM_*` names are read first; the shorter `METERING_*` names
    /// are accepted as aliases.
    #[must_use]
    pub fn with_env_lookup<F>(mut self, lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        fill(&mut self.metering_api_key, || {
            first_of(&lookup, &["REVENIUM_METERING_API_KEY", "METERING_API_KEY"])
        });
        fill(&mut self.metering_base_url, || {
            first_of(&lookup, &["REVENIUM_METERING_BASE_URL", "METERING_BASE_URL"])
        });
        fill(&mut self.organization_id, || {
            first_of(&lookup, &["REVENIUM_ORGANIZATION_ID", "METERING_ORGANIZATION_ID"])
        });
        fill(&mut self.product_id, || {
            first_of(&lookup, &["REVENIUM_PRODUCT_ID", "METERING_PRODUCT_ID"])
        });
        fill(&mut self.anthropic_api_key, || first_of(&lookup, &["ANTHROPIC_API_KEY"]));
        fill(&mut self.anthropic_base_url, || first_of(&lookup, &["ANTHROPIC_BASE_URL"]));
        fill(&mut self.aws_access_key_id, || first_of(&lookup, &["AWS_ACCESS_KEY_ID"]));
        fill(&mut self.aws_secret_access_key, || first_of(&lookup, &["AWS_SECRET_ACCESS_KEY"]));
        fill(&mut self.aws_session_token, || first_of(&lookup, &["AWS_SESSION_TOKEN"]));
        fill(&mut self.aws_region, || first_of(&lookup, &["AWS_REGION"]));
        fill(&mut self.aws_profile, || first_of(&lookup, &["AWS_PROFILE"]));
        fill(&mut self.aws_model_arn_base, || first_of(&lookup, &["AWS_MODEL_ARN_ID"]));
        fill(&mut self.bedrock_disabled, || {
            first_of(&lookup, &["REVENIUM_BEDROCK_DISABLE", "METERING_BEDROCK_DISABLE"])
                .map(|v| env_flag(&v))
        });
        fill(&mut self.verbose_startup, || {
            first_of(&lookup, &["REVENIUM_VERBOSE_STARTUP", "METERING_VERBOSE_STARTUP"])
                .map(|v| env_flag(&v))
        });
        fill(&mut self.capture_prompts, || {
            first_of(&lookup, &["REVENIUM_CAPTURE_PROMPTS", "METERING_CAPTURE_PROMPTS"])
                .map(|v| env_flag(&v))
        });
        fill(&mut self.log_level, || {
            first_of(&lookup, &["REVENIUM_LOG_LEVEL", "METERING_LOG_LEVEL"]).and_then(|v| {
                v.parse::<LogLevel>()
                    .map_err(|e| warn!(error = %e, "Ignoring REVENIUM_LOG_LEVEL"))
                    .ok()
            })
        });
        self
    }

    /// Metering API key (`hak_...`)
    #[must_use]
    pub fn metering_api_key(mut self, key: impl Into<String>) -> Self {
        self.metering_api_key = Some(key.into());
        self
    }

    /// Collector base URL; legacy suffixes are normalized away
    #[must_use]
    pub fn metering_base_url(mut self, url: impl Into<String>) -> Self {
        self.metering_base_url = Some(url.into());
        self
    }

    /// Direct API key
    #[must_use]
    pub fn anthropic_api_key(mut self, key: impl Into<String>) -> Self {
        self.anthropic_api_key = Some(key.into());
        self
    }

    /// Direct API base URL
    #[must_use]
    pub fn anthropic_base_url(mut self, url: impl Into<String>) -> Self {
        self.anthropic_base_url = Some(url.into());
        self
    }

    /// Default organization id
    #[must_use]
    pub fn organization_id(mut self, id: impl Into<String>) -> Self {
        self.organization_id = Some(id.into());
        self
    }

    /// Default product id
    #[must_use]
    pub fn product_id(mut self, id: impl Into<String>) -> Self {
        self.product_id = Some(id.into());
        self
    }

    /// Static AWS keypair
    #[must_use]
    pub fn aws_credentials(
        mut self,
        access_key_id: impl Into<String>,
        secret_access_key: impl Into<String>,
    ) -> Self {
        self.aws_access_key_id = Some(access_key_id.into());
        self.aws_secret_access_key = Some(secret_access_key.into());
        self
    }

    /// AWS session token for temporary credentials
    #[must_use]
    pub fn aws_session_token(mut self, token: impl Into<String>) -> Self {
        self.aws_session_token = Some(token.into());
        self
    }

    /// AWS region
    #[must_use]
    pub fn aws_region(mut self, region: impl Into<String>) -> Self {
        self.aws_region = Some(region.into());
        self
    }

    /// Named AWS profile
    #[must_use]
    pub fn aws_profile(mut self, profile: impl Into<String>) -> Self {
        self.aws_profile = Some(profile.into());
        self
    }

    /// Base ARN for inference-profile model ids
    #[must_use]
    pub fn aws_model_arn_base(mut self, arn: impl Into<String>) -> Self {
        self.aws_model_arn_base = Some(arn.into());
        self
    }

    /// Switch the gateway path off
    #[must_use]
    pub fn bedrock_disabled(mut self, disabled: bool) -> Self {
        self.bedrock_disabled = Some(disabled);
        self
    }

    /// Log verbosity
    #[must_use]
    pub fn log_level(mut self, level: LogLevel) -> Self {
        self.log_level = Some(level);
        self
    }

    /// Log the resolved configuration at startup
    #[must_use]
    pub fn verbose_startup(mut self, verbose: bool) -> Self {
        self.verbose_startup = Some(verbose);
        self
    }

    /// Attach prompts and responses to payloads
    #[must_use]
    pub fn capture_prompts(mut self, capture: bool) -> Self {
        self.capture_prompts = Some(capture);
        self
    }

    /// Collector request timeout
    #[must_use]
    pub fn request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = Some(timeout);
        self
    }

    /// Apply defaults and validate
    pub fn build(self) -> MeterResult<MeteringConfig> {
        let config = self.build_unchecked();
        config.validate()?;
        Ok(config)
    }

    /// Apply defaults without validating
    #[must_use]
    pub fn build_unchecked(self) -> MeteringConfig {
        MeteringConfig {
            metering_api_key: Secret::new(self.metering_api_key.unwrap_or_default()),
            metering_base_url: normalize_base_url(
                self.metering_base_url.as_deref().unwrap_or_default(),
            ),
            anthropic_api_key: self.anthropic_api_key.map(Secret::new),
            anthropic_base_url: self.anthropic_base_url,
            organization_id: self.organization_id,
            product_id: self.product_id,
            aws_access_key_id: self.aws_access_key_id,
            aws_secret_access_key: self.aws_secret_access_key.map(Secret::new),
            aws_session_token: self.aws_session_token.map(Secret::new),
            aws_region: self
                .aws_region
                .unwrap_or_else(|| MeteringConfig::DEFAULT_REGION.to_string()),
            aws_profile: self.aws_profile,
            aws_model_arn_base: self.aws_model_arn_base,
            bedrock_disabled: self.bedrock_disabled.unwrap_or(false),
            log_level: self.log_level.unwrap_or_default(),
            verbose_startup: self.verbose_startup.unwrap_or(false),
            capture_prompts: self.capture_prompts.unwrap_or(false),
            request_timeout: self
                .request_timeout
                .unwrap_or(MeteringConfig::DEFAULT_REQUEST_TIMEOUT),
        }
    }
}

fn first_of<F>(lookup: &F, names: &[&str]) -> Option<String>
where
    F: Fn(&str) -> Option<String>,
{
    names.iter().copied().find_map(lookup)
}

fn fill<T>(slot: &mut Option<T>, source: impl FnOnce() -> Option<T>) {
    if slot.is_none() {
        *slot = source();
    }
}
