//! AWS credential resolution for the gateway provider.

use metering_config::MeteringConfig;
use metering_core::{MeterError, MeterResult};
use secrecy::{ExposeSecret, Secret};
use std::collections::HashMap;
use std::fmt;
use std::path::{Path, PathBuf};
use tracing::debug;

const DEFAULT_PROFILE: &str = "default";

/// Signing credentials
#[derive(Clone)]
pub struct AwsCredentials {
    access_key_id: String,
    secret_access_key: Secret<String>,
    session_token: Option<Secret<String>>,
}

impl fmt::Debug for AwsCredentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AwsCredentials")
            .field("access_key_id", &self.access_key_id)
            .field("secret_access_key", &"[REDACTED]")
            .field("session_token", &self.session_token.as_ref().map(|_| "[REDACTED]"))
            .finish()
    }
}

impl AwsCredentials {
    /// Create credentials from a static keypair
    pub fn new(access_key_id: impl Into<String>, secret_access_key: impl Into<String>) -> Self {
        Self {
            access_key_id: access_key_id.into(),
            secret_access_key: Secret::new(secret_access_key.into()),
            session_token: None,
        }
    }

    /// Attach a session token for temporary credentials
    #[must_use]
    pub fn with_session_token(mut self, token: impl Into<String>) -> Self {
        self.session_token = Some(Secret::new(token.into()));
        self
    }

    /// Access key id
    pub fn access_key_id(&self) -> &str {
        &self.access_key_id
    }

    /// Secret access key
    pub fn secret_access_key(&self) -> &str {
        self.secret_access_key.expose_secret()
    }

    /// Session token, if any
    pub fn session_token(&self) -> Option<&str> {
        self.session_token.as_ref().map(|t| t.expose_secret().as_str())
    }
}

/// Resolves credentials from the metering configuration.
///
/// Order: static keypair from the configuration, then the named profile,
/// then the default chain (environment variables, then the `default`
/// profile of the shared credentials file).
#[derive(Debug, Clone)]
pub struct CredentialResolver {
    credentials_file: Option<PathBuf>,
    env: HashMap<String, String>,
}

impl Default for CredentialResolver {
    fn default() -> Self {
        Self::from_process_env()
    }
}

impl CredentialResolver {
    const ENV_KEYS: [&'static str; 5] = [
        "AWS_ACCESS_KEY_ID",
        "AWS_SECRET_ACCESS_KEY",
        "AWS_SESSION_TOKEN",
        "AWS_SHARED_CREDENTIALS_FILE",
        "HOME",
    ];

    /// Resolver over the process environment
    pub fn from_process_env() -> Self {
        let env = Self::ENV_KEYS
            .iter()
            .filter_map(|k| {
                std::env::var(k)
                    .ok()
                    .filter(|v| !v.is_empty())
                    .map(|v| ((*k).to_string(), v))
            })
            .collect();
        Self {
            credentials_file: None,
            env,
        }
    }

    /// Resolver with no environment and an explicit credentials file
    pub fn with_credentials_file(path: impl Into<PathBuf>) -> Self {
        Self {
            credentials_file: Some(path.into()),
            env: HashMap::new(),
        }
    }

    /// Override an environment value seen by this resolver
    #[must_use]
    pub fn env_var(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.insert(key.into(), value.into());
        self
    }

    /// Resolve credentials for `config`
    pub fn resolve(&self, config: &MeteringConfig) -> MeterResult<AwsCredentials> {
        if let (Some(id), Some(secret)) =
            (config.aws_access_key_id(), config.aws_secret_access_key())
        {
            debug!("Using static AWS credentials");
            let mut creds = AwsCredentials::new(id, secret);
            if let Some(token) = config.aws_session_token() {
                creds = creds.with_session_token(token);
            }
            return Ok(creds);
        }

        if let Some(profile) = config.aws_profile() {
            debug!(profile, "Using AWS profile credentials");
            return self.from_profile(profile);
        }

        if let (Some(id), Some(secret)) = (
            self.env.get("AWS_ACCESS_KEY_ID"),
            self.env.get("AWS_SECRET_ACCESS_KEY"),
        ) {
            debug!("Using AWS credentials from environment");
            let mut creds = AwsCredentials::new(id.as_str(), secret.as_str());
            if let Some(token) = self.env.get("AWS_SESSION_TOKEN") {
                creds = creds.with_session_token(token.as_str());
            }
            return Ok(creds);
        }

        self.from_profile(DEFAULT_PROFILE)
    }

    fn from_profile(&self, profile: &str) -> MeterResult<AwsCredentials> {
        let path = self.credentials_path().ok_or_else(|| {
            MeterError::configuration("AWS shared credentials file location is unknown")
        })?;
        let contents = std::fs::read_to_string(&path).map_err(|e| {
            MeterError::configuration(format!(
                "failed to read AWS credentials file {}: {e}",
                path.display()
            ))
        })?;
        parse_profile(&contents, profile)
    }

    fn credentials_path(&self) -> Option<PathBuf> {
        if let Some(path) = &self.credentials_file {
            return Some(path.clone());
        }
        if let Some(path) = self.env.get("AWS_SHARED_CREDENTIALS_FILE") {
            return Some(PathBuf::from(path));
        }
        self.env
            .get("HOME")
            .map(|home| Path::new(home).join(".aws").join("credentials"))
    }
}

/// Parse one profile out of an INI-style shared credentials file
pub fn parse_profile(contents: &str, profile: &str) -> MeterResult<AwsCredentials> {
    let mut in_section = false;
    let mut values: HashMap<&str, &str> = HashMap::new();

    for line in contents.lines() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') || line.starts_with(';') {
            continue;
        }
        if let Some(section) = line.strip_prefix('[').and_then(|l| l.strip_suffix(']')) {
            let section = section.trim();
            let section = section.strip_prefix("profile ").unwrap_or(section).trim();
            in_section = section == profile;
            continue;
        }
        if !in_section {
            continue;
        }
        if let Some((key, value)) = line.split_once('=') {
            values.insert(key.trim(), value.trim());
        }
    }

    let (Some(id), Some(secret)) = (
        values.get("aws_access_key_id"),
        values.get("aws_secret_access_key"),
    ) else {
        return Err(MeterError::configuration(format!(
            "AWS profile '{profile}' has no access key pair"
        )));
    };

    let mut creds = AwsCredentials::new(*id, *secret);
    if let Some(token) = values.get("aws_session_token") {
        creds = creds.with_session_token(*token);
    }
    Ok(creds)
}
