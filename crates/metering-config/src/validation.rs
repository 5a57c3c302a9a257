//! Validation of configured values.

use metering_core::{MeterError, MeterResult};
use once_cell::sync::Lazy;
use regex::Regex;

/// Prefix every metering API key carries
pub const API_KEY_PREFIX: &str = "hak_";

static BASE_ARN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^arn:aws:bedrock:[a-z]{2}-[a-z]+-\d+:\d{12}$").unwrap());

const ARN_FORMAT: &str = "arn:aws:bedrock:{region}:{account-id}";

/// Check the metering API key shape
pub fn validate_api_key(key: &str) -> MeterResult<()> {
    if key.is_empty() {
        return Err(MeterError::configuration("REVENIUM_METERING_API_KEY is required"));
    }
    if !key.starts_with(API_KEY_PREFIX) {
        return Err(MeterError::configuration(format!(
            "invalid metering API key format: expected prefix '{API_KEY_PREFIX}'"
        )));
    }
    Ok(())
}

/// Check that a base ARN has the form `arn:aws:bedrock:{region}:{account-id}`.
///
/// The error distinguishes values that are too long (a full model or
/// inference-profile ARN), too short, or otherwise malformed.
pub fn validate_base_arn(arn: &str) -> MeterResult<()> {
    if arn.is_empty() {
        return Err(MeterError::configuration("AWS_MODEL_ARN_ID is empty"));
    }
    if BASE_ARN.is_match(arn) {
        return Ok(());
    }

    let message = if arn.contains("inference-profile") || arn.contains("anthropic") {
        format!("AWS_MODEL_ARN_ID is too long. Expected format: {ARN_FORMAT}, got: {arn}")
    } else if arn.split(':').count() < 5 {
        format!("AWS_MODEL_ARN_ID is too short. Expected format: {ARN_FORMAT}, got: {arn}")
    } else {
        format!("AWS_MODEL_ARN_ID has incorrect format. Expected: {ARN_FORMAT}, got: {arn}")
    };
    Err(MeterError::configuration(message))
}
