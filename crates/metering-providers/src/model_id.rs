//! Model identifier conversion between direct-API names and gateway ids.
//!
//! Gateway addressing comes in three shapes:
//! - foundation model ids: `anthropic.claude-3-haiku-20240307-v1:0`
//! - cross-region profile ids: `us.anthropic.claude-3-haiku-20240307-v1:0`
//! - full ARNs: `arn:aws:bedrock:us-east-1:123456789012:inference-profile/us.anthropic.claude-3-haiku-20240307-v1:0`

use metering_config::validate_base_arn;
use metering_core::{MeterError, MeterResult};
use once_cell::sync::Lazy;
use regex::Regex;
use tracing::warn;

const ARN_PREFIX: &str = "arn:aws:bedrock";
const MODEL_PREFIX: &str = "anthropic.";

static REGION_PREFIX: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^(?:[a-z]{2,6}\.)?anthropic\.").unwrap());
static VERSION_SUFFIX: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?:-v\d+(?::\d+)?|:\d+)$").unwrap());

/// Whether `model` is already a plain direct-API name
#[must_use]
pub fn is_direct_model(model: &str) -> bool {
    !model.contains(ARN_PREFIX)
        && !model.contains("inference-profile")
        && !REGION_PREFIX.is_match(model)
}

/// Build `{base}:inference-profile/us.anthropic.{model}-v1:0`
pub fn construct_full_arn(arn_base: &str, model: &str) -> MeterResult<String> {
    validate_base_arn(arn_base)?;
    if model.is_empty() {
        return Err(MeterError::validation(
            "model name is required to construct full Bedrock ARN",
        ));
    }
    Ok(format!("{arn_base}:inference-profile/us.anthropic.{model}-v1:0"))
}

/// Convert a direct-API model name to gateway addressing.
///
/// Full ARNs pass through. With a base ARN the inference-profile ARN is
/// built; if that fails the foundation-model form is used instead.
#[must_use]
pub fn to_gateway_model(model: &str, arn_base: Option<&str>) -> String {
    if model.starts_with(ARN_PREFIX) {
        return model.to_string();
    }

    if let Some(base) = arn_base.filter(|b| !b.is_empty()) {
        match construct_full_arn(base, model) {
            Ok(arn) => return arn,
            Err(e) => warn!(error = %e, "Failed to construct Bedrock ARN, using standard format"),
        }
    }

    if REGION_PREFIX.is_match(model) {
        return model.to_string();
    }
    format!("{MODEL_PREFIX}{model}")
}

/// Convert any gateway identifier back to the plain direct-API name.
///
/// Plain names pass through unchanged. Input that looks like gateway
/// addressing but cannot be reduced to a name is an error.
pub fn to_direct_model(model: &str) -> MeterResult<String> {
    if is_direct_model(model) {
        return Ok(model.to_string());
    }

    let resource = if model.contains(ARN_PREFIX) {
        match model.rsplit_once('/') {
            Some((_, last)) => last,
            None => return Err(unparseable(model)),
        }
    } else {
        model
    };

    if !REGION_PREFIX.is_match(resource) {
        return Err(unparseable(model));
    }
    let name = REGION_PREFIX.replace(resource, "");
    let name = VERSION_SUFFIX.replace(&name, "");
    if name.is_empty() {
        return Err(unparseable(model));
    }
    Ok(name.into_owned())
}

fn unparseable(model: &str) -> MeterError {
    MeterError::validation(format!(
        "could not parse Bedrock model ID '{model}': unrecognized format"
    ))
}
