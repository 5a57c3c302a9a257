//! Collector base URL handling.

/// Origin used when no collector URL is configured
pub const DEFAULT_BASE_URL: &str = "https://api.revenium.ai";

/// Path of the completions endpoint, appended to the normalized origin
pub const METERING_PATH: &str = "/meter/v2/ai/completions";

const LEGACY_SUFFIXES: &[&str] = &["/meter/v2", "/meter", "/v2"];

/// Reduce a configured collector URL to a bare origin.
///
/// One trailing slash is removed, then at most one legacy suffix
/// (`/meter/v2`, `/meter` or `/v2`). Empty input yields
/// [`DEFAULT_BASE_URL`].
#[must_use]
pub fn normalize_base_url(base_url: &str) -> String {
    let trimmed = base_url.trim();
    if trimmed.is_empty() {
        return DEFAULT_BASE_URL.to_string();
    }

    let url = trimmed.strip_suffix('/').unwrap_or(trimmed);
    LEGACY_SUFFIXES
        .iter()
        .find_map(|suffix| url.strip_suffix(suffix))
        .unwrap_or(url)
        .to_string()
}

/// Full endpoint URL for a normalized origin
#[must_use]
pub fn metering_endpoint(base_url: &str) -> String {
    format!("{}{METERING_PATH}", normalize_base_url(base_url))
}
