//! Direct API provider.
//!
//! Requests are sent to `{base}/v1/messages` as-is; the request types
//! already follow the Messages API shape.

use crate::http::{cancellable, error_from_body, with_cancellation};
use crate::sse::parse_sse_stream;
use async_trait::async_trait;
use metering_config::MeteringConfig;
use metering_core::{
    CompletionProvider, EventStream, MeterError, MeterResult, MessageRequest, MessageResponse,
    ProviderKind,
};
use reqwest::Client;
use secrecy::{ExposeSecret, Secret};
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, instrument};

/// Default direct API origin
pub const DEFAULT_BASE_URL: &str = "https://api.anthropic.com";
/// Messages API version header value
pub const API_VERSION: &str = "2023-06-01";

const PROVIDER: &str = "anthropic";

/// Direct API configuration
#[derive(Debug, Clone)]
pub struct AnthropicConfig {
    /// API key
    pub api_key: Secret<String>,
    /// API origin
    pub base_url: String,
    /// Request timeout
    pub timeout: Duration,
}

impl AnthropicConfig {
    /// Create a configuration with the default origin
    #[must_use]
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            api_key: Secret::new(api_key.into()),
            base_url: DEFAULT_BASE_URL.to_string(),
            timeout: Duration::from_secs(600),
        }
    }

    /// Set the API origin
    #[must_use]
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }

    /// Set the request timeout
    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Derive from the metering configuration.
    ///
    /// A gateway URL in `ANTHROPIC_BASE_URL` only steers provider selection
    /// and is not used as the direct origin.
    pub fn from_metering_config(config: &MeteringConfig) -> MeterResult<Self> {
        let key = config
            .anthropic_api_key()
            .ok_or_else(|| MeterError::configuration("ANTHROPIC_API_KEY is required"))?;
        let mut direct = Self::new(key);
        if let Some(base) = config
            .anthropic_base_url()
            .filter(|b| !b.contains("amazonaws.com"))
        {
            direct = direct.with_base_url(base);
        }
        Ok(direct)
    }

    fn messages_url(&self) -> String {
        format!("{}/v1/messages", self.base_url)
    }
}

/// Direct API provider
pub struct AnthropicProvider {
    config: AnthropicConfig,
    client: Client,
}

impl std::fmt::Debug for AnthropicProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AnthropicProvider")
            .field("base_url", &self.config.base_url)
            .finish()
    }
}

impl AnthropicProvider {
    /// Create a provider
    pub fn new(config: AnthropicConfig) -> MeterResult<Self> {
        let client = Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| MeterError::internal(format!("Failed to create HTTP client: {e}")))?;
        Ok(Self { config, client })
    }

    /// API origin in use
    pub fn base_url(&self) -> &str {
        &self.config.base_url
    }

    async fn send(&self, body: &MessageRequest) -> MeterResult<reqwest::Response> {
        let response = self
            .client
            .post(self.config.messages_url())
            .header("x-api-key", self.config.api_key.expose_secret())
            .header("anthropic-version", API_VERSION)
            .header("content-type", "application/json")
            .json(body)
            .send()
            .await
            .map_err(|e| {
                MeterError::provider(PROVIDER, format!("Request failed: {e}"), None, true)
            })?;

        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let bytes = response.bytes().await.unwrap_or_default();
        Err(error_from_body(PROVIDER, status.as_u16(), None, &bytes))
    }
}

#[async_trait]
impl CompletionProvider for AnthropicProvider {
    fn kind(&self) -> ProviderKind {
        ProviderKind::Anthropic
    }

    #[instrument(skip(self, request, cancel), fields(model = %request.model))]
    async fn create_message(
        &self,
        request: &MessageRequest,
        cancel: &CancellationToken,
    ) -> MeterResult<MessageResponse> {
        let mut body = request.clone();
        body.stream = false;

        debug!("Sending request to Anthropic");
        cancellable(cancel, async {
            let response = self.send(&body).await?;
            response.json::<MessageResponse>().await.map_err(|e| {
                MeterError::provider(PROVIDER, format!("Failed to parse response: {e}"), None, false)
            })
        })
        .await
    }

    #[instrument(skip(self, request, cancel), fields(model = %request.model))]
    async fn create_message_stream(
        &self,
        request: &MessageRequest,
        cancel: &CancellationToken,
    ) -> MeterResult<EventStream> {
        let mut body = request.clone();
        body.stream = true;

        debug!("Starting streaming request to Anthropic");
        let response = cancellable(cancel, self.send(&body)).await?;
        let events = parse_sse_stream(response.bytes_stream());
        Ok(with_cancellation(events, cancel.clone()))
    }
}
