//! # AWS Bedrock Provider
//!
//! Cloud-gateway provider for Claude models hosted on AWS Bedrock.
//!
//! Requests are transformed into the Bedrock Messages envelope and signed
//! with AWS Signature Version 4. Streaming responses arrive in the binary
//! event-stream framing; see [`crate::eventstream`].
//!
//! ## Example
//!
//! ```rust,ignore
//! use metering_providers::bedrock::{BedrockConfig, BedrockProvider};
//! use metering_providers::AwsCredentials;
//!
//! let config = BedrockConfig::builder()
//!     .region("us-east-1")
//!     .credentials(AwsCredentials::new("AKIA...", "..."))
//!     .build()?;
//!
//! let provider = BedrockProvider::new(config)?;
//! ```

use crate::credentials::{AwsCredentials, CredentialResolver};
use crate::eventstream::decode_event_stream;
use crate::http::{cancellable, error_from_body, with_cancellation};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use metering_config::MeteringConfig;
use metering_core::{
    CompletionProvider, EventStream, MeterError, MeterResult, MessageRequest, MessageResponse,
    ProviderKind, ResponseBlock, Usage,
};
use reqwest::Client;
use serde::Deserialize;
use serde_json::{json, Value};
use std::collections::BTreeMap;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, instrument};

/// Protocol tag required in every request body
pub const BEDROCK_ANTHROPIC_VERSION: &str = "bedrock-2023-05-31";

const PROVIDER: &str = "bedrock";
const SERVICE: &str = "bedrock";
const ALGORITHM: &str = "AWS4-HMAC-SHA256";

/// AWS Bedrock configuration
#[derive(Debug, Clone)]
pub struct BedrockConfig {
    /// AWS region (e.g., "us-east-1")
    pub region: String,
    /// Signing credentials
    pub credentials: AwsCredentials,
    /// Custom endpoint URL (for testing/VPC endpoints)
    pub endpoint_url: Option<String>,
    /// Request timeout
    pub timeout: Duration,
}

impl BedrockConfig {
    /// Create a new builder
    #[must_use]
    pub fn builder() -> BedrockConfigBuilder {
        BedrockConfigBuilder::default()
    }

    /// Resolve credentials and region from the metering configuration
    pub fn from_metering_config(
        config: &MeteringConfig,
        resolver: &CredentialResolver,
    ) -> MeterResult<Self> {
        let credentials = resolver.resolve(config)?;
        Self::builder()
            .region(config.aws_region())
            .credentials(credentials)
            .build()
    }

    /// Get the Bedrock service endpoint
    pub fn base_url(&self) -> String {
        self.endpoint_url.as_deref().map_or_else(
            || format!("https://bedrock-runtime.{}.amazonaws.com", self.region),
            |url| url.trim_end_matches('/').to_string(),
        )
    }
}

/// Builder for `BedrockConfig`
#[derive(Debug, Default)]
pub struct BedrockConfigBuilder {
    region: Option<String>,
    credentials: Option<AwsCredentials>,
    endpoint_url: Option<String>,
    timeout: Option<Duration>,
}

impl BedrockConfigBuilder {
    /// Set the AWS region
    #[must_use]
    pub fn region(mut self, region: impl Into<String>) -> Self {
        self.region = Some(region.into());
        self
    }

    /// Set the signing credentials
    #[must_use]
    pub fn credentials(mut self, credentials: AwsCredentials) -> Self {
        self.credentials = Some(credentials);
        self
    }

    /// Set custom endpoint URL
    #[must_use]
    pub fn endpoint_url(mut self, url: impl Into<String>) -> Self {
        self.endpoint_url = Some(url.into());
        self
    }

    /// Set request timeout
    #[must_use]
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Build the configuration
    pub fn build(self) -> MeterResult<BedrockConfig> {
        let credentials = self
            .credentials
            .ok_or_else(|| MeterError::configuration("AWS credentials not configured"))?;
        Ok(BedrockConfig {
            region: self
                .region
                .unwrap_or_else(|| MeteringConfig::DEFAULT_REGION.to_string()),
            credentials,
            endpoint_url: self.endpoint_url,
            timeout: self.timeout.unwrap_or(Duration::from_secs(300)),
        })
    }
}

/// AWS Bedrock provider
pub struct BedrockProvider {
    config: BedrockConfig,
    client: Client,
    base_url: String,
}

impl std::fmt::Debug for BedrockProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BedrockProvider")
            .field("region", &self.config.region)
            .field("base_url", &self.base_url)
            .finish()
    }
}

impl BedrockProvider {
    /// Create a new Bedrock provider
    pub fn new(config: BedrockConfig) -> MeterResult<Self> {
        let client = Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| MeterError::internal(format!("Failed to create HTTP client: {e}")))?;
        let base_url = config.base_url();
        Ok(Self {
            config,
            client,
            base_url,
        })
    }

    /// Get the invoke URL for a model
    fn invoke_url(&self, model_id: &str) -> String {
        format!("{}/model/{}/invoke", self.base_url, encode_segment(model_id))
    }

    /// Get the invoke-with-response-stream URL for a model
    fn stream_url(&self, model_id: &str) -> String {
        format!(
            "{}/model/{}/invoke-with-response-stream",
            self.base_url,
            encode_segment(model_id)
        )
    }

    /// Sign and send a request; non-2xx responses become provider errors
    async fn send(&self, url: &str, accept: &str, body: Vec<u8>) -> MeterResult<reqwest::Response> {
        let mut headers = BTreeMap::new();
        headers.insert("content-type".to_string(), "application/json".to_string());
        headers.insert("accept".to_string(), accept.to_string());
        self.sign_request("POST", url, &body, &mut headers, Utc::now())?;

        let mut req_builder = self.client.post(url);
        for (key, value) in &headers {
            if key != "host" {
                req_builder = req_builder.header(key, value);
            }
        }

        let response = req_builder.body(body).send().await.map_err(|e| {
            MeterError::provider(PROVIDER, format!("Request failed: {e}"), None, true)
        })?;

        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let error_type = response
            .headers()
            .get("x-amzn-errortype")
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.split(':').next())
            .map(ToString::to_string);
        let bytes = response.bytes().await.unwrap_or_default();
        Err(error_from_body(
            PROVIDER,
            status.as_u16(),
            error_type.as_deref(),
            &bytes,
        ))
    }

    /// Sign a request with AWS Signature Version 4
    fn sign_request(
        &self,
        method: &str,
        uri: &str,
        body: &[u8],
        headers: &mut BTreeMap<String, String>,
        now: DateTime<Utc>,
    ) -> MeterResult<()> {
        let credentials = &self.config.credentials;
        let amz_date = now.format("%Y%m%dT%H%M%SZ").to_string();
        let date_stamp = now.format("%Y%m%d").to_string();
        let region = &self.config.region;

        let parsed = url::Url::parse(uri)
            .map_err(|e| MeterError::internal(format!("Invalid URL: {e}")))?;
        let host = parsed
            .host_str()
            .ok_or_else(|| MeterError::internal("URL has no host"))?;
        let host = match parsed.port() {
            Some(port) => format!("{host}:{port}"),
            None => host.to_string(),
        };
        let canonical_uri = parsed
            .path()
            .split('/')
            .map(encode_segment)
            .collect::<Vec<_>>()
            .join("/");

        let payload_hash = hex::encode(sha256_hash(body));

        headers.insert("host".to_string(), host);
        headers.insert("x-amz-date".to_string(), amz_date.clone());
        headers.insert("x-amz-content-sha256".to_string(), payload_hash.clone());
        if let Some(token) = credentials.session_token() {
            headers.insert("x-amz-security-token".to_string(), token.to_string());
        }

        let signed_headers = headers.keys().cloned().collect::<Vec<_>>().join(";");
        let canonical_headers: String = headers
            .iter()
            .map(|(k, v)| format!("{k}:{}\n", v.trim()))
            .collect();

        let canonical_request = format!(
            "{method}\n{canonical_uri}\n\n{canonical_headers}\n{signed_headers}\n{payload_hash}"
        );

        let credential_scope = format!("{date_stamp}/{region}/{SERVICE}/aws4_request");
        let string_to_sign = format!(
            "{ALGORITHM}\n{amz_date}\n{credential_scope}\n{}",
            hex::encode(sha256_hash(canonical_request.as_bytes()))
        );

        let k_date = hmac_sha256(
            format!("AWS4{}", credentials.secret_access_key()).as_bytes(),
            date_stamp.as_bytes(),
        )?;
        let k_region = hmac_sha256(&k_date, region.as_bytes())?;
        let k_service = hmac_sha256(&k_region, SERVICE.as_bytes())?;
        let k_signing = hmac_sha256(&k_service, b"aws4_request")?;
        let signature = hex::encode(hmac_sha256(&k_signing, string_to_sign.as_bytes())?);

        headers.insert(
            "authorization".to_string(),
            format!(
                "{ALGORITHM} Credential={}/{credential_scope}, SignedHeaders={signed_headers}, Signature={signature}",
                credentials.access_key_id()
            ),
        );
        Ok(())
    }
}

#[async_trait]
impl CompletionProvider for BedrockProvider {
    fn kind(&self) -> ProviderKind {
        ProviderKind::Bedrock
    }

    #[instrument(skip(self, request, cancel), fields(model = %request.model))]
    async fn create_message(
        &self,
        request: &MessageRequest,
        cancel: &CancellationToken,
    ) -> MeterResult<MessageResponse> {
        let body = serde_json::to_vec(&transform_request(request))?;
        let url = self.invoke_url(&request.model);

        debug!("Sending request to Bedrock");
        cancellable(cancel, async {
            let response = self.send(&url, "application/json", body).await?;
            let bytes = response.bytes().await.map_err(|e| {
                MeterError::provider(PROVIDER, format!("Failed to read response: {e}"), None, true)
            })?;
            let parsed: BedrockClaudeResponse = serde_json::from_slice(&bytes).map_err(|e| {
                MeterError::provider(
                    PROVIDER,
                    format!("Failed to parse Claude response: {e}"),
                    None,
                    false,
                )
            })?;
            Ok(parsed.into_message_response(&request.model))
        })
        .await
    }

    #[instrument(skip(self, request, cancel), fields(model = %request.model))]
    async fn create_message_stream(
        &self,
        request: &MessageRequest,
        cancel: &CancellationToken,
    ) -> MeterResult<EventStream> {
        let body = serde_json::to_vec(&transform_request(request))?;
        let url = self.stream_url(&request.model);

        debug!("Starting streaming request to Bedrock");
        let response = cancellable(
            cancel,
            self.send(&url, "application/vnd.amazon.eventstream", body),
        )
        .await?;
        let events = decode_event_stream(response.bytes_stream());
        Ok(with_cancellation(events, cancel.clone()))
    }
}

/// Build the Bedrock Messages body from a direct-API request.
///
/// Content is always sent as a block list; an empty message becomes a single
/// empty text block.
pub fn transform_request(request: &MessageRequest) -> Value {
    let messages: Vec<Value> = request
        .messages
        .iter()
        .map(|msg| {
            let blocks = msg.blocks();
            let content = if blocks.is_empty() {
                json!([{ "type": "text", "text": "" }])
            } else {
                json!(blocks)
            };
            json!({ "role": msg.role.as_str(), "content": content })
        })
        .collect();

    let mut body = json!({
        "anthropic_version": BEDROCK_ANTHROPIC_VERSION,
        "max_tokens": request.max_tokens,
        "messages": messages,
    });

    if !request.stop_sequences.is_empty() {
        body["stop_sequences"] = json!(request.stop_sequences);
    }
    if let Some(system) = &request.system {
        body["system"] = json!(system);
    }
    if let Some(temperature) = request.temperature {
        body["temperature"] = json!(temperature);
    }
    if let Some(top_p) = request.top_p {
        body["top_p"] = json!(top_p);
    }
    if let Some(top_k) = request.top_k {
        body["top_k"] = json!(top_k);
    }
    body
}

/// Remap gateway stop-reason spellings before canonicalization
#[must_use]
pub fn bridge_stop_reason(raw: Option<&str>) -> &'static str {
    match raw {
        Some("max_tokens") => "max_tokens",
        Some("stop_sequence") => "stop_sequence",
        _ => "end_turn",
    }
}

/// Bedrock Claude response format
#[derive(Debug, Deserialize)]
struct BedrockClaudeResponse {
    #[serde(default)]
    id: Option<String>,
    #[serde(default)]
    model: Option<String>,
    #[serde(default)]
    content: Vec<ResponseBlock>,
    #[serde(default)]
    stop_reason: Option<String>,
    #[serde(default)]
    stop_sequence: Option<String>,
    #[serde(default)]
    usage: Usage,
}

impl BedrockClaudeResponse {
    fn into_message_response(self, requested_model: &str) -> MessageResponse {
        MessageResponse {
            id: self.id.unwrap_or_default(),
            response_type: "message".to_string(),
            role: "assistant".to_string(),
            model: self.model.unwrap_or_else(|| requested_model.to_string()),
            content: self.content,
            stop_reason: Some(bridge_stop_reason(self.stop_reason.as_deref()).to_string()),
            stop_sequence: self.stop_sequence,
            usage: self.usage,
        }
    }
}

/// Percent-encode everything outside the unreserved set
fn encode_segment(segment: &str) -> String {
    let mut out = String::with_capacity(segment.len());
    for byte in segment.bytes() {
        if byte.is_ascii_alphanumeric() || matches!(byte, b'-' | b'_' | b'.' | b'~') {
            out.push(byte as char);
        } else {
            out.push_str(&format!("%{byte:02X}"));
        }
    }
    out
}

/// Calculate SHA-256 hash
fn sha256_hash(data: &[u8]) -> [u8; 32] {
    use sha2::{Digest, Sha256};
    let mut hasher = Sha256::new();
    hasher.update(data);
    hasher.finalize().into()
}

/// Calculate HMAC-SHA256
fn hmac_sha256(key: &[u8], data: &[u8]) -> MeterResult<[u8; 32]> {
    use hmac::{Hmac, Mac};
    use sha2::Sha256;

    type HmacSha256 = Hmac<Sha256>;
    let mut mac = HmacSha256::new_from_slice(key)
        .map_err(|e| MeterError::internal(format!("HMAC key rejected: {e}")))?;
    mac.update(data);
    Ok(mac.finalize().into_bytes().into())
}
