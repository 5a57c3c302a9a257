//! Mock upstream servers for integration testing
//!
//! Wiremock-based stand-ins for the Anthropic Messages API, the Bedrock
//! runtime and the metering collector.

use crate::fixtures::*;
use serde_json::{json, Value};
use std::time::Duration;
use wiremock::matchers::{body_partial_json, header, header_exists, method, path, path_regex};
use wiremock::{Mock, MockServer, ResponseTemplate};

/// Mock Anthropic API server
pub struct MockAnthropic {
    pub server: MockServer,
}

impl MockAnthropic {
    /// Create a new mock Anthropic server
    pub async fn new() -> Self {
        Self {
            server: MockServer::start().await,
        }
    }

    /// Get the base URL for this mock server
    pub fn url(&self) -> String {
        self.server.uri()
    }

    /// Number of requests received
    pub async fn calls(&self) -> usize {
        self.requests().await.len()
    }

    /// Bodies of every request received
    pub async fn requests(&self) -> Vec<Value> {
        received_json(&self.server).await
    }

    /// Setup a successful message response
    pub async fn mock_messages(&self, model: &str, text: &str, usage: (u64, u64)) {
        Mock::given(method("POST"))
            .and(path("/v1/messages"))
            .and(header("x-api-key", "sk-ant-test"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(message_response(model, text, usage.0, usage.1)),
            )
            .mount(&self.server)
            .await;
    }

    /// Setup a message response that arrives after a delay
    pub async fn mock_messages_delayed(&self, model: &str, text: &str, delay: Duration) {
        Mock::given(method("POST"))
            .and(path("/v1/messages"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(message_response(model, text, 10, 5))
                    .set_delay(delay),
            )
            .mount(&self.server)
            .await;
    }

    /// Setup a streaming response
    pub async fn mock_streaming_response(
        &self,
        model: &str,
        chunks: &[&str],
        usage: Option<(u64, u64)>,
    ) {
        Mock::given(method("POST"))
            .and(path("/v1/messages"))
            .and(body_partial_json(json!({"stream": true})))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_string(sse_body(model, chunks, usage))
                    .append_header("Content-Type", "text/event-stream"),
            )
            .mount(&self.server)
            .await;
    }

    /// Setup a streaming response that fails part-way with an `error` event
    pub async fn mock_streaming_error(&self, model: &str, chunk: &str, error_type: &str) {
        Mock::given(method("POST"))
            .and(path("/v1/messages"))
            .and(body_partial_json(json!({"stream": true})))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_string(sse_error_body(model, chunk, error_type))
                    .append_header("Content-Type", "text/event-stream"),
            )
            .mount(&self.server)
            .await;
    }

    /// Setup an authentication error response
    pub async fn mock_auth_error(&self) {
        Mock::given(method("POST"))
            .and(path("/v1/messages"))
            .respond_with(ResponseTemplate::new(401).set_body_json(anthropic_error(
                "authentication_error",
                "invalid x-api-key",
            )))
            .mount(&self.server)
            .await;
    }
}

/// Mock Bedrock runtime server
pub struct MockBedrock {
    pub server: MockServer,
}

impl MockBedrock {
    /// Create a new mock Bedrock server
    pub async fn new() -> Self {
        Self {
            server: MockServer::start().await,
        }
    }

    /// Get the base URL for this mock server
    pub fn url(&self) -> String {
        self.server.uri()
    }

    /// Number of requests received
    pub async fn calls(&self) -> usize {
        self.server
            .received_requests()
            .await
            .unwrap_or_default()
            .len()
    }

    /// Paths of every request received
    pub async fn paths(&self) -> Vec<String> {
        self.server
            .received_requests()
            .await
            .unwrap_or_default()
            .iter()
            .map(|r| r.url.path().to_string())
            .collect()
    }

    /// Setup a successful invoke response
    pub async fn mock_invoke(&self, text: &str, usage: (u64, u64)) {
        Mock::given(method("POST"))
            .and(path_regex(r"^/model/.+/invoke$"))
            .and(header_exists("authorization"))
            .and(header_exists("x-amz-date"))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(bedrock_response(text, usage.0, usage.1)),
            )
            .mount(&self.server)
            .await;
    }

    /// Setup an invoke endpoint that always answers with `status`
    pub async fn mock_invoke_error(&self, status: u16, message: &str) {
        Mock::given(method("POST"))
            .and(path_regex(r"^/model/.+/invoke"))
            .respond_with(ResponseTemplate::new(status).set_body_json(bedrock_error(message)))
            .mount(&self.server)
            .await;
    }

    /// Setup an invoke endpoint that fails `fail_count` times then succeeds
    pub async fn mock_flaky_invoke(&self, fail_count: u64, text: &str) {
        Mock::given(method("POST"))
            .and(path_regex(r"^/model/.+/invoke$"))
            .respond_with(
                ResponseTemplate::new(503).set_body_json(bedrock_error("ServiceUnavailableException")),
            )
            .up_to_n_times(fail_count)
            .mount(&self.server)
            .await;

        Mock::given(method("POST"))
            .and(path_regex(r"^/model/.+/invoke$"))
            .respond_with(ResponseTemplate::new(200).set_body_json(bedrock_response(text, 12, 6)))
            .mount(&self.server)
            .await;
    }
}

/// Mock metering collector
pub struct MockCollector {
    pub server: MockServer,
}

impl MockCollector {
    /// Create a new mock collector
    pub async fn new() -> Self {
        Self {
            server: MockServer::start().await,
        }
    }

    /// Get the base URL for this mock server
    pub fn url(&self) -> String {
        self.server.uri()
    }

    /// Accept every payload
    pub async fn mock_accept(&self) {
        self.mock_status(201).await;
    }

    /// Answer every payload with `status`
    pub async fn mock_status(&self, status: u16) {
        Mock::given(method("POST"))
            .and(path("/meter/v2/ai/completions"))
            .and(header("x-api-key", TEST_METERING_KEY))
            .respond_with(ResponseTemplate::new(status).set_body_json(json!({"id": "ack"})))
            .mount(&self.server)
            .await;
    }

    /// Fail `fail_count` payloads with `status`, then accept
    pub async fn mock_flaky(&self, status: u16, fail_count: u64) {
        Mock::given(method("POST"))
            .and(path("/meter/v2/ai/completions"))
            .respond_with(ResponseTemplate::new(status))
            .up_to_n_times(fail_count)
            .mount(&self.server)
            .await;
        self.mock_accept().await;
    }

    /// Every payload received, including retried ones
    pub async fn payloads(&self) -> Vec<Value> {
        received_json(&self.server).await
    }

    /// The single payload received
    pub async fn only_payload(&self) -> Value {
        let payloads = self.payloads().await;
        assert_eq!(payloads.len(), 1, "expected one payload, got {payloads:?}");
        payloads.into_iter().next().unwrap()
    }
}

async fn received_json(server: &MockServer) -> Vec<Value> {
    server
        .received_requests()
        .await
        .unwrap_or_default()
        .iter()
        .map(|r| serde_json::from_slice(&r.body).unwrap_or(Value::Null))
        .collect()
}
