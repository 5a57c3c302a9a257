//! Metered call tests
//!
//! Plain calls against the mock direct API, checking the payload the
//! collector receives.

use crate::fixtures::*;
use crate::helpers::*;
use llm_metering::{CallContext, MeterError, UsageMetadata};
use pretty_assertions::assert_eq;
use serde_json::json;
use std::time::Duration;
use wiremock::matchers::{method, path};
use wiremock::{Mock, ResponseTemplate};

#[tokio::test]
async fn test_call_produces_payload() {
    let harness = TestHarness::start().await;
    harness.anthropic.mock_messages(TEST_MODEL, "Hi there", (12, 7)).await;
    harness.collector.mock_accept().await;

    let client = harness.direct_client();
    let ctx = CallContext::new().with_metadata(
        UsageMetadata::new()
            .task_type("greeting")
            .agent("support-bot")
            .trace_id("trace-123")
            .subscriber(json!({"id": "user-1", "email": "user@example.com"})),
    );
    let response = client
        .create_message(simple_request(TEST_MODEL), ctx)
        .await
        .expect("call succeeds");
    assert_eq!(response.text(), "Hi there");

    client.flush().await;
    let payload = harness.collector.only_payload().await;

    assert_eq!(payload["stopReason"], "END");
    assert_eq!(payload["costType"], "AI");
    assert_eq!(payload["isStreamed"], false);
    assert_eq!(payload["operationType"], "CHAT");
    assert_eq!(payload["inputTokenCount"], 12);
    assert_eq!(payload["outputTokenCount"], 7);
    assert_eq!(payload["totalTokenCount"], 19);
    assert_eq!(payload["reasoningTokenCount"], 0);
    assert_eq!(payload["cacheCreationTokenCount"], 0);
    assert_eq!(payload["cacheReadTokenCount"], 0);
    assert_eq!(payload["model"], TEST_MODEL);
    assert_eq!(payload["provider"], "Anthropic");
    assert_eq!(payload["middlewareSource"], "llm-metering-rust");
    assert_eq!(payload["timeToFirstToken"], 0);
    assert_eq!(payload["taskType"], "greeting");
    assert_eq!(payload["agent"], "support-bot");
    assert_eq!(payload["traceId"], "trace-123");
    assert_eq!(payload["subscriber"]["email"], "user@example.com");

    assert!(!payload["transactionId"].as_str().unwrap().is_empty());
    for key in ["requestTime", "responseTime", "completionStartTime"] {
        assert!(payload[key].as_str().unwrap().ends_with('Z'), "{key}");
    }
    assert!(payload.get("hasVisionContent").is_none());
    assert!(payload.get("systemPrompt").is_none());
}

#[tokio::test]
async fn test_reserved_metadata_keys_ignored() {
    let harness = TestHarness::start().await;
    harness.anthropic.mock_messages(TEST_MODEL, "ok", (12, 7)).await;
    harness.collector.mock_accept().await;

    let client = harness.direct_client();
    let metadata = UsageMetadata::new()
        .insert("inputTokenCount", 9999)
        .insert("provider", "Other")
        .insert("isStreamed", true)
        .insert("customerTier", "gold")
        .transaction_id("txn-fixed");
    client
        .create_message(simple_request(TEST_MODEL), metadata.into())
        .await
        .unwrap();

    client.flush().await;
    let payload = harness.collector.only_payload().await;
    assert_eq!(payload["inputTokenCount"], 12);
    assert_eq!(payload["provider"], "Anthropic");
    assert_eq!(payload["isStreamed"], false);
    assert_eq!(payload["customerTier"], "gold");
    assert_eq!(payload["transactionId"], "txn-fixed");
}

#[tokio::test]
async fn test_error_reason_forces_error_stop() {
    let harness = TestHarness::start().await;
    harness.anthropic.mock_messages(TEST_MODEL, "ok", (3, 2)).await;
    harness.collector.mock_accept().await;

    let client = harness.direct_client();
    let metadata = UsageMetadata::new().error_reason("downstream validation failed");
    client
        .create_message(simple_request(TEST_MODEL), metadata.into())
        .await
        .unwrap();

    client.flush().await;
    let payload = harness.collector.only_payload().await;
    assert_eq!(payload["stopReason"], "ERROR");
    assert_eq!(payload["errorReason"], "downstream validation failed");
}

#[tokio::test]
async fn test_configured_ids_fill_missing_metadata() {
    let harness = TestHarness::start().await;
    harness.anthropic.mock_messages(TEST_MODEL, "ok", (3, 2)).await;
    harness.collector.mock_accept().await;

    let config = harness
        .config()
        .organization_id("org-default")
        .product_id("prod-default")
        .build()
        .unwrap();
    let client = llm_metering::MeteredClient::new(config).unwrap();

    let metadata = UsageMetadata::new().organization_id("org-call");
    client
        .create_message(simple_request(TEST_MODEL), metadata.into())
        .await
        .unwrap();

    client.flush().await;
    let payload = harness.collector.only_payload().await;
    assert_eq!(payload["organizationId"], "org-call");
    assert_eq!(payload["productId"], "prod-default");
}

#[tokio::test]
async fn test_prompt_capture() {
    let harness = TestHarness::start().await;
    harness.anthropic.mock_messages(TEST_MODEL, "Paris.", (20, 2)).await;
    harness.collector.mock_accept().await;

    let config = harness.config().capture_prompts(true).build().unwrap();
    let client = llm_metering::MeteredClient::new(config).unwrap();
    let request = request_with_system(
        TEST_MODEL,
        "You are a geography tutor.",
        "What is the capital of France?",
    );
    client.create_message(request, CallContext::new()).await.unwrap();

    client.flush().await;
    let payload = harness.collector.only_payload().await;
    assert_eq!(payload["systemPrompt"], "You are a geography tutor.");
    assert!(payload["inputMessages"]
        .as_str()
        .unwrap()
        .contains("What is the capital of France?"));
    assert_eq!(payload["outputResponse"], "Paris.");
    assert!(payload.get("promptsTruncated").is_none());
}

#[tokio::test]
async fn test_long_prompt_truncated() {
    let harness = TestHarness::start().await;
    harness.anthropic.mock_messages(TEST_MODEL, "ok", (20, 2)).await;
    harness.collector.mock_accept().await;

    let config = harness.config().capture_prompts(true).build().unwrap();
    let client = llm_metering::MeteredClient::new(config).unwrap();
    let request = request_with_system(TEST_MODEL, &"s".repeat(60_000), "short question");
    client.create_message(request, CallContext::new()).await.unwrap();

    client.flush().await;
    let payload = harness.collector.only_payload().await;
    let system = payload["systemPrompt"].as_str().unwrap();
    assert!(system.chars().count() <= 50_000);
    assert!(system.ends_with("...[TRUNCATED]"));
    assert_eq!(payload["promptsTruncated"], true);
}

#[tokio::test]
async fn test_vision_attributes() {
    let harness = TestHarness::start().await;
    harness.anthropic.mock_messages(TEST_MODEL, "A cat.", (900, 4)).await;
    harness.collector.mock_accept().await;

    let client = harness.direct_client();
    client
        .create_message(vision_request(TEST_MODEL), CallContext::new())
        .await
        .unwrap();

    client.flush().await;
    let payload = harness.collector.only_payload().await;
    assert_eq!(payload["hasVisionContent"], true);
    assert_eq!(payload["attributes"]["vision_image_count"], 2);
    assert_eq!(payload["attributes"]["vision_total_size_bytes"], 5);
    assert_eq!(payload["attributes"]["vision_media_types"], json!(["image/png"]));
}

#[tokio::test]
async fn test_provider_error_not_metered() {
    let harness = TestHarness::start().await;
    harness.anthropic.mock_auth_error().await;
    harness.collector.mock_accept().await;

    let client = harness.direct_client();
    let err = client
        .create_message(simple_request(TEST_MODEL), CallContext::new())
        .await
        .unwrap_err();
    assert_eq!(err.status_code(), Some(401));
    assert!(matches!(err, MeterError::Provider { .. }));

    client.flush().await;
    assert!(harness.collector.payloads().await.is_empty());
}

#[tokio::test]
async fn test_closed_client_stops_metering() {
    let harness = TestHarness::start().await;
    harness.anthropic.mock_messages(TEST_MODEL, "ok", (3, 2)).await;
    harness.collector.mock_accept().await;

    let client = harness.direct_client();
    client.close().await;

    let response = client
        .create_message(simple_request(TEST_MODEL), CallContext::new())
        .await
        .expect("calls still work after close");
    assert_eq!(response.text(), "ok");

    client.flush().await;
    assert!(harness.collector.payloads().await.is_empty());
}

#[tokio::test]
async fn test_stream_finished_during_close_is_not_sent() {
    let harness = TestHarness::start().await;
    harness
        .anthropic
        .mock_streaming_response(TEST_MODEL, &["late"], Some((4, 1)))
        .await;
    harness.anthropic.mock_messages(TEST_MODEL, "ok", (3, 2)).await;
    Mock::given(method("POST"))
        .and(path("/meter/v2/ai/completions"))
        .respond_with(ResponseTemplate::new(201).set_delay(Duration::from_millis(300)))
        .mount(&harness.collector.server)
        .await;

    let client = harness.direct_client();
    client
        .create_message(simple_request(TEST_MODEL), CallContext::new())
        .await
        .unwrap();
    let stream = client
        .create_message_stream(simple_request(TEST_MODEL), CallContext::new())
        .await
        .unwrap();
    assert_eq!(client.pending_dispatches(), 1);

    let closing = tokio::spawn({
        let client = client.clone();
        async move { client.close().await }
    });
    tokio::time::sleep(Duration::from_millis(50)).await;
    // finalized while close() is still flushing the first payload
    drop(stream);
    closing.await.unwrap();

    assert_eq!(client.pending_dispatches(), 0);
    assert_eq!(harness.collector.payloads().await.len(), 1);
}

// Only test in this binary touching the process-wide client.
#[tokio::test]
async fn test_global_client() {
    let harness = TestHarness::start().await;
    harness.anthropic.mock_messages(TEST_MODEL, "ok", (3, 2)).await;
    harness.collector.mock_accept().await;

    llm_metering::reset().await;
    llm_metering::initialize(harness.config().build().unwrap()).unwrap();
    assert!(llm_metering::is_initialized());

    let client = llm_metering::client().unwrap();
    client
        .create_message(simple_request(TEST_MODEL), CallContext::new())
        .await
        .unwrap();

    llm_metering::reset().await;
    assert!(!llm_metering::is_initialized());
    assert_eq!(harness.collector.payloads().await.len(), 1);
}
