//! Streaming tests

use crate::fixtures::*;
use crate::helpers::*;
use futures::StreamExt;
use llm_metering::{CallContext, StreamEvent};
use metering_core::estimate_input_tokens;
use pretty_assertions::assert_eq;

#[tokio::test]
async fn test_stream_with_usage() {
    let harness = TestHarness::start().await;
    harness
        .anthropic
        .mock_streaming_response(TEST_MODEL, &["Hello", ", ", "world"], Some((25, 9)))
        .await;
    harness.collector.mock_accept().await;

    let client = harness.direct_client();
    let mut stream = client
        .create_message_stream(simple_request(TEST_MODEL), CallContext::new())
        .await
        .unwrap();

    let mut deltas = Vec::new();
    while let Some(event) = stream.next().await {
        if let Some(text) = event.unwrap().text() {
            deltas.push(text.to_string());
        }
    }
    assert_eq!(deltas.concat(), "Hello, world");
    assert_eq!(stream.text(), "Hello, world");
    assert_eq!(stream.token_counts(), (25, 9, 34));
    assert!(stream.is_closed());

    client.flush().await;
    let payload = harness.collector.only_payload().await;
    assert_eq!(payload["isStreamed"], true);
    assert_eq!(payload["inputTokenCount"], 25);
    assert_eq!(payload["outputTokenCount"], 9);
    assert_eq!(payload["totalTokenCount"], 34);
    assert_eq!(payload["stopReason"], "END");
    assert_eq!(payload["provider"], "Anthropic");
    assert_eq!(payload["model"], TEST_MODEL);
    assert!(payload["timeToFirstToken"].is_u64());
    assert!(
        payload["timeToFirstToken"].as_u64().unwrap()
            <= payload["requestDuration"].as_u64().unwrap()
    );
}

#[tokio::test]
async fn test_stream_without_usage_uses_estimate() {
    let harness = TestHarness::start().await;
    harness
        .anthropic
        .mock_streaming_response(TEST_MODEL, &["partial answer"], None)
        .await;
    harness.collector.mock_accept().await;

    let request = simple_request(TEST_MODEL);
    let estimate = estimate_input_tokens(&request);

    let client = harness.direct_client();
    let stream = client
        .create_message_stream(request, CallContext::new())
        .await
        .unwrap();
    assert_eq!(stream.collect_text().await.unwrap(), "partial answer");

    client.flush().await;
    let payload = harness.collector.only_payload().await;
    assert_eq!(payload["inputTokenCount"], estimate);
    assert_eq!(payload["outputTokenCount"], 0);
}

#[tokio::test]
async fn test_dropped_stream_meters_once() {
    let harness = TestHarness::start().await;
    harness
        .anthropic
        .mock_streaming_response(TEST_MODEL, &["one", "two", "three"], Some((10, 3)))
        .await;
    harness.collector.mock_accept().await;

    let client = harness.direct_client();
    let mut stream = client
        .create_message_stream(simple_request(TEST_MODEL), CallContext::new())
        .await
        .unwrap();
    let handle = stream.handle();

    // message_start only
    let first = stream.next().await.unwrap().unwrap();
    assert!(matches!(first, StreamEvent::MessageStart { .. }));
    stream.close();
    stream.close();
    drop(stream);
    assert!(handle.is_closed());

    client.flush().await;
    let payload = harness.collector.only_payload().await;
    assert_eq!(payload["inputTokenCount"], 10);
    assert_eq!(payload["outputTokenCount"], 0);
}

#[tokio::test]
async fn test_stream_error_event_metered_as_error() {
    let harness = TestHarness::start().await;
    harness
        .anthropic
        .mock_streaming_error(TEST_MODEL, "partial", "overloaded_error")
        .await;
    harness.collector.mock_accept().await;

    let client = harness.direct_client();
    let stream = client
        .create_message_stream(simple_request(TEST_MODEL), CallContext::new())
        .await
        .unwrap();
    let err = stream.collect_text().await.unwrap_err();
    assert!(err.to_string().contains("overloaded_error"));

    client.flush().await;
    let payload = harness.collector.only_payload().await;
    assert_eq!(payload["stopReason"], "ERROR");
    assert_eq!(payload["isStreamed"], true);
    assert_eq!(payload["inputTokenCount"], 17);
}

#[tokio::test]
async fn test_stream_prompt_capture() {
    let harness = TestHarness::start().await;
    harness
        .anthropic
        .mock_streaming_response(TEST_MODEL, &["Bonjour", " le monde"], Some((14, 4)))
        .await;
    harness.collector.mock_accept().await;

    let config = harness.config().capture_prompts(true).build().unwrap();
    let client = llm_metering::MeteredClient::new(config).unwrap();
    let request = request_with_system(TEST_MODEL, "Translate to French.", "Hello world");
    let stream = client
        .create_message_stream(request, CallContext::new())
        .await
        .unwrap();
    stream.collect_text().await.unwrap();

    client.flush().await;
    let payload = harness.collector.only_payload().await;
    assert_eq!(payload["systemPrompt"], "Translate to French.");
    assert_eq!(payload["outputResponse"], "Bonjour le monde");
}

#[tokio::test]
async fn test_stream_falls_back_when_gateway_fails() {
    let harness = TestHarness::start().await;
    harness.bedrock.mock_invoke_error(500, "InternalServerException").await;
    harness
        .anthropic
        .mock_streaming_response(TEST_MODEL, &["fallback"], Some((8, 1)))
        .await;
    harness.collector.mock_accept().await;

    let client = harness.gateway_client();
    let stream = client
        .create_message_stream(simple_request(TEST_MODEL), CallContext::new())
        .await
        .unwrap();
    assert_eq!(stream.collect_text().await.unwrap(), "fallback");

    assert_eq!(harness.bedrock.calls().await, 3);
    assert!(harness
        .bedrock
        .paths()
        .await
        .iter()
        .all(|p| p.ends_with("/invoke-with-response-stream")));

    client.flush().await;
    let payload = harness.collector.only_payload().await;
    assert_eq!(payload["provider"], "Anthropic");
    assert_eq!(payload["isStreamed"], true);
}
