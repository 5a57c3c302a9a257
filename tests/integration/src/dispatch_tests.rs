//! Collector delivery tests

use crate::fixtures::*;
use crate::helpers::*;
use chrono::Utc;
use llm_metering::{CallContext, MeterError, MessageResponse, MeteredClient, ProviderKind};
use metering_core::{CallTiming, UsageRecord};
use metering_resilience::RetryPolicy;
use metering_telemetry::{MeteringDispatcher, PayloadBuilder};
use pretty_assertions::assert_eq;
use std::time::{Duration, Instant};
use wiremock::matchers::{method, path};
use wiremock::{Mock, ResponseTemplate};

#[tokio::test]
async fn test_collector_retry_then_accept() {
    let harness = TestHarness::start().await;
    harness.anthropic.mock_messages(TEST_MODEL, "ok", (3, 2)).await;
    harness.collector.mock_flaky(503, 2).await;

    let client = harness.direct_client();
    client
        .create_message(simple_request(TEST_MODEL), CallContext::new())
        .await
        .unwrap();

    client.flush().await;
    let payloads = harness.collector.payloads().await;
    assert_eq!(payloads.len(), 3);
    // retries resend the same payload
    assert!(payloads
        .iter()
        .all(|p| p["transactionId"] == payloads[0]["transactionId"]));
    assert_eq!(client.pending_dispatches(), 0);
}

#[tokio::test]
async fn test_throttled_collector_does_not_affect_call() {
    let harness = TestHarness::start().await;
    harness.anthropic.mock_messages(TEST_MODEL, "still fine", (3, 2)).await;
    harness.collector.mock_status(429).await;

    let client = harness.direct_client();
    let response = client
        .create_message(simple_request(TEST_MODEL), CallContext::new())
        .await
        .unwrap();
    assert_eq!(response.text(), "still fine");

    client.flush().await;
    assert_eq!(harness.collector.payloads().await.len(), 3);
}

#[tokio::test]
async fn test_rejected_payload_not_retried() {
    let harness = TestHarness::start().await;
    harness.anthropic.mock_messages(TEST_MODEL, "ok", (3, 2)).await;
    harness.collector.mock_status(400).await;

    let client = harness.direct_client();
    client
        .create_message(simple_request(TEST_MODEL), CallContext::new())
        .await
        .unwrap();

    client.flush().await;
    assert_eq!(harness.collector.payloads().await.len(), 1);
}

#[tokio::test]
async fn test_slow_collector_does_not_delay_call() {
    let harness = TestHarness::start().await;
    harness.anthropic.mock_messages(TEST_MODEL, "ok", (3, 2)).await;
    Mock::given(method("POST"))
        .and(path("/meter/v2/ai/completions"))
        .respond_with(ResponseTemplate::new(201).set_delay(Duration::from_millis(1500)))
        .mount(&harness.collector.server)
        .await;

    let client = harness.direct_client();
    let started = Instant::now();
    client
        .create_message(simple_request(TEST_MODEL), CallContext::new())
        .await
        .unwrap();
    assert!(started.elapsed() < Duration::from_millis(1000));
    assert_eq!(client.pending_dispatches(), 1);

    client.flush().await;
    assert_eq!(client.pending_dispatches(), 0);
    assert_eq!(harness.collector.payloads().await.len(), 1);
}

#[tokio::test]
async fn test_base_url_forms_reach_same_endpoint() {
    let harness = TestHarness::start().await;
    harness.anthropic.mock_messages(TEST_MODEL, "ok", (3, 2)).await;
    harness.collector.mock_accept().await;

    let forms = ["", "/", "/meter", "/meter/", "/meter/v2", "/meter/v2/", "/v2", "/v2/"];
    for suffix in forms {
        let config = harness
            .config()
            .metering_base_url(format!("{}{suffix}", harness.collector.url()))
            .build()
            .unwrap();
        assert_eq!(config.metering_base_url(), harness.collector.url(), "{suffix}");

        let client = MeteredClient::new(config).unwrap();
        client
            .create_message(simple_request(TEST_MODEL), CallContext::new())
            .await
            .unwrap();
        client.flush().await;
    }

    assert_eq!(harness.collector.payloads().await.len(), forms.len());
}

#[tokio::test]
async fn test_dispatch_reports_exhausted_retries() {
    let harness = TestHarness::start().await;
    harness.collector.mock_status(429).await;

    let config = harness.config().build().unwrap();
    let dispatcher = MeteringDispatcher::new(&config).unwrap().with_retry_policy(
        RetryPolicy::builder()
            .max_attempts(2)
            .base_delay(Duration::from_millis(10))
            .build(),
    );
    assert_eq!(
        dispatcher.endpoint(),
        format!("{}/meter/v2/ai/completions", harness.collector.url())
    );

    let response: MessageResponse =
        serde_json::from_value(message_response(TEST_MODEL, "ok", 3, 2)).unwrap();
    let record = UsageRecord::from_response(
        &response,
        ProviderKind::Anthropic,
        CallTiming::synchronous(Utc::now(), Duration::from_millis(40)),
    );
    let payload = PayloadBuilder::new(record).defaults_from(&config).build();

    let err = dispatcher.dispatch(&payload).await.unwrap_err();
    match err {
        MeterError::Metering {
            attempts,
            last_error,
        } => {
            assert_eq!(attempts, 2);
            assert_eq!(last_error.status_code(), Some(429));
        }
        other => panic!("unexpected error: {other:?}"),
    }
}
