//! Bedrock routing and fallback tests

use crate::fixtures::*;
use crate::helpers::*;
use llm_metering::{CallContext, MeterError};
use metering_providers::CredentialResolver;
use pretty_assertions::assert_eq;
use std::io::Write;
use tokio_util::sync::CancellationToken;

#[tokio::test]
async fn test_gateway_primary_success() {
    let harness = TestHarness::start().await;
    harness.bedrock.mock_invoke("from bedrock", (20, 8)).await;
    harness.collector.mock_accept().await;

    let client = harness.gateway_client();
    assert_eq!(client.provider(), llm_metering::ProviderKind::Bedrock);

    let response = client
        .create_message(simple_request(TEST_MODEL), CallContext::new())
        .await
        .unwrap();
    assert_eq!(response.text(), "from bedrock");
    assert_eq!(harness.bedrock.calls().await, 1);
    assert_eq!(harness.anthropic.calls().await, 0);
    assert_eq!(
        harness.bedrock.paths().await,
        vec![format!("/model/{TEST_GATEWAY_MODEL}/invoke")]
    );

    client.flush().await;
    let payload = harness.collector.only_payload().await;
    assert_eq!(payload["provider"], "Amazon Bedrock");
    assert_eq!(payload["model"], TEST_MODEL);
    assert_eq!(payload["stopReason"], "TOKEN_LIMIT");
    assert_eq!(payload["inputTokenCount"], 20);
    assert_eq!(payload["outputTokenCount"], 8);
    assert_eq!(payload["cacheReadTokenCount"], 4);
}

#[tokio::test]
async fn test_retry_then_gateway_success() {
    let harness = TestHarness::start().await;
    harness.bedrock.mock_flaky_invoke(2, "third time").await;
    harness.collector.mock_accept().await;

    let client = harness.gateway_client();
    let response = client
        .create_message(simple_request(TEST_MODEL), CallContext::new())
        .await
        .unwrap();

    assert_eq!(response.text(), "third time");
    assert_eq!(harness.bedrock.calls().await, 3);
    assert_eq!(harness.anthropic.calls().await, 0);

    client.flush().await;
    assert_eq!(harness.collector.only_payload().await["provider"], "Amazon Bedrock");
}

#[tokio::test]
async fn test_fallback_after_retries_exhausted() {
    let harness = TestHarness::start().await;
    harness
        .bedrock
        .mock_invoke_error(500, "InternalServerException")
        .await;
    harness.anthropic.mock_messages(TEST_MODEL, "from anthropic", (9, 3)).await;
    harness.collector.mock_accept().await;

    let client = harness.gateway_client();
    let response = client
        .create_message(simple_request(TEST_MODEL), CallContext::new())
        .await
        .unwrap();

    assert_eq!(response.text(), "from anthropic");
    assert_eq!(harness.bedrock.calls().await, 3);
    let direct = harness.anthropic.requests().await;
    assert_eq!(direct.len(), 1);
    assert_eq!(direct[0]["model"], TEST_MODEL);

    client.flush().await;
    let payload = harness.collector.only_payload().await;
    assert_eq!(payload["provider"], "Anthropic");
    assert_eq!(payload["model"], TEST_MODEL);
}

#[tokio::test]
async fn test_fallback_on_fatal_error_without_retry() {
    let harness = TestHarness::start().await;
    harness
        .bedrock
        .mock_invoke_error(403, "The security token included in the request is invalid.")
        .await;
    harness.anthropic.mock_messages(TEST_MODEL, "from anthropic", (9, 3)).await;
    harness.collector.mock_accept().await;

    let client = harness.gateway_client();
    client
        .create_message(simple_request(TEST_MODEL), CallContext::new())
        .await
        .unwrap();

    assert_eq!(harness.bedrock.calls().await, 1);
    assert_eq!(harness.anthropic.calls().await, 1);
}

#[tokio::test]
async fn test_fallback_when_credentials_unavailable() {
    let harness = TestHarness::start().await;
    harness.anthropic.mock_messages(TEST_MODEL, "from anthropic", (9, 3)).await;
    harness.collector.mock_accept().await;

    let config = harness
        .config()
        .bedrock_disabled(false)
        .aws_profile("nonexistent")
        .build()
        .unwrap();
    let client = harness.client_with(config, isolated_resolver());
    assert_eq!(client.provider(), llm_metering::ProviderKind::Bedrock);

    client
        .create_message(simple_request(TEST_MODEL), CallContext::new())
        .await
        .unwrap();

    assert_eq!(harness.bedrock.calls().await, 0);
    assert_eq!(harness.anthropic.calls().await, 1);
    client.flush().await;
    assert_eq!(harness.collector.only_payload().await["provider"], "Anthropic");
}

#[tokio::test]
async fn test_profile_credentials_from_file() {
    let harness = TestHarness::start().await;
    harness.bedrock.mock_invoke("profiled", (5, 5)).await;
    harness.collector.mock_accept().await;

    let mut file = tempfile::NamedTempFile::new().unwrap();
    writeln!(
        file,
        "[default]\naws_access_key_id = AKIDDEFAULT\naws_secret_access_key = default\n\n\
         [profile team]\naws_access_key_id = AKIDTEAM\naws_secret_access_key = team-secret"
    )
    .unwrap();

    let config = harness
        .config()
        .bedrock_disabled(false)
        .aws_profile("team")
        .build()
        .unwrap();
    let client = harness.client_with(config, CredentialResolver::with_credentials_file(file.path()));
    let response = client
        .create_message(simple_request(TEST_MODEL), CallContext::new())
        .await
        .unwrap();

    assert_eq!(response.text(), "profiled");
    let requests = harness.bedrock.server.received_requests().await.unwrap();
    let authorization = requests[0].headers.get("authorization").unwrap().to_str().unwrap();
    assert!(authorization.contains("Credential=AKIDTEAM/"));
}

#[tokio::test]
async fn test_gateway_ids_passed_through() {
    let harness = TestHarness::start().await;
    harness.bedrock.mock_invoke("ok", (5, 5)).await;
    harness.collector.mock_accept().await;

    let client = harness.gateway_client();
    client
        .create_message(
            simple_request("us.anthropic.claude-3-haiku-20240307-v1:0"),
            CallContext::new(),
        )
        .await
        .unwrap();

    assert_eq!(
        harness.bedrock.paths().await,
        vec!["/model/us.anthropic.claude-3-haiku-20240307-v1%3A0/invoke".to_string()]
    );
    client.flush().await;
    assert_eq!(harness.collector.only_payload().await["model"], TEST_MODEL);
}

#[tokio::test]
async fn test_inference_profile_arn_from_base() {
    let harness = TestHarness::start().await;
    harness.bedrock.mock_invoke("ok", (5, 5)).await;
    harness.collector.mock_accept().await;

    let config = harness
        .gateway_config()
        .aws_model_arn_base("arn:aws:bedrock:us-east-1:123456789012")
        .build()
        .unwrap();
    let client = harness.client_with(config, isolated_resolver());
    client
        .create_message(simple_request(TEST_MODEL), CallContext::new())
        .await
        .unwrap();

    assert_eq!(
        harness.bedrock.paths().await,
        vec![
            "/model/arn%3Aaws%3Abedrock%3Aus-east-1%3A123456789012%3Ainference-profile%2Fus.anthropic.claude-3-haiku-20240307-v1%3A0/invoke"
                .to_string()
        ]
    );
    client.flush().await;
    assert_eq!(harness.collector.only_payload().await["model"], TEST_MODEL);
}

#[tokio::test]
async fn test_direct_call_converts_gateway_id() {
    let harness = TestHarness::start().await;
    harness.anthropic.mock_messages(TEST_MODEL, "ok", (5, 5)).await;
    harness.collector.mock_accept().await;

    let client = harness.direct_client();
    client
        .create_message(
            simple_request("anthropic.claude-3-haiku-20240307-v1:0"),
            CallContext::new(),
        )
        .await
        .unwrap();

    let direct = harness.anthropic.requests().await;
    assert_eq!(direct[0]["model"], TEST_MODEL);
}

#[tokio::test]
async fn test_cancelled_call_does_not_fall_back() {
    let harness = TestHarness::start().await;
    harness.bedrock.mock_invoke("never", (1, 1)).await;
    harness.anthropic.mock_messages(TEST_MODEL, "never", (1, 1)).await;
    harness.collector.mock_accept().await;

    let cancel = CancellationToken::new();
    cancel.cancel();

    let client = harness.gateway_client();
    let err = client
        .create_message(
            simple_request(TEST_MODEL),
            CallContext::new().with_cancel(cancel),
        )
        .await
        .unwrap_err();

    assert!(matches!(err, MeterError::Cancelled));
    assert_eq!(harness.bedrock.calls().await, 0);
    assert_eq!(harness.anthropic.calls().await, 0);
    client.flush().await;
    assert!(harness.collector.payloads().await.is_empty());
}
