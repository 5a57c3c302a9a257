//! Test helper utilities for integration tests

use crate::fixtures::TEST_METERING_KEY;
use crate::mock_providers::{MockAnthropic, MockBedrock, MockCollector};
use llm_metering::MeteredClient;
use metering_config::{ConfigBuilder, MeteringConfig};
use metering_core::CompletionProvider;
use metering_providers::{AnthropicConfig, AnthropicProvider, BedrockFactory, CredentialResolver};
use once_cell::sync::Lazy;
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

/// Initialize tracing for tests (only once)
static TRACING: Lazy<()> = Lazy::new(|| {
    if std::env::var("TEST_LOG").is_ok() {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(EnvFilter::from_default_env())
            .with_test_writer()
            .try_init();
    }
});

/// Initialize tracing for tests
pub fn init_tracing() {
    Lazy::force(&TRACING);
}

/// The three upstream servers a metered call talks to
pub struct TestHarness {
    pub anthropic: MockAnthropic,
    pub bedrock: MockBedrock,
    pub collector: MockCollector,
}

impl TestHarness {
    /// Start all mock servers
    pub async fn start() -> Self {
        init_tracing();
        Self {
            anthropic: MockAnthropic::new().await,
            bedrock: MockBedrock::new().await,
            collector: MockCollector::new().await,
        }
    }

    /// Configuration pointing at the mock collector, with the gateway off
    pub fn config(&self) -> ConfigBuilder {
        MeteringConfig::builder()
            .metering_api_key(TEST_METERING_KEY)
            .metering_base_url(self.collector.url())
            .anthropic_api_key("sk-ant-test")
            .anthropic_base_url(self.anthropic.url())
            .bedrock_disabled(true)
            .request_timeout(Duration::from_secs(5))
    }

    /// Configuration with static AWS credentials, so the gateway is primary
    pub fn gateway_config(&self) -> ConfigBuilder {
        self.config()
            .bedrock_disabled(false)
            .aws_credentials("AKIDEXAMPLE", "wJalrXUtnFEMI/K7MDENG")
            .aws_region("us-east-1")
    }

    /// Client that only talks to the direct API
    pub fn direct_client(&self) -> MeteredClient {
        let config = self.config().build().expect("valid configuration");
        MeteredClient::new(config).expect("client")
    }

    /// Client whose gateway is the mock Bedrock server
    pub fn client_with(&self, config: MeteringConfig, resolver: CredentialResolver) -> MeteredClient {
        let direct: Arc<dyn CompletionProvider> = Arc::new(
            AnthropicProvider::new(
                AnthropicConfig::new("sk-ant-test").with_base_url(self.anthropic.url()),
            )
            .expect("anthropic provider"),
        );
        let gateway = BedrockFactory::with_resolver(resolver).endpoint_url(self.bedrock.url());
        MeteredClient::with_providers(config, Some(direct), Arc::new(gateway)).expect("client")
    }

    /// Gateway-first client using static credentials
    pub fn gateway_client(&self) -> MeteredClient {
        let config = self.gateway_config().build().expect("valid configuration");
        self.client_with(config, isolated_resolver())
    }
}

/// Credential resolver that never reads the host's environment or files
pub fn isolated_resolver() -> CredentialResolver {
    CredentialResolver::with_credentials_file("/nonexistent/aws/credentials")
}
