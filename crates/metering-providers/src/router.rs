//! Provider selection and gateway-to-direct fallback.
//!
//! ```text
//! SelectProvider ──direct──────────────────────────────┐
//!       │ gateway                                      ▼
//!       ▼                                         TryFallback ──> Done | Failed
//! TryPrimary ──ok──> Done                              ▲
//!       │ retryable error                              │
//!       ▼                                              │
//! Retrying ──ok──> Done, exhausted / fatal ────────────┘
//! ```
//!
//! Gateway construction failures skip straight to the fallback.
//! Cancellation ends the call without falling back.

use crate::anthropic::{AnthropicConfig, AnthropicProvider};
use crate::bedrock::{BedrockConfig, BedrockProvider};
use crate::credentials::CredentialResolver;
use crate::model_id::{to_direct_model, to_gateway_model};
use metering_config::MeteringConfig;
use metering_core::{
    CompletionProvider, EventStream, MeterError, MeterResult, MessageRequest, MessageResponse,
    ProviderKind,
};
use metering_resilience::{ErrorClassifier, RetryPolicy, RetryResult};
use once_cell::sync::OnceCell;
use std::fmt;
use std::future::Future;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Choose the primary provider for a call.
///
/// Disabled gateway → direct; explicit AWS credentials (keypair or profile)
/// → gateway; a gateway-domain base URL → gateway; otherwise direct.
#[must_use]
pub fn select_provider(config: &MeteringConfig) -> ProviderKind {
    if config.bedrock_disabled() {
        debug!("Bedrock disabled, using Anthropic");
        return ProviderKind::Anthropic;
    }
    if config.has_aws_credentials() {
        debug!("AWS credentials configured, using Bedrock");
        return ProviderKind::Bedrock;
    }
    if config
        .anthropic_base_url()
        .is_some_and(|url| url.contains("amazonaws.com"))
    {
        debug!("Base URL points at AWS, using Bedrock");
        return ProviderKind::Bedrock;
    }
    ProviderKind::Anthropic
}

/// States of a routed call
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RouteState {
    /// Deciding the primary provider
    SelectProvider,
    /// First gateway attempt
    TryPrimary,
    /// Backing off between gateway attempts
    Retrying,
    /// Calling the direct provider
    TryFallback,
    /// Call succeeded
    Done,
    /// Call failed
    Failed,
}

impl fmt::Display for RouteState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::SelectProvider => "select_provider",
            Self::TryPrimary => "try_primary",
            Self::Retrying => "retrying",
            Self::TryFallback => "try_fallback",
            Self::Done => "done",
            Self::Failed => "failed",
        };
        f.write_str(name)
    }
}

/// Builds the gateway provider for a configuration
pub trait GatewayFactory: Send + Sync {
    /// Construct the gateway adapter
    fn create(&self, config: &MeteringConfig) -> MeterResult<Arc<dyn CompletionProvider>>;
}

/// Signs with resolved AWS credentials against the regional endpoint
#[derive(Debug, Default)]
pub struct BedrockFactory {
    resolver: CredentialResolver,
    endpoint_url: Option<String>,
}

impl BedrockFactory {
    /// Factory with a custom credential resolver
    #[must_use]
    pub fn with_resolver(resolver: CredentialResolver) -> Self {
        Self {
            resolver,
            endpoint_url: None,
        }
    }

    /// Override the service endpoint
    #[must_use]
    pub fn endpoint_url(mut self, url: impl Into<String>) -> Self {
        self.endpoint_url = Some(url.into());
        self
    }
}

impl GatewayFactory for BedrockFactory {
    fn create(&self, config: &MeteringConfig) -> MeterResult<Arc<dyn CompletionProvider>> {
        let mut bedrock = BedrockConfig::from_metering_config(config, &self.resolver)?;
        if let Some(url) = &self.endpoint_url {
            bedrock.endpoint_url = Some(url.clone());
        }
        Ok(Arc::new(BedrockProvider::new(bedrock)?))
    }
}

/// A provider result tagged with the provider that produced it
#[derive(Debug)]
pub struct Routed<T> {
    /// The result
    pub value: T,
    /// Provider that executed the call
    pub provider: ProviderKind,
    /// Direct-API name of the model that answered
    pub model: String,
}

/// Routes calls to the selected provider and falls back to the direct API
pub struct FallbackRouter {
    config: Arc<MeteringConfig>,
    direct: Option<Arc<dyn CompletionProvider>>,
    factory: Arc<dyn GatewayFactory>,
    gateway: OnceCell<Arc<dyn CompletionProvider>>,
    retry: RetryPolicy,
    classifier: ErrorClassifier,
}

impl fmt::Debug for FallbackRouter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FallbackRouter")
            .field("primary", &self.primary())
            .field("has_direct", &self.direct.is_some())
            .field("gateway_ready", &self.gateway.get().is_some())
            .finish()
    }
}

impl FallbackRouter {
    /// Router with the default providers.
    ///
    /// The direct provider is only built when a direct API key is present;
    /// calls that need it fail with a configuration error otherwise.
    pub fn new(config: Arc<MeteringConfig>) -> MeterResult<Self> {
        let direct: Option<Arc<dyn CompletionProvider>> = match config.anthropic_api_key() {
            Some(_) => Some(Arc::new(AnthropicProvider::new(
                AnthropicConfig::from_metering_config(&config)?,
            )?)),
            None => None,
        };
        Ok(Self::with_providers(
            config,
            direct,
            Arc::new(BedrockFactory::default()),
        ))
    }

    /// Router with injected providers
    pub fn with_providers(
        config: Arc<MeteringConfig>,
        direct: Option<Arc<dyn CompletionProvider>>,
        factory: Arc<dyn GatewayFactory>,
    ) -> Self {
        Self {
            config,
            direct,
            factory,
            gateway: OnceCell::new(),
            retry: RetryPolicy::with_defaults(),
            classifier: ErrorClassifier::default(),
        }
    }

    /// Replace the gateway retry policy
    #[must_use]
    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Replace the retryable-error table
    #[must_use]
    pub fn with_classifier(mut self, classifier: ErrorClassifier) -> Self {
        self.classifier = classifier;
        self
    }

    /// Primary provider for the current configuration
    pub fn primary(&self) -> ProviderKind {
        select_provider(&self.config)
    }

    /// Create a message
    pub async fn create_message(
        &self,
        request: &MessageRequest,
        cancel: &CancellationToken,
    ) -> MeterResult<Routed<MessageResponse>> {
        self.route(request, cancel, |provider, request, cancel| async move {
            provider.create_message(&request, &cancel).await
        })
        .await
    }

    /// Open a message stream.
    ///
    /// Only opening the stream is retried; errors after the first event
    /// surface through the stream itself.
    pub async fn create_message_stream(
        &self,
        request: &MessageRequest,
        cancel: &CancellationToken,
    ) -> MeterResult<Routed<EventStream>> {
        self.route(request, cancel, |provider, request, cancel| async move {
            provider.create_message_stream(&request, &cancel).await
        })
        .await
    }

    async fn route<T, F, Fut>(
        &self,
        request: &MessageRequest,
        cancel: &CancellationToken,
        call: F,
    ) -> MeterResult<Routed<T>>
    where
        F: Fn(Arc<dyn CompletionProvider>, MessageRequest, CancellationToken) -> Fut,
        Fut: Future<Output = MeterResult<T>>,
    {
        let primary = self.primary();
        debug!(state = %RouteState::SelectProvider, provider = %primary, model = %request.model, "Provider selected");

        if primary.is_anthropic() {
            return self.fallback(request, cancel, &call).await;
        }

        let gateway = match self.gateway() {
            Ok(gateway) => gateway,
            Err(e) => {
                warn!(error = %e, "Failed to create Bedrock adapter, falling back to Anthropic");
                return self.fallback(request, cancel, &call).await;
            }
        };

        let gateway_model = to_gateway_model(&request.model, self.config.aws_model_arn_base());
        let gateway_request = request.with_model(gateway_model.as_str());
        debug!(state = %RouteState::TryPrimary, model = %gateway_model, "Calling Bedrock");

        let outcome = self
            .retry
            .run(
                cancel,
                |attempt| {
                    if attempt > 1 {
                        debug!(state = %RouteState::Retrying, attempt, "Retrying Bedrock");
                    }
                    call(gateway.clone(), gateway_request.clone(), cancel.clone())
                },
                |e| self.classifier.is_retryable(e),
            )
            .await;

        match outcome {
            RetryResult::Success(value) => {
                debug!(state = %RouteState::Done, provider = %ProviderKind::Bedrock, "Call completed");
                let model = to_direct_model(&gateway_model).unwrap_or(gateway_model);
                Ok(Routed {
                    value,
                    provider: ProviderKind::Bedrock,
                    model,
                })
            }
            RetryResult::Cancelled { attempts } => {
                info!(state = %RouteState::Failed, attempts, "Call cancelled");
                Err(MeterError::Cancelled)
            }
            RetryResult::Failed { error, attempts } => {
                warn!(attempts, error = %error, "Bedrock request failed after retries, falling back to Anthropic");
                self.fallback(request, cancel, &call).await
            }
            RetryResult::NonRetryable { error, attempts } => {
                warn!(attempts, error = %error, "Bedrock request failed, falling back to Anthropic");
                self.fallback(request, cancel, &call).await
            }
        }
    }

    async fn fallback<T, F, Fut>(
        &self,
        request: &MessageRequest,
        cancel: &CancellationToken,
        call: &F,
    ) -> MeterResult<Routed<T>>
    where
        F: Fn(Arc<dyn CompletionProvider>, MessageRequest, CancellationToken) -> Fut,
        Fut: Future<Output = MeterResult<T>>,
    {
        let model = to_direct_model(&request.model)?;
        if model != request.model {
            info!(from = %request.model, to = %model, "Converted Bedrock model to Anthropic model");
        }

        let direct = self.direct.clone().ok_or_else(|| {
            MeterError::configuration("ANTHROPIC_API_KEY is required for the Anthropic API")
        })?;

        debug!(state = %RouteState::TryFallback, model = %model, "Calling Anthropic");
        match call(direct, request.with_model(model.as_str()), cancel.clone()).await {
            Ok(value) => {
                debug!(state = %RouteState::Done, provider = %ProviderKind::Anthropic, "Call completed");
                Ok(Routed {
                    value,
                    provider: ProviderKind::Anthropic,
                    model,
                })
            }
            Err(e) => {
                debug!(state = %RouteState::Failed, error = %e, "Anthropic call failed");
                Err(e)
            }
        }
    }

    fn gateway(&self) -> MeterResult<Arc<dyn CompletionProvider>> {
        self.gateway
            .get_or_try_init(|| self.factory.create(&self.config))
            .cloned()
    }
}
