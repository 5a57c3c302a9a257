//! Metered client.
//!
//! Wraps the provider router so every successful call produces one
//! telemetry payload, delivered in the background. The provider response is
//! returned as soon as it is available.

use crate::stream::{MeteredStream, StreamFinalizer};
use chrono::Utc;
use metering_config::MeteringConfig;
use metering_core::{
    estimate_input_tokens, CallTiming, CompletionProvider, MeterResult, MessageRequest,
    MessageResponse, ProviderKind, StreamAccumulator, UsageMetadata, UsageRecord,
};
use metering_providers::{FallbackRouter, GatewayFactory};
use metering_telemetry::{
    detect, extract_request, extract_response, metered_call_span, MeteringDispatcher,
    PayloadBuilder, PromptData, TelemetryPayload, VisionDetectionResult,
};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn, Instrument};

/// Per-call context: business metadata and a cancellation signal
#[derive(Debug, Clone, Default)]
pub struct CallContext {
    /// Metadata merged into the telemetry payload
    pub metadata: UsageMetadata,
    /// Cancels the provider call
    pub cancel: CancellationToken,
}

impl CallContext {
    /// Empty context
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Attach metadata
    #[must_use]
    pub fn with_metadata(mut self, metadata: UsageMetadata) -> Self {
        self.metadata = metadata;
        self
    }

    /// Use a caller-owned cancellation token
    #[must_use]
    pub fn with_cancel(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }
}

impl From<UsageMetadata> for CallContext {
    fn from(metadata: UsageMetadata) -> Self {
        Self::new().with_metadata(metadata)
    }
}

struct ClientInner {
    config: Arc<MeteringConfig>,
    router: FallbackRouter,
    dispatcher: MeteringDispatcher,
    closed: AtomicBool,
}

/// Metering client for message completions.
///
/// Cheap to clone; clones share the router and the dispatcher.
#[derive(Clone)]
pub struct MeteredClient {
    inner: Arc<ClientInner>,
}

impl std::fmt::Debug for MeteredClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MeteredClient")
            .field("router", &self.inner.router)
            .field("dispatcher", &self.inner.dispatcher)
            .finish()
    }
}

impl MeteredClient {
    /// Client with the default providers for the configuration
    pub fn new(config: MeteringConfig) -> MeterResult<Self> {
        let config = Arc::new(config);
        let router = FallbackRouter::new(config.clone())?;
        let dispatcher = MeteringDispatcher::new(&config)?;
        Ok(Self::from_parts(config, router, dispatcher))
    }

    /// Client with an injected direct provider and gateway factory
    pub fn with_providers(
        config: MeteringConfig,
        direct: Option<Arc<dyn CompletionProvider>>,
        gateway: Arc<dyn GatewayFactory>,
    ) -> MeterResult<Self> {
        let config = Arc::new(config);
        let router = FallbackRouter::with_providers(config.clone(), direct, gateway);
        let dispatcher = MeteringDispatcher::new(&config)?;
        Ok(Self::from_parts(config, router, dispatcher))
    }

    /// Client from fully built parts
    pub fn from_parts(
        config: Arc<MeteringConfig>,
        router: FallbackRouter,
        dispatcher: MeteringDispatcher,
    ) -> Self {
        if config.verbose_startup() {
            config.log_summary();
        }
        info!(
            provider = %router.primary(),
            capture_prompts = config.capture_prompts(),
            "Metered client created"
        );
        Self {
            inner: Arc::new(ClientInner {
                config,
                router,
                dispatcher,
                closed: AtomicBool::new(false),
            }),
        }
    }

    /// Resolved configuration
    pub fn config(&self) -> &MeteringConfig {
        &self.inner.config
    }

    /// Primary provider for the configuration
    pub fn provider(&self) -> ProviderKind {
        self.inner.router.primary()
    }

    /// Background sends still running
    pub fn pending_dispatches(&self) -> usize {
        self.inner.dispatcher.in_flight()
    }

    /// Create a message and meter it.
    ///
    /// # Errors
    /// Provider failures, after fallback, are returned as-is. Metering
    /// failures are only logged.
    pub async fn create_message(
        &self,
        request: MessageRequest,
        ctx: CallContext,
    ) -> MeterResult<MessageResponse> {
        let span = metered_call_span!("create_message", request.model, false);
        async {
            let request_time = Utc::now();
            let started = Instant::now();

            let routed = self.inner.router.create_message(&request, &ctx.cancel).await?;
            let timing = CallTiming::synchronous(request_time, started.elapsed());
            tracing::Span::current().record("provider", routed.provider.display_name());

            let mut record = UsageRecord::from_response(&routed.value, routed.provider, timing);
            record.model = reported_model(routed.provider, &routed.value.model, routed.model);

            let prompts = self.inner.config.capture_prompts().then(|| {
                let captured = extract_request(&request);
                let truncated = captured.truncated;
                captured.merge(extract_response(&routed.value, truncated))
            });

            debug!(
                input_tokens = record.input_tokens,
                output_tokens = record.output_tokens,
                stop_reason = %record.stop_reason,
                "Call completed"
            );
            self.meter(record, ctx.metadata, detect(&request), prompts);
            Ok(routed.value)
        }
        .instrument(span)
        .await
    }

    /// Open a metered stream.
    ///
    /// The payload is sent when the stream ends, is closed, or is dropped,
    /// whichever happens first.
    ///
    /// # Errors
    /// Returns the provider error if the stream could not be opened.
    pub async fn create_message_stream(
        &self,
        request: MessageRequest,
        ctx: CallContext,
    ) -> MeterResult<MeteredStream> {
        let span = metered_call_span!("create_message_stream", request.model, true);
        async {
            let request_time = Utc::now();
            let started = Instant::now();
            let estimate = estimate_input_tokens(&request);

            let routed = self
                .inner
                .router
                .create_message_stream(&request, &ctx.cancel)
                .await?;
            tracing::Span::current().record("provider", routed.provider.display_name());
            debug!(estimated_input_tokens = estimate, "Stream opened");

            let accumulator =
                StreamAccumulator::new(routed.provider, routed.model, estimate, started, request_time);
            let finalizer = StreamFinalizer {
                client: self.clone(),
                metadata: ctx.metadata,
                vision: detect(&request),
                prompts: self
                    .inner
                    .config
                    .capture_prompts()
                    .then(|| extract_request(&request)),
            };
            Ok(MeteredStream::new(routed.value, accumulator, finalizer))
        }
        .instrument(span)
        .await
    }

    pub(crate) fn payload(
        &self,
        record: UsageRecord,
        metadata: UsageMetadata,
        vision: VisionDetectionResult,
        prompts: Option<PromptData>,
    ) -> TelemetryPayload {
        let mut builder = PayloadBuilder::new(record)
            .metadata(metadata)
            .defaults_from(&self.inner.config)
            .vision(vision);
        if let Some(prompts) = prompts {
            builder = builder.prompts(prompts);
        }
        builder.build()
    }

    pub(crate) fn meter(
        &self,
        record: UsageRecord,
        metadata: UsageMetadata,
        vision: VisionDetectionResult,
        prompts: Option<PromptData>,
    ) {
        if self.inner.closed.load(Ordering::Acquire) {
            warn!("Client closed, metering payload dropped");
            return;
        }
        let payload = self.payload(record, metadata, vision, prompts);
        self.inner.dispatcher.spawn(payload);
    }

    /// Wait for every pending metering send
    pub async fn flush(&self) {
        self.inner.dispatcher.flush().await;
    }

    /// Stop metering further calls, then wait for pending sends
    pub async fn close(&self) {
        self.inner.closed.store(true, Ordering::Release);
        self.flush().await;
        debug!("Metered client closed");
    }
}

/// Model name for the payload: the direct API reports the model it
/// resolved; gateway responses echo the gateway id, so the routed
/// direct-API name is used instead.
fn reported_model(provider: ProviderKind, response_model: &str, routed: String) -> String {
    if provider.is_anthropic() && !response_model.is_empty() {
        response_model.to_string()
    } else {
        routed
    }
}
