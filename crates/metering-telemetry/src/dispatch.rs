//! Metering delivery.
//!
//! [`MeteringDispatcher::dispatch`] posts one payload with bounded retry.
//! [`MeteringDispatcher::spawn`] runs the same on a tracked background task
//! so the caller's response is never held up; failures and panics inside
//! those tasks are logged and go no further. [`MeteringDispatcher::flush`]
//! waits for every tracked task.

use crate::payload::TelemetryPayload;
use bytes::Bytes;
use futures::FutureExt;
use metering_config::{metering_endpoint, MeteringConfig};
use metering_core::{MeterError, MeterResult};
use metering_resilience::{RetryPolicy, RetryResult};
use reqwest::header::{CONTENT_TYPE, USER_AGENT};
use reqwest::Client;
use secrecy::{ExposeSecret, Secret};
use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, error, warn};

const JSON_CONTENT_TYPE: &str = "application/json; charset=utf-8";

struct DispatcherInner {
    client: Client,
    endpoint: String,
    api_key: Secret<String>,
    user_agent: String,
    retry: RetryPolicy,
}

/// Sends telemetry payloads to the collector
#[derive(Clone)]
pub struct MeteringDispatcher {
    inner: Arc<DispatcherInner>,
    tracker: TaskTracker,
}

impl std::fmt::Debug for MeteringDispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MeteringDispatcher")
            .field("endpoint", &self.inner.endpoint)
            .field("in_flight", &self.tracker.len())
            .finish()
    }
}

impl MeteringDispatcher {
    /// Create a dispatcher for the configured collector
    pub fn new(config: &MeteringConfig) -> MeterResult<Self> {
        Self::with_endpoint(
            metering_endpoint(config.metering_base_url()),
            config.metering_api_key(),
            config.request_timeout(),
        )
    }

    /// Create a dispatcher for an explicit endpoint URL
    pub fn with_endpoint(
        endpoint: impl Into<String>,
        api_key: impl Into<String>,
        timeout: Duration,
    ) -> MeterResult<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| MeterError::internal(format!("Failed to create HTTP client: {e}")))?;

        Ok(Self {
            inner: Arc::new(DispatcherInner {
                client,
                endpoint: endpoint.into(),
                api_key: Secret::new(api_key.into()),
                user_agent: MeteringConfig::USER_AGENT.to_string(),
                retry: RetryPolicy::with_defaults(),
            }),
            tracker: TaskTracker::new(),
        })
    }

    /// Replace the retry policy
    #[must_use]
    pub fn with_retry_policy(self, retry: RetryPolicy) -> Self {
        let inner = DispatcherInner {
            client: self.inner.client.clone(),
            endpoint: self.inner.endpoint.clone(),
            api_key: self.inner.api_key.clone(),
            user_agent: self.inner.user_agent.clone(),
            retry,
        };
        Self {
            inner: Arc::new(inner),
            tracker: self.tracker,
        }
    }

    /// Collector URL
    pub fn endpoint(&self) -> &str {
        &self.inner.endpoint
    }

    /// Number of background sends still running
    pub fn in_flight(&self) -> usize {
        self.tracker.len()
    }

    /// Send one payload, retrying transient failures.
    ///
    /// # Errors
    /// A 4xx other than 429 is returned as `Validation` without retrying.
    /// When attempts run out the last error is wrapped in `Metering`.
    pub async fn dispatch(&self, payload: &TelemetryPayload) -> MeterResult<()> {
        let body = Bytes::from(serde_json::to_vec(payload)?);
        let cancel = CancellationToken::new();

        debug!(
            endpoint = %self.inner.endpoint,
            transaction_id = payload.transaction_id().unwrap_or("-"),
            "Sending metering payload"
        );

        let outcome = self
            .inner
            .retry
            .run(&cancel, |_| self.send_once(body.clone()), MeterError::is_retryable)
            .await;

        match outcome {
            RetryResult::Success(()) => Ok(()),
            RetryResult::Failed { error, attempts } => Err(MeterError::metering(attempts, error)),
            RetryResult::NonRetryable { error, .. } => Err(error),
            RetryResult::Cancelled { .. } => Err(MeterError::Cancelled),
        }
    }

    async fn send_once(&self, body: Bytes) -> MeterResult<()> {
        let response = self
            .inner
            .client
            .post(&self.inner.endpoint)
            .header(CONTENT_TYPE, JSON_CONTENT_TYPE)
            .header("x-api-key", self.inner.api_key.expose_secret())
            .header(USER_AGENT, &self.inner.user_agent)
            .body(body)
            .send()
            .await
            .map_err(|e| MeterError::network(format!("Metering request failed: {e}")))?;

        let status = response.status();
        if status.is_success() {
            return Ok(());
        }

        let text = response.text().await.unwrap_or_default();
        if status.is_client_error() {
            return Err(MeterError::validation_status(
                status.as_u16(),
                format!("Metering API returned {status}: {text}"),
            ));
        }
        Err(MeterError::network(format!("Metering API returned {status}: {text}")))
    }

    /// Send a payload on a tracked background task.
    ///
    /// Without a Tokio runtime the payload is dropped with a warning.
    pub fn spawn(&self, payload: TelemetryPayload) {
        let Ok(handle) = tokio::runtime::Handle::try_current() else {
            warn!("No async runtime available, metering payload dropped");
            return;
        };

        let dispatcher = self.clone();
        self.tracker.spawn_on(
            async move {
                let outcome = AssertUnwindSafe(dispatcher.dispatch(&payload))
                    .catch_unwind()
                    .await;
                match outcome {
                    Ok(Ok(())) => debug!(
                        transaction_id = payload.transaction_id().unwrap_or("-"),
                        "Metering payload delivered"
                    ),
                    Ok(Err(e)) => error!(error = %e, "Failed to send metering data"),
                    Err(panic) => error!(panic = %panic_message(&*panic), "Metering task panicked"),
                }
            },
            &handle,
        );
    }

    /// Wait until every background send has finished
    pub async fn flush(&self) {
        self.tracker.close();
        self.tracker.wait().await;
        self.tracker.reopen();
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(message) = panic.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic".to_string()
    }
}
