//! HTTP plumbing shared by both providers.

use futures::{Stream, StreamExt};
use metering_core::{EventStream, MeterError, MeterResult, StreamEvent};
use serde::Deserialize;
use std::future::Future;
use tokio_util::sync::CancellationToken;

/// Race `fut` against cancellation
pub(crate) async fn cancellable<T, F>(cancel: &CancellationToken, fut: F) -> MeterResult<T>
where
    F: Future<Output = MeterResult<T>>,
{
    tokio::select! {
        biased;
        () = cancel.cancelled() => Err(MeterError::Cancelled),
        result = fut => result,
    }
}

/// End an event stream with `Cancelled` once the token fires
pub(crate) fn with_cancellation<S>(events: S, cancel: CancellationToken) -> EventStream
where
    S: Stream<Item = MeterResult<StreamEvent>> + Send + 'static,
{
    let stream = async_stream::stream! {
        let mut events = std::pin::pin!(events);
        loop {
            let next = tokio::select! {
                biased;
                () = cancel.cancelled() => None,
                next = events.next() => Some(next),
            };
            match next {
                None => {
                    yield Err(MeterError::Cancelled);
                    return;
                }
                Some(Some(item)) => yield item,
                Some(None) => return,
            }
        }
    };
    Box::pin(stream)
}

/// Whether an HTTP status from a provider is worth retrying
pub(crate) fn is_retryable_status(status: u16) -> bool {
    status == 429 || status >= 500
}

#[derive(Debug, Deserialize)]
struct ErrorEnvelope {
    error: Option<ErrorDetail>,
    message: Option<String>,
    #[serde(rename = "Message")]
    message_alt: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ErrorDetail {
    #[serde(rename = "type")]
    error_type: Option<String>,
    message: Option<String>,
}

/// Build a provider error from a non-success response body.
///
/// Understands both `{"error": {"type", "message"}}` and the gateway's
/// `{"message"}` / `{"Message"}` shapes; anything else is used verbatim.
pub(crate) fn error_from_body(
    provider: &str,
    status: u16,
    error_type_header: Option<&str>,
    body: &[u8],
) -> MeterError {
    let message = match serde_json::from_slice::<ErrorEnvelope>(body) {
        Ok(envelope) => {
            let (kind, message) = match envelope.error {
                Some(detail) => (detail.error_type, detail.message),
                None => (None, envelope.message.or(envelope.message_alt)),
            };
            let kind = kind.or_else(|| error_type_header.map(ToString::to_string));
            let message = message.unwrap_or_else(|| "Unknown error".to_string());
            match kind {
                Some(kind) => format!("{kind}: {message}"),
                None => message,
            }
        }
        Err(_) => String::from_utf8_lossy(body).into_owned(),
    };
    MeterError::provider(
        provider,
        format!("HTTP {status}: {message}"),
        Some(status),
        is_retryable_status(status),
    )
}
