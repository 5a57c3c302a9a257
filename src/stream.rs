//! Metered event streams.
//!
//! A [`MeteredStream`] forwards provider events unchanged while folding them
//! into a shared session. The session is finalized exactly once: when the
//! provider stream ends, when [`MeteredStream::close`] is called, or when
//! the stream is dropped. Finalizing spawns the metering send and never
//! waits on it.

use crate::client::MeteredClient;
use chrono::Utc;
use futures::stream::Stream;
use metering_core::{
    EventStream, MeterError, MeterResult, ProviderKind, StopReason, StreamAccumulator,
    StreamEvent, UsageMetadata,
};
use metering_providers::to_direct_model;
use metering_telemetry::{extract_streamed, PromptData, VisionDetectionResult};
use parking_lot::Mutex;
use pin_project_lite::pin_project;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Instant;
use tracing::debug;

/// Everything needed to meter a stream once it finishes
pub(crate) struct StreamFinalizer {
    pub(crate) client: MeteredClient,
    pub(crate) metadata: UsageMetadata,
    pub(crate) vision: VisionDetectionResult,
    pub(crate) prompts: Option<PromptData>,
}

struct Session {
    accumulator: StreamAccumulator,
    failure: Option<StopReason>,
    finalizer: Option<StreamFinalizer>,
}

/// Shared view of a stream's session.
///
/// Obtained from [`MeteredStream::handle`]; usable from another task while
/// the stream is being consumed.
#[derive(Clone)]
pub struct StreamHandle {
    session: Arc<Mutex<Session>>,
}

impl std::fmt::Debug for StreamHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StreamHandle")
            .field("token_counts", &self.token_counts())
            .field("closed", &self.is_closed())
            .finish()
    }
}

impl StreamHandle {
    /// Current `(input, output, total)` token counts
    pub fn token_counts(&self) -> (u64, u64, u64) {
        self.session.lock().accumulator.token_counts()
    }

    /// Whether the session has been finalized
    pub fn is_closed(&self) -> bool {
        self.session.lock().finalizer.is_none()
    }

    /// Finalize the session; later calls do nothing
    pub fn close(&self) {
        let finished = Instant::now();
        let (finalizer, accumulator, failure) = {
            let mut session = self.session.lock();
            let Some(finalizer) = session.finalizer.take() else {
                return;
            };
            (finalizer, session.accumulator.clone(), session.failure)
        };

        let text = accumulator.text().to_string();
        let mut record = accumulator.into_usage_record(finished);
        if let Some(reason) = failure {
            record.stop_reason = reason;
        }
        if let Ok(model) = to_direct_model(&record.model) {
            record.model = model;
        }
        debug!(
            input_tokens = record.input_tokens,
            output_tokens = record.output_tokens,
            ttft_ms = record.timing.time_to_first_token.as_millis() as u64,
            "Stream finalized"
        );

        let StreamFinalizer {
            client,
            metadata,
            vision,
            prompts,
        } = finalizer;
        let prompts = prompts.map(|captured| {
            let truncated = captured.truncated;
            captured.merge(extract_streamed(&text, truncated))
        });
        client.meter(record, metadata, vision, prompts);
    }

    fn observe(&self, event: &StreamEvent) {
        let mut session = self.session.lock();
        if session.finalizer.is_some() {
            session.accumulator.observe(event, Instant::now(), Utc::now());
        }
    }

    fn provider(&self) -> ProviderKind {
        self.session.lock().accumulator.provider()
    }

    fn record_failure(&self, error: &MeterError) {
        let reason = if error.is_cancelled() {
            StopReason::Cancelled
        } else {
            StopReason::Error
        };
        let mut session = self.session.lock();
        if session.failure.is_none() {
            session.failure = Some(reason);
        }
    }
}

pin_project! {
    /// A provider event stream that meters itself.
    pub struct MeteredStream {
        #[pin]
        inner: EventStream,
        handle: StreamHandle,
        done: bool,
    }

    impl PinnedDrop for MeteredStream {
        fn drop(this: Pin<&mut Self>) {
            this.project().handle.close();
        }
    }
}

impl std::fmt::Debug for MeteredStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MeteredStream")
            .field("handle", &self.handle)
            .field("done", &self.done)
            .finish()
    }
}

impl MeteredStream {
    pub(crate) fn new(
        inner: EventStream,
        accumulator: StreamAccumulator,
        finalizer: StreamFinalizer,
    ) -> Self {
        Self {
            inner,
            handle: StreamHandle {
                session: Arc::new(Mutex::new(Session {
                    accumulator,
                    failure: None,
                    finalizer: Some(finalizer),
                })),
            },
            done: false,
        }
    }

    /// Shared handle to this stream's session
    pub fn handle(&self) -> StreamHandle {
        self.handle.clone()
    }

    /// Current `(input, output, total)` token counts
    pub fn token_counts(&self) -> (u64, u64, u64) {
        self.handle.token_counts()
    }

    /// Text generated so far
    pub fn text(&self) -> String {
        self.handle.session.lock().accumulator.text().to_string()
    }

    /// Stop metering and send the payload; later calls do nothing.
    ///
    /// Events polled after closing are still forwarded but no longer
    /// counted.
    pub fn close(&self) {
        self.handle.close();
    }

    /// Whether the session has been finalized
    pub fn is_closed(&self) -> bool {
        self.handle.is_closed()
    }

    /// Drain the stream and return the generated text
    pub async fn collect_text(mut self) -> MeterResult<String> {
        use futures::StreamExt;

        while let Some(event) = self.next().await {
            event?;
        }
        Ok(self.text())
    }
}

impl Stream for MeteredStream {
    type Item = MeterResult<StreamEvent>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.project();

        if *this.done {
            return Poll::Ready(None);
        }

        match this.inner.poll_next(cx) {
            Poll::Ready(Some(Ok(event))) => {
                this.handle.observe(&event);
                match event {
                    StreamEvent::Error { error } => {
                        let e = error.to_error(this.handle.provider().display_name());
                        this.handle.record_failure(&e);
                        Poll::Ready(Some(Err(e)))
                    }
                    event => Poll::Ready(Some(Ok(event))),
                }
            }
            Poll::Ready(Some(Err(e))) => {
                this.handle.record_failure(&e);
                Poll::Ready(Some(Err(e)))
            }
            Poll::Ready(None) => {
                *this.done = true;
                this.handle.close();
                Poll::Ready(None)
            }
            Poll::Pending => Poll::Pending,
        }
    }
}
