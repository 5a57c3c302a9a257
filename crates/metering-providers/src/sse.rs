//! Server-sent events parsing for the direct API.

use bytes::Bytes;
use futures::{Stream, StreamExt};
use metering_core::{MeterError, MeterResult, StreamEvent};
use tracing::debug;

/// Parse an SSE byte stream into stream events.
///
/// Events are separated by a blank line. Only `data:` lines are read;
/// `event:` names are redundant with the JSON `type` field. Payloads that do
/// not match a known event are skipped.
pub fn parse_sse_stream<S, E>(body: S) -> impl Stream<Item = MeterResult<StreamEvent>> + Send
where
    S: Stream<Item = Result<Bytes, E>> + Send + 'static,
    E: std::fmt::Display + Send,
{
    async_stream::stream! {
        let mut body = std::pin::pin!(body);
        let mut buffer: Vec<u8> = Vec::new();

        while let Some(chunk) = body.next().await {
            let bytes = match chunk {
                Ok(bytes) => bytes,
                Err(e) => {
                    yield Err(MeterError::provider("anthropic", format!("stream read failed: {e}"), None, true));
                    return;
                }
            };
            buffer.extend_from_slice(&bytes);

            while let Some(end) = find_event_end(&buffer) {
                let raw: Vec<u8> = buffer.drain(..end.0).collect();
                buffer.drain(..end.1);
                for event in parse_event(&raw) {
                    yield event;
                }
            }
        }

        if !buffer.is_empty() {
            for event in parse_event(&buffer) {
                yield event;
            }
        }
    }
}

/// Position of the next event terminator: (event length, terminator length)
fn find_event_end(buffer: &[u8]) -> Option<(usize, usize)> {
    let lf = buffer.windows(2).position(|w| w == b"\n\n").map(|p| (p, 2));
    let crlf = buffer
        .windows(4)
        .position(|w| w == b"\r\n\r\n")
        .map(|p| (p, 4));
    match (lf, crlf) {
        (Some(a), Some(b)) => Some(if a.0 <= b.0 { a } else { b }),
        (a, b) => a.or(b),
    }
}

fn parse_event(raw: &[u8]) -> Vec<MeterResult<StreamEvent>> {
    let text = String::from_utf8_lossy(raw);
    let mut data = String::new();
    for line in text.lines() {
        let line = line.trim_end_matches('\r');
        if let Some(rest) = line.strip_prefix("data:") {
            if !data.is_empty() {
                data.push('\n');
            }
            data.push_str(rest.strip_prefix(' ').unwrap_or(rest));
        }
    }

    let data = data.trim();
    if data.is_empty() || data == "[DONE]" {
        return Vec::new();
    }

    match serde_json::from_str::<StreamEvent>(data) {
        Ok(event) => vec![Ok(event)],
        Err(e) => {
            debug!(error = %e, data, "Skipping unrecognized stream event");
            Vec::new()
        }
    }
}
