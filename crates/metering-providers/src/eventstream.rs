//! Decoder for the gateway's binary event-stream framing.
//!
//! Each frame is laid out as:
//!
//! ```text
//! [total_len: u32][headers_len: u32][prelude_crc: u32][headers][payload][message_crc: u32]
//! ```
//!
//! Checksums are skipped; TLS already covers transport integrity.

use async_stream::stream;
use base64::Engine;
use bytes::{Buf, Bytes, BytesMut};
use futures::{Stream, StreamExt};
use metering_core::{MeterError, MeterResult, StreamEvent};
use serde::Deserialize;
use tracing::debug;

const PRELUDE_LEN: usize = 12;
const CRC_LEN: usize = 4;
const MIN_FRAME_LEN: usize = PRELUDE_LEN + CRC_LEN;
const MAX_FRAME_LEN: usize = 16 * 1024 * 1024;

/// Typed header value
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HeaderValue {
    /// Boolean (types 0 and 1)
    Bool(bool),
    /// Signed byte
    Byte(i8),
    /// Signed 16-bit integer
    Short(i16),
    /// Signed 32-bit integer
    Int(i32),
    /// Signed 64-bit integer
    Long(i64),
    /// Opaque bytes
    Bytes(Bytes),
    /// UTF-8 string
    String(String),
    /// Milliseconds since the epoch
    Timestamp(i64),
    /// 16-byte UUID
    Uuid([u8; 16]),
}

impl HeaderValue {
    /// String value, if this is a string header
    #[must_use]
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::String(s) => Some(s),
            _ => None,
        }
    }
}

/// A decoded frame
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    /// Headers in wire order
    pub headers: Vec<(String, HeaderValue)>,
    /// Raw payload
    pub payload: Bytes,
}

impl Frame {
    /// Look up a string header by name
    #[must_use]
    pub fn header_str(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(n, _)| n == name)
            .and_then(|(_, v)| v.as_str())
    }
}

/// Incremental frame decoder
#[derive(Debug, Default)]
pub struct FrameDecoder {
    buffer: BytesMut,
}

impl FrameDecoder {
    /// Create an empty decoder
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Append received bytes
    pub fn push(&mut self, data: &[u8]) {
        self.buffer.extend_from_slice(data);
    }

    /// Bytes buffered but not yet decoded
    #[must_use]
    pub fn remaining(&self) -> usize {
        self.buffer.len()
    }

    /// Decode the next complete frame, if one is buffered
    pub fn next_frame(&mut self) -> MeterResult<Option<Frame>> {
        if self.buffer.len() < PRELUDE_LEN {
            return Ok(None);
        }
        let total_len = read_u32(&self.buffer[0..4]) as usize;
        let headers_len = read_u32(&self.buffer[4..8]) as usize;

        if !(MIN_FRAME_LEN..=MAX_FRAME_LEN).contains(&total_len)
            || headers_len > total_len - MIN_FRAME_LEN
        {
            return Err(framing_error(format!(
                "invalid frame prelude (total {total_len}, headers {headers_len})"
            )));
        }
        if self.buffer.len() < total_len {
            return Ok(None);
        }

        let mut frame = self.buffer.split_to(total_len).freeze();
        frame.advance(PRELUDE_LEN);
        let header_bytes = frame.split_to(headers_len);
        let payload = frame.split_to(total_len - MIN_FRAME_LEN - headers_len);

        Ok(Some(Frame {
            headers: decode_headers(header_bytes)?,
            payload,
        }))
    }
}

fn read_u32(bytes: &[u8]) -> u32 {
    u32::from_be_bytes([bytes[0], bytes[1], bytes[2], bytes[3]])
}

fn framing_error(message: impl Into<String>) -> MeterError {
    MeterError::provider("bedrock", message, None, false)
}

fn decode_headers(mut buf: Bytes) -> MeterResult<Vec<(String, HeaderValue)>> {
    let mut headers = Vec::new();
    while buf.has_remaining() {
        let name_len = usize::from(buf.get_u8());
        ensure(&buf, name_len)?;
        let name = String::from_utf8_lossy(&buf.split_to(name_len)).into_owned();

        ensure(&buf, 1)?;
        let value = match buf.get_u8() {
            0 => HeaderValue::Bool(true),
            1 => HeaderValue::Bool(false),
            2 => {
                ensure(&buf, 1)?;
                HeaderValue::Byte(buf.get_i8())
            }
            3 => {
                ensure(&buf, 2)?;
                HeaderValue::Short(buf.get_i16())
            }
            4 => {
                ensure(&buf, 4)?;
                HeaderValue::Int(buf.get_i32())
            }
            5 => {
                ensure(&buf, 8)?;
                HeaderValue::Long(buf.get_i64())
            }
            6 => HeaderValue::Bytes(take_sized(&mut buf)?),
            7 => {
                let raw = take_sized(&mut buf)?;
                HeaderValue::String(String::from_utf8_lossy(&raw).into_owned())
            }
            8 => {
                ensure(&buf, 8)?;
                HeaderValue::Timestamp(buf.get_i64())
            }
            9 => {
                ensure(&buf, 16)?;
                let mut uuid = [0u8; 16];
                buf.copy_to_slice(&mut uuid);
                HeaderValue::Uuid(uuid)
            }
            other => return Err(framing_error(format!("unknown header type {other}"))),
        };
        headers.push((name, value));
    }
    Ok(headers)
}

fn take_sized(buf: &mut Bytes) -> MeterResult<Bytes> {
    ensure(buf, 2)?;
    let len = usize::from(buf.get_u16());
    ensure(buf, len)?;
    Ok(buf.split_to(len))
}

fn ensure(buf: &Bytes, needed: usize) -> MeterResult<()> {
    if buf.remaining() < needed {
        return Err(framing_error("truncated frame header"));
    }
    Ok(())
}

#[derive(Deserialize)]
struct ChunkPayload {
    bytes: String,
}

#[derive(Deserialize)]
struct ExceptionPayload {
    #[serde(alias = "Message")]
    message: Option<String>,
}

/// Interpret a frame as a stream event.
///
/// Returns `Ok(None)` for frames that carry nothing of interest. Exception
/// and error frames become provider errors naming the exception type.
pub fn frame_to_event(frame: &Frame) -> MeterResult<Option<StreamEvent>> {
    match frame.header_str(":message-type") {
        Some("exception") => {
            let kind = frame.header_str(":exception-type").unwrap_or("UnknownException");
            let message = serde_json::from_slice::<ExceptionPayload>(&frame.payload)
                .ok()
                .and_then(|p| p.message)
                .unwrap_or_else(|| String::from_utf8_lossy(&frame.payload).into_owned());
            Err(MeterError::provider(
                "bedrock",
                format!("{kind}: {message}"),
                None,
                false,
            ))
        }
        Some("error") => {
            let code = frame.header_str(":error-code").unwrap_or("UnknownError");
            let message = frame.header_str(":error-message").unwrap_or_default();
            Err(MeterError::provider(
                "bedrock",
                format!("{code}: {message}"),
                None,
                false,
            ))
        }
        Some("event") | None => {
            if frame.header_str(":event-type").is_some_and(|t| t != "chunk") {
                return Ok(None);
            }
            let chunk: ChunkPayload = serde_json::from_slice(&frame.payload)?;
            let decoded = base64::engine::general_purpose::STANDARD
                .decode(chunk.bytes.as_bytes())
                .map_err(|e| framing_error(format!("invalid chunk encoding: {e}")))?;
            match serde_json::from_slice::<StreamEvent>(&decoded) {
                Ok(event) => Ok(Some(event)),
                Err(e) => {
                    debug!(error = %e, "Skipping unrecognized stream event");
                    Ok(None)
                }
            }
        }
        Some(other) => {
            debug!(message_type = other, "Skipping frame");
            Ok(None)
        }
    }
}

/// Turn a raw response body into stream events
pub fn decode_event_stream<S, E>(body: S) -> impl Stream<Item = MeterResult<StreamEvent>> + Send
where
    S: Stream<Item = Result<Bytes, E>> + Send + 'static,
    E: std::fmt::Display + Send,
{
    stream! {
        let mut body = std::pin::pin!(body);
        let mut decoder = FrameDecoder::new();

        while let Some(chunk) = body.next().await {
            match chunk {
                Ok(bytes) => decoder.push(&bytes),
                Err(e) => {
                    yield Err(MeterError::provider("bedrock", format!("stream read failed: {e}"), None, true));
                    return;
                }
            }

            loop {
                match decoder.next_frame() {
                    Ok(Some(frame)) => match frame_to_event(&frame) {
                        Ok(Some(event)) => yield Ok(event),
                        Ok(None) => {}
                        Err(e) => {
                            yield Err(e);
                            return;
                        }
                    },
                    Ok(None) => break,
                    Err(e) => {
                        yield Err(e);
                        return;
                    }
                }
            }
        }

        if decoder.remaining() > 0 {
            debug!(bytes = decoder.remaining(), "Event stream ended with a partial frame");
        }
    }
}
