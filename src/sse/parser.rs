//! SSE stream parsing logic
//!
//! Contains the stateful SseParser for accumulating lines and emitting frames,
//! as well as the core parsing functions.

use serde::de::DeserializeOwned;

use super::events::{Envelope, LinkEvent, SseFrame, SseLine, SseParseError};
use super::payloads::{
    AckPayload, ConnectedPayload, DisconnectedPayload, ErrorPayload, MessagePayload,
    PairingPayload, RawEnvelope,
};

/// Parse a single SSE line into its component type
pub fn parse_sse_line(line: &str) -> SseLine {
    if line.is_empty() {
        return SseLine::Empty;
    }

    if let Some(stripped) = line.strip_prefix(':') {
        return SseLine::Comment(stripped.trim().to_string());
    }

    if let Some(rest) = line.strip_prefix("event:") {
        return SseLine::Event(rest.trim().to_string());
    }

    if let Some(rest) = line.strip_prefix("data:") {
        return SseLine::Data(rest.trim().to_string());
    }

    // Unknown line format - treat as comment
    SseLine::Comment(line.to_string())
}

fn decode<T: DeserializeOwned>(event_type: &str, value: serde_json::Value) -> Result<T, SseParseError> {
    serde_json::from_value(value).map_err(|e| SseParseError::InvalidJson {
        event_type: event_type.to_string(),
        source: e.to_string(),
    })
}

/// Parse an SSE event type and its data into a typed frame.
///
/// An empty `event_type` (no `event:` line) or the default `message` type
/// defers to the envelope's own `type` field.
pub fn parse_sse_event(event_type: &str, data: &str) -> Result<SseFrame, SseParseError> {
    if matches!(event_type, "ping" | "heartbeat" | "keepalive") {
        return Ok(SseFrame::Keepalive);
    }

    let raw: RawEnvelope = serde_json::from_str(data).map_err(|e| SseParseError::InvalidJson {
        event_type: event_type.to_string(),
        source: e.to_string(),
    })?;
    let kind = match event_type {
        "" | "message" => match raw.kind {
            Some(kind) if !kind.is_empty() => kind,
            _ => return Err(SseParseError::UnknownEventType(event_type.to_string())),
        },
        named => named.to_string(),
    };
    let event_type = kind.as_str();
    if matches!(event_type, "ping" | "heartbeat" | "keepalive") {
        return Ok(SseFrame::Keepalive);
    }
    let payload = raw.payload;

    let event = match event_type {
        "pairing_issued" | "qr" | "qr_code" => LinkEvent::PairingIssued {
            payload: decode::<PairingPayload>(event_type, payload)?.pairing_payload,
        },
        "authenticated" | "scan_accepted" => LinkEvent::Authenticated,
        "connected" | "ready" => LinkEvent::Connected {
            identity: decode::<ConnectedPayload>(event_type, payload)?.into_identity(),
        },
        "disconnected" => {
            let body: DisconnectedPayload = if payload.is_null() {
                DisconnectedPayload::default()
            } else {
                decode(event_type, payload)?
            };
            LinkEvent::Disconnected {
                reason: body.reason,
            }
        }
        "message_inbound" => LinkEvent::MessageInbound {
            message: decode::<MessagePayload>(event_type, payload)?.into_message(),
        },
        "message_outbound_ack" => {
            let ack: AckPayload = decode(event_type, payload)?;
            LinkEvent::MessageOutboundAck {
                message_id: ack.message_id,
                status: ack.status,
                message: ack.message,
            }
        }
        "error" => LinkEvent::Error {
            message: decode::<ErrorPayload>(event_type, payload)?.message,
        },
        // Ignore unknown events instead of erroring (more resilient)
        _ => return Ok(SseFrame::Keepalive),
    };

    Ok(SseFrame::Event(Envelope {
        channel_id: raw.channel_id.into(),
        session_id: raw.session_id,
        event,
    }))
}

/// Stateful SSE parser that accumulates lines and emits complete frames
#[derive(Debug, Default)]
pub struct SseParser {
    /// Current event type being accumulated
    current_event_type: Option<String>,
    /// Accumulated data lines (SSE allows multiple data: lines)
    data_buffer: Vec<String>,
}

impl SseParser {
    /// Create a new SSE parser
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed a line to the parser, potentially returning a complete frame
    ///
    /// Returns:
    /// - `Ok(Some(frame))` - A complete frame was parsed
    /// - `Ok(None)` - Line was consumed but the frame is incomplete
    /// - `Err(error)` - Parse error occurred
    pub fn feed_line(&mut self, line: &str) -> Result<Option<SseFrame>, SseParseError> {
        match parse_sse_line(line) {
            SseLine::Event(event_type) => {
                self.current_event_type = Some(event_type);
                Ok(None)
            }
            SseLine::Data(data) => {
                self.data_buffer.push(data);
                Ok(None)
            }
            SseLine::Empty => self.try_emit(),
            SseLine::Comment(_) => Ok(None),
        }
    }

    fn try_emit(&mut self) -> Result<Option<SseFrame>, SseParseError> {
        if self.current_event_type.is_none() && self.data_buffer.is_empty() {
            return Ok(None);
        }

        let event_type = self.current_event_type.take();
        let data = self.data_buffer.join("\n");
        self.data_buffer.clear();

        match event_type {
            Some(et) if data.is_empty() => {
                if matches!(et.as_str(), "ping" | "heartbeat" | "keepalive") {
                    Ok(Some(SseFrame::Keepalive))
                } else {
                    Err(SseParseError::MissingData { event_type: et })
                }
            }
            Some(et) => parse_sse_event(&et, &data).map(Some),
            None if data.is_empty() => Ok(None),
            // The envelope's "type" field names the event.
            None => parse_sse_event("", &data).map(Some),
        }
    }

    /// Reset the parser state
    pub fn reset(&mut self) {
        self.current_event_type = None;
        self.data_buffer.clear();
    }
}
