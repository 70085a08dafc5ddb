//! Push event types.
//!
//! [`LinkEvent`] is the closed set of lifecycle events the backend can
//! announce for a channel. Each variant carries exactly the fields that are
//! valid for it. [`Envelope`] adds the routing data (`channelId`, optional
//! backend session id) that every event on the wire carries.

use serde::{Deserialize, Serialize};

use crate::domain::{ChannelId, DeliveryStatus, Identity, Message};

/// Lifecycle event for one channel, regardless of how it was observed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum LinkEvent {
    /// A (new) pairing payload to render as a QR code.
    PairingIssued { payload: String },
    /// The phone scanned the code; the backend is authenticating.
    Authenticated,
    /// Session established.
    Connected { identity: Identity },
    /// Session dropped or torn down by the backend.
    Disconnected {
        #[serde(default)]
        reason: Option<String>,
    },
    /// A message arrived on the linked number.
    MessageInbound { message: Message },
    /// The backend acknowledged (or updated delivery of) an outbound message.
    MessageOutboundAck {
        message_id: String,
        status: DeliveryStatus,
        #[serde(default)]
        message: Option<Message>,
    },
    /// The backend failed the session (scan rejected, auth revoked, ...).
    Error { message: String },
}

impl LinkEvent {
    /// Wire name of the event.
    pub fn kind(&self) -> &'static str {
        match self {
            LinkEvent::PairingIssued { .. } => "pairing_issued",
            LinkEvent::Authenticated => "authenticated",
            LinkEvent::Connected { .. } => "connected",
            LinkEvent::Disconnected { .. } => "disconnected",
            LinkEvent::MessageInbound { .. } => "message_inbound",
            LinkEvent::MessageOutboundAck { .. } => "message_outbound_ack",
            LinkEvent::Error { .. } => "error",
        }
    }

    /// Terminal events directly determine the channel's status.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            LinkEvent::Connected { .. } | LinkEvent::Disconnected { .. } | LinkEvent::Error { .. }
        )
    }
}

/// A [`LinkEvent`] addressed to a channel.
#[derive(Debug, Clone, PartialEq)]
pub struct Envelope {
    pub channel_id: ChannelId,
    /// Backend session the event belongs to, when the backend tags it.
    pub session_id: Option<String>,
    pub event: LinkEvent,
}

impl Envelope {
    pub fn new(channel_id: impl Into<ChannelId>, event: LinkEvent) -> Self {
        Self {
            channel_id: channel_id.into(),
            session_id: None,
            event,
        }
    }

    pub fn with_session(mut self, session_id: impl Into<String>) -> Self {
        self.session_id = Some(session_id.into());
        self
    }
}

/// One decoded SSE frame.
#[derive(Debug, Clone, PartialEq)]
pub enum SseFrame {
    Event(Envelope),
    /// Heartbeats and event types this client does not handle.
    Keepalive,
}

/// Types of SSE lines
#[derive(Debug, Clone, PartialEq)]
pub enum SseLine {
    /// Event type declaration (e.g., "event: connected")
    Event(String),
    /// Data payload (e.g., "data: {\"channelId\": \"ch1\"}")
    Data(String),
    /// Empty line - signals end of event
    Empty,
    /// Comment line (starts with ':')
    Comment(String),
}

/// Errors that can occur during SSE parsing
#[derive(Debug, Clone, PartialEq)]
pub enum SseParseError {
    /// Unknown event type received
    UnknownEventType(String),
    /// Invalid JSON in data payload
    InvalidJson { event_type: String, source: String },
    /// Missing data for event
    MissingData { event_type: String },
}

impl std::fmt::Display for SseParseError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SseParseError::UnknownEventType(t) => write!(f, "Unknown SSE event type: {}", t),
            SseParseError::InvalidJson { event_type, source } => {
                write!(f, "Invalid JSON for event '{}': {}", event_type, source)
            }
            SseParseError::MissingData { event_type } => {
                write!(f, "Missing data for event type: {}", event_type)
            }
        }
    }
}

impl std::error::Error for SseParseError {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_terminal_events() {
        assert!(LinkEvent::Connected {
            identity: Identity::new("+100", "Demo")
        }
        .is_terminal());
        assert!(LinkEvent::Disconnected { reason: None }.is_terminal());
        assert!(LinkEvent::Error {
            message: "x".into()
        }
        .is_terminal());
        assert!(!LinkEvent::Authenticated.is_terminal());
        assert!(!LinkEvent::PairingIssued {
            payload: "P1".into()
        }
        .is_terminal());
    }

    #[test]
    fn test_kind_matches_serde_tag() {
        let event = LinkEvent::Disconnected {
            reason: Some("logged out".into()),
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], event.kind());
    }

    #[test]
    fn test_parse_error_display() {
        assert_eq!(
            SseParseError::MissingData {
                event_type: "connected".into()
            }
            .to_string(),
            "Missing data for event type: connected"
        );
    }
}
