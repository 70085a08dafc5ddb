//! SSE payload deserialization structs
//!
//! Wire shape: `{"type": "...", "channelId": "...", "sessionId": "...", "payload": {...}}`.
//! The backends seen in the field disagree on field names, so aliases are
//! accepted generously here and nowhere else.

use serde::Deserialize;

use crate::domain::{DeliveryStatus, Identity, Message};

/// Routing envelope around every event payload.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct RawEnvelope {
    #[serde(rename = "type", default)]
    pub kind: Option<String>,
    #[serde(alias = "channel_id", alias = "instanceId", alias = "instance_id")]
    pub channel_id: String,
    #[serde(default, alias = "session_id", alias = "session")]
    pub session_id: Option<String>,
    #[serde(default)]
    pub payload: serde_json::Value,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct PairingPayload {
    #[serde(alias = "qr", alias = "qrCode", alias = "pairing_payload", alias = "code")]
    pub pairing_payload: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub(crate) enum ConnectedPayload {
    Nested { identity: Identity },
    Flat(Identity),
}

impl ConnectedPayload {
    pub fn into_identity(self) -> Identity {
        match self {
            ConnectedPayload::Nested { identity } | ConnectedPayload::Flat(identity) => identity,
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub(crate) struct DisconnectedPayload {
    #[serde(default)]
    pub reason: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub(crate) enum MessagePayload {
    Nested { message: Message },
    Flat(Message),
}

impl MessagePayload {
    pub fn into_message(self) -> Message {
        match self {
            MessagePayload::Nested { message } | MessagePayload::Flat(message) => message,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct AckPayload {
    #[serde(alias = "id", alias = "message_id")]
    pub message_id: String,
    #[serde(default = "default_ack_status", alias = "delivery")]
    pub status: DeliveryStatus,
    #[serde(default)]
    pub message: Option<Message>,
}

fn default_ack_status() -> DeliveryStatus {
    DeliveryStatus::Sent
}

#[derive(Debug, Clone, Deserialize)]
pub(crate) struct ErrorPayload {
    #[serde(alias = "error", alias = "reason")]
    pub message: String,
}
