//! Wire types exchanged with the messaging backend.

use serde::{Deserialize, Serialize};

use crate::domain::{Identity, LinkStatus};

/// Reply to `POST /channels/{id}/connect`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectResponse {
    pub status: LinkStatus,
    /// Some backends return the first pairing payload inline; others only
    /// push it later as a `pairing_issued` event.
    #[serde(default, alias = "qr", alias = "qrCode")]
    pub pairing_payload: Option<String>,
    #[serde(default)]
    pub session_id: Option<String>,
}

impl ConnectResponse {
    pub fn pending() -> Self {
        Self {
            status: LinkStatus::QrPending,
            pairing_payload: None,
            session_id: None,
        }
    }

    pub fn with_payload(mut self, payload: impl Into<String>) -> Self {
        self.pairing_payload = Some(payload.into());
        self
    }

    pub fn with_session(mut self, session_id: impl Into<String>) -> Self {
        self.session_id = Some(session_id.into());
        self
    }
}

/// Reply to `GET /channels/{id}/status`, also used as the poll snapshot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusSnapshot {
    pub status: LinkStatus,
    #[serde(default, alias = "qr", alias = "qrCode")]
    pub pairing_payload: Option<String>,
    #[serde(default)]
    pub identity: Option<Identity>,
    #[serde(default, alias = "error")]
    pub last_error: Option<String>,
    #[serde(default)]
    pub session_id: Option<String>,
}

impl StatusSnapshot {
    pub fn new(status: LinkStatus) -> Self {
        Self {
            status,
            pairing_payload: None,
            identity: None,
            last_error: None,
            session_id: None,
        }
    }

    pub fn with_payload(mut self, payload: impl Into<String>) -> Self {
        self.pairing_payload = Some(payload.into());
        self
    }

    pub fn with_identity(mut self, identity: Identity) -> Self {
        self.identity = Some(identity);
        self
    }

    pub fn with_error(mut self, message: impl Into<String>) -> Self {
        self.last_error = Some(message.into());
        self
    }

    pub fn with_session(mut self, session_id: impl Into<String>) -> Self {
        self.session_id = Some(session_id.into());
        self
    }
}

/// Body of `POST /channels/{id}/send`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SendRequest {
    pub destination: String,
    pub body: String,
    /// Client-generated reference so retried sends can be deduplicated.
    pub client_ref: String,
}

/// Reply to a send request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SendResponse {
    #[serde(default)]
    pub success: bool,
    #[serde(default, alias = "id")]
    pub message_id: Option<String>,
    #[serde(default)]
    pub error: Option<String>,
}

impl SendResponse {
    pub fn accepted(message_id: impl Into<String>) -> Self {
        Self {
            success: true,
            message_id: Some(message_id.into()),
            error: None,
        }
    }

    pub fn rejected(error: impl Into<String>) -> Self {
        Self {
            success: false,
            message_id: None,
            error: Some(error.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_connect_response_accepts_qr_alias() {
        let response: ConnectResponse =
            serde_json::from_str(r#"{"status":"qr_pending","qr":"2@abc","sessionId":"s1"}"#)
                .unwrap();
        assert_eq!(response.status, LinkStatus::QrPending);
        assert_eq!(response.pairing_payload.as_deref(), Some("2@abc"));
        assert_eq!(response.session_id.as_deref(), Some("s1"));
    }

    #[test]
    fn test_status_snapshot_minimal() {
        let snapshot: StatusSnapshot = serde_json::from_str(r#"{"status":"open"}"#).unwrap();
        assert_eq!(snapshot, StatusSnapshot::new(LinkStatus::Connected));
    }

    #[test]
    fn test_status_snapshot_connected_identity() {
        let snapshot: StatusSnapshot = serde_json::from_str(
            r#"{"status":"connected","identity":{"number":"+5511","name":"Shop"}}"#,
        )
        .unwrap();
        assert_eq!(snapshot.identity, Some(Identity::new("+5511", "Shop")));
    }

    #[test]
    fn test_send_request_is_camel_case() {
        let request = SendRequest {
            destination: "+5511".into(),
            body: "ping".into(),
            client_ref: "r1".into(),
        };
        let json = serde_json::to_value(&request).unwrap();
        assert_eq!(json["clientRef"], "r1");
    }

    #[test]
    fn test_send_response_defaults_to_failure() {
        let response: SendResponse = serde_json::from_str(r#"{"error":"blocked"}"#).unwrap();
        assert!(!response.success);
        assert_eq!(response.error.as_deref(), Some("blocked"));
    }
}
