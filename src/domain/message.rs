//! Message projection shown in the feed.
//!
//! Messages are owned by the backend. The feed only caches them, and the only
//! mutation ever applied after creation is a delivery-status update on an
//! outbound message.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Message direction relative to the linked number.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Direction {
    Inbound,
    Outbound,
}

/// Delivery status of an outbound message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeliveryStatus {
    Pending,
    Sent,
    Delivered,
    Read,
    Failed,
}

impl DeliveryStatus {
    /// Whether moving from `self` to `next` is a forward step.
    ///
    /// Receipts may arrive out of order or twice; a stale receipt must not
    /// move a message backwards. `Failed` is only reachable before delivery.
    pub fn can_advance_to(self, next: DeliveryStatus) -> bool {
        match (self, next) {
            (DeliveryStatus::Failed, _) => false,
            (DeliveryStatus::Pending | DeliveryStatus::Sent, DeliveryStatus::Failed) => true,
            (_, DeliveryStatus::Failed) => false,
            (current, next) => next > current,
        }
    }
}

/// A single message in a channel conversation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    pub id: String,
    pub direction: Direction,
    #[serde(alias = "sender")]
    pub from: String,
    #[serde(alias = "recipient")]
    pub to: String,
    #[serde(alias = "text")]
    pub body: String,
    #[serde(default = "Utc::now")]
    pub timestamp: DateTime<Utc>,
    #[serde(default = "default_delivery", alias = "status")]
    pub delivery: DeliveryStatus,
}

fn default_delivery() -> DeliveryStatus {
    DeliveryStatus::Sent
}

impl Message {
    pub fn inbound(
        id: impl Into<String>,
        from: impl Into<String>,
        to: impl Into<String>,
        body: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            direction: Direction::Inbound,
            from: from.into(),
            to: to.into(),
            body: body.into(),
            timestamp: Utc::now(),
            delivery: DeliveryStatus::Delivered,
        }
    }

    /// A message just accepted by the backend for sending.
    pub fn outbound(
        id: impl Into<String>,
        from: impl Into<String>,
        to: impl Into<String>,
        body: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            direction: Direction::Outbound,
            from: from.into(),
            to: to.into(),
            body: body.into(),
            timestamp: Utc::now(),
            delivery: DeliveryStatus::Sent,
        }
    }

    /// Apply a delivery receipt. Returns true when the message changed.
    pub fn apply_delivery(&mut self, status: DeliveryStatus) -> bool {
        if self.direction != Direction::Outbound || !self.delivery.can_advance_to(status) {
            return false;
        }
        self.delivery = status;
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn outbound() -> Message {
        Message::outbound("m1", "+100", "+200", "hi")
    }

    #[test]
    fn test_delivery_only_moves_forward() {
        let mut msg = outbound();
        assert!(msg.apply_delivery(DeliveryStatus::Delivered));
        assert!(!msg.apply_delivery(DeliveryStatus::Sent));
        assert!(msg.apply_delivery(DeliveryStatus::Read));
        assert!(!msg.apply_delivery(DeliveryStatus::Read));
        assert!(!msg.apply_delivery(DeliveryStatus::Failed));
        assert_eq!(msg.delivery, DeliveryStatus::Read);
    }

    #[test]
    fn test_inbound_messages_are_immutable() {
        let mut msg = outbound();
        msg.direction = Direction::Inbound;
        assert!(!msg.apply_delivery(DeliveryStatus::Read));
        assert_eq!(msg.delivery, DeliveryStatus::Sent);
    }

    #[test]
    fn test_failed_is_terminal() {
        let mut msg = outbound();
        assert!(msg.apply_delivery(DeliveryStatus::Failed));
        assert!(!msg.apply_delivery(DeliveryStatus::Delivered));
    }

    #[test]
    fn test_deserializes_backend_aliases() {
        let msg: Message = serde_json::from_str(
            r#"{"id":"m9","direction":"inbound","sender":"+200","recipient":"+100","text":"hello"}"#,
        )
        .unwrap();
        assert_eq!(msg.from, "+200");
        assert_eq!(msg.body, "hello");
        assert_eq!(msg.delivery, DeliveryStatus::Sent);
    }
}
