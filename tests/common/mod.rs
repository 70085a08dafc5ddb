//! Common test utilities for integration tests.
//!
//! Builders for a controller wired to the scripted [`MockBackend`], plus
//! shorthand constructors for the push events the backend emits.

#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use walink::adapters::MockBackend;
use walink::domain::{ChannelId, DeliveryStatus, Identity, Message};
use walink::lifecycle::{LifecycleController, LifecyclePolicy};
use walink::sse::{Envelope, LinkEvent};
use walink::transport::{RetryPolicy, TransportConfig};

pub const CHANNEL: &str = "ch1";

/// Timeouts short enough to walk through with paused time.
pub fn test_policy() -> LifecyclePolicy {
    LifecyclePolicy::default()
        .with_pairing_timeout(Duration::from_secs(30))
        .with_auth_timeout(Duration::from_secs(20))
        .with_command_timeout(Duration::from_secs(5))
}

pub fn test_transport_config() -> TransportConfig {
    TransportConfig {
        operator_id: "op-test".to_string(),
        poll_interval: Duration::from_secs(2),
        retry: RetryPolicy::new(500, 4_000),
        failure_threshold: 3,
        request_timeout: Duration::from_secs(5),
    }
}

/// Controller with [`CHANNEL`] registered.
pub fn controller_with(backend: &MockBackend) -> (LifecycleController, ChannelId) {
    let controller = LifecycleController::new(Arc::new(backend.clone()), test_policy());
    let channel = controller.register(CHANNEL).channel_id().clone();
    (controller, channel)
}

pub fn demo_identity() -> Identity {
    Identity::new("+15550100", "Demo Shop")
}

pub fn pairing(payload: &str) -> Envelope {
    Envelope::new(
        CHANNEL,
        LinkEvent::PairingIssued {
            payload: payload.to_string(),
        },
    )
}

pub fn authenticated() -> Envelope {
    Envelope::new(CHANNEL, LinkEvent::Authenticated)
}

pub fn connected() -> Envelope {
    Envelope::new(
        CHANNEL,
        LinkEvent::Connected {
            identity: demo_identity(),
        },
    )
}

pub fn disconnected() -> Envelope {
    Envelope::new(CHANNEL, LinkEvent::Disconnected { reason: None })
}

pub fn failed(message: &str) -> Envelope {
    Envelope::new(
        CHANNEL,
        LinkEvent::Error {
            message: message.to_string(),
        },
    )
}

pub fn inbound(id: &str) -> Envelope {
    Envelope::new(
        CHANNEL,
        LinkEvent::MessageInbound {
            message: Message::inbound(id, "+15550199", "+15550100", "hello"),
        },
    )
}

pub fn outbound_ack(id: &str, status: DeliveryStatus) -> Envelope {
    Envelope::new(
        CHANNEL,
        LinkEvent::MessageOutboundAck {
            message_id: id.to_string(),
            status,
            message: None,
        },
    )
}

/// Let spawned tasks run; with paused time this also advances the clock.
pub async fn settle() {
    tokio::time::sleep(Duration::from_millis(20)).await;
}
