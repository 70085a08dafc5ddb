//! Connection state management.
//!
//! [`ConnectionState`] is the per-channel record owned by the session store.
//! The status carries its own data through [`Phase`], so a pairing payload can
//! only exist while pairing is pending, an identity only while connected and
//! an error message only in the error status.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::channel::{ChannelId, CommandKind};

/// Top-level connection status of a channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LinkStatus {
    #[serde(alias = "close", alias = "closed")]
    Disconnected,
    #[serde(alias = "qr", alias = "pending")]
    QrPending,
    #[serde(alias = "connecting")]
    Authenticating,
    #[serde(alias = "open")]
    Connected,
    #[serde(alias = "failed")]
    Error,
}

impl LinkStatus {
    /// All statuses, in lifecycle order.
    pub const ALL: [LinkStatus; 5] = [
        LinkStatus::Disconnected,
        LinkStatus::QrPending,
        LinkStatus::Authenticating,
        LinkStatus::Connected,
        LinkStatus::Error,
    ];

    /// Wire name of the status.
    pub fn as_str(&self) -> &'static str {
        match self {
            LinkStatus::Disconnected => "disconnected",
            LinkStatus::QrPending => "qr_pending",
            LinkStatus::Authenticating => "authenticating",
            LinkStatus::Connected => "connected",
            LinkStatus::Error => "error",
        }
    }
}

impl fmt::Display for LinkStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The WhatsApp account a channel is linked to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Identity {
    #[serde(alias = "number", alias = "external_number")]
    pub external_number: String,
    #[serde(alias = "name", alias = "display_name")]
    pub display_name: String,
}

impl Identity {
    pub fn new(external_number: impl Into<String>, display_name: impl Into<String>) -> Self {
        Self {
            external_number: external_number.into(),
            display_name: display_name.into(),
        }
    }
}

/// Status together with the data that is valid only in that status.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum Phase {
    Disconnected,
    QrPending {
        /// `None` until the backend has issued the first payload.
        pairing_payload: Option<String>,
    },
    Authenticating,
    Connected {
        identity: Identity,
        connected_at: DateTime<Utc>,
    },
    Error {
        last_error: String,
    },
}

impl Phase {
    pub fn status(&self) -> LinkStatus {
        match self {
            Phase::Disconnected => LinkStatus::Disconnected,
            Phase::QrPending { .. } => LinkStatus::QrPending,
            Phase::Authenticating => LinkStatus::Authenticating,
            Phase::Connected { .. } => LinkStatus::Connected,
            Phase::Error { .. } => LinkStatus::Error,
        }
    }
}

/// Message counters. Only ever reset on disconnect or on a fresh session.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Counters {
    pub messages_sent: u64,
    pub messages_received: u64,
}

/// Freshness of the data behind a [`ConnectionState`].
///
/// `Degraded` means the push channel is down and the state is refreshed by
/// polling only. It never changes the status.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Freshness {
    #[default]
    Live,
    Degraded,
}

/// Message-count summary consumed by statistics widgets.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct MessageSummary {
    pub sent: u64,
    pub received: u64,
    pub total: u64,
}

/// Connection state of one channel.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectionState {
    pub(crate) channel_id: ChannelId,
    #[serde(flatten)]
    pub(crate) phase: Phase,
    pub(crate) counters: Counters,
    pub(crate) freshness: Freshness,
    pub(crate) in_flight: Option<CommandKind>,
    pub(crate) generation: u64,
    pub(crate) updated_at: DateTime<Utc>,
}

impl ConnectionState {
    /// A freshly configured channel: disconnected, zero counters.
    pub fn new(channel_id: ChannelId) -> Self {
        Self {
            channel_id,
            phase: Phase::Disconnected,
            counters: Counters::default(),
            freshness: Freshness::Live,
            in_flight: None,
            generation: 0,
            updated_at: Utc::now(),
        }
    }

    pub fn channel_id(&self) -> &ChannelId {
        &self.channel_id
    }

    pub fn status(&self) -> LinkStatus {
        self.phase.status()
    }

    pub fn phase(&self) -> &Phase {
        &self.phase
    }

    /// Pairing payload to render as a QR code, only while pairing is pending.
    pub fn pairing_payload(&self) -> Option<&str> {
        match &self.phase {
            Phase::QrPending { pairing_payload } => pairing_payload.as_deref(),
            _ => None,
        }
    }

    pub fn identity(&self) -> Option<&Identity> {
        match &self.phase {
            Phase::Connected { identity, .. } => Some(identity),
            _ => None,
        }
    }

    pub fn connected_at(&self) -> Option<DateTime<Utc>> {
        match &self.phase {
            Phase::Connected { connected_at, .. } => Some(*connected_at),
            _ => None,
        }
    }

    pub fn last_error(&self) -> Option<&str> {
        match &self.phase {
            Phase::Error { last_error } => Some(last_error),
            _ => None,
        }
    }

    pub fn counters(&self) -> Counters {
        self.counters
    }

    pub fn freshness(&self) -> Freshness {
        self.freshness
    }

    /// The command currently awaiting the backend, if any.
    pub fn in_flight(&self) -> Option<CommandKind> {
        self.in_flight
    }

    /// Current pairing generation. Bumped by every connect and restart.
    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn updated_at(&self) -> DateTime<Utc> {
        self.updated_at
    }

    pub fn is_connected(&self) -> bool {
        self.status() == LinkStatus::Connected
    }

    pub fn is_busy(&self) -> bool {
        self.in_flight.is_some()
    }

    pub fn is_degraded(&self) -> bool {
        self.freshness == Freshness::Degraded
    }

    pub fn summary(&self) -> MessageSummary {
        MessageSummary {
            sent: self.counters.messages_sent,
            received: self.counters.messages_received,
            total: self.counters.messages_sent + self.counters.messages_received,
        }
    }

    /// Time since the session was established.
    pub fn uptime(&self, now: DateTime<Utc>) -> Option<chrono::Duration> {
        self.connected_at().map(|at| now - at)
    }

    pub(crate) fn with_phase(mut self, phase: Phase) -> Self {
        self.phase = phase;
        self
    }
}
