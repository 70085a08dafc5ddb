//! Domain objects for the connection lifecycle.
//!
//! - [`ConnectionState`] - per-channel status, pairing/identity/error data and counters
//! - [`Message`] - read-only message projection cached by the feed
//! - [`ChannelId`], [`CommandKind`] - identifiers shared by every layer

pub mod channel;
pub mod connection;
pub mod message;

pub use channel::{ChannelId, CommandKind};
pub use connection::{
    ConnectionState, Counters, Freshness, Identity, LinkStatus, MessageSummary, Phase,
};
pub use message::{DeliveryStatus, Direction, Message};
