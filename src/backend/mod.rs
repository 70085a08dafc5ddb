//! Messaging backend client.
//!
//! [`LinkBackend`] is the seam between the lifecycle and the remote service
//! that owns the actual WhatsApp sessions. [`HttpBackend`] implements it over
//! any [`HttpClient`](crate::traits::HttpClient).

mod http;
mod types;

use std::pin::Pin;

use async_trait::async_trait;
use futures::Stream;

use crate::domain::ChannelId;
use crate::error::LinkResult;
use crate::sse::Envelope;

pub use http::HttpBackend;
pub use types::{ConnectResponse, SendRequest, SendResponse, StatusSnapshot};

/// Push events for every channel of one operator.
///
/// An `Err` item reports a recoverable decoding problem or a broken
/// connection; the end of the stream means the server closed it.
pub type EventStream = Pin<Box<dyn Stream<Item = LinkResult<Envelope>> + Send>>;

/// Lifecycle operations offered by the messaging backend.
#[async_trait]
pub trait LinkBackend: Send + Sync {
    /// Ask the backend to start pairing the channel.
    async fn connect(&self, channel: &ChannelId) -> LinkResult<ConnectResponse>;

    /// Tear down the channel's session.
    async fn disconnect(&self, channel: &ChannelId) -> LinkResult<()>;

    /// Current backend-side view of the channel.
    async fn status(&self, channel: &ChannelId) -> LinkResult<StatusSnapshot>;

    /// Send a message through the linked number.
    async fn send(&self, channel: &ChannelId, request: &SendRequest) -> LinkResult<SendResponse>;

    /// Open the push subscription for an operator.
    async fn subscribe(&self, operator_id: &str) -> LinkResult<EventStream>;
}
