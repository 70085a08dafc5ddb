//! Transport adapter.
//!
//! Learns about state changes from the backend, preferring the push
//! subscription and falling back to status polling while it is down. Both
//! sources are normalized into [`Envelope`]s and handed to an [`EventSink`],
//! normally the lifecycle controller.

mod adapter;
mod backoff;
mod poll;

pub use adapter::{PushState, TransportAdapter, TransportConfig};
pub use backoff::RetryPolicy;
pub use poll::{diff, RoundOutcome, StatusPoller, UNREACHABLE_MESSAGE};

use crate::domain::{ChannelId, Freshness, LinkStatus};
use crate::sse::Envelope;

/// Receiver of normalized transport events.
pub trait EventSink: Send + Sync {
    /// Channels whose status should be polled right now.
    fn pollable_channels(&self) -> Vec<ChannelId>;

    fn deliver_event(&self, envelope: Envelope);

    /// Status the sink currently holds for `channel`, if it tracks it.
    fn local_status(&self, channel: &ChannelId) -> Option<LinkStatus>;

    /// Push-channel freshness changed for every watched channel.
    fn set_freshness_all(&self, freshness: Freshness);
}
