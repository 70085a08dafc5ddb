//! Presentation bindings.
//!
//! Each binding follows one channel of the session store and keeps a plain
//! view model of it, re-rendered on every commit. Bindings never hold their
//! own idea of the connection status: the view is always a function of the
//! latest [`ConnectionState`], and user actions go to the controller.
//!
//! - [`StatusBadge`] - one-line status indicator
//! - [`PairingPanel`] - QR payload and pairing actions
//! - [`StatsPanel`] - message counters and uptime
//! - [`MessageFeed`] - bounded message list and test messages

mod message_feed;
mod pairing_panel;
mod stats_panel;
mod status_badge;

pub use message_feed::{FeedHeader, FeedList, MessageFeed, DEFAULT_FEED_LIMIT};
pub use pairing_panel::{PairingPanel, PairingView};
pub use stats_panel::{StatsPanel, StatsView};
pub use status_badge::{BadgeTone, BadgeView, StatusBadge};

use std::sync::{Arc, Mutex};

use tokio::sync::watch;
use tracing::debug;

use crate::domain::{ChannelId, ConnectionState};
use crate::error::{LinkError, LinkResult};
use crate::lifecycle::LifecycleController;
use crate::store::{lock, SessionStore, SubscriptionId};

/// A view model derived from nothing but a channel's state.
pub trait StateView: Clone + Send + 'static {
    fn from_state(state: &ConnectionState) -> Self;
}

/// A [`StateView`] kept current by a store subscription.
///
/// Unsubscribes when dropped.
pub struct Bound<V: StateView> {
    store: SessionStore,
    channel: ChannelId,
    subscription: SubscriptionId,
    view: Arc<Mutex<V>>,
    revision: Arc<watch::Sender<u64>>,
}

impl<V: StateView> Bound<V> {
    /// Render the current state of `channel` and follow its commits.
    pub fn attach(controller: &LifecycleController, channel: &ChannelId) -> LinkResult<Self> {
        let initial = controller.snapshot(channel)?;
        let store = controller.store().clone();
        let view = Arc::new(Mutex::new(V::from_state(&initial)));
        let revision = Arc::new(watch::channel(0u64).0);

        let target = Arc::clone(&view);
        let notify = Arc::clone(&revision);
        let subscription = store.subscribe(channel, move |state| {
            *lock(&target) = V::from_state(state);
            notify.send_modify(|n| *n += 1);
        });

        // A commit may have landed between the snapshot and the subscription.
        match store.get(channel) {
            Some(latest) => *lock(&view) = V::from_state(&latest),
            None => {
                store.unsubscribe(subscription);
                return Err(LinkError::UnknownChannel(channel.clone()));
            }
        }
        debug!(%channel, view = std::any::type_name::<V>(), "binding attached");

        Ok(Self {
            store,
            channel: channel.clone(),
            subscription,
            view,
            revision,
        })
    }

    pub fn channel(&self) -> &ChannelId {
        &self.channel
    }

    /// Latest rendered view.
    pub fn view(&self) -> V {
        lock(&self.view).clone()
    }

    /// Number of re-renders so far.
    pub fn revision(&self) -> u64 {
        *self.revision.borrow()
    }

    /// Notified on every re-render.
    pub fn changes(&self) -> watch::Receiver<u64> {
        self.revision.subscribe()
    }

    /// Reject an action while another command is in flight for the channel.
    pub(crate) fn ensure_idle(&self) -> LinkResult<()> {
        let state = self
            .store
            .get(&self.channel)
            .ok_or_else(|| LinkError::UnknownChannel(self.channel.clone()))?;
        match state.in_flight() {
            Some(command) => Err(LinkError::busy(&self.channel, command)),
            None => Ok(()),
        }
    }
}

impl<V: StateView> Drop for Bound<V> {
    fn drop(&mut self) {
        self.store.unsubscribe(self.subscription);
    }
}
