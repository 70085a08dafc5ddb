//! Session store.
//!
//! Process-local map of channel to [`ConnectionState`] with per-channel
//! subscriptions. Only the lifecycle controller writes to it; everything else
//! reads snapshots or registers callbacks.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use chrono::Utc;
use tracing::trace;

use crate::domain::{ChannelId, ConnectionState};

/// Handle returned by [`SessionStore::subscribe`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

type Callback = Arc<dyn Fn(&ConnectionState) + Send + Sync>;

#[derive(Default)]
struct Inner {
    states: HashMap<ChannelId, ConnectionState>,
    subscribers: HashMap<ChannelId, Vec<(SubscriptionId, Callback)>>,
    next_id: u64,
}

/// Single source of truth for every channel's connection state.
#[derive(Clone, Default)]
pub struct SessionStore {
    inner: Arc<Mutex<Inner>>,
}

/// Lock a mutex, recovering the data if a previous holder panicked.
pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl SessionStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of a channel's state.
    pub fn get(&self, channel: &ChannelId) -> Option<ConnectionState> {
        lock(&self.inner).states.get(channel).cloned()
    }

    /// All known channels, sorted.
    pub fn channels(&self) -> Vec<ChannelId> {
        let mut channels: Vec<_> = lock(&self.inner).states.keys().cloned().collect();
        channels.sort();
        channels
    }

    pub fn contains(&self, channel: &ChannelId) -> bool {
        lock(&self.inner).states.contains_key(channel)
    }

    /// Register a callback invoked with the new state after every commit to
    /// `channel`. The callback must not call back into the controller
    /// synchronously.
    pub fn subscribe<F>(&self, channel: &ChannelId, callback: F) -> SubscriptionId
    where
        F: Fn(&ConnectionState) + Send + Sync + 'static,
    {
        let mut inner = lock(&self.inner);
        inner.next_id += 1;
        let id = SubscriptionId(inner.next_id);
        inner
            .subscribers
            .entry(channel.clone())
            .or_default()
            .push((id, Arc::new(callback)));
        trace!(%channel, ?id, "subscribed");
        id
    }

    /// Remove a subscription. Returns false if it was already gone.
    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        let mut inner = lock(&self.inner);
        let mut removed = false;
        for subs in inner.subscribers.values_mut() {
            let before = subs.len();
            subs.retain(|(sub_id, _)| *sub_id != id);
            removed |= subs.len() != before;
        }
        inner.subscribers.retain(|_, subs| !subs.is_empty());
        removed
    }

    pub fn subscriber_count(&self, channel: &ChannelId) -> usize {
        lock(&self.inner)
            .subscribers
            .get(channel)
            .map(Vec::len)
            .unwrap_or(0)
    }

    /// Add a channel without notifying. Returns false if it already exists.
    pub(crate) fn insert(&self, state: ConnectionState) -> bool {
        let mut inner = lock(&self.inner);
        if inner.states.contains_key(state.channel_id()) {
            return false;
        }
        inner.states.insert(state.channel_id().clone(), state);
        true
    }

    /// Replace a channel's state and notify its subscribers.
    ///
    /// Callbacks run after the store lock is released, in subscription order.
    pub(crate) fn commit(&self, mut state: ConnectionState) -> ConnectionState {
        state.updated_at = Utc::now();
        let callbacks: Vec<Callback> = {
            let mut inner = lock(&self.inner);
            inner
                .states
                .insert(state.channel_id().clone(), state.clone());
            inner
                .subscribers
                .get(state.channel_id())
                .map(|subs| subs.iter().map(|(_, cb)| Arc::clone(cb)).collect())
                .unwrap_or_default()
        };
        for callback in callbacks {
            callback(&state);
        }
        state
    }

    /// Drop a channel together with its subscriptions.
    pub(crate) fn remove(&self, channel: &ChannelId) -> Option<ConnectionState> {
        let mut inner = lock(&self.inner);
        inner.subscribers.remove(channel);
        inner.states.remove(channel)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{LinkStatus, Phase};
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn ch(id: &str) -> ChannelId {
        ChannelId::from(id)
    }

    #[test]
    fn test_insert_and_get() {
        let store = SessionStore::new();
        assert!(store.insert(ConnectionState::new(ch("ch1"))));
        assert!(!store.insert(ConnectionState::new(ch("ch1"))));
        assert_eq!(
            store.get(&ch("ch1")).map(|s| s.status()),
            Some(LinkStatus::Disconnected)
        );
        assert!(store.get(&ch("missing")).is_none());
    }

    #[test]
    fn test_channels_sorted() {
        let store = SessionStore::new();
        store.insert(ConnectionState::new(ch("b")));
        store.insert(ConnectionState::new(ch("a")));
        assert_eq!(store.channels(), vec![ch("a"), ch("b")]);
    }

    #[test]
    fn test_commit_notifies_only_that_channel() {
        let store = SessionStore::new();
        store.insert(ConnectionState::new(ch("ch1")));
        store.insert(ConnectionState::new(ch("ch2")));

        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        store.subscribe(&ch("ch1"), move |state| {
            sink.lock().unwrap().push(state.status());
        });

        let next = ConnectionState::new(ch("ch1")).with_phase(Phase::QrPending {
            pairing_payload: None,
        });
        store.commit(next);
        store.commit(ConnectionState::new(ch("ch2")));

        assert_eq!(*seen.lock().unwrap(), vec![LinkStatus::QrPending]);
        assert_eq!(
            store.get(&ch("ch1")).map(|s| s.status()),
            Some(LinkStatus::QrPending)
        );
    }

    #[test]
    fn test_callback_can_read_store() {
        let store = SessionStore::new();
        store.insert(ConnectionState::new(ch("ch1")));
        let reader = store.clone();
        let matched = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&matched);
        store.subscribe(&ch("ch1"), move |state| {
            if reader.get(state.channel_id()).as_ref() == Some(state) {
                counter.fetch_add(1, Ordering::SeqCst);
            }
        });
        store.commit(ConnectionState::new(ch("ch1")));
        assert_eq!(matched.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_unsubscribe_stops_notifications() {
        let store = SessionStore::new();
        store.insert(ConnectionState::new(ch("ch1")));
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&calls);
        let id = store.subscribe(&ch("ch1"), move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        });

        store.commit(ConnectionState::new(ch("ch1")));
        assert!(store.unsubscribe(id));
        assert!(!store.unsubscribe(id));
        store.commit(ConnectionState::new(ch("ch1")));

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(store.subscriber_count(&ch("ch1")), 0);
    }

    #[test]
    fn test_remove_drops_state_and_subscribers() {
        let store = SessionStore::new();
        store.insert(ConnectionState::new(ch("ch1")));
        store.subscribe(&ch("ch1"), |_| {});
        assert!(store.remove(&ch("ch1")).is_some());
        assert!(!store.contains(&ch("ch1")));
        assert_eq!(store.subscriber_count(&ch("ch1")), 0);
    }
}
