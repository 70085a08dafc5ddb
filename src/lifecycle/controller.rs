//! Lifecycle controller.
//!
//! The controller is the only writer of the session store. Every transition
//! goes through one lock (`slots`) that is never held across an `.await`, so
//! commits for a channel are serialized and applied in arrival order.
//!
//! Commands follow the same shape: validate and commit an optimistic state
//! under the lock, call the backend without the lock, then settle the result
//! under the lock again. Settling is skipped when the generation moved on in
//! between, so a late answer can never overwrite a newer pairing attempt.

use std::collections::{HashMap, HashSet, VecDeque};
use std::future::Future;
use std::sync::{Arc, Mutex, Weak};

use chrono::Utc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::feed::{Feed, FeedReceiver, FeedUpdate, FEED_CAPACITY};
use super::machine::{self, Step, TimerKind};
use super::policy::LifecyclePolicy;
use crate::backend::{ConnectResponse, LinkBackend, SendRequest};
use crate::domain::{
    ChannelId, CommandKind, ConnectionState, Freshness, LinkStatus, Message, MessageSummary, Phase,
};
use crate::error::{LinkError, LinkResult};
use crate::sse::{Envelope, LinkEvent};
use crate::store::{lock, SessionStore};
use crate::transport::EventSink;

/// How many torn-down session ids are remembered per channel.
const RETIRED_SESSIONS: usize = 8;

/// How many message ids are remembered per channel for deduplication.
const TRACKED_MESSAGE_IDS: usize = 512;

/// What [`LifecycleController::deliver`] did with an event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeliveryOutcome {
    /// The event changed the channel's state.
    Applied,
    /// The event was valid but changed nothing (duplicate, wrong status).
    Ignored,
    /// The event belongs to a torn-down session or races a teardown.
    Stale,
    UnknownChannel,
}

/// Most recent message ids, oldest evicted first.
#[derive(Debug, Default)]
struct RecentIds {
    order: VecDeque<String>,
    ids: HashSet<String>,
}

impl RecentIds {
    /// Returns false when `id` is already remembered.
    fn insert(&mut self, id: String) -> bool {
        if self.ids.contains(&id) {
            return false;
        }
        if self.order.len() == TRACKED_MESSAGE_IDS {
            if let Some(oldest) = self.order.pop_front() {
                self.ids.remove(&oldest);
            }
        }
        self.ids.insert(id.clone());
        self.order.push_back(id);
        true
    }

    fn len(&self) -> usize {
        self.order.len()
    }

    fn clear(&mut self) {
        self.order.clear();
        self.ids.clear();
    }
}

/// Per-channel bookkeeping that is not part of the public state.
#[derive(Default)]
struct ChannelSlot {
    session_id: Option<String>,
    retired: VecDeque<String>,
    timer_epoch: u64,
    timer: Option<JoinHandle<()>>,
    counted_outbound: RecentIds,
    seen_inbound: RecentIds,
}

impl ChannelSlot {
    fn retire_session(&mut self) -> Option<String> {
        let old = self.session_id.take();
        if let Some(id) = &old {
            self.retired.push_back(id.clone());
            if self.retired.len() > RETIRED_SESSIONS {
                self.retired.pop_front();
            }
        }
        old
    }

    fn restore_session(&mut self, session: Option<String>) {
        if let Some(id) = &session {
            self.retired.retain(|retired| retired != id);
        }
        self.session_id = session;
    }

    /// Whether an event tagged with `session` may be applied. The first
    /// tagged event after a teardown adopts its session.
    fn admit_session(&mut self, session: &str) -> bool {
        if self.retired.iter().any(|retired| retired == session) {
            return false;
        }
        match &self.session_id {
            Some(current) => current == session,
            None => {
                self.session_id = Some(session.to_string());
                true
            }
        }
    }

    fn cancel_timer(&mut self) {
        self.timer_epoch += 1;
        if let Some(handle) = self.timer.take() {
            handle.abort();
        }
    }

    fn reset_message_tracking(&mut self) {
        self.counted_outbound.clear();
        self.seen_inbound.clear();
    }
}

impl Drop for ChannelSlot {
    fn drop(&mut self) {
        if let Some(handle) = self.timer.take() {
            handle.abort();
        }
    }
}

struct Inner {
    store: SessionStore,
    backend: Arc<dyn LinkBackend>,
    policy: LifecyclePolicy,
    slots: Mutex<HashMap<ChannelId, ChannelSlot>>,
    feed: Feed,
}

/// Drives the connection lifecycle of every registered channel.
///
/// Cheap to clone; all clones share the same channels.
#[derive(Clone)]
pub struct LifecycleController {
    inner: Arc<Inner>,
}

impl LifecycleController {
    pub fn new(backend: Arc<dyn LinkBackend>, policy: LifecyclePolicy) -> Self {
        Self::with_store(SessionStore::new(), backend, policy)
    }

    pub fn with_store(
        store: SessionStore,
        backend: Arc<dyn LinkBackend>,
        policy: LifecyclePolicy,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                store,
                backend,
                policy,
                slots: Mutex::new(HashMap::new()),
                feed: Feed::new(FEED_CAPACITY),
            }),
        }
    }

    /// Read side for bindings.
    pub fn store(&self) -> &SessionStore {
        &self.inner.store
    }

    pub fn policy(&self) -> LifecyclePolicy {
        self.inner.policy
    }

    /// Start tracking a channel. Registering twice returns the existing state.
    pub fn register(&self, channel: impl Into<ChannelId>) -> ConnectionState {
        let channel = channel.into();
        let mut slots = lock(&self.inner.slots);
        if let Some(existing) = self.inner.store.get(&channel) {
            return existing;
        }
        let state = ConnectionState::new(channel.clone());
        self.inner.store.insert(state.clone());
        slots.insert(channel.clone(), ChannelSlot::default());
        info!(%channel, "channel registered");
        state
    }

    pub fn channels(&self) -> Vec<ChannelId> {
        self.inner.store.channels()
    }

    pub fn snapshot(&self, channel: &ChannelId) -> LinkResult<ConnectionState> {
        self.inner
            .store
            .get(channel)
            .ok_or_else(|| LinkError::UnknownChannel(channel.clone()))
    }

    pub fn summary(&self, channel: &ChannelId) -> LinkResult<MessageSummary> {
        self.snapshot(channel).map(|state| state.summary())
    }

    /// Message traffic for all channels.
    pub fn subscribe_feed(&self) -> FeedReceiver {
        self.inner.feed.subscribe()
    }

    /// Request a pairing session. Valid from `disconnected` and `error`.
    pub async fn connect(&self, channel: &ChannelId) -> LinkResult<ConnectionState> {
        let begun = self.inner.begin(channel, |slot, state| {
            let next = machine::begin_connect(state)?;
            slot.retire_session();
            Ok(Some(next))
        })?;
        let Some((prior, pending)) = begun else {
            return self.snapshot(channel);
        };
        let generation = pending.generation;
        info!(%channel, generation, "connect requested");

        let result = self
            .inner
            .call(CommandKind::Connect, self.inner.backend.connect(channel))
            .await
            .and_then(check_connect_response);

        match result {
            Ok(response) => self.settled(channel, self.inner.accept_pairing(channel, generation, response)),
            Err(err) => {
                warn!(%channel, generation, error = %err, "connect failed");
                self.inner.settle(channel, generation, |_, current| {
                    machine::rollback(current, &prior, &pending)
                });
                Err(err)
            }
        }
    }

    /// Tear the session down. A no-op when already disconnected and idle.
    pub async fn disconnect(&self, channel: &ChannelId) -> LinkResult<ConnectionState> {
        let mut retired = None;
        let begun = self.inner.begin(channel, |slot, state| {
            let next = machine::begin_disconnect(state)?;
            if next.is_some() {
                retired = slot.retire_session();
            }
            Ok(next)
        })?;
        let Some((prior, pending)) = begun else {
            debug!(%channel, "already disconnected");
            return self.snapshot(channel);
        };
        let generation = pending.generation;
        info!(%channel, from = %prior.status(), "disconnect requested");

        match self
            .inner
            .call(CommandKind::Disconnect, self.inner.backend.disconnect(channel))
            .await
        {
            Ok(()) => {
                let settled = self.inner.settle(channel, generation, |slot, current| {
                    slot.reset_message_tracking();
                    machine::finish(current)
                });
                self.settled(channel, settled)
            }
            Err(err) => {
                warn!(%channel, error = %err, "disconnect failed, restoring previous state");
                self.inner.settle(channel, generation, move |slot, current| {
                    let restored = machine::rollback(current, &prior, &pending);
                    if restored.phase == prior.phase {
                        slot.restore_session(retired);
                    }
                    restored
                });
                Err(err)
            }
        }
    }

    /// Tear down whatever exists and start a fresh pairing generation.
    pub async fn restart(&self, channel: &ChannelId) -> LinkResult<ConnectionState> {
        let mut retired = None;
        let begun = self.inner.begin(channel, |slot, state| {
            let next = machine::begin_restart(state)?;
            retired = slot.retire_session();
            slot.reset_message_tracking();
            Ok(Some(next))
        })?;
        let Some((prior, pending)) = begun else {
            return self.snapshot(channel);
        };
        let generation = pending.generation;
        info!(%channel, generation, from = %prior.status(), "restart requested");

        if prior.status() != LinkStatus::Disconnected {
            match self
                .inner
                .call(CommandKind::Restart, self.inner.backend.disconnect(channel))
                .await
            {
                Ok(()) => {}
                Err(err @ LinkError::Timeout { .. }) => {
                    warn!(%channel, error = %err, "teardown before restart timed out");
                    self.inner.settle(channel, generation, move |slot, current| {
                        let restored = machine::rollback(current, &prior, &pending);
                        if restored.phase == prior.phase {
                            slot.restore_session(retired);
                        }
                        restored
                    });
                    return Err(err);
                }
                Err(err) => {
                    warn!(%channel, error = %err, "teardown before restart failed, requesting pairing anyway");
                }
            }
        }

        let result = self
            .inner
            .call(CommandKind::Restart, self.inner.backend.connect(channel))
            .await
            .and_then(check_connect_response);

        match result {
            Ok(response) => self.settled(channel, self.inner.accept_pairing(channel, generation, response)),
            Err(err) => {
                warn!(%channel, generation, error = %err, "restart could not obtain a pairing");
                self.inner.settle(channel, generation, |_, current| {
                    machine::abandon_restart(current, &pending)
                });
                Err(err)
            }
        }
    }

    /// Send a message through the linked number to check the session.
    pub async fn send_test_message(
        &self,
        channel: &ChannelId,
        destination: &str,
        body: &str,
    ) -> LinkResult<Message> {
        let begun = self
            .inner
            .begin(channel, |_, state| machine::begin_send(state).map(Some))?;
        let Some((_, pending)) = begun else {
            return Err(LinkError::NotConnected(channel.clone()));
        };
        let generation = pending.generation;
        let from = pending
            .identity()
            .map(|identity| identity.external_number.clone())
            .unwrap_or_default();
        let request = SendRequest {
            destination: destination.to_string(),
            body: body.to_string(),
            client_ref: Uuid::new_v4().to_string(),
        };

        let result = self
            .inner
            .call(
                CommandKind::SendTestMessage,
                self.inner.backend.send(channel, &request),
            )
            .await
            .and_then(|response| {
                if response.success {
                    Ok(response
                        .message_id
                        .unwrap_or_else(|| request.client_ref.clone()))
                } else {
                    Err(LinkError::Backend {
                        message: response
                            .error
                            .unwrap_or_else(|| "message rejected".to_string()),
                    })
                }
            });

        match result {
            Ok(message_id) => {
                let counted = message_id.clone();
                self.inner.settle(channel, generation, move |slot, current| {
                    let idle = machine::finish(current);
                    if !slot.counted_outbound.insert(counted) {
                        return idle;
                    }
                    match machine::count_outbound(&idle) {
                        Step::Apply(next) => next,
                        Step::Ignore(_) => idle,
                    }
                });
                let message = Message::outbound(message_id, from, destination, body);
                info!(%channel, message_id = %message.id, "test message sent");
                self.inner.feed.emit(FeedUpdate::Appended {
                    channel: channel.clone(),
                    message: message.clone(),
                });
                Ok(message)
            }
            Err(err) => {
                warn!(%channel, error = %err, "test message failed");
                self.inner
                    .settle(channel, generation, |_, current| machine::finish(current));
                Err(err)
            }
        }
    }

    /// Stop tracking a channel. Subscribers see a final disconnected state,
    /// then their subscriptions are dropped.
    pub async fn remove(&self, channel: &ChannelId) -> LinkResult<()> {
        let state = self.snapshot(channel)?;
        if let Some(command) = state.in_flight() {
            return Err(LinkError::busy(channel, command));
        }
        if state.status() != LinkStatus::Disconnected {
            if let Err(err) = self
                .inner
                .call(CommandKind::Disconnect, self.inner.backend.disconnect(channel))
                .await
            {
                warn!(%channel, error = %err, "backend teardown failed while removing channel");
            }
        }

        let mut slots = lock(&self.inner.slots);
        if let Some(mut slot) = slots.remove(channel) {
            slot.cancel_timer();
            if let Some(current) = self.inner.store.get(channel) {
                self.inner.store.commit(machine::teardown(&current));
            }
        }
        self.inner.store.remove(channel);
        info!(%channel, "channel removed");
        Ok(())
    }

    /// Apply an event observed by the transport.
    pub fn deliver(&self, envelope: Envelope) -> DeliveryOutcome {
        self.inner.deliver(envelope)
    }

    /// Record push-channel freshness. Returns true if it changed.
    pub fn set_freshness(&self, channel: &ChannelId, freshness: Freshness) -> bool {
        let mut slots = lock(&self.inner.slots);
        let Some(slot) = slots.get_mut(channel) else {
            return false;
        };
        let Some(current) = self.inner.store.get(channel) else {
            return false;
        };
        if current.freshness() == freshness {
            return false;
        }
        let mut next = current.clone();
        next.freshness = freshness;
        self.inner.commit_locked(channel, slot, &current, next);
        true
    }

    fn settled(
        &self,
        channel: &ChannelId,
        settled: Option<ConnectionState>,
    ) -> LinkResult<ConnectionState> {
        match settled {
            Some(state) => Ok(state),
            None => self.snapshot(channel),
        }
    }
}

impl EventSink for LifecycleController {
    fn pollable_channels(&self) -> Vec<ChannelId> {
        self.channels()
            .into_iter()
            .filter(|channel| {
                self.inner
                    .store
                    .get(channel)
                    .map(|state| !state.is_busy())
                    .unwrap_or(false)
            })
            .collect()
    }

    fn deliver_event(&self, envelope: Envelope) {
        self.inner.deliver(envelope);
    }

    fn local_status(&self, channel: &ChannelId) -> Option<LinkStatus> {
        self.inner.store.get(channel).map(|state| state.status())
    }

    fn set_freshness_all(&self, freshness: Freshness) {
        for channel in self.channels() {
            self.set_freshness(&channel, freshness);
        }
    }
}

fn check_connect_response(response: ConnectResponse) -> LinkResult<ConnectResponse> {
    if response.status == LinkStatus::Error {
        return Err(LinkError::Backend {
            message: "backend refused to start pairing".to_string(),
        });
    }
    Ok(response)
}

impl Inner {
    async fn call<T, F>(&self, command: CommandKind, fut: F) -> LinkResult<T>
    where
        F: Future<Output = LinkResult<T>>,
    {
        let after = self.policy.command_timeout;
        tokio::time::timeout(after, fut)
            .await
            .unwrap_or_else(|_| Err(LinkError::Timeout { command, after }))
    }

    /// Validate a command and commit its optimistic state.
    ///
    /// Returns the state before and after the commit, or `None` when the
    /// command turned out to be a no-op.
    fn begin<F>(
        self: &Arc<Self>,
        channel: &ChannelId,
        f: F,
    ) -> LinkResult<Option<(ConnectionState, ConnectionState)>>
    where
        F: FnOnce(&mut ChannelSlot, &ConnectionState) -> LinkResult<Option<ConnectionState>>,
    {
        let mut slots = lock(&self.slots);
        let slot = slots
            .get_mut(channel)
            .ok_or_else(|| LinkError::UnknownChannel(channel.clone()))?;
        let prior = self
            .store
            .get(channel)
            .ok_or_else(|| LinkError::UnknownChannel(channel.clone()))?;
        match f(slot, &prior)? {
            Some(next) => {
                let committed = self.commit_locked(channel, slot, &prior, next);
                Ok(Some((prior, committed)))
            }
            None => Ok(None),
        }
    }

    /// Commit the outcome of a backend call if the generation is unchanged.
    fn settle<F>(self: &Arc<Self>, channel: &ChannelId, generation: u64, f: F) -> Option<ConnectionState>
    where
        F: FnOnce(&mut ChannelSlot, &ConnectionState) -> ConnectionState,
    {
        let mut slots = lock(&self.slots);
        let slot = slots.get_mut(channel)?;
        let current = self.store.get(channel)?;
        if current.generation() != generation {
            debug!(
                %channel,
                generation,
                current = current.generation(),
                "discarding result for a superseded generation"
            );
            return None;
        }
        let next = f(slot, &current);
        Some(self.commit_locked(channel, slot, &current, next))
    }

    fn accept_pairing(
        self: &Arc<Self>,
        channel: &ChannelId,
        generation: u64,
        response: ConnectResponse,
    ) -> Option<ConnectionState> {
        let ConnectResponse {
            pairing_payload,
            session_id,
            ..
        } = response;
        self.settle(channel, generation, move |slot, current| {
            if let Some(session) = session_id {
                slot.restore_session(Some(session));
            }
            machine::accept_pairing(current, pairing_payload)
        })
    }

    fn commit_locked(
        self: &Arc<Self>,
        channel: &ChannelId,
        slot: &mut ChannelSlot,
        old: &ConnectionState,
        next: ConnectionState,
    ) -> ConnectionState {
        let committed = self.store.commit(next);
        if committed.status() != old.status() {
            info!(
                %channel,
                from = %old.status(),
                to = %committed.status(),
                generation = committed.generation(),
                "transition"
            );
        }
        self.reconcile_timer(channel, slot, old, &committed);
        committed
    }

    /// Keep exactly one timer armed for the status that needs one.
    fn reconcile_timer(
        self: &Arc<Self>,
        channel: &ChannelId,
        slot: &mut ChannelSlot,
        old: &ConnectionState,
        new: &ConnectionState,
    ) {
        let same_generation = old.generation() == new.generation();
        match new.phase() {
            Phase::QrPending { .. } => {
                let unchanged = same_generation
                    && old.status() == LinkStatus::QrPending
                    && old.pairing_payload() == new.pairing_payload();
                if !unchanged {
                    self.arm_timer(channel, slot, new.generation(), TimerKind::PairingExpiry);
                }
            }
            Phase::Authenticating => {
                if !(same_generation && old.status() == LinkStatus::Authenticating) {
                    self.arm_timer(channel, slot, new.generation(), TimerKind::AuthTimeout);
                }
            }
            _ => {
                if slot.timer.is_some() {
                    slot.cancel_timer();
                }
            }
        }
    }

    fn arm_timer(
        self: &Arc<Self>,
        channel: &ChannelId,
        slot: &mut ChannelSlot,
        generation: u64,
        kind: TimerKind,
    ) {
        slot.cancel_timer();
        let delay = match kind {
            TimerKind::PairingExpiry => self.policy.pairing_timeout,
            TimerKind::AuthTimeout => self.policy.auth_timeout,
        };
        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            warn!(%channel, ?kind, "no async runtime, timer not armed");
            return;
        };
        let epoch = slot.timer_epoch;
        let weak: Weak<Inner> = Arc::downgrade(self);
        let timer_channel = channel.clone();
        slot.timer = Some(runtime.spawn(async move {
            tokio::time::sleep(delay).await;
            if let Some(inner) = weak.upgrade() {
                inner.on_timer(&timer_channel, generation, epoch, kind);
            }
        }));
    }

    fn on_timer(self: &Arc<Self>, channel: &ChannelId, generation: u64, epoch: u64, kind: TimerKind) {
        let mut slots = lock(&self.slots);
        let Some(slot) = slots.get_mut(channel) else {
            return;
        };
        if slot.timer_epoch != epoch {
            return;
        }
        // Dropping our own handle detaches it instead of aborting this task.
        slot.timer = None;
        let Some(current) = self.store.get(channel) else {
            return;
        };
        if current.generation() != generation {
            debug!(%channel, generation, ?kind, "timer from a superseded generation");
            return;
        }
        match machine::expire(&current, kind) {
            Step::Apply(next) => {
                warn!(%channel, generation, "{}", kind.message());
                self.commit_locked(channel, slot, &current, next);
            }
            Step::Ignore(reason) => debug!(%channel, ?kind, reason, "timer ignored"),
        }
    }

    fn deliver(self: &Arc<Self>, envelope: Envelope) -> DeliveryOutcome {
        let Envelope {
            channel_id: channel,
            session_id,
            event,
        } = envelope;
        let kind = event.kind();

        let mut slots = lock(&self.slots);
        let Some(slot) = slots.get_mut(&channel) else {
            debug!(%channel, kind, "event for unknown channel");
            return DeliveryOutcome::UnknownChannel;
        };
        let Some(current) = self.store.get(&channel) else {
            return DeliveryOutcome::UnknownChannel;
        };
        match current.in_flight() {
            Some(CommandKind::Disconnect) => {
                debug!(%channel, kind, "dropping event during teardown");
                return DeliveryOutcome::Stale;
            }
            // An untagged terminal event cannot belong to a pairing that is
            // still being requested; it describes the session being replaced.
            Some(CommandKind::Connect | CommandKind::Restart)
                if session_id.is_none() && event.is_terminal() =>
            {
                debug!(%channel, kind, "dropping untagged terminal event while pairing is requested");
                return DeliveryOutcome::Stale;
            }
            _ => {}
        }
        if let Some(session) = session_id.as_deref() {
            if !slot.admit_session(session) {
                debug!(%channel, session, kind, "dropping event from stale session");
                return DeliveryOutcome::Stale;
            }
        }

        let step = match &event {
            LinkEvent::MessageInbound { message } => {
                if !current.is_connected() {
                    Step::Ignore("not connected")
                } else if !slot.seen_inbound.insert(message.id.clone()) {
                    Step::Ignore("duplicate message")
                } else {
                    self.feed.emit(FeedUpdate::Appended {
                        channel: channel.clone(),
                        message: message.clone(),
                    });
                    machine::count_inbound(&current)
                }
            }
            LinkEvent::MessageOutboundAck {
                message_id,
                status,
                message,
            } => {
                if !current.is_connected() {
                    Step::Ignore("not connected")
                } else {
                    let first_seen = slot.counted_outbound.insert(message_id.clone());
                    match (first_seen, message) {
                        (true, Some(message)) => {
                            let mut message = message.clone();
                            message.apply_delivery(*status);
                            self.feed.emit(FeedUpdate::Appended {
                                channel: channel.clone(),
                                message,
                            });
                        }
                        _ => self.feed.emit(FeedUpdate::DeliveryUpdated {
                            channel: channel.clone(),
                            message_id: message_id.clone(),
                            status: *status,
                        }),
                    }
                    if first_seen {
                        machine::count_outbound(&current)
                    } else {
                        Step::Ignore("delivery update")
                    }
                }
            }
            _ => machine::apply_event(&current, &event, Utc::now()),
        };

        match step {
            Step::Apply(next) => {
                if matches!(event, LinkEvent::Connected { .. }) {
                    slot.reset_message_tracking();
                }
                self.commit_locked(&channel, slot, &current, next);
                DeliveryOutcome::Applied
            }
            Step::Ignore(reason) => {
                debug!(%channel, kind, reason, "event ignored");
                DeliveryOutcome::Ignored
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::mock::{MockBackend, MockCall};
    use crate::domain::Identity;
    use std::time::Duration;

    fn setup() -> (LifecycleController, MockBackend, ChannelId) {
        let backend = MockBackend::new();
        let controller =
            LifecycleController::new(Arc::new(backend.clone()), LifecyclePolicy::default());
        let channel = ChannelId::from("ch1");
        controller.register(channel.clone());
        (controller, backend, channel)
    }

    fn event(channel: &ChannelId, event: LinkEvent) -> Envelope {
        Envelope::new(channel.clone(), event)
    }

    fn connected_event() -> LinkEvent {
        LinkEvent::Connected {
            identity: Identity::new("+100", "Demo"),
        }
    }

    #[tokio::test]
    async fn register_is_idempotent() {
        let (controller, _, channel) = setup();
        let again = controller.register(channel.clone());
        assert_eq!(again.status(), LinkStatus::Disconnected);
        assert_eq!(controller.channels(), vec![channel]);
    }

    #[tokio::test]
    async fn unknown_channel_is_rejected() {
        let (controller, _, _) = setup();
        let err = controller
            .connect(&ChannelId::from("nope"))
            .await
            .unwrap_err();
        assert!(matches!(err, LinkError::UnknownChannel(_)));
    }

    #[tokio::test]
    async fn connect_records_inline_payload_and_session() {
        let (controller, backend, channel) = setup();
        backend.push_connect(Ok(ConnectResponse::pending()
            .with_payload("P0")
            .with_session("s1")));

        let state = controller.connect(&channel).await.unwrap();
        assert_eq!(state.status(), LinkStatus::QrPending);
        assert_eq!(state.pairing_payload(), Some("P0"));
        assert_eq!(state.generation(), 1);
        assert!(!state.is_busy());

        let stale = event(&channel, LinkEvent::Authenticated).with_session("other");
        assert_eq!(controller.deliver(stale), DeliveryOutcome::Stale);
    }

    #[tokio::test]
    async fn connect_failure_restores_prior_state() {
        let (controller, backend, channel) = setup();
        backend.push_connect(Err(LinkError::Backend {
            message: "quota".into(),
        }));

        let err = controller.connect(&channel).await.unwrap_err();
        assert!(matches!(err, LinkError::Backend { .. }));
        let state = controller.snapshot(&channel).unwrap();
        assert_eq!(state.status(), LinkStatus::Disconnected);
        assert!(!state.is_busy());
        assert_eq!(state.generation(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn connect_timeout_surfaces_timeout() {
        let (controller, backend, channel) = setup();
        backend.set_command_delay(Some(Duration::from_secs(60)));

        let err = controller.connect(&channel).await.unwrap_err();
        assert_eq!(
            err,
            LinkError::Timeout {
                command: CommandKind::Connect,
                after: Duration::from_secs(15)
            }
        );
        assert_eq!(
            controller.snapshot(&channel).unwrap().status(),
            LinkStatus::Disconnected
        );
    }

    #[tokio::test(start_paused = true)]
    async fn pairing_expires_into_error() {
        let (controller, _, channel) = setup();
        controller.connect(&channel).await.unwrap();

        tokio::time::sleep(Duration::from_secs(91)).await;

        let state = controller.snapshot(&channel).unwrap();
        assert_eq!(state.status(), LinkStatus::Error);
        assert_eq!(state.last_error(), Some("pairing expired"));
    }

    #[tokio::test(start_paused = true)]
    async fn new_payload_resets_expiry() {
        let (controller, _, channel) = setup();
        controller.connect(&channel).await.unwrap();

        tokio::time::sleep(Duration::from_secs(60)).await;
        controller.deliver(event(
            &channel,
            LinkEvent::PairingIssued {
                payload: "P2".into(),
            },
        ));
        tokio::time::sleep(Duration::from_secs(60)).await;
        assert_eq!(
            controller.snapshot(&channel).unwrap().status(),
            LinkStatus::QrPending
        );

        tokio::time::sleep(Duration::from_secs(31)).await;
        assert_eq!(
            controller.snapshot(&channel).unwrap().status(),
            LinkStatus::Error
        );
    }

    #[tokio::test(start_paused = true)]
    async fn auth_timeout_and_stale_timer() {
        let (controller, _, channel) = setup();
        controller.connect(&channel).await.unwrap();
        controller.deliver(event(&channel, LinkEvent::Authenticated));

        // The pairing timer must not fire once authentication started.
        tokio::time::sleep(Duration::from_secs(59)).await;
        assert_eq!(
            controller.snapshot(&channel).unwrap().status(),
            LinkStatus::Authenticating
        );

        tokio::time::sleep(Duration::from_secs(2)).await;
        assert_eq!(
            controller.snapshot(&channel).unwrap().last_error(),
            Some("authentication timed out")
        );
    }

    #[tokio::test(start_paused = true)]
    async fn connected_cancels_timers() {
        let (controller, _, channel) = setup();
        controller.connect(&channel).await.unwrap();
        controller.deliver(event(&channel, LinkEvent::Authenticated));
        controller.deliver(event(&channel, connected_event()));

        tokio::time::sleep(Duration::from_secs(300)).await;
        assert!(controller.snapshot(&channel).unwrap().is_connected());
    }

    #[tokio::test]
    async fn disconnect_is_idempotent() {
        let (controller, backend, channel) = setup();
        controller.disconnect(&channel).await.unwrap();
        controller.disconnect(&channel).await.unwrap();
        assert_eq!(
            backend.count_calls(|call| matches!(call, MockCall::Disconnect(_))),
            0
        );
    }

    #[tokio::test]
    async fn disconnect_failure_keeps_session() {
        let (controller, backend, channel) = setup();
        controller.connect(&channel).await.unwrap();
        controller.deliver(event(&channel, connected_event()).with_session("session-1"));
        controller.deliver(event(
            &channel,
            LinkEvent::MessageInbound {
                message: Message::inbound("m1", "+200", "+100", "hi"),
            },
        ));
        backend.push_disconnect(Err(LinkError::Backend {
            message: "busy".into(),
        }));

        assert!(controller.disconnect(&channel).await.is_err());
        let state = controller.snapshot(&channel).unwrap();
        assert!(state.is_connected());
        assert_eq!(state.counters().messages_received, 1);

        // The restored session still accepts its events.
        let outcome = controller.deliver(
            event(
                &channel,
                LinkEvent::MessageInbound {
                    message: Message::inbound("m2", "+200", "+100", "again"),
                },
            )
            .with_session("session-1"),
        );
        assert_eq!(outcome, DeliveryOutcome::Applied);
    }

    #[tokio::test]
    async fn restart_discards_old_session_events() {
        let (controller, _, channel) = setup();
        controller.connect(&channel).await.unwrap();
        controller.deliver(event(&channel, connected_event()).with_session("session-1"));

        let state = controller.restart(&channel).await.unwrap();
        assert_eq!(state.status(), LinkStatus::QrPending);
        assert_eq!(state.generation(), 2);

        let late = event(&channel, connected_event()).with_session("session-1");
        assert_eq!(controller.deliver(late), DeliveryOutcome::Stale);
        assert_eq!(
            controller.snapshot(&channel).unwrap().status(),
            LinkStatus::QrPending
        );
    }

    #[test]
    fn recent_ids_evict_oldest() {
        let mut ids = RecentIds::default();
        for n in 0..TRACKED_MESSAGE_IDS + 1 {
            assert!(ids.insert(format!("m{n}")));
        }
        assert_eq!(ids.len(), TRACKED_MESSAGE_IDS);
        assert!(!ids.insert(format!("m{TRACKED_MESSAGE_IDS}")));
        // m0 was evicted and counts as new again.
        assert!(ids.insert("m0".to_string()));
        assert_eq!(ids.len(), TRACKED_MESSAGE_IDS);
    }

    #[tokio::test]
    async fn message_flood_keeps_dedup_bounded() {
        let (controller, _, channel) = setup();
        controller.connect(&channel).await.unwrap();
        controller.deliver(event(&channel, connected_event()).with_session("session-1"));

        let flood = TRACKED_MESSAGE_IDS * 4;
        for n in 0..flood {
            let inbound = event(
                &channel,
                LinkEvent::MessageInbound {
                    message: Message::inbound(format!("in-{n}"), "+200", "+100", "hi"),
                },
            );
            assert_eq!(controller.deliver(inbound), DeliveryOutcome::Applied);
            let ack = event(
                &channel,
                LinkEvent::MessageOutboundAck {
                    message_id: format!("out-{n}"),
                    status: crate::domain::DeliveryStatus::Sent,
                    message: None,
                },
            );
            assert_eq!(controller.deliver(ack), DeliveryOutcome::Applied);
        }

        let counters = controller.snapshot(&channel).unwrap().counters();
        assert_eq!(counters.messages_received, flood as u64);
        assert_eq!(counters.messages_sent, flood as u64);

        let slots = lock(&controller.inner.slots);
        let slot = &slots[&channel];
        assert_eq!(slot.seen_inbound.len(), TRACKED_MESSAGE_IDS);
        assert_eq!(slot.counted_outbound.len(), TRACKED_MESSAGE_IDS);
    }

    #[tokio::test]
    async fn restart_connect_failure_settles_disconnected() {
        let (controller, backend, channel) = setup();
        controller.connect(&channel).await.unwrap();
        controller.deliver(event(&channel, connected_event()));
        backend.push_connect(Err(LinkError::Backend {
            message: "down".into(),
        }));

        assert!(controller.restart(&channel).await.is_err());
        let state = controller.snapshot(&channel).unwrap();
        assert_eq!(state.status(), LinkStatus::Disconnected);
        assert!(!state.is_busy());
    }

    #[tokio::test]
    async fn send_requires_connection() {
        let (controller, backend, channel) = setup();
        let err = controller
            .send_test_message(&channel, "+200", "ping")
            .await
            .unwrap_err();
        assert!(matches!(err, LinkError::NotConnected(_)));
        assert_eq!(
            backend.count_calls(|call| matches!(call, MockCall::Send(..))),
            0
        );
    }

    #[tokio::test]
    async fn send_counts_once_even_when_acked() {
        let (controller, backend, channel) = setup();
        controller.connect(&channel).await.unwrap();
        controller.deliver(event(&channel, connected_event()));
        backend.push_send(Ok(crate::backend::SendResponse::accepted("wamid-1")));

        let message = controller
            .send_test_message(&channel, "+200", "ping")
            .await
            .unwrap();
        assert_eq!(message.id, "wamid-1");

        controller.deliver(event(
            &channel,
            LinkEvent::MessageOutboundAck {
                message_id: "wamid-1".into(),
                status: crate::domain::DeliveryStatus::Delivered,
                message: None,
            },
        ));
        assert_eq!(controller.summary(&channel).unwrap().sent, 1);
    }

    #[tokio::test]
    async fn send_rejection_leaves_counters() {
        let (controller, backend, channel) = setup();
        controller.connect(&channel).await.unwrap();
        controller.deliver(event(&channel, connected_event()));
        backend.push_send(Ok(crate::backend::SendResponse::rejected("blocked")));

        let err = controller
            .send_test_message(&channel, "+200", "ping")
            .await
            .unwrap_err();
        assert_eq!(
            err,
            LinkError::Backend {
                message: "blocked".into()
            }
        );
        let state = controller.snapshot(&channel).unwrap();
        assert_eq!(state.counters().messages_sent, 0);
        assert!(!state.is_busy());
    }

    #[tokio::test]
    async fn duplicate_inbound_counted_once() {
        let (controller, _, channel) = setup();
        controller.connect(&channel).await.unwrap();
        controller.deliver(event(&channel, connected_event()));
        let inbound = event(
            &channel,
            LinkEvent::MessageInbound {
                message: Message::inbound("m1", "+200", "+100", "hi"),
            },
        );
        assert_eq!(controller.deliver(inbound.clone()), DeliveryOutcome::Applied);
        assert_eq!(controller.deliver(inbound), DeliveryOutcome::Ignored);
        assert_eq!(controller.summary(&channel).unwrap().received, 1);
    }

    #[tokio::test]
    async fn freshness_changes_notify_once() {
        let (controller, _, channel) = setup();
        assert!(controller.set_freshness(&channel, Freshness::Degraded));
        assert!(!controller.set_freshness(&channel, Freshness::Degraded));
        let state = controller.snapshot(&channel).unwrap();
        assert!(state.is_degraded());
        assert_eq!(state.status(), LinkStatus::Disconnected);
    }

    #[tokio::test]
    async fn remove_tears_down_and_forgets() {
        let (controller, backend, channel) = setup();
        controller.connect(&channel).await.unwrap();
        controller.deliver(event(&channel, connected_event()));

        controller.remove(&channel).await.unwrap();
        assert!(controller.snapshot(&channel).is_err());
        assert_eq!(
            backend.count_calls(|call| matches!(call, MockCall::Disconnect(_))),
            1
        );
        assert_eq!(
            controller.deliver(event(&channel, connected_event())),
            DeliveryOutcome::UnknownChannel
        );
    }
}
