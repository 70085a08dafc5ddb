//! Scripted backend for lifecycle tests.
//!
//! Command results are queued per operation and fall back to a successful
//! default. Push subscriptions are backed by an unbounded channel so tests can
//! inject events, break the stream, or make the next subscribe attempts fail.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use futures::channel::mpsc;

use crate::backend::{
    ConnectResponse, EventStream, LinkBackend, SendRequest, SendResponse, StatusSnapshot,
};
use crate::domain::{ChannelId, LinkStatus};
use crate::error::{LinkError, LinkResult, StreamError};
use crate::sse::Envelope;
use crate::store::lock;

/// A call observed by the mock, in arrival order.
#[derive(Debug, Clone, PartialEq)]
pub enum MockCall {
    Connect(ChannelId),
    Disconnect(ChannelId),
    Status(ChannelId),
    Send(ChannelId, SendRequest),
    Subscribe(String),
}

#[derive(Default)]
struct MockState {
    connect: VecDeque<LinkResult<ConnectResponse>>,
    disconnect: VecDeque<LinkResult<()>>,
    send: VecDeque<LinkResult<SendResponse>>,
    status: HashMap<ChannelId, LinkResult<StatusSnapshot>>,
    subscribe_failures: usize,
    command_delay: Option<Duration>,
    push: Option<mpsc::UnboundedSender<LinkResult<Envelope>>>,
    sessions_issued: u64,
    calls: Vec<MockCall>,
}

/// In-memory [`LinkBackend`].
#[derive(Clone, Default)]
pub struct MockBackend {
    state: Arc<Mutex<MockState>>,
}

impl MockBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue the result of the next `connect` call.
    pub fn push_connect(&self, result: LinkResult<ConnectResponse>) {
        lock(&self.state).connect.push_back(result);
    }

    /// Queue the result of the next `disconnect` call.
    pub fn push_disconnect(&self, result: LinkResult<()>) {
        lock(&self.state).disconnect.push_back(result);
    }

    /// Queue the result of the next `send` call.
    pub fn push_send(&self, result: LinkResult<SendResponse>) {
        lock(&self.state).send.push_back(result);
    }

    /// Set what `status` returns for a channel until changed.
    pub fn set_status(&self, channel: impl Into<ChannelId>, result: LinkResult<StatusSnapshot>) {
        lock(&self.state)
            .status
            .insert(channel.into(), result);
    }

    /// Make the next `count` subscribe attempts fail.
    pub fn fail_subscribes(&self, count: usize) {
        lock(&self.state).subscribe_failures = count;
    }

    /// Delay every command (not status or subscribe) by `delay`.
    pub fn set_command_delay(&self, delay: Option<Duration>) {
        lock(&self.state).command_delay = delay;
    }

    /// Push an item to the current subscriber. Returns false if nobody listens.
    pub fn emit(&self, item: LinkResult<Envelope>) -> bool {
        let state = lock(&self.state);
        match &state.push {
            Some(tx) => tx.unbounded_send(item).is_ok(),
            None => false,
        }
    }

    pub fn emit_event(&self, envelope: Envelope) -> bool {
        self.emit(Ok(envelope))
    }

    /// End the current push stream as if the server closed it.
    pub fn close_stream(&self) {
        lock(&self.state).push = None;
    }

    /// Whether a push subscriber is currently attached.
    pub fn has_subscriber(&self) -> bool {
        lock(&self.state)
            .push
            .as_ref()
            .map(|tx| !tx.is_closed())
            .unwrap_or(false)
    }

    pub fn calls(&self) -> Vec<MockCall> {
        lock(&self.state).calls.clone()
    }

    pub fn count_calls(&self, matches: impl Fn(&MockCall) -> bool) -> usize {
        lock(&self.state)
            .calls
            .iter()
            .filter(|call| matches(call))
            .count()
    }

    fn record(&self, call: MockCall) -> Option<Duration> {
        let mut state = lock(&self.state);
        state.calls.push(call);
        state.command_delay
    }

    async fn pause(delay: Option<Duration>) {
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
    }
}

#[async_trait]
impl LinkBackend for MockBackend {
    async fn connect(&self, channel: &ChannelId) -> LinkResult<ConnectResponse> {
        let delay = self.record(MockCall::Connect(channel.clone()));
        Self::pause(delay).await;
        let mut state = lock(&self.state);
        match state.connect.pop_front() {
            Some(result) => result,
            None => {
                state.sessions_issued += 1;
                Ok(ConnectResponse::pending().with_session(format!("session-{}", state.sessions_issued)))
            }
        }
    }

    async fn disconnect(&self, channel: &ChannelId) -> LinkResult<()> {
        let delay = self.record(MockCall::Disconnect(channel.clone()));
        Self::pause(delay).await;
        lock(&self.state)
            .disconnect
            .pop_front()
            .unwrap_or(Ok(()))
    }

    async fn status(&self, channel: &ChannelId) -> LinkResult<StatusSnapshot> {
        self.record(MockCall::Status(channel.clone()));
        lock(&self.state)
            .status
            .get(channel)
            .cloned()
            .unwrap_or_else(|| Ok(StatusSnapshot::new(LinkStatus::Disconnected)))
    }

    async fn send(&self, channel: &ChannelId, request: &SendRequest) -> LinkResult<SendResponse> {
        let delay = self.record(MockCall::Send(channel.clone(), request.clone()));
        Self::pause(delay).await;
        let mut state = lock(&self.state);
        match state.send.pop_front() {
            Some(result) => result,
            None => Ok(SendResponse::accepted(format!("msg-{}", state.calls.len()))),
        }
    }

    async fn subscribe(&self, operator_id: &str) -> LinkResult<EventStream> {
        self.record(MockCall::Subscribe(operator_id.to_string()));
        let mut state = lock(&self.state);
        if state.subscribe_failures > 0 {
            state.subscribe_failures -= 1;
            return Err(LinkError::Stream(StreamError::SubscribeFailed {
                message: "mock subscribe failure".to_string(),
            }));
        }
        let (tx, rx) = mpsc::unbounded();
        state.push = Some(tx);
        Ok(Box::pin(rx))
    }
}
