//! Pure transition rules.
//!
//! Every function here takes the current [`ConnectionState`] and returns the
//! next one (or why nothing changes). No I/O, no locking; the controller
//! decides when to call them and commits the result.

use chrono::{DateTime, Utc};

use crate::domain::{
    CommandKind, ConnectionState, Counters, Identity, LinkStatus, Phase,
};
use crate::error::{LinkError, LinkResult};
use crate::sse::LinkEvent;

/// Outcome of applying an event or timer.
#[derive(Debug, Clone, PartialEq)]
pub(crate) enum Step {
    Apply(ConnectionState),
    Ignore(&'static str),
}

/// Timers armed by the controller while pairing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum TimerKind {
    PairingExpiry,
    AuthTimeout,
}

impl TimerKind {
    pub(crate) fn guarded_status(self) -> LinkStatus {
        match self {
            TimerKind::PairingExpiry => LinkStatus::QrPending,
            TimerKind::AuthTimeout => LinkStatus::Authenticating,
        }
    }

    pub(crate) fn message(self) -> &'static str {
        match self {
            TimerKind::PairingExpiry => "pairing expired",
            TimerKind::AuthTimeout => "authentication timed out",
        }
    }
}

fn pending(state: &ConnectionState, command: CommandKind) -> ConnectionState {
    let mut next = state.clone().with_phase(Phase::QrPending {
        pairing_payload: None,
    });
    next.counters = Counters::default();
    next.generation = state.generation + 1;
    next.in_flight = Some(command);
    next
}

fn disconnected(state: &ConnectionState) -> ConnectionState {
    let mut next = state.clone().with_phase(Phase::Disconnected);
    next.counters = Counters::default();
    next
}

/// Optimistic state for `connect`.
pub(crate) fn begin_connect(state: &ConnectionState) -> LinkResult<ConnectionState> {
    if let Some(command) = state.in_flight {
        return Err(LinkError::busy(&state.channel_id, command));
    }
    if state.is_connected() {
        return Err(LinkError::AlreadyConnected(state.channel_id.clone()));
    }
    match state.status() {
        LinkStatus::Disconnected | LinkStatus::Error => Ok(pending(state, CommandKind::Connect)),
        status => Err(LinkError::invalid_state(status, "connect")),
    }
}

/// Optimistic state for `disconnect`; `None` when there is nothing to tear down.
pub(crate) fn begin_disconnect(state: &ConnectionState) -> LinkResult<Option<ConnectionState>> {
    if let Some(command) = state.in_flight {
        return Err(LinkError::busy(&state.channel_id, command));
    }
    if state.status() == LinkStatus::Disconnected {
        return Ok(None);
    }
    let mut next = disconnected(state);
    next.in_flight = Some(CommandKind::Disconnect);
    Ok(Some(next))
}

/// Optimistic state for `restart`: always a fresh generation.
pub(crate) fn begin_restart(state: &ConnectionState) -> LinkResult<ConnectionState> {
    if let Some(command) = state.in_flight {
        return Err(LinkError::busy(&state.channel_id, command));
    }
    Ok(pending(state, CommandKind::Restart))
}

/// Marks a test send in flight. The status is left untouched.
pub(crate) fn begin_send(state: &ConnectionState) -> LinkResult<ConnectionState> {
    if !state.is_connected() {
        return Err(LinkError::NotConnected(state.channel_id.clone()));
    }
    if let Some(command) = state.in_flight {
        return Err(LinkError::busy(&state.channel_id, command));
    }
    let mut next = state.clone();
    next.in_flight = Some(CommandKind::SendTestMessage);
    Ok(next)
}

/// Clear the in-flight marker after the backend answered.
pub(crate) fn finish(state: &ConnectionState) -> ConnectionState {
    let mut next = state.clone();
    next.in_flight = None;
    next
}

/// Undo an optimistic commit after a failed command.
///
/// If events moved the channel on meanwhile, the event-driven state wins and
/// only the in-flight marker is cleared. The generation never goes back.
pub(crate) fn rollback(
    current: &ConnectionState,
    prior: &ConnectionState,
    optimistic: &ConnectionState,
) -> ConnectionState {
    if current.phase != optimistic.phase {
        return finish(current);
    }
    let mut restored = prior.clone();
    restored.in_flight = None;
    restored.generation = current.generation;
    restored.freshness = current.freshness;
    restored
}

/// Settle a restart whose connect half failed after the old session was
/// already torn down.
pub(crate) fn abandon_restart(current: &ConnectionState, optimistic: &ConnectionState) -> ConnectionState {
    if current.phase != optimistic.phase {
        return finish(current);
    }
    teardown(current)
}

/// Idle, disconnected, zero counters. Used when a channel is removed.
pub(crate) fn teardown(state: &ConnectionState) -> ConnectionState {
    finish(&disconnected(state))
}

/// Attach the pairing payload returned inline by the connect call.
pub(crate) fn accept_pairing(state: &ConnectionState, payload: Option<String>) -> ConnectionState {
    let mut next = finish(state);
    if let (Phase::QrPending { pairing_payload: None }, Some(payload)) = (&state.phase, payload) {
        next.phase = Phase::QrPending {
            pairing_payload: Some(payload),
        };
    }
    next
}

/// Apply a lifecycle event. Message events are handled by [`count_inbound`]
/// and [`count_outbound`] because they need the controller's dedup sets.
pub(crate) fn apply_event(state: &ConnectionState, event: &LinkEvent, now: DateTime<Utc>) -> Step {
    match event {
        LinkEvent::PairingIssued { payload } => on_pairing_issued(state, payload),
        LinkEvent::Authenticated => on_authenticated(state),
        LinkEvent::Connected { identity } => on_connected(state, identity, now),
        LinkEvent::Disconnected { .. } => on_disconnected(state),
        LinkEvent::Error { message } => on_error(state, message),
        LinkEvent::MessageInbound { .. } => count_inbound(state),
        LinkEvent::MessageOutboundAck { .. } => count_outbound(state),
    }
}

fn on_pairing_issued(state: &ConnectionState, payload: &str) -> Step {
    match &state.phase {
        Phase::QrPending { pairing_payload } if pairing_payload.as_deref() == Some(payload) => {
            Step::Ignore("pairing payload unchanged")
        }
        Phase::QrPending { .. } => Step::Apply(state.clone().with_phase(Phase::QrPending {
            pairing_payload: Some(payload.to_string()),
        })),
        _ => Step::Ignore("no pairing in progress"),
    }
}

fn on_authenticated(state: &ConnectionState) -> Step {
    match state.status() {
        LinkStatus::QrPending => Step::Apply(state.clone().with_phase(Phase::Authenticating)),
        LinkStatus::Authenticating => Step::Ignore("already authenticating"),
        _ => Step::Ignore("no pairing in progress"),
    }
}

fn on_connected(state: &ConnectionState, identity: &Identity, now: DateTime<Utc>) -> Step {
    if state.identity() == Some(identity) {
        return Step::Ignore("already connected");
    }
    let mut next = state.clone().with_phase(Phase::Connected {
        identity: identity.clone(),
        connected_at: now,
    });
    next.counters = Counters::default();
    Step::Apply(next)
}

fn on_disconnected(state: &ConnectionState) -> Step {
    if state.status() == LinkStatus::Disconnected {
        return Step::Ignore("already disconnected");
    }
    Step::Apply(disconnected(state))
}

fn on_error(state: &ConnectionState, message: &str) -> Step {
    match state.status() {
        LinkStatus::Disconnected => Step::Ignore("error while disconnected"),
        _ if state.last_error() == Some(message) => Step::Ignore("same error"),
        _ => Step::Apply(state.clone().with_phase(Phase::Error {
            last_error: message.to_string(),
        })),
    }
}

/// Count one new inbound message.
pub(crate) fn count_inbound(state: &ConnectionState) -> Step {
    if !state.is_connected() {
        return Step::Ignore("not connected");
    }
    let mut next = state.clone();
    next.counters.messages_received += 1;
    Step::Apply(next)
}

/// Count one new outbound message.
pub(crate) fn count_outbound(state: &ConnectionState) -> Step {
    if !state.is_connected() {
        return Step::Ignore("not connected");
    }
    let mut next = state.clone();
    next.counters.messages_sent += 1;
    Step::Apply(next)
}

/// A pairing or auth timer fired.
pub(crate) fn expire(state: &ConnectionState, timer: TimerKind) -> Step {
    if state.status() != timer.guarded_status() {
        return Step::Ignore("timer outlived its status");
    }
    Step::Apply(state.clone().with_phase(Phase::Error {
        last_error: timer.message().to_string(),
    }))
}
