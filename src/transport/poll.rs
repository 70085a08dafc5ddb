//! Polling fallback.
//!
//! While the push channel is down, each watched channel's status is fetched
//! on an interval and compared with the previous observation. Differences
//! become the same [`LinkEvent`]s the push channel would have carried, so the
//! controller cannot tell the two sources apart.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, warn};

use super::EventSink;
use crate::backend::{LinkBackend, StatusSnapshot};
use crate::domain::{ChannelId, LinkStatus};
use crate::sse::{Envelope, LinkEvent};

/// Message delivered to every channel once polling keeps failing.
pub const UNREACHABLE_MESSAGE: &str = "backend unreachable";

/// Events implied by moving from `previous` to `current`, given the status
/// the controller holds locally.
///
/// With no previous observation the snapshot is translated as is, except for
/// `disconnected`: that is only reported when it contradicts a local
/// `connected` or `authenticating` session, so a pairing that is still
/// pending locally is not torn down by a backend that has not caught up.
pub fn diff(
    previous: Option<&StatusSnapshot>,
    current: &StatusSnapshot,
    local: Option<LinkStatus>,
) -> Vec<LinkEvent> {
    if current.status == LinkStatus::Disconnected
        && matches!(local, Some(LinkStatus::Connected | LinkStatus::Authenticating))
    {
        return vec![LinkEvent::Disconnected { reason: None }];
    }
    if previous == Some(current) {
        return Vec::new();
    }
    let previous_status = previous.map(|snapshot| snapshot.status);
    let mut events = Vec::new();

    match current.status {
        LinkStatus::QrPending => {
            if let Some(payload) = &current.pairing_payload {
                let seen = previous.and_then(|p| p.pairing_payload.as_ref()) == Some(payload)
                    && previous_status == Some(LinkStatus::QrPending);
                if !seen {
                    events.push(LinkEvent::PairingIssued {
                        payload: payload.clone(),
                    });
                }
            }
        }
        LinkStatus::Authenticating => {
            if previous_status != Some(LinkStatus::Authenticating) {
                events.push(LinkEvent::Authenticated);
            }
        }
        LinkStatus::Connected => match &current.identity {
            Some(identity) => {
                let seen = previous_status == Some(LinkStatus::Connected)
                    && previous.and_then(|p| p.identity.as_ref()) == Some(identity);
                if !seen {
                    events.push(LinkEvent::Connected {
                        identity: identity.clone(),
                    });
                }
            }
            None => debug!("connected snapshot without identity, skipping"),
        },
        LinkStatus::Disconnected => {
            if matches!(previous_status, Some(status) if status != LinkStatus::Disconnected) {
                events.push(LinkEvent::Disconnected { reason: None });
            }
        }
        LinkStatus::Error => {
            let message = current
                .last_error
                .clone()
                .unwrap_or_else(|| "backend reported an error".to_string());
            let seen = previous_status == Some(LinkStatus::Error)
                && previous.and_then(|p| p.last_error.as_ref()) == current.last_error.as_ref();
            if !seen {
                events.push(LinkEvent::Error { message });
            }
        }
    }
    events
}

/// Result of one polling round.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RoundOutcome {
    /// Nothing to poll.
    Idle,
    /// At least one channel answered.
    Healthy { events: usize },
    /// Every poll failed; `streak` consecutive failed rounds so far.
    Failed { streak: u32 },
}

/// Remembers the last snapshot per channel and counts failed rounds.
pub struct StatusPoller {
    backend: Arc<dyn LinkBackend>,
    request_timeout: Duration,
    failure_threshold: u32,
    last_seen: HashMap<ChannelId, StatusSnapshot>,
    failure_streak: u32,
}

impl StatusPoller {
    pub fn new(backend: Arc<dyn LinkBackend>, request_timeout: Duration, failure_threshold: u32) -> Self {
        Self {
            backend,
            request_timeout,
            failure_threshold: failure_threshold.max(1),
            last_seen: HashMap::new(),
            failure_streak: 0,
        }
    }

    pub fn failure_streak(&self) -> u32 {
        self.failure_streak
    }

    /// Forget previous observations, e.g. once push is live again.
    pub fn reset(&mut self) {
        self.last_seen.clear();
        self.failure_streak = 0;
    }

    /// Poll every pollable channel once and forward the resulting events.
    pub async fn poll_round(&mut self, sink: &dyn EventSink) -> RoundOutcome {
        let channels = sink.pollable_channels();
        if channels.is_empty() {
            return RoundOutcome::Idle;
        }

        let mut answered = 0usize;
        let mut delivered = 0usize;
        for channel in channels {
            let result = tokio::time::timeout(self.request_timeout, self.backend.status(&channel)).await;
            let snapshot = match result {
                Ok(Ok(snapshot)) => snapshot,
                Ok(Err(err)) => {
                    debug!(%channel, error = %err, "status poll failed");
                    continue;
                }
                Err(_) => {
                    debug!(%channel, "status poll timed out");
                    continue;
                }
            };
            answered += 1;

            let local = sink.local_status(&channel);
            for event in diff(self.last_seen.get(&channel), &snapshot, local) {
                let mut envelope = Envelope::new(channel.clone(), event);
                envelope.session_id = snapshot.session_id.clone();
                sink.deliver_event(envelope);
                delivered += 1;
            }
            self.last_seen.insert(channel, snapshot);
        }

        if answered > 0 {
            self.failure_streak = 0;
            return RoundOutcome::Healthy { events: delivered };
        }

        self.failure_streak += 1;
        if self.failure_streak == self.failure_threshold {
            warn!(
                streak = self.failure_streak,
                "status polling keeps failing, marking channels unreachable"
            );
            for channel in sink.pollable_channels() {
                sink.deliver_event(Envelope::new(
                    channel,
                    LinkEvent::Error {
                        message: UNREACHABLE_MESSAGE.to_string(),
                    },
                ));
            }
        }
        RoundOutcome::Failed {
            streak: self.failure_streak,
        }
    }
}
