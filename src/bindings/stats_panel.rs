//! Statistics panel: message counters and session uptime.

use chrono::{DateTime, Utc};

use super::{Bound, StateView};
use crate::domain::{ChannelId, ConnectionState, Identity, LinkStatus, MessageSummary};
use crate::error::LinkResult;
use crate::lifecycle::LifecycleController;

#[derive(Debug, Clone, PartialEq)]
pub struct StatsView {
    pub status: LinkStatus,
    pub summary: MessageSummary,
    pub identity: Option<Identity>,
    pub connected_at: Option<DateTime<Utc>>,
}

impl StatsView {
    /// Uptime as `1h 02m`, `4m 05s` or `12s`.
    pub fn uptime_text(&self, now: DateTime<Utc>) -> Option<String> {
        let secs = (now - self.connected_at?).num_seconds().max(0);
        let (hours, minutes, seconds) = (secs / 3600, (secs % 3600) / 60, secs % 60);
        Some(if hours > 0 {
            format!("{}h {:02}m", hours, minutes)
        } else if minutes > 0 {
            format!("{}m {:02}s", minutes, seconds)
        } else {
            format!("{}s", seconds)
        })
    }

    pub fn render(&self, now: DateTime<Utc>) -> String {
        let mut lines = vec![format!(
            "Sent {}  Received {}  Total {}",
            self.summary.sent, self.summary.received, self.summary.total
        )];
        match (&self.identity, self.uptime_text(now)) {
            (Some(identity), Some(uptime)) => lines.push(format!(
                "{} up {}",
                identity.external_number, uptime
            )),
            _ => lines.push(format!("Not connected ({})", self.status)),
        }
        lines.join("\n")
    }
}

impl StateView for StatsView {
    fn from_state(state: &ConnectionState) -> Self {
        Self {
            status: state.status(),
            summary: state.summary(),
            identity: state.identity().cloned(),
            connected_at: state.connected_at(),
        }
    }
}

/// Read-only panel; it has no actions of its own.
pub struct StatsPanel {
    bound: Bound<StatsView>,
}

impl StatsPanel {
    pub fn attach(controller: &LifecycleController, channel: &ChannelId) -> LinkResult<Self> {
        Ok(Self {
            bound: Bound::attach(controller, channel)?,
        })
    }

    pub fn view(&self) -> StatsView {
        self.bound.view()
    }

    pub fn render(&self) -> String {
        self.bound.view().render(Utc::now())
    }

    pub fn bound(&self) -> &Bound<StatsView> {
        &self.bound
    }
}
