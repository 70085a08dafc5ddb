//! Status badge.
//!
//! One-line connection indicator shown next to a channel name. Clicking it
//! connects a disconnected channel and disconnects a live or pairing one.

use super::{Bound, StateView};
use crate::domain::{ChannelId, CommandKind, ConnectionState, LinkStatus};
use crate::error::LinkResult;
use crate::lifecycle::LifecycleController;

/// Colour family of the badge.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BadgeTone {
    Neutral,
    Pending,
    Positive,
    Negative,
}

impl BadgeTone {
    pub fn symbol(&self) -> &'static str {
        match self {
            BadgeTone::Neutral => "○",
            BadgeTone::Pending => "◐",
            BadgeTone::Positive => "●",
            BadgeTone::Negative => "✕",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct BadgeView {
    pub status: LinkStatus,
    pub label: &'static str,
    pub tone: BadgeTone,
    /// Linked account while connected, error message in the error status.
    pub detail: Option<String>,
    pub degraded: bool,
    pub busy: Option<CommandKind>,
}

impl BadgeView {
    pub fn render(&self) -> String {
        let mut text = format!("{} {}", self.tone.symbol(), self.label);
        if let Some(detail) = &self.detail {
            text.push_str(": ");
            text.push_str(detail);
        }
        if let Some(command) = self.busy {
            text.push_str(&format!(" ({}...)", command));
        }
        if self.degraded {
            text.push_str(" [updates delayed]");
        }
        text
    }
}

impl StateView for BadgeView {
    fn from_state(state: &ConnectionState) -> Self {
        let (label, tone) = match state.status() {
            LinkStatus::Disconnected => ("Disconnected", BadgeTone::Neutral),
            LinkStatus::QrPending => ("Waiting for scan", BadgeTone::Pending),
            LinkStatus::Authenticating => ("Authenticating", BadgeTone::Pending),
            LinkStatus::Connected => ("Connected", BadgeTone::Positive),
            LinkStatus::Error => ("Error", BadgeTone::Negative),
        };
        let detail = match (state.identity(), state.last_error()) {
            (Some(identity), _) => Some(format!(
                "{} ({})",
                identity.display_name, identity.external_number
            )),
            (None, Some(error)) => Some(error.to_string()),
            (None, None) => None,
        };

        Self {
            status: state.status(),
            label,
            tone,
            detail,
            degraded: state.is_degraded(),
            busy: state.in_flight(),
        }
    }
}

pub struct StatusBadge {
    controller: LifecycleController,
    bound: Bound<BadgeView>,
}

impl StatusBadge {
    pub fn attach(controller: &LifecycleController, channel: &ChannelId) -> LinkResult<Self> {
        Ok(Self {
            controller: controller.clone(),
            bound: Bound::attach(controller, channel)?,
        })
    }

    pub fn view(&self) -> BadgeView {
        self.bound.view()
    }

    pub fn render(&self) -> String {
        self.bound.view().render()
    }

    pub fn bound(&self) -> &Bound<BadgeView> {
        &self.bound
    }

    /// Connect when idle or failed, otherwise disconnect.
    pub async fn toggle(&self) -> LinkResult<ConnectionState> {
        self.bound.ensure_idle()?;
        let channel = self.bound.channel();
        match self.controller.snapshot(channel)?.status() {
            LinkStatus::Disconnected | LinkStatus::Error => self.controller.connect(channel).await,
            _ => self.controller.disconnect(channel).await,
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::adapters::mock::MockBackend;
    use crate::domain::{Freshness, Identity};
    use crate::lifecycle::LifecyclePolicy;
    use crate::sse::{Envelope, LinkEvent};

    fn setup() -> (LifecycleController, ChannelId) {
        let controller = LifecycleController::new(Arc::new(MockBackend::new()), LifecyclePolicy::default());
        let channel = controller.register("ch1").channel_id().clone();
        (controller, channel)
    }

    #[tokio::test]
    async fn follows_the_lifecycle() {
        let (controller, channel) = setup();
        let badge = StatusBadge::attach(&controller, &channel).unwrap();
        assert_eq!(badge.render(), "○ Disconnected");

        badge.toggle().await.unwrap();
        assert_eq!(badge.view().status, LinkStatus::QrPending);
        assert_eq!(badge.view().tone, BadgeTone::Pending);

        controller.deliver(Envelope::new("ch1", LinkEvent::Authenticated));
        assert_eq!(badge.view().label, "Authenticating");

        controller.deliver(Envelope::new(
            "ch1",
            LinkEvent::Connected {
                identity: Identity::new("+100", "Demo"),
            },
        ));
        assert_eq!(badge.render(), "● Connected: Demo (+100)");

        badge.toggle().await.unwrap();
        assert_eq!(badge.view().status, LinkStatus::Disconnected);
    }

    #[tokio::test]
    async fn shows_error_and_degraded_flag() {
        let (controller, channel) = setup();
        let badge = StatusBadge::attach(&controller, &channel).unwrap();
        controller.connect(&channel).await.unwrap();
        controller.deliver(Envelope::new(
            "ch1",
            LinkEvent::Error {
                message: "scan rejected".into(),
            },
        ));
        controller.set_freshness(&channel, Freshness::Degraded);

        assert_eq!(badge.render(), "✕ Error: scan rejected [updates delayed]");
        assert!(badge.bound().revision() >= 3);
    }

    #[tokio::test]
    async fn unsubscribes_on_drop() {
        let (controller, channel) = setup();
        let badge = StatusBadge::attach(&controller, &channel).unwrap();
        assert_eq!(controller.store().subscriber_count(&channel), 1);
        drop(badge);
        assert_eq!(controller.store().subscriber_count(&channel), 0);
    }

    #[test]
    fn unknown_channel_is_rejected() {
        let controller = LifecycleController::new(Arc::new(MockBackend::new()), LifecyclePolicy::default());
        assert!(StatusBadge::attach(&controller, &ChannelId::from("nope")).is_err());
    }

    #[test]
    fn busy_view_mentions_command() {
        let mut state = ConnectionState::new(ChannelId::from("ch1"));
        state.in_flight = Some(CommandKind::Disconnect);
        assert_eq!(BadgeView::from_state(&state).render(), "○ Disconnected (disconnect...)");
    }
}
