//! Pairing panel.
//!
//! Shows the QR payload while pairing is pending, and offers generate,
//! regenerate and cancel actions depending on the status.

use super::{Bound, StateView};
use crate::domain::{ChannelId, ConnectionState, LinkStatus};
use crate::error::{LinkError, LinkResult};
use crate::lifecycle::LifecycleController;

#[derive(Debug, Clone, PartialEq)]
pub struct PairingView {
    pub status: LinkStatus,
    /// Payload to encode as a QR code. Only set while pairing is pending.
    pub payload: Option<String>,
    pub instructions: String,
    pub can_generate: bool,
    pub can_regenerate: bool,
    pub can_cancel: bool,
    pub busy: bool,
    pub generation: u64,
}

impl PairingView {
    pub fn render(&self) -> String {
        let mut lines = vec![self.instructions.clone()];
        if let Some(payload) = &self.payload {
            lines.push(format!("[QR] {}", payload));
        }
        let actions: Vec<&str> = [
            (self.can_generate, "generate"),
            (self.can_regenerate, "regenerate"),
            (self.can_cancel, "cancel"),
        ]
        .into_iter()
        .filter_map(|(enabled, name)| enabled.then_some(name))
        .collect();
        if !actions.is_empty() {
            lines.push(format!("Actions: {}", actions.join(", ")));
        }
        lines.join("\n")
    }
}

impl StateView for PairingView {
    fn from_state(state: &ConnectionState) -> Self {
        let status = state.status();
        let busy = state.is_busy();
        let instructions = match status {
            LinkStatus::Disconnected => "Generate a code to link a WhatsApp number.".to_string(),
            LinkStatus::QrPending => match state.pairing_payload() {
                Some(_) => "Scan this code in WhatsApp under Linked devices.".to_string(),
                None => "Requesting a pairing code...".to_string(),
            },
            LinkStatus::Authenticating => "Code scanned, finishing sign-in...".to_string(),
            LinkStatus::Connected => match state.identity() {
                Some(identity) => format!("Linked to {}.", identity.display_name),
                None => "Linked.".to_string(),
            },
            LinkStatus::Error => format!(
                "{}. Generate a new code to try again.",
                state.last_error().unwrap_or("Pairing failed")
            ),
        };

        Self {
            status,
            payload: state.pairing_payload().map(str::to_string),
            instructions,
            can_generate: !busy && matches!(status, LinkStatus::Disconnected | LinkStatus::Error),
            can_regenerate: !busy && matches!(status, LinkStatus::QrPending | LinkStatus::Error),
            can_cancel: !busy
                && matches!(status, LinkStatus::QrPending | LinkStatus::Authenticating),
            busy,
            generation: state.generation(),
        }
    }
}

pub struct PairingPanel {
    controller: LifecycleController,
    bound: Bound<PairingView>,
}

impl PairingPanel {
    pub fn attach(controller: &LifecycleController, channel: &ChannelId) -> LinkResult<Self> {
        Ok(Self {
            controller: controller.clone(),
            bound: Bound::attach(controller, channel)?,
        })
    }

    pub fn view(&self) -> PairingView {
        self.bound.view()
    }

    pub fn render(&self) -> String {
        self.bound.view().render()
    }

    pub fn bound(&self) -> &Bound<PairingView> {
        &self.bound
    }

    /// Request a first pairing code.
    pub async fn generate(&self) -> LinkResult<ConnectionState> {
        self.bound.ensure_idle()?;
        self.controller.connect(self.bound.channel()).await
    }

    /// Discard the current code (or error) and request a new one.
    pub async fn regenerate(&self) -> LinkResult<ConnectionState> {
        self.bound.ensure_idle()?;
        self.controller.restart(self.bound.channel()).await
    }

    /// Abandon pairing.
    pub async fn cancel(&self) -> LinkResult<ConnectionState> {
        self.bound.ensure_idle()?;
        let channel = self.bound.channel();
        let status = self.controller.snapshot(channel)?.status();
        if !matches!(status, LinkStatus::QrPending | LinkStatus::Authenticating) {
            return Err(LinkError::invalid_state(status, "cancel pairing"));
        }
        self.controller.disconnect(channel).await
    }
}
