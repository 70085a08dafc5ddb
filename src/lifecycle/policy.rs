//! Timer and timeout settings for the lifecycle controller.

use std::time::Duration;

/// Bounds applied by the controller to pairing and to backend commands.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LifecyclePolicy {
    /// How long a pairing attempt may stay in `qr_pending`. Re-armed on
    /// every new pairing payload.
    pub pairing_timeout: Duration,
    /// How long the backend may spend authenticating after a scan.
    pub auth_timeout: Duration,
    /// Upper bound for every backend command.
    pub command_timeout: Duration,
}

impl Default for LifecyclePolicy {
    fn default() -> Self {
        Self {
            pairing_timeout: Duration::from_secs(90),
            auth_timeout: Duration::from_secs(60),
            command_timeout: Duration::from_secs(15),
        }
    }
}

impl LifecyclePolicy {
    pub fn with_pairing_timeout(mut self, timeout: Duration) -> Self {
        self.pairing_timeout = timeout;
        self
    }

    pub fn with_auth_timeout(mut self, timeout: Duration) -> Self {
        self.auth_timeout = timeout;
        self
    }

    pub fn with_command_timeout(mut self, timeout: Duration) -> Self {
        self.command_timeout = timeout;
        self
    }
}
