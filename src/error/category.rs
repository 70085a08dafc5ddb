//! Coarse classification of [`LinkError`](super::LinkError).

use std::fmt;

/// Where a failure came from, which decides who can do something about it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCategory {
    /// The backend could not be reached or the push stream broke.
    Network,
    /// The backend answered and reported a failure of its own.
    Server,
    /// Payloads this crate could not make sense of.
    Client,
    /// A command issued while the channel's status does not allow it.
    User,
    Configuration,
}

impl ErrorCategory {
    /// Network and server failures usually clear up on their own.
    pub fn is_retryable(self) -> bool {
        matches!(self, ErrorCategory::Network | ErrorCategory::Server)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ErrorCategory::Network => "network",
            ErrorCategory::Server => "server",
            ErrorCategory::Client => "client",
            ErrorCategory::User => "user",
            ErrorCategory::Configuration => "configuration",
        }
    }

    /// One-line advice shown next to a failed command.
    pub fn hint(self) -> &'static str {
        match self {
            ErrorCategory::Network => "The link will keep retrying in the background.",
            ErrorCategory::Server => "The messaging backend reported a problem; try again shortly.",
            ErrorCategory::Client => "The backend sent something unexpected; check its version.",
            ErrorCategory::User => "Wait for the channel status to change, then retry.",
            ErrorCategory::Configuration => "Check the WALINK_* environment variables.",
        }
    }
}

impl fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_remote_failures_retry() {
        let retryable: Vec<_> = [
            ErrorCategory::Network,
            ErrorCategory::Server,
            ErrorCategory::Client,
            ErrorCategory::User,
            ErrorCategory::Configuration,
        ]
        .into_iter()
        .filter(|c| c.is_retryable())
        .collect();
        assert_eq!(retryable, vec![ErrorCategory::Network, ErrorCategory::Server]);
    }

    #[test]
    fn labels() {
        assert_eq!(ErrorCategory::User.to_string(), "user");
        assert!(ErrorCategory::Configuration.hint().contains("WALINK_"));
    }
}
