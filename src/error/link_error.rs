//! Unified error type for the connection lifecycle.
//!
//! `LinkError` is what every controller command and backend call returns.
//! Command-misuse variants never mutate channel state; transport variants
//! carry the underlying network or stream error.

use std::time::Duration;

use thiserror::Error;

use super::category::ErrorCategory;
use super::network::NetworkError;
use super::stream::StreamError;
use crate::domain::{ChannelId, CommandKind, LinkStatus};

/// Unified error type for `walink`.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum LinkError {
    /// The channel was never registered with the controller.
    #[error("channel '{0}' is not registered")]
    UnknownChannel(ChannelId),

    /// `connect` was issued while the channel is already connected.
    #[error("channel '{0}' is already connected")]
    AlreadyConnected(ChannelId),

    /// An operation that needs a live session was issued without one.
    #[error("channel '{0}' is not connected")]
    NotConnected(ChannelId),

    /// Another command is still awaiting the backend for this channel.
    #[error("channel '{channel}' is busy: {command} is still in flight")]
    Busy {
        channel: ChannelId,
        command: CommandKind,
    },

    /// The command is not valid from the channel's current status.
    #[error("cannot {action} while channel is {status}")]
    InvalidState {
        status: LinkStatus,
        action: &'static str,
    },

    /// The backend did not acknowledge the command in time.
    #[error("{command} timed out after {}s", .after.as_secs())]
    Timeout {
        command: CommandKind,
        after: Duration,
    },

    /// Network failure talking to the backend.
    #[error(transparent)]
    Network(#[from] NetworkError),

    /// Push-channel failure.
    #[error(transparent)]
    Stream(#[from] StreamError),

    /// The backend processed the request and reported a failure.
    #[error("backend error: {message}")]
    Backend { message: String },

    /// Invalid configuration value.
    #[error("configuration error: {0}")]
    Config(String),
}

impl LinkError {
    pub fn invalid_state(status: LinkStatus, action: &'static str) -> Self {
        LinkError::InvalidState { status, action }
    }

    pub fn busy(channel: &ChannelId, command: CommandKind) -> Self {
        LinkError::Busy {
            channel: channel.clone(),
            command,
        }
    }

    /// Get the category of this error.
    pub fn category(&self) -> ErrorCategory {
        match self {
            LinkError::UnknownChannel(_) => ErrorCategory::Client,
            LinkError::AlreadyConnected(_)
            | LinkError::NotConnected(_)
            | LinkError::Busy { .. }
            | LinkError::InvalidState { .. } => ErrorCategory::User,
            LinkError::Timeout { .. } => ErrorCategory::Network,
            LinkError::Network(NetworkError::HttpStatus { status, .. }) if *status >= 500 => {
                ErrorCategory::Server
            }
            LinkError::Network(NetworkError::InvalidResponse { .. }) => ErrorCategory::Client,
            LinkError::Network(_) => ErrorCategory::Network,
            LinkError::Stream(StreamError::ParseError { .. })
            | LinkError::Stream(StreamError::InvalidJson { .. }) => ErrorCategory::Client,
            LinkError::Stream(_) => ErrorCategory::Network,
            LinkError::Backend { .. } => ErrorCategory::Server,
            LinkError::Config(_) => ErrorCategory::Configuration,
        }
    }

    /// Check if this error is retryable.
    pub fn is_retryable(&self) -> bool {
        match self {
            LinkError::Network(err) => err.is_retryable(),
            LinkError::Stream(err) => err.should_reconnect(),
            LinkError::Timeout { .. } | LinkError::Backend { .. } => true,
            _ => false,
        }
    }

    /// True for errors caused by issuing a command at the wrong time.
    ///
    /// These are rejected before any backend call and leave state untouched.
    pub fn is_command_misuse(&self) -> bool {
        matches!(
            self,
            LinkError::AlreadyConnected(_)
                | LinkError::NotConnected(_)
                | LinkError::Busy { .. }
                | LinkError::InvalidState { .. }
        )
    }

    /// Get a user-friendly error message.
    pub fn user_message(&self) -> String {
        match self {
            LinkError::UnknownChannel(channel) => {
                format!("Channel '{}' is not configured.", channel)
            }
            LinkError::AlreadyConnected(_) => "This number is already connected.".to_string(),
            LinkError::NotConnected(_) => {
                "Connect this number before sending messages.".to_string()
            }
            LinkError::Busy { command, .. } => {
                format!("Please wait, {} is still in progress.", command)
            }
            LinkError::InvalidState { status, action } => {
                format!("Cannot {} while the channel is {}.", action, status)
            }
            LinkError::Timeout { command, .. } => {
                format!("The messaging service did not answer the {} request in time.", command)
            }
            LinkError::Network(err) => err.user_message(),
            LinkError::Stream(err) => err.user_message(),
            LinkError::Backend { message } => format!("The messaging service reported: {}", message),
            LinkError::Config(message) => format!("Configuration problem: {}", message),
        }
    }

    /// Get a short error code for logging.
    pub fn error_code(&self) -> &'static str {
        match self {
            LinkError::UnknownChannel(_) => "E_LINK_UNKNOWN_CHANNEL",
            LinkError::AlreadyConnected(_) => "E_LINK_ALREADY_CONNECTED",
            LinkError::NotConnected(_) => "E_LINK_NOT_CONNECTED",
            LinkError::Busy { .. } => "E_LINK_BUSY",
            LinkError::InvalidState { .. } => "E_LINK_INVALID_STATE",
            LinkError::Timeout { .. } => "E_LINK_TIMEOUT",
            LinkError::Network(err) => err.error_code(),
            LinkError::Stream(err) => err.error_code(),
            LinkError::Backend { .. } => "E_LINK_BACKEND",
            LinkError::Config(_) => "E_LINK_CONFIG",
        }
    }
}

impl From<serde_json::Error> for LinkError {
    fn from(err: serde_json::Error) -> Self {
        LinkError::Network(NetworkError::InvalidResponse {
            message: err.to_string(),
        })
    }
}
