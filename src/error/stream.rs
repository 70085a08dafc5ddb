//! Push-channel error types.
//!
//! Errors raised while consuming the backend's server-sent event stream.
//! Most of them are recovered locally by the transport adapter through
//! reconnection and never reach a channel's state.

use std::fmt;

/// Stream-specific error variants.
#[derive(Debug, Clone, PartialEq)]
pub enum StreamError {
    /// Stream connection was lost unexpectedly.
    ConnectionLost { message: String },

    /// Failed to parse an SSE event.
    ParseError { event_type: String, message: String },

    /// Invalid JSON in stream data.
    InvalidJson { event_type: String, message: String },

    /// Stream was closed by the server.
    ServerClosed { reason: Option<String> },

    /// The stream could not be opened at all.
    SubscribeFailed { message: String },
}

impl StreamError {
    /// Check if the stream should be reconnected after this error.
    pub fn should_reconnect(&self) -> bool {
        matches!(
            self,
            StreamError::ConnectionLost { .. }
                | StreamError::ServerClosed { .. }
                | StreamError::SubscribeFailed { .. }
        )
    }

    /// Get a user-friendly error message.
    pub fn user_message(&self) -> String {
        match self {
            StreamError::ConnectionLost { .. } => {
                "Live updates were interrupted. Reconnecting...".to_string()
            }
            StreamError::ParseError { event_type, .. } => {
                format!("Failed to process a live update ({}).", event_type)
            }
            StreamError::InvalidJson { .. } => {
                "Received invalid live update data from the messaging service.".to_string()
            }
            StreamError::ServerClosed { reason } => match reason {
                Some(r) => format!("The messaging service closed live updates: {}", r),
                None => "The messaging service closed live updates.".to_string(),
            },
            StreamError::SubscribeFailed { .. } => {
                "Live updates are unavailable; falling back to periodic refresh.".to_string()
            }
        }
    }

    /// Get a short error code for logging.
    pub fn error_code(&self) -> &'static str {
        match self {
            StreamError::ConnectionLost { .. } => "E_STREAM_LOST",
            StreamError::ParseError { .. } => "E_STREAM_PARSE",
            StreamError::InvalidJson { .. } => "E_STREAM_JSON",
            StreamError::ServerClosed { .. } => "E_STREAM_CLOSED",
            StreamError::SubscribeFailed { .. } => "E_STREAM_SUBSCRIBE",
        }
    }
}

impl fmt::Display for StreamError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StreamError::ConnectionLost { message } => {
                write!(f, "Stream connection lost: {}", message)
            }
            StreamError::ParseError {
                event_type,
                message,
            } => write!(f, "Failed to parse '{}' event: {}", event_type, message),
            StreamError::InvalidJson {
                event_type,
                message,
            } => write!(f, "Invalid JSON in '{}' event: {}", event_type, message),
            StreamError::ServerClosed { reason } => match reason {
                Some(r) => write!(f, "Server closed stream: {}", r),
                None => write!(f, "Server closed stream"),
            },
            StreamError::SubscribeFailed { message } => {
                write!(f, "Failed to open event stream: {}", message)
            }
        }
    }
}

impl std::error::Error for StreamError {}

impl From<crate::sse::SseParseError> for StreamError {
    fn from(err: crate::sse::SseParseError) -> Self {
        match err {
            crate::sse::SseParseError::UnknownEventType(event_type) => StreamError::ParseError {
                message: format!("unknown event type '{}'", event_type),
                event_type,
            },
            crate::sse::SseParseError::InvalidJson { event_type, source } => {
                StreamError::InvalidJson {
                    event_type,
                    message: source,
                }
            }
            crate::sse::SseParseError::MissingData { event_type } => StreamError::ParseError {
                event_type,
                message: "missing data".to_string(),
            },
        }
    }
}
