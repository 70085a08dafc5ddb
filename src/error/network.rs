//! Failures talking to the messaging backend's REST endpoints.

use std::fmt;

use crate::traits::{HttpError, Response};

#[derive(Debug, Clone, PartialEq)]
pub enum NetworkError {
    ConnectionFailed { url: String, message: String },
    Timeout { operation: String },
    /// The backend answered with a non-2xx status.
    HttpStatus { status: u16, message: String },
    /// HTTP 429. `retry_after_secs` comes from the `Retry-After` header.
    RateLimited { retry_after_secs: Option<u64> },
    /// A 2xx body that did not decode.
    InvalidResponse { message: String },
    Cancelled,
    Other { message: String },
}

impl NetworkError {
    /// Map a transport failure for the request to `url`.
    pub fn from_http(err: HttpError, url: &str) -> Self {
        match err {
            HttpError::ConnectionFailed(message) => NetworkError::ConnectionFailed {
                url: url.to_string(),
                message,
            },
            HttpError::Timeout(_) => NetworkError::Timeout {
                operation: url.to_string(),
            },
            HttpError::ServerError { status: 429, .. } => NetworkError::RateLimited {
                retry_after_secs: None,
            },
            HttpError::ServerError { status, message } => NetworkError::HttpStatus { status, message },
            HttpError::Cancelled => NetworkError::Cancelled,
            HttpError::Io(message) | HttpError::InvalidUrl(message) | HttpError::Other(message) => {
                NetworkError::Other { message }
            }
        }
    }

    /// Map a buffered non-2xx response.
    pub fn refused(response: &Response) -> Self {
        if response.status == 429 {
            return NetworkError::RateLimited {
                retry_after_secs: response
                    .header("retry-after")
                    .and_then(|value| value.trim().parse().ok()),
            };
        }
        NetworkError::HttpStatus {
            status: response.status,
            message: response.text().unwrap_or_default(),
        }
    }

    pub fn is_retryable(&self) -> bool {
        match self {
            NetworkError::HttpStatus { status, .. } => matches!(*status, 408 | 429 | 500..=599),
            NetworkError::ConnectionFailed { .. }
            | NetworkError::Timeout { .. }
            | NetworkError::RateLimited { .. } => true,
            NetworkError::InvalidResponse { .. }
            | NetworkError::Cancelled
            | NetworkError::Other { .. } => false,
        }
    }

    pub fn user_message(&self) -> String {
        match self {
            NetworkError::ConnectionFailed { .. } => "The messaging service is unreachable.".into(),
            NetworkError::Timeout { .. } => "The messaging service took too long to answer.".into(),
            NetworkError::HttpStatus { status: 401 | 403, .. } => {
                "The messaging service refused the request.".into()
            }
            NetworkError::HttpStatus { status: 404, .. } => {
                "The messaging service does not know this channel.".into()
            }
            NetworkError::HttpStatus { status, .. } if *status >= 500 => {
                format!("The messaging service failed (HTTP {}).", status)
            }
            NetworkError::HttpStatus { status, .. } => {
                format!("The messaging service rejected the request (HTTP {}).", status)
            }
            NetworkError::RateLimited {
                retry_after_secs: Some(secs),
            } => format!("Too many requests; wait {}s.", secs),
            NetworkError::RateLimited { retry_after_secs: None } => {
                "Too many requests; wait a moment.".into()
            }
            NetworkError::InvalidResponse { .. } => {
                "The messaging service sent a response this version cannot read.".into()
            }
            NetworkError::Cancelled => "The request was cancelled.".into(),
            NetworkError::Other { message } => format!("Network problem: {}", message),
        }
    }

    pub fn error_code(&self) -> &'static str {
        match self {
            NetworkError::ConnectionFailed { .. } => "E_NET_CONN",
            NetworkError::Timeout { .. } => "E_NET_TIMEOUT",
            NetworkError::HttpStatus { .. } => "E_NET_HTTP",
            NetworkError::RateLimited { .. } => "E_NET_RATE",
            NetworkError::InvalidResponse { .. } => "E_NET_INVALID",
            NetworkError::Cancelled => "E_NET_CANCEL",
            NetworkError::Other { .. } => "E_NET_OTHER",
        }
    }
}

impl fmt::Display for NetworkError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NetworkError::ConnectionFailed { url, message } => {
                write!(f, "cannot reach {}: {}", url, message)
            }
            NetworkError::Timeout { operation } => write!(f, "{} timed out", operation),
            NetworkError::HttpStatus { status, message } if message.is_empty() => {
                write!(f, "HTTP {}", status)
            }
            NetworkError::HttpStatus { status, message } => write!(f, "HTTP {}: {}", status, message),
            NetworkError::RateLimited {
                retry_after_secs: Some(secs),
            } => write!(f, "rate limited for {}s", secs),
            NetworkError::RateLimited { retry_after_secs: None } => f.write_str("rate limited"),
            NetworkError::InvalidResponse { message } => write!(f, "undecodable response: {}", message),
            NetworkError::Cancelled => f.write_str("cancelled"),
            NetworkError::Other { message } => f.write_str(message),
        }
    }
}

impl std::error::Error for NetworkError {}
