//! The HTTP seam under the backend client.
//!
//! Backend calls go through [`HttpClient`] so that command and polling
//! paths run against [`crate::adapters::mock::MockHttpClient`] in tests and
//! against reqwest in the binary.

use std::collections::HashMap;
use std::fmt;
use std::pin::Pin;

use async_trait::async_trait;
use bytes::Bytes;
use futures::Stream;
use serde::de::DeserializeOwned;

pub type Headers = HashMap<String, String>;

/// Chunks of an open response body, as the event stream reads them.
pub type ByteStream = Pin<Box<dyn Stream<Item = Result<Bytes, HttpError>> + Send>>;

/// A fully buffered response.
#[derive(Debug, Clone)]
pub struct Response {
    pub status: u16,
    pub headers: Headers,
    pub body: Bytes,
}

impl Response {
    pub fn new(status: u16, body: Bytes) -> Self {
        Self::with_headers(status, Headers::new(), body)
    }

    pub fn with_headers(status: u16, headers: Headers, body: Bytes) -> Self {
        Self {
            status,
            headers,
            body,
        }
    }

    pub fn json_body(status: u16, value: &serde_json::Value) -> Self {
        let mut headers = Headers::new();
        headers.insert("content-type".to_string(), "application/json".to_string());
        Self::with_headers(status, headers, Bytes::from(value.to_string()))
    }

    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    /// Case-insensitive header lookup.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(key, _)| key.eq_ignore_ascii_case(name))
            .map(|(_, value)| value.as_str())
    }

    pub fn text(&self) -> Result<String, std::string::FromUtf8Error> {
        String::from_utf8(self.body.to_vec())
    }

    pub fn json<T: DeserializeOwned>(&self) -> Result<T, serde_json::Error> {
        serde_json::from_slice(&self.body)
    }
}

/// Failure below the backend protocol: the request never produced a usable
/// response, or the server refused it with a non-2xx status.
#[derive(Debug, Clone, PartialEq)]
pub enum HttpError {
    ConnectionFailed(String),
    Timeout(String),
    ServerError { status: u16, message: String },
    Cancelled,
    /// The connection broke while a body was being read.
    Io(String),
    InvalidUrl(String),
    Other(String),
}

impl HttpError {
    /// Status code for refusals, `None` for transport failures.
    pub fn status(&self) -> Option<u16> {
        match self {
            HttpError::ServerError { status, .. } => Some(*status),
            _ => None,
        }
    }
}

impl fmt::Display for HttpError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HttpError::ConnectionFailed(detail) => write!(f, "could not reach backend: {}", detail),
            HttpError::Timeout(detail) => write!(f, "backend did not answer in time: {}", detail),
            HttpError::ServerError { status, message } if message.is_empty() => {
                write!(f, "backend refused request with status {}", status)
            }
            HttpError::ServerError { status, message } => {
                write!(f, "backend refused request with status {}: {}", status, message)
            }
            HttpError::Cancelled => f.write_str("request cancelled"),
            HttpError::Io(detail) => write!(f, "response body interrupted: {}", detail),
            HttpError::InvalidUrl(detail) => write!(f, "bad backend url: {}", detail),
            HttpError::Other(detail) => f.write_str(detail),
        }
    }
}

impl std::error::Error for HttpError {}

#[async_trait]
pub trait HttpClient: Send + Sync {
    async fn get(&self, url: &str, headers: &Headers) -> Result<Response, HttpError>;

    async fn post(&self, url: &str, body: &str, headers: &Headers) -> Result<Response, HttpError>;

    /// Open `url` and hand back its body as it arrives.
    ///
    /// A non-2xx answer is reported as [`HttpError::ServerError`] before any
    /// of the body is read, so a refused subscription never looks like an
    /// empty stream.
    async fn get_stream(&self, url: &str, headers: &Headers) -> Result<ByteStream, HttpError>;
}
