//! HTTP implementation of [`LinkBackend`].

use std::collections::HashMap;

use async_trait::async_trait;
use futures::stream::{self, StreamExt};
use tracing::debug;

use super::types::{ConnectResponse, SendRequest, SendResponse, StatusSnapshot};
use super::{EventStream, LinkBackend};
use crate::domain::ChannelId;
use crate::error::{LinkError, LinkResult, NetworkError, StreamError};
use crate::sse::{SseFrame, SseParser};
use crate::traits::{Headers, HttpClient, Response};

/// Talks to the backend's REST endpoints and SSE feed.
pub struct HttpBackend<C: HttpClient> {
    client: C,
    base_url: String,
    headers: Headers,
}

impl<C: HttpClient> HttpBackend<C> {
    pub fn new(client: C, base_url: impl Into<String>) -> Self {
        let mut headers = HashMap::new();
        headers.insert("Content-Type".to_string(), "application/json".to_string());
        Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            headers,
        }
    }

    /// Add a header sent with every request.
    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(name.into(), value.into());
        self
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn channel_url(&self, channel: &ChannelId, action: &str) -> String {
        format!("{}/channels/{}/{}", self.base_url, channel, action)
    }

    async fn post_json<T: serde::de::DeserializeOwned>(&self, url: &str, body: &str) -> LinkResult<T> {
        let response = self
            .client
            .post(url, body, &self.headers)
            .await
            .map_err(|e| NetworkError::from_http(e, url))?;
        decode(url, response)
    }

    async fn get_json<T: serde::de::DeserializeOwned>(&self, url: &str) -> LinkResult<T> {
        let response = self
            .client
            .get(url, &self.headers)
            .await
            .map_err(|e| NetworkError::from_http(e, url))?;
        decode(url, response)
    }
}

fn check_status(url: &str, response: &Response) -> LinkResult<()> {
    if response.is_success() {
        return Ok(());
    }
    debug!(status = response.status, "{} refused", url);
    Err(NetworkError::refused(response).into())
}

fn decode<T: serde::de::DeserializeOwned>(url: &str, response: Response) -> LinkResult<T> {
    check_status(url, &response)?;
    Ok(response.json()?)
}

#[async_trait]
impl<C: HttpClient> LinkBackend for HttpBackend<C> {
    async fn connect(&self, channel: &ChannelId) -> LinkResult<ConnectResponse> {
        let url = self.channel_url(channel, "connect");
        debug!(%channel, "POST {}", url);
        self.post_json(&url, "{}").await
    }

    async fn disconnect(&self, channel: &ChannelId) -> LinkResult<()> {
        let url = self.channel_url(channel, "disconnect");
        debug!(%channel, "POST {}", url);
        let response = self
            .client
            .post(&url, "{}", &self.headers)
            .await
            .map_err(|e| NetworkError::from_http(e, &url))?;
        check_status(&url, &response)
    }

    async fn status(&self, channel: &ChannelId) -> LinkResult<StatusSnapshot> {
        let url = self.channel_url(channel, "status");
        self.get_json(&url).await
    }

    async fn send(&self, channel: &ChannelId, request: &SendRequest) -> LinkResult<SendResponse> {
        let url = self.channel_url(channel, "send");
        let body = serde_json::to_string(request)?;
        debug!(%channel, client_ref = %request.client_ref, "POST {}", url);
        self.post_json(&url, &body).await
    }

    async fn subscribe(&self, operator_id: &str) -> LinkResult<EventStream> {
        let url = format!("{}/events?operator={}", self.base_url, operator_id);
        let bytes_stream = self
            .client
            .get_stream(&url, &self.headers)
            .await
            .map_err(|e| StreamError::SubscribeFailed {
                message: e.to_string(),
            })?;

        // Lines are split on raw bytes so a multi-byte character spanning two
        // chunks is decoded only once the whole line has arrived.
        let event_stream = stream::unfold(
            (bytes_stream, SseParser::new(), Vec::<u8>::new()),
            |(mut bytes_stream, mut parser, mut buffer)| async move {
                loop {
                    if let Some(newline_pos) = buffer.iter().position(|b| *b == b'\n') {
                        let raw: Vec<u8> = buffer.drain(..=newline_pos).collect();
                        let line = String::from_utf8_lossy(&raw[..newline_pos]);
                        let line = line.trim_end_matches('\r');

                        match parser.feed_line(line) {
                            Ok(Some(SseFrame::Event(envelope))) => {
                                return Some((Ok(envelope), (bytes_stream, parser, buffer)));
                            }
                            Ok(Some(SseFrame::Keepalive)) | Ok(None) => continue,
                            Err(e) => {
                                let err = LinkError::from(StreamError::from(e));
                                return Some((Err(err), (bytes_stream, parser, buffer)));
                            }
                        }
                    }

                    match bytes_stream.next().await {
                        Some(Ok(chunk)) => buffer.extend_from_slice(&chunk),
                        Some(Err(e)) => {
                            let err = LinkError::from(StreamError::ConnectionLost {
                                message: e.to_string(),
                            });
                            return Some((Err(err), (bytes_stream, parser, buffer)));
                        }
                        None => {
                            // Flush a final event that was not followed by a blank line.
                            if !buffer.is_empty() {
                                let line = String::from_utf8_lossy(&buffer).trim_end_matches('\r').to_string();
                                buffer.clear();
                                if let Ok(Some(SseFrame::Event(envelope))) = parser.feed_line(&line) {
                                    return Some((Ok(envelope), (bytes_stream, parser, buffer)));
                                }
                            }
                            if let Ok(Some(SseFrame::Event(envelope))) = parser.feed_line("") {
                                return Some((Ok(envelope), (bytes_stream, parser, buffer)));
                            }
                            return None;
                        }
                    }
                }
            },
        );

        Ok(Box::pin(event_stream))
    }
}
