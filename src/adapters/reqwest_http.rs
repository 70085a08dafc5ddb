//! [`HttpClient`] over reqwest.
//!
//! The client has no overall request timeout: the push subscription is a
//! GET that stays open indefinitely. Command deadlines belong to the
//! lifecycle controller and poll deadlines to the status poller.

use std::time::Duration;

use async_trait::async_trait;
use futures_util::{StreamExt, TryStreamExt};
use reqwest::header::{HeaderMap, ACCEPT, CACHE_CONTROL};
use reqwest::RequestBuilder;

use crate::traits::{ByteStream, Headers, HttpClient, HttpError, Response};

#[derive(Debug, Clone, Default)]
pub struct ReqwestHttpClient {
    client: reqwest::Client,
}

impl ReqwestHttpClient {
    pub fn new() -> Self {
        Self::default()
    }

    /// Give up on establishing a connection after `timeout`.
    pub fn with_connect_timeout(timeout: Duration) -> Result<Self, HttpError> {
        reqwest::Client::builder()
            .connect_timeout(timeout)
            .build()
            .map(|client| Self { client })
            .map_err(classify)
    }

    async fn send(&self, request: RequestBuilder, headers: &Headers) -> Result<reqwest::Response, HttpError> {
        headers
            .iter()
            .fold(request, |request, (name, value)| request.header(name, value))
            .send()
            .await
            .map_err(classify)
    }
}

fn classify(err: reqwest::Error) -> HttpError {
    let detail = err.to_string();
    if err.is_timeout() {
        HttpError::Timeout(detail)
    } else if err.is_connect() {
        HttpError::ConnectionFailed(detail)
    } else if err.is_builder() {
        HttpError::InvalidUrl(detail)
    } else if err.is_body() || err.is_decode() {
        HttpError::Io(detail)
    } else {
        HttpError::Other(detail)
    }
}

fn header_pairs(headers: &HeaderMap) -> Headers {
    headers
        .iter()
        .filter_map(|(name, value)| Some((name.to_string(), value.to_str().ok()?.to_string())))
        .collect()
}

async fn buffer(response: reqwest::Response) -> Result<Response, HttpError> {
    let status = response.status().as_u16();
    let headers = header_pairs(response.headers());
    let body = response.bytes().await.map_err(classify)?;
    Ok(Response::with_headers(status, headers, body))
}

#[async_trait]
impl HttpClient for ReqwestHttpClient {
    async fn get(&self, url: &str, headers: &Headers) -> Result<Response, HttpError> {
        buffer(self.send(self.client.get(url), headers).await?).await
    }

    async fn post(&self, url: &str, body: &str, headers: &Headers) -> Result<Response, HttpError> {
        let request = self.client.post(url).body(body.to_string());
        buffer(self.send(request, headers).await?).await
    }

    async fn get_stream(&self, url: &str, headers: &Headers) -> Result<ByteStream, HttpError> {
        let request = self
            .client
            .get(url)
            .header(ACCEPT, "text/event-stream")
            .header(CACHE_CONTROL, "no-cache");
        let response = self.send(request, headers).await?;

        let status = response.status();
        if !status.is_success() {
            let message = response.text().await.unwrap_or_default();
            return Err(HttpError::ServerError {
                status: status.as_u16(),
                message,
            });
        }

        Ok(response.bytes_stream().map_err(classify).boxed())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[test]
    fn keeps_readable_headers() {
        let mut map = HeaderMap::new();
        map.insert(reqwest::header::CONTENT_TYPE, "application/json".parse().unwrap());

        let headers = header_pairs(&map);
        assert_eq!(headers.get("content-type").map(String::as_str), Some("application/json"));
    }

    #[tokio::test]
    async fn rejects_malformed_url() {
        let result = ReqwestHttpClient::new().get("not-a-valid-url", &Headers::new()).await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn unreachable_backend_is_a_transport_failure() {
        let result = ReqwestHttpClient::new()
            .get("http://127.0.0.1:59999/status", &Headers::new())
            .await;
        assert!(matches!(
            result,
            Err(HttpError::ConnectionFailed(_)) | Err(HttpError::Other(_))
        ));
    }

    #[tokio::test]
    async fn post_returns_status_and_body() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/channels/ch1/connect"))
            .respond_with(ResponseTemplate::new(202).set_body_string(r#"{"status":"qr_pending"}"#))
            .mount(&server)
            .await;

        let response = ReqwestHttpClient::new()
            .post(&format!("{}/channels/ch1/connect", server.uri()), "{}", &Headers::new())
            .await
            .unwrap();

        assert_eq!(response.status, 202);
        assert_eq!(response.text().unwrap(), r#"{"status":"qr_pending"}"#);
    }

    #[tokio::test]
    async fn subscription_asks_for_event_stream() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/events"))
            .and(header("accept", "text/event-stream"))
            .respond_with(
                ResponseTemplate::new(200)
                    .insert_header("content-type", "text/event-stream")
                    .set_body_string("event: ping\n\n"),
            )
            .mount(&server)
            .await;

        let mut body = ReqwestHttpClient::new()
            .get_stream(&format!("{}/events", server.uri()), &Headers::new())
            .await
            .unwrap();
        let mut received = Vec::new();
        while let Some(chunk) = body.next().await {
            received.extend_from_slice(&chunk.unwrap());
        }
        assert_eq!(received, b"event: ping\n\n");
    }

    #[tokio::test]
    async fn refused_subscription_reports_status() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/events"))
            .respond_with(ResponseTemplate::new(503).set_body_string("maintenance"))
            .mount(&server)
            .await;

        let result = ReqwestHttpClient::new()
            .get_stream(&format!("{}/events", server.uri()), &Headers::new())
            .await;

        assert_eq!(
            result.err(),
            Some(HttpError::ServerError {
                status: 503,
                message: "maintenance".to_string()
            })
        );
    }
}
