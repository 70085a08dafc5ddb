//! Scripted [`HttpClient`] for backend client tests.
//!
//! Routes are looked up in three tiers: one-shot answers queued for an
//! exact URL, then fixed answers by exact URL or longest prefix, then the
//! fallback. Every request is recorded.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use bytes::Bytes;
use futures::{stream, StreamExt};

use crate::store::lock;
use crate::traits::{ByteStream, Headers, HttpClient, HttpError, Response};

#[derive(Debug, Clone)]
pub struct RecordedRequest {
    pub method: String,
    pub url: String,
    pub headers: Headers,
    pub body: Option<String>,
}

#[derive(Debug, Clone)]
pub enum MockResponse {
    Success(Response),
    Error(HttpError),
    /// Body chunks, then end of stream.
    Stream(Vec<Bytes>),
    /// Body chunks, then the stream hangs like an idle push channel.
    OpenStream(Vec<Bytes>),
    /// Body chunks, then the connection breaks with the given error.
    BrokenStream(Vec<Bytes>, HttpError),
}

impl MockResponse {
    pub fn json(status: u16, value: serde_json::Value) -> Self {
        MockResponse::Success(Response::json_body(status, &value))
    }

    fn into_body(self) -> Result<ByteStream, HttpError> {
        let chunks =
            |chunks: Vec<Bytes>| stream::iter(chunks.into_iter().map(Ok::<Bytes, HttpError>));
        match self {
            MockResponse::Stream(body) => Ok(chunks(body).boxed()),
            MockResponse::OpenStream(body) => Ok(chunks(body).chain(stream::pending()).boxed()),
            MockResponse::BrokenStream(body, err) => {
                Ok(chunks(body).chain(stream::once(async move { Err(err) })).boxed())
            }
            MockResponse::Error(err) => Err(err),
            MockResponse::Success(_) => Err(HttpError::Other(
                "mock: buffered response registered for a stream request".to_string(),
            )),
        }
    }

    fn into_response(self) -> Result<Response, HttpError> {
        match self {
            MockResponse::Success(response) => Ok(response),
            MockResponse::Error(err) => Err(err),
            _ => Err(HttpError::Other(
                "mock: stream registered for a buffered request".to_string(),
            )),
        }
    }
}

#[derive(Debug, Default)]
struct Routes {
    queued: HashMap<String, VecDeque<MockResponse>>,
    fixed: HashMap<String, MockResponse>,
    fallback: Option<MockResponse>,
    requests: Vec<RecordedRequest>,
}

impl Routes {
    fn resolve(&mut self, url: &str) -> Result<MockResponse, HttpError> {
        if let Some(next) = self.queued.get_mut(url).and_then(VecDeque::pop_front) {
            return Ok(next);
        }
        if let Some(exact) = self.fixed.get(url) {
            return Ok(exact.clone());
        }
        // Longest prefix so "/channels/ch1" never answers for "/channels/ch10".
        self.fixed
            .iter()
            .filter(|(prefix, _)| url.starts_with(prefix.as_str()))
            .max_by_key(|(prefix, _)| prefix.len())
            .map(|(_, response)| response.clone())
            .or_else(|| self.fallback.clone())
            .ok_or_else(|| HttpError::Other(format!("mock: nothing registered for {}", url)))
    }
}

#[derive(Debug, Clone, Default)]
pub struct MockHttpClient {
    routes: Arc<Mutex<Routes>>,
}

impl MockHttpClient {
    pub fn new() -> Self {
        Self::default()
    }

    /// Answer every request to `url`, or to URLs starting with it.
    pub fn set_response(&self, url: &str, response: MockResponse) {
        lock(&self.routes).fixed.insert(url.to_string(), response);
    }

    /// Answer the next request to exactly `url` once.
    pub fn push_response(&self, url: &str, response: MockResponse) {
        lock(&self.routes)
            .queued
            .entry(url.to_string())
            .or_default()
            .push_back(response);
    }

    pub fn set_default_response(&self, response: MockResponse) {
        lock(&self.routes).fallback = Some(response);
    }

    pub fn get_requests(&self) -> Vec<RecordedRequest> {
        lock(&self.routes).requests.clone()
    }

    pub fn count_requests(&self, method: &str, prefix: &str) -> usize {
        lock(&self.routes)
            .requests
            .iter()
            .filter(|r| r.method == method && r.url.starts_with(prefix))
            .count()
    }

    pub fn clear_requests(&self) {
        lock(&self.routes).requests.clear();
    }

    fn answer(
        &self,
        method: &str,
        url: &str,
        headers: &Headers,
        body: Option<&str>,
    ) -> Result<MockResponse, HttpError> {
        let mut routes = lock(&self.routes);
        routes.requests.push(RecordedRequest {
            method: method.to_string(),
            url: url.to_string(),
            headers: headers.clone(),
            body: body.map(str::to_string),
        });
        routes.resolve(url)
    }
}

#[async_trait]
impl HttpClient for MockHttpClient {
    async fn get(&self, url: &str, headers: &Headers) -> Result<Response, HttpError> {
        self.answer("GET", url, headers, None)?.into_response()
    }

    async fn post(&self, url: &str, body: &str, headers: &Headers) -> Result<Response, HttpError> {
        self.answer("POST", url, headers, Some(body))?.into_response()
    }

    async fn get_stream(&self, url: &str, headers: &Headers) -> Result<ByteStream, HttpError> {
        self.answer("GET", url, headers, None)?.into_body()
    }
}
