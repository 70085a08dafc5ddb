//! Test doubles at the two seams: [`MockHttpClient`] under the HTTP backend
//! client, [`MockBackend`] under the controller and transport.

pub mod backend;
pub mod http;

pub use backend::{MockBackend, MockCall};
pub use http::{MockHttpClient, MockResponse, RecordedRequest};
