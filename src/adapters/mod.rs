//! [`HttpClient`](crate::traits::HttpClient) and
//! [`LinkBackend`](crate::backend::LinkBackend) implementations.
//!
//! [`ReqwestHttpClient`] is what the binary runs on; [`mock`] holds the
//! scripted doubles the tests drive the lifecycle with.

pub mod mock;
pub mod reqwest_http;

pub use mock::{MockBackend, MockHttpClient};
pub use reqwest_http::ReqwestHttpClient;
