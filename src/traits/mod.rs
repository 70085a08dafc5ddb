//! Seams the backend client is written against.

pub mod http;

pub use http::{ByteStream, Headers, HttpClient, HttpError, Response};
