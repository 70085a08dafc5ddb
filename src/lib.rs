//! walink - WhatsApp channel connection lifecycle
//!
//! Pairing, session tracking and reactive status for WhatsApp channels served
//! by a messaging backend:
//!
//! - [`lifecycle`] - the controller and its state machine
//! - [`transport`] - push subscription with polling fallback
//! - [`store`] - per-channel state and change subscriptions
//! - [`bindings`] - status badge, pairing panel, stats panel, message feed
//! - [`backend`] - the backend contract and its HTTP implementation

pub mod adapters;
pub mod backend;
pub mod bindings;
pub mod config;
pub mod domain;
pub mod error;
pub mod lifecycle;
pub mod logging;
pub mod sse;
pub mod store;
pub mod traits;
pub mod transport;
