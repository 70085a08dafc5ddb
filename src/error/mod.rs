//! Error handling for the connection lifecycle.
//!
//! Every command returns [`LinkResult`]. [`LinkError`] wraps the two
//! lower-level families, [`NetworkError`] for backend calls and
//! [`StreamError`] for the push channel, and [`ErrorCategory`] sorts them
//! by who can act on them: the transport retries `Network` and `Server`,
//! `User` errors go back to the binding that issued the command.
//!
//! State-machine failures (expired pairing, rejected scan) are not errors
//! here: they become part of the channel's `ConnectionState`.

mod category;
mod link_error;
mod network;
mod result;
mod stream;

pub use category::ErrorCategory;
pub use link_error::LinkError;
pub use network::NetworkError;
pub use result::LinkResult;
pub use stream::StreamError;
