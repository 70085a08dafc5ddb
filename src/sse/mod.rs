//! Decoding of the backend's push stream.
//!
//! The stream is text/event-stream: `event:` and `data:` lines, a blank line
//! closing each frame, `:` comment lines used as keep-alives. Each completed
//! frame's JSON data decodes into an [`Envelope`] that names the channel
//! (and, when the backend knows it, the session) a [`LinkEvent`] belongs to.
//! Heartbeat frames decode to nothing.

mod events;
mod parser;
mod payloads;

pub use events::{Envelope, LinkEvent, SseFrame, SseLine, SseParseError};
pub use parser::{parse_sse_event, parse_sse_line, SseParser};
