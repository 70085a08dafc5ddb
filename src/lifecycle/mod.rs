//! Lifecycle controller.
//!
//! Owns every transition of a channel's [`ConnectionState`]: user commands,
//! transport events and timers all funnel through one [`LifecycleController`]
//! that commits to the session store.
//!
//! - `machine` - pure transition rules
//! - `controller` - command execution, event delivery, timers
//! - `feed` - message broadcast for feed bindings
//! - `policy` - timeouts
//!
//! [`ConnectionState`]: crate::domain::ConnectionState

mod controller;
mod feed;
mod machine;
mod policy;

pub use controller::{DeliveryOutcome, LifecycleController};
pub use feed::{FeedReceiver, FeedUpdate, FEED_CAPACITY};
pub use policy::LifecyclePolicy;
