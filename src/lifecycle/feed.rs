//! Message feed broadcast.
//!
//! The controller publishes message traffic here; the feed binding keeps
//! the transient list. Counters live in the session store, not here.

use tokio::sync::broadcast;

use crate::domain::{ChannelId, DeliveryStatus, Message};

/// Default broadcast capacity. Lagging receivers skip ahead.
pub const FEED_CAPACITY: usize = 256;

/// One change to a channel's message list.
#[derive(Debug, Clone, PartialEq)]
pub enum FeedUpdate {
    Appended {
        channel: ChannelId,
        message: Message,
    },
    DeliveryUpdated {
        channel: ChannelId,
        message_id: String,
        status: DeliveryStatus,
    },
}

impl FeedUpdate {
    pub fn channel(&self) -> &ChannelId {
        match self {
            FeedUpdate::Appended { channel, .. } | FeedUpdate::DeliveryUpdated { channel, .. } => {
                channel
            }
        }
    }
}

pub type FeedReceiver = broadcast::Receiver<FeedUpdate>;

/// Sender half shared by the controller.
#[derive(Debug, Clone)]
pub(crate) struct Feed {
    tx: broadcast::Sender<FeedUpdate>,
}

impl Feed {
    pub(crate) fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    pub(crate) fn subscribe(&self) -> FeedReceiver {
        self.tx.subscribe()
    }

    /// Best-effort; nothing happens when nobody listens.
    pub(crate) fn emit(&self, update: FeedUpdate) {
        let _ = self.tx.send(update);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::Direction;

    #[tokio::test]
    async fn emit_reaches_subscribers() {
        let feed = Feed::new(4);
        let mut rx = feed.subscribe();
        let message = Message::inbound("m1", "+200", "+100", "hi");
        feed.emit(FeedUpdate::Appended {
            channel: ChannelId::from("ch1"),
            message: message.clone(),
        });
        let update = rx.recv().await.unwrap();
        assert_eq!(update.channel(), &ChannelId::from("ch1"));
        match update {
            FeedUpdate::Appended { message: got, .. } => {
                assert_eq!(got.direction, Direction::Inbound);
                assert_eq!(got, message);
            }
            other => panic!("unexpected update: {other:?}"),
        }
    }

    #[test]
    fn emit_without_subscribers_is_fine() {
        Feed::new(0).emit(FeedUpdate::DeliveryUpdated {
            channel: ChannelId::from("ch1"),
            message_id: "m1".into(),
            status: DeliveryStatus::Read,
        });
    }
}
