//! Message feed.
//!
//! Keeps a bounded, transient list of a channel's messages fed by the
//! controller's broadcast, and sends test messages. Whether sending is
//! possible comes from the session store like every other binding.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use tokio::sync::broadcast::error::RecvError;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use super::{Bound, StateView};
use crate::domain::{ChannelId, ConnectionState, DeliveryStatus, Direction, LinkStatus, Message};
use crate::error::{LinkError, LinkResult};
use crate::lifecycle::{FeedReceiver, FeedUpdate, LifecycleController};
use crate::store::lock;

/// Messages kept per feed unless configured otherwise.
pub const DEFAULT_FEED_LIMIT: usize = 100;

/// Store-derived part of the feed view.
#[derive(Debug, Clone, PartialEq)]
pub struct FeedHeader {
    pub status: LinkStatus,
    pub can_send: bool,
}

impl StateView for FeedHeader {
    fn from_state(state: &ConnectionState) -> Self {
        Self {
            status: state.status(),
            can_send: state.is_connected() && !state.is_busy(),
        }
    }
}

/// Bounded message list, oldest first.
#[derive(Debug, Clone)]
pub struct FeedList {
    messages: VecDeque<Message>,
    limit: usize,
}

impl FeedList {
    pub fn new(limit: usize) -> Self {
        Self {
            messages: VecDeque::new(),
            limit: limit.max(1),
        }
    }

    pub fn messages(&self) -> Vec<Message> {
        self.messages.iter().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    pub fn get(&self, id: &str) -> Option<&Message> {
        self.messages.iter().find(|m| m.id == id)
    }

    /// Append a message unless one with the same id is already listed.
    pub fn push(&mut self, message: Message) -> bool {
        if self.get(&message.id).is_some() {
            return false;
        }
        self.messages.push_back(message);
        while self.messages.len() > self.limit {
            self.messages.pop_front();
        }
        true
    }

    /// Apply one broadcast update. Returns true when the list changed.
    pub fn apply(&mut self, update: FeedUpdate) -> bool {
        match update {
            FeedUpdate::Appended { message, .. } => self.push(message),
            FeedUpdate::DeliveryUpdated {
                message_id, status, ..
            } => self
                .messages
                .iter_mut()
                .find(|m| m.id == message_id)
                .map(|m| m.apply_delivery(status))
                .unwrap_or(false),
        }
    }

    pub fn render(&self) -> String {
        self.messages
            .iter()
            .map(|m| match m.direction {
                Direction::Inbound => format!("<- {}: {}", m.from, m.body),
                Direction::Outbound => {
                    format!("-> {}: {} [{}]", m.to, m.body, delivery_label(m.delivery))
                }
            })
            .collect::<Vec<_>>()
            .join("\n")
    }
}

fn delivery_label(status: DeliveryStatus) -> &'static str {
    match status {
        DeliveryStatus::Pending => "pending",
        DeliveryStatus::Sent => "sent",
        DeliveryStatus::Delivered => "delivered",
        DeliveryStatus::Read => "read",
        DeliveryStatus::Failed => "failed",
    }
}

pub struct MessageFeed {
    controller: LifecycleController,
    bound: Bound<FeedHeader>,
    list: Arc<Mutex<FeedList>>,
    task: JoinHandle<()>,
}

impl MessageFeed {
    /// Attach to `channel`. Must be called from within a tokio runtime.
    pub fn attach(controller: &LifecycleController, channel: &ChannelId) -> LinkResult<Self> {
        Self::with_limit(controller, channel, DEFAULT_FEED_LIMIT)
    }

    pub fn with_limit(
        controller: &LifecycleController,
        channel: &ChannelId,
        limit: usize,
    ) -> LinkResult<Self> {
        let bound = Bound::attach(controller, channel)?;
        let list = Arc::new(Mutex::new(FeedList::new(limit)));
        let task = tokio::spawn(follow_feed(
            controller.subscribe_feed(),
            channel.clone(),
            Arc::clone(&list),
        ));

        Ok(Self {
            controller: controller.clone(),
            bound,
            list,
            task,
        })
    }

    pub fn header(&self) -> FeedHeader {
        self.bound.view()
    }

    pub fn messages(&self) -> Vec<Message> {
        lock(&self.list).messages()
    }

    pub fn render(&self) -> String {
        lock(&self.list).render()
    }

    pub fn bound(&self) -> &Bound<FeedHeader> {
        &self.bound
    }

    /// Send a test message and list it right away.
    pub async fn send_test_message(&self, destination: &str, body: &str) -> LinkResult<Message> {
        self.bound.ensure_idle()?;
        let channel = self.bound.channel();
        if !self.bound.view().can_send {
            return Err(LinkError::NotConnected(channel.clone()));
        }
        let message = self
            .controller
            .send_test_message(channel, destination, body)
            .await?;
        lock(&self.list).push(message.clone());
        Ok(message)
    }
}

impl Drop for MessageFeed {
    fn drop(&mut self) {
        self.task.abort();
    }
}

async fn follow_feed(mut updates: FeedReceiver, channel: ChannelId, list: Arc<Mutex<FeedList>>) {
    loop {
        match updates.recv().await {
            Ok(update) if update.channel() == &channel => {
                lock(&list).apply(update);
            }
            Ok(_) => {}
            Err(RecvError::Lagged(skipped)) => {
                warn!(%channel, skipped, "message feed lagged, some updates were skipped");
            }
            Err(RecvError::Closed) => {
                debug!(%channel, "message feed closed");
                break;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::adapters::mock::MockBackend;
    use crate::domain::Identity;
    use crate::lifecycle::LifecyclePolicy;
    use crate::sse::{Envelope, LinkEvent};

    async fn connected() -> (LifecycleController, ChannelId) {
        let controller =
            LifecycleController::new(Arc::new(MockBackend::new()), LifecyclePolicy::default());
        let channel = controller.register("ch1").channel_id().clone();
        controller.connect(&channel).await.unwrap();
        controller.deliver(Envelope::new(
            "ch1",
            LinkEvent::Connected {
                identity: Identity::new("+100", "Demo"),
            },
        ));
        (controller, channel)
    }

    async fn settle() {
        tokio::time::sleep(Duration::from_millis(10)).await;
    }

    #[test]
    fn list_is_bounded_and_deduplicated() {
        let mut list = FeedList::new(2);
        assert!(list.push(Message::inbound("a", "+2", "+1", "one")));
        assert!(!list.push(Message::inbound("a", "+2", "+1", "one again")));
        list.push(Message::inbound("b", "+2", "+1", "two"));
        list.push(Message::inbound("c", "+2", "+1", "three"));

        let ids: Vec<_> = list.messages().into_iter().map(|m| m.id).collect();
        assert_eq!(ids, vec!["b", "c"]);
    }

    #[test]
    fn delivery_updates_apply_to_outbound_only() {
        let mut list = FeedList::new(10);
        list.push(Message::outbound("out", "+1", "+2", "ping"));
        list.push(Message::inbound("in", "+2", "+1", "pong"));
        let update = |id: &str, status| FeedUpdate::DeliveryUpdated {
            channel: ChannelId::from("ch1"),
            message_id: id.to_string(),
            status,
        };

        assert!(list.apply(update("out", DeliveryStatus::Read)));
        assert!(!list.apply(update("out", DeliveryStatus::Delivered)));
        assert!(!list.apply(update("in", DeliveryStatus::Read)));
        assert!(!list.apply(update("missing", DeliveryStatus::Read)));
        assert_eq!(list.get("out").unwrap().delivery, DeliveryStatus::Read);
        assert_eq!(list.render(), "-> +2: ping [read]\n<- +2: pong");
    }

    #[tokio::test]
    async fn follows_broadcast_for_its_channel() {
        let (controller, channel) = connected().await;
        controller.register("ch2");
        let feed = MessageFeed::attach(&controller, &channel).unwrap();

        controller.deliver(Envelope::new(
            "ch1",
            LinkEvent::MessageInbound {
                message: Message::inbound("in-1", "+200", "+100", "hello"),
            },
        ));
        controller.deliver(Envelope::new(
            "ch2",
            LinkEvent::MessageInbound {
                message: Message::inbound("in-2", "+300", "+101", "elsewhere"),
            },
        ));
        settle().await;

        let ids: Vec<_> = feed.messages().into_iter().map(|m| m.id).collect();
        assert_eq!(ids, vec!["in-1"]);
    }

    #[tokio::test]
    async fn sent_message_listed_once() {
        let (controller, channel) = connected().await;
        let feed = MessageFeed::attach(&controller, &channel).unwrap();
        assert!(feed.header().can_send);

        let sent = feed.send_test_message("+200", "ping").await.unwrap();
        settle().await;

        assert_eq!(feed.messages().len(), 1);
        assert_eq!(feed.messages()[0].id, sent.id);
        assert_eq!(sent.direction, Direction::Outbound);
    }

    #[tokio::test]
    async fn refuses_to_send_when_not_connected() {
        let controller =
            LifecycleController::new(Arc::new(MockBackend::new()), LifecyclePolicy::default());
        let channel = controller.register("ch1").channel_id().clone();
        let feed = MessageFeed::attach(&controller, &channel).unwrap();

        assert!(!feed.header().can_send);
        assert!(matches!(
            feed.send_test_message("+200", "ping").await,
            Err(LinkError::NotConnected(_))
        ));
    }
}
