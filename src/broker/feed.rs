use std::sync::Arc;

use tokio::sync::mpsc;
use tracing::debug;

use crate::broker::group::Group;
use crate::broker::mailbox::ConsumerId;
use crate::broker::message::Event;

/// Read-only view of one consumer's mailbox, returned by `Broker::connect`.
///
/// Dropping the feed closes the mailbox and detaches the consumer from its
/// group, so a dead subscriber never keeps a slot in the rotation. A dispatch
/// blocked on this mailbox is woken and moves on to the next consumer.
#[derive(Debug)]
pub struct Feed {
    consumer: ConsumerId,
    topic: String,
    group: Arc<Group>,
    receiver: mpsc::Receiver<Event>,
}

impl Feed {
    pub(crate) fn new(
        consumer: ConsumerId,
        topic: String,
        group: Arc<Group>,
        receiver: mpsc::Receiver<Event>,
    ) -> Self {
        Self {
            consumer,
            topic,
            group,
            receiver,
        }
    }

    /// Id of the consumer this feed drains.
    pub fn consumer(&self) -> ConsumerId {
        self.consumer
    }

    /// Topic subscribed to.
    pub fn topic(&self) -> &str {
        &self.topic
    }

    /// Group joined, generated by the broker when none was requested.
    pub fn group(&self) -> &str {
        self.group.id()
    }

    /// Wait for the next event. `None` once the mailbox is closed and drained.
    pub async fn recv(&mut self) -> Option<Event> {
        self.receiver.recv().await
    }

    /// Take an already queued event without waiting.
    pub fn try_recv(&mut self) -> Option<Event> {
        self.receiver.try_recv().ok()
    }
}

impl Drop for Feed {
    fn drop(&mut self) {
        self.receiver.close();
        if self.group.detach(self.consumer) {
            debug!(
                topic = %self.topic,
                group = %self.group.id(),
                consumer = %self.consumer,
                "consumer detached"
            );
        }
    }
}
