//! Broker engine
//!
//! This module contains the in-memory broker responsible for:
//! - keeping the topic → group → consumer directory
//! - registering subscribers and handing back their mailbox as a [`Feed`]
//! - fanning each published event out to every group of its topic
//!
//! Concurrency and usage notes:
//! - The broker is shared as `Arc<Broker>`; all methods take `&self`.
//! - The directory lock is held only for structural changes (creating a topic
//!   or group entry, appending a consumer) and for snapshotting a topic's
//!   groups. It is never held while an event is being dispatched.
//! - Dispatch to the groups of one topic runs concurrently, so a group stalled
//!   on a full mailbox does not hold back its siblings.
//! - Topic and group entries are never removed; consumers leave their group
//!   when their feed is dropped.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use futures::future::join_all;
use tracing::{error, info, trace};
use uuid::Uuid;

use crate::broker::feed::Feed;
use crate::broker::group::Group;
use crate::broker::mailbox::{Backpressure, Consumer, ConsumerId, DEFAULT_CAPACITY};
use crate::broker::message::{Event, Subscription};

type Directory = HashMap<String, HashMap<String, Arc<Group>>>;

#[derive(Debug)]
pub struct Broker {
    topics: Mutex<Directory>,
    capacity: usize,
    policy: Backpressure,
}

impl Default for Broker {
    fn default() -> Self {
        Self::new()
    }
}

impl Broker {
    /// A broker with 32-event mailboxes that block publishers when full.
    pub fn new() -> Self {
        Self::with_mailbox(DEFAULT_CAPACITY, Backpressure::Block)
    }

    /// A broker whose consumer mailboxes hold `capacity` events and apply
    /// `policy` once full.
    pub fn with_mailbox(capacity: usize, policy: Backpressure) -> Self {
        Self {
            topics: Mutex::new(HashMap::new()),
            capacity,
            policy,
        }
    }

    /// Backpressure policy given to every group.
    pub fn policy(&self) -> Backpressure {
        self.policy
    }

    fn directory(&self) -> MutexGuard<'_, Directory> {
        self.topics.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Register a new consumer for `subscription` and return its feed.
    ///
    /// An empty group name is replaced by a fresh UUID, giving the subscriber
    /// a private group. Topics and groups are created on first use.
    pub fn connect(&self, mut subscription: Subscription) -> Feed {
        if subscription.group.is_empty() {
            subscription.group = Uuid::new_v4().to_string();
        }
        let Subscription { topic, group } = subscription;

        let (consumer, receiver) = Consumer::new(self.capacity);
        let consumer_id = consumer.id;

        let entry = {
            let mut topics = self.directory();
            let entry = topics
                .entry(topic.clone())
                .or_default()
                .entry(group.clone())
                .or_insert_with(|| Arc::new(Group::new(group.clone(), self.policy)))
                .clone();
            entry.attach(consumer);
            entry
        };

        info!(topic = %topic, group = %group, consumer = %consumer_id, "consumer connected");
        Feed::new(consumer_id, topic, entry, receiver)
    }

    /// Dispatch `event` to every group registered under its topic.
    ///
    /// Never fails: a topic nobody subscribed to drops the event, and a group
    /// that cannot take it is logged and skipped. Returns how many groups
    /// accepted the event.
    pub async fn publish(&self, event: Event) -> usize {
        let groups = {
            let topics = self.directory();
            topics
                .get(&event.topic)
                .map(|groups| groups.values().cloned().collect::<Vec<_>>())
        };

        let Some(groups) = groups else {
            trace!(topic = %event.topic, "no groups for topic, event dropped");
            return 0;
        };

        let event = &event;
        let results = join_all(
            groups
                .iter()
                .map(|group| async move { (group, group.dispatch(event.clone()).await) }),
        )
        .await;

        let mut delivered = 0;
        for (group, result) in results {
            match result {
                Ok(consumer) => {
                    delivered += 1;
                    trace!(topic = %event.topic, group = %group.id(), consumer = %consumer, "event dispatched");
                }
                Err(e) => {
                    error!(error = %e, topic = %event.topic, group = %group.id(), "could not publish event to group");
                }
            }
        }
        delivered
    }

    /// Every topic that has ever had a subscriber.
    pub fn topics(&self) -> Vec<String> {
        self.directory().keys().cloned().collect()
    }

    /// Group names registered under `topic`, empty for an unknown topic.
    pub fn groups(&self, topic: &str) -> Vec<String> {
        self.directory()
            .get(topic)
            .map(|groups| groups.keys().cloned().collect())
            .unwrap_or_default()
    }

    /// Consumers of `group` on `topic`, in rotation order.
    pub fn consumers(&self, topic: &str, group: &str) -> Vec<ConsumerId> {
        let entry = self
            .directory()
            .get(topic)
            .and_then(|groups| groups.get(group))
            .cloned();
        entry.map(|g| g.consumer_ids()).unwrap_or_default()
    }
}
