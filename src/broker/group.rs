//! Consumer groups
//!
//! A `Group` load-balances one topic's events over its consumers in strict
//! round robin, in registration order. Two locks live here:
//!
//! - `members` guards the consumer list *and* the cursor. Every mutation of
//!   either happens in this one exclusive section, and it is never held
//!   across an await, so joining or leaving a group never waits on a slow
//!   consumer.
//! - `dispatch` serializes dispatches within the group and is held while the
//!   selected mailbox is being filled. Under the blocking policy a full
//!   mailbox therefore stalls this group only; other groups, on this topic or
//!   any other, keep flowing.

use std::sync::{Mutex, MutexGuard, PoisonError};

use tracing::debug;

use crate::broker::mailbox::{Backpressure, Consumer, ConsumerId, Mailbox};
use crate::broker::message::Event;
use crate::utils::error::{Error, Result};

#[derive(Debug, Default)]
struct Members {
    consumers: Vec<Consumer>,
    cursor: usize,
}

impl Members {
    fn remove(&mut self, index: usize) -> Consumer {
        let consumer = self.consumers.remove(index);
        // keep pointing at the consumer that was next in line
        if index < self.cursor {
            self.cursor -= 1;
        }
        if self.cursor >= self.consumers.len() {
            self.cursor = 0;
        }
        consumer
    }

    fn prune(&mut self) {
        let mut index = self.consumers.len();
        while index > 0 {
            index -= 1;
            if self.consumers[index].mailbox.is_closed() {
                let consumer = self.remove(index);
                debug!(consumer = %consumer.id, "pruned closed consumer");
            }
        }
    }

    fn select(&mut self) -> Option<(ConsumerId, Mailbox)> {
        if self.consumers.is_empty() {
            return None;
        }
        if self.cursor >= self.consumers.len() {
            self.cursor = 0;
        }

        let consumer = &self.consumers[self.cursor];
        let selected = (consumer.id, consumer.mailbox.clone());
        self.cursor = (self.cursor + 1) % self.consumers.len();
        Some(selected)
    }
}

#[derive(Debug)]
pub struct Group {
    id: String,
    policy: Backpressure,
    members: Mutex<Members>,
    dispatch: tokio::sync::Mutex<()>,
}

impl Group {
    /// An empty group applying `policy` to full mailboxes.
    pub fn new(id: impl Into<String>, policy: Backpressure) -> Self {
        Self {
            id: id.into(),
            policy,
            members: Mutex::new(Members::default()),
            dispatch: tokio::sync::Mutex::new(()),
        }
    }

    /// Group name as given by subscribers, or the generated one.
    pub fn id(&self) -> &str {
        &self.id
    }

    fn members(&self) -> MutexGuard<'_, Members> {
        self.members.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Append a consumer at the end of the rotation.
    pub fn attach(&self, consumer: Consumer) {
        self.members().consumers.push(consumer);
    }

    /// Remove a consumer from the rotation. Returns false if it was not a member.
    pub fn detach(&self, id: ConsumerId) -> bool {
        let mut members = self.members();
        match members.consumers.iter().position(|c| c.id == id) {
            Some(index) => {
                members.remove(index);
                true
            }
            None => false,
        }
    }

    /// Number of consumers currently in the rotation.
    pub fn len(&self) -> usize {
        self.members().consumers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Consumer ids in rotation order.
    pub fn consumer_ids(&self) -> Vec<ConsumerId> {
        self.members().consumers.iter().map(|c| c.id).collect()
    }

    /// Hand `event` to the next consumer in rotation.
    ///
    /// Fails with `NoConsumers` when the group is empty, leaving the cursor as
    /// it was. Under [`Backpressure::Block`] this waits for mailbox space with
    /// no timeout; under [`Backpressure::Drop`] a full mailbox fails with
    /// `MailboxFull` and the event is lost for this group. A consumer that
    /// leaves while selected is detached and the event goes to the next one
    /// in rotation instead.
    pub async fn dispatch(&self, event: Event) -> Result<ConsumerId> {
        let _serial = self.dispatch.lock().await;

        loop {
            let (id, mailbox) = {
                let mut members = self.members();
                members.prune();
                members.select().ok_or(Error::NoConsumers)?
            };

            match mailbox.reserve(self.policy).await {
                Ok(slot) => {
                    slot.send(event);
                    return Ok(id);
                }
                Err(Error::ConsumerClosed) => {
                    self.detach(id);
                    debug!(group = %self.id, consumer = %id, "consumer left before delivery");
                }
                Err(e) => return Err(e),
            }
        }
    }
}
