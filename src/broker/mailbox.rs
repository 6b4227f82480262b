//! Consumers and their mailboxes
//!
//! Every consumer owns a bounded FIFO mailbox. The sending half stays with the
//! consumer's group; the receiving half is handed to the subscriber as a
//! [`Feed`](crate::broker::feed::Feed). A full mailbox is the only source of
//! backpressure in the broker, and [`Backpressure`] decides what happens then.

use serde::Deserialize;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use uuid::Uuid;

use crate::broker::message::Event;
use crate::utils::error::{Error, Result};

pub type ConsumerId = Uuid;

/// Mailbox capacity used unless configured otherwise.
pub const DEFAULT_CAPACITY: usize = 32;

/// What a dispatch does when the selected mailbox is full.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Backpressure {
    /// Wait until the consumer drains an event. Stalls the group, not the broker.
    #[default]
    Block,
    /// Discard the event for this group and report `MailboxFull`.
    Drop,
}

/// Producer side of a consumer's queue.
#[derive(Debug, Clone)]
pub struct Mailbox {
    sender: mpsc::Sender<Event>,
}

impl Mailbox {
    /// Claim a slot for one event. The event itself is only handed over once a
    /// slot is held, so a mailbox that turns out closed never swallows it.
    pub async fn reserve(&self, policy: Backpressure) -> Result<mpsc::Permit<'_, Event>> {
        match policy {
            Backpressure::Block => self
                .sender
                .reserve()
                .await
                .map_err(|_| Error::ConsumerClosed),
            Backpressure::Drop => self.sender.try_reserve().map_err(|e| match e {
                TrySendError::Full(()) => Error::MailboxFull,
                TrySendError::Closed(()) => Error::ConsumerClosed,
            }),
        }
    }

    /// The subscriber has gone away and nothing will drain this mailbox again.
    pub fn is_closed(&self) -> bool {
        self.sender.is_closed()
    }
}

#[derive(Debug)]
pub struct Consumer {
    pub id: ConsumerId,
    pub mailbox: Mailbox,
}

impl Consumer {
    /// Create a consumer with a fresh id and a mailbox holding up to
    /// `capacity` events, returning the receiving half alongside it.
    pub fn new(capacity: usize) -> (Self, mpsc::Receiver<Event>) {
        // tokio panics on a zero-capacity channel
        let (sender, receiver) = mpsc::channel(capacity.max(1));
        let consumer = Self {
            id: Uuid::new_v4(),
            mailbox: Mailbox { sender },
        };
        (consumer, receiver)
    }
}
