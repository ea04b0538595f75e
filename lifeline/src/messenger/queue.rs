//! Offline queue: messages waiting for a connection, oldest first.

use std::collections::VecDeque;

use serde::{Deserialize, Serialize};

use super::history::Message;
use crate::provider::PeerName;

/// A message that could not be delivered when it was written.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueuedMessage {
    /// Intended recipient.
    pub peer: PeerName,
    /// The message as it appears in history.
    pub message: Message,
}

/// FIFO of undelivered messages across all peers.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct OfflineQueue {
    entries: VecDeque<QueuedMessage>,
}

impl OfflineQueue {
    /// Create an empty queue.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a message for `peer` to the back of the queue.
    pub fn push(&mut self, peer: PeerName, message: Message) {
        self.entries.push_back(QueuedMessage { peer, message });
    }

    /// Take every entry out, leaving the queue empty.
    pub fn take_all(&mut self) -> VecDeque<QueuedMessage> {
        std::mem::take(&mut self.entries)
    }

    /// Put back entries that are still undelivered, ahead of anything
    /// queued in the meantime.
    pub fn restore(&mut self, mut remaining: VecDeque<QueuedMessage>) {
        remaining.append(&mut self.entries);
        self.entries = remaining;
    }

    /// Number of waiting messages.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether nothing is waiting.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Number of waiting messages for `peer`.
    #[must_use]
    pub fn pending_for(&self, peer: &PeerName) -> usize {
        self.entries.iter().filter(|e| &e.peer == peer).count()
    }

    /// Iterate oldest first.
    pub fn iter(&self) -> impl Iterator<Item = &QueuedMessage> {
        self.entries.iter()
    }
}
