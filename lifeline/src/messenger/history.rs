//! Conversation history: one ordered thread of messages per peer.
//!
//! Threads are append-only. Entries are ordered by the time they were
//! appended locally, not by the sender's clock, so a thread always reads in
//! the order this device saw it.

use std::collections::BTreeMap;
use std::fmt;

use lifeline_proto::message::{
    Coordinates, MessageId, PayloadKind, PeerPayload, RequestCategory, Timestamp, ValidationError,
};
use serde::{Deserialize, Serialize};

use crate::provider::PeerName;

/// Label used for messages this device authored.
const LOCAL_SENDER: &str = "me";

/// Who wrote a message.
///
/// Stored as the literal `"me"` or the peer's name; [`PeerName`] reserves
/// `"me"` so the two can never collide.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum Sender {
    /// The local user.
    Me,
    /// A remote peer, named by the connection it arrived on.
    Peer(PeerName),
}

impl TryFrom<String> for Sender {
    type Error = crate::provider::NameError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        if value == LOCAL_SENDER {
            Ok(Self::Me)
        } else {
            PeerName::parse(&value).map(Self::Peer)
        }
    }
}

impl From<Sender> for String {
    fn from(sender: Sender) -> Self {
        match sender {
            Sender::Me => LOCAL_SENDER.to_string(),
            Sender::Peer(name) => name.into(),
        }
    }
}

impl fmt::Display for Sender {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Me => f.write_str(LOCAL_SENDER),
            Self::Peer(name) => write!(f, "{name}"),
        }
    }
}

/// One entry in a conversation thread.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    /// Local identifier.
    pub id: MessageId,
    /// Who wrote it.
    pub sender: Sender,
    /// What it carries.
    pub kind: PayloadKind,
    /// Text, map link, or request label.
    pub text: String,
    /// Set for requests.
    pub category: Option<RequestCategory>,
    /// Set for locations.
    pub coords: Option<Coordinates>,
    /// When this device appended it.
    pub timestamp: Timestamp,
}

impl Message {
    /// A message authored locally.
    #[must_use]
    pub fn outgoing(
        kind: PayloadKind,
        text: impl Into<String>,
        category: Option<RequestCategory>,
        coords: Option<Coordinates>,
    ) -> Self {
        Self {
            id: MessageId::new(),
            sender: Sender::Me,
            kind,
            text: text.into(),
            category,
            coords,
            timestamp: Timestamp::now(),
        }
    }

    /// A message received from `peer`. The payload's self-reported `from`
    /// is ignored in favor of the connection's name.
    #[must_use]
    pub fn received(peer: PeerName, payload: PeerPayload) -> Self {
        Self {
            id: MessageId::new(),
            sender: Sender::Peer(peer),
            kind: payload.kind,
            text: payload.text,
            category: payload.category,
            coords: payload.coords,
            timestamp: Timestamp::now(),
        }
    }

    /// The wire form of this message, signed with the local name.
    #[must_use]
    pub fn to_payload(&self, from: &PeerName) -> PeerPayload {
        PeerPayload {
            from: from.as_str().to_string(),
            kind: self.kind,
            text: self.text.clone(),
            category: self.category,
            coords: self.coords,
            sent_at: self.timestamp,
        }
    }

    /// Check the content the same way a receiver would.
    ///
    /// # Errors
    ///
    /// Returns the [`ValidationError`] for unsendable content.
    pub fn validate(&self) -> Result<(), ValidationError> {
        PeerPayload {
            from: String::new(),
            kind: self.kind,
            text: self.text.clone(),
            category: self.category,
            coords: self.coords,
            sent_at: self.timestamp,
        }
        .validate()
    }

    /// Whether the local user wrote this message.
    #[must_use]
    pub fn is_mine(&self) -> bool {
        self.sender == Sender::Me
    }
}

/// Every conversation thread, keyed by peer.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ConversationHistory {
    threads: BTreeMap<PeerName, Vec<Message>>,
}

impl ConversationHistory {
    /// Create an empty history.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Make sure a (possibly empty) thread exists for `peer`.
    pub fn ensure_thread(&mut self, peer: &PeerName) {
        self.threads.entry(peer.clone()).or_default();
    }

    /// Append `message` to the end of `peer`'s thread.
    pub fn append(&mut self, peer: &PeerName, message: Message) {
        self.threads.entry(peer.clone()).or_default().push(message);
    }

    /// The thread for `peer`, oldest first. Empty if none exists.
    #[must_use]
    pub fn thread(&self, peer: &PeerName) -> &[Message] {
        self.threads.get(peer).map_or(&[], Vec::as_slice)
    }

    /// Whether a thread exists for `peer`.
    #[must_use]
    pub fn has_thread(&self, peer: &PeerName) -> bool {
        self.threads.contains_key(peer)
    }

    /// Total number of messages across all threads.
    #[must_use]
    pub fn message_count(&self) -> usize {
        self.threads.values().map(Vec::len).sum()
    }

    /// Whether there are no threads at all.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.threads.is_empty()
    }

    /// Borrow all threads.
    #[must_use]
    pub const fn threads(&self) -> &BTreeMap<PeerName, Vec<Message>> {
        &self.threads
    }
}
