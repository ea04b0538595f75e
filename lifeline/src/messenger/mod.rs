//! The disaster messenger: named identity, peer connections, per-peer
//! history, and an offline queue, built on an injected
//! [`ConnectionProvider`], [`KeyValueStore`], and [`NetworkSignal`].
//!
//! A [`Messenger`] is driven one input at a time through `&mut self`
//! methods: user commands, provider events, and network transitions. Each
//! handler runs to completion before the next starts, and every committed
//! mutation is followed by a save through [`StateRepository`].
//!
//! The `impl` is split across submodules by concern:
//! - [`identity`]: registration, identity change, startup, teardown
//! - [`connection`]: connect, accept, select, disconnect
//! - [`send`]: text, location, and request messages
//! - [`receive`]: provider events, inbound payloads, queue reconciliation

pub mod connection;
pub mod history;
pub mod identity;
pub mod queue;
pub mod receive;
pub mod send;

use std::collections::{BTreeMap, BTreeSet, HashMap};

use lifeline_proto::codec::CodecError;
use lifeline_proto::message::ValidationError;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

use crate::config::MessengerConfig;
use crate::network::{LocationError, NetworkSignal};
use crate::provider::{ConnectionProvider, NameError, PeerName, ProviderError};
use crate::store::repository::{PersistedState, StateRepository};
use crate::store::{KeyValueStore, StoreError};

pub use connection::{Direction, PeerConnection};
pub use history::{ConversationHistory, Message, Sender};
pub use identity::{SessionState, suggest_identity};
pub use queue::{OfflineQueue, QueuedMessage};
pub use send::{Delivery, map_link};

/// Errors surfaced by messenger operations.
///
/// Every error is also written to the status string before it is returned.
#[derive(Debug, thiserror::Error)]
pub enum MessengerError {
    /// The supplied name is not a valid peer name.
    #[error("invalid name: {0}")]
    InvalidName(#[from] NameError),

    /// Another session already holds the requested identity.
    #[error("the name '{0}' is already taken, pick another")]
    NameTaken(PeerName),

    /// Registration failed for a reason other than a duplicate name.
    #[error("registration failed: {0}")]
    Registration(ProviderError),

    /// The operation needs a registered identity.
    #[error("choose a name first")]
    NotRegistered,

    /// Tried to connect to our own name.
    #[error("cannot connect to yourself")]
    SelfConnect,

    /// A connection to this peer is already open.
    #[error("already connected to {0}")]
    AlreadyConnected(PeerName),

    /// The provider could not open a connection.
    #[error("could not connect to {peer}: {source}")]
    Connection {
        /// The peer we tried to reach.
        peer: PeerName,
        /// What the provider reported.
        source: ProviderError,
    },

    /// No conversation is selected.
    #[error("no conversation selected")]
    NoActivePeer,

    /// The peer has neither a connection nor a conversation.
    #[error("no conversation with {0}")]
    UnknownPeer(PeerName),

    /// A message needs an open connection and there is none.
    #[error("not connected to {0}")]
    NotConnected(PeerName),

    /// The provider refused to carry a message.
    #[error("could not deliver to {peer}: {source}")]
    Delivery {
        /// The intended recipient.
        peer: PeerName,
        /// What the provider reported.
        source: ProviderError,
    },

    /// The message content is not sendable.
    #[error("message rejected: {0}")]
    Validation(#[from] ValidationError),

    /// The device position could not be read.
    #[error("location unavailable: {0}")]
    Location(#[from] LocationError),

    /// The payload could not be encoded.
    #[error("encoding failed: {0}")]
    Codec(#[from] CodecError),

    /// State could not be written to (or read from) the store.
    #[error("could not save state: {0}")]
    Persistence(#[from] StoreError),
}

/// How plain text messages are delivered when no connection is usable.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum TextPolicy {
    /// Queue text like locations and requests.
    #[default]
    QueueOrSend,
    /// Fail text sends without an open connection and record nothing.
    RequireConnection,
}

/// Notifications for the UI layer.
#[derive(Debug, Clone, PartialEq)]
pub enum MessengerEvent {
    /// A message was appended to a thread (sent or received).
    MessageAppended {
        /// The thread it belongs to.
        peer: PeerName,
        /// The appended message.
        message: Message,
    },
    /// A connection opened.
    ConnectionOpened {
        /// The peer at the other end.
        peer: PeerName,
        /// Who initiated it.
        direction: Direction,
    },
    /// A connection closed, locally or remotely.
    ConnectionClosed {
        /// The peer that went away.
        peer: PeerName,
    },
    /// The registered identity changed or was cleared.
    IdentityChanged {
        /// The new identity, if any.
        identity: Option<PeerName>,
    },
    /// A pass over the offline queue finished.
    QueueFlushed {
        /// Messages handed to a connection.
        delivered: usize,
        /// Messages still waiting.
        remaining: usize,
    },
}

/// Point-in-time copy of everything the UI renders.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Snapshot {
    /// Current identity.
    pub identity: Option<PeerName>,
    /// Session lifecycle state.
    pub session: SessionState,
    /// Whether the network signal reports online.
    pub online: bool,
    /// Peers with an open connection, in name order.
    pub connected: Vec<PeerName>,
    /// Peers remembered for reconnection, in name order.
    pub known: Vec<PeerName>,
    /// The conversation in focus.
    pub active_peer: Option<PeerName>,
    /// Every thread.
    pub threads: BTreeMap<PeerName, Vec<Message>>,
    /// Number of queued messages.
    pub queued: usize,
    /// Human-readable status line.
    pub status: String,
}

/// The messenger core. See the [module docs](self).
pub struct Messenger<P: ConnectionProvider, S: KeyValueStore, N: NetworkSignal> {
    provider: P,
    repository: StateRepository<S>,
    network: N,
    config: MessengerConfig,
    session: SessionState,
    /// Everything that survives a restart.
    state: PersistedState,
    /// Open connections. A peer is connected iff it has an entry here.
    connections: HashMap<PeerName, PeerConnection>,
    status: String,
    event_tx: mpsc::Sender<MessengerEvent>,
}

impl<P: ConnectionProvider, S: KeyValueStore, N: NetworkSignal> Messenger<P, S, N> {
    /// Restore persisted state and build a messenger around it.
    ///
    /// Nothing is registered yet; call [`start`](Self::start) for that.
    /// Returns the messenger and a receiver for [`MessengerEvent`]s.
    ///
    /// # Errors
    ///
    /// Returns [`MessengerError::Persistence`] if the store cannot be read
    /// or holds a corrupt record.
    pub async fn load(
        provider: P,
        store: S,
        network: N,
        config: MessengerConfig,
    ) -> Result<(Self, mpsc::Receiver<MessengerEvent>), MessengerError> {
        let repository = StateRepository::new(store);
        let state = repository.load().await?;
        let status = state.identity.as_ref().map_or_else(
            || "Choose a name to get started".to_string(),
            |name| format!("Restored session for {name}"),
        );
        tracing::info!(
            identity = ?state.identity,
            known_peers = state.known_peers.len(),
            messages = state.history.message_count(),
            queued = state.queue.len(),
            "messenger state loaded"
        );

        let (event_tx, event_rx) = mpsc::channel(config.event_buffer.max(1));
        let messenger = Self {
            provider,
            repository,
            network,
            config,
            session: SessionState::NoIdentity,
            state,
            connections: HashMap::new(),
            status,
            event_tx,
        };
        Ok((messenger, event_rx))
    }

    /// Current identity, if one has registered.
    pub const fn identity(&self) -> Option<&PeerName> {
        self.state.identity.as_ref()
    }

    /// Session lifecycle state.
    pub const fn session_state(&self) -> SessionState {
        self.session
    }

    /// Peers with an open connection, in name order.
    pub fn connected_peers(&self) -> Vec<PeerName> {
        let mut peers: Vec<PeerName> = self.connections.keys().cloned().collect();
        peers.sort();
        peers
    }

    /// Whether a connection to `peer` is open.
    pub fn is_connected(&self, peer: &PeerName) -> bool {
        self.connections.contains_key(peer)
    }

    /// The open connection to `peer`, if any.
    pub fn connection(&self, peer: &PeerName) -> Option<&PeerConnection> {
        self.connections.get(peer)
    }

    /// The conversation in focus.
    pub const fn active_peer(&self) -> Option<&PeerName> {
        self.state.active_peer.as_ref()
    }

    /// The thread with `peer`, oldest first.
    pub fn messages(&self, peer: &PeerName) -> &[Message] {
        self.state.history.thread(peer)
    }

    /// Every thread.
    pub const fn history(&self) -> &ConversationHistory {
        &self.state.history
    }

    /// Peers remembered for reconnection.
    pub const fn known_peers(&self) -> &BTreeSet<PeerName> {
        &self.state.known_peers
    }

    /// Messages waiting for a connection.
    pub const fn queued(&self) -> &OfflineQueue {
        &self.state.queue
    }

    /// The human-readable status line.
    pub fn status(&self) -> &str {
        &self.status
    }

    /// Whether the network signal reports online.
    pub fn is_online(&self) -> bool {
        self.network.is_online()
    }

    /// The injected connection provider.
    pub const fn provider(&self) -> &P {
        &self.provider
    }

    /// The injected network signal.
    pub const fn network(&self) -> &N {
        &self.network
    }

    /// Copy everything the UI renders.
    pub fn snapshot(&self) -> Snapshot {
        Snapshot {
            identity: self.state.identity.clone(),
            session: self.session,
            online: self.network.is_online(),
            connected: self.connected_peers(),
            known: self.state.known_peers.iter().cloned().collect(),
            active_peer: self.state.active_peer.clone(),
            threads: self.state.history.threads().clone(),
            queued: self.state.queue.len(),
            status: self.status.clone(),
        }
    }

    fn set_status(&mut self, status: impl Into<String>) {
        self.status = status.into();
    }

    /// Record `err` in the status line and hand it back for returning.
    fn fail(&mut self, err: MessengerError) -> MessengerError {
        self.status = capitalize(&err.to_string());
        err
    }

    fn emit(&self, event: MessengerEvent) {
        let _ = self.event_tx.try_send(event);
    }

    fn append_history(&mut self, peer: &PeerName, message: Message) {
        self.state.history.append(peer, message.clone());
        self.emit(MessengerEvent::MessageAppended {
            peer: peer.clone(),
            message,
        });
    }

    /// Write the full state. On failure the in-memory state stands.
    async fn persist(&mut self) -> Result<(), MessengerError> {
        match self.repository.save(&self.state).await {
            Ok(()) => Ok(()),
            Err(e) => {
                tracing::warn!(error = %e, "failed to persist messenger state");
                Err(self.fail(MessengerError::Persistence(e)))
            }
        }
    }
}

fn capitalize(text: &str) -> String {
    let mut chars = text.chars();
    chars.next().map_or_else(String::new, |first| {
        first.to_uppercase().chain(chars).collect()
    })
}
