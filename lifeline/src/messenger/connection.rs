//! The connection directory: opening, accepting, selecting, and closing
//! peer connections.

use futures_util::StreamExt;
use lifeline_proto::message::Timestamp;

use super::{Messenger, MessengerError, MessengerEvent, SessionState};
use crate::network::NetworkSignal;
use crate::provider::{ConnectionProvider, PeerName, ProviderError};
use crate::store::KeyValueStore;

/// Which side opened a connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    /// We dialed.
    Outbound,
    /// They dialed and we accepted.
    Inbound,
}

/// An open connection to one peer. Entries exist only while open.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PeerConnection {
    /// The peer at the other end.
    pub peer: PeerName,
    /// Who initiated it.
    pub direction: Direction,
    /// When it opened.
    pub opened_at: Timestamp,
}

impl<P: ConnectionProvider, S: KeyValueStore, N: NetworkSignal> Messenger<P, S, N> {
    /// Open a connection to `raw`.
    ///
    /// On success the peer joins the known peers, gets a history thread, and
    /// becomes the active peer if none is selected. Failures are not retried.
    ///
    /// # Errors
    ///
    /// - [`MessengerError::InvalidName`] for an unusable name.
    /// - [`MessengerError::NotRegistered`] before the identity is ready.
    /// - [`MessengerError::SelfConnect`] for our own name.
    /// - [`MessengerError::AlreadyConnected`] if a connection is open.
    /// - [`MessengerError::Connection`] if the provider fails.
    /// - [`MessengerError::Persistence`] if the new state could not be saved.
    pub async fn connect(&mut self, raw: &str) -> Result<(), MessengerError> {
        let peer = match PeerName::parse(raw) {
            Ok(peer) => peer,
            Err(e) => return Err(self.fail(e.into())),
        };
        if self.session != SessionState::Ready {
            return Err(self.fail(MessengerError::NotRegistered));
        }
        if self.state.identity.as_ref() == Some(&peer) {
            return Err(self.fail(MessengerError::SelfConnect));
        }
        if self.connections.contains_key(&peer) {
            return Err(self.fail(MessengerError::AlreadyConnected(peer)));
        }

        self.set_status(format!("Connecting to {peer}..."));
        tracing::info!(%peer, "connecting");
        if let Err(source) = self.provider.connect(&peer).await {
            tracing::warn!(%peer, error = %source, "connect failed");
            return Err(self.fail(MessengerError::Connection { peer, source }));
        }

        self.bootstrap_connection(peer, Direction::Outbound);
        self.persist().await
    }

    /// Accept an inbound connection request from `peer`.
    ///
    /// Requests are accepted unconditionally while the session is ready.
    ///
    /// # Errors
    ///
    /// - [`MessengerError::NotRegistered`] if the session is not ready; the
    ///   request is refused.
    /// - [`MessengerError::Connection`] if the provider fails to accept.
    /// - [`MessengerError::Persistence`] if the new state could not be saved.
    pub async fn accept_incoming(&mut self, peer: PeerName) -> Result<(), MessengerError> {
        if self.session != SessionState::Ready {
            self.provider.close(&peer).await;
            tracing::debug!(%peer, "refused inbound request while not ready");
            return Err(MessengerError::NotRegistered);
        }
        if self.connections.contains_key(&peer) {
            return Ok(());
        }
        if let Err(source) = self.provider.accept(&peer).await {
            tracing::warn!(%peer, error = %source, "accept failed");
            return Err(self.fail(MessengerError::Connection { peer, source }));
        }

        tracing::info!(%peer, "accepted inbound connection");
        self.bootstrap_connection(peer, Direction::Inbound);
        self.persist().await
    }

    /// Focus the conversation with `raw`.
    ///
    /// # Errors
    ///
    /// - [`MessengerError::InvalidName`] for an unusable name.
    /// - [`MessengerError::UnknownPeer`] if there is neither a connection
    ///   nor a history thread for the peer.
    /// - [`MessengerError::Persistence`] if the selection could not be saved.
    pub async fn select_active_peer(&mut self, raw: &str) -> Result<(), MessengerError> {
        let peer = match PeerName::parse(raw) {
            Ok(peer) => peer,
            Err(e) => return Err(self.fail(e.into())),
        };
        if !self.connections.contains_key(&peer) && !self.state.history.has_thread(&peer) {
            return Err(self.fail(MessengerError::UnknownPeer(peer)));
        }
        self.set_status(format!("Chatting with {peer}"));
        self.state.active_peer = Some(peer);
        self.persist().await
    }

    /// Close every connection and forget the known peers so the next start
    /// does not reconnect. History and the offline queue are kept.
    ///
    /// Calling it again with nothing open is harmless.
    ///
    /// # Errors
    ///
    /// Returns [`MessengerError::Persistence`] if the state could not be saved.
    pub async fn disconnect_all(&mut self) -> Result<(), MessengerError> {
        self.close_all_connections().await;
        self.state.active_peer = None;
        self.state.known_peers.clear();
        self.set_status("Disconnected from all peers");
        self.persist().await
    }

    /// A link whose request had already failed opened after all.
    pub(super) async fn handle_late_open(&mut self, peer: PeerName) -> Result<(), MessengerError> {
        if self.session != SessionState::Ready {
            self.provider.close(&peer).await;
            return Ok(());
        }
        if self.connections.contains_key(&peer) {
            return Ok(());
        }
        tracing::info!(%peer, "late link adopted");
        self.bootstrap_connection(peer, Direction::Outbound);
        self.persist().await
    }

    /// The provider reported that the connection to `peer` is gone.
    pub(super) async fn handle_closed(&mut self, peer: PeerName) -> Result<(), MessengerError> {
        if self.connections.remove(&peer).is_none() {
            return Ok(());
        }
        tracing::info!(%peer, "connection closed");
        if self.state.active_peer.as_ref() == Some(&peer) {
            self.state.active_peer = None;
        }
        self.set_status(format!("{peer} disconnected"));
        self.emit(MessengerEvent::ConnectionClosed { peer });
        self.persist().await
    }

    /// Try every known peer we are not connected to, a bounded number at a
    /// time. Failures are logged and skipped. Returns how many connected.
    pub(super) async fn reconnect_known_peers(&mut self) -> Result<usize, MessengerError> {
        let targets: Vec<PeerName> = self
            .state
            .known_peers
            .iter()
            .filter(|peer| !self.connections.contains_key(*peer))
            .cloned()
            .collect();
        if targets.is_empty() {
            return Ok(0);
        }

        let provider = &self.provider;
        let attempts: Vec<_> = targets
            .into_iter()
            .map(|peer| async move {
                let outcome = provider.connect(&peer).await;
                (peer, outcome)
            })
            .collect();
        let mut outcomes: Vec<(PeerName, Result<(), ProviderError>)> =
            futures_util::stream::iter(attempts)
                .buffer_unordered(self.config.reconnect_concurrency.max(1))
                .collect()
                .await;
        outcomes.sort_by(|a, b| a.0.cmp(&b.0));

        let mut reconnected = 0;
        for (peer, outcome) in outcomes {
            match outcome {
                Ok(()) => {
                    self.bootstrap_connection(peer, Direction::Outbound);
                    reconnected += 1;
                }
                Err(e) => tracing::info!(%peer, error = %e, "known peer not reachable"),
            }
        }
        if reconnected > 0 {
            self.persist().await?;
        }
        Ok(reconnected)
    }

    /// Close every open connection without touching persisted state.
    pub(super) async fn close_all_connections(&mut self) {
        let peers: Vec<PeerName> = self.connections.drain().map(|(peer, _)| peer).collect();
        for peer in peers {
            self.provider.close(&peer).await;
            tracing::debug!(%peer, "connection closed locally");
            self.emit(MessengerEvent::ConnectionClosed { peer });
        }
    }

    /// Record a newly opened connection. Callers persist.
    fn bootstrap_connection(&mut self, peer: PeerName, direction: Direction) {
        self.connections.insert(
            peer.clone(),
            PeerConnection {
                peer: peer.clone(),
                direction,
                opened_at: Timestamp::now(),
            },
        );
        self.state.history.ensure_thread(&peer);
        self.state.known_peers.insert(peer.clone());
        if self.state.active_peer.is_none() {
            self.state.active_peer = Some(peer.clone());
        }
        self.set_status(format!("Connected to {peer}"));
        self.emit(MessengerEvent::ConnectionOpened { peer, direction });
    }
}
