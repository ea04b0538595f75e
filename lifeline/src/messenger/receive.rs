//! Provider events, inbound payloads, and offline queue reconciliation.

use std::collections::{HashSet, VecDeque};

use lifeline_proto::codec;
use lifeline_proto::message::PayloadKind;

use super::{Message, Messenger, MessengerError, MessengerEvent};
use crate::network::NetworkSignal;
use crate::provider::{ConnectionProvider, PeerName, ProviderEvent};
use crate::store::KeyValueStore;

impl<P: ConnectionProvider, S: KeyValueStore, N: NetworkSignal> Messenger<P, S, N> {
    /// React to one unsolicited provider event.
    ///
    /// # Errors
    ///
    /// Propagates errors from accepting a connection and from saving state.
    /// Undecodable payloads are dropped, not reported.
    pub async fn handle_provider_event(
        &mut self,
        event: ProviderEvent,
    ) -> Result<(), MessengerError> {
        match event {
            ProviderEvent::Incoming { peer } => self.accept_incoming(peer).await,
            ProviderEvent::Opened { peer } => self.handle_late_open(peer).await,
            ProviderEvent::Data { peer, payload } => self.handle_inbound(peer, &payload).await,
            ProviderEvent::Closed { peer } => self.handle_closed(peer).await,
            ProviderEvent::Lost { reason } => self.handle_registration_lost(&reason).await,
            ProviderEvent::Error { peer, reason } => {
                tracing::warn!(peer = ?peer, %reason, "provider reported an error");
                match peer {
                    Some(peer) => self.set_status(format!("Problem with {peer}: {reason}")),
                    None => self.set_status(format!("Connection problem: {reason}")),
                }
                Ok(())
            }
        }
    }

    /// React to the network going online or offline.
    ///
    /// Going online first registers the identity again if the registration
    /// was lost, which also reconnects known peers, then flushes the offline
    /// queue. Going offline only updates the status.
    ///
    /// # Errors
    ///
    /// Returns a registration error if the identity could not register
    /// again, and [`MessengerError::Persistence`] if the flushed queue could
    /// not be saved. The queue is flushed either way.
    pub async fn handle_network_change(&mut self, online: bool) -> Result<(), MessengerError> {
        tracing::info!(online, queued = self.state.queue.len(), "network state changed");
        if online {
            self.set_status("Back online");
            let resumed = self.resume_registration().await;
            let flushed = self.flush_offline_queue().await.map(|_| ());
            resumed.and(flushed)
        } else {
            self.set_status("Offline, messages will be queued");
            Ok(())
        }
    }

    /// Force the online flag from the UI.
    ///
    /// Only signals that support an override change. The transition itself
    /// arrives later through the signal's subscription, like any other.
    pub fn request_online(&mut self, online: bool) {
        if self.network.set_override(online) {
            tracing::info!(online, "online flag overridden");
        } else {
            self.set_status("Network state is detected automatically");
        }
    }

    /// Deliver every queued message whose peer has an open connection.
    ///
    /// Entries for unreachable peers stay queued in their original order.
    /// After a failed send to a peer, later entries for that peer are kept
    /// back so they never overtake it. Returns how many were delivered.
    ///
    /// # Errors
    ///
    /// Returns [`MessengerError::Persistence`] if the shortened queue could
    /// not be saved.
    pub async fn flush_offline_queue(&mut self) -> Result<usize, MessengerError> {
        if !self.network.is_online() || self.state.queue.is_empty() {
            return Ok(0);
        }

        let pending = self.state.queue.take_all();
        let mut remaining = VecDeque::with_capacity(pending.len());
        let mut blocked: HashSet<PeerName> = HashSet::new();
        let mut delivered = 0;

        for entry in pending {
            if blocked.contains(&entry.peer) || !self.connections.contains_key(&entry.peer) {
                remaining.push_back(entry);
                continue;
            }
            match self.transmit(&entry.peer, &entry.message).await {
                Ok(()) => delivered += 1,
                Err(e) => {
                    tracing::warn!(peer = %entry.peer, error = %e, "queued send failed");
                    blocked.insert(entry.peer.clone());
                    remaining.push_back(entry);
                }
            }
        }

        let left = remaining.len();
        self.state.queue.restore(remaining);
        tracing::info!(delivered, remaining = left, "offline queue flushed");
        self.emit(MessengerEvent::QueueFlushed {
            delivered,
            remaining: left,
        });
        if delivered == 0 {
            return Ok(0);
        }
        self.set_status(if left == 0 {
            format!("Delivered {delivered} queued messages")
        } else {
            format!("Delivered {delivered} queued messages, {left} still waiting")
        });
        self.persist().await?;
        Ok(delivered)
    }

    async fn handle_inbound(&mut self, peer: PeerName, bytes: &[u8]) -> Result<(), MessengerError> {
        if !self.connections.contains_key(&peer) {
            tracing::debug!(%peer, "dropping data from unconnected peer");
            return Ok(());
        }
        let payload = match codec::decode(bytes) {
            Ok(payload) => payload,
            Err(e) => {
                tracing::debug!(%peer, error = %e, "dropping undecodable payload");
                return Ok(());
            }
        };
        if let Err(e) = payload.validate() {
            tracing::debug!(%peer, error = %e, "dropping invalid payload");
            return Ok(());
        }
        if payload.from != peer.as_str() {
            tracing::debug!(%peer, claimed = %payload.from, "payload claims another sender");
        }

        let message = Message::received(peer.clone(), payload);
        self.set_status(match (message.kind, message.category) {
            (PayloadKind::Request, Some(category)) => format!("{category} request from {peer}"),
            (PayloadKind::Location, _) => format!("Location from {peer}"),
            _ => format!("Message from {peer}"),
        });
        tracing::debug!(%peer, kind = %message.kind, "message received");
        self.append_history(&peer, message);
        self.persist().await
    }
}
