//! Outgoing messages and the queue-or-send policy.

use lifeline_proto::codec;
use lifeline_proto::message::{Coordinates, PayloadKind, RequestCategory};

use super::{Message, Messenger, MessengerError, TextPolicy};
use crate::network::NetworkSignal;
use crate::provider::{ConnectionProvider, PeerName};
use crate::store::KeyValueStore;

const MAP_SEARCH_URL: &str = "https://www.google.com/maps/search/";

/// What happened to an outgoing message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delivery {
    /// Handed to an open connection.
    Sent,
    /// Parked in the offline queue.
    Queued,
}

/// Build a map search link for `coords`.
///
/// Returns `None` for out-of-range coordinates.
#[must_use]
pub fn map_link(coords: Coordinates) -> Option<String> {
    if !coords.is_valid() {
        return None;
    }
    let raw = format!(
        "{MAP_SEARCH_URL}?api=1&query={},{}",
        coords.lat, coords.lng
    );
    url::Url::parse(&raw).ok().map(String::from)
}

impl<P: ConnectionProvider, S: KeyValueStore, N: NetworkSignal> Messenger<P, S, N> {
    /// Send free text to the active peer.
    ///
    /// Under [`TextPolicy::QueueOrSend`] text follows the same policy as
    /// locations and requests. Under [`TextPolicy::RequireConnection`] a
    /// send without a usable connection fails and nothing is recorded.
    ///
    /// # Errors
    ///
    /// - [`MessengerError::NoActivePeer`] if no conversation is selected.
    /// - [`MessengerError::Validation`] for blank or oversized text.
    /// - [`MessengerError::NotConnected`] or [`MessengerError::Delivery`]
    ///   under [`TextPolicy::RequireConnection`].
    /// - [`MessengerError::Persistence`] if the new state could not be saved.
    pub async fn send_text(&mut self, text: &str) -> Result<Delivery, MessengerError> {
        let peer = self.require_active_peer()?;
        let message = Message::outgoing(PayloadKind::Text, text.trim(), None, None);
        self.check(&message)?;

        if self.config.text_policy == TextPolicy::RequireConnection {
            if !self.network.is_online() || !self.connections.contains_key(&peer) {
                return Err(self.fail(MessengerError::NotConnected(peer)));
            }
            if let Err(e) = self.transmit(&peer, &message).await {
                return Err(self.fail(e));
            }
            self.append_history(&peer, message);
            self.set_status(format!("Sent to {peer}"));
            self.persist().await?;
            return Ok(Delivery::Sent);
        }

        self.deliver_or_queue(peer, message).await
    }

    /// Share the device position with the active peer.
    ///
    /// The message text is a map link, or the raw `"lat, lng"` pair if no
    /// link can be built.
    ///
    /// # Errors
    ///
    /// - [`MessengerError::NoActivePeer`] if no conversation is selected.
    /// - [`MessengerError::Location`] if the position is unavailable.
    /// - [`MessengerError::Persistence`] if the new state could not be saved.
    pub async fn send_location(&mut self) -> Result<Delivery, MessengerError> {
        let peer = self.require_active_peer()?;
        let coords = match self.network.current_position().await {
            Ok(coords) => coords,
            Err(e) => return Err(self.fail(e.into())),
        };
        let text = map_link(coords).unwrap_or_else(|| coords.to_string());
        let message = Message::outgoing(PayloadKind::Location, text, None, Some(coords));
        self.check(&message)?;
        self.deliver_or_queue(peer, message).await
    }

    /// Ask the active peer for help.
    ///
    /// # Errors
    ///
    /// - [`MessengerError::NoActivePeer`] if no conversation is selected.
    /// - [`MessengerError::Persistence`] if the new state could not be saved.
    pub async fn send_request(
        &mut self,
        category: RequestCategory,
    ) -> Result<Delivery, MessengerError> {
        let peer = self.require_active_peer()?;
        let message =
            Message::outgoing(PayloadKind::Request, category.label(), Some(category), None);
        self.deliver_or_queue(peer, message).await
    }

    /// Send now if online with an open connection, otherwise queue. Either
    /// way the message is recorded in history as ours.
    async fn deliver_or_queue(
        &mut self,
        peer: PeerName,
        message: Message,
    ) -> Result<Delivery, MessengerError> {
        let delivery = if self.network.is_online() && self.connections.contains_key(&peer) {
            match self.transmit(&peer, &message).await {
                Ok(()) => Delivery::Sent,
                Err(e) => {
                    tracing::warn!(%peer, error = %e, "send failed, queueing");
                    self.state.queue.push(peer.clone(), message.clone());
                    Delivery::Queued
                }
            }
        } else {
            tracing::debug!(%peer, kind = %message.kind, "no usable connection, queueing");
            self.state.queue.push(peer.clone(), message.clone());
            Delivery::Queued
        };

        self.append_history(&peer, message);
        match delivery {
            Delivery::Sent => self.set_status(format!("Sent to {peer}")),
            Delivery::Queued => self.set_status(format!(
                "Queued for {peer} ({} waiting)",
                self.state.queue.len()
            )),
        }
        self.persist().await?;
        Ok(delivery)
    }

    /// Encode `message` and hand it to the connection for `peer`.
    pub(super) async fn transmit(
        &self,
        peer: &PeerName,
        message: &Message,
    ) -> Result<(), MessengerError> {
        let from = self
            .state
            .identity
            .as_ref()
            .ok_or(MessengerError::NotRegistered)?;
        let bytes = codec::encode(&message.to_payload(from))?;
        self.provider
            .send(peer, &bytes)
            .await
            .map_err(|source| MessengerError::Delivery {
                peer: peer.clone(),
                source,
            })?;
        tracing::debug!(%peer, kind = %message.kind, bytes = bytes.len(), "message sent");
        Ok(())
    }

    fn require_active_peer(&mut self) -> Result<PeerName, MessengerError> {
        match self.state.active_peer.clone() {
            Some(peer) => Ok(peer),
            None => Err(self.fail(MessengerError::NoActivePeer)),
        }
    }

    fn check(&mut self, message: &Message) -> Result<(), MessengerError> {
        match message.validate() {
            Ok(()) => Ok(()),
            Err(e) => Err(self.fail(e.into())),
        }
    }
}
