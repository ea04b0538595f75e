//! Typed access to the persisted messenger state.
//!
//! [`StateRepository`] maps [`PersistedState`] onto the five [`StoreKey`]
//! records as JSON. A save always writes every record, so a save that
//! follows a failed one brings the store fully up to date.

use std::collections::BTreeSet;

use serde::Serialize;
use serde::de::DeserializeOwned;

use super::{KeyValueStore, StoreError, StoreKey};
use crate::messenger::history::ConversationHistory;
use crate::messenger::queue::OfflineQueue;
use crate::provider::PeerName;

/// Everything the messenger keeps across restarts.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PersistedState {
    /// The last name that registered successfully.
    pub identity: Option<PeerName>,
    /// Peers to reconnect to on startup.
    pub known_peers: BTreeSet<PeerName>,
    /// All conversation threads.
    pub history: ConversationHistory,
    /// Messages waiting for a connection.
    pub queue: OfflineQueue,
    /// The conversation in focus.
    pub active_peer: Option<PeerName>,
}

/// Reads and writes [`PersistedState`] through a [`KeyValueStore`].
pub struct StateRepository<S> {
    store: S,
}

impl<S: KeyValueStore> StateRepository<S> {
    /// Wrap a backend.
    pub const fn new(store: S) -> Self {
        Self { store }
    }

    /// Load every record. Missing records load as empty.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::ReadFailed`] if the backend fails and
    /// [`StoreError::Corrupt`] if a record does not decode.
    pub async fn load(&self) -> Result<PersistedState, StoreError> {
        Ok(PersistedState {
            identity: self.read(StoreKey::Identity).await?,
            known_peers: self.read(StoreKey::KnownPeers).await?.unwrap_or_default(),
            history: self.read(StoreKey::ChatHistory).await?.unwrap_or_default(),
            queue: self.read(StoreKey::OfflineQueue).await?.unwrap_or_default(),
            active_peer: self.read(StoreKey::ActivePeer).await?,
        })
    }

    /// Write every record. Absent optional records are deleted.
    ///
    /// # Errors
    ///
    /// Returns the first backend or encoding error. Records written before
    /// the failure keep their new values.
    pub async fn save(&self, state: &PersistedState) -> Result<(), StoreError> {
        self.write_optional(StoreKey::Identity, state.identity.as_ref())
            .await?;
        self.write(StoreKey::KnownPeers, &state.known_peers).await?;
        self.write(StoreKey::ChatHistory, &state.history).await?;
        self.write(StoreKey::OfflineQueue, &state.queue).await?;
        self.write_optional(StoreKey::ActivePeer, state.active_peer.as_ref())
            .await
    }

    async fn read<T: DeserializeOwned>(&self, key: StoreKey) -> Result<Option<T>, StoreError> {
        let Some(raw) = self.store.get(key).await? else {
            return Ok(None);
        };
        serde_json::from_str(&raw)
            .map(Some)
            .map_err(|e| StoreError::Corrupt {
                key,
                reason: e.to_string(),
            })
    }

    async fn write<T: Serialize + Sync>(&self, key: StoreKey, value: &T) -> Result<(), StoreError> {
        let json = serde_json::to_string(value).map_err(|e| StoreError::WriteFailed {
            key,
            reason: e.to_string(),
        })?;
        self.store.put(key, json).await
    }

    async fn write_optional<T: Serialize + Sync>(
        &self,
        key: StoreKey,
        value: Option<&T>,
    ) -> Result<(), StoreError> {
        match value {
            Some(value) => self.write(key, value).await,
            None => self.store.delete(key).await,
        }
    }
}
