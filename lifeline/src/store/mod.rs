//! Durable key-value storage for messenger state.
//!
//! The messenger persists five independent records, one per [`StoreKey`].
//! Values are JSON strings produced by [`repository::StateRepository`].
//! Backends:
//! - [`memory::MemoryStore`]: shared in-memory map, with failure injection for tests
//! - [`file::FileStore`]: one JSON file per key under a data directory

pub mod file;
pub mod memory;
pub mod repository;

use std::fmt;

/// The records the messenger keeps across restarts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum StoreKey {
    /// The local user's registered name.
    Identity,
    /// Peers to reconnect to on startup.
    KnownPeers,
    /// Every conversation thread.
    ChatHistory,
    /// Messages waiting for a connection.
    OfflineQueue,
    /// The conversation currently in focus.
    ActivePeer,
}

impl StoreKey {
    /// Every key, in the order they are written.
    pub const ALL: [Self; 5] = [
        Self::Identity,
        Self::KnownPeers,
        Self::ChatHistory,
        Self::OfflineQueue,
        Self::ActivePeer,
    ];

    /// Stable name used by storage backends.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Identity => "identity",
            Self::KnownPeers => "known-peers",
            Self::ChatHistory => "chat-history",
            Self::OfflineQueue => "offline-queue",
            Self::ActivePeer => "active-peer",
        }
    }
}

impl fmt::Display for StoreKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Errors produced by storage backends and the repository.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// The backend cannot be used at all.
    #[error("storage unavailable: {0}")]
    Unavailable(String),

    /// Reading a record failed.
    #[error("failed to read {key}: {reason}")]
    ReadFailed {
        /// The record being read.
        key: StoreKey,
        /// Human-readable reason.
        reason: String,
    },

    /// Writing a record failed.
    #[error("failed to write {key}: {reason}")]
    WriteFailed {
        /// The record being written.
        key: StoreKey,
        /// Human-readable reason.
        reason: String,
    },

    /// A stored record could not be decoded.
    #[error("stored {key} is corrupt: {reason}")]
    Corrupt {
        /// The undecodable record.
        key: StoreKey,
        /// Human-readable reason.
        reason: String,
    },
}

/// Async key-value backend.
///
/// Backends store opaque strings; they never interpret values.
pub trait KeyValueStore: Send + Sync {
    /// Read the value under `key`, or `None` if nothing is stored.
    fn get(
        &self,
        key: StoreKey,
    ) -> impl std::future::Future<Output = Result<Option<String>, StoreError>> + Send;

    /// Replace the value under `key`.
    fn put(
        &self,
        key: StoreKey,
        value: String,
    ) -> impl std::future::Future<Output = Result<(), StoreError>> + Send;

    /// Remove the value under `key`. Removing a missing key is not an error.
    fn delete(&self, key: StoreKey) -> impl std::future::Future<Output = Result<(), StoreError>> + Send;
}
