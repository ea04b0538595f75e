//! Connection provider abstraction for Lifeline.
//!
//! Defines the [`ConnectionProvider`] trait the messenger is built on: a
//! primitive that registers a self-chosen name on a shared directory,
//! connects to other names, and carries opaque payloads over open links.
//! Concrete implementations include:
//! - [`loopback::LoopbackProvider`]: in-process shared directory for tests and the offline demo
//! - [`directory::DirectoryProvider`]: WebSocket client for `lifeline-directory`

pub mod directory;
pub mod loopback;

use std::fmt;

use serde::{Deserialize, Serialize};

/// Longest accepted peer name, in characters.
pub const MAX_NAME_LEN: usize = 64;

/// Name reserved for the local side of every conversation.
const RESERVED_NAME: &str = "me";

/// Error returned when a string is not a usable peer name.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum NameError {
    /// The name is empty after trimming.
    #[error("name is empty")]
    Empty,
    /// The name is longer than [`MAX_NAME_LEN`] characters.
    #[error("name is longer than {MAX_NAME_LEN} characters")]
    TooLong,
    /// The name contains control characters.
    #[error("name contains control characters")]
    ControlCharacters,
    /// The name is reserved for the local user.
    #[error("'{RESERVED_NAME}' is reserved")]
    Reserved,
}

/// The addressable handle of a peer: a self-assigned display name.
///
/// Names are trimmed on parse. `"me"` is reserved so that a history entry
/// tagged with a peer name can never be mistaken for a local one.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct PeerName(String);

impl PeerName {
    /// Parse and validate a peer name.
    ///
    /// # Errors
    ///
    /// Returns a [`NameError`] if the trimmed name is empty, too long,
    /// contains control characters, or is reserved.
    pub fn parse(raw: &str) -> Result<Self, NameError> {
        let name = raw.trim();
        if name.is_empty() {
            return Err(NameError::Empty);
        }
        if name.chars().count() > MAX_NAME_LEN {
            return Err(NameError::TooLong);
        }
        if name.chars().any(char::is_control) {
            return Err(NameError::ControlCharacters);
        }
        if name.eq_ignore_ascii_case(RESERVED_NAME) {
            return Err(NameError::Reserved);
        }
        Ok(Self(name.to_string()))
    }

    /// Return the string representation of this name.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl TryFrom<String> for PeerName {
    type Error = NameError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<PeerName> for String {
    fn from(name: PeerName) -> Self {
        name.0
    }
}

impl fmt::Display for PeerName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Describes which kind of provider is in use.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProviderKind {
    /// Remote directory server over WebSocket.
    Directory,
    /// In-process loopback directory.
    Loopback,
}

impl fmt::Display for ProviderKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Directory => write!(f, "Directory"),
            Self::Loopback => write!(f, "Loopback"),
        }
    }
}

/// Errors that can occur during provider operations.
#[derive(Debug, thiserror::Error)]
pub enum ProviderError {
    /// Another live session already holds the requested name.
    #[error("name '{0}' is already taken")]
    NameTaken(PeerName),

    /// The operation needs a registered name first.
    #[error("not registered with the directory")]
    NotRegistered,

    /// The peer is not registered or refused the link.
    #[error("peer {peer} is unreachable: {reason}")]
    Unreachable {
        /// The peer that could not be reached.
        peer: PeerName,
        /// Human-readable reason.
        reason: String,
    },

    /// There is no open link to the peer.
    #[error("no open connection to {0}")]
    NotConnected(PeerName),

    /// The connection to the directory has been closed.
    #[error("connection closed")]
    ConnectionClosed,

    /// The operation timed out before completing.
    #[error("provider operation timed out")]
    Timeout,

    /// The directory sent something this client did not expect.
    #[error("protocol error: {0}")]
    Protocol(String),

    /// An underlying I/O error occurred.
    #[error("provider I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Something the provider reports without being asked.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProviderEvent {
    /// A peer asked to open a link to us.
    Incoming {
        /// The requesting peer.
        peer: PeerName,
    },
    /// A payload arrived over an open link.
    Data {
        /// The peer the payload came from, as attested by the provider.
        peer: PeerName,
        /// Opaque payload bytes.
        payload: Vec<u8>,
    },
    /// A link we asked for opened after the request had already been
    /// given up on.
    Opened {
        /// The peer at the other end.
        peer: PeerName,
    },
    /// The link to a peer is gone.
    Closed {
        /// The peer that went away.
        peer: PeerName,
    },
    /// The registration itself is gone: the name is released and every
    /// link closed. Nothing works again until the name registers anew.
    Lost {
        /// Human-readable description.
        reason: String,
    },
    /// The provider reported an error, optionally tied to one peer.
    Error {
        /// The affected peer, if any.
        peer: Option<PeerName>,
        /// Human-readable description.
        reason: String,
    },
}

/// Async connection provider: named registration plus message-oriented links.
///
/// Implementations carry opaque byte slices between named peers. The
/// provider never inspects payloads; encoding happens in the messenger.
///
/// # Invariant
///
/// [`ConnectionProvider::send`] only succeeds across a link that is open on
/// both sides. Data is never buffered for a peer without an open link.
pub trait ConnectionProvider: Send + Sync {
    /// Claim `name` on the shared directory.
    ///
    /// Returns [`ProviderError::NameTaken`] if another session holds it.
    fn register(
        &self,
        name: &PeerName,
    ) -> impl std::future::Future<Output = Result<(), ProviderError>> + Send;

    /// Release the registered name and every open link.
    fn unregister(&self) -> impl std::future::Future<Output = ()> + Send;

    /// Open a link to `peer`. Resolves once the link is open or has failed.
    ///
    /// A request that fails by timing out is withdrawn. If the link opens
    /// anyway, it is reported as [`ProviderEvent::Opened`].
    fn connect(
        &self,
        peer: &PeerName,
    ) -> impl std::future::Future<Output = Result<(), ProviderError>> + Send;

    /// Accept an inbound link request previously reported as
    /// [`ProviderEvent::Incoming`].
    fn accept(
        &self,
        peer: &PeerName,
    ) -> impl std::future::Future<Output = Result<(), ProviderError>> + Send;

    /// Hand a payload to the open link for `peer`.
    ///
    /// Returns `Ok(())` once the payload is handed off. This does NOT
    /// guarantee the peer has processed it.
    fn send(
        &self,
        peer: &PeerName,
        payload: &[u8],
    ) -> impl std::future::Future<Output = Result<(), ProviderError>> + Send;

    /// Close the link to `peer`. Closing an unknown link is a no-op.
    fn close(&self, peer: &PeerName) -> impl std::future::Future<Output = ()> + Send;

    /// Wait for the next unsolicited event.
    ///
    /// Returns `None` once the provider can produce no more events.
    fn next_event(&self) -> impl std::future::Future<Output = Option<ProviderEvent>> + Send;

    /// Return the kind of this provider.
    fn kind(&self) -> ProviderKind;
}
