//! Directory wire protocol between Lifeline clients and the directory server.
//!
//! Defines the [`DirectoryMessage`] enum that is postcard-encoded and sent
//! over WebSocket binary frames. The directory holds the set of registered
//! names, brokers connection requests between them, and forwards opaque
//! payloads across open links. It never inspects payload contents.

use serde::{Deserialize, Serialize};

/// Messages exchanged between directory clients and the directory server.
///
/// A client registers a name first; every other message is routed by name.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum DirectoryMessage {
    /// Client claims a name. Must be the first message on a connection.
    Register {
        /// The requested name.
        name: String,
    },

    /// Server confirms the name now belongs to this connection.
    Registered {
        /// The registered name (echoed back for confirmation).
        name: String,
    },

    /// Server refuses a name that a live session already holds.
    NameTaken {
        /// The refused name.
        name: String,
    },

    /// Client asks to open a link to another registered name.
    Connect {
        /// Name of the peer to reach.
        to: String,
    },

    /// Server tells a client that `from` wants to open a link.
    Incoming {
        /// Name of the requesting peer.
        from: String,
    },

    /// Client accepts an inbound link request.
    Accept {
        /// Name of the requesting peer.
        from: String,
    },

    /// Server reports that the link to `peer` is open on both sides.
    Opened {
        /// The peer at the other end of the link.
        peer: String,
    },

    /// Server reports that a `Connect` could not be completed.
    ConnectFailed {
        /// The peer that could not be reached.
        peer: String,
        /// Human-readable reason.
        reason: String,
    },

    /// An opaque payload.
    ///
    /// From a client, `peer` is the recipient. From the server, `peer` is the
    /// sender, overwritten with the sender's registered name.
    Data {
        /// Recipient (client to server) or sender (server to client).
        peer: String,
        /// Opaque payload bytes.
        payload: Vec<u8>,
    },

    /// Client closes its link to `peer`.
    Close {
        /// The peer to disconnect from.
        peer: String,
    },

    /// Server reports that the link to `peer` is gone.
    Closed {
        /// The peer that went away.
        peer: String,
    },

    /// Server reports an error condition.
    Error {
        /// Human-readable error description.
        reason: String,
    },
}

/// Encodes a [`DirectoryMessage`] into bytes using postcard.
///
/// # Errors
///
/// Returns a description of the failure if serialization fails.
pub fn encode(msg: &DirectoryMessage) -> Result<Vec<u8>, String> {
    postcard::to_allocvec(msg).map_err(|e| format!("directory encode error: {e}"))
}

/// Decodes a [`DirectoryMessage`] from bytes using postcard.
///
/// # Errors
///
/// Returns a description of the failure if the bytes are not a valid message.
pub fn decode(bytes: &[u8]) -> Result<DirectoryMessage, String> {
    postcard::from_bytes(bytes).map_err(|e| format!("directory decode error: {e}"))
}
