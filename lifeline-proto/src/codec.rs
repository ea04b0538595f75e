//! Serialization and deserialization of [`PeerPayload`]s.
//!
//! Peer payloads travel as postcard bytes. Connection providers treat the
//! bytes as opaque; only the messenger encodes and decodes them.

use crate::message::PeerPayload;

/// Error type for codec encode/decode operations.
#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    /// Serialization or deserialization failed.
    #[error("serialization error: {0}")]
    Serialization(String),
}

/// Encodes a [`PeerPayload`] into a byte vector using postcard.
///
/// # Errors
///
/// Returns `CodecError::Serialization` if the payload cannot be serialized.
pub fn encode(payload: &PeerPayload) -> Result<Vec<u8>, CodecError> {
    postcard::to_allocvec(payload).map_err(|e| CodecError::Serialization(e.to_string()))
}

/// Decodes a [`PeerPayload`] from a byte slice using postcard.
///
/// # Errors
///
/// Returns `CodecError::Serialization` if the bytes cannot be deserialized.
pub fn decode(bytes: &[u8]) -> Result<PeerPayload, CodecError> {
    postcard::from_bytes(bytes).map_err(|e| CodecError::Serialization(e.to_string()))
}
