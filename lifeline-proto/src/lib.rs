//! Shared protocol definitions for the Lifeline messenger.

pub mod codec;
pub mod directory;
pub mod message;
