//! Lifeline directory server library.
//!
//! Exposes the directory server for use in tests and embedding. The server
//! registers names, brokers links between them, and forwards opaque
//! payloads across open links.

pub mod config;
pub mod directory;
