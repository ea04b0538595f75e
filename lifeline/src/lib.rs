//! Lifeline: a peer-to-peer disaster messenger library.
//!
//! The [`messenger`] core sits on three injected collaborators: a
//! [`provider::ConnectionProvider`] for named links, a
//! [`store::KeyValueStore`] for durable state, and a
//! [`network::NetworkSignal`] for reachability and position.

pub mod app;
pub mod config;
pub mod messenger;
pub mod network;
pub mod provider;
pub mod runtime;
pub mod store;
pub mod ui;
