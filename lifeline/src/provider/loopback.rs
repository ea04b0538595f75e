//! Loopback provider for tests and the offline demo.
//!
//! A [`LoopbackDirectory`] plays the role of the shared directory service
//! in-process. Every [`LoopbackProvider`] created from it can register a
//! name, open links to other registered names, and exchange payloads over
//! those links through [`tokio::sync::mpsc`] channels.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use tokio::sync::{Mutex, mpsc};

use super::{ConnectionProvider, PeerName, ProviderError, ProviderEvent, ProviderKind};

/// Unordered pair of names with an open link between them.
type Link = (PeerName, PeerName);

fn link(a: &PeerName, b: &PeerName) -> Link {
    if a <= b {
        (a.clone(), b.clone())
    } else {
        (b.clone(), a.clone())
    }
}

#[derive(Default)]
struct DirectoryState {
    /// Registered names and the event channel of the endpoint holding each.
    endpoints: HashMap<PeerName, mpsc::UnboundedSender<ProviderEvent>>,
    /// Open links.
    links: HashSet<Link>,
}

impl DirectoryState {
    fn notify(&self, target: &PeerName, event: ProviderEvent) {
        if let Some(tx) = self.endpoints.get(target) {
            let _ = tx.send(event);
        }
    }

    /// Drop every link touching `name`, telling the other side. Returns
    /// the names `name` was linked to.
    fn drop_links_of(&mut self, name: &PeerName) -> Vec<PeerName> {
        let touching: Vec<Link> = self
            .links
            .iter()
            .filter(|(a, b)| a == name || b == name)
            .cloned()
            .collect();
        let mut others = Vec::with_capacity(touching.len());
        for pair in touching {
            self.links.remove(&pair);
            let other = if pair.0 == *name { pair.1 } else { pair.0 };
            self.notify(&other, ProviderEvent::Closed { peer: name.clone() });
            others.push(other);
        }
        others
    }

    /// Whether `name` is registered through the endpoint owning `tx`.
    fn held_by(&self, name: &PeerName, tx: &mpsc::UnboundedSender<ProviderEvent>) -> bool {
        self.endpoints
            .get(name)
            .is_some_and(|held| held.same_channel(tx))
    }

    /// Release `name` if the endpoint owning `tx` still holds it.
    fn release(&mut self, name: &PeerName, tx: &mpsc::UnboundedSender<ProviderEvent>) {
        if self.held_by(name, tx) {
            self.endpoints.remove(name);
            self.drop_links_of(name);
        }
    }
}

/// Shared in-process directory. Cloning yields another handle to the same
/// directory.
#[derive(Clone, Default)]
pub struct LoopbackDirectory {
    state: Arc<parking_lot::Mutex<DirectoryState>>,
}

impl LoopbackDirectory {
    /// Create an empty directory.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a provider endpoint attached to this directory.
    #[must_use]
    pub fn provider(&self) -> LoopbackProvider {
        let (tx, rx) = mpsc::unbounded_channel();
        LoopbackProvider {
            directory: self.clone(),
            name: parking_lot::Mutex::new(None),
            tx,
            rx: Mutex::new(rx),
        }
    }

    /// Whether `name` is currently registered.
    #[must_use]
    pub fn is_registered(&self, name: &PeerName) -> bool {
        self.state.lock().endpoints.contains_key(name)
    }

    /// Whether a link between `a` and `b` is open.
    #[must_use]
    pub fn is_linked(&self, a: &PeerName, b: &PeerName) -> bool {
        self.state.lock().links.contains(&link(a, b))
    }

    /// Drop `name`'s registration as if its session with the directory
    /// died.
    ///
    /// Linked peers receive [`ProviderEvent::Closed`]. The holder receives
    /// `Closed` for each of its links, then [`ProviderEvent::Lost`].
    pub fn evict(&self, name: &PeerName) {
        let mut state = self.state.lock();
        let Some(tx) = state.endpoints.remove(name) else {
            return;
        };
        for other in state.drop_links_of(name) {
            let _ = tx.send(ProviderEvent::Closed { peer: other });
        }
        let _ = tx.send(ProviderEvent::Lost {
            reason: "evicted from the directory".to_string(),
        });
        tracing::debug!(%name, "loopback name evicted");
    }

    /// Cut the link between `a` and `b` as if the path between them failed.
    ///
    /// Both sides receive [`ProviderEvent::Closed`].
    pub fn sever(&self, a: &PeerName, b: &PeerName) {
        let mut state = self.state.lock();
        if state.links.remove(&link(a, b)) {
            state.notify(a, ProviderEvent::Closed { peer: b.clone() });
            state.notify(b, ProviderEvent::Closed { peer: a.clone() });
        }
    }
}

/// One endpoint on a [`LoopbackDirectory`].
pub struct LoopbackProvider {
    directory: LoopbackDirectory,
    /// Name this endpoint registered, if any.
    name: parking_lot::Mutex<Option<PeerName>>,
    /// Sender half handed to the directory on registration.
    tx: mpsc::UnboundedSender<ProviderEvent>,
    /// Events addressed to this endpoint.
    rx: Mutex<mpsc::UnboundedReceiver<ProviderEvent>>,
}

impl LoopbackProvider {
    /// The name this endpoint holds, if the directory still agrees.
    fn local_name(&self, state: &DirectoryState) -> Result<PeerName, ProviderError> {
        self.name
            .lock()
            .clone()
            .filter(|name| state.held_by(name, &self.tx))
            .ok_or(ProviderError::NotRegistered)
    }
}

impl ConnectionProvider for LoopbackProvider {
    async fn register(&self, name: &PeerName) -> Result<(), ProviderError> {
        let mut state = self.directory.state.lock();
        if state.endpoints.contains_key(name) {
            return Err(ProviderError::NameTaken(name.clone()));
        }
        let previous = self.name.lock().replace(name.clone());
        if let Some(previous) = previous {
            state.release(&previous, &self.tx);
        }
        state.endpoints.insert(name.clone(), self.tx.clone());
        tracing::debug!(%name, "loopback name registered");
        Ok(())
    }

    async fn unregister(&self) {
        let Some(name) = self.name.lock().take() else {
            return;
        };
        self.directory.state.lock().release(&name, &self.tx);
        tracing::debug!(%name, "loopback name released");
    }

    async fn connect(&self, peer: &PeerName) -> Result<(), ProviderError> {
        let mut state = self.directory.state.lock();
        let me = self.local_name(&state)?;
        if *peer == me {
            return Err(ProviderError::Unreachable {
                peer: peer.clone(),
                reason: "cannot link to own name".to_string(),
            });
        }
        if !state.endpoints.contains_key(peer) {
            return Err(ProviderError::Unreachable {
                peer: peer.clone(),
                reason: "no such name".to_string(),
            });
        }
        if state.links.insert(link(&me, peer)) {
            state.notify(peer, ProviderEvent::Incoming { peer: me });
        }
        Ok(())
    }

    async fn accept(&self, peer: &PeerName) -> Result<(), ProviderError> {
        let state = self.directory.state.lock();
        let me = self.local_name(&state)?;
        if state.links.contains(&link(&me, peer)) {
            Ok(())
        } else {
            Err(ProviderError::NotConnected(peer.clone()))
        }
    }

    async fn send(&self, peer: &PeerName, payload: &[u8]) -> Result<(), ProviderError> {
        let state = self.directory.state.lock();
        let me = self.local_name(&state)?;
        if !state.links.contains(&link(&me, peer)) {
            return Err(ProviderError::NotConnected(peer.clone()));
        }
        let tx = state.endpoints.get(peer).ok_or(ProviderError::ConnectionClosed)?;
        tx.send(ProviderEvent::Data {
            peer: me,
            payload: payload.to_vec(),
        })
        .map_err(|_| ProviderError::ConnectionClosed)
    }

    async fn close(&self, peer: &PeerName) {
        let mut state = self.directory.state.lock();
        let Ok(me) = self.local_name(&state) else {
            return;
        };
        if state.links.remove(&link(&me, peer)) {
            state.notify(peer, ProviderEvent::Closed { peer: me });
        }
    }

    async fn next_event(&self) -> Option<ProviderEvent> {
        let mut rx = self.rx.lock().await;
        rx.recv().await
    }

    fn kind(&self) -> ProviderKind {
        ProviderKind::Loopback
    }
}

impl Drop for LoopbackProvider {
    fn drop(&mut self) {
        if let Some(name) = self.name.get_mut().take() {
            self.directory.state.lock().release(&name, &self.tx);
        }
    }
}
