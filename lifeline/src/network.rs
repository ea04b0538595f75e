//! Network reachability and device position.
//!
//! The messenger asks a [`NetworkSignal`] two things: whether the device is
//! currently online, and where it is. Online/offline transitions are
//! published through a [`tokio::sync::watch`] channel so the runtime can
//! react to them.

use std::sync::Arc;
use std::time::Duration;

use lifeline_proto::message::Coordinates;
use tokio::sync::watch;

/// Why a position could not be obtained.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum LocationError {
    /// No position source is configured.
    #[error("no position available")]
    Unavailable,
    /// The position source produced out-of-range coordinates.
    #[error("position is out of range")]
    Invalid,
}

/// Source of the online flag and the device position.
pub trait NetworkSignal: Send + Sync {
    /// Whether the device currently considers itself online.
    fn is_online(&self) -> bool;

    /// Subscribe to online/offline transitions.
    fn subscribe(&self) -> watch::Receiver<bool>;

    /// Query the device position once.
    fn current_position(
        &self,
    ) -> impl std::future::Future<Output = Result<Coordinates, LocationError>> + Send;

    /// Force the online flag by hand. Returns `false` for signals that only
    /// follow the real network.
    fn set_override(&self, _online: bool) -> bool {
        false
    }
}

struct ManualInner {
    online: watch::Sender<bool>,
    position: parking_lot::Mutex<Option<Coordinates>>,
}

/// A signal driven by explicit calls. Cloning shares the same state.
///
/// Used by tests, the offline demo, and the TUI's `/online` and `/offline`
/// commands.
#[derive(Clone)]
pub struct ManualNetworkSignal {
    inner: Arc<ManualInner>,
}

impl ManualNetworkSignal {
    /// Create a signal with the given initial online state and no position.
    #[must_use]
    pub fn new(online: bool) -> Self {
        let (tx, _rx) = watch::channel(online);
        Self {
            inner: Arc::new(ManualInner {
                online: tx,
                position: parking_lot::Mutex::new(None),
            }),
        }
    }

    /// Set the position reported by [`NetworkSignal::current_position`].
    #[must_use]
    pub fn with_position(self, coords: Coordinates) -> Self {
        self.set_position(Some(coords));
        self
    }

    /// Flip the online flag, notifying subscribers if it changed.
    pub fn set_online(&self, online: bool) {
        self.inner.online.send_if_modified(|current| {
            if *current == online {
                false
            } else {
                *current = online;
                true
            }
        });
    }

    /// Replace the reported position.
    pub fn set_position(&self, coords: Option<Coordinates>) {
        *self.inner.position.lock() = coords;
    }
}

impl NetworkSignal for ManualNetworkSignal {
    fn is_online(&self) -> bool {
        *self.inner.online.borrow()
    }

    fn subscribe(&self) -> watch::Receiver<bool> {
        self.inner.online.subscribe()
    }

    fn set_override(&self, online: bool) -> bool {
        self.set_online(online);
        true
    }

    async fn current_position(&self) -> Result<Coordinates, LocationError> {
        let coords = (*self.inner.position.lock()).ok_or(LocationError::Unavailable)?;
        if coords.is_valid() {
            Ok(coords)
        } else {
            Err(LocationError::Invalid)
        }
    }
}

/// A signal that decides reachability by periodically opening a TCP
/// connection to a known `host:port`. The name is resolved on every check.
///
/// The checking task stops when the signal is dropped.
pub struct ReachabilityNetworkSignal {
    online: watch::Sender<bool>,
    position: Option<Coordinates>,
    task: tokio::task::JoinHandle<()>,
}

impl ReachabilityNetworkSignal {
    /// Start probing `target` every `interval`, giving each attempt
    /// `timeout` to succeed. The first check runs immediately.
    #[must_use]
    pub fn spawn(
        target: impl Into<String>,
        interval: Duration,
        timeout: Duration,
        position: Option<Coordinates>,
    ) -> Self {
        let target = target.into();
        let (online, _rx) = watch::channel(false);
        let publisher = online.clone();
        let task = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                let reachable = is_reachable(&target, timeout).await;
                let changed = publisher.send_if_modified(|current| {
                    let changed = *current != reachable;
                    *current = reachable;
                    changed
                });
                if changed {
                    tracing::info!(%target, online = reachable, "network reachability changed");
                }
            }
        });
        Self {
            online,
            position,
            task,
        }
    }
}

impl Drop for ReachabilityNetworkSignal {
    fn drop(&mut self) {
        self.task.abort();
    }
}

impl NetworkSignal for ReachabilityNetworkSignal {
    fn is_online(&self) -> bool {
        *self.online.borrow()
    }

    fn subscribe(&self) -> watch::Receiver<bool> {
        self.online.subscribe()
    }

    async fn current_position(&self) -> Result<Coordinates, LocationError> {
        let coords = self.position.ok_or(LocationError::Unavailable)?;
        if coords.is_valid() {
            Ok(coords)
        } else {
            Err(LocationError::Invalid)
        }
    }
}

async fn is_reachable(target: &str, timeout: Duration) -> bool {
    matches!(
        tokio::time::timeout(timeout, tokio::net::TcpStream::connect(target)).await,
        Ok(Ok(_))
    )
}
