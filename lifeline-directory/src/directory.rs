//! Directory server core: name registry, link broker, and payload forwarding.
//!
//! Each WebSocket session claims one name. A session asks for a link to
//! another name with `Connect`; the target answers with `Accept`, after
//! which both ends receive `Opened` and may exchange `Data`. Payloads are
//! forwarded only across open links and are never stored.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use axum::extract::ws::{Message, WebSocket};
use futures_util::{SinkExt, StreamExt};
use lifeline_proto::directory::{self, DirectoryMessage};
use tokio::sync::{RwLock, mpsc};

/// Default maximum allowed payload size in bytes (64 KB).
pub const DEFAULT_MAX_PAYLOAD_SIZE: usize = 64 * 1024;

/// An undirected link, stored with the names in sorted order.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct Link(String, String);

impl Link {
    fn new(a: &str, b: &str) -> Self {
        if a <= b {
            Self(a.to_string(), b.to_string())
        } else {
            Self(b.to_string(), a.to_string())
        }
    }

    fn other(&self, name: &str) -> Option<&str> {
        if self.0 == name {
            Some(&self.1)
        } else if self.1 == name {
            Some(&self.0)
        } else {
            None
        }
    }
}

/// What a released name leaves behind.
#[derive(Debug, Default)]
struct Released {
    /// Peers that had an open link with the released name.
    linked: Vec<String>,
    /// Peers still waiting for the released name to accept them.
    waiting: Vec<String>,
}

/// Registry state behind one lock, so release and link changes are atomic.
#[derive(Default)]
struct Registry {
    /// Live sessions by name.
    sessions: HashMap<String, mpsc::UnboundedSender<Message>>,
    /// Open links.
    links: HashSet<Link>,
    /// Link requests awaiting `Accept`, as `(requester, target)`.
    pending: HashSet<(String, String)>,
}

/// Shared directory server state.
pub struct DirectoryState {
    registry: RwLock<Registry>,
    /// Maximum allowed payload size in bytes.
    max_payload_size: usize,
}

impl Default for DirectoryState {
    fn default() -> Self {
        Self::new()
    }
}

impl DirectoryState {
    /// Creates an empty directory with the default payload limit.
    #[must_use]
    pub fn new() -> Self {
        Self::with_max_payload_size(DEFAULT_MAX_PAYLOAD_SIZE)
    }

    /// Creates an empty directory with a custom payload limit.
    #[must_use]
    pub fn with_max_payload_size(max_payload_size: usize) -> Self {
        Self {
            registry: RwLock::new(Registry::default()),
            max_payload_size,
        }
    }

    /// Claims `name` for a session. Returns `false` if a live session
    /// already holds it.
    async fn try_register(&self, name: &str, sender: mpsc::UnboundedSender<Message>) -> bool {
        let mut registry = self.registry.write().await;
        if registry.sessions.contains_key(name) {
            return false;
        }
        registry.sessions.insert(name.to_string(), sender);
        true
    }

    /// Releases `name` and every link and request involving it.
    async fn release(&self, name: &str) -> Released {
        let mut registry = self.registry.write().await;
        registry.sessions.remove(name);

        let mut released = Released::default();
        registry.links.retain(|link| match link.other(name) {
            Some(other) => {
                released.linked.push(other.to_string());
                false
            }
            None => true,
        });
        registry.pending.retain(|(requester, target)| {
            if target == name {
                released.waiting.push(requester.clone());
                false
            } else {
                requester != name
            }
        });
        released
    }

    /// Whether a live session holds `name`.
    pub async fn is_registered(&self, name: &str) -> bool {
        self.registry.read().await.sessions.contains_key(name)
    }

    /// Whether `a` and `b` have an open link.
    pub async fn is_linked(&self, a: &str, b: &str) -> bool {
        self.registry.read().await.links.contains(&Link::new(a, b))
    }

    /// Whether `requester` has an unanswered link request to `target`.
    pub async fn is_pending(&self, requester: &str, target: &str) -> bool {
        self.registry
            .read()
            .await
            .pending
            .contains(&(requester.to_string(), target.to_string()))
    }

    async fn sender_of(&self, name: &str) -> Option<mpsc::UnboundedSender<Message>> {
        self.registry.read().await.sessions.get(name).cloned()
    }

    /// Encodes `msg` and queues it for `name`'s writer task.
    async fn send_to(&self, name: &str, msg: &DirectoryMessage) {
        let Some(sender) = self.sender_of(name).await else {
            tracing::debug!(peer = %name, "no session to notify");
            return;
        };
        match directory::encode(msg) {
            Ok(bytes) => {
                let _ = sender.send(Message::Binary(bytes.into()));
            }
            Err(e) => tracing::error!(error = %e, "failed to encode directory message"),
        }
    }

    async fn handle_connect(&self, from: &str, to: &str) {
        let outcome = {
            let mut registry = self.registry.write().await;
            if from == to {
                Err("cannot connect to yourself")
            } else if !registry.sessions.contains_key(to) {
                Err("no such name")
            } else if registry.links.contains(&Link::new(from, to)) {
                Ok(false)
            } else {
                registry.pending.insert((from.to_string(), to.to_string()));
                Ok(true)
            }
        };

        match outcome {
            Ok(true) => {
                tracing::info!(from = %from, to = %to, "link requested");
                let incoming = DirectoryMessage::Incoming {
                    from: from.to_string(),
                };
                self.send_to(to, &incoming).await;
            }
            Ok(false) => {
                let opened = DirectoryMessage::Opened {
                    peer: to.to_string(),
                };
                self.send_to(from, &opened).await;
            }
            Err(reason) => {
                tracing::info!(from = %from, to = %to, reason, "link request refused");
                let failed = DirectoryMessage::ConnectFailed {
                    peer: to.to_string(),
                    reason: reason.to_string(),
                };
                self.send_to(from, &failed).await;
            }
        }
    }

    async fn handle_accept(&self, me: &str, requester: &str) {
        let opened = {
            let mut registry = self.registry.write().await;
            let key = (requester.to_string(), me.to_string());
            let link = Link::new(me, requester);
            if registry.links.contains(&link) {
                true
            } else if registry.pending.remove(&key) && registry.sessions.contains_key(requester) {
                registry.links.insert(link);
                true
            } else {
                false
            }
        };

        if opened {
            tracing::info!(a = %requester, b = %me, "link opened");
            let to_requester = DirectoryMessage::Opened {
                peer: me.to_string(),
            };
            let to_me = DirectoryMessage::Opened {
                peer: requester.to_string(),
            };
            self.send_to(me, &to_me).await;
            self.send_to(requester, &to_requester).await;
        } else {
            let failed = DirectoryMessage::ConnectFailed {
                peer: requester.to_string(),
                reason: "no pending request".to_string(),
            };
            self.send_to(me, &failed).await;
        }
    }

    async fn handle_data(&self, from: &str, to: &str, payload: Vec<u8>) {
        if payload.len() > self.max_payload_size {
            tracing::warn!(
                peer = %from,
                size = payload.len(),
                max = self.max_payload_size,
                "payload exceeds size limit"
            );
            let err = DirectoryMessage::Error {
                reason: format!(
                    "payload too large: {} bytes (max {})",
                    payload.len(),
                    self.max_payload_size
                ),
            };
            self.send_to(from, &err).await;
            return;
        }

        if !self.is_linked(from, to).await {
            tracing::debug!(from = %from, to = %to, "data without an open link");
            let err = DirectoryMessage::Error {
                reason: format!("no open link to {to}"),
            };
            self.send_to(from, &err).await;
            return;
        }

        // The recipient sees the registered sender name, whatever the
        // client claimed.
        let forwarded = DirectoryMessage::Data {
            peer: from.to_string(),
            payload,
        };
        tracing::debug!(from = %from, to = %to, "forwarding payload");
        self.send_to(to, &forwarded).await;
    }

    /// `Close` ends an open link, declines a request `peer` made, or
    /// withdraws one `me` made. A withdrawal is silent; a later `Accept`
    /// of it fails with "no pending request".
    async fn handle_close(&self, me: &str, peer: &str) {
        let (was_linked, was_waiting) = {
            let mut registry = self.registry.write().await;
            let linked = registry.links.remove(&Link::new(me, peer));
            let waiting = registry
                .pending
                .remove(&(peer.to_string(), me.to_string()));
            if registry
                .pending
                .remove(&(me.to_string(), peer.to_string()))
            {
                tracing::info!(from = %me, to = %peer, "link request withdrawn");
            }
            (linked, waiting)
        };

        if was_linked {
            tracing::info!(a = %me, b = %peer, "link closed");
            let closed = DirectoryMessage::Closed {
                peer: me.to_string(),
            };
            self.send_to(peer, &closed).await;
        } else if was_waiting {
            let declined = DirectoryMessage::ConnectFailed {
                peer: me.to_string(),
                reason: "request declined".to_string(),
            };
            self.send_to(peer, &declined).await;
        }
    }
}

/// Handles an upgraded WebSocket connection for one session.
///
/// The session lifecycle:
/// 1. Wait for a `Register` message; refuse empty or taken names.
/// 2. Claim the name and send `Registered` back.
/// 3. Serve link and data requests until the socket ends.
/// 4. Release the name and tell every linked peer the link is gone.
pub async fn handle_socket(socket: WebSocket, state: Arc<DirectoryState>) {
    let (mut ws_sender, mut ws_receiver) = socket.split();

    let Some(name) = wait_for_register(&mut ws_receiver).await else {
        tracing::warn!("connection closed before registration");
        return;
    };

    if name.trim().is_empty() {
        tracing::warn!("received Register with empty name");
        let err = DirectoryMessage::Error {
            reason: "name must not be empty".to_string(),
        };
        let _ = send_directory_msg(&mut ws_sender, &err).await;
        let _ = ws_sender.send(Message::Close(None)).await;
        return;
    }

    let (tx, mut rx) = mpsc::unbounded_channel::<Message>();
    if !state.try_register(&name, tx).await {
        tracing::info!(name = %name, "name already held by a live session");
        let taken = DirectoryMessage::NameTaken { name };
        let _ = send_directory_msg(&mut ws_sender, &taken).await;
        let _ = ws_sender.send(Message::Close(None)).await;
        return;
    }

    let ack = DirectoryMessage::Registered { name: name.clone() };
    if let Err(e) = send_directory_msg(&mut ws_sender, &ack).await {
        tracing::error!(name = %name, error = %e, "failed to send Registered ack");
        state.release(&name).await;
        return;
    }
    tracing::info!(name = %name, "name registered");

    let writer_name = name.clone();
    let mut write_task = tokio::spawn(async move {
        while let Some(msg) = rx.recv().await {
            if ws_sender.send(msg).await.is_err() {
                tracing::warn!(name = %writer_name, "WebSocket write failed");
                break;
            }
        }
    });

    let reader_name = name.clone();
    let reader_state = Arc::clone(&state);
    let mut read_task = tokio::spawn(async move {
        while let Some(Ok(msg)) = ws_receiver.next().await {
            match msg {
                Message::Binary(data) => {
                    handle_binary_message(&reader_name, &data, &reader_state).await;
                }
                Message::Close(_) => {
                    tracing::info!(name = %reader_name, "received close frame");
                    break;
                }
                _ => {}
            }
        }
    });

    tokio::select! {
        _ = &mut read_task => write_task.abort(),
        _ = &mut write_task => read_task.abort(),
    }

    let released = state.release(&name).await;
    for peer in &released.linked {
        let closed = DirectoryMessage::Closed { peer: name.clone() };
        state.send_to(peer, &closed).await;
    }
    for peer in &released.waiting {
        let failed = DirectoryMessage::ConnectFailed {
            peer: name.clone(),
            reason: "peer went away".to_string(),
        };
        state.send_to(peer, &failed).await;
    }
    tracing::info!(
        name = %name,
        links = released.linked.len(),
        "session ended and name released"
    );
}

/// Waits for the first binary frame, expecting a `Register` message.
async fn wait_for_register(
    receiver: &mut (impl StreamExt<Item = Result<Message, axum::Error>> + Unpin),
) -> Option<String> {
    while let Some(Ok(msg)) = receiver.next().await {
        match msg {
            Message::Binary(data) => {
                return match directory::decode(&data) {
                    Ok(DirectoryMessage::Register { name }) => Some(name),
                    Ok(other) => {
                        tracing::warn!(msg = ?other, "expected Register, got different message");
                        None
                    }
                    Err(e) => {
                        tracing::warn!(error = %e, "failed to decode registration message");
                        None
                    }
                };
            }
            Message::Close(_) => return None,
            _ => {}
        }
    }
    None
}

/// Handles a binary WebSocket message from a registered session.
async fn handle_binary_message(name: &str, data: &[u8], state: &DirectoryState) {
    let msg = match directory::decode(data) {
        Ok(m) => m,
        Err(e) => {
            tracing::warn!(name = %name, error = %e, "failed to decode message");
            return;
        }
    };

    match msg {
        DirectoryMessage::Connect { to } => state.handle_connect(name, &to).await,
        DirectoryMessage::Accept { from } => state.handle_accept(name, &from).await,
        DirectoryMessage::Data { peer, payload } => state.handle_data(name, &peer, payload).await,
        DirectoryMessage::Close { peer } => state.handle_close(name, &peer).await,
        DirectoryMessage::Register { name: new_name } => {
            tracing::warn!(name = %name, new_name = %new_name, "duplicate Register on a live session");
        }
        other => {
            tracing::warn!(name = %name, msg = ?other, "unexpected message type from client");
        }
    }
}

/// Encodes and sends a directory message directly on a WebSocket sender.
async fn send_directory_msg(
    ws_sender: &mut (impl SinkExt<Message, Error = axum::Error> + Unpin),
    msg: &DirectoryMessage,
) -> Result<(), String> {
    let bytes = directory::encode(msg)?;
    ws_sender
        .send(Message::Binary(bytes.into()))
        .await
        .map_err(|e| format!("WebSocket send error: {e}"))
}

/// Starts the directory server on the given address and returns the bound
/// address and a join handle.
///
/// # Errors
///
/// Returns an error if the TCP listener cannot bind to the given address.
pub async fn start_server(
    addr: &str,
) -> Result<
    (std::net::SocketAddr, tokio::task::JoinHandle<()>),
    Box<dyn std::error::Error + Send + Sync>,
> {
    start_server_with_state(addr, Arc::new(DirectoryState::new())).await
}

/// Starts the directory server with a pre-configured [`DirectoryState`].
///
/// # Errors
///
/// Returns an error if the TCP listener cannot bind to the given address.
pub async fn start_server_with_state(
    addr: &str,
    state: Arc<DirectoryState>,
) -> Result<
    (std::net::SocketAddr, tokio::task::JoinHandle<()>),
    Box<dyn std::error::Error + Send + Sync>,
> {
    let app = axum::Router::new()
        .route("/ws", axum::routing::get(ws_handler))
        .with_state(state);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    let bound_addr = listener.local_addr()?;

    let handle = tokio::spawn(async move {
        if let Err(e) = axum::serve(listener, app).await {
            tracing::error!(error = %e, "directory server error");
        }
    });

    Ok((bound_addr, handle))
}

async fn ws_handler(
    ws: axum::extract::ws::WebSocketUpgrade,
    axum::extract::State(state): axum::extract::State<Arc<DirectoryState>>,
) -> impl axum::response::IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}
