//! WebSocket directory provider.
//!
//! Implements [`ConnectionProvider`] over a WebSocket connection to a
//! `lifeline-directory` server. The server holds the registered names,
//! brokers link requests, and forwards opaque payloads across open links.
//! It never inspects payloads and never stores them for absent peers.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use tokio::sync::{Mutex, mpsc, oneshot};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};

use lifeline_proto::directory::{self, DirectoryMessage};

use super::{ConnectionProvider, PeerName, ProviderError, ProviderEvent, ProviderKind};

/// Type alias for the write half of a WebSocket connection.
type WsSender = futures_util::stream::SplitSink<
    WebSocketStream<MaybeTlsStream<tokio::net::TcpStream>>,
    Message,
>;

/// Type alias for the read half of a WebSocket connection.
type WsReader =
    futures_util::stream::SplitStream<WebSocketStream<MaybeTlsStream<tokio::net::TcpStream>>>;

/// Default timeout for reaching the directory server.
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Default timeout for a registration or link request to be answered.
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(5);

/// Capacity of the event channel between the reader task and the messenger.
const EVENT_CHANNEL_CAPACITY: usize = 256;

type PendingLinks = HashMap<PeerName, oneshot::Sender<Result<(), ProviderError>>>;

/// State shared between the provider and its background reader task.
#[derive(Default)]
struct Shared {
    /// Link requests waiting for `Opened` or `ConnectFailed`.
    pending: parking_lot::Mutex<PendingLinks>,
    /// Peers with an open link.
    open: parking_lot::Mutex<HashSet<PeerName>>,
    /// Requests given up on locally. A late `Opened` for one is ignored.
    withdrawn: parking_lot::Mutex<HashSet<PeerName>>,
}

impl Shared {
    fn resolve(&self, peer: &PeerName, outcome: Result<(), ProviderError>) {
        if let Some(tx) = self.pending.lock().remove(peer) {
            let _ = tx.send(outcome);
        }
    }

    fn fail_all_pending(&self) {
        for (_, tx) in self.pending.lock().drain() {
            let _ = tx.send(Err(ProviderError::ConnectionClosed));
        }
    }
}

/// A live registration: the socket writer and the task reading from it.
struct Session {
    name: PeerName,
    sender: WsSender,
    reader: tokio::task::JoinHandle<()>,
}

/// WebSocket client for the directory server.
///
/// Nothing touches the network until [`ConnectionProvider::register`] is
/// called. Each registration opens a fresh WebSocket; unregistering closes
/// it, which releases the name on the server.
pub struct DirectoryProvider {
    url: String,
    connect_timeout: Duration,
    request_timeout: Duration,
    session: Mutex<Option<Session>>,
    shared: Arc<Shared>,
    events_tx: mpsc::Sender<ProviderEvent>,
    events: Mutex<mpsc::Receiver<ProviderEvent>>,
}

impl DirectoryProvider {
    /// Create a provider for the directory at `url` (`ws://` or `wss://`).
    pub fn new(url: impl Into<String>) -> Self {
        let (events_tx, events) = mpsc::channel(EVENT_CHANNEL_CAPACITY);
        Self {
            url: url.into(),
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
            session: Mutex::new(None),
            shared: Arc::new(Shared::default()),
            events_tx,
            events: Mutex::new(events),
        }
    }

    /// Override the timeout for reaching the server.
    #[must_use]
    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    /// Override the timeout for registration and link requests.
    #[must_use]
    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    /// Return the directory server URL.
    pub fn url(&self) -> &str {
        &self.url
    }

    /// Encode and send one message on the active session.
    async fn send_message(&self, msg: &DirectoryMessage) -> Result<(), ProviderError> {
        let bytes = directory::encode(msg).map_err(ProviderError::Protocol)?;
        let mut guard = self.session.lock().await;
        if guard.as_ref().is_some_and(|s| s.reader.is_finished()) {
            *guard = None;
            return Err(ProviderError::NotRegistered);
        }
        let Some(session) = guard.as_mut() else {
            return Err(ProviderError::NotRegistered);
        };
        session
            .sender
            .send(Message::Binary(bytes.into()))
            .await
            .map_err(|e| {
                tracing::warn!(err = %e, "directory send failed");
                ProviderError::ConnectionClosed
            })
    }

    /// Send `msg` and wait for the reader to resolve the link to `peer`.
    async fn request_link(
        &self,
        peer: &PeerName,
        msg: DirectoryMessage,
    ) -> Result<(), ProviderError> {
        if self.shared.open.lock().contains(peer) {
            return Ok(());
        }
        self.shared.withdrawn.lock().remove(peer);
        let (tx, rx) = oneshot::channel();
        self.shared.pending.lock().insert(peer.clone(), tx);

        if let Err(e) = self.send_message(&msg).await {
            self.shared.pending.lock().remove(peer);
            return Err(e);
        }

        match tokio::time::timeout(self.request_timeout, rx).await {
            Ok(Ok(outcome)) => outcome,
            Ok(Err(_)) => Err(ProviderError::ConnectionClosed),
            Err(_) => {
                tracing::warn!(%peer, "link request timed out");
                let unanswered = {
                    let mut pending = self.shared.pending.lock();
                    let unanswered = pending.remove(peer).is_some();
                    if unanswered {
                        self.shared.withdrawn.lock().insert(peer.clone());
                    }
                    unanswered
                };
                if unanswered {
                    self.withdraw(peer).await;
                }
                Err(ProviderError::Timeout)
            }
        }
    }

    /// Take back an unanswered link request on the server, so a late
    /// answer cannot open a link nobody tracks.
    async fn withdraw(&self, peer: &PeerName) {
        let msg = DirectoryMessage::Close {
            peer: peer.as_str().to_string(),
        };
        if let Err(e) = self.send_message(&msg).await {
            tracing::debug!(%peer, err = %e, "withdrawal not delivered to directory");
        }
    }

    /// Open the WebSocket and perform the `Register` handshake.
    async fn handshake(&self, name: &PeerName) -> Result<(WsSender, WsReader), ProviderError> {
        let (ws_stream, _response) =
            tokio::time::timeout(self.connect_timeout, connect_async(self.url.as_str()))
                .await
                .map_err(|_| {
                    tracing::warn!(url = %self.url, "directory connect timed out");
                    ProviderError::Timeout
                })?
                .map_err(|e| {
                    tracing::warn!(url = %self.url, err = %e, "directory connect failed");
                    map_ws_connect_error(e)
                })?;

        let (mut ws_sender, mut ws_reader) = ws_stream.split();

        let register = DirectoryMessage::Register {
            name: name.as_str().to_string(),
        };
        let bytes = directory::encode(&register).map_err(ProviderError::Protocol)?;
        ws_sender
            .send(Message::Binary(bytes.into()))
            .await
            .map_err(|e| {
                tracing::warn!(err = %e, "failed to send Register");
                ProviderError::ConnectionClosed
            })?;

        let reply = tokio::time::timeout(self.request_timeout, ws_reader.next())
            .await
            .map_err(|_| {
                tracing::warn!(url = %self.url, "registration reply timed out");
                ProviderError::Timeout
            })?;

        match reply {
            Some(Ok(Message::Binary(data))) => match directory::decode(&data) {
                Ok(DirectoryMessage::Registered { .. }) => Ok((ws_sender, ws_reader)),
                Ok(DirectoryMessage::NameTaken { .. }) => {
                    tracing::info!(%name, "directory refused name");
                    Err(ProviderError::NameTaken(name.clone()))
                }
                Ok(DirectoryMessage::Error { reason }) => Err(ProviderError::Protocol(reason)),
                Ok(other) => {
                    tracing::warn!(?other, "unexpected reply during registration");
                    Err(ProviderError::Protocol(
                        "unexpected reply during registration".to_string(),
                    ))
                }
                Err(e) => Err(ProviderError::Protocol(e)),
            },
            Some(Ok(Message::Close(_))) | None => Err(ProviderError::ConnectionClosed),
            Some(Ok(_)) => Err(ProviderError::Protocol(
                "unexpected non-binary frame during registration".to_string(),
            )),
            Some(Err(e)) => Err(ProviderError::Io(std::io::Error::other(format!(
                "WebSocket error during registration: {e}"
            )))),
        }
    }
}

impl ConnectionProvider for DirectoryProvider {
    async fn register(&self, name: &PeerName) -> Result<(), ProviderError> {
        self.unregister().await;

        let (sender, reader) = self.handshake(name).await?;
        tracing::info!(%name, url = %self.url, "registered with directory");

        let reader = tokio::spawn(reader_loop(
            reader,
            self.events_tx.clone(),
            Arc::clone(&self.shared),
        ));
        *self.session.lock().await = Some(Session {
            name: name.clone(),
            sender,
            reader,
        });
        Ok(())
    }

    async fn unregister(&self) {
        let Some(mut session) = self.session.lock().await.take() else {
            return;
        };
        session.reader.abort();
        let _ = session.sender.send(Message::Close(None)).await;
        self.shared.open.lock().clear();
        self.shared.withdrawn.lock().clear();
        self.shared.fail_all_pending();
        tracing::info!(name = %session.name, "released directory name");
    }

    async fn connect(&self, peer: &PeerName) -> Result<(), ProviderError> {
        let msg = DirectoryMessage::Connect {
            to: peer.as_str().to_string(),
        };
        self.request_link(peer, msg).await
    }

    async fn accept(&self, peer: &PeerName) -> Result<(), ProviderError> {
        let msg = DirectoryMessage::Accept {
            from: peer.as_str().to_string(),
        };
        self.request_link(peer, msg).await
    }

    async fn send(&self, peer: &PeerName, payload: &[u8]) -> Result<(), ProviderError> {
        if !self.shared.open.lock().contains(peer) {
            return Err(ProviderError::NotConnected(peer.clone()));
        }
        let msg = DirectoryMessage::Data {
            peer: peer.as_str().to_string(),
            payload: payload.to_vec(),
        };
        self.send_message(&msg).await
    }

    async fn close(&self, peer: &PeerName) {
        if !self.shared.open.lock().remove(peer) {
            return;
        }
        let msg = DirectoryMessage::Close {
            peer: peer.as_str().to_string(),
        };
        if let Err(e) = self.send_message(&msg).await {
            tracing::debug!(%peer, err = %e, "close not delivered to directory");
        }
    }

    async fn next_event(&self) -> Option<ProviderEvent> {
        let mut rx = self.events.lock().await;
        rx.recv().await
    }

    fn kind(&self) -> ProviderKind {
        ProviderKind::Directory
    }
}

impl Drop for DirectoryProvider {
    fn drop(&mut self) {
        if let Some(session) = self.session.get_mut().take() {
            session.reader.abort();
        }
    }
}

/// Parse a name the server sent, logging anything unusable.
fn server_name(raw: &str) -> Option<PeerName> {
    match PeerName::parse(raw) {
        Ok(name) => Some(name),
        Err(e) => {
            tracing::warn!(name = raw, err = %e, "directory sent an invalid peer name");
            None
        }
    }
}

/// Background task that reads directory frames and dispatches them.
///
/// Link outcomes resolve pending requests; everything else becomes a
/// [`ProviderEvent`]. Malformed frames are logged and skipped. When the
/// socket ends on its own, every open link is reported closed and then the
/// registration is reported [lost](ProviderEvent::Lost). An aborted reader
/// reports nothing.
async fn reader_loop(
    mut ws_reader: WsReader,
    tx: mpsc::Sender<ProviderEvent>,
    shared: Arc<Shared>,
) {
    let reason = loop {
        let data = match ws_reader.next().await {
            Some(Ok(Message::Binary(data))) => data,
            Some(Ok(Message::Close(_))) => break "directory closed the connection".to_string(),
            Some(Ok(_)) => continue,
            Some(Err(e)) => break format!("directory read error: {e}"),
            None => break "directory connection ended".to_string(),
        };

        let event = match directory::decode(&data) {
            Ok(DirectoryMessage::Opened { peer }) => {
                server_name(&peer).and_then(|peer| opened(&shared, peer))
            }
            Ok(DirectoryMessage::ConnectFailed { peer, reason }) => {
                if let Some(peer) = server_name(&peer) {
                    shared.resolve(
                        &peer.clone(),
                        Err(ProviderError::Unreachable { peer, reason }),
                    );
                }
                None
            }
            Ok(DirectoryMessage::Incoming { from }) => {
                server_name(&from).map(|peer| ProviderEvent::Incoming { peer })
            }
            Ok(DirectoryMessage::Data { peer, payload }) => {
                server_name(&peer).map(|peer| ProviderEvent::Data { peer, payload })
            }
            Ok(DirectoryMessage::Closed { peer }) => server_name(&peer).map(|peer| {
                shared.open.lock().remove(&peer);
                shared.resolve(
                    &peer,
                    Err(ProviderError::Unreachable {
                        peer: peer.clone(),
                        reason: "link closed".to_string(),
                    }),
                );
                ProviderEvent::Closed { peer }
            }),
            Ok(DirectoryMessage::Error { reason }) => {
                tracing::warn!(%reason, "directory reported an error");
                Some(ProviderEvent::Error { peer: None, reason })
            }
            Ok(other) => {
                tracing::debug!(?other, "unexpected directory message");
                None
            }
            Err(e) => {
                tracing::warn!(err = %e, "malformed directory frame, skipping");
                None
            }
        };

        if let Some(event) = event
            && tx.send(event).await.is_err()
        {
            shared.fail_all_pending();
            return;
        }
    };

    tracing::warn!(%reason, "directory session lost");
    shared.fail_all_pending();
    shared.withdrawn.lock().clear();
    let lost: Vec<PeerName> = shared.open.lock().drain().collect();
    for peer in lost {
        let _ = tx.send(ProviderEvent::Closed { peer }).await;
    }
    let _ = tx.send(ProviderEvent::Lost { reason }).await;
}

/// Record an open link. Returns an event only when nobody is waiting for
/// it any more.
fn opened(shared: &Shared, peer: PeerName) -> Option<ProviderEvent> {
    let mut pending = shared.pending.lock();
    if shared.withdrawn.lock().remove(&peer) {
        tracing::debug!(%peer, "ignoring link to a withdrawn request");
        return None;
    }
    shared.open.lock().insert(peer.clone());
    if pending
        .remove(&peer)
        .is_some_and(|tx| tx.send(Ok(())).is_ok())
    {
        None
    } else {
        tracing::info!(%peer, "link opened after its request timed out");
        Some(ProviderEvent::Opened { peer })
    }
}

/// Map a `tokio_tungstenite` connection error to a [`ProviderError`].
fn map_ws_connect_error(err: tokio_tungstenite::tungstenite::Error) -> ProviderError {
    use tokio_tungstenite::tungstenite::Error as WsError;
    match err {
        WsError::Io(io_err) => ProviderError::Io(io_err),
        WsError::Http(response) => ProviderError::Protocol(format!(
            "directory HTTP error: status {}",
            response.status()
        )),
        other => ProviderError::Io(std::io::Error::other(format!(
            "directory connection error: {other}"
        ))),
    }
}
