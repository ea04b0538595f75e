//! End-to-end tests over a real directory server.
//!
//! Starts `lifeline-directory` in-process, points `DirectoryProvider`
//! messengers at it, and drives them through the runtime exactly as the
//! TUI does: commands in, snapshots out.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{mpsc, watch};

use lifeline::config::MessengerConfig;
use lifeline::messenger::{Messenger, Sender, SessionState, Snapshot};
use lifeline::network::ManualNetworkSignal;
use lifeline::provider::directory::DirectoryProvider;
use lifeline::provider::{ConnectionProvider, PeerName, ProviderError, ProviderEvent};
use lifeline::runtime::{Command, spawn_messenger};
use lifeline::store::memory::MemoryStore;
use lifeline_directory::directory::DirectoryState;
use lifeline_proto::codec;
use lifeline_proto::message::{Coordinates, PayloadKind, PeerPayload, RequestCategory, Timestamp};

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

struct Client {
    commands: mpsc::Sender<Command>,
    snapshots: watch::Receiver<Snapshot>,
    network: ManualNetworkSignal,
    _task: tokio::task::JoinHandle<()>,
}

impl Client {
    async fn send(&self, cmd: Command) {
        self.commands.send(cmd).await.unwrap();
    }

    async fn wait_for(&mut self, what: &str, f: impl FnMut(&Snapshot) -> bool) -> Snapshot {
        let outcome = tokio::time::timeout(Duration::from_secs(10), self.snapshots.wait_for(f))
            .await
            .map(|r| r.map(|snapshot| snapshot.clone()));
        match outcome {
            Ok(Ok(snapshot)) => snapshot,
            Ok(Err(_)) => panic!("messenger task ended while waiting for {what}"),
            Err(_) => panic!("timed out waiting for {what}: {:?}", *self.snapshots.borrow()),
        }
    }
}

fn name(s: &str) -> PeerName {
    PeerName::parse(s).unwrap()
}

async fn start_directory_with_state(state: Arc<DirectoryState>) -> SocketAddr {
    let (addr, _handle) =
        lifeline_directory::directory::start_server_with_state("127.0.0.1:0", state)
            .await
            .expect("failed to start directory");
    addr
}

async fn start_directory() -> String {
    let addr = start_directory_with_state(Arc::new(DirectoryState::new())).await;
    ws_url(addr)
}

fn ws_url(addr: SocketAddr) -> String {
    format!("ws://{addr}/ws")
}

fn provider(url: &str) -> DirectoryProvider {
    DirectoryProvider::new(url)
        .with_connect_timeout(Duration::from_secs(5))
        .with_request_timeout(Duration::from_secs(5))
}

async fn client(url: &str) -> Client {
    client_with(provider(url)).await
}

async fn client_with(provider: DirectoryProvider) -> Client {
    let network = ManualNetworkSignal::new(true).with_position(Coordinates::new(40.41, -3.7));
    let (messenger, _events) = Messenger::load(
        provider,
        MemoryStore::new(),
        network.clone(),
        MessengerConfig::default(),
    )
    .await
    .unwrap();
    let (commands, snapshots, task) = spawn_messenger(messenger, 16);
    Client {
        commands,
        snapshots,
        network,
        _task: task,
    }
}

async fn registered(url: &str, who: &str) -> Client {
    let mut c = client(url).await;
    c.send(Command::SetIdentity(who.to_string())).await;
    c.wait_for("registration", |s| s.session == SessionState::Ready)
        .await;
    c
}

/// TCP relay in front of the directory whose live connections can be cut,
/// the way a dropped mobile link ends a session without a close handshake.
struct Relay {
    addr: SocketAddr,
    live: Arc<parking_lot::Mutex<Vec<tokio::task::AbortHandle>>>,
}

impl Relay {
    async fn start(upstream: SocketAddr) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let live = Arc::new(parking_lot::Mutex::new(Vec::new()));
        let tracked = Arc::clone(&live);
        tokio::spawn(async move {
            while let Ok((mut inbound, _)) = listener.accept().await {
                let pipe = tokio::spawn(async move {
                    if let Ok(mut outbound) = TcpStream::connect(upstream).await {
                        let _ = tokio::io::copy_bidirectional(&mut inbound, &mut outbound).await;
                    }
                });
                tracked.lock().push(pipe.abort_handle());
            }
        });
        Self { addr, live }
    }

    /// Drop every connection currently passing through.
    fn cut(&self) {
        for pipe in self.live.lock().drain(..) {
            pipe.abort();
        }
    }
}

fn thread_has(s: &Snapshot, peer: &str, pred: impl Fn(&lifeline::messenger::Message) -> bool) -> bool {
    s.threads.get(&name(peer)).is_some_and(|t| t.iter().any(pred))
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[tokio::test]
async fn peers_connect_and_exchange_every_message_kind() {
    let url = start_directory().await;
    let mut alpha = registered(&url, "alpha-7").await;
    let mut bravo = registered(&url, "bravo-3").await;

    alpha.send(Command::Connect("bravo-3".into())).await;
    alpha
        .wait_for("link to bravo", |s| s.connected == vec![name("bravo-3")])
        .await;
    bravo
        .wait_for("link to alpha", |s| s.connected == vec![name("alpha-7")])
        .await;

    alpha.send(Command::SendText("bridge is out".into())).await;
    alpha.send(Command::SendLocation).await;
    bravo
        .send(Command::SendRequest(RequestCategory::Medicine))
        .await;

    let seen = bravo
        .wait_for("two messages from alpha", |s| {
            s.threads
                .get(&name("alpha-7"))
                .is_some_and(|t| t.iter().filter(|m| !m.is_mine()).count() == 2)
        })
        .await;
    let from_alpha: Vec<_> = seen.threads[&name("alpha-7")]
        .iter()
        .filter(|m| m.sender == Sender::Peer(name("alpha-7")))
        .collect();
    assert_eq!(from_alpha[0].text, "bridge is out");
    assert_eq!(from_alpha[1].kind, PayloadKind::Location);
    assert_eq!(from_alpha[1].coords, Some(Coordinates::new(40.41, -3.7)));

    alpha
        .wait_for("medicine request", |s| {
            thread_has(s, "bravo-3", |m| m.category == Some(RequestCategory::Medicine))
        })
        .await;
}

#[tokio::test]
async fn duplicate_name_is_refused_by_the_directory() {
    let url = start_directory().await;
    let _alpha = registered(&url, "alpha-7").await;

    let mut impostor = client(&url).await;
    impostor
        .send(Command::SetIdentity("alpha-7".to_string()))
        .await;
    let snapshot = impostor
        .wait_for("refusal", |s| s.status.contains("already taken"))
        .await;
    assert_eq!(snapshot.session, SessionState::NoIdentity);
    assert!(snapshot.identity.is_none());
}

#[tokio::test]
async fn queued_request_is_delivered_when_back_online() {
    let url = start_directory().await;
    let mut alpha = registered(&url, "alpha-7").await;
    let mut bravo = registered(&url, "bravo-3").await;

    alpha.send(Command::Connect("bravo-3".into())).await;
    bravo
        .wait_for("link to alpha", |s| s.connected == vec![name("alpha-7")])
        .await;

    alpha.network.set_online(false);
    alpha.wait_for("offline", |s| !s.online).await;
    alpha.send(Command::SendRequest(RequestCategory::Sos)).await;
    alpha.wait_for("queued request", |s| s.queued == 1).await;

    alpha.network.set_online(true);
    alpha
        .wait_for("queue drained", |s| s.online && s.queued == 0)
        .await;
    bravo
        .wait_for("SOS from alpha", |s| {
            thread_has(s, "alpha-7", |m| m.category == Some(RequestCategory::Sos))
        })
        .await;
}

#[tokio::test]
async fn shutdown_closes_the_link_on_the_other_side() {
    let url = start_directory().await;
    let mut alpha = registered(&url, "alpha-7").await;
    let mut bravo = registered(&url, "bravo-3").await;

    alpha.send(Command::Connect("bravo-3".into())).await;
    bravo
        .wait_for("link to alpha", |s| s.connected == vec![name("alpha-7")])
        .await;

    alpha.send(Command::Shutdown).await;
    let snapshot = bravo
        .wait_for("link closed", |s| s.connected.is_empty())
        .await;
    assert!(snapshot.active_peer.is_none());
    assert!(snapshot.known.contains(&name("alpha-7")));
}

#[tokio::test]
async fn timed_out_request_is_withdrawn_and_later_links_work() {
    let state = Arc::new(DirectoryState::new());
    let url = ws_url(start_directory_with_state(Arc::clone(&state)).await);
    let impatient = provider(&url).with_request_timeout(Duration::from_millis(300));
    let mut alpha = client_with(impatient).await;
    alpha.send(Command::SetIdentity("alpha-7".to_string())).await;
    alpha
        .wait_for("registration", |s| s.session == SessionState::Ready)
        .await;

    // bravo answers by hand, too late.
    let bravo = provider(&url);
    bravo.register(&name("bravo-3")).await.unwrap();
    alpha.send(Command::Connect("bravo-3".into())).await;
    alpha
        .wait_for("connect timeout", |s| s.status.starts_with("Could not connect to bravo-3"))
        .await;
    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    while state.is_pending("alpha-7", "bravo-3").await {
        assert!(tokio::time::Instant::now() < deadline, "request was not withdrawn");
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    assert_eq!(
        bravo.next_event().await,
        Some(ProviderEvent::Incoming {
            peer: name("alpha-7")
        })
    );
    let late = bravo.accept(&name("alpha-7")).await;
    assert!(matches!(late, Err(ProviderError::Unreachable { .. })));
    assert!(matches!(
        bravo.send(&name("alpha-7"), b"lost?").await,
        Err(ProviderError::NotConnected(_))
    ));

    // A fresh link from bravo is accepted and carries data both ways.
    bravo.connect(&name("alpha-7")).await.unwrap();
    let payload = PeerPayload {
        from: "bravo-3".to_string(),
        kind: PayloadKind::Text,
        text: "we hear you now".to_string(),
        category: None,
        coords: None,
        sent_at: Timestamp::now(),
    };
    bravo
        .send(&name("alpha-7"), &codec::encode(&payload).unwrap())
        .await
        .unwrap();
    let seen = alpha
        .wait_for("message from bravo", |s| {
            thread_has(s, "bravo-3", |m| m.text == "we hear you now")
        })
        .await;
    assert_eq!(seen.connected, vec![name("bravo-3")]);
}

#[tokio::test]
async fn dropped_directory_session_recovers_and_delivers_queue() {
    let upstream = start_directory_with_state(Arc::new(DirectoryState::new())).await;
    let relay = Relay::start(upstream).await;
    let mut alpha = registered(&ws_url(relay.addr), "alpha-7").await;
    let mut bravo = registered(&ws_url(upstream), "bravo-3").await;

    alpha.send(Command::Connect("bravo-3".into())).await;
    alpha
        .wait_for("link to bravo", |s| s.connected == vec![name("bravo-3")])
        .await;
    bravo
        .wait_for("link to alpha", |s| s.connected == vec![name("alpha-7")])
        .await;

    alpha.network.set_online(false);
    alpha.wait_for("offline", |s| !s.online).await;
    relay.cut();
    let lost = alpha
        .wait_for("registration lost", |s| {
            s.session == SessionState::Registering && s.connected.is_empty()
        })
        .await;
    assert_eq!(lost.identity, Some(name("alpha-7")));
    bravo
        .wait_for("alpha released", |s| s.connected.is_empty())
        .await;

    alpha.send(Command::Select("bravo-3".into())).await;
    alpha.send(Command::SendRequest(RequestCategory::Sos)).await;
    alpha.wait_for("queued SOS", |s| s.queued == 1).await;

    alpha.network.set_online(true);
    alpha
        .wait_for("registered again and flushed", |s| {
            s.session == SessionState::Ready
                && s.connected == vec![name("bravo-3")]
                && s.queued == 0
        })
        .await;
    bravo
        .wait_for("SOS from alpha", |s| {
            thread_has(s, "alpha-7", |m| m.category == Some(RequestCategory::Sos))
        })
        .await;
}
