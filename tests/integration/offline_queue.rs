//! Integration tests for queue-or-send delivery and reconciliation.
//!
//! A provider wrapper counts every `send` so the tests can prove that
//! nothing reaches the wire while offline, and that going online delivers
//! exactly the entries whose peers are connected, in FIFO order.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use lifeline::config::MessengerConfig;
use lifeline::messenger::{Delivery, Messenger, MessengerError, Sender, TextPolicy};
use lifeline::network::ManualNetworkSignal;
use lifeline::provider::loopback::{LoopbackDirectory, LoopbackProvider};
use lifeline::provider::{ConnectionProvider, PeerName, ProviderError, ProviderEvent, ProviderKind};
use lifeline::store::memory::MemoryStore;
use lifeline_proto::message::{Coordinates, PayloadKind, RequestCategory};

// ---------------------------------------------------------------------------
// Counting provider
// ---------------------------------------------------------------------------

/// Loopback provider that counts payloads handed to `send`.
struct CountingProvider {
    inner: LoopbackProvider,
    sends: Arc<AtomicUsize>,
}

impl ConnectionProvider for CountingProvider {
    async fn register(&self, name: &PeerName) -> Result<(), ProviderError> {
        self.inner.register(name).await
    }

    async fn unregister(&self) {
        self.inner.unregister().await;
    }

    async fn connect(&self, peer: &PeerName) -> Result<(), ProviderError> {
        self.inner.connect(peer).await
    }

    async fn accept(&self, peer: &PeerName) -> Result<(), ProviderError> {
        self.inner.accept(peer).await
    }

    async fn send(&self, peer: &PeerName, payload: &[u8]) -> Result<(), ProviderError> {
        self.sends.fetch_add(1, Ordering::SeqCst);
        self.inner.send(peer, payload).await
    }

    async fn close(&self, peer: &PeerName) {
        self.inner.close(peer).await;
    }

    async fn next_event(&self) -> Option<ProviderEvent> {
        self.inner.next_event().await
    }

    fn kind(&self) -> ProviderKind {
        self.inner.kind()
    }
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

type Sending = Messenger<CountingProvider, MemoryStore, ManualNetworkSignal>;
type Receiving = Messenger<LoopbackProvider, MemoryStore, ManualNetworkSignal>;

fn name(s: &str) -> PeerName {
    PeerName::parse(s).unwrap()
}

/// A registered sender plus its send counter and network signal.
async fn sender(
    directory: &LoopbackDirectory,
    who: &str,
    config: MessengerConfig,
) -> (Sending, Arc<AtomicUsize>, ManualNetworkSignal) {
    let sends = Arc::new(AtomicUsize::new(0));
    let provider = CountingProvider {
        inner: directory.provider(),
        sends: Arc::clone(&sends),
    };
    let network = ManualNetworkSignal::new(true).with_position(Coordinates::new(35.68, 139.69));
    let (mut messenger, _events) =
        Messenger::load(provider, MemoryStore::new(), network.clone(), config)
            .await
            .unwrap();
    messenger.set_identity(who).await.unwrap();
    (messenger, sends, network)
}

async fn receiver(directory: &LoopbackDirectory, who: &str) -> Receiving {
    let (mut messenger, _events) = Messenger::load(
        directory.provider(),
        MemoryStore::new(),
        ManualNetworkSignal::new(true),
        MessengerConfig::default(),
    )
    .await
    .unwrap();
    messenger.set_identity(who).await.unwrap();
    messenger
}

async fn pump(m: &mut Receiving) {
    let event = tokio::time::timeout(Duration::from_secs(2), m.provider().next_event())
        .await
        .expect("no provider event")
        .expect("provider closed");
    let _ = m.handle_provider_event(event).await;
}

async fn pump_sender(m: &mut Sending) {
    let event = tokio::time::timeout(Duration::from_secs(2), m.provider().next_event())
        .await
        .expect("no provider event")
        .expect("provider closed");
    let _ = m.handle_provider_event(event).await;
}

fn queued_texts(m: &Sending) -> Vec<(String, String)> {
    m.queued()
        .iter()
        .map(|e| (e.peer.to_string(), e.message.text.clone()))
        .collect()
}

// ---------------------------------------------------------------------------
// Queue then flush
// ---------------------------------------------------------------------------

#[tokio::test]
async fn offline_request_is_queued_without_touching_the_wire() {
    let directory = LoopbackDirectory::new();
    let mut bravo = receiver(&directory, "bravo-3").await;
    let (mut alpha, sends, network) =
        sender(&directory, "alpha-7", MessengerConfig::default()).await;
    alpha.connect("bravo-3").await.unwrap();
    pump(&mut bravo).await;

    network.set_online(false);
    let history_before = alpha.messages(&name("bravo-3")).len();
    let delivery = alpha.send_request(RequestCategory::Medicine).await.unwrap();

    assert_eq!(delivery, Delivery::Queued);
    assert_eq!(alpha.queued().len(), 1);
    assert_eq!(alpha.messages(&name("bravo-3")).len(), history_before + 1);
    let last = alpha.messages(&name("bravo-3")).last().unwrap();
    assert_eq!(last.sender, Sender::Me);
    assert_eq!(last.kind, PayloadKind::Request);
    assert_eq!(sends.load(Ordering::SeqCst), 0);
    assert_eq!(alpha.status(), "Queued for bravo-3 (1 waiting)");
}

#[tokio::test]
async fn going_online_delivers_exactly_the_reachable_entries_in_order() {
    let directory = LoopbackDirectory::new();
    let mut bravo = receiver(&directory, "bravo-3").await;
    let mut charlie = receiver(&directory, "charlie-1").await;
    let (mut alpha, sends, network) =
        sender(&directory, "alpha-7", MessengerConfig::default()).await;
    alpha.connect("bravo-3").await.unwrap();
    alpha.connect("charlie-1").await.unwrap();
    pump(&mut bravo).await;
    pump(&mut charlie).await;

    network.set_online(false);
    alpha.select_active_peer("bravo-3").await.unwrap();
    alpha.send_request(RequestCategory::Sos).await.unwrap();
    alpha.select_active_peer("charlie-1").await.unwrap();
    alpha.send_request(RequestCategory::Food).await.unwrap();
    alpha.select_active_peer("bravo-3").await.unwrap();
    alpha.send_location().await.unwrap();
    assert_eq!(alpha.queued().len(), 3);
    assert_eq!(sends.load(Ordering::SeqCst), 0);

    // charlie drops off before the network comes back.
    directory.sever(&name("alpha-7"), &name("charlie-1"));
    pump_sender(&mut alpha).await;
    assert!(!alpha.is_connected(&name("charlie-1")));

    network.set_online(true);
    alpha.handle_network_change(true).await.unwrap();

    assert_eq!(sends.load(Ordering::SeqCst), 2);
    assert_eq!(
        queued_texts(&alpha),
        vec![("charlie-1".to_string(), "Food".to_string())]
    );

    pump(&mut bravo).await;
    pump(&mut bravo).await;
    let received = bravo.messages(&name("alpha-7"));
    assert_eq!(received.len(), 2);
    assert_eq!(received[0].category, Some(RequestCategory::Sos));
    assert_eq!(received[1].kind, PayloadKind::Location);
    assert_eq!(received[1].coords, Some(Coordinates::new(35.68, 139.69)));
}

#[tokio::test]
async fn flushed_entries_keep_queue_order_when_peer_reconnects() {
    let directory = LoopbackDirectory::new();
    let mut bravo = receiver(&directory, "bravo-3").await;
    let (mut alpha, _sends, network) =
        sender(&directory, "alpha-7", MessengerConfig::default()).await;
    alpha.connect("bravo-3").await.unwrap();
    pump(&mut bravo).await;

    network.set_online(false);
    for text in ["one", "two", "three"] {
        alpha.send_text(text).await.unwrap();
    }
    assert_eq!(alpha.queued().len(), 3);

    network.set_online(true);
    assert_eq!(alpha.flush_offline_queue().await.unwrap(), 3);
    assert!(alpha.queued().is_empty());

    for _ in 0..3 {
        pump(&mut bravo).await;
    }
    let texts: Vec<&str> = bravo
        .messages(&name("alpha-7"))
        .iter()
        .map(|m| m.text.as_str())
        .collect();
    assert_eq!(texts, vec!["one", "two", "three"]);
}

// ---------------------------------------------------------------------------
// Text policy
// ---------------------------------------------------------------------------

#[tokio::test]
async fn strict_text_policy_fails_instead_of_queuing() {
    let directory = LoopbackDirectory::new();
    let mut bravo = receiver(&directory, "bravo-3").await;
    let config = MessengerConfig {
        text_policy: TextPolicy::RequireConnection,
        ..MessengerConfig::default()
    };
    let (mut alpha, sends, network) = sender(&directory, "alpha-7", config).await;
    alpha.connect("bravo-3").await.unwrap();
    pump(&mut bravo).await;

    network.set_online(false);
    let result = alpha.send_text("hello?").await;
    assert!(matches!(result, Err(MessengerError::NotConnected(_))));
    assert!(alpha.queued().is_empty());
    assert!(alpha.messages(&name("bravo-3")).is_empty());
    assert_eq!(sends.load(Ordering::SeqCst), 0);

    // Requests still queue under the strict policy.
    alpha.send_request(RequestCategory::Shelter).await.unwrap();
    assert_eq!(alpha.queued().len(), 1);
}
