//! Integration tests for the messenger's session and connection rules.
//!
//! Runs full messengers against a shared in-process directory:
//! - a live name cannot be registered twice,
//! - a thread keeps sent and received messages in arrival order,
//! - changing identity wipes history, known peers and queue, and closes links,
//! - `disconnect_all` can be repeated safely.

use std::time::Duration;

use lifeline::config::MessengerConfig;
use lifeline::messenger::{Delivery, Messenger, MessengerError, Sender, SessionState};
use lifeline::network::ManualNetworkSignal;
use lifeline::provider::loopback::{LoopbackDirectory, LoopbackProvider};
use lifeline::provider::{ConnectionProvider, PeerName};
use lifeline::store::memory::MemoryStore;
use lifeline_proto::message::{Coordinates, RequestCategory};

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

type TestMessenger = Messenger<LoopbackProvider, MemoryStore, ManualNetworkSignal>;

fn name(s: &str) -> PeerName {
    PeerName::parse(s).unwrap()
}

async fn messenger(directory: &LoopbackDirectory) -> (TestMessenger, ManualNetworkSignal) {
    let network = ManualNetworkSignal::new(true).with_position(Coordinates::new(-33.45, -70.66));
    let (messenger, _events) = Messenger::load(
        directory.provider(),
        MemoryStore::new(),
        network.clone(),
        MessengerConfig::default(),
    )
    .await
    .unwrap();
    (messenger, network)
}

async fn registered(directory: &LoopbackDirectory, who: &str) -> (TestMessenger, ManualNetworkSignal) {
    let (mut m, network) = messenger(directory).await;
    m.set_identity(who).await.unwrap();
    (m, network)
}

/// Feed the next provider event into `m`.
async fn pump(m: &mut TestMessenger) {
    let event = tokio::time::timeout(Duration::from_secs(2), m.provider().next_event())
        .await
        .expect("no provider event")
        .expect("provider closed");
    let _ = m.handle_provider_event(event).await;
}

/// Connect `a` to `b` and let `b` accept.
async fn link(a: &mut TestMessenger, b: &mut TestMessenger, b_name: &str) {
    a.connect(b_name).await.unwrap();
    pump(b).await;
}

// ---------------------------------------------------------------------------
// Uniqueness
// ---------------------------------------------------------------------------

#[tokio::test]
async fn second_messenger_cannot_take_a_live_name() {
    let directory = LoopbackDirectory::new();
    let (first, _) = registered(&directory, "alpha-7").await;
    let (mut second, _) = messenger(&directory).await;

    let result = second.set_identity("alpha-7").await;
    assert!(matches!(result, Err(MessengerError::NameTaken(_))));
    assert_eq!(second.session_state(), SessionState::NoIdentity);
    assert!(second.identity().is_none());
    assert_eq!(first.session_state(), SessionState::Ready);
}

#[tokio::test]
async fn released_name_can_be_claimed_again() {
    let directory = LoopbackDirectory::new();
    let (mut first, _) = registered(&directory, "alpha-7").await;
    first.shutdown().await;

    let (mut second, _) = messenger(&directory).await;
    second.set_identity("alpha-7").await.unwrap();
    assert_eq!(second.session_state(), SessionState::Ready);
}

// ---------------------------------------------------------------------------
// Arrival order
// ---------------------------------------------------------------------------

#[tokio::test]
async fn thread_keeps_interleaved_arrival_order() {
    let directory = LoopbackDirectory::new();
    let (mut alpha, _) = registered(&directory, "alpha-7").await;
    let (mut bravo, _) = registered(&directory, "bravo-3").await;
    link(&mut alpha, &mut bravo, "bravo-3").await;

    alpha.send_text("are you safe?").await.unwrap();
    pump(&mut bravo).await;
    bravo.send_text("yes, at the school").await.unwrap();
    bravo.send_request(RequestCategory::Water).await.unwrap();
    pump(&mut alpha).await;
    pump(&mut alpha).await;
    alpha.send_location().await.unwrap();

    let thread = alpha.messages(&name("bravo-3"));
    let senders: Vec<&Sender> = thread.iter().map(|m| &m.sender).collect();
    let me = Sender::Me;
    let bravo_sender = Sender::Peer(name("bravo-3"));
    assert_eq!(senders, vec![&me, &bravo_sender, &bravo_sender, &me]);

    let texts: Vec<&str> = thread.iter().map(|m| m.text.as_str()).collect();
    assert_eq!(texts[0], "are you safe?");
    assert_eq!(texts[1], "yes, at the school");
    assert_eq!(texts[2], "Water");
    assert!(texts[3].contains("query=-33.45,-70.66"), "got {}", texts[3]);
    assert_eq!(thread[2].category, Some(RequestCategory::Water));
}

#[tokio::test]
async fn received_messages_are_never_tagged_as_mine() {
    let directory = LoopbackDirectory::new();
    let (mut alpha, _) = registered(&directory, "alpha-7").await;
    let (mut bravo, _) = registered(&directory, "bravo-3").await;
    link(&mut alpha, &mut bravo, "bravo-3").await;

    bravo.send_request(RequestCategory::Sos).await.unwrap();
    pump(&mut alpha).await;

    let thread = alpha.messages(&name("bravo-3"));
    assert_eq!(thread.len(), 1);
    assert!(!thread[0].is_mine());
    assert_eq!(thread[0].category, Some(RequestCategory::Sos));
}

// ---------------------------------------------------------------------------
// Identity reset
// ---------------------------------------------------------------------------

#[tokio::test]
async fn identity_change_wipes_state_and_closes_connections() {
    let directory = LoopbackDirectory::new();
    let (mut alpha, network) = registered(&directory, "alpha-7").await;
    let (mut bravo, _) = registered(&directory, "bravo-3").await;
    link(&mut alpha, &mut bravo, "bravo-3").await;

    alpha.send_text("first").await.unwrap();
    network.set_online(false);
    assert_eq!(
        alpha.send_request(RequestCategory::Food).await.unwrap(),
        Delivery::Queued
    );
    assert!(!alpha.history().is_empty());
    assert_eq!(alpha.known_peers().len(), 1);
    assert_eq!(alpha.queued().len(), 1);

    alpha.set_identity("alpha-8").await.unwrap();

    assert!(alpha.history().is_empty());
    assert!(alpha.known_peers().is_empty());
    assert!(alpha.queued().is_empty());
    assert!(alpha.connected_peers().is_empty());
    assert!(alpha.active_peer().is_none());
    assert_eq!(alpha.identity(), Some(&name("alpha-8")));
    assert!(!directory.is_linked(&name("alpha-7"), &name("bravo-3")));
    assert!(!directory.is_registered(&name("alpha-7")));
}

// ---------------------------------------------------------------------------
// Disconnect-all
// ---------------------------------------------------------------------------

#[tokio::test]
async fn disconnect_all_twice_is_idempotent() {
    let directory = LoopbackDirectory::new();
    let (mut alpha, _) = registered(&directory, "alpha-7").await;
    let (mut bravo, _) = registered(&directory, "bravo-3").await;
    let (mut charlie, _) = registered(&directory, "charlie-1").await;
    link(&mut alpha, &mut bravo, "bravo-3").await;
    link(&mut alpha, &mut charlie, "charlie-1").await;

    alpha.disconnect_all().await.unwrap();
    let first = alpha.snapshot();
    alpha.disconnect_all().await.unwrap();
    let second = alpha.snapshot();

    assert!(second.connected.is_empty());
    assert!(second.active_peer.is_none());
    assert!(second.known.is_empty());
    assert_eq!(first.connected, second.connected);
    assert_eq!(first.active_peer, second.active_peer);
    assert_eq!(first.known, second.known);
}
