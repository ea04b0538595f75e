//! Integration tests for persistence across restarts.
//!
//! A messenger is dropped and a fresh one is loaded over the same store.
//! The new one must see the same identity, history, known peers, queue and
//! active peer without registering again, and must resume on `start`.

use std::path::PathBuf;
use std::time::Duration;

use lifeline::config::MessengerConfig;
use lifeline::messenger::{Messenger, MessengerError, SessionState};
use lifeline::network::ManualNetworkSignal;
use lifeline::provider::loopback::{LoopbackDirectory, LoopbackProvider};
use lifeline::provider::{ConnectionProvider, PeerName};
use lifeline::store::KeyValueStore;
use lifeline::store::file::FileStore;
use lifeline::store::memory::MemoryStore;
use lifeline_proto::message::{Coordinates, RequestCategory};

fn name(s: &str) -> PeerName {
    PeerName::parse(s).unwrap()
}

async fn load<S: KeyValueStore>(
    directory: &LoopbackDirectory,
    store: S,
    network: &ManualNetworkSignal,
) -> Messenger<LoopbackProvider, S, ManualNetworkSignal> {
    let (messenger, _events) = Messenger::load(
        directory.provider(),
        store,
        network.clone(),
        MessengerConfig::default(),
    )
    .await
    .unwrap();
    messenger
}

async fn pump<S: KeyValueStore>(m: &mut Messenger<LoopbackProvider, S, ManualNetworkSignal>) {
    let event = tokio::time::timeout(Duration::from_secs(2), m.provider().next_event())
        .await
        .expect("no provider event")
        .expect("provider closed");
    let _ = m.handle_provider_event(event).await;
}

fn scratch_dir(label: &str) -> PathBuf {
    let dir = std::env::temp_dir().join(format!(
        "lifeline-restart-{label}-{}",
        uuid::Uuid::now_v7()
    ));
    std::fs::create_dir_all(&dir).unwrap();
    dir
}

#[tokio::test]
async fn reload_reproduces_identity_history_and_known_peers() {
    let directory = LoopbackDirectory::new();
    let network = ManualNetworkSignal::new(true).with_position(Coordinates::new(14.6, 121.0));
    let store = MemoryStore::new();

    let mut bravo = load(&directory, MemoryStore::new(), &network).await;
    bravo.set_identity("bravo-3").await.unwrap();

    let mut alpha = load(&directory, store.clone(), &network).await;
    alpha.set_identity("alpha-7").await.unwrap();
    alpha.connect("bravo-3").await.unwrap();
    pump(&mut bravo).await;
    alpha.send_text("water rising on 5th street").await.unwrap();
    alpha.send_location().await.unwrap();
    pump(&mut bravo).await;
    bravo.send_request(RequestCategory::Medicine).await.unwrap();
    pump(&mut alpha).await;

    let history = alpha.history().clone();
    let known = alpha.known_peers().clone();
    alpha.shutdown().await;
    drop(alpha);

    let restored = load(&directory, store, &network).await;
    assert_eq!(restored.identity(), Some(&name("alpha-7")));
    assert_eq!(restored.known_peers(), &known);
    assert_eq!(restored.history(), &history);
    assert_eq!(restored.messages(&name("bravo-3")).len(), 3);
    assert_eq!(restored.active_peer(), Some(&name("bravo-3")));
    assert_eq!(restored.session_state(), SessionState::NoIdentity);
    assert!(!directory.is_registered(&name("alpha-7")));
}

#[tokio::test]
async fn offline_queue_survives_restart_and_flushes_after() {
    let directory = LoopbackDirectory::new();
    let network = ManualNetworkSignal::new(true).with_position(Coordinates::new(14.6, 121.0));
    let store = MemoryStore::new();

    let mut bravo = load(&directory, MemoryStore::new(), &network).await;
    bravo.set_identity("bravo-3").await.unwrap();

    let mut alpha = load(&directory, store.clone(), &network).await;
    alpha.set_identity("alpha-7").await.unwrap();
    alpha.connect("bravo-3").await.unwrap();
    pump(&mut bravo).await;

    network.set_online(false);
    alpha.send_request(RequestCategory::Shelter).await.unwrap();
    alpha.shutdown().await;
    drop(alpha);
    // bravo sees the link go away.
    pump(&mut bravo).await;

    let mut restored = load(&directory, store, &network).await;
    assert_eq!(restored.queued().len(), 1);

    // Restart registers the saved name and reconnects to known peers.
    restored.start().await.unwrap();
    assert_eq!(restored.session_state(), SessionState::Ready);
    assert!(restored.is_connected(&name("bravo-3")));
    pump(&mut bravo).await;

    network.set_online(true);
    restored.handle_network_change(true).await.unwrap();
    assert!(restored.queued().is_empty());

    pump(&mut bravo).await;
    let received = bravo.messages(&name("alpha-7"));
    assert_eq!(received.len(), 1);
    assert_eq!(received[0].category, Some(RequestCategory::Shelter));
}

#[tokio::test]
async fn file_store_round_trips_a_session() {
    let dir = scratch_dir("file");
    let directory = LoopbackDirectory::new();
    let network = ManualNetworkSignal::new(true);

    let mut bravo = load(&directory, MemoryStore::new(), &network).await;
    bravo.set_identity("bravo-3").await.unwrap();

    let mut alpha = load(&directory, FileStore::new(&dir), &network).await;
    alpha.set_identity("alpha-7").await.unwrap();
    alpha.connect("bravo-3").await.unwrap();
    alpha.send_text("checking in").await.unwrap();
    let history = alpha.history().clone();
    alpha.shutdown().await;
    drop(alpha);

    let restored = load(&directory, FileStore::new(&dir), &network).await;
    assert_eq!(restored.identity(), Some(&name("alpha-7")));
    assert_eq!(restored.history(), &history);
    assert!(restored.known_peers().contains(&name("bravo-3")));

    let _ = std::fs::remove_dir_all(&dir);
}

#[tokio::test]
async fn failed_save_keeps_memory_state_and_reports_persistence() {
    let directory = LoopbackDirectory::new();
    let network = ManualNetworkSignal::new(true);
    let store = MemoryStore::new();

    let mut bravo = load(&directory, MemoryStore::new(), &network).await;
    bravo.set_identity("bravo-3").await.unwrap();

    let mut alpha = load(&directory, store.clone(), &network).await;
    alpha.set_identity("alpha-7").await.unwrap();
    alpha.connect("bravo-3").await.unwrap();

    store.set_fail_writes(true);
    let result = alpha.send_text("will this stick?").await;
    assert!(matches!(result, Err(MessengerError::Persistence(_))));
    assert_eq!(alpha.messages(&name("bravo-3")).len(), 1);
    assert!(alpha.status().contains("save"));

    // The next successful save writes everything, including the earlier message.
    store.set_fail_writes(false);
    alpha.send_text("and this?").await.unwrap();
    drop(alpha);

    let restored = load(&directory, store, &network).await;
    assert_eq!(restored.messages(&name("bravo-3")).len(), 2);
}
