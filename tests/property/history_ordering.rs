//! Property-based tests for conversation ordering.
//!
//! For any interleaving of local sends and remote deliveries with one peer,
//! the thread equals the sequence of appends in the order they happened:
//! a local send appends at once, a remote message appends when its
//! provider event is handled.

use std::collections::VecDeque;
use std::time::Duration;

use lifeline::config::MessengerConfig;
use lifeline::messenger::{Messenger, Sender};
use lifeline::network::ManualNetworkSignal;
use lifeline::provider::loopback::{LoopbackDirectory, LoopbackProvider};
use lifeline::provider::{ConnectionProvider, PeerName};
use lifeline::store::memory::MemoryStore;
use lifeline_proto::message::RequestCategory;
use proptest::prelude::*;

type TestMessenger = Messenger<LoopbackProvider, MemoryStore, ManualNetworkSignal>;

#[derive(Debug, Clone)]
enum Content {
    Text(String),
    Request(RequestCategory),
}

impl Content {
    fn expected_text(&self) -> String {
        match self {
            Self::Text(text) => text.clone(),
            Self::Request(category) => category.label().to_string(),
        }
    }
}

#[derive(Debug, Clone)]
enum Step {
    /// alpha sends to bravo.
    Local(Content),
    /// bravo sends to alpha; alpha has not handled it yet.
    Remote(Content),
    /// alpha handles the oldest undelivered remote message, if any.
    Deliver,
}

fn arb_content() -> impl Strategy<Value = Content> {
    prop_oneof![
        3 => "[a-z]{1,8}( [a-z]{1,8}){0,3}".prop_map(Content::Text),
        1 => prop::sample::select(RequestCategory::ALL.to_vec()).prop_map(Content::Request),
    ]
}

fn arb_steps() -> impl Strategy<Value = Vec<Step>> {
    prop::collection::vec(
        prop_oneof![
            arb_content().prop_map(Step::Local),
            arb_content().prop_map(Step::Remote),
            Just(Step::Deliver),
        ],
        0..24,
    )
}

fn name(s: &str) -> PeerName {
    PeerName::parse(s).unwrap()
}

async fn load(directory: &LoopbackDirectory, who: &str) -> TestMessenger {
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

async fn pump(m: &mut TestMessenger) {
    let event = tokio::time::timeout(Duration::from_secs(2), m.provider().next_event())
        .await
        .expect("no provider event")
        .expect("provider closed");
    let _ = m.handle_provider_event(event).await;
}

async fn send(m: &mut TestMessenger, content: &Content) {
    match content {
        Content::Text(text) => m.send_text(text).await.unwrap(),
        Content::Request(category) => m.send_request(*category).await.unwrap(),
    };
}

/// Runs `steps` and returns `(expected, actual)` as `(is_mine, text)` lists.
async fn run(steps: Vec<Step>) -> (Vec<(bool, String)>, Vec<(bool, String)>) {
    let directory = LoopbackDirectory::new();
    let mut alpha = load(&directory, "alpha-7").await;
    let mut bravo = load(&directory, "bravo-3").await;
    alpha.connect("bravo-3").await.unwrap();
    pump(&mut bravo).await;

    let mut expected = Vec::new();
    let mut in_flight: VecDeque<String> = VecDeque::new();

    for step in steps {
        match step {
            Step::Local(content) => {
                send(&mut alpha, &content).await;
                expected.push((true, content.expected_text()));
            }
            Step::Remote(content) => {
                send(&mut bravo, &content).await;
                in_flight.push_back(content.expected_text());
            }
            Step::Deliver => {
                if let Some(text) = in_flight.pop_front() {
                    pump(&mut alpha).await;
                    expected.push((false, text));
                }
            }
        }
    }
    while let Some(text) = in_flight.pop_front() {
        pump(&mut alpha).await;
        expected.push((false, text));
    }

    let actual = alpha
        .messages(&name("bravo-3"))
        .iter()
        .map(|m| (m.sender == Sender::Me, m.text.clone()))
        .collect();
    (expected, actual)
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(48))]

    #[test]
    fn thread_matches_append_order(steps in arb_steps()) {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .unwrap();
        let (expected, actual) = runtime.block_on(run(steps));
        prop_assert_eq!(actual, expected);
    }
}
