//! Property-based serialization tests for the peer payload and directory codecs.
//!
//! Uses proptest to verify:
//! 1. Any valid `PeerPayload` survives encode -> decode unchanged.
//! 2. Random bytes never cause a panic in either decoder (they return `Err`).
//! 3. Any `DirectoryMessage::Data` keeps its routing name and payload bytes.

use lifeline_proto::codec;
use lifeline_proto::directory::{self, DirectoryMessage};
use lifeline_proto::message::*;
use proptest::prelude::*;

/// Strategy for generating arbitrary `RequestCategory` values.
fn arb_category() -> impl Strategy<Value = RequestCategory> {
    prop::sample::select(RequestCategory::ALL.to_vec())
}

/// Strategy for generating in-range coordinates.
fn arb_coordinates() -> impl Strategy<Value = Coordinates> {
    (-90.0f64..=90.0, -180.0f64..=180.0).prop_map(|(lat, lng)| Coordinates::new(lat, lng))
}

/// Strategy for generating valid payloads of every kind.
fn arb_payload() -> impl Strategy<Value = PeerPayload> {
    let from = "[a-z]{1,12}-[0-9]{1,2}";
    let text = "[a-zA-Z0-9 ,.!?]{0,200}[a-zA-Z]";
    (
        from,
        text,
        arb_category(),
        arb_coordinates(),
        0u8..3,
        any::<u64>(),
    )
        .prop_map(|(from, text, category, coords, kind, millis)| {
            let (kind, category, coords) = match kind {
                0 => (PayloadKind::Text, None, None),
                1 => (PayloadKind::Request, Some(category), None),
                _ => (PayloadKind::Location, None, Some(coords)),
            };
            PeerPayload {
                from,
                kind,
                text,
                category,
                coords,
                sent_at: Timestamp::from_millis(millis),
            }
        })
}

proptest! {
    #[test]
    fn payload_survives_encoding(payload in arb_payload()) {
        prop_assert!(payload.validate().is_ok());
        let bytes = codec::encode(&payload).unwrap();
        let decoded = codec::decode(&bytes).unwrap();
        prop_assert_eq!(decoded, payload);
    }

    #[test]
    fn random_bytes_never_panic_payload_decoder(bytes in prop::collection::vec(any::<u8>(), 0..512)) {
        let _ = codec::decode(&bytes);
    }

    #[test]
    fn random_bytes_never_panic_directory_decoder(bytes in prop::collection::vec(any::<u8>(), 0..512)) {
        let _ = directory::decode(&bytes);
    }

    #[test]
    fn directory_data_keeps_routing_and_bytes(
        peer in "[a-z]{1,16}",
        payload in prop::collection::vec(any::<u8>(), 0..2048),
    ) {
        let msg = DirectoryMessage::Data { peer: peer.clone(), payload: payload.clone() };
        let decoded = directory::decode(&directory::encode(&msg).unwrap()).unwrap();
        prop_assert_eq!(decoded, DirectoryMessage::Data { peer, payload });
    }
}
