//! Property-based codec tests.
//!
//! Uses proptest to verify:
//! 1. Any payload a client can send reaches the receiver byte-for-byte, after
//!    being decoded as `SendUpdate` and re-encoded as `UpdateReceived`.
//! 2. Random bytes never cause a panic in `decode` (returns `Err` gracefully).

use campus_proto::codec;
use campus_proto::payload::{RoomPayload, SignalKind, SignalMessage};
use campus_proto::relay::{ConnectionId, RelayMessage};
use proptest::prelude::*;
use uuid::Uuid;

/// Strategy for generating arbitrary `SignalKind` values.
fn arb_signal_kind() -> impl Strategy<Value = SignalKind> {
    prop_oneof![
        Just(SignalKind::Offer),
        Just(SignalKind::Answer),
        Just(SignalKind::IceCandidate),
        Just(SignalKind::Hangup),
    ]
}

/// Strategy for generating arbitrary `RoomPayload` values.
fn arb_payload() -> impl Strategy<Value = RoomPayload> {
    let bytes = || prop::collection::vec(any::<u8>(), 0..1024);
    prop_oneof![
        bytes().prop_map(RoomPayload::DocumentDelta),
        bytes().prop_map(RoomPayload::WhiteboardSnapshot),
        bytes().prop_map(RoomPayload::Opaque),
        (arb_signal_kind(), ".{0,512}")
            .prop_map(|(kind, body)| RoomPayload::Signal(SignalMessage { kind, body })),
    ]
}

proptest! {
    /// What the relay hands to recipients carries exactly what the sender sent.
    #[test]
    fn relayed_payload_is_unchanged(room in "[a-z0-9-]{1,32}", payload in arb_payload()) {
        let sent = RelayMessage::SendUpdate { room: room.clone(), payload: payload.clone() };
        let inbound = codec::decode(&codec::encode(&sent).expect("encode should succeed"))
            .expect("decode should succeed");

        let RelayMessage::SendUpdate { room: got_room, payload: got_payload } = inbound else {
            panic!("decoded to a different variant");
        };
        let outbound = RelayMessage::UpdateReceived { room: got_room, payload: got_payload };
        let delivered = codec::decode(&codec::encode(&outbound).expect("encode should succeed"))
            .expect("decode should succeed");

        prop_assert_eq!(delivered, RelayMessage::UpdateReceived { room, payload });
    }

    /// Member announcements carry the connection id intact.
    #[test]
    fn member_joined_keeps_connection_id(n in any::<u128>(), identity in ".{1,64}") {
        let msg = RelayMessage::MemberJoined {
            room: "r1".to_string(),
            identity,
            connection_id: ConnectionId::from_uuid(Uuid::from_u128(n)),
        };
        let bytes = codec::encode(&msg).expect("encode should succeed");
        prop_assert_eq!(codec::decode(&bytes).expect("decode should succeed"), msg);
    }

    /// Random bytes never cause a panic when decoded — they return Err gracefully.
    #[test]
    fn random_bytes_decode_no_panic(bytes in prop::collection::vec(any::<u8>(), 0..512)) {
        let _ = codec::decode(&bytes);
    }
}
