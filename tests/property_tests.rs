//! Property-based tests using proptest
//!
//! These validate packet invariants across randomly generated inputs:
//! checksum determinism, wire round-trips, fragmentation, and append
//! semantics.

#![allow(clippy::expect_used, clippy::unwrap_used)]

use proptest::prelude::*;
use rpc_transport::core::packet::Packet;

// Property: checksums are deterministic and valid immediately after
// creation.
proptest! {
    #[test]
    fn prop_checksum_deterministic(payload in prop::collection::vec(any::<u8>(), 1..4096)) {
        let a = Packet::from_slice(&payload).expect("create");
        let b = Packet::from_slice(&payload).expect("create");
        prop_assert_eq!(a.checksum(), b.checksum());
        prop_assert!(a.verify_checksum());
    }
}

// Property: the wire layout round-trips every header field and payload.
proptest! {
    #[test]
    fn prop_wire_roundtrip(
        payload in prop::collection::vec(any::<u8>(), 1..2048),
        kind in any::<u16>(),
        id in any::<u32>(),
        sequence in any::<u32>(),
        timestamp in any::<u64>(),
        priority in any::<u8>(),
    ) {
        let mut packet = Packet::from_slice(&payload).expect("create");
        packet.kind = kind;
        packet.id = id;
        packet.sequence = sequence;
        packet.timestamp = timestamp;
        packet.set_priority(priority);

        let decoded = Packet::from_bytes(&packet.to_bytes()).expect("decode");
        prop_assert_eq!(decoded, packet);
    }
}

// Property: fragment + reassemble is the identity on the payload for every
// fragment size smaller than the payload.
proptest! {
    #[test]
    fn prop_fragment_reassemble_roundtrip(
        payload in prop::collection::vec(any::<u8>(), 2..1024),
        divisor in 2usize..16,
    ) {
        let fragment_size = (payload.len() / divisor).max(1);
        let packet = Packet::from_slice(&payload).expect("create");

        let fragments = packet.fragment_all(fragment_size).expect("fragment");
        prop_assert_eq!(fragments.len(), payload.len().div_ceil(fragment_size));

        let whole = Packet::reassemble(&fragments).expect("reassemble");
        prop_assert_eq!(whole.payload(), payload.as_slice());
        prop_assert!(whole.verify_checksum());
    }
}

// Property: reassembly is order-independent.
proptest! {
    #[test]
    fn prop_reassembly_order_independent(
        payload in prop::collection::vec(any::<u8>(), 16..512),
        seed in any::<u64>(),
    ) {
        let packet = Packet::from_slice(&payload).expect("create");
        let mut fragments = packet.fragment_all(7).expect("fragment");

        // Deterministic shuffle driven by the seed.
        let mut state = seed | 1;
        for i in (1..fragments.len()).rev() {
            state = state.wrapping_mul(6364136223846793005).wrapping_add(1442695040888963407);
            let j = (state % (i as u64 + 1)) as usize;
            fragments.swap(i, j);
        }

        let whole = Packet::reassemble(&fragments).expect("reassemble");
        prop_assert_eq!(whole.payload(), payload.as_slice());
    }
}

// Property: set_data then repeated append_data concatenates byte-for-byte,
// and the checksum tracks every step.
proptest! {
    #[test]
    fn prop_append_preserves_concatenation(
        chunks in prop::collection::vec(prop::collection::vec(any::<u8>(), 0..64), 1..12),
    ) {
        let mut packet = Packet::new(0).expect("create");
        packet.set_data(&chunks[0]).expect("set");
        let mut expected = chunks[0].clone();

        for chunk in &chunks[1..] {
            packet.append_data(chunk).expect("append");
            expected.extend_from_slice(chunk);
            prop_assert!(packet.verify_checksum());
        }
        prop_assert_eq!(packet.payload(), expected.as_slice());
        prop_assert!(packet.len() <= packet.capacity());
    }
}

// Property: decoding never panics on arbitrary bytes.
proptest! {
    #[test]
    fn prop_decode_arbitrary_bytes_never_panics(data in prop::collection::vec(any::<u8>(), 0..512)) {
        let _ = Packet::from_bytes(&data);
    }
}

// Property: a single corrupted payload byte is caught by verification.
proptest! {
    #[test]
    fn prop_corruption_detected(
        payload in prop::collection::vec(any::<u8>(), 1..512),
        at in any::<prop::sample::Index>(),
        flip in 1u8..=255,
    ) {
        let packet = Packet::from_slice(&payload).expect("create");
        let mut bytes = packet.to_bytes().to_vec();
        let header = rpc_transport::core::codec::WIRE_HEADER_SIZE;
        let index = header + at.index(payload.len());
        bytes[index] ^= flip;

        let decoded = Packet::from_bytes(&bytes).expect("decode");
        prop_assert!(!decoded.verify_checksum());
    }
}
