//! Packet container and wire-format behavior through the public API.

use rpc_transport::core::codec::WIRE_HEADER_SIZE;
use rpc_transport::core::packet::{
    kind, Packet, PacketFlags, DEFAULT_PACKET_CAPACITY, MAX_METADATA_ENTRIES,
};
use rpc_transport::error::TransportError;

#[test]
fn capacity_zero_set_append_scenario() {
    let mut packet = Packet::new(0).expect("allocation");
    assert!(packet.capacity() >= DEFAULT_PACKET_CAPACITY);
    assert!(packet.is_empty());

    packet.set_data(b"hello").unwrap();
    assert!(packet.verify_checksum());

    packet.append_data(b"world").unwrap();
    assert_eq!(packet.payload(), b"helloworld");
    assert!(packet.verify_checksum());
}

#[test]
fn checksum_valid_immediately_after_creation() {
    let from_copy = Packet::from_slice(&[1, 2, 3, 4]).unwrap();
    assert!(from_copy.verify_checksum());

    let from_adopted = Packet::from_vec(vec![9, 8, 7]).unwrap();
    assert!(from_adopted.verify_checksum());
}

#[test]
fn checksum_matches_known_crc32_vectors() {
    // Standard CRC-32 (poly 0xEDB88320 reflected, init 0xFFFFFFFF, final
    // complement) reference values.
    let cases: [(&[u8], u32); 3] = [
        (b"123456789", 0xCBF4_3926),
        (b"hello", 0x3610_A686),
        (&[0x00], 0xD202_EF8D),
    ];
    for (input, expected) in cases {
        let packet = Packet::from_slice(input).unwrap();
        assert_eq!(packet.checksum(), expected, "input {input:?}");
    }
}

#[test]
fn fragmentation_scenario_ten_bytes_by_four() {
    let payload: Vec<u8> = (0u8..10).collect();
    let packet = Packet::from_slice(&payload).unwrap();

    let fragments = packet.fragment_all(4).unwrap();
    assert_eq!(fragments.len(), 3);
    assert!(fragments[0].has_flag(PacketFlags::FIRST_FRAGMENT));
    assert!(fragments[2].has_flag(PacketFlags::LAST_FRAGMENT));
    assert_eq!(fragments[2].len(), 2);
    assert_eq!(fragments[0].total_fragments(), Some(3));

    let whole = Packet::reassemble(&fragments).unwrap();
    assert_eq!(whole.payload(), payload.as_slice());
}

#[test]
fn reassembly_accepts_unsorted_fragments() {
    let packet = Packet::from_slice(&[7u8; 100]).unwrap();
    let mut fragments = packet.fragment_all(9).unwrap();
    fragments.swap(0, 5);
    fragments.swap(3, 10);

    let whole = Packet::reassemble(&fragments).unwrap();
    assert_eq!(whole.payload(), packet.payload());
    assert!(whole.verify_checksum());
}

#[test]
fn fragment_past_end_is_invalid() {
    let packet = Packet::from_slice(&[0u8; 8]).unwrap();
    assert!(matches!(
        packet.fragment(2, 4),
        Err(TransportError::InvalidParameters(_))
    ));
}

#[test]
fn wire_layout_is_stable() {
    let mut packet = Packet::from_slice(b"abc").unwrap();
    packet.kind = kind::DATA;
    packet.id = 1;
    packet.sequence = 2;
    packet.timestamp = 3;

    let bytes = packet.to_bytes();
    assert_eq!(bytes.len(), WIRE_HEADER_SIZE + 3);
    // kind
    assert_eq!(u16::from_be_bytes([bytes[0], bytes[1]]), kind::DATA);
    // payload length field
    assert_eq!(
        u32::from_be_bytes([bytes[24], bytes[25], bytes[26], bytes[27]]),
        3
    );
    // payload
    assert_eq!(&bytes[28..31], b"abc");
}

#[test]
fn wire_roundtrip_preserves_everything() {
    let mut packet = Packet::from_slice(b"payload bytes").unwrap();
    packet.kind = kind::RESPONSE;
    packet.id = 77;
    packet.sequence = 12;
    packet.set_priority(250);
    packet.set_metadata("tag", b"value").unwrap();

    let decoded = Packet::from_bytes(&packet.to_bytes()).unwrap();
    assert_eq!(decoded, packet);
    assert_eq!(decoded.get_metadata("tag"), Some(&b"value"[..]));
    assert!(decoded.has_flag(PacketFlags::PRIORITY_HIGH));
}

#[test]
fn metadata_capacity_error_is_typed() {
    let mut packet = Packet::new(0).unwrap();
    for i in 0..MAX_METADATA_ENTRIES {
        packet.set_metadata(&format!("k{i}"), b"v").unwrap();
    }
    let err = packet.set_metadata("one-too-many", b"v").unwrap_err();
    assert!(matches!(err, TransportError::CapacityExceeded(_)));
    assert_eq!(packet.metadata_len(), MAX_METADATA_ENTRIES);
}

#[test]
fn adopted_buffer_is_not_copied() {
    let data = vec![0xAB; 4096];
    let ptr = data.as_ptr();
    let packet = Packet::from_vec(data).unwrap();
    assert_eq!(packet.payload().as_ptr(), ptr);
}
