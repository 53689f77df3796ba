//! # Wire Codec
//!
//! Bit-exact packet serialization and length-prefixed stream framing.
//!
//! ## Wire Format
//! ```text
//! [Kind(2)] [Id(4)] [Sequence(4)] [Timestamp(8)] [Flags(1)]
//! [Checksum(4)] [Priority(1)] [PayloadLen(4)] [Payload(N)]
//! [Metadata block, present iff the HAS_METADATA flag is set:
//!     Count(1), then per entry KeyLen(1) Key(K) ValueLen(4) Value(V)]
//! ```
//! All integers are big-endian. On a byte stream each packet is preceded by
//! a `u32` frame length covering everything above; the length is validated
//! against the configured maximum before any allocation happens.

use crate::config::DEFAULT_MAX_MESSAGE_SIZE;
use crate::core::packet::{
    MetadataEntry, Packet, PacketFlags, MAX_METADATA_ENTRIES, MAX_METADATA_KEY_LEN,
};
use crate::error::{Result, TransportError};
use bytes::{Buf, BufMut, Bytes, BytesMut};
use tokio_util::codec::{Decoder, Encoder};

/// Fixed header size preceding the payload
pub const WIRE_HEADER_SIZE: usize = 28;

impl Packet {
    /// Encoded size of this packet, excluding the stream frame prefix
    pub fn wire_size(&self) -> usize {
        let mut size = WIRE_HEADER_SIZE + self.len();
        if self.has_flag(PacketFlags::HAS_METADATA) {
            size += 1;
            for entry in self.metadata() {
                size += 1 + entry.key.len() + 4 + entry.value.len();
            }
        }
        size
    }

    /// Serialize to the wire layout
    pub fn to_bytes(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(self.wire_size());
        buf.put_u16(self.kind);
        buf.put_u32(self.id);
        buf.put_u32(self.sequence);
        buf.put_u64(self.timestamp);
        buf.put_u8(self.flags().bits());
        buf.put_u32(self.checksum());
        buf.put_u8(self.priority);
        buf.put_u32(self.len() as u32);
        buf.put_slice(self.payload());
        if self.has_flag(PacketFlags::HAS_METADATA) {
            buf.put_u8(self.metadata_len() as u8);
            for entry in self.metadata() {
                buf.put_u8(entry.key.len() as u8);
                buf.put_slice(entry.key.as_bytes());
                buf.put_u32(entry.value.len() as u32);
                buf.put_slice(&entry.value);
            }
        }
        buf.freeze()
    }

    /// Parse one packet from an exact wire-layout buffer.
    ///
    /// The checksum field is stored as received, not recomputed; callers
    /// decide what to do with a packet whose `verify_checksum()` is false.
    ///
    /// # Errors
    /// `InvalidParameters` for truncated input, length-field mismatches,
    /// malformed metadata, or trailing bytes.
    pub fn from_bytes(data: &[u8]) -> Result<Packet> {
        let mut buf = data;
        if buf.len() < WIRE_HEADER_SIZE {
            return Err(TransportError::InvalidParameters(format!(
                "packet truncated: {} bytes, header needs {WIRE_HEADER_SIZE}",
                buf.len()
            )));
        }
        let kind = buf.get_u16();
        let id = buf.get_u32();
        let sequence = buf.get_u32();
        let timestamp = buf.get_u64();
        let flags = PacketFlags::from_bits(buf.get_u8()).ok_or_else(|| {
            TransportError::InvalidParameters("unknown packet flag bits".into())
        })?;
        let checksum = buf.get_u32();
        let priority = buf.get_u8();
        let payload_len = buf.get_u32() as usize;

        if buf.remaining() < payload_len {
            return Err(TransportError::InvalidParameters(format!(
                "payload length {payload_len} exceeds remaining {} bytes",
                buf.remaining()
            )));
        }
        let payload = buf[..payload_len].to_vec();
        buf.advance(payload_len);

        let mut metadata = Vec::new();
        if flags.contains(PacketFlags::HAS_METADATA) {
            if buf.remaining() < 1 {
                return Err(TransportError::InvalidParameters(
                    "metadata block missing its entry count".into(),
                ));
            }
            let count = buf.get_u8() as usize;
            if count > MAX_METADATA_ENTRIES {
                return Err(TransportError::InvalidParameters(format!(
                    "metadata count {count} exceeds bound {MAX_METADATA_ENTRIES}"
                )));
            }
            for _ in 0..count {
                if buf.remaining() < 1 {
                    return Err(TransportError::InvalidParameters(
                        "metadata entry truncated".into(),
                    ));
                }
                let key_len = buf.get_u8() as usize;
                if key_len == 0 || key_len > MAX_METADATA_KEY_LEN {
                    return Err(TransportError::InvalidParameters(format!(
                        "metadata key length {key_len} out of range"
                    )));
                }
                if buf.remaining() < key_len + 4 {
                    return Err(TransportError::InvalidParameters(
                        "metadata entry truncated".into(),
                    ));
                }
                let key = std::str::from_utf8(&buf[..key_len])
                    .map_err(|_| {
                        TransportError::InvalidParameters("metadata key is not UTF-8".into())
                    })?
                    .to_string();
                buf.advance(key_len);
                let value_len = buf.get_u32() as usize;
                if buf.remaining() < value_len {
                    return Err(TransportError::InvalidParameters(
                        "metadata value truncated".into(),
                    ));
                }
                let value = buf[..value_len].to_vec();
                buf.advance(value_len);
                metadata.push(MetadataEntry { key, value });
            }
        }

        if buf.has_remaining() {
            return Err(TransportError::InvalidParameters(format!(
                "{} trailing bytes after packet",
                buf.remaining()
            )));
        }

        Ok(Packet::from_wire_parts(
            kind, id, sequence, timestamp, priority, flags, checksum, payload, metadata,
        ))
    }
}

/// Length-prefixed packet codec for framed byte streams.
#[derive(Debug, Clone)]
pub struct PacketCodec {
    max_frame_size: usize,
}

impl PacketCodec {
    /// Codec bounded by `max_frame_size` encoded bytes per packet
    pub fn new(max_frame_size: usize) -> Self {
        Self { max_frame_size }
    }
}

impl Default for PacketCodec {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_MESSAGE_SIZE)
    }
}

impl Encoder<Packet> for PacketCodec {
    type Error = TransportError;

    fn encode(&mut self, packet: Packet, dst: &mut BytesMut) -> Result<()> {
        let size = packet.wire_size();
        if size > self.max_frame_size {
            return Err(TransportError::InvalidParameters(format!(
                "packet of {size} bytes exceeds max message size {}",
                self.max_frame_size
            )));
        }
        dst.reserve(4 + size);
        dst.put_u32(size as u32);
        dst.put_slice(&packet.to_bytes());
        Ok(())
    }
}

impl Decoder for PacketCodec {
    type Item = Packet;
    type Error = TransportError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Packet>> {
        if src.len() < 4 {
            return Ok(None);
        }
        let frame_len = u32::from_be_bytes([src[0], src[1], src[2], src[3]]) as usize;
        if frame_len > self.max_frame_size {
            return Err(TransportError::InvalidParameters(format!(
                "frame of {frame_len} bytes exceeds max message size {}",
                self.max_frame_size
            )));
        }
        if src.len() < 4 + frame_len {
            src.reserve(4 + frame_len - src.len());
            return Ok(None);
        }
        src.advance(4);
        let frame = src.split_to(frame_len);
        Packet::from_bytes(&frame).map(Some)
    }
}
