//! # Packet Container
//!
//! Self-contained binary data container for one unit of wire-transmissible
//! data: header fields, CRC-32 checksum, bounded metadata table, and a
//! payload buffer with explicit capacity management.
//!
//! ## Invariants
//! - `len() <= capacity()` always
//! - the checksum covers the payload bytes only and is valid immediately
//!   after every mutating operation; callers that edit the payload through
//!   other means must call [`Packet::recompute_checksum`]
//! - a fragmented packet carries `frag.index` and `frag.total` in its
//!   metadata table
//! - the metadata table never exceeds [`MAX_METADATA_ENTRIES`] entries
//!
//! Compression and encryption are flag contracts: the flag reflects the
//! transform state of the payload, the transforms themselves are applied by
//! the transport through [`utils::compression`](crate::utils::compression)
//! and [`utils::crypto`](crate::utils::crypto).

use crate::error::{Result, TransportError};
use bitflags::bitflags;
use std::time::{SystemTime, UNIX_EPOCH};

/// Default payload capacity when a packet is created with capacity 0
pub const DEFAULT_PACKET_CAPACITY: usize = 1024;

/// Upper bound on metadata entries per packet
pub const MAX_METADATA_ENTRIES: usize = 16;

/// Upper bound on a metadata key, in bytes
pub const MAX_METADATA_KEY_LEN: usize = 32;

/// Metadata key carrying a fragment's 0-based index
pub const META_FRAGMENT_INDEX: &str = "frag.index";

/// Metadata key carrying the total fragment count of the original payload
pub const META_TOTAL_FRAGMENTS: &str = "frag.total";

/// Well-known packet kind tags.
///
/// The kind space is open: higher layers may route any `u16` through the
/// dispatcher. These values cover the transport's own traffic.
pub mod kind {
    /// Handshake negotiation
    pub const HANDSHAKE: u16 = 0x0001;
    /// Authentication exchange
    pub const AUTH: u16 = 0x0002;
    /// Application data
    pub const DATA: u16 = 0x0010;
    /// Response correlated to a request by packet id
    pub const RESPONSE: u16 = 0x0011;
    /// Error report
    pub const ERROR: u16 = 0x00FF;
}

bitflags! {
    /// Packet flag bitset, one wire byte.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct PacketFlags: u8 {
        /// Payload is compressed
        const COMPRESSED = 1 << 0;
        /// Payload is encrypted
        const ENCRYPTED = 1 << 1;
        /// Packet is one fragment of a larger payload
        const FRAGMENTED = 1 << 2;
        /// First fragment of the sequence
        const FIRST_FRAGMENT = 1 << 3;
        /// Last fragment of the sequence
        const LAST_FRAGMENT = 1 << 4;
        /// A metadata block follows the payload on the wire
        const HAS_METADATA = 1 << 5;
        /// Expedited delivery hint
        const PRIORITY_HIGH = 1 << 6;
        /// Background delivery hint
        const PRIORITY_LOW = 1 << 7;
    }
}

/// One (key, value-blob) metadata pair.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MetadataEntry {
    pub key: String,
    pub value: Vec<u8>,
}

/// Self-describing binary packet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Packet {
    /// Small integer tag routing the packet to a message handler
    pub kind: u16,
    /// Correlates a request with its response
    pub id: u32,
    /// Monotonic per-session counter, assigned by the transport on send
    pub sequence: u32,
    /// Creation time, milliseconds since the Unix epoch
    pub timestamp: u64,
    /// Delivery priority, 0-255
    pub priority: u8,
    flags: PacketFlags,
    checksum: u32,
    payload: Vec<u8>,
    metadata: Vec<MetadataEntry>,
}

fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

impl Packet {
    /// Create an empty packet with `capacity` bytes pre-allocated.
    ///
    /// A capacity of 0 selects [`DEFAULT_PACKET_CAPACITY`].
    ///
    /// # Errors
    /// `OutOfMemory` if the allocation fails.
    pub fn new(capacity: usize) -> Result<Self> {
        let capacity = if capacity == 0 {
            DEFAULT_PACKET_CAPACITY
        } else {
            capacity
        };
        let mut payload = Vec::new();
        payload
            .try_reserve_exact(capacity)
            .map_err(|_| TransportError::OutOfMemory)?;

        Ok(Self {
            kind: kind::DATA,
            id: 0,
            sequence: 0,
            timestamp: now_millis(),
            priority: 0,
            flags: PacketFlags::empty(),
            checksum: crc32fast::hash(&[]),
            payload,
            metadata: Vec::new(),
        })
    }

    /// Create a packet adopting the caller's buffer without copying.
    ///
    /// The checksum is computed immediately over the adopted bytes.
    ///
    /// # Errors
    /// `InvalidParameters` on empty input.
    pub fn from_vec(data: Vec<u8>) -> Result<Self> {
        if data.is_empty() {
            return Err(TransportError::InvalidParameters(
                "packet data must not be empty".into(),
            ));
        }
        let checksum = crc32fast::hash(&data);
        Ok(Self {
            kind: kind::DATA,
            id: 0,
            sequence: 0,
            timestamp: now_millis(),
            priority: 0,
            flags: PacketFlags::empty(),
            checksum,
            payload: data,
            metadata: Vec::new(),
        })
    }

    /// Create a packet by copying the caller's bytes.
    ///
    /// # Errors
    /// `InvalidParameters` on empty input, `OutOfMemory` if the copy cannot
    /// be allocated.
    pub fn from_slice(data: &[u8]) -> Result<Self> {
        if data.is_empty() {
            return Err(TransportError::InvalidParameters(
                "packet data must not be empty".into(),
            ));
        }
        let mut payload = Vec::new();
        payload
            .try_reserve_exact(data.len())
            .map_err(|_| TransportError::OutOfMemory)?;
        payload.extend_from_slice(data);
        Self::from_vec(payload)
    }

    /// Payload bytes
    pub fn payload(&self) -> &[u8] {
        &self.payload
    }

    /// Payload size in bytes
    pub fn len(&self) -> usize {
        self.payload.len()
    }

    /// True when the payload is empty
    pub fn is_empty(&self) -> bool {
        self.payload.is_empty()
    }

    /// Current payload capacity in bytes
    pub fn capacity(&self) -> usize {
        self.payload.capacity()
    }

    /// Current flag bitset
    pub fn flags(&self) -> PacketFlags {
        self.flags
    }

    /// Stored checksum value
    pub fn checksum(&self) -> u32 {
        self.checksum
    }

    /// Set a flag. Idempotent: setting an already-set flag is a no-op,
    /// which is the whole of the compression/encryption state contract.
    pub fn set_flag(&mut self, flag: PacketFlags) {
        self.flags.insert(flag);
    }

    /// Clear a flag; idempotent like [`Packet::set_flag`].
    pub fn clear_flag(&mut self, flag: PacketFlags) {
        self.flags.remove(flag);
    }

    /// Check whether every bit of `flag` is set
    pub fn has_flag(&self, flag: PacketFlags) -> bool {
        self.flags.contains(flag)
    }

    /// Set the priority byte and keep the priority flag hints consistent.
    pub fn set_priority(&mut self, priority: u8) {
        self.priority = priority;
        self.flags
            .remove(PacketFlags::PRIORITY_HIGH | PacketFlags::PRIORITY_LOW);
        if priority >= 192 {
            self.flags.insert(PacketFlags::PRIORITY_HIGH);
        } else if priority < 64 {
            self.flags.insert(PacketFlags::PRIORITY_LOW);
        }
    }

    /// Grow the payload allocation to hold at least `needed` bytes, by at
    /// least 1.5x the current capacity so repeated appends amortize to O(1).
    fn ensure_capacity(&mut self, needed: usize) -> Result<()> {
        let current = self.payload.capacity();
        if needed <= current {
            return Ok(());
        }
        let target = needed.max(current + current / 2);
        self.payload
            .try_reserve_exact(target - self.payload.len())
            .map_err(|_| TransportError::OutOfMemory)?;
        Ok(())
    }

    /// Replace the payload. Reallocates only when `data` exceeds the current
    /// capacity. On return `verify_checksum()` is true.
    pub fn set_data(&mut self, data: &[u8]) -> Result<()> {
        self.ensure_capacity(data.len())?;
        self.payload.clear();
        self.payload.extend_from_slice(data);
        self.recompute_checksum();
        Ok(())
    }

    /// Append bytes to the payload, recomputing the checksum over the full
    /// new payload.
    pub fn append_data(&mut self, data: &[u8]) -> Result<()> {
        self.ensure_capacity(self.payload.len() + data.len())?;
        self.payload.extend_from_slice(data);
        self.recompute_checksum();
        Ok(())
    }

    /// Swap in a whole new payload buffer, adopting it without copying.
    pub fn replace_payload(&mut self, data: Vec<u8>) {
        self.payload = data;
        self.recompute_checksum();
    }

    /// Recompute the stored checksum over the current payload.
    pub fn recompute_checksum(&mut self) {
        self.checksum = crc32fast::hash(&self.payload);
    }

    /// True when the stored checksum matches the payload bytes.
    pub fn verify_checksum(&self) -> bool {
        self.checksum == crc32fast::hash(&self.payload)
    }

    /// Copy the payload into a caller-supplied buffer.
    ///
    /// # Errors
    /// `BufferTooSmall` when `buf` cannot hold the payload.
    pub fn copy_payload_into(&self, buf: &mut [u8]) -> Result<usize> {
        if buf.len() < self.payload.len() {
            return Err(TransportError::BufferTooSmall {
                needed: self.payload.len(),
                available: buf.len(),
            });
        }
        buf[..self.payload.len()].copy_from_slice(&self.payload);
        Ok(self.payload.len())
    }

    /// Upsert a metadata entry.
    ///
    /// # Errors
    /// `InvalidParameters` for an empty or oversized key,
    /// `CapacityExceeded` when the table is full and `key` is new.
    pub fn set_metadata(&mut self, key: &str, value: &[u8]) -> Result<()> {
        if key.is_empty() || key.len() > MAX_METADATA_KEY_LEN {
            return Err(TransportError::InvalidParameters(format!(
                "metadata key must be 1-{MAX_METADATA_KEY_LEN} bytes"
            )));
        }
        if let Some(entry) = self.metadata.iter_mut().find(|e| e.key == key) {
            entry.value = value.to_vec();
            return Ok(());
        }
        if self.metadata.len() >= MAX_METADATA_ENTRIES {
            return Err(TransportError::CapacityExceeded(format!(
                "metadata table full ({MAX_METADATA_ENTRIES} entries)"
            )));
        }
        self.metadata.push(MetadataEntry {
            key: key.to_string(),
            value: value.to_vec(),
        });
        self.flags.insert(PacketFlags::HAS_METADATA);
        Ok(())
    }

    /// Look up a metadata value by exact key match
    pub fn get_metadata(&self, key: &str) -> Option<&[u8]> {
        self.metadata
            .iter()
            .find(|e| e.key == key)
            .map(|e| e.value.as_slice())
    }

    /// Remove a metadata entry, returning its value if present.
    pub fn remove_metadata(&mut self, key: &str) -> Option<Vec<u8>> {
        let pos = self.metadata.iter().position(|e| e.key == key)?;
        let entry = self.metadata.remove(pos);
        if self.metadata.is_empty() {
            self.flags.remove(PacketFlags::HAS_METADATA);
        }
        Some(entry.value)
    }

    /// Number of metadata entries
    pub fn metadata_len(&self) -> usize {
        self.metadata.len()
    }

    /// Metadata entries in insertion order
    pub fn metadata(&self) -> &[MetadataEntry] {
        &self.metadata
    }

    fn set_metadata_u32(&mut self, key: &str, value: u32) -> Result<()> {
        self.set_metadata(key, &value.to_be_bytes())
    }

    fn get_metadata_u32(&self, key: &str) -> Option<u32> {
        let raw = self.get_metadata(key)?;
        let bytes: [u8; 4] = raw.try_into().ok()?;
        Some(u32::from_be_bytes(bytes))
    }

    /// 0-based fragment index, present on fragments only
    pub fn fragment_index(&self) -> Option<u32> {
        self.get_metadata_u32(META_FRAGMENT_INDEX)
    }

    /// Total fragment count, present on fragments only
    pub fn total_fragments(&self) -> Option<u32> {
        self.get_metadata_u32(META_TOTAL_FRAGMENTS)
    }

    /// Rebuild a packet from decoded wire fields. The stored checksum is
    /// kept as received so corruption stays observable through
    /// [`Packet::verify_checksum`].
    pub(crate) fn from_wire_parts(
        kind: u16,
        id: u32,
        sequence: u32,
        timestamp: u64,
        priority: u8,
        flags: PacketFlags,
        checksum: u32,
        payload: Vec<u8>,
        metadata: Vec<MetadataEntry>,
    ) -> Self {
        Self {
            kind,
            id,
            sequence,
            timestamp,
            priority,
            flags,
            checksum,
            payload,
            metadata,
        }
    }

    /// Slice fragment `index` of the payload into a new packet.
    ///
    /// Header fields are copied from the source; the fragment carries
    /// `FRAGMENTED` (plus `FIRST_FRAGMENT`/`LAST_FRAGMENT` as applicable)
    /// and its index and the total count in metadata. The checksum covers
    /// the fragment's own payload only.
    ///
    /// # Errors
    /// `InvalidParameters` when `fragment_size` is 0 or
    /// `index * fragment_size` falls past the payload.
    pub fn fragment(&self, index: usize, fragment_size: usize) -> Result<Packet> {
        if fragment_size == 0 {
            return Err(TransportError::InvalidParameters(
                "fragment size must be nonzero".into(),
            ));
        }
        let offset = index.checked_mul(fragment_size).ok_or_else(|| {
            TransportError::InvalidParameters("fragment offset overflow".into())
        })?;
        if offset >= self.payload.len() {
            return Err(TransportError::InvalidParameters(format!(
                "fragment {index} starts at {offset}, past payload of {} bytes",
                self.payload.len()
            )));
        }
        let end = (offset + fragment_size).min(self.payload.len());
        let total = self.payload.len().div_ceil(fragment_size);

        let mut frag = Packet::from_slice(&self.payload[offset..end])?;
        frag.kind = self.kind;
        frag.id = self.id;
        frag.sequence = self.sequence;
        frag.timestamp = self.timestamp;
        frag.priority = self.priority;
        frag.flags = self.flags | PacketFlags::FRAGMENTED;
        if index == 0 {
            frag.flags.insert(PacketFlags::FIRST_FRAGMENT);
        }
        if index == total - 1 {
            frag.flags.insert(PacketFlags::LAST_FRAGMENT);
        }
        frag.set_metadata_u32(META_FRAGMENT_INDEX, index as u32)?;
        frag.set_metadata_u32(META_TOTAL_FRAGMENTS, total as u32)?;
        Ok(frag)
    }

    /// Split the whole payload into fragments of at most `fragment_size`
    /// bytes.
    pub fn fragment_all(&self, fragment_size: usize) -> Result<Vec<Packet>> {
        if fragment_size == 0 {
            return Err(TransportError::InvalidParameters(
                "fragment size must be nonzero".into(),
            ));
        }
        let total = self.payload.len().div_ceil(fragment_size);
        let mut out = Vec::with_capacity(total);
        for index in 0..total {
            out.push(self.fragment(index, fragment_size)?);
        }
        Ok(out)
    }

    /// Reassemble fragments into the original packet.
    ///
    /// Fragments are sorted by their `frag.index` metadata internally, so
    /// callers may supply them in any order. All fragments must share the
    /// same `id`. Fragmentation flags and metadata are stripped from the
    /// result and the checksum is recomputed over the joined payload.
    ///
    /// # Errors
    /// - `InvalidState` when the first fragment carries no total count or
    ///   any fragment is missing its index metadata
    /// - `InvalidParameters` when the supplied count differs from the
    ///   recorded total or ids disagree
    pub fn reassemble(fragments: &[Packet]) -> Result<Packet> {
        let first_supplied = fragments.first().ok_or_else(|| {
            TransportError::InvalidParameters("no fragments supplied".into())
        })?;
        let id = first_supplied.id;
        if fragments.iter().any(|f| f.id != id) {
            return Err(TransportError::InvalidParameters(
                "fragments belong to different packets".into(),
            ));
        }

        let head = fragments
            .iter()
            .find(|f| f.has_flag(PacketFlags::FIRST_FRAGMENT))
            .ok_or_else(|| {
                TransportError::InvalidState("no fragment carries the first-fragment flag".into())
            })?;
        let total = head.total_fragments().ok_or_else(|| {
            TransportError::InvalidState("first fragment carries no total-fragment count".into())
        })?;
        if fragments.len() != total as usize {
            return Err(TransportError::InvalidParameters(format!(
                "expected {total} fragments, got {}",
                fragments.len()
            )));
        }

        let mut ordered: Vec<(u32, &Packet)> = Vec::with_capacity(fragments.len());
        for frag in fragments {
            let index = frag.fragment_index().ok_or_else(|| {
                TransportError::InvalidState("fragment carries no index metadata".into())
            })?;
            ordered.push((index, frag));
        }
        ordered.sort_by_key(|(index, _)| *index);

        let joined_len: usize = ordered.iter().map(|(_, f)| f.len()).sum();
        let mut payload = Vec::new();
        payload
            .try_reserve_exact(joined_len)
            .map_err(|_| TransportError::OutOfMemory)?;
        for (_, frag) in &ordered {
            payload.extend_from_slice(frag.payload());
        }

        let mut packet = Packet::from_vec(payload)?;
        packet.kind = head.kind;
        packet.id = head.id;
        packet.sequence = head.sequence;
        packet.timestamp = head.timestamp;
        packet.priority = head.priority;
        packet.flags = head.flags
            & !(PacketFlags::FRAGMENTED
                | PacketFlags::FIRST_FRAGMENT
                | PacketFlags::LAST_FRAGMENT);
        for entry in head.metadata() {
            if entry.key != META_FRAGMENT_INDEX && entry.key != META_TOTAL_FRAGMENTS {
                packet.set_metadata(&entry.key, &entry.value)?;
            }
        }
        if packet.metadata.is_empty() {
            packet.flags.remove(PacketFlags::HAS_METADATA);
        }
        packet.recompute_checksum();
        Ok(packet)
    }
}
