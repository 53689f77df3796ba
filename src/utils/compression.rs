//! Payload compression codecs.
//!
//! LZ4 for latency-sensitive traffic, Zstd for ratio. Decompression output
//! is capped to the protocol's maximum message size so a hostile peer
//! cannot claim a multi-gigabyte expansion.

use crate::config::DEFAULT_MAX_MESSAGE_SIZE;
use crate::error::{Result, TransportError};

/// Supported compression algorithms
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum CompressionKind {
    Lz4,
    Zstd,
}

/// Maximum output size for decompression (aligned with the protocol's
/// message size limit)
const MAX_DECOMPRESSION_SIZE: usize = DEFAULT_MAX_MESSAGE_SIZE;

/// Payloads below this size bypass compression; the frame overhead would
/// outweigh any gain.
pub const MIN_COMPRESS_SIZE: usize = 512;

/// Whether a payload of `len` bytes is worth compressing
pub fn should_compress(len: usize) -> bool {
    len >= MIN_COMPRESS_SIZE
}

/// Compress `data` with the given algorithm.
///
/// # Errors
/// `InvalidState` if the encoder fails.
pub fn compress(data: &[u8], kind: CompressionKind) -> Result<Vec<u8>> {
    match kind {
        CompressionKind::Lz4 => Ok(lz4_flex::compress_prepend_size(data)),
        CompressionKind::Zstd => {
            let mut out = Vec::new();
            zstd::stream::copy_encode(data, &mut out, 1)
                .map_err(|e| TransportError::InvalidState(format!("compression failed: {e}")))?;
            Ok(out)
        }
    }
}

/// Decompress `data`, enforcing [`MAX_DECOMPRESSION_SIZE`] on the output.
///
/// # Errors
/// `InvalidParameters` for corrupt input or an output that exceeds the
/// size limit.
pub fn decompress(data: &[u8], kind: CompressionKind) -> Result<Vec<u8>> {
    match kind {
        CompressionKind::Lz4 => {
            // lz4_flex prepends the uncompressed size as 4 bytes
            // little-endian; validate the claim before any allocation.
            if data.len() < 4 {
                return Err(TransportError::InvalidParameters(
                    "compressed payload truncated".into(),
                ));
            }
            let claimed = u32::from_le_bytes([data[0], data[1], data[2], data[3]]) as usize;
            if claimed > MAX_DECOMPRESSION_SIZE {
                return Err(TransportError::InvalidParameters(format!(
                    "decompressed size claim {claimed} exceeds limit"
                )));
            }
            let out = lz4_flex::decompress_size_prepended(data).map_err(|e| {
                TransportError::InvalidParameters(format!("decompression failed: {e}"))
            })?;
            if out.len() > MAX_DECOMPRESSION_SIZE {
                return Err(TransportError::InvalidParameters(
                    "decompressed payload exceeds limit".into(),
                ));
            }
            Ok(out)
        }
        CompressionKind::Zstd => {
            let mut out = Vec::new();
            let mut decoder = zstd::stream::Decoder::new(data).map_err(|e| {
                TransportError::InvalidParameters(format!("decompression failed: {e}"))
            })?;
            let mut limited = std::io::Read::take(&mut decoder, MAX_DECOMPRESSION_SIZE as u64 + 1);
            std::io::Read::read_to_end(&mut limited, &mut out).map_err(|e| {
                TransportError::InvalidParameters(format!("decompression failed: {e}"))
            })?;
            if out.len() > MAX_DECOMPRESSION_SIZE {
                return Err(TransportError::InvalidParameters(
                    "decompressed payload exceeds limit".into(),
                ));
            }
            Ok(out)
        }
    }
}
