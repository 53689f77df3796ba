//! # Error Types
//!
//! Error handling for the transport core.
//!
//! This module defines every error variant a public transport operation can
//! return, from argument validation failures to I/O and capacity errors.
//!
//! ## Error Categories
//! - **Validation**: bad arguments, undersized buffers
//! - **Lifecycle**: initialization ordering, partial-construction failures
//! - **Capacity**: bounded registries and metadata tables
//! - **I/O**: socket and TLS failures
//! - **Policy**: protocol-state gate denials
//!
//! Recoverable conditions (capacity, not-found) never tear down the
//! transport; callers observe them as ordinary `Err` values and retry or
//! back off. Checksum mismatches are deliberately *not* errors: they are
//! reported through [`Packet::verify_checksum`](crate::core::packet::Packet::verify_checksum)
//! so the caller decides whether a corrupt packet is fatal or discardable.

use std::io;
use thiserror::Error;

/// Primary error type for all transport operations.
#[derive(Error, Debug)]
pub enum TransportError {
    #[error("invalid parameters: {0}")]
    InvalidParameters(String),

    #[error("out of memory")]
    OutOfMemory,

    #[error("initialization failed: {0}")]
    InitializationFailed(String),

    #[error("already initialized")]
    AlreadyInitialized,

    #[error("not initialized")]
    NotInitialized,

    #[error("capacity exceeded: {0}")]
    CapacityExceeded(String),

    #[error("not found")]
    NotFound,

    #[error("buffer too small: need {needed} bytes, have {available}")]
    BufferTooSmall { needed: usize, available: usize },

    #[error("invalid state: {0}")]
    InvalidState(String),

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("access denied")]
    AccessDenied,

    #[error("unsupported operation: {0}")]
    UnsupportedOperation(String),
}

impl TransportError {
    /// Operation timeouts surface as `Io` with `ErrorKind::TimedOut`.
    pub fn timed_out(what: &str) -> Self {
        Self::Io(io::Error::new(io::ErrorKind::TimedOut, what.to_string()))
    }

    /// True for conditions a caller can recover from without tearing the
    /// transport down.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            Self::CapacityExceeded(_)
                | Self::NotFound
                | Self::BufferTooSmall { .. }
                | Self::AccessDenied
        )
    }
}

/// Type alias for Results using TransportError
pub type Result<T> = std::result::Result<T, TransportError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn timeout_maps_to_io() {
        let err = TransportError::timed_out("connect");
        match err {
            TransportError::Io(e) => assert_eq!(e.kind(), io::ErrorKind::TimedOut),
            other => panic!("unexpected variant: {other:?}"),
        }
    }

    #[test]
    fn recoverable_classification() {
        assert!(TransportError::NotFound.is_recoverable());
        assert!(TransportError::CapacityExceeded("endpoints".into()).is_recoverable());
        assert!(!TransportError::NotInitialized.is_recoverable());
    }
}
