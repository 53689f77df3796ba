//! Endpoint identity and liveness.
//!
//! An endpoint is one live network connection, client-initiated or
//! server-accepted. It records which registry collection owns it at
//! creation time, so send-path resolution never has to re-derive ownership
//! by scanning.

use crate::protocol::state::ProtocolState;
use std::fmt;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::RwLock;

/// Generation-checked arena address of a registered endpoint.
///
/// A stale id (the slot was reused after removal) fails lookup instead of
/// aliasing the new occupant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct EndpointId {
    pub(crate) index: u32,
    pub(crate) generation: u32,
}

impl EndpointId {
    #[cfg(test)]
    pub(crate) fn test_id(index: u32) -> Self {
        Self {
            index,
            generation: 0,
        }
    }
}

impl fmt::Display for EndpointId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ep-{}.{}", self.index, self.generation)
    }
}

/// Which side initiated the connection
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EndpointRole {
    Client,
    Server,
}

/// Socket liveness, independent of the protocol state machine
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkState {
    Connecting,
    Connected,
    Disconnected,
}

/// Identifier of a listening server registered with the transport
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ServerId(pub(crate) u32);

impl fmt::Display for ServerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "srv-{}", self.0)
    }
}

/// The registry collection holding an endpoint's connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EndpointOwner {
    /// Client collection
    Client,
    /// Accepted-connection table of one server
    Server(ServerId),
}

/// One live network connection.
#[derive(Debug)]
pub struct Endpoint {
    role: EndpointRole,
    owner: EndpointOwner,
    peer_addr: SocketAddr,
    link: RwLock<LinkState>,
    protocol_state: RwLock<ProtocolState>,
    bytes_sent: AtomicU64,
    bytes_received: AtomicU64,
}

impl Endpoint {
    pub fn new(role: EndpointRole, owner: EndpointOwner, peer_addr: SocketAddr) -> Self {
        Self {
            role,
            owner,
            peer_addr,
            link: RwLock::new(LinkState::Connecting),
            protocol_state: RwLock::new(ProtocolState::Init),
            bytes_sent: AtomicU64::new(0),
            bytes_received: AtomicU64::new(0),
        }
    }

    pub fn role(&self) -> EndpointRole {
        self.role
    }

    pub fn owner(&self) -> EndpointOwner {
        self.owner
    }

    pub fn peer_addr(&self) -> SocketAddr {
        self.peer_addr
    }

    pub fn link(&self) -> LinkState {
        self.link.read().map(|l| *l).unwrap_or(LinkState::Disconnected)
    }

    pub(crate) fn set_link(&self, state: LinkState) {
        if let Ok(mut link) = self.link.write() {
            *link = state;
        }
    }

    pub fn protocol_state(&self) -> ProtocolState {
        self.protocol_state
            .read()
            .map(|s| *s)
            .unwrap_or(ProtocolState::Error)
    }

    pub(crate) fn set_protocol_state(&self, state: ProtocolState) {
        if let Ok(mut current) = self.protocol_state.write() {
            *current = state;
        }
    }

    /// Cumulative bytes written to the socket
    pub fn bytes_sent(&self) -> u64 {
        self.bytes_sent.load(Ordering::Relaxed)
    }

    /// Cumulative bytes read from the socket
    pub fn bytes_received(&self) -> u64 {
        self.bytes_received.load(Ordering::Relaxed)
    }

    pub(crate) fn record_sent(&self, bytes: u64) {
        self.bytes_sent.fetch_add(bytes, Ordering::Relaxed);
    }

    pub(crate) fn record_received(&self, bytes: u64) {
        self.bytes_received.fetch_add(bytes, Ordering::Relaxed);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn addr() -> SocketAddr {
        "127.0.0.1:9000".parse().unwrap()
    }

    #[test]
    fn fresh_endpoint_state() {
        let ep = Endpoint::new(EndpointRole::Client, EndpointOwner::Client, addr());
        assert_eq!(ep.link(), LinkState::Connecting);
        assert_eq!(ep.protocol_state(), ProtocolState::Init);
        assert_eq!(ep.bytes_sent(), 0);
        assert_eq!(ep.bytes_received(), 0);
    }

    #[test]
    fn byte_counters_accumulate() {
        let ep = Endpoint::new(EndpointRole::Server, EndpointOwner::Server(ServerId(1)), addr());
        ep.record_sent(100);
        ep.record_sent(50);
        ep.record_received(7);
        assert_eq!(ep.bytes_sent(), 150);
        assert_eq!(ep.bytes_received(), 7);
    }

    #[test]
    fn id_display() {
        let id = EndpointId {
            index: 3,
            generation: 2,
        };
        assert_eq!(id.to_string(), "ep-3.2");
    }
}
