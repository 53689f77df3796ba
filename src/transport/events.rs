//! Transport events, handler tables, and statistics.
//!
//! Handlers are closure values in bounded per-kind lists; the registry
//! fires them synchronously when it detects a state change. Statistics
//! mutate only inside the event-firing path, under the stats lock, so
//! counter updates are never lost between concurrent workers.

use crate::transport::endpoint::EndpointId;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Bound on handlers per event kind
pub const MAX_EVENT_HANDLERS: usize = 8;

/// Number of event kinds, sizing the per-kind handler table
pub(crate) const EVENT_KIND_COUNT: usize = 5;

/// Observable transport state changes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventKind {
    Connect,
    Disconnect,
    DataReceived,
    DataSent,
    Error,
}

impl EventKind {
    pub(crate) fn table_index(self) -> usize {
        match self {
            EventKind::Connect => 0,
            EventKind::Disconnect => 1,
            EventKind::DataReceived => 2,
            EventKind::DataSent => 3,
            EventKind::Error => 4,
        }
    }
}

/// One fired event, passed by reference to every registered handler.
#[derive(Debug, Clone)]
pub struct TransportEvent {
    pub kind: EventKind,
    /// Endpoint the event concerns, absent for transport-wide errors
    pub endpoint: Option<EndpointId>,
    /// Wire bytes moved, for data events
    pub bytes: u64,
    /// Human-readable detail, for error events
    pub detail: Option<String>,
}

impl TransportEvent {
    pub(crate) fn connect(endpoint: EndpointId) -> Self {
        Self {
            kind: EventKind::Connect,
            endpoint: Some(endpoint),
            bytes: 0,
            detail: None,
        }
    }

    pub(crate) fn disconnect(endpoint: EndpointId) -> Self {
        Self {
            kind: EventKind::Disconnect,
            endpoint: Some(endpoint),
            bytes: 0,
            detail: None,
        }
    }

    pub(crate) fn data_received(endpoint: EndpointId, bytes: u64) -> Self {
        Self {
            kind: EventKind::DataReceived,
            endpoint: Some(endpoint),
            bytes,
            detail: None,
        }
    }

    pub(crate) fn data_sent(endpoint: EndpointId, bytes: u64) -> Self {
        Self {
            kind: EventKind::DataSent,
            endpoint: Some(endpoint),
            bytes,
            detail: None,
        }
    }

    pub(crate) fn error(endpoint: Option<EndpointId>, detail: impl Into<String>) -> Self {
        Self {
            kind: EventKind::Error,
            endpoint,
            bytes: 0,
            detail: Some(detail.into()),
        }
    }
}

/// Event callback value. Closures capture whatever context the old
/// `user_data` pointer would have carried.
pub type EventHandler = Arc<dyn Fn(&TransportEvent) + Send + Sync>;

/// Counters mutated by the event-firing path.
#[derive(Debug)]
pub(crate) struct StatsInner {
    pub connections: u64,
    pub disconnections: u64,
    pub packets_sent: u64,
    pub packets_received: u64,
    pub errors: u64,
    pub started: Instant,
}

impl StatsInner {
    pub fn new() -> Self {
        Self {
            connections: 0,
            disconnections: 0,
            packets_sent: 0,
            packets_received: 0,
            errors: 0,
            started: Instant::now(),
        }
    }

    pub fn apply(&mut self, event: &TransportEvent) {
        match event.kind {
            EventKind::Connect => self.connections += 1,
            EventKind::Disconnect => self.disconnections += 1,
            EventKind::DataReceived => self.packets_received += 1,
            EventKind::DataSent => self.packets_sent += 1,
            EventKind::Error => self.errors += 1,
        }
    }
}

/// Consistent point-in-time statistics snapshot.
#[derive(Debug, Clone)]
pub struct TransportStats {
    pub connections: u64,
    pub disconnections: u64,
    pub packets_sent: u64,
    pub packets_received: u64,
    pub errors: u64,
    pub uptime: Duration,
    /// Summed from live endpoints at snapshot time
    pub bytes_sent: u64,
    /// Summed from live endpoints at snapshot time
    pub bytes_received: u64,
}
