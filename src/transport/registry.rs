//! Connection and handler registry.
//!
//! Four independent collections, each under its own lock: client
//! connections, listening servers, the endpoint arena, and the per-kind
//! event handler tables. Per-collection locking is deliberate and
//! load-bearing: a worker draining client queues never contends with a
//! thread registering a new server.
//!
//! Endpoints live in a generation-checked slot arena. A removed slot bumps
//! its generation before reuse, so a stale [`EndpointId`] held elsewhere
//! fails lookup with `NotFound` instead of aliasing the slot's next
//! occupant.

use crate::error::{Result, TransportError};
use crate::transport::conn::{PeerConn, ServerSlot};
use crate::transport::endpoint::{Endpoint, EndpointId, ServerId};
use crate::transport::events::{
    EventHandler, EventKind, StatsInner, TransportEvent, TransportStats, EVENT_KIND_COUNT,
    MAX_EVENT_HANDLERS,
};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use tokio::sync::Notify;

fn poisoned(which: &str) -> TransportError {
    TransportError::InvalidState(format!("{which} lock poisoned"))
}

#[derive(Debug)]
struct Slot {
    generation: u32,
    entry: Option<Arc<Endpoint>>,
}

/// Slot arena addressed by generation-checked indices.
#[derive(Debug, Default)]
struct EndpointArena {
    slots: Vec<Slot>,
    free: Vec<u32>,
    live: usize,
}

impl EndpointArena {
    fn insert(&mut self, endpoint: Arc<Endpoint>) -> EndpointId {
        self.live += 1;
        match self.free.pop() {
            Some(index) => {
                let slot = &mut self.slots[index as usize];
                slot.entry = Some(endpoint);
                EndpointId {
                    index,
                    generation: slot.generation,
                }
            }
            None => {
                let index = self.slots.len() as u32;
                self.slots.push(Slot {
                    generation: 0,
                    entry: Some(endpoint),
                });
                EndpointId {
                    index,
                    generation: 0,
                }
            }
        }
    }

    fn get(&self, id: EndpointId) -> Option<Arc<Endpoint>> {
        self.slots
            .get(id.index as usize)
            .filter(|slot| slot.generation == id.generation)
            .and_then(|slot| slot.entry.clone())
    }

    fn remove(&mut self, id: EndpointId) -> Option<Arc<Endpoint>> {
        let slot = self.slots.get_mut(id.index as usize)?;
        if slot.generation != id.generation {
            return None;
        }
        let entry = slot.entry.take()?;
        slot.generation = slot.generation.wrapping_add(1);
        self.free.push(id.index);
        self.live -= 1;
        Some(entry)
    }

    fn ids(&self) -> Vec<EndpointId> {
        self.slots
            .iter()
            .enumerate()
            .filter(|(_, slot)| slot.entry.is_some())
            .map(|(index, slot)| EndpointId {
                index: index as u32,
                generation: slot.generation,
            })
            .collect()
    }

    fn sum_bytes(&self) -> (u64, u64) {
        let mut sent = 0;
        let mut received = 0;
        for slot in &self.slots {
            if let Some(endpoint) = &slot.entry {
                sent += endpoint.bytes_sent();
                received += endpoint.bytes_received();
            }
        }
        (sent, received)
    }
}

/// The single shared mutable state of the transport.
pub(crate) struct Registry {
    max_endpoints: usize,
    max_connections: usize,
    endpoints: RwLock<EndpointArena>,
    clients: RwLock<HashMap<EndpointId, Arc<PeerConn>>>,
    servers: RwLock<HashMap<ServerId, Arc<ServerSlot>>>,
    handlers: Mutex<[Vec<EventHandler>; EVENT_KIND_COUNT]>,
    stats: Mutex<StatsInner>,
    wake: Notify,
    next_server: AtomicU32,
}

impl Registry {
    pub fn new(max_endpoints: usize, max_connections: usize) -> Self {
        Self {
            max_endpoints,
            max_connections,
            endpoints: RwLock::new(EndpointArena::default()),
            clients: RwLock::new(HashMap::new()),
            servers: RwLock::new(HashMap::new()),
            handlers: Mutex::new(Default::default()),
            stats: Mutex::new(StatsInner::new()),
            wake: Notify::new(),
            next_server: AtomicU32::new(0),
        }
    }

    // --- endpoints ---

    /// Register an endpoint, firing `Connect` synchronously on success.
    pub fn register_endpoint(&self, endpoint: Arc<Endpoint>) -> Result<EndpointId> {
        let id = {
            let mut arena = self.endpoints.write().map_err(|_| poisoned("endpoint"))?;
            if arena.live >= self.max_endpoints {
                return Err(TransportError::CapacityExceeded(format!(
                    "endpoint registry full ({} endpoints)",
                    self.max_endpoints
                )));
            }
            arena.insert(endpoint)
        };
        self.fire_event(TransportEvent::connect(id));
        self.wake_workers();
        Ok(id)
    }

    /// Remove an endpoint, firing `Disconnect` synchronously.
    ///
    /// # Errors
    /// `NotFound` for an id that is absent or stale.
    pub fn unregister_endpoint(&self, id: EndpointId) -> Result<Arc<Endpoint>> {
        let endpoint = self
            .endpoints
            .write()
            .map_err(|_| poisoned("endpoint"))?
            .remove(id)
            .ok_or(TransportError::NotFound)?;
        endpoint.set_link(crate::transport::endpoint::LinkState::Disconnected);
        self.fire_event(TransportEvent::disconnect(id));
        self.wake_workers();
        Ok(endpoint)
    }

    pub fn endpoint(&self, id: EndpointId) -> Option<Arc<Endpoint>> {
        self.endpoints.read().ok()?.get(id)
    }

    pub fn endpoint_count(&self) -> usize {
        self.endpoints.read().map(|a| a.live).unwrap_or(0)
    }

    pub fn endpoint_ids(&self) -> Vec<EndpointId> {
        self.endpoints.read().map(|a| a.ids()).unwrap_or_default()
    }

    // --- clients ---

    pub fn insert_client(&self, conn: Arc<PeerConn>) -> Result<()> {
        let mut clients = self.clients.write().map_err(|_| poisoned("client"))?;
        if clients.len() >= self.max_connections {
            return Err(TransportError::CapacityExceeded(format!(
                "client registry full ({} connections)",
                self.max_connections
            )));
        }
        clients.insert(conn.endpoint_id, conn);
        Ok(())
    }

    pub fn remove_client(&self, id: EndpointId) -> Option<Arc<PeerConn>> {
        self.clients.write().ok()?.remove(&id)
    }

    pub fn client(&self, id: EndpointId) -> Option<Arc<PeerConn>> {
        self.clients.read().ok()?.get(&id).cloned()
    }

    pub fn clients_snapshot(&self) -> Vec<Arc<PeerConn>> {
        self.clients
            .read()
            .map(|c| c.values().cloned().collect())
            .unwrap_or_default()
    }

    pub fn client_count(&self) -> usize {
        self.clients.read().map(|c| c.len()).unwrap_or(0)
    }

    // --- servers ---

    pub fn allocate_server_id(&self) -> ServerId {
        ServerId(self.next_server.fetch_add(1, Ordering::Relaxed))
    }

    pub fn insert_server(&self, slot: Arc<ServerSlot>) -> Result<()> {
        let mut servers = self.servers.write().map_err(|_| poisoned("server"))?;
        if servers.len() >= self.max_connections {
            return Err(TransportError::CapacityExceeded(format!(
                "server registry full ({} servers)",
                self.max_connections
            )));
        }
        servers.insert(slot.id, slot);
        Ok(())
    }

    pub fn remove_server(&self, id: ServerId) -> Option<Arc<ServerSlot>> {
        self.servers.write().ok()?.remove(&id)
    }

    pub fn server(&self, id: ServerId) -> Option<Arc<ServerSlot>> {
        self.servers.read().ok()?.get(&id).cloned()
    }

    pub fn servers_snapshot(&self) -> Vec<Arc<ServerSlot>> {
        self.servers
            .read()
            .map(|s| s.values().cloned().collect())
            .unwrap_or_default()
    }

    pub fn server_count(&self) -> usize {
        self.servers.read().map(|s| s.len()).unwrap_or(0)
    }

    // --- event handlers & stats ---

    /// Add a handler for one event kind.
    ///
    /// # Errors
    /// `CapacityExceeded` past [`MAX_EVENT_HANDLERS`] per kind.
    pub fn register_event_handler(&self, kind: EventKind, handler: EventHandler) -> Result<()> {
        let mut table = self.handlers.lock().map_err(|_| poisoned("handler"))?;
        let list = &mut table[kind.table_index()];
        if list.len() >= MAX_EVENT_HANDLERS {
            return Err(TransportError::CapacityExceeded(format!(
                "handler list for {kind:?} full ({MAX_EVENT_HANDLERS} handlers)"
            )));
        }
        list.push(handler);
        Ok(())
    }

    /// Apply the event to the statistics and invoke every registered
    /// handler synchronously.
    ///
    /// The handler list is snapshotted before invocation so a handler may
    /// itself register handlers without deadlocking.
    pub fn fire_event(&self, event: TransportEvent) {
        if let Ok(mut stats) = self.stats.lock() {
            stats.apply(&event);
        }
        let snapshot: Vec<EventHandler> = match self.handlers.lock() {
            Ok(table) => table[event.kind.table_index()].clone(),
            Err(_) => Vec::new(),
        };
        for handler in &snapshot {
            handler(&event);
        }
    }

    /// Consistent snapshot: counters copied under the stats lock, byte
    /// totals resummed from live endpoints.
    pub fn stats_snapshot(&self) -> TransportStats {
        let (bytes_sent, bytes_received) = self
            .endpoints
            .read()
            .map(|a| a.sum_bytes())
            .unwrap_or((0, 0));
        match self.stats.lock() {
            Ok(stats) => TransportStats {
                connections: stats.connections,
                disconnections: stats.disconnections,
                packets_sent: stats.packets_sent,
                packets_received: stats.packets_received,
                errors: stats.errors,
                uptime: stats.started.elapsed(),
                bytes_sent,
                bytes_received,
            },
            Err(_) => TransportStats {
                connections: 0,
                disconnections: 0,
                packets_sent: 0,
                packets_received: 0,
                errors: 0,
                uptime: std::time::Duration::ZERO,
                bytes_sent,
                bytes_received,
            },
        }
    }

    // --- worker wakeup ---

    /// Release any worker (or cooperative caller) waiting for events.
    pub fn wake_workers(&self) {
        self.wake.notify_waiters();
    }

    pub fn wake_notify(&self) -> &Notify {
        &self.wake
    }
}
