//! Connection plumbing shared by client-initiated and server-accepted
//! endpoints.
//!
//! Each live connection splits its stream into a reader task (which feeds
//! the inbound queue the worker pool drains) and a framed writer guarded by
//! an async lock. Request/response correlation lives here too: a pending
//! map from packet id to the oneshot that `send_message` is awaiting.

use crate::core::codec::PacketCodec;
use crate::core::packet::Packet;
use crate::error::{Result, TransportError};
use crate::transport::endpoint::{Endpoint, EndpointId, ServerId};
use futures::SinkExt;
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use tokio::io::{AsyncRead, AsyncWrite, WriteHalf};
use tokio::sync::{mpsc, oneshot, Mutex as AsyncMutex};
use tokio::task::JoinHandle;
use tokio_util::codec::FramedWrite;

/// Depth of each connection's inbound packet queue
pub(crate) const INBOUND_QUEUE_DEPTH: usize = 256;

/// Object-safe stream bound so plain TCP and TLS connections share one
/// code path.
pub(crate) trait IoStream: AsyncRead + AsyncWrite + Send + Unpin {}
impl<T: AsyncRead + AsyncWrite + Send + Unpin> IoStream for T {}

/// Boxed connection stream
pub(crate) type BoxedIo = Box<dyn IoStream>;

type PacketWriter = FramedWrite<WriteHalf<BoxedIo>, PacketCodec>;

/// One live connection: framed writer, inbound queue, correlation map.
pub(crate) struct PeerConn {
    pub endpoint_id: EndpointId,
    pub endpoint: Arc<Endpoint>,
    writer: AsyncMutex<PacketWriter>,
    inbound_tx: mpsc::Sender<Packet>,
    inbound_rx: AsyncMutex<mpsc::Receiver<Packet>>,
    pending: Mutex<HashMap<u32, oneshot::Sender<Packet>>>,
    sequence: AtomicU32,
    reader: Mutex<Option<JoinHandle<()>>>,
    closed: AtomicBool,
}

impl PeerConn {
    pub fn new(endpoint_id: EndpointId, endpoint: Arc<Endpoint>, writer: PacketWriter) -> Self {
        let (inbound_tx, inbound_rx) = mpsc::channel(INBOUND_QUEUE_DEPTH);
        Self {
            endpoint_id,
            endpoint,
            writer: AsyncMutex::new(writer),
            inbound_tx,
            inbound_rx: AsyncMutex::new(inbound_rx),
            pending: Mutex::new(HashMap::new()),
            sequence: AtomicU32::new(0),
            reader: Mutex::new(None),
            closed: AtomicBool::new(false),
        }
    }

    /// Sender side of the inbound queue, cloned into the reader task
    pub fn inbound_sender(&self) -> mpsc::Sender<Packet> {
        self.inbound_tx.clone()
    }

    /// Next per-session sequence number
    pub fn next_sequence(&self) -> u32 {
        self.sequence.fetch_add(1, Ordering::Relaxed)
    }

    /// Write one packet to the socket, recording the wire bytes on the
    /// endpoint's counter.
    pub async fn send_frame(&self, packet: Packet) -> Result<()> {
        let wire_bytes = (packet.wire_size() + 4) as u64;
        let mut writer = self.writer.lock().await;
        writer.send(packet).await?;
        self.endpoint.record_sent(wire_bytes);
        Ok(())
    }

    /// Register a correlation id `send_message` will await
    pub fn register_pending(&self, id: u32) -> oneshot::Receiver<Packet> {
        let (tx, rx) = oneshot::channel();
        if let Ok(mut pending) = self.pending.lock() {
            pending.insert(id, tx);
        }
        rx
    }

    /// Drop a correlation registration after timeout or send failure
    pub fn cancel_pending(&self, id: u32) {
        if let Ok(mut pending) = self.pending.lock() {
            pending.remove(&id);
        }
    }

    /// Route an inbound packet to a waiting `send_message` call if one is
    /// registered for its id; otherwise hand the packet back for queue
    /// dispatch.
    pub fn complete_pending(&self, packet: Packet) -> Option<Packet> {
        let sender = match self.pending.lock() {
            Ok(mut pending) => pending.remove(&packet.id),
            Err(_) => None,
        };
        match sender {
            Some(tx) => {
                // Receiver may have timed out already; the packet is then
                // simply dropped, matching a late response arriving after
                // the caller gave up.
                let _ = tx.send(packet);
                None
            }
            None => Some(packet),
        }
    }

    /// Pull every queued inbound packet without blocking.
    ///
    /// `try_lock` keeps drain passes non-blocking: if another worker holds
    /// the queue it is already being drained.
    pub fn drain_inbound(&self) -> Vec<Packet> {
        let mut out = Vec::new();
        if let Ok(mut rx) = self.inbound_rx.try_lock() {
            while let Ok(packet) = rx.try_recv() {
                out.push(packet);
            }
        }
        out
    }

    pub fn set_reader(&self, handle: JoinHandle<()>) {
        if let Ok(mut reader) = self.reader.lock() {
            *reader = Some(handle);
        }
    }

    pub fn abort_reader(&self) {
        if let Ok(mut reader) = self.reader.lock() {
            if let Some(handle) = reader.take() {
                handle.abort();
            }
        }
    }

    pub fn mark_closed(&self) {
        self.closed.store(true, Ordering::Release);
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }
}

/// One listening server: accept task plus its table of accepted
/// connections, bounded by the `backlog` passed to `listen`.
pub(crate) struct ServerSlot {
    pub id: ServerId,
    pub local_addr: SocketAddr,
    backlog: usize,
    conns: RwLock<HashMap<EndpointId, Arc<PeerConn>>>,
    accept_task: Mutex<Option<JoinHandle<()>>>,
}

impl ServerSlot {
    pub fn new(id: ServerId, local_addr: SocketAddr, backlog: usize) -> Self {
        Self {
            id,
            local_addr,
            backlog,
            conns: RwLock::new(HashMap::new()),
            accept_task: Mutex::new(None),
        }
    }

    pub fn insert_conn(&self, conn: Arc<PeerConn>) -> Result<()> {
        let mut conns = self
            .conns
            .write()
            .map_err(|_| TransportError::InvalidState("server table lock poisoned".into()))?;
        if conns.len() >= self.backlog {
            return Err(TransportError::CapacityExceeded(format!(
                "server {} at its backlog of {} connections",
                self.id, self.backlog
            )));
        }
        conns.insert(conn.endpoint_id, conn);
        Ok(())
    }

    pub fn remove_conn(&self, id: EndpointId) -> Option<Arc<PeerConn>> {
        self.conns.write().ok()?.remove(&id)
    }

    pub fn conn(&self, id: EndpointId) -> Option<Arc<PeerConn>> {
        self.conns.read().ok()?.get(&id).cloned()
    }

    pub fn conns_snapshot(&self) -> Vec<Arc<PeerConn>> {
        self.conns
            .read()
            .map(|c| c.values().cloned().collect())
            .unwrap_or_default()
    }

    pub fn set_accept_task(&self, handle: JoinHandle<()>) {
        if let Ok(mut task) = self.accept_task.lock() {
            *task = Some(handle);
        }
    }

    pub fn abort_accept(&self) {
        if let Ok(mut task) = self.accept_task.lock() {
            if let Some(handle) = task.take() {
                handle.abort();
            }
        }
    }
}
