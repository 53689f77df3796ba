//! # Transport Facade
//!
//! The public surface of the transport core: create, connect, listen,
//! send, broadcast, options, statistics, and shutdown, composed over the
//! registry, the worker pool, and the packet codec.
//!
//! ## Structure
//! - **endpoint**: connection identity and counters
//! - **registry**: the four independently locked collections
//! - **conn**: per-connection reader/writer plumbing
//! - **worker**: the event pump pool
//! - **events**: event kinds, handler tables, statistics
//! - **tls**: the opaque TLS handle
//!
//! ## Threading model
//! With `worker_tasks > 0` a fixed pool drains inbound queues in the
//! background. With `worker_tasks == 0` nothing runs behind the caller's
//! back: the embedding runtime drives [`Transport::process_events`] in its
//! own loop.

pub(crate) mod conn;
pub mod endpoint;
pub mod events;
pub(crate) mod registry;
pub(crate) mod tls;
pub(crate) mod worker;

pub use self::endpoint::{Endpoint, EndpointId, EndpointOwner, EndpointRole, LinkState, ServerId};
pub use self::events::{EventHandler, EventKind, TransportEvent, TransportStats, MAX_EVENT_HANDLERS};

use crate::config::TransportConfig;
use crate::core::codec::PacketCodec;
use crate::core::packet::{kind as packet_kind, Packet, PacketFlags};
use crate::error::{Result, TransportError};
use crate::protocol::dispatcher::MessageDispatcher;
use crate::protocol::state::{ProtocolState, SequentialOracle, StateOracle};
use crate::utils::compression::{self, CompressionKind};
use crate::utils::crypto;
use crate::utils::timeout::{with_deadline, DEFAULT_TIMEOUT};
use self::conn::{BoxedIo, PeerConn, ServerSlot};
use futures::StreamExt;
use self::registry::Registry;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, RwLock, RwLockReadGuard};
use std::time::Duration;
use self::tls::TlsContext;
use tokio::io::ReadHalf;
use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinHandle;
use tokio_util::codec::{FramedRead, FramedWrite};
use tracing::{debug, info, warn};
use self::worker::WorkerPool;

/// Runtime-mutable transport option, one variant per knob.
///
/// The option enum replaces a C-style `(option id, void pointer, size)`
/// triple: values are typed, so "exact value-size match" is enforced by
/// the compiler and an unknown option is unrepresentable.
#[derive(Debug, Clone)]
pub enum TransportOption {
    /// Enable or disable TLS. Enabling lazily builds the TLS context from
    /// the configured paths; a failure leaves TLS disabled.
    TlsEnabled(bool),
    CompressionEnabled(bool),
    /// Enabling requires a key to have been supplied first.
    EncryptionEnabled(bool),
    /// 32-byte key material for payload encryption. Write-only.
    EncryptionKey(Vec<u8>),
    ConnectTimeout(Duration),
    OperationTimeout(Duration),
    /// Read buffer size for connections opened after the change
    IoBufferSize(usize),
    TlsCertPath(String),
    TlsKeyPath(String),
    TlsCaPath(String),
}

/// Selector for [`Transport::get_option`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportOptionKind {
    TlsEnabled,
    CompressionEnabled,
    EncryptionEnabled,
    EncryptionKey,
    ConnectTimeout,
    OperationTimeout,
    IoBufferSize,
    TlsCertPath,
    TlsKeyPath,
    TlsCaPath,
}

/// Live-toggleable knobs, all behind one lock.
struct LiveOptions {
    compression_enabled: bool,
    encryption_enabled: bool,
    encryption_key: Option<[u8; crypto::KEY_LEN]>,
    connect_timeout: Duration,
    operation_timeout: Duration,
    io_buffer_size: usize,
    tls_cert_path: Option<String>,
    tls_key_path: Option<String>,
    tls_ca_path: Option<String>,
}

/// State shared between the facade, workers, and connection tasks.
pub(crate) struct TransportInner {
    config: TransportConfig,
    pub(crate) registry: Registry,
    dispatcher: MessageDispatcher,
    oracle: Arc<dyn StateOracle>,
    options: RwLock<LiveOptions>,
    tls: RwLock<Option<Arc<TlsContext>>>,
    initialized: AtomicBool,
    next_correlation: AtomicU32,
    pooled: bool,
}

impl TransportInner {
    fn options_read(&self) -> Result<RwLockReadGuard<'_, LiveOptions>> {
        self.options
            .read()
            .map_err(|_| TransportError::InvalidState("options lock poisoned".into()))
    }

    fn with_options_mut<F: FnOnce(&mut LiveOptions)>(&self, mutate: F) -> Result<()> {
        let mut options = self
            .options
            .write()
            .map_err(|_| TransportError::InvalidState("options lock poisoned".into()))?;
        mutate(&mut options);
        Ok(())
    }

    fn tls_handle(&self) -> Option<Arc<TlsContext>> {
        self.tls.read().ok().and_then(|guard| guard.clone())
    }

    /// Build the TLS context from the configured paths. A failure leaves
    /// TLS exactly as it was: disabled.
    fn enable_tls(&self) -> Result<()> {
        if self.tls_handle().is_some() {
            return Err(TransportError::AlreadyInitialized);
        }
        let (cert, key, ca) = {
            let options = self.options_read()?;
            (
                options.tls_cert_path.clone(),
                options.tls_key_path.clone(),
                options.tls_ca_path.clone(),
            )
        };
        let context = TlsContext::initialize(cert.as_deref(), key.as_deref(), ca.as_deref())?;
        *self
            .tls
            .write()
            .map_err(|_| TransportError::InvalidState("TLS lock poisoned".into()))? =
            Some(Arc::new(context));
        info!("TLS enabled");
        Ok(())
    }

    fn disable_tls(&self) {
        if let Ok(mut tls) = self.tls.write() {
            if tls.take().is_some() {
                info!("TLS disabled");
            }
        }
    }

    /// Resolve the connection owning `id` through the owner reference the
    /// endpoint records at creation; no scan over the registries.
    fn resolve_conn(&self, id: EndpointId) -> Result<Arc<PeerConn>> {
        let endpoint = self.registry.endpoint(id).ok_or(TransportError::NotFound)?;
        let conn = match endpoint.owner() {
            EndpointOwner::Client => self.registry.client(id),
            EndpointOwner::Server(sid) => self.registry.server(sid).and_then(|s| s.conn(id)),
        };
        conn.ok_or_else(|| {
            TransportError::InvalidState(format!("endpoint {id} has no live connection"))
        })
    }

    /// Protocol-state gate. Handshake, auth, and error traffic always
    /// passes; everything else requires the oracle's permission while the
    /// connection has not yet reached `Ready`.
    fn check_gate(&self, endpoint: &Endpoint, kind: u16) -> Result<()> {
        if matches!(
            kind,
            packet_kind::HANDSHAKE | packet_kind::AUTH | packet_kind::ERROR
        ) {
            return Ok(());
        }
        let state = endpoint.protocol_state();
        match state {
            ProtocolState::Ready => Ok(()),
            ProtocolState::Error | ProtocolState::Closed => Err(TransportError::InvalidState(
                format!("connection is {state:?}"),
            )),
            _ => {
                if self.oracle.can_transition(state, ProtocolState::Ready) {
                    Ok(())
                } else {
                    self.registry.fire_event(TransportEvent::error(
                        None,
                        format!("protocol gate denied send in {state:?}"),
                    ));
                    Err(TransportError::AccessDenied)
                }
            }
        }
    }

    /// Apply the configured outbound transforms, recording each in the
    /// packet's flag bitset.
    fn encode_outbound(&self, packet: &mut Packet) -> Result<()> {
        let (compress_on, encrypt_on, key) = {
            let options = self.options_read()?;
            (
                options.compression_enabled,
                options.encryption_enabled,
                options.encryption_key,
            )
        };
        if compress_on
            && !packet.has_flag(PacketFlags::COMPRESSED)
            && compression::should_compress(packet.len())
        {
            let compressed = compression::compress(packet.payload(), CompressionKind::Lz4)?;
            packet.replace_payload(compressed);
            packet.set_flag(PacketFlags::COMPRESSED);
        }
        if encrypt_on && !packet.has_flag(PacketFlags::ENCRYPTED) {
            let key = key.ok_or_else(|| {
                TransportError::InitializationFailed("encryption enabled without a key".into())
            })?;
            let sealed = crypto::seal(&key, packet.payload())?;
            packet.replace_payload(sealed);
            packet.set_flag(PacketFlags::ENCRYPTED);
        }
        Ok(())
    }

    /// Undo inbound transforms in reverse order, clearing each flag.
    fn decode_inbound(&self, mut packet: Packet) -> Result<Packet> {
        if packet.has_flag(PacketFlags::ENCRYPTED) {
            let key = {
                let options = self.options_read()?;
                options.encryption_key
            }
            .ok_or(TransportError::AccessDenied)?;
            let opened = crypto::open(&key, packet.payload())?;
            packet.replace_payload(opened);
            packet.clear_flag(PacketFlags::ENCRYPTED);
        }
        if packet.has_flag(PacketFlags::COMPRESSED) {
            let plain = compression::decompress(packet.payload(), CompressionKind::Lz4)?;
            packet.replace_payload(plain);
            packet.clear_flag(PacketFlags::COMPRESSED);
        }
        Ok(packet)
    }

    /// Encode and write one packet, firing `DataSent` on success.
    async fn send_on_conn(&self, conn: &Arc<PeerConn>, mut packet: Packet) -> Result<()> {
        packet.sequence = conn.next_sequence();
        self.encode_outbound(&mut packet)?;
        let wire_bytes = (packet.wire_size() + 4) as u64;
        conn.send_frame(packet).await?;
        self.registry
            .fire_event(TransportEvent::data_sent(conn.endpoint_id, wire_bytes));
        Ok(())
    }

    /// One non-blocking drain pass over every registered client and every
    /// server's accepted connections.
    pub(crate) async fn drain_pass(&self) -> usize {
        let mut processed = 0;
        for conn in self.registry.clients_snapshot() {
            processed += self.drain_conn(&conn).await;
        }
        for server in self.registry.servers_snapshot() {
            for conn in server.conns_snapshot() {
                processed += self.drain_conn(&conn).await;
            }
        }
        processed
    }

    async fn drain_conn(&self, conn: &Arc<PeerConn>) -> usize {
        let mut processed = 0;
        for packet in conn.drain_inbound() {
            processed += 1;
            let wire_bytes = (packet.wire_size() + 4) as u64;
            self.registry
                .fire_event(TransportEvent::data_received(conn.endpoint_id, wire_bytes));

            if !packet.verify_checksum() {
                warn!(endpoint = %conn.endpoint_id, "dropping packet with checksum mismatch");
                self.registry.fire_event(TransportEvent::error(
                    Some(conn.endpoint_id),
                    "checksum mismatch on inbound packet",
                ));
                continue;
            }
            let packet = match self.decode_inbound(packet) {
                Ok(packet) => packet,
                Err(e) => {
                    self.registry.fire_event(TransportEvent::error(
                        Some(conn.endpoint_id),
                        format!("inbound decode failed: {e}"),
                    ));
                    continue;
                }
            };
            match self.dispatcher.dispatch(conn.endpoint_id, &packet) {
                Ok(Some(mut reply)) => {
                    reply.id = packet.id;
                    let limit = self
                        .options_read()
                        .map(|o| o.operation_timeout)
                        .unwrap_or(DEFAULT_TIMEOUT);
                    if let Err(e) =
                        with_deadline("auto-reply", limit, self.send_on_conn(conn, reply)).await
                    {
                        self.registry.fire_event(TransportEvent::error(
                            Some(conn.endpoint_id),
                            format!("auto-reply failed: {e}"),
                        ));
                    }
                }
                Ok(None) => {}
                Err(e) => {
                    self.registry.fire_event(TransportEvent::error(
                        Some(conn.endpoint_id),
                        format!("message handler failed: {e}"),
                    ));
                }
            }
        }
        if conn.is_closed() {
            self.teardown_conn(conn);
        }
        processed
    }

    /// Remove a connection from its owning collection and unregister its
    /// endpoint; removal and handle teardown are one step from the
    /// caller's perspective.
    fn teardown_conn(&self, conn: &Arc<PeerConn>) {
        conn.abort_reader();
        match conn.endpoint.owner() {
            EndpointOwner::Client => {
                self.registry.remove_client(conn.endpoint_id);
            }
            EndpointOwner::Server(sid) => {
                if let Some(server) = self.registry.server(sid) {
                    server.remove_conn(conn.endpoint_id);
                }
            }
        }
        // Concurrent teardown of the same connection loses this race
        // benignly; the second unregister is NotFound.
        let _ = self.registry.unregister_endpoint(conn.endpoint_id);
    }
}

fn spawn_reader(
    inner: Arc<TransportInner>,
    conn: Arc<PeerConn>,
    mut frames: FramedRead<ReadHalf<BoxedIo>, PacketCodec>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let queue = conn.inbound_sender();
        while let Some(item) = frames.next().await {
            match item {
                Ok(packet) => {
                    let wire_bytes = (packet.wire_size() + 4) as u64;
                    conn.endpoint.record_received(wire_bytes);
                    match conn.complete_pending(packet) {
                        None => {
                            // Consumed by a waiting send_message call.
                            inner.registry.fire_event(TransportEvent::data_received(
                                conn.endpoint_id,
                                wire_bytes,
                            ));
                        }
                        Some(packet) => {
                            if queue.send(packet).await.is_err() {
                                break;
                            }
                        }
                    }
                    inner.registry.wake_workers();
                }
                Err(e) => {
                    debug!(endpoint = %conn.endpoint_id, error = %e, "connection read failed");
                    break;
                }
            }
        }
        conn.mark_closed();
        conn.endpoint.set_link(LinkState::Disconnected);
        inner.registry.wake_workers();
    })
}

fn spawn_acceptor(
    inner: Arc<TransportInner>,
    sid: ServerId,
    listener: TcpListener,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            match listener.accept().await {
                Ok((stream, peer)) => {
                    if let Err(e) = accept_connection(&inner, sid, stream, peer).await {
                        warn!(server = %sid, peer = %peer, error = %e, "rejected inbound connection");
                        inner.registry.fire_event(TransportEvent::error(
                            None,
                            format!("accept failed: {e}"),
                        ));
                    }
                }
                Err(e) => {
                    warn!(server = %sid, error = %e, "accept loop error");
                    inner
                        .registry
                        .fire_event(TransportEvent::error(None, format!("accept failed: {e}")));
                    // Transient resource exhaustion must not kill the loop.
                    tokio::time::sleep(Duration::from_millis(100)).await;
                }
            }
        }
    })
}

async fn accept_connection(
    inner: &Arc<TransportInner>,
    sid: ServerId,
    stream: TcpStream,
    peer: SocketAddr,
) -> Result<()> {
    let slot = inner.registry.server(sid).ok_or(TransportError::NotFound)?;
    if !inner
        .oracle
        .can_transition(ProtocolState::Init, ProtocolState::Handshake)
    {
        return Err(TransportError::AccessDenied);
    }
    // The server side has no caller-supplied timeout; the configured
    // connect timeout bounds the TLS handshake instead.
    let accept_limit = inner
        .options_read()
        .map(|o| o.connect_timeout)
        .unwrap_or(DEFAULT_TIMEOUT);
    let io: BoxedIo = match inner.tls_handle() {
        Some(ctx) => with_deadline("tls accept", accept_limit, ctx.accept(stream)).await?,
        None => Box::new(stream),
    };

    let endpoint = Arc::new(Endpoint::new(
        EndpointRole::Server,
        EndpointOwner::Server(sid),
        peer,
    ));
    let (read_half, write_half) = tokio::io::split(io);
    let codec = PacketCodec::new(inner.config.max_message_size);
    let buffer = inner.options_read()?.io_buffer_size;
    let writer = FramedWrite::new(write_half, codec.clone());
    let frames = FramedRead::with_capacity(read_half, codec, buffer);

    let id = inner.registry.register_endpoint(Arc::clone(&endpoint))?;
    let peer_conn = Arc::new(PeerConn::new(id, Arc::clone(&endpoint), writer));
    if let Err(e) = slot.insert_conn(Arc::clone(&peer_conn)) {
        let _ = inner.registry.unregister_endpoint(id);
        return Err(e);
    }
    let handle = spawn_reader(Arc::clone(inner), Arc::clone(&peer_conn), frames);
    peer_conn.set_reader(handle);
    endpoint.set_link(LinkState::Connected);
    endpoint.set_protocol_state(ProtocolState::Handshake);
    debug!(endpoint = %id, server = %sid, peer = %peer, "accepted connection");
    Ok(())
}

/// The transport instance.
pub struct Transport {
    inner: Arc<TransportInner>,
    pool: tokio::sync::Mutex<Option<WorkerPool>>,
}

impl Transport {
    /// Create a transport with the default sequential state oracle.
    pub fn create(config: TransportConfig) -> Result<Self> {
        Self::create_with_oracle(config, Arc::new(SequentialOracle))
    }

    /// Create a transport consulting `oracle` at the protocol-state gate.
    ///
    /// Invalid configuration values fall back to their defaults. The TLS
    /// context is built before any worker starts, so an
    /// `InitializationFailed` here unwinds with nothing left running, and
    /// the initialized flag is set last: a partially constructed instance
    /// is never observable.
    ///
    /// Must be called inside a tokio runtime when `worker_tasks > 0`.
    pub fn create_with_oracle(
        config: TransportConfig,
        oracle: Arc<dyn StateOracle>,
    ) -> Result<Self> {
        let config = config.sanitized();
        let registry = Registry::new(config.max_endpoints, config.max_connections);
        let options = LiveOptions {
            compression_enabled: config.compression_enabled,
            encryption_enabled: config.encryption_enabled,
            encryption_key: None,
            connect_timeout: config.connect_timeout,
            operation_timeout: config.operation_timeout,
            io_buffer_size: config.io_buffer_size,
            tls_cert_path: config.tls.cert_path.clone(),
            tls_key_path: config.tls.key_path.clone(),
            tls_ca_path: config.tls.ca_path.clone(),
        };

        let tls_context = if config.tls.enabled {
            Some(Arc::new(TlsContext::initialize(
                config.tls.cert_path.as_deref(),
                config.tls.key_path.as_deref(),
                config.tls.ca_path.as_deref(),
            )?))
        } else {
            None
        };

        let pooled = config.worker_tasks > 0;
        let worker_tasks = config.worker_tasks;
        let inner = Arc::new(TransportInner {
            config,
            registry,
            dispatcher: MessageDispatcher::new(),
            oracle,
            options: RwLock::new(options),
            tls: RwLock::new(tls_context),
            initialized: AtomicBool::new(false),
            next_correlation: AtomicU32::new(1),
            pooled,
        });

        let pool = if pooled {
            Some(WorkerPool::start(worker_tasks, Arc::clone(&inner)))
        } else {
            None
        };
        inner.initialized.store(true, Ordering::Release);
        info!(workers = worker_tasks, "transport initialized");
        Ok(Self {
            inner,
            pool: tokio::sync::Mutex::new(pool),
        })
    }

    fn ensure_initialized(&self) -> Result<()> {
        if self.inner.initialized.load(Ordering::Acquire) {
            Ok(())
        } else {
            Err(TransportError::NotInitialized)
        }
    }

    /// Number of pool workers; 0 in cooperative mode.
    pub fn worker_count(&self) -> usize {
        match self.pool.try_lock() {
            Ok(pool) => pool.as_ref().map(|p| p.size()).unwrap_or(0),
            Err(_) => self.inner.config.worker_tasks,
        }
    }

    /// Open a client connection and register its endpoint.
    ///
    /// On any failure the connection is torn down and nothing stays
    /// registered. A zero timeout is a non-blocking attempt.
    pub async fn connect(&self, address: &str, port: u16, timeout: Duration) -> Result<EndpointId> {
        self.ensure_initialized()?;
        if address.is_empty() {
            return Err(TransportError::InvalidParameters(
                "address must not be empty".into(),
            ));
        }
        let inner = &self.inner;
        if !inner
            .oracle
            .can_transition(ProtocolState::Init, ProtocolState::Handshake)
        {
            return Err(TransportError::AccessDenied);
        }

        let tls = inner.tls_handle();
        let (io, peer_addr) = with_deadline("connect", timeout, async {
            let stream = TcpStream::connect((address, port))
                .await
                .map_err(TransportError::Io)?;
            let peer_addr = stream.peer_addr().map_err(TransportError::Io)?;
            let io: BoxedIo = match &tls {
                Some(ctx) => ctx.connect(address, stream).await?,
                None => Box::new(stream),
            };
            Ok((io, peer_addr))
        })
        .await?;

        let endpoint = Arc::new(Endpoint::new(
            EndpointRole::Client,
            EndpointOwner::Client,
            peer_addr,
        ));
        let (read_half, write_half) = tokio::io::split(io);
        let codec = PacketCodec::new(inner.config.max_message_size);
        let buffer = inner.options_read()?.io_buffer_size;
        let writer = FramedWrite::new(write_half, codec.clone());
        let frames = FramedRead::with_capacity(read_half, codec, buffer);

        let id = inner.registry.register_endpoint(Arc::clone(&endpoint))?;
        let peer_conn = Arc::new(PeerConn::new(id, Arc::clone(&endpoint), writer));
        if let Err(e) = inner.registry.insert_client(Arc::clone(&peer_conn)) {
            // Unwind fully: no endpoint may stay registered without its
            // connection slot.
            let _ = inner.registry.unregister_endpoint(id);
            return Err(e);
        }
        let handle = spawn_reader(Arc::clone(inner), Arc::clone(&peer_conn), frames);
        peer_conn.set_reader(handle);
        endpoint.set_link(LinkState::Connected);
        endpoint.set_protocol_state(ProtocolState::Handshake);
        debug!(endpoint = %id, peer = %peer_addr, "client connected");
        Ok(id)
    }

    /// Start a listening server. `backlog` bounds the number of
    /// concurrently accepted live connections.
    ///
    /// A bind failure leaves nothing registered.
    pub async fn listen(&self, port: u16, backlog: usize) -> Result<ServerId> {
        self.ensure_initialized()?;
        if backlog == 0 {
            return Err(TransportError::InvalidParameters(
                "backlog must be nonzero".into(),
            ));
        }
        let listener = TcpListener::bind(("0.0.0.0", port))
            .await
            .map_err(TransportError::Io)?;
        let local_addr = listener.local_addr().map_err(TransportError::Io)?;

        let sid = self.inner.registry.allocate_server_id();
        let slot = Arc::new(ServerSlot::new(sid, local_addr, backlog));
        self.inner.registry.insert_server(Arc::clone(&slot))?;
        let handle = spawn_acceptor(Arc::clone(&self.inner), sid, listener);
        slot.set_accept_task(handle);
        info!(server = %sid, addr = %local_addr, "listening");
        Ok(sid)
    }

    /// Local address of a registered server (useful with port 0)
    pub fn server_addr(&self, id: ServerId) -> Result<SocketAddr> {
        self.inner
            .registry
            .server(id)
            .map(|s| s.local_addr)
            .ok_or(TransportError::NotFound)
    }

    /// Send one packet to an endpoint without awaiting a response.
    pub async fn send_packet(
        &self,
        endpoint: EndpointId,
        packet: Packet,
        timeout: Duration,
    ) -> Result<()> {
        self.ensure_initialized()?;
        let conn = self.inner.resolve_conn(endpoint)?;
        self.inner.check_gate(&conn.endpoint, packet.kind)?;
        with_deadline("send", timeout, self.inner.send_on_conn(&conn, packet)).await
    }

    /// Send a message and await the response correlated by packet id.
    ///
    /// A zero timeout is fire-and-forget and resolves to `Ok(None)`; a
    /// nonzero timeout waits for the response and maps expiry to an
    /// `Io`/`TimedOut` error.
    pub async fn send_message(
        &self,
        endpoint: EndpointId,
        mut message: Packet,
        timeout: Duration,
    ) -> Result<Option<Packet>> {
        self.ensure_initialized()?;
        let conn = self.inner.resolve_conn(endpoint)?;
        self.inner.check_gate(&conn.endpoint, message.kind)?;
        if message.id == 0 {
            message.id = self.inner.next_correlation.fetch_add(1, Ordering::Relaxed);
        }
        if timeout.is_zero() {
            self.inner.send_on_conn(&conn, message).await?;
            return Ok(None);
        }

        let correlation = message.id;
        let response = conn.register_pending(correlation);
        if let Err(e) = with_deadline("send", timeout, self.inner.send_on_conn(&conn, message)).await
        {
            conn.cancel_pending(correlation);
            return Err(e);
        }
        match tokio::time::timeout(timeout, response).await {
            Ok(Ok(packet)) => Ok(Some(self.inner.decode_inbound(packet)?)),
            Ok(Err(_)) => Err(TransportError::InvalidState(
                "connection closed while awaiting response".into(),
            )),
            Err(_) => {
                conn.cancel_pending(correlation);
                Err(TransportError::timed_out("response"))
            }
        }
    }

    /// Best-effort fan-out to every registered endpoint. Partial failures
    /// do not abort the remaining sends; returns the delivered count.
    pub async fn broadcast(&self, packet: &Packet, timeout: Duration) -> Result<usize> {
        self.ensure_initialized()?;
        let mut delivered = 0;
        for id in self.inner.registry.endpoint_ids() {
            let conn = match self.inner.resolve_conn(id) {
                Ok(conn) => conn,
                Err(_) => continue,
            };
            if self.inner.check_gate(&conn.endpoint, packet.kind).is_err() {
                continue;
            }
            match with_deadline(
                "broadcast",
                timeout,
                self.inner.send_on_conn(&conn, packet.clone()),
            )
            .await
            {
                Ok(()) => delivered += 1,
                Err(e) => {
                    debug!(endpoint = %id, error = %e, "broadcast send failed");
                    self.inner.registry.fire_event(TransportEvent::error(
                        Some(id),
                        format!("broadcast failed: {e}"),
                    ));
                }
            }
        }
        Ok(delivered)
    }

    /// Drain pending events once, cooperatively.
    ///
    /// Only valid with `worker_tasks == 0`; with a pool running this is
    /// `UnsupportedOperation`. A zero timeout never blocks; otherwise the
    /// call waits up to `timeout` for a wakeup when the first pass drained
    /// nothing.
    pub async fn process_events(&self, timeout: Duration) -> Result<usize> {
        self.ensure_initialized()?;
        if self.inner.pooled {
            return Err(TransportError::UnsupportedOperation(
                "worker pool is active; events drain in the background".into(),
            ));
        }
        let processed = self.inner.drain_pass().await;
        if processed > 0 || timeout.is_zero() {
            return Ok(processed);
        }
        let wake = self.inner.registry.wake_notify();
        let _ = tokio::time::timeout(timeout, wake.notified()).await;
        Ok(self.inner.drain_pass().await)
    }

    /// Close one endpoint: its connection, registration, and platform
    /// handle go together.
    pub async fn disconnect(&self, endpoint: EndpointId) -> Result<()> {
        self.ensure_initialized()?;
        match self.inner.resolve_conn(endpoint) {
            Ok(conn) => {
                self.inner.teardown_conn(&conn);
                Ok(())
            }
            // Registered but connectionless endpoints still unregister.
            Err(TransportError::InvalidState(_)) => self
                .inner
                .registry
                .unregister_endpoint(endpoint)
                .map(|_| ()),
            Err(e) => Err(e),
        }
    }

    /// Advance an endpoint's protocol state on behalf of the external
    /// state owner. Denied transitions are `AccessDenied`; this layer
    /// never chooses a state itself.
    pub fn set_protocol_state(&self, endpoint: EndpointId, target: ProtocolState) -> Result<()> {
        self.ensure_initialized()?;
        let ep = self
            .inner
            .registry
            .endpoint(endpoint)
            .ok_or(TransportError::NotFound)?;
        let current = ep.protocol_state();
        if current == target {
            return Ok(());
        }
        if !self.inner.oracle.can_transition(current, target) {
            return Err(TransportError::AccessDenied);
        }
        ep.set_protocol_state(target);
        debug!(endpoint = %endpoint, ?current, ?target, "protocol state advanced");
        Ok(())
    }

    /// Look up a registered endpoint
    pub fn endpoint(&self, id: EndpointId) -> Result<Arc<Endpoint>> {
        self.ensure_initialized()?;
        self.inner.registry.endpoint(id).ok_or(TransportError::NotFound)
    }

    /// Currently registered endpoints
    pub fn endpoint_count(&self) -> usize {
        self.inner.registry.endpoint_count()
    }

    /// Currently registered client connections
    pub fn client_count(&self) -> usize {
        self.inner.registry.client_count()
    }

    /// Currently registered listening servers
    pub fn server_count(&self) -> usize {
        self.inner.registry.server_count()
    }

    /// Register an event handler for one event kind.
    pub fn register_event_handler<F>(&self, kind: EventKind, handler: F) -> Result<()>
    where
        F: Fn(&TransportEvent) + Send + Sync + 'static,
    {
        self.ensure_initialized()?;
        self.inner
            .registry
            .register_event_handler(kind, Arc::new(handler))
    }

    /// Register the inbound message handler for a packet kind; a returned
    /// packet is sent back to the originating endpoint automatically.
    pub fn register_message_handler<F>(&self, kind: u16, handler: F) -> Result<()>
    where
        F: Fn(EndpointId, &Packet) -> Result<Option<Packet>> + Send + Sync + 'static,
    {
        self.ensure_initialized()?;
        self.inner.dispatcher.register(kind, handler)
    }

    /// Change a runtime-mutable option.
    pub fn set_option(&self, option: TransportOption) -> Result<()> {
        self.ensure_initialized()?;
        let inner = &self.inner;
        match option {
            TransportOption::TlsEnabled(true) => inner.enable_tls(),
            TransportOption::TlsEnabled(false) => {
                inner.disable_tls();
                Ok(())
            }
            TransportOption::CompressionEnabled(value) => {
                inner.with_options_mut(|o| o.compression_enabled = value)
            }
            TransportOption::EncryptionEnabled(true) => {
                let has_key = inner.options_read()?.encryption_key.is_some();
                if !has_key {
                    return Err(TransportError::InitializationFailed(
                        "encryption enabled without key material".into(),
                    ));
                }
                inner.with_options_mut(|o| o.encryption_enabled = true)
            }
            TransportOption::EncryptionEnabled(false) => {
                inner.with_options_mut(|o| o.encryption_enabled = false)
            }
            TransportOption::EncryptionKey(key) => {
                let key: [u8; crypto::KEY_LEN] = key.as_slice().try_into().map_err(|_| {
                    TransportError::InvalidParameters(format!(
                        "encryption key must be exactly {} bytes",
                        crypto::KEY_LEN
                    ))
                })?;
                inner.with_options_mut(|o| o.encryption_key = Some(key))
            }
            TransportOption::ConnectTimeout(value) => {
                inner.with_options_mut(|o| o.connect_timeout = value)
            }
            TransportOption::OperationTimeout(value) => {
                inner.with_options_mut(|o| o.operation_timeout = value)
            }
            TransportOption::IoBufferSize(value) => {
                if value == 0 {
                    return Err(TransportError::InvalidParameters(
                        "io buffer size must be nonzero".into(),
                    ));
                }
                inner.with_options_mut(|o| o.io_buffer_size = value)
            }
            TransportOption::TlsCertPath(path) => {
                inner.with_options_mut(|o| o.tls_cert_path = Some(path))
            }
            TransportOption::TlsKeyPath(path) => {
                inner.with_options_mut(|o| o.tls_key_path = Some(path))
            }
            TransportOption::TlsCaPath(path) => {
                inner.with_options_mut(|o| o.tls_ca_path = Some(path))
            }
        }
    }

    /// Read a runtime-mutable option.
    pub fn get_option(&self, kind: TransportOptionKind) -> Result<TransportOption> {
        self.ensure_initialized()?;
        let inner = &self.inner;
        let options = inner.options_read()?;
        let value = match kind {
            TransportOptionKind::TlsEnabled => {
                TransportOption::TlsEnabled(inner.tls_handle().is_some())
            }
            TransportOptionKind::CompressionEnabled => {
                TransportOption::CompressionEnabled(options.compression_enabled)
            }
            TransportOptionKind::EncryptionEnabled => {
                TransportOption::EncryptionEnabled(options.encryption_enabled)
            }
            TransportOptionKind::EncryptionKey => {
                return Err(TransportError::UnsupportedOperation(
                    "encryption key is write-only".into(),
                ))
            }
            TransportOptionKind::ConnectTimeout => {
                TransportOption::ConnectTimeout(options.connect_timeout)
            }
            TransportOptionKind::OperationTimeout => {
                TransportOption::OperationTimeout(options.operation_timeout)
            }
            TransportOptionKind::IoBufferSize => {
                TransportOption::IoBufferSize(options.io_buffer_size)
            }
            TransportOptionKind::TlsCertPath => {
                TransportOption::TlsCertPath(options.tls_cert_path.clone().unwrap_or_default())
            }
            TransportOptionKind::TlsKeyPath => {
                TransportOption::TlsKeyPath(options.tls_key_path.clone().unwrap_or_default())
            }
            TransportOptionKind::TlsCaPath => {
                TransportOption::TlsCaPath(options.tls_ca_path.clone().unwrap_or_default())
            }
        };
        Ok(value)
    }

    /// Consistent statistics snapshot
    pub fn get_stats(&self) -> Result<TransportStats> {
        self.ensure_initialized()?;
        Ok(self.inner.registry.stats_snapshot())
    }

    /// Stop the pool (joining every worker), tear down all connections and
    /// servers, and unregister every endpoint. A second call is
    /// `NotInitialized`.
    pub async fn shutdown(&self) -> Result<()> {
        if !self.inner.initialized.swap(false, Ordering::AcqRel) {
            return Err(TransportError::NotInitialized);
        }
        if let Some(pool) = self.pool.lock().await.take() {
            pool.shutdown(&self.inner.registry).await;
        }
        for server in self.inner.registry.servers_snapshot() {
            server.abort_accept();
            for conn in server.conns_snapshot() {
                self.inner.teardown_conn(&conn);
            }
            self.inner.registry.remove_server(server.id);
        }
        for conn in self.inner.registry.clients_snapshot() {
            self.inner.teardown_conn(&conn);
        }
        for id in self.inner.registry.endpoint_ids() {
            let _ = self.inner.registry.unregister_endpoint(id);
        }
        self.inner.disable_tls();
        info!("transport shut down");
        Ok(())
    }
}
