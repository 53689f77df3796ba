//! # RPC Transport
//!
//! Protocol-aware RPC transport core for services that bridge multiple
//! language runtimes over one wire protocol.
//!
//! The crate multiplexes client and server connections, frames application
//! data into a self-describing binary packet format, and gates message
//! flow through an externally owned connection state machine.
//!
//! ## Layers
//! - [`core`]: the packet container and its bit-exact wire codec
//! - [`transport`]: endpoint registry, worker pool, events, and the
//!   public facade
//! - [`protocol`]: the coarse state machine seam and message dispatch
//! - [`config`]: the resolved configuration snapshot
//! - [`utils`]: compression, payload encryption, timeouts
//!
//! ## Example
//! ```rust,no_run
//! use rpc_transport::config::TransportConfig;
//! use rpc_transport::core::packet::Packet;
//! use rpc_transport::transport::Transport;
//! use std::time::Duration;
//!
//! #[tokio::main]
//! async fn main() -> rpc_transport::error::Result<()> {
//!     let transport = Transport::create(TransportConfig::default())?;
//!     let server = transport.listen(9000, 64).await?;
//!     let peer = transport.connect("127.0.0.1", 9000, Duration::from_secs(5)).await?;
//!
//!     let packet = Packet::from_slice(b"hello")?;
//!     transport.send_packet(peer, packet, Duration::from_secs(1)).await?;
//!
//!     let _ = server;
//!     transport.shutdown().await
//! }
//! ```

pub mod config;
pub mod core;
pub mod error;
pub mod protocol;
pub mod transport;
pub mod utils;

pub use crate::config::TransportConfig;
pub use crate::core::packet::{Packet, PacketFlags};
pub use crate::error::{Result, TransportError};
pub use crate::protocol::{ProtocolState, SequentialOracle, StateOracle};
pub use crate::transport::{
    EndpointId, EventKind, ServerId, Transport, TransportEvent, TransportOption,
    TransportOptionKind, TransportStats,
};
