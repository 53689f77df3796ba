//! # Core Packet Layer
//!
//! The binary packet container and its wire codec.
//!
//! ## Components
//! - **Packet**: self-describing container with checksums, bounded
//!   metadata, and fragmentation/reassembly
//! - **Codec**: bit-exact wire layout plus length-prefixed stream framing
//!
//! Packets flow only through the transport facade's send/receive
//! operations; nothing in this module touches sockets or registries.

pub mod codec;
pub mod packet;
