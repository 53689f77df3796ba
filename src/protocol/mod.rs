//! # Protocol Layer
//!
//! The coarse connection state machine seam and inbound message dispatch.
//!
//! Policy (who may advance past handshake, how authentication works) is
//! external; this layer holds only the state enum, the oracle trait the
//! transport queries, and the kind-keyed dispatcher that turns inbound
//! packets into optional replies.

pub mod dispatcher;
pub mod state;

pub use self::dispatcher::MessageDispatcher;
pub use self::state::{ProtocolState, SequentialOracle, StateOracle};
