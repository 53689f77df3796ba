//! Connection protocol states and the external policy seam.
//!
//! The transport consumes a [`StateOracle`] to decide whether a connection
//! may advance; it never owns the policy. The full permission engine lives
//! outside this crate — here there is only the coarse state and the
//! yes/no question the transport asks before letting traffic flow.

/// Coarse protocol state of one connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ProtocolState {
    Init,
    Handshake,
    Auth,
    Ready,
    Error,
    Closed,
}

impl ProtocolState {
    /// True for states no connection leaves
    pub fn is_terminal(self) -> bool {
        matches!(self, ProtocolState::Error | ProtocolState::Closed)
    }
}

/// External decision point for protocol-state transitions.
pub trait StateOracle: Send + Sync {
    /// May a connection move from `current` to `target`?
    fn can_transition(&self, current: ProtocolState, target: ProtocolState) -> bool;
}

/// Default oracle implementing the legal forward chain
/// Init → Handshake → Auth → Ready, with Error and Closed reachable from
/// every state.
#[derive(Debug, Default)]
pub struct SequentialOracle;

impl StateOracle for SequentialOracle {
    fn can_transition(&self, current: ProtocolState, target: ProtocolState) -> bool {
        use ProtocolState::*;
        if current.is_terminal() {
            return false;
        }
        matches!(
            (current, target),
            (_, Error) | (_, Closed) | (Init, Handshake) | (Handshake, Auth) | (Auth, Ready)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::ProtocolState::*;
    use super::*;

    #[test]
    fn forward_chain_allowed() {
        let oracle = SequentialOracle;
        assert!(oracle.can_transition(Init, Handshake));
        assert!(oracle.can_transition(Handshake, Auth));
        assert!(oracle.can_transition(Auth, Ready));
    }

    #[test]
    fn skipping_states_denied() {
        let oracle = SequentialOracle;
        assert!(!oracle.can_transition(Init, Ready));
        assert!(!oracle.can_transition(Handshake, Ready));
        assert!(!oracle.can_transition(Ready, Init));
    }

    #[test]
    fn error_and_closed_reachable_from_anywhere_live() {
        let oracle = SequentialOracle;
        for state in [Init, Handshake, Auth, Ready] {
            assert!(oracle.can_transition(state, Error));
            assert!(oracle.can_transition(state, Closed));
        }
    }

    #[test]
    fn terminal_states_are_final() {
        let oracle = SequentialOracle;
        assert!(!oracle.can_transition(Error, Handshake));
        assert!(!oracle.can_transition(Closed, Error));
    }
}
