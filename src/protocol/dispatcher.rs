//! Inbound message dispatch.
//!
//! One handler per packet kind; the worker pool routes every inbound
//! packet that is not a correlated response through here, and a returned
//! packet is sent back to the originating endpoint automatically.

use crate::core::packet::Packet;
use crate::error::{Result, TransportError};
use crate::transport::endpoint::EndpointId;
use std::collections::HashMap;
use std::sync::RwLock;

/// Bound on registered handler kinds
pub const MAX_MESSAGE_HANDLERS: usize = 64;

type MessageHandlerFn = dyn Fn(EndpointId, &Packet) -> Result<Option<Packet>> + Send + Sync;

/// Kind-keyed handler table for automatic inbound dispatch.
pub struct MessageDispatcher {
    handlers: RwLock<HashMap<u16, Box<MessageHandlerFn>>>,
}

impl Default for MessageDispatcher {
    fn default() -> Self {
        Self::new()
    }
}

impl MessageDispatcher {
    pub fn new() -> Self {
        Self {
            handlers: RwLock::new(HashMap::new()),
        }
    }

    /// Register (or replace) the handler for `kind`.
    ///
    /// # Errors
    /// `CapacityExceeded` past [`MAX_MESSAGE_HANDLERS`] distinct kinds.
    pub fn register<F>(&self, kind: u16, handler: F) -> Result<()>
    where
        F: Fn(EndpointId, &Packet) -> Result<Option<Packet>> + Send + Sync + 'static,
    {
        let mut handlers = self.handlers.write().map_err(|_| {
            TransportError::InvalidState("message handler table lock poisoned".into())
        })?;
        if !handlers.contains_key(&kind) && handlers.len() >= MAX_MESSAGE_HANDLERS {
            return Err(TransportError::CapacityExceeded(format!(
                "message handler table full ({MAX_MESSAGE_HANDLERS} kinds)"
            )));
        }
        handlers.insert(kind, Box::new(handler));
        Ok(())
    }

    /// Route `packet` to the handler registered for its kind.
    ///
    /// Returns the handler's optional response; kinds without a handler
    /// dispatch to nothing and yield `None`.
    pub fn dispatch(&self, endpoint: EndpointId, packet: &Packet) -> Result<Option<Packet>> {
        let handlers = self.handlers.read().map_err(|_| {
            TransportError::InvalidState("message handler table lock poisoned".into())
        })?;
        match handlers.get(&packet.kind) {
            Some(handler) => handler(endpoint, packet),
            None => Ok(None),
        }
    }

    /// Number of registered kinds
    pub fn len(&self) -> usize {
        self.handlers.read().map(|h| h.len()).unwrap_or(0)
    }

    /// True when no handler is registered
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::packet::kind;

    fn packet_of_kind(k: u16) -> Packet {
        let mut p = Packet::from_slice(b"body").unwrap();
        p.kind = k;
        p
    }

    #[test]
    fn dispatch_routes_by_kind() {
        let dispatcher = MessageDispatcher::new();
        dispatcher
            .register(kind::DATA, |_, p| {
                let mut reply = Packet::from_slice(p.payload()).unwrap();
                reply.kind = kind::RESPONSE;
                Ok(Some(reply))
            })
            .unwrap();

        let response = dispatcher
            .dispatch(EndpointId::test_id(0), &packet_of_kind(kind::DATA))
            .unwrap()
            .unwrap();
        assert_eq!(response.kind, kind::RESPONSE);

        let none = dispatcher
            .dispatch(EndpointId::test_id(0), &packet_of_kind(kind::AUTH))
            .unwrap();
        assert!(none.is_none());
    }

    #[test]
    fn registration_is_bounded() {
        let dispatcher = MessageDispatcher::new();
        for k in 0..MAX_MESSAGE_HANDLERS as u16 {
            dispatcher.register(k, |_, _| Ok(None)).unwrap();
        }
        assert!(matches!(
            dispatcher.register(9999, |_, _| Ok(None)),
            Err(TransportError::CapacityExceeded(_))
        ));
        // Replacing an existing kind still works at the bound.
        dispatcher.register(0, |_, _| Ok(None)).unwrap();
        assert_eq!(dispatcher.len(), MAX_MESSAGE_HANDLERS);
    }
}
