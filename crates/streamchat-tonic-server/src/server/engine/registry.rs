//! Ownership and identity for live call state machines.
//!
//! Every open call is owned by the [`HandlerRegistry`] under an opaque
//! [`CorrelationId`]. The id doubles as the tag carried by every asynchronous
//! operation the call issues, so a completed operation can always be resolved
//! back to the state machine that issued it. Ids come from a dedicated
//! monotonic counter and are never reused while the handler they name is
//! still registered.
//!
//! The registry is not thread-safe by contract: all mutation happens from the
//! single dispatch task.

use super::handlers::Handler;
use std::collections::HashMap;

/// Opaque tag identifying one live call state machine and every asynchronous
/// operation it has in flight.
pub type CorrelationId = u64;

/// Integer-keyed table owning all live call handlers.
pub struct HandlerRegistry {
    handlers: HashMap<CorrelationId, Handler>,
    next_id: CorrelationId,
}

impl HandlerRegistry {
    pub fn new() -> Self {
        Self {
            handlers: HashMap::new(),
            next_id: 0,
        }
    }

    /// Reserves the next unused correlation id.
    pub fn allocate(&mut self) -> CorrelationId {
        let id = self.next_id;
        self.next_id += 1;
        id
    }

    /// Binds an allocated id to a handler, taking ownership of it.
    pub fn insert(&mut self, id: CorrelationId, handler: Handler) {
        let prev = self.handlers.insert(id, handler);
        debug_assert!(prev.is_none(), "correlation id {id} bound twice");
    }

    /// Detaches a handler for the duration of one transition. The dispatcher
    /// puts it back via [`restore`](Self::restore) unless the transition
    /// finished the call.
    pub fn take(&mut self, id: CorrelationId) -> Option<Handler> {
        self.handlers.remove(&id)
    }

    /// Re-attaches a handler previously detached with [`take`](Self::take).
    pub fn restore(&mut self, id: CorrelationId, handler: Handler) {
        self.handlers.insert(id, handler);
    }

    /// Looks up a live handler in place. Used for cross-handler calls such as
    /// broadcast delivery, where the caller is itself detached.
    pub fn get_mut(&mut self, id: CorrelationId) -> Option<&mut Handler> {
        self.handlers.get_mut(&id)
    }

    /// Releases a handler. Idempotent: unknown ids are a no-op.
    pub fn remove(&mut self, id: CorrelationId) -> Option<Handler> {
        self.handlers.remove(&id)
    }

    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }
}
