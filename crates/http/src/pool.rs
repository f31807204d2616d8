//! Bounded per-worker pool of reusable request cores.
//!
//! Each worker owns exactly one pool and is the only thread that ever touches
//! it, so there is no locking. The free list is LIFO: the most recently
//! released core is the next one acquired, which keeps its arena warm.

use std::any::Any;

use bytes::BytesMut;

use crate::protocol::Outcome;

/// Initial capacity reserved for a fresh request arena
const INIT_ARENA_SIZE: usize = 4 * 1024;

/// The pooled part of a request: everything that survives release and gets
/// reused by the next connection.
pub struct RequestCore {
    id: usize,
    pub(crate) arena: BytesMut,
    pub(crate) user_data: Option<Box<dyn Any>>,
    pub(crate) outcome: Outcome,
}

impl RequestCore {
    fn new(id: usize) -> Self {
        Self { id, arena: BytesMut::with_capacity(INIT_ARENA_SIZE), user_data: None, outcome: Outcome::Ok }
    }

    /// Stable identity of this core within its pool.
    pub fn id(&self) -> usize {
        self.id
    }

    fn reset(&mut self) {
        self.arena.clear();
        self.user_data = None;
        self.outcome = Outcome::Ok;
    }
}

impl std::fmt::Debug for RequestCore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RequestCore")
            .field("id", &self.id)
            .field("arena_len", &self.arena.len())
            .field("outcome", &self.outcome)
            .finish()
    }
}

/// Bounded free-list pool of [`RequestCore`]s.
#[derive(Debug)]
pub struct RequestPool {
    capacity: usize,
    active: usize,
    next_id: usize,
    free: Vec<Box<RequestCore>>,
}

impl RequestPool {
    pub fn new(capacity: usize) -> Self {
        Self { capacity, active: 0, next_id: 0, free: Vec::new() }
    }

    /// Takes a ready-to-use core, preferring the free list.
    ///
    /// Returns `None` when the pool is exhausted (`active == capacity` with an
    /// empty free list); the caller must reject the admission immediately with
    /// [`Outcome::SizeExceeded`] rather than wait. The event loop never
    /// stalls on the pool.
    pub fn acquire(&mut self) -> Option<Box<RequestCore>> {
        if let Some(core) = self.free.pop() {
            self.active += 1;
            return Some(core);
        }
        if self.active < self.capacity {
            let core = Box::new(RequestCore::new(self.next_id));
            self.next_id += 1;
            self.active += 1;
            return Some(core);
        }
        None
    }

    /// Resets a core and returns it to the free list.
    pub fn release(&mut self, mut core: Box<RequestCore>) {
        core.reset();
        self.free.push(core);
        self.active -= 1;
    }

    pub fn active(&self) -> usize {
        self.active
    }

    pub fn free_count(&self) -> usize {
        self.free.len()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}
