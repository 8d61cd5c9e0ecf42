//! The [`Context`]: instance-owned identifier sequences plus the injected
//! scheduler.
//!
//! Every identifier namespace (entity, system, component kind) is backed by
//! its own [`Sequence`] owned by a `Context` instance, never by process-wide
//! mutable state. Two contexts never cross-contaminate identifiers, so
//! independent engine instances (one per test, say) stay fully isolated.
//!
//! A `Context` cannot be built without a [`Scheduler`]; a missing clock or
//! deferred-dispatch primitive is a construction-time configuration error,
//! not something the engine discovers mid-tick.

use std::cell::Cell;
use std::rc::Rc;

use crate::component::ComponentKind;
use crate::entity::EntityId;
use crate::scheduler::Scheduler;
use crate::system::SystemId;

// ---------------------------------------------------------------------------
// Sequence
// ---------------------------------------------------------------------------

/// A monotonically increasing identifier source.
///
/// Issues the next unused integer on each call, starting at 1. No reuse, no
/// wraparound handling; practical session lengths never exhaust a `u64`.
#[derive(Debug)]
pub struct Sequence {
    next: Cell<u64>,
}

impl Sequence {
    /// Create a sequence whose first issued value is 1.
    pub fn new() -> Self {
        Self { next: Cell::new(1) }
    }

    /// Issue the next value.
    pub fn next_value(&self) -> u64 {
        let value = self.next.get();
        self.next.set(value + 1);
        value
    }
}

impl Default for Sequence {
    fn default() -> Self {
        Self::new()
    }
}

// ---------------------------------------------------------------------------
// Context
// ---------------------------------------------------------------------------

struct ContextInner {
    scheduler: Rc<dyn Scheduler>,
    entity_ids: Sequence,
    system_ids: Sequence,
    kind_ids: Sequence,
}

/// Shared capability bundle handed to entities, component registration, and
/// worlds. Cheap to clone; clones share the same sequences and scheduler.
#[derive(Clone)]
pub struct Context {
    inner: Rc<ContextInner>,
}

impl Context {
    /// Create a context around the host-supplied scheduler.
    pub fn new(scheduler: Rc<dyn Scheduler>) -> Self {
        Self {
            inner: Rc::new(ContextInner {
                scheduler,
                entity_ids: Sequence::new(),
                system_ids: Sequence::new(),
                kind_ids: Sequence::new(),
            }),
        }
    }

    /// The injected scheduler.
    pub fn scheduler(&self) -> Rc<dyn Scheduler> {
        self.inner.scheduler.clone()
    }

    /// Register a fresh component kind for payloads of type `T`.
    ///
    /// Every call issues a distinct kind, even for the same `T`: kind
    /// identity is registration identity, not structural identity. Two
    /// registrations of the same payload shape are never interchangeable.
    pub fn register<T: 'static>(&self) -> ComponentKind<T> {
        ComponentKind::allocate(self.inner.kind_ids.next_value())
    }

    pub(crate) fn next_entity_id(&self) -> EntityId {
        EntityId(self.inner.entity_ids.next_value())
    }

    pub(crate) fn next_system_id(&self) -> SystemId {
        SystemId(self.inner.system_ids.next_value())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
