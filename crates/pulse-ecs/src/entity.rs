//! Entities: shared owners of typed components with coalesced change
//! notification.
//!
//! An [`Entity`] is a cheap-clone handle; host code, the world, and lifecycle
//! hooks all observe the same underlying state. Component mutations update
//! that state immediately, but notification to subscribers is *deferred*
//! through the scheduler: any number of add/remove calls inside one
//! scheduling window accumulate into a single batch, delivered once when the
//! scheduler flushes. Local queries ("has component X") are therefore
//! instantly consistent while subscribers (the world's index among them) are
//! eventually consistent within one tick boundary.

use std::cell::RefCell;
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::rc::{Rc, Weak};

use serde::{Deserialize, Serialize};

use crate::component::{AnyComponent, Component, ComponentTypeId};
use crate::context::Context;
use crate::scheduler::Scheduler;

// ---------------------------------------------------------------------------
// EntityId
// ---------------------------------------------------------------------------

/// Identifier for an entity, strictly increasing per
/// [`Context`](crate::context::Context).
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct EntityId(pub(crate) u64);

impl fmt::Debug for EntityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "EntityId({})", self.0)
    }
}

impl fmt::Display for EntityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

// ---------------------------------------------------------------------------
// Entity
// ---------------------------------------------------------------------------

/// Handler invoked once per coalesced change batch.
pub(crate) type ChangeHandler = dyn Fn(&Entity, &[AnyComponent], &[AnyComponent]);

struct EntityInner {
    id: EntityId,
    active: bool,
    /// Instances per kind, insertion-ordered within each kind. A kind with
    /// no remaining instances is removed from the map, so the key set *is*
    /// the entity's component-kind set.
    components: BTreeMap<ComponentTypeId, Vec<AnyComponent>>,
    subscribers: Vec<(u64, Rc<ChangeHandler>)>,
    next_subscriber: u64,
    pending_added: Vec<AnyComponent>,
    pending_removed: Vec<AnyComponent>,
    dispatch_scheduled: bool,
    scheduler: Rc<dyn Scheduler>,
}

/// A shared entity handle.
#[derive(Clone)]
pub struct Entity {
    inner: Rc<RefCell<EntityInner>>,
}

impl Entity {
    /// Create an entity with a fresh id from the context's allocator.
    pub fn new(ctx: &Context) -> Self {
        Self {
            inner: Rc::new(RefCell::new(EntityInner {
                id: ctx.next_entity_id(),
                active: true,
                components: BTreeMap::new(),
                subscribers: Vec::new(),
                next_subscriber: 1,
                pending_added: Vec::new(),
                pending_removed: Vec::new(),
                dispatch_scheduled: false,
                scheduler: ctx.scheduler(),
            })),
        }
    }

    pub fn id(&self) -> EntityId {
        self.inner.borrow().id
    }

    /// Whether the entity is live. An inactive entity is a deferred-removal
    /// marker: the world sweeps it out on the next tick instead of updating
    /// it.
    pub fn is_active(&self) -> bool {
        self.inner.borrow().active
    }

    pub fn set_active(&self, active: bool) {
        self.inner.borrow_mut().active = active;
    }

    /// Whether `self` and `other` are the same entity.
    pub fn ptr_eq(&self, other: &Entity) -> bool {
        Rc::ptr_eq(&self.inner, &other.inner)
    }

    // -- component list -----------------------------------------------------

    /// Append a component instance, recording it in the pending `added`
    /// batch and scheduling a deferred dispatch if none is pending.
    pub fn add<T: 'static>(&self, component: &Component<T>) {
        self.add_any(component.untyped());
    }

    /// Type-erased variant of [`add`](Entity::add).
    pub fn add_any(&self, component: AnyComponent) {
        {
            let mut inner = self.inner.borrow_mut();
            inner
                .components
                .entry(component.kind())
                .or_default()
                .push(component.clone());
            inner.pending_added.push(component);
        }
        self.schedule_dispatch();
    }

    /// Remove the first instance identical to `component`. A complete no-op
    /// if the instance is not present: nothing is batched, nothing is
    /// scheduled.
    pub fn remove<T: 'static>(&self, component: &Component<T>) {
        self.remove_any(&component.untyped());
    }

    /// Type-erased variant of [`remove`](Entity::remove).
    pub fn remove_any(&self, component: &AnyComponent) {
        let removed = {
            let mut inner = self.inner.borrow_mut();
            let kind = component.kind();
            let (taken, now_empty) = match inner.components.get_mut(&kind) {
                Some(list) => match list.iter().position(|c| c.ptr_eq(component)) {
                    Some(position) => {
                        let taken = list.remove(position);
                        (Some(taken), list.is_empty())
                    }
                    None => (None, false),
                },
                None => (None, false),
            };
            if now_empty {
                inner.components.remove(&kind);
            }
            match taken {
                Some(taken) => {
                    inner.pending_removed.push(taken);
                    true
                }
                None => false,
            }
        };
        if removed {
            self.schedule_dispatch();
        }
    }

    /// The set of component kinds currently present.
    pub fn kind_set(&self) -> BTreeSet<ComponentTypeId> {
        self.inner.borrow().components.keys().copied().collect()
    }

    /// All instances of `kind`, insertion-ordered. Empty if none.
    pub fn components_of(&self, kind: ComponentTypeId) -> Vec<AnyComponent> {
        self.inner
            .borrow()
            .components
            .get(&kind)
            .cloned()
            .unwrap_or_default()
    }

    /// Total number of component instances across all kinds.
    pub fn component_count(&self) -> usize {
        self.inner
            .borrow()
            .components
            .values()
            .map(Vec::len)
            .sum()
    }

    // -- change notification ------------------------------------------------

    /// Register `handler` to receive one call per coalesced change batch,
    /// with the full `added` and `removed` instance lists.
    ///
    /// The returned [`Subscription`] unsubscribes when dropped. Handlers
    /// registered during a dispatch do not observe the batch being
    /// delivered.
    pub fn subscribe(
        &self,
        handler: impl Fn(&Entity, &[AnyComponent], &[AnyComponent]) + 'static,
    ) -> Subscription {
        let id = {
            let mut inner = self.inner.borrow_mut();
            let id = inner.next_subscriber;
            inner.next_subscriber += 1;
            inner.subscribers.push((id, Rc::new(handler)));
            id
        };
        Subscription {
            entity: Rc::downgrade(&self.inner),
            id,
        }
    }

    fn schedule_dispatch(&self) {
        let scheduler = {
            let mut inner = self.inner.borrow_mut();
            if inner.dispatch_scheduled {
                return;
            }
            inner.dispatch_scheduled = true;
            inner.scheduler.clone()
        };
        let weak = Rc::downgrade(&self.inner);
        scheduler.defer(Box::new(move || Entity::dispatch(weak)));
    }

    /// Deliver the pending batch. Buffers and the scheduled flag are reset
    /// *before* handlers run, so mutations made inside a handler open a
    /// fresh batch delivered on a later flush.
    fn dispatch(weak: Weak<RefCell<EntityInner>>) {
        let Some(strong) = weak.upgrade() else {
            return;
        };
        let entity = Entity { inner: strong };
        let (added, removed, handlers) = {
            let mut inner = entity.inner.borrow_mut();
            inner.dispatch_scheduled = false;
            let added = std::mem::take(&mut inner.pending_added);
            let removed = std::mem::take(&mut inner.pending_removed);
            let handlers: Vec<Rc<ChangeHandler>> = inner
                .subscribers
                .iter()
                .map(|(_, handler)| handler.clone())
                .collect();
            (added, removed, handlers)
        };
        if added.is_empty() && removed.is_empty() {
            return;
        }
        for handler in handlers {
            handler(&entity, &added, &removed);
        }
    }
}

impl fmt::Debug for Entity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let inner = self.inner.borrow();
        f.debug_struct("Entity")
            .field("id", &inner.id)
            .field("active", &inner.active)
            .field("kinds", &inner.components.len())
            .finish()
    }
}

// ---------------------------------------------------------------------------
// Subscription
// ---------------------------------------------------------------------------

/// Guard for a change subscription; unsubscribes on drop.
///
/// Dropping the guard also cancels delivery of any batch not yet flushed:
/// the subscriber snapshot is taken at dispatch time, not at scheduling
/// time.
pub struct Subscription {
    entity: Weak<RefCell<EntityInner>>,
    id: u64,
}

impl Subscription {
    /// Explicitly unsubscribe. Equivalent to dropping the guard.
    pub fn unsubscribe(self) {}
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(inner) = self.entity.upgrade() {
            inner
                .borrow_mut()
                .subscribers
                .retain(|(id, _)| *id != self.id);
        }
    }
}

impl fmt::Debug for Subscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Subscription({})", self.id)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
