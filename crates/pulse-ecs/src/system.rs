//! Systems: the behavior bound to a component-type signature.
//!
//! A system declares what it needs ([`Signature`]) and how often its
//! [`update`](System::update) may run per entity
//! ([`frequency`](System::frequency), in Hz; 0 disables the gate). The
//! lifecycle hooks are total functions with no-op defaults, so the trait
//! itself is the capability description; there is no runtime probing for
//! "does this system implement `enter`".
//!
//! Hooks may mutate the world re-entrantly through a cloned
//! [`World`](crate::world::World) handle or by deactivating entities. The
//! one forbidden move is anything that would re-enter the *currently
//! executing* system (including calling `tick` from inside a hook); the
//! engine borrows each system for the duration of a hook call.

use std::cell::RefCell;
use std::collections::BTreeSet;
use std::fmt;
use std::rc::Rc;

use serde::{Deserialize, Serialize};

use crate::component::{AnyComponent, ComponentTypeId};
use crate::entity::Entity;

// ---------------------------------------------------------------------------
// SystemId
// ---------------------------------------------------------------------------

/// Identifier assigned when a system is registered with a world; strictly
/// increasing in registration order.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SystemId(pub(crate) u64);

impl fmt::Debug for SystemId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SystemId({})", self.0)
    }
}

impl fmt::Display for SystemId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

// ---------------------------------------------------------------------------
// Signature
// ---------------------------------------------------------------------------

/// The component kinds a system requires, or the wildcard matching every
/// entity unconditionally (including entities with zero components).
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Signature {
    /// Match every entity.
    All,
    /// Match entities possessing at least one instance of each kind.
    Require(BTreeSet<ComponentTypeId>),
}

impl Signature {
    /// The wildcard signature.
    pub fn all() -> Self {
        Signature::All
    }

    /// A finite signature requiring every kind in `kinds`.
    pub fn require<I>(kinds: I) -> Self
    where
        I: IntoIterator<Item = ComponentTypeId>,
    {
        Signature::Require(kinds.into_iter().collect())
    }

    /// Whether an entity with the given kind set satisfies this signature.
    pub fn matches(&self, kinds: &BTreeSet<ComponentTypeId>) -> bool {
        match self {
            Signature::All => true,
            Signature::Require(required) => required.iter().all(|kind| kinds.contains(kind)),
        }
    }

    /// Whether this signature shares any kind with `kinds`. The wildcard
    /// intersects everything; a finite signature never intersects the
    /// empty set.
    pub fn intersects(&self, kinds: &BTreeSet<ComponentTypeId>) -> bool {
        match self {
            Signature::All => true,
            Signature::Require(required) => required.iter().any(|kind| kinds.contains(kind)),
        }
    }
}

// ---------------------------------------------------------------------------
// System
// ---------------------------------------------------------------------------

/// Behavior executed per matching entity.
///
/// Only [`signature`](System::signature) is mandatory. `signature` is
/// sampled once at registration and must not change afterwards;
/// [`frequency`](System::frequency) is re-read every tick, so hosts may
/// tune it live.
pub trait System: 'static {
    /// The component kinds this system requires.
    fn signature(&self) -> Signature;

    /// Update frequency cap in Hz. `0.0` means every tick, unthrottled.
    /// Values at or below zero are all treated as unthrottled.
    fn frequency(&self) -> f64 {
        0.0
    }

    /// Fired once when `entity` transitions into "matched" for this system.
    fn enter(&mut self, entity: &Entity) {
        let _ = entity;
    }

    /// Fired once when the pair transitions out of "matched": a required
    /// kind disappeared, the entity or system was removed, or the entity
    /// was deactivated and swept.
    fn exit(&mut self, entity: &Entity) {
        let _ = entity;
    }

    /// Fired on ticks where the pair is matched and the frequency gate
    /// allows. `now` and `elapsed` are in milliseconds; `elapsed` is the
    /// time since this system last ran for this entity.
    fn update(&mut self, now: f64, elapsed: f64, entity: &Entity) {
        let _ = (now, elapsed, entity);
    }

    /// Fired when a matched entity's coalesced change batch intersects this
    /// system's signature (wildcards hear every batch). Receives the full
    /// batch, not a view filtered to the signature.
    fn change(&mut self, entity: &Entity, added: &[AnyComponent], removed: &[AnyComponent]) {
        let _ = (entity, added, removed);
    }

    /// Fired once per tick, before the first `update` this system dispatches
    /// that tick. Not fired on ticks where the system dispatches nothing.
    fn before_update_all(&mut self, now: f64) {
        let _ = now;
    }

    /// Fired once per tick after the update sweep, with the entities this
    /// system actually updated. Not fired on ticks where the system
    /// dispatched nothing.
    fn after_update_all(&mut self, now: f64, entities: &[Entity]) {
        let _ = (now, entities);
    }
}

/// How worlds hold systems: shared, interior-mutable, compared by identity.
pub type SharedSystem = Rc<RefCell<dyn System>>;

/// Wrap a system for registration.
pub fn shared(system: impl System) -> SharedSystem {
    Rc::new(RefCell::new(system))
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
