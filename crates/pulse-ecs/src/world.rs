//! The [`World`]: system and entity registry, match index, and tick loop.
//!
//! The world owns the entity↔system index and the per-pair timing table.
//! Indexing is reactive: every registered entity carries a change
//! subscription that routes its coalesced batches back here, where `change`
//! hooks fire against the pre-mutation index and the entity is then
//! re-indexed (driving `enter`/`exit`).
//!
//! `World` is a cheap-clone handle. Hooks may hold a clone and mutate the
//! world mid-sweep; every sweep iterates a snapshot and re-validates
//! membership before each hook call, so removals under its feet degrade to
//! skips rather than dangling calls.

use std::cell::RefCell;
use std::collections::{BTreeSet, HashMap};
use std::rc::{Rc, Weak};

use tracing::{debug, trace};

use crate::component::AnyComponent;
use crate::context::Context;
use crate::entity::{Entity, EntityId, Subscription};
use crate::scheduler::Scheduler;
use crate::system::{SharedSystem, Signature, SystemId};

// ---------------------------------------------------------------------------
// WorldInner
// ---------------------------------------------------------------------------

struct SystemEntry {
    id: SystemId,
    /// Sampled once at registration; systems must not change signatures.
    signature: Signature,
    system: SharedSystem,
}

struct WorldInner {
    ctx: Context,
    /// Registration order; ids are strictly increasing along this list.
    systems: Vec<SystemEntry>,
    /// Insertion order.
    entities: Vec<Entity>,
    /// Per entity, the ids of matched systems, ascending. Since ids follow
    /// registration order, ascending id order *is* registration order. An
    /// id appears here iff the pair's `enter` has fired and its `exit` has
    /// not.
    index: HashMap<EntityId, Vec<SystemId>>,
    /// Per pair, the timestamp the frequency gate last advanced to.
    last_run: HashMap<EntityId, HashMap<SystemId, f64>>,
    /// Change subscriptions for registered entities; dropping one
    /// unsubscribes.
    subscriptions: HashMap<EntityId, Subscription>,
}

impl WorldInner {
    fn entry(&self, id: SystemId) -> Option<&SystemEntry> {
        self.systems.iter().find(|entry| entry.id == id)
    }

    fn pair_indexed(&self, entity: EntityId, system: SystemId) -> bool {
        self.index
            .get(&entity)
            .is_some_and(|list| list.contains(&system))
    }

    fn strip_pair(&mut self, entity: EntityId, system: SystemId) {
        if let Some(list) = self.index.get_mut(&entity) {
            list.retain(|id| *id != system);
        }
        if let Some(stamps) = self.last_run.get_mut(&entity) {
            stamps.remove(&system);
        }
    }
}

/// What a single (entity, system) indexing pass decided.
enum IndexStep {
    /// Pair newly matched; fire `enter`.
    Enter(SharedSystem),
    /// Pair dissolved; fire `exit`.
    Exit(SharedSystem),
    /// Nothing to do for this pair.
    Keep,
}

// ---------------------------------------------------------------------------
// World
// ---------------------------------------------------------------------------

/// The engine instance owning systems, entities, and the match index.
#[derive(Clone)]
pub struct World {
    inner: Rc<RefCell<WorldInner>>,
}

impl World {
    /// Create an empty world sharing the context's scheduler and id
    /// sequences.
    pub fn new(ctx: &Context) -> Self {
        Self {
            inner: Rc::new(RefCell::new(WorldInner {
                ctx: ctx.clone(),
                systems: Vec::new(),
                entities: Vec::new(),
                index: HashMap::new(),
                last_run: HashMap::new(),
                subscriptions: HashMap::new(),
            })),
        }
    }

    /// Create a world and register `systems` in order.
    pub fn with_systems(ctx: &Context, systems: Vec<SharedSystem>) -> Self {
        let world = Self::new(ctx);
        for system in systems {
            world.add_system(system);
        }
        world
    }

    fn scheduler(&self) -> Rc<dyn Scheduler> {
        self.inner.borrow().ctx.scheduler()
    }

    // -- entities -----------------------------------------------------------

    /// Register an entity. Idempotent on handle identity; re-adding an
    /// already-registered entity just re-runs the indexing pass.
    pub fn add_entity(&self, entity: &Entity) {
        let newly_added = {
            let mut inner = self.inner.borrow_mut();
            if inner.entities.iter().any(|e| e.ptr_eq(entity)) {
                false
            } else {
                inner.entities.push(entity.clone());
                inner.index.entry(entity.id()).or_default();
                inner.last_run.entry(entity.id()).or_default();
                true
            }
        };

        if newly_added {
            // Route this entity's coalesced batches back into the world.
            // The closure holds a Weak so it never keeps the world alive.
            let weak: Weak<RefCell<WorldInner>> = Rc::downgrade(&self.inner);
            let subscription = entity.subscribe(move |entity, added, removed| {
                if let Some(strong) = weak.upgrade() {
                    let world = World { inner: strong };
                    world.on_entity_change(entity, added, removed);
                }
            });
            self.inner
                .borrow_mut()
                .subscriptions
                .insert(entity.id(), subscription);
            debug!(entity = %entity.id(), "entity registered");
        }

        self.index_entity(entity, None);
    }

    /// Deregister an entity: drop its subscription, fire `exit` on every
    /// matched system, and purge its index and timing rows. Idempotent; a
    /// no-op for unknown entities.
    pub fn remove_entity(&self, entity: &Entity) {
        let matched: Vec<SystemId> = {
            let mut inner = self.inner.borrow_mut();
            let Some(position) = inner.entities.iter().position(|e| e.ptr_eq(entity)) else {
                return;
            };
            inner.entities.remove(position);
            inner.subscriptions.remove(&entity.id());
            inner.last_run.remove(&entity.id());
            inner.index.remove(&entity.id()).unwrap_or_default()
        };
        debug!(entity = %entity.id(), "entity deregistered");

        // Bookkeeping is already clean, so a re-entrant remove of the same
        // entity inside an exit hook is a plain no-op.
        for id in matched {
            let Some(system) = self.system_by_id(id) else {
                continue;
            };
            trace!(entity = %entity.id(), system = %id, "exit");
            system.borrow_mut().exit(entity);
        }
    }

    /// [`remove_entity`](World::remove_entity) by id. A no-op for ids this
    /// world does not know.
    pub fn remove_entity_by_id(&self, id: EntityId) {
        if let Some(entity) = self.get_entity(id) {
            self.remove_entity(&entity);
        }
    }

    /// Look up a registered entity by id.
    pub fn get_entity(&self, id: EntityId) -> Option<Entity> {
        self.inner
            .borrow()
            .entities
            .iter()
            .find(|e| e.id() == id)
            .cloned()
    }

    /// Number of registered entities.
    pub fn entity_count(&self) -> usize {
        self.inner.borrow().entities.len()
    }

    // -- systems ------------------------------------------------------------

    /// Register a system, indexing every current entity against it (firing
    /// `enter` for matches). Appends in registration order, which is the
    /// execution order on every sweep. Idempotent on `Rc` identity: adding
    /// a system twice returns the existing id.
    pub fn add_system(&self, system: SharedSystem) -> SystemId {
        {
            let inner = self.inner.borrow();
            if let Some(existing) = inner
                .systems
                .iter()
                .find(|entry| Rc::ptr_eq(&entry.system, &system))
            {
                return existing.id;
            }
        }

        let signature = system.borrow().signature();
        let id = {
            let mut inner = self.inner.borrow_mut();
            let id = inner.ctx.next_system_id();
            inner.systems.push(SystemEntry {
                id,
                signature,
                system,
            });
            id
        };
        debug!(system = %id, "system registered");

        let entities: Vec<Entity> = self.inner.borrow().entities.clone();
        for entity in entities {
            self.index_entity(&entity, Some(id));
        }
        id
    }

    /// Deregister a system: fire `exit` once for every entity it is matched
    /// to, then drop it from the systems list and purge its index and
    /// timing entries. Idempotent; a later tick never calls its hooks
    /// again.
    pub fn remove_system(&self, system: &SharedSystem) {
        let Some(id) = ({
            let inner = self.inner.borrow();
            inner
                .systems
                .iter()
                .find(|entry| Rc::ptr_eq(&entry.system, system))
                .map(|entry| entry.id)
        }) else {
            return;
        };

        let matched: Vec<Entity> = {
            let inner = self.inner.borrow();
            inner
                .entities
                .iter()
                .filter(|e| inner.pair_indexed(e.id(), id))
                .cloned()
                .collect()
        };
        for entity in matched {
            // Strip the pair before the hook so exit observes clean state
            // and cannot be double-fired by re-entrant removal.
            let still_matched = {
                let mut inner = self.inner.borrow_mut();
                if inner.pair_indexed(entity.id(), id) {
                    inner.strip_pair(entity.id(), id);
                    true
                } else {
                    false
                }
            };
            if still_matched {
                trace!(entity = %entity.id(), system = %id, "exit");
                system.borrow_mut().exit(&entity);
            }
        }

        let mut inner = self.inner.borrow_mut();
        inner.systems.retain(|entry| entry.id != id);
        for list in inner.index.values_mut() {
            list.retain(|s| *s != id);
        }
        for stamps in inner.last_run.values_mut() {
            stamps.remove(&id);
        }
        debug!(system = %id, "system deregistered");
    }

    /// Number of registered systems.
    pub fn system_count(&self) -> usize {
        self.inner.borrow().systems.len()
    }

    /// The systems currently indexed against `entity`, in registration
    /// order. Introspection for hosts and tests; empty for unknown
    /// entities.
    pub fn indexed_systems(&self, entity: &Entity) -> Vec<SystemId> {
        self.inner
            .borrow()
            .index
            .get(&entity.id())
            .cloned()
            .unwrap_or_default()
    }

    /// Remove every system and entity, firing the usual `exit` sweeps. No
    /// index, timing, or subscription state survives.
    pub fn clear(&self) {
        let systems: Vec<SharedSystem> = {
            let inner = self.inner.borrow();
            inner.systems.iter().map(|e| e.system.clone()).collect()
        };
        for system in systems {
            self.remove_system(&system);
        }
        let entities: Vec<Entity> = self.inner.borrow().entities.clone();
        for entity in entities {
            self.remove_entity(&entity);
        }
    }

    fn system_by_id(&self, id: SystemId) -> Option<SharedSystem> {
        self.inner
            .borrow()
            .entry(id)
            .map(|entry| entry.system.clone())
    }

    fn contains_entity(&self, entity: &Entity) -> bool {
        self.inner.borrow().entities.iter().any(|e| e.ptr_eq(entity))
    }

    // -- indexing -----------------------------------------------------------

    /// Recompute the match between `entity` and one system (or all), firing
    /// `enter`/`exit` on transitions. No transition, no callback.
    fn index_entity(&self, entity: &Entity, only: Option<SystemId>) {
        let targets: Vec<SystemId> = match only {
            Some(id) => vec![id],
            None => self
                .inner
                .borrow()
                .systems
                .iter()
                .map(|entry| entry.id)
                .collect(),
        };
        let kinds = entity.kind_set();
        let now = self.scheduler().now();

        for id in targets {
            let step = {
                let mut inner = self.inner.borrow_mut();
                let Some(list) = inner.index.get(&entity.id()) else {
                    // Entity left the world (possibly from inside a hook
                    // earlier in this pass).
                    break;
                };
                let indexed = list.contains(&id);
                match inner.entry(id) {
                    None => {
                        // System no longer in this world; purge a lingering
                        // row without firing exit (remove_system already
                        // did, or the pair never matched).
                        if indexed {
                            inner.strip_pair(entity.id(), id);
                        }
                        IndexStep::Keep
                    }
                    Some(entry) => {
                        if entry.signature.matches(&kinds) {
                            if indexed {
                                IndexStep::Keep
                            } else {
                                let system = entry.system.clone();
                                let list = inner.index.entry(entity.id()).or_default();
                                if let Err(position) = list.binary_search(&id) {
                                    list.insert(position, id);
                                }
                                inner
                                    .last_run
                                    .entry(entity.id())
                                    .or_default()
                                    .insert(id, now);
                                IndexStep::Enter(system)
                            }
                        } else if indexed {
                            let system = entry.system.clone();
                            inner.strip_pair(entity.id(), id);
                            IndexStep::Exit(system)
                        } else {
                            IndexStep::Keep
                        }
                    }
                }
            };

            match step {
                IndexStep::Enter(system) => {
                    trace!(entity = %entity.id(), system = %id, "enter");
                    system.borrow_mut().enter(entity);
                }
                IndexStep::Exit(system) => {
                    trace!(entity = %entity.id(), system = %id, "exit");
                    system.borrow_mut().exit(entity);
                }
                IndexStep::Keep => {}
            }
        }
    }

    /// Entry point for an entity's coalesced change batch.
    ///
    /// Routing happens against the index as it stood *before* this batch is
    /// re-indexed: a batch that first makes an entity match a system fires
    /// `enter` only, never `change`. All indexed systems are evaluated for
    /// relevance every time; there is no first-match early exit.
    fn on_entity_change(&self, entity: &Entity, added: &[AnyComponent], removed: &[AnyComponent]) {
        let indexed: Vec<SystemId> = self
            .inner
            .borrow()
            .index
            .get(&entity.id())
            .cloned()
            .unwrap_or_default();

        if !indexed.is_empty() {
            let added_kinds: BTreeSet<_> = added.iter().map(|c| c.kind()).collect();
            let removed_kinds: BTreeSet<_> = removed.iter().map(|c| c.kind()).collect();

            for id in indexed {
                let relevant = {
                    let inner = self.inner.borrow();
                    if !inner.pair_indexed(entity.id(), id) {
                        // Dissolved by an earlier hook in this sweep.
                        None
                    } else {
                        inner.entry(id).and_then(|entry| {
                            let relevant = entry.signature.intersects(&added_kinds)
                                || entry.signature.intersects(&removed_kinds);
                            relevant.then(|| entry.system.clone())
                        })
                    }
                };
                if let Some(system) = relevant {
                    trace!(entity = %entity.id(), system = %id, "change");
                    system.borrow_mut().change(entity, added, removed);
                }
            }
        }

        if self.contains_entity(entity) {
            self.index_entity(entity, None);
        }
    }

    // -- tick ---------------------------------------------------------------

    /// Drive one tick: sweep inactive entities out (firing their `exit`s),
    /// then for every remaining entity dispatch `update` to each matched
    /// system in registration order, subject to the per-pair frequency
    /// gate.
    ///
    /// A system with `frequency > 0` runs at most once per
    /// `1000 / frequency` ms per entity; when it runs, its timestamp
    /// advances by whole intervals (`now - elapsed % interval`) so the gate
    /// does not drift over long sessions. A system with `frequency == 0`
    /// runs every tick.
    pub fn tick(&self) {
        let scheduler = self.scheduler();
        let now = scheduler.now();

        // Bracket state per system that dispatched this tick, in
        // first-dispatch order: before_update_all opens lazily, and
        // after_update_all closes with the entities actually updated.
        let mut brackets: Vec<(SystemId, SharedSystem, Vec<Entity>)> = Vec::new();

        let entities: Vec<Entity> = self.inner.borrow().entities.clone();
        for entity in entities {
            if !entity.is_active() {
                // Deactivation is deferred removal, discovered lazily here.
                self.remove_entity(&entity);
                continue;
            }
            if !self.contains_entity(&entity) {
                continue;
            }

            let indexed: Vec<SystemId> = self
                .inner
                .borrow()
                .index
                .get(&entity.id())
                .cloned()
                .unwrap_or_default();

            for id in indexed {
                let gate = {
                    let mut inner = self.inner.borrow_mut();
                    if !inner.pair_indexed(entity.id(), id) {
                        None
                    } else {
                        match inner.entry(id).map(|entry| entry.system.clone()) {
                            None => None,
                            Some(system) => {
                                let frequency = system.borrow().frequency();
                                let last = inner
                                    .last_run
                                    .get(&entity.id())
                                    .and_then(|stamps| stamps.get(&id))
                                    .copied()
                                    .unwrap_or(now);
                                let elapsed = now - last;
                                let advanced = if frequency > 0.0 {
                                    let interval = 1000.0 / frequency;
                                    if elapsed < interval {
                                        None
                                    } else {
                                        Some(now - (elapsed % interval))
                                    }
                                } else {
                                    Some(now)
                                };
                                advanced.map(|stamp| {
                                    inner
                                        .last_run
                                        .entry(entity.id())
                                        .or_default()
                                        .insert(id, stamp);
                                    (system, elapsed)
                                })
                            }
                        }
                    }
                };
                let Some((system, elapsed)) = gate else {
                    continue;
                };

                match brackets.iter_mut().find(|(open, _, _)| *open == id) {
                    Some((_, _, updated)) => updated.push(entity.clone()),
                    None => {
                        system.borrow_mut().before_update_all(now);
                        brackets.push((id, system.clone(), vec![entity.clone()]));
                    }
                }
                system.borrow_mut().update(now, elapsed, &entity);
            }
        }

        for (id, system, updated) in brackets {
            // The system may have been removed by a hook mid-tick.
            if self.system_by_id(id).is_none() {
                continue;
            }
            system.borrow_mut().after_update_all(now, &updated);
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
