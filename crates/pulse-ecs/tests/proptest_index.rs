//! Property tests for the entity/system match index.
//!
//! These tests generate random sequences of component and registry
//! operations and verify that, once every pending notification has been
//! flushed, the world's index agrees with a naive signature evaluation over
//! the entities' current component kinds.

use std::cell::RefCell;
use std::rc::Rc;

use proptest::prelude::*;
use pulse_ecs::prelude::*;

#[derive(Debug, Clone, PartialEq)]
struct Marker(u8);

const ENTITIES: usize = 4;
const KINDS: usize = 4;

/// Operations we can perform against the world.
#[derive(Debug, Clone)]
enum IndexOp {
    /// Add a fresh instance of kind `k` to entity `e`.
    Add { e: usize, k: usize },
    /// Remove the most recently added live instance of kind `k` from
    /// entity `e`, if any.
    Remove { e: usize, k: usize },
    /// Deliver all pending change batches.
    Flush,
    /// Remove entity `e` from the world (it can be re-added by a later
    /// `Add` flush only through the explicit re-add below).
    Eject { e: usize },
    /// (Re-)register entity `e` with the world.
    Register { e: usize },
    /// Run one tick at the current time.
    Tick,
}

fn index_op_strategy() -> impl Strategy<Value = IndexOp> {
    prop_oneof![
        4 => (0..ENTITIES, 0..KINDS).prop_map(|(e, k)| IndexOp::Add { e, k }),
        3 => (0..ENTITIES, 0..KINDS).prop_map(|(e, k)| IndexOp::Remove { e, k }),
        3 => Just(IndexOp::Flush),
        1 => (0..ENTITIES).prop_map(|e| IndexOp::Eject { e }),
        1 => (0..ENTITIES).prop_map(|e| IndexOp::Register { e }),
        1 => Just(IndexOp::Tick),
    ]
}

struct Harness {
    scheduler: Rc<ManualScheduler>,
    world: World,
    entities: Vec<Entity>,
    kinds: Vec<ComponentKind<Marker>>,
    system_ids: Vec<SystemId>,
    signatures: Vec<Signature>,
    /// Live instances per (entity, kind), most recent last.
    instances: Vec<Vec<Vec<Component<Marker>>>>,
    /// Which entities are currently registered.
    registered: Vec<bool>,
}

struct Silent {
    signature: Signature,
}

impl System for Silent {
    fn signature(&self) -> Signature {
        self.signature.clone()
    }
}

fn harness() -> Harness {
    let scheduler = Rc::new(ManualScheduler::new());
    let ctx = Context::new(scheduler.clone());
    let kinds: Vec<ComponentKind<Marker>> =
        (0..KINDS).map(|_| ctx.register::<Marker>()).collect();
    let world = World::new(&ctx);

    // One wildcard plus require-signatures of varying width.
    let signatures = vec![
        Signature::all(),
        Signature::require([kinds[0].id()]),
        Signature::require([kinds[1].id(), kinds[2].id()]),
        Signature::require([kinds[0].id(), kinds[3].id()]),
        Signature::require([kinds[3].id()]),
    ];
    let system_ids: Vec<SystemId> = signatures
        .iter()
        .map(|signature| {
            world.add_system(Rc::new(RefCell::new(Silent {
                signature: signature.clone(),
            })))
        })
        .collect();

    let entities: Vec<Entity> = (0..ENTITIES).map(|_| Entity::new(&ctx)).collect();
    for entity in &entities {
        world.add_entity(entity);
    }

    Harness {
        scheduler,
        world,
        entities,
        kinds,
        system_ids,
        signatures,
        instances: vec![vec![Vec::new(); KINDS]; ENTITIES],
        registered: vec![true; ENTITIES],
    }
}

impl Harness {
    /// Naive prediction: the ids of every system whose signature matches
    /// the entity's current kind set, in registration order.
    fn expected(&self, e: usize) -> Vec<SystemId> {
        if !self.registered[e] {
            return Vec::new();
        }
        let kinds: std::collections::BTreeSet<ComponentTypeId> = (0..KINDS)
            .filter(|k| !self.instances[e][*k].is_empty())
            .map(|k| self.kinds[k].id())
            .collect();
        self.system_ids
            .iter()
            .zip(&self.signatures)
            .filter(|(_, signature)| signature.matches(&kinds))
            .map(|(id, _)| *id)
            .collect()
    }
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(512))]

    #[test]
    fn index_converges_to_signature_evaluation(
        ops in prop::collection::vec(index_op_strategy(), 1..60),
    ) {
        let mut h = harness();

        for op in ops {
            match op {
                IndexOp::Add { e, k } => {
                    let instance = h.kinds[k].create(Marker(k as u8));
                    h.entities[e].add(&instance);
                    h.instances[e][k].push(instance);
                }
                IndexOp::Remove { e, k } => {
                    if let Some(instance) = h.instances[e][k].pop() {
                        h.entities[e].remove(&instance);
                    }
                }
                IndexOp::Flush => h.scheduler.flush(),
                IndexOp::Eject { e } => {
                    h.world.remove_entity(&h.entities[e]);
                    h.registered[e] = false;
                }
                IndexOp::Register { e } => {
                    h.world.add_entity(&h.entities[e]);
                    h.registered[e] = true;
                }
                IndexOp::Tick => {
                    h.scheduler.advance(16.0);
                    h.world.tick();
                }
            }

            // Bookkeeping invariants hold even with batches in flight.
            prop_assert_eq!(
                h.world.entity_count(),
                h.registered.iter().filter(|r| **r).count()
            );
            prop_assert_eq!(h.world.system_count(), h.system_ids.len());
        }

        // After the final flush the index must agree with a from-scratch
        // signature evaluation for every entity.
        h.scheduler.flush();
        for e in 0..ENTITIES {
            prop_assert_eq!(h.world.indexed_systems(&h.entities[e]), h.expected(e));
        }
    }

    /// Adding and removing the same instance inside one burst nets out to
    /// no kind-set change, so the flushed index must be unchanged.
    #[test]
    fn add_remove_within_a_burst_is_invisible(
        k in 0..KINDS,
        burst in 1..4usize,
    ) {
        let h = harness();
        let before = h.world.indexed_systems(&h.entities[0]);

        for _ in 0..burst {
            let instance = h.kinds[k].create(Marker(0));
            h.entities[0].add(&instance);
            h.entities[0].remove(&instance);
        }
        h.scheduler.flush();

        prop_assert_eq!(h.world.indexed_systems(&h.entities[0]), before);
    }
}
