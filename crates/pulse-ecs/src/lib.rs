//! Pulse ECS -- reactive hook-based Entity Component System.
//!
//! Entities are bags of typed component instances; systems declare a
//! component signature and receive lifecycle hooks (`enter`, `exit`,
//! `update`, `change`) as entities start or stop matching. Mutations are
//! announced through a deferred, coalesced notification pass driven by a
//! pluggable [`Scheduler`](scheduler::Scheduler), and a frequency gate lets
//! each system run slower than the host tick without drifting.
//!
//! Handles (`Entity`, `Component<T>`, `World`) are cheap clones over shared
//! single-threaded state, so hooks can freely hold and mutate them.
//!
//! # Quick Start
//!
//! ```
//! use std::rc::Rc;
//! use pulse_ecs::prelude::*;
//!
//! #[derive(Debug, Clone, PartialEq)]
//! struct Position { y: f64 }
//!
//! struct Fall { position: ComponentKind<Position> }
//!
//! impl System for Fall {
//!     fn signature(&self) -> Signature {
//!         Signature::require([self.position.id()])
//!     }
//!
//!     fn update(&mut self, _now: f64, elapsed: f64, entity: &Entity) {
//!         if let Some(pos) = self.position.one_from(entity) {
//!             pos.data_mut().y -= 9.8 * (elapsed / 1000.0);
//!         }
//!     }
//! }
//!
//! let scheduler = Rc::new(ManualScheduler::new());
//! let ctx = Context::new(scheduler.clone());
//! let position = ctx.register::<Position>();
//!
//! let world = World::new(&ctx);
//! world.add_system(shared(Fall { position: position.clone() }));
//!
//! let ball = Entity::new(&ctx);
//! ball.add(&position.create(Position { y: 100.0 }));
//! world.add_entity(&ball);
//!
//! scheduler.advance(1000.0);
//! world.tick();
//!
//! let pos = position.one_from(&ball).unwrap();
//! assert!(pos.data().y < 100.0);
//! ```

#![deny(unsafe_code)]

pub mod component;
pub mod context;
pub mod entity;
pub mod scheduler;
pub mod system;
pub mod world;

// ---------------------------------------------------------------------------
// Error types
// ---------------------------------------------------------------------------

/// Errors produced by ECS operations.
#[derive(Debug, thiserror::Error)]
pub enum EcsError {
    /// An erased component was downcast to a payload type it does not hold.
    #[error("component of kind {kind} does not hold a payload of type '{expected}'")]
    PayloadMismatch {
        kind: component::ComponentTypeId,
        expected: &'static str,
    },
}

// ---------------------------------------------------------------------------
// Prelude
// ---------------------------------------------------------------------------

/// Convenience re-exports for common usage.
pub mod prelude {
    pub use crate::component::{AnyComponent, Component, ComponentKind, ComponentTypeId};
    pub use crate::context::Context;
    pub use crate::entity::{Entity, EntityId, Subscription};
    pub use crate::scheduler::{FrameScheduler, ManualScheduler, Scheduler};
    pub use crate::system::{shared, SharedSystem, Signature, System, SystemId};
    pub use crate::world::World;
    pub use crate::EcsError;
}

// ---------------------------------------------------------------------------
// Integration Tests
// ---------------------------------------------------------------------------
