//! Component kinds, shared component instances, and typed extension state.
//!
//! A *kind* is the unit of signature matching: registering a payload type
//! `T` through [`Context::register`](crate::context::Context::register)
//! yields a [`ComponentKind<T>`] handle whose [`ComponentTypeId`] is unique
//! to that registration. Instances created through the handle are shared,
//! interior-mutable values ([`Component<T>`]); entities store them
//! type-erased as [`AnyComponent`] and systems recover the typed view with
//! [`AnyComponent::downcast`].

use std::any::{Any, TypeId};
use std::cell::{Ref, RefCell, RefMut};
use std::collections::HashMap;
use std::fmt;
use std::marker::PhantomData;
use std::rc::Rc;

use serde::{Deserialize, Serialize};

use crate::entity::Entity;
use crate::EcsError;

// ---------------------------------------------------------------------------
// ComponentTypeId
// ---------------------------------------------------------------------------

/// Opaque identifier for a registered component kind.
///
/// Issued monotonically by the owning [`Context`](crate::context::Context);
/// never reused or destroyed for the context's lifetime.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ComponentTypeId(pub(crate) u64);

impl fmt::Debug for ComponentTypeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ComponentTypeId({})", self.0)
    }
}

impl fmt::Display for ComponentTypeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

// ---------------------------------------------------------------------------
// ComponentKind
// ---------------------------------------------------------------------------

/// Registration handle for a component kind with payload type `T`.
///
/// The handle is the typed gateway to instances of its kind: it creates
/// them and looks them up on entities. Handles are `Copy`; pass them into
/// the systems that need them.
pub struct ComponentKind<T> {
    id: ComponentTypeId,
    _marker: PhantomData<fn() -> T>,
}

impl<T> Clone for ComponentKind<T> {
    fn clone(&self) -> Self {
        Self {
            id: self.id,
            _marker: PhantomData,
        }
    }
}

impl<T> Copy for ComponentKind<T> {}

impl<T> fmt::Debug for ComponentKind<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ComponentKind({})", self.id.0)
    }
}

impl<T: 'static> ComponentKind<T> {
    pub(crate) fn allocate(raw: u64) -> Self {
        Self {
            id: ComponentTypeId(raw),
            _marker: PhantomData,
        }
    }

    /// The identifier used in signatures and index bookkeeping.
    pub fn id(&self) -> ComponentTypeId {
        self.id
    }

    /// Create a new shared instance of this kind.
    pub fn create(&self, data: T) -> Component<T> {
        Component {
            inner: Rc::new(ComponentInner {
                kind: self.id,
                data: RefCell::new(data),
                extensions: RefCell::new(HashMap::new()),
            }),
        }
    }

    /// All instances of this kind on `entity`, in insertion order.
    ///
    /// Returns an empty vector if the entity has none; never an error.
    pub fn all_from(&self, entity: &Entity) -> Vec<Component<T>> {
        entity
            .components_of(self.id)
            .into_iter()
            .filter_map(|erased| erased.downcast::<T>().ok())
            .collect()
    }

    /// The first instance of this kind on `entity`, if any.
    pub fn one_from(&self, entity: &Entity) -> Option<Component<T>> {
        entity
            .components_of(self.id)
            .into_iter()
            .next()
            .and_then(|erased| erased.downcast::<T>().ok())
    }
}

// ---------------------------------------------------------------------------
// Component
// ---------------------------------------------------------------------------

struct ComponentInner<T> {
    kind: ComponentTypeId,
    data: RefCell<T>,
    /// Per-instance working state, keyed by the extension value's Rust type.
    extensions: RefCell<HashMap<TypeId, Box<dyn Any>>>,
}

/// A shared component instance. Clones refer to the same instance; identity
/// comparisons use [`ptr_eq`](Component::ptr_eq).
pub struct Component<T> {
    inner: Rc<ComponentInner<T>>,
}

impl<T> Clone for Component<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Rc::clone(&self.inner),
        }
    }
}

impl<T> fmt::Debug for Component<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Component(kind={})", self.inner.kind.0)
    }
}

impl<T: 'static> Component<T> {
    /// The kind this instance belongs to.
    pub fn kind(&self) -> ComponentTypeId {
        self.inner.kind
    }

    /// Borrow the payload.
    pub fn data(&self) -> Ref<'_, T> {
        self.inner.data.borrow()
    }

    /// Mutably borrow the payload.
    pub fn data_mut(&self) -> RefMut<'_, T> {
        self.inner.data.borrow_mut()
    }

    /// Replace the payload.
    pub fn set(&self, value: T) {
        *self.inner.data.borrow_mut() = value;
    }

    /// Whether `self` and `other` are the same instance.
    pub fn ptr_eq(&self, other: &Component<T>) -> bool {
        Rc::ptr_eq(&self.inner, &other.inner)
    }

    /// The type-erased view of this instance, as entities store it.
    pub fn untyped(&self) -> AnyComponent {
        AnyComponent {
            kind: self.inner.kind,
            inner: self.inner.clone(),
        }
    }

    // -- extension state ----------------------------------------------------
    //
    // Systems that retain per-instance working state across ticks (a cached
    // velocity, an interpolation phase) attach it here under their own
    // private type. Keying by the extension's Rust type means two systems
    // can only collide if they deliberately share a type.

    /// Attach extension state of type `S`, returning the displaced value if
    /// one of the same type was already attached.
    pub fn insert_extension<S: 'static>(&self, state: S) -> Option<S> {
        self.inner
            .extensions
            .borrow_mut()
            .insert(TypeId::of::<S>(), Box::new(state))
            .and_then(|old| old.downcast::<S>().ok())
            .map(|boxed| *boxed)
    }

    /// Borrow the extension state of type `S`, if attached.
    pub fn extension<S: 'static>(&self) -> Option<Ref<'_, S>> {
        Ref::filter_map(self.inner.extensions.borrow(), |map| {
            map.get(&TypeId::of::<S>())
                .and_then(|boxed| boxed.downcast_ref::<S>())
        })
        .ok()
    }

    /// Mutably borrow the extension state of type `S`, if attached.
    pub fn extension_mut<S: 'static>(&self) -> Option<RefMut<'_, S>> {
        RefMut::filter_map(self.inner.extensions.borrow_mut(), |map| {
            map.get_mut(&TypeId::of::<S>())
                .and_then(|boxed| boxed.downcast_mut::<S>())
        })
        .ok()
    }

    /// Detach and return the extension state of type `S`, if attached.
    pub fn remove_extension<S: 'static>(&self) -> Option<S> {
        self.inner
            .extensions
            .borrow_mut()
            .remove(&TypeId::of::<S>())
            .and_then(|boxed| boxed.downcast::<S>().ok())
            .map(|boxed| *boxed)
    }
}

// ---------------------------------------------------------------------------
// AnyComponent
// ---------------------------------------------------------------------------

/// A type-erased component instance.
///
/// This is the form entities store and change batches deliver. The payload
/// is opaque until recovered with [`downcast`](AnyComponent::downcast); the
/// kind id is always available for signature and relevance checks.
#[derive(Clone)]
pub struct AnyComponent {
    kind: ComponentTypeId,
    inner: Rc<dyn Any>,
}

impl AnyComponent {
    /// The kind this instance belongs to.
    pub fn kind(&self) -> ComponentTypeId {
        self.kind
    }

    /// Whether `self` and `other` are the same instance.
    pub fn ptr_eq(&self, other: &AnyComponent) -> bool {
        Rc::ptr_eq(&self.inner, &other.inner)
    }

    /// Recover the typed view of this instance.
    ///
    /// Fails with [`EcsError::PayloadMismatch`] when the instance does not
    /// hold a payload of type `T` (for example when a change handler guesses
    /// the wrong kind).
    pub fn downcast<T: 'static>(&self) -> Result<Component<T>, EcsError> {
        self.inner
            .clone()
            .downcast::<ComponentInner<T>>()
            .map(|inner| Component { inner })
            .map_err(|_| EcsError::PayloadMismatch {
                kind: self.kind,
                expected: std::any::type_name::<T>(),
            })
    }
}

impl fmt::Debug for AnyComponent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "AnyComponent(kind={})", self.kind.0)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::Context;
    use crate::scheduler::ManualScheduler;

    #[derive(Debug, PartialEq)]
    struct Hp(u32);

    fn ctx() -> Context {
        Context::new(Rc::new(ManualScheduler::new()))
    }

    #[test]
    fn registrations_are_distinct_even_for_identical_payloads() {
        let ctx = ctx();
        let a = ctx.register::<Hp>();
        let b = ctx.register::<Hp>();
        assert_ne!(a.id(), b.id());
    }

    #[test]
    fn instances_carry_their_kind_and_payload() {
        let ctx = ctx();
        let hp = ctx.register::<Hp>();
        let instance = hp.create(Hp(100));
        assert_eq!(instance.kind(), hp.id());
        assert_eq!(*instance.data(), Hp(100));

        instance.data_mut().0 -= 30;
        assert_eq!(instance.data().0, 70);

        instance.set(Hp(1));
        assert_eq!(instance.data().0, 1);
    }

    #[test]
    fn clones_alias_the_same_instance() {
        let ctx = ctx();
        let hp = ctx.register::<Hp>();
        let a = hp.create(Hp(5));
        let b = a.clone();
        b.data_mut().0 = 9;
        assert_eq!(a.data().0, 9);
        assert!(a.ptr_eq(&b));
        assert!(!a.ptr_eq(&hp.create(Hp(9))));
    }

    #[test]
    fn downcast_roundtrip_and_mismatch() {
        let ctx = ctx();
        let hp = ctx.register::<Hp>();
        let erased = hp.create(Hp(42)).untyped();
        assert_eq!(erased.kind(), hp.id());

        let typed = erased.downcast::<Hp>().unwrap();
        assert_eq!(typed.data().0, 42);

        let err = erased.downcast::<String>().unwrap_err();
        assert!(matches!(err, EcsError::PayloadMismatch { .. }));
    }

    #[test]
    fn extensions_of_distinct_types_do_not_collide() {
        #[derive(Debug, PartialEq)]
        struct PhaseA(f64);
        #[derive(Debug, PartialEq)]
        struct PhaseB(f64);

        let ctx = ctx();
        let hp = ctx.register::<Hp>();
        let instance = hp.create(Hp(1));

        assert!(instance.insert_extension(PhaseA(0.5)).is_none());
        assert!(instance.insert_extension(PhaseB(2.0)).is_none());

        assert_eq!(*instance.extension::<PhaseA>().unwrap(), PhaseA(0.5));
        assert_eq!(*instance.extension::<PhaseB>().unwrap(), PhaseB(2.0));

        instance.extension_mut::<PhaseA>().unwrap().0 = 1.5;
        assert_eq!(instance.extension::<PhaseA>().unwrap().0, 1.5);
        assert_eq!(instance.extension::<PhaseB>().unwrap().0, 2.0);

        // Replacing returns the displaced value; removal returns ownership.
        assert_eq!(instance.insert_extension(PhaseA(9.0)), Some(PhaseA(1.5)));
        assert_eq!(instance.remove_extension::<PhaseB>(), Some(PhaseB(2.0)));
        assert!(instance.extension::<PhaseB>().is_none());
    }

    #[test]
    fn extension_survives_erasure_roundtrip() {
        struct Cooldown(u8);

        let ctx = ctx();
        let hp = ctx.register::<Hp>();
        let instance = hp.create(Hp(1));
        instance.insert_extension(Cooldown(3));

        let recovered = instance.untyped().downcast::<Hp>().unwrap();
        assert_eq!(recovered.extension::<Cooldown>().unwrap().0, 3);
    }
}
