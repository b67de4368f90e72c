//! Entity model: game objects, behaviour facades, and the type registry
//!
//! A `GameObject` is the in-scene container: identity, tag, and the
//! parent/child hierarchy. A `Behaviour` is the attachable facade that
//! carries game logic and points back at its owning container. The pair
//! replaces dynamic field lookup with a statically resolved capability.

use std::any::{Any, TypeId};
use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, RwLock, Weak};

use thiserror::Error;

static NEXT_ENTITY_ID: AtomicU64 = AtomicU64::new(1);

/// Process-unique entity identity.
///
/// Membership and removal are identity-based, never structural, so two
/// entities of the same type with identical state still compare unequal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct EntityId(u64);

impl EntityId {
    fn next() -> Self {
        Self(NEXT_ENTITY_ID.fetch_add(1, Ordering::Relaxed))
    }

    pub fn raw(self) -> u64 {
        self.0
    }
}

impl fmt::Display for EntityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Mutable portion of a game object, guarded by one lock.
struct GameObjectState {
    name: String,
    tag: String,
    // Non-owning back-reference, used only for lookup during detach.
    parent: Option<Weak<GameObject>>,
    // Parent owns its children; sibling order is insertion order.
    children: Vec<Arc<GameObject>>,
    // Set by the registry when the entity is tracked; lets hierarchy
    // removal recover the facade for destroy + pool release.
    facade: Option<Weak<dyn Behaviour>>,
    destroyed: bool,
}

/// In-scene container object: identity, type key, tag, and hierarchy.
pub struct GameObject {
    id: EntityId,
    type_key: TypeId,
    state: Mutex<GameObjectState>,
}

impl GameObject {
    pub fn new(type_key: TypeId, name: impl Into<String>) -> Arc<Self> {
        Arc::new(Self {
            id: EntityId::next(),
            type_key,
            state: Mutex::new(GameObjectState {
                name: name.into(),
                tag: String::new(),
                parent: None,
                children: Vec::new(),
                facade: None,
                destroyed: false,
            }),
        })
    }

    pub fn id(&self) -> EntityId {
        self.id
    }

    pub fn type_key(&self) -> TypeId {
        self.type_key
    }

    pub fn name(&self) -> String {
        self.lock().name.clone()
    }

    pub fn set_name(&self, name: impl Into<String>) {
        self.lock().name = name.into();
    }

    pub fn tag(&self) -> String {
        self.lock().tag.clone()
    }

    pub fn set_tag(&self, tag: impl Into<String>) {
        self.lock().tag = tag.into();
    }

    pub fn is_destroyed(&self) -> bool {
        self.lock().destroyed
    }

    /// Upgraded parent back-reference, if the parent is still alive.
    pub fn parent(&self) -> Option<Arc<GameObject>> {
        self.lock().parent.as_ref().and_then(Weak::upgrade)
    }

    /// Snapshot of the children list in sibling order.
    pub fn children(&self) -> Vec<Arc<GameObject>> {
        self.lock().children.clone()
    }

    pub fn child_count(&self) -> usize {
        self.lock().children.len()
    }

    /// Append `child` to `parent`'s children and point the child's
    /// back-reference at the parent. A child has exactly one parent at a
    /// time; attaching an already-parented child detaches it first.
    pub fn attach_child(parent: &Arc<GameObject>, child: Arc<GameObject>) {
        if let Some(previous) = child.parent() {
            previous.detach_child(child.id);
        }
        child.lock().parent = Some(Arc::downgrade(parent));
        parent.lock().children.push(child);
    }

    /// Remove the child with `id` from this node's children, clearing its
    /// parent back-reference. Returns the detached child, if present.
    pub fn detach_child(&self, id: EntityId) -> Option<Arc<GameObject>> {
        let mut state = self.lock();
        let pos = state.children.iter().position(|c| c.id == id)?;
        let child = state.children.remove(pos);
        drop(state);
        child.lock().parent = None;
        Some(child)
    }

    /// Structural destroy hook: marks the object dead. Detaching from the
    /// parent and releasing to the pool are the caller's responsibility.
    pub fn destroy(&self) {
        self.lock().destroyed = true;
    }

    /// Recover the behaviour facade bound by the registry, if any.
    pub fn facade(&self) -> Option<Arc<dyn Behaviour>> {
        self.lock().facade.as_ref().and_then(Weak::upgrade)
    }

    pub fn bind_facade(&self, facade: &Arc<dyn Behaviour>) {
        self.lock().facade = Some(Arc::downgrade(facade));
    }

    /// Reset recycled state before the pool hands this object out again.
    pub(crate) fn reset_for_reuse(&self) {
        let mut state = self.lock();
        state.tag.clear();
        state.parent = None;
        state.children.clear();
        state.facade = None;
        state.destroyed = false;
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, GameObjectState> {
        self.state.lock().expect("game object state poisoned")
    }
}

impl fmt::Debug for GameObject {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GameObject")
            .field("id", &self.id)
            .field("name", &self.name())
            .finish()
    }
}

/// Attachable-behaviour capability: anything trackable in a scene exposes
/// its identity and its owning container.
pub trait Behaviour: Send + Sync + 'static {
    fn game_object(&self) -> &Arc<GameObject>;

    fn id(&self) -> EntityId {
        self.game_object().id()
    }

    /// Called once when the entity is removed from its scene.
    fn on_destroy(&self) {}

    /// Upcast for typed recovery; implementations return `self`.
    fn as_any(self: Arc<Self>) -> Arc<dyn Any + Send + Sync>;
}

impl fmt::Debug for dyn Behaviour {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self.game_object(), f)
    }
}

/// Recover the concrete behaviour type from a tracked facade.
pub fn downcast<T: Behaviour>(entity: Arc<dyn Behaviour>) -> Option<Arc<T>> {
    entity.as_any().downcast::<T>().ok()
}

/// Error produced by a registered entity factory.
#[derive(Debug, Error)]
#[error("{0}")]
pub struct FactoryError(pub String);

pub(crate) type FactoryFn = Arc<dyn Fn() -> Result<Arc<dyn Behaviour>, FactoryError> + Send + Sync>;

pub(crate) struct EntityFactory {
    pub(crate) name: String,
    pub(crate) build: FactoryFn,
}

/// Registry of instantiable entity types.
///
/// Each type is keyed by its `TypeId` and by a stable string name so the
/// dynamic (name-based) spawn path can resolve it at runtime.
#[derive(Default)]
pub struct EntityTypes {
    factories: RwLock<HashMap<TypeId, EntityFactory>>,
    by_name: RwLock<HashMap<String, TypeId>>,
}

impl EntityTypes {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a factory for `T` under `name`. Re-registering a type or
    /// name replaces the previous factory.
    pub fn register<T, F>(&self, name: impl Into<String>, build: F)
    where
        T: Behaviour,
        F: Fn() -> Result<Arc<T>, FactoryError> + Send + Sync + 'static,
    {
        let name = name.into();
        let key = TypeId::of::<T>();
        let factory = EntityFactory {
            name: name.clone(),
            build: Arc::new(move || build().map(|e| e as Arc<dyn Behaviour>)),
        };
        let replaced = self
            .factories
            .write()
            .expect("type registry poisoned")
            .insert(key, factory)
            .is_some();
        if replaced {
            tracing::warn!(type_name = %name, "entity type re-registered, previous factory replaced");
        }
        self.by_name
            .write()
            .expect("type registry poisoned")
            .insert(name, key);
    }

    pub fn resolve(&self, name: &str) -> Option<TypeId> {
        self.by_name
            .read()
            .expect("type registry poisoned")
            .get(name)
            .copied()
    }

    pub fn name_of(&self, key: TypeId) -> Option<String> {
        self.factories
            .read()
            .expect("type registry poisoned")
            .get(&key)
            .map(|f| f.name.clone())
    }

    pub(crate) fn factory(&self, key: TypeId) -> Option<(String, FactoryFn)> {
        self.factories
            .read()
            .expect("type registry poisoned")
            .get(&key)
            .map(|f| (f.name.clone(), f.build.clone()))
    }
}
