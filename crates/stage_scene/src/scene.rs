//! Scene facade: entity lifecycle within one scene
//!
//! A scene owns one pool set, one spawn scheduler (worker + pending
//! stack), one flat entity registry, and a cancellation signal. Every
//! add goes through the scheduler; removal takes the flat registry fast
//! path or falls back to a hierarchy walk for nested entities.

use std::any::TypeId;
use std::sync::atomic::{AtomicU8, AtomicUsize, Ordering};
use std::sync::Arc;

use stage_core::{downcast, walk_forest, Behaviour, EntityId, EntityTypes, GameObject, PoolSet, Step};

use crate::error::{SceneError, SpawnError};
use crate::registry::EntityRegistry;
use crate::scheduler::{Scheduler, SpawnReceiver};

const ACTIVE: u8 = 0;
const DISPOSING: u8 = 1;
const DISPOSED: u8 = 2;

pub struct Scene {
    name: String,
    index: AtomicUsize,
    state: AtomicU8,
    pools: Arc<PoolSet>,
    registry: EntityRegistry,
    scheduler: Scheduler,
}

impl Scene {
    /// Create an active scene with its own worker, pools, and registry.
    /// Scenes never share any of these with each other.
    pub fn new(name: impl Into<String>, types: Arc<EntityTypes>) -> Self {
        Self::with_index(name, 0, types)
    }

    pub fn with_index(name: impl Into<String>, index: usize, types: Arc<EntityTypes>) -> Self {
        let name = name.into();
        let pools = Arc::new(PoolSet::new(types));
        let scheduler = Scheduler::start(pools.clone(), name.clone());
        Self {
            name,
            index: AtomicUsize::new(index),
            state: AtomicU8::new(ACTIVE),
            pools,
            registry: EntityRegistry::new(),
            scheduler,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn index(&self) -> usize {
        self.index.load(Ordering::Relaxed)
    }

    pub(crate) fn set_index(&self, index: usize) {
        self.index.store(index, Ordering::Relaxed);
    }

    /// Entity type registry backing this scene's pools.
    pub fn types(&self) -> &Arc<EntityTypes> {
        self.pools.types()
    }

    pub fn is_disposed(&self) -> bool {
        self.state.load(Ordering::Acquire) == DISPOSED
    }

    /// Instantiate a `T` and track it in this scene.
    pub async fn add_to_scene_async<T: Behaviour>(&self) -> Result<Arc<T>, SceneError> {
        self.ensure_active()?;
        let receiver = self.scheduler.spawn_for(TypeId::of::<T>());
        let entity = self.resolve(receiver.await.ok())?;
        self.finish_typed::<T>(entity)
    }

    /// Blocking variant of [`Scene::add_to_scene_async`]. Must not be
    /// called from within an async runtime.
    pub fn add_to_scene<T: Behaviour>(&self) -> Result<Arc<T>, SceneError> {
        self.ensure_active()?;
        let receiver = self.scheduler.spawn_for(TypeId::of::<T>());
        let entity = self.resolve(receiver.blocking_recv().ok())?;
        self.finish_typed::<T>(entity)
    }

    /// Instantiate by registered type name (runtime-keyed path).
    pub async fn add_to_scene_dynamic_async(
        &self,
        type_name: &str,
    ) -> Result<Arc<dyn Behaviour>, SceneError> {
        self.ensure_active()?;
        let receiver = self.scheduler.spawn_named(type_name.to_string());
        let entity = self.resolve(receiver.await.ok())?;
        self.finish(entity)
    }

    /// Blocking variant of [`Scene::add_to_scene_dynamic_async`]. Must not
    /// be called from within an async runtime.
    pub fn add_to_scene_dynamic(&self, type_name: &str) -> Result<Arc<dyn Behaviour>, SceneError> {
        self.ensure_active()?;
        let receiver = self.scheduler.spawn_named(type_name.to_string());
        let entity = self.resolve(receiver.blocking_recv().ok())?;
        self.finish(entity)
    }

    /// Issue `count` independent requests without serializing them at the
    /// call site; they still serialize at the worker. The result list is
    /// in issue order even when completions arrive out of order.
    pub async fn add_multiple_async<T: Behaviour>(
        &self,
        count: usize,
    ) -> Result<Vec<Arc<T>>, SceneError> {
        self.ensure_active()?;
        let receivers: Vec<SpawnReceiver> = (0..count)
            .map(|_| self.scheduler.spawn_for(TypeId::of::<T>()))
            .collect();

        let mut entities = Vec::with_capacity(count);
        for receiver in receivers {
            let entity = self.resolve(receiver.await.ok())?;
            entities.push(self.finish_typed::<T>(entity)?);
        }
        Ok(entities)
    }

    /// Remove a tracked entity, or locate it in the hierarchy when it is
    /// nested under a tracked root. Logs a warning and is a no-op when the
    /// entity is nowhere in the scene.
    pub fn remove_from_scene(&self, entity: &Arc<dyn Behaviour>) -> Result<(), SceneError> {
        self.ensure_active()?;
        self.remove_by_id(entity.id());
        Ok(())
    }

    /// Container-side removal, mirroring [`Scene::remove_from_scene`].
    pub fn remove_game_object(&self, game_object: &Arc<GameObject>) -> Result<(), SceneError> {
        self.ensure_active()?;
        self.remove_by_id(game_object.id());
        Ok(())
    }

    /// First tracked game object carrying `tag`.
    pub fn find_with_tag(&self, tag: &str) -> Result<Option<Arc<GameObject>>, SceneError> {
        self.ensure_active()?;
        Ok(self
            .registry
            .game_objects()
            .into_iter()
            .find(|go| go.tag() == tag))
    }

    /// Lazy, restartable sequence over a snapshot of the tracked list.
    pub fn find_all_with_tag(
        &self,
        tag: &str,
    ) -> Result<impl Iterator<Item = Arc<GameObject>>, SceneError> {
        self.ensure_active()?;
        let tag = tag.to_string();
        Ok(self
            .registry
            .game_objects()
            .into_iter()
            .filter(move |go| go.tag() == tag))
    }

    /// Snapshot of tracked behaviour facades.
    pub fn behaviours(&self) -> Vec<Arc<dyn Behaviour>> {
        self.registry.behaviours()
    }

    /// Snapshot of tracked game objects.
    pub fn game_objects(&self) -> Vec<Arc<GameObject>> {
        self.registry.game_objects()
    }

    /// Tear the scene down: stop the worker, cancel every pending spawn,
    /// drop the pools, clear the registry. Idempotent; a second call is a
    /// no-op.
    pub fn dispose(&self) {
        if self
            .state
            .compare_exchange(ACTIVE, DISPOSING, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return;
        }
        self.scheduler.shutdown();
        self.pools.dispose();
        self.registry.clear();
        self.state.store(DISPOSED, Ordering::Release);
        tracing::debug!(scene = %self.name, "scene disposed");
    }

    fn ensure_active(&self) -> Result<(), SceneError> {
        if self.state.load(Ordering::Acquire) == ACTIVE {
            Ok(())
        } else {
            Err(self.disposed_error())
        }
    }

    fn disposed_error(&self) -> SceneError {
        SceneError::Disposed {
            name: self.name.clone(),
        }
    }

    /// Unwrap a completion-handle outcome. `None` means the worker went
    /// away without resolving, which shutdown guarantees cannot happen
    /// unless the worker panicked.
    fn resolve(
        &self,
        outcome: Option<Result<Arc<dyn Behaviour>, SpawnError>>,
    ) -> Result<Arc<dyn Behaviour>, SceneError> {
        Ok(outcome.ok_or(SpawnError::Lost)??)
    }

    /// Track a freshly built entity, unless the scene was disposed while
    /// the request was in flight.
    fn finish(&self, entity: Arc<dyn Behaviour>) -> Result<Arc<dyn Behaviour>, SceneError> {
        if self.state.load(Ordering::Acquire) != ACTIVE {
            entity.game_object().destroy();
            return Err(self.disposed_error());
        }
        self.registry.track(entity.clone());
        Ok(entity)
    }

    fn finish_typed<T: Behaviour>(&self, entity: Arc<dyn Behaviour>) -> Result<Arc<T>, SceneError> {
        let typed = downcast::<T>(entity.clone()).ok_or(SpawnError::WrongType)?;
        self.finish(entity)?;
        Ok(typed)
    }

    fn remove_by_id(&self, id: EntityId) {
        // Fast path: top-level tracked entity.
        if let Some(entity) = self.registry.untrack(id) {
            let game_object = entity.game_object().clone();
            if let Some(parent) = game_object.parent() {
                parent.detach_child(id);
            }
            entity.on_destroy();
            game_object.destroy();
            self.pools.release(entity);
            return;
        }

        // Slow path: walk the forest looking for a nested match.
        let roots = self.registry.game_objects();
        let mut found = false;
        walk_forest(&roots, |node, _depth| {
            if node.id() != id {
                return Step::Descend;
            }
            found = true;
            if let Some(parent) = node.parent() {
                parent.detach_child(id);
            }
            match node.facade() {
                Some(facade) => {
                    facade.on_destroy();
                    node.destroy();
                    self.pools.release(facade);
                }
                None => node.destroy(),
            }
            Step::Halt
        });

        if !found {
            tracing::warn!(
                scene = %self.name,
                entity = %id,
                "cannot remove an entity that is not contained in the scene"
            );
        }
    }
}

impl Drop for Scene {
    fn drop(&mut self) {
        // Explicit dispose is the contract; this is the last resort that
        // keeps a leaked scene from stranding its worker thread.
        self.dispose();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use stage_core::FactoryError;
    use std::any::Any;
    use std::collections::HashSet;
    use std::time::Duration;

    struct Prop {
        go: Arc<GameObject>,
    }

    impl Prop {
        fn build() -> Result<Arc<Prop>, FactoryError> {
            Ok(Arc::new(Prop {
                go: GameObject::new(TypeId::of::<Prop>(), "Prop"),
            }))
        }
    }

    impl Behaviour for Prop {
        fn game_object(&self) -> &Arc<GameObject> {
            &self.go
        }

        fn as_any(self: Arc<Self>) -> Arc<dyn Any + Send + Sync> {
            self
        }
    }

    struct Slow {
        go: Arc<GameObject>,
    }

    impl Slow {
        fn build() -> Result<Arc<Slow>, FactoryError> {
            std::thread::sleep(Duration::from_millis(20));
            Ok(Arc::new(Slow {
                go: GameObject::new(TypeId::of::<Slow>(), "Slow"),
            }))
        }
    }

    impl Behaviour for Slow {
        fn game_object(&self) -> &Arc<GameObject> {
            &self.go
        }

        fn as_any(self: Arc<Self>) -> Arc<dyn Any + Send + Sync> {
            self
        }
    }

    fn scene() -> Scene {
        let types = Arc::new(EntityTypes::new());
        types.register::<Prop, _>("Prop", Prop::build);
        types.register::<Slow, _>("Slow", Slow::build);
        Scene::new("test", types)
    }

    #[tokio::test]
    async fn add_tracks_entity() {
        let scene = scene();
        let prop = scene.add_to_scene_async::<Prop>().await.unwrap();
        assert_eq!(scene.behaviours().len(), 1);
        assert_eq!(scene.game_objects()[0].id(), prop.id());
        scene.dispose();
    }

    #[test]
    fn blocking_add_works_off_runtime() {
        let scene = scene();
        let prop = scene.add_to_scene::<Prop>().unwrap();
        assert!(scene.behaviours().iter().any(|b| b.id() == prop.id()));
        scene.dispose();
    }

    #[tokio::test]
    async fn dynamic_add_resolves_by_name() {
        let scene = scene();
        let entity = scene.add_to_scene_dynamic_async("Prop").await.unwrap();
        assert_eq!(entity.game_object().type_key(), TypeId::of::<Prop>());

        let missing = scene.add_to_scene_dynamic_async("Ghost").await;
        assert!(matches!(missing, Err(SceneError::Spawn(_))));
        // A failed request must not wedge the worker.
        assert!(scene.add_to_scene_dynamic_async("Prop").await.is_ok());
        scene.dispose();
    }

    #[tokio::test]
    async fn add_multiple_yields_distinct_entities() {
        let scene = scene();
        let props = scene.add_multiple_async::<Prop>(5).await.unwrap();
        assert_eq!(props.len(), 5);
        let ids: HashSet<_> = props.iter().map(|p| p.id()).collect();
        assert_eq!(ids.len(), 5);
        assert_eq!(scene.behaviours().len(), 5);
        scene.dispose();
    }

    #[tokio::test]
    async fn remove_tracked_entity_recycles_it() {
        let scene = scene();
        let prop = scene.add_to_scene_async::<Prop>().await.unwrap();
        let first_id = prop.id();

        let facade: Arc<dyn Behaviour> = prop;
        scene.remove_from_scene(&facade).unwrap();
        assert!(scene.behaviours().is_empty());
        assert!(facade.game_object().is_destroyed());

        // The next acquire of the same type reuses the released instance.
        let again = scene.add_to_scene_async::<Prop>().await.unwrap();
        assert_eq!(again.id(), first_id);
        assert!(!again.game_object().is_destroyed());
        scene.dispose();
    }

    #[tokio::test]
    async fn remove_nested_entity_via_traversal() {
        let scene = scene();
        let parent = scene.add_to_scene_async::<Prop>().await.unwrap();
        let child = GameObject::new(TypeId::of::<Prop>(), "bare child");
        GameObject::attach_child(parent.game_object(), child.clone());

        scene.remove_game_object(&child).unwrap();
        assert_eq!(parent.game_object().child_count(), 0);
        assert!(child.is_destroyed());
        assert!(child.parent().is_none());
        scene.dispose();
    }

    #[tokio::test]
    async fn remove_nested_facade_releases_to_pool() {
        let scene = scene();
        let parent = scene.add_to_scene_async::<Prop>().await.unwrap();
        let nested = scene.add_to_scene_async::<Prop>().await.unwrap();
        GameObject::attach_child(parent.game_object(), nested.game_object().clone());

        // Drop the nested entity from the flat lists so only the
        // hierarchy still knows it.
        scene.registry.untrack(nested.id()).unwrap();
        assert!(!scene.registry.contains(nested.id()));

        scene.remove_game_object(nested.game_object()).unwrap();
        assert_eq!(parent.game_object().child_count(), 0);
        assert_eq!(scene.pools.free_count(TypeId::of::<Prop>()), 1);
        scene.dispose();
    }

    #[tokio::test]
    async fn remove_absent_entity_is_a_noop() {
        let scene = scene();
        let stray = GameObject::new(TypeId::of::<Prop>(), "stray");
        assert!(scene.remove_game_object(&stray).is_ok());
        scene.dispose();
    }

    #[tokio::test]
    async fn tag_lookup_over_snapshot() {
        let scene = scene();
        let a = scene.add_to_scene_async::<Prop>().await.unwrap();
        let b = scene.add_to_scene_async::<Prop>().await.unwrap();
        let c = scene.add_to_scene_async::<Prop>().await.unwrap();
        a.game_object().set_tag("enemy");
        b.game_object().set_tag("enemy");
        c.game_object().set_tag("player");

        let found = scene.find_with_tag("player").unwrap().unwrap();
        assert_eq!(found.id(), c.id());
        assert!(scene.find_with_tag("camera").unwrap().is_none());

        let enemies: Vec<_> = scene.find_all_with_tag("enemy").unwrap().collect();
        assert_eq!(enemies.len(), 2);
        // Restartable: a second call walks a fresh snapshot.
        assert_eq!(scene.find_all_with_tag("enemy").unwrap().count(), 2);
        scene.dispose();
    }

    #[test]
    fn dispose_is_idempotent_and_fails_later_ops() {
        let scene = scene();
        scene.dispose();
        scene.dispose();
        assert!(scene.is_disposed());

        assert!(matches!(
            scene.add_to_scene::<Prop>(),
            Err(SceneError::Disposed { .. })
        ));
        let stray = GameObject::new(TypeId::of::<Prop>(), "stray");
        assert!(matches!(
            scene.remove_game_object(&stray),
            Err(SceneError::Disposed { .. })
        ));
        assert!(matches!(
            scene.find_with_tag("any"),
            Err(SceneError::Disposed { .. })
        ));
    }

    #[test]
    fn dispose_does_not_strand_inflight_callers() {
        let _ = tracing_subscriber::fmt().with_test_writer().try_init();
        let scene = Arc::new(scene());
        let worker_scene = scene.clone();
        let caller = std::thread::spawn(move || worker_scene.add_to_scene::<Slow>());

        std::thread::sleep(Duration::from_millis(5));
        scene.dispose();

        // The call must return: either it completed before cancellation
        // or it observed the disposed scene. It must never hang.
        match caller.join().unwrap() {
            Ok(_) => {}
            Err(SceneError::Spawn(SpawnError::Cancelled)) => {}
            Err(SceneError::Disposed { .. }) => {}
            Err(other) => panic!("unexpected outcome: {other}"),
        }
    }
}
