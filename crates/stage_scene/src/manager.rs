//! Keyed collection of active scenes
//!
//! Thread-safe CRUD over scene instances by numeric index, plus a
//! process-default manager handle. No concurrency hazards beyond the
//! map itself; the interesting lifecycle logic lives in [`Scene`].

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use dashmap::DashMap;
use once_cell::sync::OnceCell;

use crate::scene::Scene;

static DEFAULT_MANAGER: OnceCell<Arc<SceneManager>> = OnceCell::new();

pub struct SceneManager {
    scenes: DashMap<usize, Arc<Scene>>,
    next_index: AtomicUsize,
    current_index: AtomicUsize,
}

impl SceneManager {
    /// Create a manager. The first manager constructed in the process
    /// becomes the default.
    pub fn new() -> Arc<Self> {
        let manager = Arc::new(Self {
            scenes: DashMap::new(),
            next_index: AtomicUsize::new(0),
            current_index: AtomicUsize::new(0),
        });
        let _ = DEFAULT_MANAGER.set(manager.clone());
        manager
    }

    /// The process-default manager, if one has been constructed.
    pub fn default_manager() -> Option<Arc<SceneManager>> {
        DEFAULT_MANAGER.get().cloned()
    }

    /// Register a scene, assigning it the next free index.
    pub fn add_scene(&self, scene: Scene) -> usize {
        let index = self.next_index.fetch_add(1, Ordering::Relaxed);
        scene.set_index(index);
        self.scenes.insert(index, Arc::new(scene));
        index
    }

    pub fn get(&self, index: usize) -> Option<Arc<Scene>> {
        let scene = self.scenes.get(&index).map(|s| s.clone());
        if scene.is_none() {
            tracing::error!(index, "scene not found in the scene manager");
        }
        scene
    }

    /// Unregister a scene without disposing it; the caller decides its
    /// fate. Returns the scene if the index was occupied.
    pub fn remove_scene(&self, index: usize) -> Option<Arc<Scene>> {
        match self.scenes.remove(&index) {
            Some((_, scene)) => Some(scene),
            None => {
                tracing::error!(index, "cannot remove a scene that is not registered");
                None
            }
        }
    }

    pub fn set_current(&self, index: usize) {
        self.current_index.store(index, Ordering::Relaxed);
    }

    pub fn current(&self) -> Option<Arc<Scene>> {
        self.scenes
            .get(&self.current_index.load(Ordering::Relaxed))
            .map(|s| s.clone())
    }

    pub fn count(&self) -> usize {
        self.scenes.len()
    }

    /// Snapshot of all registered scenes.
    pub fn scenes(&self) -> Vec<Arc<Scene>> {
        self.scenes.iter().map(|entry| entry.value().clone()).collect()
    }

    /// Dispose every registered scene and empty the collection.
    pub fn clear(&self) {
        for entry in self.scenes.iter() {
            entry.value().dispose();
        }
        self.scenes.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use stage_core::EntityTypes;

    fn scene(name: &str) -> Scene {
        Scene::new(name, Arc::new(EntityTypes::new()))
    }

    #[test]
    fn indices_are_assigned_monotonically() {
        let manager = SceneManager::new();
        let a = manager.add_scene(scene("a"));
        let b = manager.add_scene(scene("b"));
        assert!(b > a);
        assert_eq!(manager.count(), 2);
        assert_eq!(manager.get(a).unwrap().index(), a);
        assert_eq!(manager.get(a).unwrap().name(), "a");
    }

    #[test]
    fn get_missing_scene_is_none() {
        let manager = SceneManager::new();
        assert!(manager.get(999).is_none());
        assert!(manager.remove_scene(999).is_none());
    }

    #[test]
    fn current_scene_follows_the_selector() {
        let manager = SceneManager::new();
        let a = manager.add_scene(scene("a"));
        let b = manager.add_scene(scene("b"));

        manager.set_current(a);
        assert_eq!(manager.current().unwrap().name(), "a");
        manager.set_current(b);
        assert_eq!(manager.current().unwrap().name(), "b");
    }

    #[test]
    fn clear_disposes_registered_scenes() {
        let manager = SceneManager::new();
        let index = manager.add_scene(scene("doomed"));
        let held = manager.get(index).unwrap();

        manager.clear();
        assert_eq!(manager.count(), 0);
        assert!(held.is_disposed());
    }

    #[test]
    fn first_manager_becomes_default() {
        let _manager = SceneManager::new();
        assert!(SceneManager::default_manager().is_some());
    }
}
