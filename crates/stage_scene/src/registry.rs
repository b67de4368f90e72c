//! Flat membership lists for one scene
//!
//! Two parallel sequences, behaviour facades and their owning game
//! objects, appended by the scheduler's completion path and trimmed by
//! removal. Reads hand out snapshots so iteration never races mutation.

use std::sync::{Arc, Mutex};

use stage_core::{Behaviour, EntityId, GameObject};

struct Lists {
    behaviours: Vec<Arc<dyn Behaviour>>,
    game_objects: Vec<Arc<GameObject>>,
}

pub struct EntityRegistry {
    inner: Mutex<Lists>,
}

impl EntityRegistry {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(Lists {
                behaviours: Vec::new(),
                game_objects: Vec::new(),
            }),
        }
    }

    /// Append the entity to both flat lists and bind the facade to its
    /// container so hierarchy removal can find it later.
    pub fn track(&self, entity: Arc<dyn Behaviour>) {
        entity.game_object().bind_facade(&entity);
        let game_object = entity.game_object().clone();
        let mut lists = self.lock();
        lists.behaviours.push(entity);
        lists.game_objects.push(game_object);
    }

    /// Remove by identity from both lists, returning the facade if it was
    /// tracked.
    pub fn untrack(&self, id: EntityId) -> Option<Arc<dyn Behaviour>> {
        let mut lists = self.lock();
        lists.game_objects.retain(|go| go.id() != id);
        let pos = lists.behaviours.iter().position(|b| b.id() == id)?;
        Some(lists.behaviours.remove(pos))
    }

    pub fn contains(&self, id: EntityId) -> bool {
        self.lock().behaviours.iter().any(|b| b.id() == id)
    }

    /// Snapshot of the behaviour list.
    pub fn behaviours(&self) -> Vec<Arc<dyn Behaviour>> {
        self.lock().behaviours.clone()
    }

    /// Snapshot of the game-object list.
    pub fn game_objects(&self) -> Vec<Arc<GameObject>> {
        self.lock().game_objects.clone()
    }

    pub fn len(&self) -> usize {
        self.lock().behaviours.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().behaviours.is_empty()
    }

    pub fn clear(&self) {
        let mut lists = self.lock();
        lists.behaviours.clear();
        lists.game_objects.clear();
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Lists> {
        self.inner.lock().expect("entity registry poisoned")
    }
}

impl Default for EntityRegistry {
    fn default() -> Self {
        Self::new()
    }
}
