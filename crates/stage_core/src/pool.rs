//! Per-type recyclable entity pools
//!
//! Each entity type gets an independent store of released instances.
//! Stores are created lazily on first acquire; the map uses atomic
//! insert-if-absent so a first-use race converges on a single store.

use std::any::TypeId;
use std::sync::{Arc, Mutex};

use dashmap::DashMap;
use thiserror::Error;

use crate::entity::{Behaviour, EntityTypes, FactoryError};

#[derive(Debug, Error)]
pub enum PoolError {
    #[error("no entity type registered under name `{name}`")]
    UnknownName { name: String },

    #[error("requested entity type is not registered")]
    Unregistered,

    #[error("factory for entity type `{name}` failed")]
    Factory {
        name: String,
        #[source]
        source: FactoryError,
    },
}

/// Store of released instances for one entity type.
struct TypePool {
    type_name: String,
    build: Arc<dyn Fn() -> Result<Arc<dyn Behaviour>, FactoryError> + Send + Sync>,
    free: Mutex<Vec<Arc<dyn Behaviour>>>,
}

impl TypePool {
    fn acquire(&self) -> Result<Arc<dyn Behaviour>, PoolError> {
        if let Some(recycled) = self.free.lock().expect("type pool poisoned").pop() {
            recycled.game_object().reset_for_reuse();
            return Ok(recycled);
        }
        (self.build)().map_err(|source| PoolError::Factory {
            name: self.type_name.clone(),
            source,
        })
    }

    fn release(&self, instance: Arc<dyn Behaviour>) {
        self.free.lock().expect("type pool poisoned").push(instance);
    }

    fn clear(&self) {
        self.free.lock().expect("type pool poisoned").clear();
    }

    fn free_len(&self) -> usize {
        self.free.lock().expect("type pool poisoned").len()
    }
}

/// The per-type pool map owned by one scene.
pub struct PoolSet {
    types: Arc<EntityTypes>,
    pools: DashMap<TypeId, Arc<TypePool>>,
}

impl PoolSet {
    pub fn new(types: Arc<EntityTypes>) -> Self {
        Self {
            types,
            pools: DashMap::new(),
        }
    }

    pub fn types(&self) -> &Arc<EntityTypes> {
        &self.types
    }

    /// Recycled instance of `key` if one is free, otherwise a fresh build
    /// through the registered factory.
    pub fn acquire(&self, key: TypeId) -> Result<Arc<dyn Behaviour>, PoolError> {
        let pool = self.store_for(key)?;
        pool.acquire()
    }

    /// Name-keyed variant for the dynamic spawn path.
    pub fn acquire_by_name(&self, name: &str) -> Result<Arc<dyn Behaviour>, PoolError> {
        let key = self.types.resolve(name).ok_or_else(|| PoolError::UnknownName {
            name: name.to_string(),
        })?;
        self.acquire(key)
    }

    /// Return an instance to its type store for later reuse. An instance
    /// whose type has no store yet was never pooled; it is dropped.
    pub fn release(&self, instance: Arc<dyn Behaviour>) {
        let key = instance.game_object().type_key();
        match self.pools.get(&key) {
            Some(pool) => pool.release(instance),
            None => {
                tracing::debug!(id = %instance.id(), "released entity has no pool store, dropping");
            }
        }
    }

    /// Drop every held instance and every store.
    pub fn dispose(&self) {
        for entry in self.pools.iter() {
            entry.value().clear();
        }
        self.pools.clear();
    }

    pub fn store_count(&self) -> usize {
        self.pools.len()
    }

    /// Number of free (released, not yet reacquired) instances for `key`.
    pub fn free_count(&self, key: TypeId) -> usize {
        self.pools.get(&key).map(|p| p.free_len()).unwrap_or(0)
    }

    fn store_for(&self, key: TypeId) -> Result<Arc<TypePool>, PoolError> {
        if let Some(existing) = self.pools.get(&key) {
            return Ok(existing.clone());
        }
        let (type_name, build) = self.types.factory(key).ok_or(PoolError::Unregistered)?;
        // `entry` is atomic: racing first users converge on one store and
        // the losing constructor's empty store is discarded.
        let pool = self
            .pools
            .entry(key)
            .or_insert_with(|| {
                Arc::new(TypePool {
                    type_name,
                    build,
                    free: Mutex::new(Vec::new()),
                })
            })
            .clone();
        Ok(pool)
    }
}
