//! Stage Scene Management
//!
//! Scenes own the entity lifecycle: asynchronous, pool-backed
//! instantiation through a single per-scene worker, flat tracking of
//! live entities, and hierarchy-aware removal. The [`SceneManager`]
//! wires multiple scenes together by index.

pub mod error;
pub mod manager;
pub mod registry;
pub mod scene;

mod scheduler;

pub use error::{SceneError, SpawnError};
pub use manager::SceneManager;
pub use registry::EntityRegistry;
pub use scene::Scene;
