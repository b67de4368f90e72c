//! Stage Engine Core
//!
//! Contains the fundamental scene building blocks:
//! - Entity model (game objects and their behaviour facades)
//! - Per-type recyclable instance pools
//! - Hierarchy traversal over the game-object forest

pub mod entity;
pub mod pool;
pub mod walk;

pub use entity::{downcast, Behaviour, EntityId, EntityTypes, FactoryError, GameObject};
pub use pool::{PoolError, PoolSet};
pub use walk::{walk_forest, Step};

/// Engine version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
