//! Stage Runtime
//!
//! Minimal binary that links the engine crates and boots a demo scene

use std::any::{Any, TypeId};
use std::sync::Arc;

use anyhow::Result;

use stage_core::{Behaviour, EntityTypes, FactoryError, GameObject};
use stage_scene::{Scene, SceneManager};

struct Sprite {
    go: Arc<GameObject>,
}

impl Sprite {
    fn build() -> Result<Arc<Sprite>, FactoryError> {
        Ok(Arc::new(Sprite {
            go: GameObject::new(TypeId::of::<Sprite>(), "Sprite"),
        }))
    }
}

impl Behaviour for Sprite {
    fn game_object(&self) -> &Arc<GameObject> {
        &self.go
    }

    fn as_any(self: Arc<Self>) -> Arc<dyn Any + Send + Sync> {
        self
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::fmt::init();

    tracing::info!("Stage Engine v{}", stage_core::VERSION);

    let types = Arc::new(EntityTypes::new());
    types.register::<Sprite, _>("Sprite", Sprite::build);

    let manager = SceneManager::new();
    let index = manager.add_scene(Scene::new("boot", types));
    manager.set_current(index);
    let scene = manager.get(index).expect("boot scene registered");

    let sprites = scene.add_multiple_async::<Sprite>(3).await?;
    for sprite in &sprites {
        sprite.game_object().set_tag("demo");
    }
    tracing::info!(
        count = scene.find_all_with_tag("demo")?.count(),
        "demo entities spawned"
    );

    let facade: Arc<dyn Behaviour> = sprites[0].clone();
    scene.remove_from_scene(&facade)?;
    tracing::info!(remaining = scene.behaviours().len(), "entity recycled");

    manager.clear();
    tracing::info!("runtime shut down cleanly");
    Ok(())
}
