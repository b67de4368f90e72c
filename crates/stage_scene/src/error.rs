use stage_core::PoolError;
use thiserror::Error;

/// Outcome of one instantiation request, as seen by its requester.
///
/// Construction failures travel through the same completion handle as
/// successes, so callers observe both outcomes the same way.
#[derive(Debug, Error)]
pub enum SpawnError {
    #[error(transparent)]
    Pool(#[from] PoolError),

    #[error("scene was disposed before the request was serviced")]
    Cancelled,

    #[error("spawn worker dropped the completion handle")]
    Lost,

    #[error("spawned entity was not of the requested type")]
    WrongType,
}

#[derive(Debug, Error)]
pub enum SceneError {
    /// Any operation other than `dispose` on a disposed scene.
    #[error("scene `{name}` is disposed")]
    Disposed { name: String },

    #[error(transparent)]
    Spawn(#[from] SpawnError),
}
