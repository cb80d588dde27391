//! Error types.

use crate::types::ObjectHandle;
use thiserror::Error;

/// Failures reported by a [`PhysicsBackend`](crate::backend::PhysicsBackend).
#[derive(Debug, Clone, Error, PartialEq)]
pub enum BackendError {
    #[error("unknown body {0}")]
    UnknownBody(usize),
    #[error("invalid step duration {0}")]
    InvalidStep(f32),
    #[error("step failed: {0}")]
    StepFailed(String),
}

/// Rejected scene commands. Every variant is also logged at the call site.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum SceneError {
    #[error("scene is not initialized")]
    NotInitialized,
    #[error("scene is already initialized")]
    AlreadyInitialized,
    #[error("a bake is already recording")]
    AlreadyRecording,
    #[error("no finished bake data")]
    NoBakeData,
    #[error("invalid argument: {0}")]
    InvalidArgument(String),
    #[error("unknown object {0}")]
    UnknownObject(ObjectHandle),
    #[error("bake was cancelled")]
    BakeCancelled,
    #[error("bake failed: {0}")]
    BakeFailed(String),
}

impl From<BackendError> for SceneError {
    fn from(err: BackendError) -> Self {
        SceneError::BakeFailed(err.to_string())
    }
}
