//! Engine error types.

use thiserror::Error;

pub type EngineResult<T> = Result<T, EngineError>;

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Invalid input: {0}")]
    Validation(String),

    #[error("Busy: {0}")]
    Busy(String),

    #[error("Backend error: {0}")]
    Backend(#[from] muvi_gen::GenError),

    #[error("State error: {0}")]
    State(#[from] muvi_state::StateError),

    #[error("Storage error: {0}")]
    Storage(#[from] muvi_storage::StorageError),

    #[error("Media error: {0}")]
    Media(#[from] muvi_media::MediaError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl EngineError {
    pub fn not_found(msg: impl Into<String>) -> Self {
        Self::NotFound(msg.into())
    }

    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    pub fn busy(msg: impl Into<String>) -> Self {
        Self::Busy(msg.into())
    }
}
