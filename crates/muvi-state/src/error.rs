//! State store error types.

use thiserror::Error;

use muvi_models::ProjectId;

pub type StateResult<T> = Result<T, StateError>;

#[derive(Debug, Error)]
pub enum StateError {
    #[error("Project not found: {0}")]
    NotFound(ProjectId),

    #[error("Project {id} was created by version {found}, current is {current}; pass force to migrate")]
    VersionMismatch {
        id: ProjectId,
        found: String,
        current: String,
    },

    #[error("Validation failed: {0}")]
    Validation(String),

    #[error("Storage error: {0}")]
    Storage(#[from] muvi_storage::StorageError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("State document parse error: {0}")]
    Json(#[from] serde_json::Error),
}
