//! Storage error types.

use std::path::PathBuf;
use thiserror::Error;

pub type StorageResult<T> = Result<T, StorageError>;

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("External URL cannot be resolved to a filesystem path: {0}")]
    ExternalUrl(String),

    #[error("Invalid URL format: {0}")]
    InvalidUrl(String),

    #[error("File not found: {0}")]
    FileNotFound(PathBuf),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}
