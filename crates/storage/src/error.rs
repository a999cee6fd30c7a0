//! Storage error types.

use sculpin_core::VectorId;
use thiserror::Error;

/// Storage-related errors.
#[derive(Error, Debug)]
pub enum StorageError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Dimension mismatch: expected {expected}, got {got}")]
    DimensionMismatch { expected: usize, got: usize },

    #[error("Vector {0} already exists")]
    DuplicateId(VectorId),

    #[error("Vector {0} not found")]
    NotFound(VectorId),

    #[error("Invalid vector: {0}")]
    InvalidVector(String),
}

pub type StorageResult<T> = Result<T, StorageError>;
