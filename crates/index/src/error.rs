//! Index error types.

use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum IndexError {
    #[error("Insufficient data: {samples} samples for {partitions} partitions")]
    InsufficientData { samples: usize, partitions: usize },

    #[error("Dimension mismatch: expected {expected}, got {got}")]
    DimensionMismatch { expected: usize, got: usize },

    #[error("Index has not been trained")]
    NotIndexed,

    #[error("Index build cancelled")]
    Cancelled,

    #[error("Invalid index configuration: {0}")]
    InvalidConfig(String),
}

pub type IndexResult<T> = Result<T, IndexError>;
