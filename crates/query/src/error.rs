//! Query error types.

use sculpin_index::IndexError;
use sculpin_storage::StorageError;
use serde::Serialize;
use thiserror::Error;

/// Errors raised while building or running an ingest pipeline.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum PipelineError {
    #[error("Unknown operator: {0}")]
    UnknownOperator(String),

    #[error("Invalid parameters for {operator}: {message}")]
    InvalidParams { operator: String, message: String },

    #[error("Stage {stage} ({operator}) reads undeclared field '{field}'")]
    UndeclaredField {
        stage: usize,
        operator: String,
        field: String,
    },

    #[error("Missing field: {0}")]
    MissingField(String),

    #[error("Invalid field '{field}': {message}")]
    InvalidField { field: String, message: String },
}

pub type PipelineResult<T> = Result<T, PipelineError>;

#[derive(Error, Debug)]
pub enum QueryError {
    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("Index error: {0}")]
    Index(#[from] IndexError),

    #[error("Pipeline error: {0}")]
    Pipeline(#[from] PipelineError),

    #[error("Collection not found: {0}")]
    CollectionNotFound(String),

    #[error("Collection already exists: {0}")]
    CollectionAlreadyExists(String),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Invalid query: {0}")]
    InvalidQuery(String),
}

pub type QueryResult<T> = Result<T, QueryError>;

/// Stable, serializable classification of a [`QueryError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    DimensionMismatch,
    DuplicateId,
    NotFound,
    InsufficientData,
    NotIndexed,
    AlreadyExists,
    Cancelled,
    InvalidVector,
    InvalidRecord,
    InvalidConfig,
    InvalidQuery,
    Internal,
}

impl ErrorKind {
    /// Whether the request itself was at fault, as opposed to the state of
    /// the server.
    pub fn is_caller_error(self) -> bool {
        matches!(
            self,
            ErrorKind::DimensionMismatch
                | ErrorKind::DuplicateId
                | ErrorKind::NotFound
                | ErrorKind::AlreadyExists
                | ErrorKind::InvalidVector
                | ErrorKind::InvalidRecord
                | ErrorKind::InvalidConfig
                | ErrorKind::InvalidQuery
        )
    }
}

impl QueryError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            QueryError::Storage(e) => match e {
                StorageError::DimensionMismatch { .. } => ErrorKind::DimensionMismatch,
                StorageError::DuplicateId(_) => ErrorKind::DuplicateId,
                StorageError::NotFound(_) => ErrorKind::NotFound,
                StorageError::InvalidVector(_) => ErrorKind::InvalidVector,
                StorageError::Io(_) | StorageError::Json(_) => ErrorKind::Internal,
            },
            QueryError::Index(e) => match e {
                IndexError::InsufficientData { .. } => ErrorKind::InsufficientData,
                IndexError::DimensionMismatch { .. } => ErrorKind::DimensionMismatch,
                IndexError::NotIndexed => ErrorKind::NotIndexed,
                IndexError::Cancelled => ErrorKind::Cancelled,
                IndexError::InvalidConfig(_) => ErrorKind::InvalidConfig,
            },
            QueryError::Pipeline(e) => match e {
                PipelineError::MissingField(_) | PipelineError::InvalidField { .. } => {
                    ErrorKind::InvalidRecord
                }
                _ => ErrorKind::InvalidConfig,
            },
            QueryError::CollectionNotFound(_) => ErrorKind::NotFound,
            QueryError::CollectionAlreadyExists(_) => ErrorKind::AlreadyExists,
            QueryError::InvalidConfig(_) => ErrorKind::InvalidConfig,
            QueryError::InvalidQuery(_) => ErrorKind::InvalidQuery,
        }
    }

    /// Kind plus message, the shape reported to callers.
    pub fn info(&self) -> ErrorInfo {
        ErrorInfo {
            kind: self.kind(),
            message: self.to_string(),
        }
    }
}

/// Structured error object.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ErrorInfo {
    pub kind: ErrorKind,
    pub message: String,
}
