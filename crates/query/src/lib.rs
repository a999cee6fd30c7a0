//! Collections and query execution for Sculpin.
//!
//! Ties the vector store and IVF index into named collections, runs raw
//! records through the ingest pipeline, and exposes a request-level
//! [`QueryEngine`] over the [`Catalog`].

pub mod catalog;
pub mod collection;
pub mod engine;
pub mod error;
pub mod pipeline;

pub use catalog::Catalog;
pub use collection::{
    BatchReport, Collection, CollectionConfig, CollectionStats, Hit, IndexState, ItemOutcome,
    RebuildReport,
};
pub use engine::{CreateCollection, QueryEngine, SearchRequest};
pub use error::{ErrorInfo, ErrorKind, PipelineError, PipelineResult, QueryError, QueryResult};
pub use pipeline::{
    IngestRecord, Operator, OperatorRegistry, Pipeline, PipelineBuilder, PipelineSpec, Record,
    StageFields, StageSpec,
};
