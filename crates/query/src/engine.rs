//! Query engine: the request-level facade over a [`Catalog`].
//!
//! Applies query defaults and limits, and persists collections after
//! every call that changes them.

use crate::catalog::Catalog;
use crate::collection::{
    BatchReport, CollectionConfig, CollectionStats, Hit, RebuildReport,
};
use crate::error::{QueryError, QueryResult};
use crate::pipeline::PipelineSpec;
use sculpin_core::{CollectionSettings, QuerySettings, VectorId, VectorRecord};
use sculpin_index::CancelFlag;
use sculpin_storage::StorageError;
use serde::Deserialize;
use std::sync::Arc;

/// Request to create a collection. Missing settings fall back to the
/// engine's defaults.
#[derive(Debug, Clone, Deserialize)]
pub struct CreateCollection {
    pub name: String,
    pub dimension: usize,
    #[serde(default)]
    pub settings: Option<CollectionSettings>,
    #[serde(default)]
    pub pipeline: Option<PipelineSpec>,
}

/// A nearest-neighbour query.
#[derive(Debug, Clone, Deserialize)]
pub struct SearchRequest {
    pub vector: Vec<f32>,
    #[serde(default)]
    pub top_k: Option<usize>,
    #[serde(default)]
    pub nprobe: Option<usize>,
    #[serde(default)]
    pub include_payload: bool,
}

/// Query engine shared by request handlers.
pub struct QueryEngine {
    catalog: Arc<Catalog>,
    query: QuerySettings,
    collection_defaults: CollectionSettings,
}

impl QueryEngine {
    pub fn new(
        catalog: Arc<Catalog>,
        query: QuerySettings,
        collection_defaults: CollectionSettings,
    ) -> Self {
        Self {
            catalog,
            query,
            collection_defaults,
        }
    }

    pub fn catalog(&self) -> &Arc<Catalog> {
        &self.catalog
    }

    pub fn create_collection(&self, request: CreateCollection) -> QueryResult<CollectionStats> {
        let config = CollectionConfig::new(request.name, request.dimension)
            .with_settings(
                request
                    .settings
                    .unwrap_or_else(|| self.collection_defaults.clone()),
            )
            .with_pipeline(request.pipeline.unwrap_or_default());
        Ok(self.catalog.create(config)?.stats())
    }

    pub fn drop_collection(&self, name: &str) -> QueryResult<()> {
        self.catalog.drop_collection(name)
    }

    pub fn list_collections(&self) -> Vec<CollectionStats> {
        self.catalog
            .list()
            .iter()
            .filter_map(|name| self.catalog.get(name).ok())
            .map(|c| c.stats())
            .collect()
    }

    pub fn stats(&self, name: &str) -> QueryResult<CollectionStats> {
        Ok(self.catalog.get(name)?.stats())
    }

    pub fn count(&self, name: &str) -> QueryResult<usize> {
        Ok(self.catalog.get(name)?.count())
    }

    /// Ingest raw records; failing items are reported, the rest committed.
    pub fn insert(
        &self,
        name: &str,
        records: Vec<serde_json::Value>,
        overwrite: bool,
    ) -> QueryResult<BatchReport> {
        let collection = self.catalog.get(name)?;
        let report = collection.ingest(records, overwrite);
        if report.inserted > 0 {
            self.catalog.persist(&collection)?;
        }
        Ok(report)
    }

    pub fn get(&self, name: &str, id: VectorId) -> QueryResult<VectorRecord> {
        self.catalog.get(name)?.get(id)
    }

    /// Delete one vector. Unlike the store, a missing id is an error here
    /// so callers can tell a typo from a delete.
    pub fn delete(&self, name: &str, id: VectorId) -> QueryResult<()> {
        let collection = self.catalog.get(name)?;
        if !collection.delete(id) {
            return Err(StorageError::NotFound(id).into());
        }
        self.catalog.persist(&collection)
    }

    pub fn search(&self, name: &str, request: &SearchRequest) -> QueryResult<Vec<Hit>> {
        let top_k = request.top_k.unwrap_or(self.query.default_top_k);
        if top_k > self.query.max_top_k {
            return Err(QueryError::InvalidQuery(format!(
                "top_k {} exceeds the maximum of {}",
                top_k, self.query.max_top_k
            )));
        }
        let nprobe = request.nprobe.unwrap_or(self.query.default_nprobe);

        let collection = self.catalog.get(name)?;
        collection.search(&request.vector, top_k, nprobe, request.include_payload)
    }

    pub fn rebuild(&self, name: &str, cancel: &CancelFlag) -> QueryResult<RebuildReport> {
        self.catalog.get(name)?.rebuild(cancel)
    }
}
