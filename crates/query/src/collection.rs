//! A named collection: vector store, IVF index and ingest pipeline.
//!
//! Store and index sit behind one reader-writer lock. Searches hold the
//! read guard for their whole scan, so they see the collection as it was
//! when they started. Inserts and deletes apply a whole batch under one
//! write guard, and an index rebuild swaps the new index in under the write
//! guard only after it is fully built.

use crate::error::{ErrorInfo, QueryError, QueryResult};
use crate::pipeline::{IngestRecord, OperatorRegistry, Pipeline, PipelineBuilder, PipelineSpec};
use parking_lot::{Mutex, RwLock, RwLockUpgradableReadGuard};
use rand::rngs::StdRng;
use rand::SeedableRng;
use rayon::prelude::*;
use sculpin_core::{CollectionSettings, VectorId, VectorRecord};
use sculpin_index::{
    brute_force_search, search_index, CancelFlag, IndexError, IvfIndex, KMeansConfig,
    Partitioner, SearchResult,
};
use sculpin_storage::VectorStore;
use serde::{Deserialize, Serialize};

/// Everything needed to recreate a collection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CollectionConfig {
    pub name: String,
    pub dimension: usize,
    #[serde(default)]
    pub settings: CollectionSettings,
    #[serde(default)]
    pub pipeline: PipelineSpec,
}

impl CollectionConfig {
    pub fn new(name: impl Into<String>, dimension: usize) -> Self {
        Self {
            name: name.into(),
            dimension,
            settings: CollectionSettings::default(),
            pipeline: PipelineSpec::default(),
        }
    }

    pub fn with_settings(mut self, settings: CollectionSettings) -> Self {
        self.settings = settings;
        self
    }

    pub fn with_pipeline(mut self, pipeline: PipelineSpec) -> Self {
        self.pipeline = pipeline;
        self
    }

    pub fn validate(&self) -> QueryResult<()> {
        let name_ok = !self.name.is_empty()
            && self.name.len() <= 128
            && self
                .name
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-');
        if !name_ok {
            return Err(QueryError::InvalidConfig(format!(
                "collection name '{}' must be 1-128 characters of [A-Za-z0-9_-]",
                self.name
            )));
        }
        if self.dimension == 0 {
            return Err(QueryError::InvalidConfig("dimension must be > 0".to_string()));
        }
        self.settings.validate().map_err(QueryError::InvalidConfig)
    }
}

/// Where a collection is in its indexing lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum IndexState {
    /// No vectors.
    Empty,
    /// Vectors but no trained index; searches scan everything.
    Untrained,
    /// Trained partitioner and posting lists.
    Indexed,
}

/// A single search hit, optionally with its payload.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Hit {
    pub id: VectorId,
    pub distance: f32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub payload: Option<serde_json::Value>,
}

/// Per-item result of a batch insert.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ItemOutcome {
    /// Position of the item in the batch.
    pub index: usize,
    pub ok: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<VectorId>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorInfo>,
}

/// Aggregate result of a batch insert.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BatchReport {
    pub inserted: usize,
    pub failed: usize,
    pub items: Vec<ItemOutcome>,
}

impl BatchReport {
    fn from_results(results: Vec<QueryResult<VectorId>>) -> Self {
        let items: Vec<ItemOutcome> = results
            .into_iter()
            .enumerate()
            .map(|(index, result)| match result {
                Ok(id) => ItemOutcome {
                    index,
                    ok: true,
                    id: Some(id),
                    error: None,
                },
                Err(e) => ItemOutcome {
                    index,
                    ok: false,
                    id: None,
                    error: Some(e.info()),
                },
            })
            .collect();
        let inserted = items.iter().filter(|i| i.ok).count();
        Self {
            inserted,
            failed: items.len() - inserted,
            items,
        }
    }
}

/// Summary of a finished rebuild.
#[derive(Debug, Clone, Serialize)]
pub struct RebuildReport {
    pub num_partitions: usize,
    pub indexed_vectors: usize,
    pub training_samples: usize,
    pub iterations: usize,
    pub converged: bool,
}

/// Collection statistics.
#[derive(Debug, Clone, Serialize)]
pub struct CollectionStats {
    pub name: String,
    pub dimension: usize,
    pub metric: sculpin_core::Metric,
    pub state: IndexState,
    pub count: usize,
    pub num_partitions: usize,
    pub partition_sizes: Vec<usize>,
    pub mutations_since_train: usize,
}

#[derive(Debug)]
struct CollectionState {
    store: VectorStore,
    index: Option<IvfIndex>,
    next_id: VectorId,
    mutations_since_train: usize,
    trained_size: usize,
}

impl CollectionState {
    fn state(&self) -> IndexState {
        if self.store.is_empty() {
            IndexState::Empty
        } else if self.index.is_some() {
            IndexState::Indexed
        } else {
            IndexState::Untrained
        }
    }

    /// Store one record and keep the index in step with it.
    fn apply_insert(&mut self, record: IngestRecord, overwrite: bool) -> QueryResult<VectorId> {
        let id = record.id.unwrap_or(self.next_id);
        self.store.put(id, record.vector, record.payload, overwrite)?;
        if let Some(index) = self.index.as_mut() {
            index.incremental_add(id, self.store.get(id)?)?;
        }
        if id >= self.next_id {
            self.next_id = id.next();
        }
        self.mutations_since_train += 1;
        Ok(id)
    }

    fn apply_delete(&mut self, id: VectorId) -> bool {
        if let Some(index) = self.index.as_mut() {
            index.remove(id);
        }
        let removed = self.store.delete(id);
        if removed {
            self.mutations_since_train += 1;
        }
        removed
    }
}

/// A named collection.
#[derive(Debug)]
pub struct Collection {
    config: CollectionConfig,
    pipeline: Pipeline,
    state: RwLock<CollectionState>,
    rebuild_lock: Mutex<()>,
}

impl Collection {
    /// Create an empty collection.
    pub fn new(config: CollectionConfig, registry: &OperatorRegistry) -> QueryResult<Self> {
        let store = VectorStore::new(config.dimension);
        Self::from_store(config, registry, store)
    }

    /// Create a collection around existing vectors. The index is not
    /// trained here; call [`Collection::maintain`] or
    /// [`Collection::rebuild`].
    pub fn from_store(
        config: CollectionConfig,
        registry: &OperatorRegistry,
        store: VectorStore,
    ) -> QueryResult<Self> {
        config.validate()?;
        if store.dimension() != config.dimension {
            return Err(QueryError::InvalidConfig(format!(
                "stored vectors have dimension {}, collection expects {}",
                store.dimension(),
                config.dimension
            )));
        }
        let pipeline = PipelineBuilder::from_spec(registry, &config.pipeline)?;
        let next_id = store
            .scan()
            .map(|(id, _)| id.next())
            .max()
            .unwrap_or(VectorId(0));
        let mutations = store.len();

        Ok(Self {
            config,
            pipeline,
            state: RwLock::new(CollectionState {
                store,
                index: None,
                next_id,
                mutations_since_train: mutations,
                trained_size: 0,
            }),
            rebuild_lock: Mutex::new(()),
        })
    }

    pub fn name(&self) -> &str {
        &self.config.name
    }

    pub fn dimension(&self) -> usize {
        self.config.dimension
    }

    pub fn config(&self) -> &CollectionConfig {
        &self.config
    }

    pub fn state(&self) -> IndexState {
        self.state.read().state()
    }

    /// Number of live vectors.
    pub fn count(&self) -> usize {
        self.state.read().store.len()
    }

    /// Insert one record. Without an id the next free id is assigned.
    pub fn insert(
        &self,
        id: Option<VectorId>,
        vector: Vec<f32>,
        payload: Option<serde_json::Value>,
        overwrite: bool,
    ) -> QueryResult<VectorId> {
        let id = self
            .state
            .write()
            .apply_insert(IngestRecord { id, vector, payload }, overwrite)?;
        self.maintain();
        Ok(id)
    }

    /// Run raw JSON records through the ingest pipeline and store the ones
    /// that survive. A failing item never aborts the batch.
    pub fn ingest(&self, raw: Vec<serde_json::Value>, overwrite: bool) -> BatchReport {
        let prepared: Vec<QueryResult<IngestRecord>> = raw
            .into_par_iter()
            .map(|value| self.pipeline.run(value).map_err(QueryError::from))
            .collect();
        self.commit(prepared, overwrite)
    }

    /// Store already-built records, reporting failures per item.
    pub fn insert_batch(&self, records: Vec<IngestRecord>, overwrite: bool) -> BatchReport {
        self.commit(records.into_iter().map(Ok).collect(), overwrite)
    }

    fn commit(&self, prepared: Vec<QueryResult<IngestRecord>>, overwrite: bool) -> BatchReport {
        let results: Vec<QueryResult<VectorId>> = {
            let mut state = self.state.write();
            prepared
                .into_iter()
                .map(|item| item.and_then(|record| state.apply_insert(record, overwrite)))
                .collect()
        };

        let report = BatchReport::from_results(results);
        for item in report.items.iter().filter(|i| !i.ok) {
            if let Some(error) = &item.error {
                tracing::warn!(
                    "Collection {}: batch item {} rejected: {}",
                    self.name(),
                    item.index,
                    error.message
                );
            }
        }
        tracing::debug!(
            "Collection {}: committed {} of {} records",
            self.name(),
            report.inserted,
            report.items.len()
        );

        if report.inserted > 0 {
            self.maintain();
        }
        report
    }

    /// Fetch a stored record.
    pub fn get(&self, id: VectorId) -> QueryResult<VectorRecord> {
        Ok(self.state.read().store.record(id)?)
    }

    /// Delete a vector from the store and the index. Returns whether it
    /// existed.
    pub fn delete(&self, id: VectorId) -> bool {
        let removed = self.state.write().apply_delete(id);
        if removed {
            self.maintain();
        }
        removed
    }

    /// The `k` nearest vectors to `query`.
    ///
    /// Probes `nprobe` partitions when the collection is indexed and scans
    /// every vector otherwise.
    pub fn search(
        &self,
        query: &[f32],
        k: usize,
        nprobe: usize,
        include_payload: bool,
    ) -> QueryResult<Vec<Hit>> {
        let state = self.state.read();
        let metric = self.config.settings.metric;

        let results: Vec<SearchResult> =
            match search_index(state.index.as_ref(), &state.store, query, k, nprobe, metric) {
                Err(IndexError::NotIndexed) => {
                    brute_force_search(&state.store, query, k, metric)?
                }
                other => other?,
            };

        Ok(results
            .into_iter()
            .map(|r| Hit {
                id: r.id,
                distance: r.distance,
                payload: if include_payload {
                    state.store.payload(r.id).ok().flatten().cloned()
                } else {
                    None
                },
            })
            .collect())
    }

    /// Retrain the partitioner and rebuild every posting list.
    ///
    /// Training runs without holding the collection lock; posting lists
    /// are built while searches continue and swapped in at the end. A
    /// cancelled rebuild leaves the current index in place.
    pub fn rebuild(&self, cancel: &CancelFlag) -> QueryResult<RebuildReport> {
        let _guard = self.rebuild_lock.lock();
        self.rebuild_locked(cancel)
    }

    fn rebuild_locked(&self, cancel: &CancelFlag) -> QueryResult<RebuildReport> {
        let settings = &self.config.settings;

        let samples = {
            let state = self.state.read();
            let available = state.store.len();
            if available < settings.num_partitions {
                return Err(IndexError::InsufficientData {
                    samples: available,
                    partitions: settings.num_partitions,
                }
                .into());
            }
            let mut rng = match settings.seed {
                Some(seed) => StdRng::seed_from_u64(seed),
                None => StdRng::from_entropy(),
            };
            let cap = settings.training_sample_size.unwrap_or(available);
            state.store.sample(cap, &mut rng)
        };

        let partitioner = Partitioner::train(&samples, &KMeansConfig::from(settings), cancel)?;
        let iterations = partitioner.iterations();
        let converged = partitioner.converged();

        let staged = self.state.upgradable_read();
        let index = IvfIndex::build(&staged.store, partitioner, cancel)?;
        let mut state = RwLockUpgradableReadGuard::upgrade(staged);

        let report = RebuildReport {
            num_partitions: index.num_partitions(),
            indexed_vectors: index.len(),
            training_samples: samples.len(),
            iterations,
            converged,
        };
        state.trained_size = state.store.len();
        state.mutations_since_train = 0;
        state.index = Some(index);

        tracing::info!(
            "Collection {}: index rebuilt with {} partitions over {} vectors",
            self.name(),
            report.num_partitions,
            report.indexed_vectors
        );
        Ok(report)
    }

    /// Apply the automatic indexing policy.
    ///
    /// An indexed collection whose mutations since training exceed
    /// `retrain_ratio` of its trained size drops back to untrained. With
    /// `auto_index`, an untrained collection holding at least the train
    /// threshold is then trained. Skipped while another rebuild runs.
    pub fn maintain(&self) {
        let settings = &self.config.settings;
        {
            let mut state = self.state.write();
            if state.index.is_some() {
                let budget = (state.trained_size as f64 * settings.retrain_ratio).ceil() as usize;
                if state.mutations_since_train > budget {
                    tracing::info!(
                        "Collection {}: index stale after {} mutations, dropping it",
                        self.name(),
                        state.mutations_since_train
                    );
                    state.index = None;
                }
            }
            let eligible = state.index.is_none()
                && state.store.len() >= settings.effective_train_threshold();
            if !(settings.auto_index && eligible) {
                return;
            }
        }

        let Some(_guard) = self.rebuild_lock.try_lock() else {
            return;
        };
        if let Err(e) = self.rebuild_locked(&CancelFlag::new()) {
            tracing::warn!("Collection {}: automatic rebuild failed: {}", self.name(), e);
        }
    }

    /// Copy of every live record in insertion order.
    pub fn records(&self) -> Vec<VectorRecord> {
        self.state.read().store.to_records()
    }

    /// Run `f` against the store under the read guard.
    pub fn with_store<R>(&self, f: impl FnOnce(&VectorStore) -> R) -> R {
        f(&self.state.read().store)
    }

    pub fn stats(&self) -> CollectionStats {
        let state = self.state.read();
        let partition_sizes = state
            .index
            .as_ref()
            .map(IvfIndex::partition_sizes)
            .unwrap_or_default();
        CollectionStats {
            name: self.config.name.clone(),
            dimension: self.config.dimension,
            metric: self.config.settings.metric,
            state: state.state(),
            count: state.store.len(),
            num_partitions: partition_sizes.len(),
            partition_sizes,
            mutations_since_train: state.mutations_since_train,
        }
    }
}
