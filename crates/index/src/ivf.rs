//! IVF posting lists.
//!
//! Every indexed id sits in exactly one posting list, and `partition_of`
//! records which one so removal never has to search the lists.

use crate::cancel::CancelFlag;
use crate::error::{IndexError, IndexResult};
use crate::kmeans::Partitioner;
use rayon::prelude::*;
use sculpin_core::VectorId;
use sculpin_storage::VectorStore;
use std::collections::{BTreeSet, HashMap};

/// Vectors assigned per unit of parallel build work; cancellation is
/// checked once per chunk.
const BUILD_CHUNK: usize = 4096;

/// Trained partitioner plus the posting lists built from it.
#[derive(Debug, Clone)]
pub struct IvfIndex {
    partitioner: Partitioner,
    postings: Vec<BTreeSet<VectorId>>,
    partition_of: HashMap<VectorId, usize>,
}

impl IvfIndex {
    /// An index with empty posting lists.
    pub fn empty(partitioner: Partitioner) -> Self {
        let postings = vec![BTreeSet::new(); partitioner.num_partitions()];
        Self {
            partitioner,
            postings,
            partition_of: HashMap::new(),
        }
    }

    /// Assign every vector in `store` to a partition.
    pub fn build(
        store: &VectorStore,
        partitioner: Partitioner,
        cancel: &CancelFlag,
    ) -> IndexResult<Self> {
        if partitioner.dimension() != store.dimension() {
            return Err(IndexError::DimensionMismatch {
                expected: store.dimension(),
                got: partitioner.dimension(),
            });
        }

        let entries: Vec<(VectorId, &[f32])> = store.scan().collect();
        let assigned: Vec<Vec<(VectorId, usize)>> = entries
            .par_chunks(BUILD_CHUNK)
            .map(|chunk| -> IndexResult<Vec<(VectorId, usize)>> {
                cancel.check()?;
                Ok(chunk
                    .iter()
                    .map(|&(id, vector)| (id, partitioner.assign(vector)))
                    .collect())
            })
            .collect::<IndexResult<Vec<_>>>()?;

        let mut index = Self::empty(partitioner);
        index.partition_of.reserve(entries.len());
        for (id, partition) in assigned.into_iter().flatten() {
            index.postings[partition].insert(id);
            index.partition_of.insert(id, partition);
        }

        tracing::debug!(
            "Built IVF index: {} vectors across {} partitions",
            index.len(),
            index.num_partitions()
        );
        Ok(index)
    }

    /// Add one vector without rebuilding. An id that is already indexed is
    /// moved to the partition its new vector belongs to.
    pub fn incremental_add(&mut self, id: VectorId, vector: &[f32]) -> IndexResult<usize> {
        if vector.len() != self.partitioner.dimension() {
            return Err(IndexError::DimensionMismatch {
                expected: self.partitioner.dimension(),
                got: vector.len(),
            });
        }

        self.remove(id);
        let partition = self.partitioner.assign(vector);
        self.postings[partition].insert(id);
        self.partition_of.insert(id, partition);
        Ok(partition)
    }

    /// Drop `id` from its posting list. Returns the partition it was in.
    pub fn remove(&mut self, id: VectorId) -> Option<usize> {
        let partition = self.partition_of.remove(&id)?;
        self.postings[partition].remove(&id);
        Some(partition)
    }

    pub fn partition_of(&self, id: VectorId) -> Option<usize> {
        self.partition_of.get(&id).copied()
    }

    pub fn posting_list(&self, partition: usize) -> Option<&BTreeSet<VectorId>> {
        self.postings.get(partition)
    }

    pub fn partitioner(&self) -> &Partitioner {
        &self.partitioner
    }

    pub fn num_partitions(&self) -> usize {
        self.postings.len()
    }

    /// Number of indexed ids.
    pub fn len(&self) -> usize {
        self.partition_of.len()
    }

    pub fn is_empty(&self) -> bool {
        self.partition_of.is_empty()
    }

    /// Posting list lengths by partition.
    pub fn partition_sizes(&self) -> Vec<usize> {
        self.postings.iter().map(BTreeSet::len).collect()
    }
}
