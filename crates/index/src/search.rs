//! IVF probe search and exact brute-force search.
//!
//! Both paths rank candidates by `(distance, id)` with a total order on
//! distances, so probing every partition yields exactly the brute-force
//! result, ties included.

use crate::error::{IndexError, IndexResult};
use crate::ivf::IvfIndex;
use rayon::prelude::*;
use sculpin_core::{distance, Metric, VectorId};
use sculpin_storage::VectorStore;
use serde::Serialize;
use std::cmp::Ordering;
use std::collections::BinaryHeap;

/// One ranked hit.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct SearchResult {
    pub id: VectorId,
    pub distance: f32,
}

impl SearchResult {
    pub fn new(id: VectorId, distance: f32) -> Self {
        Self { id, distance }
    }
}

/// Max-heap entry: the worst kept candidate sits on top.
#[derive(Debug, Clone, Copy)]
struct HeapEntry(SearchResult);

impl PartialEq for HeapEntry {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for HeapEntry {}

impl PartialOrd for HeapEntry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for HeapEntry {
    fn cmp(&self, other: &Self) -> Ordering {
        self.0
            .distance
            .total_cmp(&other.0.distance)
            .then(self.0.id.cmp(&other.0.id))
    }
}

/// Bounded collector for the k best candidates.
struct TopK {
    k: usize,
    heap: BinaryHeap<HeapEntry>,
}

impl TopK {
    fn new(k: usize) -> Self {
        Self {
            k,
            heap: BinaryHeap::with_capacity(k + 1),
        }
    }

    fn push(&mut self, result: SearchResult) {
        let entry = HeapEntry(result);
        if self.heap.len() < self.k {
            self.heap.push(entry);
        } else if let Some(worst) = self.heap.peek() {
            if entry < *worst {
                self.heap.pop();
                self.heap.push(entry);
            }
        }
    }

    fn merge(mut self, other: TopK) -> TopK {
        for entry in other.heap {
            self.push(entry.0);
        }
        self
    }

    fn into_sorted(self) -> Vec<SearchResult> {
        self.heap.into_sorted_vec().into_iter().map(|e| e.0).collect()
    }
}

fn check_dimension(store: &VectorStore, query: &[f32]) -> IndexResult<()> {
    if query.len() != store.dimension() {
        return Err(IndexError::DimensionMismatch {
            expected: store.dimension(),
            got: query.len(),
        });
    }
    Ok(())
}

/// Probe the `num_probes` partitions nearest to `query` and return the `k`
/// closest vectors among them.
///
/// `num_probes` is clamped to `[1, num_partitions]`. Fails with
/// `NotIndexed` when there is no index to probe.
pub fn search_index(
    index: Option<&IvfIndex>,
    store: &VectorStore,
    query: &[f32],
    k: usize,
    num_probes: usize,
    metric: Metric,
) -> IndexResult<Vec<SearchResult>> {
    check_dimension(store, query)?;
    let index = index.ok_or(IndexError::NotIndexed)?;
    if k == 0 || store.is_empty() {
        return Ok(Vec::new());
    }

    let num_probes = num_probes.clamp(1, index.num_partitions());
    let probes = index.partitioner().nearest_partitions(query, num_probes);

    let top = probes
        .par_iter()
        .map(|&partition| {
            let mut local = TopK::new(k);
            if let Some(list) = index.posting_list(partition) {
                for &id in list {
                    if let Ok(vector) = store.get(id) {
                        local.push(SearchResult::new(id, distance::distance(query, vector, metric)));
                    }
                }
            }
            local
        })
        .reduce(|| TopK::new(k), TopK::merge);

    Ok(top.into_sorted())
}

/// Exact search over every vector in the store.
pub fn brute_force_search(
    store: &VectorStore,
    query: &[f32],
    k: usize,
    metric: Metric,
) -> IndexResult<Vec<SearchResult>> {
    check_dimension(store, query)?;
    if k == 0 {
        return Ok(Vec::new());
    }

    let mut top = TopK::new(k);
    for (id, vector) in store.scan() {
        top.push(SearchResult::new(id, distance::distance(query, vector, metric)));
    }
    Ok(top.into_sorted())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cancel::CancelFlag;
    use crate::kmeans::{KMeansConfig, Partitioner};
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};

    fn random_store(n: u64, dim: usize, seed: u64) -> VectorStore {
        let mut rng = StdRng::seed_from_u64(seed);
        let mut store = VectorStore::new(dim);
        for id in 0..n {
            let v: Vec<f32> = (0..dim).map(|_| rng.gen_range(-1.0..1.0)).collect();
            store.put(VectorId(id), v, None, false).unwrap();
        }
        store
    }

    fn trained_index(store: &VectorStore, partitions: usize) -> IvfIndex {
        let samples: Vec<Vec<f32>> = store.scan().map(|(_, v)| v.to_vec()).collect();
        let config = KMeansConfig {
            num_partitions: partitions,
            seed: Some(9),
            ..Default::default()
        };
        let partitioner = Partitioner::train(&samples, &config, &CancelFlag::new()).unwrap();
        IvfIndex::build(store, partitioner, &CancelFlag::new()).unwrap()
    }

    #[test]
    fn test_exhaustive_probe_matches_brute_force() {
        let store = random_store(300, 8, 1);
        let index = trained_index(&store, 10);
        let mut rng = StdRng::seed_from_u64(2);

        for metric in [Metric::L2, Metric::Cosine] {
            for k in [1, 7, 50, 300] {
                let query: Vec<f32> = (0..8).map(|_| rng.gen_range(-1.0..1.0)).collect();
                let ivf = search_index(Some(&index), &store, &query, k, 10, metric).unwrap();
                let exact = brute_force_search(&store, &query, k, metric).unwrap();
                assert_eq!(ivf, exact, "metric {} k {}", metric, k);
            }
        }
    }

    #[test]
    fn test_results_sorted_and_bounded() {
        let store = random_store(100, 4, 3);
        let index = trained_index(&store, 8);

        let results = search_index(Some(&index), &store, &[0.1, 0.2, 0.3, 0.4], 10, 2, Metric::L2).unwrap();
        assert!(results.len() <= 10);
        assert!(results.windows(2).all(|w| w[0].distance <= w[1].distance));
    }

    #[test]
    fn test_ties_broken_by_lowest_id() {
        let mut store = VectorStore::new(1);
        for id in [9, 4, 6] {
            store.put(VectorId(id), vec![1.0], None, false).unwrap();
        }
        let results = brute_force_search(&store, &[0.0], 2, Metric::L2).unwrap();
        assert_eq!(results.iter().map(|r| r.id).collect::<Vec<_>>(), vec![VectorId(4), VectorId(6)]);
    }

    #[test]
    fn test_four_dimensional_example() {
        let mut store = VectorStore::new(4);
        store.put(VectorId(1), vec![0.0, 0.0, 0.0, 0.0], None, false).unwrap();
        store.put(VectorId(2), vec![10.0, 10.0, 10.0, 10.0], None, false).unwrap();
        store.put(VectorId(3), vec![10.0, 10.0, 10.0, 0.0], None, false).unwrap();
        let index = trained_index(&store, 2);
        let query = [10.0, 10.0, 9.0, 0.0];

        let all = search_index(Some(&index), &store, &query, 1, 2, Metric::L2).unwrap();
        assert_eq!(all[0].id, VectorId(3));

        let probed = index.partitioner().nearest_partitions(&query, 1)[0];
        let one = search_index(Some(&index), &store, &query, 1, 1, Metric::L2).unwrap();
        if index.partition_of(VectorId(3)) == Some(probed) {
            assert_eq!(one[0].id, VectorId(3));
        }
    }

    #[test]
    fn test_not_indexed_and_dimension_errors() {
        let store = random_store(5, 3, 4);
        assert_eq!(
            search_index(None, &store, &[0.0, 0.0, 0.0], 1, 1, Metric::L2),
            Err(IndexError::NotIndexed)
        );
        assert_eq!(
            brute_force_search(&store, &[0.0], 1, Metric::L2),
            Err(IndexError::DimensionMismatch { expected: 3, got: 1 })
        );
    }

    #[test]
    fn test_zero_k_and_probe_clamping() {
        let store = random_store(50, 2, 5);
        let index = trained_index(&store, 4);
        assert!(search_index(Some(&index), &store, &[0.0, 0.0], 0, 4, Metric::L2)
            .unwrap()
            .is_empty());
        // Zero probes still scans one partition; oversized probes scan all.
        assert_eq!(
            search_index(Some(&index), &store, &[0.0, 0.0], 3, 0, Metric::L2).unwrap(),
            search_index(Some(&index), &store, &[0.0, 0.0], 3, 1, Metric::L2).unwrap()
        );
        let wide = search_index(Some(&index), &store, &[0.0, 0.0], 5, 99, Metric::L2).unwrap();
        assert_eq!(wide, brute_force_search(&store, &[0.0, 0.0], 5, Metric::L2).unwrap());
    }
}
