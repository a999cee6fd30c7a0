//! Lloyd's k-means partitioner.

use crate::cancel::CancelFlag;
use crate::error::{IndexError, IndexResult};
use rand::prelude::*;
use rayon::prelude::*;
use sculpin_core::distance::l2_distance_squared;
use sculpin_core::CollectionSettings;

/// Configuration for k-means training.
#[derive(Debug, Clone)]
pub struct KMeansConfig {
    /// Number of partitions (k).
    pub num_partitions: usize,
    /// Maximum Lloyd iterations.
    pub max_iterations: usize,
    /// Stop once no centroid moves more than this (squared L2).
    pub convergence_threshold: f32,
    /// Random seed for reproducibility.
    pub seed: Option<u64>,
}

impl Default for KMeansConfig {
    fn default() -> Self {
        Self {
            num_partitions: 16,
            max_iterations: 25,
            convergence_threshold: 1e-4,
            seed: None,
        }
    }
}

impl From<&CollectionSettings> for KMeansConfig {
    fn from(settings: &CollectionSettings) -> Self {
        Self {
            num_partitions: settings.num_partitions,
            max_iterations: settings.max_iterations,
            convergence_threshold: settings.convergence_threshold,
            seed: settings.seed,
        }
    }
}

/// Trained centroids that map vectors to partitions.
#[derive(Debug, Clone)]
pub struct Partitioner {
    centroids: Vec<Vec<f32>>,
    dimension: usize,
    iterations: usize,
    converged: bool,
}

/// Index of the nearest centroid; ties go to the lowest index.
#[inline]
fn nearest_centroid(centroids: &[Vec<f32>], v: &[f32]) -> usize {
    let mut best_idx = 0;
    let mut best_dist = f32::INFINITY;
    for (i, c) in centroids.iter().enumerate() {
        let dist = l2_distance_squared(v, c);
        if dist < best_dist {
            best_dist = dist;
            best_idx = i;
        }
    }
    best_idx
}

impl Partitioner {
    /// Train `config.num_partitions` centroids on `samples`.
    ///
    /// Centroids start as a random sample (without replacement) of the
    /// input. Each iteration assigns samples to their nearest centroid and
    /// moves every centroid to the mean of its members; a centroid with no
    /// members stays where it was.
    pub fn train(
        samples: &[Vec<f32>],
        config: &KMeansConfig,
        cancel: &CancelFlag,
    ) -> IndexResult<Self> {
        let k = config.num_partitions;
        if k == 0 {
            return Err(IndexError::InvalidConfig("num_partitions must be > 0".into()));
        }
        if samples.len() < k {
            return Err(IndexError::InsufficientData {
                samples: samples.len(),
                partitions: k,
            });
        }

        let dim = samples[0].len();
        if let Some(bad) = samples.iter().find(|s| s.len() != dim) {
            return Err(IndexError::DimensionMismatch {
                expected: dim,
                got: bad.len(),
            });
        }

        let mut rng = match config.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };

        let mut centroids: Vec<Vec<f32>> = rand::seq::index::sample(&mut rng, samples.len(), k)
            .into_iter()
            .map(|i| samples[i].clone())
            .collect();

        let mut iterations = 0;
        let mut converged = false;

        while iterations < config.max_iterations {
            cancel.check()?;
            iterations += 1;

            let assignments: Vec<usize> = samples
                .par_iter()
                .map(|v| nearest_centroid(&centroids, v))
                .collect();

            let updated = recompute_centroids(samples, &assignments, &centroids);
            let movement = centroids
                .iter()
                .zip(&updated)
                .map(|(old, new)| l2_distance_squared(old, new))
                .fold(0.0f32, f32::max);
            centroids = updated;

            tracing::debug!(
                "K-means iteration {}: max centroid movement {:.6}",
                iterations,
                movement
            );

            if movement <= config.convergence_threshold {
                converged = true;
                break;
            }
        }

        tracing::info!(
            "Trained {} partitions on {} samples in {} iterations (converged: {})",
            k,
            samples.len(),
            iterations,
            converged
        );

        Ok(Self {
            centroids,
            dimension: dim,
            iterations,
            converged,
        })
    }

    /// Wrap previously trained centroids.
    pub fn from_centroids(centroids: Vec<Vec<f32>>) -> IndexResult<Self> {
        let Some(first) = centroids.first() else {
            return Err(IndexError::InvalidConfig("at least one centroid is required".into()));
        };
        let dim = first.len();
        if let Some(bad) = centroids.iter().find(|c| c.len() != dim) {
            return Err(IndexError::DimensionMismatch {
                expected: dim,
                got: bad.len(),
            });
        }
        Ok(Self {
            centroids,
            dimension: dim,
            iterations: 0,
            converged: true,
        })
    }

    /// Partition of the nearest centroid to `vector`.
    pub fn assign(&self, vector: &[f32]) -> usize {
        debug_assert_eq!(vector.len(), self.dimension);
        nearest_centroid(&self.centroids, vector)
    }

    /// The `n` partitions nearest to `query`, nearest first. Equal
    /// distances are ordered by partition index.
    pub fn nearest_partitions(&self, query: &[f32], n: usize) -> Vec<usize> {
        let mut ranked: Vec<(f32, usize)> = self
            .centroids
            .iter()
            .enumerate()
            .map(|(i, c)| (l2_distance_squared(query, c), i))
            .collect();
        ranked.sort_by(|a, b| a.0.total_cmp(&b.0).then(a.1.cmp(&b.1)));
        ranked.into_iter().take(n).map(|(_, i)| i).collect()
    }

    pub fn centroids(&self) -> &[Vec<f32>] {
        &self.centroids
    }

    pub fn num_partitions(&self) -> usize {
        self.centroids.len()
    }

    pub fn dimension(&self) -> usize {
        self.dimension
    }

    pub fn iterations(&self) -> usize {
        self.iterations
    }

    pub fn converged(&self) -> bool {
        self.converged
    }
}

/// Mean of each partition's members; empty partitions keep `previous`.
fn recompute_centroids(
    samples: &[Vec<f32>],
    assignments: &[usize],
    previous: &[Vec<f32>],
) -> Vec<Vec<f32>> {
    let dim = previous.first().map_or(0, Vec::len);
    let mut sums = vec![vec![0.0f64; dim]; previous.len()];
    let mut counts = vec![0usize; previous.len()];

    for (sample, &p) in samples.iter().zip(assignments) {
        counts[p] += 1;
        for (acc, &x) in sums[p].iter_mut().zip(sample) {
            *acc += x as f64;
        }
    }

    sums.into_iter()
        .zip(counts)
        .zip(previous)
        .map(|((sum, count), old)| {
            if count == 0 {
                old.clone()
            } else {
                sum.into_iter().map(|s| (s / count as f64) as f32).collect()
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn make_clustered_data(centers: &[Vec<f32>], per_cluster: usize, noise: f32) -> Vec<Vec<f32>> {
        let mut rng = StdRng::seed_from_u64(42);
        centers
            .iter()
            .flat_map(|center| {
                (0..per_cluster)
                    .map(|_| center.iter().map(|&c| c + rng.gen_range(-noise..noise)).collect())
                    .collect::<Vec<Vec<f32>>>()
            })
            .collect()
    }

    fn seeded(k: usize) -> KMeansConfig {
        KMeansConfig {
            num_partitions: k,
            max_iterations: 50,
            convergence_threshold: 1e-6,
            seed: Some(123),
        }
    }

    #[test]
    fn test_recovers_separated_clusters() {
        let centers = vec![vec![0.0, 0.0], vec![20.0, 20.0]];
        let samples = make_clustered_data(&centers, 100, 0.5);

        let partitioner = Partitioner::train(&samples, &seeded(2), &CancelFlag::new()).unwrap();

        assert_eq!(partitioner.num_partitions(), 2);
        assert!(partitioner.converged());
        for center in &centers {
            let closest = partitioner
                .centroids()
                .iter()
                .map(|c| l2_distance_squared(c, center))
                .fold(f32::INFINITY, f32::min);
            assert!(closest < 1.0, "no centroid near {:?}", center);
        }
    }

    #[test]
    fn test_insufficient_data() {
        let samples = vec![vec![0.0], vec![1.0]];
        let err = Partitioner::train(&samples, &seeded(3), &CancelFlag::new()).unwrap_err();
        assert_eq!(
            err,
            IndexError::InsufficientData {
                samples: 2,
                partitions: 3
            }
        );
    }

    #[test]
    fn test_mixed_dimensions_rejected() {
        let samples = vec![vec![0.0, 1.0], vec![1.0]];
        let err = Partitioner::train(&samples, &seeded(1), &CancelFlag::new()).unwrap_err();
        assert!(matches!(err, IndexError::DimensionMismatch { expected: 2, got: 1 }));
    }

    #[test]
    fn test_same_seed_same_centroids() {
        let samples = make_clustered_data(&[vec![0.0, 0.0, 0.0], vec![5.0, 5.0, 5.0]], 40, 2.0);
        let a = Partitioner::train(&samples, &seeded(4), &CancelFlag::new()).unwrap();
        let b = Partitioner::train(&samples, &seeded(4), &CancelFlag::new()).unwrap();
        assert_eq!(a.centroids(), b.centroids());
    }

    #[test]
    fn test_assign_is_stable() {
        let samples = make_clustered_data(&[vec![0.0; 4], vec![3.0; 4]], 50, 1.5);
        let partitioner = Partitioner::train(&samples, &seeded(5), &CancelFlag::new()).unwrap();

        let first: Vec<usize> = samples.iter().map(|s| partitioner.assign(s)).collect();
        let second: Vec<usize> = samples.iter().map(|s| partitioner.assign(s)).collect();
        assert_eq!(first, second);
    }

    #[test]
    fn test_ties_go_to_lowest_partition() {
        let partitioner =
            Partitioner::from_centroids(vec![vec![1.0, 0.0], vec![-1.0, 0.0], vec![1.0, 0.0]])
                .unwrap();
        // Equidistant from all three centroids.
        assert_eq!(partitioner.assign(&[0.0, 0.0]), 0);
        assert_eq!(partitioner.nearest_partitions(&[0.0, 0.0], 3), vec![0, 1, 2]);
        assert_eq!(partitioner.nearest_partitions(&[2.0, 0.0], 2), vec![0, 2]);
    }

    #[test]
    fn test_empty_partition_keeps_centroid() {
        let previous = vec![vec![0.0, 0.0], vec![100.0, 100.0]];
        let samples = vec![vec![1.0, 1.0], vec![3.0, 3.0]];
        let updated = recompute_centroids(&samples, &[0, 0], &previous);
        assert_eq!(updated[0], vec![2.0, 2.0]);
        assert_eq!(updated[1], vec![100.0, 100.0]);
    }

    #[test]
    fn test_duplicate_points_converge() {
        let samples: Vec<Vec<f32>> = (0..20).map(|_| vec![1.0, 2.0, 3.0]).collect();
        let partitioner = Partitioner::train(&samples, &seeded(2), &CancelFlag::new()).unwrap();
        assert!(partitioner.converged());
        assert!(samples.iter().all(|s| partitioner.assign(s) == 0));
    }

    #[test]
    fn test_cancelled_training() {
        let samples = make_clustered_data(&[vec![0.0, 0.0]], 10, 1.0);
        let cancel = CancelFlag::new();
        cancel.cancel();
        let err = Partitioner::train(&samples, &seeded(2), &cancel).unwrap_err();
        assert_eq!(err, IndexError::Cancelled);
    }
}
