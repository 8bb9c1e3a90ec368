//! K-means clustering for IVF partitioning.
//!
//! Trains `k` centroids over a set of [`DataRecord`]s and partitions the
//! records among them. Records are moved into their partitions, never copied.
//!
//! # Algorithm Details
//! - Distance metric: Euclidean (ranked by squared distance)
//! - Initialization: K-means++ (roulette wheel over squared distances)
//! - Refinement: Lloyd iterations, ties go to the lowest centroid index
//! - Convergence: total assignment cost changes by less than the tolerance
//!
//! The returned partition is always the assignment against the returned
//! centroids, so every record's own centroid is its nearest one.
//!
//! # Performance Characteristics
//! - O(n * k * d * iterations) time complexity
//! - O(k * d) space for centroids
//! - The assignment step runs on the rayon pool

use rand::Rng;
use rayon::prelude::*;
use thiserror::Error;
use tracing::debug;

use crate::vector::distance::squared_unchecked;
use crate::vector::types::{Centroid, CentroidId, DataRecord, Vector, VectorError};

/// Default iteration budget for one training run.
pub const DEFAULT_MAX_ITERATIONS: usize = 20;

/// Absolute change in total assignment cost that counts as converged.
pub const CONVERGENCE_TOLERANCE: f64 = 1e-6;

/// Below this total weight all points coincide with a chosen centroid.
const EPSILON: f64 = 1e-12;

/// Result of one K-means run.
#[derive(Debug, Clone)]
pub struct KMeansResult {
    /// One centroid per cluster; `centroids[i].id == i`.
    pub centroids: Vec<Centroid>,

    /// Records of each cluster, parallel to `centroids`. May contain empty
    /// clusters.
    pub clusters: Vec<Vec<DataRecord>>,

    /// Lloyd iterations performed.
    pub iterations: usize,

    /// Sum of squared distances between records and their centroid.
    pub cost: f64,
}

impl KMeansResult {
    #[must_use]
    pub fn cluster_sizes(&self) -> Vec<usize> {
        self.clusters.iter().map(Vec::len).collect()
    }

    #[must_use]
    pub fn record_count(&self) -> usize {
        self.clusters.iter().map(Vec::len).sum()
    }

    /// Iterates `(centroid, records)` pairs, including empty clusters.
    pub fn iter(&self) -> impl Iterator<Item = (&Centroid, &[DataRecord])> {
        self.centroids
            .iter()
            .zip(self.clusters.iter().map(Vec::as_slice))
    }
}

/// Errors that can occur during clustering operations.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ClusteringError {
    #[error(
        "Empty dataset provided for clustering\nSuggestion: Insert records before building the index"
    )]
    EmptyDataset,

    #[error(
        "Invalid cluster count: {k} for {available} records\nSuggestion: Use k between 1 and the number of records"
    )]
    InvalidClusterCount { k: usize, available: usize },

    #[error("Vector operation error: {0}")]
    Vector(#[from] VectorError),
}

/// K-means trainer configuration.
#[derive(Debug, Clone, Copy)]
pub struct KMeans {
    k: usize,
    max_iterations: usize,
    tolerance: f64,
}

impl KMeans {
    #[must_use]
    pub fn new(k: usize, max_iterations: usize) -> Self {
        Self {
            k,
            max_iterations,
            tolerance: CONVERGENCE_TOLERANCE,
        }
    }

    #[must_use]
    pub fn with_tolerance(mut self, tolerance: f64) -> Self {
        self.tolerance = tolerance;
        self
    }

    #[must_use]
    pub fn k(&self) -> usize {
        self.k
    }

    /// Trains with the thread-local random source.
    pub fn fit(&self, data: Vec<DataRecord>) -> Result<KMeansResult, ClusteringError> {
        self.fit_with_rng(data, &mut rand::rng())
    }

    /// Trains with an explicit random source; a seeded source makes the run
    /// reproducible.
    pub fn fit_with_rng<R: Rng + ?Sized>(
        &self,
        data: Vec<DataRecord>,
        rng: &mut R,
    ) -> Result<KMeansResult, ClusteringError> {
        if data.is_empty() {
            return Err(ClusteringError::EmptyDataset);
        }
        if self.k == 0 || self.k > data.len() {
            return Err(ClusteringError::InvalidClusterCount {
                k: self.k,
                available: data.len(),
            });
        }

        let dimension = data[0].vector.dimension();
        if let Some(bad) = data.iter().find(|r| r.vector.dimension() != dimension) {
            return Err(VectorError::DimensionMismatch {
                expected: dimension,
                actual: bad.vector.dimension(),
            }
            .into());
        }

        let mut centroids = initialize_centroids_kmeans_plus_plus(&data, self.k, rng);
        let mut previous_cost: Option<f64> = None;
        let mut iterations = 0;
        let max_iterations = self.max_iterations.max(1);

        let (assignments, cost) = loop {
            iterations += 1;
            let (assignments, cost) = assign_all(&data, &centroids);

            let converged =
                previous_cost.is_some_and(|prev| (prev - cost).abs() < self.tolerance);
            if converged || iterations >= max_iterations {
                break (assignments, cost);
            }

            debug!(iteration = iterations, cost, k = self.k, "k-means iteration");
            update_centroids(&data, &assignments, &mut centroids);
            previous_cost = Some(cost);
        };

        let mut clusters: Vec<Vec<DataRecord>> = vec![Vec::new(); self.k];
        for (record, cluster) in data.into_iter().zip(assignments) {
            clusters[cluster].push(record);
        }

        debug!(
            k = self.k,
            iterations,
            cost,
            empty = clusters.iter().filter(|c| c.is_empty()).count(),
            "k-means finished"
        );

        Ok(KMeansResult {
            centroids: centroids
                .into_iter()
                .enumerate()
                .map(|(i, v)| Centroid::new(CentroidId::new(i as u32), Vector::new(v)))
                .collect(),
            clusters,
            iterations,
            cost,
        })
    }
}

/// Index of the nearest centroid and its squared distance.
///
/// Ties resolve to the lowest index. All vectors must share one dimension.
#[must_use]
pub(crate) fn nearest_centroid(vector: &[f32], centroids: &[Vec<f32>]) -> (usize, f64) {
    let mut best = 0;
    let mut best_distance = f64::INFINITY;
    for (i, centroid) in centroids.iter().enumerate() {
        let distance = squared_unchecked(vector, centroid);
        if distance < best_distance {
            best_distance = distance;
            best = i;
        }
    }
    (best, best_distance)
}

fn assign_all(data: &[DataRecord], centroids: &[Vec<f32>]) -> (Vec<usize>, f64) {
    let scored: Vec<(usize, f64)> = data
        .par_iter()
        .map(|record| nearest_centroid(record.vector.as_slice(), centroids))
        .collect();
    let cost = scored.iter().map(|(_, d)| d).sum();
    (scored.into_iter().map(|(i, _)| i).collect(), cost)
}

/// Recomputes each centroid as the mean of its records. Empty clusters keep
/// their previous centroid.
fn update_centroids(data: &[DataRecord], assignments: &[usize], centroids: &mut [Vec<f32>]) {
    let dimension = data[0].vector.dimension();
    let mut sums = vec![vec![0.0f64; dimension]; centroids.len()];
    let mut sizes = vec![0usize; centroids.len()];

    for (record, &cluster) in data.iter().zip(assignments) {
        for (sum, &value) in sums[cluster].iter_mut().zip(record.vector.as_slice()) {
            *sum += f64::from(value);
        }
        sizes[cluster] += 1;
    }

    for ((centroid, sum), &size) in centroids.iter_mut().zip(sums).zip(&sizes) {
        if size == 0 {
            continue;
        }
        for (value, total) in centroid.iter_mut().zip(sum) {
            *value = (total / size as f64) as f32;
        }
    }
}

/// Picks initial centroids with K-means++.
///
/// The first centroid is uniform; each following one is drawn with
/// probability proportional to the squared distance to the nearest centroid
/// chosen so far. When every remaining point coincides with a chosen centroid
/// the rest are drawn uniformly from unchosen points, so exactly `k` centroids
/// come back (some clusters will then stay empty).
fn initialize_centroids_kmeans_plus_plus<R: Rng + ?Sized>(
    data: &[DataRecord],
    k: usize,
    rng: &mut R,
) -> Vec<Vec<f32>> {
    let mut chosen = vec![false; data.len()];
    let mut centroids: Vec<Vec<f32>> = Vec::with_capacity(k);

    let first = rng.random_range(0..data.len());
    chosen[first] = true;
    centroids.push(data[first].vector.as_slice().to_vec());

    // Squared distance of each point to its nearest chosen centroid.
    let mut nearest: Vec<f64> = data
        .iter()
        .map(|r| squared_unchecked(r.vector.as_slice(), &centroids[0]))
        .collect();

    while centroids.len() < k {
        let total: f64 = nearest.iter().sum();

        let next = if total < EPSILON {
            let remaining: Vec<usize> = (0..data.len()).filter(|&i| !chosen[i]).collect();
            remaining[rng.random_range(0..remaining.len())]
        } else {
            let target = rng.random::<f64>() * total;
            let mut cumulative = 0.0;
            let mut pick = None;
            for (i, &weight) in nearest.iter().enumerate() {
                if weight <= 0.0 {
                    continue;
                }
                cumulative += weight;
                pick = Some(i);
                if cumulative >= target {
                    break;
                }
            }
            // total > 0 guarantees at least one positive weight
            pick.unwrap_or(data.len() - 1)
        };

        chosen[next] = true;
        let centroid = data[next].vector.as_slice().to_vec();
        for (d, record) in nearest.iter_mut().zip(data) {
            let candidate = squared_unchecked(record.vector.as_slice(), &centroid);
            if candidate < *d {
                *d = candidate;
            }
        }
        centroids.push(centroid);
    }

    centroids
}
