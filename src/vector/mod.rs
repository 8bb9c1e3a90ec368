//! Vector primitives for the IVF index.
//!
//! This module owns everything that works on embeddings alone, independent of
//! where they are stored: the record types, the Euclidean distance kernel, the
//! K-means trainer and the bounded heap used for top-K selection.
//!
//! # Architecture
//! Training partitions [`DataRecord`]s with K-means++ seeded Lloyd iterations.
//! Query-time code ranks centroids with [`DistanceScorer`] and keeps the best
//! `K` in a [`BoundedMaxHeap`].

mod clustering;
mod distance;
mod heap;
mod types;

// Re-export core types for public API
pub use clustering::{
    CONVERGENCE_TOLERANCE, ClusteringError, DEFAULT_MAX_ITERATIONS, KMeans, KMeansResult,
};
pub use distance::{
    DistanceScorer, LANES, euclidean, squared_euclidean, squared_euclidean_scalar,
};
pub use heap::BoundedMaxHeap;
pub use types::{
    Centroid, CentroidId, DEFAULT_DIMENSION, DataRecord, LeafId, RecordPointer, Vector,
    VectorDimension, VectorError,
};
