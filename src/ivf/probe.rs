//! Flat top-M probe across every leaf centroid.
//!
//! Unlike [`IndexScanner`](crate::ivf::IndexScanner), which stays inside the
//! nearest level-1 partition, the flat probe ranks all level-2 centroids of
//! all partitions, scans the `M` nearest leaves fully and keeps the nearest
//! row of each. Raising `M` trades latency for recall.

use serde::Serialize;
use tracing::debug;

use crate::error::{IvfError, IvfResult};
use crate::ivf::codec::RecordCodec;
use crate::ivf::directory::TableDirectory;
use crate::storage::Transaction;
use crate::vector::{BoundedMaxHeap, DistanceScorer, LeafId, RecordPointer, Vector};

/// Nearest row found in one leaf.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Neighbor {
    pub leaf: LeafId,
    pub payload: RecordPointer,
    /// Euclidean distance to the query.
    pub distance: f64,
}

#[derive(Debug)]
pub struct FlatProbe<'a> {
    directory: &'a TableDirectory,
    codec: &'a RecordCodec,
    width: usize,
}

impl<'a> FlatProbe<'a> {
    #[must_use]
    pub fn new(directory: &'a TableDirectory, codec: &'a RecordCodec, width: usize) -> Self {
        Self {
            directory,
            codec,
            width,
        }
    }

    /// The `M` nearest leaves over all partitions, nearest first.
    pub fn nearest_leaves(&self, query: &Vector, tx: &dyn Transaction) -> IvfResult<Vec<LeafId>> {
        self.codec.dimension().validate_vector(query.as_slice())?;
        let scorer = DistanceScorer::new(query.clone());
        let mut heap = BoundedMaxHeap::new(self.width);

        for (&level1, table) in &self.directory.level2 {
            let mut file = tx.open_table(table, self.codec.centroid_schema(), false)?;
            file.before_first()?;
            while file.next()? {
                let centroid = self.codec.read_centroid(file.as_ref())?;
                let distance = scorer.squared_distance(centroid.vector.as_slice())?;
                heap.push(distance, LeafId::new(level1, centroid.id));
            }
            file.close();
        }

        Ok(heap.into_sorted().into_iter().map(|(_, leaf)| leaf).collect())
    }

    /// Scans the `M` nearest leaves and returns the nearest row of each leaf
    /// that has rows, sorted by distance. An empty result is valid.
    pub fn nearest_per_leaf(
        &self,
        query: &Vector,
        tx: &dyn Transaction,
    ) -> IvfResult<Vec<Neighbor>> {
        let leaves = self.nearest_leaves(query, tx)?;
        let scorer = DistanceScorer::new(query.clone());
        let mut neighbors = Vec::with_capacity(leaves.len());

        for leaf in leaves {
            let Some(table) = self.directory.leaf_table(leaf) else {
                continue;
            };
            if !tx.table_exists(table)? {
                continue;
            }

            let mut file = tx.open_table(table, self.codec.postings_schema(), false)?;
            let mut best: Option<(f64, RecordPointer)> = None;
            file.before_first()?;
            while file.next()? {
                let vector = self.codec.read_vector(file.as_ref())?;
                let distance = scorer.squared_distance(vector.as_slice())?;
                if best.is_none_or(|(d, _)| distance < d) {
                    best = Some((distance, self.codec.read_payload(file.as_ref())?));
                }
            }
            file.close();

            if let Some((squared, payload)) = best {
                neighbors.push(Neighbor {
                    leaf,
                    payload,
                    distance: squared.sqrt(),
                });
            }
        }

        neighbors.sort_by(|a, b| a.distance.total_cmp(&b.distance));
        debug!(probed = self.width, found = neighbors.len(), "flat probe finished");
        Ok(neighbors)
    }

    /// Aggregation-path rule: no match across all probed leaves is an error.
    pub fn require_matches(&self, neighbors: Vec<Neighbor>) -> IvfResult<Vec<Neighbor>> {
        if neighbors.is_empty() {
            return Err(IvfError::NoMatches { probed: self.width });
        }
        Ok(neighbors)
    }
}
