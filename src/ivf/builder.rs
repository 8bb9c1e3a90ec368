//! Two-level training and table materialization.
//!
//! Level 1 splits the dataset into a few coarse partitions; every non-empty
//! partition is then clustered again into leaf clusters. Leaf clusters with no
//! records get no postings table.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rayon::prelude::*;
use tracing::{debug, info, warn};

use crate::config::IndexConfig;
use crate::error::IvfResult;
use crate::ivf::codec::RecordCodec;
use crate::ivf::directory::TableDirectory;
use crate::storage::Transaction;
use crate::vector::{CONVERGENCE_TOLERANCE, Centroid, DataRecord, KMeans, LeafId};

/// Trained level-1 partition with its nested leaf clusters.
#[derive(Debug, Clone)]
pub struct Partition {
    pub centroid: Centroid,
    /// Level-2 centroids, including those of empty leaves.
    pub level2: Vec<Centroid>,
    /// Records of each leaf, parallel to `level2`.
    pub leaves: Vec<Vec<DataRecord>>,
}

/// Result of training, before anything touches storage.
#[derive(Debug, Clone, Default)]
pub struct HierarchicalLayout {
    /// Non-empty level-1 partitions, ordered by level-1 id.
    pub partitions: Vec<Partition>,
}

impl HierarchicalLayout {
    #[must_use]
    pub fn record_count(&self) -> usize {
        self.partitions
            .iter()
            .flat_map(|p| &p.leaves)
            .map(Vec::len)
            .sum()
    }

    pub fn leaves(&self) -> impl Iterator<Item = (LeafId, &[DataRecord])> {
        self.partitions.iter().flat_map(|p| {
            p.level2
                .iter()
                .zip(&p.leaves)
                .map(|(c, records)| (LeafId::new(p.centroid.id, c.id), records.as_slice()))
        })
    }
}

/// Orchestrates both training levels and writes the resulting tables.
#[derive(Debug, Clone)]
pub struct HierarchicalBuilder {
    level1_k: usize,
    level2_k: usize,
    max_iterations: usize,
    tolerance: f64,
    seed: Option<u64>,
    threads: usize,
}

impl HierarchicalBuilder {
    #[must_use]
    pub fn new(level1_k: usize, level2_k: usize, max_iterations: usize) -> Self {
        Self {
            level1_k,
            level2_k,
            max_iterations,
            tolerance: CONVERGENCE_TOLERANCE,
            seed: None,
            threads: 0,
        }
    }

    #[must_use]
    pub fn from_config(config: &IndexConfig) -> Self {
        Self::new(
            config.level1_clusters,
            config.level2_clusters,
            config.max_iterations,
        )
        .with_tolerance(config.convergence_tolerance)
        .with_seed(config.seed)
        .with_threads(config.training_threads)
    }

    #[must_use]
    pub fn with_tolerance(mut self, tolerance: f64) -> Self {
        self.tolerance = tolerance;
        self
    }

    #[must_use]
    pub fn with_seed(mut self, seed: Option<u64>) -> Self {
        self.seed = seed;
        self
    }

    /// Caps the threads used for level-2 training. Zero uses the global pool.
    #[must_use]
    pub fn with_threads(mut self, threads: usize) -> Self {
        self.threads = threads;
        self
    }

    /// Clusters `records` at both levels.
    ///
    /// Level-1 k larger than the dataset fails with `InvalidClusterCount`.
    /// Inside a partition the level-2 k is clamped to the partition size, so
    /// small partitions (down to a single record) still train.
    pub fn train(&self, records: Vec<DataRecord>) -> IvfResult<HierarchicalLayout> {
        let mut rng = match self.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_rng(&mut rand::rng()),
        };

        let total = records.len();
        let level1 = KMeans::new(self.level1_k, self.max_iterations)
            .with_tolerance(self.tolerance)
            .fit_with_rng(records, &mut rng)?;
        debug!(
            records = total,
            k = self.level1_k,
            iterations = level1.iterations,
            cost = level1.cost,
            "level-1 training finished"
        );

        // Seeds are drawn in partition order so a seeded build does not depend
        // on thread scheduling
        let jobs: Vec<(Centroid, Vec<DataRecord>, u64)> = level1
            .centroids
            .into_iter()
            .zip(level1.clusters)
            .filter_map(|(centroid, cluster)| {
                if cluster.is_empty() {
                    debug!(level1 = %centroid.id, "skipping empty level-1 cluster");
                    None
                } else {
                    Some((centroid, cluster))
                }
            })
            .map(|(centroid, cluster)| (centroid, cluster, rng.random::<u64>()))
            .collect();

        let train_partition = |(centroid, cluster, seed): (Centroid, Vec<DataRecord>, u64)|
         -> IvfResult<Partition> {
            let k = self.level2_k.min(cluster.len());
            if k < self.level2_k {
                debug!(
                    level1 = %centroid.id,
                    records = cluster.len(),
                    k,
                    "clamping level-2 cluster count to partition size"
                );
            }
            let result = KMeans::new(k, self.max_iterations)
                .with_tolerance(self.tolerance)
                .fit_with_rng(cluster, &mut StdRng::seed_from_u64(seed))?;
            Ok(Partition {
                centroid,
                level2: result.centroids,
                leaves: result.clusters,
            })
        };

        let partitions: IvfResult<Vec<Partition>> = match self.thread_pool() {
            Some(pool) => pool.install(|| jobs.into_par_iter().map(train_partition).collect()),
            None => jobs.into_par_iter().map(train_partition).collect(),
        };

        let layout = HierarchicalLayout {
            partitions: partitions?,
        };
        info!(
            records = layout.record_count(),
            partitions = layout.partitions.len(),
            "hierarchical training finished"
        );
        Ok(layout)
    }

    fn thread_pool(&self) -> Option<rayon::ThreadPool> {
        if self.threads == 0 {
            return None;
        }
        match rayon::ThreadPoolBuilder::new()
            .num_threads(self.threads)
            .build()
        {
            Ok(pool) => Some(pool),
            Err(e) => {
                warn!("falling back to the global thread pool: {e}");
                None
            }
        }
    }

    /// Writes centroid and postings tables for `layout` and registers them in
    /// `directory`.
    ///
    /// Stops at the first storage error; tables written so far stay in place
    /// and are listed in `directory`, so the caller can drop them.
    pub fn persist(
        &self,
        layout: &HierarchicalLayout,
        directory: &mut TableDirectory,
        codec: &RecordCodec,
        tx: &dyn Transaction,
    ) -> IvfResult<()> {
        tx.format_table(&directory.level1, codec.centroid_schema())?;
        let mut level1_file = tx.open_table(&directory.level1, codec.centroid_schema(), true)?;
        for partition in &layout.partitions {
            codec.write_centroid(level1_file.as_mut(), &partition.centroid)?;
        }
        level1_file.close();

        for partition in &layout.partitions {
            let level1 = partition.centroid.id;
            let level2_name = directory.add_partition(level1);
            tx.format_table(&level2_name, codec.centroid_schema())?;
            let mut level2_file = tx.open_table(&level2_name, codec.centroid_schema(), true)?;
            for centroid in &partition.level2 {
                codec.write_centroid(level2_file.as_mut(), centroid)?;
            }
            level2_file.close();

            for (centroid, records) in partition.level2.iter().zip(&partition.leaves) {
                let leaf = LeafId::new(level1, centroid.id);
                let table = directory.add_leaf(leaf, records.len());
                if records.is_empty() {
                    debug!(%leaf, "skipping empty leaf cluster");
                    continue;
                }
                tx.format_table(&table, codec.postings_schema())?;
                let mut postings = tx.open_table(&table, codec.postings_schema(), true)?;
                for record in records {
                    codec.write_posting(postings.as_mut(), centroid.id, record)?;
                }
                postings.close();
            }
        }

        debug!(
            generation = directory.generation,
            leaves = directory.populated_leaves(),
            rows = directory.record_count,
            "tables written"
        );
        Ok(())
    }

    /// Trains and persists in one go.
    pub fn build(
        &self,
        records: Vec<DataRecord>,
        directory: &mut TableDirectory,
        codec: &RecordCodec,
        tx: &dyn Transaction,
    ) -> IvfResult<HierarchicalLayout> {
        let layout = self.train(records)?;
        self.persist(&layout, directory, codec, tx)?;
        Ok(layout)
    }
}
