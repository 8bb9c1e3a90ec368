//! The index object: staging buffer, build, routing inserts and queries.

use std::sync::Arc;

use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::config::IndexConfig;
use crate::error::{IvfError, IvfResult};
use crate::ivf::builder::HierarchicalBuilder;
use crate::ivf::codec::RecordCodec;
use crate::ivf::directory::TableDirectory;
use crate::ivf::preload::{MemoryPreloader, PreloadReport};
use crate::ivf::probe::{FlatProbe, Neighbor};
use crate::ivf::scan::{IndexScanner, ScanMode, SearchRange, nearest_level1, nearest_level2};
use crate::storage::{StorageError, Transaction};
use crate::vector::{BoundedMaxHeap, DataRecord, DistanceScorer, LeafId, Vector, VectorDimension};

/// Definition of an index: its name, the column it covers and its knobs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndexInfo {
    pub name: String,
    pub table: String,
    pub field: String,
    pub config: IndexConfig,
}

impl IndexInfo {
    #[must_use]
    pub fn new(name: &str, table: &str, field: &str, config: IndexConfig) -> Self {
        Self {
            name: name.to_string(),
            table: table.to_string(),
            field: field.to_string(),
            config,
        }
    }
}

/// A hierarchical IVF index.
///
/// Records inserted before the first build wait in an index-owned staging
/// buffer. A build clusters them, writes a new table generation and swaps it
/// in; from then on inserts go straight to their nearest leaf.
#[derive(Debug)]
pub struct IvfIndex {
    info: IndexInfo,
    codec: RecordCodec,
    staging: Mutex<Vec<DataRecord>>,
    directory: RwLock<Option<Arc<TableDirectory>>>,
    /// Generations up to this one belong to an index this one replaces.
    generation_floor: u64,
}

/// A generation that has just been swapped in, together with the one it
/// superseded. The superseded tables stay on disk until [`retire`] runs.
///
/// [`retire`]: GenerationSwap::retire
#[derive(Debug)]
#[must_use]
pub struct GenerationSwap {
    pub current: Arc<TableDirectory>,
    pub superseded: Option<Arc<TableDirectory>>,
}

impl GenerationSwap {
    /// Drops the superseded generation's tables.
    pub fn retire(self, tx: &dyn Transaction) -> Arc<TableDirectory> {
        if let Some(previous) = self.superseded {
            drop_tables(&previous, tx);
        }
        self.current
    }
}

impl IvfIndex {
    pub fn new(info: IndexInfo) -> IvfResult<Self> {
        Self::with_directory(info, None)
    }

    /// Restores an index whose tables were built earlier.
    pub fn with_directory(info: IndexInfo, directory: Option<TableDirectory>) -> IvfResult<Self> {
        info.config.validate()?;
        let dimension = VectorDimension::new(info.config.dimension)?;
        if let Some(dir) = &directory {
            if dir.dimension != dimension.get() {
                return Err(IvfError::DimensionMismatch {
                    expected: dimension.get(),
                    actual: dir.dimension,
                });
            }
        }
        Ok(Self {
            codec: RecordCodec::new(dimension),
            info,
            staging: Mutex::new(Vec::new()),
            directory: RwLock::new(directory.map(Arc::new)),
            generation_floor: 0,
        })
    }

    /// An unbuilt index that will replace `previous`. Its first build writes
    /// a generation after the one `previous` serves, so both table sets can
    /// coexist until the replacement is committed.
    pub fn superseding(info: IndexInfo, previous: &IvfIndex) -> IvfResult<Self> {
        let floor = previous
            .directory()
            .map_or(previous.generation_floor, |d| d.generation);
        Ok(Self {
            generation_floor: floor,
            ..Self::new(info)?
        })
    }

    #[must_use]
    pub fn info(&self) -> &IndexInfo {
        &self.info
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.info.name
    }

    #[must_use]
    pub fn codec(&self) -> &RecordCodec {
        &self.codec
    }

    /// Whether a build has completed and queries can be served.
    #[must_use]
    pub fn is_ready(&self) -> bool {
        self.directory.read().is_some()
    }

    /// Table directory of the generation currently served.
    #[must_use]
    pub fn directory(&self) -> Option<Arc<TableDirectory>> {
        self.directory.read().clone()
    }

    #[must_use]
    pub fn staged_len(&self) -> usize {
        self.staging.lock().len()
    }

    fn require_directory(&self) -> IvfResult<Arc<TableDirectory>> {
        self.directory().ok_or_else(|| IvfError::IndexNotBuilt {
            index: self.info.name.clone(),
        })
    }

    /// Adds a record. Before the first build it is staged; afterwards it is
    /// appended to the postings of its nearest leaf, whose table is created
    /// on demand.
    pub fn insert(&self, record: DataRecord, tx: &dyn Transaction) -> IvfResult<()> {
        self.codec
            .dimension()
            .validate_vector(record.vector.as_slice())?;

        // Held while routing so a concurrent build cannot clear the buffer
        // between the readiness check and the push
        let mut staging = self.staging.lock();
        let Some(directory) = self.directory() else {
            staging.push(record);
            return Ok(());
        };

        let leaf = self.route(&directory, &record.vector, tx)?;
        let table = directory
            .leaf_table(leaf)
            .ok_or_else(|| missing_leaf(&directory, leaf))?;
        let mut postings = tx.open_table(table, self.codec.postings_schema(), true)?;
        self.codec
            .write_posting(postings.as_mut(), leaf.level2, &record)?;
        postings.close();
        drop(staging);
        debug!(index = %self.info.name, %leaf, payload = %record.payload, "routed insert");
        Ok(())
    }

    fn route(
        &self,
        directory: &TableDirectory,
        vector: &Vector,
        tx: &dyn Transaction,
    ) -> IvfResult<LeafId> {
        let scorer = DistanceScorer::new(vector.clone());
        let level1 = nearest_level1(directory, &self.codec, tx, &scorer)?.ok_or_else(|| {
            StorageError::InvalidFormat {
                file: directory.level1.file_name(),
                reason: "level-1 centroid table is empty".to_string(),
            }
        })?;
        let (_, level2) = nearest_level2(directory, &self.codec, tx, &scorer, level1, 1)?
            .into_iter()
            .next()
            .ok_or_else(|| StorageError::InvalidFormat {
                file: directory.level1.file_name(),
                reason: format!("partition {level1} has no level-2 centroids"),
            })?;
        Ok(LeafId::new(level1, level2))
    }

    /// Removes the record with this vector and back-pointer. Returns whether
    /// a row was removed.
    pub fn delete(&self, record: &DataRecord, tx: &dyn Transaction) -> IvfResult<bool> {
        let mut staging = self.staging.lock();
        let Some(directory) = self.directory() else {
            let position = staging.iter().position(|r| r == record);
            return Ok(position.map(|i| staging.swap_remove(i)).is_some());
        };
        drop(staging);

        let mut scanner = IndexScanner::new(
            &self.info.name,
            Some(directory),
            self.codec.clone(),
            self.info.config.probe_width,
            tx,
        )
        .with_mode(ScanMode::Update);
        scanner.open(&SearchRange::point(record.vector.clone()))?;
        while scanner.advance()? {
            if scanner.current_payload()? == record.payload
                && scanner.current_vector()? == record.vector
            {
                scanner.delete_current()?;
                scanner.close();
                return Ok(true);
            }
        }
        scanner.close();
        Ok(false)
    }

    /// Trains on every known record and swaps in a new table generation.
    ///
    /// The record set is the staging buffer plus, on a rebuild, the rows of
    /// the generation currently served. Queries keep using the previous
    /// generation until every table of the new one is written. On failure
    /// the new generation is dropped and the staging buffer is kept.
    pub fn build_index(&self, tx: &dyn Transaction) -> IvfResult<Arc<TableDirectory>> {
        Ok(self.swap_generation(tx)?.retire(tx))
    }

    /// Like [`build_index`](Self::build_index), but leaves the superseded
    /// generation on disk for the caller to retire once the swap is recorded.
    pub fn swap_generation(&self, tx: &dyn Transaction) -> IvfResult<GenerationSwap> {
        // Held for the whole build: one writer at a time
        let mut staging = self.staging.lock();
        let previous = self.directory();

        let mut records = staging.clone();
        if let Some(previous) = &previous {
            records.extend(self.collect_rows(previous, tx)?);
        }
        if records.is_empty() {
            return Err(IvfError::EmptyDataset);
        }

        let generation = previous
            .as_ref()
            .map_or(self.generation_floor, |d| d.generation)
            + 1;
        let mut directory =
            TableDirectory::new(&self.info.name, generation, self.codec.dimension().get());
        info!(
            index = %self.info.name,
            generation,
            records = records.len(),
            logging = tx.logging_enabled(),
            "building index"
        );

        let builder = HierarchicalBuilder::from_config(&self.info.config);
        if let Err(e) = builder.build(records, &mut directory, &self.codec, tx) {
            warn!(index = %self.info.name, generation, "build failed, dropping new tables: {e}");
            drop_tables(&directory, tx);
            return Err(e);
        }

        let directory = Arc::new(directory);
        *self.directory.write() = Some(Arc::clone(&directory));
        staging.clear();
        staging.shrink_to_fit();

        info!(
            index = %self.info.name,
            generation,
            leaves = directory.populated_leaves(),
            "index ready"
        );
        Ok(GenerationSwap {
            current: directory,
            superseded: previous,
        })
    }

    /// Drops every table of the served generation and marks the index unbuilt.
    pub(crate) fn drop_served_tables(&self, tx: &dyn Transaction) {
        if let Some(directory) = self.directory.write().take() {
            drop_tables(&directory, tx);
        }
    }

    fn collect_rows(
        &self,
        directory: &TableDirectory,
        tx: &dyn Transaction,
    ) -> IvfResult<Vec<DataRecord>> {
        let mut records = Vec::with_capacity(directory.record_count);
        for entry in directory.leaves.values() {
            if !tx.table_exists(&entry.table)? {
                continue;
            }
            let mut file = tx.open_table(&entry.table, self.codec.postings_schema(), false)?;
            file.before_first()?;
            while file.next()? {
                records.push(self.codec.read_posting(file.as_ref())?);
            }
            file.close();
        }
        Ok(records)
    }

    /// A closed scanner bound to `tx`.
    #[must_use]
    pub fn scanner<'tx>(&self, tx: &'tx dyn Transaction) -> IndexScanner<'tx> {
        IndexScanner::new(
            &self.info.name,
            self.directory(),
            self.codec.clone(),
            self.info.config.probe_width,
            tx,
        )
    }

    /// Opens a read scan for a single-value lookup.
    pub fn open_scan<'tx>(
        &self,
        range: &SearchRange,
        tx: &'tx dyn Transaction,
    ) -> IvfResult<IndexScanner<'tx>> {
        let mut scanner = self.scanner(tx);
        scanner.open(range)?;
        Ok(scanner)
    }

    /// The `k` nearest rows among the probed leaves, nearest first.
    pub fn search(
        &self,
        query: &Vector,
        k: usize,
        tx: &dyn Transaction,
    ) -> IvfResult<Vec<Neighbor>> {
        let mut scanner = self.open_scan(&SearchRange::point(query.clone()), tx)?;
        let scorer = DistanceScorer::new(query.clone());
        let mut heap = BoundedMaxHeap::new(k);

        while scanner.advance()? {
            let distance = scorer.squared_distance(scanner.current_vector()?.as_slice())?;
            if heap.is_full() && heap.worst_distance().is_some_and(|w| distance >= w) {
                continue;
            }
            if let Some(leaf) = scanner.current_leaf() {
                heap.push(distance, (leaf, scanner.current_payload()?));
            }
        }
        scanner.close();

        Ok(heap
            .into_sorted()
            .into_iter()
            .map(|(squared, (leaf, payload))| Neighbor {
                leaf,
                payload,
                distance: squared.sqrt(),
            })
            .collect())
    }

    /// Flat top-M probe with the configured width. Fails with `NoMatches`
    /// when no probed leaf has rows.
    pub fn flat_search(
        &self,
        query: &Vector,
        width: Option<usize>,
        tx: &dyn Transaction,
    ) -> IvfResult<Vec<Neighbor>> {
        let directory = self.require_directory()?;
        let probe = FlatProbe::new(
            &directory,
            &self.codec,
            width.unwrap_or(self.info.config.flat_probe_width),
        );
        let neighbors = probe.nearest_per_leaf(query, tx)?;
        probe.require_matches(neighbors)
    }

    /// Pins every centroid table of the served generation.
    pub fn preload(&self, tx: &dyn Transaction) -> IvfResult<PreloadReport> {
        let directory = self.require_directory()?;
        Ok(MemoryPreloader.preload(&directory, tx))
    }

    /// Estimated postings rows scanned per query: probe width times the
    /// average populated leaf size at build time.
    #[must_use]
    pub fn search_cost(&self) -> f64 {
        let Some(directory) = self.directory() else {
            return 0.0;
        };
        let leaves = directory.populated_leaves();
        if leaves == 0 {
            return 0.0;
        }
        let average = directory.record_count as f64 / leaves as f64;
        self.info.config.probe_width.min(leaves) as f64 * average
    }
}

fn missing_leaf(directory: &TableDirectory, leaf: LeafId) -> IvfError {
    StorageError::InvalidFormat {
        file: directory.level1.file_name(),
        reason: format!("leaf {leaf} is not registered"),
    }
    .into()
}

/// Best-effort removal of a generation's tables.
fn drop_tables(directory: &TableDirectory, tx: &dyn Transaction) {
    for table in directory.all_tables() {
        if let Err(e) = tx.drop_table(table) {
            warn!(%table, "failed to drop table: {e}");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::{
        BlockId, LocalStorage, LocalTransaction, RecordFile, Schema, StorageResult, TableName,
    };
    use crate::vector::RecordPointer;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tempfile::TempDir;

    /// Local transaction that refuses to open tables for write once
    /// `writes_left` opens have been granted.
    struct WriteBudget {
        inner: LocalTransaction,
        writes_left: AtomicUsize,
    }

    impl WriteBudget {
        fn new(inner: LocalTransaction, writes: usize) -> Self {
            Self {
                inner,
                writes_left: AtomicUsize::new(writes),
            }
        }
    }

    impl Transaction for WriteBudget {
        fn open_table(
            &self,
            name: &TableName,
            schema: &Schema,
            for_write: bool,
        ) -> StorageResult<Box<dyn RecordFile>> {
            if for_write
                && self
                    .writes_left
                    .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
                    .is_err()
            {
                return Err(StorageError::ReadOnly(name.to_string()));
            }
            self.inner.open_table(name, schema, for_write)
        }

        fn format_table(&self, name: &TableName, schema: &Schema) -> StorageResult<()> {
            self.inner.format_table(name, schema)
        }

        fn table_exists(&self, name: &TableName) -> StorageResult<bool> {
            self.inner.table_exists(name)
        }

        fn drop_table(&self, name: &TableName) -> StorageResult<()> {
            self.inner.drop_table(name)
        }

        fn read_file(&self, file_name: &str) {
            self.inner.read_file(file_name);
        }

        fn file_size(&self, file_name: &str) -> StorageResult<u64> {
            self.inner.file_size(file_name)
        }

        fn pin(&self, block: &BlockId) -> StorageResult<()> {
            self.inner.pin(block)
        }

        fn logging_enabled(&self) -> bool {
            self.inner.logging_enabled()
        }
    }

    fn table_files_with_prefix(dir: &TempDir, prefix: &str) -> Vec<String> {
        std::fs::read_dir(dir.path())
            .unwrap()
            .map(|entry| entry.unwrap().file_name().to_string_lossy().into_owned())
            .filter(|name| name.starts_with(prefix))
            .collect()
    }

    fn small_config() -> IndexConfig {
        IndexConfig {
            dimension: 2,
            level1_clusters: 2,
            level2_clusters: 3,
            max_iterations: 10,
            probe_width: 3,
            flat_probe_width: 6,
            seed: Some(5),
            training_threads: 1,
            ..IndexConfig::default()
        }
    }

    fn record(x: f32, y: f32, block: u64) -> DataRecord {
        DataRecord::new(Vector::new(vec![x, y]), RecordPointer::new(block, 0))
    }

    fn two_blobs() -> Vec<DataRecord> {
        let mut records = Vec::new();
        for i in 0..20 {
            let offset = i as f32 * 0.1;
            records.push(record(offset, offset, i));
            records.push(record(100.0 + offset, 100.0 - offset, 100 + i));
        }
        records
    }

    fn built_index(dir: &TempDir) -> (LocalStorage, IvfIndex) {
        let storage = LocalStorage::open(dir.path(), 1024, 64).unwrap();
        let index = IvfIndex::new(IndexInfo::new("pts", "points", "v", small_config())).unwrap();
        let tx = storage.begin_bulk();
        for r in two_blobs() {
            index.insert(r, &tx).unwrap();
        }
        assert_eq!(index.staged_len(), 40);
        index.build_index(&tx).unwrap();
        (storage, index)
    }

    #[test]
    fn test_build_releases_staging_and_marks_ready() {
        let dir = TempDir::new().unwrap();
        let (_storage, index) = built_index(&dir);

        assert!(index.is_ready());
        assert_eq!(index.staged_len(), 0);
        let directory = index.directory().unwrap();
        assert_eq!(directory.generation, 1);
        assert_eq!(directory.record_count, 40);
        assert!(index.search_cost() > 0.0);
    }

    #[test]
    fn test_search_finds_exact_match_first() {
        let dir = TempDir::new().unwrap();
        let (storage, index) = built_index(&dir);
        let tx = storage.begin();

        let hits = index
            .search(&Vector::new(vec![100.5, 99.5]), 3, &tx)
            .unwrap();
        assert_eq!(hits.len(), 3);
        assert_eq!(hits[0].payload, RecordPointer::new(105, 0));
        assert!(hits[0].distance < 1e-6);
        assert!(hits.windows(2).all(|w| w[0].distance <= w[1].distance));
    }

    #[test]
    fn test_insert_after_build_is_routed_and_deletable() {
        let dir = TempDir::new().unwrap();
        let (storage, index) = built_index(&dir);
        let tx = storage.begin();

        let extra = record(0.05, 0.05, 999);
        index.insert(extra.clone(), &tx).unwrap();
        assert_eq!(index.staged_len(), 0);

        let hits = index.search(&extra.vector, 1, &tx).unwrap();
        assert_eq!(hits[0].payload, extra.payload);

        assert!(index.delete(&extra, &tx).unwrap());
        assert!(!index.delete(&extra, &tx).unwrap());
        let hits = index.search(&extra.vector, 1, &tx).unwrap();
        assert_ne!(hits[0].payload, extra.payload);
    }

    #[test]
    fn test_delete_before_build_unstages() {
        let storage_dir = TempDir::new().unwrap();
        let storage = LocalStorage::open(storage_dir.path(), 1024, 8).unwrap();
        let tx = storage.begin();
        let index = IvfIndex::new(IndexInfo::new("pts", "points", "v", small_config())).unwrap();

        let r = record(1.0, 1.0, 1);
        index.insert(r.clone(), &tx).unwrap();
        assert!(index.delete(&r, &tx).unwrap());
        assert_eq!(index.staged_len(), 0);
        assert!(matches!(index.build_index(&tx), Err(IvfError::EmptyDataset)));
    }

    #[test]
    fn test_rebuild_swaps_generation_and_drops_old_tables() {
        let dir = TempDir::new().unwrap();
        let (storage, index) = built_index(&dir);
        let tx = storage.begin_bulk();

        let old = index.directory().unwrap();
        index.insert(record(50.0, 50.0, 500), &tx).unwrap();
        let new = index.build_index(&tx).unwrap();

        assert_eq!(new.generation, 2);
        assert_eq!(new.record_count, 41);
        assert!(!tx.table_exists(&old.level1).unwrap());
        assert!(tx.table_exists(&new.level1).unwrap());
    }

    #[test]
    fn test_failed_build_keeps_staging_and_not_ready() {
        let dir = TempDir::new().unwrap();
        let storage = LocalStorage::open(dir.path(), 1024, 8).unwrap();
        let tx = storage.begin_bulk();
        let config = IndexConfig {
            level1_clusters: 50,
            ..small_config()
        };
        let index = IvfIndex::new(IndexInfo::new("pts", "points", "v", config)).unwrap();
        for r in two_blobs() {
            index.insert(r, &tx).unwrap();
        }

        assert!(matches!(
            index.build_index(&tx),
            Err(IvfError::InvalidClusterCount { k: 50, available: 40 })
        ));
        assert!(!index.is_ready());
        assert_eq!(index.staged_len(), 40);
    }

    #[test]
    fn test_storage_failure_mid_build_leaves_no_tables() {
        let dir = TempDir::new().unwrap();
        let storage = LocalStorage::open(dir.path(), 1024, 64).unwrap();
        let index = IvfIndex::new(IndexInfo::new("pts", "points", "v", small_config())).unwrap();
        let tx = WriteBudget::new(storage.begin_bulk(), 3);
        for r in two_blobs() {
            index.insert(r, &tx).unwrap();
        }

        assert!(matches!(index.build_index(&tx), Err(IvfError::Storage(_))));
        assert!(!index.is_ready());
        assert_eq!(index.staged_len(), 40);
        assert_eq!(table_files_with_prefix(&dir, "pts_g1_"), Vec::<String>::new());

        // The kept records build once storage recovers
        let directory = index.build_index(&storage.begin_bulk()).unwrap();
        assert_eq!(directory.generation, 1);
        assert_eq!(directory.record_count, 40);
    }

    #[test]
    fn test_storage_failure_mid_rebuild_keeps_serving_previous_generation() {
        let dir = TempDir::new().unwrap();
        let (storage, index) = built_index(&dir);
        let extra = record(50.0, 50.0, 500);
        index.insert(extra.clone(), &storage.begin()).unwrap();

        let tx = WriteBudget::new(storage.begin_bulk(), 2);
        assert!(matches!(index.build_index(&tx), Err(IvfError::Storage(_))));

        let served = index.directory().unwrap();
        assert!(index.is_ready());
        assert_eq!(served.generation, 1);
        assert_eq!(table_files_with_prefix(&dir, "pts_g2_"), Vec::<String>::new());

        let tx = storage.begin();
        assert!(tx.table_exists(&served.level1).unwrap());
        let hits = index.search(&extra.vector, 1, &tx).unwrap();
        assert_eq!(hits[0].payload, extra.payload);
        let hits = index
            .search(&Vector::new(vec![100.5, 99.5]), 1, &tx)
            .unwrap();
        assert_eq!(hits[0].payload, RecordPointer::new(105, 0));
    }

    #[test]
    fn test_inserts_racing_a_build_are_never_stranded() {
        let dir = TempDir::new().unwrap();
        let storage = LocalStorage::open(dir.path(), 1024, 64).unwrap();
        let index = IvfIndex::new(IndexInfo::new("pts", "points", "v", small_config())).unwrap();
        let bulk = storage.begin_bulk();
        for r in two_blobs() {
            index.insert(r, &bulk).unwrap();
        }

        let extras: Vec<DataRecord> = (0..20)
            .map(|i| record(50.0 + i as f32 * 0.5, 20.0, 900 + i))
            .collect();
        std::thread::scope(|scope| {
            scope.spawn(|| index.build_index(&bulk).unwrap());
            scope.spawn(|| {
                let tx = storage.begin();
                for r in &extras {
                    index.insert(r.clone(), &tx).unwrap();
                }
            });
        });

        // Each insert either joined the build or was routed after it
        assert!(index.is_ready());
        assert_eq!(index.staged_len(), 0);
        let tx = storage.begin();
        for r in &extras {
            let hits = index.search(&r.vector, 1, &tx).unwrap();
            assert_eq!(hits[0].payload, r.payload);
        }
    }

    #[test]
    fn test_superseding_index_builds_past_previous_generation() {
        let dir = TempDir::new().unwrap();
        let (storage, previous) = built_index(&dir);
        let tx = storage.begin_bulk();

        let replacement =
            IvfIndex::superseding(previous.info().clone(), &previous).unwrap();
        assert!(!replacement.is_ready());
        replacement.insert(record(1.0, 1.0, 7), &tx).unwrap();
        replacement.insert(record(90.0, 90.0, 8), &tx).unwrap();
        replacement.insert(record(91.0, 91.0, 9), &tx).unwrap();
        let swap = replacement.swap_generation(&tx).unwrap();
        assert!(swap.superseded.is_none());
        assert_eq!(swap.current.generation, 2);

        // Both table sets coexist until the previous index is dropped
        let old = previous.directory().unwrap();
        assert!(tx.table_exists(&old.level1).unwrap());
        assert!(tx.table_exists(&swap.current.level1).unwrap());
        previous.drop_served_tables(&tx);
        assert!(!tx.table_exists(&old.level1).unwrap());
        assert!(!previous.is_ready());
    }

    #[test]
    fn test_unbuilt_index_rejects_queries() {
        let dir = TempDir::new().unwrap();
        let storage = LocalStorage::open(dir.path(), 1024, 8).unwrap();
        let tx = storage.begin();
        let index = IvfIndex::new(IndexInfo::new("pts", "points", "v", small_config())).unwrap();

        let query = SearchRange::point(Vector::new(vec![0.0, 0.0]));
        assert!(matches!(
            index.open_scan(&query, &tx),
            Err(IvfError::IndexNotBuilt { .. })
        ));
        assert!(matches!(index.preload(&tx), Err(IvfError::IndexNotBuilt { .. })));
        assert_eq!(index.search_cost(), 0.0);
    }

    #[test]
    fn test_preload_pins_centroid_tables() {
        let dir = TempDir::new().unwrap();
        let (storage, index) = built_index(&dir);
        let tx = storage.begin();

        let report = index.preload(&tx).unwrap();
        let directory = index.directory().unwrap();
        assert_eq!(report.tables, 1 + directory.level2.len());
        assert!(report.is_complete());
        assert_eq!(storage.cache().len() as u64, report.blocks_pinned);
        assert!(tx.read_set().contains(&directory.level1.file_name()));
    }

    #[test]
    fn test_preload_degrades_when_cache_is_full() {
        let dir = TempDir::new().unwrap();
        let (_, index) = built_index(&dir);
        let tiny = LocalStorage::open(dir.path(), 1024, 1).unwrap();
        let tx = tiny.begin();

        let report = index.preload(&tx).unwrap();
        assert_eq!(report.blocks_pinned, 1);
        assert!(!report.is_complete());
    }

    #[test]
    fn test_flat_search() {
        let dir = TempDir::new().unwrap();
        let (storage, index) = built_index(&dir);
        let tx = storage.begin();

        let hits = index
            .flat_search(&Vector::new(vec![0.0, 0.0]), None, &tx)
            .unwrap();
        assert_eq!(hits[0].payload, RecordPointer::new(0, 0));
        assert!(hits.windows(2).all(|w| w[0].distance <= w[1].distance));
    }
}
