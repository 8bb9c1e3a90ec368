//! Query-time scan over the postings of the nearest leaf clusters.
//!
//! `open` picks the nearest level-1 centroid, then the `K` nearest level-2
//! centroids inside that partition. `advance` walks the postings tables of
//! those leaves one after the other, so callers see a single row sequence.
//!
//! ```text
//! Closed --open--> Positioned --advance*--> Exhausted
//!    ^                 |                        |
//!    +------close------+-----------close--------+
//! ```

use std::sync::Arc;

use tracing::debug;

use crate::error::{IvfError, IvfResult};
use crate::ivf::codec::RecordCodec;
use crate::ivf::directory::TableDirectory;
use crate::storage::{RecordFile, StorageError, Transaction};
use crate::vector::{
    BoundedMaxHeap, CentroidId, DistanceScorer, LeafId, RecordPointer, Vector,
};

/// A single lookup value.
#[derive(Debug, Clone, PartialEq)]
pub struct SearchKey(Vector);

impl SearchKey {
    #[must_use]
    pub fn new(vector: Vector) -> Self {
        Self(vector)
    }

    #[must_use]
    pub fn vector(&self) -> &Vector {
        &self.0
    }
}

/// Shape of a search request. Only single-value lookups are served.
#[derive(Debug, Clone, PartialEq)]
pub enum SearchRange {
    Point(SearchKey),
    Values(Vec<SearchKey>),
    Between {
        low: Option<SearchKey>,
        high: Option<SearchKey>,
    },
}

impl SearchRange {
    #[must_use]
    pub fn point(vector: Vector) -> Self {
        Self::Point(SearchKey::new(vector))
    }

    /// The lookup vector, or `UnsupportedQueryShape`.
    pub fn single_value(&self) -> IvfResult<&Vector> {
        match self {
            Self::Point(key) => Ok(key.vector()),
            Self::Values(keys) if keys.len() == 1 => Ok(keys[0].vector()),
            Self::Values(keys) => Err(IvfError::UnsupportedQueryShape {
                reason: format!("{} lookup values", keys.len()),
            }),
            Self::Between { .. } => Err(IvfError::UnsupportedQueryShape {
                reason: "range predicate".to_string(),
            }),
        }
    }
}

/// Whether the scanner may modify the rows it visits.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScanMode {
    Read,
    Update,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScanState {
    Closed,
    Positioned,
    Exhausted,
}

/// Forward iterator over the postings rows of the probed leaves.
///
/// Owned by one transactional context; open one scanner per concurrent query.
pub struct IndexScanner<'tx> {
    index: String,
    directory: Option<Arc<TableDirectory>>,
    codec: RecordCodec,
    tx: &'tx dyn Transaction,
    probe_width: usize,
    mode: ScanMode,
    state: ScanState,
    candidates: Vec<LeafId>,
    next_candidate: usize,
    current: Option<(LeafId, Box<dyn RecordFile>)>,
    on_row: bool,
}

impl<'tx> IndexScanner<'tx> {
    /// A closed scanner. `directory` is `None` when the index is not built.
    #[must_use]
    pub fn new(
        index: &str,
        directory: Option<Arc<TableDirectory>>,
        codec: RecordCodec,
        probe_width: usize,
        tx: &'tx dyn Transaction,
    ) -> Self {
        Self {
            index: index.to_string(),
            directory,
            codec,
            tx,
            probe_width,
            mode: ScanMode::Read,
            state: ScanState::Closed,
            candidates: Vec::new(),
            next_candidate: 0,
            current: None,
            on_row: false,
        }
    }

    #[must_use]
    pub fn with_mode(mut self, mode: ScanMode) -> Self {
        self.mode = mode;
        self
    }

    #[must_use]
    pub fn state(&self) -> ScanState {
        self.state
    }

    /// Leaves selected by the last `open`, nearest first.
    #[must_use]
    pub fn candidates(&self) -> &[LeafId] {
        &self.candidates
    }

    /// Leaf of the current row.
    #[must_use]
    pub fn current_leaf(&self) -> Option<LeafId> {
        self.current.as_ref().map(|(leaf, _)| *leaf)
    }

    /// Selects the leaves to scan for the query and positions before the
    /// first row. Reopening an open scanner starts a new query.
    pub fn open(&mut self, range: &SearchRange) -> IvfResult<()> {
        let directory = self
            .directory
            .clone()
            .ok_or_else(|| IvfError::IndexNotBuilt {
                index: self.index.clone(),
            })?;
        let query = range.single_value()?;
        self.codec.dimension().validate_vector(query.as_slice())?;

        self.close();
        let scorer = DistanceScorer::new(query.clone());
        self.candidates = match nearest_level1(&directory, &self.codec, self.tx, &scorer)? {
            Some(level1) => {
                nearest_level2(
                    &directory,
                    &self.codec,
                    self.tx,
                    &scorer,
                    level1,
                    self.probe_width,
                )?
                .into_iter()
                .map(|(_, level2)| LeafId::new(level1, level2))
                .collect()
            }
            None => Vec::new(),
        };
        debug!(index = %self.index, candidates = ?self.candidates, "scan opened");

        self.next_candidate = 0;
        self.state = ScanState::Positioned;
        self.open_next_table()?;
        Ok(())
    }

    /// Moves to the next row, crossing into the next candidate leaf when the
    /// current one runs out. Returns `false` once every candidate is done.
    pub fn advance(&mut self) -> IvfResult<bool> {
        match self.state {
            ScanState::Closed => return Err(IvfError::ScanNotPositioned),
            ScanState::Exhausted => return Ok(false),
            ScanState::Positioned => {}
        }

        loop {
            if let Some((_, file)) = self.current.as_mut() {
                if file.next()? {
                    self.on_row = true;
                    return Ok(true);
                }
                file.close();
                self.current = None;
            }
            self.on_row = false;
            if !self.open_next_table()? {
                self.state = ScanState::Exhausted;
                return Ok(false);
            }
        }
    }

    /// Back-pointer of the current row.
    pub fn current_payload(&self) -> IvfResult<RecordPointer> {
        let file = self.current_file()?;
        self.codec.read_payload(file)
    }

    /// Stored vector of the current row.
    pub fn current_vector(&self) -> IvfResult<Vector> {
        let file = self.current_file()?;
        self.codec.read_vector(file)
    }

    /// Tombstones the current row. Requires [`ScanMode::Update`].
    pub fn delete_current(&mut self) -> IvfResult<()> {
        if self.mode != ScanMode::Update {
            let table = self.current_table_name();
            return Err(StorageError::ReadOnly(table).into());
        }
        self.current_file()?;
        if let Some((_, file)) = self.current.as_mut() {
            file.delete()?;
        }
        self.on_row = false;
        Ok(())
    }

    /// Releases the current physical scan. Safe to call any number of times.
    pub fn close(&mut self) {
        if let Some((_, mut file)) = self.current.take() {
            file.close();
        }
        self.on_row = false;
        self.state = ScanState::Closed;
    }

    fn current_file(&self) -> IvfResult<&dyn RecordFile> {
        if self.state != ScanState::Positioned || !self.on_row {
            return Err(IvfError::ScanNotPositioned);
        }
        self.current
            .as_ref()
            .map(|(_, file)| file.as_ref())
            .ok_or(IvfError::ScanNotPositioned)
    }

    fn current_table_name(&self) -> String {
        self.current_leaf()
            .and_then(|leaf| self.directory.as_ref()?.leaf_table(leaf).cloned())
            .map(|t| t.to_string())
            .unwrap_or_else(|| self.index.clone())
    }

    /// Opens the next candidate whose postings table exists. Leaves that
    /// were empty at build time have none and are skipped.
    fn open_next_table(&mut self) -> IvfResult<bool> {
        let Some(directory) = self.directory.clone() else {
            return Ok(false);
        };
        while self.next_candidate < self.candidates.len() {
            let leaf = self.candidates[self.next_candidate];
            self.next_candidate += 1;

            let Some(table) = directory.leaf_table(leaf) else {
                continue;
            };
            if !self.tx.table_exists(table)? {
                debug!(%leaf, "leaf has no postings table");
                continue;
            }
            let file = self.tx.open_table(
                table,
                self.codec.postings_schema(),
                self.mode == ScanMode::Update,
            )?;
            self.current = Some((leaf, file));
            return Ok(true);
        }
        Ok(false)
    }
}

impl Drop for IndexScanner<'_> {
    fn drop(&mut self) {
        self.close();
    }
}

impl std::fmt::Debug for IndexScanner<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IndexScanner")
            .field("index", &self.index)
            .field("state", &self.state)
            .field("mode", &self.mode)
            .field("candidates", &self.candidates)
            .field("current_leaf", &self.current_leaf())
            .finish()
    }
}

/// Nearest level-1 centroid by full scan; ties go to the lowest id.
pub(crate) fn nearest_level1(
    directory: &TableDirectory,
    codec: &RecordCodec,
    tx: &dyn Transaction,
    scorer: &DistanceScorer,
) -> IvfResult<Option<CentroidId>> {
    let mut file = tx.open_table(&directory.level1, codec.centroid_schema(), false)?;
    let mut best: Option<(f64, CentroidId)> = None;
    file.before_first()?;
    while file.next()? {
        let centroid = codec.read_centroid(file.as_ref())?;
        let distance = scorer.squared_distance(centroid.vector.as_slice())?;
        let closer = match best {
            None => true,
            Some((d, id)) => distance < d || (distance == d && centroid.id < id),
        };
        if closer {
            best = Some((distance, centroid.id));
        }
    }
    file.close();
    Ok(best.map(|(_, id)| id))
}

/// The `width` nearest level-2 centroids of one partition, nearest first.
pub(crate) fn nearest_level2(
    directory: &TableDirectory,
    codec: &RecordCodec,
    tx: &dyn Transaction,
    scorer: &DistanceScorer,
    level1: CentroidId,
    width: usize,
) -> IvfResult<Vec<(f64, CentroidId)>> {
    let Some(table) = directory.level2_table(level1) else {
        return Ok(Vec::new());
    };
    let mut file = tx.open_table(table, codec.centroid_schema(), false)?;
    let mut heap = BoundedMaxHeap::new(width);
    file.before_first()?;
    while file.next()? {
        let centroid = codec.read_centroid(file.as_ref())?;
        heap.push(
            scorer.squared_distance(centroid.vector.as_slice())?,
            centroid.id,
        );
    }
    file.close();

    let mut ranked = heap.into_sorted();
    ranked.sort_by(|a, b| a.0.total_cmp(&b.0).then(a.1.cmp(&b.1)));
    Ok(ranked)
}
