//! Pins centroid-table blocks into the page cache ahead of queries.

use serde::Serialize;
use tracing::{debug, warn};

use crate::ivf::directory::TableDirectory;
use crate::storage::{BlockId, Transaction};

/// Outcome of a preload pass.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct PreloadReport {
    pub tables: usize,
    pub blocks_pinned: u64,
    pub blocks_skipped: u64,
}

impl PreloadReport {
    /// Whether every centroid block ended up pinned.
    #[must_use]
    pub fn is_complete(&self) -> bool {
        self.blocks_skipped == 0
    }
}

/// Warms the buffer cache with every centroid table of a directory.
///
/// Purely a hint: once a pin fails (typically a full cache) the rest of the
/// blocks are counted as skipped and left to demand paging.
#[derive(Debug, Clone, Copy, Default)]
pub struct MemoryPreloader;

impl MemoryPreloader {
    pub fn preload(&self, directory: &TableDirectory, tx: &dyn Transaction) -> PreloadReport {
        let mut report = PreloadReport::default();
        let mut pinning = true;

        for table in directory.centroid_tables() {
            let file = table.file_name();
            tx.read_file(&file);
            let blocks = match tx.file_size(&file) {
                Ok(blocks) => blocks,
                Err(e) => {
                    warn!(%table, "cannot size centroid table, skipping: {e}");
                    continue;
                }
            };
            report.tables += 1;

            for number in 0..blocks {
                if !pinning {
                    report.blocks_skipped += 1;
                    continue;
                }
                match tx.pin(&BlockId::new(file.as_str(), number)) {
                    Ok(()) => report.blocks_pinned += 1,
                    Err(e) => {
                        warn!(%table, block = number, "preload stopped: {e}");
                        pinning = false;
                        report.blocks_skipped += 1;
                    }
                }
            }
        }

        debug!(
            tables = report.tables,
            pinned = report.blocks_pinned,
            skipped = report.blocks_skipped,
            "preload finished"
        );
        report
    }
}
