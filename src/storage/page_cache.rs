//! Bounded cache of pinned blocks.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use dashmap::DashMap;

use super::{BlockId, StorageError, StorageResult};

#[derive(Debug)]
struct CachedPage {
    data: Arc<[u8]>,
    pins: AtomicUsize,
}

/// Concurrent page cache with a fixed page budget.
///
/// Pinning a block that is already resident only bumps its pin count.
/// Pinning a new block when the budget is spent fails with
/// [`StorageError::CacheFull`]; nothing is evicted implicitly.
#[derive(Debug)]
pub struct PageCache {
    capacity: usize,
    pages: DashMap<BlockId, CachedPage>,
}

impl PageCache {
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            pages: DashMap::new(),
        }
    }

    #[must_use]
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.pages.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.pages.is_empty()
    }

    #[must_use]
    pub fn contains(&self, block: &BlockId) -> bool {
        self.pages.contains_key(block)
    }

    /// Pin count of a resident block.
    #[must_use]
    pub fn pin_count(&self, block: &BlockId) -> usize {
        self.pages
            .get(block)
            .map_or(0, |p| p.pins.load(Ordering::Relaxed))
    }

    #[must_use]
    pub fn get(&self, block: &BlockId) -> Option<Arc<[u8]>> {
        self.pages.get(block).map(|p| Arc::clone(&p.data))
    }

    /// Pins a block, loading it with `load` when it is not resident.
    pub fn pin_with<F>(&self, block: &BlockId, load: F) -> StorageResult<()>
    where
        F: FnOnce() -> StorageResult<Vec<u8>>,
    {
        if let Some(page) = self.pages.get(block) {
            page.pins.fetch_add(1, Ordering::Relaxed);
            return Ok(());
        }
        if self.pages.len() >= self.capacity {
            return Err(StorageError::CacheFull {
                capacity: self.capacity,
            });
        }

        let data: Arc<[u8]> = load()?.into();
        self.pages
            .entry(block.clone())
            .or_insert_with(|| CachedPage {
                data,
                pins: AtomicUsize::new(0),
            })
            .pins
            .fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    /// Drops a block after its file changed underneath it.
    pub fn invalidate(&self, block: &BlockId) {
        self.pages.remove(block);
    }

    /// Drops every cached block of a file.
    pub fn invalidate_file(&self, file: &str) {
        self.pages.retain(|block, _| block.file != file);
    }
}
