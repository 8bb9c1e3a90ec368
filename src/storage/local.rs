//! File-backed storage: one table file per table under a data directory.

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::debug;

use super::record_file::{PagedRecordFile, read_block};
use super::{BlockId, PageCache, RecordFile, Schema, StorageResult, TableName, Transaction};

/// Root of a local table store.
///
/// Cheap to clone; clones share the page cache.
#[derive(Debug, Clone)]
pub struct LocalStorage {
    root: PathBuf,
    block_size: usize,
    cache: Arc<PageCache>,
}

impl LocalStorage {
    pub fn open(
        root: impl AsRef<Path>,
        block_size: usize,
        cache_pages: usize,
    ) -> StorageResult<Self> {
        let root = root.as_ref().to_path_buf();
        std::fs::create_dir_all(&root)?;
        Ok(Self {
            root,
            block_size,
            cache: Arc::new(PageCache::new(cache_pages)),
        })
    }

    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    #[must_use]
    pub fn block_size(&self) -> usize {
        self.block_size
    }

    #[must_use]
    pub fn cache(&self) -> &Arc<PageCache> {
        &self.cache
    }

    /// Starts a logged transactional context.
    #[must_use]
    pub fn begin(&self) -> LocalTransaction {
        LocalTransaction {
            storage: self.clone(),
            read_set: Mutex::new(BTreeSet::new()),
            logging: true,
        }
    }

    /// Starts a context with logging switched off, for bulk builds.
    #[must_use]
    pub fn begin_bulk(&self) -> LocalTransaction {
        LocalTransaction {
            logging: false,
            ..self.begin()
        }
    }
}

/// A transactional context over [`LocalStorage`].
#[derive(Debug)]
pub struct LocalTransaction {
    storage: LocalStorage,
    read_set: Mutex<BTreeSet<String>>,
    logging: bool,
}

impl LocalTransaction {
    /// Files this context declared read intent on.
    #[must_use]
    pub fn read_set(&self) -> Vec<String> {
        self.read_set.lock().iter().cloned().collect()
    }

    #[must_use]
    pub fn storage(&self) -> &LocalStorage {
        &self.storage
    }

    fn path_of(&self, file_name: &str) -> PathBuf {
        self.storage.root.join(file_name)
    }
}

impl Transaction for LocalTransaction {
    fn open_table(
        &self,
        name: &TableName,
        schema: &Schema,
        for_write: bool,
    ) -> StorageResult<Box<dyn RecordFile>> {
        if for_write && !self.table_exists(name)? {
            self.format_table(name, schema)?;
        }
        let file = PagedRecordFile::open(
            &self.storage.root,
            name,
            schema,
            self.storage.block_size,
            for_write,
            Arc::clone(&self.storage.cache),
        )?;
        Ok(Box::new(file))
    }

    fn format_table(&self, name: &TableName, schema: &Schema) -> StorageResult<()> {
        if self.logging {
            debug!(table = %name, "formatting table");
        }
        self.storage.cache.invalidate_file(&name.file_name());
        PagedRecordFile::format(&self.storage.root, name, schema, self.storage.block_size)
    }

    fn table_exists(&self, name: &TableName) -> StorageResult<bool> {
        Ok(self.path_of(&name.file_name()).is_file())
    }

    fn drop_table(&self, name: &TableName) -> StorageResult<()> {
        let file_name = name.file_name();
        self.storage.cache.invalidate_file(&file_name);
        match std::fs::remove_file(self.path_of(&file_name)) {
            Ok(()) => {
                if self.logging {
                    debug!(table = %name, "dropped table");
                }
                Ok(())
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    fn read_file(&self, file_name: &str) {
        self.read_set.lock().insert(file_name.to_string());
    }

    fn file_size(&self, file_name: &str) -> StorageResult<u64> {
        match std::fs::metadata(self.path_of(file_name)) {
            Ok(meta) => Ok(meta.len() / self.storage.block_size as u64),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(0),
            Err(e) => Err(e.into()),
        }
    }

    fn pin(&self, block: &BlockId) -> StorageResult<()> {
        let path = self.path_of(&block.file);
        let block_size = self.storage.block_size;
        self.storage
            .cache
            .pin_with(block, || Ok(read_block(&path, block.number, block_size)?))
    }

    fn logging_enabled(&self) -> bool {
        self.logging
    }
}
