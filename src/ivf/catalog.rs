//! Index catalog: resolves indexes by `(table, field)` and persists their
//! definitions together with the table directory they serve.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::error::{IvfError, IvfResult};
use crate::ivf::directory::TableDirectory;
use crate::ivf::index::{IndexInfo, IvfIndex};
use crate::ivf::preload::PreloadReport;
use crate::ivf::scan::{IndexScanner, SearchRange};
use crate::storage::Transaction;
use crate::vector::DataRecord;

/// File name of the catalog inside the data directory.
pub const CATALOG_FILE: &str = "catalog.json";

const CATALOG_VERSION: u32 = 1;

#[derive(Debug, Serialize, Deserialize)]
struct CatalogFile {
    version: u32,
    indexes: Vec<CatalogEntry>,
}

#[derive(Debug, Serialize, Deserialize)]
struct CatalogEntry {
    info: IndexInfo,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    directory: Option<TableDirectory>,
}

/// Registry of the indexes in one data directory.
#[derive(Debug)]
pub struct IndexCatalog {
    path: PathBuf,
    indexes: RwLock<BTreeMap<String, Arc<IvfIndex>>>,
}

impl IndexCatalog {
    /// Opens the catalog of `data_dir`, loading `catalog.json` when present.
    pub fn open(data_dir: impl AsRef<Path>) -> IvfResult<Self> {
        let path = data_dir.as_ref().join(CATALOG_FILE);
        let catalog = Self {
            path,
            indexes: RwLock::new(BTreeMap::new()),
        };
        if catalog.path.exists() {
            catalog.load()?;
        }
        Ok(catalog)
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn catalog_error(&self, reason: impl ToString) -> IvfError {
        IvfError::Catalog {
            path: self.path.clone(),
            reason: reason.to_string(),
        }
    }

    fn load(&self) -> IvfResult<()> {
        let content = std::fs::read_to_string(&self.path).map_err(|e| self.catalog_error(e))?;
        let file: CatalogFile =
            serde_json::from_str(&content).map_err(|e| self.catalog_error(e))?;
        if file.version != CATALOG_VERSION {
            return Err(self.catalog_error(format!(
                "unsupported catalog version {}, expected {CATALOG_VERSION}",
                file.version
            )));
        }

        let mut indexes = self.indexes.write();
        for entry in file.indexes {
            let name = entry.info.name.clone();
            let index = IvfIndex::with_directory(entry.info, entry.directory)?;
            indexes.insert(name, Arc::new(index));
        }
        debug!(path = %self.path.display(), indexes = indexes.len(), "catalog loaded");
        Ok(())
    }

    /// Writes the catalog atomically (temp file, then rename).
    pub fn save(&self) -> IvfResult<()> {
        let file = CatalogFile {
            version: CATALOG_VERSION,
            indexes: self
                .indexes
                .read()
                .values()
                .map(|index| CatalogEntry {
                    info: index.info().clone(),
                    directory: index.directory().map(|d| (*d).clone()),
                })
                .collect(),
        };
        let json = serde_json::to_string_pretty(&file).map_err(|e| self.catalog_error(e))?;

        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| self.catalog_error(e))?;
        }
        let tmp = self.path.with_extension("json.tmp");
        std::fs::write(&tmp, json).map_err(|e| self.catalog_error(e))?;
        std::fs::rename(&tmp, &self.path).map_err(|e| self.catalog_error(e))?;
        Ok(())
    }

    /// Registers a new index. Names and `(table, field)` pairs are unique.
    pub fn create_index(&self, info: IndexInfo) -> IvfResult<Arc<IvfIndex>> {
        let mut indexes = self.indexes.write();
        let taken = indexes.contains_key(&info.name)
            || indexes
                .values()
                .any(|i| i.info().table == info.table && i.info().field == info.field);
        if taken {
            return Err(IvfError::IndexExists { name: info.name });
        }

        let name = info.name.clone();
        let index = Arc::new(IvfIndex::new(info)?);
        indexes.insert(name.clone(), Arc::clone(&index));
        drop(indexes);

        self.save()?;
        info!(index = %name, "index created");
        Ok(index)
    }

    /// Definition of the index on `table.field`.
    pub fn get_index_info(&self, table: &str, field: &str) -> IvfResult<IndexInfo> {
        self.index(table, field).map(|i| i.info().clone())
    }

    /// The index on `table.field`.
    pub fn index(&self, table: &str, field: &str) -> IvfResult<Arc<IvfIndex>> {
        self.indexes
            .read()
            .values()
            .find(|i| i.info().table == table && i.info().field == field)
            .cloned()
            .ok_or_else(|| IvfError::IndexNotFound {
                table: table.to_string(),
                field: field.to_string(),
            })
    }

    #[must_use]
    pub fn indexes(&self) -> Vec<Arc<IvfIndex>> {
        self.indexes.read().values().cloned().collect()
    }

    /// Removes the index on `table.field` and drops its tables.
    pub fn drop_index(&self, table: &str, field: &str, tx: &dyn Transaction) -> IvfResult<()> {
        let index = self.index(table, field)?;
        if let Some(directory) = index.directory() {
            for table in directory.all_tables() {
                tx.drop_table(table)?;
            }
        }
        self.indexes.write().remove(index.name());
        self.save()?;
        info!(index = %index.name(), "index dropped");
        Ok(())
    }

    /// Builds the index on `table.field` and records its new directory.
    ///
    /// The superseded generation is dropped only after the catalog is saved;
    /// if saving fails its tables stay, so `catalog.json` still resolves.
    pub fn build_index(
        &self,
        table: &str,
        field: &str,
        tx: &dyn Transaction,
    ) -> IvfResult<Arc<TableDirectory>> {
        let swap = self.index(table, field)?.swap_generation(tx)?;
        self.save()?;
        Ok(swap.retire(tx))
    }

    /// Builds a fresh index over `records` and installs it in place of the
    /// index on the same `table.field`, if any.
    ///
    /// The previous index keeps serving until the replacement is built and
    /// the catalog is saved. A failure at any step leaves it in place and
    /// drops whatever the replacement wrote.
    pub fn replace_index(
        &self,
        info: IndexInfo,
        records: Vec<DataRecord>,
        tx: &dyn Transaction,
    ) -> IvfResult<Arc<IvfIndex>> {
        let previous = self.index(&info.table, &info.field).ok();
        {
            let indexes = self.indexes.read();
            let clash = indexes.get(&info.name).is_some_and(|existing| {
                existing.info().table != info.table || existing.info().field != info.field
            });
            if clash {
                return Err(IvfError::IndexExists { name: info.name });
            }
        }

        let replacement = Arc::new(match &previous {
            Some(previous) => IvfIndex::superseding(info, previous)?,
            None => IvfIndex::new(info)?,
        });
        for record in records {
            replacement.insert(record, tx)?;
        }
        replacement.build_index(tx)?;

        let name = replacement.name().to_string();
        {
            let mut indexes = self.indexes.write();
            if let Some(previous) = &previous {
                indexes.remove(previous.name());
            }
            indexes.insert(name.clone(), Arc::clone(&replacement));
        }
        if let Err(e) = self.save() {
            let mut indexes = self.indexes.write();
            indexes.remove(&name);
            if let Some(previous) = &previous {
                indexes.insert(previous.name().to_string(), Arc::clone(previous));
            }
            drop(indexes);
            replacement.drop_served_tables(tx);
            return Err(e);
        }

        if let Some(previous) = previous {
            previous.drop_served_tables(tx);
        }
        info!(index = %name, "index replaced");
        Ok(replacement)
    }

    /// Opens a read scan on the index of `table.field`.
    pub fn open_scan<'tx>(
        &self,
        table: &str,
        field: &str,
        range: &SearchRange,
        tx: &'tx dyn Transaction,
    ) -> IvfResult<IndexScanner<'tx>> {
        self.index(table, field)?.open_scan(range, tx)
    }

    pub fn preload(
        &self,
        table: &str,
        field: &str,
        tx: &dyn Transaction,
    ) -> IvfResult<PreloadReport> {
        self.index(table, field)?.preload(tx)
    }
}
