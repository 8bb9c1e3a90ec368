//! Explicit map from cluster ids to physical tables.
//!
//! A build writes one generation of tables named
//! `<index>_g<generation>_{l1 | l2_<level1> | leaf_<level1>_<level2>}`.
//! The directory of the generation that is currently served is swapped in as
//! a whole, so a query never sees a half-written table set.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::storage::TableName;
use crate::vector::{CentroidId, LeafId};

/// Physical tables of one built index generation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TableDirectory {
    pub index: String,
    pub generation: u64,
    pub dimension: usize,
    pub level1: TableName,
    #[serde(with = "entries")]
    pub level2: BTreeMap<CentroidId, TableName>,
    #[serde(with = "entries")]
    pub leaves: BTreeMap<LeafId, LeafEntry>,
    /// Records clustered by the build.
    pub record_count: usize,
}

/// Postings table of one leaf and the rows it received at build time.
///
/// Leaves that were empty at build time have no table yet; it is created by
/// the first insert routed to them.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LeafEntry {
    pub table: TableName,
    pub rows: usize,
}

impl TableDirectory {
    #[must_use]
    pub fn new(index: &str, generation: u64, dimension: usize) -> Self {
        Self {
            index: index.to_string(),
            generation,
            dimension,
            level1: TableName::new(format!("{}_l1", Self::prefix(index, generation))),
            level2: BTreeMap::new(),
            leaves: BTreeMap::new(),
            record_count: 0,
        }
    }

    fn prefix(index: &str, generation: u64) -> String {
        format!("{index}_g{generation}")
    }

    /// Registers the level-2 centroid table of a partition.
    pub fn add_partition(&mut self, level1: CentroidId) -> TableName {
        let name = TableName::new(format!(
            "{}_l2_{level1}",
            Self::prefix(&self.index, self.generation)
        ));
        self.level2.insert(level1, name.clone());
        name
    }

    /// Registers a leaf and returns its postings table name.
    pub fn add_leaf(&mut self, leaf: LeafId, rows: usize) -> TableName {
        let table = TableName::new(format!(
            "{}_leaf_{leaf}",
            Self::prefix(&self.index, self.generation)
        ));
        self.leaves.insert(
            leaf,
            LeafEntry {
                table: table.clone(),
                rows,
            },
        );
        self.record_count += rows;
        table
    }

    #[must_use]
    pub fn level2_table(&self, level1: CentroidId) -> Option<&TableName> {
        self.level2.get(&level1)
    }

    #[must_use]
    pub fn leaf_table(&self, leaf: LeafId) -> Option<&TableName> {
        self.leaves.get(&leaf).map(|e| &e.table)
    }

    /// Centroid tables, level 1 first.
    pub fn centroid_tables(&self) -> impl Iterator<Item = &TableName> {
        std::iter::once(&self.level1).chain(self.level2.values())
    }

    /// Every table the generation may own.
    pub fn all_tables(&self) -> impl Iterator<Item = &TableName> {
        self.centroid_tables()
            .chain(self.leaves.values().map(|e| &e.table))
    }

    /// Leaves that received rows at build time.
    #[must_use]
    pub fn populated_leaves(&self) -> usize {
        self.leaves.values().filter(|e| e.rows > 0).count()
    }
}

/// Serializes ordered maps as entry lists so keys need not be strings.
mod entries {
    use std::collections::BTreeMap;

    use serde::{Deserialize, Deserializer, Serialize, Serializer};

    pub fn serialize<S, K, V>(map: &BTreeMap<K, V>, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
        K: Serialize,
        V: Serialize,
    {
        serializer.collect_seq(map.iter())
    }

    pub fn deserialize<'de, D, K, V>(deserializer: D) -> Result<BTreeMap<K, V>, D::Error>
    where
        D: Deserializer<'de>,
        K: Deserialize<'de> + Ord,
        V: Deserialize<'de>,
    {
        Vec::<(K, V)>::deserialize(deserializer).map(|v| v.into_iter().collect())
    }
}
