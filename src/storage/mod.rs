//! Record-file storage contract and a local file-backed implementation.
//!
//! The index core only talks to storage through [`Transaction`] and
//! [`RecordFile`]: open a named table with a schema, walk its rows, read and
//! write fields, insert and tombstone rows, query a file's size in blocks and
//! pin blocks into the buffer cache. Page eviction, locking and logging stay
//! behind these traits.
//!
//! [`LocalStorage`] implements the contract over one fixed-slot file per
//! table. It is what the CLI and the tests run against.

mod error;
mod local;
mod page_cache;
mod record_file;

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::vector::Vector;

pub use error::{StorageError, StorageResult};
pub use local::{LocalStorage, LocalTransaction};
pub use page_cache::PageCache;
pub use record_file::{DEFAULT_BLOCK_SIZE, PagedRecordFile};

/// Suffix of every table file.
pub const TABLE_FILE_SUFFIX: &str = ".tbl";

/// Name of a physical table.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TableName(String);

impl TableName {
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Name of the file backing this table.
    #[must_use]
    pub fn file_name(&self) -> String {
        format!("{}{TABLE_FILE_SUFFIX}", self.0)
    }
}

impl fmt::Display for TableName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A block of a storage file.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct BlockId {
    pub file: String,
    pub number: u64,
}

impl BlockId {
    #[must_use]
    pub fn new(file: impl Into<String>, number: u64) -> Self {
        Self {
            file: file.into(),
            number,
        }
    }
}

impl fmt::Display for BlockId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}#{}", self.file, self.number)
    }
}

/// Column types understood by the record layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldType {
    Int,
    BigInt,
    /// Fixed-dimension `f32` vector.
    Vector(usize),
}

impl FieldType {
    /// Encoded width in bytes.
    #[must_use]
    pub const fn byte_len(&self) -> usize {
        match self {
            Self::Int => 4,
            Self::BigInt => 8,
            Self::Vector(dimension) => *dimension * 4,
        }
    }
}

/// Ordered list of named, typed fields.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Schema {
    fields: Vec<(String, FieldType)>,
}

impl Schema {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_field(mut self, name: &str, field_type: FieldType) -> Self {
        self.fields.push((name.to_string(), field_type));
        self
    }

    pub fn fields(&self) -> impl Iterator<Item = (&str, FieldType)> {
        self.fields.iter().map(|(n, t)| (n.as_str(), *t))
    }

    /// Byte offset and type of a field within an encoded record.
    #[must_use]
    pub fn locate(&self, name: &str) -> Option<(usize, FieldType)> {
        let mut offset = 0;
        for (field, field_type) in &self.fields {
            if field == name {
                return Some((offset, *field_type));
            }
            offset += field_type.byte_len();
        }
        None
    }

    /// Encoded width of one record.
    #[must_use]
    pub fn record_size(&self) -> usize {
        self.fields.iter().map(|(_, t)| t.byte_len()).sum()
    }
}

/// A field value.
#[derive(Debug, Clone, PartialEq)]
pub enum Constant {
    Int(i32),
    BigInt(i64),
    Vector(Vector),
}

impl Constant {
    #[must_use]
    pub fn as_int(&self) -> Option<i32> {
        match self {
            Self::Int(v) => Some(*v),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_bigint(&self) -> Option<i64> {
        match self {
            Self::BigInt(v) => Some(*v),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_vector(&self) -> Option<&Vector> {
        match self {
            Self::Vector(v) => Some(v),
            _ => None,
        }
    }

    /// Whether this value can be stored in a column of `field_type`.
    #[must_use]
    pub fn fits(&self, field_type: FieldType) -> bool {
        match (self, field_type) {
            (Self::Int(_), FieldType::Int) | (Self::BigInt(_), FieldType::BigInt) => true,
            (Self::Vector(v), FieldType::Vector(dimension)) => v.dimension() == dimension,
            _ => false,
        }
    }
}

/// Cursor over the rows of one table.
///
/// Follows the usual record-file protocol: `before_first`, then `next` until
/// it returns `false`; field access refers to the row `next` stopped on.
pub trait RecordFile: Send {
    fn before_first(&mut self) -> StorageResult<()>;

    /// Moves to the next live row. Tombstoned slots are skipped.
    fn next(&mut self) -> StorageResult<bool>;

    fn get_val(&self, field: &str) -> StorageResult<Constant>;

    fn set_val(&mut self, field: &str, value: Constant) -> StorageResult<()>;

    /// Claims a free slot and makes it the current row.
    fn insert(&mut self) -> StorageResult<()>;

    /// Tombstones the current row.
    fn delete(&mut self) -> StorageResult<()>;

    /// Releases the underlying file. Idempotent.
    fn close(&mut self);

    /// Size of the file in blocks.
    fn file_size(&self) -> StorageResult<u64>;
}

/// The transactional context the index runs under.
///
/// Implementations provide whatever isolation they guarantee per call; the
/// index adds no locking of its own.
pub trait Transaction: Send + Sync {
    /// Opens a table. Opening a missing table for write creates and formats
    /// it; opening it read-only fails with [`StorageError::TableNotFound`].
    fn open_table(
        &self,
        name: &TableName,
        schema: &Schema,
        for_write: bool,
    ) -> StorageResult<Box<dyn RecordFile>>;

    /// Creates or truncates a table to an empty header.
    fn format_table(&self, name: &TableName, schema: &Schema) -> StorageResult<()>;

    fn table_exists(&self, name: &TableName) -> StorageResult<bool>;

    /// Removes a table. Removing a missing table is not an error.
    fn drop_table(&self, name: &TableName) -> StorageResult<()>;

    /// Registers read intent on a file before its size is inspected.
    fn read_file(&self, file_name: &str);

    /// Physical size of a file in blocks; zero when the file is absent.
    fn file_size(&self, file_name: &str) -> StorageResult<u64>;

    /// Pins a block into the buffer cache.
    fn pin(&self, block: &BlockId) -> StorageResult<()>;

    /// Whether writes under this context are logged.
    fn logging_enabled(&self) -> bool;
}
