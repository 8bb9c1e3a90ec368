use thiserror::Error;

use crate::vector::VectorError;

#[derive(Error, Debug)]
pub enum StorageError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Table '{0}' does not exist")]
    TableNotFound(String),

    #[error("Table '{table}' has no field '{field}'")]
    UnknownField { table: String, field: String },

    #[error("Invalid field value for {field}: {reason}")]
    InvalidFieldValue { field: String, reason: String },

    #[error("Invalid storage format in '{file}': {reason}")]
    InvalidFormat { file: String, reason: String },

    #[error(
        "Record of {record_size} bytes does not fit a {block_size}-byte block\nSuggestion: Increase storage.block_size or reduce the vector dimension"
    )]
    RecordTooLarge {
        record_size: usize,
        block_size: usize,
    },

    #[error("Table '{0}' was opened read-only")]
    ReadOnly(String),

    #[error("No current record in '{0}'. Call next() first")]
    NoCurrentRecord(String),

    #[error("Record file '{0}' is closed")]
    Closed(String),

    #[error("Page cache is full ({capacity} pages)")]
    CacheFull { capacity: usize },

    #[error("Vector error: {0}")]
    Vector(#[from] VectorError),
}

pub type StorageResult<T> = Result<T, StorageError>;
