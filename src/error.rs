//! Error types for the IVF index
//!
//! This module provides structured error types using thiserror for better
//! error handling and actionable error messages.

use std::path::PathBuf;
use thiserror::Error;

use crate::storage::StorageError;
use crate::vector::{ClusteringError, VectorError};

/// Main error type for index operations
#[derive(Error, Debug)]
pub enum IvfError {
    /// Training errors
    #[error(
        "Invalid cluster count: {k} for {available} records\nSuggestion: Lower the cluster count or insert more records"
    )]
    InvalidClusterCount { k: usize, available: usize },

    #[error("Cannot build index over an empty dataset\nSuggestion: Insert records before building")]
    EmptyDataset,

    /// Index state errors
    #[error("Index '{index}' has not been built yet")]
    IndexNotBuilt { index: String },

    #[error("Unsupported query shape: {reason}. Only single-value vector lookups are served")]
    UnsupportedQueryShape { reason: String },

    #[error("Scan is not positioned. Call open() and advance() first")]
    ScanNotPositioned,

    #[error("Vector dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },

    #[error("Invalid vector: {0}")]
    InvalidVector(VectorError),

    /// Storage errors, propagated from the record-file layer without retry
    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    /// Catalog errors
    #[error("No index on {table}.{field}")]
    IndexNotFound { table: String, field: String },

    #[error("An index named '{name}' already exists")]
    IndexExists { name: String },

    #[error("Failed to persist catalog '{path}': {reason}")]
    Catalog { path: PathBuf, reason: String },

    /// Raised by the flat-probe aggregation path only
    #[error("No matches found across {probed} probed clusters")]
    NoMatches { probed: usize },

    /// Configuration errors
    #[error("Invalid configuration: {reason}")]
    Config { reason: String },
}

impl IvfError {
    /// Get a stable status code for this error type.
    ///
    /// Returns a string identifier that can be used in JSON responses
    /// for programmatic error handling.
    pub fn status_code(&self) -> String {
        match self {
            Self::InvalidClusterCount { .. } => "INVALID_CLUSTER_COUNT",
            Self::EmptyDataset => "EMPTY_DATASET",
            Self::IndexNotBuilt { .. } => "INDEX_NOT_BUILT",
            Self::UnsupportedQueryShape { .. } => "UNSUPPORTED_QUERY_SHAPE",
            Self::ScanNotPositioned => "SCAN_NOT_POSITIONED",
            Self::DimensionMismatch { .. } => "DIMENSION_MISMATCH",
            Self::InvalidVector(_) => "INVALID_VECTOR",
            Self::Storage(_) => "STORAGE_IO_ERROR",
            Self::IndexNotFound { .. } => "INDEX_NOT_FOUND",
            Self::IndexExists { .. } => "INDEX_EXISTS",
            Self::Catalog { .. } => "CATALOG_ERROR",
            Self::NoMatches { .. } => "NO_MATCHES",
            Self::Config { .. } => "CONFIG_ERROR",
        }
        .to_string()
    }

    /// Get recovery suggestions for this error
    pub fn recovery_suggestions(&self) -> Vec<&'static str> {
        match self {
            Self::IndexNotBuilt { .. } => vec![
                "Run 'ivfdb build <input>' to train and materialize the index",
                "Queries are only served after a successful build",
            ],
            Self::InvalidClusterCount { .. } => vec![
                "Lower index.level1_clusters in .ivfdb/settings.toml",
                "Each level-1 cluster needs at least one record",
            ],
            Self::Storage(_) => vec![
                "Check disk space and permissions in the data directory",
                "A failed build keeps the previous index; rerun the build",
            ],
            Self::IndexNotFound { .. } => vec![
                "Run 'ivfdb stats' to list the indexes in the catalog",
            ],
            Self::NoMatches { .. } => vec![
                "Increase the number of probed clusters with --flat",
            ],
            Self::Config { .. } => vec![
                "Run 'ivfdb init --force' to regenerate the configuration",
            ],
            _ => vec![],
        }
    }
}

impl From<VectorError> for IvfError {
    fn from(err: VectorError) -> Self {
        match err {
            VectorError::DimensionMismatch { expected, actual } => {
                Self::DimensionMismatch { expected, actual }
            }
            other => Self::InvalidVector(other),
        }
    }
}

impl From<ClusteringError> for IvfError {
    fn from(err: ClusteringError) -> Self {
        match err {
            ClusteringError::EmptyDataset => Self::EmptyDataset,
            ClusteringError::InvalidClusterCount { k, available } => {
                Self::InvalidClusterCount { k, available }
            }
            ClusteringError::Vector(e) => e.into(),
        }
    }
}

/// Result type alias for index operations
pub type IvfResult<T> = Result<T, IvfError>;
