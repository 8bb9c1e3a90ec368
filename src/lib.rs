/// The main library module for ivfdb
pub mod config;
pub mod error;
pub mod ivf;
pub mod storage;
pub mod vector;

// Explicit exports for better API clarity
pub use config::{IndexConfig, Settings, StorageConfig};
pub use error::{IvfError, IvfResult};
pub use ivf::{
    FlatProbe, GenerationSwap, HierarchicalBuilder, HierarchicalLayout, IndexCatalog, IndexInfo,
    IndexScanner, IvfIndex, MemoryPreloader, Neighbor, PreloadReport, RecordCodec, ScanMode,
    ScanState, SearchKey, SearchRange, TableDirectory,
};
pub use storage::{LocalStorage, LocalTransaction, RecordFile, StorageError, StorageResult, Transaction};
pub use vector::{
    BoundedMaxHeap, Centroid, CentroidId, DataRecord, DistanceScorer, KMeans, KMeansResult, LeafId,
    RecordPointer, Vector, VectorDimension,
};
