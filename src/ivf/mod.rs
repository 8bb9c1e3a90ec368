//! Hierarchical IVF index over the record-file storage layer.
//!
//! # Architecture
//! - [`HierarchicalBuilder`] trains two K-means levels and writes one
//!   level-1 centroid table, one level-2 centroid table per partition and one
//!   postings table per non-empty leaf, all through [`RecordCodec`].
//! - [`IndexScanner`] answers single-value lookups by walking the postings of
//!   the `K` nearest leaves as one row sequence.
//! - [`MemoryPreloader`] pins centroid tables into the page cache.
//! - [`IvfIndex`] owns the staging buffer and the served [`TableDirectory`];
//!   [`IndexCatalog`] resolves indexes by table and field.

mod builder;
mod catalog;
mod codec;
mod directory;
mod index;
mod preload;
mod probe;
mod scan;

pub use builder::{HierarchicalBuilder, HierarchicalLayout, Partition};
pub use catalog::{CATALOG_FILE, IndexCatalog};
pub use codec::{
    FIELD_BLOCK, FIELD_CENTROID_ID, FIELD_LEAF_ID, FIELD_SLOT, FIELD_VECTOR, RecordCodec,
};
pub use directory::{LeafEntry, TableDirectory};
pub use index::{GenerationSwap, IndexInfo, IvfIndex};
pub use preload::{MemoryPreloader, PreloadReport};
pub use probe::{FlatProbe, Neighbor};
pub use scan::{IndexScanner, ScanMode, ScanState, SearchKey, SearchRange};
