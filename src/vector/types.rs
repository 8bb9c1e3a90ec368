//! Type-safe wrappers and core types for the vector index.
//!
//! Vectors are immutable once created and cheap to clone (shared buffer), so
//! records can move between the staging buffer, the trainer and the postings
//! writer without copying embedding data.

use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Default embedding dimension (SIFT-style descriptors).
pub const DEFAULT_DIMENSION: usize = 128;

/// An immutable, fixed-dimension embedding.
#[derive(Clone, PartialEq)]
pub struct Vector(Arc<[f32]>);

impl Vector {
    /// Creates a vector that owns the given values.
    #[must_use]
    pub fn new(values: Vec<f32>) -> Self {
        Self(values.into())
    }

    /// Creates a vector by copying a slice.
    #[must_use]
    pub fn from_slice(values: &[f32]) -> Self {
        Self(Arc::from(values))
    }

    /// A zero vector of the given dimension.
    #[must_use]
    pub fn zeros(dimension: usize) -> Self {
        Self::new(vec![0.0; dimension])
    }

    #[must_use]
    pub fn as_slice(&self) -> &[f32] {
        &self.0
    }

    #[must_use]
    pub fn dimension(&self) -> usize {
        self.0.len()
    }

    /// Encodes the vector as little-endian `f32` bytes.
    ///
    /// The encoding is bit-exact, so a write/read round trip never changes the
    /// stored values.
    #[must_use]
    pub fn to_le_bytes(&self) -> Vec<u8> {
        self.0.iter().flat_map(|v| v.to_le_bytes()).collect()
    }

    /// Decodes a vector from little-endian `f32` bytes.
    pub fn from_le_bytes(bytes: &[u8]) -> Result<Self, VectorError> {
        if bytes.len() % 4 != 0 {
            return Err(VectorError::MalformedBytes { len: bytes.len() });
        }
        let values = bytes
            .chunks_exact(4)
            .map(|b| f32::from_le_bytes([b[0], b[1], b[2], b[3]]))
            .collect();
        Ok(Self::new(values))
    }
}

impl From<Vec<f32>> for Vector {
    fn from(values: Vec<f32>) -> Self {
        Self::new(values)
    }
}

impl fmt::Debug for Vector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        const PREVIEW: usize = 4;
        write!(f, "Vector[{}](", self.dimension())?;
        for (i, v) in self.0.iter().take(PREVIEW).enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{v}")?;
        }
        if self.dimension() > PREVIEW {
            write!(f, ", ..")?;
        }
        write!(f, ")")
    }
}

impl Serialize for Vector {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.as_slice().serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for Vector {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        Vec::<f32>::deserialize(deserializer).map(Self::new)
    }
}

/// Identifier of a centroid within one clustering level.
///
/// Ordinals start at zero and match the position of the centroid in the
/// trainer output, so they double as cluster indexes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct CentroidId(u32);

impl CentroidId {
    #[must_use]
    pub const fn new(ordinal: u32) -> Self {
        Self(ordinal)
    }

    #[must_use]
    pub const fn get(&self) -> u32 {
        self.0
    }

    #[must_use]
    pub const fn index(&self) -> usize {
        self.0 as usize
    }

    /// Converts a stored integer column back into an id.
    ///
    /// Returns `None` for negative values, which never come out of a build.
    #[must_use]
    pub fn from_stored(value: i32) -> Option<Self> {
        u32::try_from(value).ok().map(Self)
    }

    /// The value written to the `c_id` integer column.
    #[must_use]
    pub fn to_stored(&self) -> i32 {
        self.0 as i32
    }
}

impl fmt::Display for CentroidId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A leaf cluster, addressed by its level-1 parent and its level-2 ordinal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct LeafId {
    pub level1: CentroidId,
    pub level2: CentroidId,
}

impl LeafId {
    #[must_use]
    pub const fn new(level1: CentroidId, level2: CentroidId) -> Self {
        Self { level1, level2 }
    }
}

impl fmt::Display for LeafId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}_{}", self.level1, self.level2)
    }
}

/// Back-pointer to the owning row of the base table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct RecordPointer {
    pub block: u64,
    pub slot: i32,
}

impl RecordPointer {
    #[must_use]
    pub const fn new(block: u64, slot: i32) -> Self {
        Self { block, slot }
    }
}

impl fmt::Display for RecordPointer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}, {}]", self.block, self.slot)
    }
}

/// A vector together with the base-table row it came from.
#[derive(Debug, Clone, PartialEq)]
pub struct DataRecord {
    pub vector: Vector,
    pub payload: RecordPointer,
}

impl DataRecord {
    #[must_use]
    pub fn new(vector: Vector, payload: RecordPointer) -> Self {
        Self { vector, payload }
    }
}

/// Representative vector of one cluster.
#[derive(Debug, Clone, PartialEq)]
pub struct Centroid {
    pub id: CentroidId,
    pub vector: Vector,
}

impl Centroid {
    #[must_use]
    pub fn new(id: CentroidId, vector: Vector) -> Self {
        Self { id, vector }
    }
}

/// Type-safe wrapper for vector dimensions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct VectorDimension(usize);

impl VectorDimension {
    /// Creates a new `VectorDimension` with validation.
    ///
    /// Returns an error if the dimension is zero.
    pub fn new(dim: usize) -> Result<Self, VectorError> {
        if dim == 0 {
            return Err(VectorError::InvalidDimension {
                dimension: 0,
                reason: "Vector dimension cannot be zero",
            });
        }
        Ok(Self(dim))
    }

    #[must_use]
    pub const fn get(&self) -> usize {
        self.0
    }

    /// Validates that a vector has the expected dimension.
    pub fn validate_vector(&self, vector: &[f32]) -> Result<(), VectorError> {
        if vector.len() != self.0 {
            return Err(VectorError::DimensionMismatch {
                expected: self.0,
                actual: vector.len(),
            });
        }
        Ok(())
    }
}

/// Errors that can occur during vector operations.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum VectorError {
    #[error(
        "Vector dimension mismatch: expected {expected}, got {actual}\nSuggestion: Ensure every vector of an index has the index dimension"
    )]
    DimensionMismatch { expected: usize, actual: usize },

    #[error("Invalid vector dimension: {dimension}\nReason: {reason}")]
    InvalidDimension {
        dimension: usize,
        reason: &'static str,
    },

    #[error(
        "Malformed vector bytes: length {len} is not a multiple of 4\nSuggestion: Check that the stored column was written as f32 values"
    )]
    MalformedBytes { len: usize },
}
