//! Row layout of centroid and postings tables.
//!
//! - centroid tables: `c_id: int, vector`
//! - postings tables: `i_id: int, vector, block: bigint, slot: int`
//!
//! `i_id` holds the level-2 id of the leaf that owns the row. Vectors are
//! stored bit-exact.

use crate::error::IvfResult;
use crate::storage::{Constant, FieldType, RecordFile, Schema, StorageError};
use crate::vector::{
    Centroid, CentroidId, DataRecord, RecordPointer, Vector, VectorDimension,
};

pub const FIELD_CENTROID_ID: &str = "c_id";
pub const FIELD_VECTOR: &str = "vector";
pub const FIELD_LEAF_ID: &str = "i_id";
pub const FIELD_BLOCK: &str = "block";
pub const FIELD_SLOT: &str = "slot";

/// Maps domain records to table rows for one vector dimension.
#[derive(Debug, Clone)]
pub struct RecordCodec {
    dimension: VectorDimension,
    centroid_schema: Schema,
    postings_schema: Schema,
}

impl RecordCodec {
    #[must_use]
    pub fn new(dimension: VectorDimension) -> Self {
        let vector = FieldType::Vector(dimension.get());
        Self {
            dimension,
            centroid_schema: Schema::new()
                .with_field(FIELD_CENTROID_ID, FieldType::Int)
                .with_field(FIELD_VECTOR, vector),
            postings_schema: Schema::new()
                .with_field(FIELD_LEAF_ID, FieldType::Int)
                .with_field(FIELD_VECTOR, vector)
                .with_field(FIELD_BLOCK, FieldType::BigInt)
                .with_field(FIELD_SLOT, FieldType::Int),
        }
    }

    #[must_use]
    pub fn dimension(&self) -> VectorDimension {
        self.dimension
    }

    #[must_use]
    pub fn centroid_schema(&self) -> &Schema {
        &self.centroid_schema
    }

    #[must_use]
    pub fn postings_schema(&self) -> &Schema {
        &self.postings_schema
    }

    /// Appends a centroid row.
    pub fn write_centroid(&self, file: &mut dyn RecordFile, centroid: &Centroid) -> IvfResult<()> {
        self.dimension.validate_vector(centroid.vector.as_slice())?;
        file.insert()?;
        file.set_val(FIELD_CENTROID_ID, Constant::Int(centroid.id.to_stored()))?;
        file.set_val(FIELD_VECTOR, Constant::Vector(centroid.vector.clone()))?;
        Ok(())
    }

    /// Decodes the centroid row the file is positioned on.
    pub fn read_centroid(&self, file: &dyn RecordFile) -> IvfResult<Centroid> {
        let raw = int_field(file, FIELD_CENTROID_ID)?;
        let id = CentroidId::from_stored(raw).ok_or_else(|| StorageError::InvalidFieldValue {
            field: FIELD_CENTROID_ID.to_string(),
            reason: format!("negative centroid id {raw}"),
        })?;
        Ok(Centroid::new(id, self.read_vector(file)?))
    }

    /// Appends a postings row owned by leaf `level2`.
    pub fn write_posting(
        &self,
        file: &mut dyn RecordFile,
        level2: CentroidId,
        record: &DataRecord,
    ) -> IvfResult<()> {
        self.dimension.validate_vector(record.vector.as_slice())?;
        let block =
            i64::try_from(record.payload.block).map_err(|_| StorageError::InvalidFieldValue {
                field: FIELD_BLOCK.to_string(),
                reason: format!("block number {} exceeds bigint", record.payload.block),
            })?;

        file.insert()?;
        file.set_val(FIELD_LEAF_ID, Constant::Int(level2.to_stored()))?;
        file.set_val(FIELD_VECTOR, Constant::Vector(record.vector.clone()))?;
        file.set_val(FIELD_BLOCK, Constant::BigInt(block))?;
        file.set_val(FIELD_SLOT, Constant::Int(record.payload.slot))?;
        Ok(())
    }

    /// Back-pointer of the current postings row.
    pub fn read_payload(&self, file: &dyn RecordFile) -> IvfResult<RecordPointer> {
        let block = match file.get_val(FIELD_BLOCK)? {
            Constant::BigInt(v) => u64::try_from(v).map_err(|_| StorageError::InvalidFieldValue {
                field: FIELD_BLOCK.to_string(),
                reason: format!("negative block number {v}"),
            })?,
            other => return Err(type_error(FIELD_BLOCK, &other).into()),
        };
        let slot = int_field(file, FIELD_SLOT)?;
        Ok(RecordPointer::new(block, slot))
    }

    /// Vector of the current row, in either table kind.
    pub fn read_vector(&self, file: &dyn RecordFile) -> IvfResult<Vector> {
        match file.get_val(FIELD_VECTOR)? {
            Constant::Vector(v) => {
                self.dimension.validate_vector(v.as_slice())?;
                Ok(v)
            }
            other => Err(type_error(FIELD_VECTOR, &other).into()),
        }
    }

    pub fn read_posting(&self, file: &dyn RecordFile) -> IvfResult<DataRecord> {
        Ok(DataRecord::new(
            self.read_vector(file)?,
            self.read_payload(file)?,
        ))
    }
}

fn int_field(file: &dyn RecordFile, field: &str) -> IvfResult<i32> {
    match file.get_val(field)? {
        Constant::Int(v) => Ok(v),
        other => Err(type_error(field, &other).into()),
    }
}

fn type_error(field: &str, value: &Constant) -> StorageError {
    StorageError::InvalidFieldValue {
        field: field.to_string(),
        reason: format!("unexpected value {value:?}"),
    }
}
