//! Fixed-slot record files.
//!
//! # Storage Format
//!
//! A table is a single file split into equal blocks:
//! - Block 0 (header): magic, version, block size, record size
//! - Blocks 1..: slots of `1 + record_size` bytes, the first byte being the
//!   in-use flag
//!
//! Deleting a row clears its flag; the slot is reused by a later insert.
//! Reads go through a memory map that is dropped after every write and
//! re-established lazily on the next read.

use std::fs::{File, OpenOptions};
use std::io::{self, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use memmap2::{Mmap, MmapOptions};

use super::{
    BlockId, Constant, FieldType, PageCache, RecordFile, Schema, StorageError, StorageResult,
    TableName,
};
use crate::vector::Vector;

/// Default block size in bytes.
pub const DEFAULT_BLOCK_SIZE: usize = 4096;

const MAGIC_BYTES: &[u8; 4] = b"IVFT";
const FORMAT_VERSION: u32 = 1;
const HEADER_LEN: usize = 16;

const SLOT_EMPTY: u8 = 0;
const SLOT_USED: u8 = 1;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
struct SlotPos {
    block: u64,
    slot: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Cursor {
    BeforeFirst,
    At(SlotPos),
    AfterLast,
}

/// A record file over one table file.
#[derive(Debug)]
pub struct PagedRecordFile {
    table: TableName,
    path: PathBuf,
    schema: Schema,
    block_size: usize,
    slot_size: usize,
    slots_per_block: usize,
    /// Write handle; `None` for read-only files.
    writer: Option<File>,
    mmap: Option<Mmap>,
    cursor: Cursor,
    /// Bytes of the current row, without the flag.
    current: Option<Vec<u8>>,
    /// No free slot exists before this position.
    free_from: SlotPos,
    cache: Arc<PageCache>,
    closed: bool,
}

impl PagedRecordFile {
    /// Creates or truncates the file for `table` to an empty header block.
    pub fn format(
        dir: &Path,
        table: &TableName,
        schema: &Schema,
        block_size: usize,
    ) -> StorageResult<()> {
        check_layout(schema, block_size)?;
        std::fs::create_dir_all(dir)?;

        let path = dir.join(table.file_name());
        let mut file = File::create(&path)?;
        let mut header = vec![0u8; block_size];
        header[0..4].copy_from_slice(MAGIC_BYTES);
        header[4..8].copy_from_slice(&FORMAT_VERSION.to_le_bytes());
        header[8..12].copy_from_slice(&(block_size as u32).to_le_bytes());
        header[12..16].copy_from_slice(&(schema.record_size() as u32).to_le_bytes());
        file.write_all(&header)?;
        file.flush()?;
        Ok(())
    }

    /// Opens an existing table file.
    pub fn open(
        dir: &Path,
        table: &TableName,
        schema: &Schema,
        block_size: usize,
        writable: bool,
        cache: Arc<PageCache>,
    ) -> StorageResult<Self> {
        check_layout(schema, block_size)?;
        let path = dir.join(table.file_name());
        if !path.exists() {
            return Err(StorageError::TableNotFound(table.to_string()));
        }

        let writer = if writable {
            Some(OpenOptions::new().read(true).write(true).open(&path)?)
        } else {
            None
        };

        let slot_size = 1 + schema.record_size();
        let mut file = Self {
            table: table.clone(),
            path,
            schema: schema.clone(),
            block_size,
            slot_size,
            slots_per_block: block_size / slot_size,
            writer,
            mmap: None,
            cursor: Cursor::BeforeFirst,
            current: None,
            free_from: SlotPos { block: 1, slot: 0 },
            cache,
            closed: false,
        };
        file.ensure_mapped()?;
        Ok(file)
    }

    #[must_use]
    pub fn table(&self) -> &TableName {
        &self.table
    }

    #[must_use]
    pub fn schema(&self) -> &Schema {
        &self.schema
    }

    fn ensure_open(&self) -> StorageResult<()> {
        if self.closed {
            return Err(StorageError::Closed(self.table.to_string()));
        }
        Ok(())
    }

    fn ensure_mapped(&mut self) -> StorageResult<()> {
        if self.mmap.is_none() {
            let file = File::open(&self.path)?;
            let mmap = unsafe { MmapOptions::new().map(&file)? };
            self.validate_header(&mmap)?;
            self.mmap = Some(mmap);
        }
        Ok(())
    }

    fn invalidate_cache(&mut self, block: u64) {
        self.mmap = None;
        self.cache
            .invalidate(&BlockId::new(self.table.file_name(), block));
    }

    fn validate_header(&self, mmap: &Mmap) -> StorageResult<()> {
        let invalid = |reason: String| StorageError::InvalidFormat {
            file: self.table.file_name(),
            reason,
        };

        if mmap.len() < HEADER_LEN {
            return Err(invalid("file too small to contain header".to_string()));
        }
        if &mmap[0..4] != MAGIC_BYTES {
            return Err(invalid("invalid magic bytes".to_string()));
        }
        let version = read_u32(&mmap[4..8]);
        if version != FORMAT_VERSION {
            return Err(invalid(format!(
                "unsupported version {version}, expected {FORMAT_VERSION}"
            )));
        }
        let block_size = read_u32(&mmap[8..12]) as usize;
        if block_size != self.block_size {
            return Err(invalid(format!(
                "block size {block_size} does not match configured {}",
                self.block_size
            )));
        }
        let record_size = read_u32(&mmap[12..16]) as usize;
        if record_size != self.schema.record_size() {
            return Err(invalid(format!(
                "record size {record_size} does not match schema ({})",
                self.schema.record_size()
            )));
        }
        Ok(())
    }

    fn slot_offset(&self, pos: SlotPos) -> u64 {
        pos.block * self.block_size as u64 + (pos.slot * self.slot_size) as u64
    }

    fn next_pos(&self, pos: SlotPos) -> SlotPos {
        if pos.slot + 1 < self.slots_per_block {
            SlotPos {
                block: pos.block,
                slot: pos.slot + 1,
            }
        } else {
            SlotPos {
                block: pos.block + 1,
                slot: 0,
            }
        }
    }

    fn writer(&mut self) -> StorageResult<&mut File> {
        let table = self.table.to_string();
        self.writer.as_mut().ok_or(StorageError::ReadOnly(table))
    }

    fn write_at(&mut self, offset: u64, bytes: &[u8]) -> StorageResult<()> {
        let writer = self.writer()?;
        writer.seek(SeekFrom::Start(offset))?;
        writer.write_all(bytes)?;
        Ok(())
    }

    fn current_pos(&self) -> StorageResult<SlotPos> {
        match (self.cursor, &self.current) {
            (Cursor::At(pos), Some(_)) => Ok(pos),
            _ => Err(StorageError::NoCurrentRecord(self.table.to_string())),
        }
    }

    /// Finds the first free slot at or after `free_from`, growing the file by
    /// one block when every slot is taken.
    fn claim_free_slot(&mut self) -> StorageResult<SlotPos> {
        let block_size = self.block_size as u64;
        let mut pos = self.free_from;
        let mut flag = [0u8; 1];
        loop {
            let offset = self.slot_offset(pos);
            let writer = self.writer()?;
            let len = writer.metadata()?.len();
            if pos.block * block_size >= len {
                writer.set_len(len + block_size)?;
                return Ok(pos);
            }
            writer.seek(SeekFrom::Start(offset))?;
            writer.read_exact(&mut flag)?;
            if flag[0] == SLOT_EMPTY {
                return Ok(pos);
            }
            pos = self.next_pos(pos);
        }
    }
}

impl RecordFile for PagedRecordFile {
    fn before_first(&mut self) -> StorageResult<()> {
        self.ensure_open()?;
        self.cursor = Cursor::BeforeFirst;
        self.current = None;
        Ok(())
    }

    fn next(&mut self) -> StorageResult<bool> {
        self.ensure_open()?;
        self.ensure_mapped()?;

        let mut pos = match self.cursor {
            Cursor::BeforeFirst => SlotPos { block: 1, slot: 0 },
            Cursor::At(pos) => self.next_pos(pos),
            Cursor::AfterLast => return Ok(false),
        };

        let Some(mmap) = self.mmap.as_ref() else {
            return Ok(false);
        };
        let blocks = (mmap.len() / self.block_size) as u64;
        let file_name = self.table.file_name();
        // Pinned copy of the block under the cursor, if any
        let mut pinned: Option<(u64, Option<Arc<[u8]>>)> = None;
        while pos.block < blocks {
            if pinned.as_ref().is_none_or(|(block, _)| *block != pos.block) {
                let page = self.cache.get(&BlockId::new(file_name.as_str(), pos.block));
                pinned = Some((pos.block, page));
            }
            let in_block = pos.slot * self.slot_size;
            let slot = match pinned.as_ref().and_then(|(_, page)| page.as_deref()) {
                Some(page) => &page[in_block..in_block + self.slot_size],
                None => {
                    let offset = self.slot_offset(pos) as usize;
                    &mmap[offset..offset + self.slot_size]
                }
            };
            if slot[0] == SLOT_USED {
                let record = slot[1..].to_vec();
                self.cursor = Cursor::At(pos);
                self.current = Some(record);
                return Ok(true);
            }
            pos = self.next_pos(pos);
        }

        self.cursor = Cursor::AfterLast;
        self.current = None;
        Ok(false)
    }

    fn get_val(&self, field: &str) -> StorageResult<Constant> {
        self.ensure_open()?;
        let Some(record) = self.current.as_ref() else {
            return Err(StorageError::NoCurrentRecord(self.table.to_string()));
        };
        let (offset, field_type) =
            self.schema
                .locate(field)
                .ok_or_else(|| StorageError::UnknownField {
                    table: self.table.to_string(),
                    field: field.to_string(),
                })?;

        let bytes = &record[offset..offset + field_type.byte_len()];
        let value = match field_type {
            FieldType::Int => Constant::Int(i32::from_le_bytes([
                bytes[0], bytes[1], bytes[2], bytes[3],
            ])),
            FieldType::BigInt => {
                let mut buf = [0u8; 8];
                buf.copy_from_slice(bytes);
                Constant::BigInt(i64::from_le_bytes(buf))
            }
            FieldType::Vector(_) => Constant::Vector(Vector::from_le_bytes(bytes)?),
        };
        Ok(value)
    }

    fn set_val(&mut self, field: &str, value: Constant) -> StorageResult<()> {
        self.ensure_open()?;
        let pos = self.current_pos()?;
        let (offset, field_type) =
            self.schema
                .locate(field)
                .ok_or_else(|| StorageError::UnknownField {
                    table: self.table.to_string(),
                    field: field.to_string(),
                })?;
        if !value.fits(field_type) {
            return Err(StorageError::InvalidFieldValue {
                field: field.to_string(),
                reason: format!("{value:?} does not fit {field_type:?}"),
            });
        }

        let bytes = match &value {
            Constant::Int(v) => v.to_le_bytes().to_vec(),
            Constant::BigInt(v) => v.to_le_bytes().to_vec(),
            Constant::Vector(v) => v.to_le_bytes(),
        };
        let file_offset = self.slot_offset(pos) + 1 + offset as u64;
        self.write_at(file_offset, &bytes)?;
        if let Some(record) = self.current.as_mut() {
            record[offset..offset + bytes.len()].copy_from_slice(&bytes);
        }
        self.invalidate_cache(pos.block);
        Ok(())
    }

    fn insert(&mut self) -> StorageResult<()> {
        self.ensure_open()?;
        let pos = self.claim_free_slot()?;

        let mut slot = vec![0u8; self.slot_size];
        slot[0] = SLOT_USED;
        let offset = self.slot_offset(pos);
        self.write_at(offset, &slot)?;

        self.free_from = self.next_pos(pos);
        self.cursor = Cursor::At(pos);
        self.current = Some(vec![0u8; self.slot_size - 1]);
        self.invalidate_cache(pos.block);
        Ok(())
    }

    fn delete(&mut self) -> StorageResult<()> {
        self.ensure_open()?;
        let pos = self.current_pos()?;
        let offset = self.slot_offset(pos);
        self.write_at(offset, &[SLOT_EMPTY])?;

        self.current = None;
        self.free_from = self.free_from.min(pos);
        self.invalidate_cache(pos.block);
        Ok(())
    }

    fn close(&mut self) {
        if self.closed {
            return;
        }
        if let Some(mut writer) = self.writer.take() {
            if let Err(e) = writer.flush() {
                tracing::warn!("[storage] flush of '{}' failed on close: {e}", self.table);
            }
        }
        self.mmap = None;
        self.current = None;
        self.cursor = Cursor::AfterLast;
        self.closed = true;
    }

    fn file_size(&self) -> StorageResult<u64> {
        self.ensure_open()?;
        let len = std::fs::metadata(&self.path)?.len();
        Ok(len / self.block_size as u64)
    }
}

impl Drop for PagedRecordFile {
    fn drop(&mut self) {
        self.close();
    }
}

fn check_layout(schema: &Schema, block_size: usize) -> StorageResult<()> {
    let record_size = schema.record_size();
    if block_size < HEADER_LEN || 1 + record_size > block_size {
        return Err(StorageError::RecordTooLarge {
            record_size,
            block_size,
        });
    }
    Ok(())
}

fn read_u32(bytes: &[u8]) -> u32 {
    u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]])
}

/// Reads one raw block from a table file.
pub(crate) fn read_block(path: &Path, number: u64, block_size: usize) -> io::Result<Vec<u8>> {
    let mut file = File::open(path)?;
    file.seek(SeekFrom::Start(number * block_size as u64))?;
    let mut buf = vec![0u8; block_size];
    file.read_exact(&mut buf)?;
    Ok(buf)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn postings_schema(dimension: usize) -> Schema {
        Schema::new()
            .with_field("i_id", FieldType::Int)
            .with_field("vector", FieldType::Vector(dimension))
            .with_field("block", FieldType::BigInt)
            .with_field("slot", FieldType::Int)
    }

    fn open(dir: &TempDir, schema: &Schema, writable: bool) -> PagedRecordFile {
        let table = TableName::new("t");
        PagedRecordFile::open(
            dir.path(),
            &table,
            schema,
            256,
            writable,
            Arc::new(PageCache::new(16)),
        )
        .unwrap()
    }

    fn scan_ids(file: &mut PagedRecordFile) -> Vec<i32> {
        file.before_first().unwrap();
        let mut ids = Vec::new();
        while file.next().unwrap() {
            ids.push(file.get_val("i_id").unwrap().as_int().unwrap());
        }
        ids
    }

    #[test]
    fn test_insert_and_scan() {
        let dir = TempDir::new().unwrap();
        let schema = postings_schema(4);
        PagedRecordFile::format(dir.path(), &TableName::new("t"), &schema, 256).unwrap();

        let mut file = open(&dir, &schema, true);
        // 33-byte slots, 7 per 256-byte block: 20 rows span three data blocks
        for i in 0..20 {
            file.insert().unwrap();
            file.set_val("i_id", Constant::Int(i)).unwrap();
            file.set_val("vector", Constant::Vector(Vector::new(vec![i as f32; 4])))
                .unwrap();
            file.set_val("block", Constant::BigInt(i64::from(i) * 10))
                .unwrap();
            file.set_val("slot", Constant::Int(-i)).unwrap();
        }
        assert_eq!(file.file_size().unwrap(), 4);
        assert_eq!(scan_ids(&mut file), (0..20).collect::<Vec<_>>());

        file.before_first().unwrap();
        file.next().unwrap();
        file.next().unwrap();
        assert_eq!(
            file.get_val("vector").unwrap(),
            Constant::Vector(Vector::new(vec![1.0; 4]))
        );
        assert_eq!(file.get_val("block").unwrap(), Constant::BigInt(10));
        assert_eq!(file.get_val("slot").unwrap(), Constant::Int(-1));
    }

    #[test]
    fn test_delete_skips_and_reuses_slot() {
        let dir = TempDir::new().unwrap();
        let schema = postings_schema(2);
        PagedRecordFile::format(dir.path(), &TableName::new("t"), &schema, 256).unwrap();

        let mut file = open(&dir, &schema, true);
        for i in 0..3 {
            file.insert().unwrap();
            file.set_val("i_id", Constant::Int(i)).unwrap();
        }

        file.before_first().unwrap();
        file.next().unwrap();
        file.next().unwrap();
        file.delete().unwrap();
        assert!(matches!(
            file.get_val("i_id"),
            Err(StorageError::NoCurrentRecord(_))
        ));
        // Scanning continues after the tombstone
        assert!(file.next().unwrap());
        assert_eq!(file.get_val("i_id").unwrap(), Constant::Int(2));
        assert_eq!(scan_ids(&mut file), vec![0, 2]);

        file.insert().unwrap();
        file.set_val("i_id", Constant::Int(9)).unwrap();
        assert_eq!(scan_ids(&mut file), vec![0, 9, 2]);
    }

    #[test]
    fn test_read_only_rejects_writes() {
        let dir = TempDir::new().unwrap();
        let schema = postings_schema(2);
        PagedRecordFile::format(dir.path(), &TableName::new("t"), &schema, 256).unwrap();

        let mut file = open(&dir, &schema, false);
        assert!(matches!(file.insert(), Err(StorageError::ReadOnly(_))));
        assert!(!file.next().unwrap());
    }

    #[test]
    fn test_schema_mismatch_is_rejected() {
        let dir = TempDir::new().unwrap();
        let table = TableName::new("t");
        PagedRecordFile::format(dir.path(), &table, &postings_schema(2), 256).unwrap();

        let result = PagedRecordFile::open(
            dir.path(),
            &table,
            &postings_schema(3),
            256,
            false,
            Arc::new(PageCache::new(4)),
        );
        assert!(matches!(result, Err(StorageError::InvalidFormat { .. })));
    }

    #[test]
    fn test_missing_table_and_oversized_record() {
        let dir = TempDir::new().unwrap();
        let schema = postings_schema(2);
        let result = PagedRecordFile::open(
            dir.path(),
            &TableName::new("absent"),
            &schema,
            256,
            false,
            Arc::new(PageCache::new(4)),
        );
        assert!(matches!(result, Err(StorageError::TableNotFound(_))));

        let wide = postings_schema(128);
        assert!(matches!(
            PagedRecordFile::format(dir.path(), &TableName::new("w"), &wide, 256),
            Err(StorageError::RecordTooLarge { .. })
        ));
    }

    #[test]
    fn test_close_is_idempotent() {
        let dir = TempDir::new().unwrap();
        let schema = postings_schema(2);
        PagedRecordFile::format(dir.path(), &TableName::new("t"), &schema, 256).unwrap();

        let mut file = open(&dir, &schema, true);
        file.close();
        file.close();
        assert!(matches!(file.next(), Err(StorageError::Closed(_))));
    }
}
