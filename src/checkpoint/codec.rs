//! # Checkpoint File Codec
//!
//! A checkpoint file is a sequence of self-contained table sections, each
//! carrying everything recovery needs: the table oid, the column
//! descriptors, and every tuple visible at the checkpoint's snapshot.
//! All integers are little-endian.
//!
//! ```text
//! section      := header tuple* end
//! header       := table_oid u64 | col_count u16 | descriptor*
//! descriptor   := col_oid u64 | type u32 | nullable u32 | max_varlen u32
//! tuple        := 0x01 | slot u64 | null bitmap | fixed attrs | varlen attrs
//! end          := 0x00 | crc32 u32
//! ```
//!
//! Fixed-width attributes appear in column order for non-null columns only
//! (the bitmap says which), then varlen attributes as `size u32 | bytes`.
//! Each tuple also records the slot it occupied in the source table;
//! recovery keys its old-slot → new-slot map on it so the WAL tail can be
//! replayed against the rebuilt table.
//!
//! The CRC-32 in the section trailer covers all tuple bytes of the section,
//! markers included; a mismatch or any structural violation surfaces as
//! `StorageError::ChecksumOrFormat`.

use crc::{Crc, Digest, CRC_32_ISO_HDLC};
use eyre::{Result, WrapErr};
use std::fs::File;
use std::io::{BufReader, BufWriter, ErrorKind, Read, Write};
use std::path::Path;

use crate::catalog::{ColOid, Schema, TableOid, TypeId};
use crate::error::StorageError;
use crate::storage::bitmap;
use crate::storage::projection::{AttrValue, FixedValue, RowView};
use crate::storage::varlen::VarlenEntry;
use crate::storage::TupleSlot;

static CRC32: Crc<u32> = Crc::<u32>::new(&CRC_32_ISO_HDLC);

const TUPLE_MARKER: u8 = 0x01;
const END_MARKER: u8 = 0x00;

/// Streams table sections into a checkpoint file.
pub struct TupleWriter {
    out: BufWriter<File>,
    section: Option<Digest<'static, u32>>,
}

impl TupleWriter {
    pub fn create(path: &Path) -> Result<Self> {
        let file = File::create(path)
            .wrap_err_with(|| format!("failed to create checkpoint file at {:?}", path))?;
        Ok(Self {
            out: BufWriter::new(file),
            section: None,
        })
    }

    pub fn begin_section(&mut self, table_oid: TableOid, schema: &Schema) -> Result<()> {
        debug_assert!(self.section.is_none(), "previous section still open");
        let mut header = Vec::new();
        header.extend_from_slice(&table_oid.0.to_le_bytes());
        header.extend_from_slice(&(schema.num_columns() as u16).to_le_bytes());
        for column in schema.columns() {
            header.extend_from_slice(&column.oid().0.to_le_bytes());
            header.extend_from_slice(&column.type_id().to_wire().to_le_bytes());
            header.extend_from_slice(&(column.nullable() as u32).to_le_bytes());
            header.extend_from_slice(&column.max_varlen_size().unwrap_or(0).to_le_bytes());
        }
        self.out
            .write_all(&header)
            .wrap_err("failed to write checkpoint section header")?;
        self.section = Some(CRC32.digest());
        Ok(())
    }

    /// Serializes one tuple. `row` must carry the schema's columns in
    /// declaration order, which is how the checkpoint scan projects them.
    pub fn write_tuple(&mut self, schema: &Schema, row: &RowView<'_>) -> Result<()> {
        debug_assert_eq!(usize::from(row.num_columns()), schema.num_columns());
        let mut record = Vec::new();
        record.push(TUPLE_MARKER);
        record.extend_from_slice(&row.tuple_slot().to_raw().to_le_bytes());

        let num_cols = schema.num_columns();
        let mut nulls = vec![0u8; bitmap::bytes_for(num_cols)];
        for idx in 0..num_cols {
            if row.value(idx as u16).is_some() {
                bitmap::set(&mut nulls, idx);
            }
        }
        record.extend_from_slice(&nulls);

        for (idx, column) in schema.columns().iter().enumerate() {
            if column.is_varlen() {
                continue;
            }
            if let Some(AttrValue::Fixed(value)) = row.value(idx as u16) {
                debug_assert_eq!(Some(value.width()), column.type_id().fixed_size());
                record.extend_from_slice(value.as_bytes());
            }
        }
        for (idx, column) in schema.columns().iter().enumerate() {
            if !column.is_varlen() {
                continue;
            }
            if let Some(AttrValue::Varlen(entry)) = row.value(idx as u16) {
                record.extend_from_slice(&(entry.len() as u32).to_le_bytes());
                record.extend_from_slice(entry.as_bytes());
            }
        }

        let digest = self
            .section
            .as_mut()
            .expect("write_tuple outside a section");
        digest.update(&record);
        self.out
            .write_all(&record)
            .wrap_err("failed to write checkpoint tuple")?;
        Ok(())
    }

    pub fn end_section(&mut self) -> Result<()> {
        let digest = self.section.take().expect("end_section outside a section");
        let checksum = digest.finalize();
        self.out
            .write_all(&[END_MARKER])
            .and_then(|_| self.out.write_all(&checksum.to_le_bytes()))
            .wrap_err("failed to write checkpoint section trailer")?;
        Ok(())
    }

    /// Flushes and syncs the file.
    pub fn finish(mut self) -> Result<()> {
        debug_assert!(self.section.is_none(), "unterminated section");
        self.out.flush().wrap_err("failed to flush checkpoint file")?;
        self.out
            .get_ref()
            .sync_all()
            .wrap_err("failed to sync checkpoint file")?;
        Ok(())
    }
}

/// One column as described by a section header.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColumnDescriptor {
    pub oid: ColOid,
    pub type_id: TypeId,
    pub nullable: bool,
    pub max_varlen_size: Option<u32>,
}

/// A decoded section header.
#[derive(Debug, Clone)]
pub struct SectionHeader {
    pub table_oid: TableOid,
    pub columns: Vec<ColumnDescriptor>,
}

/// Streams table sections back out of a checkpoint file.
pub struct TupleReader {
    input: BufReader<File>,
    section: Option<Digest<'static, u32>>,
}

impl TupleReader {
    pub fn open(path: &Path) -> Result<Self> {
        let file = File::open(path)
            .wrap_err_with(|| format!("failed to open checkpoint file at {:?}", path))?;
        Ok(Self {
            input: BufReader::new(file),
            section: None,
        })
    }

    /// Reads the next section header; `None` at a clean end of file.
    pub fn next_section(&mut self) -> Result<Option<SectionHeader>> {
        debug_assert!(self.section.is_none(), "previous section not fully read");
        let mut oid_bytes = [0u8; 8];
        match self.input.read_exact(&mut oid_bytes) {
            Ok(()) => {}
            Err(e) if e.kind() == ErrorKind::UnexpectedEof => return Ok(None),
            Err(e) => return Err(e).wrap_err("failed to read checkpoint section header"),
        }
        let table_oid = TableOid(u64::from_le_bytes(oid_bytes));

        let mut count_bytes = [0u8; 2];
        self.input
            .read_exact(&mut count_bytes)
            .wrap_err("truncated checkpoint section header")?;
        let col_count = u16::from_le_bytes(count_bytes);
        if col_count == 0 {
            return Err(StorageError::ChecksumOrFormat("section with zero columns".into()).into());
        }

        let mut columns = Vec::with_capacity(col_count as usize);
        for _ in 0..col_count {
            let mut descriptor = [0u8; 20];
            self.input
                .read_exact(&mut descriptor)
                .wrap_err("truncated checkpoint column descriptor")?;
            let oid = ColOid(u64::from_le_bytes(descriptor[0..8].try_into().unwrap()));
            let type_id = TypeId::from_wire(u32::from_le_bytes(descriptor[8..12].try_into().unwrap()))?;
            let nullable = u32::from_le_bytes(descriptor[12..16].try_into().unwrap()) != 0;
            let max_varlen = u32::from_le_bytes(descriptor[16..20].try_into().unwrap());
            columns.push(ColumnDescriptor {
                oid,
                type_id,
                nullable,
                max_varlen_size: (max_varlen != 0).then_some(max_varlen),
            });
        }
        self.section = Some(CRC32.digest());
        Ok(Some(SectionHeader { table_oid, columns }))
    }

    /// Reads the next tuple of the current section, or `None` at the section
    /// trailer after verifying its checksum. Varlen payloads are deep-copied
    /// into freshly owned entries.
    pub fn next_tuple(
        &mut self,
        header: &SectionHeader,
    ) -> Result<Option<(TupleSlot, Vec<Option<AttrValue>>)>> {
        let mut marker = [0u8; 1];
        self.input
            .read_exact(&mut marker)
            .wrap_err("truncated checkpoint section body")?;
        match marker[0] {
            END_MARKER => {
                let digest = self.section.take().expect("next_tuple outside a section");
                let expected = digest.finalize();
                let mut stored = [0u8; 4];
                self.input
                    .read_exact(&mut stored)
                    .wrap_err("truncated checkpoint section trailer")?;
                let stored = u32::from_le_bytes(stored);
                if stored != expected {
                    return Err(StorageError::ChecksumOrFormat(format!(
                        "section checksum mismatch: stored {stored:#x}, computed {expected:#x}"
                    ))
                    .into());
                }
                Ok(None)
            }
            TUPLE_MARKER => {
                let mut record = vec![TUPLE_MARKER];
                let mut read = |buf: &mut Vec<u8>, n: usize, input: &mut BufReader<File>| -> Result<usize> {
                    let start = buf.len();
                    buf.resize(start + n, 0);
                    input
                        .read_exact(&mut buf[start..])
                        .wrap_err("truncated checkpoint tuple")?;
                    Ok(start)
                };

                let slot_at = read(&mut record, 8, &mut self.input)?;
                let slot = TupleSlot::from_raw(u64::from_le_bytes(
                    record[slot_at..slot_at + 8].try_into().unwrap(),
                ));

                let num_cols = header.columns.len();
                let nulls_at = read(&mut record, bitmap::bytes_for(num_cols), &mut self.input)?;
                let nulls = record[nulls_at..].to_vec();

                let mut values: Vec<Option<AttrValue>> = vec![None; num_cols];
                for (idx, column) in header.columns.iter().enumerate() {
                    if column.type_id.is_varlen() || !bitmap::test(&nulls, idx) {
                        continue;
                    }
                    let width = column
                        .type_id
                        .fixed_size()
                        .expect("non-varlen column has a fixed size") as usize;
                    let at = read(&mut record, width, &mut self.input)?;
                    values[idx] = Some(AttrValue::Fixed(FixedValue::from_le_slice(
                        &record[at..at + width],
                    )));
                }
                for (idx, column) in header.columns.iter().enumerate() {
                    if !column.type_id.is_varlen() || !bitmap::test(&nulls, idx) {
                        continue;
                    }
                    let at = read(&mut record, 4, &mut self.input)?;
                    let size =
                        u32::from_le_bytes(record[at..at + 4].try_into().unwrap()) as usize;
                    let at = read(&mut record, size, &mut self.input)?;
                    values[idx] = Some(AttrValue::Varlen(VarlenEntry::from_slice(
                        &record[at..at + size],
                    )));
                }

                let digest = self.section.as_mut().expect("next_tuple outside a section");
                digest.update(&record);
                Ok(Some((slot, values)))
            }
            other => Err(StorageError::ChecksumOrFormat(format!(
                "unexpected checkpoint record marker {other:#x}"
            ))
            .into()),
        }
    }
}
