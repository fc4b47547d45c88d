//! # WAL Records
//!
//! Redo records are staged in a transaction's private buffer as it mutates
//! tables, then handed to the log manager at commit together with a commit
//! marker. This module defines both the in-memory staged form and the on-disk
//! frame codec.
//!
//! ## Frame format (little-endian)
//!
//! ```text
//! +-----------+------+-------------+------------------------+
//! | len: u32  | kind | txn_begin   | body (len - 9 bytes)   |
//! |           | u8   | u64         |                        |
//! +-----------+------+-------------+------------------------+
//! ```
//!
//! `len` counts everything after itself, so recovery can skip a record
//! without interpreting it. Kinds:
//!
//! - INSERT (0x01), UPDATE (0x02): `table_oid u64 | slot u64 | num_cols u16 |
//!   col_ids u16* | null bitmap | attributes`. Fixed-width attributes are
//!   raw cell bytes in projection order, varlen attributes are `size u32 |
//!   bytes`, null attributes absent.
//! - COMMIT (0x03): `commit_timestamp u64`.
//!
//! Attribute widths are not self-describing; decoding an INSERT/UPDATE body
//! requires the layout of the table it names, which recovery resolves from
//! the registered tables. The table oid is readable without the layout so an
//! unregistered record can be skipped.

use eyre::{ensure, Result, WrapErr};
use std::io::{ErrorKind, Read, Write};

use crate::catalog::TableOid;
use crate::mvcc::Timestamp;
use crate::storage::bitmap;
use crate::storage::layout::{AttrSize, BlockLayout, ColId};
use crate::storage::projection::{AttrValue, FixedValue, ProjectedRow, ProjectedRowInitializer};
use crate::storage::varlen::VarlenEntry;
use crate::storage::TupleSlot;

pub const KIND_INSERT: u8 = 0x01;
pub const KIND_UPDATE: u8 = 0x02;
pub const KIND_COMMIT: u8 = 0x03;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RedoKind {
    Insert,
    Update,
}

impl RedoKind {
    fn wire(self) -> u8 {
        match self {
            RedoKind::Insert => KIND_INSERT,
            RedoKind::Update => KIND_UPDATE,
        }
    }
}

/// One staged after-image, owned by the transaction until commit.
#[derive(Debug, Clone)]
pub struct RedoRecord {
    pub kind: RedoKind,
    pub table_oid: TableOid,
    pub slot: TupleSlot,
    pub delta: ProjectedRow,
}

/// Serializes a redo record into one frame appended to `out`.
pub fn write_redo(out: &mut Vec<u8>, txn_begin: Timestamp, redo: &RedoRecord) {
    let mut body = Vec::new();
    body.extend_from_slice(&redo.table_oid.0.to_le_bytes());
    body.extend_from_slice(&redo.slot.to_raw().to_le_bytes());

    let delta = &redo.delta;
    let num_cols = delta.num_columns();
    body.extend_from_slice(&num_cols.to_le_bytes());
    for col in delta.column_ids() {
        body.extend_from_slice(&col.0.to_le_bytes());
    }
    let mut nulls = vec![0u8; bitmap::bytes_for(num_cols as usize)];
    for idx in 0..num_cols {
        if !delta.is_null(idx) {
            bitmap::set(&mut nulls, idx as usize);
        }
    }
    body.extend_from_slice(&nulls);
    for idx in 0..num_cols {
        match delta.value(idx) {
            None => {}
            Some(AttrValue::Fixed(value)) => body.extend_from_slice(value.as_bytes()),
            Some(AttrValue::Varlen(entry)) => {
                body.extend_from_slice(&(entry.len() as u32).to_le_bytes());
                body.extend_from_slice(entry.as_bytes());
            }
        }
    }

    write_frame(out, redo.kind.wire(), txn_begin, &body);
}

/// Serializes a commit marker into one frame appended to `out`.
pub fn write_commit(out: &mut Vec<u8>, txn_begin: Timestamp, commit: Timestamp) {
    write_frame(out, KIND_COMMIT, txn_begin, &commit.to_le_bytes());
}

fn write_frame(out: &mut Vec<u8>, kind: u8, txn_begin: Timestamp, body: &[u8]) {
    let len = 1 + 8 + body.len() as u32;
    out.extend_from_slice(&len.to_le_bytes());
    out.push(kind);
    out.extend_from_slice(&txn_begin.to_le_bytes());
    out.extend_from_slice(body);
}

/// One frame read back from the log, body still undecoded.
#[derive(Debug, Clone)]
pub struct RawFrame {
    pub kind: u8,
    pub txn_begin: Timestamp,
    pub body: Vec<u8>,
}

/// Reads the next frame. `Ok(None)` at a clean end of file; a frame cut off
/// mid-way is an error, which recovery treats as the end of the usable log.
pub fn read_frame(reader: &mut impl Read) -> Result<Option<RawFrame>> {
    let mut len_bytes = [0u8; 4];
    match reader.read_exact(&mut len_bytes) {
        Ok(()) => {}
        Err(e) if e.kind() == ErrorKind::UnexpectedEof => return Ok(None),
        Err(e) => return Err(e).wrap_err("failed to read WAL frame length"),
    }
    let len = u32::from_le_bytes(len_bytes) as usize;
    ensure!(len >= 9, "WAL frame length {len} too small");
    let mut frame = vec![0u8; len];
    reader
        .read_exact(&mut frame)
        .wrap_err("WAL frame truncated")?;
    let kind = frame[0];
    let txn_begin = u64::from_le_bytes(frame[1..9].try_into().unwrap());
    Ok(Some(RawFrame {
        kind,
        txn_begin,
        body: frame[9..].to_vec(),
    }))
}

/// A decoded INSERT/UPDATE body.
#[derive(Debug)]
pub struct DecodedRedo {
    pub table_oid: TableOid,
    pub slot: TupleSlot,
    pub delta: ProjectedRow,
}

impl RawFrame {
    pub fn parse_commit(&self) -> Result<Timestamp> {
        ensure!(self.kind == KIND_COMMIT, "not a commit frame");
        ensure!(self.body.len() == 8, "malformed commit frame body");
        Ok(u64::from_le_bytes(self.body[..8].try_into().unwrap()))
    }

    /// Table oid of a redo frame, readable without the table's layout.
    pub fn redo_table_oid(&self) -> Result<TableOid> {
        ensure!(
            self.kind == KIND_INSERT || self.kind == KIND_UPDATE,
            "not a redo frame"
        );
        ensure!(self.body.len() >= 8, "malformed redo frame body");
        Ok(TableOid(u64::from_le_bytes(self.body[..8].try_into().unwrap())))
    }

    /// Decodes a redo body against the layout of the table it names.
    pub fn parse_redo(&self, layout: &BlockLayout) -> Result<DecodedRedo> {
        let table_oid = self.redo_table_oid()?;
        let body = &self.body;
        let mut pos = 8usize;

        let take = |pos: &mut usize, n: usize| -> Result<&[u8]> {
            ensure!(*pos + n <= body.len(), "redo frame body truncated");
            let slice = &body[*pos..*pos + n];
            *pos += n;
            Ok(slice)
        };

        let slot = TupleSlot::from_raw(u64::from_le_bytes(take(&mut pos, 8)?.try_into().unwrap()));
        let num_cols = u16::from_le_bytes(take(&mut pos, 2)?.try_into().unwrap());
        let mut col_ids = Vec::with_capacity(num_cols as usize);
        for _ in 0..num_cols {
            let id = u16::from_le_bytes(take(&mut pos, 2)?.try_into().unwrap());
            col_ids.push(ColId(id));
        }
        let nulls = take(&mut pos, bitmap::bytes_for(num_cols as usize))?.to_vec();

        let init = ProjectedRowInitializer::new(col_ids.clone());
        let mut delta = init.initialize();
        for (idx, col) in col_ids.iter().enumerate() {
            if !bitmap::test(&nulls, idx) {
                continue;
            }
            ensure!(
                col.0 < layout.num_columns(),
                "column id {} out of range for table {:?}",
                col.0,
                table_oid
            );
            match layout.attr_size(*col) {
                AttrSize::Fixed(width) => {
                    let raw = take(&mut pos, width as usize)?;
                    delta.set_value(idx as u16, Some(AttrValue::Fixed(FixedValue::from_le_slice(raw))));
                }
                AttrSize::Varlen => {
                    let size = u32::from_le_bytes(take(&mut pos, 4)?.try_into().unwrap()) as usize;
                    let bytes = take(&mut pos, size)?;
                    delta.set_value(
                        idx as u16,
                        Some(AttrValue::Varlen(VarlenEntry::from_slice(bytes))),
                    );
                }
            }
        }
        ensure!(pos == body.len(), "trailing bytes in redo frame body");
        Ok(DecodedRedo {
            table_oid,
            slot,
            delta,
        })
    }
}

/// Appends serialized frames for a whole committed transaction.
pub fn serialize_transaction(
    out: &mut Vec<u8>,
    txn_begin: Timestamp,
    commit: Timestamp,
    redos: &[RedoRecord],
) {
    for redo in redos {
        write_redo(out, txn_begin, redo);
    }
    write_commit(out, txn_begin, commit);
}

/// Writes a serialized batch to a sink in one call.
pub fn write_all(writer: &mut impl Write, bytes: &[u8]) -> Result<()> {
    if bytes.is_empty() {
        return Ok(());
    }
    writer.write_all(bytes).wrap_err("failed to append to WAL")?;
    Ok(())
}
