//! # Projected Rows and Columns
//!
//! The wire format between transactions and the data table: a self-describing
//! buffer carrying a subset of columns for one tuple (`ProjectedRow`) or for
//! a batch of tuples (`ProjectedColumns`, column-major with a row view per
//! index).
//!
//! Both are addressed by *projection list index*, the position of a column
//! within the buffer's own column list, not its position in the block layout.
//! A `ProjectionMap` translates a column oid to that index once, at
//! initializer-construction time, and is reused for every buffer the
//! initializer stamps out. The same addressing carries through WAL and
//! checkpoint serialization, which materialize the null bitmap these
//! in-memory forms keep implicit.

use std::sync::Arc;

use super::layout::ColId;
use super::varlen::VarlenEntry;
use super::TupleSlot;
use crate::catalog::ColOid;

/// Translates column oid → projection list index.
pub type ProjectionMap = hashbrown::HashMap<ColOid, u16>;

/// A fixed-width attribute value, at most 8 bytes, little-endian.
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct FixedValue {
    len: u8,
    bytes: [u8; 8],
}

impl FixedValue {
    pub fn from_le_slice(slice: &[u8]) -> Self {
        debug_assert!(matches!(slice.len(), 1 | 2 | 4 | 8));
        let mut bytes = [0u8; 8];
        bytes[..slice.len()].copy_from_slice(slice);
        Self {
            len: slice.len() as u8,
            bytes,
        }
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes[..self.len as usize]
    }

    pub fn width(&self) -> u8 {
        self.len
    }

    /// Value widened to u64 for convenience comparisons in tests and
    /// diagnostics.
    pub fn as_u64(&self) -> u64 {
        u64::from_le_bytes(self.bytes)
    }
}

impl std::fmt::Debug for FixedValue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "FixedValue({}:{})", self.len, self.as_u64())
    }
}

/// One attribute value inside a projection buffer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AttrValue {
    Fixed(FixedValue),
    Varlen(VarlenEntry),
}

impl AttrValue {
    pub fn tinyint(v: i8) -> Self {
        AttrValue::Fixed(FixedValue::from_le_slice(&v.to_le_bytes()))
    }

    pub fn smallint(v: i16) -> Self {
        AttrValue::Fixed(FixedValue::from_le_slice(&v.to_le_bytes()))
    }

    pub fn integer(v: i32) -> Self {
        AttrValue::Fixed(FixedValue::from_le_slice(&v.to_le_bytes()))
    }

    pub fn bigint(v: i64) -> Self {
        AttrValue::Fixed(FixedValue::from_le_slice(&v.to_le_bytes()))
    }

    pub fn varlen(bytes: &[u8]) -> Self {
        AttrValue::Varlen(VarlenEntry::from_slice(bytes))
    }

    pub fn as_fixed(&self) -> Option<&FixedValue> {
        match self {
            AttrValue::Fixed(v) => Some(v),
            AttrValue::Varlen(_) => None,
        }
    }

    pub fn as_varlen(&self) -> Option<&VarlenEntry> {
        match self {
            AttrValue::Varlen(v) => Some(v),
            AttrValue::Fixed(_) => None,
        }
    }
}

/// Precomputed column list for stamping out `ProjectedRow`s. Built once per
/// projection, shared across many buffers.
#[derive(Debug, Clone)]
pub struct ProjectedRowInitializer {
    col_ids: Arc<[ColId]>,
}

impl ProjectedRowInitializer {
    pub fn new(col_ids: Vec<ColId>) -> Self {
        debug_assert!(!col_ids.is_empty());
        Self {
            col_ids: col_ids.into(),
        }
    }

    pub fn col_ids(&self) -> &[ColId] {
        &self.col_ids
    }

    pub fn num_columns(&self) -> u16 {
        self.col_ids.len() as u16
    }

    pub fn initialize(&self) -> ProjectedRow {
        ProjectedRow {
            col_ids: Arc::clone(&self.col_ids),
            values: vec![None; self.col_ids.len()],
        }
    }
}

/// A subset of one tuple's columns, addressed by projection list index.
/// `None` means null.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProjectedRow {
    col_ids: Arc<[ColId]>,
    values: Vec<Option<AttrValue>>,
}

impl ProjectedRow {
    pub fn num_columns(&self) -> u16 {
        self.col_ids.len() as u16
    }

    pub fn column_ids(&self) -> &[ColId] {
        &self.col_ids
    }

    pub fn is_null(&self, idx: u16) -> bool {
        self.values[idx as usize].is_none()
    }

    pub fn value(&self, idx: u16) -> Option<&AttrValue> {
        self.values[idx as usize].as_ref()
    }

    pub fn set_value(&mut self, idx: u16, value: Option<AttrValue>) {
        self.values[idx as usize] = value;
    }

    pub fn set_null(&mut self, idx: u16) {
        self.values[idx as usize] = None;
    }

    pub fn values(&self) -> &[Option<AttrValue>] {
        &self.values
    }

    /// Projection list index of a physical column, if present.
    pub fn index_of(&self, col: ColId) -> Option<u16> {
        self.col_ids.iter().position(|&c| c == col).map(|i| i as u16)
    }

    pub fn clear(&mut self) {
        for value in &mut self.values {
            *value = None;
        }
    }
}

/// Precomputed column list plus capacity for `ProjectedColumns`.
#[derive(Debug, Clone)]
pub struct ProjectedColumnsInitializer {
    col_ids: Arc<[ColId]>,
    max_tuples: u32,
}

impl ProjectedColumnsInitializer {
    pub fn new(col_ids: Vec<ColId>, max_tuples: u32) -> Self {
        debug_assert!(!col_ids.is_empty());
        debug_assert!(max_tuples > 0);
        Self {
            col_ids: col_ids.into(),
            max_tuples,
        }
    }

    pub fn col_ids(&self) -> &[ColId] {
        &self.col_ids
    }

    pub fn max_tuples(&self) -> u32 {
        self.max_tuples
    }

    pub fn initialize(&self) -> ProjectedColumns {
        let columns = self
            .col_ids
            .iter()
            .map(|_| vec![None; self.max_tuples as usize].into_boxed_slice())
            .collect();
        ProjectedColumns {
            col_ids: Arc::clone(&self.col_ids),
            max_tuples: self.max_tuples,
            num_tuples: 0,
            slots: Vec::with_capacity(self.max_tuples as usize),
            columns,
        }
    }

    /// A row initializer over the same projection, for staging single tuples.
    pub fn row_initializer(&self) -> ProjectedRowInitializer {
        ProjectedRowInitializer {
            col_ids: Arc::clone(&self.col_ids),
        }
    }
}

/// A column subset for up to `max_tuples` tuples, column-major.
pub struct ProjectedColumns {
    col_ids: Arc<[ColId]>,
    max_tuples: u32,
    num_tuples: u32,
    slots: Vec<TupleSlot>,
    columns: Vec<Box<[Option<AttrValue>]>>,
}

impl ProjectedColumns {
    pub fn num_columns(&self) -> u16 {
        self.col_ids.len() as u16
    }

    pub fn column_ids(&self) -> &[ColId] {
        &self.col_ids
    }

    pub fn max_tuples(&self) -> u32 {
        self.max_tuples
    }

    pub fn num_tuples(&self) -> u32 {
        self.num_tuples
    }

    pub fn is_full(&self) -> bool {
        self.num_tuples >= self.max_tuples
    }

    /// Appends one tuple's values; caller guarantees capacity.
    pub fn append(&mut self, slot: TupleSlot, values: &[Option<AttrValue>]) {
        debug_assert!(!self.is_full());
        debug_assert_eq!(values.len(), self.col_ids.len());
        let row = self.num_tuples as usize;
        for (column, value) in self.columns.iter_mut().zip(values) {
            column[row] = value.clone();
        }
        self.slots.push(slot);
        self.num_tuples += 1;
    }

    /// Forgets all tuples so the buffer can be refilled.
    pub fn reset(&mut self) {
        self.num_tuples = 0;
        self.slots.clear();
    }

    pub fn tuple_slot(&self, row: u32) -> TupleSlot {
        self.slots[row as usize]
    }

    pub fn row(&self, row: u32) -> RowView<'_> {
        debug_assert!(row < self.num_tuples);
        RowView { columns: self, row }
    }

    pub fn rows(&self) -> impl Iterator<Item = RowView<'_>> {
        (0..self.num_tuples).map(|row| self.row(row))
    }
}

/// One tuple's view into a `ProjectedColumns`.
#[derive(Clone, Copy)]
pub struct RowView<'a> {
    columns: &'a ProjectedColumns,
    row: u32,
}

impl<'a> RowView<'a> {
    pub fn num_columns(&self) -> u16 {
        self.columns.num_columns()
    }

    pub fn column_ids(&self) -> &'a [ColId] {
        self.columns.column_ids()
    }

    pub fn tuple_slot(&self) -> TupleSlot {
        self.columns.tuple_slot(self.row)
    }

    pub fn is_null(&self, idx: u16) -> bool {
        self.value(idx).is_none()
    }

    pub fn value(&self, idx: u16) -> Option<&'a AttrValue> {
        self.columns.columns[idx as usize][self.row as usize].as_ref()
    }
}
