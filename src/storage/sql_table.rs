//! # SqlTable
//!
//! Binds a catalog [`Schema`] to a [`DataTable`] and its block layout. The
//! schema's columns map to physical column ids in declaration order, after
//! the reserved version column; all MVCC work is delegated to the data
//! table, and every mutation stages a redo record for the WAL.

use hashbrown::HashMap;
use std::sync::Arc;

use super::block_store::BlockStore;
use super::data_table::{DataTable, DataTableIterator};
use super::layout::{AttrSize, BlockLayout, ColId, NUM_RESERVED_COLUMNS};
use super::projection::{
    ProjectedColumns, ProjectedColumnsInitializer, ProjectedRow, ProjectedRowInitializer,
    ProjectionMap,
};
use super::TupleSlot;
use crate::catalog::{ColOid, Schema, TableOid};
use crate::error::StorageResult;
use crate::mvcc::TransactionContext;
use crate::wal::record::{RedoKind, RedoRecord};

pub struct SqlTable {
    oid: TableOid,
    schema: Schema,
    table: Arc<DataTable>,
    oid_to_id: HashMap<ColOid, ColId>,
    id_to_oid: HashMap<ColId, ColOid>,
}

impl SqlTable {
    pub fn new(block_store: Arc<BlockStore>, schema: Schema, oid: TableOid) -> Self {
        let mut attr_sizes = Vec::with_capacity(schema.num_columns() + 1);
        attr_sizes.push(AttrSize::Fixed(8));
        let mut oid_to_id = HashMap::new();
        let mut id_to_oid = HashMap::new();
        for (position, column) in schema.columns().iter().enumerate() {
            let id = ColId(position as u16 + NUM_RESERVED_COLUMNS);
            attr_sizes.push(match column.type_id().fixed_size() {
                Some(width) => AttrSize::Fixed(width),
                None => AttrSize::Varlen,
            });
            oid_to_id.insert(column.oid(), id);
            id_to_oid.insert(id, column.oid());
        }
        let layout = BlockLayout::new(attr_sizes);
        Self {
            oid,
            schema,
            table: Arc::new(DataTable::new(block_store, layout)),
            oid_to_id,
            id_to_oid,
        }
    }

    pub fn oid(&self) -> TableOid {
        self.oid
    }

    pub fn schema(&self) -> &Schema {
        &self.schema
    }

    pub fn data_table(&self) -> &Arc<DataTable> {
        &self.table
    }

    pub fn col_id_for_oid(&self, oid: ColOid) -> Option<ColId> {
        self.oid_to_id.get(&oid).copied()
    }

    pub fn col_oid_for_id(&self, id: ColId) -> Option<ColOid> {
        self.id_to_oid.get(&id).copied()
    }

    /// Projection metadata for a row over the given column oids: the
    /// initializer (physical column ids in the given order) and the map from
    /// oid to projection list index.
    pub fn initializer_for_projected_row(
        &self,
        col_oids: &[ColOid],
    ) -> (ProjectedRowInitializer, ProjectionMap) {
        let (col_ids, map) = self.translate(col_oids);
        (self.table.initializer_for_projected_row(col_ids), map)
    }

    pub fn initializer_for_projected_columns(
        &self,
        col_oids: &[ColOid],
        max_tuples: u32,
    ) -> (ProjectedColumnsInitializer, ProjectionMap) {
        let (col_ids, map) = self.translate(col_oids);
        (
            self.table.initializer_for_projected_columns(col_ids, max_tuples),
            map,
        )
    }

    fn translate(&self, col_oids: &[ColOid]) -> (Vec<ColId>, ProjectionMap) {
        let mut col_ids = Vec::with_capacity(col_oids.len());
        let mut map = ProjectionMap::with_capacity(col_oids.len());
        for (idx, &oid) in col_oids.iter().enumerate() {
            let id = self
                .col_id_for_oid(oid)
                .unwrap_or_else(|| panic!("column oid {:?} not in schema", oid));
            col_ids.push(id);
            map.insert(oid, idx as u16);
        }
        (col_ids, map)
    }

    pub fn insert(
        &self,
        txn: &mut TransactionContext,
        row: &ProjectedRow,
    ) -> StorageResult<TupleSlot> {
        let slot = self.table.insert(txn, row)?;
        txn.stage_write(RedoRecord {
            kind: RedoKind::Insert,
            table_oid: self.oid,
            slot,
            delta: row.clone(),
        });
        Ok(slot)
    }

    pub fn select(&self, txn: &TransactionContext, slot: TupleSlot, out: &mut ProjectedRow) -> bool {
        self.table.select(txn, slot, out)
    }

    /// Returns `Ok(false)` on a write-write conflict; the caller must abort.
    pub fn update(
        &self,
        txn: &mut TransactionContext,
        slot: TupleSlot,
        row: &ProjectedRow,
    ) -> StorageResult<bool> {
        if !self.table.update(txn, slot, row)? {
            return Ok(false);
        }
        txn.stage_write(RedoRecord {
            kind: RedoKind::Update,
            table_oid: self.oid,
            slot,
            delta: row.clone(),
        });
        Ok(true)
    }

    pub fn begin(&self) -> DataTableIterator {
        self.table.begin()
    }

    pub fn scan(
        &self,
        txn: &TransactionContext,
        iter: &mut DataTableIterator,
        out: &mut ProjectedColumns,
    ) {
        self.table.scan(txn, iter, out)
    }
}
