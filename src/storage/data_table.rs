//! # Data Table
//!
//! MVCC tuple operations over a collection of blocks sharing one layout.
//!
//! ## Write protocol
//!
//! A mutation first wins the slot's version chain (first writer wins: the
//! chain head must be committed at or before the writer's snapshot, or owned
//! by the writer), installs an undo record carrying the before-image, and
//! only then writes the new bytes in place. The chain head is therefore
//! always sufficient to repair whatever a concurrent reader copied.
//!
//! ## Read protocol
//!
//! A read copies the requested columns under the block's read lock, with the
//! chain head re-read around the copy: if the head moved mid-copy (a writer
//! installed a record, or an abort restored bytes and popped its record) the
//! copy retries. Once copy and head agree, the reader applies before-images
//! of every record not visible to its snapshot, newest to oldest, stopping
//! at the first visible record. Out-of-line varlen cells are resolved
//! against the pool only for cells that survive the walk untouched; every
//! overwritten cell gets its value from the undo record that owns it.

use parking_lot::{Mutex, RwLock};
use smallvec::SmallVec;
use std::sync::Arc;

use super::access::TupleAccessStrategy;
use super::block::Block;
use super::block_store::BlockStore;
use super::layout::{AttrSize, BlockLayout, ColId, VARLEN_CELL_SIZE};
use super::projection::{
    AttrValue, FixedValue, ProjectedColumns, ProjectedRow, ProjectedRowInitializer,
    ProjectedColumnsInitializer,
};
use super::varlen::{self, VarlenPool};
use super::TupleSlot;
use crate::error::StorageResult;
use crate::mvcc::transaction::TransactionContext;
use crate::mvcc::undo::{CapturedVarlenCells, UndoPayload, UndoRecord};

type PendingVarlens = SmallVec<[(u16, [u8; VARLEN_CELL_SIZE]); 4]>;

/// Pointer identity of two chain-head observations. Records are never
/// re-installed once popped, so pointer equality means the chain did not
/// move between the observations.
fn same_head(a: &Option<Arc<UndoRecord>>, b: &Option<Arc<UndoRecord>>) -> bool {
    match (a, b) {
        (None, None) => true,
        (Some(a), Some(b)) => Arc::ptr_eq(a, b),
        _ => false,
    }
}

pub struct DataTable {
    layout: BlockLayout,
    block_store: Arc<BlockStore>,
    blocks: RwLock<Vec<Arc<Block>>>,
    insertion_lock: Mutex<()>,
    varlens: VarlenPool,
}

/// Cursor over a table's slots, block-sequential, slot-sequential within a
/// block. Free slots are skipped by `scan`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DataTableIterator {
    block: u32,
    slot: u32,
}

impl DataTable {
    pub fn new(block_store: Arc<BlockStore>, layout: BlockLayout) -> Self {
        Self {
            layout,
            block_store,
            blocks: RwLock::new(Vec::new()),
            insertion_lock: Mutex::new(()),
            varlens: VarlenPool::new(),
        }
    }

    pub fn layout(&self) -> &BlockLayout {
        &self.layout
    }

    pub fn varlen_pool(&self) -> &VarlenPool {
        &self.varlens
    }

    pub fn num_blocks(&self) -> usize {
        self.blocks.read().len()
    }

    pub fn begin(&self) -> DataTableIterator {
        DataTableIterator { block: 0, slot: 0 }
    }

    pub fn initializer_for_projected_row(&self, col_ids: Vec<ColId>) -> ProjectedRowInitializer {
        debug_assert!(col_ids.iter().all(|c| c.0 < self.layout.num_columns()));
        ProjectedRowInitializer::new(col_ids)
    }

    pub fn initializer_for_projected_columns(
        &self,
        col_ids: Vec<ColId>,
        max_tuples: u32,
    ) -> ProjectedColumnsInitializer {
        debug_assert!(col_ids.iter().all(|c| c.0 < self.layout.num_columns()));
        ProjectedColumnsInitializer::new(col_ids, max_tuples)
    }

    /// Inserts `row`, allocating a new block when the current one is full.
    /// The slot's chain starts with an insert record owned by `txn`, so an
    /// abort makes the slot invisible again.
    pub fn insert(
        self: &Arc<Self>,
        txn: &mut TransactionContext,
        row: &ProjectedRow,
    ) -> StorageResult<TupleSlot> {
        let (block_idx, block, slot_idx) = self.allocate_slot()?;
        let slot = TupleSlot {
            block: block_idx,
            slot: slot_idx,
        };

        let record = UndoRecord::new_insert(txn.start_time(), Arc::downgrade(self), slot);
        *block.chain(slot_idx).lock() = Some(Arc::clone(&record));
        txn.track_undo(record);

        let access = TupleAccessStrategy::new(&self.layout);
        let mut data = block.write();
        self.write_row(txn, &access, &mut data, slot_idx, row);
        // Presence last: scans only see the slot once its chain and bytes
        // are in place.
        access.set_allocated(&mut data, slot_idx);
        Ok(slot)
    }

    /// Copies the version of `slot` visible to `txn` into `out`. Returns
    /// false when no version is visible (free slot, or inserted after the
    /// snapshot).
    pub fn select(&self, txn: &TransactionContext, slot: TupleSlot, out: &mut ProjectedRow) -> bool {
        let Some(block) = self.block(slot.block) else {
            return false;
        };
        if slot.slot >= self.layout.num_slots() {
            return false;
        }

        let access = TupleAccessStrategy::new(&self.layout);
        let col_ids = out.column_ids().to_vec();
        let mut pending: PendingVarlens = SmallVec::new();

        // Copy the raw image, re-reading the chain head around the copy.
        // If the head moved, a writer installed a record or an abort
        // restored bytes mid-copy; retry until the copy and the head agree,
        // then the chain repairs whatever the copy observed.
        let head = loop {
            let before_copy = block.chain(slot.slot).lock().clone();
            out.clear();
            pending.clear();
            {
                let data = block.read();
                if !access.allocated(&data, slot.slot) {
                    return false;
                }
                for (idx, &col) in col_ids.iter().enumerate() {
                    let idx = idx as u16;
                    if access.is_null(&data, slot.slot, col) {
                        out.set_null(idx);
                    } else if self.layout.is_varlen(col) {
                        let mut cell = [0u8; VARLEN_CELL_SIZE];
                        cell.copy_from_slice(access.access(&data, slot.slot, col));
                        pending.push((idx, cell));
                    } else {
                        let value = FixedValue::from_le_slice(access.access(&data, slot.slot, col));
                        out.set_value(idx, Some(AttrValue::Fixed(value)));
                    }
                }
            }
            let after_copy = block.chain(slot.slot).lock().clone();
            if same_head(&before_copy, &after_copy) {
                break after_copy;
            }
        };

        let mut version = head;
        while let Some(record) = version {
            if record.visible_to(txn.start_time()) {
                break;
            }
            match record.payload() {
                UndoPayload::Insert => return false,
                UndoPayload::Update { before, .. } => {
                    Self::apply_before_image(before, out, &mut pending);
                }
            }
            version = record.next();
        }

        for (idx, cell) in pending {
            out.set_value(idx, self.resolve_varlen_cell(&cell));
        }
        true
    }

    /// Updates the columns in `row` in place. Returns `Ok(false)` on a
    /// write-write conflict; the caller's transaction must then abort.
    ///
    /// An update whose values equal the current ones still installs an undo
    /// record: the chain head is the slot's write lock, and a no-op delta
    /// must still exclude concurrent writers.
    pub fn update(
        self: &Arc<Self>,
        txn: &mut TransactionContext,
        slot: TupleSlot,
        row: &ProjectedRow,
    ) -> StorageResult<bool> {
        let Some(block) = self.block(slot.block) else {
            return Ok(false);
        };
        if slot.slot >= self.layout.num_slots() {
            return Ok(false);
        }
        let access = TupleAccessStrategy::new(&self.layout);

        let mut head = block.chain(slot.slot).lock();
        if let Some(current) = head.as_ref() {
            if !current.visible_to(txn.start_time()) {
                return Ok(false);
            }
        }

        // Before-image of exactly the columns this update touches.
        let mut displaced: SmallVec<[u64; 2]> = SmallVec::new();
        let mut varlen_cells = CapturedVarlenCells::new();
        let init = ProjectedRowInitializer::new(row.column_ids().to_vec());
        let mut before = init.initialize();
        {
            let data = block.read();
            if !access.allocated(&data, slot.slot) {
                return Ok(false);
            }
            for (idx, &col) in row.column_ids().iter().enumerate() {
                let idx = idx as u16;
                if access.is_null(&data, slot.slot, col) {
                    before.set_null(idx);
                } else if self.layout.is_varlen(col) {
                    let mut cell = [0u8; VARLEN_CELL_SIZE];
                    cell.copy_from_slice(access.access(&data, slot.slot, col));
                    before.set_value(idx, self.resolve_varlen_cell(&cell));
                    if let Some(handle) = varlen::cell_handle(&cell) {
                        displaced.push(handle);
                    }
                    varlen_cells.push((idx, cell));
                } else {
                    let value = FixedValue::from_le_slice(access.access(&data, slot.slot, col));
                    before.set_value(idx, Some(AttrValue::Fixed(value)));
                }
            }
        }

        let record = UndoRecord::new_update(
            txn.start_time(),
            Arc::downgrade(self),
            slot,
            before,
            varlen_cells,
            head.clone(),
        );
        *head = Some(Arc::clone(&record));
        drop(head);
        txn.track_undo(record);
        for handle in displaced {
            txn.defer_varlen_free_on_commit(Arc::downgrade(self), handle);
        }

        let mut data = block.write();
        self.write_row(txn, &access, &mut data, slot.slot, row);
        Ok(true)
    }

    /// Fills `out` with up to its capacity of visible tuples starting at
    /// `iter`, advancing `iter` past the last slot examined.
    pub fn scan(
        &self,
        txn: &TransactionContext,
        iter: &mut DataTableIterator,
        out: &mut ProjectedColumns,
    ) {
        out.reset();
        let row_init = ProjectedRowInitializer::new(out.column_ids().to_vec());
        let mut row = row_init.initialize();
        loop {
            if out.is_full() {
                break;
            }
            let (block, last_block) = {
                let blocks = self.blocks.read();
                match blocks.get(iter.block as usize) {
                    Some(block) => (Arc::clone(block), iter.block as usize + 1 >= blocks.len()),
                    None => break,
                }
            };
            if iter.slot >= block.insert_head() {
                if last_block {
                    break;
                }
                iter.block += 1;
                iter.slot = 0;
                continue;
            }
            let slot = TupleSlot {
                block: iter.block,
                slot: iter.slot,
            };
            iter.slot += 1;
            if self.select(txn, slot, &mut row) {
                out.append(slot, row.values());
            }
        }
    }

    /// Restores a record's before-image in place and pops it off its chain.
    /// Called by the transaction manager during abort, newest record first.
    ///
    /// Lock order is chain head, then block bytes; every path that needs
    /// both takes them in that order.
    pub(crate) fn rollback(&self, record: &Arc<UndoRecord>) {
        let slot = record.slot();
        let Some(block) = self.block(slot.block) else {
            return;
        };
        let access = TupleAccessStrategy::new(&self.layout);
        let mut head = block.chain(slot.slot).lock();
        match record.payload() {
            UndoPayload::Insert => {
                let mut data = block.write();
                access.deallocate(&mut data, slot.slot);
            }
            UndoPayload::Update {
                before,
                varlen_cells,
            } => {
                let mut data = block.write();
                for (idx, &col) in before.column_ids().iter().enumerate() {
                    let idx = idx as u16;
                    match before.value(idx) {
                        None => access.set_null(&mut data, slot.slot, col),
                        Some(AttrValue::Fixed(value)) => {
                            access
                                .access_force_not_null(&mut data, slot.slot, col)
                                .copy_from_slice(value.as_bytes());
                        }
                        Some(AttrValue::Varlen(_)) => {
                            let cell = varlen_cells
                                .iter()
                                .find(|(i, _)| *i == idx)
                                .map(|(_, c)| *c)
                                .unwrap_or([0u8; VARLEN_CELL_SIZE]);
                            access
                                .access_force_not_null(&mut data, slot.slot, col)
                                .copy_from_slice(&cell);
                        }
                    }
                }
            }
        }
        // Pop the chain head. The aborting transaction's records sit at the
        // head in stack order, so each rollback step removes exactly its own
        // record.
        debug_assert!(head.as_ref().is_some_and(|h| Arc::ptr_eq(h, record)));
        *head = record.next();
    }

    /// Detaches a committed record from its chain so no future reader can
    /// traverse to it. The record's own tail link is left intact for readers
    /// already mid-walk. Called by the garbage collector.
    ///
    /// The head lock is held for the whole walk so a concurrent abort cannot
    /// restructure the chain underneath the cursor.
    pub(crate) fn unlink(&self, record: &Arc<UndoRecord>) {
        let slot = record.slot();
        let Some(block) = self.block(slot.block) else {
            return;
        };
        let mut head = block.chain(slot.slot).lock();
        if head.as_ref().is_some_and(|h| Arc::ptr_eq(h, record)) {
            *head = record.next();
            return;
        }
        let mut cursor = head.clone();
        while let Some(current) = cursor {
            let mut link = current.next_cell().lock();
            if link.as_ref().is_some_and(|n| Arc::ptr_eq(n, record)) {
                *link = record.next();
                return;
            }
            cursor = link.clone();
        }
    }

    fn apply_before_image(
        before: &ProjectedRow,
        out: &mut ProjectedRow,
        pending: &mut PendingVarlens,
    ) {
        for (idx, &col) in before.column_ids().iter().enumerate() {
            if let Some(out_idx) = out.index_of(col) {
                out.set_value(out_idx, before.value(idx as u16).cloned());
                pending.retain(|(i, _)| *i != out_idx);
            }
        }
    }

    fn resolve_varlen_cell(&self, cell: &[u8; VARLEN_CELL_SIZE]) -> Option<AttrValue> {
        match varlen::read_cell(cell) {
            varlen::VarlenCell::Inline(entry) => Some(AttrValue::Varlen(entry)),
            varlen::VarlenCell::OutOfLine { handle, .. } => {
                let entry = self.varlens.get(handle);
                debug_assert!(entry.is_some(), "dangling varlen handle {handle}");
                entry.map(AttrValue::Varlen)
            }
        }
    }

    fn write_row(
        self: &Arc<Self>,
        txn: &mut TransactionContext,
        access: &TupleAccessStrategy<'_>,
        data: &mut [u8],
        slot: u32,
        row: &ProjectedRow,
    ) {
        for (idx, &col) in row.column_ids().iter().enumerate() {
            match row.value(idx as u16) {
                None => access.set_null(data, slot, col),
                Some(AttrValue::Fixed(value)) => {
                    debug_assert_eq!(
                        AttrSize::Fixed(value.width()),
                        self.layout.attr_size(col),
                        "fixed value width must match the column"
                    );
                    access
                        .access_force_not_null(data, slot, col)
                        .copy_from_slice(value.as_bytes());
                }
                Some(AttrValue::Varlen(entry)) => {
                    debug_assert!(self.layout.is_varlen(col));
                    let cell = access.access_force_not_null(data, slot, col);
                    if let Some(handle) = varlen::write_cell(cell, entry, &self.varlens) {
                        txn.defer_varlen_free_on_abort(Arc::downgrade(self), handle);
                    }
                }
            }
        }
    }

    fn block(&self, idx: u32) -> Option<Arc<Block>> {
        self.blocks.read().get(idx as usize).cloned()
    }

    fn allocate_slot(&self) -> StorageResult<(u32, Arc<Block>, u32)> {
        loop {
            let (candidate, known_blocks) = {
                let blocks = self.blocks.read();
                (
                    blocks.last().map(|b| (blocks.len() as u32 - 1, Arc::clone(b))),
                    blocks.len(),
                )
            };
            if let Some((idx, block)) = candidate {
                if let Some(slot) = block.try_allocate() {
                    return Ok((idx, block, slot));
                }
            }
            let _guard = self.insertion_lock.lock();
            if self.blocks.read().len() != known_blocks {
                // Another thread grew the table while we waited.
                continue;
            }
            let buffer = self.block_store.acquire()?;
            self.blocks
                .write()
                .push(Arc::new(Block::new(buffer, &self.layout)));
        }
    }
}

impl Drop for DataTable {
    fn drop(&mut self) {
        let blocks = std::mem::take(&mut *self.blocks.write());
        for block in blocks {
            if let Ok(block) = Arc::try_unwrap(block) {
                self.block_store.release(block.into_buffer());
            }
        }
    }
}
