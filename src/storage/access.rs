//! # Tuple Access Strategy
//!
//! Encodes and decodes one tuple within a block's raw bytes, given the
//! block's layout. All byte arithmetic for (slot, column) addressing lives
//! here; `DataTable` never touches offsets directly.
//!
//! Contract: `access_with_null_check` returning `None` means the attribute is
//! null. Writers set the presence bit first (`set_not_null` /
//! `access_force_not_null`) to obtain a writable cell.

use super::bitmap;
use super::layout::{BlockLayout, ColId, VERSION_POINTER_COLUMN};

/// Stateless view over a layout; all methods take the block bytes explicitly
/// so callers can hold whichever lock guard they need.
#[derive(Clone, Copy)]
pub struct TupleAccessStrategy<'a> {
    layout: &'a BlockLayout,
}

impl<'a> TupleAccessStrategy<'a> {
    pub fn new(layout: &'a BlockLayout) -> Self {
        Self { layout }
    }

    pub fn layout(&self) -> &'a BlockLayout {
        self.layout
    }

    fn cell_range(&self, slot: u32, col: ColId) -> std::ops::Range<usize> {
        debug_assert!(slot < self.layout.num_slots());
        let size = self.layout.attr_size(col).cell_size();
        let start = self.layout.data_offset(col) + slot as usize * size;
        start..start + size
    }

    /// Whether the slot holds a live tuple (presence bit of the reserved
    /// version column).
    pub fn allocated(&self, data: &[u8], slot: u32) -> bool {
        let off = self.layout.bitmap_offset(VERSION_POINTER_COLUMN);
        bitmap::test(&data[off..], slot as usize)
    }

    /// Marks the slot live. Called after its attributes are in place so scans
    /// never observe a half-written tuple.
    pub fn set_allocated(&self, data: &mut [u8], slot: u32) {
        let off = self.layout.bitmap_offset(VERSION_POINTER_COLUMN);
        bitmap::set(&mut data[off..], slot as usize);
    }

    /// Frees the slot (aborted insert). The slot is skipped by scans and
    /// never handed out again.
    pub fn deallocate(&self, data: &mut [u8], slot: u32) {
        let off = self.layout.bitmap_offset(VERSION_POINTER_COLUMN);
        bitmap::clear(&mut data[off..], slot as usize);
    }

    pub fn is_null(&self, data: &[u8], slot: u32, col: ColId) -> bool {
        let off = self.layout.bitmap_offset(col);
        !bitmap::test(&data[off..], slot as usize)
    }

    /// The attribute's cell, or `None` when the attribute is null.
    pub fn access_with_null_check<'b>(
        &self,
        data: &'b [u8],
        slot: u32,
        col: ColId,
    ) -> Option<&'b [u8]> {
        if self.is_null(data, slot, col) {
            return None;
        }
        Some(&data[self.cell_range(slot, col)])
    }

    /// The attribute's cell regardless of nullness, for readers that checked
    /// the bitmap themselves.
    pub fn access<'b>(&self, data: &'b [u8], slot: u32, col: ColId) -> &'b [u8] {
        &data[self.cell_range(slot, col)]
    }

    /// Sets the presence bit and returns the writable cell.
    pub fn access_force_not_null<'b>(
        &self,
        data: &'b mut [u8],
        slot: u32,
        col: ColId,
    ) -> &'b mut [u8] {
        self.set_not_null(data, slot, col);
        let range = self.cell_range(slot, col);
        &mut data[range]
    }

    pub fn set_null(&self, data: &mut [u8], slot: u32, col: ColId) {
        let off = self.layout.bitmap_offset(col);
        bitmap::clear(&mut data[off..], slot as usize);
    }

    pub fn set_not_null(&self, data: &mut [u8], slot: u32, col: ColId) {
        let off = self.layout.bitmap_offset(col);
        bitmap::set(&mut data[off..], slot as usize);
    }
}
