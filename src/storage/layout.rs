//! # Block Layout
//!
//! Describes how one fixed-size block carves its bytes into columns. The
//! layout is computed once per table and immutable afterwards; every access
//! to a tuple goes through the offsets derived here.
//!
//! ## Physical arrangement
//!
//! Columns are stored column-major. For each column, a presence bitmap (one
//! bit per slot, padded to 8 bytes) is followed by the packed cell array:
//!
//! ```text
//! +-----------+-----------+-----------+-----------+-----
//! | bitmap c0 | cells c0  | bitmap c1 | cells c1  | ...
//! +-----------+-----------+-----------+-----------+-----
//! ```
//!
//! Column 0 is reserved for version metadata; its presence bitmap doubles as
//! the slot-allocation bitmap (bit set = slot holds a live tuple). The number
//! of slots is the largest count for which all bitmaps and cell arrays fit in
//! `BLOCK_SIZE` bytes.
//!
//! Fixed-width cells are 1, 2, 4 or 8 bytes. Varlen cells are a fixed
//! `VARLEN_CELL_SIZE` bytes; see `storage::varlen` for the cell encoding.

use super::bitmap;

/// Size of one raw block in bytes.
pub const BLOCK_SIZE: usize = 64 * 1024;

/// In-block cell size of a variable-length attribute.
pub const VARLEN_CELL_SIZE: usize = 16;

/// Leading columns of every layout that carry version metadata rather than
/// user data.
pub const NUM_RESERVED_COLUMNS: u16 = 1;

/// Physical column index within a block layout.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ColId(pub u16);

/// The reserved version-metadata column.
pub const VERSION_POINTER_COLUMN: ColId = ColId(0);

/// Width of one attribute within a block.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttrSize {
    /// 1, 2, 4 or 8 bytes.
    Fixed(u8),
    Varlen,
}

impl AttrSize {
    /// Bytes the cell occupies inside the block.
    pub fn cell_size(self) -> usize {
        match self {
            AttrSize::Fixed(n) => n as usize,
            AttrSize::Varlen => VARLEN_CELL_SIZE,
        }
    }
}

/// Immutable description of a block's column offsets and capacity.
#[derive(Debug, Clone)]
pub struct BlockLayout {
    attr_sizes: Vec<AttrSize>,
    num_slots: u32,
    bitmap_offsets: Vec<usize>,
    data_offsets: Vec<usize>,
}

impl BlockLayout {
    /// Builds a layout from per-column attribute sizes. `attr_sizes[0]` must
    /// be the reserved 8-byte version column; user columns follow.
    pub fn new(attr_sizes: Vec<AttrSize>) -> Self {
        debug_assert!(attr_sizes.len() > NUM_RESERVED_COLUMNS as usize);
        debug_assert_eq!(attr_sizes[0], AttrSize::Fixed(8));
        debug_assert!(attr_sizes.len() <= u16::MAX as usize);
        for size in &attr_sizes {
            if let AttrSize::Fixed(n) = size {
                debug_assert!(matches!(n, 1 | 2 | 4 | 8));
            }
        }

        let num_slots = Self::derive_num_slots(&attr_sizes);
        let mut bitmap_offsets = Vec::with_capacity(attr_sizes.len());
        let mut data_offsets = Vec::with_capacity(attr_sizes.len());
        let mut offset = 0usize;
        for size in &attr_sizes {
            bitmap_offsets.push(offset);
            offset += pad_to_eight(bitmap::bytes_for(num_slots as usize));
            data_offsets.push(offset);
            offset += num_slots as usize * size.cell_size();
        }
        debug_assert!(offset <= BLOCK_SIZE);

        Self {
            attr_sizes,
            num_slots,
            bitmap_offsets,
            data_offsets,
        }
    }

    fn derive_num_slots(attr_sizes: &[AttrSize]) -> u32 {
        let row_bytes: usize = attr_sizes.iter().map(|s| s.cell_size()).sum();
        // First estimate ignores bitmap padding, then walk down until it fits.
        let mut n = (BLOCK_SIZE * 8) / (row_bytes * 8 + attr_sizes.len());
        while n > 1 && Self::occupied_bytes(attr_sizes, n) > BLOCK_SIZE {
            n -= 1;
        }
        assert!(
            n >= 1 && Self::occupied_bytes(attr_sizes, n) <= BLOCK_SIZE,
            "row too wide for a single block"
        );
        n as u32
    }

    fn occupied_bytes(attr_sizes: &[AttrSize], num_slots: usize) -> usize {
        attr_sizes
            .iter()
            .map(|s| pad_to_eight(bitmap::bytes_for(num_slots)) + num_slots * s.cell_size())
            .sum()
    }

    pub fn num_slots(&self) -> u32 {
        self.num_slots
    }

    pub fn num_columns(&self) -> u16 {
        self.attr_sizes.len() as u16
    }

    pub fn attr_size(&self, col: ColId) -> AttrSize {
        self.attr_sizes[col.0 as usize]
    }

    pub fn is_varlen(&self, col: ColId) -> bool {
        matches!(self.attr_sizes[col.0 as usize], AttrSize::Varlen)
    }

    /// Byte offset of the column's presence bitmap within the block.
    pub fn bitmap_offset(&self, col: ColId) -> usize {
        self.bitmap_offsets[col.0 as usize]
    }

    /// Byte offset of the column's cell array within the block.
    pub fn data_offset(&self, col: ColId) -> usize {
        self.data_offsets[col.0 as usize]
    }

    /// All user-data column ids, excluding the reserved columns.
    pub fn user_column_ids(&self) -> impl Iterator<Item = ColId> + '_ {
        (NUM_RESERVED_COLUMNS..self.num_columns()).map(ColId)
    }
}

fn pad_to_eight(n: usize) -> usize {
    n.div_ceil(8) * 8
}
