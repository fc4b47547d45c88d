//! # Variable-Length Attributes
//!
//! A varlen cell inside a block is `VARLEN_CELL_SIZE` (16) bytes. Short
//! values are inlined into the cell; longer values live out of line in the
//! table's varlen pool and the cell stores their handle:
//!
//! ```text
//! inline:       +-----+------------------------------+
//!               | len |  content (up to 15 bytes)    |
//!               +-----+------------------------------+
//! out-of-line:  +------+-----+-----------+-----------+
//!               | 0xFF | pad | size: u32 | handle:u64|
//!               +------+-----+-----------+-----------+
//! ```
//!
//! `VarlenEntry` is the owned value form. Two entries are equal iff their
//! byte contents are equal; whether a value happens to be inlined is a
//! storage detail and never observable through comparison.
//!
//! Out-of-line payloads are `Arc<[u8]>`: projected rows and undo
//! before-images hold their own clones, so a pool entry can be dropped once
//! the garbage collector proves no snapshot can reach the block cell that
//! referenced it.

use hashbrown::HashMap;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use super::layout::VARLEN_CELL_SIZE;

/// Longest content that fits inside the cell itself.
pub const VARLEN_INLINE_CAP: usize = VARLEN_CELL_SIZE - 1;

const OUT_OF_LINE_TAG: u8 = 0xFF;

/// An owned variable-length value.
#[derive(Clone)]
pub struct VarlenEntry {
    content: VarlenContent,
}

#[derive(Clone)]
enum VarlenContent {
    Inline { len: u8, data: [u8; VARLEN_INLINE_CAP] },
    Heap(Arc<[u8]>),
}

impl VarlenEntry {
    /// Copies `bytes` into an entry, inlining when it fits.
    pub fn from_slice(bytes: &[u8]) -> Self {
        if bytes.len() <= VARLEN_INLINE_CAP {
            let mut data = [0u8; VARLEN_INLINE_CAP];
            data[..bytes.len()].copy_from_slice(bytes);
            Self {
                content: VarlenContent::Inline {
                    len: bytes.len() as u8,
                    data,
                },
            }
        } else {
            Self {
                content: VarlenContent::Heap(Arc::from(bytes)),
            }
        }
    }

    pub fn as_bytes(&self) -> &[u8] {
        match &self.content {
            VarlenContent::Inline { len, data } => &data[..*len as usize],
            VarlenContent::Heap(bytes) => bytes,
        }
    }

    pub fn len(&self) -> usize {
        self.as_bytes().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn is_inlined(&self) -> bool {
        matches!(self.content, VarlenContent::Inline { .. })
    }
}

impl PartialEq for VarlenEntry {
    fn eq(&self, other: &Self) -> bool {
        self.as_bytes() == other.as_bytes()
    }
}

impl Eq for VarlenEntry {}

impl std::fmt::Debug for VarlenEntry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VarlenEntry")
            .field("len", &self.len())
            .field("inlined", &self.is_inlined())
            .finish()
    }
}

/// Decoded form of a varlen block cell.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VarlenCell {
    Inline(VarlenEntry),
    OutOfLine { size: u32, handle: u64 },
}

/// Reads a 16-byte varlen cell.
pub fn read_cell(cell: &[u8]) -> VarlenCell {
    debug_assert_eq!(cell.len(), VARLEN_CELL_SIZE);
    if cell[0] == OUT_OF_LINE_TAG {
        let size = u32::from_le_bytes(cell[4..8].try_into().unwrap());
        let handle = u64::from_le_bytes(cell[8..16].try_into().unwrap());
        VarlenCell::OutOfLine { size, handle }
    } else {
        let len = cell[0] as usize;
        debug_assert!(len <= VARLEN_INLINE_CAP);
        VarlenCell::Inline(VarlenEntry::from_slice(&cell[1..1 + len]))
    }
}

/// Writes `entry` into a 16-byte cell, spilling to `pool` when it does not
/// inline. Returns the freshly allocated handle on spill so the caller can
/// schedule it for reclamation if its transaction aborts.
pub fn write_cell(cell: &mut [u8], entry: &VarlenEntry, pool: &VarlenPool) -> Option<u64> {
    debug_assert_eq!(cell.len(), VARLEN_CELL_SIZE);
    let bytes = entry.as_bytes();
    if bytes.len() <= VARLEN_INLINE_CAP {
        cell.fill(0);
        cell[0] = bytes.len() as u8;
        cell[1..1 + bytes.len()].copy_from_slice(bytes);
        None
    } else {
        let handle = pool.insert(entry.clone());
        cell.fill(0);
        cell[0] = OUT_OF_LINE_TAG;
        cell[4..8].copy_from_slice(&(bytes.len() as u32).to_le_bytes());
        cell[8..16].copy_from_slice(&handle.to_le_bytes());
        Some(handle)
    }
}

/// Handle on a cell that currently stores an out-of-line value, if any.
pub fn cell_handle(cell: &[u8]) -> Option<u64> {
    match read_cell(cell) {
        VarlenCell::OutOfLine { handle, .. } => Some(handle),
        VarlenCell::Inline(_) => None,
    }
}

/// Per-table registry of out-of-line varlen payloads, keyed by handle.
pub struct VarlenPool {
    entries: Mutex<HashMap<u64, VarlenEntry>>,
    next_handle: AtomicU64,
}

impl VarlenPool {
    pub fn new() -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            // Handle 0 is never allocated so a zeroed cell is unambiguous.
            next_handle: AtomicU64::new(1),
        }
    }

    pub fn insert(&self, entry: VarlenEntry) -> u64 {
        let handle = self.next_handle.fetch_add(1, Ordering::Relaxed);
        self.entries.lock().insert(handle, entry);
        handle
    }

    pub fn get(&self, handle: u64) -> Option<VarlenEntry> {
        self.entries.lock().get(&handle).cloned()
    }

    pub fn remove(&self, handle: u64) {
        self.entries.lock().remove(&handle);
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for VarlenPool {
    fn default() -> Self {
        Self::new()
    }
}
