//! # Block
//!
//! One fixed-size unit of tuple storage: the raw columnar bytes drawn from
//! the block store, a monotonically advancing insert cursor, and the per-slot
//! version-chain heads.
//!
//! The raw bytes are guarded by an `RwLock`: scans and selects copy under the
//! read lock, writers mutate under the write lock, so a reader's copy is
//! always a consistent snapshot of the block and the version chain repairs
//! whatever the copy is missing. Chain heads live in a typed side array; the
//! reserved version column inside the raw bytes contributes its presence
//! bitmap (the slot-allocation bitmap) and keeps the slot byte budget stable.

use parking_lot::{Mutex, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use crate::mvcc::undo::UndoRecord;

use super::layout::BlockLayout;

pub type VersionChainHead = Mutex<Option<Arc<UndoRecord>>>;

pub struct Block {
    data: RwLock<Box<[u8]>>,
    insert_head: AtomicU32,
    chains: Box<[VersionChainHead]>,
}

impl Block {
    pub fn new(buffer: Box<[u8]>, layout: &BlockLayout) -> Self {
        let chains = (0..layout.num_slots())
            .map(|_| Mutex::new(None))
            .collect::<Vec<_>>()
            .into_boxed_slice();
        Self {
            data: RwLock::new(buffer),
            insert_head: AtomicU32::new(0),
            chains,
        }
    }

    /// Claims the next free slot, or `None` when the block is full. Slots are
    /// handed out sequentially and never reused.
    pub fn try_allocate(&self) -> Option<u32> {
        let num_slots = self.chains.len() as u32;
        self.insert_head
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |head| {
                (head < num_slots).then_some(head + 1)
            })
            .ok()
    }

    pub fn is_full(&self) -> bool {
        self.insert_head.load(Ordering::Acquire) >= self.chains.len() as u32
    }

    /// Slots handed out so far; slots at or past this index are untouched.
    pub fn insert_head(&self) -> u32 {
        self.insert_head.load(Ordering::Acquire)
    }

    pub fn chain(&self, slot: u32) -> &VersionChainHead {
        &self.chains[slot as usize]
    }

    pub fn read(&self) -> RwLockReadGuard<'_, Box<[u8]>> {
        self.data.read()
    }

    pub fn write(&self) -> RwLockWriteGuard<'_, Box<[u8]>> {
        self.data.write()
    }

    /// Tears the block down, yielding its buffer back for recycling.
    pub fn into_buffer(self) -> Box<[u8]> {
        self.data.into_inner()
    }
}
