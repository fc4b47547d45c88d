//! # Undo Records and Version Chains
//!
//! Every mutation installs one `UndoRecord` at the head of the affected
//! slot's version chain. The record carries the before-image of the change:
//! an insert's before-image is "the tuple did not exist", an update's is the
//! old values of the columns it touched. Walking the chain from a slot and
//! applying before-images newest to oldest reconstructs any snapshot still
//! reachable by a live transaction.
//!
//! ## Timestamp encoding
//!
//! The commit timestamp field is one atomic u64 that doubles as an ownership
//! marker while the creating transaction is in flight:
//!
//! ```text
//! +-+---------------------------------------------------------------+
//! |U|  low 63 bits                                                  |
//! +-+---------------------------------------------------------------+
//!  U = 1: uncommitted, low bits are the owner's start timestamp
//!  U = 0: committed, the value is the commit timestamp
//! ```
//!
//! Commit publishes the final timestamp with a single atomic store; a reader
//! that still observes the owned encoding treats the record as uncommitted.
//!
//! ## Ownership
//!
//! Records are shared between the slot's chain (one `Arc` link) and the
//! creating transaction, which must keep them reachable for rollback. The
//! garbage collector first detaches a dead transaction's records from their
//! chains, then drops the transaction context one pass later, releasing the
//! last owning references while any straggling reader still holds its own
//! clone.

use parking_lot::Mutex;
use smallvec::SmallVec;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use super::Timestamp;
use crate::storage::data_table::DataTable;
use crate::storage::layout::VARLEN_CELL_SIZE;
use crate::storage::projection::ProjectedRow;
use crate::storage::TupleSlot;

const UNCOMMITTED_BIT: u64 = 1 << 63;

/// Encodes "uncommitted, owned by the transaction that started at `start`".
pub fn owned_by(start: Timestamp) -> u64 {
    debug_assert_eq!(start & UNCOMMITTED_BIT, 0);
    start | UNCOMMITTED_BIT
}

pub fn is_uncommitted(raw: u64) -> bool {
    raw & UNCOMMITTED_BIT != 0
}

pub fn owner_of(raw: u64) -> Timestamp {
    debug_assert!(is_uncommitted(raw));
    raw & !UNCOMMITTED_BIT
}

/// Raw 16-byte varlen cells captured alongside an update's before-image so an
/// abort can restore the block bytes exactly (handles included).
pub type CapturedVarlenCells = SmallVec<[(u16, [u8; VARLEN_CELL_SIZE]); 2]>;

/// The before-image half of a record.
pub enum UndoPayload {
    /// Undoing this record removes the tuple: the slot was free before.
    Insert,
    /// Old values of the updated columns, plus the raw varlen cells needed
    /// for in-place restore on abort.
    Update {
        before: ProjectedRow,
        varlen_cells: CapturedVarlenCells,
    },
}

pub struct UndoRecord {
    timestamp: AtomicU64,
    table: Weak<DataTable>,
    slot: TupleSlot,
    next: Mutex<Option<Arc<UndoRecord>>>,
    payload: UndoPayload,
}

impl UndoRecord {
    pub fn new_insert(owner_start: Timestamp, table: Weak<DataTable>, slot: TupleSlot) -> Arc<Self> {
        Arc::new(Self {
            timestamp: AtomicU64::new(owned_by(owner_start)),
            table,
            slot,
            next: Mutex::new(None),
            payload: UndoPayload::Insert,
        })
    }

    pub fn new_update(
        owner_start: Timestamp,
        table: Weak<DataTable>,
        slot: TupleSlot,
        before: ProjectedRow,
        varlen_cells: CapturedVarlenCells,
        next: Option<Arc<UndoRecord>>,
    ) -> Arc<Self> {
        Arc::new(Self {
            timestamp: AtomicU64::new(owned_by(owner_start)),
            table,
            slot,
            next: Mutex::new(next),
            payload: UndoPayload::Update {
                before,
                varlen_cells,
            },
        })
    }

    pub fn timestamp_raw(&self) -> u64 {
        self.timestamp.load(Ordering::SeqCst)
    }

    /// Stamps the commit timestamp. One store per record; this is the
    /// publication point for the version.
    pub fn publish_commit(&self, commit: Timestamp) {
        debug_assert!(is_uncommitted(self.timestamp.load(Ordering::Relaxed)));
        self.timestamp.store(commit, Ordering::SeqCst);
    }

    /// Whether the version this record *produced* is visible to a reader
    /// with the given start timestamp: committed at or before the snapshot,
    /// or written by the reader itself.
    pub fn visible_to(&self, reader_start: Timestamp) -> bool {
        let raw = self.timestamp_raw();
        if is_uncommitted(raw) {
            owner_of(raw) == reader_start
        } else {
            raw <= reader_start
        }
    }

    pub fn table(&self) -> &Weak<DataTable> {
        &self.table
    }

    pub fn slot(&self) -> TupleSlot {
        self.slot
    }

    pub fn payload(&self) -> &UndoPayload {
        &self.payload
    }

    pub fn next(&self) -> Option<Arc<UndoRecord>> {
        self.next.lock().clone()
    }

    /// Replaces the tail link; used only while holding the slot's chain lock.
    pub(crate) fn next_cell(&self) -> &Mutex<Option<Arc<UndoRecord>>> {
        &self.next
    }
}

impl std::fmt::Debug for UndoRecord {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let raw = self.timestamp_raw();
        let mut s = f.debug_struct("UndoRecord");
        if is_uncommitted(raw) {
            s.field("owner", &owner_of(raw));
        } else {
            s.field("commit", &raw);
        }
        s.field("slot", &self.slot)
            .field(
                "kind",
                &match self.payload {
                    UndoPayload::Insert => "insert",
                    UndoPayload::Update { .. } => "update",
                },
            )
            .finish()
    }
}
