//! # Storage Error Kinds
//!
//! Typed errors surfaced by the storage and transaction layers. Manager-level
//! code (WAL, checkpoint, recovery) wraps these into `eyre::Report` with file
//! and offset context; the storage layer itself stays typed so callers can
//! branch on the kind (a write conflict aborts a transaction, an exhausted
//! block store aborts an insert, a format error aborts recovery).

use crate::catalog::TableOid;
use crate::storage::TupleSlot;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum StorageError {
    /// The version-chain head of the slot is owned by another live
    /// transaction. The caller's transaction must abort.
    #[error("write-write conflict on slot {0:?}")]
    WriteConflict(TupleSlot),

    /// The block store is at capacity and cannot hand out another block.
    #[error("block store exhausted (capacity {capacity})")]
    BlockStoreExhausted { capacity: usize },

    /// A checkpoint or WAL record failed a structural or checksum check.
    #[error("corrupt record: {0}")]
    ChecksumOrFormat(String),

    /// A serialized column type id that this build does not know how to
    /// materialize.
    #[error("unsupported column type id {0}")]
    UnsupportedColumnType(u32),

    /// A checkpoint section or WAL record references a table that was never
    /// registered for recovery.
    #[error("table {0:?} not registered for recovery")]
    UnregisteredTable(TableOid),
}

pub type StorageResult<T> = std::result::Result<T, StorageError>;
