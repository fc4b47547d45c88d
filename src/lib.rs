//! # StrataDB Storage Core
//!
//! The storage and transaction core of a relational database: durable,
//! multi-versioned tables of fixed-size columnar blocks, accessed under
//! snapshot-isolation transactions, persisted through a redo write-ahead log
//! and periodic full-table checkpoints. A crash-restart replay of the newest
//! checkpoint plus the WAL tail reconstructs the logical table state as
//! observed by committed transactions.
//!
//! ## Architecture
//!
//! ```text
//! ┌───────────────────────────────────────────────┐
//! │        SqlTable (schema-aware adapter)        │
//! ├───────────────────────────────────────────────┤
//! │   DataTable (MVCC insert/select/update/scan)  │
//! ├──────────────────────┬────────────────────────┤
//! │  Blocks + layout +   │  Version chains +      │
//! │  access strategy     │  TransactionManager    │
//! ├──────────────────────┴────────────────────────┤
//! │   LogManager (WAL)   │   CheckpointManager    │
//! └───────────────────────────────────────────────┘
//! ```
//!
//! A transaction stages redo records privately and installs undo records on
//! the version chains it touches. Commit draws a timestamp, publishes it on
//! every undo record, and hands the redo buffer to the WAL; abort rewinds
//! the chains in place. The garbage collector reclaims versions no snapshot
//! can reach, in two passes. The checkpoint manager scans tables inside an
//! ordinary transaction, so checkpoints are consistent snapshots even under
//! concurrent writers; recovery applies the newest checkpoint and then
//! replays the WAL tail.
//!
//! ## Module overview
//!
//! - [`storage`]: block layout, tuple access, projections, `DataTable`,
//!   `SqlTable`
//! - [`mvcc`]: timestamps, transactions, version chains, garbage collection
//! - [`wal`]: redo record framing and the log manager
//! - [`checkpoint`]: checkpoint files, discovery, recovery, log replay
//! - [`catalog`]: the schema types the storage layer consumes
//! - [`common`]: background task plumbing

pub mod catalog;
pub mod checkpoint;
pub mod common;
pub mod error;
pub mod mvcc;
pub mod storage;
pub mod wal;

pub use catalog::{ColOid, Column, Schema, TableOid, TypeId};
pub use checkpoint::{CheckpointConfig, CheckpointManager};
pub use common::PeriodicTask;
pub use error::{StorageError, StorageResult};
pub use mvcc::{GarbageCollector, Timestamp, TransactionContext, TransactionManager};
pub use storage::{BlockStore, DataTable, SqlTable, TupleSlot};
pub use wal::LogManager;
