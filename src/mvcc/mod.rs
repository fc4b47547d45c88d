//! # Multi-Version Concurrency Control
//!
//! Snapshot isolation over the storage layer. Readers never block: every
//! mutation leaves a before-image on the affected slot's version chain, and a
//! reader reconstructs the image as of its start timestamp by walking the
//! chain. Writers conflict only with writers, and the first one to install
//! its record on a slot wins.
//!
//! ```text
//! begin ───► Active ───► commit ───► Committed ──► GC unlink ──► GC free
//!               │
//!               └──────► abort  ───► rewound, records popped ──► GC free
//! ```
//!
//! - [`transaction`]: timestamp allocation, `TransactionContext`, commit and
//!   abort.
//! - [`undo`]: undo records, version chains, the owned-timestamp encoding.
//! - [`gc`]: two-phase unlink/deallocate of records no snapshot can reach.

pub mod gc;
pub mod transaction;
pub mod undo;

/// Logical time. Start and commit timestamps are drawn from one counter.
pub type Timestamp = u64;

pub use gc::{GarbageCollector, GcPassReport};
pub use transaction::{TransactionContext, TransactionManager};
