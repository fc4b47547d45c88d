//! # Write-Ahead Log
//!
//! Per-operation redo records shaped from transactions' staged writes,
//! appended to a durable log at commit. Recovery replays the log tail on top
//! of the latest checkpoint (see `checkpoint`).
//!
//! - [`record`]: staged redo records and the on-disk frame codec
//! - [`log_manager`]: the queue-and-flush manager

pub mod log_manager;
pub mod record;

pub use log_manager::LogManager;
pub use record::{RedoKind, RedoRecord};
