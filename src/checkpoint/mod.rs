//! # Checkpoints
//!
//! Periodic full-table serialization at a consistent snapshot, and the
//! recovery path that composes a checkpoint with the WAL tail: apply the
//! newest checkpoint (bringing tables to its start-timestamp snapshot), then
//! replay log records whose commit timestamp is newer.
//!
//! - [`codec`]: the on-disk section format and its checksummed reader/writer
//! - [`manager`]: checkpoint lifecycle, discovery, recovery, log replay

pub mod codec;
pub mod manager;

pub use manager::{CheckpointConfig, CheckpointManager};
