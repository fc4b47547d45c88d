//! # Catalog Types
//!
//! The schema description consumed by the storage layer. The catalog proper
//! (self-describing metadata tables, bootstrap, teardown) lives above this
//! crate; storage only reads column oids, types, nullability and varlen caps,
//! and passes them through unchanged.

mod schema;

pub use schema::{Column, Schema, TypeId};

/// Logical identifier of a table, assigned by the catalog.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TableOid(pub u64);

/// Logical identifier of a column within a table, assigned by the catalog.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ColOid(pub u64);
