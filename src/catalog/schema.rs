//! Schema, column and type definitions.
//!
//! A `Schema` is an ordered list of columns. Column order is the order the
//! catalog declared them in; the storage layer derives its physical block
//! layout from it but never reorders the logical view.

use super::ColOid;
use crate::error::StorageError;

/// Value types the storage layer can materialize. Fixed-width types map to
/// 1/2/4/8 byte cells; `Varchar` and `Varbinary` map to varlen cells.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TypeId {
    TinyInt,
    SmallInt,
    Integer,
    BigInt,
    Varchar,
    Varbinary,
}

impl TypeId {
    /// Fixed attribute width in bytes, or `None` for varlen types.
    pub fn fixed_size(self) -> Option<u8> {
        match self {
            TypeId::TinyInt => Some(1),
            TypeId::SmallInt => Some(2),
            TypeId::Integer => Some(4),
            TypeId::BigInt => Some(8),
            TypeId::Varchar | TypeId::Varbinary => None,
        }
    }

    pub fn is_varlen(self) -> bool {
        self.fixed_size().is_none()
    }

    /// Stable wire encoding used by the checkpoint file format.
    pub fn to_wire(self) -> u32 {
        match self {
            TypeId::TinyInt => 1,
            TypeId::SmallInt => 2,
            TypeId::Integer => 3,
            TypeId::BigInt => 4,
            TypeId::Varchar => 5,
            TypeId::Varbinary => 6,
        }
    }

    pub fn from_wire(raw: u32) -> Result<Self, StorageError> {
        match raw {
            1 => Ok(TypeId::TinyInt),
            2 => Ok(TypeId::SmallInt),
            3 => Ok(TypeId::Integer),
            4 => Ok(TypeId::BigInt),
            5 => Ok(TypeId::Varchar),
            6 => Ok(TypeId::Varbinary),
            other => Err(StorageError::UnsupportedColumnType(other)),
        }
    }
}

/// One column of a schema.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Column {
    name: String,
    type_id: TypeId,
    nullable: bool,
    oid: ColOid,
    max_varlen_size: Option<u32>,
}

impl Column {
    pub fn new(name: impl Into<String>, type_id: TypeId, nullable: bool, oid: ColOid) -> Self {
        Self {
            name: name.into(),
            type_id,
            nullable,
            oid,
            max_varlen_size: None,
        }
    }

    pub fn with_max_varlen_size(mut self, max: u32) -> Self {
        debug_assert!(self.type_id.is_varlen());
        self.max_varlen_size = Some(max);
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn type_id(&self) -> TypeId {
        self.type_id
    }

    pub fn nullable(&self) -> bool {
        self.nullable
    }

    pub fn oid(&self) -> ColOid {
        self.oid
    }

    pub fn max_varlen_size(&self) -> Option<u32> {
        self.max_varlen_size
    }

    pub fn is_varlen(&self) -> bool {
        self.type_id.is_varlen()
    }
}

/// Ordered list of columns. Owned by the `SqlTable` it describes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Schema {
    columns: Vec<Column>,
}

impl Schema {
    pub fn new(columns: Vec<Column>) -> Self {
        debug_assert!(!columns.is_empty());
        Self { columns }
    }

    pub fn columns(&self) -> &[Column] {
        &self.columns
    }

    pub fn num_columns(&self) -> usize {
        self.columns.len()
    }

    pub fn column_by_oid(&self, oid: ColOid) -> Option<&Column> {
        self.columns.iter().find(|c| c.oid() == oid)
    }

    /// All column oids in declaration order.
    pub fn all_oids(&self) -> Vec<ColOid> {
        self.columns.iter().map(|c| c.oid()).collect()
    }
}
