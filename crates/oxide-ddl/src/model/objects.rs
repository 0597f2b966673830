//! Object records stored in the arena.
//!
//! Every record carries two lifecycle flags: `persisted` (the object exists in
//! the physical database as of the last flush) and `removed` (tombstone). All
//! cross references are handles resolved through [`super::DatabaseModel`].

use serde::Serialize;

use super::handle::{ColumnId, ForeignKeyId, IndexId, PrimaryKeyId, SchemaId, TableId};
use crate::types::{DefaultValue, ForeignKeyAction, SortDirection, TypeDefinition};

/// A schema (namespace of tables, indexes and constraints).
#[derive(Debug, Clone, Serialize)]
pub struct SchemaModel {
    pub(crate) name: String,
    pub(crate) tables: Vec<TableId>,
    pub(crate) persisted: bool,
    pub(crate) removed: bool,
}

impl SchemaModel {
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// All tables ever created in this schema, tombstones included.
    #[must_use]
    pub fn tables(&self) -> &[TableId] {
        &self.tables
    }

    #[must_use]
    pub const fn is_removed(&self) -> bool {
        self.removed
    }

    #[must_use]
    pub const fn is_persisted(&self) -> bool {
        self.persisted
    }
}

/// A table.
#[derive(Debug, Clone, Serialize)]
pub struct TableModel {
    pub(crate) schema: SchemaId,
    pub(crate) name: String,
    pub(crate) columns: Vec<ColumnId>,
    pub(crate) indexes: Vec<IndexId>,
    pub(crate) primary_keys: Vec<PrimaryKeyId>,
    pub(crate) foreign_keys: Vec<ForeignKeyId>,
    pub(crate) persisted: bool,
    pub(crate) removed: bool,
}

impl TableModel {
    #[must_use]
    pub const fn schema(&self) -> SchemaId {
        self.schema
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Columns in declaration order, tombstones included.
    #[must_use]
    pub fn columns(&self) -> &[ColumnId] {
        &self.columns
    }

    #[must_use]
    pub fn indexes(&self) -> &[IndexId] {
        &self.indexes
    }

    #[must_use]
    pub fn foreign_keys(&self) -> &[ForeignKeyId] {
        &self.foreign_keys
    }

    #[must_use]
    pub const fn is_removed(&self) -> bool {
        self.removed
    }

    #[must_use]
    pub const fn is_persisted(&self) -> bool {
        self.persisted
    }
}

/// A column.
#[derive(Debug, Clone, Serialize)]
pub struct ColumnModel {
    pub(crate) table: TableId,
    pub(crate) name: String,
    pub(crate) ty: TypeDefinition,
    pub(crate) nullable: bool,
    pub(crate) default: Option<DefaultValue>,
    pub(crate) indexes: Vec<IndexId>,
    pub(crate) persisted: bool,
    pub(crate) removed: bool,
}

impl ColumnModel {
    #[must_use]
    pub const fn table(&self) -> TableId {
        self.table
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[must_use]
    pub const fn type_definition(&self) -> &TypeDefinition {
        &self.ty
    }

    #[must_use]
    pub const fn is_nullable(&self) -> bool {
        self.nullable
    }

    #[must_use]
    pub const fn default_value(&self) -> Option<&DefaultValue> {
        self.default.as_ref()
    }

    /// Indexes this column participates in.
    #[must_use]
    pub fn indexes(&self) -> &[IndexId] {
        &self.indexes
    }

    #[must_use]
    pub const fn is_removed(&self) -> bool {
        self.removed
    }

    #[must_use]
    pub const fn is_persisted(&self) -> bool {
        self.persisted
    }
}

/// One column of an index.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct IndexColumnRef {
    pub column: ColumnId,
    pub direction: SortDirection,
}

/// An index.
#[derive(Debug, Clone, Serialize)]
pub struct IndexModel {
    pub(crate) table: TableId,
    pub(crate) name: String,
    pub(crate) columns: Vec<IndexColumnRef>,
    pub(crate) unique: bool,
    pub(crate) primary_key: Option<PrimaryKeyId>,
    pub(crate) owning_fks: Vec<ForeignKeyId>,
    pub(crate) referencing_fks: Vec<ForeignKeyId>,
    pub(crate) persisted: bool,
    pub(crate) removed: bool,
}

impl IndexModel {
    #[must_use]
    pub const fn table(&self) -> TableId {
        self.table
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[must_use]
    pub fn columns(&self) -> &[IndexColumnRef] {
        &self.columns
    }

    #[must_use]
    pub const fn is_unique(&self) -> bool {
        self.unique
    }

    /// Live primary key backed by this index, if any.
    #[must_use]
    pub const fn primary_key(&self) -> Option<PrimaryKeyId> {
        self.primary_key
    }

    /// Foreign keys whose columns are this index's columns.
    #[must_use]
    pub fn owning_foreign_keys(&self) -> &[ForeignKeyId] {
        &self.owning_fks
    }

    /// Foreign keys that point at this index.
    #[must_use]
    pub fn referencing_foreign_keys(&self) -> &[ForeignKeyId] {
        &self.referencing_fks
    }

    #[must_use]
    pub const fn is_removed(&self) -> bool {
        self.removed
    }

    #[must_use]
    pub const fn is_persisted(&self) -> bool {
        self.persisted
    }
}

/// A primary key: names the unique index that identifies rows of a table.
#[derive(Debug, Clone, Serialize)]
pub struct PrimaryKeyModel {
    pub(crate) table: TableId,
    pub(crate) index: IndexId,
    pub(crate) name: String,
    pub(crate) persisted: bool,
    pub(crate) removed: bool,
}

impl PrimaryKeyModel {
    #[must_use]
    pub const fn table(&self) -> TableId {
        self.table
    }

    #[must_use]
    pub const fn index(&self) -> IndexId {
        self.index
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[must_use]
    pub const fn is_removed(&self) -> bool {
        self.removed
    }

    #[must_use]
    pub const fn is_persisted(&self) -> bool {
        self.persisted
    }
}

/// A foreign key from an owning index to a referenced unique index.
#[derive(Debug, Clone, Serialize)]
pub struct ForeignKeyModel {
    pub(crate) name: String,
    pub(crate) owning: IndexId,
    pub(crate) referenced: IndexId,
    pub(crate) on_delete: ForeignKeyAction,
    pub(crate) on_update: ForeignKeyAction,
    pub(crate) persisted: bool,
    pub(crate) removed: bool,
}

impl ForeignKeyModel {
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[must_use]
    pub const fn owning_index(&self) -> IndexId {
        self.owning
    }

    #[must_use]
    pub const fn referenced_index(&self) -> IndexId {
        self.referenced
    }

    #[must_use]
    pub const fn on_delete(&self) -> ForeignKeyAction {
        self.on_delete
    }

    #[must_use]
    pub const fn on_update(&self) -> ForeignKeyAction {
        self.on_update
    }

    #[must_use]
    pub const fn is_removed(&self) -> bool {
        self.removed
    }

    #[must_use]
    pub const fn is_persisted(&self) -> bool {
        self.persisted
    }
}
