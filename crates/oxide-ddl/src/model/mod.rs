//! In-memory object model of a database.
//!
//! Objects live in per-kind arenas owned by [`DatabaseModel`] and are
//! addressed through typed handles. Removal tombstones an object instead of
//! deallocating it, so handles stay valid for the lifetime of the model.

mod builder;
mod handle;
mod objects;
mod shape;

pub use builder::{ColumnMut, ForeignKeyMut, IndexMut, PrimaryKeyMut, SchemaMut, TableMut};
pub use handle::{ColumnId, ForeignKeyId, IndexId, ObjectKind, ObjectRef, PrimaryKeyId, SchemaId, TableId};
pub use objects::{
    ColumnModel, ForeignKeyModel, IndexColumnRef, IndexModel, PrimaryKeyModel, SchemaModel, TableModel,
};
pub use shape::{ColumnShape, ForeignKeyShape, IndexShape, PrimaryKeyShape, QualifiedName, Side, TableShape};

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::dialect::MigrationDialect;
use crate::error::{DdlError, ErrorKind, Result};
use crate::journal::{ChangeRecord, Journal, Property, PropertyValue};
use crate::script::StatementBuffer;

/// Prefix reserved for identifiers generated during reconciliation.
pub const RESERVED_PREFIX: &str = "__oxide_";

/// How a flush treats the statements it generates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub enum Mode {
    /// Validate only; nothing is emitted and the journal is kept.
    NoChanges,
    /// Generate and buffer statements without enforcing primary keys.
    DryRun,
    /// Generate, buffer and enforce every invariant.
    #[default]
    Commit,
}

/// Options for a [`DatabaseModel`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ModelOptions {
    /// Flush mode.
    pub mode: Mode,
    /// Longest identifier accepted by name validation.
    pub max_identifier_length: usize,
}

impl Default for ModelOptions {
    fn default() -> Self {
        Self {
            mode: Mode::Commit,
            max_identifier_length: 128,
        }
    }
}

impl ModelOptions {
    /// Creates default options.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the flush mode.
    #[must_use]
    pub const fn with_mode(mut self, mode: Mode) -> Self {
        self.mode = mode;
        self
    }

    /// Sets the maximum identifier length.
    #[must_use]
    pub const fn with_max_identifier_length(mut self, len: usize) -> Self {
        self.max_identifier_length = len;
        self
    }

    /// Loads options from a JSON document. Missing fields take defaults.
    pub fn from_json(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }

    /// Serializes the options to JSON.
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }
}

/// Root of the object model.
///
/// An attached model records every mutation in its journal; [`flush`] turns
/// the journal into DDL statements. A detached model is a plain description
/// of a schema and never produces statements.
///
/// [`flush`]: DatabaseModel::flush
#[derive(Debug)]
pub struct DatabaseModel {
    pub(crate) dialect: Box<dyn MigrationDialect>,
    pub(crate) options: ModelOptions,
    pub(crate) attached: bool,
    pub(crate) schemas: Vec<SchemaModel>,
    pub(crate) tables: Vec<TableModel>,
    pub(crate) columns: Vec<ColumnModel>,
    pub(crate) indexes: Vec<IndexModel>,
    pub(crate) primary_keys: Vec<PrimaryKeyModel>,
    pub(crate) foreign_keys: Vec<ForeignKeyModel>,
    pub(crate) journal: Journal,
    pub(crate) buffer: StatementBuffer,
    default_schema: SchemaId,
}

impl DatabaseModel {
    /// Creates an attached model whose default schema already exists.
    #[must_use]
    pub fn new<D: MigrationDialect + 'static>(dialect: D) -> Self {
        Self::with_options(dialect, ModelOptions::default())
    }

    /// Creates an attached model with explicit options.
    #[must_use]
    pub fn with_options<D: MigrationDialect + 'static>(dialect: D, options: ModelOptions) -> Self {
        let default_name = dialect.default_schema().to_string();
        Self {
            dialect: Box::new(dialect),
            options,
            attached: true,
            schemas: vec![SchemaModel {
                name: default_name,
                tables: Vec::new(),
                persisted: true,
                removed: false,
            }],
            tables: Vec::new(),
            columns: Vec::new(),
            indexes: Vec::new(),
            primary_keys: Vec::new(),
            foreign_keys: Vec::new(),
            journal: Journal::new(),
            buffer: StatementBuffer::default(),
            default_schema: SchemaId(0),
        }
    }

    /// Creates a detached model. Build the existing database in it, then
    /// [`attach`](Self::attach) to start tracking changes against it.
    #[must_use]
    pub fn detached<D: MigrationDialect + 'static>(dialect: D) -> Self {
        let mut model = Self::new(dialect);
        model.attached = false;
        model
    }

    /// Returns the dialect.
    #[must_use]
    pub fn dialect(&self) -> &dyn MigrationDialect {
        self.dialect.as_ref()
    }

    #[must_use]
    pub const fn options(&self) -> &ModelOptions {
        &self.options
    }

    #[must_use]
    pub const fn mode(&self) -> Mode {
        self.options.mode
    }

    /// Changes the flush mode.
    pub fn set_mode(&mut self, mode: Mode) {
        self.options.mode = mode;
    }

    #[must_use]
    pub const fn is_attached(&self) -> bool {
        self.attached
    }

    /// Handle of the dialect's default schema.
    #[must_use]
    pub const fn default_schema(&self) -> SchemaId {
        self.default_schema
    }

    /// Adopts the current model as the physical baseline and starts tracking.
    pub fn attach(&mut self) {
        if self.attached {
            return;
        }
        if !self.journal.is_empty() {
            warn!(records = self.journal.len(), "Discarding changes left unflushed at detach");
        }
        self.journal.clear();
        self.fold_baseline();
        self.attached = true;
        info!(dialect = self.dialect.name(), "Model attached");
    }

    /// Flushes outstanding changes, then stops tracking.
    ///
    /// If the flush fails the model stays attached and nothing is emitted.
    /// In [`Mode::NoChanges`] the validated records stay pending and are
    /// discarded by the next [`attach`](Self::attach).
    pub fn detach(&mut self) -> Result<()> {
        if !self.attached {
            return Ok(());
        }
        self.flush()?;
        if !self.journal.is_empty() {
            warn!(
                records = self.journal.len(),
                mode = ?self.options.mode,
                "Detaching with unflushed changes"
            );
        }
        self.attached = false;
        info!(dialect = self.dialect.name(), "Model detached");
        Ok(())
    }

    /// Outstanding change records ordered by sequence.
    #[must_use]
    pub fn change_records(&self) -> Vec<ChangeRecord> {
        self.journal.records()
    }

    /// Returns whether there are unflushed changes.
    #[must_use]
    pub fn has_pending_changes(&self) -> bool {
        !self.journal.is_empty()
    }

    /// Returns the statement buffer accumulated by earlier flushes.
    #[must_use]
    pub const fn statement_buffer(&self) -> &StatementBuffer {
        &self.buffer
    }

    // Read access.

    #[must_use]
    pub fn schema(&self, id: SchemaId) -> Option<&SchemaModel> {
        self.schemas.get(id.index())
    }

    #[must_use]
    pub fn table(&self, id: TableId) -> Option<&TableModel> {
        self.tables.get(id.index())
    }

    #[must_use]
    pub fn column(&self, id: ColumnId) -> Option<&ColumnModel> {
        self.columns.get(id.index())
    }

    #[must_use]
    pub fn index(&self, id: IndexId) -> Option<&IndexModel> {
        self.indexes.get(id.index())
    }

    #[must_use]
    pub fn primary_key(&self, id: PrimaryKeyId) -> Option<&PrimaryKeyModel> {
        self.primary_keys.get(id.index())
    }

    #[must_use]
    pub fn foreign_key(&self, id: ForeignKeyId) -> Option<&ForeignKeyModel> {
        self.foreign_keys.get(id.index())
    }

    /// Live schemas.
    pub fn schema_ids(&self) -> impl Iterator<Item = SchemaId> + '_ {
        (0..self.schemas.len())
            .map(slot)
            .map(SchemaId)
            .filter(|id| !self.schemas[id.index()].removed)
    }

    /// Looks up a live schema by name (ASCII case-insensitive).
    #[must_use]
    pub fn find_schema(&self, name: &str) -> Option<SchemaId> {
        self.schema_ids()
            .find(|id| self.schemas[id.index()].name.eq_ignore_ascii_case(name))
    }

    /// Looks up a live table by name within a schema.
    #[must_use]
    pub fn find_table(&self, schema: SchemaId, name: &str) -> Option<TableId> {
        let schema = self.schema(schema)?;
        schema.tables.iter().copied().find(|t| {
            let table = &self.tables[t.index()];
            !table.removed && table.name.eq_ignore_ascii_case(name)
        })
    }

    /// Looks up a live column by name within a table.
    #[must_use]
    pub fn find_column(&self, table: TableId, name: &str) -> Option<ColumnId> {
        let table = self.table(table)?;
        table.columns.iter().copied().find(|c| {
            let column = &self.columns[c.index()];
            !column.removed && column.name.eq_ignore_ascii_case(name)
        })
    }

    /// Live tables of a schema in creation order.
    #[must_use]
    pub fn live_tables(&self, schema: SchemaId) -> Vec<TableId> {
        self.schema(schema).map_or_else(Vec::new, |s| {
            s.tables
                .iter()
                .copied()
                .filter(|t| !self.tables[t.index()].removed)
                .collect()
        })
    }

    /// Live columns of a table in declaration order.
    #[must_use]
    pub fn live_columns(&self, table: TableId) -> Vec<ColumnId> {
        self.table(table).map_or_else(Vec::new, |t| {
            t.columns
                .iter()
                .copied()
                .filter(|c| !self.columns[c.index()].removed)
                .collect()
        })
    }

    /// Live indexes of a table.
    #[must_use]
    pub fn live_indexes(&self, table: TableId) -> Vec<IndexId> {
        self.table(table).map_or_else(Vec::new, |t| {
            t.indexes
                .iter()
                .copied()
                .filter(|i| !self.indexes[i.index()].removed)
                .collect()
        })
    }

    /// Live foreign keys owned by a table.
    #[must_use]
    pub fn live_foreign_keys(&self, table: TableId) -> Vec<ForeignKeyId> {
        self.table(table).map_or_else(Vec::new, |t| {
            t.foreign_keys
                .iter()
                .copied()
                .filter(|f| !self.foreign_keys[f.index()].removed)
                .collect()
        })
    }

    /// Live primary key of a table.
    #[must_use]
    pub fn primary_key_of(&self, table: TableId) -> Option<PrimaryKeyId> {
        self.table(table)?
            .primary_keys
            .iter()
            .copied()
            .find(|pk| !self.primary_keys[pk.index()].removed)
    }

    /// Table owning a foreign key.
    #[must_use]
    pub fn foreign_key_table(&self, fk: ForeignKeyId) -> Option<TableId> {
        let fk = self.foreign_key(fk)?;
        Some(self.index(fk.owning)?.table)
    }

    /// Table referenced by a foreign key.
    #[must_use]
    pub fn referenced_table(&self, fk: ForeignKeyId) -> Option<TableId> {
        let fk = self.foreign_key(fk)?;
        Some(self.index(fk.referenced)?.table)
    }

    /// Table an object belongs to; `None` for schemas.
    #[must_use]
    pub fn owning_table(&self, object: ObjectRef) -> Option<TableId> {
        match object {
            ObjectRef::Schema(_) => None,
            ObjectRef::Table(id) => Some(id),
            ObjectRef::Column(id) => self.column(id).map(|c| c.table),
            ObjectRef::Index(id) => self.index(id).map(|i| i.table),
            ObjectRef::PrimaryKey(id) => self.primary_key(id).map(|p| p.table),
            ObjectRef::ForeignKey(id) => self.foreign_key_table(id),
        }
    }

    /// Human readable path of an object, e.g. `main.users.email`.
    #[must_use]
    pub fn display_name(&self, object: ObjectRef) -> String {
        let table_path = |t: TableId| -> String {
            self.table(t).map_or_else(
                || t.to_string(),
                |table| {
                    let schema = self.schema(table.schema).map_or("?", |s| s.name.as_str());
                    format!("{schema}.{}", table.name)
                },
            )
        };
        match object {
            ObjectRef::Schema(id) => self.schema(id).map_or_else(|| id.to_string(), |s| s.name.clone()),
            ObjectRef::Table(id) => table_path(id),
            ObjectRef::Column(id) => self
                .column(id)
                .map_or_else(|| id.to_string(), |c| format!("{}.{}", table_path(c.table), c.name)),
            ObjectRef::Index(id) => self
                .index(id)
                .map_or_else(|| id.to_string(), |i| format!("{}.{}", table_path(i.table), i.name)),
            ObjectRef::PrimaryKey(id) => self
                .primary_key(id)
                .map_or_else(|| id.to_string(), |p| format!("{}.{}", table_path(p.table), p.name)),
            ObjectRef::ForeignKey(id) => match (self.foreign_key(id), self.foreign_key_table(id)) {
                (Some(fk), Some(t)) => format!("{}.{}", table_path(t), fk.name),
                _ => id.to_string(),
            },
        }
    }

    // Internal helpers shared by the builder and the reconciler.

    pub(crate) fn error(&self, kind: ErrorKind, object: impl Into<String>, message: impl Into<String>) -> DdlError {
        DdlError::single(self.dialect.name(), kind, object, message)
    }

    /// Records a mutation if tracking applies to it.
    ///
    /// Scalar edits of objects created since the last flush are covered by
    /// their creation record and are not tracked.
    pub(crate) fn track(
        &mut self,
        object: ObjectRef,
        property: Property,
        original: PropertyValue,
        current: PropertyValue,
        persisted: bool,
    ) {
        if !self.attached {
            return;
        }
        if property != Property::Existence && !persisted {
            return;
        }
        self.journal.record(object, property, original, current);
    }

    /// Makes every live object part of the physical baseline and forgets
    /// removed ones physically.
    pub(crate) fn fold_baseline(&mut self) {
        for s in &mut self.schemas {
            s.persisted = !s.removed;
        }
        for t in &mut self.tables {
            t.persisted = !t.removed;
        }
        for c in &mut self.columns {
            c.persisted = !c.removed;
        }
        for i in &mut self.indexes {
            i.persisted = !i.removed;
        }
        for p in &mut self.primary_keys {
            p.persisted = !p.removed;
        }
        for f in &mut self.foreign_keys {
            f.persisted = !f.removed;
        }
        debug!("Folded current model into baseline");
    }

    /// Name a property had at the last flush.
    pub(crate) fn original_name(&self, object: ObjectRef, current: &str) -> String {
        match self.journal.original(object, Property::Name) {
            Some(PropertyValue::Name(name)) => name.clone(),
            _ => current.to_string(),
        }
    }
}

/// Converts an arena length to a handle slot.
pub(crate) fn slot(index: usize) -> u32 {
    u32::try_from(index).unwrap_or(u32::MAX)
}
