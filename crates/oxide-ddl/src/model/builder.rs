//! Factories, mutators and cascading removal.
//!
//! Every operation validates synchronously and records its effect in the
//! journal. Mutators take `self` and return it so calls chain with `?`:
//!
//! ```rust,ignore
//! db.column_mut(email)?
//!     .set_type(SqlType::Varchar(255))?
//!     .mark_nullable(false)?;
//! ```

use tracing::debug;

use super::handle::{ColumnId, ForeignKeyId, IndexId, ObjectRef, PrimaryKeyId, SchemaId, TableId};
use super::objects::{
    ColumnModel, ForeignKeyModel, IndexColumnRef, IndexModel, PrimaryKeyModel, SchemaModel, TableModel,
};
use super::{slot, DatabaseModel, RESERVED_PREFIX};
use crate::error::{ErrorKind, Result};
use crate::journal::{Property, PropertyValue};
use crate::types::{DefaultValue, ForeignKeyAction, SortDirection, TypeDefinition};

const CREATED: (PropertyValue, PropertyValue) = (PropertyValue::Exists(false), PropertyValue::Exists(true));

impl DatabaseModel {
    // Validation helpers.

    fn validate_name(&self, label: &str, name: &str) -> Result<()> {
        let problem = if name.is_empty() {
            Some("name must not be empty".to_string())
        } else if name.chars().count() > self.options.max_identifier_length {
            Some(format!(
                "name exceeds {} characters",
                self.options.max_identifier_length
            ))
        } else if name.chars().any(char::is_control) {
            Some("name contains control characters".to_string())
        } else if name.len() >= RESERVED_PREFIX.len()
            && name.as_bytes()[..RESERVED_PREFIX.len()].eq_ignore_ascii_case(RESERVED_PREFIX.as_bytes())
        {
            Some(format!("prefix '{RESERVED_PREFIX}' is reserved"))
        } else {
            None
        };
        match problem {
            Some(message) => Err(self.error(ErrorKind::NameInvalid, format!("{label} '{name}'"), message)),
            None => Ok(()),
        }
    }

    /// Whether `name` is used by a live table, index, primary key or foreign
    /// key of `schema`, ignoring `except`.
    fn namespace_taken(&self, schema: SchemaId, name: &str, except: Option<ObjectRef>) -> bool {
        let clash = |object: ObjectRef, other: &str| Some(object) != except && other.eq_ignore_ascii_case(name);
        self.live_tables(schema).into_iter().any(|t| {
            clash(ObjectRef::Table(t), &self.tables[t.index()].name)
                || self
                    .live_indexes(t)
                    .into_iter()
                    .any(|i| clash(ObjectRef::Index(i), &self.indexes[i.index()].name))
                || self
                    .primary_key_of(t)
                    .is_some_and(|p| clash(ObjectRef::PrimaryKey(p), &self.primary_keys[p.index()].name))
                || self
                    .live_foreign_keys(t)
                    .into_iter()
                    .any(|f| clash(ObjectRef::ForeignKey(f), &self.foreign_keys[f.index()].name))
        })
    }

    fn column_name_taken(&self, table: TableId, name: &str, except: Option<ColumnId>) -> bool {
        self.live_columns(table)
            .into_iter()
            .any(|c| Some(c) != except && self.columns[c.index()].name.eq_ignore_ascii_case(name))
    }

    /// Resolves an explicit or default name within a schema namespace.
    fn namespace_name(
        &self,
        schema: SchemaId,
        label: &str,
        explicit: Option<&str>,
        default: String,
        except: Option<ObjectRef>,
    ) -> Result<String> {
        if let Some(name) = explicit {
            self.validate_name(label, name)?;
            if self.namespace_taken(schema, name, except) {
                return Err(self.error(
                    ErrorKind::NameConflict,
                    format!("{label} '{name}'"),
                    "name already used in schema",
                ));
            }
            return Ok(name.to_string());
        }
        let mut candidate = default.clone();
        let mut suffix = 2;
        while self.namespace_taken(schema, &candidate, except) {
            candidate = format!("{default}_{suffix}");
            suffix += 1;
        }
        self.validate_name(label, &candidate)?;
        Ok(candidate)
    }

    fn require_schema(&self, id: SchemaId) -> Result<&SchemaModel> {
        match self.schema(id) {
            None => Err(self.error(ErrorKind::ObjectNotFound, id.to_string(), "no such schema")),
            Some(s) if s.removed => Err(self.error(ErrorKind::ObjectRemoved, s.name.clone(), "schema was removed")),
            Some(s) => Ok(s),
        }
    }

    fn require_table(&self, id: TableId) -> Result<&TableModel> {
        match self.table(id) {
            None => Err(self.error(ErrorKind::ObjectNotFound, id.to_string(), "no such table")),
            Some(t) if t.removed => {
                Err(self.error(ErrorKind::ObjectRemoved, self.display_name(id.into()), "table was removed"))
            }
            Some(t) => Ok(t),
        }
    }

    fn require_column(&self, id: ColumnId) -> Result<&ColumnModel> {
        match self.column(id) {
            None => Err(self.error(ErrorKind::ObjectNotFound, id.to_string(), "no such column")),
            Some(c) if c.removed => {
                Err(self.error(ErrorKind::ObjectRemoved, self.display_name(id.into()), "column was removed"))
            }
            Some(c) => Ok(c),
        }
    }

    fn require_index(&self, id: IndexId) -> Result<&IndexModel> {
        match self.index(id) {
            None => Err(self.error(ErrorKind::ObjectNotFound, id.to_string(), "no such index")),
            Some(i) if i.removed => {
                Err(self.error(ErrorKind::ObjectRemoved, self.display_name(id.into()), "index was removed"))
            }
            Some(i) => Ok(i),
        }
    }

    fn exists(&self, object: ObjectRef) -> bool {
        match object {
            ObjectRef::Schema(id) => self.schema(id).is_some(),
            ObjectRef::Table(id) => self.table(id).is_some(),
            ObjectRef::Column(id) => self.column(id).is_some(),
            ObjectRef::Index(id) => self.index(id).is_some(),
            ObjectRef::PrimaryKey(id) => self.primary_key(id).is_some(),
            ObjectRef::ForeignKey(id) => self.foreign_key(id).is_some(),
        }
    }

    /// `(removed, persisted)` flags of an object.
    fn flags(&self, object: ObjectRef) -> (bool, bool) {
        match object {
            ObjectRef::Schema(id) => {
                let s = &self.schemas[id.index()];
                (s.removed, s.persisted)
            }
            ObjectRef::Table(id) => {
                let t = &self.tables[id.index()];
                (t.removed, t.persisted)
            }
            ObjectRef::Column(id) => {
                let c = &self.columns[id.index()];
                (c.removed, c.persisted)
            }
            ObjectRef::Index(id) => {
                let i = &self.indexes[id.index()];
                (i.removed, i.persisted)
            }
            ObjectRef::PrimaryKey(id) => {
                let p = &self.primary_keys[id.index()];
                (p.removed, p.persisted)
            }
            ObjectRef::ForeignKey(id) => {
                let f = &self.foreign_keys[id.index()];
                (f.removed, f.persisted)
            }
        }
    }

    fn ensure_mutable(&self, object: ObjectRef) -> Result<bool> {
        let (removed, persisted) = self.flags(object);
        if removed {
            return Err(self.error(
                ErrorKind::ObjectRemoved,
                self.display_name(object),
                "cannot mutate a removed object",
            ));
        }
        Ok(persisted)
    }

    // Factories.

    /// Creates a schema.
    pub fn create_schema(&mut self, name: impl Into<String>) -> Result<SchemaId> {
        let name = name.into();
        self.validate_name("schema", &name)?;
        if self.find_schema(&name).is_some() {
            return Err(self.error(ErrorKind::NameConflict, name, "schema already exists"));
        }
        let id = SchemaId(slot(self.schemas.len()));
        debug!(schema = %name, "Creating schema");
        self.schemas.push(SchemaModel {
            name,
            tables: Vec::new(),
            persisted: false,
            removed: false,
        });
        self.track(id.into(), Property::Existence, CREATED.0, CREATED.1, false);
        Ok(id)
    }

    /// Creates an empty table in `schema`.
    pub fn create_table(&mut self, schema: SchemaId, name: impl Into<String>) -> Result<TableId> {
        let name = name.into();
        self.require_schema(schema)?;
        let name = self.namespace_name(schema, "table", Some(&name), String::new(), None)?;
        let id = TableId(slot(self.tables.len()));
        debug!(table = %name, "Creating table");
        self.tables.push(TableModel {
            schema,
            name,
            columns: Vec::new(),
            indexes: Vec::new(),
            primary_keys: Vec::new(),
            foreign_keys: Vec::new(),
            persisted: false,
            removed: false,
        });
        self.schemas[schema.index()].tables.push(id);
        self.track(id.into(), Property::Existence, CREATED.0, CREATED.1, false);
        Ok(id)
    }

    /// Creates a nullable column without default.
    pub fn create_column(
        &mut self,
        table: TableId,
        name: impl Into<String>,
        ty: impl Into<TypeDefinition>,
    ) -> Result<ColumnId> {
        let name = name.into();
        self.require_table(table)?;
        self.validate_name("column", &name)?;
        if self.column_name_taken(table, &name, None) {
            return Err(self.error(
                ErrorKind::NameConflict,
                format!("{}.{name}", self.display_name(table.into())),
                "column already exists",
            ));
        }
        let id = ColumnId(slot(self.columns.len()));
        self.columns.push(ColumnModel {
            table,
            name,
            ty: ty.into(),
            nullable: true,
            default: None,
            indexes: Vec::new(),
            persisted: false,
            removed: false,
        });
        self.tables[table.index()].columns.push(id);
        self.track(id.into(), Property::Existence, CREATED.0, CREATED.1, false);
        Ok(id)
    }

    /// Creates an index over columns of `table`.
    pub fn create_index(
        &mut self,
        table: TableId,
        columns: &[(ColumnId, SortDirection)],
        unique: bool,
        name: Option<&str>,
    ) -> Result<IndexId> {
        let table_model = self.require_table(table)?;
        let schema = table_model.schema;
        let table_name = table_model.name.clone();
        if columns.is_empty() {
            return Err(self.error(
                ErrorKind::ColumnShapeMismatch,
                self.display_name(table.into()),
                "index needs at least one column",
            ));
        }
        let mut column_names = Vec::with_capacity(columns.len());
        for (pos, &(column, _)) in columns.iter().enumerate() {
            let col = self.require_column(column)?;
            if col.table != table {
                return Err(self.error(
                    ErrorKind::ForeignReference,
                    self.display_name(column.into()),
                    format!("column does not belong to table '{table_name}'"),
                ));
            }
            if columns[..pos].iter().any(|&(c, _)| c == column) {
                return Err(self.error(
                    ErrorKind::ColumnShapeMismatch,
                    self.display_name(column.into()),
                    "column listed twice in index",
                ));
            }
            column_names.push(col.name.clone());
        }
        let default = format!("ix_{table_name}_{}", column_names.join("_"));
        let name = self.namespace_name(schema, "index", name, default, None)?;

        let id = IndexId(slot(self.indexes.len()));
        debug!(index = %name, table = %table_name, unique, "Creating index");
        self.indexes.push(IndexModel {
            table,
            name,
            columns: columns
                .iter()
                .map(|&(column, direction)| IndexColumnRef { column, direction })
                .collect(),
            unique,
            primary_key: None,
            owning_fks: Vec::new(),
            referencing_fks: Vec::new(),
            persisted: false,
            removed: false,
        });
        for &(column, _) in columns {
            self.columns[column.index()].indexes.push(id);
        }
        self.tables[table.index()].indexes.push(id);
        self.track(id.into(), Property::Existence, CREATED.0, CREATED.1, false);
        Ok(id)
    }

    /// Makes a unique index the primary key of its table, replacing any
    /// existing primary key.
    pub fn create_primary_key(&mut self, index: IndexId, name: Option<&str>) -> Result<PrimaryKeyId> {
        let idx = self.require_index(index)?;
        let table = idx.table;
        if !idx.unique {
            return Err(self.error(
                ErrorKind::IndexNotUnique,
                self.display_name(index.into()),
                "primary key requires a unique index",
            ));
        }
        let schema = self.tables[table.index()].schema;
        let table_name = self.tables[table.index()].name.clone();
        let existing = self.primary_key_of(table);
        if let Some(old) = existing {
            if self.primary_keys[old.index()].index == index {
                return Err(self.error(
                    ErrorKind::NameConflict,
                    self.display_name(old.into()),
                    "index already backs the primary key",
                ));
            }
            self.check_pk_not_external(old)?;
        }
        let name = self.namespace_name(
            schema,
            "primary key",
            name,
            format!("pk_{table_name}"),
            existing.map(ObjectRef::PrimaryKey),
        )?;
        if let Some(old) = existing {
            debug!(table = %table_name, "Replacing primary key");
            self.drop_primary_key_cascade(old);
        }

        let id = PrimaryKeyId(slot(self.primary_keys.len()));
        self.primary_keys.push(PrimaryKeyModel {
            table,
            index,
            name,
            persisted: false,
            removed: false,
        });
        self.indexes[index.index()].primary_key = Some(id);
        self.tables[table.index()].primary_keys.push(id);
        self.track(id.into(), Property::Existence, CREATED.0, CREATED.1, false);
        Ok(id)
    }

    /// Creates a foreign key from the columns of `owning` to the unique index
    /// `referenced`.
    pub fn create_foreign_key(
        &mut self,
        owning: IndexId,
        referenced: IndexId,
        name: Option<&str>,
    ) -> Result<ForeignKeyId> {
        let owning_idx = self.require_index(owning)?;
        let owning_table = owning_idx.table;
        let ref_idx = match self.index(referenced) {
            None => return Err(self.error(ErrorKind::ObjectNotFound, referenced.to_string(), "no such index")),
            Some(i) if i.removed => {
                return Err(self.error(
                    ErrorKind::ReferencedObjectRemoved,
                    self.display_name(referenced.into()),
                    "referenced index was removed",
                ))
            }
            Some(i) => i,
        };
        let ref_table = ref_idx.table;
        if !ref_idx.unique {
            return Err(self.error(
                ErrorKind::IndexNotUnique,
                self.display_name(referenced.into()),
                "foreign keys must reference a unique index",
            ));
        }
        if owning_idx.columns.len() != ref_idx.columns.len() {
            return Err(self.error(
                ErrorKind::ColumnShapeMismatch,
                self.display_name(owning.into()),
                format!(
                    "{} owning columns for {} referenced columns",
                    owning_idx.columns.len(),
                    ref_idx.columns.len()
                ),
            ));
        }
        for (own, theirs) in owning_idx.columns.iter().zip(&ref_idx.columns) {
            let own = &self.columns[own.column.index()];
            let theirs = &self.columns[theirs.column.index()];
            if !own.ty.is_compatible_with(&theirs.ty) {
                return Err(self.error(
                    ErrorKind::ColumnShapeMismatch,
                    self.display_name(owning.into()),
                    format!("column '{}' cannot reference '{}'", own.name, theirs.name),
                ));
            }
        }
        let schema = self.tables[owning_table.index()].schema;
        if schema != self.tables[ref_table.index()].schema && !self.dialect.supports_cross_schema_references() {
            return Err(self.error(
                ErrorKind::CrossScopeReference,
                self.display_name(owning.into()),
                format!("{} cannot reference tables in another schema", self.dialect.name()),
            ));
        }
        let default = format!(
            "fk_{}_{}",
            self.tables[owning_table.index()].name,
            self.tables[ref_table.index()].name
        );
        let name = self.namespace_name(schema, "foreign key", name, default, None)?;

        let id = ForeignKeyId(slot(self.foreign_keys.len()));
        debug!(foreign_key = %name, "Creating foreign key");
        self.foreign_keys.push(ForeignKeyModel {
            name,
            owning,
            referenced,
            on_delete: ForeignKeyAction::default(),
            on_update: ForeignKeyAction::default(),
            persisted: false,
            removed: false,
        });
        self.indexes[owning.index()].owning_fks.push(id);
        self.indexes[referenced.index()].referencing_fks.push(id);
        self.tables[owning_table.index()].foreign_keys.push(id);
        self.track(id.into(), Property::Existence, CREATED.0, CREATED.1, false);
        Ok(id)
    }

    // Mutator entry points.

    /// Returns a mutator for a schema.
    pub fn schema_mut(&mut self, id: SchemaId) -> Result<SchemaMut<'_>> {
        self.mutator(id.into())?;
        Ok(SchemaMut { db: self, id })
    }

    /// Returns a mutator for a table.
    pub fn table_mut(&mut self, id: TableId) -> Result<TableMut<'_>> {
        self.mutator(id.into())?;
        Ok(TableMut { db: self, id })
    }

    /// Returns a mutator for a column.
    pub fn column_mut(&mut self, id: ColumnId) -> Result<ColumnMut<'_>> {
        self.mutator(id.into())?;
        Ok(ColumnMut { db: self, id })
    }

    /// Returns a mutator for an index.
    pub fn index_mut(&mut self, id: IndexId) -> Result<IndexMut<'_>> {
        self.mutator(id.into())?;
        Ok(IndexMut { db: self, id })
    }

    /// Returns a mutator for a primary key.
    pub fn primary_key_mut(&mut self, id: PrimaryKeyId) -> Result<PrimaryKeyMut<'_>> {
        self.mutator(id.into())?;
        Ok(PrimaryKeyMut { db: self, id })
    }

    /// Returns a mutator for a foreign key.
    pub fn foreign_key_mut(&mut self, id: ForeignKeyId) -> Result<ForeignKeyMut<'_>> {
        self.mutator(id.into())?;
        Ok(ForeignKeyMut { db: self, id })
    }

    fn mutator(&self, object: ObjectRef) -> Result<()> {
        if self.exists(object) {
            Ok(())
        } else {
            Err(self.error(ErrorKind::ObjectNotFound, object.kind().label(), format!("no such object {object:?}")))
        }
    }

    // Scalar mutations.

    fn rename(&mut self, object: ObjectRef, name: String) -> Result<()> {
        let persisted = self.ensure_mutable(object)?;
        let label = object.kind().label();
        self.validate_name(label, &name)?;
        let conflict = match object {
            ObjectRef::Schema(id) => self.find_schema(&name).is_some_and(|s| s != id),
            ObjectRef::Column(id) => {
                let table = self.columns[id.index()].table;
                self.column_name_taken(table, &name, Some(id))
            }
            other => {
                let schema = self
                    .owning_table(other)
                    .map_or(self.default_schema(), |t| self.tables[t.index()].schema);
                self.namespace_taken(schema, &name, Some(other))
            }
        };
        if conflict {
            return Err(self.error(
                ErrorKind::NameConflict,
                format!("{label} '{name}'"),
                "name already used in namespace",
            ));
        }
        let slot_name = match object {
            ObjectRef::Schema(id) => &mut self.schemas[id.index()].name,
            ObjectRef::Table(id) => &mut self.tables[id.index()].name,
            ObjectRef::Column(id) => &mut self.columns[id.index()].name,
            ObjectRef::Index(id) => &mut self.indexes[id.index()].name,
            ObjectRef::PrimaryKey(id) => &mut self.primary_keys[id.index()].name,
            ObjectRef::ForeignKey(id) => &mut self.foreign_keys[id.index()].name,
        };
        let old = std::mem::replace(slot_name, name.clone());
        debug!(?object, from = %old, to = %name, "Renaming");
        self.track(
            object,
            Property::Name,
            PropertyValue::Name(old),
            PropertyValue::Name(name),
            persisted,
        );
        Ok(())
    }

    fn retype(&mut self, id: ColumnId, ty: TypeDefinition) -> Result<()> {
        let persisted = self.ensure_mutable(id.into())?;
        let old = std::mem::replace(&mut self.columns[id.index()].ty, ty.clone());
        self.track(
            id.into(),
            Property::Type,
            PropertyValue::Type(old),
            PropertyValue::Type(ty),
            persisted,
        );
        Ok(())
    }

    fn set_nullable(&mut self, id: ColumnId, nullable: bool) -> Result<()> {
        let persisted = self.ensure_mutable(id.into())?;
        let old = std::mem::replace(&mut self.columns[id.index()].nullable, nullable);
        self.track(
            id.into(),
            Property::Nullable,
            PropertyValue::Nullable(old),
            PropertyValue::Nullable(nullable),
            persisted,
        );
        Ok(())
    }

    fn set_default(&mut self, id: ColumnId, default: Option<DefaultValue>) -> Result<()> {
        let persisted = self.ensure_mutable(id.into())?;
        if let Some(DefaultValue::Float(f)) = default {
            if !f.is_finite() {
                return Err(self.error(
                    ErrorKind::InvalidDefault,
                    self.display_name(id.into()),
                    format!("{f} has no SQL literal"),
                ));
            }
        }
        let old = std::mem::replace(&mut self.columns[id.index()].default, default.clone());
        self.track(
            id.into(),
            Property::Default,
            PropertyValue::Default(old),
            PropertyValue::Default(default),
            persisted,
        );
        Ok(())
    }

    fn set_actions(&mut self, id: ForeignKeyId, on_delete: ForeignKeyAction, on_update: ForeignKeyAction) -> Result<()> {
        let persisted = self.ensure_mutable(id.into())?;
        let fk = &mut self.foreign_keys[id.index()];
        let old_delete = std::mem::replace(&mut fk.on_delete, on_delete);
        let old_update = std::mem::replace(&mut fk.on_update, on_update);
        self.track(
            id.into(),
            Property::OnDelete,
            PropertyValue::Action(old_delete),
            PropertyValue::Action(on_delete),
            persisted,
        );
        self.track(
            id.into(),
            Property::OnUpdate,
            PropertyValue::Action(old_update),
            PropertyValue::Action(on_update),
            persisted,
        );
        Ok(())
    }

    // Removal. Each step records leaf objects before their owners.

    fn mark_removed(&mut self, object: ObjectRef) {
        let (removed, persisted) = self.flags(object);
        if removed {
            return;
        }
        match object {
            ObjectRef::Schema(id) => self.schemas[id.index()].removed = true,
            ObjectRef::Table(id) => self.tables[id.index()].removed = true,
            ObjectRef::Column(id) => self.columns[id.index()].removed = true,
            ObjectRef::Index(id) => self.indexes[id.index()].removed = true,
            ObjectRef::PrimaryKey(id) => self.primary_keys[id.index()].removed = true,
            ObjectRef::ForeignKey(id) => self.foreign_keys[id.index()].removed = true,
        }
        debug!(?object, "Removing");
        self.track(
            object,
            Property::Existence,
            PropertyValue::Exists(true),
            PropertyValue::Exists(false),
            persisted,
        );
    }

    fn live_fks(&self, ids: &[ForeignKeyId]) -> Vec<ForeignKeyId> {
        ids.iter()
            .copied()
            .filter(|f| !self.foreign_keys[f.index()].removed)
            .collect()
    }

    fn check_pk_not_external(&self, pk: PrimaryKeyId) -> Result<()> {
        let model = &self.primary_keys[pk.index()];
        let external: Vec<String> = self
            .live_fks(&self.indexes[model.index.index()].referencing_fks)
            .into_iter()
            .filter(|&f| self.foreign_key_table(f) != Some(model.table))
            .map(|f| self.display_name(f.into()))
            .collect();
        if external.is_empty() {
            Ok(())
        } else {
            Err(self.error(
                ErrorKind::ExternallyReferenced,
                self.display_name(pk.into()),
                format!("referenced by {}", external.join(", ")),
            ))
        }
    }

    fn drop_primary_key_cascade(&mut self, pk: PrimaryKeyId) {
        let index = self.primary_keys[pk.index()].index;
        for fk in self.live_fks(&self.indexes[index.index()].referencing_fks) {
            self.mark_removed(fk.into());
        }
        self.indexes[index.index()].primary_key = None;
        self.mark_removed(pk.into());
    }

    fn remove_index_cascade(&mut self, index: IndexId) {
        if self.indexes[index.index()].removed {
            return;
        }
        let idx = &self.indexes[index.index()];
        let mut fks = self.live_fks(&idx.referencing_fks);
        fks.extend(self.live_fks(&idx.owning_fks));
        for fk in fks {
            self.mark_removed(fk.into());
        }
        if let Some(pk) = self.indexes[index.index()].primary_key {
            self.drop_primary_key_cascade(pk);
        }
        self.mark_removed(index.into());
    }

    fn remove_column_cascade(&mut self, column: ColumnId) {
        for index in self.columns[column.index()].indexes.clone() {
            self.remove_index_cascade(index);
        }
        self.mark_removed(column.into());
    }

    fn remove_table_cascade(&mut self, table: TableId) {
        if self.tables[table.index()].removed {
            return;
        }
        let indexes = self.live_indexes(table);
        for &index in &indexes {
            for fk in self.live_fks(&self.indexes[index.index()].referencing_fks) {
                if self.foreign_key_table(fk) != Some(table) {
                    self.mark_removed(fk.into());
                }
            }
        }
        for fk in self.live_foreign_keys(table) {
            self.mark_removed(fk.into());
        }
        if let Some(pk) = self.primary_key_of(table) {
            self.drop_primary_key_cascade(pk);
        }
        for index in indexes {
            self.remove_index_cascade(index);
        }
        for column in self.live_columns(table) {
            self.mark_removed(column.into());
        }
        self.mark_removed(table.into());
    }

    fn remove_schema_cascade(&mut self, schema: SchemaId) -> Result<()> {
        if self.schemas[schema.index()].removed {
            return Ok(());
        }
        let tables = self.live_tables(schema);
        let mut external = Vec::new();
        for &table in &tables {
            for index in self.live_indexes(table) {
                for fk in self.live_fks(&self.indexes[index.index()].referencing_fks) {
                    let owner = self.foreign_key_table(fk);
                    if owner.is_some_and(|o| self.tables[o.index()].schema != schema) {
                        external.push(self.display_name(fk.into()));
                    }
                }
            }
        }
        if !external.is_empty() {
            return Err(self.error(
                ErrorKind::ExternallyReferenced,
                self.schemas[schema.index()].name.clone(),
                format!("referenced by {}", external.join(", ")),
            ));
        }
        for table in tables {
            self.remove_table_cascade(table);
        }
        self.mark_removed(schema.into());
        Ok(())
    }
}

/// Mutator for a schema.
#[derive(Debug)]
pub struct SchemaMut<'a> {
    db: &'a mut DatabaseModel,
    id: SchemaId,
}

impl SchemaMut<'_> {
    #[must_use]
    pub const fn id(&self) -> SchemaId {
        self.id
    }

    /// Renames the schema.
    pub fn set_name(self, name: impl Into<String>) -> Result<Self> {
        self.db.rename(self.id.into(), name.into())?;
        Ok(self)
    }

    /// Removes the schema and all its tables.
    ///
    /// Fails with `ExternallyReferenced` if a table outside the schema holds
    /// a foreign key into it.
    pub fn remove(self) -> Result<()> {
        self.db.remove_schema_cascade(self.id)
    }
}

/// Mutator for a table.
#[derive(Debug)]
pub struct TableMut<'a> {
    db: &'a mut DatabaseModel,
    id: TableId,
}

impl TableMut<'_> {
    #[must_use]
    pub const fn id(&self) -> TableId {
        self.id
    }

    /// Renames the table.
    pub fn set_name(self, name: impl Into<String>) -> Result<Self> {
        self.db.rename(self.id.into(), name.into())?;
        Ok(self)
    }

    /// Removes the table together with incoming foreign keys.
    pub fn remove(self) -> Result<()> {
        self.db.remove_table_cascade(self.id);
        Ok(())
    }
}

/// Mutator for a column.
#[derive(Debug)]
pub struct ColumnMut<'a> {
    db: &'a mut DatabaseModel,
    id: ColumnId,
}

impl ColumnMut<'_> {
    #[must_use]
    pub const fn id(&self) -> ColumnId {
        self.id
    }

    /// Renames the column.
    pub fn set_name(self, name: impl Into<String>) -> Result<Self> {
        self.db.rename(self.id.into(), name.into())?;
        Ok(self)
    }

    /// Changes the column type.
    pub fn set_type(self, ty: impl Into<TypeDefinition>) -> Result<Self> {
        self.db.retype(self.id, ty.into())?;
        Ok(self)
    }

    /// Sets whether the column accepts NULL.
    pub fn mark_nullable(self, nullable: bool) -> Result<Self> {
        self.db.set_nullable(self.id, nullable)?;
        Ok(self)
    }

    /// Sets or clears the default value.
    pub fn set_default_value(self, default: Option<DefaultValue>) -> Result<Self> {
        self.db.set_default(self.id, default)?;
        Ok(self)
    }

    /// Removes the column and every index that uses it.
    pub fn remove(self) -> Result<()> {
        if !self.db.columns[self.id.index()].removed {
            self.db.remove_column_cascade(self.id);
        }
        Ok(())
    }
}

/// Mutator for an index.
#[derive(Debug)]
pub struct IndexMut<'a> {
    db: &'a mut DatabaseModel,
    id: IndexId,
}

impl IndexMut<'_> {
    #[must_use]
    pub const fn id(&self) -> IndexId {
        self.id
    }

    /// Renames the index.
    pub fn set_name(self, name: impl Into<String>) -> Result<Self> {
        self.db.rename(self.id.into(), name.into())?;
        Ok(self)
    }

    /// Removes the index, its foreign keys and any primary key it backs.
    pub fn remove(self) -> Result<()> {
        self.db.remove_index_cascade(self.id);
        Ok(())
    }
}

/// Mutator for a primary key.
#[derive(Debug)]
pub struct PrimaryKeyMut<'a> {
    db: &'a mut DatabaseModel,
    id: PrimaryKeyId,
}

impl PrimaryKeyMut<'_> {
    #[must_use]
    pub const fn id(&self) -> PrimaryKeyId {
        self.id
    }

    /// Renames the primary key constraint.
    pub fn set_name(self, name: impl Into<String>) -> Result<Self> {
        self.db.rename(self.id.into(), name.into())?;
        Ok(self)
    }

    /// Removes the primary key. The backing index stays as a unique index.
    ///
    /// Fails with `ExternallyReferenced` while other tables reference it.
    pub fn remove(self) -> Result<()> {
        if self.db.primary_keys[self.id.index()].removed {
            return Ok(());
        }
        self.db.check_pk_not_external(self.id)?;
        self.db.drop_primary_key_cascade(self.id);
        Ok(())
    }
}

/// Mutator for a foreign key.
#[derive(Debug)]
pub struct ForeignKeyMut<'a> {
    db: &'a mut DatabaseModel,
    id: ForeignKeyId,
}

impl ForeignKeyMut<'_> {
    #[must_use]
    pub const fn id(&self) -> ForeignKeyId {
        self.id
    }

    /// Renames the constraint.
    pub fn set_name(self, name: impl Into<String>) -> Result<Self> {
        self.db.rename(self.id.into(), name.into())?;
        Ok(self)
    }

    /// Sets the ON DELETE and ON UPDATE actions.
    pub fn set_reference_behavior(self, on_delete: ForeignKeyAction, on_update: ForeignKeyAction) -> Result<Self> {
        self.db.set_actions(self.id, on_delete, on_update)?;
        Ok(self)
    }

    pub fn remove(self) -> Result<()> {
        self.db.mark_removed(self.id.into());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dialect::{PostgresDialect, SqliteDialect};
    use crate::error::ErrorKind;
    use crate::journal::MutationKind;
    use crate::types::SqlType;

    fn users_table(db: &mut DatabaseModel) -> (TableId, ColumnId, IndexId) {
        let main = db.default_schema();
        let t = db.create_table(main, "users").unwrap();
        let id = db.create_column(t, "id", SqlType::Integer).unwrap();
        let ix = db.create_index(t, &[(id, SortDirection::Ascending)], true, None).unwrap();
        db.create_primary_key(ix, None).unwrap();
        (t, id, ix)
    }

    #[test]
    fn test_default_names() {
        let mut db = DatabaseModel::new(SqliteDialect::new());
        let (t, _, ix) = users_table(&mut db);
        assert_eq!(db.index(ix).unwrap().name(), "ix_users_id");
        let pk = db.primary_key_of(t).unwrap();
        assert_eq!(db.primary_key(pk).unwrap().name(), "pk_users");

        let main = db.default_schema();
        let posts = db.create_table(main, "posts").unwrap();
        let author = db.create_column(posts, "author", SqlType::BigInt).unwrap();
        let own = db.create_index(posts, &[(author, SortDirection::Ascending)], false, None).unwrap();
        let fk1 = db.create_foreign_key(own, ix, None).unwrap();
        let fk2 = db.create_foreign_key(own, ix, None).unwrap();
        assert_eq!(db.foreign_key(fk1).unwrap().name(), "fk_posts_users");
        assert_eq!(db.foreign_key(fk2).unwrap().name(), "fk_posts_users_2");
    }

    #[test]
    fn test_name_validation() {
        let mut db = DatabaseModel::new(SqliteDialect::new());
        let main = db.default_schema();
        let err = db.create_table(main, "").unwrap_err();
        assert!(err.has_kind(ErrorKind::NameInvalid));
        let err = db.create_table(main, "__oxide_tmp").unwrap_err();
        assert!(err.has_kind(ErrorKind::NameInvalid));
        let err = db.create_table(main, "bad\nname").unwrap_err();
        assert!(err.has_kind(ErrorKind::NameInvalid));
        let err = db.create_table(main, "x".repeat(129)).unwrap_err();
        assert!(err.has_kind(ErrorKind::NameInvalid));

        db.create_table(main, "Users").unwrap();
        let err = db.create_table(main, "users").unwrap_err();
        assert!(err.has_kind(ErrorKind::NameConflict));
    }

    #[test]
    fn test_shared_schema_namespace() {
        let mut db = DatabaseModel::new(SqliteDialect::new());
        let (t, id, _) = users_table(&mut db);
        let err = db
            .create_index(t, &[(id, SortDirection::Descending)], false, Some("users"))
            .unwrap_err();
        assert!(err.has_kind(ErrorKind::NameConflict));
    }

    #[test]
    fn test_index_column_must_belong_to_table() {
        let mut db = DatabaseModel::new(SqliteDialect::new());
        let (_, id, _) = users_table(&mut db);
        let main = db.default_schema();
        let other = db.create_table(main, "other").unwrap();
        let err = db
            .create_index(other, &[(id, SortDirection::Ascending)], false, None)
            .unwrap_err();
        assert!(err.has_kind(ErrorKind::ForeignReference));
    }

    #[test]
    fn test_foreign_key_checks() {
        let mut db = DatabaseModel::new(SqliteDialect::new());
        let (users, _, users_pk_ix) = users_table(&mut db);
        let main = db.default_schema();
        let posts = db.create_table(main, "posts").unwrap();
        let title = db.create_column(posts, "title", SqlType::Text).unwrap();
        let title_ix = db.create_index(posts, &[(title, SortDirection::Ascending)], false, None).unwrap();

        let err = db.create_foreign_key(title_ix, users_pk_ix, None).unwrap_err();
        assert!(err.has_kind(ErrorKind::ColumnShapeMismatch));

        let author = db.create_column(posts, "author", SqlType::Integer).unwrap();
        let author_ix = db.create_index(posts, &[(author, SortDirection::Ascending)], false, None).unwrap();
        let err = db.create_foreign_key(users_pk_ix, author_ix, None).unwrap_err();
        assert!(err.has_kind(ErrorKind::IndexNotUnique));

        db.table_mut(users).unwrap().remove().unwrap();
        let err = db.create_foreign_key(author_ix, users_pk_ix, None).unwrap_err();
        assert!(err.has_kind(ErrorKind::ReferencedObjectRemoved));
    }

    #[test]
    fn test_cross_schema_foreign_key() {
        let mut db = DatabaseModel::new(SqliteDialect::new());
        let (_, _, users_ix) = users_table(&mut db);
        let aux = db.create_schema("aux").unwrap();
        let t = db.create_table(aux, "audit").unwrap();
        let c = db.create_column(t, "user_id", SqlType::Integer).unwrap();
        let ix = db.create_index(t, &[(c, SortDirection::Ascending)], false, None).unwrap();
        let err = db.create_foreign_key(ix, users_ix, None).unwrap_err();
        assert!(err.has_kind(ErrorKind::CrossScopeReference));

        let mut pg = DatabaseModel::new(PostgresDialect::new());
        let (_, _, users_ix) = users_table(&mut pg);
        let aux = pg.create_schema("aux").unwrap();
        let t = pg.create_table(aux, "audit").unwrap();
        let c = pg.create_column(t, "user_id", SqlType::Integer).unwrap();
        let ix = pg.create_index(t, &[(c, SortDirection::Ascending)], false, None).unwrap();
        assert!(pg.create_foreign_key(ix, users_ix, None).is_ok());
    }

    #[test]
    fn test_non_finite_default_rejected() {
        let mut db = DatabaseModel::new(SqliteDialect::new());
        let (t, _, _) = users_table(&mut db);
        let score = db.create_column(t, "score", SqlType::Real).unwrap();
        db.column_mut(score)
            .unwrap()
            .set_default_value(Some(DefaultValue::Float(1.5)))
            .unwrap();
        for bad in [f64::NAN, f64::INFINITY, f64::NEG_INFINITY] {
            let err = db
                .column_mut(score)
                .unwrap()
                .set_default_value(Some(DefaultValue::Float(bad)))
                .unwrap_err();
            assert!(err.has_kind(ErrorKind::InvalidDefault));
        }
        assert_eq!(
            db.column(score).unwrap().default_value(),
            Some(&DefaultValue::Float(1.5))
        );
    }

    #[test]
    fn test_mutating_removed_object_fails() {
        let mut db = DatabaseModel::new(SqliteDialect::new());
        let (t, id, _) = users_table(&mut db);
        db.column_mut(id).unwrap().remove().unwrap();
        db.column_mut(id).unwrap().remove().unwrap();
        let err = db.column_mut(id).unwrap().set_name("x").unwrap_err();
        assert!(err.has_kind(ErrorKind::ObjectRemoved));
        assert!(db.primary_key_of(t).is_none());
        assert!(db.live_indexes(t).is_empty());
    }

    #[test]
    fn test_remove_pk_externally_referenced() {
        let mut db = DatabaseModel::detached(SqliteDialect::new());
        let (users, _, users_ix) = users_table(&mut db);
        let main = db.default_schema();
        let posts = db.create_table(main, "posts").unwrap();
        let author = db.create_column(posts, "author", SqlType::Integer).unwrap();
        let own = db.create_index(posts, &[(author, SortDirection::Ascending)], false, None).unwrap();
        db.create_foreign_key(own, users_ix, None).unwrap();
        db.attach();

        let pk = db.primary_key_of(users).unwrap();
        let err = db.primary_key_mut(pk).unwrap().remove().unwrap_err();
        assert!(err.has_kind(ErrorKind::ExternallyReferenced));
        assert!(!db.has_pending_changes());
    }

    #[test]
    fn test_remove_table_cascades_leaf_first() {
        let mut db = DatabaseModel::detached(SqliteDialect::new());
        let (users, _, users_ix) = users_table(&mut db);
        let main = db.default_schema();
        let posts = db.create_table(main, "posts").unwrap();
        let author = db.create_column(posts, "author", SqlType::Integer).unwrap();
        let own = db.create_index(posts, &[(author, SortDirection::Ascending)], false, None).unwrap();
        let fk = db.create_foreign_key(own, users_ix, None).unwrap();
        db.attach();

        db.table_mut(users).unwrap().remove().unwrap();
        assert!(db.foreign_key(fk).unwrap().is_removed());
        let records = db.change_records();
        assert_eq!(records.first().map(|r| r.object), Some(ObjectRef::ForeignKey(fk)));
        assert_eq!(records.last().map(|r| r.object), Some(ObjectRef::Table(users)));
        assert!(records.iter().all(|r| r.kind == MutationKind::Remove));
    }

    #[test]
    fn test_scalar_edits_on_new_objects_not_recorded() {
        let mut db = DatabaseModel::new(SqliteDialect::new());
        let (_, id, _) = users_table(&mut db);
        let before = db.change_records().len();
        db.column_mut(id).unwrap().set_name("user_id").unwrap().mark_nullable(false).unwrap();
        assert_eq!(db.change_records().len(), before);
    }

    #[test]
    fn test_replace_primary_key() {
        let mut db = DatabaseModel::detached(SqliteDialect::new());
        let (users, _, _) = users_table(&mut db);
        let email = db.create_column(users, "email", SqlType::Text).unwrap();
        let email_ix = db.create_index(users, &[(email, SortDirection::Ascending)], true, None).unwrap();
        db.attach();

        let old = db.primary_key_of(users).unwrap();
        let new = db.create_primary_key(email_ix, None).unwrap();
        assert!(db.primary_key(old).unwrap().is_removed());
        assert_eq!(db.primary_key_of(users), Some(new));
        assert_eq!(db.primary_key(new).unwrap().name(), "pk_users");
    }
}
