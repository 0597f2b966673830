//! Before/after projections of a table.
//!
//! A shape is a plain snapshot of one table as the physical database sees it
//! at the last flush ([`Side::Before`]) or as the model describes it now
//! ([`Side::After`]). The statement assembler only ever works on shapes.

use serde::Serialize;

use super::handle::{ColumnId, ForeignKeyId, IndexId, ObjectRef, PrimaryKeyId, SchemaId, TableId};
use super::DatabaseModel;
use crate::journal::{Property, PropertyValue};
use crate::types::{DefaultValue, ForeignKeyAction, SortDirection, TypeDefinition};

/// Which state of the model a shape describes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Side {
    /// Physical state as of the last flush.
    Before,
    /// Current model state.
    After,
}

/// Schema-qualified object name.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct QualifiedName {
    pub schema: String,
    pub name: String,
}

impl QualifiedName {
    pub fn new(schema: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            schema: schema.into(),
            name: name.into(),
        }
    }

    /// Same schema, different object name.
    #[must_use]
    pub fn with_name(&self, name: impl Into<String>) -> Self {
        Self::new(self.schema.clone(), name)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ColumnShape {
    pub id: ColumnId,
    pub name: String,
    pub ty: TypeDefinition,
    pub nullable: bool,
    pub default: Option<DefaultValue>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct IndexShape {
    pub id: IndexId,
    pub name: String,
    pub columns: Vec<(String, SortDirection)>,
    pub column_ids: Vec<ColumnId>,
    pub unique: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PrimaryKeyShape {
    pub id: PrimaryKeyId,
    pub index: IndexId,
    pub name: String,
    pub columns: Vec<String>,
    pub column_ids: Vec<ColumnId>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ForeignKeyShape {
    pub id: ForeignKeyId,
    pub name: String,
    pub columns: Vec<String>,
    pub column_ids: Vec<ColumnId>,
    pub referenced_table: TableId,
    pub referenced: QualifiedName,
    pub referenced_columns: Vec<String>,
    pub on_delete: ForeignKeyAction,
    pub on_update: ForeignKeyAction,
}

impl ForeignKeyShape {
    /// The part of the constraint text that names the referenced table and
    /// columns.
    #[must_use]
    pub fn reference_target(&self) -> (&QualifiedName, &[String]) {
        (&self.referenced, &self.referenced_columns)
    }
}

/// Complete projection of one table.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TableShape {
    pub id: TableId,
    pub name: QualifiedName,
    pub columns: Vec<ColumnShape>,
    pub primary_key: Option<PrimaryKeyShape>,
    /// Secondary indexes; the index backing the primary key is not listed.
    pub indexes: Vec<IndexShape>,
    pub foreign_keys: Vec<ForeignKeyShape>,
}

impl TableShape {
    #[must_use]
    pub fn column(&self, id: ColumnId) -> Option<&ColumnShape> {
        self.columns.iter().find(|c| c.id == id)
    }

    #[must_use]
    pub fn index(&self, id: IndexId) -> Option<&IndexShape> {
        self.indexes.iter().find(|i| i.id == id)
    }

    #[must_use]
    pub fn foreign_key(&self, id: ForeignKeyId) -> Option<&ForeignKeyShape> {
        self.foreign_keys.iter().find(|f| f.id == id)
    }

    /// Returns a copy without the given foreign keys.
    #[must_use]
    pub fn without_foreign_keys(&self, skip: &[ForeignKeyId]) -> Self {
        let mut shape = self.clone();
        shape.foreign_keys.retain(|f| !skip.contains(&f.id));
        shape
    }
}

impl DatabaseModel {
    const fn present(persisted: bool, removed: bool, side: Side) -> bool {
        match side {
            Side::Before => persisted,
            Side::After => !removed,
        }
    }

    /// Name of an object on one side.
    pub(crate) fn name_on(&self, object: ObjectRef, current: &str, side: Side) -> String {
        match side {
            Side::Before => self.original_name(object, current),
            Side::After => current.to_string(),
        }
    }

    /// Physical schema name of a table's schema during table statements.
    ///
    /// Schema renames run before table statements, so a live schema is
    /// already known by its current name; a removed one keeps its original
    /// name until it is dropped at the end.
    pub(crate) fn schema_name_for_tables(&self, schema: SchemaId) -> String {
        let model = &self.schemas[schema.index()];
        if model.removed {
            self.original_name(schema.into(), &model.name)
        } else {
            model.name.clone()
        }
    }

    /// Qualified name of a table on one side.
    #[must_use]
    pub fn table_name_on(&self, table: TableId, side: Side) -> QualifiedName {
        let model = &self.tables[table.index()];
        QualifiedName::new(
            self.schema_name_for_tables(model.schema),
            self.name_on(table.into(), &model.name, side),
        )
    }

    fn column_shape(&self, id: ColumnId, side: Side) -> ColumnShape {
        let c = &self.columns[id.index()];
        let object = ObjectRef::Column(id);
        let (ty, nullable, default) = match side {
            Side::After => (c.ty.clone(), c.nullable, c.default.clone()),
            Side::Before => {
                let ty = match self.journal.original(object, Property::Type) {
                    Some(PropertyValue::Type(t)) => t.clone(),
                    _ => c.ty.clone(),
                };
                let nullable = match self.journal.original(object, Property::Nullable) {
                    Some(PropertyValue::Nullable(n)) => *n,
                    _ => c.nullable,
                };
                let default = match self.journal.original(object, Property::Default) {
                    Some(PropertyValue::Default(d)) => d.clone(),
                    _ => c.default.clone(),
                };
                (ty, nullable, default)
            }
        };
        ColumnShape {
            id,
            name: self.name_on(object, &c.name, side),
            ty,
            nullable,
            default,
        }
    }

    fn index_columns(&self, index: IndexId, side: Side) -> (Vec<(String, SortDirection)>, Vec<ColumnId>) {
        self.indexes[index.index()]
            .columns
            .iter()
            .map(|r| {
                let c = &self.columns[r.column.index()];
                ((self.name_on(r.column.into(), &c.name, side), r.direction), r.column)
            })
            .unzip()
    }

    fn action_on(&self, fk: ForeignKeyId, property: Property, current: ForeignKeyAction, side: Side) -> ForeignKeyAction {
        match (side, self.journal.original(fk.into(), property)) {
            (Side::Before, Some(PropertyValue::Action(a))) => *a,
            _ => current,
        }
    }

    /// The primary key present on one side of a table.
    pub(crate) fn primary_key_on(&self, table: TableId, side: Side) -> Option<PrimaryKeyId> {
        self.tables[table.index()].primary_keys.iter().copied().find(|&pk| {
            let p = &self.primary_keys[pk.index()];
            Self::present(p.persisted, p.removed, side)
        })
    }

    /// Foreign keys present on one side, owned by a table.
    pub(crate) fn foreign_keys_on(&self, table: TableId, side: Side) -> Vec<ForeignKeyId> {
        self.tables[table.index()]
            .foreign_keys
            .iter()
            .copied()
            .filter(|&fk| {
                let f = &self.foreign_keys[fk.index()];
                Self::present(f.persisted, f.removed, side)
            })
            .collect()
    }

    /// Whether a table exists on one side.
    #[must_use]
    pub fn table_exists_on(&self, table: TableId, side: Side) -> bool {
        self.table(table)
            .is_some_and(|t| Self::present(t.persisted, t.removed, side))
    }

    /// Projects a table onto one side, or `None` if it does not exist there.
    #[must_use]
    pub fn table_shape(&self, table: TableId, side: Side) -> Option<TableShape> {
        if !self.table_exists_on(table, side) {
            return None;
        }
        let model = &self.tables[table.index()];

        let columns = model
            .columns
            .iter()
            .copied()
            .filter(|&c| {
                let col = &self.columns[c.index()];
                Self::present(col.persisted, col.removed, side)
            })
            .map(|c| self.column_shape(c, side))
            .collect();

        let pk = self.primary_key_on(table, side);
        let primary_key = pk.map(|pk| {
            let p = &self.primary_keys[pk.index()];
            let (cols, column_ids) = self.index_columns(p.index, side);
            PrimaryKeyShape {
                id: pk,
                index: p.index,
                name: self.name_on(pk.into(), &p.name, side),
                columns: cols.into_iter().map(|(n, _)| n).collect(),
                column_ids,
            }
        });
        let pk_index = primary_key.as_ref().map(|p| p.index);

        let indexes = model
            .indexes
            .iter()
            .copied()
            .filter(|&i| {
                let idx = &self.indexes[i.index()];
                Some(i) != pk_index && Self::present(idx.persisted, idx.removed, side)
            })
            .map(|i| {
                let idx = &self.indexes[i.index()];
                let (columns, column_ids) = self.index_columns(i, side);
                IndexShape {
                    id: i,
                    name: self.name_on(i.into(), &idx.name, side),
                    columns,
                    column_ids,
                    unique: idx.unique,
                }
            })
            .collect();

        let foreign_keys = self
            .foreign_keys_on(table, side)
            .into_iter()
            .map(|fk| {
                let f = &self.foreign_keys[fk.index()];
                let (own, column_ids) = self.index_columns(f.owning, side);
                let referenced_table = self.indexes[f.referenced.index()].table;
                let (theirs, _) = self.index_columns(f.referenced, side);
                ForeignKeyShape {
                    id: fk,
                    name: self.name_on(fk.into(), &f.name, side),
                    columns: own.into_iter().map(|(n, _)| n).collect(),
                    column_ids,
                    referenced_table,
                    referenced: self.table_name_on(referenced_table, side),
                    referenced_columns: theirs.into_iter().map(|(n, _)| n).collect(),
                    on_delete: self.action_on(fk, Property::OnDelete, f.on_delete, side),
                    on_update: self.action_on(fk, Property::OnUpdate, f.on_update, side),
                }
            })
            .collect();

        Some(TableShape {
            id: table,
            name: self.table_name_on(table, side),
            columns,
            primary_key,
            indexes,
            foreign_keys,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dialect::SqliteDialect;
    use crate::types::SqlType;

    #[test]
    fn test_before_and_after_shapes() {
        let mut db = DatabaseModel::detached(SqliteDialect::new());
        let main = db.default_schema();
        let t = db.create_table(main, "users").unwrap();
        let id = db.create_column(t, "id", SqlType::Integer).unwrap();
        let name = db.create_column(t, "name", SqlType::Text).unwrap();
        let ix = db.create_index(t, &[(id, SortDirection::Ascending)], true, None).unwrap();
        db.create_primary_key(ix, None).unwrap();
        db.attach();

        db.column_mut(name).unwrap().set_name("full_name").unwrap().mark_nullable(false).unwrap();
        db.table_mut(t).unwrap().set_name("people").unwrap();
        db.create_column(t, "age", SqlType::Integer).unwrap();

        let before = db.table_shape(t, Side::Before).unwrap();
        let after = db.table_shape(t, Side::After).unwrap();
        assert_eq!(before.name, QualifiedName::new("main", "users"));
        assert_eq!(after.name, QualifiedName::new("main", "people"));
        assert_eq!(before.columns.len(), 2);
        assert_eq!(after.columns.len(), 3);
        assert_eq!(before.columns[1].name, "name");
        assert!(before.columns[1].nullable);
        assert_eq!(after.columns[1].name, "full_name");
        assert!(!after.columns[1].nullable);
        assert!(before.indexes.is_empty());
        assert_eq!(after.primary_key.as_ref().map(|p| p.columns.clone()), Some(vec!["id".to_string()]));
    }

    #[test]
    fn test_new_table_has_no_before_shape() {
        let mut db = DatabaseModel::new(SqliteDialect::new());
        let main = db.default_schema();
        let t = db.create_table(main, "fresh").unwrap();
        assert!(db.table_shape(t, Side::Before).is_none());
        assert!(db.table_shape(t, Side::After).is_some());
    }
}
