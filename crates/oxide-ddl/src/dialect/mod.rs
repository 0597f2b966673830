//! Database dialect implementations.
//!
//! A dialect is two things: a policy table deciding, per object kind and
//! mutation kind, whether a change can be applied in place or needs the
//! owning table rebuilt; and the renderers producing statement text.

mod postgres;
mod sqlite;

pub use postgres::PostgresDialect;
pub use sqlite::SqliteDialect;

use std::fmt;

use crate::journal::MutationKind;
use crate::model::{ColumnShape, ForeignKeyShape, IndexShape, ObjectKind, PrimaryKeyShape, QualifiedName, TableShape};
use crate::types::{DefaultValue, ForeignKeyAction, SortDirection, SqlType, StorageClass, TypeDefinition};

/// How a mutation reaches the physical database.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Strategy {
    /// A single statement applies it.
    InPlace,
    /// The owning table must be rebuilt.
    Reconstruct,
    /// The dialect cannot express it.
    Unsupported,
}

/// One entry of a dialect policy table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PolicyRule {
    pub object: ObjectKind,
    pub mutation: MutationKind,
    pub strategy: Strategy,
}

impl PolicyRule {
    #[must_use]
    pub const fn new(object: ObjectKind, mutation: MutationKind, strategy: Strategy) -> Self {
        Self {
            object,
            mutation,
            strategy,
        }
    }
}

/// Trait for database-specific policy and SQL generation.
pub trait MigrationDialect: Send + Sync + fmt::Debug {
    /// Returns the dialect name.
    fn name(&self) -> &'static str;

    /// Declarative classification table.
    fn policy(&self) -> &'static [PolicyRule];

    /// Classifies a mutation. Pairs missing from the policy rebuild.
    fn classify(&self, object: ObjectKind, mutation: MutationKind) -> Strategy {
        self.policy()
            .iter()
            .find(|r| r.object == object && r.mutation == mutation)
            .map_or(Strategy::Reconstruct, |r| r.strategy)
    }

    /// Name of the schema every model starts with.
    fn default_schema(&self) -> &'static str;

    /// Returns whether this dialect supports DROP COLUMN.
    fn supports_drop_column(&self) -> bool;

    /// Returns whether constraints can be added after table creation.
    fn supports_add_constraint(&self) -> bool;

    /// Returns whether indexes can be renamed in place.
    fn supports_rename_index(&self) -> bool;

    /// Returns whether renaming a table or column rewrites the foreign keys
    /// of other tables that reference it.
    fn references_follow_renames(&self) -> bool;

    /// Returns whether a foreign key may reference a table in another schema.
    fn supports_cross_schema_references(&self) -> bool;

    /// Quote an identifier (table name, column name, etc.).
    fn quote_identifier(&self, name: &str) -> String {
        format!("\"{}\"", name.replace('"', "\"\""))
    }

    /// Renders a schema-qualified name.
    fn qualify(&self, name: &QualifiedName) -> String {
        format!(
            "{}.{}",
            self.quote_identifier(&name.schema),
            self.quote_identifier(&name.name)
        )
    }

    /// Returns the SQL type name for the given type.
    fn type_name(&self, ty: &TypeDefinition) -> String;

    /// Renders a default value for a column of type `ty`.
    fn default_literal(&self, value: &DefaultValue, _ty: &TypeDefinition) -> String {
        value.to_sql()
    }

    /// Literal used for rows that must receive a value but have no default.
    fn zero_value(&self, ty: &TypeDefinition) -> String {
        if ty.storage == StorageClass::Blob {
            return "X''".to_string();
        }
        match ty.sql_type {
            SqlType::Integer | SqlType::BigInt | SqlType::SmallInt | SqlType::Boolean | SqlType::Decimal(_, _) => {
                "0".to_string()
            }
            SqlType::Real | SqlType::Double => "0.0".to_string(),
            SqlType::Text | SqlType::Varchar(_) | SqlType::Char(_) => "''".to_string(),
            SqlType::Date => "'0001-01-01'".to_string(),
            SqlType::Time => "'00:00:00'".to_string(),
            SqlType::DateTime | SqlType::Timestamp => "'0001-01-01 00:00:00'".to_string(),
            SqlType::Json => "'null'".to_string(),
            SqlType::Uuid => "'00000000-0000-0000-0000-000000000000'".to_string(),
            SqlType::Blob => "X''".to_string(),
        }
    }

    /// Converts an expression to a type.
    fn cast(&self, expr: &str, ty: &TypeDefinition) -> String {
        format!("CAST({expr} AS {})", self.type_name(ty))
    }

    /// Generates column definition SQL.
    fn column_definition(&self, column: &ColumnShape) -> String {
        let mut parts = vec![self.quote_identifier(&column.name), self.type_name(&column.ty)];
        if !column.nullable {
            parts.push("NOT NULL".to_string());
        }
        if let Some(default) = &column.default {
            parts.push(format!("DEFAULT {}", self.default_literal(default, &column.ty)));
        }
        parts.join(" ")
    }

    /// Renders the table a foreign key points at.
    fn reference_target(&self, fk: &ForeignKeyShape) -> String {
        self.qualify(&fk.referenced)
    }

    /// Renders a foreign key table constraint.
    fn foreign_key_clause(&self, fk: &ForeignKeyShape) -> String {
        let mut sql = format!(
            "CONSTRAINT {} FOREIGN KEY ({}) REFERENCES {} ({})",
            self.quote_identifier(&fk.name),
            self.column_list(&fk.columns),
            self.reference_target(fk),
            self.column_list(&fk.referenced_columns)
        );
        if fk.on_delete != ForeignKeyAction::NoAction {
            sql.push_str(" ON DELETE ");
            sql.push_str(fk.on_delete.to_sql());
        }
        if fk.on_update != ForeignKeyAction::NoAction {
            sql.push_str(" ON UPDATE ");
            sql.push_str(fk.on_update.to_sql());
        }
        sql
    }

    /// Renders a primary key table constraint.
    fn primary_key_clause(&self, pk: &PrimaryKeyShape) -> String {
        format!(
            "CONSTRAINT {} PRIMARY KEY ({})",
            self.quote_identifier(&pk.name),
            self.column_list(&pk.columns)
        )
    }

    /// Comma separated quoted identifiers.
    fn column_list(&self, columns: &[String]) -> String {
        columns
            .iter()
            .map(|c| self.quote_identifier(c))
            .collect::<Vec<_>>()
            .join(", ")
    }

    /// Generates SQL for creating a table named `name` with the columns and
    /// constraints of `shape`.
    fn create_table(&self, shape: &TableShape, name: &QualifiedName, include_foreign_keys: bool) -> String {
        let mut defs: Vec<String> = shape.columns.iter().map(|c| self.column_definition(c)).collect();
        if let Some(pk) = &shape.primary_key {
            defs.push(self.primary_key_clause(pk));
        }
        if include_foreign_keys {
            defs.extend(shape.foreign_keys.iter().map(|fk| self.foreign_key_clause(fk)));
        }
        format!("CREATE TABLE {} (\n  {}\n)", self.qualify(name), defs.join(",\n  "))
    }

    /// Generates SQL for dropping a table.
    fn drop_table(&self, name: &QualifiedName) -> String {
        format!("DROP TABLE {}", self.qualify(name))
    }

    /// Generates SQL for renaming a table within its schema.
    fn rename_table(&self, from: &QualifiedName, to: &str) -> String {
        format!("ALTER TABLE {} RENAME TO {}", self.qualify(from), self.quote_identifier(to))
    }

    /// Generates SQL for adding a column.
    fn add_column(&self, table: &QualifiedName, column: &ColumnShape) -> String {
        format!("ALTER TABLE {} ADD COLUMN {}", self.qualify(table), self.column_definition(column))
    }

    /// Generates SQL for dropping a column.
    fn drop_column(&self, table: &QualifiedName, column: &str) -> String {
        format!("ALTER TABLE {} DROP COLUMN {}", self.qualify(table), self.quote_identifier(column))
    }

    /// Generates SQL for renaming a column.
    fn rename_column(&self, table: &QualifiedName, from: &str, to: &str) -> String {
        format!(
            "ALTER TABLE {} RENAME COLUMN {} TO {}",
            self.qualify(table),
            self.quote_identifier(from),
            self.quote_identifier(to)
        )
    }

    /// Generates the statements changing a column's type, default and
    /// nullability in place.
    fn alter_column(&self, table: &QualifiedName, before: &ColumnShape, after: &ColumnShape) -> Vec<String> {
        let prefix = format!(
            "ALTER TABLE {} ALTER COLUMN {}",
            self.qualify(table),
            self.quote_identifier(&after.name)
        );
        let mut sql = Vec::new();
        if before.ty != after.ty {
            sql.push(self.alter_column_type(table, after));
        }
        if before.default != after.default {
            match &after.default {
                Some(default) => sql.push(format!(
                    "{prefix} SET DEFAULT {}",
                    self.default_literal(default, &after.ty)
                )),
                None => sql.push(format!("{prefix} DROP DEFAULT")),
            }
        }
        if before.nullable && !after.nullable {
            let fill = after
                .default
                .as_ref()
                .map_or_else(|| self.zero_value(&after.ty), |d| self.default_literal(d, &after.ty));
            let column = self.quote_identifier(&after.name);
            sql.push(format!(
                "UPDATE {} SET {column} = {fill} WHERE {column} IS NULL",
                self.qualify(table)
            ));
            sql.push(format!("{prefix} SET NOT NULL"));
        } else if !before.nullable && after.nullable {
            sql.push(format!("{prefix} DROP NOT NULL"));
        }
        sql
    }

    /// Generates SQL changing a column's type in place.
    fn alter_column_type(&self, table: &QualifiedName, column: &ColumnShape) -> String {
        format!(
            "ALTER TABLE {} ALTER COLUMN {} SET DATA TYPE {}",
            self.qualify(table),
            self.quote_identifier(&column.name),
            self.type_name(&column.ty)
        )
    }

    /// Renders the column list of an index.
    fn index_columns(&self, index: &IndexShape) -> String {
        index
            .columns
            .iter()
            .map(|(name, direction)| match direction {
                SortDirection::Ascending => self.quote_identifier(name),
                SortDirection::Descending => format!("{} DESC", self.quote_identifier(name)),
            })
            .collect::<Vec<_>>()
            .join(", ")
    }

    /// Generates SQL for creating an index on `table`.
    fn create_index(&self, table: &QualifiedName, index: &IndexShape) -> String {
        format!(
            "CREATE {}INDEX {} ON {} ({})",
            if index.unique { "UNIQUE " } else { "" },
            self.quote_identifier(&index.name),
            self.qualify(table),
            self.index_columns(index)
        )
    }

    /// Generates SQL for dropping an index of `table`.
    fn drop_index(&self, table: &QualifiedName, index: &str) -> String {
        format!("DROP INDEX {}", self.qualify(&table.with_name(index)))
    }

    /// Generates SQL for renaming an index, if the dialect can.
    fn rename_index(&self, table: &QualifiedName, from: &str, to: &str) -> Option<String>;

    /// Generates SQL for adding a foreign key to an existing table.
    fn add_foreign_key(&self, table: &QualifiedName, fk: &ForeignKeyShape) -> String {
        format!("ALTER TABLE {} ADD {}", self.qualify(table), self.foreign_key_clause(fk))
    }

    /// Generates SQL for dropping a foreign key.
    fn drop_foreign_key(&self, table: &QualifiedName, name: &str) -> String {
        format!(
            "ALTER TABLE {} DROP CONSTRAINT {}",
            self.qualify(table),
            self.quote_identifier(name)
        )
    }

    /// Generates SQL for adding a primary key to an existing table.
    fn add_primary_key(&self, table: &QualifiedName, pk: &PrimaryKeyShape) -> String {
        format!("ALTER TABLE {} ADD {}", self.qualify(table), self.primary_key_clause(pk))
    }

    /// Generates SQL for dropping a primary key.
    fn drop_primary_key(&self, table: &QualifiedName, name: &str) -> String {
        self.drop_foreign_key(table, name)
    }

    /// Generates SQL for renaming a table constraint, if the dialect can.
    fn rename_constraint(&self, table: &QualifiedName, from: &str, to: &str) -> Option<String>;

    /// Generates SQL for creating a schema, if the dialect has schema DDL.
    fn create_schema(&self, name: &str) -> Option<String>;

    /// Generates SQL for dropping a schema, if the dialect has schema DDL.
    fn drop_schema(&self, name: &str) -> Option<String>;

    /// Generates SQL for renaming a schema, if the dialect has schema DDL.
    fn rename_schema(&self, from: &str, to: &str) -> Option<String>;

    /// Generates the `INSERT ... SELECT` copying rows between tables.
    fn copy_rows(
        &self,
        target: &QualifiedName,
        columns: &[String],
        expressions: &[String],
        source: &QualifiedName,
    ) -> String {
        format!(
            "INSERT INTO {} ({}) SELECT {} FROM {}",
            self.qualify(target),
            self.column_list(columns),
            expressions.join(", "),
            self.qualify(source)
        )
    }

    /// Name a table is built under before it is renamed into place.
    fn temporary_name(&self, kind: ObjectKind, id: u32) -> String {
        format!("__oxide_tmp_{}_{id}", kind.label())
    }

    /// Name an object is parked under while a rename cycle is broken.
    fn swap_name(&self, kind: ObjectKind, id: u32) -> String {
        format!("__oxide_swap_{}_{id}", kind.label())
    }
}
