//! PostgreSQL dialect.
//!
//! Every mutation applies in place. Foreign keys are attached with
//! `ALTER TABLE ... ADD CONSTRAINT` once all tables exist.

use crate::journal::MutationKind;
use crate::model::{ColumnShape, ObjectKind, QualifiedName};
use crate::types::{DefaultValue, SqlType, StorageClass, TypeDefinition};

use super::{MigrationDialect, PolicyRule, Strategy};

const POLICY: &[PolicyRule] = &[
    PolicyRule::new(ObjectKind::Schema, MutationKind::Create, Strategy::InPlace),
    PolicyRule::new(ObjectKind::Schema, MutationKind::Remove, Strategy::InPlace),
    PolicyRule::new(ObjectKind::Schema, MutationKind::Rename, Strategy::InPlace),
    PolicyRule::new(ObjectKind::Table, MutationKind::Create, Strategy::InPlace),
    PolicyRule::new(ObjectKind::Table, MutationKind::Remove, Strategy::InPlace),
    PolicyRule::new(ObjectKind::Table, MutationKind::Rename, Strategy::InPlace),
    PolicyRule::new(ObjectKind::Column, MutationKind::Create, Strategy::InPlace),
    PolicyRule::new(ObjectKind::Column, MutationKind::Remove, Strategy::InPlace),
    PolicyRule::new(ObjectKind::Column, MutationKind::Rename, Strategy::InPlace),
    PolicyRule::new(ObjectKind::Column, MutationKind::Retype, Strategy::InPlace),
    PolicyRule::new(ObjectKind::Column, MutationKind::Nullability, Strategy::InPlace),
    PolicyRule::new(ObjectKind::Column, MutationKind::Default, Strategy::InPlace),
    PolicyRule::new(ObjectKind::Index, MutationKind::Create, Strategy::InPlace),
    PolicyRule::new(ObjectKind::Index, MutationKind::Remove, Strategy::InPlace),
    PolicyRule::new(ObjectKind::Index, MutationKind::Rename, Strategy::InPlace),
    PolicyRule::new(ObjectKind::PrimaryKey, MutationKind::Create, Strategy::InPlace),
    PolicyRule::new(ObjectKind::PrimaryKey, MutationKind::Remove, Strategy::InPlace),
    PolicyRule::new(ObjectKind::PrimaryKey, MutationKind::Rename, Strategy::InPlace),
    PolicyRule::new(ObjectKind::ForeignKey, MutationKind::Create, Strategy::InPlace),
    PolicyRule::new(ObjectKind::ForeignKey, MutationKind::Remove, Strategy::InPlace),
    PolicyRule::new(ObjectKind::ForeignKey, MutationKind::Rename, Strategy::InPlace),
    PolicyRule::new(ObjectKind::ForeignKey, MutationKind::ReferenceBehavior, Strategy::InPlace),
];

/// PostgreSQL migration dialect.
#[derive(Debug, Clone, Default)]
pub struct PostgresDialect;

impl PostgresDialect {
    /// Creates a new PostgreSQL dialect.
    #[must_use]
    pub const fn new() -> Self {
        Self
    }
}

impl MigrationDialect for PostgresDialect {
    fn name(&self) -> &'static str {
        "postgres"
    }

    fn policy(&self) -> &'static [PolicyRule] {
        POLICY
    }

    fn default_schema(&self) -> &'static str {
        "public"
    }

    fn supports_drop_column(&self) -> bool {
        true
    }

    fn supports_add_constraint(&self) -> bool {
        true
    }

    fn supports_rename_index(&self) -> bool {
        true
    }

    fn references_follow_renames(&self) -> bool {
        true
    }

    fn supports_cross_schema_references(&self) -> bool {
        true
    }

    fn type_name(&self, ty: &TypeDefinition) -> String {
        match (ty.storage, &ty.sql_type) {
            (StorageClass::Blob, _) => "BYTEA".to_string(),
            (_, sql_type) => sql_type.postgres_name(),
        }
    }

    fn default_literal(&self, value: &DefaultValue, ty: &TypeDefinition) -> String {
        match value {
            DefaultValue::Bool(b) => if *b { "TRUE" } else { "FALSE" }.to_string(),
            DefaultValue::Integer(i) if ty.sql_type == SqlType::Boolean => {
                if *i == 0 { "FALSE" } else { "TRUE" }.to_string()
            }
            other => other.to_sql(),
        }
    }

    fn zero_value(&self, ty: &TypeDefinition) -> String {
        if ty.storage == StorageClass::Blob {
            return "'\\x'".to_string();
        }
        match ty.sql_type {
            SqlType::Boolean => "FALSE".to_string(),
            SqlType::Integer | SqlType::BigInt | SqlType::SmallInt | SqlType::Decimal(_, _) => "0".to_string(),
            SqlType::Real | SqlType::Double => "0.0".to_string(),
            SqlType::Text | SqlType::Varchar(_) | SqlType::Char(_) => "''".to_string(),
            SqlType::Date => "'0001-01-01'".to_string(),
            SqlType::Time => "'00:00:00'".to_string(),
            SqlType::DateTime | SqlType::Timestamp => "'0001-01-01 00:00:00'".to_string(),
            SqlType::Json => "'null'".to_string(),
            SqlType::Uuid => "'00000000-0000-0000-0000-000000000000'".to_string(),
            SqlType::Blob => "'\\x'".to_string(),
        }
    }

    fn alter_column_type(&self, table: &QualifiedName, column: &ColumnShape) -> String {
        let name = self.quote_identifier(&column.name);
        format!(
            "ALTER TABLE {} ALTER COLUMN {name} TYPE {} USING {}",
            self.qualify(table),
            self.type_name(&column.ty),
            self.cast(&name, &column.ty)
        )
    }

    fn rename_index(&self, table: &QualifiedName, from: &str, to: &str) -> Option<String> {
        Some(format!(
            "ALTER INDEX {} RENAME TO {}",
            self.qualify(&table.with_name(from)),
            self.quote_identifier(to)
        ))
    }

    fn rename_constraint(&self, table: &QualifiedName, from: &str, to: &str) -> Option<String> {
        Some(format!(
            "ALTER TABLE {} RENAME CONSTRAINT {} TO {}",
            self.qualify(table),
            self.quote_identifier(from),
            self.quote_identifier(to)
        ))
    }

    fn create_schema(&self, name: &str) -> Option<String> {
        Some(format!("CREATE SCHEMA {}", self.quote_identifier(name)))
    }

    fn drop_schema(&self, name: &str) -> Option<String> {
        Some(format!("DROP SCHEMA {}", self.quote_identifier(name)))
    }

    fn rename_schema(&self, from: &str, to: &str) -> Option<String> {
        Some(format!(
            "ALTER SCHEMA {} RENAME TO {}",
            self.quote_identifier(from),
            self.quote_identifier(to)
        ))
    }
}
