//! SQLite dialect.
//!
//! SQLite has limited ALTER TABLE support, so most changes require the
//! table recreation strategy: create a new table, copy data, drop the old
//! table, rename the new table. Tables, columns and indexes can still be
//! renamed, dropped and created in place.

use crate::journal::MutationKind;
use crate::model::{ForeignKeyShape, IndexShape, ObjectKind, QualifiedName};
use crate::types::TypeDefinition;

use super::{MigrationDialect, PolicyRule, Strategy};

const MAIN: &str = "main";

const POLICY: &[PolicyRule] = &[
    PolicyRule::new(ObjectKind::Schema, MutationKind::Create, Strategy::InPlace),
    PolicyRule::new(ObjectKind::Schema, MutationKind::Remove, Strategy::InPlace),
    PolicyRule::new(ObjectKind::Schema, MutationKind::Rename, Strategy::Unsupported),
    PolicyRule::new(ObjectKind::Table, MutationKind::Create, Strategy::InPlace),
    PolicyRule::new(ObjectKind::Table, MutationKind::Remove, Strategy::InPlace),
    PolicyRule::new(ObjectKind::Table, MutationKind::Rename, Strategy::InPlace),
    PolicyRule::new(ObjectKind::Column, MutationKind::Create, Strategy::Reconstruct),
    PolicyRule::new(ObjectKind::Column, MutationKind::Remove, Strategy::InPlace),
    PolicyRule::new(ObjectKind::Column, MutationKind::Rename, Strategy::InPlace),
    PolicyRule::new(ObjectKind::Column, MutationKind::Retype, Strategy::Reconstruct),
    PolicyRule::new(ObjectKind::Column, MutationKind::Nullability, Strategy::Reconstruct),
    PolicyRule::new(ObjectKind::Column, MutationKind::Default, Strategy::Reconstruct),
    PolicyRule::new(ObjectKind::Index, MutationKind::Create, Strategy::InPlace),
    PolicyRule::new(ObjectKind::Index, MutationKind::Remove, Strategy::InPlace),
    PolicyRule::new(ObjectKind::Index, MutationKind::Rename, Strategy::InPlace),
    PolicyRule::new(ObjectKind::PrimaryKey, MutationKind::Create, Strategy::Reconstruct),
    PolicyRule::new(ObjectKind::PrimaryKey, MutationKind::Remove, Strategy::Reconstruct),
    PolicyRule::new(ObjectKind::PrimaryKey, MutationKind::Rename, Strategy::Reconstruct),
    PolicyRule::new(ObjectKind::ForeignKey, MutationKind::Create, Strategy::Reconstruct),
    PolicyRule::new(ObjectKind::ForeignKey, MutationKind::Remove, Strategy::Reconstruct),
    PolicyRule::new(ObjectKind::ForeignKey, MutationKind::Rename, Strategy::Reconstruct),
    PolicyRule::new(ObjectKind::ForeignKey, MutationKind::ReferenceBehavior, Strategy::Reconstruct),
];

/// SQLite migration dialect.
#[derive(Debug, Clone)]
pub struct SqliteDialect {
    references_follow_renames: bool,
}

impl Default for SqliteDialect {
    fn default() -> Self {
        Self::new()
    }
}

impl SqliteDialect {
    /// Creates a new SQLite dialect (3.26+ rename semantics).
    #[must_use]
    pub const fn new() -> Self {
        Self {
            references_follow_renames: true,
        }
    }

    /// Creates a dialect for databases running with `legacy_alter_table=ON`,
    /// where renaming a table or column leaves foreign keys of other tables
    /// pointing at the old name.
    #[must_use]
    pub const fn legacy_alter_table() -> Self {
        Self {
            references_follow_renames: false,
        }
    }
}

impl MigrationDialect for SqliteDialect {
    fn name(&self) -> &'static str {
        "sqlite"
    }

    fn policy(&self) -> &'static [PolicyRule] {
        POLICY
    }

    fn default_schema(&self) -> &'static str {
        MAIN
    }

    fn supports_drop_column(&self) -> bool {
        true
    }

    fn supports_add_constraint(&self) -> bool {
        false
    }

    fn supports_rename_index(&self) -> bool {
        false
    }

    fn references_follow_renames(&self) -> bool {
        self.references_follow_renames
    }

    fn supports_cross_schema_references(&self) -> bool {
        false
    }

    fn qualify(&self, name: &QualifiedName) -> String {
        if name.schema.eq_ignore_ascii_case(MAIN) {
            self.quote_identifier(&name.name)
        } else {
            format!(
                "{}.{}",
                self.quote_identifier(&name.schema),
                self.quote_identifier(&name.name)
            )
        }
    }

    fn type_name(&self, ty: &TypeDefinition) -> String {
        ty.storage.sqlite_name().to_string()
    }

    fn reference_target(&self, fk: &ForeignKeyShape) -> String {
        self.quote_identifier(&fk.referenced.name)
    }

    fn create_index(&self, table: &QualifiedName, index: &IndexShape) -> String {
        format!(
            "CREATE {}INDEX {} ON {} ({})",
            if index.unique { "UNIQUE " } else { "" },
            self.qualify(&table.with_name(&index.name)),
            self.quote_identifier(&table.name),
            self.index_columns(index)
        )
    }

    fn rename_index(&self, _table: &QualifiedName, _from: &str, _to: &str) -> Option<String> {
        None
    }

    fn rename_constraint(&self, _table: &QualifiedName, _from: &str, _to: &str) -> Option<String> {
        None
    }

    fn create_schema(&self, _name: &str) -> Option<String> {
        None
    }

    fn drop_schema(&self, _name: &str) -> Option<String> {
        None
    }

    fn rename_schema(&self, _from: &str, _to: &str) -> Option<String> {
        None
    }
}
