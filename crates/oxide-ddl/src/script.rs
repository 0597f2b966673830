//! Generated statements, grouped by the operation that produced them.

use std::fmt;

use serde::Serialize;

use crate::error::Result;

/// Operation a statement group performs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum GroupKind {
    CreateSchema,
    RenameSchema,
    DetachConstraints,
    AlterTable,
    RenameObjects,
    StripForeignKeys,
    DropTable,
    RebuildTable,
    CreateTable,
    RenameTable,
    AttachIndexes,
    AttachConstraints,
    DropSchema,
}

impl fmt::Display for GroupKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::CreateSchema => "create schema",
            Self::RenameSchema => "rename schema",
            Self::DetachConstraints => "detach constraints",
            Self::AlterTable => "alter table",
            Self::RenameObjects => "rename objects",
            Self::StripForeignKeys => "strip foreign keys",
            Self::DropTable => "drop table",
            Self::RebuildTable => "rebuild table",
            Self::CreateTable => "create table",
            Self::RenameTable => "rename table",
            Self::AttachIndexes => "attach indexes",
            Self::AttachConstraints => "attach constraints",
            Self::DropSchema => "drop schema",
        };
        f.write_str(label)
    }
}

/// Statements that belong together, e.g. the steps of one table rebuild.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StatementGroup {
    pub kind: GroupKind,
    /// Object the group acts on, e.g. `main.users`.
    pub target: String,
    pub statements: Vec<String>,
}

impl StatementGroup {
    pub fn new(kind: GroupKind, target: impl Into<String>) -> Self {
        Self {
            kind,
            target: target.into(),
            statements: Vec::new(),
        }
    }

    #[must_use]
    pub fn with_statement(mut self, sql: impl Into<String>) -> Self {
        self.statements.push(sql.into());
        self
    }

    pub fn push(&mut self, sql: impl Into<String>) {
        self.statements.push(sql.into());
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.statements.is_empty()
    }
}

/// Every statement group flushed from a model, in execution order.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct StatementBuffer {
    groups: Vec<StatementGroup>,
}

impl StatementBuffer {
    #[must_use]
    pub fn groups(&self) -> &[StatementGroup] {
        &self.groups
    }

    /// All statements, flattened.
    pub fn statements(&self) -> impl Iterator<Item = &str> {
        self.groups
            .iter()
            .flat_map(|g| g.statements.iter().map(String::as_str))
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.groups.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.groups.is_empty()
    }

    /// Appends groups, skipping empty ones, and returns the index of the
    /// first appended group.
    pub(crate) fn append(&mut self, groups: Vec<StatementGroup>) -> usize {
        let start = self.groups.len();
        self.groups.extend(groups.into_iter().filter(|g| !g.is_empty()));
        start
    }

    /// Renders the buffer as a SQL script, one comment line per group.
    #[must_use]
    pub fn to_sql(&self) -> String {
        let mut out = String::new();
        for group in &self.groups {
            out.push_str(&format!("-- {}: {}\n", group.kind, group.target));
            for statement in &group.statements {
                out.push_str(statement);
                out.push_str(";\n");
            }
            out.push('\n');
        }
        out
    }

    /// Serializes the groups to pretty-printed JSON.
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(&self.groups)?)
    }
}
