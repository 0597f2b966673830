//! Statement synthesis from before/after table shapes.
//!
//! A rebuild recreates a table under a temporary name, copies every row with
//! a per-column value mapping, drops the original and swaps the new table in.
//! In-place changes are computed as a diff between the two shapes.

use std::collections::BTreeSet;

use crate::cycles::RenameStep;
use crate::dialect::MigrationDialect;
use crate::model::{ColumnId, ColumnShape, ForeignKeyShape, IndexShape, PrimaryKeyShape, QualifiedName, TableShape};

/// Expression producing the value of `after` from a row of the old table.
///
/// `before` is the column's previous shape, `None` for a new column.
pub fn source_expression(dialect: &dyn MigrationDialect, before: Option<&ColumnShape>, after: &ColumnShape) -> String {
    let fallback = || {
        after
            .default
            .as_ref()
            .map_or_else(|| dialect.zero_value(&after.ty), |d| dialect.default_literal(d, &after.ty))
    };
    let Some(before) = before else {
        return match (&after.default, after.nullable) {
            (Some(default), _) => dialect.default_literal(default, &after.ty),
            (None, false) => dialect.zero_value(&after.ty),
            (None, true) => "NULL".to_string(),
        };
    };
    let mut expr = dialect.quote_identifier(&before.name);
    if before.ty != after.ty {
        expr = dialect.cast(&expr, &after.ty);
    }
    if before.nullable && !after.nullable {
        expr = format!("COALESCE({expr}, {})", fallback());
    }
    expr
}

/// Target column names and source expressions for the copy step.
pub fn copy_mapping(dialect: &dyn MigrationDialect, before: &TableShape, after: &TableShape) -> (Vec<String>, Vec<String>) {
    after
        .columns
        .iter()
        .map(|c| (c.name.clone(), source_expression(dialect, before.column(c.id), c)))
        .unzip()
}

/// Columns of `before` that disappear or change type, nullability or default.
#[must_use]
pub fn changing_columns(before: &TableShape, after: &TableShape) -> BTreeSet<ColumnId> {
    before
        .columns
        .iter()
        .filter(|b| {
            after
                .column(b.id)
                .is_none_or(|a| a.ty != b.ty || a.nullable != b.nullable || a.default != b.default)
        })
        .map(|b| b.id)
        .collect()
}

/// Statements rebuilding `before` into `after`.
///
/// The new table is created as `build_name`. With `rename_inline` it is
/// renamed to the original name right after the old table is dropped;
/// otherwise the caller schedules that rename. Indexes are not recreated here.
pub fn rebuild_table(
    dialect: &dyn MigrationDialect,
    before: &TableShape,
    after: &TableShape,
    build_name: &QualifiedName,
    rename_inline: bool,
) -> Vec<String> {
    let changing = changing_columns(before, after);
    let mut sql: Vec<String> = before
        .indexes
        .iter()
        .filter(|i| i.column_ids.iter().any(|c| changing.contains(c)))
        .map(|i| dialect.drop_index(&before.name, &i.name))
        .collect();
    sql.push(dialect.create_table(after, build_name, !dialect.supports_add_constraint()));
    let (columns, expressions) = copy_mapping(dialect, before, after);
    if !columns.is_empty() {
        sql.push(dialect.copy_rows(build_name, &columns, &expressions, &before.name));
    }
    sql.push(dialect.drop_table(&before.name));
    if rename_inline {
        sql.push(dialect.rename_table(build_name, &before.name.name));
    }
    sql
}

/// Statements adding a column in place. A NOT NULL column without default
/// is added nullable, backfilled, then constrained.
pub fn add_column(dialect: &dyn MigrationDialect, table: &QualifiedName, column: &ColumnShape) -> Vec<String> {
    if column.nullable || column.default.is_some() {
        return vec![dialect.add_column(table, column)];
    }
    let loose = ColumnShape {
        nullable: true,
        ..column.clone()
    };
    let mut sql = vec![dialect.add_column(table, &loose)];
    sql.extend(dialect.alter_column(table, &loose, column));
    sql
}

/// Column-level difference of a table altered in place.
#[derive(Debug, Default)]
pub struct ColumnDiff<'a> {
    pub dropped: Vec<&'a ColumnShape>,
    pub renamed: Vec<RenameStep<ColumnId>>,
    pub added: Vec<&'a ColumnShape>,
    /// `(before, after)` pairs whose type, nullability or default changed.
    pub altered: Vec<(&'a ColumnShape, &'a ColumnShape)>,
}

#[must_use]
pub fn diff_columns<'a>(before: &'a TableShape, after: &'a TableShape) -> ColumnDiff<'a> {
    let mut diff = ColumnDiff::default();
    for b in &before.columns {
        match after.column(b.id) {
            None => diff.dropped.push(b),
            Some(a) => {
                if a.name != b.name {
                    diff.renamed.push(RenameStep::new(b.id, b.name.clone(), a.name.clone()));
                }
                if a.ty != b.ty || a.nullable != b.nullable || a.default != b.default {
                    diff.altered.push((b, a));
                }
            }
        }
    }
    diff.added = after
        .columns
        .iter()
        .filter(|a| before.column(a.id).is_none())
        .collect();
    diff
}

/// Index-level difference of a table altered in place.
#[derive(Debug, Default)]
pub struct IndexDiff<'a> {
    pub dropped: Vec<&'a IndexShape>,
    pub created: Vec<&'a IndexShape>,
    /// `(before, after)` pairs renamed in place.
    pub renamed: Vec<(&'a IndexShape, &'a IndexShape)>,
}

/// Diffs secondary indexes. Renames become drop plus create when the
/// dialect cannot rename indexes.
#[must_use]
pub fn diff_indexes<'a>(dialect: &dyn MigrationDialect, before: &'a TableShape, after: &'a TableShape) -> IndexDiff<'a> {
    let mut diff = IndexDiff::default();
    for b in &before.indexes {
        match after.index(b.id) {
            None => diff.dropped.push(b),
            Some(a) if a.name != b.name => {
                if dialect.supports_rename_index() {
                    diff.renamed.push((b, a));
                } else {
                    diff.dropped.push(b);
                    diff.created.push(a);
                }
            }
            Some(_) => {}
        }
    }
    diff.created
        .extend(after.indexes.iter().filter(|a| before.index(a.id).is_none()));
    diff
}

/// Constraint-level difference of a table altered in place.
#[derive(Debug, Default)]
pub struct ConstraintDiff<'a> {
    pub primary_key_dropped: Option<&'a PrimaryKeyShape>,
    pub primary_key_added: Option<&'a PrimaryKeyShape>,
    pub primary_key_renamed: Option<(&'a PrimaryKeyShape, &'a PrimaryKeyShape)>,
    pub foreign_keys_dropped: Vec<&'a ForeignKeyShape>,
    pub foreign_keys_added: Vec<&'a ForeignKeyShape>,
    pub foreign_keys_renamed: Vec<(&'a ForeignKeyShape, &'a ForeignKeyShape)>,
}

fn can_rename_constraint(dialect: &dyn MigrationDialect, table: &QualifiedName, from: &str, to: &str) -> bool {
    dialect.rename_constraint(table, from, to).is_some()
}

#[must_use]
pub fn diff_constraints<'a>(
    dialect: &dyn MigrationDialect,
    before: &'a TableShape,
    after: &'a TableShape,
) -> ConstraintDiff<'a> {
    let mut diff = ConstraintDiff::default();
    match (&before.primary_key, &after.primary_key) {
        (Some(b), Some(a)) if b.id == a.id => {
            if b.name != a.name {
                if can_rename_constraint(dialect, &before.name, &b.name, &a.name) {
                    diff.primary_key_renamed = Some((b, a));
                } else {
                    diff.primary_key_dropped = Some(b);
                    diff.primary_key_added = Some(a);
                }
            }
        }
        (b, a) => {
            diff.primary_key_dropped = b.as_ref();
            diff.primary_key_added = a.as_ref();
        }
    }

    for b in &before.foreign_keys {
        let Some(a) = after.foreign_key(b.id) else {
            diff.foreign_keys_dropped.push(b);
            continue;
        };
        let retarget = !dialect.references_follow_renames() && b.reference_target() != a.reference_target();
        if b.on_delete != a.on_delete || b.on_update != a.on_update || retarget {
            diff.foreign_keys_dropped.push(b);
            diff.foreign_keys_added.push(a);
        } else if b.name != a.name {
            if can_rename_constraint(dialect, &before.name, &b.name, &a.name) {
                diff.foreign_keys_renamed.push((b, a));
            } else {
                diff.foreign_keys_dropped.push(b);
                diff.foreign_keys_added.push(a);
            }
        }
    }
    diff.foreign_keys_added
        .extend(after.foreign_keys.iter().filter(|a| before.foreign_key(a.id).is_none()));
    diff
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dialect::{PostgresDialect, SqliteDialect};
    use crate::model::{IndexId, TableId};
    use crate::types::{DefaultValue, SortDirection, SqlType};

    fn column(id: u32, name: &str, ty: SqlType, nullable: bool, default: Option<DefaultValue>) -> ColumnShape {
        ColumnShape {
            id: ColumnId(id),
            name: name.to_string(),
            ty: ty.into(),
            nullable,
            default,
        }
    }

    fn table(name: &str, columns: Vec<ColumnShape>) -> TableShape {
        TableShape {
            id: TableId(0),
            name: QualifiedName::new("main", name),
            columns,
            primary_key: None,
            indexes: vec![],
            foreign_keys: vec![],
        }
    }

    #[test]
    fn test_source_expressions() {
        let d = SqliteDialect::new();
        let old = column(0, "c", SqlType::Text, true, None);

        let same = column(0, "c", SqlType::Text, true, None);
        assert_eq!(source_expression(&d, Some(&old), &same), "\"c\"");

        let cast = column(0, "c", SqlType::Integer, true, None);
        assert_eq!(source_expression(&d, Some(&old), &cast), "CAST(\"c\" AS INTEGER)");

        let strict = column(0, "c", SqlType::Text, false, Some(DefaultValue::String("x".into())));
        assert_eq!(source_expression(&d, Some(&old), &strict), "COALESCE(\"c\", 'x')");

        let strict_cast = column(0, "c", SqlType::Integer, false, None);
        assert_eq!(
            source_expression(&d, Some(&old), &strict_cast),
            "COALESCE(CAST(\"c\" AS INTEGER), 0)"
        );

        let new_default = column(1, "n", SqlType::Integer, true, Some(DefaultValue::Integer(7)));
        assert_eq!(source_expression(&d, None, &new_default), "7");
        let new_strict = column(1, "n", SqlType::Text, false, None);
        assert_eq!(source_expression(&d, None, &new_strict), "''");
        let new_loose = column(1, "n", SqlType::Text, true, None);
        assert_eq!(source_expression(&d, None, &new_loose), "NULL");
    }

    #[test]
    fn test_rebuild_drops_indexes_on_changing_columns() {
        let d = SqliteDialect::new();
        let mut before = table(
            "t",
            vec![
                column(0, "a", SqlType::Integer, false, None),
                column(1, "b", SqlType::Text, true, None),
            ],
        );
        before.indexes = vec![
            IndexShape {
                id: IndexId(0),
                name: "ix_t_a".into(),
                columns: vec![("a".into(), SortDirection::Ascending)],
                column_ids: vec![ColumnId(0)],
                unique: false,
            },
            IndexShape {
                id: IndexId(1),
                name: "ix_t_b".into(),
                columns: vec![("b".into(), SortDirection::Ascending)],
                column_ids: vec![ColumnId(1)],
                unique: false,
            },
        ];
        let mut after = before.clone();
        after.columns[1].nullable = false;

        let tmp = QualifiedName::new("main", "__oxide_tmp_table_0");
        let sql = rebuild_table(&d, &before, &after, &tmp, true);
        assert_eq!(
            sql,
            vec![
                "DROP INDEX \"ix_t_b\"".to_string(),
                "CREATE TABLE \"__oxide_tmp_table_0\" (\n  \"a\" INTEGER NOT NULL,\n  \"b\" TEXT NOT NULL\n)".to_string(),
                "INSERT INTO \"__oxide_tmp_table_0\" (\"a\", \"b\") SELECT \"a\", COALESCE(\"b\", '') FROM \"t\"".to_string(),
                "DROP TABLE \"t\"".to_string(),
                "ALTER TABLE \"__oxide_tmp_table_0\" RENAME TO \"t\"".to_string(),
            ]
        );
    }

    #[test]
    fn test_add_strict_column_in_place() {
        let d = PostgresDialect::new();
        let t = QualifiedName::new("public", "t");
        let sql = add_column(&d, &t, &column(3, "n", SqlType::Integer, false, None));
        assert_eq!(
            sql,
            vec![
                "ALTER TABLE \"public\".\"t\" ADD COLUMN \"n\" INTEGER",
                "UPDATE \"public\".\"t\" SET \"n\" = 0 WHERE \"n\" IS NULL",
                "ALTER TABLE \"public\".\"t\" ALTER COLUMN \"n\" SET NOT NULL",
            ]
        );
    }

    #[test]
    fn test_diff_columns() {
        let before = table(
            "t",
            vec![
                column(0, "a", SqlType::Integer, false, None),
                column(1, "b", SqlType::Text, true, None),
                column(2, "c", SqlType::Text, true, None),
            ],
        );
        let after = table(
            "t",
            vec![
                column(0, "a", SqlType::Integer, false, None),
                column(1, "bb", SqlType::Text, false, None),
                column(3, "d", SqlType::Real, true, None),
            ],
        );
        let diff = diff_columns(&before, &after);
        assert_eq!(diff.dropped.iter().map(|c| c.name.as_str()).collect::<Vec<_>>(), vec!["c"]);
        assert_eq!(diff.renamed, vec![RenameStep::new(ColumnId(1), "b", "bb")]);
        assert_eq!(diff.added.iter().map(|c| c.name.as_str()).collect::<Vec<_>>(), vec!["d"]);
        assert_eq!(diff.altered.len(), 1);
    }
}
