#![allow(dead_code)]

use std::str::FromStr;
use std::sync::Once;

use oxide_ddl::prelude::*;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};

static TRACING: Once = Once::new();

/// Installs a test-friendly subscriber once per test binary.
pub fn init_tracing() {
    TRACING.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_max_level(tracing::Level::DEBUG)
            .with_test_writer()
            .try_init();
    });
}

/// Creates a table with a NOT NULL integer `id` primary key.
pub fn keyed_table(db: &mut DatabaseModel, schema: SchemaId, name: &str) -> (TableId, ColumnId, IndexId) {
    keyed_table_named(db, schema, name, None)
}

/// Like [`keyed_table`], naming the key index `{key}` and the primary key
/// `pk_{key}` instead of deriving both from the table name.
pub fn keyed_table_named(
    db: &mut DatabaseModel,
    schema: SchemaId,
    name: &str,
    key: Option<&str>,
) -> (TableId, ColumnId, IndexId) {
    let pk_name = key.map(|k| format!("pk_{k}"));
    let table = db
        .create_table(schema, name)
        .unwrap_or_else(|e| panic!("Failed to create table {name}: {e}"));
    let id = db.create_column(table, "id", SqlType::Integer).unwrap();
    db.column_mut(id).unwrap().mark_nullable(false).unwrap();
    let pk = db.create_index(table, &[(id, SortDirection::Ascending)], true, key).unwrap();
    db.create_primary_key(pk, pk_name.as_deref()).unwrap();
    (table, id, pk)
}

/// Adds an integer column to `table` referencing `target` (a unique index).
pub fn reference(db: &mut DatabaseModel, table: TableId, column: &str, target: IndexId) -> ForeignKeyId {
    let col = db.create_column(table, column, SqlType::Integer).unwrap();
    let ix = db.create_index(table, &[(col, SortDirection::Ascending)], false, None).unwrap();
    db.create_foreign_key(ix, target, None)
        .unwrap_or_else(|e| panic!("Failed to reference from {column}: {e}"))
}

/// Flushes and returns the produced statements, flattened.
pub fn flush_sql(db: &mut DatabaseModel) -> Vec<String> {
    db.flush()
        .unwrap_or_else(|e| panic!("Flush failed: {e}"))
        .iter()
        .flat_map(|g| g.statements.clone())
        .collect()
}

/// Flushes and returns `(kind, target)` for every produced group.
pub fn flush_groups(db: &mut DatabaseModel) -> Vec<(GroupKind, String)> {
    db.flush()
        .unwrap_or_else(|e| panic!("Flush failed: {e}"))
        .iter()
        .map(|g| (g.kind, g.target.clone()))
        .collect()
}

/// In-memory SQLite pool on one connection, foreign key enforcement off as
/// rebuild scripts expect.
pub async fn create_test_pool() -> SqlitePool {
    let options = SqliteConnectOptions::from_str("sqlite::memory:")
        .expect("Invalid SQLite URL")
        .foreign_keys(false);
    SqlitePoolOptions::new()
        .max_connections(1)
        .connect_with(options)
        .await
        .expect("Failed to create in-memory SQLite pool")
}
