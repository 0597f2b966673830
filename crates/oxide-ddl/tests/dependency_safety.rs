//! Random foreign key graphs built through the model, then partly removed
//! and rebuilt. Every emitted script is replayed on in-memory SQLite and
//! checked for dependency order: a table is created after the tables it
//! references (cycles aside) and dropped only once nothing else references
//! it.

mod common;

use std::collections::BTreeSet;

use common::{create_test_pool, keyed_table, reference};
use oxide_ddl::prelude::*;
use proptest::collection::vec;
use proptest::prelude::*;
use proptest::strategy::Strategy;
use sqlx::sqlite::SqlitePool;

#[derive(Debug, Clone)]
struct GraphCase {
    tables: usize,
    /// `(owner, referenced)` table positions.
    edges: Vec<(usize, usize)>,
    removed: Vec<bool>,
    rebuilt: Vec<bool>,
}

fn graph_case() -> impl Strategy<Value = GraphCase> {
    (2usize..7)
        .prop_flat_map(|n| {
            (
                Just(n),
                vec((0..n, 0..n), 0..12),
                vec(any::<bool>(), n),
                vec(any::<bool>(), n),
            )
        })
        .prop_map(|(tables, raw, removed, rebuilt)| GraphCase {
            tables,
            edges: raw.into_iter().filter(|(a, b)| a != b).collect(),
            removed,
            rebuilt,
        })
}

fn table_name(position: usize) -> String {
    format!("t{position}")
}

fn table_of(target: &str) -> &str {
    target.rsplit('.').next().unwrap_or(target)
}

/// `(table, referenced table)` for every foreign key present in the database.
async fn physical_references(pool: &SqlitePool) -> Vec<(String, String)> {
    sqlx::query_as(
        "SELECT m.name, p.\"table\" FROM sqlite_master AS m, pragma_foreign_key_list(m.name) AS p \
         WHERE m.type = 'table'",
    )
    .fetch_all(pool)
    .await
    .unwrap()
}

/// Executes the groups in order, checking each table drop against the
/// references still present.
async fn replay(pool: &SqlitePool, groups: &[StatementGroup]) {
    for group in groups {
        if group.kind == GroupKind::DropTable {
            let dropped = table_of(&group.target);
            for (owner, referenced) in physical_references(pool).await {
                assert!(
                    owner.eq_ignore_ascii_case(dropped) || !referenced.eq_ignore_ascii_case(dropped),
                    "{dropped} dropped while {owner} still references it"
                );
            }
        }
        for sql in &group.statements {
            sqlx::query(sql)
                .execute(pool)
                .await
                .unwrap_or_else(|e| panic!("Failed to execute {sql}: {e}"));
        }
    }
}

async fn check_case(case: GraphCase) {
    let pool = create_test_pool().await;
    let mut db = DatabaseModel::new(SqliteDialect::new());
    let main = db.default_schema();

    let mut tables = Vec::new();
    let mut keys = Vec::new();
    for position in 0..case.tables {
        let (table, _, pk) = keyed_table(&mut db, main, &table_name(position));
        tables.push(table);
        keys.push(pk);
    }
    let mut graph = DependencyGraph::new();
    let mut columns: Vec<Vec<String>> = vec![Vec::new(); case.tables];
    for (i, &(owner, referenced)) in case.edges.iter().enumerate() {
        let column = format!("ref_{i}");
        reference(&mut db, tables[owner], &column, keys[referenced]);
        graph.add_edge(owner, referenced, i);
        columns[owner].push(column);
    }

    let groups = db.flush().unwrap().to_vec();
    let mut created = BTreeSet::new();
    for group in groups.iter().filter(|g| g.kind == GroupKind::CreateTable) {
        let owner = (0..case.tables)
            .find(|&p| table_name(p) == table_of(&group.target))
            .unwrap();
        for &(from, to) in &case.edges {
            if from == owner {
                assert!(
                    created.contains(&to) || graph.reachable_from(to).contains(&owner),
                    "{} created before {}",
                    table_name(owner),
                    table_name(to)
                );
            }
        }
        created.insert(owner);
    }
    replay(&pool, &groups).await;

    for (position, refs) in columns.iter().enumerate() {
        let mut names = vec!["id".to_string()];
        names.extend(refs.iter().cloned());
        let values = vec!["1"; names.len()].join(", ");
        let sql = format!("INSERT INTO {} ({}) VALUES ({values})", table_name(position), names.join(", "));
        sqlx::query(&sql).execute(&pool).await.unwrap();
    }

    let mut survivors = BTreeSet::new();
    for position in 0..case.tables {
        if case.removed[position] {
            db.table_mut(tables[position]).unwrap().remove().unwrap();
        } else {
            survivors.insert(table_name(position));
        }
    }
    for position in 0..case.tables {
        if case.rebuilt[position] && !case.removed[position] {
            db.create_column(tables[position], "extra", SqlType::Text).unwrap();
        }
    }
    let groups = db.flush().unwrap().to_vec();
    replay(&pool, &groups).await;

    let remaining: Vec<(String,)> = sqlx::query_as("SELECT name FROM sqlite_master WHERE type = 'table'")
        .fetch_all(&pool)
        .await
        .unwrap();
    let remaining: BTreeSet<String> = remaining.into_iter().map(|(n,)| n).collect();
    assert_eq!(remaining, survivors);

    sqlx::query("PRAGMA foreign_keys = ON").execute(&pool).await.unwrap();
    let violations: Vec<(String, i64, String, i64)> = sqlx::query_as("PRAGMA foreign_key_check")
        .fetch_all(&pool)
        .await
        .unwrap();
    assert!(violations.is_empty(), "{violations:?}");
    for name in &survivors {
        let (count,): (i64,) = sqlx::query_as(&format!("SELECT COUNT(*) FROM {name}"))
            .fetch_one(&pool)
            .await
            .unwrap();
        assert_eq!(count, 1, "{name} lost rows");
    }
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    /// Creates follow references, drops follow dependents, and the final
    /// database holds exactly the surviving tables with intact references.
    #[test]
    fn prop_scripts_respect_foreign_key_dependencies(case in graph_case()) {
        tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .unwrap()
            .block_on(check_case(case));
    }
}
