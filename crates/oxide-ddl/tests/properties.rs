//! Property tests for rename resolution, scheduling and journal coalescing.

mod common;

use std::cmp::Reverse;
use std::collections::BTreeMap;

use oxide_ddl::prelude::*;
use proptest::collection::vec;
use proptest::prelude::*;
use proptest::strategy::Strategy;

fn permutation() -> impl Strategy<Value = Vec<usize>> {
    (1usize..9).prop_flat_map(|n| Just((0..n).collect::<Vec<_>>()).prop_shuffle())
}

fn key(index: usize) -> u32 {
    u32::try_from(index).unwrap()
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(256))]

    /// Applying the resolved steps one by one never renames onto a live
    /// name and ends with every object under its requested name.
    #[test]
    fn prop_renames_never_collide(perm in permutation()) {
        let names: Vec<String> = (0..perm.len()).map(|i| format!("n{i}")).collect();
        let requests = perm
            .iter()
            .enumerate()
            .map(|(k, &target)| RenameStep::new(key(k), names[k].as_str(), names[target].as_str()))
            .collect();
        let steps = resolve_renames(requests, |k| format!("__oxide_swap_column_{k}"));

        let mut holder: BTreeMap<String, u32> =
            names.iter().enumerate().map(|(k, n)| (n.clone(), key(k))).collect();
        for step in &steps {
            prop_assert_eq!(holder.remove(&step.from), Some(step.key));
            prop_assert!(!holder.contains_key(&step.to), "{} collides", step.to);
            holder.insert(step.to.clone(), step.key);
        }
        for (k, &target) in perm.iter().enumerate() {
            prop_assert_eq!(holder.get(&names[target]), Some(&key(k)));
        }
        let moved = perm.iter().enumerate().filter(|(k, t)| k != *t).count();
        prop_assert!(steps.len() <= moved + moved / 2);
    }

    /// Acyclic dependencies are always honoured.
    #[test]
    fn prop_topological_order_respects_dependencies(
        n in 1u32..16,
        raw in vec((0u32..16, 0u32..16), 0..40),
    ) {
        let jobs: Vec<u32> = (0..n).collect();
        let deps: Vec<(u32, u32)> = raw.into_iter().filter(|&(a, b)| a < b && b < n).collect();
        let order = safe_topological_order(&jobs, &deps, Reverse);
        prop_assert_eq!(order.len(), jobs.len());
        let position: BTreeMap<u32, usize> = order.iter().enumerate().map(|(i, &j)| (j, i)).collect();
        for (before, after) in deps {
            prop_assert!(position[&before] < position[&after]);
        }
    }

    /// Cyclic dependencies still schedule every job exactly once.
    #[test]
    fn prop_topological_order_is_total(
        n in 1u32..12,
        raw in vec((0u32..12, 0u32..12), 0..40),
    ) {
        let jobs: Vec<u32> = (0..n).collect();
        let order = safe_topological_order(&jobs, &raw, |j| j);
        let mut sorted = order.clone();
        sorted.sort_unstable();
        prop_assert_eq!(sorted, jobs);
    }

    /// A table renamed through any sequence of names and back leaves no
    /// pending change.
    #[test]
    fn prop_reverted_renames_leave_no_trace(names in vec("[a-z]{1,6}", 1..6)) {
        let mut db = DatabaseModel::new(SqliteDialect::new());
        let main = db.default_schema();
        let (t, _, _) = common::keyed_table(&mut db, main, "t");
        db.flush().unwrap();

        for name in &names {
            db.table_mut(t).unwrap().set_name(name.as_str()).unwrap();
        }
        db.table_mut(t).unwrap().set_name("t").unwrap();
        prop_assert!(!db.has_pending_changes());
        prop_assert!(db.flush().unwrap().is_empty());
    }

    /// Flushing is idempotent: a second flush right after the first emits
    /// nothing, whatever columns were added.
    #[test]
    fn prop_second_flush_is_empty(columns in vec(("[a-z]{1,5}", any::<bool>()), 0..6)) {
        let mut db = DatabaseModel::new(SqliteDialect::new());
        let main = db.default_schema();
        let (t, _, _) = common::keyed_table(&mut db, main, "t");
        db.flush().unwrap();

        for (name, strict) in &columns {
            if let Ok(c) = db.create_column(t, format!("c_{name}"), SqlType::Text) {
                db.column_mut(c).unwrap().mark_nullable(!strict).unwrap();
            }
        }
        let first = db.flush().unwrap().len();
        prop_assert_eq!(first, usize::from(!columns.is_empty()));
        prop_assert!(db.flush().unwrap().is_empty());
    }
}
