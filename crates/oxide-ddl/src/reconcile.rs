//! Flush: turns the journal into an ordered, executable statement script.
//!
//! Dirty tables are classified first, then validated as a whole; nothing is
//! emitted unless every check passes. Statements are produced in phases:
//!
//! 1. schema renames and creates
//! 2. foreign keys, primary keys and indexes detached from altered tables
//! 3. in-place column changes, then index and constraint renames (renames
//!    into a name released by a dropped table wait until after phase 4)
//! 4. table jobs (strip, drop, create, rebuild) in dependency order
//! 5. table renames, including temporary names swapped into place
//! 6. indexes, primary keys and foreign keys attached
//! 7. schema drops

use std::collections::{BTreeMap, BTreeSet};

use serde::Serialize;
use tracing::{debug, info};

use crate::assembler::{self, ColumnDiff, ConstraintDiff, IndexDiff};
use crate::cycles::{resolve_renames, RenameStep};
use crate::dialect::{MigrationDialect, Strategy};
use crate::error::{DdlError, ErrorEntry, ErrorKind, Result};
use crate::graph::{safe_topological_order, DependencyGraph};
use crate::journal::{ChangeRecord, MutationKind};
use crate::model::{
    slot, ColumnId, DatabaseModel, ForeignKeyId, Mode, ObjectKind, ObjectRef, QualifiedName, SchemaId, Side,
    TableId, TableShape,
};
use crate::script::{GroupKind, StatementBuffer, StatementGroup};

/// How a dirty table reaches its new shape.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub enum TableAction {
    /// New since the last flush.
    Create,
    /// Removed since the last flush.
    Drop,
    /// Recreated under a temporary name and swapped in.
    Rebuild,
    /// Altered with individual statements.
    InPlace,
}

/// Unit of phase 4 scheduling.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
enum Job {
    /// Remove foreign keys that close a drop cycle.
    Strip(TableId),
    Drop(TableId),
    /// Create or rebuild.
    Build(TableId),
}

impl Job {
    /// Strips first, drops dependents-first by descending handle, builds in
    /// creation order.
    fn priority(self) -> (u8, i64) {
        match self {
            Self::Strip(t) => (0, i64::from(t.0)),
            Self::Drop(t) => (1, -i64::from(t.0)),
            Self::Build(t) => (2, i64::from(t.0)),
        }
    }
}

fn target(name: &QualifiedName) -> String {
    format!("{}.{}", name.schema, name.name)
}

fn same_name(a: &QualifiedName, b: &QualifiedName) -> bool {
    a.schema == b.schema && a.name.eq_ignore_ascii_case(&b.name)
}

fn mutation_label(kind: MutationKind) -> &'static str {
    match kind {
        MutationKind::Create => "creation",
        MutationKind::Remove => "removal",
        MutationKind::Rename => "rename",
        MutationKind::Retype => "type change",
        MutationKind::Nullability => "nullability change",
        MutationKind::Default => "default change",
        MutationKind::ReferenceBehavior => "reference behavior change",
    }
}

/// Splits renames into those that can run before phase 4 and those whose
/// target is only released by a dropped table, plus every rename chained
/// onto one of those.
fn split_after_drops<K>(
    requests: Vec<RenameStep<K>>,
    freed: Option<&BTreeSet<String>>,
) -> (Vec<RenameStep<K>>, Vec<RenameStep<K>>) {
    let Some(freed) = freed else {
        return (requests, Vec::new());
    };
    let mut held = freed.clone();
    let mut now = requests;
    let mut later = Vec::new();
    loop {
        let (wait, ready): (Vec<_>, Vec<_>) = now
            .into_iter()
            .partition(|r| held.contains(&r.to.to_ascii_lowercase()));
        now = ready;
        if wait.is_empty() {
            break;
        }
        held.extend(wait.iter().map(|r| r.from.to_ascii_lowercase()));
        later.extend(wait);
    }
    (now, later)
}

fn strategy(dialect: &dyn MigrationDialect, record: &ChangeRecord) -> Strategy {
    let kind = record.object.kind();
    if kind == ObjectKind::Column && record.kind == MutationKind::Remove && !dialect.supports_drop_column() {
        return Strategy::Reconstruct;
    }
    dialect.classify(kind, record.kind)
}

/// Diffs of one table altered in place.
struct InPlaceTable<'s> {
    before: &'s TableShape,
    after: &'s TableShape,
    columns: ColumnDiff<'s>,
    indexes: IndexDiff<'s>,
    constraints: ConstraintDiff<'s>,
}

struct Reconciler<'a> {
    db: &'a DatabaseModel,
    dialect: &'a dyn MigrationDialect,
    records: Vec<ChangeRecord>,
    /// Dirty tables ordered by their first record.
    order: Vec<TableId>,
    actions: BTreeMap<TableId, TableAction>,
    before: BTreeMap<TableId, TableShape>,
    after: BTreeMap<TableId, TableShape>,
    /// Removed schemas renamed out of the way of a schema taking their name.
    parked: BTreeMap<SchemaId, String>,
    errors: Vec<ErrorEntry>,
}

impl<'a> Reconciler<'a> {
    fn new(db: &'a DatabaseModel) -> Self {
        Self {
            db,
            dialect: db.dialect(),
            records: db.journal.records(),
            order: db.journal.pending_tables(|o| db.owning_table(o)),
            actions: BTreeMap::new(),
            before: BTreeMap::new(),
            after: BTreeMap::new(),
            parked: BTreeMap::new(),
            errors: Vec::new(),
        }
    }

    fn action(&self, table: TableId) -> Option<TableAction> {
        self.actions.get(&table).copied()
    }

    fn unsupported(&self, record: &ChangeRecord) -> ErrorEntry {
        ErrorEntry::new(
            ErrorKind::UnsupportedMutation,
            self.db.display_name(record.object),
            format!(
                "{} {} cannot be expressed in the {} dialect",
                record.object.kind().label(),
                mutation_label(record.kind),
                self.dialect.name()
            ),
        )
    }

    fn classify(&mut self) {
        for table in self.order.clone() {
            let action = match (
                self.db.table_exists_on(table, Side::Before),
                self.db.table_exists_on(table, Side::After),
            ) {
                (false, false) => continue,
                (false, true) => TableAction::Create,
                (true, false) => TableAction::Drop,
                (true, true) => self.classify_survivor(table),
            };
            debug!(table = %self.db.display_name(table.into()), ?action, "Classified table");
            self.actions.insert(table, action);
        }

        let mut errors = Vec::new();
        for record in &self.records {
            let ObjectRef::Schema(id) = record.object else { continue };
            let live = self.db.schema(id).is_some_and(|s| !s.is_removed() && s.is_persisted());
            if record.kind == MutationKind::Rename
                && live
                && self.dialect.classify(ObjectKind::Schema, MutationKind::Rename) == Strategy::Unsupported
            {
                errors.push(self.unsupported(record));
            }
        }
        self.errors.extend(errors);
    }

    fn classify_survivor(&mut self, table: TableId) -> TableAction {
        let mut action = TableAction::InPlace;
        let mut errors = Vec::new();
        for record in self
            .records
            .iter()
            .filter(|r| self.db.owning_table(r.object) == Some(table))
        {
            match strategy(self.dialect, record) {
                Strategy::InPlace => {}
                Strategy::Reconstruct => action = TableAction::Rebuild,
                Strategy::Unsupported => errors.push(self.unsupported(record)),
            }
        }
        self.errors.extend(errors);
        action
    }

    /// Rebuilds surviving tables whose foreign key text would go stale.
    ///
    /// A rename rewrites references only when the dialect follows renames
    /// and the referenced table is renamed in place. A rebuilt table reaches
    /// its new names through a fresh `CREATE`, which no reference follows.
    fn propagate(&mut self) {
        loop {
            let promoted: Vec<TableId> = (0..self.db.tables.len())
                .map(|i| TableId(slot(i)))
                .filter(|&t| matches!(self.action(t), None | Some(TableAction::InPlace)))
                .filter(|&t| self.reference_text_goes_stale(t))
                .collect();
            if promoted.is_empty() {
                break;
            }
            for table in promoted {
                info!(table = %self.db.display_name(table.into()), "Rebuilding table to refresh foreign key references");
                if !self.actions.contains_key(&table) {
                    self.order.push(table);
                }
                self.actions.insert(table, TableAction::Rebuild);
            }
        }
    }

    fn reference_text_goes_stale(&self, table: TableId) -> bool {
        let (Some(before), Some(after)) = (
            self.db.table_shape(table, Side::Before),
            self.db.table_shape(table, Side::After),
        ) else {
            return false;
        };
        let follows = self.dialect.references_follow_renames();
        before.foreign_keys.iter().any(|b| {
            after.foreign_key(b.id).is_some_and(|a| {
                a.reference_target() != b.reference_target()
                    && (!follows || self.action(a.referenced_table) == Some(TableAction::Rebuild))
            })
        })
    }

    /// Parks every removed schema whose name a live schema takes over in
    /// this flush, so the new owner can be created before the old tables are
    /// dropped.
    fn park_schemas(&mut self) {
        if self.dialect.classify(ObjectKind::Schema, MutationKind::Rename) == Strategy::Unsupported {
            return;
        }
        for (i, schema) in self.db.schemas.iter().enumerate() {
            if !schema.removed || !schema.persisted {
                continue;
            }
            let id = SchemaId(slot(i));
            let original = self.db.original_name(id.into(), &schema.name);
            let taken = self
                .db
                .schemas
                .iter()
                .any(|other| !other.removed && other.name.eq_ignore_ascii_case(&original));
            if taken {
                let parked = self.dialect.temporary_name(ObjectKind::Schema, id.0);
                debug!(schema = %original, parked = %parked, "Parking removed schema");
                self.parked.insert(id, parked);
            }
        }
    }

    /// Addresses a before shape through the parked name of its schema.
    fn park_shape(&self, shape: &mut TableShape) {
        if self.parked.is_empty() {
            return;
        }
        let parked_name = |table: TableId| {
            let schema = self.db.table(table)?.schema;
            self.parked.get(&schema).cloned()
        };
        if let Some(name) = parked_name(shape.id) {
            shape.name.schema = name;
        }
        for fk in &mut shape.foreign_keys {
            if let Some(name) = parked_name(fk.referenced_table) {
                fk.referenced.schema = name;
            }
        }
    }

    fn load_shapes(&mut self) {
        for &table in self.actions.keys() {
            if let Some(mut shape) = self.db.table_shape(table, Side::Before) {
                self.park_shape(&mut shape);
                self.before.insert(table, shape);
            }
            if let Some(shape) = self.db.table_shape(table, Side::After) {
                self.after.insert(table, shape);
            }
        }
    }

    fn validate(&mut self) {
        if self.db.mode() != Mode::DryRun {
            for &table in &self.order {
                let built = matches!(self.action(table), Some(TableAction::Create | TableAction::Rebuild));
                if built && self.after.get(&table).is_some_and(|s| s.primary_key.is_none()) {
                    self.errors.push(ErrorEntry::new(
                        ErrorKind::MissingPrimaryKey,
                        self.db.display_name(table.into()),
                        "table has no primary key",
                    ));
                }
            }
        }

        let retyped: BTreeSet<ColumnId> = self
            .records
            .iter()
            .filter(|r| r.kind == MutationKind::Retype)
            .filter_map(|r| match r.object {
                ObjectRef::Column(c) => Some(c),
                _ => None,
            })
            .collect();
        for (i, fk) in self.db.foreign_keys.iter().enumerate() {
            if fk.removed {
                continue;
            }
            let id = ForeignKeyId(slot(i));
            let owning = &self.db.indexes[fk.owning.index()];
            let referenced = &self.db.indexes[fk.referenced.index()];
            let rendered = !fk.persisted
                || matches!(
                    self.action(owning.table),
                    Some(TableAction::Create | TableAction::Rebuild)
                );
            let touched = owning
                .columns
                .iter()
                .chain(&referenced.columns)
                .any(|c| retyped.contains(&c.column));
            if !rendered && !touched {
                continue;
            }
            let compatible = owning.columns.len() == referenced.columns.len()
                && owning.columns.iter().zip(&referenced.columns).all(|(a, b)| {
                    self.db.columns[a.column.index()]
                        .ty
                        .is_compatible_with(&self.db.columns[b.column.index()].ty)
                });
            if !compatible {
                self.errors.push(ErrorEntry::new(
                    ErrorKind::ColumnShapeMismatch,
                    self.db.display_name(id.into()),
                    "referencing and referenced columns have incompatible storage",
                ));
            }
        }
    }

    fn in_place_tables(&self) -> Vec<InPlaceTable<'_>> {
        self.order
            .iter()
            .filter(|&&t| self.action(t) == Some(TableAction::InPlace))
            .filter_map(|t| {
                let before = self.before.get(t)?;
                let after = self.after.get(t)?;
                Some(InPlaceTable {
                    before,
                    after,
                    columns: assembler::diff_columns(before, after),
                    indexes: assembler::diff_indexes(self.dialect, before, after),
                    constraints: assembler::diff_constraints(self.dialect, before, after),
                })
            })
            .collect()
    }

    fn plan(mut self) -> Result<Vec<StatementGroup>> {
        self.classify();
        self.propagate();
        self.park_schemas();
        self.load_shapes();
        self.validate();
        if !self.errors.is_empty() {
            return Err(DdlError::Validation {
                dialect: self.dialect.name(),
                errors: self.errors,
            });
        }
        if self.db.mode() == Mode::NoChanges {
            return Ok(Vec::new());
        }

        let mut groups = Vec::new();
        self.schema_setup(&mut groups);
        let in_place = self.in_place_tables();
        self.detach(&in_place, &mut groups);
        let after_drops = self.alter(&in_place, &mut groups);
        let deferred = self.table_jobs(&mut groups);
        groups.extend(after_drops);
        self.rename_tables(deferred, &mut groups);
        self.attach(&in_place, &mut groups);
        self.schema_teardown(&mut groups);
        Ok(groups)
    }

    fn schema_records(&self, kind: MutationKind) -> impl Iterator<Item = SchemaId> + '_ {
        self.records
            .iter()
            .filter(move |r| r.kind == kind)
            .filter_map(|r| match r.object {
                ObjectRef::Schema(id) => Some(id),
                _ => None,
            })
    }

    fn schema_setup(&self, groups: &mut Vec<StatementGroup>) {
        let mut renames: Vec<RenameStep<SchemaId>> = self
            .schema_records(MutationKind::Rename)
            .filter_map(|id| {
                let schema = self.db.schema(id).filter(|s| !s.is_removed())?;
                Some(RenameStep::new(
                    id,
                    self.db.original_name(id.into(), schema.name()),
                    schema.name(),
                ))
            })
            .collect();
        for (&id, parked) in &self.parked {
            let Some(schema) = self.db.schema(id) else { continue };
            renames.push(RenameStep::new(
                id,
                self.db.original_name(id.into(), schema.name()),
                parked.as_str(),
            ));
        }
        for step in resolve_renames(renames, |id| self.dialect.swap_name(ObjectKind::Schema, id.0)) {
            if let Some(sql) = self.dialect.rename_schema(&step.from, &step.to) {
                groups.push(StatementGroup::new(GroupKind::RenameSchema, step.to.clone()).with_statement(sql));
            }
        }

        for id in self.schema_records(MutationKind::Create) {
            let Some(schema) = self.db.schema(id) else { continue };
            if let Some(sql) = self.dialect.create_schema(schema.name()) {
                groups.push(StatementGroup::new(GroupKind::CreateSchema, schema.name()).with_statement(sql));
            }
        }
    }

    fn detach(&self, tables: &[InPlaceTable<'_>], groups: &mut Vec<StatementGroup>) {
        for t in tables {
            let name = &t.before.name;
            let mut group = StatementGroup::new(GroupKind::DetachConstraints, target(name));
            for fk in &t.constraints.foreign_keys_dropped {
                group.push(self.dialect.drop_foreign_key(name, &fk.name));
            }
            groups.push(group);
        }
        for t in tables {
            let name = &t.before.name;
            let mut group = StatementGroup::new(GroupKind::DetachConstraints, target(name));
            if let Some(pk) = t.constraints.primary_key_dropped {
                group.push(self.dialect.drop_primary_key(name, &pk.name));
            }
            for index in &t.indexes.dropped {
                group.push(self.dialect.drop_index(name, &index.name));
            }
            groups.push(group);
        }
    }

    /// Emits phase 3 and returns the secondary renames that must wait for
    /// phase 4 drops to release their target names.
    fn alter(&self, tables: &[InPlaceTable<'_>], groups: &mut Vec<StatementGroup>) -> Vec<StatementGroup> {
        for t in tables {
            let name = &t.before.name;
            let mut group = StatementGroup::new(GroupKind::AlterTable, target(name));
            for column in &t.columns.dropped {
                group.push(self.dialect.drop_column(name, &column.name));
            }
            let renames = resolve_renames(t.columns.renamed.clone(), |id| {
                self.dialect.swap_name(ObjectKind::Column, id.0)
            });
            for step in renames {
                group.push(self.dialect.rename_column(name, &step.from, &step.to));
            }
            for column in &t.columns.added {
                for sql in assembler::add_column(self.dialect, name, column) {
                    group.push(sql);
                }
            }
            for (before, after) in &t.columns.altered {
                for sql in self.dialect.alter_column(name, before, after) {
                    group.push(sql);
                }
            }
            groups.push(group);
        }

        // Index and constraint names share one namespace per schema.
        let mut namespaces: BTreeMap<&str, Vec<RenameStep<ObjectRef>>> = BTreeMap::new();
        let mut owners: BTreeMap<ObjectRef, &QualifiedName> = BTreeMap::new();
        for t in tables {
            let mut requests = Vec::new();
            for (b, a) in &t.indexes.renamed {
                requests.push(RenameStep::new(ObjectRef::Index(b.id), b.name.as_str(), a.name.as_str()));
            }
            if let Some((b, a)) = t.constraints.primary_key_renamed {
                requests.push(RenameStep::new(ObjectRef::PrimaryKey(b.id), b.name.as_str(), a.name.as_str()));
            }
            for (b, a) in &t.constraints.foreign_keys_renamed {
                requests.push(RenameStep::new(ObjectRef::ForeignKey(b.id), b.name.as_str(), a.name.as_str()));
            }
            for request in requests {
                owners.insert(request.key, &t.before.name);
                namespaces.entry(t.before.name.schema.as_str()).or_default().push(request);
            }
        }
        let freed = self.names_freed_by_drops();
        let mut after_drops = Vec::new();
        for (schema, requests) in namespaces {
            let (now, later) = split_after_drops(requests, freed.get(schema));
            groups.push(self.secondary_renames(schema, now, &owners));
            after_drops.push(self.secondary_renames(schema, later, &owners));
        }
        after_drops
    }

    fn secondary_renames(
        &self,
        schema: &str,
        requests: Vec<RenameStep<ObjectRef>>,
        owners: &BTreeMap<ObjectRef, &QualifiedName>,
    ) -> StatementGroup {
        let mut group = StatementGroup::new(GroupKind::RenameObjects, schema);
        for step in resolve_renames(requests, |key| self.dialect.swap_name(key.kind(), key.raw())) {
            let Some(table) = owners.get(&step.key) else { continue };
            let sql = match step.key {
                ObjectRef::Index(_) => self.dialect.rename_index(table, &step.from, &step.to),
                _ => self.dialect.rename_constraint(table, &step.from, &step.to),
            };
            if let Some(sql) = sql {
                group.push(sql);
            }
        }
        group
    }

    /// Index and constraint names, folded, held by tables dropped in phase 4.
    fn names_freed_by_drops(&self) -> BTreeMap<&str, BTreeSet<String>> {
        let mut freed: BTreeMap<&str, BTreeSet<String>> = BTreeMap::new();
        for (&table, shape) in &self.before {
            if self.action(table) != Some(TableAction::Drop) {
                continue;
            }
            let names = freed.entry(shape.name.schema.as_str()).or_default();
            names.extend(shape.indexes.iter().map(|i| i.name.to_ascii_lowercase()));
            names.extend(shape.primary_key.iter().map(|p| p.name.to_ascii_lowercase()));
            names.extend(shape.foreign_keys.iter().map(|f| f.name.to_ascii_lowercase()));
        }
        freed
    }

    /// Whether a surviving table other than `table` holds `name` physically
    /// during phase 4.
    fn name_held_by_survivor(&self, table: TableId, name: &QualifiedName) -> bool {
        let Some(schema) = self.db.table(table).map(|t| t.schema) else {
            return false;
        };
        self.db.schemas[schema.index()].tables.iter().any(|&other| {
            other != table
                && self.db.table_exists_on(other, Side::Before)
                && self.action(other) != Some(TableAction::Drop)
                && same_name(&self.db.table_name_on(other, Side::Before), name)
        })
    }

    /// Emits phase 4 and returns the renames of temporary tables into place.
    fn table_jobs(&self, groups: &mut Vec<StatementGroup>) -> Vec<RenameStep<TableId>> {
        let with = |wanted: &[TableAction]| -> BTreeSet<TableId> {
            self.actions
                .iter()
                .filter(|(_, a)| wanted.contains(*a))
                .map(|(&t, _)| t)
                .collect()
        };
        let drops = with(&[TableAction::Drop]);
        let builds = with(&[TableAction::Create, TableAction::Rebuild]);
        let prefer = |owner: TableId| self.action(owner) == Some(TableAction::Rebuild);

        let before_edges: Vec<(ForeignKeyId, TableId, TableId)> = (0..self.db.foreign_keys.len())
            .map(|i| ForeignKeyId(slot(i)))
            .filter(|&fk| self.db.foreign_keys[fk.index()].persisted)
            .filter_map(|fk| Some((fk, self.db.foreign_key_table(fk)?, self.db.referenced_table(fk)?)))
            .collect();

        let mut drop_graph = DependencyGraph::new();
        for &(fk, owner, referenced) in &before_edges {
            if drops.contains(&owner) && drops.contains(&referenced) {
                drop_graph.add_edge(owner, referenced, fk);
            }
        }
        let mut strips: BTreeMap<TableId, Vec<ForeignKeyId>> = BTreeMap::new();
        for edge in drop_graph.detect_cycles(prefer) {
            strips.entry(edge.owner).or_default().push(edge.id);
        }
        let stripped: BTreeSet<ForeignKeyId> = strips.values().flatten().copied().collect();

        let mut jobs: Vec<Job> = strips.keys().map(|&t| Job::Strip(t)).collect();
        jobs.extend(drops.iter().map(|&t| Job::Drop(t)));
        jobs.extend(builds.iter().map(|&t| Job::Build(t)));

        let mut deps: Vec<(Job, Job)> = strips.keys().map(|&t| (Job::Strip(t), Job::Drop(t))).collect();
        for &(fk, owner, referenced) in &before_edges {
            if owner == referenced || !drops.contains(&referenced) {
                continue;
            }
            if stripped.contains(&fk) {
                deps.push((Job::Strip(owner), Job::Drop(referenced)));
                continue;
            }
            match self.action(owner) {
                Some(TableAction::Drop) => deps.push((Job::Drop(owner), Job::Drop(referenced))),
                Some(TableAction::Rebuild) => deps.push((Job::Build(owner), Job::Drop(referenced))),
                _ => {}
            }
        }

        let mut build_graph = DependencyGraph::new();
        for &table in &builds {
            build_graph.add_node(table);
            for fk in self.after.get(&table).map(|s| s.foreign_keys.as_slice()).unwrap_or_default() {
                if fk.referenced_table != table && builds.contains(&fk.referenced_table) {
                    build_graph.add_edge(table, fk.referenced_table, fk.id);
                }
            }
        }
        let relaxed: BTreeSet<ForeignKeyId> = build_graph.detect_cycles(prefer).into_iter().map(|e| e.id).collect();
        deps.extend(
            build_graph
                .edges()
                .iter()
                .filter(|e| !relaxed.contains(&e.id))
                .map(|e| (Job::Build(e.referenced), Job::Build(e.owner))),
        );

        let mut blocked = BTreeSet::new();
        for table in with(&[TableAction::Create]) {
            let Some(shape) = self.after.get(&table) else { continue };
            for &dropped in &drops {
                if self.before.get(&dropped).is_some_and(|b| same_name(&b.name, &shape.name)) {
                    deps.push((Job::Drop(dropped), Job::Build(table)));
                }
            }
            if self.name_held_by_survivor(table, &shape.name) {
                debug!(table = %target(&shape.name), "Name still held, creating under a temporary name");
                blocked.insert(table);
            }
        }

        let mut deferred = Vec::new();
        for job in safe_topological_order(&jobs, &deps, Job::priority) {
            match job {
                Job::Strip(table) => {
                    let fks = strips.get(&table).map(Vec::as_slice).unwrap_or_default();
                    groups.push(self.strip(table, fks));
                }
                Job::Drop(table) => {
                    if let Some(before) = self.before.get(&table) {
                        groups.push(
                            StatementGroup::new(GroupKind::DropTable, target(&before.name))
                                .with_statement(self.dialect.drop_table(&before.name)),
                        );
                    }
                }
                Job::Build(table) => {
                    if let Some((group, rename)) = self.build(table, blocked.contains(&table)) {
                        groups.push(group);
                        deferred.extend(rename);
                    }
                }
            }
        }
        deferred
    }

    fn strip(&self, table: TableId, fks: &[ForeignKeyId]) -> StatementGroup {
        let Some(before) = self.before.get(&table) else {
            return StatementGroup::new(GroupKind::StripForeignKeys, table.to_string());
        };
        let mut group = StatementGroup::new(GroupKind::StripForeignKeys, target(&before.name));
        if self.dialect.classify(ObjectKind::ForeignKey, MutationKind::Remove) == Strategy::InPlace {
            for fk in before.foreign_keys.iter().filter(|f| fks.contains(&f.id)) {
                group.push(self.dialect.drop_foreign_key(&before.name, &fk.name));
            }
        } else {
            let stripped = before.without_foreign_keys(fks);
            let tmp = before
                .name
                .with_name(self.dialect.temporary_name(ObjectKind::Table, table.0));
            for sql in assembler::rebuild_table(self.dialect, before, &stripped, &tmp, true) {
                group.push(sql);
            }
        }
        group
    }

    fn build(&self, table: TableId, blocked: bool) -> Option<(StatementGroup, Option<RenameStep<TableId>>)> {
        let after = self.after.get(&table)?;
        let tmp = after
            .name
            .with_name(self.dialect.temporary_name(ObjectKind::Table, table.0));
        let swap_in = || RenameStep::new(table, tmp.name.as_str(), after.name.name.as_str());
        match self.action(table)? {
            TableAction::Create => {
                let name = if blocked { &tmp } else { &after.name };
                let sql = self
                    .dialect
                    .create_table(after, name, !self.dialect.supports_add_constraint());
                Some((
                    StatementGroup::new(GroupKind::CreateTable, target(&after.name)).with_statement(sql),
                    blocked.then(swap_in),
                ))
            }
            TableAction::Rebuild => {
                let before = self.before.get(&table)?;
                let inline = before.name.name == after.name.name;
                let mut group = StatementGroup::new(GroupKind::RebuildTable, target(&after.name));
                for sql in assembler::rebuild_table(self.dialect, before, after, &tmp, inline) {
                    group.push(sql);
                }
                Some((group, (!inline).then(swap_in)))
            }
            TableAction::Drop | TableAction::InPlace => None,
        }
    }

    fn rename_tables(&self, deferred: Vec<RenameStep<TableId>>, groups: &mut Vec<StatementGroup>) {
        let mut namespaces: BTreeMap<String, Vec<RenameStep<TableId>>> = BTreeMap::new();
        for &table in &self.order {
            if self.action(table) != Some(TableAction::InPlace) {
                continue;
            }
            let (Some(before), Some(after)) = (self.before.get(&table), self.after.get(&table)) else {
                continue;
            };
            if before.name.name != after.name.name {
                namespaces
                    .entry(after.name.schema.clone())
                    .or_default()
                    .push(RenameStep::new(table, before.name.name.as_str(), after.name.name.as_str()));
            }
        }
        for step in deferred {
            if let Some(after) = self.after.get(&step.key) {
                namespaces.entry(after.name.schema.clone()).or_default().push(step);
            }
        }

        for (schema, requests) in namespaces {
            for step in resolve_renames(requests, |t| self.dialect.swap_name(ObjectKind::Table, t.0)) {
                let from = QualifiedName::new(schema.as_str(), step.from.as_str());
                groups.push(
                    StatementGroup::new(GroupKind::RenameTable, format!("{schema}.{}", step.to))
                        .with_statement(self.dialect.rename_table(&from, &step.to)),
                );
            }
        }
    }

    fn built_tables(&self) -> impl Iterator<Item = &TableShape> {
        self.order
            .iter()
            .filter(|&&t| matches!(self.action(t), Some(TableAction::Create | TableAction::Rebuild)))
            .filter_map(|t| self.after.get(t))
    }

    fn attach(&self, tables: &[InPlaceTable<'_>], groups: &mut Vec<StatementGroup>) {
        for shape in self.built_tables() {
            let mut group = StatementGroup::new(GroupKind::AttachIndexes, target(&shape.name));
            for index in &shape.indexes {
                group.push(self.dialect.create_index(&shape.name, index));
            }
            groups.push(group);
        }
        for t in tables {
            let mut group = StatementGroup::new(GroupKind::AttachIndexes, target(&t.after.name));
            for index in &t.indexes.created {
                group.push(self.dialect.create_index(&t.after.name, index));
            }
            groups.push(group);
        }

        for t in tables {
            if let Some(pk) = t.constraints.primary_key_added {
                groups.push(
                    StatementGroup::new(GroupKind::AttachConstraints, target(&t.after.name))
                        .with_statement(self.dialect.add_primary_key(&t.after.name, pk)),
                );
            }
        }

        if self.dialect.supports_add_constraint() {
            for shape in self.built_tables() {
                let mut group = StatementGroup::new(GroupKind::AttachConstraints, target(&shape.name));
                for fk in &shape.foreign_keys {
                    group.push(self.dialect.add_foreign_key(&shape.name, fk));
                }
                groups.push(group);
            }
        }
        for t in tables {
            let mut group = StatementGroup::new(GroupKind::AttachConstraints, target(&t.after.name));
            for fk in &t.constraints.foreign_keys_added {
                group.push(self.dialect.add_foreign_key(&t.after.name, fk));
            }
            groups.push(group);
        }
    }

    fn schema_teardown(&self, groups: &mut Vec<StatementGroup>) {
        for id in self.schema_records(MutationKind::Remove) {
            let Some(schema) = self.db.schema(id) else { continue };
            let name = match self.parked.get(&id) {
                Some(parked) => parked.clone(),
                None => self.db.original_name(id.into(), schema.name()),
            };
            if let Some(sql) = self.dialect.drop_schema(&name) {
                groups.push(StatementGroup::new(GroupKind::DropSchema, name).with_statement(sql));
            }
        }
    }
}

impl DatabaseModel {
    /// Generates the statements for every outstanding change and appends
    /// them to the statement buffer.
    ///
    /// Validation covers the whole batch: on error nothing is emitted and
    /// the journal is left untouched. In [`Mode::NoChanges`] the batch is
    /// validated only. Returns the groups appended by this call.
    pub fn flush(&mut self) -> Result<&[StatementGroup]> {
        let start = self.buffer.len();
        if !self.attached || self.journal.is_empty() {
            return Ok(&self.buffer.groups()[start..]);
        }
        let groups = Reconciler::new(self).plan()?;
        if self.options.mode == Mode::NoChanges {
            debug!(records = self.journal.len(), "Validated pending changes without emitting");
            return Ok(&self.buffer.groups()[start..]);
        }

        let start = self.buffer.append(groups);
        let records = self.journal.drain(|_| true).len();
        self.fold_baseline();
        info!(
            dialect = self.dialect.name(),
            records,
            groups = self.buffer.len() - start,
            "Flushed pending changes"
        );
        Ok(&self.buffer.groups()[start..])
    }

    /// Flushes, then returns every statement generated so far.
    pub fn pending_statements(&mut self) -> Result<&StatementBuffer> {
        self.flush()?;
        Ok(&self.buffer)
    }

    /// How each dirty table would be reconciled by the next flush,
    /// including tables rebuilt only to refresh foreign key references.
    #[must_use]
    pub fn planned_table_actions(&self) -> Vec<(TableId, TableAction)> {
        let mut reconciler = Reconciler::new(self);
        reconciler.classify();
        reconciler.propagate();
        reconciler
            .order
            .iter()
            .filter_map(|&t| reconciler.action(t).map(|a| (t, a)))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dialect::{PostgresDialect, SqliteDialect};
    use crate::types::{DefaultValue, SortDirection, SqlType};

    fn keyed_table(db: &mut DatabaseModel, schema: SchemaId, name: &str) -> (TableId, ColumnId) {
        let t = db.create_table(schema, name).unwrap();
        let id = db.create_column(t, "id", SqlType::Integer).unwrap();
        db.column_mut(id).unwrap().mark_nullable(false).unwrap();
        let ix = db.create_index(t, &[(id, SortDirection::Ascending)], true, None).unwrap();
        db.create_primary_key(ix, None).unwrap();
        (t, id)
    }

    fn statements(groups: &[StatementGroup]) -> Vec<String> {
        groups.iter().flat_map(|g| g.statements.clone()).collect()
    }

    #[test]
    fn test_flush_without_changes_is_empty() {
        let mut db = DatabaseModel::new(SqliteDialect::new());
        assert!(db.flush().unwrap().is_empty());
        assert!(db.statement_buffer().is_empty());
    }

    #[test]
    fn test_create_table_then_flush_twice() {
        let mut db = DatabaseModel::new(SqliteDialect::new());
        let main = db.default_schema();
        keyed_table(&mut db, main, "users");
        let sql = statements(db.flush().unwrap());
        assert_eq!(
            sql,
            vec!["CREATE TABLE \"users\" (\n  \"id\" INTEGER NOT NULL,\n  CONSTRAINT \"pk_users\" PRIMARY KEY (\"id\")\n)"]
        );
        assert!(!db.has_pending_changes());
        assert!(db.flush().unwrap().is_empty());
        assert_eq!(db.statement_buffer().len(), 1);
    }

    #[test]
    fn test_missing_primary_key_blocks_commit_only() {
        let mut db = DatabaseModel::new(SqliteDialect::new());
        let main = db.default_schema();
        let t = db.create_table(main, "loose").unwrap();
        db.create_column(t, "v", SqlType::Text).unwrap();

        let err = db.flush().unwrap_err();
        assert!(err.has_kind(ErrorKind::MissingPrimaryKey));
        assert!(db.has_pending_changes());
        assert!(db.statement_buffer().is_empty());

        db.set_mode(Mode::DryRun);
        assert_eq!(db.flush().unwrap().len(), 1);
    }

    #[test]
    fn test_no_changes_mode_validates_only() {
        let options = crate::model::ModelOptions::new().with_mode(Mode::NoChanges);
        let mut db = DatabaseModel::with_options(SqliteDialect::new(), options);
        let main = db.default_schema();
        keyed_table(&mut db, main, "users");
        assert!(db.flush().unwrap().is_empty());
        assert!(db.has_pending_changes());
    }

    #[test]
    fn test_sqlite_schema_rename_is_unsupported() {
        let mut db = DatabaseModel::new(SqliteDialect::new());
        let s = db.create_schema("aux").unwrap();
        db.flush().unwrap();
        db.schema_mut(s).unwrap().set_name("other").unwrap();
        let err = db.flush().unwrap_err();
        assert!(err.has_kind(ErrorKind::UnsupportedMutation));
    }

    #[test]
    fn test_classification() {
        let mut db = DatabaseModel::new(SqliteDialect::new());
        let main = db.default_schema();
        let (a, _) = keyed_table(&mut db, main, "a");
        let (b, _) = keyed_table(&mut db, main, "b");
        let (c, _) = keyed_table(&mut db, main, "c");
        db.flush().unwrap();

        db.table_mut(a).unwrap().set_name("a2").unwrap();
        db.create_column(b, "extra", SqlType::Text).unwrap();
        db.table_mut(c).unwrap().remove().unwrap();
        let (d, _) = keyed_table(&mut db, main, "d");

        assert_eq!(
            db.planned_table_actions(),
            vec![
                (a, TableAction::InPlace),
                (b, TableAction::Rebuild),
                (c, TableAction::Drop),
                (d, TableAction::Create),
            ]
        );
    }

    #[test]
    fn test_legacy_rename_rebuilds_referencing_table() {
        let mut db = DatabaseModel::new(SqliteDialect::legacy_alter_table());
        let main = db.default_schema();
        let (users, _) = keyed_table(&mut db, main, "users");
        let (posts, _) = keyed_table(&mut db, main, "posts");
        let author = db.create_column(posts, "author", SqlType::Integer).unwrap();
        let own = db.create_index(posts, &[(author, SortDirection::Ascending)], false, None).unwrap();
        let referenced = db.primary_key(db.primary_key_of(users).unwrap()).unwrap().index();
        db.create_foreign_key(own, referenced, None).unwrap();
        db.flush().unwrap();

        db.table_mut(users).unwrap().set_name("members").unwrap();
        assert_eq!(
            db.planned_table_actions(),
            vec![(users, TableAction::InPlace), (posts, TableAction::Rebuild)]
        );
        let sql = statements(db.flush().unwrap());
        assert!(sql.iter().any(|s| s.contains("REFERENCES \"members\" (\"id\")")));
        assert!(sql.contains(&"ALTER TABLE \"users\" RENAME TO \"members\"".to_string()));
    }

    #[test]
    fn test_rebuilt_rename_rebuilds_referencing_table() {
        let mut db = DatabaseModel::new(SqliteDialect::new());
        let main = db.default_schema();
        let (users, _) = keyed_table(&mut db, main, "users");
        let (posts, _) = keyed_table(&mut db, main, "posts");
        let (tags, _) = keyed_table(&mut db, main, "tags");
        let author = db.create_column(posts, "author", SqlType::Integer).unwrap();
        let own = db.create_index(posts, &[(author, SortDirection::Ascending)], false, None).unwrap();
        let referenced = db.primary_key(db.primary_key_of(users).unwrap()).unwrap().index();
        db.create_foreign_key(own, referenced, None).unwrap();
        db.flush().unwrap();

        db.table_mut(tags).unwrap().set_name("labels").unwrap();
        db.create_column(users, "email", SqlType::Text).unwrap();
        db.table_mut(users).unwrap().set_name("members").unwrap();
        assert_eq!(
            db.planned_table_actions(),
            vec![
                (tags, TableAction::InPlace),
                (users, TableAction::Rebuild),
                (posts, TableAction::Rebuild),
            ]
        );
        let sql = statements(db.flush().unwrap());
        assert!(sql.iter().any(|s| s.contains("REFERENCES \"members\" (\"id\")")));
    }

    #[test]
    fn test_split_after_drops_defers_chains() {
        let freed: BTreeSet<String> = ["ix_old".to_string()].into();
        let requests = vec![
            RenameStep::new(1u32, "ix_a", "IX_OLD"),
            RenameStep::new(2u32, "ix_b", "ix_a"),
            RenameStep::new(3u32, "ix_c", "ix_d"),
        ];
        let (now, later) = split_after_drops(requests, Some(&freed));
        assert_eq!(now.iter().map(|r| r.key).collect::<Vec<_>>(), vec![3]);
        assert_eq!(later.iter().map(|r| r.key).collect::<Vec<_>>(), vec![1, 2]);
    }

    #[test]
    fn test_postgres_in_place_alterations() {
        let mut db = DatabaseModel::new(PostgresDialect::new());
        let public = db.default_schema();
        let (t, _) = keyed_table(&mut db, public, "users");
        let email = db.create_column(t, "email", SqlType::Text).unwrap();
        let ix = db.create_index(t, &[(email, SortDirection::Ascending)], true, None).unwrap();
        db.flush().unwrap();

        db.column_mut(email)
            .unwrap()
            .set_type(SqlType::Varchar(255))
            .unwrap()
            .set_default_value(Some(DefaultValue::String("none".into())))
            .unwrap();
        db.index_mut(ix).unwrap().set_name("users_email_key").unwrap();
        db.table_mut(t).unwrap().set_name("accounts").unwrap();

        let sql = statements(db.flush().unwrap());
        assert_eq!(
            sql,
            vec![
                "ALTER TABLE \"public\".\"users\" ALTER COLUMN \"email\" TYPE VARCHAR(255) USING CAST(\"email\" AS VARCHAR(255))",
                "ALTER TABLE \"public\".\"users\" ALTER COLUMN \"email\" SET DEFAULT 'none'",
                "ALTER INDEX \"public\".\"ix_users_email\" RENAME TO \"users_email_key\"",
                "ALTER TABLE \"public\".\"users\" RENAME TO \"accounts\"",
            ]
        );
    }

    #[test]
    fn test_failed_flush_keeps_journal() {
        let mut db = DatabaseModel::new(SqliteDialect::new());
        let main = db.default_schema();
        let (t, _) = keyed_table(&mut db, main, "t");
        db.flush().unwrap();
        db.create_column(t, "x", SqlType::Text).unwrap();
        let pk = db.primary_key_of(t).unwrap();
        db.primary_key_mut(pk).unwrap().remove().unwrap();

        let before = db.change_records();
        assert!(db.flush().is_err());
        assert_eq!(db.change_records(), before);
    }
}
