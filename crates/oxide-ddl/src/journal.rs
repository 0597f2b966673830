//! Change journal: net effect of every mutation since the last flush.
//!
//! Records are keyed by `(object, property)`. A second mutation of the same
//! property overwrites the current value but keeps the original value and the
//! first sequence number; when the current value returns to the original the
//! entry is dropped, so set-then-revert produces nothing.

use std::collections::BTreeMap;

use serde::Serialize;
use tracing::debug;

use crate::model::{ObjectRef, TableId};
use crate::types::{DefaultValue, ForeignKeyAction, TypeDefinition};

/// Tracked property of a model object.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub enum Property {
    Existence,
    Name,
    Type,
    Nullable,
    Default,
    OnDelete,
    OnUpdate,
}

/// Value of a tracked property.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub enum PropertyValue {
    Exists(bool),
    Name(String),
    Type(TypeDefinition),
    Nullable(bool),
    Default(Option<DefaultValue>),
    Action(ForeignKeyAction),
}

/// What a change record does to its object.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub enum MutationKind {
    Create,
    Remove,
    Rename,
    Retype,
    Nullability,
    Default,
    ReferenceBehavior,
}

/// A coalesced mutation of one object property.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ChangeRecord {
    pub object: ObjectRef,
    pub property: Property,
    pub kind: MutationKind,
    pub original: PropertyValue,
    pub current: PropertyValue,
    pub sequence: u64,
}

#[derive(Debug, Clone)]
struct JournalEntry {
    original: PropertyValue,
    current: PropertyValue,
    sequence: u64,
}

fn mutation_kind(property: Property, current: &PropertyValue) -> MutationKind {
    match property {
        Property::Existence => {
            if matches!(current, PropertyValue::Exists(true)) {
                MutationKind::Create
            } else {
                MutationKind::Remove
            }
        }
        Property::Name => MutationKind::Rename,
        Property::Type => MutationKind::Retype,
        Property::Nullable => MutationKind::Nullability,
        Property::Default => MutationKind::Default,
        Property::OnDelete | Property::OnUpdate => MutationKind::ReferenceBehavior,
    }
}

/// Per-database change journal.
#[derive(Debug, Clone, Default)]
pub struct Journal {
    entries: BTreeMap<(ObjectRef, Property), JournalEntry>,
    next_sequence: u64,
}

impl Journal {
    /// Creates an empty journal.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Records a property change, coalescing with any earlier change of the
    /// same property.
    pub fn record(
        &mut self,
        object: ObjectRef,
        property: Property,
        original: PropertyValue,
        current: PropertyValue,
    ) {
        let key = (object, property);
        if let Some(entry) = self.entries.get_mut(&key) {
            entry.current = current;
            if entry.current == entry.original {
                debug!(?object, ?property, "Mutation reverted, dropping journal entry");
                self.entries.remove(&key);
            }
            return;
        }
        if original == current {
            return;
        }
        let sequence = self.next_sequence;
        self.next_sequence += 1;
        debug!(?object, ?property, sequence, "Recording mutation");
        self.entries.insert(
            key,
            JournalEntry {
                original,
                current,
                sequence,
            },
        );
    }

    /// Returns all outstanding records ordered by first sequence.
    #[must_use]
    pub fn records(&self) -> Vec<ChangeRecord> {
        let mut records: Vec<ChangeRecord> = self
            .entries
            .iter()
            .map(|(&(object, property), entry)| ChangeRecord {
                object,
                property,
                kind: mutation_kind(property, &entry.current),
                original: entry.original.clone(),
                current: entry.current.clone(),
                sequence: entry.sequence,
            })
            .collect();
        records.sort_by_key(|r| r.sequence);
        records
    }

    /// Returns the value a property had at the last flush, if it changed since.
    #[must_use]
    pub fn original(&self, object: ObjectRef, property: Property) -> Option<&PropertyValue> {
        self.entries.get(&(object, property)).map(|e| &e.original)
    }

    /// Returns whether a property has an outstanding change.
    #[must_use]
    pub fn contains(&self, object: ObjectRef, property: Property) -> bool {
        self.entries.contains_key(&(object, property))
    }

    /// Removes and returns every record matching `predicate`.
    pub fn drain<F>(&mut self, mut predicate: F) -> Vec<ChangeRecord>
    where
        F: FnMut(&ChangeRecord) -> bool,
    {
        let drained: Vec<ChangeRecord> = self.records().into_iter().filter(|r| predicate(r)).collect();
        for record in &drained {
            self.entries.remove(&(record.object, record.property));
        }
        drained
    }

    /// Distinct tables owning outstanding records, ordered by their first
    /// record. `owner_of` maps an object to its table; objects without one
    /// (schemas) are skipped.
    pub fn pending_tables<F>(&self, mut owner_of: F) -> Vec<TableId>
    where
        F: FnMut(ObjectRef) -> Option<TableId>,
    {
        let mut first: BTreeMap<TableId, u64> = BTreeMap::new();
        for (&(object, _), entry) in &self.entries {
            if let Some(table) = owner_of(object) {
                let seq = first.entry(table).or_insert(entry.sequence);
                *seq = (*seq).min(entry.sequence);
            }
        }
        let mut tables: Vec<(u64, TableId)> = first.into_iter().map(|(t, s)| (s, t)).collect();
        tables.sort_unstable();
        tables.into_iter().map(|(_, t)| t).collect()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Forgets every outstanding record.
    pub fn clear(&mut self) {
        self.entries.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{ColumnId, SchemaId};

    fn name(s: &str) -> PropertyValue {
        PropertyValue::Name(s.to_string())
    }

    #[test]
    fn test_coalesces_same_property() {
        let mut journal = Journal::new();
        let col = ObjectRef::Column(ColumnId(1));
        journal.record(col, Property::Name, name("a"), name("b"));
        journal.record(col, Property::Name, name("b"), name("c"));

        let records = journal.records();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].original, name("a"));
        assert_eq!(records[0].current, name("c"));
        assert_eq!(records[0].kind, MutationKind::Rename);
        assert_eq!(records[0].sequence, 0);
    }

    #[test]
    fn test_revert_drops_entry() {
        let mut journal = Journal::new();
        let col = ObjectRef::Column(ColumnId(1));
        journal.record(col, Property::Nullable, PropertyValue::Nullable(true), PropertyValue::Nullable(false));
        journal.record(col, Property::Nullable, PropertyValue::Nullable(false), PropertyValue::Nullable(true));
        assert!(journal.is_empty());

        journal.record(col, Property::Name, name("a"), name("a"));
        assert!(journal.is_empty());
    }

    #[test]
    fn test_create_then_remove_cancels() {
        let mut journal = Journal::new();
        let col = ObjectRef::Column(ColumnId(3));
        journal.record(col, Property::Existence, PropertyValue::Exists(false), PropertyValue::Exists(true));
        assert_eq!(journal.records()[0].kind, MutationKind::Create);
        journal.record(col, Property::Existence, PropertyValue::Exists(true), PropertyValue::Exists(false));
        assert!(journal.is_empty());
    }

    #[test]
    fn test_pending_tables_ordered_by_first_sequence() {
        let mut journal = Journal::new();
        let c1 = ObjectRef::Column(ColumnId(1));
        let c2 = ObjectRef::Column(ColumnId(2));
        let s = ObjectRef::Schema(SchemaId(0));
        journal.record(c2, Property::Name, name("x"), name("y"));
        journal.record(s, Property::Name, name("main"), name("other"));
        journal.record(c1, Property::Name, name("p"), name("q"));

        let tables = journal.pending_tables(|obj| match obj {
            ObjectRef::Column(ColumnId(1)) => Some(TableId(10)),
            ObjectRef::Column(ColumnId(2)) => Some(TableId(20)),
            _ => None,
        });
        assert_eq!(tables, vec![TableId(20), TableId(10)]);
    }

    #[test]
    fn test_drain_predicate() {
        let mut journal = Journal::new();
        let c1 = ObjectRef::Column(ColumnId(1));
        let s = ObjectRef::Schema(SchemaId(0));
        journal.record(c1, Property::Name, name("p"), name("q"));
        journal.record(s, Property::Name, name("main"), name("other"));

        let drained = journal.drain(|r| matches!(r.object, ObjectRef::Schema(_)));
        assert_eq!(drained.len(), 1);
        assert_eq!(journal.len(), 1);
        assert_eq!(journal.original(c1, Property::Name), Some(&name("p")));
    }
}
