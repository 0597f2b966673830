//! Typed handles into the object arena.

use std::fmt;

use serde::{Deserialize, Serialize};

macro_rules! handle {
    ($(#[$meta:meta])* $name:ident, $prefix:literal) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        pub struct $name(pub(crate) u32);

        impl $name {
            /// Returns the arena slot of this handle.
            #[must_use]
            pub const fn index(self) -> usize {
                self.0 as usize
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, concat!($prefix, "{}"), self.0)
            }
        }
    };
}

handle!(
    /// Handle to a schema.
    SchemaId,
    "schema#"
);
handle!(
    /// Handle to a table.
    TableId,
    "table#"
);
handle!(
    /// Handle to a column.
    ColumnId,
    "column#"
);
handle!(
    /// Handle to an index.
    IndexId,
    "index#"
);
handle!(
    /// Handle to a primary key.
    PrimaryKeyId,
    "pk#"
);
handle!(
    /// Handle to a foreign key.
    ForeignKeyId,
    "fk#"
);

/// Kind of a model object.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum ObjectKind {
    Schema,
    Table,
    Column,
    Index,
    PrimaryKey,
    ForeignKey,
}

impl ObjectKind {
    /// Short lowercase label used in generated identifiers.
    #[must_use]
    pub const fn label(self) -> &'static str {
        match self {
            Self::Schema => "schema",
            Self::Table => "table",
            Self::Column => "column",
            Self::Index => "index",
            Self::PrimaryKey => "pk",
            Self::ForeignKey => "fk",
        }
    }
}

/// Type-erased reference to any model object.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum ObjectRef {
    Schema(SchemaId),
    Table(TableId),
    Column(ColumnId),
    Index(IndexId),
    PrimaryKey(PrimaryKeyId),
    ForeignKey(ForeignKeyId),
}

impl ObjectRef {
    /// Returns the kind of the referenced object.
    #[must_use]
    pub const fn kind(self) -> ObjectKind {
        match self {
            Self::Schema(_) => ObjectKind::Schema,
            Self::Table(_) => ObjectKind::Table,
            Self::Column(_) => ObjectKind::Column,
            Self::Index(_) => ObjectKind::Index,
            Self::PrimaryKey(_) => ObjectKind::PrimaryKey,
            Self::ForeignKey(_) => ObjectKind::ForeignKey,
        }
    }

    /// Returns the raw arena slot.
    #[must_use]
    pub const fn raw(self) -> u32 {
        match self {
            Self::Schema(id) => id.0,
            Self::Table(id) => id.0,
            Self::Column(id) => id.0,
            Self::Index(id) => id.0,
            Self::PrimaryKey(id) => id.0,
            Self::ForeignKey(id) => id.0,
        }
    }
}

impl From<SchemaId> for ObjectRef {
    fn from(id: SchemaId) -> Self {
        Self::Schema(id)
    }
}

impl From<TableId> for ObjectRef {
    fn from(id: TableId) -> Self {
        Self::Table(id)
    }
}

impl From<ColumnId> for ObjectRef {
    fn from(id: ColumnId) -> Self {
        Self::Column(id)
    }
}

impl From<IndexId> for ObjectRef {
    fn from(id: IndexId) -> Self {
        Self::Index(id)
    }
}

impl From<PrimaryKeyId> for ObjectRef {
    fn from(id: PrimaryKeyId) -> Self {
        Self::PrimaryKey(id)
    }
}

impl From<ForeignKeyId> for ObjectRef {
    fn from(id: ForeignKeyId) -> Self {
        Self::ForeignKey(id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_object_ref_kind_and_raw() {
        let r: ObjectRef = TableId(7).into();
        assert_eq!(r.kind(), ObjectKind::Table);
        assert_eq!(r.raw(), 7);
        assert_eq!(TableId(7).to_string(), "table#7");
    }
}
