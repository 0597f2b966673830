//! Value types shared by the object model and the dialects.
//!
//! These describe column types, default values and constraint behavior. They
//! carry no identity; the object model attaches them to columns, indexes and
//! foreign keys.

use serde::{Deserialize, Serialize};

/// Semantic column type. Each variant maps to a [`StorageClass`], which is
/// what SQLite records and what foreign key compatibility compares;
/// PostgreSQL renders the type by name instead.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SqlType {
    /// `INTEGER` on PostgreSQL; integer storage.
    Integer,
    /// `BIGINT`; integer storage.
    BigInt,
    /// `SMALLINT`; integer storage.
    SmallInt,
    /// `TEXT`; text storage.
    Text,
    /// `VARCHAR(n)`. SQLite keeps it as text and ignores the length.
    Varchar(usize),
    /// `CHAR(n)`; text storage, length ignored by SQLite.
    Char(usize),
    /// `BOOLEAN`. Stored as 0/1 integers, which is also how defaults render.
    Boolean,
    /// `TIMESTAMP`; ISO-8601 text under SQLite.
    DateTime,
    /// `DATE`; text storage.
    Date,
    /// `TIME`; text storage.
    Time,
    /// Renders the same as [`SqlType::DateTime`].
    Timestamp,
    /// `REAL`; floating point storage.
    Real,
    /// `DOUBLE PRECISION`; floating point storage.
    Double,
    /// `DECIMAL(p, s)`. Numeric storage, so SQLite may keep it as integer or real.
    Decimal(u8, u8),
    /// `BYTEA` on PostgreSQL; blob storage.
    Blob,
    /// `JSONB` on PostgreSQL; text storage.
    Json,
    /// `UUID` on PostgreSQL; text storage unless overridden with
    /// [`TypeDefinition::stored_as`].
    Uuid,
}

impl SqlType {
    /// Returns the storage class a value of this type lands in by default.
    #[must_use]
    pub const fn storage_class(&self) -> StorageClass {
        match self {
            Self::Integer | Self::BigInt | Self::SmallInt | Self::Boolean => StorageClass::Integer,
            Self::Real | Self::Double => StorageClass::Real,
            Self::Decimal(_, _) => StorageClass::Numeric,
            Self::Blob => StorageClass::Blob,
            Self::Text
            | Self::Varchar(_)
            | Self::Char(_)
            | Self::DateTime
            | Self::Date
            | Self::Time
            | Self::Timestamp
            | Self::Json
            | Self::Uuid => StorageClass::Text,
        }
    }

    /// Returns the SQL type name for PostgreSQL.
    #[must_use]
    pub fn postgres_name(&self) -> String {
        match self {
            Self::Integer => "INTEGER".to_string(),
            Self::BigInt => "BIGINT".to_string(),
            Self::SmallInt => "SMALLINT".to_string(),
            Self::Text => "TEXT".to_string(),
            Self::Varchar(len) => format!("VARCHAR({len})"),
            Self::Char(len) => format!("CHAR({len})"),
            Self::Boolean => "BOOLEAN".to_string(),
            Self::DateTime | Self::Timestamp => "TIMESTAMP".to_string(),
            Self::Date => "DATE".to_string(),
            Self::Time => "TIME".to_string(),
            Self::Real => "REAL".to_string(),
            Self::Double => "DOUBLE PRECISION".to_string(),
            Self::Decimal(p, s) => format!("DECIMAL({p}, {s})"),
            Self::Blob => "BYTEA".to_string(),
            Self::Json => "JSONB".to_string(),
            Self::Uuid => "UUID".to_string(),
        }
    }
}

/// Physical storage class of a column (SQLite type affinity).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum StorageClass {
    /// Signed integer storage.
    Integer,
    /// Floating point storage.
    Real,
    /// Numeric affinity.
    Numeric,
    /// Text storage.
    Text,
    /// Raw bytes.
    Blob,
}

impl StorageClass {
    /// Returns the SQLite affinity keyword for this storage class.
    #[must_use]
    pub const fn sqlite_name(self) -> &'static str {
        match self {
            Self::Integer => "INTEGER",
            Self::Real => "REAL",
            Self::Numeric => "NUMERIC",
            Self::Text => "TEXT",
            Self::Blob => "BLOB",
        }
    }
}

/// A column type: the semantic SQL type plus the storage class it maps to.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TypeDefinition {
    /// Semantic type.
    pub sql_type: SqlType,
    /// Storage class.
    pub storage: StorageClass,
}

impl TypeDefinition {
    /// Creates a type definition with the default storage class of `sql_type`.
    #[must_use]
    pub const fn new(sql_type: SqlType) -> Self {
        let storage = sql_type.storage_class();
        Self { sql_type, storage }
    }

    /// Overrides the storage class (e.g. UUIDs stored as blobs).
    #[must_use]
    pub const fn stored_as(mut self, storage: StorageClass) -> Self {
        self.storage = storage;
        self
    }

    /// Returns whether values of `other` can be compared with values of this
    /// type in a foreign key.
    #[must_use]
    pub fn is_compatible_with(&self, other: &Self) -> bool {
        self.storage == other.storage
    }
}

impl From<SqlType> for TypeDefinition {
    fn from(sql_type: SqlType) -> Self {
        Self::new(sql_type)
    }
}

/// Column default, compared structurally when deciding whether a column
/// changed and rendered as a literal in `DEFAULT` clauses and in the
/// `COALESCE` fill of a table rebuild.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum DefaultValue {
    /// `NULL`.
    Null,
    /// `1` or `0` to match integer-stored booleans; PostgreSQL writes
    /// `TRUE`/`FALSE`.
    Bool(bool),
    Integer(i64),
    /// Must be finite; the model rejects NaN and infinities.
    Float(f64),
    /// Single-quoted with embedded quotes doubled.
    String(String),
    /// Raw SQL, parenthesized on output (e.g. `CURRENT_TIMESTAMP`).
    Expression(String),
}

impl DefaultValue {
    /// Renders the literal.
    #[must_use]
    pub fn to_sql(&self) -> String {
        match self {
            Self::Null => "NULL".to_string(),
            Self::Bool(b) => if *b { "1" } else { "0" }.to_string(),
            Self::Integer(i) => i.to_string(),
            Self::Float(f) => format!("{f:?}"),
            Self::String(s) => format!("'{}'", s.replace('\'', "''")),
            Self::Expression(expr) => format!("({expr})"),
        }
    }
}

/// Referential action of a foreign key. Part of the constraint's shape, so
/// changing it replaces the constraint (or rebuilds the table on SQLite).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub enum ForeignKeyAction {
    /// Omitted from rendered DDL.
    #[default]
    NoAction,
    Restrict,
    Cascade,
    SetNull,
    SetDefault,
}

impl ForeignKeyAction {
    /// Keyword used after `ON DELETE` / `ON UPDATE`.
    #[must_use]
    pub const fn to_sql(self) -> &'static str {
        match self {
            Self::NoAction => "NO ACTION",
            Self::Restrict => "RESTRICT",
            Self::Cascade => "CASCADE",
            Self::SetNull => "SET NULL",
            Self::SetDefault => "SET DEFAULT",
        }
    }
}

/// Sort direction of an index column.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub enum SortDirection {
    /// Ascending (the default).
    #[default]
    Ascending,
    /// Descending.
    Descending,
}
