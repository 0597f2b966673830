//! Schema model and reconciliation engine for DDL migration scripts.
//!
//! `oxide-ddl` keeps an in-memory model of a database schema. Every edit is
//! validated immediately and recorded in a change journal; a flush turns the
//! journal into an ordered statement script that moves the physical database
//! from its last flushed state to the model's current state.
//!
//! # Architecture
//!
//! - **Model** - Arena of schemas, tables, columns, indexes and keys, addressed
//!   by typed handles
//! - **Journal** - Net effect of every mutation since the last flush
//! - **Dialect** - Policy table (in place, rebuild, unsupported) and renderers
//! - **Reconciler** - Classifies dirty tables, validates, orders statements
//! - **Script** - Statement groups in execution order, as SQL text or JSON
//!
//! # Example
//!
//! ```rust,ignore
//! use oxide_ddl::prelude::*;
//!
//! let mut db = DatabaseModel::new(SqliteDialect::new());
//! let main = db.default_schema();
//!
//! let users = db.create_table(main, "users")?;
//! let id = db.create_column(users, "id", SqlType::Integer)?;
//! db.column_mut(id)?.mark_nullable(false)?;
//! let pk = db.create_index(users, &[(id, SortDirection::Ascending)], true, None)?;
//! db.create_primary_key(pk, None)?;
//! db.flush()?;
//!
//! // Adding a column to a SQLite table rebuilds it.
//! db.create_column(users, "email", SqlType::Text)?;
//! for group in db.flush()? {
//!     for sql in &group.statements {
//!         println!("{sql};");
//!     }
//! }
//! ```

pub mod assembler;
pub mod cycles;
pub mod dialect;
pub mod error;
pub mod graph;
pub mod journal;
pub mod model;
pub mod reconcile;
pub mod script;
pub mod types;

/// Prelude for convenient imports.
pub mod prelude {
    pub use crate::cycles::{resolve_renames, RenameStep};
    pub use crate::dialect::{MigrationDialect, PolicyRule, PostgresDialect, SqliteDialect, Strategy};
    pub use crate::error::{DdlError, ErrorCategory, ErrorEntry, ErrorKind, Result};
    pub use crate::graph::{safe_topological_order, DependencyGraph};
    pub use crate::journal::{ChangeRecord, MutationKind, Property, PropertyValue};
    pub use crate::model::{
        ColumnId, DatabaseModel, ForeignKeyId, IndexId, Mode, ModelOptions, ObjectKind, ObjectRef,
        PrimaryKeyId, QualifiedName, SchemaId, Side, TableId, TableShape,
    };
    pub use crate::reconcile::TableAction;
    pub use crate::script::{GroupKind, StatementBuffer, StatementGroup};
    pub use crate::types::{DefaultValue, ForeignKeyAction, SortDirection, SqlType, StorageClass, TypeDefinition};
}
