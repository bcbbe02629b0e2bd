//! Structured error types for ormodel-core.
//!
//! Store errors are carried through untouched in `OrmError::Database` so
//! callers can inspect the native integrity-error kind. Binary crates wrap
//! these in `anyhow` for convenience.

use thiserror::Error;

/// Main error type for ormodel-core operations
#[derive(Error, Debug)]
pub enum OrmError {
    /// A cardinality-enforcing read matched zero rows
    #[error("{entity} matching query does not exist ({lookup})")]
    DoesNotExist { entity: String, lookup: String },

    /// A cardinality-enforcing read matched more than one row
    #[error("get() returned more than one {entity} ({lookup})")]
    MultipleObjectsReturned { entity: String, lookup: String },

    /// A manager verb ran outside any session scope
    #[error("no database session found in context; open a session scope before using a manager")]
    NoActiveSession,

    /// The ambient slot was written from a task that has no slot
    #[error("no ambient session slot in this task; use ambient::enter or Database::scope")]
    NoTaskContext,

    /// Two different definitions claim the same table name
    #[error("table '{table}' is already registered with a different definition")]
    DuplicateTable { table: String },

    /// A foreign key or relationship points at something not registered
    #[error("table '{table}' references '{reference}', which is not registered")]
    UnresolvedReference { table: String, reference: String },

    /// Field name not declared on the entity
    #[error("{entity} has no field '{field}'")]
    UnknownField { entity: String, field: String },

    /// Value does not fit the declared field type
    #[error("field '{entity}.{field}' expects {expected}, got {found}")]
    TypeMismatch {
        entity: String,
        field: String,
        expected: &'static str,
        found: &'static str,
    },

    /// An update tried to change the primary key of a stored row
    #[error("{entity}.{field} is the primary key and cannot be updated")]
    PrimaryKeyChange { entity: String, field: String },

    /// Predicate or ordering references a table that was not joined
    #[error("query on '{table}' references '{referenced}' without joining it first")]
    MissingJoin { table: String, referenced: String },

    /// No declared relationship connects the two entities
    #[error("no relationship declared between '{from}' and '{to}'")]
    NoRelationship { from: String, to: String },

    /// Instance has no primary key value yet
    #[error("{entity} instance is not persisted (primary key is null)")]
    NotPersisted { entity: String },

    /// An update or delete matched no row
    #[error("{entity} with primary key {key} no longer exists in the store")]
    StaleData { entity: String, key: String },

    /// A previous flush failed and the session has not been rolled back
    #[error("session transaction was rolled back due to a previous error during flush; call rollback() first")]
    PendingRollback,

    /// Session was closed
    #[error("session is closed")]
    SessionClosed,

    /// Configuration error
    #[error("Configuration error: {reason}")]
    Config { reason: String },

    /// Native store error, passed through unchanged
    #[error(transparent)]
    Database(#[from] sqlx::Error),
}

/// Result type alias for ormodel-core operations
pub type Result<T> = std::result::Result<T, OrmError>;

impl OrmError {
    pub fn does_not_exist(entity: impl Into<String>, lookup: impl Into<String>) -> Self {
        Self::DoesNotExist {
            entity: entity.into(),
            lookup: lookup.into(),
        }
    }

    pub fn multiple_objects(entity: impl Into<String>, lookup: impl Into<String>) -> Self {
        Self::MultipleObjectsReturned {
            entity: entity.into(),
            lookup: lookup.into(),
        }
    }

    pub fn unknown_field(entity: impl Into<String>, field: impl Into<String>) -> Self {
        Self::UnknownField {
            entity: entity.into(),
            field: field.into(),
        }
    }

    pub fn unresolved(table: impl Into<String>, reference: impl Into<String>) -> Self {
        Self::UnresolvedReference {
            table: table.into(),
            reference: reference.into(),
        }
    }

    pub fn config(reason: impl Into<String>) -> Self {
        Self::Config {
            reason: reason.into(),
        }
    }

    pub fn is_does_not_exist(&self) -> bool {
        matches!(self, Self::DoesNotExist { .. })
    }

    pub fn is_multiple_objects(&self) -> bool {
        matches!(self, Self::MultipleObjectsReturned { .. })
    }

    /// True for constraint violations reported by the store.
    pub fn is_integrity_error(&self) -> bool {
        match self {
            Self::Database(sqlx::Error::Database(db)) => {
                db.is_unique_violation()
                    || db.is_foreign_key_violation()
                    || db.is_check_violation()
                    || matches!(db.kind(), sqlx::error::ErrorKind::NotNullViolation)
            }
            _ => false,
        }
    }

    /// True only for unique-constraint violations.
    pub fn is_unique_violation(&self) -> bool {
        match self {
            Self::Database(sqlx::Error::Database(db)) => db.is_unique_violation(),
            _ => false,
        }
    }

    /// True for misuse and schema errors the caller should fix rather than handle.
    pub fn is_validation(&self) -> bool {
        matches!(
            self,
            Self::UnknownField { .. } | Self::TypeMismatch { .. } | Self::PrimaryKeyChange { .. }
        )
    }
}
