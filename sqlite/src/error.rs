//! Error types for SQLite entity store operations.
//!
//! Provides a unified error type covering database access, schema
//! definition, migration planning and execution, and mapping failures.

use entity_store_core::{RecordError, SchemaDefinitionError};
use thiserror::Error;

use crate::config::ConfigError;
use crate::planner::PlanningError;

/// Errors that can occur during entity store operations.
#[derive(Debug, Error)]
pub enum StoreError {
    /// SQLite database operation failure.
    #[error("database error: {0}")]
    DatabaseError(rusqlite::Error),

    /// The declared schema model is invalid.
    #[error("invalid schema definition: {0}")]
    SchemaDefinition(#[from] SchemaDefinitionError),

    /// The migration plan is inconsistent.
    #[error("planning error: {0}")]
    Planning(#[from] PlanningError),

    /// A migration step failed; the whole migration was rolled back.
    #[error("migration step {index} ({step}) failed: {source}")]
    MigrationFailed {
        index: usize,
        step: String,
        #[source]
        source: rusqlite::Error,
    },

    /// Migration lifecycle failure outside of a step (e.g., a stale plan).
    #[error("migration error: {0}")]
    MigrationError(String),

    /// No row with the given primary key.
    #[error("{entity} with id {id} not found")]
    NotFound { entity: String, id: i64 },

    /// Operation on a database handle that has been closed.
    #[error("{operation} attempted on a closed database handle")]
    DetachedAccess { operation: &'static str },

    /// Unique, foreign key or NOT NULL constraint failure.
    #[error("constraint violation: {0}")]
    ConstraintViolation(String),

    /// Entity type is not declared in the model.
    #[error("unknown entity: {0}")]
    UnknownEntity(String),

    /// Relationship is not declared, or leads to a different entity.
    #[error("{entity} has no relationship '{relationship}' to {target}")]
    UnknownRelationship {
        entity: String,
        relationship: String,
        target: String,
    },

    /// Relationship exists but does not support the operation.
    #[error("relationship {entity}.{relationship} is not many-to-many")]
    NotManyToMany {
        entity: String,
        relationship: String,
    },

    /// Column is not declared on the entity.
    #[error("{entity} has no column '{column}'")]
    UnknownColumn { entity: String, column: String },

    /// A change refers to a row the change set does not provide.
    #[error("invalid change: {0}")]
    InvalidChange(String),

    /// Entity has no primary key yet.
    #[error("{0} has not been saved")]
    UnsavedEntity(String),

    /// Row could not be mapped to or from an entity.
    #[error("conversion error: {0}")]
    ConversionError(#[from] RecordError),

    /// Configuration could not be loaded or is invalid.
    #[error("config error: {0}")]
    ConfigError(#[from] ConfigError),

    /// Model snapshot serialization failure.
    #[error("serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),

    /// File I/O failure.
    #[error("I/O error: {0}")]
    IoError(#[from] std::io::Error),
}

impl From<rusqlite::Error> for StoreError {
    fn from(err: rusqlite::Error) -> Self {
        match err {
            rusqlite::Error::SqliteFailure(code, message)
                if code.code == rusqlite::ErrorCode::ConstraintViolation =>
            {
                StoreError::ConstraintViolation(message.unwrap_or_else(|| code.to_string()))
            }
            other => StoreError::DatabaseError(other),
        }
    }
}

/// Convenience alias for results with [`StoreError`].
pub type Result<T> = std::result::Result<T, StoreError>;
