//! Schema model validation.
//!
//! Validates structural invariants of a [`SchemaModel`]: identifier syntax,
//! unique entity/table/field names, and that every relationship, foreign key
//! and join table refers to declared entities and columns.
//!
//! # Examples
//!
//! ```
//! use entity_store_core::*;
//!
//! let errors = validate_model(&catalog::blog_model());
//! assert!(errors.is_empty());
//!
//! // A relationship to an undeclared entity is rejected at build time
//! let result = SchemaModel::builder()
//!     .entity(EntityDef::new("Blog", "Blogs").with_has_many("posts", "Post", "blogId"))
//!     .build();
//! assert!(matches!(result, Err(SchemaDefinitionError::UnknownEntity { .. })));
//! ```

use std::collections::HashSet;

use thiserror::Error;

use crate::model::SchemaModel;
use crate::types::{EntityDef, RelationKind};
use crate::value::Value;

/// Name of the migration-tracking table, reserved for the storage layer.
pub const SCHEMA_VERSION_TABLE: &str = "SchemaVersion";

/// Schema model validation errors.
///
/// Any of these is fatal at startup: the model cannot be planned.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SchemaDefinitionError {
    /// Name is empty or contains characters other than ASCII alphanumerics
    /// and underscores, or starts with a digit.
    #[error("invalid identifier '{0}'")]
    InvalidIdentifier(String),
    /// Two entities share a name.
    #[error("duplicate entity: {0}")]
    DuplicateEntity(String),
    /// Two entities or join tables map to the same table.
    #[error("duplicate table name: {0}")]
    DuplicateTable(String),
    /// Table name collides with a storage-internal table.
    #[error("table name '{0}' is reserved")]
    ReservedTable(String),
    /// Two columns of one entity share a name (including the primary key).
    #[error("duplicate field '{field}' in entity {entity}")]
    DuplicateField { entity: String, field: String },
    /// Two navigations of one entity share a name.
    #[error("duplicate relationship '{relationship}' in entity {entity}")]
    DuplicateRelationship {
        entity: String,
        relationship: String,
    },
    /// A relationship, foreign key or join side names an undeclared entity.
    #[error("{referenced_by} references undeclared entity '{name}'")]
    UnknownEntity { referenced_by: String, name: String },
    /// A foreign key or relationship names a column the entity lacks.
    #[error("entity {entity} has no column '{column}'")]
    UnknownColumn { entity: String, column: String },
    /// A declared default cannot be written as an SQL literal.
    #[error("field '{field}' in entity {entity} has unusable default {value}")]
    InvalidDefault {
        entity: String,
        field: String,
        value: String,
    },
    /// A many-to-many relationship names an undeclared join table.
    #[error("{referenced_by} references undeclared join table '{join_table}'")]
    UnknownJoinTable {
        referenced_by: String,
        join_table: String,
    },
    /// A join table does not connect the two entities of a relationship.
    #[error("join table '{join_table}' does not connect {entity} and {target}")]
    JoinTableMismatch {
        join_table: String,
        entity: String,
        target: String,
    },
}

/// Checks that `name` is usable as an unescaped SQL identifier.
///
/// # Examples
///
/// ```
/// use entity_store_core::is_valid_identifier;
///
/// assert!(is_valid_identifier("PostCategories"));
/// assert!(is_valid_identifier("blog_id"));
/// assert!(!is_valid_identifier(""));
/// assert!(!is_valid_identifier("1posts"));
/// assert!(!is_valid_identifier("drop;--"));
/// ```
pub fn is_valid_identifier(name: &str) -> bool {
    let mut chars = name.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

/// Validates a full schema model.
///
/// Returns every problem found, in declaration order. An empty vector means
/// the model is consistent.
pub fn validate_model(model: &SchemaModel) -> Vec<SchemaDefinitionError> {
    let mut errors = Vec::new();
    let mut entity_names = HashSet::new();
    let mut table_names = HashSet::new();

    for entity in model.entities() {
        for ident in [&entity.name, &entity.table, &entity.primary_key] {
            if !is_valid_identifier(ident) {
                errors.push(SchemaDefinitionError::InvalidIdentifier(ident.clone()));
            }
        }
        if !entity_names.insert(entity.name.as_str()) {
            errors.push(SchemaDefinitionError::DuplicateEntity(entity.name.clone()));
        }
        check_table_name(&entity.table, &mut table_names, &mut errors);
        validate_entity(model, entity, &mut errors);
    }

    for join in model.join_tables() {
        if !is_valid_identifier(&join.table) {
            errors.push(SchemaDefinitionError::InvalidIdentifier(join.table.clone()));
        }
        check_table_name(&join.table, &mut table_names, &mut errors);
        for side in [&join.left, &join.right] {
            if !is_valid_identifier(&side.column) {
                errors.push(SchemaDefinitionError::InvalidIdentifier(side.column.clone()));
            }
            if model.entity(&side.entity).is_none() {
                errors.push(SchemaDefinitionError::UnknownEntity {
                    referenced_by: join.table.clone(),
                    name: side.entity.clone(),
                });
            }
        }
        if join.left.column == join.right.column {
            errors.push(SchemaDefinitionError::DuplicateField {
                entity: join.table.clone(),
                field: join.left.column.clone(),
            });
        }
    }

    errors
}

fn check_table_name<'a>(
    table: &'a str,
    seen: &mut HashSet<&'a str>,
    errors: &mut Vec<SchemaDefinitionError>,
) {
    if table.eq_ignore_ascii_case(SCHEMA_VERSION_TABLE)
        || table.to_ascii_lowercase().starts_with("sqlite_")
    {
        errors.push(SchemaDefinitionError::ReservedTable(table.to_string()));
    }
    // SQLite table names are case-insensitive
    if !seen.insert(table) || seen.iter().filter(|t| t.eq_ignore_ascii_case(table)).count() > 1 {
        errors.push(SchemaDefinitionError::DuplicateTable(table.to_string()));
    }
}

fn validate_entity(model: &SchemaModel, entity: &EntityDef, errors: &mut Vec<SchemaDefinitionError>) {
    let mut columns = HashSet::from([entity.primary_key.as_str()]);
    for field in &entity.fields {
        if !is_valid_identifier(&field.name) {
            errors.push(SchemaDefinitionError::InvalidIdentifier(field.name.clone()));
        }
        if !columns.insert(field.name.as_str()) {
            errors.push(SchemaDefinitionError::DuplicateField {
                entity: entity.name.clone(),
                field: field.name.clone(),
            });
        }
        if let Some(Value::Real(r)) = &field.default {
            if !r.is_finite() {
                errors.push(SchemaDefinitionError::InvalidDefault {
                    entity: entity.name.clone(),
                    field: field.name.clone(),
                    value: r.to_string(),
                });
            }
        }
    }

    for fk in &entity.foreign_keys {
        if entity.field(&fk.column).is_none() {
            errors.push(SchemaDefinitionError::UnknownColumn {
                entity: entity.name.clone(),
                column: fk.column.clone(),
            });
        }
        if model.entity(&fk.target).is_none() {
            errors.push(SchemaDefinitionError::UnknownEntity {
                referenced_by: format!("{}.{}", entity.name, fk.column),
                name: fk.target.clone(),
            });
        }
    }

    let mut navigations = HashSet::new();
    for rel in &entity.relationships {
        let referenced_by = format!("{}.{}", entity.name, rel.name);
        if !navigations.insert(rel.name.as_str()) {
            errors.push(SchemaDefinitionError::DuplicateRelationship {
                entity: entity.name.clone(),
                relationship: rel.name.clone(),
            });
        }
        let Some(target) = model.entity(&rel.target) else {
            errors.push(SchemaDefinitionError::UnknownEntity {
                referenced_by,
                name: rel.target.clone(),
            });
            continue;
        };

        match &rel.kind {
            RelationKind::HasMany { foreign_key } => {
                if target.field(foreign_key).is_none() {
                    errors.push(SchemaDefinitionError::UnknownColumn {
                        entity: target.name.clone(),
                        column: foreign_key.clone(),
                    });
                }
            }
            RelationKind::BelongsTo { foreign_key } => {
                if entity.field(foreign_key).is_none() {
                    errors.push(SchemaDefinitionError::UnknownColumn {
                        entity: entity.name.clone(),
                        column: foreign_key.clone(),
                    });
                }
            }
            RelationKind::ManyToMany { join_table } => {
                let Some(join) = model.join_table(join_table) else {
                    errors.push(SchemaDefinitionError::UnknownJoinTable {
                        referenced_by,
                        join_table: join_table.clone(),
                    });
                    continue;
                };
                let connects = (join.left.entity == entity.name && join.right.entity == target.name)
                    || (join.right.entity == entity.name && join.left.entity == target.name);
                if !connects {
                    errors.push(SchemaDefinitionError::JoinTableMismatch {
                        join_table: join_table.clone(),
                        entity: entity.name.clone(),
                        target: target.name.clone(),
                    });
                }
            }
        }
    }
}
