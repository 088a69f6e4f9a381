//! Migration planning: diffs the declared model against the persisted schema.
//!
//! The planner is additive only. It creates missing tables, adds missing
//! columns and creates missing foreign-key indexes; it never drops or
//! alters anything that already exists. Columns that are in the database
//! but no longer in the model are left in place.
//!
//! Steps come out in entity declaration order, with join tables after all
//! entities. A table whose foreign key targets an entity that neither exists
//! nor is created earlier in the plan is a [`PlanningError`].
//!
//! # Example
//!
//! ```
//! use entity_store_core::catalog;
//! use entity_store_sqlite::{PersistedSchema, plan};
//!
//! let plan = plan(&catalog::blog_model(), &PersistedSchema::empty()).unwrap();
//! let described: Vec<_> = plan.steps.iter().map(|s| s.describe()).collect();
//! assert_eq!(described[0], "create table Blogs");
//! assert_eq!(plan.target_version(), 1);
//! ```

use std::collections::HashSet;

use entity_store_core::{EntityDef, FieldDef, OnDelete, SchemaModel, Value};
use serde::Serialize;
use thiserror::Error;
use tracing::{debug, warn};

use crate::introspect::PersistedSchema;
use crate::schema::{quote_ident, quote_list};

/// Inconsistent migration plan.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PlanningError {
    /// A foreign key targets a table that is neither present nor scheduled
    /// earlier in the plan.
    #[error("table {table} references {target}, which is not created before it")]
    UnscheduledTarget { table: String, target: String },

    /// A foreign key targets an entity missing from the model.
    #[error("table {table} references undeclared entity {entity}")]
    UnknownTarget { table: String, entity: String },

    /// A required foreign-key column cannot be added to an existing table:
    /// existing rows would have no valid value for it.
    #[error("cannot add required foreign key column {table}.{column} to an existing table")]
    RequiredForeignKeyOnExistingTable { table: String, column: String },
}

/// Column definition within a step.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ColumnSpec {
    pub name: String,
    pub sql_type: String,
    pub not_null: bool,
    pub default: Option<Value>,
}

impl ColumnSpec {
    fn from_field(field: &FieldDef) -> Self {
        Self {
            name: field.name.clone(),
            sql_type: field.field_type.sql_type().to_string(),
            not_null: field.required,
            default: field.default.clone(),
        }
    }

    fn to_sql(&self) -> String {
        let mut sql = format!("{} {}", quote_ident(&self.name), self.sql_type);
        if self.not_null {
            sql.push_str(" NOT NULL");
        }
        if let Some(default) = &self.default {
            sql.push_str(" DEFAULT ");
            sql.push_str(&default.to_sql_literal());
        }
        sql
    }
}

/// Foreign key constraint within a step.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ForeignKeySpec {
    pub column: String,
    pub target_table: String,
    pub target_column: String,
    pub on_delete: OnDelete,
}

impl ForeignKeySpec {
    fn references_sql(&self) -> String {
        format!(
            "REFERENCES {}({}) ON DELETE {}",
            quote_ident(&self.target_table),
            quote_ident(&self.target_column),
            self.on_delete.sql()
        )
    }
}

/// A single DDL operation.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum MigrationStep {
    /// Creates a table that does not exist yet.
    CreateTable {
        table: String,
        /// Integer primary key column; `None` for join tables.
        primary_key: Option<String>,
        columns: Vec<ColumnSpec>,
        foreign_keys: Vec<ForeignKeySpec>,
        /// Columns covered by one composite `UNIQUE` constraint.
        unique: Vec<String>,
    },
    /// Adds a column to an existing table.
    AddColumn {
        table: String,
        column: ColumnSpec,
        references: Option<ForeignKeySpec>,
    },
    /// Creates an index.
    CreateIndex {
        name: String,
        table: String,
        columns: Vec<String>,
        unique: bool,
    },
}

impl MigrationStep {
    /// Table the step operates on.
    pub fn table(&self) -> &str {
        match self {
            MigrationStep::CreateTable { table, .. }
            | MigrationStep::AddColumn { table, .. }
            | MigrationStep::CreateIndex { table, .. } => table,
        }
    }

    /// One-line human-readable summary.
    pub fn describe(&self) -> String {
        match self {
            MigrationStep::CreateTable { table, .. } => format!("create table {table}"),
            MigrationStep::AddColumn { table, column, .. } => {
                format!("add column {table}.{}", column.name)
            }
            MigrationStep::CreateIndex {
                name,
                table,
                columns,
                unique,
            } => format!(
                "create {}index {name} on {table}({})",
                if *unique { "unique " } else { "" },
                columns.join(", ")
            ),
        }
    }

    /// Renders the step as a single SQL statement.
    pub fn to_sql(&self) -> String {
        match self {
            MigrationStep::CreateTable {
                table,
                primary_key,
                columns,
                foreign_keys,
                unique,
            } => {
                let mut defs = Vec::new();
                if let Some(pk) = primary_key {
                    defs.push(format!("{} INTEGER PRIMARY KEY", quote_ident(pk)));
                }
                defs.extend(columns.iter().map(ColumnSpec::to_sql));
                for fk in foreign_keys {
                    defs.push(format!(
                        "FOREIGN KEY ({}) {}",
                        quote_ident(&fk.column),
                        fk.references_sql()
                    ));
                }
                if !unique.is_empty() {
                    defs.push(format!("UNIQUE ({})", quote_list(unique.iter().map(String::as_str))));
                }
                format!(
                    "CREATE TABLE {} (\n    {}\n)",
                    quote_ident(table),
                    defs.join(",\n    ")
                )
            }
            MigrationStep::AddColumn {
                table,
                column,
                references,
            } => {
                let mut sql = format!(
                    "ALTER TABLE {} ADD COLUMN {}",
                    quote_ident(table),
                    column.to_sql()
                );
                if let Some(fk) = references {
                    sql.push(' ');
                    sql.push_str(&fk.references_sql());
                }
                sql
            }
            MigrationStep::CreateIndex {
                name,
                table,
                columns,
                unique,
            } => format!(
                "CREATE {}INDEX {} ON {} ({})",
                if *unique { "UNIQUE " } else { "" },
                quote_ident(name),
                quote_ident(table),
                quote_list(columns.iter().map(String::as_str))
            ),
        }
    }
}

/// Ordered list of steps that brings a database in line with the model.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MigrationPlan {
    /// Latest applied version when the plan was made.
    pub base_version: Option<i64>,
    /// Steps, in application order.
    pub steps: Vec<MigrationStep>,
}

impl MigrationPlan {
    /// Returns `true` if the database already matches the model.
    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    /// Number of steps.
    pub fn len(&self) -> usize {
        self.steps.len()
    }

    /// Version that applying this plan records.
    pub fn target_version(&self) -> i64 {
        self.base_version.unwrap_or(0) + 1
    }

    /// The whole plan as an SQL script.
    pub fn to_sql(&self) -> String {
        self.steps
            .iter()
            .map(|s| format!("{};\n", s.to_sql()))
            .collect()
    }
}

/// Name of the index created for a foreign-key column.
pub(crate) fn index_name(table: &str, column: &str) -> String {
    format!("IX_{table}_{column}")
}

/// Plans the steps that transform `persisted` into a schema consistent
/// with `model`.
///
/// # Errors
///
/// Returns [`PlanningError`] if a foreign key's target is not created
/// before the referencing table, or if a required foreign key would have
/// to be added to an existing table.
pub fn plan(model: &SchemaModel, persisted: &PersistedSchema) -> Result<MigrationPlan, PlanningError> {
    let mut steps = Vec::new();
    let mut available: HashSet<String> = persisted
        .tables
        .keys()
        .map(|t| t.to_ascii_lowercase())
        .collect();

    for entity in model.entities() {
        match persisted.columns(&entity.table) {
            None => {
                let foreign_keys = foreign_key_specs(model, entity, &available)?;
                steps.push(MigrationStep::CreateTable {
                    table: entity.table.clone(),
                    primary_key: Some(entity.primary_key.clone()),
                    columns: entity.fields.iter().map(ColumnSpec::from_field).collect(),
                    foreign_keys,
                    unique: Vec::new(),
                });
                available.insert(entity.table.to_ascii_lowercase());
            }
            Some(existing) => {
                for field in &entity.fields {
                    if existing.iter().any(|c| c.eq_ignore_ascii_case(&field.name)) {
                        continue;
                    }
                    steps.push(add_column_step(model, entity, field, &available)?);
                }
                for column in existing {
                    if !entity.column_names().any(|c| c.eq_ignore_ascii_case(column)) {
                        warn!(
                            table = %entity.table,
                            column = %column,
                            "column not in model; leaving it in place"
                        );
                    }
                }
            }
        }

        for fk in &entity.foreign_keys {
            let name = index_name(&entity.table, &fk.column);
            if !persisted.has_index(&name) {
                steps.push(MigrationStep::CreateIndex {
                    name,
                    table: entity.table.clone(),
                    columns: vec![fk.column.clone()],
                    unique: false,
                });
            }
        }
    }

    for join in model.join_tables() {
        let mut foreign_keys = Vec::new();
        for side in [&join.left, &join.right] {
            let target = model
                .entity(&side.entity)
                .ok_or_else(|| PlanningError::UnknownTarget {
                    table: join.table.clone(),
                    entity: side.entity.clone(),
                })?;
            if !available.contains(&target.table.to_ascii_lowercase()) {
                return Err(PlanningError::UnscheduledTarget {
                    table: join.table.clone(),
                    target: target.table.clone(),
                });
            }
            foreign_keys.push(ForeignKeySpec {
                column: side.column.clone(),
                target_table: target.table.clone(),
                target_column: target.primary_key.clone(),
                on_delete: OnDelete::Cascade,
            });
        }

        match persisted.columns(&join.table) {
            None => {
                steps.push(MigrationStep::CreateTable {
                    table: join.table.clone(),
                    primary_key: None,
                    columns: foreign_keys
                        .iter()
                        .map(|fk| ColumnSpec {
                            name: fk.column.clone(),
                            sql_type: "INTEGER".to_string(),
                            not_null: true,
                            default: None,
                        })
                        .collect(),
                    foreign_keys,
                    unique: vec![join.left.column.clone(), join.right.column.clone()],
                });
                available.insert(join.table.to_ascii_lowercase());
            }
            Some(existing) => {
                for side in [&join.left, &join.right] {
                    if !existing.iter().any(|c| c.eq_ignore_ascii_case(&side.column)) {
                        return Err(PlanningError::RequiredForeignKeyOnExistingTable {
                            table: join.table.clone(),
                            column: side.column.clone(),
                        });
                    }
                }
            }
        }

        // The composite UNIQUE index covers lookups by the left column.
        let name = index_name(&join.table, &join.right.column);
        if !persisted.has_index(&name) {
            steps.push(MigrationStep::CreateIndex {
                name,
                table: join.table.clone(),
                columns: vec![join.right.column.clone()],
                unique: false,
            });
        }
    }

    for step in &steps {
        debug!(step = %step.describe(), "planned migration step");
    }

    Ok(MigrationPlan {
        base_version: persisted.latest_version(),
        steps,
    })
}

fn foreign_key_specs(
    model: &SchemaModel,
    entity: &EntityDef,
    available: &HashSet<String>,
) -> Result<Vec<ForeignKeySpec>, PlanningError> {
    entity
        .foreign_keys
        .iter()
        .map(|fk| {
            let target = model
                .entity(&fk.target)
                .ok_or_else(|| PlanningError::UnknownTarget {
                    table: entity.table.clone(),
                    entity: fk.target.clone(),
                })?;
            let self_reference = target.table.eq_ignore_ascii_case(&entity.table);
            if !self_reference && !available.contains(&target.table.to_ascii_lowercase()) {
                return Err(PlanningError::UnscheduledTarget {
                    table: entity.table.clone(),
                    target: target.table.clone(),
                });
            }
            Ok(ForeignKeySpec {
                column: fk.column.clone(),
                target_table: target.table.clone(),
                target_column: target.primary_key.clone(),
                on_delete: fk.on_delete,
            })
        })
        .collect()
}

fn add_column_step(
    model: &SchemaModel,
    entity: &EntityDef,
    field: &FieldDef,
    available: &HashSet<String>,
) -> Result<MigrationStep, PlanningError> {
    let mut column = ColumnSpec::from_field(field);
    let references = match entity.foreign_key(&field.name) {
        Some(fk) => {
            if field.required && field.default.is_none() {
                return Err(PlanningError::RequiredForeignKeyOnExistingTable {
                    table: entity.table.clone(),
                    column: field.name.clone(),
                });
            }
            let mut specs = foreign_key_specs(model, entity, available)?;
            specs.retain(|s| s.column == fk.column);
            specs.pop()
        }
        None => None,
    };
    // SQLite rejects NOT NULL columns without a default on ALTER TABLE.
    if column.not_null && column.default.is_none() {
        column.default = Some(field.field_type.zero_value());
    }
    Ok(MigrationStep::AddColumn {
        table: entity.table.clone(),
        column,
        references,
    })
}
