//! Migration lifecycle operations: plan, apply, history, status, down.
//!
//! [`Migrator`] executes a [`MigrationPlan`] inside one transaction. If any
//! step fails the transaction is rolled back, so no partial schema change
//! survives and the database stays at its prior version. On success a row
//! is appended to the `SchemaVersion` tracking table before commit.
//!
//! # Example
//!
//! ```
//! use entity_store_core::catalog;
//! use entity_store_sqlite::Migrator;
//! use rusqlite::Connection;
//!
//! let mut conn = Connection::open_in_memory().unwrap();
//! let model = catalog::blog_model();
//! let mut migrator = Migrator::new(&mut conn, "rusqlite");
//!
//! let outcome = migrator.migrate(&model).unwrap();
//! assert_eq!(outcome.to_version, Some(1));
//!
//! // Nothing left to do the second time
//! assert!(migrator.plan(&model).unwrap().is_empty());
//! ```

use chrono::Utc;
use entity_store_core::{SCHEMA_VERSION_TABLE, SchemaModel};
use rusqlite::{Connection, params};
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::error::{Result, StoreError};
use crate::introspect::{self, PersistedSchema};
use crate::planner::{self, MigrationPlan};
use crate::schema::{drop_sql, quote_ident, tracking_table_sql};

/// Applies migration plans against a connection.
///
/// The provider name is an explicit parameter, recorded on every applied
/// migration.
pub struct Migrator<'a> {
    conn: &'a mut Connection,
    provider: String,
}

impl<'a> Migrator<'a> {
    /// Creates a migrator for `conn`, recording `provider` on applied
    /// migrations.
    pub fn new(conn: &'a mut Connection, provider: impl Into<String>) -> Self {
        Self {
            conn,
            provider: provider.into(),
        }
    }

    /// Reads the current persisted schema.
    pub fn persisted(&self) -> Result<PersistedSchema> {
        PersistedSchema::read(&*self.conn)
    }

    /// Plans the steps needed to bring the database in line with `model`.
    pub fn plan(&self, model: &SchemaModel) -> Result<MigrationPlan> {
        let persisted = self.persisted()?;
        Ok(planner::plan(model, &persisted)?)
    }

    /// Plans and applies in one call.
    pub fn migrate(&mut self, model: &SchemaModel) -> Result<MigrationOutcome> {
        let plan = self.plan(model)?;
        self.apply(&plan, model)
    }

    /// Applies `plan` in a single transaction.
    ///
    /// An empty plan is a no-op and records nothing.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::MigrationFailed`] naming the failing step (the
    /// transaction is rolled back), or [`StoreError::MigrationError`] if the
    /// database moved past `plan.base_version` since the plan was made.
    pub fn apply(&mut self, plan: &MigrationPlan, model: &SchemaModel) -> Result<MigrationOutcome> {
        if plan.is_empty() {
            debug!(version = ?plan.base_version, "schema up to date; nothing to apply");
            return Ok(MigrationOutcome::unchanged(plan.base_version));
        }

        let snapshot = model.snapshot()?;
        let model_hash = model.fingerprint()?;

        let tx = self.conn.transaction()?;
        tx.execute_batch(&tracking_table_sql())?;

        let current = introspect::latest_version(&tx)?;
        if current != plan.base_version {
            return Err(StoreError::MigrationError(format!(
                "stale plan: planned against version {:?}, database is at {:?}",
                plan.base_version, current
            )));
        }

        for (index, step) in plan.steps.iter().enumerate() {
            debug!(index, step = %step.describe(), "applying migration step");
            if let Err(source) = tx.execute_batch(&step.to_sql()) {
                warn!(index, step = %step.describe(), error = %source, "migration step failed; rolling back");
                return Err(StoreError::MigrationFailed {
                    index,
                    step: step.describe(),
                    source,
                });
            }
        }

        let version = current.unwrap_or(0) + 1;
        let applied_at = Utc::now();
        let name = format!("{}_v{version}_automatic", applied_at.format("%Y%m%d%H%M%S"));
        tx.execute(
            &format!(
                "INSERT INTO {} (version, migration_name, provider, model_hash, model_snapshot, step_count, applied_at) \
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
                quote_ident(SCHEMA_VERSION_TABLE)
            ),
            params![
                version,
                name,
                self.provider,
                model_hash,
                snapshot,
                plan.steps.len() as i64,
                applied_at.to_rfc3339(),
            ],
        )?;
        tx.commit()?;

        info!(version, steps = plan.steps.len(), name = %name, "migration applied");
        Ok(MigrationOutcome {
            applied: true,
            from_version: current,
            to_version: Some(version),
            step_count: plan.steps.len(),
            migration_name: Some(name),
        })
    }

    /// Lists applied migrations, oldest first. Empty if the tracking table
    /// does not exist.
    pub fn history(&self) -> Result<Vec<AppliedMigration>> {
        Ok(self.persisted()?.history.unwrap_or_default())
    }

    /// Returns the model snapshot recorded with `version`.
    pub fn snapshot(&self, version: i64) -> Result<Option<String>> {
        if introspect::latest_version(&*self.conn)?.is_none() {
            return Ok(None);
        }
        let mut stmt = self.conn.prepare(&format!(
            "SELECT model_snapshot FROM {} WHERE version = ?1",
            quote_ident(SCHEMA_VERSION_TABLE)
        ))?;
        let mut rows = stmt.query_map([version], |row| row.get::<_, String>(0))?;
        Ok(rows.next().transpose()?)
    }

    /// Returns the current status of the database relative to `model`.
    pub fn status(&self, model: &SchemaModel) -> Result<MigrationStatus> {
        let persisted = self.persisted()?;
        let pending_steps = planner::plan(model, &persisted)?.len();
        let tables_exist = model.table_names().all(|t| persisted.has_table(t));
        let fingerprint = model.fingerprint()?;
        let model_matches = persisted
            .latest()
            .is_some_and(|m| m.model_hash == fingerprint);

        let mut row_counts = Vec::new();
        for table in model.table_names() {
            if persisted.has_table(table) {
                row_counts.push((table.to_string(), self.count_rows(table)?));
            }
        }

        Ok(MigrationStatus {
            tables_exist,
            current_version: persisted.latest_version(),
            pending_steps,
            model_matches,
            row_counts,
        })
    }

    /// Drops every model table and the tracking table.
    ///
    /// Uses `DROP TABLE IF EXISTS`, so it is safe to call on a database that
    /// was never migrated. Executes within a transaction for atomicity.
    pub fn down(&mut self, model: &SchemaModel) -> Result<()> {
        let sql = drop_sql(model);
        let tx = self.conn.transaction()?;
        tx.execute_batch(&sql)
            .map_err(|e| StoreError::MigrationError(format!("failed to drop tables: {e}")))?;
        tx.commit()?;
        info!("dropped all model tables");
        Ok(())
    }

    fn count_rows(&self, table: &str) -> Result<usize> {
        let count: i64 = self.conn.query_row(
            &format!("SELECT COUNT(*) FROM {}", quote_ident(table)),
            [],
            |row| row.get(0),
        )?;
        Ok(count as usize)
    }
}

/// One row of the `SchemaVersion` tracking table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AppliedMigration {
    /// Migration number, strictly increasing.
    pub version: i64,
    /// Generated migration name.
    pub name: String,
    /// Provider name given to the applier.
    pub provider: String,
    /// SHA-256 fingerprint of the model that was applied.
    pub model_hash: String,
    /// Number of steps executed.
    pub step_count: usize,
    /// RFC 3339 timestamp.
    pub applied_at: String,
}

/// Result of [`Migrator::apply`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MigrationOutcome {
    /// Whether anything was executed.
    pub applied: bool,
    /// Version before the migration.
    pub from_version: Option<i64>,
    /// Version after the migration.
    pub to_version: Option<i64>,
    /// Number of steps executed.
    pub step_count: usize,
    /// Name recorded in the tracking table.
    pub migration_name: Option<String>,
}

impl MigrationOutcome {
    fn unchanged(version: Option<i64>) -> Self {
        Self {
            applied: false,
            from_version: version,
            to_version: version,
            step_count: 0,
            migration_name: None,
        }
    }
}

/// Status of the database relative to a model.
///
/// Returned by [`Migrator::status`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MigrationStatus {
    /// Whether every model table exists.
    pub tables_exist: bool,
    /// Latest applied version.
    pub current_version: Option<i64>,
    /// Number of steps a migration would run now.
    pub pending_steps: usize,
    /// Whether the latest migration was recorded with this exact model.
    pub model_matches: bool,
    /// Row count per existing model table, in declaration order.
    pub row_counts: Vec<(String, usize)>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::planner::{ColumnSpec, MigrationStep};
    use entity_store_core::catalog;

    fn create(table: &str) -> MigrationStep {
        MigrationStep::CreateTable {
            table: table.to_string(),
            primary_key: Some("id".to_string()),
            columns: vec![ColumnSpec {
                name: "name".to_string(),
                sql_type: "TEXT".to_string(),
                not_null: true,
                default: None,
            }],
            foreign_keys: Vec::new(),
            unique: Vec::new(),
        }
    }

    #[test]
    fn test_status_on_empty_database() {
        let mut conn = Connection::open_in_memory().unwrap();
        let migrator = Migrator::new(&mut conn, "rusqlite");
        let status = migrator.status(&catalog::blog_model()).unwrap();
        assert!(!status.tables_exist);
        assert_eq!(status.current_version, None);
        assert_eq!(status.pending_steps, 6);
        assert!(!status.model_matches);
        assert!(status.row_counts.is_empty());
    }

    #[test]
    fn test_migrate_and_status() {
        let mut conn = Connection::open_in_memory().unwrap();
        let model = catalog::blog_model();
        let mut migrator = Migrator::new(&mut conn, "rusqlite");
        let outcome = migrator.migrate(&model).unwrap();
        assert!(outcome.applied);
        assert_eq!(outcome.from_version, None);
        assert_eq!(outcome.step_count, 6);

        let status = migrator.status(&model).unwrap();
        assert!(status.tables_exist);
        assert_eq!(status.current_version, Some(1));
        assert_eq!(status.pending_steps, 0);
        assert!(status.model_matches);
        assert_eq!(status.row_counts.len(), 4);
    }

    #[test]
    fn test_migrate_is_idempotent() {
        let mut conn = Connection::open_in_memory().unwrap();
        let model = catalog::blog_model();
        let mut migrator = Migrator::new(&mut conn, "rusqlite");
        migrator.migrate(&model).unwrap();

        let second = migrator.migrate(&model).unwrap();
        assert!(!second.applied);
        assert_eq!(second.to_version, Some(1));
        assert_eq!(migrator.history().unwrap().len(), 1);
    }

    #[test]
    fn test_failed_step_rolls_back_everything() {
        let mut conn = Connection::open_in_memory().unwrap();
        let model = catalog::blog_model();
        let mut migrator = Migrator::new(&mut conn, "rusqlite");
        let plan = MigrationPlan {
            base_version: None,
            steps: vec![create("Blogs"), create("Blogs")],
        };

        let err = migrator.apply(&plan, &model).unwrap_err();
        match err {
            StoreError::MigrationFailed { index, step, .. } => {
                assert_eq!(index, 1);
                assert_eq!(step, "create table Blogs");
            }
            other => panic!("unexpected error: {other}"),
        }

        let persisted = migrator.persisted().unwrap();
        assert!(!persisted.has_table("Blogs"));
        assert!(persisted.history.is_none());
    }

    #[test]
    fn test_stale_plan_is_rejected() {
        let mut conn = Connection::open_in_memory().unwrap();
        let model = catalog::blog_model();
        let mut migrator = Migrator::new(&mut conn, "rusqlite");
        let stale = migrator.plan(&model).unwrap();
        migrator.migrate(&model).unwrap();

        let err = migrator.apply(&stale, &model).unwrap_err();
        assert!(matches!(err, StoreError::MigrationError(ref m) if m.contains("stale plan")));
        assert_eq!(migrator.history().unwrap().len(), 1);
    }

    #[test]
    fn test_history_records_provider_and_snapshot() {
        let mut conn = Connection::open_in_memory().unwrap();
        let model = catalog::blog_model();
        let mut migrator = Migrator::new(&mut conn, "System.Data.SQLite");
        migrator.migrate(&model).unwrap();

        let history = migrator.history().unwrap();
        assert_eq!(history[0].version, 1);
        assert_eq!(history[0].provider, "System.Data.SQLite");
        assert_eq!(history[0].model_hash, model.fingerprint().unwrap());
        assert!(history[0].name.ends_with("_v1_automatic"));
        assert_eq!(migrator.snapshot(1).unwrap(), Some(model.snapshot().unwrap()));
        assert_eq!(migrator.snapshot(2).unwrap(), None);
    }

    #[test]
    fn test_down_removes_tables() {
        let mut conn = Connection::open_in_memory().unwrap();
        let model = catalog::blog_model();
        let mut migrator = Migrator::new(&mut conn, "rusqlite");
        migrator.migrate(&model).unwrap();
        migrator.down(&model).unwrap();

        let persisted = migrator.persisted().unwrap();
        assert!(persisted.tables.is_empty());
        migrator.down(&model).unwrap();
    }
}
