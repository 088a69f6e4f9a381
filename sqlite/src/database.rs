//! The [`Database`] handle: one connection, one model, one configuration.
//!
//! Every operation goes through the handle. After [`Database::close`] the
//! handle is detached and each call fails with
//! [`StoreError::DetachedAccess`].

use std::path::{Path, PathBuf};

use entity_store_core::{Entity, SchemaModel, validate_model};
use rusqlite::Connection;
use tracing::{debug, info, warn};

use crate::config::StoreConfig;
use crate::error::{Result, StoreError};
use crate::mapper::{ChangeSet, Mapper, SaveReport};
use crate::migration::{AppliedMigration, MigrationOutcome, MigrationStatus, Migrator};
use crate::planner::MigrationPlan;
use crate::query::Query;
use crate::seed::{self, SeedReport};

/// An open entity store.
///
/// # Examples
///
/// ```
/// use entity_store_core::{Blog, Post, catalog};
/// use entity_store_sqlite::Database;
///
/// let mut db = Database::open_in_memory(catalog::blog_model()).unwrap();
/// db.run_migrations().unwrap();
///
/// let blog = db.insert(Blog::new("Dummy1")).unwrap();
/// let post = db.insert(Post::new("PostDummy1", blog.id.unwrap())).unwrap();
///
/// let owner: Vec<Blog> = db.load_related(&post, "blog").unwrap();
/// assert_eq!(owner, vec![blog]);
/// ```
pub struct Database {
    conn: Option<Connection>,
    model: SchemaModel,
    config: StoreConfig,
    path: Option<PathBuf>,
}

impl Database {
    /// Opens (creating if absent) the database file named by
    /// `config.database`.
    ///
    /// With `fresh_start` set, the file and its WAL side files are deleted
    /// first.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::ConfigError`] for invalid settings,
    /// [`StoreError::SchemaDefinition`] for an invalid model, or a database
    /// error if the file cannot be opened.
    pub fn open(config: &StoreConfig, model: SchemaModel) -> Result<Self> {
        config.validate()?;
        check_model(&model)?;

        let path = config.database.clone();
        if config.fresh_start {
            remove_database_files(&path)?;
        }

        let conn = Connection::open(&path)?;
        conn.execute_batch(&format!(
            "PRAGMA foreign_keys = ON; PRAGMA journal_mode = {};",
            config.journal_mode.pragma_value()
        ))?;
        info!(path = %path.display(), journal_mode = config.journal_mode.pragma_value(), "opened database");

        Ok(Self {
            conn: Some(conn),
            model,
            config: config.clone(),
            path: Some(path),
        })
    }

    /// Opens `path` with default settings.
    pub fn open_path(path: impl AsRef<Path>, model: SchemaModel) -> Result<Self> {
        Self::open(&StoreConfig::with_database(path.as_ref()), model)
    }

    /// Opens a private in-memory database.
    pub fn open_in_memory(model: SchemaModel) -> Result<Self> {
        check_model(&model)?;
        let conn = Connection::open_in_memory()?;
        conn.execute_batch("PRAGMA foreign_keys = ON;")?;
        debug!("opened in-memory database");
        Ok(Self {
            conn: Some(conn),
            model,
            config: StoreConfig::default(),
            path: None,
        })
    }

    /// The model this handle maps.
    pub fn model(&self) -> &SchemaModel {
        &self.model
    }

    /// Settings the handle was opened with.
    pub fn config(&self) -> &StoreConfig {
        &self.config
    }

    /// File path, `None` for in-memory databases.
    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// Returns `false` once [`close`](Self::close) has succeeded.
    pub fn is_open(&self) -> bool {
        self.conn.is_some()
    }

    /// Releases the connection. Later operations fail with
    /// [`StoreError::DetachedAccess`]; closing twice is a no-op.
    pub fn close(&mut self) -> Result<()> {
        if let Some(conn) = self.conn.take() {
            if let Err((conn, err)) = conn.close() {
                self.conn = Some(conn);
                return Err(err.into());
            }
            debug!("closed database");
        }
        Ok(())
    }

    // --- migrations ---

    /// Plans the steps needed to match the model, without applying them.
    pub fn plan_migrations(&mut self) -> Result<MigrationPlan> {
        let conn = live(&mut self.conn, "plan_migrations")?;
        Migrator::new(conn, self.config.provider_name.as_str()).plan(&self.model)
    }

    /// Plans and applies pending migrations, logging each step first.
    pub fn run_migrations(&mut self) -> Result<MigrationOutcome> {
        let conn = live(&mut self.conn, "run_migrations")?;
        let mut migrator = Migrator::new(conn, self.config.provider_name.as_str());
        let plan = migrator.plan(&self.model)?;
        for step in &plan.steps {
            info!(step = %step.describe(), "pending migration step");
        }
        migrator.apply(&plan, &self.model)
    }

    /// Applies a plan previously returned by [`plan_migrations`](Self::plan_migrations).
    pub fn apply_plan(&mut self, plan: &MigrationPlan) -> Result<MigrationOutcome> {
        let conn = live(&mut self.conn, "apply_plan")?;
        Migrator::new(conn, self.config.provider_name.as_str()).apply(plan, &self.model)
    }

    /// Current version, pending step count and table presence.
    pub fn status(&mut self) -> Result<MigrationStatus> {
        let conn = live(&mut self.conn, "status")?;
        Migrator::new(conn, self.config.provider_name.as_str()).status(&self.model)
    }

    /// Applied migrations, oldest first.
    pub fn history(&mut self) -> Result<Vec<AppliedMigration>> {
        let conn = live(&mut self.conn, "history")?;
        Migrator::new(conn, self.config.provider_name.as_str()).history()
    }

    /// Drops every model table and the migration history.
    pub fn reset(&mut self) -> Result<()> {
        let conn = live(&mut self.conn, "reset")?;
        warn!("dropping all tables");
        Migrator::new(conn, self.config.provider_name.as_str()).down(&self.model)
    }

    /// Inserts the sample catalog unless the Blogs table already has rows.
    pub fn seed_if_empty(&mut self) -> Result<SeedReport> {
        let conn = live(&mut self.conn, "seed_if_empty")?;
        seed::seed_if_empty(conn, &self.model)
    }

    // --- entities ---

    /// Inserts `entity` and returns it with its primary key set.
    pub fn insert<E: Entity>(&mut self, mut entity: E) -> Result<E> {
        let conn = live(&mut self.conn, "insert")?;
        let tx = conn.transaction()?;
        Mapper::new(&tx, &self.model).insert(&mut entity)?;
        tx.commit()?;
        Ok(entity)
    }

    /// Loads the `E` row with primary key `id`.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::NotFound`] if no row has primary key `id`.
    pub fn find_by_id<E: Entity>(&self, id: i64) -> Result<E> {
        let conn = live_ref(&self.conn, "find_by_id")?;
        Mapper::new(conn, &self.model).find_by_id(id)
    }

    /// Starts a [`Query`] over all `E` rows.
    pub fn query<E: Entity>(&self) -> Result<Query<'_, E>> {
        let conn = live_ref(&self.conn, "query")?;
        let def = Mapper::new(conn, &self.model).entity_def(E::ENTITY)?;
        Ok(Query::new(conn, def, self.config.page_size))
    }

    /// Loads the `R` entities reachable from `entity` through `relationship`.
    pub fn load_related<E: Entity, R: Entity>(&self, entity: &E, relationship: &str) -> Result<Vec<R>> {
        let conn = live_ref(&self.conn, "load_related")?;
        Mapper::new(conn, &self.model).load_related(entity, relationship)
    }

    /// Overwrites the stored row of a saved entity.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::UnsavedEntity`] if `entity` has no id, or
    /// [`StoreError::NotFound`] if its row does not exist.
    pub fn update<E: Entity>(&mut self, entity: &E) -> Result<()> {
        let conn = live(&mut self.conn, "update")?;
        let tx = conn.transaction()?;
        Mapper::new(&tx, &self.model).update(entity)?;
        tx.commit()?;
        Ok(())
    }

    /// Deletes the `E` row with primary key `id`; dependent rows cascade.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::NotFound`] if no row has primary key `id`.
    pub fn delete<E: Entity>(&mut self, id: i64) -> Result<()> {
        let conn = live(&mut self.conn, "delete")?;
        let tx = conn.transaction()?;
        Mapper::new(&tx, &self.model).delete::<E>(id)?;
        tx.commit()?;
        Ok(())
    }

    /// Links two saved entities through a many-to-many relationship.
    pub fn associate<E: Entity, R: Entity>(&mut self, entity: &E, relationship: &str, other: &R) -> Result<()> {
        let conn = live(&mut self.conn, "associate")?;
        let tx = conn.transaction()?;
        Mapper::new(&tx, &self.model).associate(entity, relationship, other)?;
        tx.commit()?;
        Ok(())
    }

    /// Removes a many-to-many link; returns `false` if it did not exist.
    pub fn dissociate<E: Entity, R: Entity>(&mut self, entity: &E, relationship: &str, other: &R) -> Result<bool> {
        let conn = live(&mut self.conn, "dissociate")?;
        let tx = conn.transaction()?;
        let removed = Mapper::new(&tx, &self.model).dissociate(entity, relationship, other)?;
        tx.commit()?;
        Ok(removed)
    }

    /// Applies `changes` in one transaction; any failure rolls back all of
    /// them.
    pub fn save(&mut self, changes: ChangeSet) -> Result<SaveReport> {
        let conn = live(&mut self.conn, "save")?;
        let tx = conn.transaction()?;
        let report = Mapper::new(&tx, &self.model).save(&changes)?;
        tx.commit()?;
        debug!(changes = changes.len(), "saved change set");
        Ok(report)
    }

    /// Number of `E` rows.
    pub fn count<E: Entity>(&self) -> Result<usize> {
        let conn = live_ref(&self.conn, "count")?;
        Mapper::new(conn, &self.model).count::<E>()
    }
}

fn live<'c>(conn: &'c mut Option<Connection>, operation: &'static str) -> Result<&'c mut Connection> {
    conn.as_mut().ok_or(StoreError::DetachedAccess { operation })
}

fn live_ref<'c>(conn: &'c Option<Connection>, operation: &'static str) -> Result<&'c Connection> {
    conn.as_ref().ok_or(StoreError::DetachedAccess { operation })
}

fn check_model(model: &SchemaModel) -> Result<()> {
    match validate_model(model).into_iter().next() {
        Some(err) => Err(err.into()),
        None => Ok(()),
    }
}

fn remove_database_files(path: &Path) -> Result<()> {
    let mut candidates = vec![path.to_path_buf()];
    for suffix in ["-wal", "-shm"] {
        let mut side = path.as_os_str().to_owned();
        side.push(suffix);
        candidates.push(PathBuf::from(side));
    }
    for file in candidates {
        match std::fs::remove_file(&file) {
            Ok(()) => info!(path = %file.display(), "removed old database file"),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {}
            Err(err) => return Err(err.into()),
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use entity_store_core::{Blog, Category, Post, catalog};

    fn migrated() -> Database {
        let mut db = Database::open_in_memory(catalog::blog_model()).unwrap();
        db.run_migrations().unwrap();
        db
    }

    #[test]
    fn test_operations_after_close_are_detached() {
        let mut db = migrated();
        let blog = db.insert(Blog::new("Dummy1")).unwrap();
        db.close().unwrap();
        assert!(!db.is_open());
        db.close().unwrap();

        assert!(matches!(
            db.find_by_id::<Blog>(1),
            Err(StoreError::DetachedAccess { operation: "find_by_id" })
        ));
        assert!(matches!(
            db.load_related::<_, Post>(&blog, "posts"),
            Err(StoreError::DetachedAccess { operation: "load_related" })
        ));
        assert!(matches!(
            db.run_migrations(),
            Err(StoreError::DetachedAccess { operation: "run_migrations" })
        ));
        assert!(db.query::<Blog>().is_err());
    }

    #[test]
    fn test_failed_change_set_rolls_back() {
        let mut db = migrated();
        let changes = ChangeSet::new()
            .insert(&Blog::with_id(1, "Dummy1"))
            .insert(&Post::new("orphan", 99));

        let err = db.save(changes).unwrap_err();
        assert!(matches!(err, StoreError::ConstraintViolation(_)));
        assert_eq!(db.count::<Blog>().unwrap(), 0);
        assert_eq!(db.count::<Post>().unwrap(), 0);
    }

    #[test]
    fn test_deleting_blog_cascades() {
        let mut db = migrated();
        db.seed_if_empty().unwrap();
        db.delete::<Blog>(1).unwrap();

        assert_eq!(db.count::<Blog>().unwrap(), 3);
        assert_eq!(db.count::<Post>().unwrap(), 3);
        let ruby = db.find_by_id::<Category>(3).unwrap();
        let tagged: Vec<Post> = db.load_related(&ruby, "posts").unwrap();
        assert!(tagged.is_empty());
    }

    #[test]
    fn test_invalid_config_is_rejected() {
        let config = StoreConfig {
            page_size: 0,
            ..StoreConfig::default()
        };
        let err = Database::open(&config, catalog::blog_model()).err().unwrap();
        assert!(matches!(err, StoreError::ConfigError(_)));
    }

    #[test]
    fn test_fresh_start_removes_existing_file() {
        let dir = tempfile::TempDir::new().unwrap();
        let config = StoreConfig::with_database(dir.path().join("db.sqlite3"));

        let mut db = Database::open(&config, catalog::blog_model()).unwrap();
        db.run_migrations().unwrap();
        db.seed_if_empty().unwrap();
        db.close().unwrap();

        let fresh = StoreConfig {
            fresh_start: true,
            ..config
        };
        let mut db = Database::open(&fresh, catalog::blog_model()).unwrap();
        assert_eq!(db.status().unwrap().current_version, None);
    }
}
