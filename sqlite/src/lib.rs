//! SQLite backend for the entity store.
//!
//! This crate turns a declared [`SchemaModel`](entity_store_core::SchemaModel)
//! into tables, keeps them in step with the model through versioned
//! migrations, and maps entities to and from rows.
//!
//! # Architecture
//!
//! - **`introspect`** — reads the tables, columns, indexes and migration
//!   history persisted in a database
//! - **`planner`** — diffs the model against that state into an ordered
//!   [`MigrationPlan`]
//! - **`migration`** — applies plans atomically and records each version
//! - **`mapper`** / **`query`** — CRUD, relationship loading, batched
//!   [`ChangeSet`]s and paged queries
//! - **`seed`** — sample data for the blog catalog
//! - **`database`** — the [`Database`] handle tying them together
//!
//! # Quick start
//!
//! ```no_run
//! use entity_store_core::{Blog, Post, catalog};
//! use entity_store_sqlite::{Database, Filter, StoreConfig};
//!
//! let config = StoreConfig::with_database("db.sqlite3");
//! let mut db = Database::open(&config, catalog::blog_model()).unwrap();
//!
//! db.run_migrations().unwrap();
//! db.seed_if_empty().unwrap();
//!
//! let blog: Blog = db.find_by_id(1).unwrap();
//! let posts: Vec<Post> = db.load_related(&blog, "posts").unwrap();
//! println!("{} has {} posts", blog.name, posts.len());
//!
//! let early: Vec<Post> = db.query::<Post>().unwrap()
//!     .filter(Filter::le("id", 2_i64))
//!     .fetch_all()
//!     .unwrap();
//! assert_eq!(early.len(), 2);
//! ```
//!
//! # Inspecting a migration before applying it
//!
//! ```
//! use entity_store_core::catalog;
//! use entity_store_sqlite::Database;
//!
//! let mut db = Database::open_in_memory(catalog::blog_model()).unwrap();
//! let plan = db.plan_migrations().unwrap();
//! for step in &plan.steps {
//!     println!("{}", step.describe());
//! }
//! db.apply_plan(&plan).unwrap();
//! assert_eq!(db.history().unwrap().len(), 1);
//! ```

mod config;
mod convert;
mod database;
mod error;
mod introspect;
mod mapper;
mod migration;
mod planner;
mod query;
mod schema;
pub mod seed;

pub use config::{ConfigError, JournalMode, StoreConfig};
pub use database::Database;
pub use error::{Result, StoreError};
pub use introspect::PersistedSchema;
pub use mapper::{Change, ChangeSet, RowRef, SaveReport};
pub use migration::{AppliedMigration, MigrationOutcome, MigrationStatus, Migrator};
pub use planner::{ColumnSpec, ForeignKeySpec, MigrationPlan, MigrationStep, PlanningError, plan};
pub use query::{CmpOp, Filter, Order, Query, Rows};
pub use seed::SeedReport;
