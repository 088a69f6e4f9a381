//! Core schema model for the entity store.
//!
//! This crate defines the static, I/O-free description of a relational
//! model:
//!
//! - [`EntityDef`] — an entity with its table, primary key, fields, foreign
//!   keys and relationships.
//! - [`JoinTableDef`] — the implicit join entity behind a many-to-many
//!   relationship.
//! - [`SchemaModel`] — the validated, immutable catalog of both.
//! - [`Value`], [`Record`] and the [`Entity`] trait — the row representation
//!   storage backends map Rust types through.
//!
//! Validation ([`validate_model`]) catches duplicate tables, references to
//! undeclared entities or columns, and invalid identifiers before anything
//! touches a database.
//!
//! The [`catalog`] module declares the Blog / Post / Category sample model.
//!
//! # Example
//!
//! ```
//! use entity_store_core::*;
//!
//! let model = SchemaModel::builder()
//!     .entity(
//!         EntityDef::new("Blog", "Blogs")
//!             .with_field(FieldDef::required("name", FieldType::Text))
//!             .with_has_many("posts", "Post", "blogId"),
//!     )
//!     .entity(
//!         EntityDef::new("Post", "Posts")
//!             .with_field(FieldDef::required("title", FieldType::Text))
//!             .with_belongs_to("blog", "Blog", "blogId", OnDelete::Cascade),
//!     )
//!     .build()
//!     .unwrap();
//!
//! assert_eq!(model.entity("Post").unwrap().foreign_keys.len(), 1);
//! ```

pub mod catalog;
mod model;
mod types;
mod validate;
mod value;

pub use catalog::{Blog, Category, Post};
pub use model::{SchemaModel, SchemaModelBuilder};
pub use types::*;
pub use validate::{SCHEMA_VERSION_TABLE, SchemaDefinitionError, is_valid_identifier, validate_model};
pub use value::{Entity, Record, RecordError, Value};
