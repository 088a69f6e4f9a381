//! The immutable schema catalog.
//!
//! A [`SchemaModel`] is constructed once through [`SchemaModelBuilder`],
//! validated, and then only read. It performs no I/O.

use serde::Serialize;
use sha2::{Digest, Sha256};

use crate::types::{EntityDef, JoinTableDef, Relationship};
use crate::validate::{SchemaDefinitionError, validate_model};

/// Validated catalog of entity and join table declarations.
///
/// Declaration order is significant: the migration planner creates tables
/// in this order, and join tables after all entities.
///
/// # Examples
///
/// ```
/// use entity_store_core::catalog;
///
/// let model = catalog::blog_model();
/// assert_eq!(model.entity("Post").unwrap().table, "Posts");
/// assert_eq!(model.entity_by_table("Categories").unwrap().name, "Category");
/// assert!(model.relationship("Blog", "posts").is_some());
/// ```
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SchemaModel {
    entities: Vec<EntityDef>,
    join_tables: Vec<JoinTableDef>,
}

impl SchemaModel {
    /// Starts a new model declaration.
    pub fn builder() -> SchemaModelBuilder {
        SchemaModelBuilder::default()
    }

    /// Assembles a model without validating it.
    pub(crate) fn unchecked(entities: Vec<EntityDef>, join_tables: Vec<JoinTableDef>) -> Self {
        Self {
            entities,
            join_tables,
        }
    }

    /// Entities in declaration order.
    pub fn entities(&self) -> &[EntityDef] {
        &self.entities
    }

    /// Join tables in declaration order.
    pub fn join_tables(&self) -> &[JoinTableDef] {
        &self.join_tables
    }

    /// Looks up an entity by name.
    pub fn entity(&self, name: &str) -> Option<&EntityDef> {
        self.entities.iter().find(|e| e.name == name)
    }

    /// Looks up an entity by its table name.
    pub fn entity_by_table(&self, table: &str) -> Option<&EntityDef> {
        self.entities.iter().find(|e| e.table == table)
    }

    /// Looks up a join table by name.
    pub fn join_table(&self, table: &str) -> Option<&JoinTableDef> {
        self.join_tables.iter().find(|j| j.table == table)
    }

    /// Looks up a relationship of `entity` by navigation name.
    pub fn relationship(&self, entity: &str, name: &str) -> Option<&Relationship> {
        self.entity(entity).and_then(|e| e.relationship(name))
    }

    /// All table names, entities first, in declaration order.
    pub fn table_names(&self) -> impl Iterator<Item = &str> {
        self.entities
            .iter()
            .map(|e| e.table.as_str())
            .chain(self.join_tables.iter().map(|j| j.table.as_str()))
    }

    /// Canonical JSON snapshot of the model.
    pub fn snapshot(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }

    /// SHA-256 hex digest of [`snapshot`](Self::snapshot).
    ///
    /// Two models with identical declarations have identical fingerprints.
    pub fn fingerprint(&self) -> serde_json::Result<String> {
        let snapshot = self.snapshot()?;
        Ok(format!("{:x}", Sha256::digest(snapshot.as_bytes())))
    }
}

/// Collects declarations for a [`SchemaModel`].
///
/// # Examples
///
/// ```
/// use entity_store_core::*;
///
/// let model = SchemaModel::builder()
///     .entity(EntityDef::new("Blog", "Blogs")
///         .with_field(FieldDef::required("name", FieldType::Text)))
///     .build()
///     .unwrap();
/// assert_eq!(model.entities().len(), 1);
/// ```
#[derive(Debug, Clone, Default)]
pub struct SchemaModelBuilder {
    entities: Vec<EntityDef>,
    join_tables: Vec<JoinTableDef>,
}

impl SchemaModelBuilder {
    /// Declares an entity.
    pub fn entity(mut self, entity: EntityDef) -> Self {
        self.entities.push(entity);
        self
    }

    /// Declares a many-to-many join table.
    pub fn join_table(mut self, join: JoinTableDef) -> Self {
        self.join_tables.push(join);
        self
    }

    /// Validates the declarations and freezes them into a model.
    ///
    /// # Errors
    ///
    /// Returns the first [`SchemaDefinitionError`] reported by
    /// [`validate_model`].
    pub fn build(self) -> Result<SchemaModel, SchemaDefinitionError> {
        let model = SchemaModel::unchecked(self.entities, self.join_tables);
        match validate_model(&model).into_iter().next() {
            Some(err) => Err(err),
            None => Ok(model),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog;
    use crate::types::{FieldDef, FieldType};

    #[test]
    fn test_table_names_order() {
        let model = catalog::blog_model();
        let tables: Vec<_> = model.table_names().collect();
        assert_eq!(tables, vec!["Blogs", "Posts", "Categories", "PostCategories"]);
    }

    #[test]
    fn test_fingerprint_is_stable_and_sensitive() {
        let a = catalog::blog_model();
        let b = catalog::blog_model();
        assert_eq!(a.fingerprint().unwrap(), b.fingerprint().unwrap());
        assert_eq!(a.fingerprint().unwrap().len(), 64);

        let changed = SchemaModel::builder()
            .entity(
                EntityDef::new("Blog", "Blogs")
                    .with_field(FieldDef::required("name", FieldType::Text))
                    .with_field(FieldDef::optional("url", FieldType::Text)),
            )
            .build()
            .unwrap();
        assert_ne!(a.fingerprint().unwrap(), changed.fingerprint().unwrap());
    }

    #[test]
    fn test_build_reports_first_error() {
        let result = SchemaModel::builder()
            .entity(EntityDef::new("Blog", "Blogs"))
            .entity(EntityDef::new("Blog", "Journals"))
            .build();
        assert_eq!(
            result,
            Err(SchemaDefinitionError::DuplicateEntity("Blog".to_string()))
        );
    }
}
