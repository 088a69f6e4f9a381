//! Entity definition types for relational schema modeling.
//!
//! This module defines the static description of entities: their fields,
//! primary keys, foreign keys, and relationships. The types are plain data,
//! serializable with [`serde`] so a whole model can be snapshotted into the
//! migration history.

use serde::{Deserialize, Serialize};

use crate::value::Value;

/// Storage type of an entity field.
///
/// Maps onto the SQLite type affinities the planner emits.
///
/// # Examples
///
/// ```
/// use entity_store_core::FieldType;
///
/// assert_eq!(FieldType::Text.sql_type(), "TEXT");
/// assert_eq!(FieldType::Integer.zero_value(), entity_store_core::Value::Integer(0));
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FieldType {
    /// 64-bit signed integer.
    Integer,
    /// UTF-8 text.
    Text,
    /// 64-bit float.
    Real,
    /// Boolean stored as `0`/`1`.
    Boolean,
}

impl FieldType {
    /// Returns the SQL type name used in column definitions.
    pub fn sql_type(self) -> &'static str {
        match self {
            FieldType::Integer | FieldType::Boolean => "INTEGER",
            FieldType::Text => "TEXT",
            FieldType::Real => "REAL",
        }
    }

    /// Returns the zero value of the type.
    ///
    /// Used as the implicit default when a required column is added to a
    /// table that already holds rows.
    pub fn zero_value(self) -> Value {
        match self {
            FieldType::Integer | FieldType::Boolean => Value::Integer(0),
            FieldType::Text => Value::Text(String::new()),
            FieldType::Real => Value::Real(0.0),
        }
    }
}

/// A single column of an entity.
///
/// # Examples
///
/// ```
/// use entity_store_core::{FieldDef, FieldType};
///
/// let name = FieldDef::required("name", FieldType::Text);
/// assert!(name.required);
///
/// let rating = FieldDef::optional("rating", FieldType::Real);
/// assert!(!rating.required);
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldDef {
    /// Column name.
    pub name: String,
    /// Storage type.
    pub field_type: FieldType,
    /// Whether the column is `NOT NULL`.
    pub required: bool,
    /// Declared default value, if any.
    pub default: Option<Value>,
}

impl FieldDef {
    /// Creates a `NOT NULL` field.
    pub fn required(name: &str, field_type: FieldType) -> Self {
        Self {
            name: name.to_string(),
            field_type,
            required: true,
            default: None,
        }
    }

    /// Creates a nullable field.
    pub fn optional(name: &str, field_type: FieldType) -> Self {
        Self {
            name: name.to_string(),
            field_type,
            required: false,
            default: None,
        }
    }

    /// Sets the declared default value.
    pub fn with_default(mut self, value: Value) -> Self {
        self.default = Some(value);
        self
    }
}

/// Referential action taken when a referenced row is deleted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum OnDelete {
    /// Reject the delete while referencing rows exist.
    #[default]
    Restrict,
    /// Delete referencing rows as well.
    Cascade,
    /// Null out the referencing column.
    SetNull,
}

impl OnDelete {
    /// Returns the SQL clause for this action.
    pub fn sql(self) -> &'static str {
        match self {
            OnDelete::Restrict => "RESTRICT",
            OnDelete::Cascade => "CASCADE",
            OnDelete::SetNull => "SET NULL",
        }
    }
}

/// A foreign key from one of the entity's fields to another entity's
/// primary key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ForeignKey {
    /// Referencing column (must also be declared as a field).
    pub column: String,
    /// Name of the referenced entity.
    pub target: String,
    /// Action on delete of the referenced row.
    pub on_delete: OnDelete,
}

/// How a relationship is navigated.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum RelationKind {
    /// One-to-many: the target's table holds `foreign_key` pointing back here.
    HasMany {
        /// Column on the target table.
        foreign_key: String,
    },
    /// Many-to-one: this entity's `foreign_key` points at the target.
    BelongsTo {
        /// Column on this entity's table.
        foreign_key: String,
    },
    /// Many-to-many through a join table.
    ManyToMany {
        /// Name of the join table declaration.
        join_table: String,
    },
}

/// A named navigation from one entity to another.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Relationship {
    /// Navigation name (e.g., `"posts"`).
    pub name: String,
    /// Name of the related entity.
    pub target: String,
    /// Navigation strategy.
    pub kind: RelationKind,
}

/// Static description of one entity and its table.
///
/// Built with chained `with_*` methods.
///
/// # Examples
///
/// ```
/// use entity_store_core::{EntityDef, FieldDef, FieldType};
///
/// let blog = EntityDef::new("Blog", "Blogs")
///     .with_field(FieldDef::required("name", FieldType::Text))
///     .with_has_many("posts", "Post", "blogId");
///
/// assert_eq!(blog.primary_key, "id");
/// assert!(blog.field("name").is_some());
/// assert!(blog.relationship("posts").is_some());
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntityDef {
    /// Entity name used by the mapping layer (e.g., `"Blog"`).
    pub name: String,
    /// Backing table name (e.g., `"Blogs"`).
    pub table: String,
    /// Integer primary key column.
    pub primary_key: String,
    /// Non-key columns in declaration order.
    pub fields: Vec<FieldDef>,
    /// Foreign keys over `fields`.
    pub foreign_keys: Vec<ForeignKey>,
    /// Navigations to other entities.
    pub relationships: Vec<Relationship>,
}

impl EntityDef {
    /// Creates an entity with an `id` primary key and no fields.
    pub fn new(name: &str, table: &str) -> Self {
        Self {
            name: name.to_string(),
            table: table.to_string(),
            primary_key: "id".to_string(),
            fields: Vec::new(),
            foreign_keys: Vec::new(),
            relationships: Vec::new(),
        }
    }

    /// Renames the primary key column.
    pub fn with_primary_key(mut self, column: &str) -> Self {
        self.primary_key = column.to_string();
        self
    }

    /// Adds a field.
    pub fn with_field(mut self, field: FieldDef) -> Self {
        self.fields.push(field);
        self
    }

    /// Adds a required integer field referencing `target`, plus the
    /// matching `belongs_to` navigation named `navigation`.
    pub fn with_belongs_to(
        mut self,
        navigation: &str,
        target: &str,
        column: &str,
        on_delete: OnDelete,
    ) -> Self {
        self.fields
            .push(FieldDef::required(column, FieldType::Integer));
        self.foreign_keys.push(ForeignKey {
            column: column.to_string(),
            target: target.to_string(),
            on_delete,
        });
        self.relationships.push(Relationship {
            name: navigation.to_string(),
            target: target.to_string(),
            kind: RelationKind::BelongsTo {
                foreign_key: column.to_string(),
            },
        });
        self
    }

    /// Adds a one-to-many navigation; `foreign_key` lives on the target.
    pub fn with_has_many(mut self, navigation: &str, target: &str, foreign_key: &str) -> Self {
        self.relationships.push(Relationship {
            name: navigation.to_string(),
            target: target.to_string(),
            kind: RelationKind::HasMany {
                foreign_key: foreign_key.to_string(),
            },
        });
        self
    }

    /// Adds a many-to-many navigation through `join_table`.
    pub fn with_many_to_many(mut self, navigation: &str, target: &str, join_table: &str) -> Self {
        self.relationships.push(Relationship {
            name: navigation.to_string(),
            target: target.to_string(),
            kind: RelationKind::ManyToMany {
                join_table: join_table.to_string(),
            },
        });
        self
    }

    /// Looks up a field by column name.
    pub fn field(&self, name: &str) -> Option<&FieldDef> {
        self.fields.iter().find(|f| f.name == name)
    }

    /// Looks up a relationship by navigation name.
    pub fn relationship(&self, name: &str) -> Option<&Relationship> {
        self.relationships.iter().find(|r| r.name == name)
    }

    /// Returns the foreign key declared on `column`, if any.
    pub fn foreign_key(&self, column: &str) -> Option<&ForeignKey> {
        self.foreign_keys.iter().find(|fk| fk.column == column)
    }

    /// Returns `true` if `column` is the primary key or a declared field.
    pub fn has_column(&self, column: &str) -> bool {
        column == self.primary_key || self.field(column).is_some()
    }

    /// Iterates all column names, primary key first.
    pub fn column_names(&self) -> impl Iterator<Item = &str> {
        std::iter::once(self.primary_key.as_str()).chain(self.fields.iter().map(|f| f.name.as_str()))
    }
}

/// One side of a many-to-many join table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JoinSide {
    /// Column in the join table.
    pub column: String,
    /// Entity whose primary key the column references.
    pub entity: String,
}

/// Implicit join entity backing a many-to-many relationship.
///
/// Has no primary key of its own; each `(left, right)` pair is unique.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JoinTableDef {
    /// Join table name (e.g., `"PostCategories"`).
    pub table: String,
    /// First referenced side.
    pub left: JoinSide,
    /// Second referenced side.
    pub right: JoinSide,
}

impl JoinTableDef {
    /// Creates a join table between two entities.
    pub fn new(table: &str, left: (&str, &str), right: (&str, &str)) -> Self {
        Self {
            table: table.to_string(),
            left: JoinSide {
                column: left.0.to_string(),
                entity: left.1.to_string(),
            },
            right: JoinSide {
                column: right.0.to_string(),
                entity: right.1.to_string(),
            },
        }
    }

    /// Returns `(own_column, other_column)` as seen from `entity`.
    ///
    /// Returns `None` when `entity` is not one of the two sides.
    pub fn columns_from(&self, entity: &str) -> Option<(&str, &str)> {
        if self.left.entity == entity {
            Some((&self.left.column, &self.right.column))
        } else if self.right.entity == entity {
            Some((&self.right.column, &self.left.column))
        } else {
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_belongs_to_adds_field_fk_and_navigation() {
        let post = EntityDef::new("Post", "Posts").with_belongs_to(
            "blog",
            "Blog",
            "blogId",
            OnDelete::Cascade,
        );

        let field = post.field("blogId").unwrap();
        assert!(field.required);
        assert_eq!(field.field_type, FieldType::Integer);
        assert_eq!(post.foreign_key("blogId").unwrap().target, "Blog");
        assert!(matches!(
            post.relationship("blog").unwrap().kind,
            RelationKind::BelongsTo { .. }
        ));
    }

    #[test]
    fn test_column_names_start_with_primary_key() {
        let blog = EntityDef::new("Blog", "Blogs")
            .with_field(FieldDef::required("name", FieldType::Text));
        let columns: Vec<_> = blog.column_names().collect();
        assert_eq!(columns, vec!["id", "name"]);
        assert!(blog.has_column("id"));
        assert!(!blog.has_column("title"));
    }

    #[test]
    fn test_join_columns_from_either_side() {
        let join = JoinTableDef::new("PostCategories", ("postId", "Post"), ("categoryId", "Category"));
        assert_eq!(join.columns_from("Post"), Some(("postId", "categoryId")));
        assert_eq!(join.columns_from("Category"), Some(("categoryId", "postId")));
        assert_eq!(join.columns_from("Blog"), None);
    }

    #[test]
    fn test_zero_values() {
        assert_eq!(FieldType::Text.zero_value(), Value::Text(String::new()));
        assert_eq!(FieldType::Boolean.zero_value(), Value::Integer(0));
        assert_eq!(FieldType::Real.sql_type(), "REAL");
    }
}
