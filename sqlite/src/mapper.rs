//! Entity ↔ row mapping: CRUD, relationship navigation and batched changes.
//!
//! [`Mapper`] works on any `&Connection`, including an open
//! [`rusqlite::Transaction`], so the [`Database`](crate::Database) handle
//! decides the transaction scope. A [`ChangeSet`] collects pending changes
//! that are applied together by [`Mapper::save`].

use entity_store_core::{Entity, EntityDef, JoinTableDef, Record, RelationKind, Relationship, SchemaModel};
use rusqlite::{Connection, OptionalExtension, Params, params, params_from_iter};
use serde::Serialize;
use tracing::debug;

use crate::convert::{into_entity, read_row, select_list, to_sql_value};
use crate::error::{Result, StoreError};
use crate::schema::{quote_ident, quote_list};

/// One pending change of a [`ChangeSet`].
#[derive(Debug, Clone, PartialEq)]
pub enum Change {
    /// Insert a row; `id` is used as primary key when set.
    Insert {
        entity: &'static str,
        id: Option<i64>,
        record: Record,
    },
    /// Overwrite the non-key columns of row `id`.
    Update {
        entity: &'static str,
        id: Option<i64>,
        record: Record,
    },
    /// Delete row `id`.
    Delete { entity: &'static str, id: i64 },
    /// Add a join-table row.
    Associate {
        entity: &'static str,
        id: RowRef,
        relationship: String,
        target: &'static str,
        other_id: RowRef,
    },
    /// Remove a join-table row.
    Dissociate {
        entity: &'static str,
        id: RowRef,
        relationship: String,
        target: &'static str,
        other_id: RowRef,
    },
}

/// Primary key of one side of a [`Change::Associate`] or
/// [`Change::Dissociate`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RowRef {
    /// A known key; `None` for an entity that has not been saved.
    Key(Option<i64>),
    /// The row created by the [`Change::Insert`] at this position of the
    /// same [`ChangeSet`]. Resolved when the set is saved.
    Inserted(usize),
}

/// Pending changes applied in one transaction by
/// [`Database::save`](crate::Database::save).
///
/// # Examples
///
/// ```
/// use entity_store_core::{Blog, Post, catalog};
/// use entity_store_sqlite::{ChangeSet, Database};
///
/// let mut db = Database::open_in_memory(catalog::blog_model()).unwrap();
/// db.run_migrations().unwrap();
///
/// let changes = ChangeSet::new()
///     .insert(&Blog::with_id(1, "Dummy1"))
///     .insert(&Post::new("PostDummy1", 1));
/// let report = db.save(changes).unwrap();
/// assert_eq!(report.inserted, 2);
/// ```
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ChangeSet {
    changes: Vec<Change>,
}

impl ChangeSet {
    /// Creates an empty change set.
    pub fn new() -> Self {
        Self::default()
    }

    /// Queues an insert. The entity's id is used as primary key when set.
    pub fn insert<E: Entity>(mut self, entity: &E) -> Self {
        self.changes.push(Change::Insert {
            entity: E::ENTITY,
            id: entity.id(),
            record: entity.to_record(),
        });
        self
    }

    /// Queues an update of an already saved entity.
    pub fn update<E: Entity>(mut self, entity: &E) -> Self {
        self.changes.push(Change::Update {
            entity: E::ENTITY,
            id: entity.id(),
            record: entity.to_record(),
        });
        self
    }

    /// Queues the deletion of row `id` of `E`.
    pub fn delete<E: Entity>(mut self, id: i64) -> Self {
        self.changes.push(Change::Delete { entity: E::ENTITY, id });
        self
    }

    /// Queues a many-to-many link between two entities.
    ///
    /// Both ids are read now. To link a row inserted earlier in this set
    /// without an explicit id, use [`ChangeSet::link`].
    pub fn associate<E: Entity, R: Entity>(self, entity: &E, relationship: &str, other: &R) -> Self {
        self.link::<E, R>(RowRef::Key(entity.id()), relationship, RowRef::Key(other.id()))
    }

    /// Queues a many-to-many link whose sides may refer to inserts queued
    /// earlier in this set.
    ///
    /// # Examples
    ///
    /// ```
    /// use entity_store_core::{Blog, Category, Post, catalog};
    /// use entity_store_sqlite::{ChangeSet, Database, RowRef};
    ///
    /// let mut db = Database::open_in_memory(catalog::blog_model()).unwrap();
    /// db.run_migrations().unwrap();
    ///
    /// let changes = ChangeSet::new()
    ///     .insert(&Blog::with_id(1, "Dummy1"))
    ///     .insert(&Post::new("PostDummy1", 1))
    ///     .insert(&Category::new("Rust"))
    ///     .link::<Post, Category>(RowRef::Inserted(1), "categories", RowRef::Inserted(2));
    /// let report = db.save(changes).unwrap();
    /// assert_eq!(report.associated, 1);
    /// ```
    pub fn link<E: Entity, R: Entity>(mut self, entity: RowRef, relationship: &str, other: RowRef) -> Self {
        self.changes.push(Change::Associate {
            entity: E::ENTITY,
            id: entity,
            relationship: relationship.to_string(),
            target: R::ENTITY,
            other_id: other,
        });
        self
    }

    /// Queues the removal of a many-to-many link.
    pub fn dissociate<E: Entity, R: Entity>(mut self, entity: &E, relationship: &str, other: &R) -> Self {
        self.changes.push(Change::Dissociate {
            entity: E::ENTITY,
            id: RowRef::Key(entity.id()),
            relationship: relationship.to_string(),
            target: R::ENTITY,
            other_id: RowRef::Key(other.id()),
        });
        self
    }

    /// Pending changes in the order they will be applied.
    pub fn changes(&self) -> &[Change] {
        &self.changes
    }

    /// Number of pending changes.
    pub fn len(&self) -> usize {
        self.changes.len()
    }

    /// Returns `true` when nothing is pending.
    pub fn is_empty(&self) -> bool {
        self.changes.is_empty()
    }
}

/// Counts of what a [`ChangeSet`] did.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SaveReport {
    pub inserted: usize,
    pub updated: usize,
    pub deleted: usize,
    pub associated: usize,
    pub dissociated: usize,
    /// Primary keys of inserted rows, in insertion order.
    pub inserted_ids: Vec<i64>,
}

/// Maps entities onto the tables declared by a [`SchemaModel`].
pub(crate) struct Mapper<'a> {
    conn: &'a Connection,
    model: &'a SchemaModel,
}

impl<'a> Mapper<'a> {
    pub(crate) fn new(conn: &'a Connection, model: &'a SchemaModel) -> Self {
        Self { conn, model }
    }

    pub(crate) fn entity_def(&self, name: &str) -> Result<&'a EntityDef> {
        self.model
            .entity(name)
            .ok_or_else(|| StoreError::UnknownEntity(name.to_string()))
    }

    /// Inserts `entity`, storing the assigned primary key on it.
    pub(crate) fn insert<E: Entity>(&self, entity: &mut E) -> Result<i64> {
        let def = self.entity_def(E::ENTITY)?;
        let id = self.insert_record(def, entity.id(), &entity.to_record())?;
        entity.set_id(id);
        Ok(id)
    }

    fn insert_record(&self, def: &EntityDef, id: Option<i64>, record: &Record) -> Result<i64> {
        check_columns(def, record)?;

        let mut columns = Vec::new();
        let mut values = Vec::new();
        if let Some(id) = id {
            columns.push(def.primary_key.as_str());
            values.push(rusqlite::types::Value::Integer(id));
        }
        for (column, value) in record.iter() {
            columns.push(column);
            values.push(to_sql_value(value));
        }

        let sql = if columns.is_empty() {
            format!("INSERT INTO {} DEFAULT VALUES", quote_ident(&def.table))
        } else {
            format!(
                "INSERT INTO {} ({}) VALUES ({})",
                quote_ident(&def.table),
                quote_list(columns.iter().copied()),
                vec!["?"; columns.len()].join(", ")
            )
        };
        debug!(table = %def.table, "insert");
        self.conn.execute(&sql, params_from_iter(values.iter()))?;
        Ok(id.unwrap_or_else(|| self.conn.last_insert_rowid()))
    }

    pub(crate) fn find_by_id<E: Entity>(&self, id: i64) -> Result<E> {
        let def = self.entity_def(E::ENTITY)?;
        let sql = format!(
            "SELECT {} FROM {} WHERE {} = ?1",
            select_list(def, None),
            quote_ident(&def.table),
            quote_ident(&def.primary_key)
        );
        let row = self
            .conn
            .query_row(&sql, [id], |row| read_row(def, row))
            .optional()?
            .ok_or_else(|| StoreError::NotFound {
                entity: def.name.clone(),
                id,
            })?;
        into_entity(row)
    }

    pub(crate) fn update<E: Entity>(&self, entity: &E) -> Result<()> {
        let def = self.entity_def(E::ENTITY)?;
        let id = entity
            .id()
            .ok_or_else(|| StoreError::UnsavedEntity(def.name.clone()))?;
        self.update_record(def, id, &entity.to_record())
    }

    fn update_record(&self, def: &EntityDef, id: i64, record: &Record) -> Result<()> {
        check_columns(def, record)?;
        let pk = quote_ident(&def.primary_key);
        let table = quote_ident(&def.table);

        let changed = if record.is_empty() {
            self.conn
                .query_row(&format!("SELECT COUNT(*) FROM {table} WHERE {pk} = ?1"), [id], |row| {
                    row.get::<_, i64>(0)
                })? as usize
        } else {
            let assignments = record
                .iter()
                .map(|(column, _)| format!("{} = ?", quote_ident(column)))
                .collect::<Vec<_>>()
                .join(", ");
            let mut values: Vec<_> = record.iter().map(|(_, v)| to_sql_value(v)).collect();
            values.push(rusqlite::types::Value::Integer(id));
            debug!(table = %def.table, id, "update");
            self.conn.execute(
                &format!("UPDATE {table} SET {assignments} WHERE {pk} = ?"),
                params_from_iter(values.iter()),
            )?
        };

        if changed == 0 {
            return Err(StoreError::NotFound {
                entity: def.name.clone(),
                id,
            });
        }
        Ok(())
    }

    pub(crate) fn delete<E: Entity>(&self, id: i64) -> Result<()> {
        let def = self.entity_def(E::ENTITY)?;
        self.delete_record(def, id)
    }

    fn delete_record(&self, def: &EntityDef, id: i64) -> Result<()> {
        debug!(table = %def.table, id, "delete");
        let deleted = self.conn.execute(
            &format!(
                "DELETE FROM {} WHERE {} = ?1",
                quote_ident(&def.table),
                quote_ident(&def.primary_key)
            ),
            [id],
        )?;
        if deleted == 0 {
            return Err(StoreError::NotFound {
                entity: def.name.clone(),
                id,
            });
        }
        Ok(())
    }

    pub(crate) fn count<E: Entity>(&self) -> Result<usize> {
        let def = self.entity_def(E::ENTITY)?;
        let count: i64 = self.conn.query_row(
            &format!("SELECT COUNT(*) FROM {}", quote_ident(&def.table)),
            [],
            |row| row.get(0),
        )?;
        Ok(count as usize)
    }

    /// Loads the `R` entities reachable from `entity` through `relationship`,
    /// ordered by `R`'s primary key.
    pub(crate) fn load_related<E: Entity, R: Entity>(&self, entity: &E, relationship: &str) -> Result<Vec<R>> {
        let def = self.entity_def(E::ENTITY)?;
        let relation = self.relationship(def, relationship, R::ENTITY)?;
        let target = self.entity_def(R::ENTITY)?;
        let id = entity
            .id()
            .ok_or_else(|| StoreError::UnsavedEntity(def.name.clone()))?;

        let target_pk = quote_ident(&target.primary_key);
        match &relation.kind {
            RelationKind::HasMany { foreign_key } => {
                let sql = format!(
                    "SELECT {} FROM {} WHERE {} = ?1 ORDER BY {target_pk}",
                    select_list(target, None),
                    quote_ident(&target.table),
                    quote_ident(foreign_key)
                );
                self.fetch(target, &sql, [id])
            }
            RelationKind::BelongsTo { foreign_key } => {
                let sql = format!(
                    "SELECT {} FROM {} WHERE {} = ?1",
                    quote_ident(foreign_key),
                    quote_ident(&def.table),
                    quote_ident(&def.primary_key)
                );
                let parent: Option<i64> = self
                    .conn
                    .query_row(&sql, [id], |row| row.get(0))
                    .optional()?
                    .ok_or_else(|| StoreError::NotFound {
                        entity: def.name.clone(),
                        id,
                    })?;
                match parent {
                    Some(parent) => Ok(vec![self.find_by_id(parent)?]),
                    None => Ok(Vec::new()),
                }
            }
            RelationKind::ManyToMany { .. } => {
                let (join, own, other) = self.join_columns(def, relation)?;
                let sql = format!(
                    "SELECT {} FROM {} t JOIN {} j ON j.{} = t.{target_pk} WHERE j.{} = ?1 ORDER BY t.{target_pk}",
                    select_list(target, Some("t")),
                    quote_ident(&target.table),
                    quote_ident(&join.table),
                    quote_ident(other),
                    quote_ident(own)
                );
                self.fetch(target, &sql, [id])
            }
        }
    }

    pub(crate) fn associate<E: Entity, R: Entity>(&self, entity: &E, relationship: &str, other: &R) -> Result<()> {
        self.associate_ids(E::ENTITY, entity.id(), relationship, R::ENTITY, other.id())
    }

    pub(crate) fn dissociate<E: Entity, R: Entity>(&self, entity: &E, relationship: &str, other: &R) -> Result<bool> {
        self.dissociate_ids(E::ENTITY, entity.id(), relationship, R::ENTITY, other.id())
    }

    fn associate_ids(
        &self,
        entity: &str,
        id: Option<i64>,
        relationship: &str,
        target: &str,
        other_id: Option<i64>,
    ) -> Result<()> {
        let (join, own, other, id, other_id) = self.link(entity, id, relationship, target, other_id)?;
        debug!(table = %join.table, id, other_id, "associate");
        self.conn.execute(
            &format!(
                "INSERT INTO {} ({}, {}) VALUES (?1, ?2)",
                quote_ident(&join.table),
                quote_ident(own),
                quote_ident(other)
            ),
            params![id, other_id],
        )?;
        Ok(())
    }

    fn dissociate_ids(
        &self,
        entity: &str,
        id: Option<i64>,
        relationship: &str,
        target: &str,
        other_id: Option<i64>,
    ) -> Result<bool> {
        let (join, own, other, id, other_id) = self.link(entity, id, relationship, target, other_id)?;
        debug!(table = %join.table, id, other_id, "dissociate");
        let removed = self.conn.execute(
            &format!(
                "DELETE FROM {} WHERE {} = ?1 AND {} = ?2",
                quote_ident(&join.table),
                quote_ident(own),
                quote_ident(other)
            ),
            params![id, other_id],
        )?;
        Ok(removed > 0)
    }

    /// Applies every change of `changes` on this connection, in order.
    ///
    /// The caller owns the transaction; the first failure aborts.
    pub(crate) fn save(&self, changes: &ChangeSet) -> Result<SaveReport> {
        let mut report = SaveReport::default();
        let mut inserted: Vec<Option<(&str, i64)>> = Vec::with_capacity(changes.len());
        for change in changes.changes() {
            let mut assigned = None;
            match change {
                Change::Insert { entity, id, record } => {
                    let def = self.entity_def(entity)?;
                    let new_id = self.insert_record(def, *id, record)?;
                    assigned = Some((*entity, new_id));
                    report.inserted_ids.push(new_id);
                    report.inserted += 1;
                }
                Change::Update { entity, id, record } => {
                    let def = self.entity_def(entity)?;
                    let id = id.ok_or_else(|| StoreError::UnsavedEntity(def.name.clone()))?;
                    self.update_record(def, id, record)?;
                    report.updated += 1;
                }
                Change::Delete { entity, id } => {
                    let def = self.entity_def(entity)?;
                    self.delete_record(def, *id)?;
                    report.deleted += 1;
                }
                Change::Associate {
                    entity,
                    id,
                    relationship,
                    target,
                    other_id,
                } => {
                    let id = resolve(&inserted, entity, *id)?;
                    let other_id = resolve(&inserted, target, *other_id)?;
                    self.associate_ids(entity, id, relationship, target, other_id)?;
                    report.associated += 1;
                }
                Change::Dissociate {
                    entity,
                    id,
                    relationship,
                    target,
                    other_id,
                } => {
                    let id = resolve(&inserted, entity, *id)?;
                    let other_id = resolve(&inserted, target, *other_id)?;
                    if self.dissociate_ids(entity, id, relationship, target, other_id)? {
                        report.dissociated += 1;
                    }
                }
            }
            inserted.push(assigned);
        }
        Ok(report)
    }

    fn fetch<R: Entity, P: Params>(&self, def: &EntityDef, sql: &str, params: P) -> Result<Vec<R>> {
        let mut stmt = self.conn.prepare_cached(sql)?;
        let rows = stmt
            .query_map(params, |row| read_row(def, row))?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        rows.into_iter().map(into_entity).collect()
    }

    fn relationship(&self, def: &'a EntityDef, name: &str, target: &str) -> Result<&'a Relationship> {
        def.relationship(name)
            .filter(|r| r.target == target)
            .ok_or_else(|| StoreError::UnknownRelationship {
                entity: def.name.clone(),
                relationship: name.to_string(),
                target: target.to_string(),
            })
    }

    /// Join table plus `(own, other)` columns of a many-to-many relationship.
    fn join_columns(&self, def: &EntityDef, relation: &Relationship) -> Result<(&'a JoinTableDef, &'a str, &'a str)> {
        let RelationKind::ManyToMany { join_table } = &relation.kind else {
            return Err(StoreError::NotManyToMany {
                entity: def.name.clone(),
                relationship: relation.name.clone(),
            });
        };
        let join = self
            .model
            .join_table(join_table)
            .ok_or_else(|| StoreError::UnknownEntity(join_table.clone()))?;
        let (own, other) = join
            .columns_from(&def.name)
            .ok_or_else(|| StoreError::UnknownRelationship {
                entity: def.name.clone(),
                relationship: relation.name.clone(),
                target: relation.target.clone(),
            })?;
        Ok((join, own, other))
    }

    /// Resolves a many-to-many link between two saved entities.
    #[allow(clippy::type_complexity)]
    fn link(
        &self,
        entity: &str,
        id: Option<i64>,
        relationship: &str,
        target: &str,
        other_id: Option<i64>,
    ) -> Result<(&'a JoinTableDef, &'a str, &'a str, i64, i64)> {
        let def = self.entity_def(entity)?;
        let relation = self.relationship(def, relationship, target)?;
        let (join, own, other) = self.join_columns(def, relation)?;
        let id = id.ok_or_else(|| StoreError::UnsavedEntity(def.name.clone()))?;
        let other_id = other_id.ok_or_else(|| StoreError::UnsavedEntity(target.to_string()))?;
        Ok((join, own, other, id, other_id))
    }
}

/// Rejects records naming columns the entity does not declare.
fn check_columns(def: &EntityDef, record: &Record) -> Result<()> {
    match record.iter().find(|(column, _)| def.field(column).is_none()) {
        Some((column, _)) => Err(StoreError::UnknownColumn {
            entity: def.name.clone(),
            column: column.to_string(),
        }),
        None => Ok(()),
    }
}

/// Turns a [`RowRef`] into a key, looking up inserts already applied.
fn resolve(inserted: &[Option<(&str, i64)>], entity: &str, key: RowRef) -> Result<Option<i64>> {
    match key {
        RowRef::Key(id) => Ok(id),
        RowRef::Inserted(position) => match inserted.get(position) {
            Some(Some((inserted_entity, id))) if *inserted_entity == entity => Ok(Some(*id)),
            _ => Err(StoreError::InvalidChange(format!(
                "change {position} is not an earlier insert of {entity}"
            ))),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::migration::Migrator;
    use entity_store_core::{Blog, Category, Post, catalog};

    fn migrated() -> (Connection, SchemaModel) {
        let mut conn = Connection::open_in_memory().unwrap();
        conn.execute_batch("PRAGMA foreign_keys = ON;").unwrap();
        let model = catalog::blog_model();
        Migrator::new(&mut conn, "rusqlite").migrate(&model).unwrap();
        (conn, model)
    }

    #[test]
    fn test_insert_assigns_id_and_find_returns_equal_entity() {
        let (conn, model) = migrated();
        let mapper = Mapper::new(&conn, &model);

        let mut blog = Blog::new("Dummy1");
        let id = mapper.insert(&mut blog).unwrap();
        assert_eq!(blog.id, Some(id));
        assert_eq!(mapper.find_by_id::<Blog>(id).unwrap(), blog);
    }

    #[test]
    fn test_find_missing_row() {
        let (conn, model) = migrated();
        let err = Mapper::new(&conn, &model).find_by_id::<Blog>(42).unwrap_err();
        assert!(matches!(err, StoreError::NotFound { ref entity, id: 42 } if entity == "Blog"));
    }

    #[test]
    fn test_update_and_delete() {
        let (conn, model) = migrated();
        let mapper = Mapper::new(&conn, &model);
        let mut blog = Blog::new("Dummy1");
        mapper.insert(&mut blog).unwrap();

        blog.name = "Renamed".to_string();
        mapper.update(&blog).unwrap();
        assert_eq!(mapper.find_by_id::<Blog>(blog.id.unwrap()).unwrap().name, "Renamed");

        mapper.delete::<Blog>(blog.id.unwrap()).unwrap();
        assert_eq!(mapper.count::<Blog>().unwrap(), 0);
        assert!(matches!(
            mapper.delete::<Blog>(blog.id.unwrap()),
            Err(StoreError::NotFound { .. })
        ));
        assert!(matches!(
            mapper.update(&Blog::new("unsaved")),
            Err(StoreError::UnsavedEntity(_))
        ));
    }

    #[test]
    fn test_foreign_key_violation_is_constraint_error() {
        let (conn, model) = migrated();
        let err = Mapper::new(&conn, &model)
            .insert(&mut Post::new("orphan", 99))
            .unwrap_err();
        assert!(matches!(err, StoreError::ConstraintViolation(_)));
    }

    #[test]
    fn test_relationship_navigation() {
        let (conn, model) = migrated();
        let mapper = Mapper::new(&conn, &model);
        let mut blog = Blog::new("Dummy1");
        mapper.insert(&mut blog).unwrap();
        let mut first = Post::new("PostDummy1", blog.id.unwrap());
        let mut second = Post::new("PostDummy2", blog.id.unwrap());
        mapper.insert(&mut second).unwrap();
        mapper.insert(&mut first).unwrap();
        let mut ruby = Category::new("Ruby");
        mapper.insert(&mut ruby).unwrap();
        mapper.associate(&first, "categories", &ruby).unwrap();

        let posts: Vec<Post> = mapper.load_related(&blog, "posts").unwrap();
        assert_eq!(posts, vec![second.clone(), first.clone()]);

        let owner: Vec<Blog> = mapper.load_related(&first, "blog").unwrap();
        assert_eq!(owner, vec![blog.clone()]);

        let tagged: Vec<Post> = mapper.load_related(&ruby, "posts").unwrap();
        assert_eq!(tagged, vec![first.clone()]);
        let tags: Vec<Category> = mapper.load_related(&first, "categories").unwrap();
        assert_eq!(tags, vec![ruby.clone()]);

        assert!(mapper.dissociate(&ruby, "posts", &first).unwrap());
        assert!(!mapper.dissociate(&ruby, "posts", &first).unwrap());
        assert!(mapper.load_related::<_, Post>(&ruby, "posts").unwrap().is_empty());
    }

    #[test]
    fn test_relationship_errors() {
        let (conn, model) = migrated();
        let mapper = Mapper::new(&conn, &model);
        let blog = Blog::with_id(1, "Dummy1");

        let err = mapper.load_related::<_, Category>(&blog, "posts").unwrap_err();
        assert!(matches!(err, StoreError::UnknownRelationship { .. }));

        let err = mapper.load_related::<_, Post>(&Blog::new("x"), "posts").unwrap_err();
        assert!(matches!(err, StoreError::UnsavedEntity(_)));

        let err = mapper
            .associate(&blog, "posts", &Post::with_id(1, "p", 1))
            .unwrap_err();
        assert!(matches!(err, StoreError::NotManyToMany { .. }));
    }

    #[test]
    fn test_duplicate_association_is_rejected() {
        let (conn, model) = migrated();
        let mapper = Mapper::new(&conn, &model);
        let mut blog = Blog::new("b");
        mapper.insert(&mut blog).unwrap();
        let mut post = Post::new("p", blog.id.unwrap());
        mapper.insert(&mut post).unwrap();
        let mut category = Category::new("c");
        mapper.insert(&mut category).unwrap();

        mapper.associate(&post, "categories", &category).unwrap();
        let err = mapper.associate(&category, "posts", &post).unwrap_err();
        assert!(matches!(err, StoreError::ConstraintViolation(_)));
    }

    #[test]
    fn test_save_applies_changes_in_order() {
        let (conn, model) = migrated();
        let changes = ChangeSet::new()
            .insert(&Blog::with_id(1, "Dummy1"))
            .insert(&Post::new("PostDummy1", 1))
            .insert(&Category::with_id(1, "C++"))
            .associate(&Post::with_id(1, "PostDummy1", 1), "categories", &Category::with_id(1, "C++"))
            .update(&Blog::with_id(1, "Renamed"));
        assert_eq!(changes.len(), 5);

        let report = Mapper::new(&conn, &model).save(&changes).unwrap();
        assert_eq!(report.inserted, 3);
        assert_eq!(report.inserted_ids, vec![1, 1, 1]);
        assert_eq!(report.associated, 1);
        assert_eq!(report.updated, 1);
    }

    #[test]
    fn test_save_links_rows_inserted_in_same_set() {
        let (conn, model) = migrated();
        let changes = ChangeSet::new()
            .insert(&Blog::new("Dummy1"))
            .insert(&Post::new("PostDummy1", 1))
            .insert(&Category::new("Rust"))
            .insert(&Category::new("SQL"))
            .link::<Post, Category>(RowRef::Inserted(1), "categories", RowRef::Inserted(2))
            .link::<Category, Post>(RowRef::Inserted(3), "posts", RowRef::Inserted(1));

        let mapper = Mapper::new(&conn, &model);
        let report = mapper.save(&changes).unwrap();
        assert_eq!(report.associated, 2);

        let post: Post = mapper.find_by_id(report.inserted_ids[1]).unwrap();
        let tags: Vec<Category> = mapper.load_related(&post, "categories").unwrap();
        let names: Vec<_> = tags.iter().map(|c| c.tag_name.as_str()).collect();
        assert_eq!(names, vec!["Rust", "SQL"]);
    }

    #[test]
    fn test_link_to_non_insert_position_is_rejected() {
        let (mut conn, model) = migrated();
        let changes = ChangeSet::new()
            .insert(&Blog::new("Dummy1"))
            .insert(&Category::new("Rust"))
            .link::<Post, Category>(RowRef::Inserted(0), "categories", RowRef::Inserted(1));

        let tx = conn.transaction().unwrap();
        let err = Mapper::new(&tx, &model).save(&changes).unwrap_err();
        assert!(matches!(err, StoreError::InvalidChange(ref m) if m.contains("Post")));

        let changes = ChangeSet::new()
            .link::<Post, Category>(RowRef::Inserted(1), "categories", RowRef::Key(Some(1)))
            .insert(&Post::new("PostDummy1", 1));
        let err = Mapper::new(&tx, &model).save(&changes).unwrap_err();
        assert!(matches!(err, StoreError::InvalidChange(_)));
    }
}
