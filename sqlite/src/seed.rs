//! Sample data for the blog catalog.
//!
//! Seeding runs only against an empty `Blogs` table, so calling it on every
//! start is safe.

use entity_store_core::{Blog, Category, Post, SchemaModel};
use rusqlite::Connection;
use serde::Serialize;
use tracing::info;

use crate::error::Result;
use crate::mapper::{ChangeSet, Mapper};

const BLOGS: [&str; 4] = ["Dummy1", "Dummy2", "Dummy3", "Dummy4"];
const CATEGORIES: [&str; 3] = ["C++", "Python", "Ruby"];
/// `(post id, blog id)`.
const POSTS: [(i64, i64); 6] = [(1, 1), (2, 1), (3, 1), (4, 2), (5, 3), (6, 3)];
/// `(post id, category id)`.
const POST_CATEGORIES: [(i64, i64); 12] = [
    (1, 1),
    (1, 3),
    (2, 2),
    (2, 3),
    (3, 1),
    (3, 2),
    (4, 1),
    (4, 2),
    (5, 1),
    (5, 2),
    (6, 1),
    (6, 2),
];

/// Result of [`seed_if_empty`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SeedReport {
    /// `false` when the database already held blogs.
    pub seeded: bool,
    pub blogs: usize,
    pub categories: usize,
    pub posts: usize,
    pub associations: usize,
}

/// The sample rows as one change set.
pub fn sample_data() -> ChangeSet {
    let mut changes = ChangeSet::new();
    for (i, name) in BLOGS.iter().enumerate() {
        changes = changes.insert(&Blog::with_id(i as i64 + 1, name));
    }
    for (i, tag) in CATEGORIES.iter().enumerate() {
        changes = changes.insert(&Category::with_id(i as i64 + 1, tag));
    }
    for (id, blog) in POSTS {
        changes = changes.insert(&post(id, blog));
    }
    for (post_id, category_id) in POST_CATEGORIES {
        let blog = POSTS[post_id as usize - 1].1;
        let tag = CATEGORIES[category_id as usize - 1];
        changes = changes.associate(&post(post_id, blog), "categories", &Category::with_id(category_id, tag));
    }
    changes
}

fn post(id: i64, blog: i64) -> Post {
    Post::with_id(id, &format!("PostDummy{id}"), blog)
}

/// Inserts the sample data in one transaction if `Blogs` is empty.
///
/// # Examples
///
/// ```
/// use entity_store_core::catalog;
/// use entity_store_sqlite::Database;
///
/// let mut db = Database::open_in_memory(catalog::blog_model()).unwrap();
/// db.run_migrations().unwrap();
///
/// assert!(db.seed_if_empty().unwrap().seeded);
/// assert!(!db.seed_if_empty().unwrap().seeded);
/// ```
pub fn seed_if_empty(conn: &mut Connection, model: &SchemaModel) -> Result<SeedReport> {
    let tx = conn.transaction()?;
    let mapper = Mapper::new(&tx, model);

    if mapper.count::<Blog>()? > 0 {
        info!("database already has blogs; skipping seed");
        return Ok(SeedReport::default());
    }

    let saved = mapper.save(&sample_data())?;
    tx.commit()?;

    let report = SeedReport {
        seeded: true,
        blogs: BLOGS.len(),
        categories: CATEGORIES.len(),
        posts: POSTS.len(),
        associations: saved.associated,
    };
    info!(
        blogs = report.blogs,
        categories = report.categories,
        posts = report.posts,
        associations = report.associations,
        "seeded sample data"
    );
    Ok(report)
}
