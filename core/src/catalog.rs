//! The blog sample catalog: Blog, Post, Category and their join table.
//!
//! ```text
//! Blogs 1 ──< Posts >──< PostCategories >──< Categories
//! ```

use serde::{Deserialize, Serialize};

use crate::model::SchemaModel;
use crate::types::{EntityDef, FieldDef, FieldType, JoinTableDef, OnDelete};
use crate::value::{Entity, Record, RecordError};

/// Declares the blog model.
///
/// # Examples
///
/// ```
/// use entity_store_core::{catalog, RelationKind};
///
/// let model = catalog::blog_model();
/// let posts = model.relationship("Category", "posts").unwrap();
/// assert!(matches!(posts.kind, RelationKind::ManyToMany { .. }));
/// ```
pub fn blog_model() -> SchemaModel {
    let model = SchemaModel::unchecked(
        vec![
            EntityDef::new("Blog", "Blogs")
                .with_field(FieldDef::required("name", FieldType::Text))
                .with_has_many("posts", "Post", "blogId"),
            EntityDef::new("Post", "Posts")
                .with_field(FieldDef::required("title", FieldType::Text))
                .with_belongs_to("blog", "Blog", "blogId", OnDelete::Cascade)
                .with_many_to_many("categories", "Category", "PostCategories"),
            EntityDef::new("Category", "Categories")
                .with_field(FieldDef::required("tagName", FieldType::Text))
                .with_many_to_many("posts", "Post", "PostCategories"),
        ],
        vec![JoinTableDef::new(
            "PostCategories",
            ("postId", "Post"),
            ("categoryId", "Category"),
        )],
    );
    debug_assert!(crate::validate_model(&model).is_empty());
    model
}

/// A blog; owns zero or more posts.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Blog {
    pub id: Option<i64>,
    pub name: String,
}

impl Blog {
    /// Creates an unsaved blog.
    pub fn new(name: &str) -> Self {
        Self {
            id: None,
            name: name.to_string(),
        }
    }

    /// Creates a blog with an explicit primary key.
    pub fn with_id(id: i64, name: &str) -> Self {
        Self {
            id: Some(id),
            name: name.to_string(),
        }
    }
}

impl Entity for Blog {
    const ENTITY: &'static str = "Blog";

    fn id(&self) -> Option<i64> {
        self.id
    }

    fn set_id(&mut self, id: i64) {
        self.id = Some(id);
    }

    fn to_record(&self) -> Record {
        Record::new().with("name", self.name.as_str())
    }

    fn from_record(id: i64, record: &Record) -> Result<Self, RecordError> {
        Ok(Self {
            id: Some(id),
            name: record.text("name")?,
        })
    }
}

/// A post; belongs to exactly one blog and carries any number of categories.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Post {
    pub id: Option<i64>,
    pub title: String,
    pub blog_id: i64,
}

impl Post {
    /// Creates an unsaved post in `blog_id`.
    pub fn new(title: &str, blog_id: i64) -> Self {
        Self {
            id: None,
            title: title.to_string(),
            blog_id,
        }
    }

    /// Creates a post with an explicit primary key.
    pub fn with_id(id: i64, title: &str, blog_id: i64) -> Self {
        Self {
            id: Some(id),
            ..Self::new(title, blog_id)
        }
    }
}

impl Entity for Post {
    const ENTITY: &'static str = "Post";

    fn id(&self) -> Option<i64> {
        self.id
    }

    fn set_id(&mut self, id: i64) {
        self.id = Some(id);
    }

    fn to_record(&self) -> Record {
        Record::new()
            .with("title", self.title.as_str())
            .with("blogId", self.blog_id)
    }

    fn from_record(id: i64, record: &Record) -> Result<Self, RecordError> {
        Ok(Self {
            id: Some(id),
            title: record.text("title")?,
            blog_id: record.integer("blogId")?,
        })
    }
}

/// A tag shared by any number of posts.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Category {
    pub id: Option<i64>,
    pub tag_name: String,
}

impl Category {
    /// Creates an unsaved category.
    pub fn new(tag_name: &str) -> Self {
        Self {
            id: None,
            tag_name: tag_name.to_string(),
        }
    }

    /// Creates a category with an explicit primary key.
    pub fn with_id(id: i64, tag_name: &str) -> Self {
        Self {
            id: Some(id),
            tag_name: tag_name.to_string(),
        }
    }
}

impl Entity for Category {
    const ENTITY: &'static str = "Category";

    fn id(&self) -> Option<i64> {
        self.id
    }

    fn set_id(&mut self, id: i64) {
        self.id = Some(id);
    }

    fn to_record(&self) -> Record {
        Record::new().with("tagName", self.tag_name.as_str())
    }

    fn from_record(id: i64, record: &Record) -> Result<Self, RecordError> {
        Ok(Self {
            id: Some(id),
            tag_name: record.text("tagName")?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_entity_records_cover_declared_fields() {
        let model = blog_model();
        let records = [
            ("Blog", Blog::new("b").to_record()),
            ("Post", Post::new("p", 1).to_record()),
            ("Category", Category::new("c").to_record()),
        ];
        for (name, record) in records {
            let entity = model.entity(name).unwrap();
            let fields: Vec<_> = entity.fields.iter().map(|f| f.name.as_str()).collect();
            let columns: Vec<_> = record.iter().map(|(c, _)| c).collect();
            for field in &fields {
                assert!(columns.contains(field), "{name} record lacks {field}");
            }
            assert_eq!(fields.len(), columns.len());
        }
    }

    #[test]
    fn test_post_record_round_trip() {
        let post = Post::with_id(4, "PostDummy4", 2);
        let back = Post::from_record(4, &post.to_record()).unwrap();
        assert_eq!(back, post);
    }
}
