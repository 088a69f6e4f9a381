//! Storage-neutral row values and the [`Entity`] mapping trait.
//!
//! [`Value`] and [`Record`] describe a row without tying it to a database
//! driver; storage backends convert to and from their own value types.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// A single column value.
///
/// # Examples
///
/// ```
/// use entity_store_core::Value;
///
/// assert_eq!(Value::from("C++").to_sql_literal(), "'C++'");
/// assert_eq!(Value::from(4_i64).to_sql_literal(), "4");
/// assert_eq!(Value::Text("it's".into()).to_sql_literal(), "'it''s'");
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Value {
    /// SQL `NULL`.
    Null,
    /// Integer (also used for booleans).
    Integer(i64),
    /// Floating point.
    Real(f64),
    /// Text.
    Text(String),
}

impl Value {
    /// Renders the value as an SQL literal, for use in `DEFAULT` clauses.
    pub fn to_sql_literal(&self) -> String {
        match self {
            Value::Null => "NULL".to_string(),
            Value::Integer(i) => i.to_string(),
            Value::Real(r) => {
                let s = r.to_string();
                if s.contains('.') || s.contains('e') { s } else { format!("{s}.0") }
            }
            Value::Text(t) => format!("'{}'", t.replace('\'', "''")),
        }
    }

    /// Short type name, used in error messages.
    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Null => "null",
            Value::Integer(_) => "integer",
            Value::Real(_) => "real",
            Value::Text(_) => "text",
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => f.write_str("NULL"),
            Value::Integer(i) => write!(f, "{i}"),
            Value::Real(r) => write!(f, "{r}"),
            Value::Text(t) => f.write_str(t),
        }
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Value::Integer(v)
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Value::Integer(v as i64)
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Value::Real(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::Text(v.to_string())
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Value::Text(v)
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(v: Option<T>) -> Self {
        v.map_or(Value::Null, Into::into)
    }
}

/// Failure to materialize an entity from a [`Record`].
#[derive(Debug, Clone, PartialEq, Error)]
pub enum RecordError {
    /// The record lacks a column the entity needs.
    #[error("missing column '{0}'")]
    MissingColumn(String),
    /// The column holds a value of the wrong type.
    #[error("column '{column}' expected {expected}, found {found}")]
    TypeMismatch {
        column: String,
        expected: &'static str,
        found: &'static str,
    },
}

/// A row as a column-name → value map.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Record {
    values: BTreeMap<String, Value>,
}

impl Record {
    /// Creates an empty record.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets a column, builder style.
    pub fn with(mut self, column: &str, value: impl Into<Value>) -> Self {
        self.set(column, value);
        self
    }

    /// Sets a column.
    pub fn set(&mut self, column: &str, value: impl Into<Value>) {
        self.values.insert(column.to_string(), value.into());
    }

    /// Returns the raw value of a column.
    pub fn get(&self, column: &str) -> Option<&Value> {
        self.values.get(column)
    }

    /// Iterates `(column, value)` pairs in column-name order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.values.iter().map(|(k, v)| (k.as_str(), v))
    }

    /// Number of columns.
    pub fn len(&self) -> usize {
        self.values.len()
    }

    /// Returns `true` if no column is set.
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Reads a required integer column.
    pub fn integer(&self, column: &str) -> Result<i64, RecordError> {
        match self.require(column)? {
            Value::Integer(i) => Ok(*i),
            other => Err(mismatch(column, "integer", other)),
        }
    }

    /// Reads a required text column.
    pub fn text(&self, column: &str) -> Result<String, RecordError> {
        match self.require(column)? {
            Value::Text(t) => Ok(t.clone()),
            other => Err(mismatch(column, "text", other)),
        }
    }

    /// Reads a nullable text column; a missing column reads as `None`.
    pub fn optional_text(&self, column: &str) -> Result<Option<String>, RecordError> {
        match self.get(column) {
            None | Some(Value::Null) => Ok(None),
            Some(Value::Text(t)) => Ok(Some(t.clone())),
            Some(other) => Err(mismatch(column, "text", other)),
        }
    }

    fn require(&self, column: &str) -> Result<&Value, RecordError> {
        self.get(column)
            .ok_or_else(|| RecordError::MissingColumn(column.to_string()))
    }
}

fn mismatch(column: &str, expected: &'static str, found: &Value) -> RecordError {
    RecordError::TypeMismatch {
        column: column.to_string(),
        expected,
        found: found.type_name(),
    }
}

/// Maps a Rust type onto a declared entity.
///
/// `ENTITY` names the [`EntityDef`](crate::EntityDef) in the model. The
/// primary key travels separately from the other columns so the mapping
/// layer can leave it unset on insert and never touch it on update.
///
/// # Examples
///
/// ```
/// use entity_store_core::{Blog, Entity};
///
/// let blog = Blog::new("Dummy1");
/// assert_eq!(Blog::ENTITY, "Blog");
/// assert_eq!(blog.id(), None);
/// assert_eq!(blog.to_record().text("name").unwrap(), "Dummy1");
/// ```
pub trait Entity: Sized {
    /// Name of the entity declaration.
    const ENTITY: &'static str;

    /// Primary key, `None` until persisted.
    fn id(&self) -> Option<i64>;

    /// Stores the primary key assigned on insert.
    fn set_id(&mut self, id: i64);

    /// Non-key column values.
    fn to_record(&self) -> Record;

    /// Rebuilds the entity from a row holding `id` plus every field.
    fn from_record(id: i64, record: &Record) -> Result<Self, RecordError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_record_typed_reads() {
        let record = Record::new().with("name", "Dummy1").with("blogId", 3_i64);
        assert_eq!(record.text("name").unwrap(), "Dummy1");
        assert_eq!(record.integer("blogId").unwrap(), 3);
        assert_eq!(
            record.integer("name"),
            Err(RecordError::TypeMismatch {
                column: "name".to_string(),
                expected: "integer",
                found: "text",
            })
        );
        assert_eq!(
            record.text("title"),
            Err(RecordError::MissingColumn("title".to_string()))
        );
    }

    #[test]
    fn test_optional_text() {
        let record = Record::new().with("note", Value::Null);
        assert_eq!(record.optional_text("note").unwrap(), None);
        assert_eq!(record.optional_text("absent").unwrap(), None);
    }

    #[test]
    fn test_sql_literals() {
        assert_eq!(Value::Null.to_sql_literal(), "NULL");
        assert_eq!(Value::Real(1.0).to_sql_literal(), "1.0");
        assert_eq!(Value::Real(0.5).to_sql_literal(), "0.5");
        assert_eq!(Value::from(true).to_sql_literal(), "1");
        assert_eq!(Value::from(None::<i64>), Value::Null);
    }
}
