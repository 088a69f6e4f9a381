//! Conversion between [`entity_store_core::Value`] and SQLite values, and
//! between SQL rows and [`Record`]s.

use entity_store_core::{Entity, EntityDef, Record, Value};
use rusqlite::Row;
use rusqlite::types::{Type, Value as SqlValue};

use crate::error::Result;

/// Converts a model value into a SQLite value for binding.
pub(crate) fn to_sql_value(value: &Value) -> SqlValue {
    match value {
        Value::Null => SqlValue::Null,
        Value::Integer(i) => SqlValue::Integer(*i),
        Value::Real(r) => SqlValue::Real(*r),
        Value::Text(t) => SqlValue::Text(t.clone()),
    }
}

/// Converts a SQLite value read from column `index` into a model value.
///
/// Blobs have no model counterpart and are reported as a column type error.
pub(crate) fn from_sql_value(index: usize, name: &str, value: SqlValue) -> rusqlite::Result<Value> {
    match value {
        SqlValue::Null => Ok(Value::Null),
        SqlValue::Integer(i) => Ok(Value::Integer(i)),
        SqlValue::Real(r) => Ok(Value::Real(r)),
        SqlValue::Text(t) => Ok(Value::Text(t)),
        SqlValue::Blob(_) => Err(rusqlite::Error::InvalidColumnType(index, name.to_string(), Type::Blob)),
    }
}

/// Comma-separated, quoted column list for `SELECT`, primary key first,
/// each column qualified with `alias` when given.
pub(crate) fn select_list(def: &EntityDef, alias: Option<&str>) -> String {
    def.column_names()
        .map(|c| match alias {
            Some(a) => format!("{a}.{}", crate::schema::quote_ident(c)),
            None => crate::schema::quote_ident(c),
        })
        .collect::<Vec<_>>()
        .join(", ")
}

/// Reads a row selected with [`select_list`] into `(id, record)`.
pub(crate) fn read_row(def: &EntityDef, row: &Row<'_>) -> rusqlite::Result<(i64, Record)> {
    let id: i64 = row.get(0)?;
    let mut record = Record::new();
    for (offset, field) in def.fields.iter().enumerate() {
        let index = offset + 1;
        let raw: SqlValue = row.get(index)?;
        record.set(&field.name, from_sql_value(index, &field.name, raw)?);
    }
    Ok((id, record))
}

/// Builds an entity from a row read by [`read_row`].
pub(crate) fn into_entity<E: Entity>((id, record): (i64, Record)) -> Result<E> {
    Ok(E::from_record(id, &record)?)
}
