//! SQL text generation shared by the planner, applier and mapper.
//!
//! Identifiers are validated by the schema model before they get here, and
//! are always emitted double-quoted so mixed-case table names such as
//! `PostCategories` survive verbatim.
//!
//! # Tracking table
//!
//! `SchemaVersion` holds one row per applied migration:
//!
//! - `version` — strictly increasing migration number
//! - `migration_name` — generated, unique name
//! - `provider` — provider name passed to the applier
//! - `model_hash` / `model_snapshot` — fingerprint and JSON of the model
//! - `step_count`, `applied_at`

use entity_store_core::{SCHEMA_VERSION_TABLE, SchemaModel};

/// Quotes an identifier for use in SQL text.
pub(crate) fn quote_ident(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

/// Quotes and comma-joins a list of identifiers.
pub(crate) fn quote_list<'a>(names: impl IntoIterator<Item = &'a str>) -> String {
    names
        .into_iter()
        .map(quote_ident)
        .collect::<Vec<_>>()
        .join(", ")
}

/// Generates the DDL for the migration-tracking table.
pub(crate) fn tracking_table_sql() -> String {
    format!(
        r#"
CREATE TABLE IF NOT EXISTS {table} (
    version INTEGER PRIMARY KEY,
    migration_name TEXT NOT NULL UNIQUE,
    provider TEXT NOT NULL,
    model_hash TEXT NOT NULL,
    model_snapshot TEXT NOT NULL,
    step_count INTEGER NOT NULL,
    applied_at TEXT NOT NULL
);
"#,
        table = quote_ident(SCHEMA_VERSION_TABLE)
    )
}

/// Generates SQL to drop every model table plus the tracking table, in
/// reverse dependency order.
pub(crate) fn drop_sql(model: &SchemaModel) -> String {
    let mut sql = String::new();
    for join in model.join_tables().iter().rev() {
        sql.push_str(&format!("DROP TABLE IF EXISTS {};\n", quote_ident(&join.table)));
    }
    for entity in model.entities().iter().rev() {
        sql.push_str(&format!("DROP TABLE IF EXISTS {};\n", quote_ident(&entity.table)));
    }
    sql.push_str(&format!(
        "DROP TABLE IF EXISTS {};\n",
        quote_ident(SCHEMA_VERSION_TABLE)
    ));
    sql
}

#[cfg(test)]
mod tests {
    use super::*;
    use entity_store_core::catalog;

    #[test]
    fn test_quote_ident() {
        assert_eq!(quote_ident("Blogs"), "\"Blogs\"");
        assert_eq!(quote_ident("we\"ird"), "\"we\"\"ird\"");
        assert_eq!(quote_list(["postId", "categoryId"]), "\"postId\", \"categoryId\"");
    }

    #[test]
    fn test_tracking_table_sql_is_idempotent() {
        let conn = rusqlite::Connection::open_in_memory().unwrap();
        conn.execute_batch(&tracking_table_sql()).unwrap();
        conn.execute_batch(&tracking_table_sql()).unwrap();
    }

    #[test]
    fn test_drop_sql_order() {
        let sql = drop_sql(&catalog::blog_model());
        let position = |t: &str| sql.find(&format!("DROP TABLE IF EXISTS \"{t}\"")).unwrap();
        assert!(position("PostCategories") < position("Categories"));
        assert!(position("Posts") < position("Blogs"));
        assert!(position("Blogs") < position("SchemaVersion"));
    }
}
