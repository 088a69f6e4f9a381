//! Predicate queries over one entity type.
//!
//! [`Query`] is a small builder: a [`Filter`], an optional ordering and an
//! optional limit. Results come back ordered by primary key ascending unless
//! another order is given. [`Query::iter`] is lazy: [`Rows`] fetches one page
//! of `page_size` rows per round trip as it is consumed.
//!
//! # Example
//!
//! ```
//! use entity_store_core::{Blog, catalog};
//! use entity_store_sqlite::{Database, Filter};
//!
//! let mut db = Database::open_in_memory(catalog::blog_model()).unwrap();
//! db.run_migrations().unwrap();
//! db.seed_if_empty().unwrap();
//!
//! let blogs: Vec<Blog> = db.query::<Blog>().unwrap()
//!     .filter(Filter::ge("id", 1_i64))
//!     .fetch_all()
//!     .unwrap();
//! assert_eq!(blogs.len(), 4);
//! ```

use std::collections::VecDeque;
use std::marker::PhantomData;

use entity_store_core::{Entity, EntityDef, Record, Value};
use rusqlite::types::Value as SqlValue;
use rusqlite::{Connection, params_from_iter};

use crate::convert::{into_entity, read_row, select_list, to_sql_value};
use crate::error::{Result, StoreError};
use crate::schema::quote_ident;

/// Comparison operator of a [`Filter::Compare`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CmpOp {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
}

impl CmpOp {
    fn sql(self) -> &'static str {
        match self {
            CmpOp::Eq => "=",
            CmpOp::Ne => "<>",
            CmpOp::Lt => "<",
            CmpOp::Le => "<=",
            CmpOp::Gt => ">",
            CmpOp::Ge => ">=",
        }
    }
}

/// Row predicate.
///
/// # Examples
///
/// ```
/// use entity_store_sqlite::Filter;
///
/// let f = Filter::ge("id", 1_i64).and(Filter::le("id", 2_i64));
/// assert!(matches!(f, Filter::And(ref parts) if parts.len() == 2));
/// assert_eq!(Filter::all().and(Filter::eq("name", "Dummy2")), Filter::eq("name", "Dummy2"));
/// ```
#[derive(Debug, Clone, PartialEq)]
pub enum Filter {
    /// Matches every row.
    All,
    /// `column op value`. Comparing with `NULL` using `Eq`/`Ne` becomes
    /// `IS NULL` / `IS NOT NULL`.
    Compare {
        column: String,
        op: CmpOp,
        value: Value,
    },
    /// Conjunction.
    And(Vec<Filter>),
}

impl Filter {
    pub fn all() -> Self {
        Filter::All
    }

    pub fn eq(column: &str, value: impl Into<Value>) -> Self {
        Self::compare(column, CmpOp::Eq, value)
    }

    pub fn ne(column: &str, value: impl Into<Value>) -> Self {
        Self::compare(column, CmpOp::Ne, value)
    }

    pub fn lt(column: &str, value: impl Into<Value>) -> Self {
        Self::compare(column, CmpOp::Lt, value)
    }

    pub fn le(column: &str, value: impl Into<Value>) -> Self {
        Self::compare(column, CmpOp::Le, value)
    }

    pub fn gt(column: &str, value: impl Into<Value>) -> Self {
        Self::compare(column, CmpOp::Gt, value)
    }

    pub fn ge(column: &str, value: impl Into<Value>) -> Self {
        Self::compare(column, CmpOp::Ge, value)
    }

    fn compare(column: &str, op: CmpOp, value: impl Into<Value>) -> Self {
        Filter::Compare {
            column: column.to_string(),
            op,
            value: value.into(),
        }
    }

    /// Combines two filters; both must match.
    pub fn and(self, other: Filter) -> Filter {
        match (self, other) {
            (Filter::All, f) | (f, Filter::All) => f,
            (Filter::And(mut a), Filter::And(b)) => {
                a.extend(b);
                Filter::And(a)
            }
            (Filter::And(mut a), f) => {
                a.push(f);
                Filter::And(a)
            }
            (f, g) => Filter::And(vec![f, g]),
        }
    }

    /// Renders the predicate, appending bound values to `params`.
    pub(crate) fn to_sql(&self, def: &EntityDef, params: &mut Vec<SqlValue>) -> Result<String> {
        match self {
            Filter::All => Ok("1 = 1".to_string()),
            Filter::Compare { column, op, value } => {
                if !def.has_column(column) {
                    return Err(StoreError::UnknownColumn {
                        entity: def.name.clone(),
                        column: column.clone(),
                    });
                }
                let column = quote_ident(column);
                match (op, value) {
                    (CmpOp::Eq, Value::Null) => Ok(format!("{column} IS NULL")),
                    (CmpOp::Ne, Value::Null) => Ok(format!("{column} IS NOT NULL")),
                    _ => {
                        params.push(to_sql_value(value));
                        Ok(format!("{column} {} ?", op.sql()))
                    }
                }
            }
            Filter::And(parts) if parts.is_empty() => Ok("1 = 1".to_string()),
            Filter::And(parts) => {
                let rendered = parts
                    .iter()
                    .map(|p| p.to_sql(def, params).map(|s| format!("({s})")))
                    .collect::<Result<Vec<_>>>()?;
                Ok(rendered.join(" AND "))
            }
        }
    }
}

/// Sort direction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Order {
    #[default]
    Asc,
    Desc,
}

impl Order {
    fn sql(self) -> &'static str {
        match self {
            Order::Asc => "ASC",
            Order::Desc => "DESC",
        }
    }
}

/// Query builder over entity type `E`.
///
/// Obtained from [`Database::query`](crate::Database::query).
pub struct Query<'a, E> {
    conn: &'a Connection,
    def: &'a EntityDef,
    filter: Filter,
    order: Option<(String, Order)>,
    limit: Option<usize>,
    page_size: usize,
    _entity: PhantomData<fn() -> E>,
}

impl<'a, E: Entity> Query<'a, E> {
    pub(crate) fn new(conn: &'a Connection, def: &'a EntityDef, page_size: usize) -> Self {
        Self {
            conn,
            def,
            filter: Filter::All,
            order: None,
            limit: None,
            page_size: page_size.max(1),
            _entity: PhantomData,
        }
    }

    /// Adds a predicate; multiple calls are combined with `AND`.
    pub fn filter(mut self, filter: Filter) -> Self {
        self.filter = std::mem::replace(&mut self.filter, Filter::All).and(filter);
        self
    }

    /// Orders by `column`; ties are broken by primary key ascending.
    pub fn order_by(mut self, column: &str, order: Order) -> Self {
        self.order = Some((column.to_string(), order));
        self
    }

    /// Returns at most `n` rows.
    pub fn limit(mut self, n: usize) -> Self {
        self.limit = Some(n);
        self
    }

    /// Overrides the number of rows fetched per page.
    pub fn page_size(mut self, n: usize) -> Self {
        self.page_size = n.max(1);
        self
    }

    /// Starts lazy iteration.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::UnknownColumn`] if the filter or ordering names
    /// a column the entity does not have.
    pub fn iter(self) -> Result<Rows<'a, E>> {
        let mut params = Vec::new();
        let predicate = self.filter.to_sql(self.def, &mut params)?;
        let sql = format!(
            "SELECT {} FROM {} WHERE {predicate} {} LIMIT ? OFFSET ?",
            select_list(self.def, None),
            quote_ident(&self.def.table),
            self.order_clause()?
        );
        Ok(Rows {
            conn: self.conn,
            def: self.def,
            sql,
            params,
            offset: 0,
            remaining: self.limit,
            page_size: self.page_size,
            buffer: VecDeque::new(),
            exhausted: false,
            _entity: PhantomData,
        })
    }

    /// Collects every matching entity.
    pub fn fetch_all(self) -> Result<Vec<E>> {
        self.iter()?.collect()
    }

    /// Returns the first matching entity, if any.
    pub fn first(self) -> Result<Option<E>> {
        self.limit(1).iter()?.next().transpose()
    }

    /// Counts matching rows, honoring the limit.
    pub fn count(self) -> Result<usize> {
        let mut params = Vec::new();
        let predicate = self.filter.to_sql(self.def, &mut params)?;
        let count: i64 = self.conn.query_row(
            &format!(
                "SELECT COUNT(*) FROM {} WHERE {predicate}",
                quote_ident(&self.def.table)
            ),
            params_from_iter(params.iter()),
            |row| row.get(0),
        )?;
        let count = count as usize;
        Ok(self.limit.map_or(count, |l| count.min(l)))
    }

    fn order_clause(&self) -> Result<String> {
        let pk = quote_ident(&self.def.primary_key);
        match &self.order {
            None => Ok(format!("ORDER BY {pk} ASC")),
            Some((column, order)) => {
                if !self.def.has_column(column) {
                    return Err(StoreError::UnknownColumn {
                        entity: self.def.name.clone(),
                        column: column.clone(),
                    });
                }
                if *column == self.def.primary_key {
                    Ok(format!("ORDER BY {pk} {}", order.sql()))
                } else {
                    Ok(format!(
                        "ORDER BY {} {}, {pk} ASC",
                        quote_ident(column),
                        order.sql()
                    ))
                }
            }
        }
    }
}

/// Lazy iterator over query results, fetched a page at a time.
pub struct Rows<'a, E> {
    conn: &'a Connection,
    def: &'a EntityDef,
    sql: String,
    params: Vec<SqlValue>,
    offset: usize,
    remaining: Option<usize>,
    page_size: usize,
    buffer: VecDeque<(i64, Record)>,
    exhausted: bool,
    _entity: PhantomData<fn() -> E>,
}

impl<E: Entity> Rows<'_, E> {
    fn fetch_page(&mut self) -> Result<()> {
        let want = match self.remaining {
            Some(0) => {
                self.exhausted = true;
                return Ok(());
            }
            Some(r) => r.min(self.page_size),
            None => self.page_size,
        };

        let (conn, def) = (self.conn, self.def);
        let mut stmt = conn.prepare_cached(&self.sql)?;
        let mut params = self.params.clone();
        params.push(SqlValue::Integer(want as i64));
        params.push(SqlValue::Integer(self.offset as i64));

        let rows = stmt.query_map(params_from_iter(params.iter()), |row| read_row(def, row))?;
        let mut fetched = 0;
        for row in rows {
            self.buffer.push_back(row?);
            fetched += 1;
        }

        self.offset += fetched;
        if let Some(r) = self.remaining.as_mut() {
            *r -= fetched;
        }
        if fetched < want {
            self.exhausted = true;
        }
        Ok(())
    }
}

impl<E: Entity> Iterator for Rows<'_, E> {
    type Item = Result<E>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.buffer.is_empty() && !self.exhausted {
            if let Err(err) = self.fetch_page() {
                self.exhausted = true;
                return Some(Err(err));
            }
        }
        let row = self.buffer.pop_front()?;
        Some(into_entity(row))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use entity_store_core::{Blog, catalog};

    fn blogs_table(count: i64) -> Connection {
        let conn = Connection::open_in_memory().unwrap();
        conn.execute_batch("CREATE TABLE \"Blogs\" (\"id\" INTEGER PRIMARY KEY, \"name\" TEXT NOT NULL);")
            .unwrap();
        for i in 1..=count {
            conn.execute(
                "INSERT INTO \"Blogs\" (\"id\", \"name\") VALUES (?1, ?2)",
                rusqlite::params![i, format!("Dummy{i}")],
            )
            .unwrap();
        }
        conn
    }

    #[test]
    fn test_filter_sql_and_params() {
        let model = catalog::blog_model();
        let def = model.entity("Blog").unwrap();
        let mut params = Vec::new();
        let sql = Filter::ge("id", 1_i64)
            .and(Filter::ne("name", Value::Null))
            .to_sql(def, &mut params)
            .unwrap();
        assert_eq!(sql, "(\"id\" >= ?) AND (\"name\" IS NOT NULL)");
        assert_eq!(params, vec![SqlValue::Integer(1)]);
    }

    #[test]
    fn test_unknown_column_is_rejected() {
        let model = catalog::blog_model();
        let def = model.entity("Blog").unwrap();
        let mut params = Vec::new();
        let err = Filter::eq("title", "x").to_sql(def, &mut params).unwrap_err();
        assert!(matches!(err, StoreError::UnknownColumn { ref column, .. } if column == "title"));
    }

    #[test]
    fn test_iter_pages_through_all_rows_in_key_order() {
        let conn = blogs_table(7);
        let model = catalog::blog_model();
        let def = model.entity("Blog").unwrap();
        let ids: Vec<i64> = Query::<Blog>::new(&conn, def, 3)
            .iter()
            .unwrap()
            .map(|b| b.unwrap().id.unwrap())
            .collect();
        assert_eq!(ids, vec![1, 2, 3, 4, 5, 6, 7]);
    }

    #[test]
    fn test_iter_is_lazy() {
        let conn = blogs_table(5);
        let model = catalog::blog_model();
        let def = model.entity("Blog").unwrap();
        let mut rows = Query::<Blog>::new(&conn, def, 2).iter().unwrap();
        assert_eq!(rows.next().unwrap().unwrap().id, Some(1));
        // Rows inserted after the first page show up in later pages.
        conn.execute("INSERT INTO \"Blogs\" (\"id\", \"name\") VALUES (6, 'late')", [])
            .unwrap();
        assert_eq!(rows.count(), 5);
    }

    #[test]
    fn test_order_limit_first_and_count() {
        let conn = blogs_table(4);
        let model = catalog::blog_model();
        let def = model.entity("Blog").unwrap();

        let desc: Vec<i64> = Query::<Blog>::new(&conn, def, 2)
            .order_by("name", Order::Desc)
            .limit(3)
            .fetch_all()
            .unwrap()
            .into_iter()
            .map(|b| b.id.unwrap())
            .collect();
        assert_eq!(desc, vec![4, 3, 2]);

        let second = Query::<Blog>::new(&conn, def, 64)
            .filter(Filter::eq("id", 2_i64))
            .first()
            .unwrap();
        assert_eq!(second, Some(Blog::with_id(2, "Dummy2")));

        let count = Query::<Blog>::new(&conn, def, 64)
            .filter(Filter::gt("id", 1_i64))
            .count()
            .unwrap();
        assert_eq!(count, 3);

        let none = Query::<Blog>::new(&conn, def, 64)
            .filter(Filter::gt("id", 10_i64))
            .first()
            .unwrap();
        assert_eq!(none, None);
    }

    #[test]
    fn test_unknown_order_column() {
        let conn = blogs_table(1);
        let model = catalog::blog_model();
        let def = model.entity("Blog").unwrap();
        let result = Query::<Blog>::new(&conn, def, 64).order_by("title", Order::Asc).iter();
        assert!(matches!(result, Err(StoreError::UnknownColumn { .. })));
    }
}
