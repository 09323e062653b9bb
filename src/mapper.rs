//! Entity mapping on top of the statement builders.
//!
//! An [`Entity`] describes its table columns once; [`SqlBuilder`] turns filters
//! and change sets into statements, runs them through [`Database`] and maps the
//! rows back. Every statement is logged at `info` before it is dispatched.

use crate::builder::{
    BoundQuery, Changes, Filter, NamedParams, build_count, build_delete, build_insert,
    build_select, build_update, named_query,
};
use crate::db::{Context, Database, ExecResult};
use crate::error::{DbError, DbResult};
use crate::models::{Row, Value};
use tracing::info;

/// A table column as seen by the mapper.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Column {
    pub name: &'static str,
    /// Filled in by the database (AUTO_INCREMENT ids, defaults). Skipped on insert.
    pub generated: bool,
}

impl Column {
    pub const fn new(name: &'static str) -> Self {
        Self {
            name,
            generated: false,
        }
    }

    pub const fn generated(name: &'static str) -> Self {
        Self {
            name,
            generated: true,
        }
    }
}

/// A type stored as one row of a table.
///
/// `to_values` yields one value per entry of `COLUMNS`, in the same order.
///
/// ```ignore
/// struct User { id: i64, name: String }
///
/// impl Entity for User {
///     const COLUMNS: &'static [Column] = &[Column::generated("id"), Column::new("name")];
///
///     fn to_values(&self) -> Vec<Value> {
///         vec![self.id.into(), self.name.as_str().into()]
///     }
///
///     fn from_row(row: &Row) -> DbResult<Self> {
///         Ok(Self { id: row.try_get("id")?, name: row.try_get("name")? })
///     }
/// }
/// ```
pub trait Entity: Sized {
    const COLUMNS: &'static [Column];

    fn to_values(&self) -> Vec<Value>;

    fn from_row(row: &Row) -> DbResult<Self>;
}

/// Untyped rows: selects `*` and maps every column.
impl Entity for Row {
    const COLUMNS: &'static [Column] = &[];

    fn to_values(&self) -> Vec<Value> {
        self.values().to_vec()
    }

    fn from_row(row: &Row) -> DbResult<Self> {
        Ok(row.clone())
    }
}

/// CRUD and raw-template operations for [`Entity`] types.
#[derive(Debug, Clone)]
pub struct SqlBuilder {
    db: Database,
}

impl SqlBuilder {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    pub fn database(&self) -> &Database {
        &self.db
    }

    /// First row matching `filter`, selected with `LIMIT 1`.
    ///
    /// An empty `fields` list selects the entity's columns.
    pub async fn find_one<T: Entity>(
        &self,
        ctx: &mut Context<'_>,
        table: &str,
        filter: &Filter,
        fields: &[&str],
    ) -> DbResult<Option<T>> {
        let filter = filter.clone().with_limit(1);
        let query = build_select(table, &select_fields::<T>(fields), &filter)?;
        log_statement(&query);
        self.db
            .query_one(ctx, &query.sql, &query.args)
            .await?
            .map(|row| T::from_row(&row))
            .transpose()
    }

    /// Every row matching `filter`.
    pub async fn find_all<T: Entity>(
        &self,
        ctx: &mut Context<'_>,
        table: &str,
        filter: &Filter,
        fields: &[&str],
    ) -> DbResult<Vec<T>> {
        let query = build_select(table, &select_fields::<T>(fields), filter)?;
        log_statement(&query);
        map_rows(self.db.query_all(ctx, &query.sql, &query.args).await?)
    }

    /// Number of rows matching `filter`.
    pub async fn count(&self, ctx: &mut Context<'_>, table: &str, filter: &Filter) -> DbResult<u64> {
        let query = build_count(table, filter)?;
        log_statement(&query);
        let row = self
            .db
            .query_one(ctx, &query.sql, &query.args)
            .await?
            .ok_or_else(|| DbError::internal("COUNT(*) returned no row"))?;
        row.try_get("count")
    }

    /// Insert one entity, skipping generated columns.
    pub async fn insert<T: Entity>(
        &self,
        ctx: &mut Context<'_>,
        table: &str,
        entity: &T,
    ) -> DbResult<ExecResult> {
        self.insert_many(ctx, table, std::slice::from_ref(entity))
            .await
    }

    /// Insert several entities with one multi-row INSERT.
    pub async fn insert_many<T: Entity>(
        &self,
        ctx: &mut Context<'_>,
        table: &str,
        entities: &[T],
    ) -> DbResult<ExecResult> {
        let columns: Vec<&str> = T::COLUMNS
            .iter()
            .filter(|c| !c.generated)
            .map(|c| c.name)
            .collect();
        let rows = entities
            .iter()
            .map(insert_values)
            .collect::<DbResult<Vec<_>>>()?;

        let query = build_insert(table, &columns, &rows)?;
        log_statement(&query);
        self.db.execute(ctx, &query.sql, &query.args).await
    }

    pub async fn update(
        &self,
        ctx: &mut Context<'_>,
        table: &str,
        filter: &Filter,
        changes: &Changes,
    ) -> DbResult<ExecResult> {
        let query = build_update(table, filter, changes)?;
        log_statement(&query);
        self.db.execute(ctx, &query.sql, &query.args).await
    }

    pub async fn delete(
        &self,
        ctx: &mut Context<'_>,
        table: &str,
        filter: &Filter,
    ) -> DbResult<ExecResult> {
        let query = build_delete(table, filter)?;
        log_statement(&query);
        self.db.execute(ctx, &query.sql, &query.args).await
    }

    /// Run a `{{name}}` template as a read and map every row.
    pub async fn raw_query<T: Entity>(
        &self,
        ctx: &mut Context<'_>,
        template: &str,
        params: &NamedParams,
    ) -> DbResult<Vec<T>> {
        let query = named_query(template, params)?;
        log_statement(&query);
        map_rows(self.db.query_all(ctx, &query.sql, &query.args).await?)
    }

    /// Run a `{{name}}` template as a read and map the first row.
    pub async fn raw_query_one<T: Entity>(
        &self,
        ctx: &mut Context<'_>,
        template: &str,
        params: &NamedParams,
    ) -> DbResult<Option<T>> {
        let query = named_query(template, params)?;
        log_statement(&query);
        self.db
            .query_one(ctx, &query.sql, &query.args)
            .await?
            .map(|row| T::from_row(&row))
            .transpose()
    }

    /// Run a `{{name}}` template on the write path.
    pub async fn raw_execute(
        &self,
        ctx: &mut Context<'_>,
        template: &str,
        params: &NamedParams,
    ) -> DbResult<ExecResult> {
        let query = named_query(template, params)?;
        log_statement(&query);
        self.db.execute(ctx, &query.sql, &query.args).await
    }
}

fn select_fields<'a, T: Entity>(fields: &[&'a str]) -> Vec<&'a str> {
    if fields.is_empty() {
        T::COLUMNS.iter().map(|c| c.name).collect()
    } else {
        fields.to_vec()
    }
}

fn insert_values<T: Entity>(entity: &T) -> DbResult<Vec<Value>> {
    let values = entity.to_values();
    if values.len() != T::COLUMNS.len() {
        return Err(DbError::invalid_input(format!(
            "entity yields {} values for {} columns",
            values.len(),
            T::COLUMNS.len()
        )));
    }
    Ok(T::COLUMNS
        .iter()
        .zip(values)
        .filter(|(column, _)| !column.generated)
        .map(|(_, value)| value)
        .collect())
}

fn map_rows<T: Entity>(rows: Vec<Row>) -> DbResult<Vec<T>> {
    rows.iter().map(T::from_row).collect()
}

fn log_statement(query: &BoundQuery) {
    info!(sql = %query.sql, args = ?query.args, "Executing statement");
}
