//! Query execution facade.
//!
//! [`Database`] routes every statement through the [`Manager`]:
//! - the transaction carried by the [`Context`] wins when there is one
//! - `query_*` otherwise runs on a read pool, `execute` on the write pool
//! - `prepare` is routed by classifying the statement text, and the returned
//!   [`PreparedStatement`] keeps that route for its own executions
//!
//! # Architecture
//!
//! The driver-specific code lives in two parallel submodules, `mysql` and
//! `sqlite`. Their functions are generic over the sqlx executor so the same code
//! serves a pool and a transaction connection. `describe` is the exception: it
//! needs the connection itself to clear what preparing left in its cache.

use crate::builder::{Route, classify};
use crate::config::{Config, Driver};
use crate::db::manager::Manager;
use crate::db::pool::DbPool;
use crate::db::transaction::{Context, DbTransaction};
use crate::error::{DbError, DbResult};
use crate::models::{Row, Value};
use serde::Serialize;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::timeout;
use tracing::debug;

/// Outcome of a write statement.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ExecResult {
    pub rows_affected: u64,
    /// Auto-generated id of the last inserted row, when the statement produced one.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_insert_id: Option<u64>,
}

/// Column names and placeholder count reported by the driver for a statement.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct StatementShape {
    pub columns: Vec<String>,
    pub params: Option<usize>,
}

impl StatementShape {
    fn of<'q, S: sqlx::Statement<'q>>(stmt: &S) -> Self {
        use sqlx::Column;

        Self {
            columns: stmt
                .columns()
                .iter()
                .map(|c| c.name().to_string())
                .collect(),
            params: stmt
                .parameters()
                .map(|p| p.either(|types| types.len(), |count| count)),
        }
    }
}

/// A statement whose shape is known and that can be run repeatedly.
///
/// The server-side statement is released as soon as its shape is read, so a
/// handle holds no connection. Each execution sends the text again with bound
/// values: on the transaction of the [`Context`] when it carries one, otherwise
/// on the pool `route` picked at prepare time.
#[derive(Debug, Clone)]
pub struct PreparedStatement {
    pub sql: String,
    /// Pool kind the statement was prepared on and runs on.
    pub route: Route,
    pub columns: Vec<String>,
    /// Number of `?` placeholders, when the driver reports it.
    pub params: Option<usize>,
    db: Database,
}

impl PreparedStatement {
    /// Run the statement and return its first row, if any.
    pub async fn query_one(
        &self,
        ctx: &mut Context<'_>,
        args: &[Value],
    ) -> DbResult<Option<Row>> {
        self.check_args(args)?;
        self.db
            .timed("query", async {
                match ctx.current_transaction() {
                    Some(tx) => tx.fetch_optional(&self.sql, args).await,
                    None => {
                        debug!(route = %self.route, sql = %self.sql, "Prepared query one");
                        fetch_optional(self.db.pool(self.route), &self.sql, args).await
                    }
                }
            })
            .await
    }

    /// Run the statement and return every row.
    pub async fn query_all(&self, ctx: &mut Context<'_>, args: &[Value]) -> DbResult<Vec<Row>> {
        self.check_args(args)?;
        self.db
            .timed("query", async {
                match ctx.current_transaction() {
                    Some(tx) => tx.fetch_all(&self.sql, args).await,
                    None => {
                        debug!(route = %self.route, sql = %self.sql, "Prepared query");
                        fetch_all(self.db.pool(self.route), &self.sql, args).await
                    }
                }
            })
            .await
    }

    /// Run the statement for its effect.
    pub async fn execute(&self, ctx: &mut Context<'_>, args: &[Value]) -> DbResult<ExecResult> {
        self.check_args(args)?;
        self.db
            .timed("execute", async {
                match ctx.current_transaction() {
                    Some(tx) => tx.execute(&self.sql, args).await,
                    None => {
                        let result = execute(self.db.pool(self.route), &self.sql, args).await?;
                        debug!(
                            route = %self.route,
                            sql = %self.sql,
                            rows_affected = result.rows_affected,
                            "Executed prepared"
                        );
                        Ok(result)
                    }
                }
            })
            .await
    }

    fn check_args(&self, args: &[Value]) -> DbResult<()> {
        match self.params {
            Some(expected) if expected != args.len() => Err(DbError::invalid_input(format!(
                "statement takes {} argument(s), got {}",
                expected,
                args.len()
            ))),
            _ => Ok(()),
        }
    }
}

/// Statement entry point shared by the mapper and the CLI.
///
/// Cheap to clone; every clone shares the same [`Manager`].
#[derive(Clone)]
pub struct Database {
    manager: Arc<Manager<DbPool>>,
    timeout: Option<Duration>,
}

impl std::fmt::Debug for Database {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Database")
            .field("manager", &self.manager)
            .field("timeout", &self.timeout)
            .finish()
    }
}

impl Database {
    pub fn new(manager: Arc<Manager<DbPool>>) -> Self {
        Self {
            manager,
            timeout: None,
        }
    }

    /// Open a [`Manager`] for `config` and wrap it.
    pub async fn open(config: Config) -> DbResult<Self> {
        Ok(Self::new(Arc::new(Manager::open(config).await?)))
    }

    /// Bound every statement issued through this handle by `limit`.
    pub fn with_timeout(mut self, limit: Duration) -> Self {
        self.timeout = Some(limit);
        self
    }

    pub fn manager(&self) -> &Arc<Manager<DbPool>> {
        &self.manager
    }

    pub fn driver(&self) -> Driver {
        self.manager.write_handle().driver()
    }

    /// Begin a transaction on the write pool.
    pub async fn begin(&self) -> DbResult<DbTransaction> {
        self.timed("begin", self.manager.write_handle().begin())
            .await
    }

    /// Run a query and return its first row, or `None` when it yields no rows.
    pub async fn query_one(
        &self,
        ctx: &mut Context<'_>,
        sql: &str,
        args: &[Value],
    ) -> DbResult<Option<Row>> {
        self.timed("query", async {
            match ctx.current_transaction() {
                Some(tx) => tx.fetch_optional(sql, args).await,
                None => {
                    debug!(route = %Route::Read, sql = %sql, "Query one");
                    fetch_optional(self.manager.read_handle(), sql, args).await
                }
            }
        })
        .await
    }

    /// Run a query and return every row.
    pub async fn query_all(
        &self,
        ctx: &mut Context<'_>,
        sql: &str,
        args: &[Value],
    ) -> DbResult<Vec<Row>> {
        self.timed("query", async {
            match ctx.current_transaction() {
                Some(tx) => tx.fetch_all(sql, args).await,
                None => {
                    debug!(route = %Route::Read, sql = %sql, "Query");
                    fetch_all(self.manager.read_handle(), sql, args).await
                }
            }
        })
        .await
    }

    /// Run a statement that returns no rows.
    pub async fn execute(
        &self,
        ctx: &mut Context<'_>,
        sql: &str,
        args: &[Value],
    ) -> DbResult<ExecResult> {
        self.timed("execute", async {
            match ctx.current_transaction() {
                Some(tx) => tx.execute(sql, args).await,
                None => {
                    let result = execute(self.manager.write_handle(), sql, args).await?;
                    debug!(
                        route = %Route::Write,
                        sql = %sql,
                        rows_affected = result.rows_affected,
                        "Executed"
                    );
                    Ok(result)
                }
            }
        })
        .await
    }

    /// Prepare `sql` to learn its shape, then release it.
    ///
    /// Read-only statements are prepared on a read pool; everything else,
    /// including text that does not parse, on the write pool. The returned
    /// handle runs on the same kind of pool.
    pub async fn prepare(&self, ctx: &mut Context<'_>, sql: &str) -> DbResult<PreparedStatement> {
        let (route, shape) = self
            .timed("prepare", async {
                match ctx.current_transaction() {
                    Some(tx) => Ok((Route::Write, tx.describe(sql).await?)),
                    None => {
                        let route = classify(sql, self.driver());
                        debug!(route = %route, sql = %sql, "Prepare");
                        Ok((route, describe(self.pool(route), sql).await?))
                    }
                }
            })
            .await?;
        Ok(PreparedStatement {
            sql: sql.to_string(),
            route,
            columns: shape.columns,
            params: shape.params,
            db: self.clone(),
        })
    }

    fn pool(&self, route: Route) -> &DbPool {
        match route {
            Route::Read => self.manager.read_handle(),
            Route::Write => self.manager.write_handle(),
        }
    }

    async fn timed<T, F>(&self, operation: &str, fut: F) -> DbResult<T>
    where
        F: Future<Output = DbResult<T>>,
    {
        match self.timeout {
            None => fut.await,
            Some(limit) => timeout(limit, fut)
                .await
                .map_err(|_| DbError::timeout(operation, limit))?,
        }
    }
}

// Pool-level dispatch. Errors pass through the pool so that an acquire timeout
// reports the pool's configured bound.

async fn fetch_all(pool: &DbPool, sql: &str, args: &[Value]) -> DbResult<Vec<Row>> {
    let result = crate::impl_db_dispatch!(pool, {
        MySql(p) => mysql::fetch_all(p, sql, args).await,
        SQLite(p) => sqlite::fetch_all(p, sql, args).await,
    });
    result.map_err(|e| pool.acquire_error(e))
}

async fn fetch_optional(pool: &DbPool, sql: &str, args: &[Value]) -> DbResult<Option<Row>> {
    let result = crate::impl_db_dispatch!(pool, {
        MySql(p) => mysql::fetch_optional(p, sql, args).await,
        SQLite(p) => sqlite::fetch_optional(p, sql, args).await,
    });
    result.map_err(|e| pool.acquire_error(e))
}

async fn execute(pool: &DbPool, sql: &str, args: &[Value]) -> DbResult<ExecResult> {
    let result = crate::impl_db_dispatch!(pool, {
        MySql(p) => mysql::execute(p, sql, args).await,
        SQLite(p) => sqlite::execute(p, sql, args).await,
    });
    result.map_err(|e| pool.acquire_error(e))
}

async fn describe(pool: &DbPool, sql: &str) -> DbResult<StatementShape> {
    let result = async {
        match pool {
            DbPool::MySql(p) => {
                let mut conn = p.acquire().await?;
                mysql::describe(&mut conn, sql).await
            }
            DbPool::SQLite(p) => {
                let mut conn = p.acquire().await?;
                sqlite::describe(&mut conn, sql).await
            }
        }
    }
    .await;
    result.map_err(|e| pool.acquire_error(e))
}

// =============================================================================
// Database-Specific Implementations
// =============================================================================
//
// Both modules expose the same functions. Statements without arguments are
// sent as plain text so that SQL the server refuses to prepare (stored
// procedure bodies, several statements at once) still runs. Nothing here
// leaves a statement in the connection's cache: bound statements are built
// with `persistent(false)` and `describe` clears what preparing cached.

pub(crate) mod mysql {
    use super::*;
    use crate::db::params::mysql_query;
    use crate::db::types::IntoRow;
    use futures_util::TryStreamExt;
    use sqlx::mysql::{MySqlConnection, MySqlRow};
    use sqlx::{Connection, Executor, MySql};

    pub async fn fetch_all<'e, 'c: 'e, E>(
        executor: E,
        sql: &'e str,
        args: &'e [Value],
    ) -> DbResult<Vec<Row>>
    where
        E: 'e + Executor<'c, Database = MySql>,
    {
        let rows: Vec<MySqlRow> = if args.is_empty() {
            executor.fetch(sql).try_collect().await?
        } else {
            mysql_query(sql, args).fetch(executor).try_collect().await?
        };
        rows.iter().map(IntoRow::to_row).collect()
    }

    pub async fn fetch_optional<'e, 'c: 'e, E>(
        executor: E,
        sql: &'e str,
        args: &'e [Value],
    ) -> DbResult<Option<Row>>
    where
        E: 'e + Executor<'c, Database = MySql>,
    {
        let row = if args.is_empty() {
            executor.fetch_optional(sql).await?
        } else {
            mysql_query(sql, args).fetch_optional(executor).await?
        };
        row.as_ref().map(IntoRow::to_row).transpose()
    }

    pub async fn execute<'e, 'c: 'e, E>(
        executor: E,
        sql: &'e str,
        args: &'e [Value],
    ) -> DbResult<ExecResult>
    where
        E: 'e + Executor<'c, Database = MySql>,
    {
        let result = if args.is_empty() {
            executor.execute(sql).await?
        } else {
            mysql_query(sql, args).execute(executor).await?
        };
        // MySQL reports 0 when no AUTO_INCREMENT value was generated.
        Ok(ExecResult {
            rows_affected: result.rows_affected(),
            last_insert_id: Some(result.last_insert_id()).filter(|id| *id > 0),
        })
    }

    /// Prepare on `conn` to read the statement's shape, then drop it from the
    /// connection's statement cache (closing it on the server).
    pub async fn describe(conn: &mut MySqlConnection, sql: &str) -> DbResult<StatementShape> {
        let shape = StatementShape::of(&Executor::prepare(&mut *conn, sql).await?);
        conn.clear_cached_statements().await?;
        Ok(shape)
    }
}

pub(crate) mod sqlite {
    use super::*;
    use crate::db::params::sqlite_query;
    use crate::db::types::IntoRow;
    use futures_util::TryStreamExt;
    use sqlx::sqlite::{SqliteConnection, SqliteRow};
    use sqlx::{Connection, Executor, Sqlite};

    pub async fn fetch_all<'e, 'c: 'e, E>(
        executor: E,
        sql: &'e str,
        args: &'e [Value],
    ) -> DbResult<Vec<Row>>
    where
        E: 'e + Executor<'c, Database = Sqlite>,
    {
        let rows: Vec<SqliteRow> = if args.is_empty() {
            executor.fetch(sql).try_collect().await?
        } else {
            sqlite_query(sql, args).fetch(executor).try_collect().await?
        };
        rows.iter().map(IntoRow::to_row).collect()
    }

    pub async fn fetch_optional<'e, 'c: 'e, E>(
        executor: E,
        sql: &'e str,
        args: &'e [Value],
    ) -> DbResult<Option<Row>>
    where
        E: 'e + Executor<'c, Database = Sqlite>,
    {
        let row = if args.is_empty() {
            executor.fetch_optional(sql).await?
        } else {
            sqlite_query(sql, args).fetch_optional(executor).await?
        };
        row.as_ref().map(IntoRow::to_row).transpose()
    }

    pub async fn execute<'e, 'c: 'e, E>(
        executor: E,
        sql: &'e str,
        args: &'e [Value],
    ) -> DbResult<ExecResult>
    where
        E: 'e + Executor<'c, Database = Sqlite>,
    {
        let result = if args.is_empty() {
            executor.execute(sql).await?
        } else {
            sqlite_query(sql, args).execute(executor).await?
        };
        Ok(ExecResult {
            rows_affected: result.rows_affected(),
            last_insert_id: u64::try_from(result.last_insert_rowid())
                .ok()
                .filter(|id| *id > 0),
        })
    }

    /// Prepare on `conn` to read the statement's shape, then drop it from the
    /// connection's statement cache (closing it on the server).
    pub async fn describe(conn: &mut SqliteConnection, sql: &str) -> DbResult<StatementShape> {
        let shape = StatementShape::of(&Executor::prepare(&mut *conn, sql).await?);
        conn.clear_cached_statements().await?;
        Ok(shape)
    }
}
