//! Connection pool management.
//!
//! This module provides the driver-specific pools behind a [`Manager`] and the
//! [`PoolHandle`] seam the manager is generic over. Database-specific pools
//! (MySqlPool, SqlitePool) are used instead of `AnyPool` to keep full type support.
//!
//! [`Manager`]: crate::db::manager::Manager

use crate::config::{Config, Driver, Source};
use crate::db::transaction::DbTransaction;
use crate::error::{DbError, DbResult};
use sqlx::mysql::{MySqlConnectOptions, MySqlPoolOptions};
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions};
use sqlx::{Connection, MySqlPool, SqlitePool};
use std::future::Future;
use std::str::FromStr;
use std::time::Duration;
use tracing::{debug, info};

/// Role of a pool inside a manager, used in logs and shutdown errors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PoolRole {
    Write,
    /// Replica at this position of the configured read list.
    Read(usize),
}

impl std::fmt::Display for PoolRole {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Write => write!(f, "write"),
            Self::Read(idx) => write!(f, "read[{}]", idx),
        }
    }
}

/// What the manager needs from a pool: a liveness probe and a close.
///
/// Implemented for [`DbPool`]; tests substitute counting fakes.
pub trait PoolHandle: Clone + Send + Sync + 'static {
    /// Round-trip to the server on one pooled connection.
    fn ping(&self) -> impl Future<Output = DbResult<()>> + Send;

    /// Close every connection. Further acquires fail.
    fn close(&self) -> impl Future<Output = DbResult<()>> + Send;
}

/// Database-specific connection pool (avoids AnyPool limitations).
#[derive(Debug, Clone)]
pub enum DbPool {
    MySql(MySqlPool),
    SQLite(SqlitePool),
}

impl DbPool {
    /// Open a pool for one source using the shared pool limits of `config`.
    ///
    /// Does not probe the server beyond what sqlx does for the first connection.
    pub async fn connect(config: &Config, source: &Source, role: PoolRole) -> DbResult<Self> {
        debug!(
            pool = %role,
            driver = %config.driver,
            dsn = %config.redacted_dsn(source),
            "Opening pool"
        );
        let pool = match config.driver {
            Driver::MySql => Self::MySql(connect_mysql(config, source).await?),
            Driver::Sqlite => Self::SQLite(connect_sqlite(config, source, role).await?),
        };
        info!(pool = %role, source = %source, "Pool opened");
        Ok(pool)
    }

    /// Get the driver for this pool.
    pub fn driver(&self) -> Driver {
        match self {
            DbPool::MySql(_) => Driver::MySql,
            DbPool::SQLite(_) => Driver::Sqlite,
        }
    }

    /// Begin a transaction on a dedicated connection of this pool.
    pub async fn begin(&self) -> DbResult<DbTransaction> {
        let tx = match self {
            DbPool::MySql(pool) => pool.begin().await.map(DbTransaction::mysql),
            DbPool::SQLite(pool) => pool.begin().await.map(DbTransaction::sqlite),
        };
        tx.map_err(|e| self.acquire_error(e))
    }

    /// How long an operation waits for a free connection of this pool.
    pub fn acquire_timeout(&self) -> Duration {
        crate::impl_db_dispatch!(self, {
            MySql(p) => p.options().get_acquire_timeout(),
            SQLite(p) => p.options().get_acquire_timeout(),
        })
    }

    /// Convert a driver error raised while this pool was involved.
    pub(crate) fn acquire_error(&self, err: impl Into<DbError>) -> DbError {
        err.into().with_timeout_limit(self.acquire_timeout())
    }

    pub fn is_closed(&self) -> bool {
        crate::impl_db_dispatch!(self, {
            MySql(p) => p.is_closed(),
            SQLite(p) => p.is_closed(),
        })
    }
}

impl PoolHandle for DbPool {
    async fn ping(&self) -> DbResult<()> {
        let result = match self {
            DbPool::MySql(pool) => match pool.acquire().await {
                Ok(mut conn) => conn.ping().await,
                Err(e) => Err(e),
            },
            DbPool::SQLite(pool) => match pool.acquire().await {
                Ok(mut conn) => conn.ping().await,
                Err(e) => Err(e),
            },
        };
        result.map_err(|e| self.acquire_error(e))
    }

    async fn close(&self) -> DbResult<()> {
        crate::impl_db_dispatch!(self, {
            MySql(p) => p.close().await,
            SQLite(p) => p.close().await,
        });
        Ok(())
    }
}

async fn connect_mysql(config: &Config, source: &Source) -> DbResult<MySqlPool> {
    let url = config.connect_url(source)?;
    let options = MySqlConnectOptions::from_str(&url)
        .map_err(|e| {
            DbError::connection(
                format!("Invalid MySQL connection string: {}", e),
                "Check the host format: ip:port",
            )
        })?
        .charset("utf8mb4")
        .timezone(Some(local_offset()));

    MySqlPoolOptions::new()
        .max_connections(config.max_connections())
        .min_connections(config.min_connections())
        .max_lifetime(config.max_lifetime_duration())
        .acquire_timeout(config.acquire_timeout_duration())
        .connect_with(options)
        .await
        .map_err(|e| {
            DbError::connection(
                format!("Failed to connect to {}: {}", source.host, e),
                connection_suggestion(Driver::MySql, &e),
            )
        })
}

async fn connect_sqlite(config: &Config, source: &Source, role: PoolRole) -> DbResult<SqlitePool> {
    let options = SqliteConnectOptions::new().filename(&source.host);
    // Replicas never write; the write pool owns file creation and the journal mode.
    let options = match role {
        PoolRole::Write => options
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal),
        PoolRole::Read(_) => options.read_only(true),
    };

    SqlitePoolOptions::new()
        .max_connections(config.max_connections())
        .min_connections(config.min_connections())
        .max_lifetime(config.max_lifetime_duration())
        .acquire_timeout(config.acquire_timeout_duration())
        .connect_with(options)
        .await
        .map_err(|e| {
            DbError::connection(
                format!("Failed to open {}: {}", source.host, e),
                connection_suggestion(Driver::Sqlite, &e),
            )
        })
}

/// Session time zone matching the local offset, e.g. `+02:00`.
fn local_offset() -> String {
    chrono::Local::now().offset().to_string()
}

/// Generate a helpful suggestion for connection errors.
fn connection_suggestion(driver: Driver, error: &sqlx::Error) -> String {
    let error_str = error.to_string().to_lowercase();

    if error_str.contains("connection refused") {
        return format!("Check that the {} server is running and accessible", driver);
    }

    if error_str.contains("access denied") || error_str.contains("password") {
        return "Verify the user and password of the source".to_string();
    }

    if error_str.contains("unknown database") {
        return "Check that db_name exists on every endpoint".to_string();
    }

    if error_str.contains("tls") || error_str.contains("ssl") {
        return "Check TLS/SSL configuration or try disabling it".to_string();
    }

    match driver {
        Driver::MySql => "Verify the source format: user:pass@ip:port".to_string(),
        Driver::Sqlite => "Verify the file path exists and is accessible".to_string(),
    }
}
