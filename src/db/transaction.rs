//! Transactions and the context that carries them through a call chain.
//!
//! A [`DbTransaction`] holds one dedicated write connection until its owner
//! commits or rolls back. Callers lend it to a [`Context`] for the operations that
//! should run inside it; the facade and the mapper consult the context first and
//! fall back to the manager's pools when it carries no transaction.

use crate::db::executor::{StatementShape, mysql, sqlite};
use crate::error::{DbError, DbResult};
use crate::models::{Row, Value};
use sqlx::{MySql, Sqlite, Transaction};
use tracing::{debug, info, warn};

/// Driver-specific transaction connection.
pub enum TxConnection {
    MySql(Transaction<'static, MySql>),
    SQLite(Transaction<'static, Sqlite>),
}

/// An open transaction on the write endpoint.
///
/// Dropping it without [`commit`](Self::commit) rolls back (sqlx issues the
/// rollback when the connection returns to the pool).
pub struct DbTransaction {
    id: String,
    conn: TxConnection,
}

impl std::fmt::Debug for DbTransaction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DbTransaction")
            .field("id", &self.id)
            .finish_non_exhaustive()
    }
}

impl DbTransaction {
    pub(crate) fn mysql(tx: Transaction<'static, MySql>) -> Self {
        Self::started(TxConnection::MySql(tx))
    }

    pub(crate) fn sqlite(tx: Transaction<'static, Sqlite>) -> Self {
        Self::started(TxConnection::SQLite(tx))
    }

    fn started(conn: TxConnection) -> Self {
        let id = generate_transaction_id();
        info!(transaction_id = %id, "Transaction started");
        Self { id, conn }
    }

    /// Identifier used in logs and errors, `tx_` followed by 32 hex digits.
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Commit the transaction.
    pub async fn commit(self) -> DbResult<()> {
        let id = self.id;
        let result = crate::impl_tx_dispatch!(self.conn, {
            MySql(tx) => tx.commit().await,
            SQLite(tx) => tx.commit().await,
        });
        result.map_err(|e| DbError::transaction(format!("commit failed: {}", e), id.as_str()))?;
        info!(transaction_id = %id, "Transaction committed");
        Ok(())
    }

    /// Rollback the transaction.
    pub async fn rollback(self) -> DbResult<()> {
        let id = self.id;
        let result = crate::impl_tx_dispatch!(self.conn, {
            MySql(tx) => tx.rollback().await,
            SQLite(tx) => tx.rollback().await,
        });
        result.map_err(|e| DbError::transaction(format!("rollback failed: {}", e), id.as_str()))?;
        info!(transaction_id = %id, "Transaction rolled back");
        Ok(())
    }

    pub(crate) async fn fetch_all(&mut self, sql: &str, args: &[Value]) -> DbResult<Vec<Row>> {
        debug!(transaction_id = %self.id, sql = %sql, "Query in transaction");
        crate::impl_tx_dispatch!(&mut self.conn, {
            MySql(tx) => mysql::fetch_all(&mut **tx, sql, args).await,
            SQLite(tx) => sqlite::fetch_all(&mut **tx, sql, args).await,
        })
    }

    pub(crate) async fn fetch_optional(
        &mut self,
        sql: &str,
        args: &[Value],
    ) -> DbResult<Option<Row>> {
        debug!(transaction_id = %self.id, sql = %sql, "Query one in transaction");
        crate::impl_tx_dispatch!(&mut self.conn, {
            MySql(tx) => mysql::fetch_optional(&mut **tx, sql, args).await,
            SQLite(tx) => sqlite::fetch_optional(&mut **tx, sql, args).await,
        })
    }

    pub(crate) async fn execute(
        &mut self,
        sql: &str,
        args: &[Value],
    ) -> DbResult<crate::db::executor::ExecResult> {
        let result = crate::impl_tx_dispatch!(&mut self.conn, {
            MySql(tx) => mysql::execute(&mut **tx, sql, args).await,
            SQLite(tx) => sqlite::execute(&mut **tx, sql, args).await,
        })?;
        debug!(
            transaction_id = %self.id,
            sql = %sql,
            rows_affected = result.rows_affected,
            "Executed in transaction"
        );
        Ok(result)
    }

    pub(crate) async fn describe(&mut self, sql: &str) -> DbResult<StatementShape> {
        debug!(transaction_id = %self.id, sql = %sql, "Prepare in transaction");
        crate::impl_tx_dispatch!(&mut self.conn, {
            MySql(tx) => mysql::describe(&mut **tx, sql).await,
            SQLite(tx) => sqlite::describe(&mut **tx, sql).await,
        })
    }
}

/// Generate a unique transaction ID.
fn generate_transaction_id() -> String {
    format!("tx_{}", uuid::Uuid::new_v4().simple())
}

/// Carries the transaction (if any) an operation must run in.
///
/// Absence of a transaction is the normal state. A context borrows the
/// transaction mutably, so only one operation can use it at a time and the
/// owner gets it back (to commit or roll back) when the context goes away.
#[derive(Debug, Default)]
pub struct Context<'t> {
    tx: Option<&'t mut DbTransaction>,
}

impl Context<'static> {
    /// A context with no transaction: reads go to replicas, writes to the primary.
    pub fn background() -> Self {
        Self { tx: None }
    }
}

impl<'t> Context<'t> {
    /// Derive a context that runs operations inside `tx`. `self` is not modified.
    pub fn with_transaction<'a>(&self, tx: &'a mut DbTransaction) -> Context<'a> {
        if let Some(current) = self.transaction_id() {
            warn!(
                outer = %current,
                inner = %tx.id(),
                "Replacing the transaction carried by a context"
            );
        }
        Context { tx: Some(tx) }
    }

    /// The carried transaction, if any.
    pub fn current_transaction(&mut self) -> Option<&mut DbTransaction> {
        self.tx.as_deref_mut()
    }

    /// Lend this context to a callee while keeping it usable afterwards.
    pub fn reborrow(&mut self) -> Context<'_> {
        Context {
            tx: self.tx.as_deref_mut(),
        }
    }

    pub fn in_transaction(&self) -> bool {
        self.tx.is_some()
    }

    pub fn transaction_id(&self) -> Option<&str> {
        self.tx.as_deref().map(DbTransaction::id)
    }
}
