//! Read/write classification of raw SQL.
//!
//! Used to route a statement that is prepared outside a transaction: read-only
//! statements go to a replica, everything else to the write endpoint. Parsing
//! uses [sqlparser](https://docs.rs/sqlparser/) so comments, casing and
//! formatting cannot turn a write into a "read".

use crate::config::Driver;
use serde::Serialize;
use sqlparser::ast::Statement;
use sqlparser::dialect::{Dialect, MySqlDialect, SQLiteDialect};
use sqlparser::parser::Parser;

/// Which pool a statement must run on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Route {
    /// Any replica (SELECT, SHOW, EXPLAIN SELECT, DESCRIBE).
    Read,
    /// The write endpoint.
    Write,
}

impl std::fmt::Display for Route {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Read => write!(f, "read"),
            Self::Write => write!(f, "write"),
        }
    }
}

fn get_dialect(driver: Driver) -> Box<dyn Dialect> {
    match driver {
        Driver::MySql => Box::new(MySqlDialect {}),
        Driver::Sqlite => Box::new(SQLiteDialect {}),
    }
}

/// Classify SQL text. Unparseable or empty input routes to [`Route::Write`].
pub fn classify(sql: &str, driver: Driver) -> Route {
    if takes_row_locks(sql) {
        return Route::Write;
    }

    let dialect = get_dialect(driver);
    let statements = match Parser::parse_sql(dialect.as_ref(), sql) {
        Ok(statements) => statements,
        Err(_) => return Route::Write,
    };

    if !statements.is_empty() && statements.iter().all(is_read_only) {
        Route::Read
    } else {
        Route::Write
    }
}

fn is_read_only(stmt: &Statement) -> bool {
    match stmt {
        Statement::Query(_)
        | Statement::ShowTables { .. }
        | Statement::ShowColumns { .. }
        | Statement::ShowDatabases { .. }
        | Statement::ShowSchemas { .. }
        | Statement::ShowCreate { .. }
        | Statement::ShowFunctions { .. }
        | Statement::ShowVariable { .. }
        | Statement::ShowVariables { .. }
        | Statement::ShowStatus { .. }
        | Statement::ShowCollation { .. }
        | Statement::ExplainTable { .. } => true,
        // EXPLAIN ANALYZE runs the inner statement, so it follows the inner route
        Statement::Explain { statement, .. } => is_read_only(statement),
        _ => false,
    }
}

/// Locking reads must see the primary's latest state.
fn takes_row_locks(sql: &str) -> bool {
    let upper = sql.to_ascii_uppercase();
    let normalized = upper.split_whitespace().collect::<Vec<_>>().join(" ");
    normalized.contains("FOR UPDATE") || normalized.contains("LOCK IN SHARE MODE")
}

#[cfg(test)]
mod tests {
    use super::*;

    const MYSQL: Driver = Driver::MySql;

    #[test]
    fn test_select_routes_to_read() {
        assert_eq!(classify("SELECT * FROM users", MYSQL), Route::Read);
        assert_eq!(classify("  select 1 ", MYSQL), Route::Read);
    }

    #[test]
    fn test_show_and_explain_route_to_read() {
        assert_eq!(classify("SHOW TABLES", MYSQL), Route::Read);
        assert_eq!(
            classify("EXPLAIN SELECT * FROM users WHERE id = 1", MYSQL),
            Route::Read
        );
    }

    #[test]
    fn test_dml_and_ddl_route_to_write() {
        assert_eq!(classify("INSERT INTO users VALUES (1)", MYSQL), Route::Write);
        assert_eq!(classify("UPDATE users SET name = 'x'", MYSQL), Route::Write);
        assert_eq!(classify("DELETE FROM users", MYSQL), Route::Write);
        assert_eq!(classify("CREATE TABLE t (id INT)", MYSQL), Route::Write);
    }

    #[test]
    fn test_unparseable_routes_to_write() {
        assert_eq!(classify("SELEKT oops FROM", MYSQL), Route::Write);
        assert_eq!(classify("", MYSQL), Route::Write);
    }

    #[test]
    fn test_mixed_batch_routes_to_write() {
        let sql = "SELECT 1; INSERT INTO users VALUES (1)";
        assert_eq!(classify(sql, MYSQL), Route::Write);
    }

    #[test]
    fn test_insert_select_routes_to_write() {
        let sql = "INSERT INTO archive SELECT * FROM users WHERE created_at < '2020-01-01'";
        assert_eq!(classify(sql, MYSQL), Route::Write);
    }

    #[test]
    fn test_locking_read_routes_to_write() {
        let sql = "SELECT * FROM accounts WHERE id = ? FOR\n  UPDATE";
        assert_eq!(classify(sql, MYSQL), Route::Write);
    }

    #[test]
    fn test_sqlite_dialect() {
        assert_eq!(classify("SELECT name FROM sqlite_master", Driver::Sqlite), Route::Read);
        assert_eq!(classify("PRAGMA user_version = 3", Driver::Sqlite), Route::Write);
    }
}
