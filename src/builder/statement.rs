//! SELECT / INSERT / UPDATE / DELETE construction.
//!
//! Every builder returns a [`BoundQuery`]: SQL with positional `?` placeholders
//! and the values to bind, in order. Identifiers are backtick-quoted, which both
//! MySQL and SQLite accept.

use crate::builder::condition::{Changes, Filter, placeholders};
use crate::error::{DbError, DbResult};
use crate::models::Value;

/// SQL text plus its positional arguments. Built per call, never cached.
#[derive(Debug, Clone, PartialEq)]
pub struct BoundQuery {
    pub sql: String,
    pub args: Vec<Value>,
}

impl BoundQuery {
    pub fn new(sql: impl Into<String>, args: Vec<Value>) -> Self {
        Self {
            sql: sql.into(),
            args,
        }
    }
}

impl std::fmt::Display for BoundQuery {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} {:?}", self.sql, self.args)
    }
}

/// Quote a (possibly `table.column` qualified) identifier.
///
/// `*` and `table.*` pass through unquoted.
pub fn quote_ident(name: &str) -> DbResult<String> {
    let name = name.trim();
    if name.is_empty() {
        return Err(DbError::invalid_input("identifier cannot be empty"));
    }
    if name == "*" {
        return Ok("*".to_string());
    }
    name.split('.')
        .map(|part| {
            if part.is_empty() {
                return Err(DbError::invalid_input(format!(
                    "identifier '{}' has an empty component",
                    name
                )));
            }
            if part.contains('`') || part.contains('\0') {
                return Err(DbError::invalid_input(format!(
                    "identifier '{}' contains a forbidden character",
                    name
                )));
            }
            if part == "*" {
                return Ok("*".to_string());
            }
            Ok(format!("`{}`", part))
        })
        .collect::<DbResult<Vec<_>>>()
        .map(|parts| parts.join("."))
}

/// Table names reject `*` in addition to the identifier rules.
fn quote_table(table: &str) -> DbResult<String> {
    if table.trim().is_empty() {
        return Err(DbError::invalid_input("empty table name"));
    }
    if table.contains('*') {
        return Err(DbError::invalid_input(format!(
            "invalid table name '{}'",
            table
        )));
    }
    quote_ident(table)
}

fn quote_list<S: AsRef<str>>(names: &[S]) -> DbResult<String> {
    names
        .iter()
        .map(|n| quote_ident(n.as_ref()))
        .collect::<DbResult<Vec<_>>>()
        .map(|cols| cols.join(","))
}

/// `SELECT fields FROM table [WHERE ...] [GROUP BY ...] [ORDER BY ...] [LIMIT ...]`.
///
/// An empty field list selects `*`.
pub fn build_select<S: AsRef<str>>(
    table: &str,
    fields: &[S],
    filter: &Filter,
) -> DbResult<BoundQuery> {
    let table = quote_table(table)?;
    let fields = if fields.is_empty() {
        "*".to_string()
    } else {
        quote_list(fields)?
    };

    let mut sql = format!("SELECT {} FROM {}", fields, table);
    let mut args = Vec::new();
    filter.render_where(&mut sql, &mut args)?;
    filter.render_modifiers(&mut sql)?;
    Ok(BoundQuery { sql, args })
}

/// `SELECT COUNT(*) AS count FROM table [WHERE ...]`. Modifiers are ignored.
pub fn build_count(table: &str, filter: &Filter) -> DbResult<BoundQuery> {
    let table = quote_table(table)?;
    let mut sql = format!("SELECT COUNT(*) AS `count` FROM {}", table);
    let mut args = Vec::new();
    filter.render_where(&mut sql, &mut args)?;
    Ok(BoundQuery { sql, args })
}

/// Multi-row `INSERT INTO table (cols) VALUES (...),(...)`.
pub fn build_insert<S: AsRef<str>>(
    table: &str,
    columns: &[S],
    rows: &[Vec<Value>],
) -> DbResult<BoundQuery> {
    let table = quote_table(table)?;
    if columns.is_empty() {
        return Err(DbError::invalid_input("insert needs at least one column"));
    }
    if rows.is_empty() {
        return Err(DbError::invalid_input("insert needs at least one row"));
    }

    let row_placeholders = format!("({})", placeholders(columns.len()));
    let mut args = Vec::with_capacity(columns.len() * rows.len());
    for (idx, row) in rows.iter().enumerate() {
        if row.len() != columns.len() {
            return Err(DbError::invalid_input(format!(
                "row {} has {} values, expected {}",
                idx,
                row.len(),
                columns.len()
            )));
        }
        args.extend(row.iter().cloned());
    }

    let sql = format!(
        "INSERT INTO {} ({}) VALUES {}",
        table,
        quote_list(columns)?,
        vec![row_placeholders; rows.len()].join(",")
    );
    Ok(BoundQuery { sql, args })
}

/// `UPDATE table SET col = ?, ... [WHERE ...] [ORDER BY ...] [LIMIT ...]`.
pub fn build_update(table: &str, filter: &Filter, changes: &Changes) -> DbResult<BoundQuery> {
    let table = quote_table(table)?;
    if changes.is_empty() {
        return Err(DbError::invalid_input("update needs at least one change"));
    }

    let mut args = Vec::with_capacity(changes.len());
    let mut sets = Vec::with_capacity(changes.len());
    for (column, value) in changes.assignments() {
        sets.push(format!("{} = ?", quote_ident(column)?));
        args.push(value.clone());
    }

    let mut sql = format!("UPDATE {} SET {}", table, sets.join(","));
    filter.render_where(&mut sql, &mut args)?;
    filter.render_modifiers(&mut sql)?;
    Ok(BoundQuery { sql, args })
}

/// `DELETE FROM table [WHERE ...] [ORDER BY ...] [LIMIT ...]`.
pub fn build_delete(table: &str, filter: &Filter) -> DbResult<BoundQuery> {
    let table = quote_table(table)?;
    let mut sql = format!("DELETE FROM {}", table);
    let mut args = Vec::new();
    filter.render_where(&mut sql, &mut args)?;
    filter.render_modifiers(&mut sql)?;
    Ok(BoundQuery { sql, args })
}
