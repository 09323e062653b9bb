//! Typed WHERE conditions and statement modifiers.
//!
//! A [`Filter`] is a list of conditions joined with `AND`, plus optional
//! `GROUP BY`, `ORDER BY` and `LIMIT` clauses. [`Condition::Any`] nests an
//! `OR` group.

use crate::builder::statement::quote_ident;
use crate::error::{DbError, DbResult};
use crate::models::Value;

/// A single predicate on a column.
#[derive(Debug, Clone, PartialEq)]
pub enum Condition {
    Eq(String, Value),
    Ne(String, Value),
    Lt(String, Value),
    Le(String, Value),
    Gt(String, Value),
    Ge(String, Value),
    Like(String, Value),
    NotLike(String, Value),
    In(String, Vec<Value>),
    NotIn(String, Vec<Value>),
    Between(String, Value, Value),
    NotBetween(String, Value, Value),
    IsNull(String),
    IsNotNull(String),
    /// Conditions joined with `OR`.
    Any(Vec<Condition>),
}

impl Condition {
    pub fn eq(column: impl Into<String>, value: impl Into<Value>) -> Self {
        Self::Eq(column.into(), value.into())
    }

    pub fn ne(column: impl Into<String>, value: impl Into<Value>) -> Self {
        Self::Ne(column.into(), value.into())
    }

    pub fn lt(column: impl Into<String>, value: impl Into<Value>) -> Self {
        Self::Lt(column.into(), value.into())
    }

    pub fn le(column: impl Into<String>, value: impl Into<Value>) -> Self {
        Self::Le(column.into(), value.into())
    }

    pub fn gt(column: impl Into<String>, value: impl Into<Value>) -> Self {
        Self::Gt(column.into(), value.into())
    }

    pub fn ge(column: impl Into<String>, value: impl Into<Value>) -> Self {
        Self::Ge(column.into(), value.into())
    }

    pub fn like(column: impl Into<String>, pattern: impl Into<Value>) -> Self {
        Self::Like(column.into(), pattern.into())
    }

    pub fn not_like(column: impl Into<String>, pattern: impl Into<Value>) -> Self {
        Self::NotLike(column.into(), pattern.into())
    }

    pub fn is_in<V: Into<Value>>(
        column: impl Into<String>,
        values: impl IntoIterator<Item = V>,
    ) -> Self {
        Self::In(column.into(), values.into_iter().map(Into::into).collect())
    }

    pub fn not_in<V: Into<Value>>(
        column: impl Into<String>,
        values: impl IntoIterator<Item = V>,
    ) -> Self {
        Self::NotIn(column.into(), values.into_iter().map(Into::into).collect())
    }

    pub fn between(
        column: impl Into<String>,
        low: impl Into<Value>,
        high: impl Into<Value>,
    ) -> Self {
        Self::Between(column.into(), low.into(), high.into())
    }

    pub fn not_between(
        column: impl Into<String>,
        low: impl Into<Value>,
        high: impl Into<Value>,
    ) -> Self {
        Self::NotBetween(column.into(), low.into(), high.into())
    }

    pub fn is_null(column: impl Into<String>) -> Self {
        Self::IsNull(column.into())
    }

    pub fn is_not_null(column: impl Into<String>) -> Self {
        Self::IsNotNull(column.into())
    }

    pub fn any(conditions: impl IntoIterator<Item = Condition>) -> Self {
        Self::Any(conditions.into_iter().collect())
    }

    /// Append this predicate to `sql`, pushing bound values in placeholder order.
    pub(crate) fn render(&self, sql: &mut String, args: &mut Vec<Value>) -> DbResult<()> {
        match self {
            Self::Eq(col, v) => compare(sql, args, col, "=", v),
            Self::Ne(col, v) => compare(sql, args, col, "!=", v),
            Self::Lt(col, v) => compare(sql, args, col, "<", v),
            Self::Le(col, v) => compare(sql, args, col, "<=", v),
            Self::Gt(col, v) => compare(sql, args, col, ">", v),
            Self::Ge(col, v) => compare(sql, args, col, ">=", v),
            Self::Like(col, v) => compare(sql, args, col, "LIKE", v),
            Self::NotLike(col, v) => compare(sql, args, col, "NOT LIKE", v),
            Self::In(col, values) => membership(sql, args, col, "IN", values),
            Self::NotIn(col, values) => membership(sql, args, col, "NOT IN", values),
            Self::Between(col, low, high) => range(sql, args, col, "BETWEEN", low, high),
            Self::NotBetween(col, low, high) => range(sql, args, col, "NOT BETWEEN", low, high),
            Self::IsNull(col) => {
                sql.push_str(&format!("{} IS NULL", quote_ident(col)?));
                Ok(())
            }
            Self::IsNotNull(col) => {
                sql.push_str(&format!("{} IS NOT NULL", quote_ident(col)?));
                Ok(())
            }
            Self::Any(group) => {
                if group.is_empty() {
                    return Err(DbError::invalid_input("OR group cannot be empty"));
                }
                sql.push('(');
                for (idx, cond) in group.iter().enumerate() {
                    if idx > 0 {
                        sql.push_str(" OR ");
                    }
                    cond.render(sql, args)?;
                }
                sql.push(')');
                Ok(())
            }
        }
    }
}

fn compare(
    sql: &mut String,
    args: &mut Vec<Value>,
    col: &str,
    op: &str,
    value: &Value,
) -> DbResult<()> {
    sql.push_str(&format!("{} {} ?", quote_ident(col)?, op));
    args.push(value.clone());
    Ok(())
}

fn membership(
    sql: &mut String,
    args: &mut Vec<Value>,
    col: &str,
    op: &str,
    values: &[Value],
) -> DbResult<()> {
    if values.is_empty() {
        return Err(DbError::invalid_input(format!(
            "{} list for column '{}' cannot be empty",
            op, col
        )));
    }
    sql.push_str(&format!(
        "{} {} ({})",
        quote_ident(col)?,
        op,
        placeholders(values.len())
    ));
    args.extend(values.iter().cloned());
    Ok(())
}

fn range(
    sql: &mut String,
    args: &mut Vec<Value>,
    col: &str,
    op: &str,
    low: &Value,
    high: &Value,
) -> DbResult<()> {
    sql.push_str(&format!("{} {} ? AND ?", quote_ident(col)?, op));
    args.push(low.clone());
    args.push(high.clone());
    Ok(())
}

/// `?,?,?` with `count` placeholders.
pub(crate) fn placeholders(count: usize) -> String {
    vec!["?"; count].join(",")
}

/// Sort direction for `ORDER BY`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Order {
    #[default]
    Asc,
    Desc,
}

impl Order {
    fn as_sql(self) -> &'static str {
        match self {
            Self::Asc => "ASC",
            Self::Desc => "DESC",
        }
    }
}

/// Conditions plus grouping, ordering and paging for a statement.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Filter {
    conditions: Vec<Condition>,
    group_by: Vec<String>,
    order_by: Vec<(String, Order)>,
    limit: Option<u64>,
    offset: Option<u64>,
}

impl Filter {
    /// An empty filter: matches every row.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a condition (conditions are AND-joined).
    pub fn with(mut self, condition: Condition) -> Self {
        self.conditions.push(condition);
        self
    }

    /// Shorthand for `with(Condition::eq(column, value))`.
    pub fn where_eq(self, column: impl Into<String>, value: impl Into<Value>) -> Self {
        self.with(Condition::eq(column, value))
    }

    pub fn group_by(mut self, column: impl Into<String>) -> Self {
        self.group_by.push(column.into());
        self
    }

    pub fn order_by(mut self, column: impl Into<String>, order: Order) -> Self {
        self.order_by.push((column.into(), order));
        self
    }

    pub fn limit(mut self, count: u64) -> Self {
        self.limit = Some(count);
        self
    }

    /// Skip `offset` rows and return at most `count`.
    pub fn page(mut self, offset: u64, count: u64) -> Self {
        self.offset = Some(offset);
        self.limit = Some(count);
        self
    }

    pub fn conditions(&self) -> &[Condition] {
        &self.conditions
    }

    pub fn is_empty(&self) -> bool {
        self.conditions.is_empty()
    }

    /// Force a row limit, keeping any offset.
    pub(crate) fn with_limit(mut self, count: u64) -> Self {
        self.limit = Some(count);
        self
    }

    /// Append ` WHERE ...` when there are conditions.
    pub(crate) fn render_where(&self, sql: &mut String, args: &mut Vec<Value>) -> DbResult<()> {
        if self.conditions.is_empty() {
            return Ok(());
        }
        sql.push_str(" WHERE ");
        for (idx, cond) in self.conditions.iter().enumerate() {
            if idx > 0 {
                sql.push_str(" AND ");
            }
            cond.render(sql, args)?;
        }
        Ok(())
    }

    /// Append ` GROUP BY`, ` ORDER BY` and ` LIMIT` clauses that are set.
    ///
    /// Limits are rendered as literals: they are integers, never caller text.
    pub(crate) fn render_modifiers(&self, sql: &mut String) -> DbResult<()> {
        if !self.group_by.is_empty() {
            let cols = self
                .group_by
                .iter()
                .map(|c| quote_ident(c))
                .collect::<DbResult<Vec<_>>>()?;
            sql.push_str(&format!(" GROUP BY {}", cols.join(",")));
        }
        if !self.order_by.is_empty() {
            let cols = self
                .order_by
                .iter()
                .map(|(c, order)| Ok(format!("{} {}", quote_ident(c)?, order.as_sql())))
                .collect::<DbResult<Vec<_>>>()?;
            sql.push_str(&format!(" ORDER BY {}", cols.join(",")));
        }
        match (self.limit, self.offset) {
            (Some(count), Some(offset)) if offset > 0 => {
                sql.push_str(&format!(" LIMIT {} OFFSET {}", count, offset));
            }
            (Some(count), _) => sql.push_str(&format!(" LIMIT {}", count)),
            (None, _) => {}
        }
        Ok(())
    }
}

impl From<Condition> for Filter {
    fn from(condition: Condition) -> Self {
        Filter::new().with(condition)
    }
}

/// Ordered `SET column = ?` assignments for an UPDATE.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Changes {
    assignments: Vec<(String, Value)>,
}

impl Changes {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(mut self, column: impl Into<String>, value: impl Into<Value>) -> Self {
        self.assignments.push((column.into(), value.into()));
        self
    }

    pub fn is_empty(&self) -> bool {
        self.assignments.is_empty()
    }

    pub fn len(&self) -> usize {
        self.assignments.len()
    }

    pub(crate) fn assignments(&self) -> &[(String, Value)] {
        &self.assignments
    }
}
