//! Named-placeholder templates.
//!
//! `SELECT * FROM users WHERE name = {{name}} AND id IN {{ids}}` is rewritten to
//! positional `?` placeholders. A list parameter expands to `(?,?,…)` so it can
//! sit directly after `IN`.

use crate::builder::condition::placeholders;
use crate::builder::statement::BoundQuery;
use crate::error::{DbError, DbResult};
use crate::models::Value;
use std::collections::HashMap;

const OPEN: &str = "{{";
const CLOSE: &str = "}}";

/// A template argument: one value or a list for `IN`.
#[derive(Debug, Clone, PartialEq)]
pub enum NamedParam {
    One(Value),
    Many(Vec<Value>),
}

impl From<Value> for NamedParam {
    fn from(value: Value) -> Self {
        Self::One(value)
    }
}

impl From<Vec<Value>> for NamedParam {
    fn from(values: Vec<Value>) -> Self {
        Self::Many(values)
    }
}

/// Arguments for [`named_query`], keyed by placeholder name.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct NamedParams {
    values: HashMap<String, NamedParam>,
}

impl NamedParams {
    pub fn new() -> Self {
        Self::default()
    }

    /// Bind a single value.
    pub fn set(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.values
            .insert(name.into(), NamedParam::One(value.into()));
        self
    }

    /// Bind a list, expanded in place of the placeholder.
    pub fn set_list<V: Into<Value>>(
        mut self,
        name: impl Into<String>,
        values: impl IntoIterator<Item = V>,
    ) -> Self {
        let values = values.into_iter().map(Into::into).collect();
        self.values.insert(name.into(), NamedParam::Many(values));
        self
    }

    pub fn insert(&mut self, name: impl Into<String>, param: impl Into<NamedParam>) {
        self.values.insert(name.into(), param.into());
    }

    pub fn get(&self, name: &str) -> Option<&NamedParam> {
        self.values.get(name)
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

/// Rewrite `{{name}}` placeholders to `?` and collect values in placeholder order.
///
/// Unclosed or empty placeholders, unknown names and empty lists are errors.
/// Bound names that the template never references are ignored.
///
/// The template is scanned as plain text, not as SQL: a `{{name}}` inside a
/// quoted string literal or a comment is rewritten like any other placeholder.
/// Text that must contain `{{` literally has to be bound as a value.
pub fn named_query(template: &str, params: &NamedParams) -> DbResult<BoundQuery> {
    let mut sql = String::with_capacity(template.len());
    let mut args = Vec::new();
    let mut rest = template;

    while let Some(start) = rest.find(OPEN) {
        sql.push_str(&rest[..start]);
        let after_open = &rest[start + OPEN.len()..];
        let end = after_open.find(CLOSE).ok_or_else(|| {
            DbError::invalid_input(format!(
                "unclosed placeholder at byte {}",
                template.len() - rest.len() + start
            ))
        })?;

        let name = after_open[..end].trim();
        if name.is_empty() {
            return Err(DbError::invalid_input("empty placeholder name"));
        }

        match params.get(name) {
            Some(NamedParam::One(value)) => {
                sql.push('?');
                args.push(value.clone());
            }
            Some(NamedParam::Many(values)) => {
                if values.is_empty() {
                    return Err(DbError::invalid_input(format!(
                        "list parameter '{}' cannot be empty",
                        name
                    )));
                }
                sql.push_str(&format!("({})", placeholders(values.len())));
                args.extend(values.iter().cloned());
            }
            None => {
                return Err(DbError::invalid_input(format!(
                    "no value bound for placeholder '{}'",
                    name
                )));
            }
        }

        rest = &after_open[end + CLOSE.len()..];
    }
    sql.push_str(rest);

    Ok(BoundQuery { sql, args })
}
