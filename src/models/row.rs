//! Decoded result rows.

use crate::error::{DbError, DbResult};
use crate::models::value::{FromValue, Value};
use serde::ser::{Serialize, SerializeMap, Serializer};

/// One result row: column names in select order with their decoded values.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Row {
    columns: Vec<String>,
    values: Vec<Value>,
}

impl Row {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            columns: Vec::with_capacity(capacity),
            values: Vec::with_capacity(capacity),
        }
    }

    /// Append a column. Later duplicates shadow nothing: lookups return the first match.
    pub fn push(&mut self, column: impl Into<String>, value: Value) {
        self.columns.push(column.into());
        self.values.push(value);
    }

    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    pub fn values(&self) -> &[Value] {
        &self.values
    }

    pub fn len(&self) -> usize {
        self.columns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.columns.is_empty()
    }

    /// Value of a column by name, if selected.
    pub fn get(&self, column: &str) -> Option<&Value> {
        self.columns
            .iter()
            .position(|c| c == column)
            .map(|idx| &self.values[idx])
    }

    /// Typed value of a column.
    pub fn try_get<T: FromValue>(&self, column: &str) -> DbResult<T> {
        let value = self
            .get(column)
            .ok_or_else(|| DbError::decode(column, "column not in result set"))?;
        T::from_value(value).map_err(|message| DbError::decode(column, message))
    }

    /// Typed value of a column, `None` when the column was not selected.
    pub fn try_get_opt<T: FromValue>(&self, column: &str) -> DbResult<Option<T>> {
        match self.get(column) {
            Some(value) => T::from_value(value)
                .map(Some)
                .map_err(|message| DbError::decode(column, message)),
            None => Ok(None),
        }
    }
}

impl Serialize for Row {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.len()))?;
        for (column, value) in self.columns.iter().zip(&self.values) {
            map.serialize_entry(column, value)?;
        }
        map.end()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> Row {
        let mut row = Row::new();
        row.push("id", Value::Int(7));
        row.push("name", Value::String("ada".into()));
        row.push("deleted_at", Value::Null);
        row
    }

    #[test]
    fn test_typed_access() {
        let row = sample();
        assert_eq!(row.try_get::<i64>("id").unwrap(), 7);
        assert_eq!(row.try_get::<String>("name").unwrap(), "ada");
        assert_eq!(row.try_get::<Option<String>>("deleted_at").unwrap(), None);
    }

    #[test]
    fn test_missing_column_is_decode_error() {
        let err = sample().try_get::<i64>("age").unwrap_err();
        assert!(matches!(err, DbError::Decode { ref column, .. } if column == "age"));
        assert_eq!(sample().try_get_opt::<i64>("age").unwrap(), None);
    }

    #[test]
    fn test_type_mismatch_is_decode_error() {
        let err = sample().try_get::<i64>("name").unwrap_err();
        assert!(err.to_string().contains("expected integer"), "{}", err);
    }

    #[test]
    fn test_serializes_as_ordered_object() {
        let json = serde_json::to_string(&sample()).unwrap();
        assert_eq!(json, r#"{"id":7,"name":"ada","deleted_at":null}"#);
    }
}
