//! Database-specific row decoding.
//!
//! Type conversion uses a two-phase approach:
//! 1. `TypeCategory` classifies column types into logical categories
//! 2. Driver-specific decoders extract the value as a [`Value`]
//!
//! Columns whose type the driver reports loosely (SQLite expressions, MySQL
//! temporal types without a chrono mapping) fall back to text.

use crate::config::Driver;
use crate::error::{DbError, DbResult};
use crate::models::{Row, Value};
use sqlx::mysql::{MySqlRow, MySqlTypeInfo, MySqlValueRef};
use sqlx::sqlite::SqliteRow;
use sqlx::{Column, Decode, Row as _, Type, TypeInfo, ValueRef};

/// Logical category for database column types.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TypeCategory {
    Integer,
    Float,
    Decimal,
    Boolean,
    Text,
    Binary,
    Json,
    DateTime,
    Unknown,
}

/// Classify a database type name into a logical category.
pub fn categorize_type(type_name: &str, driver: Driver) -> TypeCategory {
    let lower = type_name.to_lowercase();

    // Decimal/Numeric - check first as it overlaps with "numeric" in float checks
    if lower.contains("decimal") || lower.contains("numeric") {
        // SQLite's NUMERIC is actually a float
        if driver == Driver::Sqlite && lower == "numeric" {
            return TypeCategory::Float;
        }
        return TypeCategory::Decimal;
    }

    if lower == "bool" || lower == "boolean" {
        return TypeCategory::Boolean;
    }

    if lower.contains("int") || lower.contains("serial") || lower.contains("tiny") {
        return TypeCategory::Integer;
    }

    if lower.contains("float") || lower.contains("double") || lower == "real" {
        return TypeCategory::Float;
    }

    if lower == "json" {
        return TypeCategory::Json;
    }

    if lower.contains("blob") || lower.contains("binary") {
        return TypeCategory::Binary;
    }

    if lower == "datetime" || lower == "timestamp" {
        return TypeCategory::DateTime;
    }

    if lower.contains("char") || lower.contains("text") || lower == "enum" || lower == "set" {
        return TypeCategory::Text;
    }

    // DATE, TIME, YEAR, NULL and anything else
    TypeCategory::Unknown
}

// =============================================================================
// Decimal Type Support
// =============================================================================

/// Wrapper type for raw DECIMAL values as strings.
/// This preserves the exact database representation.
#[derive(Debug)]
pub struct RawDecimal(pub String);

impl Type<sqlx::MySql> for RawDecimal {
    fn type_info() -> MySqlTypeInfo {
        <String as Type<sqlx::MySql>>::type_info()
    }

    fn compatible(ty: &MySqlTypeInfo) -> bool {
        let name = ty.name().to_lowercase();
        name.contains("decimal") || name.contains("numeric")
    }
}

impl<'r> Decode<'r, sqlx::MySql> for RawDecimal {
    fn decode(value: MySqlValueRef<'r>) -> Result<Self, sqlx::error::BoxDynError> {
        let s = <&str as Decode<sqlx::MySql>>::decode(value)?;
        Ok(RawDecimal(s.to_string()))
    }
}

// =============================================================================
// Row conversion
// =============================================================================

/// Conversion of a driver row into a [`Row`].
///
/// NULL columns become [`Value::Null`]. A non-NULL column is decoded by its
/// declared category first, then as text, then as raw bytes; a column none of
/// those accept is a [`DbError::Decode`], never a silent NULL.
pub trait IntoRow {
    fn to_row(&self) -> DbResult<Row>;
}

impl IntoRow for MySqlRow {
    fn to_row(&self) -> DbResult<Row> {
        let mut row = Row::with_capacity(self.columns().len());
        for (idx, col) in self.columns().iter().enumerate() {
            if self.try_get_raw(idx)?.is_null() {
                row.push(col.name(), Value::Null);
                continue;
            }
            let type_name = col.type_info().name();
            let category = categorize_type(type_name, Driver::MySql);
            let value = mysql::decode_column(self, idx, category)
                .ok_or_else(|| undecodable(col.name(), type_name))?;
            row.push(col.name(), value);
        }
        Ok(row)
    }
}

impl IntoRow for SqliteRow {
    fn to_row(&self) -> DbResult<Row> {
        let mut row = Row::with_capacity(self.columns().len());
        for (idx, col) in self.columns().iter().enumerate() {
            if self.try_get_raw(idx)?.is_null() {
                row.push(col.name(), Value::Null);
                continue;
            }
            let type_name = col.type_info().name();
            let category = categorize_type(type_name, Driver::Sqlite);
            let value = sqlite::decode_column(self, idx, category)
                .ok_or_else(|| undecodable(col.name(), type_name))?;
            row.push(col.name(), value);
        }
        Ok(row)
    }
}

fn undecodable(column: &str, type_name: &str) -> DbError {
    DbError::decode(
        column,
        format!("no decoding accepts a {} value", type_name),
    )
}

// =============================================================================
// Database-Specific Decoders
// =============================================================================
//
// Decoders return `None` when the value does not fit their category; the caller
// then falls back to the generic text/bytes decoders. NULL never reaches them.

mod mysql {
    use super::*;
    use chrono::{NaiveDate, NaiveDateTime, NaiveTime};

    pub fn decode_column(row: &MySqlRow, idx: usize, category: TypeCategory) -> Option<Value> {
        let typed = match category {
            TypeCategory::Decimal => decode_decimal(row, idx),
            TypeCategory::Integer => decode_integer(row, idx),
            TypeCategory::Boolean => decode_boolean(row, idx),
            TypeCategory::Float => decode_float(row, idx),
            TypeCategory::Binary => decode_binary(row, idx),
            TypeCategory::Json => decode_json(row, idx),
            TypeCategory::DateTime => decode_datetime(row, idx),
            TypeCategory::Text | TypeCategory::Unknown => None,
        };
        typed.or_else(|| decode_text(row, idx))
    }

    fn decode_decimal(row: &MySqlRow, idx: usize) -> Option<Value> {
        row.try_get::<RawDecimal, _>(idx)
            .ok()
            .map(|v| Value::String(v.0))
    }

    fn decode_integer(row: &MySqlRow, idx: usize) -> Option<Value> {
        if let Ok(v) = row.try_get::<i8, _>(idx) {
            return Some(Value::Int(v.into()));
        }
        if let Ok(v) = row.try_get::<i16, _>(idx) {
            return Some(Value::Int(v.into()));
        }
        if let Ok(v) = row.try_get::<i32, _>(idx) {
            return Some(Value::Int(v.into()));
        }
        if let Ok(v) = row.try_get::<i64, _>(idx) {
            return Some(Value::Int(v));
        }
        if let Ok(v) = row.try_get::<u8, _>(idx) {
            return Some(Value::Int(v.into()));
        }
        if let Ok(v) = row.try_get::<u16, _>(idx) {
            return Some(Value::Int(v.into()));
        }
        if let Ok(v) = row.try_get::<u32, _>(idx) {
            return Some(Value::Int(v.into()));
        }
        // BIGINT UNSIGNED above i64::MAX keeps its digits as text
        row.try_get::<u64, _>(idx).ok().map(|v| {
            i64::try_from(v)
                .map(Value::Int)
                .unwrap_or_else(|_| Value::String(v.to_string()))
        })
    }

    fn decode_boolean(row: &MySqlRow, idx: usize) -> Option<Value> {
        row.try_get::<bool, _>(idx).ok().map(Value::Bool)
    }

    fn decode_float(row: &MySqlRow, idx: usize) -> Option<Value> {
        if let Ok(v) = row.try_get::<f64, _>(idx) {
            return Some(Value::Float(v));
        }
        row.try_get::<f32, _>(idx)
            .ok()
            .map(|v| Value::Float(f64::from(v)))
    }

    fn decode_binary(row: &MySqlRow, idx: usize) -> Option<Value> {
        row.try_get::<Vec<u8>, _>(idx).ok().map(Value::Bytes)
    }

    fn decode_json(row: &MySqlRow, idx: usize) -> Option<Value> {
        row.try_get::<serde_json::Value, _>(idx).ok().map(Value::Json)
    }

    fn decode_datetime(row: &MySqlRow, idx: usize) -> Option<Value> {
        row.try_get::<NaiveDateTime, _>(idx)
            .ok()
            .map(Value::DateTime)
    }

    fn decode_text(row: &MySqlRow, idx: usize) -> Option<Value> {
        if let Ok(v) = row.try_get::<String, _>(idx) {
            return Some(Value::String(v));
        }
        // Binary-protocol DATE and TIME columns are not text-compatible
        if let Ok(v) = row.try_get::<NaiveDate, _>(idx) {
            return Some(Value::String(v.to_string()));
        }
        if let Ok(v) = row.try_get::<NaiveTime, _>(idx) {
            return Some(Value::String(v.to_string()));
        }
        row.try_get::<Vec<u8>, _>(idx)
            .ok()
            .map(|v| match String::from_utf8(v) {
                Ok(s) => Value::String(s),
                Err(e) => Value::Bytes(e.into_bytes()),
            })
    }
}

mod sqlite {
    use super::*;

    pub fn decode_column(row: &SqliteRow, idx: usize, category: TypeCategory) -> Option<Value> {
        let typed = match category {
            TypeCategory::Integer => row.try_get::<i64, _>(idx).ok().map(Value::Int),
            TypeCategory::Boolean => row.try_get::<bool, _>(idx).ok().map(Value::Bool),
            TypeCategory::Float | TypeCategory::Decimal => {
                row.try_get::<f64, _>(idx).ok().map(Value::Float)
            }
            TypeCategory::Binary => row.try_get::<Vec<u8>, _>(idx).ok().map(Value::Bytes),
            _ => None,
        };
        typed.or_else(|| decode_dynamic(row, idx))
    }

    /// Declared types are advisory in SQLite; try storage classes in turn.
    fn decode_dynamic(row: &SqliteRow, idx: usize) -> Option<Value> {
        if let Ok(v) = row.try_get::<String, _>(idx) {
            return Some(Value::String(v));
        }
        if let Ok(v) = row.try_get::<i64, _>(idx) {
            return Some(Value::Int(v));
        }
        if let Ok(v) = row.try_get::<f64, _>(idx) {
            return Some(Value::Float(v));
        }
        row.try_get::<Vec<u8>, _>(idx).ok().map(Value::Bytes)
    }
}
