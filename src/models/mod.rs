//! Data models shared by the executor, builder and mapper.
//!
//! This module contains:
//! - Bound argument / column values
//! - Decoded result rows

pub mod row;
pub mod value;

pub use row::Row;
pub use value::{FromValue, Value};
