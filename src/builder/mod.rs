//! Dynamic query construction.
//!
//! This module contains:
//! - Typed conditions, filters and change sets
//! - Statement builders producing `BoundQuery`
//! - `{{name}}` template expansion
//! - Read/write classification for routing raw SQL

pub mod classify;
pub mod condition;
pub mod named;
pub mod statement;

pub use classify::{Route, classify};
pub use condition::{Changes, Condition, Filter, Order};
pub use named::{NamedParam, NamedParams, named_query};
pub use statement::{
    BoundQuery, build_count, build_delete, build_insert, build_select, build_update, quote_ident,
};
