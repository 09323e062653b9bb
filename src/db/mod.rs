//! Database access layer.
//!
//! This module provides:
//! - The write/read pool manager and its keepalive tasks
//! - The query execution facade with transaction-aware routing
//! - Transactions and the context that carries them
//! - Row decoding and parameter binding per driver
//! - Database dispatch macros for reducing code duplication

pub mod executor;
#[macro_use]
pub mod macros;
pub mod manager;
pub mod params;
pub mod pool;
pub mod transaction;
pub mod types;

pub use executor::{Database, ExecResult, PreparedStatement};
pub use manager::Manager;
pub use pool::{DbPool, PoolHandle, PoolRole};
pub use transaction::{Context, DbTransaction};
