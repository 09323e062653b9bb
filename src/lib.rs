//! db-replica-pool
//!
//! Read/write splitting over one write endpoint and N read replicas of a MySQL
//! (or SQLite) database: pool management with keepalive, transaction-aware
//! statement routing, and a small condition-based query builder with an entity
//! mapper on top.

pub mod builder;
pub mod config;
pub mod db;
pub mod error;
pub mod mapper;
pub mod models;

pub use config::{Config, Driver, Source};
pub use db::{Context, Database, DbPool, DbTransaction, Manager};
pub use error::{DbError, DbResult};
pub use mapper::{Column, Entity, SqlBuilder};
