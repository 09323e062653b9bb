//! MySQL integration tests.
//!
//! Skipped unless `TEST_MYSQL_HOST` (e.g. `127.0.0.1:3306`) is set. Optional:
//! `TEST_MYSQL_USER` (root), `TEST_MYSQL_PASS` (empty), `TEST_MYSQL_DB` (test).
//! The same server serves as primary and as both replicas.

use chrono::NaiveDate;
use db_replica_pool::builder::{Changes, Filter, NamedParams, Route};
use db_replica_pool::config::{Config, Source};
use db_replica_pool::db::{Context, Database};
use db_replica_pool::error::DbResult;
use db_replica_pool::mapper::{Column, Entity, SqlBuilder};
use db_replica_pool::models::{Row, Value};
use serde_json::json;

fn mysql_config() -> Option<Config> {
    let host = std::env::var("TEST_MYSQL_HOST").ok()?;
    let user = std::env::var("TEST_MYSQL_USER").unwrap_or_else(|_| "root".to_string());
    let pass = std::env::var("TEST_MYSQL_PASS").unwrap_or_default();
    let db = std::env::var("TEST_MYSQL_DB").unwrap_or_else(|_| "test".to_string());

    let source = Source::new(host, user, pass);
    Some(
        Config::new(source.clone(), db)
            .with_reads(vec![source.clone(), source])
            .with_pool_size(4, 1)
            .with_keepalive(60),
    )
}

macro_rules! require_mysql {
    () => {
        match mysql_config() {
            Some(config) => config,
            None => {
                eprintln!("TEST_MYSQL_HOST not set, skipping");
                return;
            }
        }
    };
}

#[derive(Debug, PartialEq)]
struct Event {
    id: i64,
    kind: String,
    at: chrono::NaiveDateTime,
    payload: serde_json::Value,
}

impl Entity for Event {
    const COLUMNS: &'static [Column] = &[
        Column::generated("id"),
        Column::new("kind"),
        Column::new("at"),
        Column::new("payload"),
    ];

    fn to_values(&self) -> Vec<Value> {
        vec![
            self.id.into(),
            self.kind.as_str().into(),
            self.at.into(),
            self.payload.clone().into(),
        ]
    }

    fn from_row(row: &Row) -> DbResult<Self> {
        Ok(Self {
            id: row.try_get("id")?,
            kind: row.try_get("kind")?,
            at: row.try_get("at")?,
            payload: row.try_get("payload")?,
        })
    }
}

async fn fresh_table(db: &Database, table: &str) {
    let mut ctx = Context::background();
    db.execute(&mut ctx, &format!("DROP TABLE IF EXISTS {}", table), &[])
        .await
        .unwrap();
    db.execute(
        &mut ctx,
        &format!(
            "CREATE TABLE {} (id BIGINT AUTO_INCREMENT PRIMARY KEY, kind VARCHAR(32) NOT NULL, at DATETIME NOT NULL, payload JSON NOT NULL)",
            table
        ),
        &[],
    )
    .await
    .unwrap();
}

#[tokio::test]
async fn test_mysql_mapper_round_trip() {
    let config = require_mysql!();
    let db = Database::open(config).await.unwrap();
    assert_eq!(db.manager().read_count(), 2);
    fresh_table(&db, "replica_pool_events").await;

    let mapper = SqlBuilder::new(db.clone());
    let mut ctx = Context::background();
    let at = NaiveDate::from_ymd_opt(2024, 5, 1)
        .unwrap()
        .and_hms_opt(12, 30, 0)
        .unwrap();
    let event = Event {
        id: 0,
        kind: "signup".into(),
        at,
        payload: json!({"plan": "pro"}),
    };

    let result = mapper
        .insert(&mut ctx, "replica_pool_events", &event)
        .await
        .unwrap();
    assert_eq!(result.rows_affected, 1);
    let id = result.last_insert_id.unwrap() as i64;

    // Replicas are the same server here, so the write is immediately readable.
    let found: Event = mapper
        .find_one(
            &mut ctx,
            "replica_pool_events",
            &Filter::new().where_eq("id", id),
            &[],
        )
        .await
        .unwrap()
        .unwrap();
    assert_eq!(found.kind, "signup");
    assert_eq!(found.at, at);
    assert_eq!(found.payload, json!({"plan": "pro"}));

    db.manager().shutdown().await.unwrap();
}

#[tokio::test]
async fn test_mysql_transaction_and_locking_reads() {
    let config = require_mysql!();
    let db = Database::open(config).await.unwrap();
    fresh_table(&db, "replica_pool_tx").await;
    let mapper = SqlBuilder::new(db.clone());

    let mut tx = db.begin().await.unwrap();
    {
        let mut ctx = Context::background().with_transaction(&mut tx);
        mapper
            .raw_execute(
                &mut ctx,
                "INSERT INTO replica_pool_tx (kind, at, payload) VALUES ({{kind}}, NOW(), '{}')",
                &NamedParams::new().set("kind", "draft"),
            )
            .await
            .unwrap();
        let locked: Option<Row> = mapper
            .raw_query_one(
                &mut ctx,
                "SELECT id FROM replica_pool_tx WHERE kind = {{kind}} FOR UPDATE",
                &NamedParams::new().set("kind", "draft"),
            )
            .await
            .unwrap();
        assert!(locked.is_some());
        mapper
            .update(
                &mut ctx,
                "replica_pool_tx",
                &Filter::new().where_eq("kind", "draft"),
                &Changes::new().set("kind", "final"),
            )
            .await
            .unwrap();
    }
    tx.rollback().await.unwrap();

    let mut ctx = Context::background();
    assert_eq!(
        mapper
            .count(&mut ctx, "replica_pool_tx", &Filter::new())
            .await
            .unwrap(),
        0
    );

    let locking = db
        .prepare(&mut ctx, "SELECT id FROM replica_pool_tx WHERE id = ? FOR UPDATE")
        .await
        .unwrap();
    assert_eq!(locking.route, Route::Write);
    assert_eq!(locking.params, Some(1));

    let plain = db
        .prepare(&mut ctx, "SELECT id, kind FROM replica_pool_tx")
        .await
        .unwrap();
    assert_eq!(plain.route, Route::Read);
    assert_eq!(plain.columns, vec!["id", "kind"]);

    db.manager().shutdown().await.unwrap();
}

#[tokio::test]
async fn test_mysql_ping_all() {
    let config = require_mysql!();
    let db = Database::open(config).await.unwrap();
    let results = db.manager().ping_all().await;
    assert_eq!(results.len(), 3);
    assert!(results.iter().all(|(_, r)| r.is_ok()));
    db.manager().shutdown().await.unwrap();
}
