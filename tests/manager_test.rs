//! Manager lifecycle, routing and keepalive tests against a counting fake pool.

use db_replica_pool::config::{Config, Source};
use db_replica_pool::db::{Manager, PoolHandle, PoolRole};
use db_replica_pool::error::{DbError, DbResult};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

#[derive(Default)]
struct Stats {
    pings: AtomicUsize,
    closes: AtomicUsize,
    fail_ping: AtomicBool,
    fail_close: AtomicBool,
}

#[derive(Clone)]
struct FakePool {
    name: String,
    stats: Arc<Stats>,
}

impl FakePool {
    fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            stats: Arc::new(Stats::default()),
        }
    }

    fn pings(&self) -> usize {
        self.stats.pings.load(Ordering::SeqCst)
    }

    fn closes(&self) -> usize {
        self.stats.closes.load(Ordering::SeqCst)
    }
}

impl PoolHandle for FakePool {
    async fn ping(&self) -> DbResult<()> {
        self.stats.pings.fetch_add(1, Ordering::SeqCst);
        if self.stats.fail_ping.load(Ordering::SeqCst) {
            return Err(DbError::connection(
                format!("{} unreachable", self.name),
                "retry",
            ));
        }
        Ok(())
    }

    async fn close(&self) -> DbResult<()> {
        self.stats.closes.fetch_add(1, Ordering::SeqCst);
        if self.stats.fail_close.load(Ordering::SeqCst) {
            return Err(DbError::internal(format!("{} refused to close", self.name)));
        }
        Ok(())
    }
}

const PERIOD: Duration = Duration::from_secs(60);

fn replicated_config(reads: usize) -> Config {
    let reads = (0..reads)
        .map(|i| Source::new(format!("10.0.1.{}:3306", i), "ro", "pw"))
        .collect();
    Config::new(Source::new("10.0.0.1:3306", "app", "pw"), "orders").with_reads(reads)
}

/// Connector handing out pre-built fakes keyed by host, recording every call.
#[derive(Clone, Default)]
struct Connector {
    pools: Arc<Mutex<HashMap<String, FakePool>>>,
    calls: Arc<Mutex<Vec<PoolRole>>>,
    refuse: Option<String>,
}

impl Connector {
    fn pool(&self, host: &str) -> FakePool {
        self.pools
            .lock()
            .unwrap()
            .entry(host.to_string())
            .or_insert_with(|| FakePool::new(host))
            .clone()
    }

    fn calls(&self) -> Vec<PoolRole> {
        self.calls.lock().unwrap().clone()
    }

    async fn open(&self, config: Config) -> DbResult<Manager<FakePool>> {
        let connector = self.clone();
        Manager::open_with(config, move |role, source: Source| {
            let connector = connector.clone();
            async move {
                connector.calls.lock().unwrap().push(role);
                if connector.refuse.as_deref() == Some(source.host.as_str()) {
                    return Err(DbError::connection("connection refused", "start it"));
                }
                Ok(connector.pool(&source.host))
            }
        })
        .await
    }
}

#[tokio::test]
async fn test_open_probes_every_pool_once() {
    let connector = Connector::default();
    let manager = connector.open(replicated_config(3)).await.unwrap();

    assert_eq!(manager.read_count(), 3);
    assert_eq!(
        connector.calls(),
        vec![
            PoolRole::Write,
            PoolRole::Read(0),
            PoolRole::Read(1),
            PoolRole::Read(2)
        ]
    );
    for host in ["10.0.0.1:3306", "10.0.1.0:3306", "10.0.1.1:3306", "10.0.1.2:3306"] {
        assert_eq!(connector.pool(host).pings(), 1, "{}", host);
    }
    manager.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_open_without_reads_routes_reads_to_write() {
    let connector = Connector::default();
    let manager = connector.open(replicated_config(0)).await.unwrap();

    assert_eq!(manager.read_count(), 1);
    assert_eq!(manager.read_handle().name, manager.write_handle().name);
    manager.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_open_failure_closes_already_opened_pools() {
    let connector = Connector {
        refuse: Some("10.0.1.1:3306".to_string()),
        ..Connector::default()
    };
    let err = connector.open(replicated_config(3)).await.unwrap_err();
    assert!(matches!(err, DbError::Connection { .. }), "{:?}", err);

    // Opening stops at the failing replica.
    assert_eq!(
        connector.calls(),
        vec![PoolRole::Write, PoolRole::Read(0), PoolRole::Read(1)]
    );
    assert_eq!(connector.pool("10.0.0.1:3306").closes(), 1);
    assert_eq!(connector.pool("10.0.1.0:3306").closes(), 1);
}

#[tokio::test]
async fn test_unreachable_write_endpoint_opens_no_read_pool() {
    let connector = Connector {
        refuse: Some("10.0.0.1:3306".to_string()),
        ..Connector::default()
    };
    let err = connector.open(replicated_config(2)).await.unwrap_err();
    assert!(matches!(err, DbError::Connection { .. }), "{:?}", err);

    assert_eq!(connector.calls(), vec![PoolRole::Write]);
    // No pool was ever built, so none was pinged or needs closing.
    assert!(connector.pools.lock().unwrap().is_empty());
}

#[tokio::test]
async fn test_failed_probe_closes_that_pool_too() {
    let connector = Connector::default();
    let bad = connector.pool("10.0.1.0:3306");
    bad.stats.fail_ping.store(true, Ordering::SeqCst);

    let err = connector.open(replicated_config(2)).await.unwrap_err();
    assert!(err.to_string().contains("unreachable"), "{}", err);
    assert_eq!(bad.closes(), 1);
    assert_eq!(connector.pool("10.0.0.1:3306").closes(), 1);
    assert_eq!(connector.calls().len(), 2);
}

#[tokio::test]
async fn test_invalid_config_never_connects() {
    let connector = Connector::default();
    let config = Config::new(Source::new("", "app", "pw"), "orders");
    let err = connector.open(config).await.unwrap_err();
    assert!(matches!(err, DbError::Configuration { .. }));
    assert!(connector.calls().is_empty());
}

#[tokio::test]
async fn test_write_handle_is_stable() {
    let write = FakePool::new("primary");
    let manager = Manager::from_pools(write.clone(), vec![FakePool::new("r0")], PERIOD);
    for _ in 0..10 {
        assert_eq!(manager.write_handle().name, "primary");
    }
    manager.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_read_selection_is_roughly_uniform() {
    let reads = vec![FakePool::new("r0"), FakePool::new("r1"), FakePool::new("r2")];
    let manager = Manager::from_pools(FakePool::new("w"), reads, PERIOD).with_seed(7);

    let mut hits: HashMap<String, usize> = HashMap::new();
    for _ in 0..3000 {
        *hits.entry(manager.read_handle().name.clone()).or_default() += 1;
    }

    assert_eq!(hits.len(), 3);
    for (name, count) in &hits {
        assert!((800..=1200).contains(count), "{} picked {} times", name, count);
    }
    assert!(!hits.contains_key("w"));
    manager.shutdown().await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn test_keepalive_first_probe_after_one_period() {
    let write = FakePool::new("w");
    let read = FakePool::new("r0");
    let manager = Manager::from_pools(write.clone(), vec![read.clone()], PERIOD);

    tokio::time::sleep(PERIOD - Duration::from_secs(1)).await;
    assert_eq!(write.pings(), 0);
    assert_eq!(read.pings(), 0);

    tokio::time::sleep(Duration::from_secs(2)).await;
    assert_eq!(write.pings(), 1);
    assert_eq!(read.pings(), 1);

    tokio::time::sleep(PERIOD * 2).await;
    assert_eq!(write.pings(), 3);
    manager.shutdown().await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn test_keepalive_survives_probe_failures() {
    let write = FakePool::new("w");
    write.stats.fail_ping.store(true, Ordering::SeqCst);
    let manager = Manager::from_pools(write.clone(), vec![], PERIOD);

    tokio::time::sleep(PERIOD * 3 + Duration::from_secs(1)).await;
    // The write pool doubles as the only read pool, so it has two keepalive tasks.
    assert_eq!(write.pings(), 6);

    write.stats.fail_ping.store(false, Ordering::SeqCst);
    tokio::time::sleep(PERIOD).await;
    assert_eq!(write.pings(), 8);
    manager.shutdown().await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn test_shutdown_stops_keepalive_and_closes_once() {
    let write = FakePool::new("w");
    let reads = vec![FakePool::new("r0"), FakePool::new("r1")];
    let manager = Manager::from_pools(write.clone(), reads.clone(), PERIOD);

    manager.shutdown().await.unwrap();
    assert!(manager.is_closed());
    assert_eq!(write.closes(), 1);
    assert!(reads.iter().all(|r| r.closes() == 1));

    tokio::time::sleep(PERIOD * 10).await;
    assert_eq!(write.pings(), 0);
    assert!(reads.iter().all(|r| r.pings() == 0));

    // Idempotent.
    manager.shutdown().await.unwrap();
    assert_eq!(write.closes(), 1);
}

#[tokio::test]
async fn test_shutdown_aggregates_close_failures() {
    let write = FakePool::new("w");
    let reads = vec![FakePool::new("r0"), FakePool::new("r1"), FakePool::new("r2")];
    write.stats.fail_close.store(true, Ordering::SeqCst);
    reads[1].stats.fail_close.store(true, Ordering::SeqCst);

    let manager = Manager::from_pools(write.clone(), reads.clone(), PERIOD);
    let err = manager.shutdown().await.unwrap_err();

    match err {
        DbError::Shutdown { failures } => {
            let pools: Vec<&str> = failures.iter().map(|f| f.pool.as_str()).collect();
            assert_eq!(pools, vec!["write", "read[1]"]);
            assert!(failures[1].message.contains("r1 refused"));
        }
        other => panic!("unexpected error: {:?}", other),
    }
    // Every pool was still asked to close.
    assert_eq!(write.closes(), 1);
    assert!(reads.iter().all(|r| r.closes() == 1));
    assert!(manager.shutdown().await.is_ok());
}

#[tokio::test(start_paused = true)]
async fn test_drop_without_shutdown_stops_keepalive() {
    let write = FakePool::new("w");
    let manager = Manager::from_pools(write.clone(), vec![], PERIOD);
    drop(manager);

    tokio::time::sleep(PERIOD * 5).await;
    assert_eq!(write.pings(), 0);
}

#[tokio::test]
async fn test_ping_all_reports_each_pool() {
    let write = FakePool::new("w");
    let bad = FakePool::new("r1");
    bad.stats.fail_ping.store(true, Ordering::SeqCst);
    let manager = Manager::from_pools(write, vec![FakePool::new("r0"), bad], PERIOD);

    let results = manager.ping_all().await;
    let failed: Vec<PoolRole> = results
        .iter()
        .filter(|(_, r)| r.is_err())
        .map(|(role, _)| *role)
        .collect();
    assert_eq!(results.len(), 3);
    assert_eq!(failed, vec![PoolRole::Read(1)]);
    manager.shutdown().await.unwrap();
}
