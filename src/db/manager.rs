//! The write/read pool manager.
//!
//! A [`Manager`] owns one write pool and a non-empty list of read pools against
//! logically identical replicas. It hands out the write pool for mutations, a
//! uniformly random read pool for queries, and runs one keepalive task per pool
//! so idle connections are not dropped by the server or a load balancer.
//!
//! # Lifecycle
//!
//! - [`Manager::open`] / [`Manager::open_with`] open and probe every pool. Any
//!   failure closes what was already opened and no keepalive task is started.
//! - [`Manager::shutdown`] cancels the keepalive tasks, waits for them, then closes
//!   every pool. It is idempotent.
//! - Dropping a manager that was never shut down cancels its keepalive tasks.
//!
//! # Concurrency
//!
//! - Routing takes `&self`; share the manager behind an `Arc`.
//! - The random source sits behind a `std::sync::Mutex` held for a single draw.
//! - Keepalive tasks wait on `tokio::select!` over the tick and the cancellation
//!   token, so cancellation takes effect at the next await point.

use crate::config::{Config, Source, keepalive_or_default};
use crate::db::pool::{DbPool, PoolHandle, PoolRole};
use crate::error::{DbError, DbResult, PoolFailure};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, PoisonError};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::{self, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// One write pool, N read pools, and their keepalive tasks.
pub struct Manager<P: PoolHandle = DbPool> {
    write: P,
    reads: Vec<P>,
    keepalive: Duration,
    cancel: CancellationToken,
    /// Keepalive task handles. Uses std::sync::Mutex so Drop stays synchronous.
    tasks: Mutex<Vec<JoinHandle<()>>>,
    rng: Mutex<StdRng>,
    closed: AtomicBool,
}

impl<P: PoolHandle> std::fmt::Debug for Manager<P> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Manager")
            .field("reads", &self.reads.len())
            .field("keepalive", &self.keepalive)
            .field("closed", &self.is_closed())
            .finish_non_exhaustive()
    }
}

impl Manager<DbPool> {
    /// Open the write pool and one pool per read source described by `config`.
    pub async fn open(config: Config) -> DbResult<Self> {
        let pool_config = config.clone().normalized();
        Self::open_with(config, move |role, source| {
            let pool_config = pool_config.clone();
            async move { DbPool::connect(&pool_config, &source, role).await }
        })
        .await
    }
}

impl<P: PoolHandle> Manager<P> {
    /// Open every pool through `connect`, probing each one once.
    ///
    /// The write pool is opened first, then the read pools in configuration order.
    /// On the first failure every pool opened so far is closed and that error is
    /// returned.
    pub async fn open_with<F, Fut>(config: Config, connect: F) -> DbResult<Self>
    where
        F: Fn(PoolRole, Source) -> Fut,
        Fut: Future<Output = DbResult<P>>,
    {
        let config = config.normalized();
        config.validate()?;

        if config.keepalive == 0 && config.keepalive_outlives_lifetime() {
            warn!(
                keepalive_secs = config.keepalive_interval().as_secs(),
                max_lifetime_secs = config.max_lifetime_duration().as_secs(),
                "Default keepalive interval exceeds the connection lifetime; idle connections are recycled before they are probed"
            );
        }

        info!(
            driver = %config.driver,
            write = %config.write,
            reads = config.reads.len(),
            "Opening database manager"
        );

        let write = open_pool(&connect, PoolRole::Write, &config.write).await?;

        let mut reads = Vec::with_capacity(config.reads.len());
        for (idx, source) in config.reads.iter().enumerate() {
            match open_pool(&connect, PoolRole::Read(idx), source).await {
                Ok(pool) => reads.push(pool),
                Err(err) => {
                    close_quietly(PoolRole::Write, &write).await;
                    for (opened, pool) in reads.iter().enumerate() {
                        close_quietly(PoolRole::Read(opened), pool).await;
                    }
                    return Err(err);
                }
            }
        }

        Ok(Self::start(
            write,
            reads,
            config.keepalive_interval(),
            StdRng::from_entropy(),
        ))
    }

    /// Build a manager from pools that are already open and start keepalive.
    ///
    /// An empty `reads` list falls back to the write pool. A zero `keepalive`
    /// uses the 3h default. Must be called inside a tokio runtime.
    pub fn from_pools(write: P, reads: Vec<P>, keepalive: Duration) -> Self {
        let reads = if reads.is_empty() {
            vec![write.clone()]
        } else {
            reads
        };
        Self::start(write, reads, keepalive, StdRng::from_entropy())
    }

    /// Replace the read-selection random source with a seeded one.
    pub fn with_seed(self, seed: u64) -> Self {
        *self.rng.lock().unwrap_or_else(PoisonError::into_inner) = StdRng::seed_from_u64(seed);
        self
    }

    fn start(write: P, reads: Vec<P>, keepalive: Duration, rng: StdRng) -> Self {
        let keepalive = keepalive_or_default(keepalive);
        let cancel = CancellationToken::new();

        let mut tasks = Vec::with_capacity(reads.len() + 1);
        tasks.push(spawn_keepalive(
            PoolRole::Write,
            write.clone(),
            keepalive,
            cancel.clone(),
        ));
        for (idx, pool) in reads.iter().enumerate() {
            tasks.push(spawn_keepalive(
                PoolRole::Read(idx),
                pool.clone(),
                keepalive,
                cancel.clone(),
            ));
        }

        info!(
            reads = reads.len(),
            keepalive_secs = keepalive.as_secs(),
            "Database manager ready"
        );

        Self {
            write,
            reads,
            keepalive,
            cancel,
            tasks: Mutex::new(tasks),
            rng: Mutex::new(rng),
            closed: AtomicBool::new(false),
        }
    }

    /// The write pool. Always the same handle.
    pub fn write_handle(&self) -> &P {
        &self.write
    }

    /// A read pool chosen uniformly at random on every call.
    pub fn read_handle(&self) -> &P {
        let idx = match self.reads.len() {
            1 => 0,
            n => self
                .rng
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .gen_range(0..n),
        };
        &self.reads[idx]
    }

    /// All read pools in configuration order.
    pub fn read_handles(&self) -> &[P] {
        &self.reads
    }

    pub fn read_count(&self) -> usize {
        self.reads.len()
    }

    /// Interval between keepalive probes.
    pub fn keepalive_interval(&self) -> Duration {
        self.keepalive
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Every pool with its role: write first, then reads in order.
    pub fn pools(&self) -> impl Iterator<Item = (PoolRole, &P)> {
        std::iter::once((PoolRole::Write, &self.write)).chain(
            self.reads
                .iter()
                .enumerate()
                .map(|(idx, pool)| (PoolRole::Read(idx), pool)),
        )
    }

    /// Probe every pool once, returning each outcome.
    pub async fn ping_all(&self) -> Vec<(PoolRole, DbResult<()>)> {
        let mut results = Vec::with_capacity(self.reads.len() + 1);
        for (role, pool) in self.pools() {
            results.push((role, pool.ping().await));
        }
        results
    }

    /// Stop keepalive and close every pool.
    ///
    /// Only the first call does any work; later calls return `Ok(())`. Close
    /// failures do not stop the remaining closes and are returned together.
    pub async fn shutdown(&self) -> DbResult<()> {
        if self.closed.swap(true, Ordering::AcqRel) {
            debug!("Database manager already shut down");
            return Ok(());
        }

        info!("Shutting down database manager");
        self.cancel.cancel();

        let tasks = std::mem::take(&mut *self.tasks.lock().unwrap_or_else(PoisonError::into_inner));
        for task in tasks {
            if let Err(err) = task.await {
                error!(error = %err, "Keepalive task ended abnormally");
            }
        }

        let mut failures = Vec::new();
        for (role, pool) in self.pools() {
            if let Err(err) = pool.close().await {
                error!(pool = %role, error = %err, "Failed to close pool");
                failures.push(PoolFailure {
                    pool: role.to_string(),
                    message: err.to_string(),
                });
            }
        }

        if failures.is_empty() {
            info!("All pools closed");
            Ok(())
        } else {
            Err(DbError::shutdown(failures))
        }
    }
}

impl<P: PoolHandle> Drop for Manager<P> {
    fn drop(&mut self) {
        if !self.closed.load(Ordering::Acquire) {
            self.cancel.cancel();
            warn!("Database manager dropped without shutdown; keepalive stopped, pools closed on drop");
        }
    }
}

/// Connect one pool and probe it. A failed probe closes the pool.
async fn open_pool<P, F, Fut>(connect: &F, role: PoolRole, source: &Source) -> DbResult<P>
where
    P: PoolHandle,
    F: Fn(PoolRole, Source) -> Fut,
    Fut: Future<Output = DbResult<P>>,
{
    let pool = connect(role, source.clone()).await.inspect_err(|err| {
        error!(pool = %role, source = %source, error = %err, "Failed to open pool");
    })?;

    if let Err(err) = pool.ping().await {
        error!(pool = %role, source = %source, error = %err, "Initial probe failed");
        close_quietly(role, &pool).await;
        return Err(err);
    }
    Ok(pool)
}

async fn close_quietly<P: PoolHandle>(role: PoolRole, pool: &P) {
    if let Err(err) = pool.close().await {
        error!(pool = %role, error = %err, "Failed to close pool after open failure");
    }
}

fn spawn_keepalive<P: PoolHandle>(
    role: PoolRole,
    pool: P,
    period: Duration,
    cancel: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        // First probe one full period after start.
        let mut ticker = time::interval_at(Instant::now() + period, period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        info!(pool = %role, interval_secs = period.as_secs(), "Keepalive started");

        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                _ = ticker.tick() => match pool.ping().await {
                    Ok(()) => debug!(pool = %role, "Keepalive probe ok"),
                    Err(err) => error!(pool = %role, error = %err, "Keepalive probe failed"),
                },
            }
        }

        info!(pool = %role, "Keepalive stopped");
    })
}
