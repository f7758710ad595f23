//! Process-wide pool registry.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;

use parking_lot::Mutex;
use tokio::task::JoinHandle;

use crate::config::ConnectConfig;
use crate::connection::Pooled;
use crate::driver::Driver;
use crate::error::PoolError;
use crate::key::PoolKey;
use crate::maintenance;
use crate::pool::{Pool, PooledConnection};

/// Default interval between maintenance sweeps.
pub const DEFAULT_SWEEP_INTERVAL: Duration = Duration::from_secs(30);

/// Process-wide mapping from configuration keys to their pools.
///
/// The registry is an explicit object rather than ambient global state:
/// construct one per process (or one per test for isolation) and pass it
/// around. Pools are created lazily on the first checkout for a new key and
/// live until [`close`](Self::close); clearing a pool empties it but keeps
/// it registered. Cloning is cheap and clones share state.
pub struct PoolRegistry<D: Driver> {
    inner: Arc<RegistryInner<D>>,
}

impl<D: Driver> Clone for PoolRegistry<D> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

pub(crate) struct RegistryInner<D: Driver> {
    driver: Arc<D>,
    pools: Mutex<HashMap<PoolKey, Pool<D>>>,
    /// Connection ids are unique across the whole registry.
    conn_ids: Arc<AtomicU64>,
    sweeper: Mutex<Option<JoinHandle<()>>>,
    closed: AtomicBool,
}

impl<D: Driver> RegistryInner<D> {
    pub(crate) fn pools_snapshot(&self) -> Vec<Pool<D>> {
        self.pools.lock().values().cloned().collect()
    }
}

impl<D: Driver> Drop for RegistryInner<D> {
    fn drop(&mut self) {
        if let Some(handle) = self.sweeper.get_mut().take() {
            handle.abort();
        }
    }
}

impl<D: Driver> PoolRegistry<D> {
    /// Create a registry sweeping every [`DEFAULT_SWEEP_INTERVAL`].
    pub fn new(driver: D) -> Self {
        Self::with_sweep_interval(driver, DEFAULT_SWEEP_INTERVAL)
    }

    /// Create a registry with a custom maintenance sweep interval.
    ///
    /// The sweeper task is spawned on the current Tokio runtime. Outside a
    /// runtime the registry still works, but no background maintenance runs;
    /// sweeps can be forced with [`Pool::sweep`].
    pub fn with_sweep_interval(driver: D, interval: Duration) -> Self {
        let inner = Arc::new(RegistryInner {
            driver: Arc::new(driver),
            pools: Mutex::new(HashMap::new()),
            conn_ids: Arc::new(AtomicU64::new(0)),
            sweeper: Mutex::new(None),
            closed: AtomicBool::new(false),
        });
        let sweeper = tokio::runtime::Handle::try_current()
            .ok()
            .map(|handle| handle.spawn(maintenance::sweep_loop(Arc::downgrade(&inner), interval)));
        if sweeper.is_none() {
            tracing::debug!("no runtime at construction; background maintenance disabled");
        }
        *inner.sweeper.lock() = sweeper;
        Self { inner }
    }

    /// Check out a connection for `config`.
    ///
    /// Looks up or lazily creates the pool for the configuration's key, then
    /// runs its checkout protocol with the configured `acquire_timeout`.
    /// When pooling is disabled in the configuration, every call opens a
    /// fresh physical connection that is closed again on release.
    pub async fn get(&self, config: &ConnectConfig) -> Result<PooledConnection<D>, PoolError> {
        if self.inner.closed.load(Ordering::SeqCst) {
            return Err(PoolError::Closed);
        }
        config.validate()?;
        if !config.pool.enabled {
            tracing::trace!("pooling disabled; opening dedicated connection");
            let raw = self.inner.driver.open(config).await?;
            let id = self.inner.conn_ids.fetch_add(1, Ordering::Relaxed);
            return Ok(PooledConnection::direct(
                Arc::clone(&self.inner.driver),
                Pooled::new(id, 0, raw),
            ));
        }
        self.pool(config).get().await
    }

    /// Get (creating if needed) the pool serving `config`.
    ///
    /// Useful for diagnostics ([`Pool::status`], [`Pool::metrics`]) and for
    /// forcing a maintenance pass with [`Pool::sweep`].
    pub fn pool(&self, config: &ConnectConfig) -> Pool<D> {
        let key = PoolKey::from_config(config);
        let mut pools = self.inner.pools.lock();
        pools
            .entry(key)
            .or_insert_with(|| {
                Pool::new(
                    Arc::clone(&self.inner.driver),
                    config.clone(),
                    Arc::clone(&self.inner.conn_ids),
                )
            })
            .clone()
    }

    fn lookup(&self, config: &ConnectConfig) -> Option<Pool<D>> {
        let key = PoolKey::from_config(config);
        self.inner.pools.lock().get(&key).cloned()
    }

    /// Close every idle connection pooled for `config` and fence out the
    /// connections currently leased from that pool.
    ///
    /// Leased connections keep working; they are discarded when released.
    /// A no-op if no pool exists for the configuration.
    pub async fn clear_pool(&self, config: &ConnectConfig) {
        if let Some(pool) = self.lookup(config) {
            pool.clear().await;
        }
    }

    /// Apply [`clear_pool`](Self::clear_pool) to every registered pool.
    pub async fn clear_all(&self) {
        let pools = self.inner.pools_snapshot();
        tracing::info!(pools = pools.len(), "clearing all pools");
        for pool in pools {
            pool.clear().await;
        }
    }

    /// Tear the registry down: stop the sweeper and close every pool.
    ///
    /// Subsequent checkouts fail with [`PoolError::Closed`]. Connections
    /// still leased are closed as their handles are dropped.
    pub async fn close(&self) {
        if self.inner.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        if let Some(handle) = self.inner.sweeper.lock().take() {
            handle.abort();
        }
        for pool in self.inner.pools_snapshot() {
            pool.close().await;
        }
        tracing::info!("pool registry closed");
    }

    /// Check if the registry has been closed.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.inner.closed.load(Ordering::SeqCst)
    }

    /// Number of pools currently registered.
    #[must_use]
    pub fn pool_count(&self) -> usize {
        self.inner.pools.lock().len()
    }
}
