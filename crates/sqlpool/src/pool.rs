//! Connection pool implementation.
//!
//! One [`Pool`] manages the connections for a single [`PoolKey`]. State
//! lives under a [`parking_lot::Mutex`] that is never held across an await:
//! callers waiting for capacity suspend on a `oneshot` receiver, and all
//! driver I/O (open, close, health probe) runs outside the lock.
//!
//! [`PoolKey`]: crate::key::PoolKey

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use tokio::sync::oneshot;

use crate::config::ConnectConfig;
use crate::connection::{ConnMeta, Pooled};
use crate::driver::Driver;
use crate::error::PoolError;

/// Signal delivered to a queued waiter, in FIFO order.
enum Wake<C> {
    /// A released connection, handed over directly.
    Conn(Pooled<C>),
    /// A freed capacity slot; the waiter opens its own connection.
    /// `total` already accounts for it.
    Slot,
}

struct Waiter<C> {
    id: u64,
    tx: oneshot::Sender<Wake<C>>,
}

struct PoolState<C> {
    /// Available connections, most recently returned at the front.
    idle: VecDeque<Pooled<C>>,
    /// Checked-out connection id -> lease start.
    leased: HashMap<u64, Instant>,
    /// Idle + leased + in-flight opens. Never exceeds `max_size`.
    total: u32,
    /// Bumped on clear; connections tagged with an older generation are
    /// closed on release instead of returning to idle.
    generation: u64,
    /// Callers waiting for capacity, FIFO.
    waiters: VecDeque<Waiter<C>>,
    closed: bool,
}

/// Hand `wake` to the first waiter still listening. Returns the wake back if
/// every queued waiter has gone away (cancelled callers leave dead entries
/// behind; they are skipped here).
fn wake_first<C>(state: &mut PoolState<C>, mut wake: Wake<C>) -> Option<Wake<C>> {
    while let Some(waiter) = state.waiters.pop_front() {
        wake = match waiter.tx.send(wake) {
            Ok(()) => return None,
            Err(back) => back,
        };
    }
    Some(wake)
}

/// Release one capacity slot: hand it to a waiter or shrink `total`.
fn free_slot<C>(state: &mut PoolState<C>) {
    if wake_first(state, Wake::Slot).is_some() {
        state.total -= 1;
    }
}

/// Route a survivable released connection: hand it to the first waiter, or
/// put it at the front of the idle queue so the freshest connection is
/// reused first.
fn keep_idle<C>(state: &mut PoolState<C>, conn: Pooled<C>) {
    if let Some(Wake::Conn(conn)) = wake_first(state, Wake::Conn(conn)) {
        state.idle.push_front(conn);
    }
}

/// Close a raw connection from a sync context. Inside a runtime the close is
/// spawned; outside one the session is torn down by dropping it.
fn spawn_close<D: Driver>(driver: Arc<D>, conn: Pooled<D::Conn>) {
    let id = conn.meta.id;
    match tokio::runtime::Handle::try_current() {
        Ok(handle) => {
            handle.spawn(async move {
                if let Err(err) = driver.close(conn.raw).await {
                    tracing::warn!(id, error = %err, "failed to close connection");
                }
            });
        }
        Err(_) => drop(conn),
    }
}

#[derive(Default)]
struct Metrics {
    connections_created: AtomicU64,
    connections_closed: AtomicU64,
    checkouts_successful: AtomicU64,
    checkouts_failed: AtomicU64,
    sweep_reaped: AtomicU64,
}

/// A connection pool for one configuration key.
///
/// The pool hands out [`PooledConnection`] leases, reclaims them on drop,
/// and enforces the population bounds and timeouts in
/// [`PoolOptions`](crate::config::PoolOptions). Obtained from a
/// [`PoolRegistry`](crate::registry::PoolRegistry); cloning is cheap and
/// clones share state.
pub struct Pool<D: Driver> {
    inner: Arc<PoolInner<D>>,
}

impl<D: Driver> Clone for Pool<D> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

pub(crate) struct PoolInner<D: Driver> {
    driver: Arc<D>,
    config: ConnectConfig,
    state: Mutex<PoolState<D::Conn>>,
    metrics: Metrics,
    conn_ids: Arc<AtomicU64>,
    waiter_ids: AtomicU64,
}

/// Outcome of one pass over the pool state while checking out.
enum Claim<C> {
    /// An idle connection to vet.
    Idle(Pooled<C>),
    /// A reserved slot; open a new connection.
    Open,
    /// At capacity; wait for a wake.
    Wait(u64, oneshot::Receiver<Wake<C>>),
}

impl<D: Driver> Pool<D> {
    pub(crate) fn new(driver: Arc<D>, config: ConnectConfig, conn_ids: Arc<AtomicU64>) -> Self {
        Self {
            inner: Arc::new(PoolInner {
                driver,
                config,
                state: Mutex::new(PoolState {
                    idle: VecDeque::new(),
                    leased: HashMap::new(),
                    total: 0,
                    generation: 0,
                    waiters: VecDeque::new(),
                    closed: false,
                }),
                metrics: Metrics::default(),
                conn_ids,
                waiter_ids: AtomicU64::new(0),
            }),
        }
    }

    /// Get a connection from the pool.
    ///
    /// Returns an idle connection when a valid one is available, opens a new
    /// one when under capacity, and otherwise waits (FIFO behind earlier
    /// callers) up to the configured `acquire_timeout`.
    pub async fn get(&self) -> Result<PooledConnection<D>, PoolError> {
        self.get_timeout(self.inner.config.pool.acquire_timeout)
            .await
    }

    /// Get a connection, waiting at most `timeout` for capacity.
    pub async fn get_timeout(&self, timeout: Duration) -> Result<PooledConnection<D>, PoolError> {
        tracing::trace!("acquiring connection from pool");
        match self.inner.checkout(timeout).await {
            Ok(conn) => {
                self.inner
                    .metrics
                    .checkouts_successful
                    .fetch_add(1, Ordering::Relaxed);
                Ok(PooledConnection::pooled(Arc::clone(&self.inner), conn))
            }
            Err(err) => {
                self.inner
                    .metrics
                    .checkouts_failed
                    .fetch_add(1, Ordering::Relaxed);
                Err(err)
            }
        }
    }

    /// Get an idle connection without waiting or opening a new one.
    ///
    /// Returns `Ok(None)` when no idle connection is available. Skips the
    /// checkout health probe (that would require blocking on driver I/O);
    /// generation and lifetime are still vetted.
    pub fn try_get(&self) -> Result<Option<PooledConnection<D>>, PoolError> {
        loop {
            let claimed = {
                let mut state = self.inner.state.lock();
                if state.closed {
                    return Err(PoolError::Closed);
                }
                let Some(mut conn) = state.idle.pop_front() else {
                    return Ok(None);
                };
                let valid = conn.meta.generation == state.generation
                    && !conn.meta.is_expired(self.inner.config.pool.max_lifetime);
                if valid {
                    conn.meta.mark_checkout();
                    state.leased.insert(conn.meta.id, Instant::now());
                    Ok(conn)
                } else {
                    free_slot(&mut state);
                    Err(conn)
                }
            };
            match claimed {
                Ok(conn) => {
                    self.inner
                        .metrics
                        .checkouts_successful
                        .fetch_add(1, Ordering::Relaxed);
                    return Ok(Some(PooledConnection::pooled(
                        Arc::clone(&self.inner),
                        conn,
                    )));
                }
                Err(conn) => {
                    tracing::debug!(id = conn.meta.id, "discarding invalid idle connection");
                    self.inner
                        .metrics
                        .connections_closed
                        .fetch_add(1, Ordering::Relaxed);
                    spawn_close(Arc::clone(&self.inner.driver), conn);
                }
            }
        }
    }

    /// Close every idle connection and fence out the current generation.
    ///
    /// Leased connections are left alone; they are discarded on their next
    /// release because their generation is now stale. No caller is handed a
    /// pre-clear connection after this returns.
    pub async fn clear(&self) {
        let drained = {
            let mut state = self.inner.state.lock();
            state.generation += 1;
            let drained: Vec<_> = state.idle.drain(..).collect();
            // Each closed idle connection frees a slot for queued waiters.
            for _ in 0..drained.len() {
                free_slot(&mut state);
            }
            tracing::info!(
                generation = state.generation,
                closed = drained.len(),
                "pool cleared"
            );
            drained
        };
        for conn in drained {
            self.inner.close_conn(conn).await;
        }
    }

    /// Close the pool: drop idle connections, wake pending waiters into an
    /// error, and refuse further checkouts.
    pub async fn close(&self) {
        let drained = {
            let mut state = self.inner.state.lock();
            if state.closed {
                return;
            }
            state.closed = true;
            // Dropping the senders wakes pending waiters into the closed path.
            state.waiters.clear();
            let drained: Vec<_> = state.idle.drain(..).collect();
            state.total -= drained.len() as u32;
            drained
        };
        for conn in drained {
            self.inner.close_conn(conn).await;
        }
        tracing::info!("connection pool closed");
    }

    /// Check if the pool is closed.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.inner.state.lock().closed
    }

    /// Run one maintenance pass: close idle connections past their idle
    /// timeout or lifetime (never shrinking the population below
    /// `min_size`), then open new connections up to `min_size`.
    ///
    /// Normally driven by the registry's background sweeper; public so
    /// callers can force a deterministic pass.
    pub async fn sweep(&self) {
        let options = &self.inner.config.pool;

        // Reap expired idle connections, stalest first (the back of the
        // queue holds the least recently returned).
        let reaped = {
            let mut state = self.inner.state.lock();
            if state.closed {
                return;
            }
            let min = options.min_size as usize;
            let mut reaped = Vec::new();
            let mut i = state.idle.len();
            while i > 0 {
                i -= 1;
                if state.idle.len() + state.leased.len() <= min {
                    break;
                }
                let expired = {
                    let conn = &state.idle[i];
                    conn.meta.is_idle_expired(options.idle_timeout)
                        || conn.meta.is_expired(options.max_lifetime)
                };
                if expired {
                    if let Some(conn) = state.idle.remove(i) {
                        free_slot(&mut state);
                        reaped.push(conn);
                    }
                }
            }
            reaped
        };
        if !reaped.is_empty() {
            tracing::debug!(reaped = reaped.len(), "sweep reclaimed idle connections");
        }
        for conn in reaped {
            self.inner.metrics.sweep_reaped.fetch_add(1, Ordering::Relaxed);
            self.inner.close_conn(conn).await;
        }

        // Pre-warm up to the minimum population.
        loop {
            let reserved = {
                let mut state = self.inner.state.lock();
                if state.closed
                    || state.total >= options.min_size
                    || state.total >= options.max_size
                {
                    false
                } else {
                    state.total += 1;
                    true
                }
            };
            if !reserved {
                break;
            }
            match self.inner.open_conn().await {
                Ok(conn) => {
                    let mut state = self.inner.state.lock();
                    if state.closed {
                        // Lost the race with close(); tear the connection down.
                        free_slot(&mut state);
                        drop(state);
                        self.inner.close_conn(conn).await;
                        return;
                    }
                    // New arrivals go to the back so recently used
                    // connections stay preferred at the front.
                    if let Some(Wake::Conn(conn)) = wake_first(&mut state, Wake::Conn(conn)) {
                        state.idle.push_back(conn);
                    }
                }
                Err(err) => {
                    // open_conn already released the reservation.
                    tracing::warn!(error = %err, "pre-warm connect failed");
                    break;
                }
            }
        }
    }

    /// Get the current pool status.
    #[must_use]
    pub fn status(&self) -> PoolStatus {
        let state = self.inner.state.lock();
        PoolStatus {
            idle: state.idle.len() as u32,
            in_use: state.leased.len() as u32,
            total: state.total,
            max: self.inner.config.pool.max_size,
            waiting: state.waiters.len() as u32,
        }
    }

    /// Get the pool's lifetime counters.
    #[must_use]
    pub fn metrics(&self) -> PoolMetrics {
        let metrics = &self.inner.metrics;
        PoolMetrics {
            connections_created: metrics.connections_created.load(Ordering::Relaxed),
            connections_closed: metrics.connections_closed.load(Ordering::Relaxed),
            checkouts_successful: metrics.checkouts_successful.load(Ordering::Relaxed),
            checkouts_failed: metrics.checkouts_failed.load(Ordering::Relaxed),
            sweep_reaped: metrics.sweep_reaped.load(Ordering::Relaxed),
        }
    }

    /// Get the configuration this pool serves.
    #[must_use]
    pub fn config(&self) -> &ConnectConfig {
        &self.inner.config
    }
}

impl<D: Driver> PoolInner<D> {
    async fn checkout(self: &Arc<Self>, timeout: Duration) -> Result<Pooled<D::Conn>, PoolError> {
        let deadline = Instant::now() + timeout;
        loop {
            let claim = {
                let mut state = self.state.lock();
                if state.closed {
                    return Err(PoolError::Closed);
                }
                if let Some(conn) = state.idle.pop_front() {
                    Claim::Idle(conn)
                } else if state.total < self.config.pool.max_size {
                    state.total += 1;
                    Claim::Open
                } else {
                    let id = self.waiter_ids.fetch_add(1, Ordering::Relaxed);
                    let (tx, rx) = oneshot::channel();
                    state.waiters.push_back(Waiter { id, tx });
                    Claim::Wait(id, rx)
                }
            };

            match claim {
                Claim::Idle(conn) => {
                    if let Some(conn) = self.vet(conn).await {
                        match self.try_lease(conn) {
                            Ok(conn) => return Ok(conn),
                            Err(conn) => self.discard(conn, "lease raced pool clear").await,
                        }
                    }
                }
                Claim::Open => {
                    let conn = self.open_conn().await?;
                    match self.try_lease(conn) {
                        Ok(conn) => return Ok(conn),
                        Err(conn) => self.discard(conn, "open raced pool clear").await,
                    }
                }
                Claim::Wait(id, mut rx) => {
                    let remaining = deadline.saturating_duration_since(Instant::now());
                    match tokio::time::timeout(remaining, &mut rx).await {
                        Ok(Ok(Wake::Conn(conn))) => {
                            if let Some(conn) = self.vet(conn).await {
                                match self.try_lease(conn) {
                                    Ok(conn) => return Ok(conn),
                                    Err(conn) => {
                                        self.discard(conn, "lease raced pool clear").await;
                                    }
                                }
                            }
                        }
                        Ok(Ok(Wake::Slot)) => {
                            let conn = self.open_conn().await?;
                            match self.try_lease(conn) {
                                Ok(conn) => return Ok(conn),
                                Err(conn) => self.discard(conn, "open raced pool clear").await,
                            }
                        }
                        // Sender dropped without a wake: the pool is closing.
                        // The next pass reports it.
                        Ok(Err(_)) => {}
                        Err(_) => {
                            self.abandon_waiter(id, &mut rx);
                            return Err(PoolError::Exhausted(timeout));
                        }
                    }
                }
            }
        }
    }

    /// Remove a timed-out waiter. A wake can race the timeout: the senders
    /// run under the pool lock, so once the lock is held here, either our
    /// entry is still queued (no wake) or the wake is already in `rx` and
    /// must be passed on so no capacity is stranded.
    fn abandon_waiter(&self, id: u64, rx: &mut oneshot::Receiver<Wake<D::Conn>>) {
        let mut state = self.state.lock();
        if let Some(pos) = state.waiters.iter().position(|w| w.id == id) {
            state.waiters.remove(pos);
            return;
        }
        if let Ok(wake) = rx.try_recv() {
            match wake {
                Wake::Conn(conn) => keep_idle(&mut state, conn),
                Wake::Slot => free_slot(&mut state),
            }
        }
    }

    /// Validate a connection claimed from idle or handed over by a releaser.
    /// Invalid connections are closed and their slot freed; `None` tells the
    /// caller to claim again.
    async fn vet(self: &Arc<Self>, mut conn: Pooled<D::Conn>) -> Option<Pooled<D::Conn>> {
        let generation = self.state.lock().generation;
        let options = &self.config.pool;
        let reason = if conn.meta.generation != generation {
            Some("stale generation")
        } else if conn.meta.is_expired(options.max_lifetime) {
            Some("max lifetime exceeded")
        } else {
            None
        };
        if let Some(reason) = reason {
            self.discard(conn, reason).await;
            return None;
        }
        if options.test_on_checkout && !self.driver.is_healthy(&mut conn.raw).await {
            self.discard(conn, "failed health probe").await;
            return None;
        }
        Some(conn)
    }

    /// Move a vetted connection into the leased set. Fails if the pool was
    /// closed or cleared since vetting.
    fn try_lease(&self, mut conn: Pooled<D::Conn>) -> Result<Pooled<D::Conn>, Pooled<D::Conn>> {
        let mut state = self.state.lock();
        if state.closed || conn.meta.generation != state.generation {
            return Err(conn);
        }
        conn.meta.mark_checkout();
        state.leased.insert(conn.meta.id, Instant::now());
        tracing::trace!(id = conn.meta.id, "checked out connection");
        Ok(conn)
    }

    /// Open a new physical connection against an already-reserved slot.
    async fn open_conn(self: &Arc<Self>) -> Result<Pooled<D::Conn>, PoolError> {
        let generation = self.state.lock().generation;
        match self.driver.open(&self.config).await {
            Ok(raw) => {
                let id = self.conn_ids.fetch_add(1, Ordering::Relaxed);
                self.metrics
                    .connections_created
                    .fetch_add(1, Ordering::Relaxed);
                tracing::trace!(id, generation, "opened physical connection");
                Ok(Pooled::new(id, generation, raw))
            }
            Err(err) => {
                // Surfaced untouched and never retried here; the reserved
                // slot goes back so capacity is not stranded.
                free_slot(&mut self.state.lock());
                Err(PoolError::Connect(err))
            }
        }
    }

    /// Close a connection and free its capacity slot.
    async fn discard(self: &Arc<Self>, conn: Pooled<D::Conn>, reason: &str) {
        tracing::debug!(id = conn.meta.id, reason, "discarding connection");
        free_slot(&mut self.state.lock());
        self.close_conn(conn).await;
    }

    async fn close_conn(&self, conn: Pooled<D::Conn>) {
        let id = conn.meta.id;
        self.metrics
            .connections_closed
            .fetch_add(1, Ordering::Relaxed);
        if let Err(err) = self.driver.close(conn.raw).await {
            tracing::warn!(id, error = %err, "failed to close connection");
        }
    }

    /// Return a leased connection, called from the handle's drop.
    fn release(inner: &Arc<Self>, mut conn: Pooled<D::Conn>, broken: bool) {
        conn.meta.mark_checkin();
        let discard = {
            let mut state = inner.state.lock();
            state.leased.remove(&conn.meta.id);
            let reason = if state.closed {
                Some("pool closed")
            } else if broken {
                Some("marked broken by caller")
            } else if conn.meta.generation != state.generation {
                Some("stale generation")
            } else if conn.meta.is_expired(inner.config.pool.max_lifetime) {
                Some("max lifetime exceeded")
            } else {
                None
            };
            match reason {
                None => {
                    keep_idle(&mut state, conn);
                    tracing::trace!("returned connection to pool");
                    None
                }
                Some(reason) => {
                    free_slot(&mut state);
                    Some((conn, reason))
                }
            }
        };
        if let Some((conn, reason)) = discard {
            tracing::debug!(id = conn.meta.id, reason, "discarding connection on release");
            inner
                .metrics
                .connections_closed
                .fetch_add(1, Ordering::Relaxed);
            spawn_close(Arc::clone(&inner.driver), conn);
        }
    }
}

/// Status information about a pool, snapshotted under its lock.
#[derive(Debug, Clone, Copy)]
pub struct PoolStatus {
    /// Idle connections ready for checkout.
    pub idle: u32,
    /// Connections currently leased out.
    pub in_use: u32,
    /// Idle + leased + connections currently being opened.
    pub total: u32,
    /// Maximum allowed connections.
    pub max: u32,
    /// Callers queued waiting for capacity.
    pub waiting: u32,
}

impl PoolStatus {
    /// Share of capacity currently leased, as a percentage.
    #[must_use]
    pub fn utilization(&self) -> f64 {
        if self.max == 0 {
            return 0.0;
        }
        f64::from(self.in_use) / f64::from(self.max) * 100.0
    }
}

/// Counters accumulated over a pool's lifetime.
#[derive(Debug, Clone, Copy)]
pub struct PoolMetrics {
    /// Physical connections opened.
    pub connections_created: u64,
    /// Physical connections closed.
    pub connections_closed: u64,
    /// Checkouts that handed out a connection.
    pub checkouts_successful: u64,
    /// Checkouts that failed: timeout, connect failure, or closed pool.
    pub checkouts_failed: u64,
    /// Idle connections reclaimed by the maintenance sweep.
    pub sweep_reaped: u64,
}

impl PoolMetrics {
    /// Share of checkouts that succeeded; 1.0 when none were attempted.
    #[must_use]
    pub fn checkout_success_rate(&self) -> f64 {
        let attempts = self.checkouts_successful + self.checkouts_failed;
        if attempts == 0 {
            return 1.0;
        }
        self.checkouts_successful as f64 / attempts as f64
    }
}

/// A connection checked out from a pool.
///
/// The connection returns to its pool when the handle is dropped, or is
/// closed immediately when pooling is disabled for its configuration.
/// Release happens exactly once by construction: [`release`](Self::release)
/// consumes the handle, so a second release does not compile.
pub struct PooledConnection<D: Driver> {
    conn: Option<Pooled<D::Conn>>,
    home: Home<D>,
    broken: bool,
}

enum Home<D: Driver> {
    Pooled(Arc<PoolInner<D>>),
    /// Pooling disabled: close on release instead of returning.
    Direct(Arc<D>),
}

impl<D: Driver> PooledConnection<D> {
    pub(crate) fn pooled(inner: Arc<PoolInner<D>>, conn: Pooled<D::Conn>) -> Self {
        Self {
            conn: Some(conn),
            home: Home::Pooled(inner),
            broken: false,
        }
    }

    pub(crate) fn direct(driver: Arc<D>, conn: Pooled<D::Conn>) -> Self {
        Self {
            conn: Some(conn),
            home: Home::Direct(driver),
            broken: false,
        }
    }

    /// Metadata for the underlying physical connection.
    #[must_use]
    pub fn metadata(&self) -> &ConnMeta {
        match &self.conn {
            Some(conn) => &conn.meta,
            // Vacated only by detach() and drop, both of which consume the handle.
            None => unreachable!(),
        }
    }

    /// Flag the connection as broken. A broken connection is closed on
    /// release instead of being returned to the pool.
    pub fn mark_broken(&mut self) {
        self.broken = true;
    }

    /// Return the connection to its pool.
    ///
    /// Dropping the handle does the same; this method exists to make the
    /// release point explicit.
    pub fn release(self) {
        drop(self);
    }

    /// Detach the connection from the pool.
    ///
    /// The caller takes ownership of the raw session and the pool's slot is
    /// freed immediately. The session is no longer closed or reclaimed by
    /// the pool.
    #[must_use]
    pub fn detach(mut self) -> D::Conn {
        let conn = match self.conn.take() {
            Some(conn) => conn,
            None => unreachable!(),
        };
        if let Home::Pooled(inner) = &self.home {
            let mut state = inner.state.lock();
            state.leased.remove(&conn.meta.id);
            free_slot(&mut state);
        }
        tracing::trace!(id = conn.meta.id, "detached connection from pool");
        conn.raw
    }
}

impl<D: Driver> std::ops::Deref for PooledConnection<D> {
    type Target = D::Conn;

    fn deref(&self) -> &Self::Target {
        match &self.conn {
            Some(conn) => &conn.raw,
            None => unreachable!(),
        }
    }
}

impl<D: Driver> std::ops::DerefMut for PooledConnection<D> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        match &mut self.conn {
            Some(conn) => &mut conn.raw,
            None => unreachable!(),
        }
    }
}

impl<D: Driver> Drop for PooledConnection<D> {
    fn drop(&mut self) {
        let Some(conn) = self.conn.take() else { return };
        match &self.home {
            Home::Pooled(inner) => PoolInner::release(inner, conn, self.broken),
            Home::Direct(driver) => {
                tracing::trace!(id = conn.meta.id, "closing unpooled connection");
                spawn_close(Arc::clone(driver), conn);
            }
        }
    }
}
