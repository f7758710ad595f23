//! Pool behavior tests.
//!
//! These run against the in-memory mock driver from `sqlpool-testing`, so
//! no database server is required. Each test constructs its own registry
//! for isolation.

use std::sync::Arc;
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::time::{Duration, Instant};

use sqlpool::{ConnectConfig, Driver, PoolError, PoolOptions, PoolRegistry};
use sqlpool_testing::{MockDriver, test_config, test_config_for_host};
use tokio_test::assert_ok;

/// Registry with a sweep interval long enough that background maintenance
/// never interferes; tests that need a sweep force one with `Pool::sweep`.
fn quiet_registry(driver: &MockDriver) -> PoolRegistry<MockDriver> {
    PoolRegistry::with_sweep_interval(driver.clone(), Duration::from_secs(3600))
}

fn config_with(options: PoolOptions) -> ConnectConfig {
    test_config().pool(options)
}

// =============================================================================
// Basic Checkout and Reuse
// =============================================================================

#[tokio::test]
async fn test_checkout_returns_and_reuses_connection() {
    let driver = MockDriver::new();
    let registry = quiet_registry(&driver);
    let config = test_config();

    let conn = tokio_test::assert_ok!(registry.get(&config).await);
    let first_id = conn.metadata().id;
    drop(conn);

    // Ten more checkout/release cycles never open a second session.
    for _ in 0..10 {
        let conn = tokio_test::assert_ok!(registry.get(&config).await);
        assert_eq!(conn.metadata().id, first_id);
        drop(conn);
    }
    assert_eq!(driver.opened(), 1);

    let status = registry.pool(&config).status();
    assert_eq!(status.idle, 1);
    assert_eq!(status.in_use, 0);
    assert_eq!(status.total, 1);
}

#[tokio::test]
async fn test_lifo_reuse_prefers_freshest_connection() {
    let driver = MockDriver::new();
    let registry = quiet_registry(&driver);
    let config = test_config();

    let first = registry.get(&config).await.expect("first checkout");
    let second = registry.get(&config).await.expect("second checkout");
    let first_id = first.metadata().id;
    let second_id = second.metadata().id;
    assert_ne!(first_id, second_id);

    // Returned in order: first lands behind second at the front.
    drop(second);
    drop(first);

    let conn = registry.get(&config).await.expect("reuse checkout");
    assert_eq!(conn.metadata().id, first_id, "freshest return is reused first");
    assert_eq!(driver.opened(), 2, "reuse must not open a new session");
}

#[tokio::test]
async fn test_try_get_only_hands_out_idle_connections() {
    let driver = MockDriver::new();
    let registry = quiet_registry(&driver);
    let config = test_config();
    let pool = registry.pool(&config);

    // Empty pool: no idle connection and no new open.
    assert!(pool.try_get().expect("try_get").is_none());
    assert_eq!(driver.attempts(), 0);

    let conn = registry.get(&config).await.expect("checkout");
    drop(conn);

    let reused = pool.try_get().expect("try_get").expect("idle available");
    assert!(pool.try_get().expect("try_get").is_none(), "only lease is out");
    drop(reused);
}

#[tokio::test]
async fn test_metrics_track_checkouts_and_sessions() {
    let driver = MockDriver::new();
    let registry = quiet_registry(&driver);
    let config = test_config();

    for _ in 0..5 {
        let conn = registry.get(&config).await.expect("checkout");
        drop(conn);
    }

    let metrics = registry.pool(&config).metrics();
    assert_eq!(metrics.connections_created, 1);
    assert_eq!(metrics.checkouts_successful, 5);
    assert_eq!(metrics.checkouts_failed, 0);
    assert!((metrics.checkout_success_rate() - 1.0).abs() < f64::EPSILON);
}

// =============================================================================
// Capacity Bounds
// =============================================================================

#[tokio::test]
async fn test_population_never_exceeds_max_size() {
    let driver = MockDriver::new();
    let registry = quiet_registry(&driver);
    let config = config_with(
        PoolOptions::new()
            .min_size(0)
            .max_size(3)
            .acquire_timeout(Duration::from_secs(2)),
    );
    let pool = registry.pool(&config);

    let done = Arc::new(AtomicU32::new(0));
    let mut handles = Vec::new();
    for _ in 0..10 {
        let registry = registry.clone();
        let config = config.clone();
        let done = done.clone();
        handles.push(tokio::spawn(async move {
            let conn = registry.get(&config).await.expect("checkout under load");
            tokio::time::sleep(Duration::from_millis(5)).await;
            drop(conn);
            done.fetch_add(1, Ordering::Relaxed);
        }));
    }

    // Sample the invariant while the churn runs.
    for _ in 0..20 {
        tokio::time::sleep(Duration::from_millis(2)).await;
        let status = pool.status();
        assert!(
            status.idle + status.in_use <= 3,
            "idle + leased exceeded max_size: {status:?}"
        );
        assert!(status.total <= 3, "total exceeded max_size: {status:?}");
    }

    for handle in handles {
        handle.await.expect("task panicked");
    }
    assert_eq!(done.load(Ordering::Relaxed), 10);
    assert!(driver.live() <= 3, "driver sees more live sessions than max");
}

#[tokio::test]
async fn test_second_checkout_blocks_until_release() {
    let driver = MockDriver::new();
    let registry = quiet_registry(&driver);
    let config = config_with(
        PoolOptions::new()
            .min_size(0)
            .max_size(1)
            .acquire_timeout(Duration::from_secs(2)),
    );

    let holder = registry.get(&config).await.expect("first checkout");
    let held_id = holder.metadata().id;

    let acquired = Arc::new(AtomicBool::new(false));
    let waiter = {
        let registry = registry.clone();
        let config = config.clone();
        let acquired = acquired.clone();
        tokio::spawn(async move {
            let conn = registry.get(&config).await.expect("blocked checkout");
            acquired.store(true, Ordering::SeqCst);
            conn.metadata().id
        })
    };

    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(!acquired.load(Ordering::SeqCst), "second checkout must block");

    let released_at = Instant::now();
    drop(holder);
    let woken_id = waiter.await.expect("waiter panicked");

    assert!(acquired.load(Ordering::SeqCst));
    assert!(
        released_at.elapsed() < Duration::from_millis(200),
        "waiter should wake promptly after release"
    );
    assert_eq!(woken_id, held_id, "released connection is handed to the waiter");
    assert_eq!(driver.opened(), 1);
}

#[tokio::test]
async fn test_exhausted_timeout_leaks_no_slot() {
    let driver = MockDriver::new();
    let registry = quiet_registry(&driver);
    let config = config_with(PoolOptions::new().min_size(0).max_size(1));
    let pool = registry.pool(&config);

    let holder = registry.get(&config).await.expect("first checkout");

    let result = pool.get_timeout(Duration::from_millis(50)).await;
    assert!(
        matches!(result, Err(PoolError::Exhausted(_))),
        "should time out waiting for capacity"
    );

    // Pool state is unchanged: the held lease is the only population.
    let status = pool.status();
    assert_eq!(status.in_use, 1);
    assert_eq!(status.total, 1);
    assert_eq!(status.waiting, 0, "timed-out waiter must be dequeued");

    drop(holder);
    let conn = pool
        .get_timeout(Duration::from_millis(50))
        .await
        .expect("pool must stay usable after a timeout");
    drop(conn);
}

#[tokio::test]
async fn test_waiters_wake_in_fifo_order() {
    let driver = MockDriver::new();
    let registry = quiet_registry(&driver);
    let config = config_with(
        PoolOptions::new()
            .min_size(0)
            .max_size(1)
            .acquire_timeout(Duration::from_secs(5)),
    );

    let holder = registry.get(&config).await.expect("first checkout");

    let order = Arc::new(Mutex::new(Vec::new()));
    let mut handles = Vec::new();
    for i in 0..3 {
        let registry = registry.clone();
        let config = config.clone();
        let order = order.clone();
        handles.push(tokio::spawn(async move {
            let conn = registry.get(&config).await.expect("queued checkout");
            order.lock().expect("order lock").push(i);
            tokio::time::sleep(Duration::from_millis(10)).await;
            drop(conn);
        }));
        // Make the enqueue order deterministic.
        tokio::time::sleep(Duration::from_millis(30)).await;
    }

    drop(holder);
    for handle in handles {
        handle.await.expect("waiter panicked");
    }

    assert_eq!(*order.lock().expect("order lock"), vec![0, 1, 2]);
    assert_eq!(driver.opened(), 1, "one session served every waiter");
}

#[tokio::test]
async fn test_cancelled_waiter_leaks_nothing() {
    let driver = MockDriver::new();
    let registry = quiet_registry(&driver);
    let config = config_with(
        PoolOptions::new()
            .min_size(0)
            .max_size(1)
            .acquire_timeout(Duration::from_secs(5)),
    );

    let holder = registry.get(&config).await.expect("first checkout");

    // Cancel a queued checkout by dropping its future mid-wait.
    let cancelled =
        tokio::time::timeout(Duration::from_millis(30), registry.get(&config)).await;
    assert!(cancelled.is_err(), "checkout should still be pending");

    drop(holder);

    // The release must not be stranded on the dead waiter.
    let pool = registry.pool(&config);
    let conn = pool
        .get_timeout(Duration::from_millis(200))
        .await
        .expect("pool must survive waiter cancellation");
    drop(conn);
    assert_eq!(driver.opened(), 1);
}

// =============================================================================
// Pool Clearing
// =============================================================================

#[tokio::test]
async fn test_clear_pool_closes_idle_and_forces_fresh_sessions() {
    let driver = MockDriver::new();
    let registry = quiet_registry(&driver);
    let config = test_config();

    let conn = registry.get(&config).await.expect("checkout");
    let pre_clear_id = conn.metadata().id;
    drop(conn);

    registry.clear_pool(&config).await;
    assert_eq!(driver.closed(), 1, "idle connections close immediately");

    let conn = registry.get(&config).await.expect("post-clear checkout");
    assert_ne!(conn.metadata().id, pre_clear_id);
    assert_eq!(driver.opened(), 2, "post-clear checkout opens a new session");
}

#[tokio::test]
async fn test_clear_pool_discards_leased_connection_on_release() {
    let driver = MockDriver::new();
    let registry = quiet_registry(&driver);
    let config = test_config();

    let held = registry.get(&config).await.expect("checkout");
    let held_id = held.metadata().id;

    registry.clear_pool(&config).await;
    assert_eq!(driver.closed(), 0, "leased connections are left alone");

    // The stale lease dies on release instead of rejoining idle.
    drop(held);
    tokio::time::sleep(Duration::from_millis(20)).await;
    assert_eq!(driver.closed(), 1);

    let conn = registry.get(&config).await.expect("post-clear checkout");
    assert_ne!(conn.metadata().id, held_id);
    assert_eq!(registry.pool(&config).status().total, 1);
}

#[tokio::test]
async fn test_clear_all_fences_every_pool() {
    let driver = MockDriver::new();
    let registry = quiet_registry(&driver);
    let config_a = test_config_for_host("db-a.test.local");
    let config_b = test_config_for_host("db-b.test.local");

    for config in [&config_a, &config_b] {
        let conn = registry.get(config).await.expect("warm-up checkout");
        assert_eq!(conn.metadata().generation, 0);
        drop(conn);
    }
    assert_eq!(registry.pool_count(), 2);

    registry.clear_all().await;
    assert_eq!(driver.closed(), 2);

    for config in [&config_a, &config_b] {
        let conn = registry.get(config).await.expect("post-clear checkout");
        assert!(
            conn.metadata().generation > 0,
            "post-clear connections carry a newer generation"
        );
        drop(conn);
    }
    assert_eq!(registry.pool_count(), 2, "clearing keeps pools registered");
}

// =============================================================================
// Health and Connect Failures
// =============================================================================

#[tokio::test]
async fn test_unhealthy_idle_connection_is_replaced_on_checkout() {
    let driver = MockDriver::new();
    let registry = quiet_registry(&driver);
    let config = test_config();

    let conn = registry.get(&config).await.expect("checkout");
    let poisoned_id = conn.metadata().id;
    drop(conn);
    assert!(driver.poison(poisoned_id));

    let conn = registry.get(&config).await.expect("checkout after poison");
    assert_ne!(conn.metadata().id, poisoned_id);
    assert_eq!(driver.opened(), 2);

    tokio::time::sleep(Duration::from_millis(20)).await;
    assert_eq!(driver.closed(), 1, "the poisoned session was discarded");
}

#[tokio::test]
async fn test_broken_lease_is_closed_on_release() {
    let driver = MockDriver::new();
    let registry = quiet_registry(&driver);
    let config = test_config();

    let mut conn = registry.get(&config).await.expect("checkout");
    conn.mark_broken();
    drop(conn);

    tokio::time::sleep(Duration::from_millis(20)).await;
    assert_eq!(driver.closed(), 1);
    assert_eq!(registry.pool(&config).status().idle, 0);
}

#[tokio::test]
async fn test_connect_failure_surfaces_without_retry() {
    let driver = MockDriver::new();
    let registry = quiet_registry(&driver);
    let config = test_config();

    driver.fail_next_opens(1);
    let result = registry.get(&config).await;
    assert!(matches!(result, Err(PoolError::Connect(_))));
    assert_eq!(driver.attempts(), 1, "a failed open is never retried");

    // The failure leaves the pool usable.
    let status = registry.pool(&config).status();
    assert_eq!(status.total, 0, "failed open must not leak a slot");
    let conn = registry.get(&config).await.expect("recovery checkout");
    drop(conn);
}

// =============================================================================
// Maintenance Sweep
// =============================================================================

#[tokio::test]
async fn test_sweep_prewarms_to_min_size() {
    let driver = MockDriver::new();
    let registry = quiet_registry(&driver);
    let config = config_with(PoolOptions::new().min_size(2).max_size(4));
    let pool = registry.pool(&config);

    pool.sweep().await;
    let status = pool.status();
    assert_eq!(status.idle, 2);
    assert_eq!(driver.opened(), 2);

    // A second pass is a no-op once the minimum is satisfied.
    pool.sweep().await;
    assert_eq!(driver.opened(), 2);
}

#[tokio::test]
async fn test_sweep_reaps_expired_idle_but_respects_min_size() {
    let driver = MockDriver::new();
    let registry = quiet_registry(&driver);
    let config = config_with(
        PoolOptions::new()
            .min_size(2)
            .max_size(4)
            .idle_timeout(Duration::from_millis(40)),
    );
    let pool = registry.pool(&config);

    // Fill the pool to four idle connections; holding the leases while
    // acquiring forces the population to actually grow.
    let mut conns = Vec::new();
    for _ in 0..4 {
        conns.push(registry.get(&config).await.expect("fill checkout"));
    }
    drop(conns);
    assert_eq!(pool.status().idle, 4);

    // Let every idle connection expire, then sweep repeatedly: the
    // population never drops below min_size.
    tokio::time::sleep(Duration::from_millis(80)).await;
    pool.sweep().await;
    assert_eq!(pool.status().idle, 2, "sweep reaps down to min_size only");
    assert_eq!(driver.closed(), 2);

    tokio::time::sleep(Duration::from_millis(80)).await;
    pool.sweep().await;
    assert_eq!(pool.status().idle, 2, "floor holds under continuous idling");
    assert_eq!(pool.metrics().sweep_reaped, 2);
}

#[tokio::test]
async fn test_background_sweeper_runs_without_manual_passes() {
    let driver = MockDriver::new();
    let registry =
        PoolRegistry::with_sweep_interval(driver.clone(), Duration::from_millis(25));
    let config = config_with(PoolOptions::new().min_size(1).max_size(4));

    // Touch the pool so the sweeper knows about it.
    let _ = registry.pool(&config);
    tokio::time::sleep(Duration::from_millis(120)).await;

    assert!(
        driver.opened() >= 1,
        "background sweeper should have pre-warmed the pool"
    );
    assert_eq!(registry.pool(&config).status().idle, 1);
}

// =============================================================================
// Pooling Disabled
// =============================================================================

#[tokio::test]
async fn test_pooling_disabled_opens_and_closes_every_time() {
    let driver = MockDriver::new();
    let registry = quiet_registry(&driver);
    let config = config_with(PoolOptions::new().enabled(false).max_size(4));

    for _ in 0..3 {
        let conn = registry.get(&config).await.expect("unpooled checkout");
        drop(conn);
    }

    tokio::time::sleep(Duration::from_millis(20)).await;
    assert_eq!(driver.opened(), 3, "every checkout opens a fresh session");
    assert_eq!(driver.closed(), 3, "every release closes its session");
    assert_eq!(registry.pool_count(), 0, "no pool is created when disabled");
}

// =============================================================================
// Detach and Teardown
// =============================================================================

#[tokio::test]
async fn test_detach_removes_connection_from_accounting() {
    let driver = MockDriver::new();
    let registry = quiet_registry(&driver);
    let config = test_config();

    let conn = registry.get(&config).await.expect("checkout");
    let raw = conn.detach();

    let status = registry.pool(&config).status();
    assert_eq!(status.total, 0, "detached connection frees its slot");
    assert_eq!(driver.live(), 1, "the raw session stays open");

    // The pool opens a replacement for the next caller.
    let conn = registry.get(&config).await.expect("checkout after detach");
    assert_ne!(conn.metadata().id, raw.id());
    drop(conn);

    driver.close(raw).await.expect("manual close");
}

#[tokio::test]
async fn test_registry_close_refuses_further_checkouts() {
    let driver = MockDriver::new();
    let registry = quiet_registry(&driver);
    let config = test_config();

    let conn = registry.get(&config).await.expect("checkout");
    drop(conn);

    registry.close().await;
    assert!(registry.is_closed());
    assert_eq!(driver.closed(), 1, "idle connections close on teardown");

    let result = registry.get(&config).await;
    assert!(matches!(result, Err(PoolError::Closed)));

    // Closing twice is a no-op.
    registry.close().await;
}

#[tokio::test]
async fn test_lease_outliving_registry_close_is_discarded() {
    let driver = MockDriver::new();
    let registry = quiet_registry(&driver);
    let config = test_config();

    let held = registry.get(&config).await.expect("checkout");
    registry.close().await;
    assert_eq!(driver.closed(), 0, "in-flight lease is not interrupted");

    drop(held);
    tokio::time::sleep(Duration::from_millis(20)).await;
    assert_eq!(driver.closed(), 1, "the lease is closed once released");
}
