//! In-memory mock driver.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::{Duration, Instant};

use parking_lot::Mutex;

use sqlpool::{ConnectConfig, Driver, DriverError};

/// A fake physical connection produced by [`MockDriver`].
pub struct MockConn {
    id: u64,
    healthy: Arc<AtomicBool>,
    opened_at: Instant,
}

impl MockConn {
    /// Identifier of this physical session, unique per driver.
    #[must_use]
    pub fn id(&self) -> u64 {
        self.id
    }

    /// When the session was opened.
    #[must_use]
    pub fn opened_at(&self) -> Instant {
        self.opened_at
    }
}

#[derive(Default)]
struct MockState {
    /// Every `open()` call, including scripted failures.
    attempts: AtomicU64,
    /// Successful opens.
    opened: AtomicU64,
    closed: AtomicU64,
    /// Number of upcoming opens that fail.
    fail_opens: AtomicU64,
    open_delay: Mutex<Duration>,
    /// Health flags for live sessions, by id.
    health: Mutex<HashMap<u64, Arc<AtomicBool>>>,
}

/// Driver that fabricates sessions in memory.
///
/// Cloning is cheap; clones share counters, so a test can keep one clone
/// for assertions and hand the other to the registry.
#[derive(Clone, Default)]
pub struct MockDriver {
    state: Arc<MockState>,
}

impl MockDriver {
    /// Create a mock driver with no scripted behavior.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Total `open()` calls, including scripted failures.
    #[must_use]
    pub fn attempts(&self) -> u64 {
        self.state.attempts.load(Ordering::SeqCst)
    }

    /// Sessions opened successfully.
    #[must_use]
    pub fn opened(&self) -> u64 {
        self.state.opened.load(Ordering::SeqCst)
    }

    /// Sessions closed.
    #[must_use]
    pub fn closed(&self) -> u64 {
        self.state.closed.load(Ordering::SeqCst)
    }

    /// Sessions currently open.
    #[must_use]
    pub fn live(&self) -> u64 {
        self.opened() - self.closed()
    }

    /// Make the next `count` opens fail with a connect error.
    pub fn fail_next_opens(&self, count: u64) {
        self.state.fail_opens.store(count, Ordering::SeqCst);
    }

    /// Delay every open by `delay`, to widen race windows in tests.
    pub fn set_open_delay(&self, delay: Duration) {
        *self.state.open_delay.lock() = delay;
    }

    /// Make the session with `id` fail its next health probe.
    ///
    /// Returns `false` if the session is not live.
    pub fn poison(&self, id: u64) -> bool {
        match self.state.health.lock().get(&id) {
            Some(flag) => {
                flag.store(false, Ordering::SeqCst);
                true
            }
            None => false,
        }
    }
}

#[async_trait::async_trait]
impl Driver for MockDriver {
    type Conn = MockConn;

    async fn open(&self, _config: &ConnectConfig) -> Result<MockConn, DriverError> {
        self.state.attempts.fetch_add(1, Ordering::SeqCst);
        let scripted_failure = self
            .state
            .fail_opens
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if scripted_failure {
            return Err(DriverError::Connect("scripted connect failure".into()));
        }
        let delay = *self.state.open_delay.lock();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        let id = self.state.opened.fetch_add(1, Ordering::SeqCst) + 1;
        let healthy = Arc::new(AtomicBool::new(true));
        self.state.health.lock().insert(id, Arc::clone(&healthy));
        Ok(MockConn {
            id,
            healthy,
            opened_at: Instant::now(),
        })
    }

    async fn close(&self, conn: MockConn) -> Result<(), DriverError> {
        self.state.health.lock().remove(&conn.id);
        self.state.closed.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn is_healthy(&self, conn: &mut MockConn) -> bool {
        conn.healthy.load(Ordering::SeqCst)
    }
}
