//! Driver capability trait.
//!
//! The pool does no network I/O of its own. Opening, closing, and probing
//! physical connections is delegated to a [`Driver`] implementation supplied
//! at registry construction. Drivers for real databases live in their own
//! crates; `sqlpool-testing` ships an in-memory mock for tests.

use thiserror::Error;

use crate::config::ConnectConfig;

/// Errors a driver can report while opening or closing a physical connection.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum DriverError {
    /// Network-level connection failure.
    #[error("connect failed: {0}")]
    Connect(String),

    /// The server rejected the supplied identity.
    #[error("authentication failed: {0}")]
    Auth(String),

    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Capability for managing physical database sessions.
///
/// `#[async_trait]` keeps the trait dyn-compatible; the pool itself uses it
/// generically, so the boxing cost is paid only at the three real-I/O points
/// (open, close, health probe), never on the checkout fast path.
#[async_trait::async_trait]
pub trait Driver: Send + Sync + 'static {
    /// The physical connection type this driver produces.
    type Conn: Send + 'static;

    /// Establish a new physical connection.
    ///
    /// This is the only point at which the pool performs real network I/O,
    /// and it is always called outside the pool lock.
    async fn open(&self, config: &ConnectConfig) -> Result<Self::Conn, DriverError>;

    /// Tear down a physical connection.
    ///
    /// Failures are logged and swallowed by the pool; they never stop a
    /// maintenance sweep or fail a release.
    async fn close(&self, conn: Self::Conn) -> Result<(), DriverError>;

    /// Probe whether a connection is still usable.
    ///
    /// Called on checkout when `test_on_checkout` is enabled. Should be
    /// lightweight (a `SELECT 1` ping or a socket liveness check).
    async fn is_healthy(&self, conn: &mut Self::Conn) -> bool;
}
