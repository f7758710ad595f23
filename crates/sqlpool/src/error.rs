//! Pool error types.

use std::time::Duration;

use thiserror::Error;

use crate::driver::DriverError;

/// Errors that can occur during pool operations.
///
/// A failed checkout never poisons the pool: every variant leaves the pool
/// usable for subsequent calls.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum PoolError {
    /// Physical connection establishment failed.
    ///
    /// Surfaced to the caller exactly as the driver reported it; the pool
    /// never retries a failed open on its own.
    #[error("failed to open connection: {0}")]
    Connect(#[from] DriverError),

    /// No connection became available within the acquisition timeout.
    #[error("connection pool exhausted after waiting {0:?}")]
    Exhausted(Duration),

    /// The pool or registry has been closed.
    #[error("pool is closed")]
    Closed,

    /// Pool or connection configuration error.
    #[error("pool configuration error: {0}")]
    Configuration(String),
}
