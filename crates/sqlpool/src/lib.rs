//! # sqlpool
//!
//! Keyed async connection pooling for SQL database drivers.
//!
//! A [`PoolRegistry`] maps connection configurations to bounded pools of
//! reusable physical connections, keyed by server, database, identity, and
//! pooling parameters. The pooling engine is driver-agnostic: all real I/O
//! is delegated to a [`Driver`] implementation.
//!
//! ## Features
//!
//! - Bounded pools with min/max population, idle timeout, and max lifetime
//! - LIFO reuse so the freshest connection is handed out first
//! - FIFO capacity waiting with per-call timeouts and safe cancellation
//! - `clear_pool` / `clear_all` generation fencing: idle connections close
//!   immediately, leased connections are discarded on release
//! - Shared background sweep for idle reaping and pre-warming
//! - Connection-string configuration (`Pooling`, `Min Pool Size`, ...)
//!
//! ## Example
//!
//! ```rust,ignore
//! use sqlpool::{ConnectConfig, PoolRegistry};
//!
//! let registry = PoolRegistry::new(driver);
//! let config = ConnectConfig::from_connection_string(
//!     "Server=db1;Database=orders;User Id=app;Password=secret;Max Pool Size=20",
//! )?;
//!
//! let conn = registry.get(&config).await?;
//! // Use the connection...
//! // Returned to the pool on drop.
//!
//! registry.clear_pool(&config).await; // force fresh connections
//! ```

#![warn(missing_docs)]
#![deny(unsafe_code)]

pub mod config;
pub mod connection;
pub mod driver;
pub mod error;
pub mod key;
mod maintenance;
pub mod pool;
pub mod registry;

pub use config::{ConnectConfig, PoolOptions};
pub use connection::ConnMeta;
pub use driver::{Driver, DriverError};
pub use error::PoolError;
pub use key::PoolKey;
pub use pool::{Pool, PoolMetrics, PoolStatus, PooledConnection};
pub use registry::{DEFAULT_SWEEP_INTERVAL, PoolRegistry};
