//! # sqlpool-testing
//!
//! Test infrastructure for pool development.
//!
//! Provides an in-memory [`MockDriver`] so pool behavior can be exercised
//! without a database server: physical opens and closes are counted,
//! connect failures can be scripted, individual connections can be poisoned
//! to fail their next health probe, and opens can be slowed down to widen
//! race windows.
//!
//! ## Example
//!
//! ```rust,ignore
//! use sqlpool::PoolRegistry;
//! use sqlpool_testing::{MockDriver, test_config};
//!
//! #[tokio::test]
//! async fn reuses_connections() {
//!     let driver = MockDriver::new();
//!     let registry = PoolRegistry::new(driver.clone());
//!     let config = test_config();
//!
//!     for _ in 0..10 {
//!         let conn = registry.get(&config).await.unwrap();
//!         drop(conn);
//!     }
//!     assert_eq!(driver.opened(), 1);
//! }
//! ```

#![warn(missing_docs)]
#![deny(unsafe_code)]

mod fixtures;
mod mock;

pub use fixtures::{test_config, test_config_for_host};
pub use mock::{MockConn, MockDriver};
