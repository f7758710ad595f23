//! Test fixture helpers.

use std::time::Duration;

use sqlpool::{ConnectConfig, PoolOptions};

/// A configuration suitable for fast pool tests: small population, short
/// acquisition timeout, no pre-warming.
#[must_use]
pub fn test_config() -> ConnectConfig {
    test_config_for_host("sql.test.local")
}

/// Like [`test_config`] but against a specific host, for tests that need
/// several distinct pool keys.
#[must_use]
pub fn test_config_for_host(host: &str) -> ConnectConfig {
    ConnectConfig::new()
        .host(host)
        .database("pooltest")
        .username("sa")
        .password("Passw0rd!")
        .pool(
            PoolOptions::new()
                .min_size(0)
                .max_size(4)
                .acquire_timeout(Duration::from_millis(500))
                .idle_timeout(Duration::from_secs(60))
                .max_lifetime(Duration::from_secs(3600)),
        )
}
