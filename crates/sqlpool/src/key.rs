//! Pool keying.

use std::fmt;

use crate::config::ConnectConfig;

/// Opaque signature of the pooling-relevant parts of a [`ConnectConfig`].
///
/// Two configurations share a pool exactly when their keys compare equal:
/// same server, instance, database, identity, application name, and
/// population bounds. Connections are never shared across keys, so a changed
/// password or a different `max_size` lands in a different pool — the same
/// rule ADO.NET applies by keying pools on the connection string.
///
/// The password participates in equality and hashing but is never revealed
/// by `Debug` or `Display`.
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct PoolKey {
    host: String,
    port: u16,
    instance: Option<String>,
    database: Option<String>,
    username: String,
    password: String,
    integrated_security: bool,
    application_name: String,
    min_size: u32,
    max_size: u32,
}

impl PoolKey {
    /// Derive the key for a configuration.
    #[must_use]
    pub fn from_config(config: &ConnectConfig) -> Self {
        Self {
            // Hostnames are case-insensitive; normalize so "DB1" and "db1"
            // share a pool.
            host: config.host.to_lowercase(),
            port: config.port,
            instance: config.instance.clone(),
            database: config.database.clone(),
            username: config.username.clone(),
            password: config.password.clone(),
            integrated_security: config.integrated_security,
            application_name: config.application_name.clone(),
            min_size: config.pool.min_size,
            max_size: config.pool.max_size,
        }
    }

    fn identity(&self) -> &str {
        if self.integrated_security {
            "<integrated>"
        } else {
            &self.username
        }
    }
}

impl fmt::Display for PoolKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}:{}", self.identity(), self.host, self.port)?;
        if let Some(instance) = &self.instance {
            write!(f, "\\{instance}")?;
        }
        if let Some(database) = &self.database {
            write!(f, "/{database}")?;
        }
        Ok(())
    }
}

impl fmt::Debug for PoolKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PoolKey({self})")
    }
}
