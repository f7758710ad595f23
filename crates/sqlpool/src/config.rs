//! Connection and pool configuration.

use std::time::Duration;

use crate::error::PoolError;

/// Pooling behavior for one configuration key.
///
/// This struct is marked `#[non_exhaustive]` to allow adding new fields
/// in future minor versions without breaking changes. Use the builder
/// pattern methods or [`Default::default()`] to construct instances.
#[derive(Debug, Clone)]
#[non_exhaustive]
pub struct PoolOptions {
    /// Whether pooling is enabled. When disabled, every checkout opens a
    /// fresh physical connection and every release closes it immediately.
    pub enabled: bool,

    /// Minimum number of connections the maintenance sweep keeps alive.
    pub min_size: u32,

    /// Maximum number of connections allowed, idle and leased combined.
    pub max_size: u32,

    /// Time to wait for a connection before giving up with
    /// [`PoolError::Exhausted`].
    pub acquire_timeout: Duration,

    /// Time a connection may sit unused before the sweep reclaims it.
    pub idle_timeout: Duration,

    /// Maximum total age of a connection regardless of use.
    /// `Duration::MAX` disables the limit.
    pub max_lifetime: Duration,

    /// Whether to probe connection health on checkout.
    pub test_on_checkout: bool,
}

impl Default for PoolOptions {
    fn default() -> Self {
        Self {
            enabled: true,
            min_size: 1,
            max_size: 10,
            acquire_timeout: Duration::from_secs(30),
            idle_timeout: Duration::from_secs(600),
            max_lifetime: Duration::from_secs(1800),
            test_on_checkout: true,
        }
    }
}

impl PoolOptions {
    /// Create pool options with default values.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Enable or disable pooling.
    #[must_use]
    pub fn enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }

    /// Set the minimum number of connections.
    #[must_use]
    pub fn min_size(mut self, count: u32) -> Self {
        self.min_size = count;
        self
    }

    /// Set the maximum number of connections.
    #[must_use]
    pub fn max_size(mut self, count: u32) -> Self {
        self.max_size = count;
        self
    }

    /// Set the connection acquisition timeout.
    #[must_use]
    pub fn acquire_timeout(mut self, timeout: Duration) -> Self {
        self.acquire_timeout = timeout;
        self
    }

    /// Set the idle connection timeout.
    #[must_use]
    pub fn idle_timeout(mut self, timeout: Duration) -> Self {
        self.idle_timeout = timeout;
        self
    }

    /// Set the maximum connection lifetime.
    #[must_use]
    pub fn max_lifetime(mut self, lifetime: Duration) -> Self {
        self.max_lifetime = lifetime;
        self
    }

    /// Enable or disable health probing on checkout.
    #[must_use]
    pub fn test_on_checkout(mut self, enabled: bool) -> Self {
        self.test_on_checkout = enabled;
        self
    }

    /// Validate the options.
    pub fn validate(&self) -> Result<(), PoolError> {
        if self.max_size == 0 {
            return Err(PoolError::Configuration(
                "max_size must be greater than 0".into(),
            ));
        }
        if self.min_size > self.max_size {
            return Err(PoolError::Configuration(
                "min_size cannot be greater than max_size".into(),
            ));
        }
        Ok(())
    }
}

/// Configuration for connections to one server/database/identity.
///
/// Carries the connection identity (everything that makes two connections
/// interchangeable) plus the [`PoolOptions`] governing the pool for that
/// identity. Use the builder pattern methods, [`Default::default()`], or
/// [`ConnectConfig::from_connection_string()`] to construct instances.
#[derive(Clone)]
#[non_exhaustive]
pub struct ConnectConfig {
    /// Server hostname or IP address.
    pub host: String,

    /// Server port (default: 1433).
    pub port: u16,

    /// Instance name (for named instances).
    pub instance: Option<String>,

    /// Database name.
    pub database: Option<String>,

    /// Login username. Ignored when `integrated_security` is set.
    pub username: String,

    /// Login password. Never logged and never shown by `Debug`.
    pub password: String,

    /// Use the ambient OS identity instead of username/password.
    pub integrated_security: bool,

    /// Application name (shown in server management tools).
    pub application_name: String,

    /// Pooling behavior for this configuration.
    pub pool: PoolOptions,
}

impl Default for ConnectConfig {
    fn default() -> Self {
        Self {
            host: "localhost".to_string(),
            port: 1433,
            instance: None,
            database: None,
            username: String::new(),
            password: String::new(),
            integrated_security: false,
            application_name: "sqlpool".to_string(),
            pool: PoolOptions::default(),
        }
    }
}

impl std::fmt::Debug for ConnectConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectConfig")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("instance", &self.instance)
            .field("database", &self.database)
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .field("integrated_security", &self.integrated_security)
            .field("application_name", &self.application_name)
            .field("pool", &self.pool)
            .finish()
    }
}

impl ConnectConfig {
    /// Create a new configuration with default values.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse a connection string into configuration.
    ///
    /// Supports ADO.NET-style connection strings:
    /// ```text
    /// Server=localhost;Database=mydb;User Id=sa;Password=secret;Max Pool Size=20;
    /// ```
    pub fn from_connection_string(conn_str: &str) -> Result<Self, PoolError> {
        let mut config = Self::default();

        for part in conn_str.split(';') {
            let part = part.trim();
            if part.is_empty() {
                continue;
            }

            let (key, value) = part
                .split_once('=')
                .ok_or_else(|| PoolError::Configuration(format!("invalid key-value: {part}")))?;

            let key = key.trim().to_lowercase();
            let value = value.trim();

            match key.as_str() {
                "server" | "data source" | "host" => {
                    // Handle host,port or host\instance format
                    if let Some((host, port)) = value.split_once(',') {
                        config.host = host.to_string();
                        config.port = port.parse().map_err(|_| {
                            PoolError::Configuration(format!("invalid port: {port}"))
                        })?;
                    } else if let Some((host, instance)) = value.split_once('\\') {
                        config.host = host.to_string();
                        config.instance = Some(instance.to_string());
                    } else {
                        config.host = value.to_string();
                    }
                }
                "port" => {
                    config.port = value
                        .parse()
                        .map_err(|_| PoolError::Configuration(format!("invalid port: {value}")))?;
                }
                "database" | "initial catalog" => {
                    config.database = Some(value.to_string());
                }
                "user id" | "uid" | "user" => {
                    config.username = value.to_string();
                }
                "password" | "pwd" => {
                    config.password = value.to_string();
                }
                "integrated security" | "trusted_connection" => {
                    config.integrated_security =
                        parse_bool(value) || value.eq_ignore_ascii_case("sspi");
                }
                "application name" | "app" => {
                    config.application_name = value.to_string();
                }
                "pooling" => {
                    config.pool.enabled = parse_bool(value);
                }
                "min pool size" => {
                    config.pool.min_size = value.parse().map_err(|_| {
                        PoolError::Configuration(format!("invalid min pool size: {value}"))
                    })?;
                }
                "max pool size" => {
                    config.pool.max_size = value.parse().map_err(|_| {
                        PoolError::Configuration(format!("invalid max pool size: {value}"))
                    })?;
                }
                "connect timeout" | "connection timeout" => {
                    let secs: u64 = value.parse().map_err(|_| {
                        PoolError::Configuration(format!("invalid timeout: {value}"))
                    })?;
                    config.pool.acquire_timeout = Duration::from_secs(secs);
                }
                "connection lifetime" | "load balance timeout" => {
                    let secs: u64 = value.parse().map_err(|_| {
                        PoolError::Configuration(format!("invalid lifetime: {value}"))
                    })?;
                    // 0 means no lifetime limit, matching ADO.NET semantics.
                    config.pool.max_lifetime = if secs == 0 {
                        Duration::MAX
                    } else {
                        Duration::from_secs(secs)
                    };
                }
                _ => {
                    // Ignore unknown options for forward compatibility
                    tracing::debug!(
                        key = key,
                        value = value,
                        "ignoring unknown connection string option"
                    );
                }
            }
        }

        config.validate()?;
        Ok(config)
    }

    /// Set the server host.
    #[must_use]
    pub fn host(mut self, host: impl Into<String>) -> Self {
        self.host = host.into();
        self
    }

    /// Set the server port.
    #[must_use]
    pub fn port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    /// Set the instance name.
    #[must_use]
    pub fn instance(mut self, instance: impl Into<String>) -> Self {
        self.instance = Some(instance.into());
        self
    }

    /// Set the database name.
    #[must_use]
    pub fn database(mut self, database: impl Into<String>) -> Self {
        self.database = Some(database.into());
        self
    }

    /// Set the login username.
    #[must_use]
    pub fn username(mut self, username: impl Into<String>) -> Self {
        self.username = username.into();
        self
    }

    /// Set the login password.
    #[must_use]
    pub fn password(mut self, password: impl Into<String>) -> Self {
        self.password = password.into();
        self
    }

    /// Use the ambient OS identity instead of username/password.
    #[must_use]
    pub fn integrated_security(mut self, enabled: bool) -> Self {
        self.integrated_security = enabled;
        self
    }

    /// Set the application name.
    #[must_use]
    pub fn application_name(mut self, name: impl Into<String>) -> Self {
        self.application_name = name.into();
        self
    }

    /// Set the pooling options.
    #[must_use]
    pub fn pool(mut self, options: PoolOptions) -> Self {
        self.pool = options;
        self
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<(), PoolError> {
        if self.host.is_empty() {
            return Err(PoolError::Configuration("host must not be empty".into()));
        }
        self.pool.validate()
    }
}

fn parse_bool(value: &str) -> bool {
    value.eq_ignore_ascii_case("true") || value.eq_ignore_ascii_case("yes") || value == "1"
}
