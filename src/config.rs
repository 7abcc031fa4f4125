use std::env;
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use clap::ValueEnum;

use crate::error::{ClickhouseError, Result};

pub const DEFAULT_HOST: &str = "localhost";
pub const DEFAULT_PORT: u16 = 8123;
pub const DEFAULT_DATABASE: &str = "default";
pub const DEFAULT_POOL_SIZE: usize = 1024;
pub const DEFAULT_KEEP_ALIVE: Duration = Duration::from_secs(600);

/// URL scheme used to reach the server.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, ValueEnum)]
pub enum Protocol {
    /// Plain HTTP (port 8123 by default)
    #[default]
    Http,
    /// HTTP over TLS (usually port 8443)
    Https,
}

impl Protocol {
    #[must_use]
    pub fn scheme(self) -> &'static str {
        match self {
            Protocol::Http => "http",
            Protocol::Https => "https",
        }
    }
}

impl fmt::Display for Protocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.scheme())
    }
}

impl FromStr for Protocol {
    type Err = ClickhouseError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "http" => Ok(Protocol::Http),
            "https" => Ok(Protocol::Https),
            other => Err(ClickhouseError::ConfigError(format!(
                "unsupported protocol `{other}` (expected http or https)"
            ))),
        }
    }
}

/// Options handed to the transport when the connection is opened.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PoolOptions {
    /// Session pool capacity and transport connection limit. `None` disables
    /// session pooling.
    pub connections: Option<usize>,
    pub keep_alive: Duration,
    /// Maximum wait for response headers. `None` waits forever.
    pub header_timeout: Option<Duration>,
    /// Maximum wait between body chunks. `None` waits forever.
    pub body_timeout: Option<Duration>,
}

impl Default for PoolOptions {
    fn default() -> Self {
        Self {
            connections: Some(DEFAULT_POOL_SIZE),
            keep_alive: DEFAULT_KEEP_ALIVE,
            header_timeout: None,
            body_timeout: None,
        }
    }
}

/// Connection settings for a client. Immutable once built.
#[derive(Clone, PartialEq, Eq)]
pub struct ClientConfig {
    pub protocol: Protocol,
    pub host: String,
    pub port: u16,
    pub database: String,
    pub user: String,
    pub password: String,
    pub pool_size: Option<usize>,
    pub keep_alive: Duration,
    pub header_timeout: Option<Duration>,
    pub body_timeout: Option<Duration>,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            protocol: Protocol::Http,
            host: DEFAULT_HOST.to_string(),
            port: DEFAULT_PORT,
            database: DEFAULT_DATABASE.to_string(),
            user: String::new(),
            password: String::new(),
            pool_size: Some(DEFAULT_POOL_SIZE),
            keep_alive: DEFAULT_KEEP_ALIVE,
            header_timeout: None,
            body_timeout: None,
        }
    }
}

// Password stays out of logs.
impl fmt::Debug for ClientConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClientConfig")
            .field("protocol", &self.protocol)
            .field("host", &self.host)
            .field("port", &self.port)
            .field("database", &self.database)
            .field("user", &self.user)
            .field(
                "password",
                &if self.password.is_empty() { "" } else { "<redacted>" },
            )
            .field("pool_size", &self.pool_size)
            .field("keep_alive", &self.keep_alive)
            .field("header_timeout", &self.header_timeout)
            .field("body_timeout", &self.body_timeout)
            .finish()
    }
}

impl ClientConfig {
    #[must_use]
    pub fn new(host: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            ..Self::default()
        }
    }

    #[must_use]
    pub fn builder() -> ClientConfigBuilder {
        ClientConfigBuilder::new()
    }

    /// Read settings from `CLICKHOUSE_*` environment variables, keeping
    /// defaults for anything unset.
    ///
    /// # Errors
    /// Returns `ClickhouseError::ConfigError` when a variable is set to an
    /// unparsable value.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    pub(crate) fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let mut cfg = Self::default();
        if let Some(host) = lookup("CLICKHOUSE_HOST") {
            cfg.host = host;
        }
        if let Some(port) = lookup("CLICKHOUSE_PORT") {
            cfg.port = port.trim().parse().map_err(|e| {
                ClickhouseError::ConfigError(format!("CLICKHOUSE_PORT `{port}`: {e}"))
            })?;
        }
        if let Some(protocol) = lookup("CLICKHOUSE_PROTOCOL") {
            cfg.protocol = protocol.parse()?;
        }
        if let Some(database) = lookup("CLICKHOUSE_DATABASE") {
            cfg.database = database;
        }
        if let Some(user) = lookup("CLICKHOUSE_USER") {
            cfg.user = user;
        }
        if let Some(password) = lookup("CLICKHOUSE_PASSWORD") {
            cfg.password = password;
        }
        if let Some(size) = lookup("CLICKHOUSE_POOL_SIZE") {
            cfg.pool_size = parse_pool_size(&size)?;
        }
        Ok(cfg)
    }

    /// Base URL of the server, e.g. `http://localhost:8123`.
    #[must_use]
    pub fn url(&self) -> String {
        format!("{}://{}:{}", self.protocol, self.host, self.port)
    }

    #[must_use]
    pub fn pool_options(&self) -> PoolOptions {
        PoolOptions {
            connections: self.pool_size,
            keep_alive: self.keep_alive,
            header_timeout: self.header_timeout,
            body_timeout: self.body_timeout,
        }
    }

    /// Check invariants that cannot be expressed in the types.
    ///
    /// # Errors
    /// Returns `ClickhouseError::ConfigError` for an empty host or a zero pool size.
    pub fn validate(&self) -> Result<()> {
        if self.host.trim().is_empty() {
            return Err(ClickhouseError::ConfigError("host is required".to_string()));
        }
        if self.pool_size == Some(0) {
            return Err(ClickhouseError::ConfigError(
                "pool size must be at least 1 (use None to disable session pooling)".to_string(),
            ));
        }
        Ok(())
    }
}

fn parse_pool_size(raw: &str) -> Result<Option<usize>> {
    let raw = raw.trim();
    if raw == "0" || raw.eq_ignore_ascii_case("none") {
        return Ok(None);
    }
    raw.parse::<usize>()
        .map(Some)
        .map_err(|e| ClickhouseError::ConfigError(format!("CLICKHOUSE_POOL_SIZE `{raw}`: {e}")))
}

/// Fluent builder for `ClientConfig`.
#[derive(Debug, Clone)]
pub struct ClientConfigBuilder {
    cfg: ClientConfig,
}

impl Default for ClientConfigBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl ClientConfigBuilder {
    #[must_use]
    pub fn new() -> Self {
        Self {
            cfg: ClientConfig::default(),
        }
    }

    #[must_use]
    pub fn protocol(mut self, protocol: Protocol) -> Self {
        self.cfg.protocol = protocol;
        self
    }

    #[must_use]
    pub fn host(mut self, host: impl Into<String>) -> Self {
        self.cfg.host = host.into();
        self
    }

    #[must_use]
    pub fn port(mut self, port: u16) -> Self {
        self.cfg.port = port;
        self
    }

    #[must_use]
    pub fn database(mut self, database: impl Into<String>) -> Self {
        self.cfg.database = database.into();
        self
    }

    #[must_use]
    pub fn user(mut self, user: impl Into<String>) -> Self {
        self.cfg.user = user.into();
        self
    }

    #[must_use]
    pub fn password(mut self, password: impl Into<String>) -> Self {
        self.cfg.password = password.into();
        self
    }

    /// `None` disables session pooling (every request gets a fresh id).
    #[must_use]
    pub fn pool_size(mut self, pool_size: Option<usize>) -> Self {
        self.cfg.pool_size = pool_size;
        self
    }

    #[must_use]
    pub fn keep_alive(mut self, keep_alive: Duration) -> Self {
        self.cfg.keep_alive = keep_alive;
        self
    }

    #[must_use]
    pub fn header_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.cfg.header_timeout = timeout;
        self
    }

    #[must_use]
    pub fn body_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.cfg.body_timeout = timeout;
        self
    }

    #[must_use]
    pub fn finish(self) -> ClientConfig {
        self.cfg
    }

    /// Validate and return the config.
    ///
    /// # Errors
    /// Returns `ClickhouseError::ConfigError` if validation fails.
    pub fn build(self) -> Result<ClientConfig> {
        self.cfg.validate()?;
        Ok(self.cfg)
    }
}
