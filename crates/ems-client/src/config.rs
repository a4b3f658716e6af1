//! Client configuration.

use std::time::Duration;

/// Default server host.
pub const DEFAULT_HOST: &str = "localhost";

/// Default server port.
pub const DEFAULT_PORT: u16 = 1975;

/// Default timeout for connecting and for each reply line.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

/// Client configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientConfig {
    /// Server host name or address.
    pub host: String,

    /// Server port.
    pub port: u16,

    /// Connect and command timeout.
    pub timeout: Duration,
}

impl ClientConfig {
    /// Create a configuration for the given server.
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
            timeout: DEFAULT_TIMEOUT,
        }
    }

    /// Create a configuration for connecting to localhost on the default port.
    pub fn localhost() -> Self {
        Self::new(DEFAULT_HOST, DEFAULT_PORT)
    }

    /// Set the timeout.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// The `host:port` string to connect to.
    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self::localhost()
    }
}
