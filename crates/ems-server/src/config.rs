//! Server configuration.

use clap::Parser;

use crate::error::Error;

/// Default host the server binds to.
pub const DEFAULT_HOST: &str = "localhost";

/// Default TCP port.
pub const DEFAULT_PORT: u16 = 1975;

/// EMS server configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerConfig {
    /// Host name or address to bind to.
    pub host: String,

    /// TCP port to bind to. Port 0 picks an ephemeral port.
    pub port: u16,

    /// Log every line received and sent.
    pub spy: bool,

    /// Register the `HALT` command, letting clients stop the server.
    pub allow_halt: bool,
}

impl ServerConfig {
    /// Create a configuration for the given host and port.
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
            spy: false,
            allow_halt: false,
        }
    }

    /// Set the host.
    pub fn with_host(mut self, host: impl Into<String>) -> Self {
        self.host = host.into();
        self
    }

    /// Set the port.
    pub fn with_port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    /// Enable or disable traffic logging.
    pub fn with_spy(mut self, spy: bool) -> Self {
        self.spy = spy;
        self
    }

    /// Enable or disable the `HALT` command.
    pub fn with_allow_halt(mut self, allow_halt: bool) -> Self {
        self.allow_halt = allow_halt;
        self
    }

    /// The `host:port` string to bind to.
    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<(), Error> {
        if self.host.trim().is_empty() {
            return Err(Error::Config("host must not be empty".to_string()));
        }
        Ok(())
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self::new(DEFAULT_HOST, DEFAULT_PORT)
    }
}

/// Command-line arguments for the server.
#[derive(Parser, Debug)]
#[command(name = "ems-server")]
#[command(version, about = "EMS channel messaging server", long_about = None)]
pub struct Args {
    /// Host name or address to bind to.
    #[arg(short = 'H', long, default_value = DEFAULT_HOST)]
    pub host: String,

    /// TCP port to listen on.
    #[arg(short = 'P', long, default_value_t = DEFAULT_PORT)]
    pub port: u16,

    /// Log all client traffic.
    #[arg(short = 'y', long)]
    pub spy: bool,

    /// Allow clients to stop the server with HALT.
    #[arg(long)]
    pub allow_halt: bool,
}

impl Args {
    /// Convert command-line arguments to server configuration.
    pub fn into_config(self) -> ServerConfig {
        ServerConfig::new(self.host, self.port)
            .with_spy(self.spy)
            .with_allow_halt(self.allow_halt)
    }
}
