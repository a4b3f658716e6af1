//! Client error types.

use thiserror::Error;

/// Client errors.
#[derive(Debug, Error)]
pub enum Error {
    /// Connection failed.
    #[error("connection error: {0}")]
    Connection(String),

    /// Protocol error.
    #[error("protocol error: {0}")]
    Protocol(#[from] ems_proto::Error),

    /// Request timed out.
    #[error("request timed out")]
    Timeout,

    /// No connection is open.
    #[error("not connected")]
    NotConnected,

    /// A connection is already open.
    #[error("already connected")]
    AlreadyConnected,

    /// The server closed the connection.
    #[error("server disconnected")]
    ServerDisconnected,

    /// The server answered a command with an error.
    #[error("command failed: {0}")]
    Command(String),

    /// The server does not support a required command.
    #[error("server does not support {0}")]
    Unsupported(String),

    /// IO error.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}
