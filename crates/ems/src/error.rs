//! Orchestrator error types.

use thiserror::Error;

/// Errors reported by the [`ConnectionManager`](crate::ConnectionManager).
#[derive(Debug, Error)]
pub enum Error {
    /// Subscriber client error.
    #[error(transparent)]
    Client(#[from] ems_client::Error),

    /// Local server error.
    #[error(transparent)]
    Server(#[from] ems_server::Error),

    /// No session is open.
    #[error("not connected")]
    NotConnected,

    /// The server answered a query with an error.
    #[error("query {verb} failed: {message}")]
    Query {
        /// The command that failed.
        verb: String,
        /// The server's error text.
        message: String,
    },
}
