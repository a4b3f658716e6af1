//! EMS server library.
//!
//! This crate provides the channel registry, the command handlers and the TCP
//! transport of the EMS channel messaging server. Several independent servers
//! can run in one process; each owns its own registry.

pub mod config;
pub mod error;
pub mod handler;
pub mod handlers;
pub mod pubsub;
pub mod state;
pub mod transport;

pub use config::{Args, ServerConfig, DEFAULT_HOST, DEFAULT_PORT};
pub use error::Error;
pub use handler::{CommandContext, CommandHandler, CommandTable};
pub use pubsub::{ChannelRegistry, ClientDirectory, SharedChannelRegistry};
pub use state::{ServerState, SharedServerState};
pub use transport::{Server, ServerHandle, TransportMetrics};
