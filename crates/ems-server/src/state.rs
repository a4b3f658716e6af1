//! State shared by every connection of one server instance.

use std::sync::Arc;
use std::time::Instant;

use tokio_util::sync::CancellationToken;

use crate::pubsub::{ChannelRegistry, ClientDirectory, SharedChannelRegistry};

/// Server-wide state handed to command handlers.
#[derive(Debug)]
pub struct ServerState {
    /// Channel subscriptions.
    pub registry: SharedChannelRegistry,
    /// Connected clients.
    pub clients: ClientDirectory,
    /// When the server started.
    pub started_at: Instant,
    /// Cancelled to stop the server.
    pub shutdown: CancellationToken,
}

impl ServerState {
    /// Create state around an existing registry.
    pub fn new(registry: SharedChannelRegistry) -> Self {
        Self {
            registry,
            clients: ClientDirectory::new(),
            started_at: Instant::now(),
            shutdown: CancellationToken::new(),
        }
    }

    /// Check if a stop has been requested.
    pub fn is_stopping(&self) -> bool {
        self.shutdown.is_cancelled()
    }
}

impl Default for ServerState {
    fn default() -> Self {
        Self::new(Arc::new(ChannelRegistry::new()))
    }
}

/// Shared server state handle.
pub type SharedServerState = Arc<ServerState>;
