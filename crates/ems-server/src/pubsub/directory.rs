//! Connected-client tracking and addressing.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::RwLock;
use tokio::sync::mpsc;

/// Handle to push lines to a connected client.
#[derive(Debug, Clone)]
pub struct ClientHandle {
    /// Server-assigned client identifier.
    pub client_id: String,
    /// Remote address of the client.
    pub addr: SocketAddr,
    tx: mpsc::UnboundedSender<String>,
}

/// Directory of connected clients keyed by client id.
#[derive(Debug)]
pub struct ClientDirectory {
    clients: RwLock<HashMap<String, ClientHandle>>,
    next_client_id: AtomicU64,
}

impl ClientDirectory {
    /// Create an empty directory.
    pub fn new() -> Self {
        Self {
            clients: RwLock::new(HashMap::new()),
            next_client_id: AtomicU64::new(1),
        }
    }

    /// Register a newly connected client.
    ///
    /// Returns the assigned client id and the receiving end of its outbound
    /// queue. Ids are never reused within one directory.
    pub fn register(&self, addr: SocketAddr) -> (String, mpsc::UnboundedReceiver<String>) {
        let client_id = format!(
            "client-{}",
            self.next_client_id.fetch_add(1, Ordering::SeqCst)
        );
        let (tx, rx) = mpsc::unbounded_channel();

        let handle = ClientHandle {
            client_id: client_id.clone(),
            addr,
            tx,
        };
        self.clients.write().insert(client_id.clone(), handle);

        (client_id, rx)
    }

    /// Remove a client. Returns its handle if it was registered.
    pub fn remove(&self, client_id: &str) -> Option<ClientHandle> {
        self.clients.write().remove(client_id)
    }

    /// Queue a line for delivery to a client.
    ///
    /// Returns `false` if the client is unknown or its connection is gone.
    pub fn send_to_client(&self, client_id: &str, line: impl Into<String>) -> bool {
        let clients = self.clients.read();
        match clients.get(client_id) {
            Some(handle) => handle.tx.send(line.into()).is_ok(),
            None => false,
        }
    }

    /// Get a client's handle.
    pub fn get(&self, client_id: &str) -> Option<ClientHandle> {
        self.clients.read().get(client_id).cloned()
    }

    /// Number of connected clients.
    pub fn len(&self) -> usize {
        self.clients.read().len()
    }

    /// Check if no clients are connected.
    pub fn is_empty(&self) -> bool {
        self.clients.read().is_empty()
    }
}

impl Default for ClientDirectory {
    fn default() -> Self {
        Self::new()
    }
}
