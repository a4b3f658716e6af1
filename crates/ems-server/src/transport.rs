//! TCP transport for the EMS server.
//!
//! One task accepts connections; every connection gets its own task that owns
//! the framed socket and selects between incoming command lines, queued push
//! frames and server shutdown.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use futures::{SinkExt, StreamExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{broadcast, mpsc};
use tokio::task::{JoinHandle, JoinSet};
use tokio_util::codec::Framed;

use ems_proto::{LineCodec, Reply, DISCONNECTED};

use crate::config::ServerConfig;
use crate::error::Error;
use crate::handler::CommandTable;
use crate::pubsub::{ChannelRegistry, SharedChannelRegistry};
use crate::state::{ServerState, SharedServerState};

/// Transport metrics for monitoring.
#[derive(Debug)]
pub struct TransportMetrics {
    /// Total number of accepted connections.
    pub connections_total: AtomicU64,
    /// Total number of commands dispatched.
    pub commands_total: AtomicU64,
    /// Number of commands answered with an error.
    pub commands_failed: AtomicU64,
    /// Number of push frames written to clients.
    pub pushes_sent: AtomicU64,
}

impl TransportMetrics {
    fn new() -> Self {
        Self {
            connections_total: AtomicU64::new(0),
            commands_total: AtomicU64::new(0),
            commands_failed: AtomicU64::new(0),
            pushes_sent: AtomicU64::new(0),
        }
    }

    fn record_connection(&self) {
        self.connections_total.fetch_add(1, Ordering::Relaxed);
    }

    fn record_command(&self, success: bool) {
        self.commands_total.fetch_add(1, Ordering::Relaxed);
        if !success {
            self.commands_failed.fetch_add(1, Ordering::Relaxed);
        }
    }

    fn record_push(&self) {
        self.pushes_sent.fetch_add(1, Ordering::Relaxed);
    }

    /// Get total connections count.
    pub fn total_connections(&self) -> u64 {
        self.connections_total.load(Ordering::Relaxed)
    }

    /// Get total commands count.
    pub fn total_commands(&self) -> u64 {
        self.commands_total.load(Ordering::Relaxed)
    }

    /// Get failed commands count.
    pub fn failed_commands(&self) -> u64 {
        self.commands_failed.load(Ordering::Relaxed)
    }

    /// Get total push frames sent.
    pub fn total_pushes(&self) -> u64 {
        self.pushes_sent.load(Ordering::Relaxed)
    }
}

impl Default for TransportMetrics {
    fn default() -> Self {
        Self::new()
    }
}

/// A bound EMS server.
pub struct Server {
    listener: TcpListener,
    local_addr: SocketAddr,
    state: SharedServerState,
    commands: Arc<CommandTable>,
    metrics: Arc<TransportMetrics>,
    spy: bool,
}

impl Server {
    /// Bind a server with the default command set.
    pub async fn bind(config: ServerConfig, registry: SharedChannelRegistry) -> Result<Self, Error> {
        let commands = CommandTable::with_defaults(config.allow_halt);
        Self::bind_with_commands(config, registry, commands).await
    }

    /// Bind a server that dispatches through the given command table.
    pub async fn bind_with_commands(
        config: ServerConfig,
        registry: SharedChannelRegistry,
        commands: CommandTable,
    ) -> Result<Self, Error> {
        config.validate()?;

        let address = config.bind_address();
        let listener = TcpListener::bind(&address)
            .await
            .map_err(|e| Error::Transport(format!("failed to listen on {}: {}", address, e)))?;
        let local_addr = listener.local_addr()?;

        tracing::info!(address = %local_addr, spy = config.spy, "listening on TCP");

        Ok(Self {
            listener,
            local_addr,
            state: Arc::new(ServerState::new(registry)),
            commands: Arc::new(commands),
            metrics: Arc::new(TransportMetrics::new()),
            spy: config.spy,
        })
    }

    /// Bind a server with a fresh registry and run it in the background.
    pub async fn start(config: ServerConfig) -> Result<ServerHandle, Error> {
        let server = Self::bind(config, Arc::new(ChannelRegistry::new())).await?;
        Ok(server.spawn())
    }

    /// Run this server in the background.
    pub fn spawn(self) -> ServerHandle {
        let local_addr = self.local_addr;
        let state = self.state.clone();
        let metrics = self.metrics.clone();
        let task = tokio::spawn(self.run());
        ServerHandle {
            local_addr,
            state,
            metrics,
            task,
        }
    }

    /// The address the listener is bound to.
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Shared server state.
    pub fn state(&self) -> &SharedServerState {
        &self.state
    }

    /// Accept connections until the server's shutdown token is cancelled.
    pub async fn run(self) -> Result<(), Error> {
        let mut connections = JoinSet::new();

        tracing::info!("server ready, accepting connections");

        loop {
            tokio::select! {
                _ = self.state.shutdown.cancelled() => break,
                accepted = self.listener.accept() => match accepted {
                    Ok((stream, addr)) => {
                        self.metrics.record_connection();
                        connections.spawn(serve_connection(
                            stream,
                            addr,
                            self.state.clone(),
                            self.commands.clone(),
                            self.metrics.clone(),
                            self.spy,
                        ));
                    }
                    Err(e) => {
                        tracing::warn!(error = %e, "failed to accept connection");
                    }
                },
                Some(joined) = connections.join_next(), if !connections.is_empty() => {
                    if let Err(e) = joined {
                        tracing::error!(error = %e, "connection task failed");
                    }
                }
            }
        }

        // Connections observe the same token and say goodbye on their own.
        while connections.join_next().await.is_some() {}

        tracing::info!(
            total_connections = self.metrics.total_connections(),
            total_commands = self.metrics.total_commands(),
            failed_commands = self.metrics.failed_commands(),
            pushes_sent = self.metrics.total_pushes(),
            uptime_secs = self.state.started_at.elapsed().as_secs(),
            "server stopped"
        );

        Ok(())
    }

    /// Run until either a shutdown signal arrives or a client halts the
    /// server.
    pub async fn run_until_shutdown(
        self,
        mut shutdown: broadcast::Receiver<()>,
    ) -> Result<(), Error> {
        let token = self.state.shutdown.clone();
        tokio::spawn(async move {
            tokio::select! {
                _ = shutdown.recv() => {
                    tracing::info!("shutdown signal received, stopping server");
                    token.cancel();
                }
                _ = token.cancelled() => {}
            }
        });

        self.run().await
    }
}

/// Handle to a server running in the background.
pub struct ServerHandle {
    local_addr: SocketAddr,
    state: SharedServerState,
    metrics: Arc<TransportMetrics>,
    task: JoinHandle<Result<(), Error>>,
}

impl ServerHandle {
    /// The address the server is listening on.
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Check if the server is still accepting connections.
    pub fn is_up(&self) -> bool {
        !self.state.is_stopping() && !self.task.is_finished()
    }

    /// Shared server state.
    pub fn state(&self) -> &SharedServerState {
        &self.state
    }

    /// Traffic counters of the running server.
    pub fn metrics(&self) -> &TransportMetrics {
        &self.metrics
    }

    /// Stop the server and wait until every connection has been closed.
    pub async fn stop(self) -> Result<(), Error> {
        self.state.shutdown.cancel();
        self.task
            .await
            .map_err(|e| Error::Transport(format!("server task failed: {}", e)))?
    }
}

async fn serve_connection(
    stream: TcpStream,
    addr: SocketAddr,
    state: SharedServerState,
    commands: Arc<CommandTable>,
    metrics: Arc<TransportMetrics>,
    spy: bool,
) {
    let (client_id, outbound) = state.clients.register(addr);
    tracing::info!(client_id = %client_id, peer = %addr, "client connected");

    let mut session = Session {
        client_id: &client_id,
        framed: Framed::new(stream, LineCodec::new()),
        outbound,
        state: &state,
        commands: &commands,
        metrics: &metrics,
        spy,
    };
    let result = session.run().await;

    // Disconnect hook: forget the client everywhere.
    state.clients.remove(&client_id);
    state.registry.unsubscribe_from_all(&client_id);

    match result {
        Ok(()) => tracing::info!(client_id = %client_id, "client disconnected"),
        Err(e) => tracing::warn!(client_id = %client_id, error = %e, "client connection failed"),
    }
}

struct Session<'a> {
    client_id: &'a str,
    framed: Framed<TcpStream, LineCodec>,
    outbound: mpsc::UnboundedReceiver<String>,
    state: &'a ServerState,
    commands: &'a CommandTable,
    metrics: &'a TransportMetrics,
    spy: bool,
}

impl Session<'_> {
    async fn run(&mut self) -> Result<(), Error> {
        loop {
            tokio::select! {
                biased;
                _ = self.state.shutdown.cancelled() => {
                    self.write_line(DISCONNECTED).await?;
                    self.framed.flush().await?;
                    return Ok(());
                }
                incoming = self.framed.next() => {
                    let line = match incoming {
                        Some(line) => line?,
                        None => return Ok(()),
                    };
                    if !self.handle_line(&line).await? {
                        return Ok(());
                    }
                }
                Some(push) = self.outbound.recv() => {
                    self.write_line(&push).await?;
                    self.framed.flush().await?;
                    self.metrics.record_push();
                }
            }
        }
    }

    /// Dispatch one command line and write the reply. Returns `false` once
    /// the connection should close.
    async fn handle_line(&mut self, line: &str) -> Result<bool, Error> {
        if line.trim().is_empty() {
            return Ok(true);
        }
        if self.spy {
            tracing::info!(client_id = self.client_id, line, "<<");
        } else {
            tracing::debug!(client_id = self.client_id, line, "command received");
        }

        let reply = self.commands.dispatch(self.state, self.client_id, line);
        self.metrics.record_command(reply.is_ok());

        for reply_line in reply.to_lines() {
            self.write_line(&reply_line).await?;
        }
        self.framed.flush().await?;

        Ok(reply != Reply::Disconnect)
    }

    async fn write_line(&mut self, line: &str) -> Result<(), Error> {
        if self.spy {
            tracing::info!(client_id = self.client_id, line, ">>");
        }
        self.framed.feed(line).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ems_proto::RESPONSE_OK;
    use std::time::{Duration, Instant};

    type Client = Framed<TcpStream, LineCodec>;

    async fn start() -> ServerHandle {
        Server::start(ServerConfig::new("127.0.0.1", 0))
            .await
            .unwrap()
    }

    async fn client(handle: &ServerHandle) -> Client {
        let stream = TcpStream::connect(handle.local_addr()).await.unwrap();
        Framed::new(stream, LineCodec::new())
    }

    async fn command(client: &mut Client, line: &str) -> Vec<String> {
        client.send(line).await.unwrap();
        let mut lines = Vec::new();
        loop {
            let line = client.next().await.unwrap().unwrap();
            let done = line == RESPONSE_OK || line.starts_with("ERR");
            lines.push(line);
            if done {
                return lines;
            }
        }
    }

    #[tokio::test]
    async fn test_who_assigns_distinct_ids() {
        let handle = start().await;
        let mut c1 = client(&handle).await;
        let mut c2 = client(&handle).await;

        let who1 = command(&mut c1, "WHO").await;
        let who2 = command(&mut c2, "who").await;

        assert_eq!(who1.len(), 2);
        assert!(who1[0].starts_with("client-"));
        assert_ne!(who1[0], who2[0]);

        handle.stop().await.unwrap();
    }

    #[tokio::test]
    async fn test_push_reaches_other_subscriber() {
        let handle = start().await;
        let mut c1 = client(&handle).await;
        let mut c2 = client(&handle).await;

        command(&mut c1, "SUB:NEWS").await;
        command(&mut c2, "SUB:NEWS").await;
        assert_eq!(command(&mut c1, "SEND:NEWS:hello").await, vec![RESPONSE_OK]);

        assert_eq!(c2.next().await.unwrap().unwrap(), "NEWS:hello");

        handle.stop().await.unwrap();
    }

    #[tokio::test]
    async fn test_unknown_command_is_error() {
        let handle = start().await;
        let mut c1 = client(&handle).await;

        let reply = command(&mut c1, "FROB:1").await;
        assert_eq!(reply, vec!["ERR:Unrecognized command".to_string()]);

        handle.stop().await.unwrap();
    }

    #[tokio::test]
    async fn test_metrics_count_traffic() {
        let handle = start().await;
        let mut c1 = client(&handle).await;
        let mut c2 = client(&handle).await;

        command(&mut c1, "SUB:NEWS").await;
        command(&mut c2, "SUB:NEWS").await;
        command(&mut c1, "SEND:NEWS:hello").await;
        command(&mut c1, "FROB").await;
        assert_eq!(c2.next().await.unwrap().unwrap(), "NEWS:hello");
        // The push is counted before c2's session reads its next command.
        command(&mut c2, "WHO").await;

        let metrics = handle.metrics();
        assert_eq!(metrics.total_connections(), 2);
        assert_eq!(metrics.total_commands(), 5);
        assert_eq!(metrics.failed_commands(), 1);
        assert_eq!(metrics.total_pushes(), 1);

        handle.stop().await.unwrap();
    }

    #[tokio::test]
    async fn test_stop_sends_disconnect_sentinel() {
        let handle = start().await;
        let mut c1 = client(&handle).await;
        command(&mut c1, "WHO").await;

        assert!(handle.is_up());
        handle.stop().await.unwrap();

        assert_eq!(c1.next().await.unwrap().unwrap(), DISCONNECTED);
        assert!(c1.next().await.is_none());
    }

    #[tokio::test]
    async fn test_disconnect_unsubscribes_client() {
        let handle = start().await;
        let mut c1 = client(&handle).await;
        command(&mut c1, "SUB:NEWS").await;
        assert_eq!(handle.state().registry.active_channels(), vec!["NEWS"]);

        drop(c1);

        let deadline = Instant::now() + Duration::from_secs(5);
        while !handle.state().registry.active_channels().is_empty() {
            assert!(Instant::now() < deadline, "client was never cleaned up");
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert!(handle.state().clients.is_empty());

        handle.stop().await.unwrap();
    }

    #[tokio::test]
    async fn test_halt_stops_server_when_allowed() {
        let config = ServerConfig::new("127.0.0.1", 0).with_allow_halt(true);
        let handle = Server::start(config).await.unwrap();
        let mut c1 = client(&handle).await;
        let mut c2 = client(&handle).await;
        command(&mut c2, "WHO").await;

        c1.send("HALT").await.unwrap();
        assert_eq!(c1.next().await.unwrap().unwrap(), DISCONNECTED);
        assert_eq!(c2.next().await.unwrap().unwrap(), DISCONNECTED);

        handle.stop().await.unwrap();
    }

    #[tokio::test]
    async fn test_bind_conflict_fails_fast() {
        let handle = start().await;
        let port = handle.local_addr().port();

        let result = Server::start(ServerConfig::new("127.0.0.1", port)).await;
        assert!(matches!(result, Err(Error::Transport(_))));

        handle.stop().await.unwrap();
    }

    #[tokio::test]
    async fn test_run_until_shutdown_signal() {
        let server = Server::bind(
            ServerConfig::new("127.0.0.1", 0),
            Arc::new(ChannelRegistry::new()),
        )
        .await
        .unwrap();
        let (tx, rx) = broadcast::channel(1);
        let task = tokio::spawn(server.run_until_shutdown(rx));

        tx.send(()).unwrap();
        task.await.unwrap().unwrap();
    }
}
