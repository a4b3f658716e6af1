//! Connection management for the EMS client.

use std::net::SocketAddr;
use std::time::Duration;

use futures::{SinkExt, StreamExt};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::time::timeout;
use tokio_util::codec::{FramedRead, FramedWrite};

use ems_proto::{encode_command, is_sentinel, LineCodec, Response, ResponseReader};

use crate::config::ClientConfig;
use crate::error::Error;

/// Framed read half of a connection.
pub type LineReader = FramedRead<OwnedReadHalf, LineCodec>;

/// Framed write half of a connection.
pub type LineWriter = FramedWrite<OwnedWriteHalf, LineCodec>;

/// Connection state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// Socket connected.
    Connected,
    /// Connection closed, locally or by the server.
    Closed,
}

/// A command/response connection to an EMS server.
///
/// The read half can be lent out with [`Connection::take_reader`]; while it
/// is lent, commands fail with [`Error::NotConnected`].
pub struct Connection {
    reader: Option<LineReader>,
    writer: LineWriter,
    state: ConnectionState,
    config: ClientConfig,
    peer: SocketAddr,
}

impl Connection {
    /// Open a connection to the configured server.
    pub async fn establish(config: ClientConfig) -> Result<Self, Error> {
        let address = config.address();
        let stream = timeout(config.timeout, TcpStream::connect(&address))
            .await
            .map_err(|_| Error::Timeout)?
            .map_err(|e| Error::Connection(format!("failed to connect to {}: {}", address, e)))?;
        stream.set_nodelay(true)?;
        let peer = stream.peer_addr()?;

        let (read_half, write_half) = stream.into_split();
        tracing::debug!(peer = %peer, "connection established");

        Ok(Self {
            reader: Some(FramedRead::new(read_half, LineCodec::new())),
            writer: FramedWrite::new(write_half, LineCodec::new()),
            state: ConnectionState::Connected,
            config,
            peer,
        })
    }

    /// Send a command and wait for its complete response.
    ///
    /// A response flagged `is_server_disconnect` closes the connection.
    pub async fn send_command<S: AsRef<str>>(
        &mut self,
        verb: &str,
        params: &[S],
    ) -> Result<Response, Error> {
        self.send_command_with(verb, params, |_| false).await
    }

    /// Like [`send_command`](Self::send_command), but offers every line that
    /// arrives ahead of the reply to `on_push` first.
    ///
    /// Replies are written contiguously by the server, so push frames can only
    /// precede a reply, never interleave with it. `on_push` returns `true` if
    /// it consumed the line as a push frame. It is never shown sentinels or
    /// lines after the first payload line.
    pub async fn send_command_with<S, F>(
        &mut self,
        verb: &str,
        params: &[S],
        on_push: F,
    ) -> Result<Response, Error>
    where
        S: AsRef<str>,
        F: FnMut(&str) -> bool,
    {
        if self.state != ConnectionState::Connected {
            return Err(Error::NotConnected);
        }

        let line = encode_command(verb, params);
        let result = self.exchange(&line, on_push).await;
        match &result {
            Ok(response) if response.is_server_disconnect => self.state = ConnectionState::Closed,
            Ok(_) => {}
            Err(Error::NotConnected) => {}
            Err(_) => self.state = ConnectionState::Closed,
        }
        result
    }

    async fn exchange<F>(&mut self, line: &str, mut on_push: F) -> Result<Response, Error>
    where
        F: FnMut(&str) -> bool,
    {
        let limit = self.config.timeout;
        let reader = self.reader.as_mut().ok_or(Error::NotConnected)?;

        tracing::debug!(command = line, "sending command");
        timeout(limit, self.writer.send(line))
            .await
            .map_err(|_| Error::Timeout)??;

        let mut assembler = ResponseReader::new();
        loop {
            let next = read_line(reader, limit).await?;
            if let Some(line) = next.as_deref() {
                if !assembler.has_payload() && !is_sentinel(line) && on_push(line) {
                    continue;
                }
            }
            if let Some(response) = assembler.feed(next) {
                return Ok(response);
            }
        }
    }

    /// Lend out the read half. Returns `None` if it is already lent.
    pub fn take_reader(&mut self) -> Option<LineReader> {
        self.reader.take()
    }

    /// Give back a previously lent read half.
    pub fn restore_reader(&mut self, reader: LineReader) {
        self.reader = Some(reader);
    }

    /// Close the connection. The server sees end of stream.
    pub async fn close(&mut self) {
        if self.state == ConnectionState::Closed && self.reader.is_none() {
            return;
        }
        self.state = ConnectionState::Closed;
        self.reader = None;
        if let Err(e) = self.writer.close().await {
            tracing::debug!(error = %e, "error while closing connection");
        }
    }

    /// Check if the connection is open.
    pub fn is_connected(&self) -> bool {
        self.state == ConnectionState::Connected
    }

    /// Get the current connection state.
    pub fn state(&self) -> ConnectionState {
        self.state
    }
}

async fn read_line(reader: &mut LineReader, limit: Duration) -> Result<Option<String>, Error> {
    match timeout(limit, reader.next()).await {
        Err(_) => Err(Error::Timeout),
        Ok(None) => Ok(None),
        Ok(Some(line)) => Ok(Some(line?)),
    }
}

impl std::fmt::Debug for Connection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection")
            .field("peer", &self.peer)
            .field("state", &self.state)
            .field("has_reader", &self.reader.is_some())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::net::TcpListener;
    use tokio_util::codec::Framed;

    /// Accept one connection and answer each received line with the next
    /// scripted batch of lines.
    async fn scripted_server(script: Vec<Vec<&'static str>>) -> (SocketAddr, tokio::task::JoinHandle<Vec<String>>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let task = tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            let mut framed = Framed::new(stream, LineCodec::new());
            let mut received = Vec::new();
            for batch in script {
                match framed.next().await {
                    Some(Ok(line)) => received.push(line),
                    _ => break,
                }
                for line in batch {
                    framed.send(line).await.unwrap();
                }
            }
            received
        });
        (addr, task)
    }

    fn config(addr: SocketAddr) -> ClientConfig {
        ClientConfig::new(addr.ip().to_string(), addr.port()).with_timeout(Duration::from_secs(5))
    }

    #[tokio::test]
    async fn test_send_command_collects_payload() {
        let (addr, server) = scripted_server(vec![vec!["NEWS", "SPORTS", "OK"]]).await;
        let mut conn = Connection::establish(config(addr)).await.unwrap();

        let response = conn.send_command("LIST_ACTIVE", &[] as &[&str]).await.unwrap();
        assert!(response.is_success());
        assert_eq!(response.lines().collect::<Vec<_>>(), vec!["NEWS", "SPORTS"]);

        conn.close().await;
        assert_eq!(server.await.unwrap(), vec!["LIST_ACTIVE"]);
    }

    #[tokio::test]
    async fn test_error_response() {
        let (addr, _server) = scripted_server(vec![vec!["ERR:Unrecognized command"]]).await;
        let mut conn = Connection::establish(config(addr)).await.unwrap();

        let response = conn.send_command("HELP", &["SUBSCRIBE"]).await.unwrap();
        assert!(response.is_error);
        assert!(!response.is_server_disconnect);
        assert!(conn.is_connected());
    }

    #[tokio::test]
    async fn test_disconnect_sentinel_closes_connection() {
        let (addr, _server) = scripted_server(vec![vec!["DISCONNECTED"]]).await;
        let mut conn = Connection::establish(config(addr)).await.unwrap();

        let response = conn.send_command("HALT", &[] as &[&str]).await.unwrap();
        assert!(response.is_server_disconnect);
        assert_eq!(conn.state(), ConnectionState::Closed);
        assert!(matches!(
            conn.send_command("WHO", &[] as &[&str]).await,
            Err(Error::NotConnected)
        ));
    }

    #[tokio::test]
    async fn test_command_requires_reader() {
        let (addr, _server) = scripted_server(vec![vec!["client-1", "OK"]]).await;
        let mut conn = Connection::establish(config(addr)).await.unwrap();

        let reader = conn.take_reader().unwrap();
        assert!(matches!(
            conn.send_command("WHO", &[] as &[&str]).await,
            Err(Error::NotConnected)
        ));
        assert!(conn.is_connected());

        conn.restore_reader(reader);
        let response = conn.send_command("WHO", &[] as &[&str]).await.unwrap();
        assert_eq!(response.message, "client-1");
    }

    #[tokio::test]
    async fn test_connect_refused() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let result = Connection::establish(config(addr)).await;
        assert!(matches!(result, Err(Error::Connection(_))));
    }

    #[tokio::test]
    async fn test_leading_push_frames_are_routed() {
        let (addr, _server) =
            scripted_server(vec![vec!["NEWS:early", "HELP:text", "OK"]]).await;
        let mut conn = Connection::establish(config(addr)).await.unwrap();

        let mut pushes = Vec::new();
        let response = conn
            .send_command_with("LIST_SUBSCRIBED", &[] as &[&str], |line| {
                if line.starts_with("NEWS:") {
                    pushes.push(line.to_string());
                    true
                } else {
                    false
                }
            })
            .await
            .unwrap();

        assert_eq!(pushes, vec!["NEWS:early"]);
        assert_eq!(response.message, "HELP:text");
    }
}
