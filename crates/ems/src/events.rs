//! Events published by the connection manager.

/// A connection or channel event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectionEvent {
    /// A local server is accepting connections.
    LocalServerStarted {
        /// Host the server bound to.
        host: String,
        /// Port the server bound to.
        port: u16,
    },
    /// The local server stopped.
    LocalServerStopped,
    /// A session is up and the initial channel list has been reported.
    Connected {
        /// Server host.
        host: String,
        /// Server port.
        port: u16,
        /// Server name and version as reported by `ABOUT`.
        server_version: String,
        /// Id assigned to this client.
        client_id: String,
    },
    /// The session ended.
    Disconnected,
    /// Something failed; the text is meant for users.
    ConnectionError(String),
    /// A message arrived on a subscribed channel.
    ChannelMessage {
        /// Channel name.
        channel: String,
        /// Message body.
        message: String,
    },
    /// Snapshot of the server's channels.
    ChannelList {
        /// Every channel with at least one subscriber.
        active: Vec<String>,
        /// Channels this client subscribed to.
        subscribed: Vec<String>,
    },
    /// A subscription succeeded.
    ChannelSubscribed(String),
    /// An unsubscription succeeded.
    ChannelUnsubscribed(String),
}
