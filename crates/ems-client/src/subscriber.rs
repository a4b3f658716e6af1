//! Subscription-aware client.
//!
//! A [`Subscriber`] runs synchronous commands and a background [`Listener`]
//! over one connection. Every command suspends the listener, takes back the
//! read half, runs the exchange and then resumes the listener. The read half
//! is therefore never polled by two readers at once.
//!
//! A push written by the server just before it read a command still reaches
//! the socket ahead of that command's reply. Such leading lines are matched
//! against the channels this session subscribed to, or left during the
//! previous exchange, and dispatched as messages instead of being taken for
//! reply payload.
//!
//! A lost connection, a protocol violation or a timed out exchange closes
//! the socket, so the server drops the client and its subscriptions.

use std::collections::BTreeSet;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use parking_lot::RwLock;
use tokio::sync::{mpsc, Mutex};

use ems_proto::{is_all_channel, sanitize_channel_name, PushFrame, Response};

use crate::config::ClientConfig;
use crate::connection::{Connection, LineReader};
use crate::error::Error;
use crate::events::{EventBus, SessionInfo, SubscriberEvent};
use crate::listener::{Listener, ListenerOwner, ListenerState, SharedListenerState};

/// State reachable from the listener task. Never waits on the session lock.
struct Shared {
    connected: AtomicBool,
    session: RwLock<Option<SessionInfo>>,
    channels: RwLock<BTreeSet<String>>,
    /// Channels left since the last completed exchange. The server may still
    /// have had a push for them queued when it answered the unsubscribe.
    departed: RwLock<BTreeSet<String>>,
    events: EventBus<SubscriberEvent>,
    /// Bumped on every connect; see [`Session::epoch`].
    epoch: AtomicU64,
    handle: Weak<Mutex<Session>>,
}

impl Shared {
    fn session_info(&self) -> Option<SessionInfo> {
        self.session.read().clone()
    }

    /// Parse `line` as a push frame on a channel this session listens to.
    fn as_push(&self, line: &str) -> Option<PushFrame> {
        let frame = PushFrame::parse(line).ok()?;
        if is_all_channel(&frame.channel)
            || self.channels.read().contains(&frame.channel)
            || self.departed.read().contains(&frame.channel)
        {
            Some(frame)
        } else {
            None
        }
    }

    /// Dispatch `line` if it is a push frame that arrived ahead of a reply.
    fn route_push(&self, line: &str) -> bool {
        match self.as_push(line) {
            Some(frame) => {
                tracing::trace!(channel = %frame.channel, "push received ahead of reply");
                self.channel_message(&frame.channel, &frame.message);
                true
            }
            None => false,
        }
    }

    /// Mirror a successful subscription change.
    fn track(&self, verb: &str, channel: &str) {
        let channel = sanitize_channel_name(channel);
        if channel.is_empty() || is_all_channel(&channel) {
            return;
        }
        match verb.trim().to_uppercase().as_str() {
            "SUBSCRIBE" | "SUB" => {
                self.channels.write().insert(channel);
            }
            "UNSUBSCRIBE" | "UNSUB" => {
                if self.channels.write().remove(&channel) {
                    self.departed.write().insert(channel);
                }
            }
            _ => {}
        }
    }

    /// Mark the session as gone. Fires `Disconnected` only for the first
    /// caller after a successful connect.
    fn mark_disconnected(&self) {
        if self.connected.swap(false, Ordering::SeqCst) {
            if let Some(info) = self.session_info() {
                self.events.publish(SubscriberEvent::Disconnected(info));
            }
        }
    }
}

impl ListenerOwner for Shared {
    fn channel_message(&self, channel: &str, message: &str) {
        if let Some(session) = self.session_info() {
            self.events.publish(SubscriberEvent::ChannelMessage {
                session,
                channel: channel.to_string(),
                message: message.to_string(),
            });
        }
    }

    fn server_disconnected(&self, reason: &str) {
        tracing::info!(reason, "subscriber lost its connection");
        self.mark_disconnected();

        // The listener task is about to exit and `release` joins it, so the
        // socket is closed from a separate task.
        let Some(handle) = self.handle.upgrade() else {
            return;
        };
        let epoch = self.epoch.load(Ordering::SeqCst);
        tokio::spawn(async move {
            let mut session = handle.lock().await;
            if session.epoch == epoch {
                release(&mut session).await;
            }
        });
    }
}

struct Session {
    connection: Option<Connection>,
    listener: Listener<LineReader>,
    /// Connect generation that owns `connection`.
    epoch: u64,
}

/// A client that can subscribe to channels and receive their messages.
pub struct Subscriber {
    config: ClientConfig,
    shared: Arc<Shared>,
    session: Arc<Mutex<Session>>,
    listener_state: SharedListenerState,
}

impl Subscriber {
    /// Create a disconnected subscriber for the configured server.
    pub fn new(config: ClientConfig) -> Self {
        let listener = Listener::new();
        let listener_state = listener.state_handle();
        let session = Arc::new(Mutex::new(Session {
            connection: None,
            listener,
            epoch: 0,
        }));
        Self {
            config,
            shared: Arc::new(Shared {
                connected: AtomicBool::new(false),
                session: RwLock::new(None),
                channels: RwLock::new(BTreeSet::new()),
                departed: RwLock::new(BTreeSet::new()),
                events: EventBus::new(),
                epoch: AtomicU64::new(0),
                handle: Arc::downgrade(&session),
            }),
            session,
            listener_state,
        }
    }

    /// Register an observer for this subscriber's events.
    pub fn events(&self) -> mpsc::UnboundedReceiver<SubscriberEvent> {
        self.shared.events.subscribe()
    }

    /// Check if the session is up.
    pub fn is_connected(&self) -> bool {
        self.shared.connected.load(Ordering::SeqCst)
    }

    /// Id assigned by the server in the current or most recent session.
    pub fn client_id(&self) -> Option<String> {
        self.shared.session_info().map(|info| info.client_id)
    }

    /// Current state of the background listener.
    pub fn listener_state(&self) -> ListenerState {
        *self.listener_state.lock()
    }

    /// Connect, verify the server supports subscriptions and subscribe to
    /// `channels`.
    ///
    /// On failure the connection is closed again and no listener is left
    /// running. `Connected` is published right before the listener starts.
    pub async fn connect<S: AsRef<str>>(&self, channels: &[S]) -> Result<(), Error> {
        let mut session = self.session.lock().await;
        if self.is_connected() {
            return Err(Error::AlreadyConnected);
        }
        release(&mut session).await;
        session.epoch = self.shared.epoch.fetch_add(1, Ordering::SeqCst) + 1;

        let connection = Connection::establish(self.config.clone()).await?;
        session.connection = Some(connection);
        self.shared.channels.write().clear();
        self.shared.departed.write().clear();

        let mut early = Vec::new();
        let client_id = match self.handshake(&mut session, channels, &mut early).await {
            Ok(client_id) => client_id,
            Err(e) => {
                tracing::warn!(
                    host = %self.config.host,
                    port = self.config.port,
                    error = %e,
                    "connect failed"
                );
                release(&mut session).await;
                return Err(e);
            }
        };

        let info = SessionInfo {
            host: self.config.host.clone(),
            port: self.config.port,
            client_id,
        };
        *self.shared.session.write() = Some(info.clone());
        self.shared.connected.store(true, Ordering::SeqCst);

        tracing::info!(
            host = %info.host,
            port = info.port,
            client_id = %info.client_id,
            "subscriber connected"
        );
        self.shared.events.publish(SubscriberEvent::Connected(info));
        for frame in early {
            self.shared.channel_message(&frame.channel, &frame.message);
        }

        self.resume_listener(&mut session).await;
        Ok(())
    }

    async fn handshake<S: AsRef<str>>(
        &self,
        session: &mut Session,
        channels: &[S],
        early: &mut Vec<PushFrame>,
    ) -> Result<String, Error> {
        let connection = session.connection.as_mut().ok_or(Error::NotConnected)?;

        let who = expect_success(connection.send_command("WHO", &[] as &[&str]).await?)?;
        let client_id = who
            .lines()
            .next()
            .map(str::to_string)
            .ok_or_else(|| Error::Command("WHO returned no client id".to_string()))?;

        for verb in ["SUBSCRIBE", "UNSUBSCRIBE"] {
            let help = connection.send_command("HELP", &[verb]).await?;
            if help.is_server_disconnect {
                return Err(Error::ServerDisconnected);
            }
            if help.is_error {
                return Err(Error::Unsupported(verb.to_string()));
            }
        }

        for channel in channels {
            let channel = channel.as_ref();
            let shared = &self.shared;
            let response = connection
                .send_command_with("SUBSCRIBE", &[channel], |line| match shared.as_push(line) {
                    Some(frame) => {
                        early.push(frame);
                        true
                    }
                    None => false,
                })
                .await?;
            expect_success(response)?;
            self.shared.track("SUBSCRIBE", channel);
        }

        Ok(client_id)
    }

    /// Subscribe to a channel. On failure the session is disconnected.
    pub async fn subscribe(&self, channel: &str) -> Result<(), Error> {
        self.command_or_disconnect("SUBSCRIBE", &[channel]).await
    }

    /// Unsubscribe from a channel. On failure the session is disconnected.
    pub async fn unsubscribe(&self, channel: &str) -> Result<(), Error> {
        self.command_or_disconnect("UNSUBSCRIBE", &[channel]).await
    }

    /// Publish a message to a channel. On failure the session is
    /// disconnected.
    pub async fn broadcast(&self, channel: &str, message: &str) -> Result<(), Error> {
        self.command_or_disconnect("SEND", &[channel, message]).await
    }

    async fn command_or_disconnect(&self, verb: &str, params: &[&str]) -> Result<(), Error> {
        let result = match self.send_command(verb, params).await {
            Ok(response) => expect_success(response).map(|_| ()),
            Err(e) => Err(e),
        };
        if let Err(e) = &result {
            tracing::warn!(verb, error = %e, "command failed, disconnecting");
            self.disconnect().await;
        }
        result
    }

    /// Run a command with the listener suspended for the exchange.
    ///
    /// Error replies come back as `Ok` responses with `is_error` set. A lost
    /// connection ends the session and publishes `Disconnected`.
    pub async fn send_command<S: AsRef<str>>(
        &self,
        verb: &str,
        params: &[S],
    ) -> Result<Response, Error> {
        let mut session = self.session.lock().await;
        if !self.is_connected() {
            return Err(Error::NotConnected);
        }

        let was_running = session.listener.is_running();
        if let Some(reader) = session.listener.stop().await {
            if let Some(connection) = session.connection.as_mut() {
                connection.restore_reader(reader);
            }
        }
        // The listener may have seen the server leave while it was stopping.
        if !self.is_connected() {
            release(&mut session).await;
            return Err(Error::ServerDisconnected);
        }

        let departed = self.shared.departed.read().clone();
        let connection = session.connection.as_mut().ok_or(Error::NotConnected)?;
        let shared = &self.shared;
        let result = connection
            .send_command_with(verb, params, |line| shared.route_push(line))
            .await;

        match &result {
            Ok(response) if response.is_server_disconnect => {
                self.shared.mark_disconnected();
                release(&mut session).await;
            }
            Ok(response) => {
                // Anything queued before the previous unsubscribe has now arrived.
                self.shared
                    .departed
                    .write()
                    .retain(|channel| !departed.contains(channel));
                if response.is_success() {
                    if let Some(channel) = params.first() {
                        self.shared.track(verb, channel.as_ref());
                    }
                }
                if was_running {
                    self.resume_listener(&mut session).await;
                }
            }
            Err(e) => {
                tracing::warn!(verb, error = %e, "command exchange failed");
                self.shared.mark_disconnected();
                release(&mut session).await;
            }
        }
        result
    }

    async fn resume_listener(&self, session: &mut Session) {
        let reader = match session.connection.as_mut().and_then(Connection::take_reader) {
            Some(reader) => reader,
            None => return,
        };
        let owner: Arc<dyn ListenerOwner> = self.shared.clone();
        session.listener.start(reader, owner).await;
    }

    /// Close the session. Safe to call repeatedly; `Disconnected` is
    /// published at most once per session.
    pub async fn disconnect(&self) {
        let mut session = self.session.lock().await;
        release(&mut session).await;
        self.shared.mark_disconnected();
    }
}

/// Stop the listener and close the connection, if any.
async fn release(session: &mut Session) {
    drop(session.listener.stop().await);
    if let Some(mut connection) = session.connection.take() {
        connection.close().await;
    }
}

fn expect_success(response: Response) -> Result<Response, Error> {
    if response.is_server_disconnect {
        Err(Error::ServerDisconnected)
    } else if response.is_error {
        Err(Error::Command(response.message))
    } else {
        Ok(response)
    }
}

impl std::fmt::Debug for Subscriber {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscriber")
            .field("host", &self.config.host)
            .field("port", &self.config.port)
            .field("connected", &self.is_connected())
            .field("listener", &self.listener_state())
            .finish()
    }
}
