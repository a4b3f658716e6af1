//! Connection orchestration.
//!
//! State machine: disconnected -> connected (after a successful connect and
//! channel-list refresh) -> disconnected (explicit disconnect, a forced
//! disconnect of the subscriber, or the local server going away). Observers
//! never see `Connected` for a session whose setup failed.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use tokio::sync::{mpsc, Mutex};

use ems_client::{ClientConfig, EventBus, Subscriber, SubscriberEvent};
use ems_proto::sanitize_channel_name;
use ems_server::handlers::NO_SUBSCRIPTIONS;
use ems_server::{Server, ServerConfig, ServerHandle};

use crate::error::Error;
use crate::events::ConnectionEvent;

/// Default timeout for connecting and for each command.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Default)]
struct State {
    local_server: Option<LocalServer>,
    subscriber: Option<Arc<Subscriber>>,
    /// Generation of the current subscriber.
    generation: u64,
    /// `Connected` has been published for the current subscriber.
    announced: bool,
}

struct LocalServer {
    host: String,
    handle: ServerHandle,
}

struct Inner {
    state: Mutex<State>,
    events: EventBus<ConnectionEvent>,
    generations: AtomicU64,
    timeout: Duration,
}

/// Facade over an optional local server and a subscriber session.
///
/// Cloning yields another handle to the same manager.
#[derive(Clone)]
pub struct ConnectionManager {
    inner: Arc<Inner>,
}

impl ConnectionManager {
    /// Create a manager with the default command timeout.
    pub fn new() -> Self {
        Self::with_timeout(DEFAULT_TIMEOUT)
    }

    /// Create a manager whose sessions use the given timeout.
    pub fn with_timeout(timeout: Duration) -> Self {
        Self {
            inner: Arc::new(Inner {
                state: Mutex::new(State::default()),
                events: EventBus::new(),
                generations: AtomicU64::new(0),
                timeout,
            }),
        }
    }

    /// Register an observer. Each observer receives every event once.
    pub fn events(&self) -> mpsc::UnboundedReceiver<ConnectionEvent> {
        self.inner.events.subscribe()
    }

    /// Start an in-process server, replacing any running one.
    ///
    /// Returns the bound address; pass port `0` to pick a free port.
    pub async fn start_local_server(&self, host: &str, port: u16) -> Result<SocketAddr, Error> {
        let mut state = self.inner.state.lock().await;
        self.inner.stop_local_server(&mut state).await;

        let handle = match Server::start(ServerConfig::new(host, port)).await {
            Ok(handle) => handle,
            Err(e) => {
                self.inner
                    .publish(ConnectionEvent::ConnectionError(format!(
                        "Unable to start local server: {}",
                        e
                    )));
                return Err(e.into());
            }
        };
        let addr = handle.local_addr();
        tracing::info!(address = %addr, "local server started");

        state.local_server = Some(LocalServer {
            host: host.to_string(),
            handle,
        });
        self.inner.publish(ConnectionEvent::LocalServerStarted {
            host: host.to_string(),
            port: addr.port(),
        });
        Ok(addr)
    }

    /// Stop the in-process server if one is running.
    ///
    /// A session connected to it is ended by the server's disconnect notice.
    pub async fn stop_local_server(&self) {
        let mut state = self.inner.state.lock().await;
        self.inner.stop_local_server(&mut state).await;
    }

    /// Check if the in-process server is accepting connections.
    pub async fn is_local_server_running(&self) -> bool {
        let state = self.inner.state.lock().await;
        state
            .local_server
            .as_ref()
            .is_some_and(|local| local.handle.is_up())
    }

    /// Host and port of the running in-process server.
    pub async fn local_server_address(&self) -> Option<(String, u16)> {
        let state = self.inner.state.lock().await;
        state
            .local_server
            .as_ref()
            .map(|local| (local.host.clone(), local.handle.local_addr().port()))
    }

    /// Connect to a server, ending any current session first.
    ///
    /// Publishes `Connected` only after the server has been queried and the
    /// channel list reported. Any failure publishes `ConnectionError`.
    pub async fn connect(&self, host: &str, port: u16) -> Result<(), Error> {
        let mut state = self.inner.state.lock().await;
        self.inner.close_session(&mut state).await;

        let generation = self.inner.generations.fetch_add(1, Ordering::SeqCst) + 1;
        state.generation = generation;

        let subscriber = Arc::new(Subscriber::new(
            ClientConfig::new(host, port).with_timeout(self.inner.timeout),
        ));
        tokio::spawn(forward_events(
            Arc::downgrade(&self.inner),
            generation,
            subscriber.events(),
        ));

        if let Err(e) = subscriber.connect(&[] as &[&str]).await {
            self.inner
                .publish(ConnectionEvent::ConnectionError(format!("Unable to connect: {}", e)));
            return Err(e.into());
        }
        state.subscriber = Some(subscriber.clone());

        let about = query(&subscriber, "ABOUT").await;
        let who = query(&subscriber, "WHO").await;
        let (server_version, client_id) = match (about, who) {
            (Ok(about), Ok(who)) => (about, who),
            (Err(e), _) | (_, Err(e)) => {
                self.inner.publish(ConnectionEvent::ConnectionError(format!(
                    "Unable to query server: {}",
                    e
                )));
                self.inner.disconnect(&mut state).await;
                return Err(e);
            }
        };

        self.inner.refresh_channel_list(&mut state).await?;

        state.announced = true;
        tracing::info!(host, port, client_id = %client_id, "connected");
        self.inner.publish(ConnectionEvent::Connected {
            host: host.to_string(),
            port,
            server_version,
            client_id,
        });
        Ok(())
    }

    /// End the session and stop the local server, if any.
    pub async fn disconnect(&self) {
        let mut state = self.inner.state.lock().await;
        self.inner.disconnect(&mut state).await;
    }

    /// Check if a session is up.
    pub async fn is_connected(&self) -> bool {
        let state = self.inner.state.lock().await;
        state
            .subscriber
            .as_ref()
            .is_some_and(|subscriber| subscriber.is_connected())
    }

    /// Subscribe to each channel in turn, stopping at the first failure.
    ///
    /// The channel list is refreshed afterwards while still connected.
    pub async fn subscribe<S: AsRef<str>>(&self, channels: &[S]) -> Result<(), Error> {
        self.change_subscriptions(channels, true).await
    }

    /// Unsubscribe from each channel in turn, stopping at the first failure.
    ///
    /// The channel list is refreshed afterwards while still connected.
    pub async fn unsubscribe<S: AsRef<str>>(&self, channels: &[S]) -> Result<(), Error> {
        self.change_subscriptions(channels, false).await
    }

    async fn change_subscriptions<S: AsRef<str>>(
        &self,
        channels: &[S],
        subscribe: bool,
    ) -> Result<(), Error> {
        let mut state = self.inner.state.lock().await;
        let subscriber = state.subscriber.clone().ok_or(Error::NotConnected)?;
        if channels.is_empty() {
            return Ok(());
        }

        let mut result = Ok(());
        for channel in channels {
            let channel = channel.as_ref();
            let outcome = if subscribe {
                subscriber.subscribe(channel).await
            } else {
                subscriber.unsubscribe(channel).await
            };
            match outcome {
                Ok(()) => {
                    let name = sanitize_channel_name(channel);
                    self.inner.publish(if subscribe {
                        ConnectionEvent::ChannelSubscribed(name)
                    } else {
                        ConnectionEvent::ChannelUnsubscribed(name)
                    });
                }
                Err(e) => {
                    result = Err(Error::from(e));
                    break;
                }
            }
        }

        if let Err(e) = &result {
            let action = if subscribe { "subscription" } else { "unsubscription" };
            self.inner.publish(ConnectionEvent::ConnectionError(format!(
                "Channel {} failed: {}",
                action, e
            )));
        }

        if subscriber.is_connected() {
            self.inner.refresh_channel_list(&mut state).await?;
        } else {
            self.inner.disconnect(&mut state).await;
        }
        result
    }

    /// Send `message` to each channel, stopping at the first failure.
    pub async fn send_message<S: AsRef<str>>(&self, message: &str, channels: &[S]) -> Result<(), Error> {
        let mut state = self.inner.state.lock().await;
        let subscriber = state.subscriber.clone().ok_or(Error::NotConnected)?;

        for channel in channels {
            if let Err(e) = subscriber.broadcast(channel.as_ref(), message).await {
                self.inner.publish(ConnectionEvent::ConnectionError(format!(
                    "Unable to send message: {}",
                    e
                )));
                self.inner.disconnect(&mut state).await;
                return Err(e.into());
            }
        }
        Ok(())
    }

    /// Query active and subscribed channels and publish them together.
    ///
    /// On failure publishes `ConnectionError` and ends the session.
    pub async fn refresh_channel_list(&self) -> Result<(), Error> {
        let mut state = self.inner.state.lock().await;
        self.inner.refresh_channel_list(&mut state).await
    }
}

impl Default for ConnectionManager {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for ConnectionManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionManager")
            .field("timeout", &self.inner.timeout)
            .field("observers", &self.inner.events.observer_count())
            .finish()
    }
}

impl Inner {
    fn publish(&self, event: ConnectionEvent) {
        tracing::trace!(event = ?event, "publishing connection event");
        self.events.publish(event);
    }

    /// Drop the subscriber session, publishing `Disconnected` if it had been
    /// announced. The local server keeps running.
    async fn close_session(&self, state: &mut State) {
        if let Some(subscriber) = state.subscriber.take() {
            subscriber.disconnect().await;
        }
        if std::mem::take(&mut state.announced) {
            tracing::info!("disconnected");
            self.publish(ConnectionEvent::Disconnected);
        }
    }

    async fn disconnect(&self, state: &mut State) {
        self.close_session(state).await;
        self.stop_local_server(state).await;
    }

    async fn stop_local_server(&self, state: &mut State) {
        let Some(local) = state.local_server.take() else {
            return;
        };
        let was_up = local.handle.is_up();
        if let Err(e) = local.handle.stop().await {
            tracing::warn!(error = %e, "local server did not stop cleanly");
        }
        if was_up {
            tracing::info!("local server stopped");
            self.publish(ConnectionEvent::LocalServerStopped);
        }
    }

    async fn refresh_channel_list(&self, state: &mut State) -> Result<(), Error> {
        let subscriber = state.subscriber.clone().ok_or(Error::NotConnected)?;

        let lists = match list_channels(&subscriber, "LIST_ACTIVE").await {
            Ok(active) => list_channels(&subscriber, "LIST_SUBSCRIBED")
                .await
                .map(|subscribed| (active, subscribed)),
            Err(e) => Err(e),
        };

        match lists {
            Ok((active, subscribed)) => {
                self.publish(ConnectionEvent::ChannelList { active, subscribed });
                Ok(())
            }
            Err(e) => {
                self.publish(ConnectionEvent::ConnectionError(format!(
                    "Failed to retrieve channel list: {}",
                    e
                )));
                self.disconnect(state).await;
                Err(e)
            }
        }
    }

    /// The subscriber of `generation` lost its session on its own.
    async fn subscriber_lost(&self, generation: u64) {
        let mut state = self.state.lock().await;
        if state.generation != generation || state.subscriber.is_none() {
            return;
        }
        tracing::info!(generation, "session lost");
        self.disconnect(&mut state).await;
    }
}

/// Relay one subscriber's events until it is dropped.
async fn forward_events(
    inner: Weak<Inner>,
    generation: u64,
    mut events: mpsc::UnboundedReceiver<SubscriberEvent>,
) {
    while let Some(event) = events.recv().await {
        let Some(inner) = inner.upgrade() else {
            return;
        };
        match event {
            // Reported by the manager once setup is complete.
            SubscriberEvent::Connected(_) => {}
            SubscriberEvent::ChannelMessage {
                channel, message, ..
            } => inner.publish(ConnectionEvent::ChannelMessage { channel, message }),
            SubscriberEvent::Disconnected(_) => inner.subscriber_lost(generation).await,
        }
    }
}

/// Run a single-line query.
async fn query(subscriber: &Subscriber, verb: &str) -> Result<String, Error> {
    let response = subscriber.send_command(verb, &[] as &[&str]).await?;
    if response.is_error {
        return Err(Error::Query {
            verb: verb.to_string(),
            message: response.message,
        });
    }
    Ok(response.message.trim().to_string())
}

/// Run a channel listing query.
async fn list_channels(subscriber: &Subscriber, verb: &str) -> Result<Vec<String>, Error> {
    let response = subscriber.send_command(verb, &[] as &[&str]).await?;
    if response.is_error {
        return Err(Error::Query {
            verb: verb.to_string(),
            message: response.message,
        });
    }
    Ok(response
        .lines()
        .filter(|line| *line != NO_SUBSCRIPTIONS)
        .map(str::to_string)
        .collect())
}
