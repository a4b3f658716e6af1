//! Background reader for push notifications.
//!
//! A [`Listener`] takes exclusive ownership of a connection's read half while
//! it runs and hands it back from [`Listener::stop`]. Commands can therefore
//! only read replies while the listener is stopped, and the listener can only
//! read push frames while no command is in flight.
//!
//! Stopping cancels a pending read (framed reads keep partial lines buffered,
//! so nothing is lost) and then drains every complete line that is already
//! readable. Push frames that arrived just before a command is written are
//! thus dispatched instead of being mistaken for reply payload.

use std::sync::Arc;

use futures::{FutureExt, Stream, StreamExt};
use parking_lot::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use ems_proto::{PushFrame, DISCONNECTED};

/// Lifecycle of a listener.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ListenerState {
    /// Never started.
    Idle,
    /// Reading push frames.
    Running,
    /// Stop requested, draining buffered frames.
    Stopping,
    /// Terminated; the task has exited.
    Stopped,
}

/// Receives what the listener reads.
///
/// Implementations are called from the listener task and must not wait on
/// anything that waits for the listener to stop.
pub trait ListenerOwner: Send + Sync + 'static {
    /// A push frame arrived.
    fn channel_message(&self, channel: &str, message: &str);

    /// The server closed the connection or violated the protocol. The
    /// listener exits right after this call.
    fn server_disconnected(&self, reason: &str);
}

/// Shared view of a listener's state.
pub type SharedListenerState = Arc<Mutex<ListenerState>>;

struct Running<R> {
    token: CancellationToken,
    task: JoinHandle<Option<R>>,
}

/// A cancellable push-frame reader over a line stream `R`.
pub struct Listener<R> {
    state: SharedListenerState,
    running: Option<Running<R>>,
}

impl<R> Listener<R>
where
    R: Stream<Item = Result<String, ems_proto::Error>> + Unpin + Send + 'static,
{
    /// Create an idle listener.
    pub fn new() -> Self {
        Self {
            state: Arc::new(Mutex::new(ListenerState::Idle)),
            running: None,
        }
    }

    /// Current state.
    pub fn state(&self) -> ListenerState {
        *self.state.lock()
    }

    /// Handle for observing the state without access to the listener.
    pub fn state_handle(&self) -> SharedListenerState {
        self.state.clone()
    }

    /// Check if the listener task is reading.
    pub fn is_running(&self) -> bool {
        self.state() == ListenerState::Running
    }

    /// Start reading from `reader`. A listener that is still running is
    /// stopped first and its reader dropped.
    pub async fn start(&mut self, reader: R, owner: Arc<dyn ListenerOwner>) {
        if self.running.is_some() {
            drop(self.stop().await);
        }

        let token = CancellationToken::new();
        *self.state.lock() = ListenerState::Running;
        let task = tokio::spawn(listen(reader, token.clone(), owner, self.state.clone()));
        self.running = Some(Running { token, task });
    }

    /// Stop the listener and take back the reader.
    ///
    /// Returns `None` if the listener was never started or has already exited
    /// on its own after a disconnect, in which case the reader is gone.
    pub async fn stop(&mut self) -> Option<R> {
        let running = self.running.take()?;

        {
            let mut state = self.state.lock();
            if *state == ListenerState::Running {
                *state = ListenerState::Stopping;
            }
        }
        running.token.cancel();

        let reader = match running.task.await {
            Ok(reader) => reader,
            Err(e) => {
                tracing::error!(error = %e, "listener task failed");
                None
            }
        };
        *self.state.lock() = ListenerState::Stopped;
        reader
    }
}

impl<R> Default for Listener<R>
where
    R: Stream<Item = Result<String, ems_proto::Error>> + Unpin + Send + 'static,
{
    fn default() -> Self {
        Self::new()
    }
}

impl<R> Drop for Listener<R> {
    fn drop(&mut self) {
        if let Some(running) = self.running.take() {
            running.token.cancel();
        }
    }
}

async fn listen<R>(
    mut reader: R,
    token: CancellationToken,
    owner: Arc<dyn ListenerOwner>,
    state: SharedListenerState,
) -> Option<R>
where
    R: Stream<Item = Result<String, ems_proto::Error>> + Unpin,
{
    tracing::debug!("listener started");

    loop {
        tokio::select! {
            biased;
            _ = token.cancelled() => break,
            next = reader.next() => {
                if !dispatch(next, owner.as_ref()) {
                    *state.lock() = ListenerState::Stopped;
                    return None;
                }
            }
        }
    }

    while let Some(next) = reader.next().now_or_never() {
        if !dispatch(next, owner.as_ref()) {
            *state.lock() = ListenerState::Stopped;
            return None;
        }
    }

    tracing::debug!("listener paused");
    Some(reader)
}

/// Handle one read result. Returns `false` once the connection is dead.
fn dispatch(next: Option<Result<String, ems_proto::Error>>, owner: &dyn ListenerOwner) -> bool {
    let line = match next {
        Some(Ok(line)) => line,
        Some(Err(e)) => {
            tracing::warn!(error = %e, "read failed");
            owner.server_disconnected(&e.to_string());
            return false;
        }
        None => {
            owner.server_disconnected("connection closed by server");
            return false;
        }
    };

    if line == DISCONNECTED {
        tracing::info!("server closed the session");
        owner.server_disconnected("server closed the session");
        return false;
    }

    match PushFrame::parse(&line) {
        Ok(frame) => {
            tracing::trace!(channel = %frame.channel, "push received");
            owner.channel_message(&frame.channel, &frame.message);
            true
        }
        Err(e) => {
            tracing::error!(error = %e, "protocol violation");
            owner.server_disconnected(&e.to_string());
            false
        }
    }
}
