//! Built-in command handlers.

mod channels;
mod runtime;

pub use channels::{
    ListActiveHandler, ListSubscribedHandler, SendHandler, SubscribeHandler, UnsubscribeHandler,
    NO_SUBSCRIPTIONS,
};
pub use runtime::{
    format_uptime, AboutHandler, HaltHandler, HelpHandler, UptimeHandler, WhoHandler,
};
