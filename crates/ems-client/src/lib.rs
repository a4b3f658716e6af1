//! EMS Client - subscriber client for EMS servers.
//!
//! This crate provides the command/response [`Connection`], the background
//! push [`Listener`] and the [`Subscriber`] that combines both over a single
//! TCP connection.
//!
//! # Quick Start
//!
//! ```ignore
//! use ems_client::{ClientConfig, Subscriber, SubscriberEvent};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let subscriber = Subscriber::new(ClientConfig::localhost());
//!     let mut events = subscriber.events();
//!
//!     // Connect and listen on NEWS
//!     subscriber.connect(&["NEWS"]).await?;
//!     subscriber.broadcast("NEWS", "hello").await?;
//!
//!     while let Some(event) = events.recv().await {
//!         if let SubscriberEvent::ChannelMessage { channel, message, .. } = event {
//!             println!("{}: {}", channel, message);
//!         }
//!     }
//!
//!     subscriber.disconnect().await;
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod connection;
pub mod error;
pub mod events;
pub mod listener;
pub mod subscriber;

pub use config::ClientConfig;
pub use connection::{Connection, ConnectionState, LineReader};
pub use error::Error;
pub use events::{EventBus, SessionInfo, SubscriberEvent};
pub use listener::{Listener, ListenerOwner, ListenerState};
pub use subscriber::Subscriber;

/// Re-export protocol types.
pub use ems_proto as proto;
