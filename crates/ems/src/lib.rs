//! EMS - channel messaging over a single connection.
//!
//! [`ConnectionManager`] combines an optional in-process EMS server with a
//! [`Subscriber`](ems_client::Subscriber) and reports everything that happens
//! as [`ConnectionEvent`]s. Callers do not need to know whether the server
//! they talk to is local or remote.
//!
//! # Example
//!
//! ```ignore
//! use ems::{ConnectionEvent, ConnectionManager};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), ems::Error> {
//!     let manager = ConnectionManager::new();
//!     let mut events = manager.events();
//!
//!     let addr = manager.start_local_server("127.0.0.1", 0).await?;
//!     manager.connect("127.0.0.1", addr.port()).await?;
//!     manager.subscribe(&["NEWS"]).await?;
//!
//!     while let Some(event) = events.recv().await {
//!         if let ConnectionEvent::ChannelMessage { channel, message } = event {
//!             println!("{}: {}", channel, message);
//!         }
//!     }
//!     Ok(())
//! }
//! ```

pub mod error;
pub mod events;
pub mod manager;

pub use error::Error;
pub use events::ConnectionEvent;
pub use manager::ConnectionManager;

/// Re-export the client crate.
pub use ems_client as client;
/// Re-export the server crate.
pub use ems_server as server;
