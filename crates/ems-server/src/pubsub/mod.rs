//! Channel subscriptions and client addressing.
//!
//! [`ChannelRegistry`] is the authoritative channel -> subscriber map.
//! [`ClientDirectory`] maps client ids to their outbound queues so handlers
//! can push frames to any connected client.

mod directory;
mod registry;

pub use directory::{ClientDirectory, ClientHandle};
pub use registry::{ChannelRegistry, SharedChannelRegistry};
