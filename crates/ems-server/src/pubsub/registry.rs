//! Channel registry tracking which clients listen on which channels.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use parking_lot::RwLock;

use ems_proto::{sanitize_channel_name, ALL_CHANNEL};

/// Registry of channels and their subscribers.
///
/// A channel exists exactly while it has at least one subscriber: it is
/// created on first subscription and removed when its last subscriber leaves.
/// The reserved [`ALL_CHANNEL`] is never stored; every client is implicitly a
/// member of it.
///
/// Malformed input (blank client ids or channel names) is ignored rather than
/// reported. Protocol validation belongs to the command handlers.
///
/// Channel names are sanitized (case-insensitive); client ids are compared
/// verbatim.
#[derive(Debug, Default)]
pub struct ChannelRegistry {
    /// Subscribers keyed by sanitized channel name.
    channels: RwLock<BTreeMap<String, BTreeSet<String>>>,
}

impl ChannelRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Subscribe a client to a channel. Idempotent.
    pub fn subscribe(&self, client_id: &str, channel: &str) {
        let Some(channel) = Self::explicit_channel(client_id, channel) else {
            return;
        };

        let added = self
            .channels
            .write()
            .entry(channel.clone())
            .or_default()
            .insert(client_id.to_string());

        if added {
            tracing::debug!(client_id, channel = %channel, "client subscribed");
        }
    }

    /// Unsubscribe a client from a channel.
    ///
    /// Removing the last subscriber deletes the channel.
    pub fn unsubscribe(&self, client_id: &str, channel: &str) {
        let Some(channel) = Self::explicit_channel(client_id, channel) else {
            return;
        };

        let mut channels = self.channels.write();
        let Some(subscribers) = channels.get_mut(&channel) else {
            return;
        };

        if subscribers.remove(client_id) {
            tracing::debug!(client_id, channel = %channel, "client unsubscribed");
        }
        if subscribers.is_empty() {
            channels.remove(&channel);
            tracing::debug!(channel = %channel, "channel removed");
        }
    }

    /// Remove a client from every channel. Used when the client disconnects.
    pub fn unsubscribe_from_all(&self, client_id: &str) {
        if client_id.trim().is_empty() {
            return;
        }

        let mut channels = self.channels.write();
        channels.retain(|_, subscribers| {
            subscribers.remove(client_id);
            !subscribers.is_empty()
        });
    }

    /// All channels with at least one subscriber, sorted.
    pub fn active_channels(&self) -> Vec<String> {
        self.channels.read().keys().cloned().collect()
    }

    /// All channels a client is subscribed to, sorted. [`ALL_CHANNEL`] is
    /// implicit and never listed.
    pub fn subscribed_channels(&self, client_id: &str) -> Vec<String> {
        self.channels
            .read()
            .iter()
            .filter(|(_, subscribers)| subscribers.contains(client_id))
            .map(|(channel, _)| channel.clone())
            .collect()
    }

    /// Subscribers of a channel, sorted.
    ///
    /// For [`ALL_CHANNEL`] this is the de-duplicated union of every channel's
    /// subscribers. Unknown channels have no subscribers.
    pub fn subscribers(&self, channel: &str) -> Vec<String> {
        let channel = sanitize_channel_name(channel);
        if channel.is_empty() {
            return Vec::new();
        }

        let channels = self.channels.read();
        if channel == ALL_CHANNEL {
            let everyone: BTreeSet<&String> = channels.values().flatten().collect();
            return everyone.into_iter().cloned().collect();
        }

        channels
            .get(&channel)
            .map(|subscribers| subscribers.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Number of active channels.
    pub fn channel_count(&self) -> usize {
        self.channels.read().len()
    }

    /// Sanitized channel name for an explicit subscribe/unsubscribe, or `None`
    /// if the request must be ignored.
    fn explicit_channel(client_id: &str, channel: &str) -> Option<String> {
        if client_id.trim().is_empty() {
            return None;
        }
        let channel = sanitize_channel_name(channel);
        // Nobody joins or leaves ALL explicitly.
        if channel.is_empty() || channel == ALL_CHANNEL {
            return None;
        }
        Some(channel)
    }
}

/// Shared channel registry handle.
pub type SharedChannelRegistry = Arc<ChannelRegistry>;
