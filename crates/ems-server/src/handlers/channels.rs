//! Channel subscription and publishing commands.

use ems_proto::{sanitize_channel_name, PushFrame, Reply};

use crate::handler::{usage, CommandContext, CommandHandler};

/// Line returned by `LIST_SUBSCRIBED` when the caller has no subscriptions.
pub const NO_SUBSCRIPTIONS: &str = "No subscriptions found.";

/// `SUBSCRIBE` / `SUB`: start listening on a channel.
pub struct SubscribeHandler;

impl CommandHandler for SubscribeHandler {
    fn name(&self) -> &'static str {
        "SUBSCRIBE"
    }

    fn aliases(&self) -> &'static [&'static str] {
        &["SUB"]
    }

    fn min_params(&self) -> usize {
        1
    }

    fn max_params(&self) -> usize {
        1
    }

    fn help_text(&self) -> &'static str {
        "Starts listening for messages on the given channel."
    }

    fn usage_text(&self) -> String {
        usage(self.name(), &["<channel>"])
    }

    fn handle(&self, ctx: &CommandContext<'_>, params: &[&str]) -> Reply {
        ctx.state.registry.subscribe(ctx.client_id, params[0]);
        Reply::ok()
    }
}

/// `UNSUBSCRIBE` / `UNSUB`: stop listening on a channel.
pub struct UnsubscribeHandler;

impl CommandHandler for UnsubscribeHandler {
    fn name(&self) -> &'static str {
        "UNSUBSCRIBE"
    }

    fn aliases(&self) -> &'static [&'static str] {
        &["UNSUB"]
    }

    fn min_params(&self) -> usize {
        1
    }

    fn max_params(&self) -> usize {
        1
    }

    fn help_text(&self) -> &'static str {
        "Stops listening for messages on the given channel."
    }

    fn usage_text(&self) -> String {
        usage(self.name(), &["<channel>"])
    }

    fn handle(&self, ctx: &CommandContext<'_>, params: &[&str]) -> Reply {
        ctx.state.registry.unsubscribe(ctx.client_id, params[0]);
        Reply::ok()
    }
}

/// `SEND`: publish a message to every other subscriber of a channel.
///
/// The message is free text and may itself contain the delimiter. Sending to
/// a channel nobody listens on still succeeds.
pub struct SendHandler;

impl CommandHandler for SendHandler {
    fn name(&self) -> &'static str {
        "SEND"
    }

    fn min_params(&self) -> usize {
        2
    }

    fn max_params(&self) -> usize {
        2
    }

    fn free_text(&self) -> bool {
        true
    }

    fn help_text(&self) -> &'static str {
        "Sends a message to the specified channel."
    }

    fn usage_text(&self) -> String {
        usage(self.name(), &["<channel>", "<message>"])
    }

    fn handle(&self, ctx: &CommandContext<'_>, params: &[&str]) -> Reply {
        let channel = sanitize_channel_name(params[0]);
        let subscribers = ctx.state.registry.subscribers(&channel);
        if subscribers.is_empty() {
            tracing::debug!(channel = %channel, "no listeners on channel");
            return Reply::ok();
        }

        let frame = PushFrame::new(channel.as_str(), params[1]).encode();
        let mut delivered = 0usize;
        for subscriber in subscribers.iter().filter(|s| s.as_str() != ctx.client_id) {
            if ctx.state.clients.send_to_client(subscriber, frame.as_str()) {
                delivered += 1;
            } else {
                tracing::debug!(client_id = %subscriber, "subscriber has no live connection");
            }
        }

        tracing::debug!(
            sender = ctx.client_id,
            channel = %channel,
            delivered,
            "message published"
        );
        Reply::ok()
    }
}

/// `LIST_ACTIVE`: every channel with at least one subscriber.
pub struct ListActiveHandler;

impl CommandHandler for ListActiveHandler {
    fn name(&self) -> &'static str {
        "LIST_ACTIVE"
    }

    fn min_params(&self) -> usize {
        0
    }

    fn max_params(&self) -> usize {
        0
    }

    fn help_text(&self) -> &'static str {
        "Lists all active channels on this EMS server."
    }

    fn handle(&self, ctx: &CommandContext<'_>, _params: &[&str]) -> Reply {
        Reply::Ok(ctx.state.registry.active_channels())
    }
}

/// `LIST_SUBSCRIBED`: the caller's own subscriptions.
pub struct ListSubscribedHandler;

impl CommandHandler for ListSubscribedHandler {
    fn name(&self) -> &'static str {
        "LIST_SUBSCRIBED"
    }

    fn min_params(&self) -> usize {
        0
    }

    fn max_params(&self) -> usize {
        0
    }

    fn help_text(&self) -> &'static str {
        "Lists all channels you have subscribed to."
    }

    fn handle(&self, ctx: &CommandContext<'_>, _params: &[&str]) -> Reply {
        let channels = ctx.state.registry.subscribed_channels(ctx.client_id);
        if channels.is_empty() {
            Reply::ok_with(NO_SUBSCRIPTIONS)
        } else {
            Reply::Ok(channels)
        }
    }
}
