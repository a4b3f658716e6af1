//! Server introspection and administration commands.

use std::time::Duration;

use ems_proto::Reply;

use crate::handler::{CommandContext, CommandHandler, UNRECOGNIZED_COMMAND};

/// Server name reported by `ABOUT`.
pub const SERVER_NAME: &str = "EMS server";

/// `WHO`: report the caller's client id.
pub struct WhoHandler;

impl CommandHandler for WhoHandler {
    fn name(&self) -> &'static str {
        "WHO"
    }

    fn min_params(&self) -> usize {
        0
    }

    fn max_params(&self) -> usize {
        0
    }

    fn help_text(&self) -> &'static str {
        "Shows your client id."
    }

    fn handle(&self, ctx: &CommandContext<'_>, _params: &[&str]) -> Reply {
        Reply::ok_with(ctx.client_id)
    }
}

/// `HELP` / `?`: list commands or describe one.
pub struct HelpHandler;

impl CommandHandler for HelpHandler {
    fn name(&self) -> &'static str {
        "HELP"
    }

    fn aliases(&self) -> &'static [&'static str] {
        &["?"]
    }

    fn min_params(&self) -> usize {
        0
    }

    fn max_params(&self) -> usize {
        1
    }

    fn help_text(&self) -> &'static str {
        "Lists available commands, or shows detailed help for a specific command."
    }

    fn usage_text(&self) -> String {
        format!("{}[{}<command>]", self.name(), ems_proto::DELIMITER)
    }

    fn handle(&self, ctx: &CommandContext<'_>, params: &[&str]) -> Reply {
        match params.first() {
            Some(verb) => match ctx.commands.get(verb) {
                Some(handler) => Reply::Ok(vec![
                    handler.help_text().to_string(),
                    format!("USAGE: {}", handler.usage_text()),
                ]),
                None => Reply::error(UNRECOGNIZED_COMMAND),
            },
            None => Reply::Ok(
                ctx.commands
                    .names()
                    .into_iter()
                    .map(str::to_string)
                    .collect(),
            ),
        }
    }
}

/// `ABOUT`: server name and version.
pub struct AboutHandler;

impl CommandHandler for AboutHandler {
    fn name(&self) -> &'static str {
        "ABOUT"
    }

    fn min_params(&self) -> usize {
        0
    }

    fn max_params(&self) -> usize {
        0
    }

    fn help_text(&self) -> &'static str {
        "Displays application version information."
    }

    fn handle(&self, _ctx: &CommandContext<'_>, _params: &[&str]) -> Reply {
        Reply::ok_with(format!("{} {}", SERVER_NAME, env!("CARGO_PKG_VERSION")))
    }
}

/// `UPTIME` / `UP`: how long the server has been running.
pub struct UptimeHandler;

impl CommandHandler for UptimeHandler {
    fn name(&self) -> &'static str {
        "UPTIME"
    }

    fn aliases(&self) -> &'static [&'static str] {
        &["UP"]
    }

    fn min_params(&self) -> usize {
        0
    }

    fn max_params(&self) -> usize {
        0
    }

    fn help_text(&self) -> &'static str {
        "Reports how long the server has been up."
    }

    fn handle(&self, ctx: &CommandContext<'_>, _params: &[&str]) -> Reply {
        Reply::ok_with(format!(
            "Server has been up for {}",
            format_uptime(ctx.state.started_at.elapsed())
        ))
    }
}

/// `HALT`: stop the server. Only registered when explicitly allowed.
pub struct HaltHandler;

impl CommandHandler for HaltHandler {
    fn name(&self) -> &'static str {
        "HALT"
    }

    fn min_params(&self) -> usize {
        0
    }

    fn max_params(&self) -> usize {
        0
    }

    fn help_text(&self) -> &'static str {
        "Shuts down the server."
    }

    fn handle(&self, ctx: &CommandContext<'_>, _params: &[&str]) -> Reply {
        tracing::warn!(client_id = ctx.client_id, "halt requested");
        ctx.state.shutdown.cancel();
        Reply::Disconnect
    }
}

fn plural(count: u64, unit: &str) -> String {
    if count == 1 {
        format!("{} {}", count, unit)
    } else {
        format!("{} {}s", count, unit)
    }
}

/// Render a duration the way `UPTIME` reports it.
///
/// Only the three most significant units are shown once the server has been
/// up for a day or more.
pub fn format_uptime(uptime: Duration) -> String {
    let total = uptime.as_secs();
    let days = total / 86_400;
    let hours = (total % 86_400) / 3_600;
    let minutes = (total % 3_600) / 60;
    let seconds = total % 60;

    if days > 0 {
        format!(
            "{}, {}, and {}",
            plural(days, "day"),
            plural(hours, "hour"),
            plural(minutes, "minute")
        )
    } else if hours > 0 {
        format!(
            "{}, {}, and {}",
            plural(hours, "hour"),
            plural(minutes, "minute"),
            plural(seconds, "second")
        )
    } else if minutes > 0 {
        format!("{} and {}", plural(minutes, "minute"), plural(seconds, "second"))
    } else {
        plural(seconds, "second")
    }
}
