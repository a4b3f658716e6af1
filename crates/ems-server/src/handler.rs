//! Command dispatch.
//!
//! Every verb is served by a [`CommandHandler`]. The [`CommandTable`] resolves
//! verbs and aliases case-insensitively, validates the parameter count and
//! only then invokes the handler.

use std::collections::HashMap;
use std::sync::Arc;

use ems_proto::{CommandLine, Reply, DELIMITER};

use crate::handlers;
use crate::state::ServerState;

/// Error message for verbs no handler is registered for.
pub const UNRECOGNIZED_COMMAND: &str = "Unrecognized command";

/// Context a handler runs in.
pub struct CommandContext<'a> {
    /// Id of the client that issued the command.
    pub client_id: &'a str,
    /// Server-wide state.
    pub state: &'a ServerState,
    /// The dispatch table, for introspection (`HELP`).
    pub commands: &'a CommandTable,
}

/// A server command.
pub trait CommandHandler: Send + Sync {
    /// Primary verb, upper case.
    fn name(&self) -> &'static str;

    /// Alternative verbs, upper case.
    fn aliases(&self) -> &'static [&'static str] {
        &[]
    }

    /// Minimum accepted parameter count.
    fn min_params(&self) -> usize;

    /// Maximum accepted parameter count.
    fn max_params(&self) -> usize;

    /// Whether the last parameter is free text that may contain the
    /// delimiter.
    fn free_text(&self) -> bool {
        false
    }

    /// One-line description.
    fn help_text(&self) -> &'static str;

    /// Usage line, e.g. `SUB:<channel>`.
    fn usage_text(&self) -> String {
        self.name().to_string()
    }

    /// Execute the command. `params` already satisfies the declared count.
    fn handle(&self, ctx: &CommandContext<'_>, params: &[&str]) -> Reply;
}

/// Verb -> handler lookup table.
#[derive(Default)]
pub struct CommandTable {
    handlers: Vec<Arc<dyn CommandHandler>>,
    index: HashMap<String, usize>,
}

impl CommandTable {
    /// Create an empty table.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a table with the runtime and channel commands registered.
    ///
    /// `HALT` is only registered when `allow_halt` is set.
    pub fn with_defaults(allow_halt: bool) -> Self {
        let mut table = Self::new();
        table.register(handlers::WhoHandler);
        table.register(handlers::HelpHandler);
        table.register(handlers::AboutHandler);
        table.register(handlers::UptimeHandler);
        table.register(handlers::SubscribeHandler);
        table.register(handlers::UnsubscribeHandler);
        table.register(handlers::SendHandler);
        table.register(handlers::ListActiveHandler);
        table.register(handlers::ListSubscribedHandler);
        if allow_halt {
            table.register(handlers::HaltHandler);
        }
        table
    }

    /// Register a handler under its name and aliases. Later registrations
    /// win on conflicting verbs.
    pub fn register<H: CommandHandler + 'static>(&mut self, handler: H) {
        let slot = self.handlers.len();
        self.index.insert(handler.name().to_uppercase(), slot);
        for alias in handler.aliases() {
            self.index.insert(alias.to_uppercase(), slot);
        }
        self.handlers.push(Arc::new(handler));
    }

    /// Look up a handler by verb or alias, ignoring case.
    pub fn get(&self, verb: &str) -> Option<&dyn CommandHandler> {
        self.index
            .get(&verb.trim().to_uppercase())
            .map(|&slot| self.handlers[slot].as_ref())
    }

    /// Primary verbs of all registered handlers, sorted.
    pub fn names(&self) -> Vec<&'static str> {
        let mut names: Vec<&'static str> = self.handlers.iter().map(|h| h.name()).collect();
        names.sort_unstable();
        names.dedup();
        names
    }

    /// Parse and execute one command line on behalf of `client_id`.
    pub fn dispatch(&self, state: &ServerState, client_id: &str, line: &str) -> Reply {
        let command = match CommandLine::parse(line) {
            Ok(command) => command,
            Err(e) => return Reply::error(e.to_string()),
        };

        let Some(handler) = self.get(command.verb()) else {
            tracing::debug!(client_id, verb = command.verb(), "unrecognized command");
            return Reply::error(UNRECOGNIZED_COMMAND);
        };

        let params = if handler.free_text() {
            command.params_with_free_text(handler.max_params())
        } else {
            command.params()
        };

        if params.len() < handler.min_params() || params.len() > handler.max_params() {
            return Reply::error(format!(
                "{}; usage: {}",
                describe_param_count(handler.min_params(), handler.max_params()),
                handler.usage_text()
            ));
        }

        let ctx = CommandContext {
            client_id,
            state,
            commands: self,
        };
        handler.handle(&ctx, &params)
    }
}

fn describe_param_count(min: usize, max: usize) -> String {
    if min == max {
        format!("expected {} parameter(s)", min)
    } else {
        format!("expected {} to {} parameters", min, max)
    }
}

/// Build a usage line from a verb and parameter placeholders.
pub(crate) fn usage(verb: &str, params: &[&str]) -> String {
    let mut line = verb.to_string();
    for param in params {
        line.push(DELIMITER);
        line.push_str(param);
    }
    line
}

#[cfg(test)]
mod tests {
    use super::*;

    struct EchoHandler;

    impl CommandHandler for EchoHandler {
        fn name(&self) -> &'static str {
            "ECHO"
        }

        fn aliases(&self) -> &'static [&'static str] {
            &["E"]
        }

        fn min_params(&self) -> usize {
            1
        }

        fn max_params(&self) -> usize {
            2
        }

        fn help_text(&self) -> &'static str {
            "Echoes its parameters."
        }

        fn handle(&self, _ctx: &CommandContext<'_>, params: &[&str]) -> Reply {
            Reply::Ok(params.iter().map(|p| p.to_string()).collect())
        }
    }

    fn table() -> CommandTable {
        let mut table = CommandTable::new();
        table.register(EchoHandler);
        table
    }

    #[test]
    fn test_dispatch_by_name_and_alias() {
        let state = ServerState::default();
        let table = table();

        assert_eq!(table.dispatch(&state, "c1", "ECHO:a"), Reply::ok_with("a"));
        assert_eq!(table.dispatch(&state, "c1", "echo:a"), Reply::ok_with("a"));
        assert_eq!(table.dispatch(&state, "c1", "e:a:b"), Reply::Ok(vec!["a".into(), "b".into()]));
    }

    #[test]
    fn test_unknown_verb() {
        let state = ServerState::default();
        assert_eq!(
            table().dispatch(&state, "c1", "NOPE"),
            Reply::error(UNRECOGNIZED_COMMAND)
        );
    }

    #[test]
    fn test_param_count_is_strict() {
        let state = ServerState::default();
        let table = table();

        assert!(!table.dispatch(&state, "c1", "ECHO").is_ok());
        assert!(!table.dispatch(&state, "c1", "ECHO:a:b:c").is_ok());
    }

    #[test]
    fn test_defaults_register_halt_only_on_request() {
        assert!(CommandTable::with_defaults(false).get("HALT").is_none());
        assert!(CommandTable::with_defaults(true).get("halt").is_some());
    }

    #[test]
    fn test_names_are_sorted_primary_verbs() {
        let names = CommandTable::with_defaults(false).names();
        assert_eq!(
            names,
            vec![
                "ABOUT",
                "HELP",
                "LIST_ACTIVE",
                "LIST_SUBSCRIBED",
                "SEND",
                "SUBSCRIBE",
                "UNSUBSCRIBE",
                "UPTIME",
                "WHO",
            ]
        );
    }

    #[test]
    fn test_usage_builder() {
        assert_eq!(usage("SEND", &["<channel>", "<message>"]), "SEND:<channel>:<message>");
    }
}
