//! Tab completion for the prompt.

use rustyline::completion::{Completer, Pair};
use rustyline::highlight::Highlighter;
use rustyline::hint::Hinter;
use rustyline::validate::Validator;
use rustyline::{Context, Helper};
use std::borrow::Cow;

use ems_proto::DELIMITER;

/// Prompt helper completing command verbs.
pub struct EmsHelper {
    /// Verbs offered by the connected server.
    pub verbs: Vec<String>,
}

impl EmsHelper {
    /// Create a helper with no known verbs.
    pub fn new() -> Self {
        Self { verbs: Vec::new() }
    }

    /// Replace the known verbs.
    pub fn set_verbs(&mut self, verbs: Vec<String>) {
        self.verbs = verbs;
    }

    fn candidates(&self, word: &str) -> Vec<Pair> {
        let prefix = word.to_uppercase();
        self.verbs
            .iter()
            .map(String::as_str)
            .chain(LOCAL_COMMANDS.iter().copied())
            .filter(|verb| verb.to_uppercase().starts_with(&prefix))
            .map(|verb| Pair {
                display: verb.to_string(),
                replacement: verb.to_string(),
            })
            .collect()
    }
}

impl Default for EmsHelper {
    fn default() -> Self {
        Self::new()
    }
}

/// Commands handled by the prompt itself.
const LOCAL_COMMANDS: &[&str] = &["quit", ".history", ".clear"];

impl Completer for EmsHelper {
    type Candidate = Pair;

    fn complete(
        &self,
        line: &str,
        pos: usize,
        _ctx: &Context<'_>,
    ) -> rustyline::Result<(usize, Vec<Pair>)> {
        let line_to_cursor = &line[..pos];

        // Only the verb is completed.
        if line_to_cursor.contains(DELIMITER) {
            return Ok((pos, Vec::new()));
        }

        let word_start = line_to_cursor.len() - line_to_cursor.trim_start().len();
        Ok((word_start, self.candidates(&line_to_cursor[word_start..])))
    }
}

impl Hinter for EmsHelper {
    type Hint = String;

    fn hint(&self, _line: &str, _pos: usize, _ctx: &Context<'_>) -> Option<String> {
        None
    }
}

impl Highlighter for EmsHelper {
    fn highlight<'l>(&self, line: &'l str, _pos: usize) -> Cow<'l, str> {
        Cow::Borrowed(line)
    }

    fn highlight_char(&self, _line: &str, _pos: usize, _kind: rustyline::highlight::CmdKind) -> bool {
        false
    }
}

impl Validator for EmsHelper {}

impl Helper for EmsHelper {}
