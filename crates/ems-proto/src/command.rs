//! Command lines: `VERB[:param1[:param2...]]`.

use crate::{Error, DELIMITER};

/// A parsed command line borrowed from the raw input.
///
/// Parameters are split lazily because the number of fields depends on the
/// handler: commands with a free-text final parameter keep any further
/// delimiters inside that parameter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CommandLine<'a> {
    verb: &'a str,
    rest: Option<&'a str>,
}

impl<'a> CommandLine<'a> {
    /// Parse a raw command line. Fails only if the verb is empty.
    pub fn parse(line: &'a str) -> Result<Self, Error> {
        let line = line.trim_start();
        let (verb, rest) = match line.split_once(DELIMITER) {
            Some((verb, rest)) => (verb.trim(), Some(rest)),
            None => (line.trim(), None),
        };

        if verb.is_empty() {
            return Err(Error::InvalidCommand(format!("missing verb in {:?}", line)));
        }

        Ok(Self { verb, rest })
    }

    /// The command verb as sent (match it case-insensitively).
    pub fn verb(&self) -> &'a str {
        self.verb
    }

    /// Split every parameter on the delimiter.
    pub fn params(&self) -> Vec<&'a str> {
        match self.rest {
            Some(rest) => rest.split(DELIMITER).collect(),
            None => Vec::new(),
        }
    }

    /// Split into at most `max` parameters; the last one keeps any remaining
    /// delimiters verbatim.
    pub fn params_with_free_text(&self, max: usize) -> Vec<&'a str> {
        match self.rest {
            Some(rest) => rest.splitn(max.max(1), DELIMITER).collect(),
            None => Vec::new(),
        }
    }
}

/// Encode a verb and its parameters as a command line.
pub fn encode_command<S: AsRef<str>>(verb: &str, params: &[S]) -> String {
    let mut line = String::from(verb);
    for param in params {
        line.push(DELIMITER);
        line.push_str(param.as_ref());
    }
    line
}
