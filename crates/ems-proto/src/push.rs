//! Push notification frames: `channel:message`.

use crate::{Error, DELIMITER};

/// An unsolicited server-to-client notification on a channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PushFrame {
    /// Channel the message was sent on.
    pub channel: String,
    /// Message body. May be empty and may contain the delimiter.
    pub message: String,
}

impl PushFrame {
    /// Create a new push frame.
    pub fn new(channel: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            channel: channel.into(),
            message: message.into(),
        }
    }

    /// Encode as a wire line.
    pub fn encode(&self) -> String {
        format!("{}{}{}", self.channel, DELIMITER, self.message)
    }

    /// Parse a wire line. Only the first delimiter separates the channel from
    /// the message.
    pub fn parse(line: &str) -> Result<Self, Error> {
        let line = line.trim();
        match line.split_once(DELIMITER) {
            Some((channel, message)) => Ok(Self::new(channel, message)),
            None => Err(Error::MalformedPush(line.to_string())),
        }
    }
}
