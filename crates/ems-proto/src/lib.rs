//! EMS protocol types and line framing.
//!
//! EMS speaks a line-oriented protocol over a single TCP connection. Every
//! line is one frame:
//!
//! - command lines sent by clients: `VERB:param1:param2`
//! - responses: zero or more payload lines followed by a sentinel line
//!   ([`RESPONSE_OK`] or [`RESPONSE_ERR`])
//! - the disconnect sentinel [`DISCONNECTED`], sent when the server closes the
//!   connection
//! - unsolicited push frames `channel:message`, delivered to subscribers
//!
//! # Modules
//!
//! - [`channel`] - channel name sanitization and the reserved `ALL` channel
//! - [`command`] - command line parsing and encoding
//! - [`response`] - server replies and client-side response assembly
//! - [`push`] - push notification frames
//! - [`codec`] - tokio line codec with a maximum line length
//! - [`error`] - protocol error types

pub mod channel;
pub mod codec;
pub mod command;
pub mod error;
pub mod push;
pub mod response;

pub use channel::{is_all_channel, sanitize_channel_name, ALL_CHANNEL};
pub use codec::LineCodec;
pub use command::{encode_command, CommandLine};
pub use error::Error;
pub use push::PushFrame;
pub use response::{is_sentinel, Reply, Response, ResponseReader};

/// Field separator for command lines and push frames.
pub const DELIMITER: char = ':';

/// Sentinel line terminating a successful response.
pub const RESPONSE_OK: &str = "OK";

/// Sentinel line terminating an error response. May be followed by
/// `:<reason>` on the same line.
pub const RESPONSE_ERR: &str = "ERR";

/// Sentinel line sent by the server right before it closes a connection.
pub const DISCONNECTED: &str = "DISCONNECTED";

/// Maximum accepted line length in bytes, excluding the line terminator.
pub const MAX_LINE_LENGTH: usize = 8192;
