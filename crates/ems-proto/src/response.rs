//! Server replies and their client-side assembly.
//!
//! On the wire a response is zero or more payload lines followed by exactly
//! one sentinel: `OK`, `ERR` / `ERR:<reason>`, or `DISCONNECTED`.

use crate::{DELIMITER, DISCONNECTED, RESPONSE_ERR, RESPONSE_OK};

/// A reply produced by a server-side command handler.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reply {
    /// Success, with payload lines to send before the `OK` sentinel.
    Ok(Vec<String>),
    /// Failure with a human-readable reason.
    Error(String),
    /// The server is closing this connection.
    Disconnect,
}

impl Reply {
    /// A success reply with no payload.
    pub fn ok() -> Self {
        Reply::Ok(Vec::new())
    }

    /// A success reply with a single payload line.
    pub fn ok_with(line: impl Into<String>) -> Self {
        Reply::Ok(vec![line.into()])
    }

    /// An error reply.
    pub fn error(reason: impl Into<String>) -> Self {
        Reply::Error(reason.into())
    }

    /// Check if this reply signals success.
    pub fn is_ok(&self) -> bool {
        matches!(self, Reply::Ok(_))
    }

    /// Encode the reply as wire lines, sentinel last.
    pub fn to_lines(&self) -> Vec<String> {
        match self {
            Reply::Ok(payload) => {
                let mut lines = payload.clone();
                lines.push(RESPONSE_OK.to_string());
                lines
            }
            Reply::Error(reason) if reason.is_empty() => vec![RESPONSE_ERR.to_string()],
            Reply::Error(reason) => {
                // Multi-line reasons go out as payload so the sentinel stays on one line.
                let mut lines: Vec<String> = reason.lines().map(str::to_string).collect();
                let last = lines.pop().unwrap_or_default();
                lines.push(format!("{}{}{}", RESPONSE_ERR, DELIMITER, last));
                lines
            }
            Reply::Disconnect => vec![DISCONNECTED.to_string()],
        }
    }
}

/// A complete response as seen by the client.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Response {
    /// Payload lines joined with `\n`. For errors the reason is appended.
    pub message: String,
    /// The server answered with an error, or the connection was lost.
    pub is_error: bool,
    /// The server closed the connection (disconnect sentinel or end of stream).
    pub is_server_disconnect: bool,
}

impl Response {
    /// A successful response.
    pub fn success(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            is_error: false,
            is_server_disconnect: false,
        }
    }

    /// An error response.
    pub fn error(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            is_error: true,
            is_server_disconnect: false,
        }
    }

    /// A response representing a server-initiated disconnect.
    pub fn server_disconnected() -> Self {
        Self {
            message: DISCONNECTED.to_string(),
            is_error: true,
            is_server_disconnect: true,
        }
    }

    /// Check if the command succeeded.
    pub fn is_success(&self) -> bool {
        !self.is_error
    }

    /// Non-blank payload lines, trimmed.
    pub fn lines(&self) -> impl Iterator<Item = &str> {
        self.message
            .lines()
            .map(str::trim)
            .filter(|line| !line.is_empty())
    }
}

/// Check if a line is one of the response sentinels.
pub fn is_sentinel(line: &str) -> bool {
    line == RESPONSE_OK
        || line == RESPONSE_ERR
        || line == DISCONNECTED
        || line
            .strip_prefix(RESPONSE_ERR)
            .is_some_and(|rest| rest.starts_with(DELIMITER))
}

/// Incrementally assembles a [`Response`] from received lines.
#[derive(Debug, Default)]
pub struct ResponseReader {
    payload: Vec<String>,
}

impl ResponseReader {
    /// Create an empty reader.
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed the next received line, or `None` at end of stream.
    ///
    /// Returns the finished response once a sentinel (or end of stream) has
    /// been seen.
    pub fn feed(&mut self, line: Option<String>) -> Option<Response> {
        let line = match line {
            Some(line) => line,
            None => return Some(Response::server_disconnected()),
        };

        if line == DISCONNECTED {
            return Some(Response::server_disconnected());
        }
        if line == RESPONSE_OK {
            return Some(Response::success(self.take_payload()));
        }
        if line == RESPONSE_ERR {
            return Some(Response::error(self.take_payload()));
        }
        if let Some(reason) = line
            .strip_prefix(RESPONSE_ERR)
            .and_then(|rest| rest.strip_prefix(DELIMITER))
        {
            self.payload.push(reason.to_string());
            return Some(Response::error(self.take_payload()));
        }

        self.payload.push(line);
        None
    }

    /// Check if any payload line has been received yet.
    pub fn has_payload(&self) -> bool {
        !self.payload.is_empty()
    }

    fn take_payload(&mut self) -> String {
        std::mem::take(&mut self.payload).join("\n")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn read_all(lines: &[&str]) -> Option<Response> {
        let mut reader = ResponseReader::new();
        for line in lines {
            if let Some(response) = reader.feed(Some(line.to_string())) {
                return Some(response);
            }
        }
        None
    }

    #[test]
    fn test_reply_lines() {
        assert_eq!(Reply::ok().to_lines(), vec!["OK"]);
        assert_eq!(Reply::ok_with("client-1").to_lines(), vec!["client-1", "OK"]);
        assert_eq!(Reply::error("bad").to_lines(), vec!["ERR:bad"]);
        assert_eq!(Reply::error("").to_lines(), vec!["ERR"]);
        assert_eq!(Reply::error("a\nb").to_lines(), vec!["a", "ERR:b"]);
        assert_eq!(Reply::Disconnect.to_lines(), vec!["DISCONNECTED"]);
    }

    #[test]
    fn test_read_success_with_payload() {
        let response = read_all(&["NEWS", "SPORTS", "OK"]).unwrap();
        assert!(response.is_success());
        assert_eq!(response.message, "NEWS\nSPORTS");
        assert_eq!(response.lines().collect::<Vec<_>>(), vec!["NEWS", "SPORTS"]);
    }

    #[test]
    fn test_read_error_with_reason() {
        let response = read_all(&["ERR:Unrecognized command"]).unwrap();
        assert!(response.is_error);
        assert!(!response.is_server_disconnect);
        assert_eq!(response.message, "Unrecognized command");
    }

    #[test]
    fn test_bare_err_sentinel() {
        let response = read_all(&["ERR"]).unwrap();
        assert!(response.is_error);
        assert_eq!(response.message, "");
    }

    #[test]
    fn test_payload_starting_with_err_is_not_a_sentinel() {
        assert!(read_all(&["ERRATA"]).is_none());
    }

    #[test]
    fn test_disconnect_sentinel() {
        let response = read_all(&["DISCONNECTED"]).unwrap();
        assert!(response.is_error);
        assert!(response.is_server_disconnect);
    }

    #[test]
    fn test_end_of_stream_is_disconnect() {
        let mut reader = ResponseReader::new();
        assert!(reader.feed(Some("partial".to_string())).is_none());
        let response = reader.feed(None).unwrap();
        assert!(response.is_server_disconnect);
    }

    #[test]
    fn test_reader_resets_between_responses() {
        let mut reader = ResponseReader::new();
        reader.feed(Some("first".to_string()));
        let first = reader.feed(Some("OK".to_string())).unwrap();
        let second = reader.feed(Some("OK".to_string())).unwrap();
        assert_eq!(first.message, "first");
        assert_eq!(second.message, "");
    }

    #[test]
    fn test_sentinel_detection() {
        assert!(is_sentinel("OK"));
        assert!(is_sentinel("ERR"));
        assert!(is_sentinel("ERR:no such channel"));
        assert!(is_sentinel("DISCONNECTED"));
        assert!(!is_sentinel("ERRATA"));
        assert!(!is_sentinel("NEWS:OK"));
    }

    #[test]
    fn test_has_payload() {
        let mut reader = ResponseReader::new();
        assert!(!reader.has_payload());
        reader.feed(Some("line".to_string()));
        assert!(reader.has_payload());
        reader.feed(Some("OK".to_string()));
        assert!(!reader.has_payload());
    }
}
