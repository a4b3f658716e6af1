//! Prompt input handling.

use ems_proto::DELIMITER;

/// What a line typed at the prompt asks for.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Input {
    /// Blank line.
    Empty,
    /// Leave the prompt.
    Quit,
    /// Show recent history.
    ShowHistory,
    /// Clear the screen.
    Clear,
    /// Send a command to the server.
    Command {
        /// Command verb as typed.
        verb: String,
        /// Parameters split on the delimiter.
        params: Vec<String>,
    },
}

/// Classify a line typed in client mode.
pub fn parse_input(line: &str) -> Input {
    let line = line.trim();
    if line.is_empty() {
        return Input::Empty;
    }
    if is_quit(line) {
        return Input::Quit;
    }

    match line.to_lowercase().as_str() {
        ".history" => return Input::ShowHistory,
        ".clear" | ".cls" => return Input::Clear,
        _ => {}
    }

    let mut parts = line.split(DELIMITER);
    let verb = parts.next().unwrap_or_default().trim().to_string();
    Input::Command {
        verb,
        params: parts.map(str::to_string).collect(),
    }
}

/// Check if a line asks to leave the prompt.
pub fn is_quit(line: &str) -> bool {
    line.trim().eq_ignore_ascii_case("quit")
}
