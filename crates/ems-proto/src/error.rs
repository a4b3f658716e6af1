//! Protocol error types.

use thiserror::Error;
use tokio_util::codec::LinesCodecError;

use crate::MAX_LINE_LENGTH;

/// Protocol-level errors.
#[derive(Debug, Error)]
pub enum Error {
    /// A command line could not be parsed.
    #[error("invalid command: {0}")]
    InvalidCommand(String),

    /// A push frame did not contain the channel/message delimiter.
    #[error("malformed push frame: {0:?}")]
    MalformedPush(String),

    /// A line exceeded [`MAX_LINE_LENGTH`].
    #[error("line exceeds maximum length ({MAX_LINE_LENGTH} bytes)")]
    LineTooLong,

    /// IO error on the underlying stream.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<LinesCodecError> for Error {
    fn from(err: LinesCodecError) -> Self {
        match err {
            LinesCodecError::MaxLineLengthExceeded => Error::LineTooLong,
            LinesCodecError::Io(e) => Error::Io(e),
        }
    }
}
