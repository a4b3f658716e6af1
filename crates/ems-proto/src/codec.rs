//! Line framing for EMS connections.
//!
//! Frames a TCP byte stream into `\n`-terminated lines (a trailing `\r` is
//! dropped) and writes outgoing lines with a `\n` terminator. Lines longer
//! than [`MAX_LINE_LENGTH`] are rejected.

use bytes::BytesMut;
use tokio_util::codec::{Decoder, Encoder, LinesCodec};

use crate::{Error, MAX_LINE_LENGTH};

/// A tokio codec that frames EMS protocol lines.
#[derive(Debug, Clone)]
pub struct LineCodec {
    inner: LinesCodec,
}

impl LineCodec {
    /// Create a codec limited to [`MAX_LINE_LENGTH`] bytes per line.
    pub fn new() -> Self {
        Self {
            inner: LinesCodec::new_with_max_length(MAX_LINE_LENGTH),
        }
    }
}

impl Default for LineCodec {
    fn default() -> Self {
        Self::new()
    }
}

impl Decoder for LineCodec {
    type Item = String;
    type Error = Error;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        Ok(self.inner.decode(src)?)
    }

    fn decode_eof(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        Ok(self.inner.decode_eof(src)?)
    }
}

// A single item type keeps `Framed<_, LineCodec>` a sink of exactly one
// type, so `flush` and `close` need no annotations.
impl<'a> Encoder<&'a str> for LineCodec {
    type Error = Error;

    fn encode(&mut self, line: &'a str, dst: &mut BytesMut) -> Result<(), Self::Error> {
        Ok(self.inner.encode(line, dst)?)
    }
}
