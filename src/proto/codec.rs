use bytes::{BufMut, BytesMut};
use std::{
    io::{self},
    str,
};
use tokio_util::codec::{Decoder, Encoder};

/// Line oriented framing for ASCII instruments.
///
/// Outgoing commands get `terminator` appended. Incoming responses are
/// split on LF, a trailing CR is dropped so CRLF instruments work too.
#[derive(Debug, Clone)]
pub struct LineCodec {
    terminator: String,
}

impl Default for LineCodec {
    fn default() -> Self {
        Self::new("\n")
    }
}

impl LineCodec {
    pub fn new(terminator: impl Into<String>) -> Self {
        Self {
            terminator: terminator.into(),
        }
    }

    fn convert_string(payload: impl AsRef<[u8]>) -> std::io::Result<String> {
        Ok(str::from_utf8(payload.as_ref())
            .map_err(|err| io::Error::new(io::ErrorKind::InvalidData, err))?
            .to_string())
    }
}

impl Decoder for LineCodec {
    type Item = String;
    // Plain io::Error here, whether a response makes sense for the
    // command that was sent is decided one level up.
    type Error = io::Error;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        let Some(n) = src.as_ref().iter().position(|b| *b == b'\n') else {
            return Ok(None);
        };
        let line = src.split_to(n + 1);
        let mut payload = &line[..n];
        if let Some(stripped) = payload.strip_suffix(b"\r") {
            payload = stripped;
        }
        Self::convert_string(payload).map(Some)
    }

    fn decode_eof(&mut self, buf: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        match self.decode(buf)? {
            Some(line) => Ok(Some(line)),
            None if buf.is_empty() => Ok(None),
            None => Err(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                "Connection closed in the middle of a response",
            )),
        }
    }
}

impl Encoder<String> for LineCodec {
    type Error = io::Error;

    fn encode(&mut self, item: String, dst: &mut BytesMut) -> Result<(), Self::Error> {
        if item.contains(['\r', '\n']) {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("Command must not contain line breaks: {:?}", item),
            ));
        }
        dst.reserve(item.len() + self.terminator.len());
        dst.put_slice(item.as_bytes());
        dst.put_slice(self.terminator.as_bytes());
        Ok(())
    }
}
