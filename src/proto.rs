pub mod codec;
pub mod command;
pub mod conv;
pub mod response;
pub mod transport;

#[cfg(test)]
pub mod fake;

use std::time::Duration;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum ProtoError {
    #[error("I/O error: {:?}", _0)]
    Io(#[from] std::io::Error),

    #[error("Serial I/O error: {:?}", _0)]
    Serial(#[from] tokio_serial::Error),

    #[error("No response within {:?}", _0)]
    Timeout(Duration),
    #[error("Connection was closed")]
    Abort,
    #[error("Unexpected response to {:?}: {:?}", command, response)]
    Unexpected { command: String, response: String },
    #[error("Invalid resource string: {:?}", _0)]
    InvalidResource(String),
    #[error("Resource {:?} needs a VISA library, use an ASRL or TCPIP socket resource", _0)]
    UnsupportedResource(String),
}

impl ProtoError {
    /// Timeouts may clear up on a second attempt, everything else is
    /// treated as a persistent failure of the instrument link.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Timeout(_))
    }
}

pub type Result<T> = std::result::Result<T, ProtoError>;
