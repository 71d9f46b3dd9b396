use tracing::{debug, warn};

use crate::proto::transport::Transport;
use crate::proto::Result;

/// Exclusive handle on one instrument for the duration of a sweep.
///
/// The session owns the transport, so the port or socket is released
/// when the session is dropped, whichever way the sweep ends.
pub struct InstrumentSession<T> {
    name: String,
    transport: T,
    retries: u32,
}

impl<T: Transport> InstrumentSession<T> {
    pub fn new(name: impl Into<String>, transport: T) -> Self {
        Self {
            name: name.into(),
            transport,
            retries: 0,
        }
    }

    /// Number of extra attempts for a query that timed out.
    pub fn with_retries(mut self, retries: u32) -> Self {
        self.retries = retries;
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub async fn write(&mut self, command: &str) -> Result<()> {
        debug!(instrument = %self.name, command, "write");
        self.transport.write(command).await
    }

    pub async fn query(&mut self, command: &str) -> Result<String> {
        let mut attempt = 0;
        loop {
            match self.transport.query(command).await {
                Ok(response) => {
                    debug!(instrument = %self.name, command, response = %response.trim(), "query");
                    return Ok(response);
                }
                Err(err) if err.is_transient() && attempt < self.retries => {
                    attempt += 1;
                    warn!(
                        instrument = %self.name,
                        command,
                        attempt,
                        "{}, retrying",
                        err
                    );
                }
                Err(err) => return Err(err),
            }
        }
    }
}
