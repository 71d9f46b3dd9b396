use async_trait::async_trait;
use futures::{SinkExt, StreamExt};
use std::{fmt, pin::Pin, str::FromStr, time::Duration};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpStream;
use tokio_serial::SerialPortBuilderExt;
use tokio_util::codec::Decoder;
use tracing::{debug, warn};

use super::codec::LineCodec;
use super::{ProtoError, Result};

/// Request/response channel to one instrument.
///
/// Commands are delivered in call order. `query` returns the single
/// response line belonging to `command`.
#[async_trait]
pub trait Transport: Send {
    async fn write(&mut self, command: &str) -> Result<()>;
    async fn query(&mut self, command: &str) -> Result<String>;
}

#[async_trait]
impl<T: Transport + ?Sized> Transport for Box<T> {
    async fn write(&mut self, command: &str) -> Result<()> {
        (**self).write(command).await
    }

    async fn query(&mut self, command: &str) -> Result<String> {
        (**self).query(command).await
    }
}

/// Instrument address in VISA resource syntax.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Resource {
    /// `ASRL<port>::INSTR`, e.g. `ASRL/dev/ttyUSB0::INSTR` or `ASRLCOM3::INSTR`.
    Serial { port: String },
    /// `TCPIP[board]::<host>::<port>::SOCKET`.
    Socket { host: String, port: u16 },
}

impl FromStr for Resource {
    type Err = ProtoError;

    fn from_str(s: &str) -> Result<Self> {
        let invalid = || ProtoError::InvalidResource(s.to_string());
        let upper = s.to_ascii_uppercase();
        let parts: Vec<&str> = s.split("::").collect();

        if upper.starts_with("ASRL") {
            match parts.as_slice() {
                [head, tail] if tail.eq_ignore_ascii_case("INSTR") && head.len() > 4 => {
                    Ok(Self::Serial {
                        port: head[4..].to_string(),
                    })
                }
                _ => Err(invalid()),
            }
        } else if upper.starts_with("TCPIP") {
            match parts.as_slice() {
                [_, host, port, tail] if tail.eq_ignore_ascii_case("SOCKET") && !host.is_empty() => {
                    Ok(Self::Socket {
                        host: host.to_string(),
                        port: port.parse().map_err(|_| invalid())?,
                    })
                }
                [_, _, tail] if tail.eq_ignore_ascii_case("INSTR") => {
                    Err(ProtoError::UnsupportedResource(s.to_string()))
                }
                _ => Err(invalid()),
            }
        } else if upper.starts_with("GPIB") || upper.starts_with("USB") || upper.starts_with("VXI")
        {
            Err(ProtoError::UnsupportedResource(s.to_string()))
        } else {
            Err(invalid())
        }
    }
}

impl fmt::Display for Resource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Resource::Serial { port } => write!(f, "ASRL{}::INSTR", port),
            Resource::Socket { host, port } => write!(f, "TCPIP0::{}::{}::SOCKET", host, port),
        }
    }
}

/// How to talk to a resource once it is opened.
#[derive(Debug, Clone)]
pub struct LinkOptions {
    pub baudrate: u32,
    pub terminator: String,
    pub timeout: Duration,
}

trait AsyncReadWrite<S>: futures::Sink<S> + futures::Stream {}

impl<T, S> AsyncReadWrite<S> for T where T: futures::Sink<S> + futures::Stream {}

/// Line framed transport over any byte stream.
///
/// A query that timed out still owes a response line. The transport
/// counts those and discards them before the next command goes out, so a
/// late answer is never taken as the answer to a later query.
#[allow(clippy::type_complexity)]
pub struct StreamTransport {
    stream: Pin<
        Box<
            dyn AsyncReadWrite<
                    String,
                    Error = std::io::Error,
                    Item = std::result::Result<String, std::io::Error>,
                > + Send,
        >,
    >,
    timeout: Duration,
    stale: usize,
}

impl StreamTransport {
    pub fn new<IO>(io: IO, terminator: &str, timeout: Duration) -> Self
    where
        IO: AsyncRead + AsyncWrite + Send + 'static,
    {
        let stream = LineCodec::new(terminator).framed(io);
        Self {
            stream: Box::pin(stream),
            timeout,
            stale: 0,
        }
    }

    /// Opens the serial port or socket named by `resource`.
    pub async fn open(resource: &Resource, options: &LinkOptions) -> Result<Self> {
        match resource {
            Resource::Serial { port } => {
                #[allow(unused_mut)]
                let mut serial = tokio_serial::new(port.as_str(), options.baudrate)
                    .timeout(options.timeout)
                    .open_native_async()?;

                #[cfg(unix)]
                serial.set_exclusive(false)?;

                Ok(Self::new(serial, &options.terminator, options.timeout))
            }
            Resource::Socket { host, port } => {
                let socket = tokio::time::timeout(
                    options.timeout,
                    TcpStream::connect((host.as_str(), *port)),
                )
                .await
                .map_err(|_| ProtoError::Timeout(options.timeout))??;
                socket.set_nodelay(true)?;
                Ok(Self::new(socket, &options.terminator, options.timeout))
            }
        }
    }

    /// Waits up to one timeout per owed response and drops it. A response
    /// that still has not shown up by then is considered lost.
    async fn resync(&mut self) -> Result<()> {
        while self.stale > 0 {
            match tokio::time::timeout(self.timeout, self.stream.next()).await {
                Ok(Some(Ok(line))) => {
                    debug!(response = %line, "Dropped late response");
                    self.stale -= 1;
                }
                Ok(Some(Err(ioerr))) => return Err(ioerr.into()),
                Ok(None) => return Err(ProtoError::Abort),
                Err(_) => {
                    warn!(lost = self.stale, "Late responses never arrived");
                    self.stale = 0;
                }
            }
        }
        Ok(())
    }
}

#[async_trait]
impl Transport for StreamTransport {
    async fn write(&mut self, command: &str) -> Result<()> {
        self.resync().await?;
        self.stream.send(command.to_string()).await?;
        Ok(())
    }

    async fn query(&mut self, command: &str) -> Result<String> {
        self.resync().await?;
        self.stream.send(command.to_string()).await?;
        match tokio::time::timeout(self.timeout, self.stream.next()).await {
            Ok(Some(Ok(line))) => Ok(line),
            Ok(Some(Err(ioerr))) => Err(ioerr.into()),
            Ok(None) => Err(ProtoError::Abort),
            Err(_) => {
                self.stale += 1;
                Err(ProtoError::Timeout(self.timeout))
            }
        }
    }
}
