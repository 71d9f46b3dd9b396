use async_trait::async_trait;
use futures::{SinkExt, StreamExt};
use std::pin::Pin;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::io::DuplexStream;
use tokio_util::codec::Decoder;

use super::codec::LineCodec;
use super::transport::Transport;
use super::{ProtoError, Result};

/// In-memory byte stream replaying a canned response buffer.
pub(crate) struct FakeBuffer {
    response_buf: Vec<u8>,
}

impl FakeBuffer {
    pub(crate) fn new(response_buf: Vec<u8>) -> Self {
        Self { response_buf }
    }
}

impl tokio::io::AsyncRead for FakeBuffer {
    fn poll_read(
        mut self: Pin<&mut Self>,
        _cx: &mut std::task::Context<'_>,
        buf: &mut tokio::io::ReadBuf<'_>,
    ) -> std::task::Poll<std::io::Result<()>> {
        if !self.response_buf.is_empty() {
            let c = buf.remaining().min(self.response_buf.len());
            buf.put_slice(&self.response_buf[0..c]);
            self.response_buf.drain(0..c);
        }
        std::task::Poll::Ready(Ok(()))
    }
}

impl tokio::io::AsyncWrite for FakeBuffer {
    fn poll_write(
        self: Pin<&mut Self>,
        _cx: &mut std::task::Context<'_>,
        buf: &[u8],
    ) -> std::task::Poll<std::result::Result<usize, std::io::Error>> {
        std::task::Poll::Ready(Ok(buf.len()))
    }

    fn poll_flush(
        self: Pin<&mut Self>,
        _cx: &mut std::task::Context<'_>,
    ) -> std::task::Poll<std::result::Result<(), std::io::Error>> {
        std::task::Poll::Ready(Ok(()))
    }

    fn poll_shutdown(
        self: Pin<&mut Self>,
        _cx: &mut std::task::Context<'_>,
    ) -> std::task::Poll<std::result::Result<(), std::io::Error>> {
        std::task::Poll::Ready(Ok(()))
    }
}

/// Everything a fake instrument has been sent, in order.
#[derive(Clone, Default)]
pub(crate) struct CommandLog(Arc<Mutex<Vec<String>>>);

impl CommandLog {
    pub(crate) fn push(&self, command: &str) {
        self.0.lock().unwrap().push(command.to_string());
    }

    pub(crate) fn all(&self) -> Vec<String> {
        self.0.lock().unwrap().clone()
    }

    pub(crate) fn count(&self, command: &str) -> usize {
        self.0.lock().unwrap().iter().filter(|c| *c == command).count()
    }

    pub(crate) fn position(&self, command: &str) -> Option<usize> {
        self.0.lock().unwrap().iter().position(|c| c == command)
    }
}

type Responder = Box<dyn FnMut(&str) -> Result<String> + Send>;

/// Transport driven by a closure that plays the instrument. Writes are
/// logged and also passed to the closure so it can track state; their
/// return value is ignored unless it is an error.
pub(crate) struct FakeInstrument {
    log: CommandLog,
    responder: Responder,
}

impl FakeInstrument {
    pub(crate) fn new<F>(responder: F) -> (Self, CommandLog)
    where
        F: FnMut(&str) -> Result<String> + Send + 'static,
    {
        let log = CommandLog::default();
        (
            Self {
                log: log.clone(),
                responder: Box::new(responder),
            },
            log,
        )
    }
}

#[async_trait]
impl Transport for FakeInstrument {
    async fn write(&mut self, command: &str) -> Result<()> {
        self.log.push(command);
        (self.responder)(command).map(|_| ())
    }

    async fn query(&mut self, command: &str) -> Result<String> {
        self.log.push(command);
        (self.responder)(command)
    }
}

/// Error for commands a fake does not know.
pub(crate) fn unknown(command: &str) -> ProtoError {
    ProtoError::Unexpected {
        command: command.to_string(),
        response: String::new(),
    }
}

/// Instrument on the far end of an in-memory pipe. `answer` returns the
/// delay and the response line for a command, or `None` for commands
/// that get no response. Commands are served one at a time, so a slow
/// answer holds back everything behind it like on a real serial line.
pub(crate) fn duplex_instrument<F>(mut answer: F) -> DuplexStream
where
    F: FnMut(&str) -> Option<(Duration, String)> + Send + 'static,
{
    let (client, server) = tokio::io::duplex(1024);
    tokio::spawn(async move {
        let mut framed = LineCodec::default().framed(server);
        while let Some(Ok(command)) = framed.next().await {
            if let Some((delay, response)) = answer(&command) {
                tokio::time::sleep(delay).await;
                if framed.send(response).await.is_err() {
                    break;
                }
            }
        }
    });
    client
}
