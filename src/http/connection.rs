use std::fmt;
use std::io;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use bytes::{Bytes, BytesMut};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::http::response::Response;
use crate::http::writer::ResponseWriter;

/// Default time a client gets to deliver its request head.
pub const DEFAULT_READ_TIMEOUT: Duration = Duration::from_secs(30);

const READ_CHUNK: usize = 4096;

/// Byte stream a connection can run over: TCP, Unix socket, or an in-memory
/// duplex in tests.
pub trait Stream: AsyncRead + AsyncWrite + Unpin + Send {}

impl<T: AsyncRead + AsyncWrite + Unpin + Send> Stream for T {}

/// Address of the remote end of a client connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PeerAddr {
    Tcp(SocketAddr),
    Unix(Option<PathBuf>),
}

impl PeerAddr {
    /// Client address as reported in forwarding headers.
    pub fn forwarded_for(&self) -> String {
        match self {
            PeerAddr::Tcp(addr) => addr.ip().to_string(),
            PeerAddr::Unix(_) => "unknown".to_string(),
        }
    }
}

impl fmt::Display for PeerAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PeerAddr::Tcp(addr) => write!(f, "{}", addr),
            PeerAddr::Unix(Some(path)) => write!(f, "unix:{}", path.display()),
            PeerAddr::Unix(None) => f.write_str("unix:(unnamed)"),
        }
    }
}

/// A client connection owned by exactly one worker.
///
/// Bytes read ahead of what the parser consumed stay in an internal buffer
/// so they can be replayed to an upstream before relaying starts. Reads
/// through [`Connection::read_more`] are bounded by a deadline fixed when the
/// connection is created, and every blocking read also observes the abort
/// token.
pub struct Connection {
    stream: Box<dyn Stream>,
    peer: PeerAddr,
    buffer: BytesMut,
    deadline: Instant,
    abort: CancellationToken,
}

impl Connection {
    pub fn new(stream: impl Stream + 'static, peer: PeerAddr) -> Self {
        Self {
            stream: Box::new(stream),
            peer,
            buffer: BytesMut::with_capacity(READ_CHUNK),
            deadline: Instant::now() + DEFAULT_READ_TIMEOUT,
            abort: CancellationToken::new(),
        }
    }

    /// Sets the request-head read deadline relative to now.
    pub fn with_read_timeout(mut self, timeout: Duration) -> Self {
        self.deadline = Instant::now() + timeout;
        self
    }

    /// Ties the connection to a token that aborts blocking I/O when cancelled.
    pub fn with_abort(mut self, abort: CancellationToken) -> Self {
        self.abort = abort;
        self
    }

    pub fn peer(&self) -> &PeerAddr {
        &self.peer
    }

    pub fn abort_token(&self) -> &CancellationToken {
        &self.abort
    }

    /// Bytes received but not yet consumed.
    pub fn buffered(&self) -> &[u8] {
        &self.buffer
    }

    /// Drops the first `n` buffered bytes.
    pub fn consume(&mut self, n: usize) {
        let _ = self.buffer.split_to(n.min(self.buffer.len()));
    }

    /// Takes every buffered byte, leaving the buffer empty.
    pub fn take_buffered(&mut self) -> Bytes {
        self.buffer.split().freeze()
    }

    /// Reads another chunk into the buffer.
    ///
    /// Returns `Ok(0)` at end of stream. Fails with `TimedOut` once the read
    /// deadline passes and with `ConnectionAborted` if the abort token fires.
    pub async fn read_more(&mut self) -> io::Result<usize> {
        self.buffer.reserve(READ_CHUNK);
        let read = tokio::time::timeout_at(self.deadline, self.stream.read_buf(&mut self.buffer));

        tokio::select! {
            res = read => match res {
                Ok(res) => res,
                Err(_) => Err(io::Error::new(io::ErrorKind::TimedOut, "read deadline exceeded")),
            },
            _ = self.abort.cancelled() => {
                Err(io::Error::new(io::ErrorKind::ConnectionAborted, "connection aborted"))
            }
        }
    }

    pub async fn write_response(&mut self, response: &Response) -> anyhow::Result<()> {
        ResponseWriter::new(response)
            .write_to_stream(&mut *self.stream)
            .await
    }

    pub async fn write_all(&mut self, bytes: &[u8]) -> io::Result<()> {
        self.stream.write_all(bytes).await?;
        self.stream.flush().await
    }

    /// The underlying stream, for relaying once HTTP processing is over.
    pub fn stream_mut(&mut self) -> &mut (dyn Stream + 'static) {
        &mut *self.stream
    }

    /// Shuts the stream down. Consuming `self` makes a second close
    /// impossible.
    pub async fn close(mut self) -> io::Result<()> {
        match self.stream.shutdown().await {
            Err(e) if e.kind() != io::ErrorKind::NotConnected => Err(e),
            _ => Ok(()),
        }
    }
}

impl fmt::Debug for Connection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Connection")
            .field("peer", &self.peer)
            .field("buffered", &self.buffer.len())
            .finish()
    }
}
