//! Outbound connections and byte relaying
//!
//! The dispatcher opens a single TCP connection to the target and pumps
//! bytes in both directions between it and the client connection. There is
//! no retry: a failed connect is reported to the caller, which answers the
//! client with a gateway error.
//!
//! Targets that resolve to one of the proxy's own TCP listeners are refused,
//! since relaying to them would feed the proxy its own requests until the
//! worker pool runs dry.

use std::io;
use std::net::SocketAddr;
use std::sync::{Arc, PoisonError, RwLock};
use std::time::Duration;

use thiserror::Error;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::time::timeout;

use crate::http::connection::Connection;

/// Default copy-buffer size for each relay direction
pub const DEFAULT_BUFFER_SIZE: usize = 32 * 1024;

/// Default time allowed for resolving and connecting to a target
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Error)]
pub enum DispatchError {
    #[error("failed to resolve {host}: {source}")]
    Resolve { host: String, source: io::Error },
    #[error("failed to connect to {target}: {source}")]
    Connect { target: String, source: io::Error },
    #[error("{target} is one of the proxy's own listeners")]
    Loop { target: String },
    #[error("relay aborted: {0}")]
    Io(#[from] io::Error),
}

/// Addresses of the proxy's own TCP listeners, shared between the server
/// that binds them and every dispatcher.
#[derive(Debug, Clone, Default)]
pub struct LocalAddrs(Arc<RwLock<Vec<SocketAddr>>>);

impl LocalAddrs {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, addr: SocketAddr) {
        self.0.write().unwrap_or_else(PoisonError::into_inner).push(addr);
    }

    /// Whether connecting to `addr` would reach one of our listeners.
    ///
    /// A wildcard listener counts for loopback and wildcard targets on its
    /// port. Other addresses of this host are caught after connecting, see
    /// [`LocalAddrs::is_self_connection`].
    pub fn contains(&self, addr: SocketAddr) -> bool {
        let listeners = self.0.read().unwrap_or_else(PoisonError::into_inner);
        listeners.iter().any(|l| {
            l.port() == addr.port()
                && (l.ip() == addr.ip()
                    || (l.ip().is_unspecified() && (addr.ip().is_loopback() || addr.ip().is_unspecified())))
        })
    }

    /// Whether an established connection ends at one of our listeners.
    ///
    /// A connection whose two ends share an IP stays on this host; if a
    /// wildcard listener owns the remote port, it accepted the connection.
    pub fn is_self_connection(&self, local: SocketAddr, peer: SocketAddr) -> bool {
        if self.contains(peer) {
            return true;
        }
        if local.ip() != peer.ip() {
            return false;
        }
        let listeners = self.0.read().unwrap_or_else(PoisonError::into_inner);
        listeners
            .iter()
            .any(|l| l.port() == peer.port() && l.ip().is_unspecified())
    }
}

/// Byte counts for a finished relay.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RelayStats {
    /// Bytes copied from the client to the upstream
    pub sent: u64,
    /// Bytes copied from the upstream to the client
    pub received: u64,
}

/// Opens upstream connections and relays bytes over them.
#[derive(Debug, Clone)]
pub struct Dispatcher {
    buffer_size: usize,
    connect_timeout: Duration,
    local_addrs: LocalAddrs,
}

impl Default for Dispatcher {
    fn default() -> Self {
        Self::new(DEFAULT_BUFFER_SIZE)
    }
}

impl Dispatcher {
    pub fn new(buffer_size: usize) -> Self {
        Self {
            buffer_size: buffer_size.max(1),
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            local_addrs: LocalAddrs::default(),
        }
    }

    pub fn with_connect_timeout(mut self, connect_timeout: Duration) -> Self {
        self.connect_timeout = connect_timeout;
        self
    }

    /// Refuses targets that resolve to any address in `local_addrs`.
    pub fn with_local_addrs(mut self, local_addrs: LocalAddrs) -> Self {
        self.local_addrs = local_addrs;
        self
    }

    /// Resolves `host` and connects to the first address that accepts.
    pub async fn connect(&self, host: &str, port: u16) -> Result<TcpStream, DispatchError> {
        let target = format!("{}:{}", host, port);

        let addrs: Vec<SocketAddr> = timeout(self.connect_timeout, tokio::net::lookup_host((host, port)))
            .await
            .map_err(|_| DispatchError::Resolve {
                host: host.to_string(),
                source: io::Error::new(io::ErrorKind::TimedOut, "lookup timed out"),
            })?
            .map_err(|source| DispatchError::Resolve {
                host: host.to_string(),
                source,
            })?
            .collect();

        if addrs.iter().any(|addr| self.local_addrs.contains(*addr)) {
            return Err(DispatchError::Loop { target });
        }

        let mut last_error =
            io::Error::new(io::ErrorKind::NotFound, "no addresses resolved");
        for addr in addrs {
            match timeout(self.connect_timeout, TcpStream::connect(addr)).await {
                Ok(Ok(stream)) => {
                    if let (Ok(local), Ok(peer)) = (stream.local_addr(), stream.peer_addr()) {
                        if self.local_addrs.is_self_connection(local, peer) {
                            return Err(DispatchError::Loop { target });
                        }
                    }
                    let _ = stream.set_nodelay(true);
                    tracing::trace!(upstream = %target, addr = %addr, "Connected to upstream");
                    return Ok(stream);
                }
                Ok(Err(e)) => last_error = e,
                Err(_) => {
                    last_error = io::Error::new(io::ErrorKind::TimedOut, "connect timed out")
                }
            }
        }

        Err(DispatchError::Connect {
            target,
            source: last_error,
        })
    }

    /// Relays bytes between `conn` and `upstream` until either side finishes.
    ///
    /// Bytes already buffered on the connection are written to the upstream
    /// first. The relay ends as soon as one direction reaches end of stream
    /// or fails; the upstream is dropped on return and the caller closes the
    /// client connection. Cancelling the connection's abort token ends the
    /// relay with `ConnectionAborted`.
    pub async fn relay(
        &self,
        conn: &mut Connection,
        mut upstream: TcpStream,
    ) -> Result<RelayStats, DispatchError> {
        let abort = conn.abort_token().clone();
        let pending = conn.take_buffered();

        let mut stats = RelayStats {
            sent: pending.len() as u64,
            received: 0,
        };
        if !pending.is_empty() {
            upstream.write_all(&pending).await?;
        }

        let (mut upstream_read, mut upstream_write) = upstream.split();
        let (mut client_read, mut client_write) = tokio::io::split(conn.stream_mut());

        let result = tokio::select! {
            res = copy(&mut client_read, &mut upstream_write, self.buffer_size, &mut stats.sent) => res,
            res = copy(&mut upstream_read, &mut client_write, self.buffer_size, &mut stats.received) => res,
            _ = abort.cancelled() => {
                Err(io::Error::new(io::ErrorKind::ConnectionAborted, "relay aborted by shutdown"))
            }
        };

        let _ = client_write.flush().await;
        result?;
        Ok(stats)
    }

    /// Connects to `host:port` and relays `conn` over the new connection.
    pub async fn dispatch(
        &self,
        conn: &mut Connection,
        host: &str,
        port: u16,
    ) -> Result<RelayStats, DispatchError> {
        let upstream = self.connect(host, port).await?;
        self.relay(conn, upstream).await
    }
}

/// Copies `reader` into `writer` through a fixed buffer until end of stream.
async fn copy<R, W>(reader: &mut R, writer: &mut W, buffer_size: usize, total: &mut u64) -> io::Result<()>
where
    R: AsyncRead + Unpin + ?Sized,
    W: AsyncWrite + Unpin + ?Sized,
{
    let mut buf = vec![0u8; buffer_size];
    loop {
        let n = reader.read(&mut buf).await?;
        if n == 0 {
            return Ok(());
        }
        writer.write_all(&buf[..n]).await?;
        writer.flush().await?;
        *total += n as u64;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn copy_counts_bytes_until_eof() {
        let mut reader: &[u8] = b"hello relay";
        let mut writer = Vec::new();
        let mut total = 0;

        copy(&mut reader, &mut writer, 4, &mut total).await.unwrap();

        assert_eq!(writer, b"hello relay");
        assert_eq!(total, 11);
    }

    #[tokio::test]
    async fn dispatch_replays_buffered_bytes_first() {
        use crate::http::connection::PeerAddr;
        use tokio::net::TcpListener;

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let origin = tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut received = [0u8; 10];
            socket.read_exact(&mut received).await.unwrap();
            socket.write_all(b"pong").await.unwrap();
            received
        });

        let (mut client, server) = tokio::io::duplex(1024);
        let mut conn = Connection::new(server, PeerAddr::Unix(None));
        client.write_all(b"early").await.unwrap();
        conn.read_more().await.unwrap();
        client.write_all(b"later").await.unwrap();

        let relay = tokio::spawn(async move {
            Dispatcher::default().dispatch(&mut conn, "127.0.0.1", port).await
        });

        let mut reply = [0u8; 4];
        client.read_exact(&mut reply).await.unwrap();
        assert_eq!(&reply, b"pong");
        assert_eq!(&origin.await.unwrap(), b"earlylater");

        let stats = relay.await.unwrap().unwrap();
        assert_eq!(stats.received, 4);
        assert!(stats.sent >= 5);
    }

    #[test]
    fn local_addrs_match_own_listeners() {
        let local = LocalAddrs::new();
        local.insert("127.0.0.1:3128".parse().unwrap());
        local.insert("0.0.0.0:8080".parse().unwrap());

        assert!(local.contains("127.0.0.1:3128".parse().unwrap()));
        assert!(!local.contains("127.0.0.2:3128".parse().unwrap()));
        assert!(local.contains("127.0.0.1:8080".parse().unwrap()));
        assert!(local.contains("0.0.0.0:8080".parse().unwrap()));
        assert!(!local.contains("192.0.2.10:8080".parse().unwrap()));

        // Reaching the wildcard listener through another address of this host.
        assert!(local.is_self_connection("192.0.2.10:50000".parse().unwrap(), "192.0.2.10:8080".parse().unwrap()));
        assert!(!local.is_self_connection("192.0.2.10:50000".parse().unwrap(), "192.0.2.99:8080".parse().unwrap()));
        assert!(!local.is_self_connection("192.0.2.10:50000".parse().unwrap(), "192.0.2.10:3128".parse().unwrap()));
    }

    #[tokio::test]
    async fn connect_to_own_listener_is_refused() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let local = LocalAddrs::new();
        local.insert(addr);

        let dispatcher = Dispatcher::default().with_local_addrs(local);
        let err = dispatcher.connect("127.0.0.1", addr.port()).await.unwrap_err();
        assert!(matches!(err, DispatchError::Loop { .. }));

        let accepted = timeout(Duration::from_millis(100), listener.accept()).await;
        assert!(accepted.is_err(), "refused target was contacted");
    }

    #[tokio::test]
    async fn connect_refused_is_reported() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);

        let err = Dispatcher::default().connect("127.0.0.1", port).await.unwrap_err();
        assert!(matches!(err, DispatchError::Connect { .. }));
    }
}
