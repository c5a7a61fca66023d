use std::fmt;
use std::io;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use thiserror::Error;
use tokio::net::TcpListener;
#[cfg(unix)]
use tokio::net::UnixListener;
use tracing::{info, warn};

use crate::http::connection::{Connection, PeerAddr};

const UNIX_ADDRESS_PREFIX: &str = "unix:";

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ListenAddrError {
    #[error("listener address is empty")]
    Empty,
    #[error("unix socket path is empty")]
    EmptyUnixPath,
    #[error("invalid TCP address {0:?}: expected host:port")]
    InvalidTcp(String),
}

/// Where a listener binds: a TCP `host:port` or a Unix socket path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ListenAddr {
    Tcp(String),
    Unix(PathBuf),
}

impl FromStr for ListenAddr {
    type Err = ListenAddrError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if s.is_empty() {
            return Err(ListenAddrError::Empty);
        }

        if let Some(path) = s.strip_prefix(UNIX_ADDRESS_PREFIX) {
            if path.is_empty() {
                return Err(ListenAddrError::EmptyUnixPath);
            }
            return Ok(ListenAddr::Unix(PathBuf::from(path)));
        }

        match s.rsplit_once(':') {
            Some((host, port)) if !host.is_empty() && port.parse::<u16>().is_ok() => {
                Ok(ListenAddr::Tcp(s.to_string()))
            }
            _ => Err(ListenAddrError::InvalidTcp(s.to_string())),
        }
    }
}

impl fmt::Display for ListenAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ListenAddr::Tcp(addr) => f.write_str(addr),
            ListenAddr::Unix(path) => write!(f, "{}{}", UNIX_ADDRESS_PREFIX, path.display()),
        }
    }
}

/// A bound stream listener.
#[derive(Debug)]
pub enum Listener {
    Tcp(TcpListener),
    #[cfg(unix)]
    Unix(UnixListener, PathBuf),
}

impl Listener {
    pub async fn bind(addr: &ListenAddr) -> io::Result<Self> {
        match addr {
            ListenAddr::Tcp(addr) => Ok(Listener::Tcp(TcpListener::bind(addr.as_str()).await?)),
            #[cfg(unix)]
            ListenAddr::Unix(path) => {
                remove_stale_socket(path)?;
                Ok(Listener::Unix(UnixListener::bind(path)?, path.clone()))
            }
            #[cfg(not(unix))]
            ListenAddr::Unix(_) => Err(io::Error::new(
                io::ErrorKind::Unsupported,
                "unix sockets are not supported on this platform",
            )),
        }
    }

    /// Address actually bound, with the real port for `:0` TCP binds.
    pub fn local_addr(&self) -> io::Result<ListenAddr> {
        match self {
            Listener::Tcp(l) => Ok(ListenAddr::Tcp(l.local_addr()?.to_string())),
            #[cfg(unix)]
            Listener::Unix(_, path) => Ok(ListenAddr::Unix(path.clone())),
        }
    }

    /// Socket address of a TCP listener, `None` for Unix sockets.
    pub fn tcp_addr(&self) -> io::Result<Option<SocketAddr>> {
        match self {
            Listener::Tcp(l) => l.local_addr().map(Some),
            #[cfg(unix)]
            Listener::Unix(..) => Ok(None),
        }
    }

    pub async fn accept(&self) -> io::Result<Connection> {
        match self {
            Listener::Tcp(l) => {
                let (socket, peer) = l.accept().await?;
                let _ = socket.set_nodelay(true);
                Ok(Connection::new(socket, PeerAddr::Tcp(peer)))
            }
            #[cfg(unix)]
            Listener::Unix(l, _) => {
                let (socket, peer) = l.accept().await?;
                let path = peer.as_pathname().map(|p| p.to_path_buf());
                Ok(Connection::new(socket, PeerAddr::Unix(path)))
            }
        }
    }

    /// Releases resources tied to the listener beyond the socket itself.
    pub fn cleanup(self) {
        #[cfg(unix)]
        if let Listener::Unix(listener, path) = self {
            drop(listener);
            if let Err(e) = std::fs::remove_file(&path) {
                warn!(path = %path.display(), error = %e, "Failed to remove unix socket");
            } else {
                info!(path = %path.display(), "Removed unix socket");
            }
        }
    }
}

/// Removes a socket file left by an earlier run, which would block the bind.
/// Anything else at `path` is left alone and fails the bind.
#[cfg(unix)]
fn remove_stale_socket(path: &Path) -> io::Result<()> {
    use std::os::unix::fs::FileTypeExt;

    match std::fs::symlink_metadata(path) {
        Ok(meta) if meta.file_type().is_socket() => std::fs::remove_file(path),
        Ok(_) => Err(io::Error::new(
            io::ErrorKind::AlreadyExists,
            format!("{} exists and is not a socket", path.display()),
        )),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e),
    }
}
