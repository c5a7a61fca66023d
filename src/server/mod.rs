//! Listeners, accept loops and graceful shutdown
//!
//! Each listener runs its own accept loop: accept a connection, bind an idle
//! worker from the pool (waiting when none is idle), then run the worker on
//! its own task while the loop goes back to accepting.

pub mod listener;
pub mod pool;
pub mod worker;

use std::io;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, error, info, warn};

use crate::http::connection::DEFAULT_READ_TIMEOUT;
use crate::proxy::LocalAddrs;
use listener::{ListenAddr, Listener};
use pool::WorkerPool;

pub use pool::{PoolError, PooledWorker};
pub use worker::Worker;

/// Default time in-flight connections get to finish after `close`.
pub const DEFAULT_SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(30);

/// Pause after a failed accept, e.g. when out of file descriptors.
const ACCEPT_ERROR_DELAY: Duration = Duration::from_millis(100);

/// The proxy server: a worker pool fed by any number of listeners.
pub struct Server {
    pool: WorkerPool,
    shutdown: CancellationToken,
    abort: CancellationToken,
    tracker: TaskTracker,
    accept_loops: Vec<JoinHandle<()>>,
    local_addrs: LocalAddrs,
    read_timeout: Duration,
    shutdown_timeout: Duration,
}

impl Server {
    pub fn new(pool: WorkerPool) -> Self {
        Self {
            pool,
            shutdown: CancellationToken::new(),
            abort: CancellationToken::new(),
            tracker: TaskTracker::new(),
            accept_loops: Vec::new(),
            local_addrs: LocalAddrs::default(),
            read_timeout: DEFAULT_READ_TIMEOUT,
            shutdown_timeout: DEFAULT_SHUTDOWN_TIMEOUT,
        }
    }

    /// Time each connection gets to deliver its request head.
    pub fn read_timeout(mut self, timeout: Duration) -> Self {
        self.read_timeout = timeout;
        self
    }

    /// Time in-flight connections get to finish once `close` is called.
    pub fn shutdown_timeout(mut self, timeout: Duration) -> Self {
        self.shutdown_timeout = timeout;
        self
    }

    /// Registry the bound TCP addresses are recorded in. Share it with the
    /// workers' dispatchers so they refuse to connect back to the proxy.
    pub fn local_addrs(mut self, local_addrs: LocalAddrs) -> Self {
        self.local_addrs = local_addrs;
        self
    }

    pub fn pool(&self) -> &WorkerPool {
        &self.pool
    }

    /// Number of connections currently being handled.
    pub fn in_flight(&self) -> usize {
        self.tracker.len()
    }

    /// Binds `addr` and starts accepting on it.
    ///
    /// Returns the bound address, which carries the real port when binding
    /// TCP port 0.
    pub async fn listen(&mut self, addr: &ListenAddr) -> io::Result<ListenAddr> {
        let listener = Listener::bind(addr).await?;
        let local = listener.local_addr()?;
        if let Some(socket) = listener.tcp_addr()? {
            self.local_addrs.insert(socket);
        }
        info!(address = %local, "Listening");

        let ctx = AcceptContext {
            pool: self.pool.clone(),
            shutdown: self.shutdown.clone(),
            abort: self.abort.clone(),
            tracker: self.tracker.clone(),
            read_timeout: self.read_timeout,
        };
        self.accept_loops.push(tokio::spawn(accept_loop(listener, local.clone(), ctx)));

        Ok(local)
    }

    /// Stops accepting on every listener and waits for in-flight connections.
    ///
    /// Connections still running after the shutdown timeout have their
    /// relays and reads aborted.
    pub async fn close(self) {
        self.shutdown.cancel();
        for handle in self.accept_loops {
            if let Err(e) = handle.await {
                error!(error = %e, "Accept loop panicked");
            }
        }

        self.tracker.close();
        let in_flight = self.tracker.len();
        if in_flight > 0 {
            info!(connections = in_flight, "Waiting for in-flight connections");
        }

        if tokio::time::timeout(self.shutdown_timeout, self.tracker.wait()).await.is_err() {
            warn!(
                connections = self.tracker.len(),
                "Shutdown timeout reached, aborting remaining connections"
            );
            self.abort.cancel();
            self.tracker.wait().await;
        }

        info!("Server closed");
    }
}

struct AcceptContext {
    pool: WorkerPool,
    shutdown: CancellationToken,
    abort: CancellationToken,
    tracker: TaskTracker,
    read_timeout: Duration,
}

async fn accept_loop(listener: Listener, local: ListenAddr, ctx: AcceptContext) {
    loop {
        let conn = tokio::select! {
            _ = ctx.shutdown.cancelled() => break,
            res = listener.accept() => match res {
                Ok(conn) => conn,
                Err(e) => {
                    warn!(address = %local, error = %e, "Failed to accept connection");
                    tokio::time::sleep(ACCEPT_ERROR_DELAY).await;
                    continue;
                }
            },
        };

        // Blocks while every worker is busy, which stalls accepting.
        let worker = tokio::select! {
            _ = ctx.shutdown.cancelled() => break,
            res = ctx.pool.acquire() => match res {
                Ok(worker) => worker,
                Err(e) => {
                    error!(address = %local, error = %e, "Cannot acquire worker");
                    break;
                }
            },
        };

        let conn = conn
            .with_read_timeout(ctx.read_timeout)
            .with_abort(ctx.abort.child_token());
        let peer = conn.peer().clone();
        debug!(peer = %peer, worker = worker.id(), "Accepted connection");

        ctx.tracker.spawn(async move {
            if let Err(e) = worker.run(conn).await {
                warn!(peer = %peer, worker = worker.id(), error = %format!("{:#}", e), "Connection error");
            }
            // Dropping `worker` returns it to the pool.
        });
    }

    info!(address = %local, "Listener stopped");
    listener.cleanup();
}
