use anyhow::Context;
use tracing::{debug, warn};

use super::Outcome;
use crate::http::connection::Connection;
use crate::http::request::Request;
use crate::http::response::Response;
use crate::proxy::{DispatchError, Dispatcher};

/// Turns a CONNECT request into an opaque byte pipe to its authority.
///
/// The success status line is written only after the upstream accepted the
/// connection; from then on no HTTP is interpreted on the connection.
#[derive(Debug, Clone)]
pub struct TunnelFilter {
    dispatcher: Dispatcher,
}

impl TunnelFilter {
    pub fn new(dispatcher: Dispatcher) -> Self {
        Self { dispatcher }
    }

    pub async fn handle(&self, conn: &mut Connection, req: &mut Request) -> anyhow::Result<Outcome> {
        if !req.is_connect() {
            return Ok(Outcome::Continue);
        }

        let (host, port) = match req.destination() {
            Ok(dest) => dest,
            Err(e) => {
                debug!(peer = %conn.peer(), authority = %req.target, error = %e, "Bad CONNECT authority");
                conn.write_response(&Response::bad_request()).await?;
                return Ok(Outcome::Terminated);
            }
        };

        let upstream = match self.dispatcher.connect(&host, port).await {
            Ok(upstream) => upstream,
            Err(e @ DispatchError::Loop { .. }) => {
                warn!(peer = %conn.peer(), error = %e, "Refusing tunnel to own listener");
                conn.write_response(&Response::loop_detected()).await?;
                return Ok(Outcome::Terminated);
            }
            Err(e) => {
                warn!(peer = %conn.peer(), error = %e, "Tunnel upstream unreachable");
                conn.write_response(&Response::bad_gateway()).await?;
                return Ok(Outcome::Terminated);
            }
        };

        conn.write_response(&Response::connection_established()).await?;
        debug!(peer = %conn.peer(), host = %host, port, "Tunnel established");

        let stats = self
            .dispatcher
            .relay(conn, upstream)
            .await
            .with_context(|| format!("tunnel to {}:{}", host, port))?;

        debug!(
            peer = %conn.peer(),
            host = %host,
            port,
            sent = stats.sent,
            received = stats.received,
            "Tunnel closed"
        );
        Ok(Outcome::Terminated)
    }
}
