use anyhow::Context;
use tokio::io::AsyncWriteExt;
use tracing::{debug, warn};

use super::Outcome;
use crate::http::connection::Connection;
use crate::http::request::Request;
use crate::http::response::Response;
use crate::http::writer::serialize_request_head;
use crate::proxy::{DispatchError, Dispatcher};

/// Forwards a plain HTTP request to the upstream it names.
///
/// The head is re-serialized in origin-form, then the connection becomes a
/// raw relay so the body and the upstream's response flow through untouched.
#[derive(Debug, Clone)]
pub struct ForwardFilter {
    dispatcher: Dispatcher,
}

impl ForwardFilter {
    pub fn new(dispatcher: Dispatcher) -> Self {
        Self { dispatcher }
    }

    pub async fn handle(&self, conn: &mut Connection, req: &mut Request) -> anyhow::Result<Outcome> {
        let (host, port) = match req.destination() {
            Ok(dest) => dest,
            Err(e) => {
                debug!(peer = %conn.peer(), uri = %req.target, error = %e, "No upstream for request");
                conn.write_response(&Response::bad_request()).await?;
                return Ok(Outcome::Terminated);
            }
        };

        let mut upstream = match self.dispatcher.connect(&host, port).await {
            Ok(upstream) => upstream,
            Err(e @ DispatchError::Loop { .. }) => {
                warn!(peer = %conn.peer(), error = %e, "Refusing to forward to own listener");
                conn.write_response(&Response::loop_detected()).await?;
                return Ok(Outcome::Terminated);
            }
            Err(e) => {
                warn!(peer = %conn.peer(), error = %e, "Forward upstream unreachable");
                conn.write_response(&Response::bad_gateway()).await?;
                return Ok(Outcome::Terminated);
            }
        };

        upstream
            .write_all(&serialize_request_head(req))
            .await
            .with_context(|| format!("sending request head to {}:{}", host, port))?;

        let stats = self
            .dispatcher
            .relay(conn, upstream)
            .await
            .with_context(|| format!("forwarding to {}:{}", host, port))?;

        debug!(
            peer = %conn.peer(),
            method = %req.method,
            host = %host,
            port,
            sent = stats.sent,
            received = stats.received,
            "Request forwarded"
        );
        Ok(Outcome::Terminated)
    }
}
