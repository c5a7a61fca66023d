use std::io;

use tracing::debug;

use super::{HttpFilter, Outcome};
use crate::http::connection::Connection;
use crate::http::parser::{parse_request_head, ParseError};
use crate::http::request::Request;
use crate::http::response::{Response, StatusCode};

const DEFAULT_MAX_HEADER_SIZE: usize = 64 * 1024;

/// Parses the request head and runs the HTTP filter chain over it.
#[derive(Debug)]
pub struct ParseFilter {
    filters: Vec<HttpFilter>,
    max_header_size: usize,
}

impl ParseFilter {
    pub fn new(filters: Vec<HttpFilter>) -> Self {
        Self {
            filters,
            max_header_size: DEFAULT_MAX_HEADER_SIZE,
        }
    }

    pub fn with_max_header_size(mut self, max_header_size: usize) -> Self {
        self.max_header_size = max_header_size;
        self
    }

    pub async fn handle(&self, conn: &mut Connection) -> anyhow::Result<Outcome> {
        let mut req = match self.read_request(conn).await? {
            Some(req) => req,
            None => return Ok(Outcome::Terminated),
        };

        debug!(
            peer = %conn.peer(),
            method = %req.method,
            uri = %req.target,
            "Request parsed"
        );

        for filter in &self.filters {
            if filter.handle(conn, &mut req).await? == Outcome::Terminated {
                debug!(peer = %conn.peer(), filter = filter.name(), "Request handled");
                return Ok(Outcome::Terminated);
            }
        }

        Ok(Outcome::Continue)
    }

    /// Reads until a full head is buffered.
    ///
    /// Returns `None` when the client was already answered with an error or
    /// went away before sending anything.
    async fn read_request(&self, conn: &mut Connection) -> anyhow::Result<Option<Request>> {
        loop {
            match parse_request_head(conn.buffered(), self.max_header_size) {
                Ok((req, consumed)) => {
                    conn.consume(consumed);
                    return Ok(Some(req));
                }
                Err(ParseError::Incomplete) => {}
                Err(e @ ParseError::HeadersTooLarge(_)) => {
                    debug!(peer = %conn.peer(), error = %e, "Rejecting request");
                    let resp = Response::error(StatusCode::RequestHeaderFieldsTooLarge);
                    conn.write_response(&resp).await?;
                    return Ok(None);
                }
                Err(e) => {
                    debug!(peer = %conn.peer(), error = %e, "Malformed request");
                    conn.write_response(&Response::bad_request()).await?;
                    return Ok(None);
                }
            }

            match conn.read_more().await {
                Ok(0) if conn.buffered().is_empty() => {
                    debug!(peer = %conn.peer(), "Connection closed before a request was sent");
                    return Ok(None);
                }
                Ok(0) => {
                    debug!(peer = %conn.peer(), "Connection closed mid-request");
                    conn.write_response(&Response::bad_request()).await?;
                    return Ok(None);
                }
                Ok(_) => {}
                Err(e) if e.kind() == io::ErrorKind::TimedOut => {
                    debug!(peer = %conn.peer(), "Timed out waiting for request head");
                    conn.write_response(&Response::error(StatusCode::RequestTimeout)).await?;
                    return Ok(None);
                }
                Err(e) => return Err(e.into()),
            }
        }
    }
}
