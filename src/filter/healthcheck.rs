use tracing::debug;

use super::Outcome;
use crate::http::connection::Connection;
use crate::http::parser::{parse_request_line, ParseError};
use crate::http::response::Response;

/// Answers health probes straight from the raw request line.
///
/// Runs before parsing, so a probe never allocates a request or reaches the
/// HTTP filters. Bytes read here stay buffered for the parse stage.
#[derive(Debug, Clone)]
pub struct HealthCheckFilter {
    method: String,
    path: String,
    max_line: usize,
}

impl HealthCheckFilter {
    pub fn new(method: &str, path: &str) -> Self {
        Self {
            method: method.to_string(),
            path: path.to_string(),
            max_line: 64 * 1024,
        }
    }

    pub fn with_max_line(mut self, max_line: usize) -> Self {
        self.max_line = max_line;
        self
    }

    pub async fn handle(&self, conn: &mut Connection) -> anyhow::Result<Outcome> {
        loop {
            let matched = match parse_request_line(conn.buffered()) {
                Ok((method, target, _)) => Some(method == self.method && target == self.path),
                Err(ParseError::Incomplete) if conn.buffered().len() < self.max_line => None,
                Err(_) => Some(false),
            };

            match matched {
                Some(true) => {
                    debug!(peer = %conn.peer(), "Health check");
                    conn.write_response(&Response::ok("OK\n")).await?;
                    return Ok(Outcome::Terminated);
                }
                Some(false) => return Ok(Outcome::Continue),
                None => {}
            }

            // Read failures are left for the parse stage to report.
            match conn.read_more().await {
                Ok(0) | Err(_) => return Ok(Outcome::Continue),
                Ok(_) => {}
            }
        }
    }
}
