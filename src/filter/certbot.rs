use std::path::{Path, PathBuf};

use tracing::{debug, warn};

use super::Outcome;
use crate::http::connection::Connection;
use crate::http::request::{Method, Request};
use crate::http::response::{Response, ResponseBuilder, StatusCode};

/// Serves ACME HTTP-01 challenge files from a webroot.
///
/// A request for `http://<hostname><challenge_path><token>` is answered with
/// the contents of `<webroot><challenge_path><token>`, without
/// authentication. Anything else passes through untouched.
#[derive(Debug, Clone)]
pub struct CertbotFilter {
    hostname: String,
    webroot: PathBuf,
    challenge_path: String,
}

impl CertbotFilter {
    pub fn new(hostname: &str, webroot: impl AsRef<Path>, challenge_path: &str) -> Self {
        let mut challenge_path = challenge_path.to_string();
        if !challenge_path.ends_with('/') {
            challenge_path.push('/');
        }
        Self {
            hostname: hostname.to_string(),
            webroot: webroot.as_ref().to_path_buf(),
            challenge_path,
        }
    }

    pub async fn handle(&self, conn: &mut Connection, req: &mut Request) -> anyhow::Result<Outcome> {
        if req.method != Method::GET && req.method != Method::HEAD {
            return Ok(Outcome::Continue);
        }

        let host_matches = req
            .host()
            .is_some_and(|h| h.eq_ignore_ascii_case(&self.hostname));
        if !host_matches {
            return Ok(Outcome::Continue);
        }

        let path = req.path();
        let Some(token) = path.strip_prefix(&self.challenge_path) else {
            return Ok(Outcome::Continue);
        };

        let response = match self.challenge_file(token) {
            Some(file) => match tokio::fs::read(&file).await {
                Ok(content) => {
                    debug!(peer = %conn.peer(), token, "Serving ACME challenge");
                    challenge_response(content, req.method == Method::HEAD)
                }
                Err(e) => {
                    warn!(file = %file.display(), error = %e, "ACME challenge not readable");
                    Response::not_found()
                }
            },
            None => Response::not_found(),
        };

        conn.write_response(&response).await?;
        Ok(Outcome::Terminated)
    }

    /// Maps a token to its file, rejecting anything that is not a single
    /// plain path segment.
    fn challenge_file(&self, token: &str) -> Option<PathBuf> {
        let valid = !token.is_empty()
            && token != "."
            && token != ".."
            && !token.contains(['/', '\\', '\0']);
        if !valid {
            return None;
        }

        Some(
            self.webroot
                .join(self.challenge_path.trim_matches('/'))
                .join(token),
        )
    }
}

fn challenge_response(content: Vec<u8>, head: bool) -> Response {
    let builder = ResponseBuilder::new(StatusCode::Ok)
        .header("Content-Type", "text/plain")
        .header("Content-Length", content.len().to_string());
    if head {
        builder.build()
    } else {
        builder.body(content).build()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn token_must_be_a_single_segment() {
        let filter = CertbotFilter::new("example.com", "/srv/www", "/.well-known/acme-challenge");

        assert_eq!(
            filter.challenge_file("abc123"),
            Some(PathBuf::from("/srv/www/.well-known/acme-challenge/abc123"))
        );
        assert_eq!(filter.challenge_file(""), None);
        assert_eq!(filter.challenge_file(".."), None);
        assert_eq!(filter.challenge_file("../secret"), None);
    }
}
