use std::sync::Arc;

use tracing::debug;

use super::Outcome;
use crate::auth::{parse_basic_credentials, CredentialStore};
use crate::http::connection::Connection;
use crate::http::request::Request;
use crate::http::response::Response;

const PROXY_AUTHORIZATION: &str = "Proxy-Authorization";
const DEFAULT_REALM: &str = "waypost";

/// Requires valid Basic proxy credentials.
///
/// On success the `Proxy-Authorization` header is removed so credentials
/// are never relayed upstream.
#[derive(Debug, Clone)]
pub struct AuthFilter {
    credentials: Arc<CredentialStore>,
    realm: String,
}

impl AuthFilter {
    pub fn new(credentials: Arc<CredentialStore>) -> Self {
        Self {
            credentials,
            realm: DEFAULT_REALM.to_string(),
        }
    }

    pub fn with_realm(mut self, realm: impl Into<String>) -> Self {
        self.realm = realm.into();
        self
    }

    pub async fn handle(&self, conn: &mut Connection, req: &mut Request) -> anyhow::Result<Outcome> {
        let credentials = req.header(PROXY_AUTHORIZATION).and_then(parse_basic_credentials);

        match credentials {
            Some((user, pass)) if self.credentials.verify(&user, &pass) => {
                debug!(peer = %conn.peer(), user = %user, "Authenticated");
                req.headers.remove(PROXY_AUTHORIZATION);
                Ok(Outcome::Continue)
            }
            credentials => {
                debug!(
                    peer = %conn.peer(),
                    user = credentials.as_ref().map(|(u, _)| u.as_str()).unwrap_or("-"),
                    "Proxy authentication failed"
                );
                conn.write_response(&Response::proxy_auth_required(&self.realm))
                    .await?;
                Ok(Outcome::Terminated)
            }
        }
    }
}
