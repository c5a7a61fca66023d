//! Connection filters
//!
//! A worker runs a fixed, ordered chain of [`Filter`]s over every connection.
//! The [`Filter::Parse`] stage turns the leading bytes into a [`Request`] and
//! runs it through a nested chain of [`HttpFilter`]s:
//!
//! ```text
//! HealthCheck? → Parse → Forwarded? → Certbot? → Auth? → Tunnel → Forward
//! ```
//!
//! Each stage either terminates (it answered the client or took over the
//! connection as a relay) or passes control to the next one. The order is
//! part of the contract: ACME challenges are answered before authentication,
//! and nothing is relayed for a request that failed authentication.

mod auth;
mod certbot;
mod forward;
mod forwarded;
mod healthcheck;
mod parse;
mod tunnel;

use std::sync::Arc;

use crate::auth::CredentialStore;
use crate::config::Config;
use crate::http::connection::Connection;
use crate::http::request::Request;
use crate::proxy::{Dispatcher, LocalAddrs};

pub use auth::AuthFilter;
pub use certbot::CertbotFilter;
pub use forward::ForwardFilter;
pub use forwarded::ForwardedFilter;
pub use healthcheck::HealthCheckFilter;
pub use parse::ParseFilter;
pub use tunnel::TunnelFilter;

/// What a filter decided about the connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    /// Hand the connection to the next filter.
    Continue,
    /// The filter owned the outcome; the chain stops here.
    Terminated,
}

/// Top-level filter, run on the raw connection.
#[derive(Debug)]
pub enum Filter {
    HealthCheck(HealthCheckFilter),
    Parse(ParseFilter),
}

impl Filter {
    pub async fn handle(&self, conn: &mut Connection) -> anyhow::Result<Outcome> {
        match self {
            Filter::HealthCheck(f) => f.handle(conn).await,
            Filter::Parse(f) => f.handle(conn).await,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Filter::HealthCheck(_) => "healthcheck",
            Filter::Parse(_) => "parse",
        }
    }
}

/// Filter run on a parsed request.
#[derive(Debug)]
pub enum HttpFilter {
    Forwarded(ForwardedFilter),
    Certbot(CertbotFilter),
    Auth(AuthFilter),
    Tunnel(TunnelFilter),
    Forward(ForwardFilter),
}

impl HttpFilter {
    pub async fn handle(&self, conn: &mut Connection, req: &mut Request) -> anyhow::Result<Outcome> {
        match self {
            HttpFilter::Forwarded(f) => f.handle(conn, req).await,
            HttpFilter::Certbot(f) => f.handle(conn, req).await,
            HttpFilter::Auth(f) => f.handle(conn, req).await,
            HttpFilter::Tunnel(f) => f.handle(conn, req).await,
            HttpFilter::Forward(f) => f.handle(conn, req).await,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            HttpFilter::Forwarded(_) => "forwarded",
            HttpFilter::Certbot(_) => "certbot",
            HttpFilter::Auth(_) => "auth",
            HttpFilter::Tunnel(_) => "tunnel",
            HttpFilter::Forward(_) => "forward",
        }
    }
}

/// Builds the top-level chain for one worker from the config.
///
/// `credentials` is shared read-only between every worker's Auth stage.
/// `local_addrs` lists the server's own listeners, which the relay stages
/// refuse to connect to.
pub fn chain_from_config(
    config: &Config,
    credentials: Arc<CredentialStore>,
    local_addrs: &LocalAddrs,
) -> Vec<Filter> {
    let filters = &config.filters;
    let dispatcher = Dispatcher::new(config.worker.buffer_size)
        .with_connect_timeout(config.connect_timeout())
        .with_local_addrs(local_addrs.clone());
    let max_header_size = config.worker.max_header_size;

    let mut http_filters = Vec::new();
    if filters.forwarded.enabled {
        http_filters.push(HttpFilter::Forwarded(ForwardedFilter::new()));
    }
    if filters.certbot.enabled {
        let cfc = &filters.certbot;
        http_filters.push(HttpFilter::Certbot(CertbotFilter::new(
            &cfc.hostname,
            &cfc.webroot,
            &cfc.challenge_path,
        )));
    }
    if filters.auth.enabled {
        http_filters.push(HttpFilter::Auth(
            AuthFilter::new(credentials).with_realm(&filters.auth.realm),
        ));
    }
    http_filters.push(HttpFilter::Tunnel(TunnelFilter::new(dispatcher.clone())));
    http_filters.push(HttpFilter::Forward(ForwardFilter::new(dispatcher)));

    let mut chain = Vec::with_capacity(2);
    if filters.healthcheck.enabled {
        chain.push(Filter::HealthCheck(
            HealthCheckFilter::new(&filters.healthcheck.method, &filters.healthcheck.path)
                .with_max_line(max_header_size),
        ));
    }
    chain.push(Filter::Parse(
        ParseFilter::new(http_filters).with_max_header_size(max_header_size),
    ));
    chain
}
