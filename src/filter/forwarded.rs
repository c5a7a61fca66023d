use super::Outcome;
use crate::http::connection::{Connection, PeerAddr};
use crate::http::request::Request;

/// Records the client address in `X-Forwarded-For` and `Forwarded`.
#[derive(Debug, Clone, Default)]
pub struct ForwardedFilter;

impl ForwardedFilter {
    pub fn new() -> Self {
        Self
    }

    pub async fn handle(&self, conn: &mut Connection, req: &mut Request) -> anyhow::Result<Outcome> {
        apply(conn.peer(), req);
        Ok(Outcome::Continue)
    }
}

fn apply(peer: &PeerAddr, req: &mut Request) {
    let client = peer.forwarded_for();

    let mut chain: Vec<String> = req
        .headers
        .get_all("X-Forwarded-For")
        .map(str::to_string)
        .collect();
    chain.push(client.clone());
    req.headers.set("X-Forwarded-For", chain.join(", "));

    let node = match peer {
        PeerAddr::Tcp(addr) if addr.is_ipv6() => format!("\"[{}]\"", client),
        PeerAddr::Tcp(_) => format!("\"{}\"", client),
        PeerAddr::Unix(_) => client,
    };
    req.headers.append("Forwarded", format!("for={}", node));
}
