use tokio::io::{AsyncWrite, AsyncWriteExt};

use crate::http::request::Request;
use crate::http::response::Response;

const HTTP_VERSION: &str = "HTTP/1.1";

/// Hop-by-hop headers that must not travel past the proxy.
const HOP_BY_HOP: &[&str] = &[
    "Connection",
    "Keep-Alive",
    "Proxy-Authorization",
    "Proxy-Connection",
];

pub fn serialize_response(resp: &Response) -> Vec<u8> {
    let mut buf = Vec::new();

    let status_line = format!(
        "{} {} {}\r\n",
        HTTP_VERSION,
        resp.status.as_u16(),
        resp.reason_phrase()
    );
    buf.extend_from_slice(status_line.as_bytes());

    for (k, v) in &resp.headers {
        buf.extend_from_slice(k.as_bytes());
        buf.extend_from_slice(b": ");
        buf.extend_from_slice(v.as_bytes());
        buf.extend_from_slice(b"\r\n");
    }

    buf.extend_from_slice(b"\r\n");
    buf.extend_from_slice(&resp.body);

    buf
}

/// Re-serializes a proxied request head for the upstream.
///
/// The target is rewritten to origin-form, hop-by-hop headers are dropped,
/// and `Connection: close` is appended so the upstream ends the exchange
/// after a single response. For an absolute-form target the `Host` header
/// is rebuilt from the target's authority, replacing whatever the client
/// sent.
pub fn serialize_request_head(request: &Request) -> Vec<u8> {
    let mut buf = Vec::new();

    buf.extend_from_slice(
        format!(
            "{} {} {}\r\n",
            request.method,
            request.origin_form(),
            request.version
        )
        .as_bytes(),
    );

    let authority = request.absolute_authority();
    if let Some(authority) = &authority {
        buf.extend_from_slice(format!("Host: {}\r\n", authority).as_bytes());
    }

    for (key, value) in request.headers.iter() {
        if HOP_BY_HOP.iter().any(|h| h.eq_ignore_ascii_case(key)) {
            continue;
        }
        if authority.is_some() && key.eq_ignore_ascii_case("Host") {
            continue;
        }
        buf.extend_from_slice(format!("{}: {}\r\n", key, value).as_bytes());
    }

    buf.extend_from_slice(b"Connection: close\r\n\r\n");
    buf
}

pub struct ResponseWriter {
    buffer: Vec<u8>,
    written: usize,
}

impl ResponseWriter {
    pub fn new(response: &Response) -> Self {
        Self {
            buffer: serialize_response(response),
            written: 0,
        }
    }

    pub async fn write_to_stream<W>(&mut self, stream: &mut W) -> anyhow::Result<()>
    where
        W: AsyncWrite + Unpin + ?Sized,
    {
        while self.written < self.buffer.len() {
            let n = stream.write(&self.buffer[self.written..]).await?;

            if n == 0 {
                return Err(anyhow::anyhow!("connection closed while writing"));
            }

            self.written += n;
        }

        stream.flush().await?;
        Ok(())
    }
}
