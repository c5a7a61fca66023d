use crate::http::request::{is_token, Headers, Method, Request};
use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ParseError {
    #[error("request is malformed")]
    InvalidRequest,
    #[error("invalid request method")]
    InvalidMethod,
    #[error("invalid header line")]
    InvalidHeader,
    #[error("unsupported protocol version")]
    InvalidVersion,
    #[error("request target cannot be resolved to an upstream")]
    InvalidTarget,
    #[error("request head exceeds {0} bytes")]
    HeadersTooLarge(usize),
    #[error("request head is incomplete")]
    Incomplete,
}

/// Splits the request line out of `buf` without allocating.
///
/// Returns `(method, target, version)` once a full line is buffered.
pub fn parse_request_line(buf: &[u8]) -> Result<(&str, &str, &str), ParseError> {
    let line_end = find_line_end(buf).ok_or(ParseError::Incomplete)?;
    let line = std::str::from_utf8(&buf[..line_end]).map_err(|_| ParseError::InvalidRequest)?;

    let mut parts = line.split(' ');
    let method = parts.next().ok_or(ParseError::InvalidRequest)?;
    let target = parts.next().ok_or(ParseError::InvalidRequest)?;
    let version = parts.next().ok_or(ParseError::InvalidRequest)?;
    if parts.next().is_some() || target.is_empty() {
        return Err(ParseError::InvalidRequest);
    }

    Ok((method, target, version))
}

/// Parses a request head (request line and header block) from `buf`.
///
/// On success returns the request and the number of bytes the head occupied;
/// anything after that offset belongs to the body or the tunneled stream.
/// `max_size` bounds how far the parser looks for the end of the head.
pub fn parse_request_head(buf: &[u8], max_size: usize) -> Result<(Request, usize), ParseError> {
    let headers_end = match find_headers_end(buf) {
        Some(end) if end + 4 <= max_size => end,
        Some(_) => return Err(ParseError::HeadersTooLarge(max_size)),
        None if buf.len() >= max_size => return Err(ParseError::HeadersTooLarge(max_size)),
        None => return Err(ParseError::Incomplete),
    };

    let (method_str, target, version) = parse_request_line(buf)?;

    let method = Method::from_str(method_str).ok_or(ParseError::InvalidMethod)?;
    if version != "HTTP/1.1" && version != "HTTP/1.0" {
        return Err(ParseError::InvalidVersion);
    }

    let headers_str = std::str::from_utf8(&buf[..headers_end])
        .map_err(|_| ParseError::InvalidRequest)?;

    let mut headers = Headers::new();
    for line in headers_str.split("\r\n").skip(1) {
        if line.is_empty() {
            continue;
        }

        let (key, value) = line.split_once(':').ok_or(ParseError::InvalidHeader)?;
        if !is_token(key) {
            return Err(ParseError::InvalidHeader);
        }

        headers.append(key, value.trim());
    }

    let request = Request {
        method,
        target: target.to_string(),
        version: version.to_string(),
        headers,
    };

    Ok((request, headers_end + 4))
}

fn find_headers_end(buf: &[u8]) -> Option<usize> {
    buf.windows(4).position(|w| w == b"\r\n\r\n")
}

fn find_line_end(buf: &[u8]) -> Option<usize> {
    buf.windows(2).position(|w| w == b"\r\n")
}
