/// HTTP status codes the proxy produces itself.
///
/// Upstream responses are never parsed; they are relayed as raw bytes, so
/// only statuses generated locally appear here:
/// - `Ok` (200): health probe, ACME challenge, established tunnel
/// - `BadRequest` (400): malformed request or unresolvable target
/// - `NotFound` (404): unknown ACME challenge token
/// - `ProxyAuthenticationRequired` (407): missing or wrong credentials
/// - `RequestTimeout` (408): request head not received in time
/// - `RequestHeaderFieldsTooLarge` (431): request head over the size limit
/// - `BadGateway` (502): upstream unreachable
/// - `LoopDetected` (508): target is one of the proxy's own listeners
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatusCode {
    /// 200 OK
    Ok,
    /// 400 Bad Request
    BadRequest,
    /// 404 Not Found
    NotFound,
    /// 407 Proxy Authentication Required
    ProxyAuthenticationRequired,
    /// 408 Request Timeout
    RequestTimeout,
    /// 431 Request Header Fields Too Large
    RequestHeaderFieldsTooLarge,
    /// 502 Bad Gateway
    BadGateway,
    /// 508 Loop Detected
    LoopDetected,
}

impl StatusCode {
    /// Returns the numeric HTTP status code.
    ///
    /// # Example
    ///
    /// ```
    /// # use waypost::http::response::StatusCode;
    /// assert_eq!(StatusCode::Ok.as_u16(), 200);
    /// assert_eq!(StatusCode::ProxyAuthenticationRequired.as_u16(), 407);
    /// ```
    pub fn as_u16(&self) -> u16 {
        match self {
            StatusCode::Ok => 200,
            StatusCode::BadRequest => 400,
            StatusCode::NotFound => 404,
            StatusCode::ProxyAuthenticationRequired => 407,
            StatusCode::RequestTimeout => 408,
            StatusCode::RequestHeaderFieldsTooLarge => 431,
            StatusCode::BadGateway => 502,
            StatusCode::LoopDetected => 508,
        }
    }

    /// Returns the standard HTTP reason phrase for this status code.
    pub fn reason_phrase(&self) -> &'static str {
        match self {
            StatusCode::Ok => "OK",
            StatusCode::BadRequest => "Bad Request",
            StatusCode::NotFound => "Not Found",
            StatusCode::ProxyAuthenticationRequired => "Proxy Authentication Required",
            StatusCode::RequestTimeout => "Request Timeout",
            StatusCode::RequestHeaderFieldsTooLarge => "Request Header Fields Too Large",
            StatusCode::BadGateway => "Bad Gateway",
            StatusCode::LoopDetected => "Loop Detected",
        }
    }
}

/// Represents a complete HTTP response ready to be sent to a client.
#[derive(Debug)]
pub struct Response {
    /// The HTTP status code
    pub status: StatusCode,
    /// Reason phrase override; `None` uses the status code's standard phrase
    pub reason: Option<&'static str>,
    /// HTTP headers in the order they will be written
    pub headers: Vec<(String, String)>,
    /// Response body as bytes
    pub body: Vec<u8>,
}

/// Builder for constructing HTTP responses in a fluent style.
///
/// # Example
///
/// ```
/// # use waypost::http::response::{ResponseBuilder, StatusCode};
/// let response = ResponseBuilder::new(StatusCode::Ok)
///     .header("Content-Type", "text/plain")
///     .body(b"ok".to_vec())
///     .build();
/// assert_eq!(response.header("Content-Length"), Some("2"));
/// ```
pub struct ResponseBuilder {
    status: StatusCode,
    reason: Option<&'static str>,
    headers: Vec<(String, String)>,
    body: Vec<u8>,
    content_length: bool,
}

impl ResponseBuilder {
    /// Creates a new response builder with the specified status code.
    pub fn new(status: StatusCode) -> Self {
        Self {
            status,
            reason: None,
            headers: Vec::new(),
            body: Vec::new(),
            content_length: true,
        }
    }

    pub fn reason(mut self, reason: &'static str) -> Self {
        self.reason = Some(reason);
        self
    }

    /// Adds or replaces a header.
    pub fn header(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        let key = key.into();
        let value = value.into();
        match self.headers.iter_mut().find(|(k, _)| k.eq_ignore_ascii_case(&key)) {
            Some(entry) => entry.1 = value,
            None => self.headers.push((key, value)),
        }
        self
    }

    /// Sets the response body.
    pub fn body(mut self, body: Vec<u8>) -> Self {
        self.body = body;
        self
    }

    /// Skips the automatic Content-Length header.
    ///
    /// Used for the CONNECT success line, which must not carry framing
    /// headers because the connection turns into a raw byte pipe.
    pub fn without_content_length(mut self) -> Self {
        self.content_length = false;
        self
    }

    /// Builds the final Response.
    ///
    /// Adds a Content-Length header based on body size unless one is
    /// already present or it was disabled.
    pub fn build(mut self) -> Response {
        if self.content_length
            && !self
                .headers
                .iter()
                .any(|(k, _)| k.eq_ignore_ascii_case("Content-Length"))
        {
            self.headers
                .push(("Content-Length".to_string(), self.body.len().to_string()));
        }

        Response {
            status: self.status,
            reason: self.reason,
            headers: self.headers,
            body: self.body,
        }
    }
}

impl Response {
    pub fn header(&self, key: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(key))
            .map(|(_, v)| v.as_str())
    }

    pub fn reason_phrase(&self) -> &'static str {
        self.reason.unwrap_or_else(|| self.status.reason_phrase())
    }

    /// Creates a simple 200 OK response with the given body.
    pub fn ok(body: impl Into<Vec<u8>>) -> Self {
        ResponseBuilder::new(StatusCode::Ok)
            .body(body.into())
            .build()
    }

    /// Plain-text error response that closes the connection.
    pub fn error(status: StatusCode) -> Self {
        let body = format!("{} {}\n", status.as_u16(), status.reason_phrase());
        ResponseBuilder::new(status)
            .header("Content-Type", "text/plain; charset=utf-8")
            .header("Connection", "close")
            .body(body.into_bytes())
            .build()
    }

    /// Creates a 400 Bad Request response.
    pub fn bad_request() -> Self {
        Self::error(StatusCode::BadRequest)
    }

    /// Creates a 404 Not Found response.
    pub fn not_found() -> Self {
        Self::error(StatusCode::NotFound)
    }

    /// Creates a 502 Bad Gateway response.
    pub fn bad_gateway() -> Self {
        Self::error(StatusCode::BadGateway)
    }

    /// Creates a 508 response for requests aimed back at the proxy.
    pub fn loop_detected() -> Self {
        Self::error(StatusCode::LoopDetected)
    }

    /// Creates a 407 challenge asking for Basic proxy credentials.
    pub fn proxy_auth_required(realm: &str) -> Self {
        let status = StatusCode::ProxyAuthenticationRequired;
        let body = format!("{} {}\n", status.as_u16(), status.reason_phrase());
        ResponseBuilder::new(status)
            .header("Proxy-Authenticate", format!("Basic realm=\"{}\"", realm))
            .header("Content-Type", "text/plain; charset=utf-8")
            .header("Connection", "close")
            .body(body.into_bytes())
            .build()
    }

    /// The status line sent before a CONNECT tunnel starts relaying.
    pub fn connection_established() -> Self {
        ResponseBuilder::new(StatusCode::Ok)
            .reason("Connection Established")
            .without_content_length()
            .build()
    }
}
