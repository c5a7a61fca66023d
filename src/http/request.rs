use crate::http::parser::ParseError;

/// HTTP request methods.
///
/// Methods the proxy treats specially get their own variant. Any other
/// valid token is kept verbatim in `Other` and forwarded untouched.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Method {
    /// GET - Retrieve a resource
    GET,
    /// POST - Create or submit data
    POST,
    /// PUT - Replace a resource
    PUT,
    /// DELETE - Delete a resource
    DELETE,
    /// HEAD - Like GET but without the response body
    HEAD,
    /// OPTIONS - Describe communication options
    OPTIONS,
    /// PATCH - Partial modification of a resource
    PATCH,
    /// CONNECT - Open a raw tunnel to the target authority
    CONNECT,
    /// Any other method token
    Other(String),
}

impl Method {
    /// Parses an HTTP method from a string.
    ///
    /// Method names are case-sensitive. Returns `None` when `s` is not a
    /// valid token.
    ///
    /// # Example
    ///
    /// ```
    /// # use waypost::http::request::Method;
    /// assert_eq!(Method::from_str("GET"), Some(Method::GET));
    /// assert_eq!(Method::from_str("PURGE"), Some(Method::Other("PURGE".into())));
    /// assert_eq!(Method::from_str("BAD METHOD"), None);
    /// ```
    pub fn from_str(s: &str) -> Option<Self> {
        let method = match s {
            "GET" => Method::GET,
            "POST" => Method::POST,
            "PUT" => Method::PUT,
            "DELETE" => Method::DELETE,
            "HEAD" => Method::HEAD,
            "OPTIONS" => Method::OPTIONS,
            "PATCH" => Method::PATCH,
            "CONNECT" => Method::CONNECT,
            other if is_token(other) => Method::Other(other.to_string()),
            _ => return None,
        };
        Some(method)
    }

    pub fn as_str(&self) -> &str {
        match self {
            Method::GET => "GET",
            Method::POST => "POST",
            Method::PUT => "PUT",
            Method::DELETE => "DELETE",
            Method::HEAD => "HEAD",
            Method::OPTIONS => "OPTIONS",
            Method::PATCH => "PATCH",
            Method::CONNECT => "CONNECT",
            Method::Other(s) => s,
        }
    }
}

impl std::fmt::Display for Method {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Returns true if `s` is a non-empty RFC 7230 token.
pub(crate) fn is_token(s: &str) -> bool {
    !s.is_empty()
        && s.bytes().all(|b| {
            b.is_ascii_alphanumeric() || b"!#$%&'*+-.^_`|~".contains(&b)
        })
}

/// Ordered, multi-valued header collection.
///
/// Lookups are case-insensitive; names keep the casing the client sent and
/// insertion order is preserved when the request is re-serialized.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Headers {
    entries: Vec<(String, String)>,
}

impl Headers {
    pub fn new() -> Self {
        Self::default()
    }

    /// First value for `name`, if any.
    pub fn get(&self, name: &str) -> Option<&str> {
        self.entries
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    /// Every value for `name`, in the order they were received.
    pub fn get_all<'a>(&'a self, name: &'a str) -> impl Iterator<Item = &'a str> + 'a {
        self.entries
            .iter()
            .filter(move |(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    pub fn contains(&self, name: &str) -> bool {
        self.get(name).is_some()
    }

    /// Adds a value without touching existing ones.
    pub fn append(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.entries.push((name.into(), value.into()));
    }

    /// Replaces every value of `name` with a single value, keeping the
    /// position of the first occurrence.
    pub fn set(&mut self, name: impl Into<String>, value: impl Into<String>) {
        let name = name.into();
        let value = value.into();
        match self
            .entries
            .iter()
            .position(|(k, _)| k.eq_ignore_ascii_case(&name))
        {
            Some(pos) => {
                self.entries[pos].1 = value;
                let mut idx = 0;
                self.entries.retain(|(k, _)| {
                    let keep = idx <= pos || !k.eq_ignore_ascii_case(&name);
                    idx += 1;
                    keep
                });
            }
            None => self.entries.push((name, value)),
        }
    }

    /// Removes every value of `name`, returning how many were dropped.
    pub fn remove(&mut self, name: &str) -> usize {
        let before = self.entries.len();
        self.entries.retain(|(k, _)| !k.eq_ignore_ascii_case(name));
        before - self.entries.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// A parsed HTTP request head as received by the proxy.
///
/// The body is never buffered here: whatever follows the head stays in the
/// connection and is relayed to the upstream as raw bytes.
#[derive(Debug, Clone)]
pub struct Request {
    /// The HTTP method (GET, CONNECT, etc.)
    pub method: Method,
    /// The request target exactly as sent: absolute-form URL, `host:port`
    /// authority for CONNECT, or an origin-form path
    pub target: String,
    /// HTTP version (`HTTP/1.0` or `HTTP/1.1`)
    pub version: String,
    /// Request headers
    pub headers: Headers,
}

/// Builder for constructing Request objects.
pub struct RequestBuilder {
    method: Option<Method>,
    target: Option<String>,
    version: Option<String>,
    headers: Headers,
}

impl RequestBuilder {
    pub fn new() -> Self {
        Self {
            method: None,
            target: None,
            version: None,
            headers: Headers::new(),
        }
    }

    pub fn method(mut self, method: Method) -> Self {
        self.method = Some(method);
        self
    }

    pub fn target(mut self, target: impl Into<String>) -> Self {
        self.target = Some(target.into());
        self
    }

    pub fn version(mut self, version: impl Into<String>) -> Self {
        self.version = Some(version.into());
        self
    }

    pub fn header(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.append(key, value);
        self
    }

    pub fn build(self) -> Result<Request, &'static str> {
        Ok(Request {
            method: self.method.ok_or("method missing")?,
            target: self.target.ok_or("target missing")?,
            version: self.version.unwrap_or_else(|| "HTTP/1.1".to_string()),
            headers: self.headers,
        })
    }
}

impl Default for RequestBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl Request {
    /// Retrieves the first value of a header (case-insensitive).
    pub fn header(&self, key: &str) -> Option<&str> {
        self.headers.get(key)
    }

    pub fn is_connect(&self) -> bool {
        self.method == Method::CONNECT
    }

    /// Host the request is addressed to, without the port.
    ///
    /// Taken from the request target when it carries one, otherwise from the
    /// `Host` header.
    pub fn host(&self) -> Option<String> {
        self.destination().ok().map(|(host, _)| host)
    }

    /// Path component of the request target (`/` when absent).
    pub fn path(&self) -> String {
        if self.is_connect() {
            return String::new();
        }
        match url::Url::parse(&self.target) {
            Ok(url) if url.has_host() => url.path().to_string(),
            _ => {
                let path = self.target.split('?').next().unwrap_or_default();
                if path.is_empty() { "/".to_string() } else { path.to_string() }
            }
        }
    }

    /// Target in origin-form (`/path?query`), as sent to an upstream.
    pub fn origin_form(&self) -> String {
        match url::Url::parse(&self.target) {
            Ok(url) if url.has_host() => match url.query() {
                Some(q) => format!("{}?{}", url.path(), q),
                None => url.path().to_string(),
            },
            _ if self.target.is_empty() => "/".to_string(),
            _ => self.target.clone(),
        }
    }

    /// `host[:port]` of an absolute-form target, the port omitted when it
    /// is the scheme default. `None` for CONNECT and origin-form targets.
    pub fn absolute_authority(&self) -> Option<String> {
        if self.is_connect() {
            return None;
        }
        let url = url::Url::parse(&self.target).ok()?;
        let host = url.host_str()?;
        Some(match url.port() {
            Some(port) => format!("{}:{}", host, port),
            None => host.to_string(),
        })
    }

    /// Resolves the upstream `(host, port)` this request must be relayed to.
    ///
    /// - `CONNECT` requires an explicit `host:port` authority.
    /// - Absolute-form targets use the URL's host and the scheme's default
    ///   port when none is given.
    /// - Origin-form targets fall back to the `Host` header on port 80.
    pub fn destination(&self) -> Result<(String, u16), ParseError> {
        if self.is_connect() {
            return split_authority(&self.target, None);
        }

        if let Ok(url) = url::Url::parse(&self.target) {
            if let Some(host) = url.host_str() {
                let port = url
                    .port_or_known_default()
                    .ok_or(ParseError::InvalidTarget)?;
                return Ok((strip_brackets(host).to_string(), port));
            }
        }

        if !self.target.starts_with('/') && self.target != "*" {
            return Err(ParseError::InvalidTarget);
        }

        let host = self.header("Host").ok_or(ParseError::InvalidTarget)?;
        split_authority(host, Some(80))
    }
}

/// Splits `host:port`, handling bracketed IPv6 literals.
fn split_authority(authority: &str, default_port: Option<u16>) -> Result<(String, u16), ParseError> {
    let authority = authority.trim();
    if authority.is_empty() {
        return Err(ParseError::InvalidTarget);
    }

    let (host, port) = if let Some(rest) = authority.strip_prefix('[') {
        let (host, after) = rest.split_once(']').ok_or(ParseError::InvalidTarget)?;
        match after.strip_prefix(':') {
            Some(port) => (host, Some(port)),
            None if after.is_empty() => (host, None),
            None => return Err(ParseError::InvalidTarget),
        }
    } else {
        match authority.rsplit_once(':') {
            Some((host, port)) => (host, Some(port)),
            None => (authority, None),
        }
    };

    if host.is_empty() {
        return Err(ParseError::InvalidTarget);
    }

    let port = match port {
        Some(p) => p.parse::<u16>().map_err(|_| ParseError::InvalidTarget)?,
        None => default_port.ok_or(ParseError::InvalidTarget)?,
    };

    Ok((host.to_string(), port))
}

fn strip_brackets(host: &str) -> &str {
    host.strip_prefix('[')
        .and_then(|h| h.strip_suffix(']'))
        .unwrap_or(host)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn authority_with_ipv6_literal() {
        assert_eq!(
            split_authority("[::1]:8443", None).unwrap(),
            ("::1".to_string(), 8443)
        );
    }

    #[test]
    fn authority_without_port_uses_default() {
        assert_eq!(
            split_authority("example.com", Some(80)).unwrap(),
            ("example.com".to_string(), 80)
        );
        assert!(split_authority("example.com", None).is_err());
    }
}
