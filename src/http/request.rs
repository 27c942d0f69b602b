//! HTTP/1.1 requests with absolute URLs.
//!
//! Requests reach the worker from two places: the proxy host parses them off
//! the wire with [`Request::parse`], and lifecycle code builds them directly
//! with [`Request::get`] for manifest URLs.

use bytes::Bytes;
use thiserror::Error;
use url::Url;

use super::{Headers, Method};

/// Errors that can occur while parsing an HTTP/1.1 request.
#[derive(Debug, Error)]
pub enum RequestError {
    #[error("request is incomplete — more data needed")]
    Incomplete,

    #[error("HTTP parse error: {0}")]
    Parse(#[from] httparse::Error),

    #[error("missing required field: {field}")]
    MissingField { field: &'static str },

    #[error("invalid request target `{target}`: {source}")]
    InvalidTarget {
        target: String,
        #[source]
        source: url::ParseError,
    },
}

/// A request addressed to an absolute URL.
///
/// # Examples
///
/// ```
/// use shellcache::http::Request;
///
/// let raw = b"GET /assets/presidents/lincoln.png HTTP/1.1\r\nHost: localhost:8080\r\n\r\n";
/// let (request, _offset) = Request::parse(raw).unwrap();
///
/// assert_eq!(request.method().as_str(), "GET");
/// assert_eq!(request.path(), "/assets/presidents/lincoln.png");
/// assert_eq!(request.url().as_str(), "http://localhost:8080/assets/presidents/lincoln.png");
/// ```
#[derive(Debug, Clone)]
pub struct Request {
    method: Method,
    url: Url,
    /// HTTP minor version: 0 for HTTP/1.0, 1 for HTTP/1.1.
    version: u8,
    headers: Headers,
    body: Bytes,
}

impl Request {
    /// Maximum number of headers we support per request.
    const MAX_HEADERS: usize = 64;

    /// Builds a request with an empty body.
    pub fn new(method: Method, url: Url) -> Self {
        Self {
            method,
            url,
            version: 1,
            headers: Headers::new(),
            body: Bytes::new(),
        }
    }

    /// Shorthand for a `GET` request, the only kind the cache ever stores.
    pub fn get(url: Url) -> Self {
        Self::new(Method::Get, url)
    }

    /// Appends a header.
    #[must_use]
    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(name, value);
        self
    }

    #[must_use]
    pub fn body(mut self, body: impl Into<Bytes>) -> Self {
        self.body = body.into();
        self
    }

    /// Parse a raw HTTP/1.1 request from a byte slice.
    ///
    /// The request target may be absolute-form (`GET http://host/path`, as
    /// sent to a forward proxy) or origin-form (`GET /path`), in which case
    /// the URL is rebuilt from the `Host` header over plain `http`.
    ///
    /// Returns the request and the byte offset at which the body begins. The
    /// body is whatever follows that offset in `buf`; callers wait for
    /// `Content-Length` bytes before parsing.
    ///
    /// # Errors
    ///
    /// - [`RequestError::Incomplete`] — the header block has not fully arrived.
    /// - [`RequestError::Parse`] — malformed request.
    /// - [`RequestError::MissingField`] — no method, target, version or `Host`.
    /// - [`RequestError::InvalidTarget`] — the target does not form a valid URL.
    pub fn parse(buf: &[u8]) -> Result<(Self, usize), RequestError> {
        let mut headers = [httparse::EMPTY_HEADER; Self::MAX_HEADERS];
        let mut raw_req = httparse::Request::new(&mut headers);

        let body_offset = match raw_req.parse(buf)? {
            httparse::Status::Complete(offset) => offset,
            httparse::Status::Partial => return Err(RequestError::Incomplete),
        };

        let method: Method = match raw_req
            .method
            .ok_or(RequestError::MissingField { field: "method" })?
            .parse()
        {
            Ok(method) => method,
            Err(never) => match never {},
        };

        let target = raw_req
            .path
            .ok_or(RequestError::MissingField { field: "path" })?;

        let version = raw_req
            .version
            .ok_or(RequestError::MissingField { field: "version" })?;

        let mut header_map = Headers::with_capacity(raw_req.headers.len());
        for header in raw_req.headers.iter() {
            if let Ok(value) = std::str::from_utf8(header.value) {
                header_map.insert(header.name, value);
            }
        }

        let url = resolve_target(target, &header_map)?;
        let body = Bytes::copy_from_slice(&buf[body_offset..]);

        Ok((
            Self {
                method,
                url,
                version,
                headers: header_map,
                body,
            },
            body_offset,
        ))
    }

    pub fn method(&self) -> &Method {
        &self.method
    }

    /// Returns the absolute URL this request addresses.
    pub fn url(&self) -> &Url {
        &self.url
    }

    /// Returns the URL path (without the query string).
    pub fn path(&self) -> &str {
        self.url.path()
    }

    /// Returns the HTTP minor version number (0 = HTTP/1.0, 1 = HTTP/1.1).
    pub fn version(&self) -> u8 {
        self.version
    }

    pub fn headers(&self) -> &Headers {
        &self.headers
    }

    pub fn body_bytes(&self) -> &Bytes {
        &self.body
    }

    /// Returns `true` if the connection should be kept alive after this request.
    ///
    /// HTTP/1.1 defaults to keep-alive. HTTP/1.0 defaults to close unless
    /// `Connection: keep-alive` is explicitly set.
    pub fn is_keep_alive(&self) -> bool {
        match self.headers.get("connection") {
            Some(conn) => conn.eq_ignore_ascii_case("keep-alive"),
            None => self.version == 1,
        }
    }

    /// Returns the value of the `Content-Length` header parsed as a `usize`, if present.
    pub fn content_length(&self) -> Option<usize> {
        self.headers.get("content-length")?.parse().ok()
    }

    /// Returns the bytes to send upstream: an HTTP/1.0 request line in origin
    /// form, the end-to-end headers, a fresh `Host`, and `Connection: close`.
    ///
    /// HTTP/1.0 keeps the upstream from answering with chunked encoding, so
    /// the response body is simply everything up to EOF.
    pub fn to_upstream_bytes(&self) -> Vec<u8> {
        let mut target = self.url.path().to_owned();
        if let Some(query) = self.url.query() {
            target.push('?');
            target.push_str(query);
        }

        let mut headers = self.headers.end_to_end();
        headers.remove("host");
        headers.remove("proxy-connection");

        let host = match (self.url.host_str(), self.url.port()) {
            (Some(host), Some(port)) => format!("{host}:{port}"),
            (Some(host), None) => host.to_owned(),
            (None, _) => String::new(),
        };

        let mut out = format!("{} {} HTTP/1.0\r\nHost: {host}\r\n", self.method, target);
        out.push_str(&headers.to_string());
        if !self.body.is_empty() {
            out.push_str(&format!("Content-Length: {}\r\n", self.body.len()));
        }
        out.push_str("Connection: close\r\n\r\n");

        let mut bytes = out.into_bytes();
        bytes.extend_from_slice(&self.body);
        bytes
    }
}

fn resolve_target(target: &str, headers: &Headers) -> Result<Url, RequestError> {
    let invalid = |source| RequestError::InvalidTarget {
        target: target.to_owned(),
        source,
    };

    if target.starts_with('/') {
        let host = headers
            .get("host")
            .ok_or(RequestError::MissingField { field: "host" })?;
        let base = Url::parse(&format!("http://{host}/")).map_err(invalid)?;
        return base.join(target).map_err(invalid);
    }

    Url::parse(target).map_err(invalid)
}
