//! HTTP responses: built by the host, parsed from upstream, stored in caches.
//!
//! The body is a [`Bytes`] buffer, so cloning a response for the cache is a
//! reference-count bump rather than a copy of the payload.

use bytes::{BufMut, Bytes, BytesMut};
use thiserror::Error;

use super::{Headers, Method, StatusCode};

/// Errors that can occur while parsing an upstream HTTP response.
#[derive(Debug, Error)]
pub enum ResponseError {
    #[error("response is incomplete — more data needed")]
    Incomplete,

    #[error("HTTP parse error: {0}")]
    Parse(#[from] httparse::Error),

    #[error("missing status code")]
    MissingStatus,

    #[error("body is shorter than Content-Length: expected {expected} bytes, got {actual}")]
    TruncatedBody { expected: usize, actual: usize },
}

/// An HTTP/1.1 response.
///
/// # Examples
///
/// ```
/// use shellcache::http::{Response, StatusCode};
///
/// let response = Response::new(StatusCode::Ok)
///     .header("Content-Type", "text/html; charset=utf-8")
///     .body("<h1>Oval Path</h1>");
///
/// let cached = response.clone();
/// assert_eq!(cached.body_bytes(), response.body_bytes());
///
/// let text = String::from_utf8(response.into_bytes().to_vec()).unwrap();
/// assert!(text.starts_with("HTTP/1.1 200 OK\r\n"));
/// assert!(text.contains("Content-Length: 18\r\n"));
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Response {
    status: StatusCode,
    headers: Headers,
    body: Bytes,
    keep_alive: bool,
}

impl Response {
    const MAX_HEADERS: usize = 64;

    /// Creates a new response with the given status and an empty body.
    pub fn new(status: StatusCode) -> Self {
        Self {
            status,
            headers: Headers::new(),
            body: Bytes::new(),
            keep_alive: true,
        }
    }

    /// Appends a response header. Multiple calls with the same name are additive.
    #[must_use]
    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(name, value);
        self
    }

    /// Sets the response body. `Content-Length` is written by [`into_bytes`](Self::into_bytes).
    #[must_use]
    pub fn body(mut self, body: impl Into<Bytes>) -> Self {
        self.body = body.into();
        self
    }

    /// Controls whether `Connection: keep-alive` or `Connection: close` is written.
    #[must_use]
    pub fn keep_alive(mut self, keep_alive: bool) -> Self {
        self.keep_alive = keep_alive;
        self
    }

    pub fn status(&self) -> StatusCode {
        self.status
    }

    /// `true` for a 2xx status.
    pub fn is_ok(&self) -> bool {
        self.status.is_success()
    }

    pub fn headers(&self) -> &Headers {
        &self.headers
    }

    pub fn body_bytes(&self) -> &Bytes {
        &self.body
    }

    /// Parses a complete upstream response held in `buf`.
    ///
    /// `buf` must contain the entire message: the upstream was asked to close
    /// the connection, so the caller reads to EOF first. When the upstream
    /// sent `Content-Length` the body is cut to that length; otherwise the
    /// body is everything after the header block. Replies to `HEAD` and
    /// 1xx/204/304 statuses have no body whatever `Content-Length` says,
    /// which is why the request `method` is needed. Hop-by-hop headers and
    /// `Content-Length` are dropped so the stored response can be re-served
    /// on any connection.
    ///
    /// # Errors
    ///
    /// - [`ResponseError::Incomplete`] — the header block never finished.
    /// - [`ResponseError::Parse`] — malformed status line or headers.
    /// - [`ResponseError::TruncatedBody`] — fewer bytes than `Content-Length`.
    pub fn parse(buf: &[u8], method: &Method) -> Result<Self, ResponseError> {
        let mut headers = [httparse::EMPTY_HEADER; Self::MAX_HEADERS];
        let mut raw = httparse::Response::new(&mut headers);

        let body_offset = match raw.parse(buf)? {
            httparse::Status::Complete(offset) => offset,
            httparse::Status::Partial => return Err(ResponseError::Incomplete),
        };

        let status = StatusCode::from(raw.code.ok_or(ResponseError::MissingStatus)?);

        let mut header_map = Headers::with_capacity(raw.headers.len());
        for header in raw.headers.iter() {
            if let Ok(value) = std::str::from_utf8(header.value) {
                header_map.insert(header.name, value);
            }
        }

        let available = &buf[body_offset..];
        let declared = header_map
            .get("content-length")
            .and_then(|v| v.trim().parse::<usize>().ok());
        let body = if *method == Method::Head || !status.permits_body() {
            &[][..]
        } else {
            match declared {
                Some(expected) if available.len() < expected => {
                    return Err(ResponseError::TruncatedBody {
                        expected,
                        actual: available.len(),
                    });
                }
                Some(expected) => &available[..expected],
                None => available,
            }
        };

        Ok(Self {
            status,
            headers: header_map.end_to_end(),
            body: Bytes::copy_from_slice(body),
            keep_alive: true,
        })
    }

    /// Serializes the response into HTTP/1.1 wire format.
    ///
    /// Automatically adds `Content-Length` and `Connection`, plus a plain-text
    /// `Content-Type` when the body is non-empty and none was set.
    pub fn into_bytes(mut self) -> BytesMut {
        let content_length = self.body.len();

        if !self.body.is_empty() && !self.headers.contains("content-type") {
            self.headers
                .insert("Content-Type", "text/plain; charset=utf-8");
        }

        let connection = if self.keep_alive {
            "keep-alive"
        } else {
            "close"
        };
        self.headers.set("Connection", connection);

        let estimated_size = 128 + self.headers.len() * 64 + content_length;
        let mut buf = BytesMut::with_capacity(estimated_size);

        buf.put(
            format!(
                "HTTP/1.1 {} {}\r\n",
                self.status.as_u16(),
                self.status.canonical_reason()
            )
            .as_bytes(),
        );

        for (name, value) in self.headers.iter() {
            buf.put(format!("{name}: {value}\r\n").as_bytes());
        }
        buf.put(format!("Content-Length: {content_length}\r\n").as_bytes());
        buf.put(&b"\r\n"[..]);

        if !self.body.is_empty() {
            buf.put(self.body);
        }

        buf
    }
}

impl Default for Response {
    fn default() -> Self {
        Self::new(StatusCode::Ok)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn to_string(bytes: BytesMut) -> String {
        String::from_utf8(bytes.to_vec()).unwrap()
    }

    #[test]
    fn simple_ok_response() {
        let r = Response::new(StatusCode::Ok).body("Hello");
        let s = to_string(r.into_bytes());
        assert!(s.starts_with("HTTP/1.1 200 OK\r\n"));
        assert!(s.contains("Content-Length: 5\r\n"));
        assert!(s.ends_with("\r\n\r\nHello"));
    }

    #[test]
    fn connection_close() {
        let r = Response::new(StatusCode::BadGateway).keep_alive(false);
        let s = to_string(r.into_bytes());
        assert!(s.starts_with("HTTP/1.1 502 Bad Gateway\r\n"));
        assert!(s.contains("Connection: close\r\n"));
        assert!(!s.contains("Content-Type"));
    }

    #[test]
    fn parse_respects_content_length() {
        let raw = b"HTTP/1.0 200 OK\r\nContent-Type: image/png\r\nContent-Length: 4\r\nConnection: close\r\n\r\nPNG!trailing";
        let r = Response::parse(raw, &Method::Get).unwrap();
        assert_eq!(r.status(), StatusCode::Ok);
        assert_eq!(r.body_bytes().as_ref(), b"PNG!");
        assert_eq!(r.headers().get("content-type"), Some("image/png"));
        assert!(!r.headers().contains("connection"));
        assert!(!r.headers().contains("content-length"));
    }

    #[test]
    fn parse_reads_to_end_without_length() {
        let raw = b"HTTP/1.1 404 Not Found\r\n\r\nmissing";
        let r = Response::parse(raw, &Method::Get).unwrap();
        assert_eq!(r.status(), StatusCode::NotFound);
        assert!(!r.is_ok());
        assert_eq!(r.body_bytes().as_ref(), b"missing");
    }

    #[test]
    fn parse_rejects_truncated_body() {
        let raw = b"HTTP/1.1 200 OK\r\nContent-Length: 10\r\n\r\nshort";
        assert!(matches!(
            Response::parse(raw, &Method::Get),
            Err(ResponseError::TruncatedBody {
                expected: 10,
                actual: 5
            })
        ));
    }

    #[test]
    fn parse_keeps_unlisted_status() {
        let raw = b"HTTP/1.1 451 Unavailable For Legal Reasons\r\nContent-Length: 3\r\n\r\nno!";
        let r = Response::parse(raw, &Method::Get).unwrap();
        assert_eq!(r.status(), StatusCode::Other(451));
        assert_eq!(r.body_bytes().as_ref(), b"no!");

        let s = to_string(r.into_bytes());
        assert!(s.starts_with("HTTP/1.1 451 \r\n"));
    }

    #[test]
    fn not_modified_ignores_content_length() {
        let raw = b"HTTP/1.1 304 Not Modified\r\nETag: \"a\"\r\nContent-Length: 1234\r\n\r\n";
        let r = Response::parse(raw, &Method::Get).unwrap();
        assert_eq!(r.status(), StatusCode::NotModified);
        assert!(r.body_bytes().is_empty());
        assert_eq!(r.headers().get("etag"), Some("\"a\""));
    }

    #[test]
    fn no_content_drops_stray_bytes() {
        let raw = b"HTTP/1.1 204 No Content\r\n\r\njunk";
        let r = Response::parse(raw, &Method::Delete).unwrap();
        assert!(r.body_bytes().is_empty());
    }

    #[test]
    fn head_reply_has_no_body() {
        let raw = b"HTTP/1.1 200 OK\r\nContent-Type: image/png\r\nContent-Length: 5120\r\n\r\n";
        let r = Response::parse(raw, &Method::Head).unwrap();
        assert!(r.is_ok());
        assert!(r.body_bytes().is_empty());
        assert_eq!(r.headers().get("content-type"), Some("image/png"));
    }

    #[test]
    fn parse_incomplete_headers() {
        let raw = b"HTTP/1.1 200 OK\r\nContent-";
        assert!(matches!(
            Response::parse(raw, &Method::Get),
            Err(ResponseError::Incomplete)
        ));
    }
}
