//! Plain-HTTP fetcher on Tokio TCP streams.

use bytes::BytesMut;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tracing::{debug, warn};

use super::{Fetch, FetchError, FetchFuture};
use crate::http::{Request, Response};

/// Largest upstream response we will buffer (32 MiB).
const MAX_RESPONSE_SIZE: usize = 32 * 1024 * 1024;

/// Initial read buffer capacity per fetch.
const INITIAL_BUF_SIZE: usize = 8192;

/// Fetches `http://` URLs with one connection per request.
///
/// The request goes out as HTTP/1.0 with `Connection: close`, so the body
/// arrives un-chunked and ends at EOF. There is no timeout: a stalled
/// upstream stalls the caller.
///
/// # Examples
///
/// ```rust,no_run
/// use shellcache::fetch::{Fetch, NetworkFetcher};
/// use shellcache::http::Request;
/// use url::Url;
///
/// # async fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let fetcher = NetworkFetcher::new();
/// let request = Request::get(Url::parse("http://localhost:8080/index.html")?);
/// let response = fetcher.fetch(&request).await?;
/// println!("{}", response.status());
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Clone)]
pub struct NetworkFetcher {
    max_response_size: usize,
}

impl Default for NetworkFetcher {
    fn default() -> Self {
        Self::new()
    }
}

impl NetworkFetcher {
    pub fn new() -> Self {
        Self {
            max_response_size: MAX_RESPONSE_SIZE,
        }
    }

    /// Overrides the response size cap.
    #[must_use]
    pub fn max_response_size(mut self, bytes: usize) -> Self {
        self.max_response_size = bytes;
        self
    }

    async fn send(&self, request: &Request) -> Result<Response, FetchError> {
        let url = request.url();
        if url.scheme() != "http" {
            return Err(FetchError::UnsupportedScheme(url.scheme().to_owned()));
        }

        let host = url
            .host_str()
            .ok_or_else(|| FetchError::MissingHost(url.to_string()))?;
        let port = url.port_or_known_default().unwrap_or(80);
        let addr = format!("{host}:{port}");

        let mut stream = TcpStream::connect(&addr)
            .await
            .map_err(|source| FetchError::Connect {
                addr: addr.clone(),
                source,
            })?;

        debug!(method = %request.method(), url = %url, "fetching upstream");
        stream.write_all(&request.to_upstream_bytes()).await?;
        stream.flush().await?;

        let mut buf = BytesMut::with_capacity(INITIAL_BUF_SIZE);
        loop {
            let bytes_read = stream.read_buf(&mut buf).await?;
            if bytes_read == 0 {
                break;
            }
            if buf.len() > self.max_response_size {
                warn!(url = %url, limit = self.max_response_size, "upstream response too large");
                return Err(FetchError::ResponseTooLarge {
                    max_bytes: self.max_response_size,
                });
            }
        }

        let response = Response::parse(&buf, request.method())?;
        debug!(url = %url, status = %response.status(), bytes = response.body_bytes().len(), "upstream responded");
        Ok(response)
    }
}

impl Fetch for NetworkFetcher {
    fn fetch<'a>(&'a self, request: &'a Request) -> FetchFuture<'a> {
        Box::pin(self.send(request))
    }
}
