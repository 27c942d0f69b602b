//! Proxy host for the worker, on Tokio.
//!
//! [`ProxyServer`] plays the role a browser plays for a service worker: it
//! drives the lifecycle (retrying install the way a browser retries a failed
//! registration), then routes every incoming request through
//! [`ServiceWorker::handle_fetch`]. Requests the worker does not intercept
//! go straight to the network.
//!
//! Point a browser or `curl -x` at it to use it as an HTTP forward proxy,
//! or send origin-form requests with a `Host` header.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use bytes::BytesMut;
use thiserror::Error;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tracing::{debug, error, info, warn};

use crate::fetch::Fetch;
use crate::http::{
    StatusCode,
    request::{Request, RequestError},
    response::Response,
};
use crate::worker::{ServiceWorker, WorkerError};

/// Errors produced by the host.
#[derive(Debug, Error)]
pub enum ServerError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to bind to {addr}: {source}")]
    Bind {
        addr: String,
        #[source]
        source: std::io::Error,
    },

    #[error("worker failed to start after {attempts} attempt(s): {source}")]
    Startup {
        attempts: u32,
        #[source]
        source: WorkerError,
    },
}

/// Maximum size of a complete HTTP request we will buffer before rejecting it (8 MiB).
const MAX_REQUEST_SIZE: usize = 8 * 1024 * 1024;

/// Initial read buffer capacity per connection.
const INITIAL_BUF_SIZE: usize = 4096;

/// Hosts a worker version behind a TCP listener.
///
/// # Examples
///
/// ```rust,no_run
/// use std::sync::Arc;
/// use shellcache::{CacheStorage, NetworkFetcher, ProxyServer, ServiceWorker, ShellConfig};
///
/// #[tokio::main]
/// async fn main() -> Result<(), Box<dyn std::error::Error>> {
///     let fetcher = Arc::new(NetworkFetcher::new());
///     let worker = ServiceWorker::new(ShellConfig::default(), CacheStorage::new(), fetcher.clone())?;
///     let server = ProxyServer::bind("127.0.0.1:3128", worker, fetcher).await?;
///     server.run().await?;
///     Ok(())
/// }
/// ```
pub struct ProxyServer {
    listener: TcpListener,
    local_addr: SocketAddr,
    worker: Arc<ServiceWorker>,
    fetcher: Arc<dyn Fetch>,
}

impl ProxyServer {
    /// Binds the host to the given TCP address.
    ///
    /// `fetcher` serves requests the worker passes through; it is normally the
    /// same fetcher the worker was built with.
    ///
    /// # Errors
    ///
    /// Returns [`ServerError::Bind`] if the address cannot be bound.
    pub async fn bind(
        addr: impl AsRef<str>,
        worker: ServiceWorker,
        fetcher: Arc<dyn Fetch>,
    ) -> Result<Self, ServerError> {
        let addr = addr.as_ref();
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|e| ServerError::Bind {
                addr: addr.to_owned(),
                source: e,
            })?;
        let local_addr = listener.local_addr()?;
        Ok(Self {
            listener,
            local_addr,
            worker: Arc::new(worker),
            fetcher,
        })
    }

    /// Returns the local address the host is bound to.
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn worker(&self) -> &Arc<ServiceWorker> {
        &self.worker
    }

    /// Starts the worker, then accepts connections until the process exits.
    ///
    /// # Errors
    ///
    /// - [`ServerError::Startup`] if install keeps failing or activation fails.
    /// - [`ServerError::Io`] if the listener itself fails.
    pub async fn run(self) -> Result<(), ServerError> {
        start_worker(&self.worker).await?;
        info!(address = %self.local_addr, cache = %self.worker.cache_name(), "shellcache listening");

        loop {
            let (stream, peer_addr) = match self.listener.accept().await {
                Ok(pair) => pair,
                Err(e) => {
                    error!(error = %e, "failed to accept connection");
                    continue;
                }
            };

            debug!(peer = %peer_addr, "connection accepted");
            let worker = Arc::clone(&self.worker);
            let fetcher = Arc::clone(&self.fetcher);

            tokio::spawn(async move {
                if let Err(e) = handle_connection(stream, peer_addr, worker, fetcher).await {
                    warn!(peer = %peer_addr, error = %e, "connection closed with error");
                }
            });
        }
    }
}

/// Installs (retrying per the worker's config) and activates `worker`.
async fn start_worker(worker: &ServiceWorker) -> Result<(), ServerError> {
    let attempts = worker.config().install_attempts;
    let delay = Duration::from_millis(worker.config().install_retry_delay_ms);

    let mut attempt = 1;
    let mut installed = worker.install().await;
    while let Err(e) = installed {
        if attempt >= attempts {
            return Err(ServerError::Startup {
                attempts: attempt,
                source: e,
            });
        }
        warn!(attempt, error = %e, "install failed; retrying");
        tokio::time::sleep(delay).await;
        attempt += 1;
        installed = worker.retry_install().await;
    }

    let purged = worker
        .activate()
        .await
        .map_err(|source| ServerError::Startup {
            attempts: attempt,
            source,
        })?;
    debug!(purged = ?purged, "startup activation complete");
    Ok(())
}

/// Answers one request: through the worker if it intercepts, else over the network.
pub async fn respond(worker: &ServiceWorker, fetcher: &dyn Fetch, request: &Request) -> Response {
    let result = match worker.handle_fetch(request).await {
        Ok(Some(response)) => Ok(response),
        Ok(None) => fetcher.fetch(request).await.map_err(WorkerError::from),
        Err(e) => Err(e),
    };

    result.unwrap_or_else(|e| {
        warn!(url = %request.url(), error = %e, "no response available");
        Response::new(StatusCode::BadGateway).body(format!("Bad Gateway: {e}"))
    })
}

/// Handles a single TCP connection over its lifetime.
///
/// HTTP/1.1 connections are persistent by default: we loop, reading one
/// request per iteration, until the peer closes the connection or signals
/// `Connection: close`.
async fn handle_connection(
    mut stream: TcpStream,
    peer_addr: SocketAddr,
    worker: Arc<ServiceWorker>,
    fetcher: Arc<dyn Fetch>,
) -> Result<(), std::io::Error> {
    let mut buf = BytesMut::with_capacity(INITIAL_BUF_SIZE);

    loop {
        let bytes_read = stream.read_buf(&mut buf).await?;

        if bytes_read == 0 {
            debug!(peer = %peer_addr, "connection closed by peer");
            break;
        }

        if buf.len() > MAX_REQUEST_SIZE {
            warn!(peer = %peer_addr, "request too large, sending 413");
            let response = Response::new(StatusCode::PayloadTooLarge)
                .body("Request entity too large")
                .keep_alive(false);
            stream.write_all(&response.into_bytes()).await?;
            break;
        }

        let (request, body_offset) = match Request::parse(&buf) {
            Ok(pair) => pair,
            Err(RequestError::Incomplete) => continue,
            Err(e) => {
                warn!(peer = %peer_addr, error = %e, "bad request, sending 400");
                let response = Response::new(StatusCode::BadRequest)
                    .body(format!("Bad Request: {e}"))
                    .keep_alive(false);
                stream.write_all(&response.into_bytes()).await?;
                break;
            }
        };

        // Wait for the full body to arrive if Content-Length is set.
        let total_needed = body_offset + request.content_length().unwrap_or(0);
        if buf.len() < total_needed {
            continue;
        }
        let request = request.body(buf[body_offset..total_needed].to_vec());

        let keep_alive = request.is_keep_alive();

        debug!(
            peer = %peer_addr,
            method = %request.method(),
            url = %request.url(),
            "dispatching request"
        );

        let response = respond(&worker, fetcher.as_ref(), &request)
            .await
            .keep_alive(keep_alive);
        stream.write_all(&response.into_bytes()).await?;
        stream.flush().await?;

        let _ = buf.split_to(total_needed);

        if !keep_alive {
            debug!(peer = %peer_addr, "Connection: close, shutting down");
            break;
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::CacheStorage;
    use crate::config::{ConfigError, ShellConfig};
    use crate::http::Method;
    use crate::worker::WorkerState;
    use crate::worker::fake::FakeNetwork;
    use url::Url;

    fn config() -> ShellConfig {
        let mut config = ShellConfig::default()
            .with_scope(Url::parse("http://localhost:8080/").unwrap())
            .with_cache_name("v1")
            .with_app_shell(["./index.html"]);
        config.install_attempts = 2;
        config.install_retry_delay_ms = 0;
        config
    }

    fn network() -> Arc<FakeNetwork> {
        let net = FakeNetwork::default();
        net.serve("http://localhost:8080/index.html", "<html>");
        net.serve("http://cdn.example.org/inter.woff2", "font");
        Arc::new(net)
    }

    #[tokio::test]
    async fn start_worker_installs_and_activates() {
        let worker = ServiceWorker::new(config(), CacheStorage::new(), network()).unwrap();
        start_worker(&worker).await.unwrap();
        assert_eq!(worker.state(), WorkerState::Activated);
    }

    #[tokio::test]
    async fn start_worker_gives_up_after_configured_attempts() {
        let net = network();
        net.set_offline(true);
        let worker = ServiceWorker::new(config(), CacheStorage::new(), net.clone()).unwrap();

        let err = start_worker(&worker).await.unwrap_err();
        assert!(matches!(err, ServerError::Startup { attempts: 2, .. }));
        assert_eq!(worker.state(), WorkerState::Redundant);
        // One manifest URL, two attempts.
        assert_eq!(net.calls_for("http://localhost:8080/index.html"), 2);
    }

    #[test]
    fn zero_install_attempts_never_reach_startup() {
        let mut config = config();
        config.install_attempts = 0;
        assert!(matches!(
            ServiceWorker::new(config, CacheStorage::new(), network()),
            Err(WorkerError::Config(ConfigError::NoInstallAttempts))
        ));
    }

    #[tokio::test]
    async fn respond_passes_cross_origin_to_network() {
        let net = network();
        let worker = ServiceWorker::new(config(), CacheStorage::new(), net.clone()).unwrap();
        worker.start().await.unwrap();

        let request = Request::get(Url::parse("http://cdn.example.org/inter.woff2").unwrap());
        let response = respond(&worker, net.as_ref(), &request).await;
        assert_eq!(response.body_bytes().as_ref(), b"font");

        let cache = worker.storage().get("v1").await.unwrap();
        assert_eq!(cache.len().await, 1);
    }

    #[tokio::test]
    async fn respond_maps_failures_to_bad_gateway() {
        let net = network();
        let worker = ServiceWorker::new(config(), CacheStorage::new(), net.clone()).unwrap();
        worker.start().await.unwrap();
        net.set_offline(true);

        let post = Request::new(Method::Post, Url::parse("http://localhost:8080/vote").unwrap());
        let response = respond(&worker, net.as_ref(), &post).await;
        assert_eq!(response.status(), StatusCode::BadGateway);
    }
}
