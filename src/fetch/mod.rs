//! The network seam between the worker and the outside world.
//!
//! The worker never opens sockets itself; it calls a [`Fetch`]
//! implementation. [`NetworkFetcher`] is the real one. Tests substitute a
//! fake that serves canned responses and can be taken offline.
//!
//! A fetch fails only when no response arrives. A `404` or `500` from the
//! origin is a successful fetch, exactly as it is for the browser `fetch()`.

use std::future::Future;
use std::pin::Pin;

use thiserror::Error;

use crate::http::{Request, Response, response::ResponseError};

mod network;

pub use network::NetworkFetcher;

/// Errors produced when no usable response could be obtained.
#[derive(Debug, Error)]
pub enum FetchError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to connect to {addr}: {source}")]
    Connect {
        addr: String,
        #[source]
        source: std::io::Error,
    },

    #[error("unsupported URL scheme `{0}`")]
    UnsupportedScheme(String),

    #[error("URL has no host: {0}")]
    MissingHost(String),

    #[error("invalid upstream response: {0}")]
    InvalidResponse(#[from] ResponseError),

    #[error("upstream response exceeds {max_bytes} bytes")]
    ResponseTooLarge { max_bytes: usize },

    #[error("network unavailable: {0}")]
    Offline(String),
}

/// A boxed future returned by [`Fetch::fetch`].
pub type FetchFuture<'a> = Pin<Box<dyn Future<Output = Result<Response, FetchError>> + Send + 'a>>;

/// Performs a request over the network.
///
/// # Contract
///
/// - Implementations **must** be `Send + Sync`; one fetcher is shared by
///   every concurrent fetch event.
/// - A response with any status code is `Ok`. Only a transport failure is
///   `Err`.
pub trait Fetch: Send + Sync {
    fn fetch<'a>(&'a self, request: &'a Request) -> FetchFuture<'a>;
}
