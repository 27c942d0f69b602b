//! # shellcache
//!
//! An offline app-shell cache: the install/activate/fetch lifecycle of a
//! service worker, as an async Rust library, plus a proxy host that runs it
//! against real HTTP traffic.
//!
//! - **Install** precaches a fixed manifest into the cache named by the
//!   current version. All-or-nothing: one failed fetch fails the install.
//! - **Activate** deletes every cache whose name is not the current version
//!   and starts intercepting requests at once.
//! - **Fetch** serves same-origin images cache-first, other same-origin
//!   `GET`s network-first with a cache and fallback-document safety net, and
//!   leaves everything else alone.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use shellcache::{CacheStorage, NetworkFetcher, ProxyServer, ServiceWorker, ShellConfig};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let fetcher = Arc::new(NetworkFetcher::new());
//!     let worker = ServiceWorker::new(ShellConfig::default(), CacheStorage::new(), fetcher.clone())?;
//!     let server = ProxyServer::bind("127.0.0.1:3128", worker, fetcher).await?;
//!     println!("Proxy on http://{}", server.local_addr());
//!     server.run().await?;
//!     Ok(())
//! }
//! ```

pub mod cache;
pub mod config;
pub mod fetch;
pub mod http;
pub mod router;
pub mod server;
pub mod worker;

// ── Convenience re-exports ────────────────────────────────────────────────────
pub use cache::{Cache, CacheEntry, CacheStorage};
pub use config::{AppShellManifest, CacheVersion, ConfigError, ShellConfig};
pub use fetch::{Fetch, FetchError, NetworkFetcher};
pub use http::{Headers, Method, Request, Response, StatusCode};
pub use router::{Router, Strategy};
pub use server::{ProxyServer, ServerError};
pub use worker::{ServiceWorker, WorkerError, WorkerState};
