//! Runs the offline-shell worker as a local forward proxy.
//!
//! ```text
//! cargo run --example offline_proxy -- [config.json]
//! curl -x http://127.0.0.1:3128 http://localhost:8080/index.html
//! ```
//!
//! Set `SHELLCACHE_ADDR` to change the listen address and `RUST_LOG` to
//! control log output (defaults to `shellcache=debug,info`).

use std::sync::Arc;

use shellcache::{CacheStorage, NetworkFetcher, ProxyServer, ServiceWorker, ShellConfig};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("shellcache=debug,info")),
        )
        .init();

    let config = match std::env::args().nth(1) {
        Some(path) => ShellConfig::load(path)?,
        None => ShellConfig::default(),
    };
    let addr = std::env::var("SHELLCACHE_ADDR").unwrap_or_else(|_| "127.0.0.1:3128".to_owned());

    let fetcher = Arc::new(NetworkFetcher::new());
    let worker = ServiceWorker::new(config, CacheStorage::new(), fetcher.clone())?;
    let server = ProxyServer::bind(&addr, worker, fetcher).await?;

    println!("shellcache proxy on http://{}", server.local_addr());
    server.run().await?;
    Ok(())
}
