//! Fetch handling: cache-first for images, network-first for the shell.

use tracing::{debug, warn};

use super::{ServiceWorker, WorkerError};
use crate::cache::Cache;
use crate::http::{Request, Response};
use crate::router::Strategy;

impl ServiceWorker {
    /// Answers a fetch event.
    ///
    /// Returns `Ok(None)` when the request is not intercepted: the worker is
    /// not controlling clients (not yet activated, or replaced by a newer
    /// version), the request is not a `GET` or is cross-origin, or the
    /// current cache has been purged. The host then performs the request
    /// itself and the managed cache is neither read nor written.
    ///
    /// # Errors
    ///
    /// [`WorkerError::Fetch`] when the network fails and no cached copy
    /// (or, for navigations, no fallback document) is available.
    pub async fn handle_fetch(&self, request: &Request) -> Result<Option<Response>, WorkerError> {
        if !self.is_controlling() {
            return Ok(None);
        }

        let strategy = self.router.classify(request.method(), request.url());
        debug!(url = %request.url(), strategy = %strategy, "fetch event");
        if strategy == Strategy::Passthrough {
            return Ok(None);
        }

        // Never recreate a cache that a newer version purged.
        let Some(cache) = self.storage.get(self.cache_name()).await else {
            warn!(cache = %self.cache_name(), url = %request.url(), "current cache is gone; passing through");
            return Ok(None);
        };

        match strategy {
            Strategy::CacheFirst => self.cache_first(&cache, request).await.map(Some),
            Strategy::NetworkFirst => self.network_first(&cache, request).await.map(Some),
            Strategy::Passthrough => Ok(None),
        }
    }

    // Once stored, a response is served until the cache version changes.
    async fn cache_first(&self, cache: &Cache, request: &Request) -> Result<Response, WorkerError> {
        if let Some(cached) = cache.match_request(request.url()).await {
            debug!(url = %request.url(), "cache hit");
            return Ok(cached);
        }

        let response = self.fetcher.fetch(request).await?;
        cache.put(request.url(), response.clone()).await;
        Ok(response)
    }

    // Every fetched response overwrites the stored copy; cache headers are not consulted.
    async fn network_first(&self, cache: &Cache, request: &Request) -> Result<Response, WorkerError> {
        let error = match self.fetcher.fetch(request).await {
            Ok(response) => {
                cache.put(request.url(), response.clone()).await;
                return Ok(response);
            }
            Err(e) => e,
        };

        warn!(url = %request.url(), error = %error, "network failed; trying cache");

        if let Some(cached) = cache.match_request(request.url()).await {
            return Ok(cached);
        }

        if let Some(document) = cache.match_request(&self.fallback).await {
            debug!(url = %request.url(), fallback = %self.fallback, "serving fallback document");
            return Ok(document);
        }

        Err(error.into())
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use url::Url;

    use crate::cache::CacheStorage;
    use crate::config::ShellConfig;
    use crate::fetch::FetchError;
    use crate::http::{Method, Request, Response, StatusCode};
    use crate::worker::fake::FakeNetwork;
    use crate::worker::{ServiceWorker, WorkerError, WorkerState};

    const LINCOLN: &str = "http://localhost:8080/assets/presidents/lincoln.png";
    const INDEX: &str = "http://localhost:8080/index.html";

    fn get(url: &str) -> Request {
        Request::get(Url::parse(url).unwrap())
    }

    async fn running() -> (ServiceWorker, Arc<FakeNetwork>, CacheStorage) {
        let net = Arc::new(FakeNetwork::default());
        net.serve(INDEX, "<html>v1</html>");
        net.serve("http://localhost:8080/app.js", "boot()");
        net.serve(LINCOLN, "lincoln-png");

        let config = ShellConfig::default()
            .with_scope(Url::parse("http://localhost:8080/").unwrap())
            .with_cache_name("v1")
            .with_app_shell(["./index.html", "./app.js"]);
        let storage = CacheStorage::new();
        let worker = ServiceWorker::new(config, storage.clone(), net.clone()).unwrap();
        worker.start().await.unwrap();
        (worker, net, storage)
    }

    #[tokio::test]
    async fn not_intercepted_before_activation() {
        let net = Arc::new(FakeNetwork::default());
        let worker =
            ServiceWorker::new(ShellConfig::default(), CacheStorage::new(), net.clone()).unwrap();
        let response = worker.handle_fetch(&get(INDEX)).await.unwrap();
        assert!(response.is_none());
        assert_eq!(net.fetch_count(), 0);
    }

    #[tokio::test]
    async fn image_is_fetched_once_then_served_from_cache() {
        let (worker, net, _) = running().await;

        let first = worker.handle_fetch(&get(LINCOLN)).await.unwrap().unwrap();
        let second = worker.handle_fetch(&get(LINCOLN)).await.unwrap().unwrap();

        assert_eq!(net.calls_for(LINCOLN), 1);
        assert_eq!(first.body_bytes(), second.body_bytes());
    }

    #[tokio::test]
    async fn cached_image_survives_going_offline() {
        let (worker, net, _) = running().await;
        worker.handle_fetch(&get(LINCOLN)).await.unwrap();

        net.set_offline(true);
        let response = worker.handle_fetch(&get(LINCOLN)).await.unwrap().unwrap();
        assert_eq!(response.body_bytes().as_ref(), b"lincoln-png");
    }

    #[tokio::test]
    async fn uncached_image_offline_is_an_error() {
        let (worker, net, _) = running().await;
        net.set_offline(true);

        let err = worker.handle_fetch(&get(LINCOLN)).await.unwrap_err();
        assert!(matches!(err, WorkerError::Fetch(FetchError::Offline(_))));
    }

    #[tokio::test]
    async fn image_not_found_is_cached_too() {
        let (worker, net, storage) = running().await;
        let missing = "http://localhost:8080/assets/presidents/nobody.png";

        let response = worker.handle_fetch(&get(missing)).await.unwrap().unwrap();
        assert_eq!(response.status(), StatusCode::NotFound);

        worker.handle_fetch(&get(missing)).await.unwrap();
        assert_eq!(net.calls_for(missing), 1);
        let cache = storage.get("v1").await.unwrap();
        assert!(cache.match_request(&Url::parse(missing).unwrap()).await.is_some());
    }

    #[tokio::test]
    async fn network_success_overwrites_cached_page() {
        let (worker, net, storage) = running().await;
        net.serve(INDEX, "<html>v2</html>");

        let response = worker.handle_fetch(&get(INDEX)).await.unwrap().unwrap();
        assert_eq!(response.body_bytes().as_ref(), b"<html>v2</html>");

        let cache = storage.get("v1").await.unwrap();
        let stored = cache.match_request(&Url::parse(INDEX).unwrap()).await.unwrap();
        assert_eq!(stored.body_bytes().as_ref(), b"<html>v2</html>");
    }

    #[tokio::test]
    async fn network_failure_serves_stale_copy() {
        let (worker, net, _) = running().await;
        net.set_offline(true);

        let response = worker
            .handle_fetch(&get("http://localhost:8080/app.js"))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(response.body_bytes().as_ref(), b"boot()");
    }

    #[tokio::test]
    async fn network_failure_without_copy_serves_fallback_document() {
        let (worker, net, _) = running().await;
        net.set_offline(true);

        let response = worker
            .handle_fetch(&get("http://localhost:8080/gallery?era=civil-war"))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(response.body_bytes().as_ref(), b"<html>v1</html>");
    }

    #[tokio::test]
    async fn missing_fallback_propagates_error() {
        let (worker, net, storage) = running().await;
        let cache = storage.get("v1").await.unwrap();
        cache.delete(&Url::parse(INDEX).unwrap()).await;
        net.set_offline(true);

        let err = worker
            .handle_fetch(&get("http://localhost:8080/timeline"))
            .await
            .unwrap_err();
        assert!(matches!(err, WorkerError::Fetch(_)));
    }

    #[tokio::test]
    async fn cross_origin_and_non_get_are_not_touched() {
        let (worker, net, storage) = running().await;
        let before = net.fetch_count();
        let cache = storage.get("v1").await.unwrap();
        let entries_before = cache.len().await;

        let font = get("https://fonts.example.com/inter.woff2");
        assert!(worker.handle_fetch(&font).await.unwrap().is_none());

        let post = Request::new(Method::Post, Url::parse(INDEX).unwrap()).body("vote=lincoln");
        assert!(worker.handle_fetch(&post).await.unwrap().is_none());

        assert_eq!(net.fetch_count(), before);
        assert_eq!(cache.len().await, entries_before);
    }

    #[tokio::test]
    async fn error_status_from_network_is_returned_not_replaced() {
        let (worker, net, _) = running().await;
        net.serve_response(INDEX, Response::new(StatusCode::ServiceUnavailable));

        let response = worker.handle_fetch(&get(INDEX)).await.unwrap().unwrap();
        assert_eq!(response.status(), StatusCode::ServiceUnavailable);
    }

    #[tokio::test]
    async fn unlisted_status_is_returned_and_cached() {
        let (worker, net, storage) = running().await;
        let blocked = "http://localhost:8080/speeches/gettysburg";
        net.serve_response(blocked, Response::new(StatusCode::Other(451)).body("blocked"));

        let response = worker.handle_fetch(&get(blocked)).await.unwrap().unwrap();
        assert_eq!(response.status().as_u16(), 451);

        let cache = storage.get("v1").await.unwrap();
        let stored = cache.match_request(&Url::parse(blocked).unwrap()).await.unwrap();
        assert_eq!(stored.body_bytes().as_ref(), b"blocked");
    }

    #[tokio::test]
    async fn purged_cache_is_not_recreated() {
        let (worker, net, storage) = running().await;
        storage.delete("v1").await;

        assert!(worker.handle_fetch(&get(LINCOLN)).await.unwrap().is_none());
        assert!(!storage.has("v1").await);
        assert_eq!(net.calls_for(LINCOLN), 0);
    }

    #[tokio::test]
    async fn superseded_version_stops_intercepting() {
        let (v1, net, storage) = running().await;
        let v2_config = ShellConfig::default()
            .with_scope(Url::parse("http://localhost:8080/").unwrap())
            .with_cache_name("v2")
            .with_app_shell(["./index.html"]);
        let v2 = ServiceWorker::new(v2_config, storage.clone(), net.clone()).unwrap();
        v2.start().await.unwrap();

        assert!(!v1.is_controlling());
        assert_eq!(v1.state(), WorkerState::Redundant);
        assert!(v1.handle_fetch(&get(LINCOLN)).await.unwrap().is_none());
        assert_eq!(storage.keys().await, vec!["v2"]);

        v2.handle_fetch(&get(LINCOLN)).await.unwrap().unwrap();
        assert_eq!(storage.keys().await, vec!["v2"]);
    }
}
