//! Named, versioned response caches.
//!
//! [`CacheStorage`] is the set of named caches a worker can see, mirroring
//! what a browser exposes to a service worker. Each [`Cache`] maps request
//! URLs to stored [`Response`]s.
//!
//! ## Keys
//!
//! Entries are keyed by the absolute request URL with its fragment removed
//! (see [`cache_key`]). The query string is part of the key, and no `Vary`
//! processing is done.
//!
//! ## Concurrency
//!
//! Both levels are guarded by async `RwLock`s and shared through [`Arc`], so
//! any number of fetch events may read and write at once. Writes to one key
//! are last-write-wins.
//!
//! ## Controller
//!
//! The storage also records which cache belongs to the worker version that
//! currently controls clients. Activation publishes it; an older version
//! sharing the storage sees the change and stops intercepting.

use std::collections::BTreeMap;
use std::sync::Arc;

use tokio::sync::{RwLock, watch};
use tracing::debug;
use url::Url;

use crate::http::Response;

/// Returns the storage key for `url`: the URL without its fragment.
///
/// # Examples
///
/// ```
/// use shellcache::cache::cache_key;
/// use url::Url;
///
/// let url = Url::parse("http://localhost:8080/index.html#timeline").unwrap();
/// assert_eq!(cache_key(&url), "http://localhost:8080/index.html");
/// ```
pub fn cache_key(url: &Url) -> String {
    let mut url = url.clone();
    url.set_fragment(None);
    url.into()
}

/// A stored `(url, response)` pair, as returned by [`Cache::entries`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheEntry {
    pub key: String,
    pub response: Response,
}

/// One named cache.
#[derive(Debug)]
pub struct Cache {
    name: String,
    entries: RwLock<BTreeMap<String, Response>>,
}

impl Cache {
    fn new(name: String) -> Self {
        Self {
            name,
            entries: RwLock::new(BTreeMap::new()),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Stores `response` under `url`, replacing any previous entry.
    pub async fn put(&self, url: &Url, response: Response) {
        let key = cache_key(url);
        debug!(cache = %self.name, url = %key, "cache put");
        self.entries.write().await.insert(key, response);
    }

    /// Returns a copy of the response stored for `url`, if any.
    pub async fn match_request(&self, url: &Url) -> Option<Response> {
        self.entries.read().await.get(&cache_key(url)).cloned()
    }

    /// Removes the entry for `url`. Returns `true` if one existed.
    pub async fn delete(&self, url: &Url) -> bool {
        self.entries.write().await.remove(&cache_key(url)).is_some()
    }

    /// Returns every stored key, sorted.
    pub async fn keys(&self) -> Vec<String> {
        self.entries.read().await.keys().cloned().collect()
    }

    pub async fn entries(&self) -> Vec<CacheEntry> {
        self.entries
            .read()
            .await
            .iter()
            .map(|(key, response)| CacheEntry {
                key: key.clone(),
                response: response.clone(),
            })
            .collect()
    }

    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.entries.read().await.is_empty()
    }
}

/// All named caches visible to a worker, in creation order.
///
/// Cloning a `CacheStorage` yields another handle to the same caches, which
/// is how an old and a new worker version share one store.
///
/// # Examples
///
/// ```
/// use shellcache::cache::CacheStorage;
///
/// # #[tokio::main(flavor = "current_thread")]
/// # async fn main() {
/// let storage = CacheStorage::new();
/// storage.open("oval-path-v1").await;
/// storage.open("oval-path-v2").await;
///
/// assert_eq!(storage.keys().await, vec!["oval-path-v1", "oval-path-v2"]);
/// assert!(storage.delete("oval-path-v1").await);
/// assert!(!storage.has("oval-path-v1").await);
/// # }
/// ```
#[derive(Debug, Clone)]
pub struct CacheStorage {
    caches: Arc<RwLock<Vec<Arc<Cache>>>>,
    controller: Arc<watch::Sender<Option<String>>>,
}

impl Default for CacheStorage {
    fn default() -> Self {
        let (controller, _) = watch::channel(None);
        Self {
            caches: Arc::default(),
            controller: Arc::new(controller),
        }
    }
}

impl CacheStorage {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records `name` as the cache of the controlling worker version.
    pub fn set_controller(&self, name: &str) {
        debug!(cache = %name, "controller changed");
        self.controller.send_replace(Some(name.to_owned()));
    }

    /// Name of the controlling version's cache, if any version has activated.
    pub fn controller(&self) -> Option<String> {
        self.controller.borrow().clone()
    }

    pub fn is_controller(&self, name: &str) -> bool {
        self.controller.borrow().as_deref() == Some(name)
    }

    /// Returns a receiver notified whenever a new version takes control.
    pub fn watch_controller(&self) -> watch::Receiver<Option<String>> {
        self.controller.subscribe()
    }

    /// Returns the cache called `name`, creating it if absent.
    pub async fn open(&self, name: &str) -> Arc<Cache> {
        if let Some(cache) = self.get(name).await {
            return cache;
        }

        let mut caches = self.caches.write().await;
        // Another task may have created it between the read and the write lock.
        if let Some(cache) = caches.iter().find(|c| c.name == name) {
            return Arc::clone(cache);
        }

        debug!(cache = %name, "cache created");
        let cache = Arc::new(Cache::new(name.to_owned()));
        caches.push(Arc::clone(&cache));
        cache
    }

    /// Returns the cache called `name` without creating it.
    pub async fn get(&self, name: &str) -> Option<Arc<Cache>> {
        self.caches
            .read()
            .await
            .iter()
            .find(|c| c.name == name)
            .cloned()
    }

    pub async fn has(&self, name: &str) -> bool {
        self.get(name).await.is_some()
    }

    /// Deletes the cache called `name`. Returns `true` if it existed.
    ///
    /// Handles obtained earlier from [`open`](Self::open) stay usable but
    /// are no longer reachable through this storage.
    pub async fn delete(&self, name: &str) -> bool {
        let mut caches = self.caches.write().await;
        let before = caches.len();
        caches.retain(|c| c.name != name);
        let removed = caches.len() < before;
        if removed {
            debug!(cache = %name, "cache deleted");
        }
        removed
    }

    /// Returns the names of all caches in creation order.
    pub async fn keys(&self) -> Vec<String> {
        self.caches
            .read()
            .await
            .iter()
            .map(|c| c.name.clone())
            .collect()
    }

    /// Looks `url` up in every cache, oldest first, and returns the first hit.
    pub async fn match_request(&self, url: &Url) -> Option<Response> {
        let caches: Vec<Arc<Cache>> = self.caches.read().await.clone();
        for cache in caches {
            if let Some(response) = cache.match_request(url).await {
                return Some(response);
            }
        }
        None
    }
}
