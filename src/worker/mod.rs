//! The offline-shell worker: install, activate, then handle fetches.
//!
//! A [`ServiceWorker`] is one version of the worker, built from a
//! [`ShellConfig`], a shared [`CacheStorage`], and a [`Fetch`]
//! implementation. Its lifecycle is explicit:
//!
//! ```text
//! Parsed ──install()──▶ Installing ──ok──▶ Installed ──activate()──▶ Activating ──▶ Activated
//!                            │
//!                            └──err──▶ Redundant
//! ```
//!
//! Install calls skip-waiting, so `activate()` may follow immediately rather
//! than waiting for older workers' clients to close. Activation claims
//! clients at once: from then on [`handle_fetch`](ServiceWorker::handle_fetch)
//! intercepts requests. Before that every request is passed through.
//!
//! When a newer version activates on the same [`CacheStorage`], the older
//! one notices on its next state query or fetch event and becomes
//! [`WorkerState::Redundant`].

use std::fmt;
use std::sync::Arc;

use thiserror::Error;
use tokio::sync::watch;
use tokio::task::JoinSet;
use tracing::{debug, info, warn};
use url::Url;

use crate::cache::CacheStorage;
use crate::config::{AppShellManifest, ConfigError, ShellConfig};
use crate::fetch::{Fetch, FetchError};
use crate::http::{Request, StatusCode};
use crate::router::Router;

mod fetch_event;

/// Lifecycle state of a worker version.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum WorkerState {
    /// Constructed; install has not started.
    Parsed,
    Installing,
    /// Installed and, because of skip-waiting, ready to activate.
    Installed,
    Activating,
    /// Controls clients and intercepts fetches.
    Activated,
    /// Install failed, or a newer version took control.
    Redundant,
}

impl fmt::Display for WorkerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Parsed => "parsed",
            Self::Installing => "installing",
            Self::Installed => "installed",
            Self::Activating => "activating",
            Self::Activated => "activated",
            Self::Redundant => "redundant",
        })
    }
}

/// Errors produced by lifecycle events and fetch handling.
#[derive(Debug, Error)]
pub enum WorkerError {
    #[error("invalid configuration: {0}")]
    Config(#[from] ConfigError),

    #[error("cannot {operation} a worker in state `{state}`")]
    InvalidState {
        operation: &'static str,
        state: WorkerState,
    },

    #[error("precaching {url} failed: {source}")]
    Precache {
        url: String,
        #[source]
        source: FetchError,
    },

    #[error("precaching {url} returned {status}")]
    PrecacheStatus { url: String, status: StatusCode },

    #[error("precache task failed: {0}")]
    Task(#[from] tokio::task::JoinError),

    #[error(transparent)]
    Fetch(#[from] FetchError),
}

/// One version of the offline-shell worker.
///
/// # Examples
///
/// ```rust,no_run
/// use std::sync::Arc;
/// use shellcache::{CacheStorage, NetworkFetcher, ServiceWorker, ShellConfig};
///
/// # async fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let storage = CacheStorage::new();
/// let worker = ServiceWorker::new(ShellConfig::default(), storage, Arc::new(NetworkFetcher::new()))?;
/// worker.install().await?;
/// let purged = worker.activate().await?;
/// println!("purged {} old caches", purged.len());
/// # Ok(())
/// # }
/// ```
pub struct ServiceWorker {
    config: ShellConfig,
    manifest: AppShellManifest,
    fallback: Url,
    router: Router,
    storage: CacheStorage,
    fetcher: Arc<dyn Fetch>,
    state: watch::Sender<WorkerState>,
}

impl fmt::Debug for ServiceWorker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ServiceWorker")
            .field("cache_name", &self.config.cache_name)
            .field("state", &self.state())
            .finish_non_exhaustive()
    }
}

impl ServiceWorker {
    /// Creates a worker in [`WorkerState::Parsed`].
    ///
    /// # Errors
    ///
    /// [`WorkerError::Config`] if `config` fails validation.
    pub fn new(
        config: ShellConfig,
        storage: CacheStorage,
        fetcher: Arc<dyn Fetch>,
    ) -> Result<Self, WorkerError> {
        config.validate()?;
        let manifest = config.manifest()?;
        let fallback = config.fallback_url()?;
        let router = Router::from_config(&config);
        let (state, _) = watch::channel(WorkerState::Parsed);

        Ok(Self {
            config,
            manifest,
            fallback,
            router,
            storage,
            fetcher,
            state,
        })
    }

    pub fn config(&self) -> &ShellConfig {
        &self.config
    }

    pub fn cache_name(&self) -> &str {
        self.config.cache_name.as_str()
    }

    pub fn storage(&self) -> &CacheStorage {
        &self.storage
    }

    pub fn router(&self) -> &Router {
        &self.router
    }

    pub fn manifest(&self) -> &AppShellManifest {
        &self.manifest
    }

    /// Current state, after accounting for replacement by a newer version.
    pub fn state(&self) -> WorkerState {
        self.check_superseded();
        *self.state.borrow()
    }

    /// Returns a receiver that observes every state transition.
    pub fn subscribe(&self) -> watch::Receiver<WorkerState> {
        self.state.subscribe()
    }

    /// `true` while this version is activated and still the storage's controller.
    pub fn is_controlling(&self) -> bool {
        self.state() == WorkerState::Activated
    }

    // Activated → Redundant once another version's cache is the controller.
    fn check_superseded(&self) {
        if self.storage.is_controller(self.cache_name()) {
            return;
        }
        let superseded = self.state.send_if_modified(|state| {
            if *state == WorkerState::Activated {
                *state = WorkerState::Redundant;
                true
            } else {
                false
            }
        });
        if superseded {
            info!(
                cache = %self.cache_name(),
                controller = ?self.storage.controller(),
                "superseded by a newer version"
            );
        }
    }

    // Atomically moves `from` → `to`, or reports the state that blocked it.
    fn transition(
        &self,
        operation: &'static str,
        from: WorkerState,
        to: WorkerState,
    ) -> Result<(), WorkerError> {
        let mut blocked = None;
        self.state.send_if_modified(|state| {
            if *state == from {
                *state = to;
                true
            } else {
                blocked = Some(*state);
                false
            }
        });

        match blocked {
            Some(state) => Err(WorkerError::InvalidState { operation, state }),
            None => {
                debug!(cache = %self.cache_name(), state = %to, "worker state changed");
                Ok(())
            }
        }
    }

    fn set_state(&self, state: WorkerState) {
        self.state.send_replace(state);
        debug!(cache = %self.cache_name(), state = %state, "worker state changed");
    }

    /// Precaches the app shell into the current cache.
    ///
    /// Every manifest URL is fetched concurrently and stored as it arrives.
    /// The first transport error or non-2xx status aborts the remaining
    /// fetches and fails the install; entries already stored stay in the
    /// cache. On success the worker is [`WorkerState::Installed`] and may be
    /// activated straight away.
    ///
    /// # Errors
    ///
    /// - [`WorkerError::InvalidState`] — not in [`WorkerState::Parsed`].
    /// - [`WorkerError::Precache`] / [`WorkerError::PrecacheStatus`] — a
    ///   manifest URL could not be stored. The worker becomes redundant.
    pub async fn install(&self) -> Result<(), WorkerError> {
        self.transition("install", WorkerState::Parsed, WorkerState::Installing)?;
        info!(cache = %self.cache_name(), entries = self.manifest.len(), "installing");

        match self.precache().await {
            Ok(()) => {
                self.set_state(WorkerState::Installed);
                info!(cache = %self.cache_name(), "installed; skipping wait");
                Ok(())
            }
            Err(e) => {
                warn!(cache = %self.cache_name(), error = %e, "install failed");
                self.set_state(WorkerState::Redundant);
                Err(e)
            }
        }
    }

    /// Re-runs install on a worker whose previous install failed.
    ///
    /// This is the host-side retry: the worker itself never retries.
    ///
    /// # Errors
    ///
    /// [`WorkerError::InvalidState`] unless the worker is
    /// [`WorkerState::Redundant`], plus every error of [`install`](Self::install).
    pub async fn retry_install(&self) -> Result<(), WorkerError> {
        self.transition("retry install of", WorkerState::Redundant, WorkerState::Parsed)?;
        self.install().await
    }

    async fn precache(&self) -> Result<(), WorkerError> {
        let cache = self.storage.open(self.cache_name()).await;

        let mut tasks = JoinSet::new();
        for url in self.manifest.urls() {
            let fetcher = Arc::clone(&self.fetcher);
            let url = url.clone();
            tasks.spawn(async move {
                let request = Request::get(url.clone());
                let result = fetcher.fetch(&request).await;
                (url, result)
            });
        }

        // Dropping `tasks` on an early return aborts the fetches still in flight.
        while let Some(joined) = tasks.join_next().await {
            let (url, result) = joined?;
            let response = result.map_err(|source| WorkerError::Precache {
                url: url.to_string(),
                source,
            })?;

            if !response.is_ok() {
                return Err(WorkerError::PrecacheStatus {
                    url: url.to_string(),
                    status: response.status(),
                });
            }

            cache.put(&url, response).await;
        }

        Ok(())
    }

    /// Takes control of the shared storage, deletes every cache except the
    /// current one and claims clients.
    ///
    /// Returns the names of the deleted caches.
    ///
    /// # Errors
    ///
    /// [`WorkerError::InvalidState`] if the worker is not installed.
    pub async fn activate(&self) -> Result<Vec<String>, WorkerError> {
        self.transition("activate", WorkerState::Installed, WorkerState::Activating)?;
        // Published before purging so older versions stop writing to their caches.
        self.storage.set_controller(self.cache_name());

        let mut purged = Vec::new();
        for name in self.storage.keys().await {
            if name == self.cache_name() {
                continue;
            }
            if self.storage.delete(&name).await {
                info!(cache = %name, "purged stale cache");
                purged.push(name);
            }
        }

        self.set_state(WorkerState::Activated);
        info!(cache = %self.cache_name(), purged = purged.len(), "activated; clients claimed");
        Ok(purged)
    }

    /// Installs then activates. Returns the names of purged caches.
    pub async fn start(&self) -> Result<Vec<String>, WorkerError> {
        self.install().await?;
        self.activate().await
    }
}

#[cfg(test)]
pub(crate) mod fake {
    //! In-memory network for worker tests.

    use std::collections::HashMap;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use std::time::Duration;

    use bytes::Bytes;

    use crate::fetch::{Fetch, FetchError, FetchFuture};
    use crate::http::{Request, Response, StatusCode};

    #[derive(Default)]
    pub struct FakeNetwork {
        routes: Mutex<HashMap<String, Response>>,
        delays: Mutex<HashMap<String, Duration>>,
        calls: Mutex<Vec<String>>,
        offline: AtomicBool,
        fetches: AtomicUsize,
    }

    impl FakeNetwork {
        pub fn serve(&self, url: &str, body: &'static str) {
            self.serve_response(url, Response::new(StatusCode::Ok).body(Bytes::from_static(body.as_bytes())));
        }

        pub fn serve_response(&self, url: &str, response: Response) {
            self.routes.lock().unwrap().insert(url.to_owned(), response);
        }

        /// Holds every response for `url` back by `delay`.
        pub fn delay(&self, url: &str, delay: Duration) {
            self.delays.lock().unwrap().insert(url.to_owned(), delay);
        }

        pub fn set_offline(&self, offline: bool) {
            self.offline.store(offline, Ordering::SeqCst);
        }

        pub fn fetch_count(&self) -> usize {
            self.fetches.load(Ordering::SeqCst)
        }

        pub fn calls_for(&self, url: &str) -> usize {
            self.calls.lock().unwrap().iter().filter(|u| *u == url).count()
        }
    }

    impl Fetch for FakeNetwork {
        fn fetch<'a>(&'a self, request: &'a Request) -> FetchFuture<'a> {
            Box::pin(async move {
                let url = request.url().to_string();
                self.fetches.fetch_add(1, Ordering::SeqCst);
                self.calls.lock().unwrap().push(url.clone());

                let delay = self.delays.lock().unwrap().get(&url).copied();
                if let Some(delay) = delay {
                    tokio::time::sleep(delay).await;
                }

                if self.offline.load(Ordering::SeqCst) {
                    return Err(FetchError::Offline(url));
                }

                Ok(self
                    .routes
                    .lock()
                    .unwrap()
                    .get(&url)
                    .cloned()
                    .unwrap_or_else(|| Response::new(StatusCode::NotFound)))
            })
        }
    }
}
