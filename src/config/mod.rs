//! Worker configuration: cache version, scope, app-shell manifest, routing.
//!
//! Every lifecycle phase receives its configuration from a [`ShellConfig`]
//! value rather than from process-wide constants, so two workers with
//! different versions can run side by side (which is exactly what an
//! upgrade looks like).
//!
//! Configuration is plain JSON. Missing fields take the defaults of the
//! shipped app:
//!
//! ```json
//! {
//!   "cache_name": "oval-path-v2",
//!   "scope": "http://localhost:8080/"
//! }
//! ```

use std::collections::HashSet;
use std::fmt;
use std::path::Path;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use url::Url;

/// Errors raised while loading or validating a [`ShellConfig`].
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid config JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("cache name must not be empty")]
    EmptyCacheName,

    #[error("scope must be an http(s) URL ending in `/`, got `{0}`")]
    InvalidScope(String),

    #[error("image prefix must start and end with `/`, got `{0}`")]
    InvalidImagePrefix(String),

    #[error("cannot resolve `{entry}` against the scope: {source}")]
    InvalidEntry {
        entry: String,
        #[source]
        source: url::ParseError,
    },

    #[error("app shell lists `{0}` more than once")]
    DuplicateEntry(String),

    #[error("install_attempts must be at least 1")]
    NoInstallAttempts,
}

/// The name of one cache generation, e.g. `oval-path-v1`.
///
/// Bumping the version is the only way to make clients discard what they
/// have already stored.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CacheVersion(String);

impl CacheVersion {
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CacheVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl PartialEq<str> for CacheVersion {
    fn eq(&self, other: &str) -> bool {
        self.0 == other
    }
}

/// The ordered, resolved list of URLs precached at install.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AppShellManifest {
    urls: Vec<Url>,
}

impl AppShellManifest {
    pub fn urls(&self) -> &[Url] {
        &self.urls
    }

    pub fn len(&self) -> usize {
        self.urls.len()
    }

    pub fn is_empty(&self) -> bool {
        self.urls.is_empty()
    }
}

/// Configuration for one worker version.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ShellConfig {
    /// The current cache version. Every other cache is deleted on activate.
    pub cache_name: CacheVersion,

    /// Base URL the worker controls; its origin is the only one intercepted.
    pub scope: Url,

    /// Relative URLs precached at install, resolved against `scope`.
    pub app_shell: Vec<String>,

    /// Same-origin paths starting with this prefix are served cache-first.
    pub image_prefix: String,

    /// Served when a navigation fails offline and has no cached copy.
    pub fallback_document: String,

    /// How many times the host attempts install before giving up.
    pub install_attempts: u32,

    /// Delay between install attempts, in milliseconds.
    pub install_retry_delay_ms: u64,
}

impl Default for ShellConfig {
    fn default() -> Self {
        Self {
            cache_name: CacheVersion::new("oval-path-v1"),
            scope: default_scope(),
            app_shell: [
                "./",
                "./index.html",
                "./styles.css",
                "./app.js",
                "./data.js",
                "./manifest.webmanifest",
                "./assets/icons/icon-192.png",
                "./assets/icons/icon-512.png",
                "./assets/icons/apple-touch-icon.png",
                "./assets/icons/maskable-512.png",
            ]
            .into_iter()
            .map(str::to_owned)
            .collect(),
            image_prefix: "/assets/presidents/".to_owned(),
            fallback_document: "./index.html".to_owned(),
            install_attempts: 3,
            install_retry_delay_ms: 1_000,
        }
    }
}

fn default_scope() -> Url {
    match Url::parse("http://localhost:8080/") {
        Ok(url) => url,
        Err(e) => unreachable!("static scope URL is valid: {e}"),
    }
}

impl ShellConfig {
    /// Parses and validates a JSON document.
    ///
    /// # Errors
    ///
    /// [`ConfigError::Json`] for malformed JSON, or any validation error
    /// from [`validate`](Self::validate).
    pub fn from_json_str(json: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Reads, parses, and validates a JSON file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_json_str(&contents)
    }

    /// Returns a copy with a different cache version.
    #[must_use]
    pub fn with_cache_name(mut self, name: impl Into<String>) -> Self {
        self.cache_name = CacheVersion::new(name);
        self
    }

    /// Returns a copy with a different scope.
    #[must_use]
    pub fn with_scope(mut self, scope: Url) -> Self {
        self.scope = scope;
        self
    }

    /// Returns a copy with a different app-shell list.
    #[must_use]
    pub fn with_app_shell<I, S>(mut self, entries: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.app_shell = entries.into_iter().map(Into::into).collect();
        self
    }

    /// Checks the invariants the worker relies on.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.cache_name.as_str().trim().is_empty() {
            return Err(ConfigError::EmptyCacheName);
        }

        let scheme_ok = matches!(self.scope.scheme(), "http" | "https");
        if !scheme_ok || !self.scope.path().ends_with('/') {
            return Err(ConfigError::InvalidScope(self.scope.to_string()));
        }

        if !self.image_prefix.starts_with('/') || !self.image_prefix.ends_with('/') {
            return Err(ConfigError::InvalidImagePrefix(self.image_prefix.clone()));
        }

        if self.install_attempts == 0 {
            return Err(ConfigError::NoInstallAttempts);
        }

        self.manifest()?;
        self.fallback_url()?;
        Ok(())
    }

    /// Resolves the app shell against the scope.
    ///
    /// # Errors
    ///
    /// [`ConfigError::InvalidEntry`] if an entry does not resolve, or
    /// [`ConfigError::DuplicateEntry`] if two entries resolve to one URL.
    pub fn manifest(&self) -> Result<AppShellManifest, ConfigError> {
        let mut seen = HashSet::new();
        let mut urls = Vec::with_capacity(self.app_shell.len());

        for entry in &self.app_shell {
            let url = self.resolve(entry)?;
            if !seen.insert(url.clone()) {
                return Err(ConfigError::DuplicateEntry(entry.clone()));
            }
            urls.push(url);
        }

        Ok(AppShellManifest { urls })
    }

    /// Resolves the offline fallback document against the scope.
    pub fn fallback_url(&self) -> Result<Url, ConfigError> {
        self.resolve(&self.fallback_document)
    }

    fn resolve(&self, entry: &str) -> Result<Url, ConfigError> {
        let mut url = self
            .scope
            .join(entry)
            .map_err(|source| ConfigError::InvalidEntry {
                entry: entry.to_owned(),
                source,
            })?;
        url.set_fragment(None);
        Ok(url)
    }
}
