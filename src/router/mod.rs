//! Request classification — decide how the worker treats each request.
//!
//! [`Router`] maps a request's method and URL to a [`Strategy`]. It looks at
//! nothing else: no headers, no content type, no transport state. That keeps
//! routing a pure function that can be tested without a network.
//!
//! Classification runs in this order:
//!
//! 1. Anything other than `GET` → [`Strategy::Passthrough`].
//! 2. A URL whose origin differs from the worker's → [`Strategy::Passthrough`].
//! 3. The first registered route whose path pattern matches wins.
//! 4. Otherwise the router's fallback strategy applies.
//!
//! | Pattern                 | Matches                                  |
//! |-------------------------|------------------------------------------|
//! | `/index.html`           | exactly `/index.html`                    |
//! | `/assets/presidents/*`  | every path starting `/assets/presidents/` |

use std::fmt;

use url::{Origin, Url};

use crate::config::ShellConfig;
use crate::http::Method;

/// How the worker answers a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Strategy {
    /// Serve from cache; on a miss fetch, store a copy, and return.
    CacheFirst,
    /// Fetch and store a copy; on failure fall back to the cache, then to
    /// the fallback document.
    NetworkFirst,
    /// Not intercepted. The host performs the request as if no worker existed.
    Passthrough,
}

impl fmt::Display for Strategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::CacheFirst => "cache-first",
            Self::NetworkFirst => "network-first",
            Self::Passthrough => "passthrough",
        })
    }
}

// Compiled representation of a route pattern string.
#[derive(Debug, Clone, PartialEq, Eq)]
enum Pattern {
    // Matches one exact path string, e.g. `/index.html`.
    Exact(String),
    // Matches any path that starts with the prefix, e.g. `/assets/presidents/`.
    Prefix(String),
}

impl Pattern {
    /// Parse a route pattern string.
    ///
    /// A pattern ending in `/*` becomes a [`Pattern::Prefix`] that keeps its
    /// trailing slash, so `/assets/presidents/*` does not match
    /// `/assets/presidents-old/x.png`. Anything else is an exact path.
    fn parse(pattern: &str) -> Self {
        match pattern.strip_suffix('*') {
            Some(prefix) if prefix.ends_with('/') => Pattern::Prefix(prefix.to_owned()),
            _ => Pattern::Exact(pattern.to_owned()),
        }
    }

    fn matches(&self, path: &str) -> bool {
        match self {
            Pattern::Exact(p) => p == path,
            Pattern::Prefix(prefix) => path.starts_with(prefix.as_str()),
        }
    }
}

// A single registered route binding a path pattern to a strategy.
#[derive(Debug, Clone)]
struct Route {
    pattern: Pattern,
    strategy: Strategy,
}

/// Classifies requests for one worker origin.
///
/// # Examples
///
/// ```
/// use shellcache::http::Method;
/// use shellcache::router::{Router, Strategy};
/// use url::Url;
///
/// let origin = Url::parse("http://localhost:8080/").unwrap().origin();
/// let router = Router::new(origin).route("/assets/presidents/*", Strategy::CacheFirst);
///
/// let image = Url::parse("http://localhost:8080/assets/presidents/lincoln.png").unwrap();
/// let page = Url::parse("http://localhost:8080/index.html").unwrap();
/// let font = Url::parse("https://fonts.example.com/inter.woff2").unwrap();
///
/// assert_eq!(router.classify(&Method::Get, &image), Strategy::CacheFirst);
/// assert_eq!(router.classify(&Method::Get, &page), Strategy::NetworkFirst);
/// assert_eq!(router.classify(&Method::Get, &font), Strategy::Passthrough);
/// assert_eq!(router.classify(&Method::Post, &page), Strategy::Passthrough);
/// ```
#[derive(Debug, Clone)]
pub struct Router {
    origin: Origin,
    routes: Vec<Route>,
    fallback: Strategy,
}

impl Router {
    /// Creates a router with no routes whose fallback is [`Strategy::NetworkFirst`].
    pub fn new(origin: Origin) -> Self {
        Self {
            origin,
            routes: Vec::new(),
            fallback: Strategy::NetworkFirst,
        }
    }

    /// Builds the router the shipped worker uses: images cache-first,
    /// everything else same-origin network-first.
    pub fn from_config(config: &ShellConfig) -> Self {
        let pattern = format!("{}*", config.image_prefix);
        Self::new(config.scope.origin()).route(&pattern, Strategy::CacheFirst)
    }

    /// Registers a route. Earlier routes take precedence.
    #[must_use]
    pub fn route(mut self, pattern: &str, strategy: Strategy) -> Self {
        self.routes.push(Route {
            pattern: Pattern::parse(pattern),
            strategy,
        });
        self
    }

    /// Sets the strategy for same-origin `GET`s no route matches.
    #[must_use]
    pub fn fallback(mut self, strategy: Strategy) -> Self {
        self.fallback = strategy;
        self
    }

    pub fn origin(&self) -> &Origin {
        &self.origin
    }

    /// Return the number of registered routes.
    pub fn len(&self) -> usize {
        self.routes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.routes.is_empty()
    }

    /// Classify a request by method and URL alone.
    pub fn classify(&self, method: &Method, url: &Url) -> Strategy {
        if method != &Method::Get {
            return Strategy::Passthrough;
        }

        if url.origin() != self.origin {
            return Strategy::Passthrough;
        }

        let path = url.path();
        self.routes
            .iter()
            .find(|route| route.pattern.matches(path))
            .map_or(self.fallback, |route| route.strategy)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn url(s: &str) -> Url {
        Url::parse(s).unwrap()
    }

    fn shipped() -> Router {
        Router::from_config(&ShellConfig::default())
    }

    // ── Pattern ───────────────────────────────────────────────────────────────

    #[test]
    fn pattern_parse_prefix_keeps_slash() {
        assert_eq!(
            Pattern::parse("/assets/presidents/*"),
            Pattern::Prefix("/assets/presidents/".to_owned())
        );
    }

    #[test]
    fn pattern_parse_exact() {
        assert_eq!(
            Pattern::parse("/index.html"),
            Pattern::Exact("/index.html".to_owned())
        );
    }

    #[test]
    fn pattern_star_without_slash_is_exact() {
        assert_eq!(Pattern::parse("/app*"), Pattern::Exact("/app*".to_owned()));
    }

    #[test]
    fn pattern_prefix_respects_segment_boundary() {
        let pat = Pattern::parse("/assets/presidents/*");
        assert!(pat.matches("/assets/presidents/lincoln.png"));
        assert!(pat.matches("/assets/presidents/thumbs/lincoln.webp"));
        assert!(!pat.matches("/assets/presidents-old/lincoln.png"));
        assert!(!pat.matches("/assets/presidents"));
    }

    // ── Router ────────────────────────────────────────────────────────────────

    #[test]
    fn images_are_cache_first() {
        let router = shipped();
        assert_eq!(
            router.classify(&Method::Get, &url("http://localhost:8080/assets/presidents/lincoln.png")),
            Strategy::CacheFirst
        );
    }

    #[test]
    fn image_query_does_not_affect_class() {
        let router = shipped();
        assert_eq!(
            router.classify(
                &Method::Get,
                &url("http://localhost:8080/assets/presidents/adams.png?w=200")
            ),
            Strategy::CacheFirst
        );
    }

    #[test]
    fn shell_and_navigation_are_network_first() {
        let router = shipped();
        for path in ["/", "/index.html", "/data.js", "/assets/icons/icon-192.png", "/timeline"] {
            let u = url(&format!("http://localhost:8080{path}"));
            assert_eq!(router.classify(&Method::Get, &u), Strategy::NetworkFirst, "{path}");
        }
    }

    #[test]
    fn cross_origin_is_passthrough() {
        let router = shipped();
        // Same host, different port is a different origin.
        assert_eq!(
            router.classify(&Method::Get, &url("http://localhost:9090/assets/presidents/x.png")),
            Strategy::Passthrough
        );
        assert_eq!(
            router.classify(&Method::Get, &url("https://localhost:8080/index.html")),
            Strategy::Passthrough
        );
    }

    #[test]
    fn non_get_is_passthrough() {
        let router = shipped();
        let u = url("http://localhost:8080/assets/presidents/lincoln.png");
        for method in [Method::Post, Method::Head, Method::Put, Method::Custom("PURGE".into())] {
            assert_eq!(router.classify(&method, &u), Strategy::Passthrough);
        }
    }

    #[test]
    fn first_matching_route_wins() {
        let origin = url("http://a.test/").origin();
        let router = Router::new(origin)
            .route("/assets/presidents/latest.png", Strategy::NetworkFirst)
            .route("/assets/presidents/*", Strategy::CacheFirst);
        assert_eq!(router.len(), 2);
        assert_eq!(
            router.classify(&Method::Get, &url("http://a.test/assets/presidents/latest.png")),
            Strategy::NetworkFirst
        );
        assert_eq!(
            router.classify(&Method::Get, &url("http://a.test/assets/presidents/polk.png")),
            Strategy::CacheFirst
        );
    }

    #[test]
    fn fallback_is_configurable() {
        let router = Router::new(url("http://a.test/").origin()).fallback(Strategy::Passthrough);
        assert!(router.is_empty());
        assert_eq!(
            router.classify(&Method::Get, &url("http://a.test/index.html")),
            Strategy::Passthrough
        );
    }
}
