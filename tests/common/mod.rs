//! Shared fixtures for integration tests.

#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};

use shellcache::fetch::{Fetch, FetchError, FetchFuture};
use shellcache::{Request, Response, StatusCode};
use url::Url;

pub const ORIGIN: &str = "http://localhost:8080";

pub fn url(path: &str) -> Url {
    Url::parse(&format!("{ORIGIN}{path}")).unwrap()
}

pub fn get(path: &str) -> Request {
    Request::get(url(path))
}

/// A network that serves canned bodies, records every fetch, and can go offline.
#[derive(Default)]
pub struct FakeNetwork {
    pages: Mutex<HashMap<String, &'static [u8]>>,
    calls: Mutex<Vec<String>>,
    offline: AtomicBool,
}

impl FakeNetwork {
    pub fn with_pages(pages: &[(&str, &'static [u8])]) -> Self {
        let net = Self::default();
        for (path, body) in pages {
            net.serve(path, body);
        }
        net
    }

    pub fn serve(&self, path: &str, body: &'static [u8]) {
        self.pages.lock().unwrap().insert(url(path).to_string(), body);
    }

    pub fn set_offline(&self, offline: bool) {
        self.offline.store(offline, Ordering::SeqCst);
    }

    pub fn calls(&self) -> usize {
        self.calls.lock().unwrap().len()
    }

    pub fn calls_for(&self, path: &str) -> usize {
        let target = url(path).to_string();
        self.calls.lock().unwrap().iter().filter(|u| **u == target).count()
    }
}

impl Fetch for FakeNetwork {
    fn fetch<'a>(&'a self, request: &'a Request) -> FetchFuture<'a> {
        Box::pin(async move {
            let key = request.url().to_string();
            self.calls.lock().unwrap().push(key.clone());
            if self.offline.load(Ordering::SeqCst) {
                return Err(FetchError::Offline(key));
            }
            let body = self.pages.lock().unwrap().get(&key).copied();
            Ok(match body {
                Some(body) => Response::new(StatusCode::Ok).body(body),
                None => Response::new(StatusCode::NotFound),
            })
        })
    }
}
