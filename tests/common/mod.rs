// Shared test doubles: a scripted transport and search-response builders.

#![allow(dead_code)]

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::Mutex;
use reqwest::Url;

use hike_image_engine::source::traits::Transport;

type Responder = Box<dyn Fn(&Url, usize) -> Result<Bytes> + Send + Sync>;

/// Transport whose replies come from a closure of (url, zero-based call index).
pub struct StubTransport {
    responder: Responder,
    calls: AtomicUsize,
    urls: Mutex<Vec<Url>>,
    delay: Option<Duration>,
}

impl StubTransport {
    pub fn new<F>(responder: F) -> Arc<Self>
    where
        F: Fn(&Url, usize) -> Result<Bytes> + Send + Sync + 'static,
    {
        Arc::new(Self {
            responder: Box::new(responder),
            calls: AtomicUsize::new(0),
            urls: Mutex::new(Vec::new()),
            delay: None,
        })
    }

    /// Same as `new`, but every request waits `delay` before replying.
    pub fn slow<F>(delay: Duration, responder: F) -> Arc<Self>
    where
        F: Fn(&Url, usize) -> Result<Bytes> + Send + Sync + 'static,
    {
        Arc::new(Self {
            responder: Box::new(responder),
            calls: AtomicUsize::new(0),
            urls: Mutex::new(Vec::new()),
            delay: Some(delay),
        })
    }

    /// Always replies with `body`.
    pub fn always(body: impl Into<Bytes>) -> Arc<Self> {
        let body = body.into();
        Self::new(move |_, _| Ok(body.clone()))
    }

    /// Fails the first `failures` calls with an HTTP 503, then replies with `body`.
    pub fn failing_then(failures: usize, body: impl Into<Bytes>) -> Arc<Self> {
        let body = body.into();
        Self::new(move |_, n| {
            if n < failures {
                Err(anyhow!("get failed: HTTP 503"))
            } else {
                Ok(body.clone())
            }
        })
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn urls(&self) -> Vec<Url> {
        self.urls.lock().clone()
    }
}

#[async_trait]
impl Transport for StubTransport {
    async fn get(&self, url: &Url) -> Result<Bytes> {
        let n = self.calls.fetch_add(1, Ordering::SeqCst);
        self.urls.lock().push(url.clone());
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        (self.responder)(url, n)
    }
}

/// A search response carrying one photo.
pub fn search_body(id: &str, secret: &str, server: &str, farm: u32) -> Bytes {
    Bytes::from(format!(
        r#"{{"photos":{{"page":1,"pages":1,"perpage":1,"photo":[{{"id":"{}","owner":"x","secret":"{}","server":"{}","farm":{},"title":"t"}}]}},"stat":"ok"}}"#,
        id, secret, server, farm
    ))
}

pub const EMPTY_SEARCH: &str = r#"{"photos":{"page":1,"pages":0,"perpage":1,"photo":[]},"stat":"ok"}"#;

/// Query parameter `name` of `url`, if present.
pub fn query_param(url: &Url, name: &str) -> Option<String> {
    url.query_pairs()
        .find(|(k, _)| k == name)
        .map(|(_, v)| v.into_owned())
}
