// Image byte downloader: cache first, then a retried fetch shared by concurrent callers.

use std::collections::HashMap;
use std::sync::Arc;

use bytes::Bytes;
use parking_lot::Mutex;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info};

use super::cache::FetchCache;
use super::retry::RetryPolicy;
use super::stats::StatsCollector;
use crate::error::FetchError;
use crate::model::ImageReference;
use crate::source::traits::Transport;

/// Progress of one per-item fetch task.
#[derive(Debug, Clone, PartialEq)]
pub enum LoadState {
    Loading,
    Loaded(Bytes),
    Failed(FetchError),
}

impl LoadState {
    pub fn is_settled(&self) -> bool {
        !matches!(self, LoadState::Loading)
    }
}

/// Handle to a background download of a single reference.
pub struct FetchTask {
    reference: ImageReference,
    state_rx: watch::Receiver<LoadState>,
    handle: JoinHandle<()>,
}

impl FetchTask {
    pub fn reference(&self) -> &ImageReference {
        &self.reference
    }

    pub fn state(&self) -> LoadState {
        self.state_rx.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<LoadState> {
        self.state_rx.clone()
    }

    /// Wait until the download settles and return the final state.
    pub async fn wait(&self) -> LoadState {
        let mut rx = self.state_rx.clone();
        let settled = match rx.wait_for(LoadState::is_settled).await {
            Ok(state) => state.clone(),
            // Sender gone without settling: the task was cancelled.
            Err(_) => self.state(),
        };
        settled
    }

    /// Abandon the download. The cache is left untouched if the fetch had not finished.
    pub fn cancel(&self) {
        self.handle.abort();
    }
}

impl Drop for FetchTask {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

/// Result of an in-flight fetch; `None` until the leader finishes.
type SharedOutcome = Option<Result<Bytes, FetchError>>;

type InFlight = Arc<Mutex<HashMap<String, watch::Receiver<SharedOutcome>>>>;

pub struct Downloader {
    transport: Arc<dyn Transport>,
    cache: Arc<FetchCache>,
    retry: RetryPolicy,
    stats: Arc<StatsCollector>,
    in_flight: InFlight,
}

/// The leader's claim on a key. Dropping it unfinished (the leader was
/// cancelled) closes the channel and followers race to claim the key again.
struct InFlightGuard {
    key: String,
    in_flight: InFlight,
    done_tx: watch::Sender<SharedOutcome>,
    released: bool,
}

impl InFlightGuard {
    fn release(&mut self) {
        if !self.released {
            self.in_flight.lock().remove(&self.key);
            self.released = true;
        }
    }

    /// Publish the leader's result to every follower.
    fn finish(mut self, result: &Result<Bytes, FetchError>) {
        self.release();
        self.done_tx.send_replace(Some(result.clone()));
    }
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        self.release();
    }
}

struct ActiveDownload<'a>(&'a StatsCollector);

impl<'a> ActiveDownload<'a> {
    fn new(stats: &'a StatsCollector) -> Self {
        stats.increment_active();
        Self(stats)
    }
}

impl Drop for ActiveDownload<'_> {
    fn drop(&mut self) {
        self.0.decrement_active();
    }
}

enum Role {
    Leader(InFlightGuard),
    Follower(watch::Receiver<SharedOutcome>),
}

impl Downloader {
    pub fn new(
        transport: Arc<dyn Transport>,
        cache: Arc<FetchCache>,
        retry: RetryPolicy,
        stats: Arc<StatsCollector>,
    ) -> Self {
        Self {
            transport,
            cache,
            retry,
            stats,
            in_flight: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    pub fn cache(&self) -> &Arc<FetchCache> {
        &self.cache
    }

    /// Return the bytes for `reference`, from cache when possible.
    ///
    /// Concurrent calls for the same reference share one network fetch and its
    /// result, failures included. If the fetching caller is cancelled, one of
    /// the waiting callers takes over.
    pub async fn download(&self, reference: &ImageReference) -> Result<Bytes, FetchError> {
        let key = reference.key();
        loop {
            if let Some(data) = self.lookup(key) {
                return Ok(data);
            }

            match self.claim(key) {
                Role::Leader(guard) => {
                    let result = self.fetch(reference).await;
                    guard.finish(&result);
                    return result;
                }
                Role::Follower(mut done_rx) => {
                    debug!("download {} joining in-flight fetch", key);
                    let shared = match done_rx.wait_for(Option::is_some).await {
                        Ok(outcome) => outcome.clone(),
                        Err(_) => None,
                    };
                    match shared {
                        Some(result) => return result,
                        None => debug!("in-flight fetch of {} abandoned, claiming again", key),
                    }
                }
            }
        }
    }

    /// Spawn a background download for one reference, observable through a [`FetchTask`].
    pub fn spawn_fetch(self: &Arc<Self>, reference: ImageReference) -> FetchTask {
        let (state_tx, state_rx) = watch::channel(LoadState::Loading);
        let downloader = Arc::clone(self);
        let task_reference = reference.clone();

        let handle = tokio::spawn(async move {
            let state = match downloader.download(&task_reference).await {
                Ok(data) => LoadState::Loaded(data),
                Err(e) => LoadState::Failed(e),
            };
            state_tx.send_replace(state);
        });

        FetchTask {
            reference,
            state_rx,
            handle,
        }
    }

    fn lookup(&self, key: &str) -> Option<Bytes> {
        let hit = self.cache.get(key);
        self.stats.record_cache_lookup(hit.is_some());
        if hit.is_some() {
            debug!("download {} served from cache", key);
        }
        hit
    }

    fn claim(&self, key: &str) -> Role {
        let mut in_flight = self.in_flight.lock();
        if let Some(rx) = in_flight.get(key) {
            return Role::Follower(rx.clone());
        }

        let (done_tx, done_rx) = watch::channel(None);
        in_flight.insert(key.to_string(), done_rx);
        Role::Leader(InFlightGuard {
            key: key.to_string(),
            in_flight: Arc::clone(&self.in_flight),
            done_tx,
            released: false,
        })
    }

    async fn fetch(&self, reference: &ImageReference) -> Result<Bytes, FetchError> {
        let key = reference.key();
        let transport = &self.transport;
        let stats = &self.stats;
        let url = &reference.url;

        let _active = ActiveDownload::new(stats);
        let result = self
            .retry
            .run("image fetch", &self.stats, move || async move {
                stats.record_image_request();
                transport.get(url).await
            })
            .await;

        let data = result.map_err(|e| FetchError::FetchFailed(e.to_string()))?;
        self.cache.put(key, data.clone());
        self.stats.record_downloaded(data.len() as u64);
        info!("downloaded {} ({} bytes)", key, data.len());
        Ok(data)
    }
}
