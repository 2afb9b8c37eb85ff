// Live statistics aggregation: request counts, cache hit rate and throughput.

use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::time::Instant;

use parking_lot::Mutex;

struct StatsSample {
    at: Instant,
    download_bytes: u64,
}

#[derive(Debug, Clone)]
pub struct StatsSnapshot {
    pub search_requests: u64,
    pub image_requests: u64,
    pub retries: u64,
    pub resolved: u64,
    pub downloaded: u64,
    pub download_bytes: u64,
    pub download_bps: u64,
    pub active_downloads: u32,
    pub cache_hit_rate: f64,
}

pub struct StatsCollector {
    search_requests: AtomicU64,
    image_requests: AtomicU64,
    retries: AtomicU64,
    resolved: AtomicU64,
    downloaded: AtomicU64,
    download_bytes_total: AtomicU64,
    active_downloads: AtomicU32,
    cache_hits: AtomicU64,
    cache_misses: AtomicU64,
    last_sample: Mutex<StatsSample>,
}

impl StatsCollector {
    pub fn new() -> Self {
        Self {
            search_requests: AtomicU64::new(0),
            image_requests: AtomicU64::new(0),
            retries: AtomicU64::new(0),
            resolved: AtomicU64::new(0),
            downloaded: AtomicU64::new(0),
            download_bytes_total: AtomicU64::new(0),
            active_downloads: AtomicU32::new(0),
            cache_hits: AtomicU64::new(0),
            cache_misses: AtomicU64::new(0),
            last_sample: Mutex::new(StatsSample {
                at: Instant::now(),
                download_bytes: 0,
            }),
        }
    }

    /// One search attempt went out on the wire.
    pub fn record_search_request(&self) {
        self.search_requests.fetch_add(1, Ordering::Relaxed);
    }

    /// One image attempt went out on the wire.
    pub fn record_image_request(&self) {
        self.image_requests.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_retry(&self) {
        self.retries.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_resolved(&self) {
        self.resolved.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_downloaded(&self, bytes: u64) {
        self.downloaded.fetch_add(1, Ordering::Relaxed);
        self.download_bytes_total.fetch_add(bytes, Ordering::Relaxed);
    }

    pub fn record_cache_lookup(&self, hit: bool) {
        if hit {
            self.cache_hits.fetch_add(1, Ordering::Relaxed);
        } else {
            self.cache_misses.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn increment_active(&self) {
        self.active_downloads.fetch_add(1, Ordering::Relaxed);
    }

    pub fn decrement_active(&self) {
        self.active_downloads.fetch_sub(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        let now = Instant::now();
        let current_download = self.download_bytes_total.load(Ordering::Relaxed);

        let download_bps = {
            let mut sample = self.last_sample.lock();
            let elapsed = now.duration_since(sample.at).as_secs_f64();

            let bps = if elapsed > 0.1 {
                ((current_download - sample.download_bytes) as f64 / elapsed) as u64
            } else {
                0
            };

            // Update sample for next call
            sample.at = now;
            sample.download_bytes = current_download;

            bps
        };

        let hits = self.cache_hits.load(Ordering::Relaxed);
        let lookups = hits + self.cache_misses.load(Ordering::Relaxed);
        let cache_hit_rate = if lookups > 0 {
            hits as f64 / lookups as f64
        } else {
            0.0
        };

        StatsSnapshot {
            search_requests: self.search_requests.load(Ordering::Relaxed),
            image_requests: self.image_requests.load(Ordering::Relaxed),
            retries: self.retries.load(Ordering::Relaxed),
            resolved: self.resolved.load(Ordering::Relaxed),
            downloaded: self.downloaded.load(Ordering::Relaxed),
            download_bytes: current_download,
            download_bps,
            active_downloads: self.active_downloads.load(Ordering::Relaxed),
            cache_hit_rate,
        }
    }
}

impl Default for StatsCollector {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stats_basic() {
        let stats = StatsCollector::new();
        stats.record_downloaded(1000);
        stats.record_downloaded(500);
        stats.record_search_request();
        stats.record_retry();

        stats.record_cache_lookup(true);
        stats.record_cache_lookup(false);
        stats.record_cache_lookup(false);
        stats.record_cache_lookup(true);

        stats.increment_active();
        stats.increment_active();
        stats.decrement_active();

        let snap = stats.snapshot();
        assert_eq!(snap.downloaded, 2);
        assert_eq!(snap.download_bytes, 1500);
        assert_eq!(snap.search_requests, 1);
        assert_eq!(snap.retries, 1);
        assert_eq!(snap.active_downloads, 1);
        assert!((snap.cache_hit_rate - 0.5).abs() < f64::EPSILON);
    }
}
