use anyhow::{anyhow, Result};
use serde::Deserialize;

/// Remote photo search endpoint.
pub const DEFAULT_SEARCH_ENDPOINT: &str = "https://www.flickr.com/services/rest/";

/// Search method selector sent with every search request.
pub const SEARCH_METHOD: &str = "flickr.photos.search";

/// Host suffix for photo downloads: `farm{farm}.<host>`.
pub const DEFAULT_IMAGE_HOST: &str = "staticflickr.com";

/// Attempt budget shared by search and download requests.
pub const DEFAULT_MAX_ATTEMPTS: u32 = 3;

/// Linear backoff step between attempts, in milliseconds.
pub const DEFAULT_RETRY_BACKOFF_MS: u64 = 500;

/// Upper bound on a single network attempt, in milliseconds.
pub const DEFAULT_ATTEMPT_TIMEOUT_MS: u64 = 10_000;

/// Capacity of the position event channel.
pub const DEFAULT_EVENT_BUFFER: usize = 64;

/// Minimum movement (metres) between delivered readings.
pub const DEFAULT_DISTANCE_FILTER_METERS: u32 = 100;

/// Readings with a worse horizontal accuracy (metres) are dropped.
pub const DEFAULT_DESIRED_ACCURACY_METERS: f64 = 10.0;

/// Top-level configuration for the image engine.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// API key passed on every search request.
    pub api_key: String,
    /// Base URL of the search service.
    pub search_endpoint: String,
    /// Host suffix used when deriving download URLs.
    pub image_host: String,
    /// Attempts per logical network operation (at least 1).
    pub max_attempts: u32,
    /// Backoff step; attempt `n` waits `n * retry_backoff_ms` before retrying.
    pub retry_backoff_ms: u64,
    /// Per-attempt timeout.
    pub attempt_timeout_ms: u64,
    /// Bound on cached images. `None` keeps every image for the process lifetime.
    pub cache_capacity: Option<usize>,
    /// Capacity of the position event channel.
    pub event_buffer: usize,
    /// Minimum movement between readings. `None` delivers every reading.
    pub distance_filter_meters: Option<u32>,
    pub desired_accuracy_meters: f64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            api_key: String::new(),
            search_endpoint: DEFAULT_SEARCH_ENDPOINT.to_string(),
            image_host: DEFAULT_IMAGE_HOST.to_string(),
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            retry_backoff_ms: DEFAULT_RETRY_BACKOFF_MS,
            attempt_timeout_ms: DEFAULT_ATTEMPT_TIMEOUT_MS,
            cache_capacity: None,
            event_buffer: DEFAULT_EVENT_BUFFER,
            distance_filter_meters: Some(DEFAULT_DISTANCE_FILTER_METERS),
            desired_accuracy_meters: DEFAULT_DESIRED_ACCURACY_METERS,
        }
    }
}

impl EngineConfig {
    /// Parse a JSON document; absent fields take their defaults.
    pub fn from_json_str(raw: &str) -> Result<Self> {
        let config: Self =
            serde_json::from_str(raw).map_err(|e| anyhow!("invalid engine config: {}", e))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.max_attempts == 0 {
            return Err(anyhow!("max_attempts must be > 0"));
        }
        if self.event_buffer == 0 {
            return Err(anyhow!("event_buffer must be > 0"));
        }
        if self.cache_capacity == Some(0) {
            return Err(anyhow!("cache_capacity must be > 0 when set"));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = EngineConfig::default();
        assert_eq!(config.max_attempts, 3);
        assert_eq!(config.search_endpoint, DEFAULT_SEARCH_ENDPOINT);
        assert_eq!(config.distance_filter_meters, Some(100));
        assert!(config.cache_capacity.is_none());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_partial_json_keeps_defaults() {
        let config =
            EngineConfig::from_json_str(r#"{"api_key":"k","max_attempts":5,"cache_capacity":32}"#)
                .unwrap();
        assert_eq!(config.api_key, "k");
        assert_eq!(config.max_attempts, 5);
        assert_eq!(config.cache_capacity, Some(32));
        assert_eq!(config.image_host, DEFAULT_IMAGE_HOST);
        assert_eq!(config.retry_backoff_ms, DEFAULT_RETRY_BACKOFF_MS);
    }

    #[test]
    fn test_zero_attempts_rejected() {
        assert!(EngineConfig::from_json_str(r#"{"max_attempts":0}"#).is_err());
        assert!(EngineConfig::from_json_str(r#"{"cache_capacity":0}"#).is_err());
    }
}
