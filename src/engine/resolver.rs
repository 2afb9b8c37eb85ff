// Position → image reference: photo search request, first-candidate pick, URL derivation.

use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use reqwest::Url;
use serde::Deserialize;
use tracing::{debug, info, warn};

use super::cache::BoundedMap;
use super::retry::RetryPolicy;
use super::stats::StatsCollector;
use crate::config::{EngineConfig, SEARCH_METHOD};
use crate::error::FetchError;
use crate::model::{ImageReference, Position};
use crate::source::traits::Transport;

/// One search hit, as returned by the search service.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct PhotoDescriptor {
    pub id: String,
    pub secret: String,
    pub server: String,
    pub farm: u32,
}

#[derive(Debug, Deserialize)]
struct SearchResponse {
    photos: SearchPage,
}

#[derive(Debug, Deserialize)]
struct SearchPage {
    photo: Vec<PhotoDescriptor>,
}

#[async_trait]
pub trait ImageResolver: Send + Sync {
    async fn resolve(&self, position: &Position) -> Result<ImageReference, FetchError>;
}

/// Build the download URL for `photo`: `https://farm{farm}.{host}/{server}/{id}_{secret}.jpg`.
pub fn image_url(photo: &PhotoDescriptor, image_host: &str) -> Result<Url, FetchError> {
    for (name, value) in [
        ("id", &photo.id),
        ("secret", &photo.secret),
        ("server", &photo.server),
    ] {
        if value.is_empty() || value.contains(['/', '?', '#']) || value.contains(char::is_whitespace)
        {
            return Err(FetchError::BadImageUrl(format!(
                "photo {} {:?} is not a path segment",
                name, value
            )));
        }
    }

    let raw = format!(
        "https://farm{}.{}/{}/{}_{}.jpg",
        photo.farm, image_host, photo.server, photo.id, photo.secret
    );
    Url::parse(&raw).map_err(|e| FetchError::BadImageUrl(format!("{}: {}", raw, e)))
}

/// Decode a search response body and pick its first candidate.
pub fn first_candidate(body: &[u8]) -> Result<PhotoDescriptor, FetchError> {
    let response: SearchResponse = serde_json::from_slice(body)
        .map_err(|e| FetchError::BadResponseData(format!("undecodable search response: {}", e)))?;

    response
        .photos
        .photo
        .into_iter()
        .next()
        .ok_or_else(|| FetchError::BadResponseData("search returned no photos".to_string()))
}

/// Resolves positions through the remote photo search service.
pub struct SearchResolver {
    transport: Arc<dyn Transport>,
    retry: RetryPolicy,
    stats: Arc<StatsCollector>,
    api_key: String,
    search_endpoint: String,
    image_host: String,
    /// Bounded by the same capacity as the image cache.
    resolved: Mutex<BoundedMap<Position, ImageReference>>,
}

impl SearchResolver {
    pub fn new(
        transport: Arc<dyn Transport>,
        config: &EngineConfig,
        stats: Arc<StatsCollector>,
    ) -> Self {
        Self {
            transport,
            retry: RetryPolicy::from_config(config),
            stats,
            api_key: config.api_key.clone(),
            search_endpoint: config.search_endpoint.clone(),
            image_host: config.image_host.clone(),
            resolved: Mutex::new(BoundedMap::new(config.cache_capacity)),
        }
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Build the search request URL for `position`.
    pub fn search_url(&self, position: &Position) -> Result<Url, FetchError> {
        if !position.is_finite() {
            return Err(FetchError::InvalidRequest(format!(
                "non-finite coordinates lat={} lon={}",
                position.latitude, position.longitude
            )));
        }

        let params = [
            ("method", SEARCH_METHOD.to_string()),
            ("api_key", self.api_key.clone()),
            ("lat", position.latitude.to_string()),
            ("lon", position.longitude.to_string()),
            ("per_page", "1".to_string()),
            ("page", "1".to_string()),
            ("format", "json".to_string()),
            ("nojsoncallback", "1".to_string()),
        ];

        let url = Url::parse_with_params(&self.search_endpoint, &params).map_err(|e| {
            FetchError::InvalidRequest(format!("endpoint {}: {}", self.search_endpoint, e))
        })?;
        if url.cannot_be_a_base() || url.host_str().is_none() {
            return Err(FetchError::InvalidRequest(format!(
                "endpoint {} has no host",
                self.search_endpoint
            )));
        }
        Ok(url)
    }

    /// Forget memoized resolutions.
    pub fn clear_resolved(&self) {
        self.resolved.lock().clear();
    }
}

#[async_trait]
impl ImageResolver for SearchResolver {
    async fn resolve(&self, position: &Position) -> Result<ImageReference, FetchError> {
        if let Some(reference) = self.resolved.lock().get(position) {
            debug!(
                "resolve memo hit lat={} lon={}",
                position.latitude, position.longitude
            );
            return Ok(reference);
        }

        let url = self.search_url(position)?;
        debug!("search lat={} lon={}", position.latitude, position.longitude);

        let transport = &self.transport;
        let stats = &self.stats;
        let search_url = &url;
        let body = self
            .retry
            .run("photo search", &self.stats, move || async move {
                stats.record_search_request();
                transport.get(search_url).await
            })
            .await
            .map_err(|e| FetchError::BadResponse(e.to_string()))?;

        let photo = first_candidate(&body).inspect_err(|e| {
            warn!(
                "search lat={} lon={} unusable: {}",
                position.latitude, position.longitude, e
            )
        })?;
        let image = image_url(&photo, &self.image_host)?;

        info!(
            "resolved lat={} lon={} to {}",
            position.latitude, position.longitude, image
        );
        self.stats.record_resolved();

        let reference = ImageReference::new(image, *position);
        self.resolved.lock().insert(*position, reference.clone());
        Ok(reference)
    }
}
