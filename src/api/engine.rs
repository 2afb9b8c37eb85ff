use std::collections::HashMap;
use std::sync::Arc;

use anyhow::Result;
use tracing::info;

use crate::config::EngineConfig;
use crate::engine::cache::FetchCache;
use crate::engine::downloader::Downloader;
use crate::engine::gallery::Gallery;
use crate::engine::resolver::{ImageResolver, SearchResolver};
use crate::engine::retry::RetryPolicy;
use crate::engine::session::SessionController;
use crate::engine::stats::{StatsCollector, StatsSnapshot};
use crate::location::{PositionSource, Tuning};
use crate::source::http_source::HttpSource;
use crate::source::traits::Transport;

/// A fully wired pipeline: session controller, resolver, downloader and cache.
pub struct ImageEngine {
    config: EngineConfig,
    controller: SessionController,
    downloader: Arc<Downloader>,
    cache: Arc<FetchCache>,
    stats: Arc<StatsCollector>,
}

impl ImageEngine {
    /// Build an engine talking to the real search service over HTTP.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn new(config: EngineConfig, source: Arc<dyn PositionSource>) -> Result<Self> {
        let transport: Arc<dyn Transport> = Arc::new(HttpSource::new(HashMap::new()));
        Self::with_transport(config, source, transport)
    }

    /// Build an engine over a caller-supplied transport.
    pub fn with_transport(
        config: EngineConfig,
        source: Arc<dyn PositionSource>,
        transport: Arc<dyn Transport>,
    ) -> Result<Self> {
        config.validate()?;

        let stats = Arc::new(StatsCollector::new());
        let cache = Arc::new(FetchCache::with_capacity(config.cache_capacity));
        let resolver: Arc<dyn ImageResolver> = Arc::new(SearchResolver::new(
            Arc::clone(&transport),
            &config,
            Arc::clone(&stats),
        ));
        let downloader = Arc::new(Downloader::new(
            transport,
            Arc::clone(&cache),
            RetryPolicy::from_config(&config),
            Arc::clone(&stats),
        ));

        source.set_tuning(Tuning::from_config(&config));
        let controller = SessionController::spawn(source, resolver);

        info!(
            "image engine ready: attempts={} cache_capacity={:?}",
            config.max_attempts, config.cache_capacity
        );

        Ok(Self {
            config,
            controller,
            downloader,
            cache,
            stats,
        })
    }

    pub fn controller(&self) -> &SessionController {
        &self.controller
    }

    pub fn downloader(&self) -> &Arc<Downloader> {
        &self.downloader
    }

    pub fn cache(&self) -> &Arc<FetchCache> {
        &self.cache
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Start a gallery following this engine's session.
    pub fn gallery(&self) -> Gallery {
        Gallery::follow(
            self.controller.subscribe_images(),
            Arc::clone(&self.downloader),
        )
    }

    pub fn stats(&self) -> StatsSnapshot {
        self.stats.snapshot()
    }

    /// Stop the session loop and abandon pending work.
    pub fn shutdown(&self) {
        self.controller.shutdown();
    }
}
