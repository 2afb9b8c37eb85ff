use std::collections::HashMap;
use std::sync::Arc;

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::RwLock;
use reqwest::{Client, RequestBuilder, Url};
use tracing::{debug, warn};

use super::traits::Transport;

/// reqwest-backed transport shared by the resolver and the downloader.
pub struct HttpSource {
    client: Client,
    headers: Arc<RwLock<HashMap<String, String>>>,
}

impl HttpSource {
    pub fn new(headers: HashMap<String, String>) -> Self {
        Self::with_client(Client::new(), headers)
    }

    pub fn with_client(client: Client, headers: HashMap<String, String>) -> Self {
        Self {
            client,
            headers: Arc::new(RwLock::new(headers)),
        }
    }

    /// Replace the extra headers sent with every request.
    pub fn update_headers(&self, new_headers: HashMap<String, String>) {
        *self.headers.write() = new_headers;
    }

    fn build_request(&self, url: &Url) -> RequestBuilder {
        let headers = self.headers.read().clone();

        let mut req = self.client.get(url.clone());
        for (k, v) in &headers {
            req = req.header(k.as_str(), v.as_str());
        }
        req
    }
}

impl Default for HttpSource {
    fn default() -> Self {
        Self::new(HashMap::new())
    }
}

#[async_trait]
impl Transport for HttpSource {
    async fn get(&self, url: &Url) -> Result<Bytes> {
        let resp = self.build_request(url).send().await?;

        let status = resp.status();
        debug!("http get status={} url={}", status.as_u16(), url);
        if !status.is_success() {
            warn!("http get failed status={} url={}", status.as_u16(), url);
            return Err(anyhow!("get failed: HTTP {}", status.as_u16()));
        }

        let bytes = resp.bytes().await?;
        Ok(bytes)
    }
}
