use anyhow::Result;
use async_trait::async_trait;
use bytes::Bytes;
use reqwest::Url;

/// A byte-level GET transport.
///
/// Implementations return `Err` for transport failures and for non-success
/// HTTP statuses alike; callers decide whether to retry.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn get(&self, url: &Url) -> Result<Bytes>;
}
