// Failure taxonomy surfaced by the resolver, downloader and position source.

use thiserror::Error;

/// Failures of the two-stage fetch protocol.
///
/// Transport errors never escape the resolver/downloader boundary; they are
/// folded into one of these variants. Variants carry a message rather than the
/// source error so the value can be cloned into broadcast session state.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FetchError {
    /// The outgoing search request could not be built. Not retried.
    #[error("invalid search request: {0}")]
    InvalidRequest(String),
    /// Transport or HTTP status failure after the attempt budget was spent.
    #[error("bad search response: {0}")]
    BadResponse(String),
    /// Well-formed response without a usable candidate. Not retried.
    #[error("bad search response data: {0}")]
    BadResponseData(String),
    /// The download URL derived from a candidate is malformed.
    #[error("bad image url: {0}")]
    BadImageUrl(String),
    /// Download transport failure after the attempt budget was spent.
    #[error("image fetch failed: {0}")]
    FetchFailed(String),
}

/// A failure reported by the positioning sensor.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("position error: {0}")]
pub struct PositionError(pub String);

impl PositionError {
    pub fn new(cause: impl Into<String>) -> Self {
        Self(cause.into())
    }
}
