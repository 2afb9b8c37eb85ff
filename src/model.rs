// Value types shared across the pipeline: positions, events, references, session state.

use std::hash::{Hash, Hasher};

use reqwest::Url;

use crate::error::{FetchError, PositionError};

/// Mean Earth radius used for great-circle distances, in metres.
const EARTH_RADIUS_METERS: f64 = 6_371_008.8;

/// A geographic reading. Identity is (latitude, longitude); `accuracy` is metadata.
#[derive(Debug, Clone, Copy)]
pub struct Position {
    pub latitude: f64,
    pub longitude: f64,
    /// Horizontal accuracy radius in metres.
    pub accuracy: f64,
}

impl Position {
    pub fn new(latitude: f64, longitude: f64, accuracy: f64) -> Self {
        Self {
            latitude,
            longitude,
            accuracy,
        }
    }

    /// Great-circle (haversine) distance to `other`, in metres.
    pub fn distance_to(&self, other: &Position) -> f64 {
        let lat1 = self.latitude.to_radians();
        let lat2 = other.latitude.to_radians();
        let dlat = lat2 - lat1;
        let dlon = (other.longitude - self.longitude).to_radians();

        let a = (dlat / 2.0).sin().powi(2) + lat1.cos() * lat2.cos() * (dlon / 2.0).sin().powi(2);
        2.0 * EARTH_RADIUS_METERS * a.sqrt().atan2((1.0 - a).sqrt())
    }

    pub fn is_finite(&self) -> bool {
        self.latitude.is_finite() && self.longitude.is_finite()
    }

    // -0.0 and 0.0 must hash alike since they compare equal.
    fn identity_bits(&self) -> (u64, u64) {
        let norm = |v: f64| if v == 0.0 { 0.0f64.to_bits() } else { v.to_bits() };
        (norm(self.latitude), norm(self.longitude))
    }
}

impl PartialEq for Position {
    fn eq(&self, other: &Self) -> bool {
        self.identity_bits() == other.identity_bits()
    }
}

impl Eq for Position {}

impl Hash for Position {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.identity_bits().hash(state);
    }
}

/// Events produced by a position source.
#[derive(Debug, Clone, PartialEq)]
pub enum PositionEvent {
    PermissionGranted,
    PositionUpdate(Position),
    PermissionDenied,
    PositionError(PositionError),
}

/// A downloadable image locator plus the position it was resolved for.
#[derive(Debug, Clone, PartialEq)]
pub struct ImageReference {
    pub url: Url,
    pub position: Position,
}

impl ImageReference {
    pub fn new(url: Url, position: Position) -> Self {
        Self { url, position }
    }

    /// Stable cache key for this reference.
    pub fn key(&self) -> &str {
        self.url.as_str()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum FailureReason {
    PositionFailure(PositionError),
    FetchFailure(FetchError),
}

/// Observable state of a location session.
#[derive(Debug, Clone, PartialEq, Default)]
pub enum SessionState {
    #[default]
    Stopped,
    Started,
    ImageAvailable(ImageReference),
    PermissionMissing,
    Failed(FailureReason),
}

impl SessionState {
    /// Whether the session is consuming position events.
    pub fn is_active(&self) -> bool {
        matches!(self, SessionState::Started | SessionState::ImageAvailable(_))
    }

    /// Absorbing states only leave through an explicit stop.
    pub fn is_blocked(&self) -> bool {
        matches!(
            self,
            SessionState::PermissionMissing | SessionState::Failed(_)
        )
    }

    pub fn label(&self) -> &'static str {
        match self {
            SessionState::Stopped => "stopped",
            SessionState::Started => "started",
            SessionState::ImageAvailable(_) => "image_available",
            SessionState::PermissionMissing => "permission_missing",
            SessionState::Failed(_) => "failed",
        }
    }
}
