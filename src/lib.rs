// Location-triggered photo pipeline: position events in, resolved and downloaded images out.

pub mod api;
pub mod config;
pub mod engine;
pub mod error;
pub mod location;
pub mod model;
pub mod source;

pub use error::{FetchError, PositionError};
pub use model::{FailureReason, ImageReference, Position, PositionEvent, SessionState};
