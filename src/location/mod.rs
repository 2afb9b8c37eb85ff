// Position sources: the sensor boundary feeding position and permission events to a session.

pub mod simulated;
pub mod traits;

pub use simulated::SimulatedPositionSource;
pub use traits::{
    event_channel, PermissionStatus, PositionEventSender, PositionEvents, PositionSource, Tuning,
};
