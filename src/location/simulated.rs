// Channel-backed position source driven by explicit readings and permission changes.

use parking_lot::Mutex;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use super::traits::{
    event_channel, PermissionStatus, PositionEventSender, PositionEvents, PositionSource, Tuning,
};
use crate::config::{EngineConfig, DEFAULT_EVENT_BUFFER};
use crate::error::PositionError;
use crate::model::{Position, PositionEvent};

struct SourceState {
    tx: Option<PositionEventSender>,
    permission: PermissionStatus,
    /// `start` was requested and not yet stopped.
    started: bool,
    /// Readings are being delivered.
    updating: bool,
    tuning: Tuning,
    last_delivered: Option<Position>,
    history: Vec<Position>,
}

impl SourceState {
    fn emit(&self, event: PositionEvent) {
        let Some(tx) = &self.tx else {
            debug!("no subscriber, dropping {:?}", event);
            return;
        };
        if let Err(e) = tx.send_control(event) {
            debug!("position subscriber gone, dropping {:?}", e.0);
        }
    }

    /// Hand a reading to the subscriber. Returns whether it was accepted.
    fn deliver(&self, position: Position) -> bool {
        let Some(tx) = &self.tx else {
            debug!("no subscriber, dropping reading {:?}", position);
            return false;
        };
        match tx.try_send_reading(PositionEvent::PositionUpdate(position)) {
            Ok(()) => true,
            Err(mpsc::error::TrySendError::Full(event)) => {
                warn!("position subscriber lagging, dropping {:?}", event);
                false
            }
            Err(mpsc::error::TrySendError::Closed(event)) => {
                debug!("position subscriber gone, dropping {:?}", event);
                false
            }
        }
    }
}

/// Position source fed by the host application (or a test) instead of a hardware sensor.
///
/// It reproduces the sensor's observable behaviour: permission negotiation on
/// start, distance and accuracy filtering, and a newest-first reading history.
pub struct SimulatedPositionSource {
    state: Mutex<SourceState>,
    buffer: usize,
}

impl SimulatedPositionSource {
    pub fn new(permission: PermissionStatus, tuning: Tuning) -> Self {
        Self::with_buffer(permission, tuning, DEFAULT_EVENT_BUFFER)
    }

    /// Source using the engine's tuning and event buffer settings.
    pub fn from_config(config: &EngineConfig, permission: PermissionStatus) -> Self {
        Self::with_buffer(permission, Tuning::from_config(config), config.event_buffer)
    }

    pub fn with_buffer(permission: PermissionStatus, tuning: Tuning, buffer: usize) -> Self {
        Self {
            state: Mutex::new(SourceState {
                tx: None,
                permission,
                started: false,
                updating: false,
                tuning,
                last_delivered: None,
                history: Vec::new(),
            }),
            buffer: buffer.max(1),
        }
    }

    pub fn permission(&self) -> PermissionStatus {
        self.state.lock().permission
    }

    /// Record a permission decision. Started sources report it to the subscriber.
    pub fn set_permission(&self, status: PermissionStatus) {
        let mut state = self.state.lock();
        state.permission = status;
        if !state.started {
            return;
        }

        match status {
            PermissionStatus::Granted => {
                info!("location permission granted");
                state.updating = true;
                state.emit(PositionEvent::PermissionGranted);
            }
            PermissionStatus::Denied => {
                info!("location permission denied");
                state.updating = false;
                state.emit(PositionEvent::PermissionDenied);
            }
            PermissionStatus::NotDetermined => {}
        }
    }

    /// Offer a reading. Returns whether it was delivered.
    ///
    /// Filtered readings and readings refused by a lagging subscriber are not
    /// recorded in the history.
    pub fn push_reading(&self, position: Position) -> bool {
        let mut state = self.state.lock();
        if !state.updating {
            debug!("not updating, ignoring reading {:?}", position);
            return false;
        }

        if position.accuracy > state.tuning.desired_accuracy {
            debug!(
                "reading accuracy {}m worse than {}m, ignoring",
                position.accuracy, state.tuning.desired_accuracy
            );
            return false;
        }

        if let (Some(min), Some(last)) = (state.tuning.distance_filter, state.last_delivered) {
            let moved = last.distance_to(&position);
            if moved < f64::from(min) {
                debug!("moved {:.1}m < filter {}m, ignoring", moved, min);
                return false;
            }
        }

        if !state.deliver(position) {
            return false;
        }
        debug!(
            "received location lat={} lon={}",
            position.latitude, position.longitude
        );
        state.last_delivered = Some(position);
        state.history.insert(0, position);
        true
    }

    /// Report a sensor failure to a started source's subscriber.
    pub fn push_error(&self, cause: impl Into<String>) {
        let state = self.state.lock();
        if state.started {
            state.emit(PositionEvent::PositionError(PositionError::new(cause)));
        }
    }

    /// Delivered readings, newest first.
    pub fn history(&self) -> Vec<Position> {
        self.state.lock().history.clone()
    }

    pub fn is_updating(&self) -> bool {
        self.state.lock().updating
    }
}

impl PositionSource for SimulatedPositionSource {
    fn subscribe(&self) -> PositionEvents {
        let (tx, rx) = event_channel(self.buffer);
        self.state.lock().tx = Some(tx);
        rx
    }

    fn start(&self) {
        info!("start location provider");
        let mut state = self.state.lock();
        state.started = true;
        match state.permission {
            PermissionStatus::Denied => {
                state.updating = false;
                state.emit(PositionEvent::PermissionDenied);
            }
            PermissionStatus::NotDetermined => {
                debug!("location permission not determined, waiting for decision");
            }
            PermissionStatus::Granted => state.updating = true,
        }
    }

    fn stop(&self) {
        info!("stop location provider");
        let mut state = self.state.lock();
        state.started = false;
        state.updating = false;
        state.last_delivered = None;
    }

    fn tuning(&self) -> Tuning {
        self.state.lock().tuning
    }

    fn set_tuning(&self, tuning: Tuning) {
        info!(
            "tuning changed: distance_filter={:?} desired_accuracy={}",
            tuning.distance_filter, tuning.desired_accuracy
        );
        self.state.lock().tuning = tuning;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn unfiltered() -> Tuning {
        Tuning {
            distance_filter: None,
            desired_accuracy: 100.0,
        }
    }

    #[tokio::test]
    async fn test_denied_permission_reported_on_start() {
        let source = SimulatedPositionSource::new(PermissionStatus::Denied, unfiltered());
        let mut rx = source.subscribe();
        source.start();
        assert_eq!(rx.recv().await, Some(PositionEvent::PermissionDenied));
        assert!(!source.push_reading(Position::new(1.0, 1.0, 5.0)));
    }

    #[tokio::test]
    async fn test_waits_for_permission_decision() {
        let source = SimulatedPositionSource::new(PermissionStatus::NotDetermined, unfiltered());
        let mut rx = source.subscribe();
        source.start();
        assert!(!source.push_reading(Position::new(1.0, 1.0, 5.0)));

        source.set_permission(PermissionStatus::Granted);
        assert_eq!(rx.recv().await, Some(PositionEvent::PermissionGranted));

        let p = Position::new(2.0, 2.0, 5.0);
        assert!(source.push_reading(p));
        assert_eq!(rx.recv().await, Some(PositionEvent::PositionUpdate(p)));
    }

    #[test]
    fn test_distance_and_accuracy_filters() {
        let source = SimulatedPositionSource::new(
            PermissionStatus::Granted,
            Tuning {
                distance_filter: Some(100),
                desired_accuracy: 20.0,
            },
        );
        let _rx = source.subscribe();
        source.start();

        let origin = Position::new(53.27, -7.78, 5.0);
        assert!(source.push_reading(origin));
        // ~11 m north.
        assert!(!source.push_reading(Position::new(53.2701, -7.78, 5.0)));
        // ~1.1 km north but too inaccurate.
        assert!(!source.push_reading(Position::new(53.28, -7.78, 50.0)));
        assert!(source.push_reading(Position::new(53.28, -7.78, 5.0)));

        let history = source.history();
        assert_eq!(history.len(), 2);
        assert_eq!(history[0], Position::new(53.28, -7.78, 0.0));
        assert_eq!(history[1], origin);
    }

    #[test]
    fn test_from_config_applies_tuning_and_buffer() {
        let config = EngineConfig {
            event_buffer: 1,
            distance_filter_meters: None,
            desired_accuracy_meters: 25.0,
            ..EngineConfig::default()
        };
        let source = SimulatedPositionSource::from_config(&config, PermissionStatus::Granted);
        assert_eq!(source.tuning().distance_filter, None);
        assert_eq!(source.tuning().desired_accuracy, 25.0);

        let mut rx = source.subscribe();
        source.start();
        let first = Position::new(1.0, 1.0, 5.0);
        assert!(source.push_reading(first));
        // The reading lane is full: refused and not recorded.
        assert!(!source.push_reading(Position::new(2.0, 2.0, 5.0)));
        assert_eq!(source.history(), vec![first]);

        // Control events still get through, ahead of the queued reading.
        source.set_permission(PermissionStatus::Denied);
        assert_eq!(rx.try_recv(), Some(PositionEvent::PermissionDenied));
        assert_eq!(rx.try_recv(), Some(PositionEvent::PositionUpdate(first)));
        assert_eq!(rx.try_recv(), None);
    }

    #[test]
    fn test_stop_halts_delivery() {
        let source = SimulatedPositionSource::new(PermissionStatus::Granted, unfiltered());
        let _rx = source.subscribe();
        source.start();
        assert!(source.is_updating());
        source.stop();
        assert!(!source.is_updating());
        assert!(!source.push_reading(Position::new(1.0, 1.0, 5.0)));
    }
}
