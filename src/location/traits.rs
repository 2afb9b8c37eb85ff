use tokio::sync::mpsc;

use crate::config::EngineConfig;
use crate::model::PositionEvent;

/// Sensor knobs a source honors on its next reading.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Tuning {
    /// Minimum movement in metres between delivered readings. `None` delivers every reading.
    pub distance_filter: Option<u32>,
    /// Readings less accurate than this many metres are not delivered.
    pub desired_accuracy: f64,
}

impl Tuning {
    pub fn from_config(config: &EngineConfig) -> Self {
        Self {
            distance_filter: config.distance_filter_meters,
            desired_accuracy: config.desired_accuracy_meters,
        }
    }
}

impl Default for Tuning {
    fn default() -> Self {
        Self::from_config(&EngineConfig::default())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PermissionStatus {
    NotDetermined,
    Denied,
    Granted,
}

/// Sending half of a source's event stream.
///
/// Permission and error events go on an unbounded lane and are never dropped.
/// Readings go on a bounded lane and are refused when the consumer lags.
#[derive(Clone)]
pub struct PositionEventSender {
    control: mpsc::UnboundedSender<PositionEvent>,
    readings: mpsc::Sender<PositionEvent>,
}

impl PositionEventSender {
    pub fn send_control(
        &self,
        event: PositionEvent,
    ) -> Result<(), mpsc::error::SendError<PositionEvent>> {
        self.control.send(event)
    }

    pub fn try_send_reading(
        &self,
        event: PositionEvent,
    ) -> Result<(), mpsc::error::TrySendError<PositionEvent>> {
        self.readings.try_send(event)
    }

    /// Route `event` to its lane, waiting for room if it is a reading.
    pub async fn send(
        &self,
        event: PositionEvent,
    ) -> Result<(), mpsc::error::SendError<PositionEvent>> {
        match event {
            PositionEvent::PositionUpdate(_) => self.readings.send(event).await,
            _ => self.control.send(event),
        }
    }

    pub fn is_closed(&self) -> bool {
        self.control.is_closed()
    }
}

/// Receiving half of a source's event stream. Pending control events are
/// delivered ahead of pending readings.
pub struct PositionEvents {
    control: mpsc::UnboundedReceiver<PositionEvent>,
    readings: mpsc::Receiver<PositionEvent>,
}

impl PositionEvents {
    /// Next event, or `None` once the sender is gone and both lanes are drained.
    pub async fn recv(&mut self) -> Option<PositionEvent> {
        tokio::select! {
            biased;
            Some(event) = self.control.recv() => Some(event),
            Some(event) = self.readings.recv() => Some(event),
            else => None,
        }
    }

    pub fn try_recv(&mut self) -> Option<PositionEvent> {
        self.control
            .try_recv()
            .or_else(|_| self.readings.try_recv())
            .ok()
    }
}

/// Create an event stream whose reading lane holds at most `buffer` events.
pub fn event_channel(buffer: usize) -> (PositionEventSender, PositionEvents) {
    let (control_tx, control_rx) = mpsc::unbounded_channel();
    let (readings_tx, readings_rx) = mpsc::channel(buffer.max(1));
    (
        PositionEventSender {
            control: control_tx,
            readings: readings_tx,
        },
        PositionEvents {
            control: control_rx,
            readings: readings_rx,
        },
    )
}

/// Producer of [`PositionEvent`]s.
///
/// Events are written from the source's own context and read by a single
/// consumer. A new `subscribe` call replaces the previous subscriber.
pub trait PositionSource: Send + Sync {
    fn subscribe(&self) -> PositionEvents;
    fn start(&self);
    fn stop(&self);
    fn tuning(&self) -> Tuning;
    fn set_tuning(&self, tuning: Tuning);
}
