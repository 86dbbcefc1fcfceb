//! # Dashboard Events
//!
//! Everything the core tells a presentation layer goes through one broadcast
//! stream of [`DashboardEvent`]s: per-message device notifications and
//! diagnostics. Any number of observers can subscribe; a UI updates
//! incrementally from the events and reads the registry only when it needs a
//! full picture.
//!
//! Observers that fall behind by more than the channel capacity lose the
//! oldest events and see `RecvError::Lagged`.

use chrono::{DateTime, Local};
use std::fmt;
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

use crate::payload::{DiscoveryRecord, StateSnapshot, TelemetrySnapshot};
use crate::registry::DeviceId;

pub const EVENT_CHANNEL_CAPACITY: usize = 256;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeviceEventKind {
    State,
    Telemetry,
    Discovery,
    Online,
    Offline,
}

/// What changed for the device
#[derive(Debug, Clone, PartialEq)]
pub enum DeviceEventPayload {
    State(StateSnapshot),
    Telemetry(TelemetrySnapshot),
    Discovery(Box<DiscoveryRecord>),
    Availability { online: bool, changed: bool },
}

/// Emitted once per successfully processed message
#[derive(Debug, Clone, PartialEq)]
pub struct DeviceEvent {
    pub kind: DeviceEventKind,
    pub device_id: DeviceId,
    pub payload: DeviceEventPayload,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DiagnosticKind {
    UnrecognizedTopic,
    DecodeFailed,
    UnknownDevice,
    SubscriptionFailed,
    Connection,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Diagnostic {
    pub kind: DiagnosticKind,
    pub message: String,
    pub timestamp: DateTime<Local>,
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{} - {}", self.timestamp.format("%H:%M:%S"), self.message)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum DashboardEvent {
    Diagnostic(Diagnostic),
    Device(DeviceEvent),
}

/// Sending side of the event stream, owned by the dispatcher
#[derive(Debug, Clone)]
pub struct EventSink {
    sender: broadcast::Sender<DashboardEvent>,
}

impl Default for EventSink {
    fn default() -> Self {
        Self::new(EVENT_CHANNEL_CAPACITY)
    }
}

impl EventSink {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<DashboardEvent> {
        self.sender.subscribe()
    }

    /// Logs and broadcasts a diagnostic
    pub fn diagnostic(&self, kind: DiagnosticKind, message: impl Into<String>) {
        let message = message.into();
        match kind {
            DiagnosticKind::Connection => info!("{}", message),
            _ => warn!("{}", message),
        }
        self.send(DashboardEvent::Diagnostic(Diagnostic {
            kind,
            message,
            timestamp: Local::now(),
        }));
    }

    pub fn device(&self, event: DeviceEvent) {
        debug!("{:?} event for {}", event.kind, event.device_id);
        self.send(DashboardEvent::Device(event));
    }

    fn send(&self, event: DashboardEvent) {
        // No observers is a normal state, e.g. before the UI attaches
        if self.sender.send(event).is_err() {
            debug!("No event subscribers, event discarded");
        }
    }
}
