//! Structured events emitted by simulated entities, the observer interface
//! that receives them, and the shared [`SimContext`] every node holds.

use crate::config::SimulationConfig;
use crate::identity::{Address, NodeIdentity};
use parking_lot::Mutex;
use serde::Serialize;
use serde_json::Value;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Debug,
    Info,
    Warning,
    Error,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum EventType {
    // classical packet path
    PacketTransmitted,
    PacketReceived,
    PacketDropped,
    PacketCorrupted,
    PacketRouted,
    PacketFragmented,
    PacketReassembled,
    DataReceived,
    TransmissionFailed,
    RoutingFailed,
    // quantum channel
    QubitSent,
    QubitLost,
    QubitReceived,
    // BB84
    QkdInitiated,
    QkdSkipped,
    QubitsMeasured,
    BasesReconciled,
    ErrorRateEstimated,
    QkdCompleted,
    QkdAborted,
    SharedKeyGenerated,
    SharedKeyReceived,
    // adapter bridge
    PacketBuffered,
    DataEncrypted,
    DataDecrypted,
    // repeater
    RepeaterBellMeasurement,
    RepeaterMemoryFull,
    EntanglementEstablished,
    // driver
    NetworkStarted,
    NetworkStopped,
}

impl EventType {
    pub fn default_severity(self) -> Severity {
        match self {
            EventType::PacketTransmitted
            | EventType::PacketReceived
            | EventType::PacketRouted
            | EventType::PacketFragmented
            | EventType::PacketReassembled
            | EventType::QubitSent
            | EventType::QubitReceived
            | EventType::QkdSkipped
            | EventType::QubitsMeasured => Severity::Debug,
            EventType::PacketDropped
            | EventType::PacketCorrupted
            | EventType::QubitLost
            | EventType::QkdAborted
            | EventType::RepeaterMemoryFull => Severity::Warning,
            EventType::TransmissionFailed | EventType::RoutingFailed => Severity::Error,
            _ => Severity::Info,
        }
    }
}

/// Who emitted an event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EventSource {
    pub name: String,
    pub address: Address,
}

impl From<&NodeIdentity> for EventSource {
    fn from(identity: &NodeIdentity) -> Self {
        Self {
            name: identity.name.clone(),
            address: identity.address.clone(),
        }
    }
}

/// Immutable record of something a simulated entity did.
#[derive(Debug, Clone, Serialize)]
pub struct Event {
    pub event_type: EventType,
    pub source: EventSource,
    /// Time since the simulation context was created.
    pub timestamp: Duration,
    pub data: Value,
    pub severity: Severity,
}

/// Observer of simulation events.
pub trait EventSink: Send + Sync {
    fn on_update(&self, event: &Event);
}

/// Drops every event.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopSink;

impl EventSink for NoopSink {
    fn on_update(&self, _event: &Event) {}
}

/// Keeps every event in memory.
#[derive(Debug, Default)]
pub struct RecordingSink {
    events: Mutex<Vec<Event>>,
}

impl RecordingSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<Event> {
        self.events.lock().clone()
    }

    pub fn of_type(&self, event_type: EventType) -> Vec<Event> {
        self.events
            .lock()
            .iter()
            .filter(|e| e.event_type == event_type)
            .cloned()
            .collect()
    }

    pub fn count(&self, event_type: EventType) -> usize {
        self.events
            .lock()
            .iter()
            .filter(|e| e.event_type == event_type)
            .count()
    }

    pub fn clear(&self) {
        self.events.lock().clear();
    }
}

impl EventSink for RecordingSink {
    fn on_update(&self, event: &Event) {
        self.events.lock().push(event.clone());
    }
}

/// Forwards events into a tokio channel for an external consumer.
#[derive(Debug)]
pub struct ChannelSink {
    tx: mpsc::UnboundedSender<Event>,
}

impl ChannelSink {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<Event>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }
}

impl EventSink for ChannelSink {
    fn on_update(&self, event: &Event) {
        // a closed receiver means nobody is listening any more
        let _ = self.tx.send(event.clone());
    }
}

/// State shared by every entity of one simulation: the event observer, the
/// clock epoch, configuration and id allocation.
pub struct SimContext {
    sink: Arc<dyn EventSink>,
    epoch: Instant,
    config: SimulationConfig,
    next_id: AtomicU64,
}

impl std::fmt::Debug for SimContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SimContext")
            .field("config", &self.config)
            .field("next_id", &self.next_id)
            .finish()
    }
}

impl SimContext {
    pub fn new(config: SimulationConfig, sink: Arc<dyn EventSink>) -> Arc<Self> {
        Arc::new(Self {
            sink,
            epoch: Instant::now(),
            config,
            next_id: AtomicU64::new(1),
        })
    }

    /// Context with default configuration and no observer.
    pub fn detached() -> Arc<Self> {
        Self::new(SimulationConfig::default(), Arc::new(NoopSink))
    }

    pub fn config(&self) -> &SimulationConfig {
        &self.config
    }

    pub fn elapsed(&self) -> Duration {
        self.epoch.elapsed()
    }

    /// Allocates a packet or fragment id, unique within this simulation.
    pub fn next_id(&self) -> u64 {
        self.next_id.fetch_add(1, Ordering::Relaxed)
    }

    pub fn emit(&self, event_type: EventType, source: &NodeIdentity, data: Value) {
        self.emit_with(event_type.default_severity(), event_type, source.into(), data);
    }

    pub fn emit_with(
        &self,
        severity: Severity,
        event_type: EventType,
        source: EventSource,
        data: Value,
    ) {
        let event = Event {
            event_type,
            source,
            timestamp: self.elapsed(),
            data,
            severity,
        };

        match severity {
            Severity::Debug => debug!(node = %event.source.name, event = ?event.event_type, data = %event.data),
            Severity::Info => info!(node = %event.source.name, event = ?event.event_type, data = %event.data),
            Severity::Warning => warn!(node = %event.source.name, event = ?event.event_type, data = %event.data),
            Severity::Error => error!(node = %event.source.name, event = ?event.event_type, data = %event.data),
        }

        self.sink.on_update(&event);
    }
}
