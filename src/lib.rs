//! Hybrid classical/quantum network simulator.
//!
//! Classical hosts and routers exchange packets over lossy, MTU-limited
//! connections; quantum hosts run BB84 over noisy channels; adapters use the
//! resulting keys to carry classical traffic across quantum-secured links;
//! repeaters swap entanglement between their neighbours.

pub mod classical;
pub mod config;
mod core;
pub mod driver;
pub mod errors;
pub mod events;
pub mod identity;
pub mod protocols;
pub mod quantum;
pub mod topology;

pub use crate::core::{
    BellMeasurement, BellState, Gate, KrausChannel, Measurement, MeasurementResult,
    PauliCorrection, QuantumState, bell, utils,
};
pub use crate::errors::SimError;
pub use crate::events::{Event, EventSink, EventType, SimContext};
pub use crate::identity::{Address, NodeIdentity};
pub use crate::topology::{World, build_and_wire};
