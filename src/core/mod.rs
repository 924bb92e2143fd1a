pub mod bell;
mod channels;
pub mod errors;
mod gates;
mod measurements;
mod state;
pub mod utils;

pub use bell::{BellMeasurement, BellState, PauliCorrection};
pub use channels::{KrausChannel, validate_probability};
pub use gates::Gate;
pub use measurements::{Measurement, MeasurementResult};
pub use state::QuantumState;
