//! Quantum Key Distribution (QKD) protocols.
//!
//! - **BB84**: session bookkeeping and the replaceable protocol steps driven
//!   by [`QuantumHost`](crate::quantum::QuantumHost).

pub mod bb84;
