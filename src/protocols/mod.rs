//! Quantum cryptography protocols run by simulated hosts.

pub mod qkd;
pub use qkd::bb84;
