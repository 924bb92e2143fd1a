//! Quantum side of the simulator: qubits, channels, hosts running BB84,
//! adapters bridging into classical networks and entanglement repeaters.

mod adapter;
mod channel;
mod control;
mod host;
mod port;
mod qubit;
mod repeater;

pub use adapter::{QuantumAdapter, key_bytes, xor_cipher};
pub use channel::QuantumChannel;
pub use control::{ControlMessage, ControlPlane, DirectLink, MessageType};
pub use host::{EntangledHalf, QuantumHost};
pub use port::{Arrival, QuantumPort};
pub use qubit::{Basis, Qubit};
pub use repeater::QuantumRepeater;
