use crate::classical::Inbox;
use crate::errors::TopologyError;
use crate::identity::Address;
use crate::quantum::control::ControlMessage;
use crate::quantum::qubit::Qubit;
use parking_lot::Mutex;
use std::collections::VecDeque;

/// A qubit delivered over a named channel.
#[derive(Debug, Clone)]
pub struct Arrival {
    pub qubit: Qubit,
    pub channel: String,
}

/// Inbound side of a quantum-capable node: per-neighbour qubit buffers and a
/// single ordered queue of classical control messages.
#[derive(Debug)]
pub struct QuantumPort {
    address: Address,
    qubits: Inbox<Arrival>,
    control: Mutex<VecDeque<(Address, ControlMessage)>>,
}

impl QuantumPort {
    pub fn new(address: Address) -> Self {
        Self {
            qubits: Inbox::new(address.clone()),
            address,
            control: Mutex::new(VecDeque::new()),
        }
    }

    pub fn address(&self) -> &Address {
        &self.address
    }

    pub fn register(&self, neighbor: Address) {
        self.qubits.register(neighbor);
    }

    pub fn deliver_qubit(
        &self,
        from: &Address,
        qubit: Qubit,
        channel: &str,
    ) -> Result<(), TopologyError> {
        self.qubits.push(
            from,
            Arrival {
                qubit,
                channel: channel.to_owned(),
            },
        )
    }

    pub fn push_control(&self, from: &Address, message: ControlMessage) {
        self.control.lock().push_back((from.clone(), message));
    }

    pub fn drain_qubits(&self) -> Vec<(Address, Arrival)> {
        self.qubits.drain()
    }

    pub fn drain_control(&self) -> Vec<(Address, ControlMessage)> {
        self.control.lock().drain(..).collect()
    }

    pub fn pending_qubits(&self) -> usize {
        self.qubits.len()
    }
}
