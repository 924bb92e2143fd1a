use crate::errors::{SimError, TopologyError};
use crate::events::{EventType, SimContext};
use crate::identity::{Address, NodeIdentity};
use crate::quantum::channel::QuantumChannel;
use crate::quantum::control::ControlMessage;
use crate::quantum::port::QuantumPort;
use crate::quantum::qubit::Qubit;
use indexmap::IndexMap;
use parking_lot::{Mutex, RwLock};
use serde_json::json;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

/// Entanglement-swapping relay.
///
/// Stores one qubit per neighbour. With two memories filled it measures them
/// in the Bell basis and tells the second neighbour which Pauli correction
/// makes its half entangled with the first.
#[derive(Debug)]
pub struct QuantumRepeater {
    identity: NodeIdentity,
    ctx: Arc<SimContext>,
    port: Arc<QuantumPort>,
    channels: RwLock<IndexMap<Address, Arc<QuantumChannel>>>,
    num_memories: usize,
    memories: Mutex<IndexMap<Address, Qubit>>,
    swaps: AtomicUsize,
}

impl QuantumRepeater {
    pub fn new(
        identity: NodeIdentity,
        ctx: Arc<SimContext>,
        num_memories: usize,
    ) -> Result<Arc<Self>, TopologyError> {
        if num_memories < 2 {
            return Err(TopologyError::InvalidParameter(format!(
                "a repeater needs at least two memories, got {num_memories}"
            )));
        }
        let port = Arc::new(QuantumPort::new(identity.address.clone()));
        Ok(Arc::new(Self {
            identity,
            ctx,
            port,
            channels: RwLock::new(IndexMap::new()),
            num_memories,
            memories: Mutex::new(IndexMap::new()),
            swaps: AtomicUsize::new(0),
        }))
    }

    pub fn identity(&self) -> &NodeIdentity {
        &self.identity
    }

    pub fn address(&self) -> &Address {
        &self.identity.address
    }

    pub fn port(&self) -> Arc<QuantumPort> {
        self.port.clone()
    }

    pub fn num_memories(&self) -> usize {
        self.num_memories
    }

    pub fn stored(&self) -> usize {
        self.memories.lock().len()
    }

    pub fn swaps(&self) -> usize {
        self.swaps.load(Ordering::Relaxed)
    }

    pub fn add_quantum_channel(&self, channel: Arc<QuantumChannel>) -> Result<Address, SimError> {
        let neighbor = channel
            .other_end(self.address())
            .ok_or_else(|| TopologyError::NotAnEndpoint {
                node: self.address().clone(),
                link: channel.name().to_owned(),
            })?
            .address()
            .clone();
        self.port.register(neighbor.clone());
        self.channels.write().insert(neighbor.clone(), channel);
        Ok(neighbor)
    }

    fn emit(&self, event_type: EventType, data: serde_json::Value) {
        self.ctx.emit(event_type, &self.identity, data);
    }

    /// Stores an arriving qubit, dropping it when every memory is taken.
    pub fn store(&self, from: &Address, qubit: Qubit) {
        let mut memories = self.memories.lock();
        if memories.len() >= self.num_memories && !memories.contains_key(from) {
            drop(memories);
            self.emit(
                EventType::RepeaterMemoryFull,
                json!({"from": from, "capacity": self.num_memories}),
            );
            return;
        }
        memories.insert(from.clone(), qubit);
    }

    /// Swaps the two oldest memories. All memories are cleared afterwards,
    /// whatever the outcome.
    ///
    /// The Bell measurement acts on the joint state the two stored qubits
    /// share with their remote halves, so once the second neighbour applies
    /// the correction those halves hold |Φ+>.
    pub fn swap(&self) -> Result<(), SimError> {
        let stored: Vec<(Address, Qubit)> = {
            let mut memories = self.memories.lock();
            if memories.len() < 2 {
                return Ok(());
            }
            memories.drain(..).collect()
        };
        let mut stored = stored.into_iter();
        let (Some((first, mut a)), Some((second, mut b))) = (stored.next(), stored.next()) else {
            return Ok(());
        };
        self.swaps.fetch_add(1, Ordering::Relaxed);

        let (outcome, probabilities) = Qubit::bell_measure(&mut a, &mut b)?;
        let correction = outcome.correction();
        self.emit(
            EventType::RepeaterBellMeasurement,
            json!({
                "first": first,
                "second": second,
                "outcome": outcome,
                "probabilities": probabilities,
                "correction": correction,
            }),
        );

        let port = self
            .channels
            .read()
            .get(&second)
            .and_then(|channel| channel.other_end(self.address()).cloned())
            .ok_or_else(|| TopologyError::BufferNotAssigned {
                node: self.address().clone(),
                neighbor: second.clone(),
            })?;
        port.push_control(
            self.address(),
            ControlMessage::EntanglementCorrection {
                correction,
                partner: first,
            },
        );
        Ok(())
    }

    pub fn forward(&self) {
        for (from, arrival) in self.port.drain_qubits() {
            self.store(&from, arrival.qubit);
        }
        // nothing is addressed to a repeater over the control path
        self.port.drain_control();

        if self.stored() >= 2
            && let Err(err) = self.swap()
        {
            self.emit(
                EventType::TransmissionFailed,
                json!({"stage": "entanglement swap", "error": err.to_string()}),
            );
        }
    }
}
