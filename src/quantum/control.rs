//! Classical signalling between quantum hosts.

use crate::core::PauliCorrection;
use crate::errors::{QuantumError, SimError};
use crate::identity::Address;
use crate::protocols::qkd::bb84::ErrorSample;
use crate::quantum::port::QuantumPort;
use crate::quantum::qubit::Basis;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::sync::Weak;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ControlMessage {
    /// Number of qubits that survived the channel.
    QubitsSent { count: usize },
    ReconcileBases { bases: Vec<Basis> },
    SharedBases { indices: Vec<usize> },
    EstimateErrorRate { samples: Vec<ErrorSample> },
    Complete,
    KeyEstablished,
    Abort { error_rate: f64 },
    /// Pauli the receiver applies to its held half to become entangled with
    /// `partner`.
    EntanglementCorrection {
        correction: PauliCorrection,
        partner: Address,
    },
}

/// Tag carried by QKD transmission packets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageType {
    QubitsSent,
    ReconcileBases,
    SharedBases,
    EstimateErrorRate,
    Complete,
    KeyEstablished,
    Abort,
    EntanglementCorrection,
}

impl ControlMessage {
    pub fn message_type(&self) -> MessageType {
        match self {
            ControlMessage::QubitsSent { .. } => MessageType::QubitsSent,
            ControlMessage::ReconcileBases { .. } => MessageType::ReconcileBases,
            ControlMessage::SharedBases { .. } => MessageType::SharedBases,
            ControlMessage::EstimateErrorRate { .. } => MessageType::EstimateErrorRate,
            ControlMessage::Complete => MessageType::Complete,
            ControlMessage::KeyEstablished => MessageType::KeyEstablished,
            ControlMessage::Abort { .. } => MessageType::Abort,
            ControlMessage::EntanglementCorrection { .. } => MessageType::EntanglementCorrection,
        }
    }
}

/// Classical side channel a quantum host signals its peer through, and the
/// party told about freshly established keys.
pub trait ControlPlane: Send + Sync {
    fn send_control(&self, from: &Address, message: ControlMessage) -> Result<(), SimError>;

    fn key_established(&self, key: &[bool]);
}

/// Control plane joining two quantum hosts without any classical network in
/// between. Messages land in the opposite port's control queue immediately.
#[derive(Debug)]
pub struct DirectLink {
    ends: [Weak<QuantumPort>; 2],
    keys: Mutex<Vec<Vec<bool>>>,
}

impl DirectLink {
    pub fn new(a: Weak<QuantumPort>, b: Weak<QuantumPort>) -> Self {
        Self {
            ends: [a, b],
            keys: Mutex::new(Vec::new()),
        }
    }

    /// Every key reported through this link, oldest first.
    pub fn keys(&self) -> Vec<Vec<bool>> {
        self.keys.lock().clone()
    }
}

impl ControlPlane for DirectLink {
    fn send_control(&self, from: &Address, message: ControlMessage) -> Result<(), SimError> {
        let ports: Vec<_> = self.ends.iter().filter_map(Weak::upgrade).collect();
        let target = ports
            .iter()
            .find(|port| port.address() != from)
            .ok_or_else(|| QuantumError::NoControlPlane {
                node: from.to_string(),
            })?;
        target.push_control(from, message);
        Ok(())
    }

    fn key_established(&self, key: &[bool]) {
        self.keys.lock().push(key.to_vec());
    }
}
