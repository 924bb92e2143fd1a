//! Simulator error taxonomy: link state, routing, topology wiring and
//! quantum-physical failures.

pub use crate::core::errors::{ChannelError, GateError, MeasurementError, StateError};
use crate::identity::Address;
use thiserror::Error;

#[derive(Error, Debug, Clone)]
pub enum LinkError {
    #[error("connection {connection} is down")]
    ConnectionDown { connection: String },

    #[error("packet of {size} bytes exceeds MTU {mtu} on {connection}")]
    MtuExceeded {
        connection: String,
        size: usize,
        mtu: usize,
    },

    #[error("bandwidth must be positive, got {bandwidth} bps on {connection}")]
    InvalidBandwidth { connection: String, bandwidth: f64 },

    #[error(
        "delay on {connection} is out of range: latency {latency_ms} ms, serialization {serialization_secs} s"
    )]
    DelayOutOfRange {
        connection: String,
        latency_ms: f64,
        serialization_secs: f64,
    },

    #[error("no async runtime available to deliver packets")]
    NoExecutor,
}

#[derive(Error, Debug, Clone)]
pub enum RoutingError {
    #[error("{sender} -> {receiver} does not match the endpoints of {connection}")]
    Misrouted {
        connection: String,
        sender: Address,
        receiver: Address,
    },

    #[error("no route from {from} to {to}")]
    NotConnected { from: Address, to: Address },

    #[error("{host} has no direct connection to {destination} and no default gateway")]
    DefaultGatewayNotFound { host: String, destination: Address },
}

#[derive(Error, Debug, Clone)]
pub enum TopologyError {
    #[error("{node} has no buffer for neighbor {neighbor}")]
    BufferNotAssigned { node: Address, neighbor: Address },

    #[error("{node} cannot be used here: {reason}")]
    UnsupportedNetwork { node: String, reason: String },

    #[error("adapter {adapter} is already paired")]
    PairingAlreadyExists { adapter: String },

    #[error("adapter {adapter} is not paired")]
    PairingDoesNotExist { adapter: String },

    #[error("unknown node {0}")]
    UnknownNode(String),

    #[error("unknown network {0}")]
    UnknownNetwork(String),

    #[error("unknown zone {0}")]
    UnknownZone(String),

    #[error("node name {0} is already taken")]
    DuplicateNode(String),

    #[error("invalid parameter: {0}")]
    InvalidParameter(String),

    #[error("{node} is not an endpoint of {link}")]
    NotAnEndpoint { node: Address, link: String },
}

#[derive(Error, Debug, Clone)]
pub enum QuantumError {
    #[error("qubit lost on channel {channel}")]
    QubitLoss { channel: String },

    #[error("{node} has no quantum channel")]
    QuantumChannelDoesNotExist { node: String },

    #[error("{node} has no classical control link")]
    NoControlPlane { node: String },

    #[error(transparent)]
    State(#[from] StateError),
}

#[derive(Error, Debug)]
pub enum SimError {
    #[error(transparent)]
    Link(#[from] LinkError),

    #[error(transparent)]
    Routing(#[from] RoutingError),

    #[error(transparent)]
    Topology(#[from] TopologyError),

    #[error(transparent)]
    Quantum(#[from] QuantumError),

    #[error("control message codec: {0}")]
    Codec(#[from] serde_json::Error),
}

impl From<StateError> for SimError {
    fn from(err: StateError) -> Self {
        SimError::Quantum(QuantumError::State(err))
    }
}

impl From<ChannelError> for SimError {
    fn from(err: ChannelError) -> Self {
        SimError::Topology(TopologyError::InvalidParameter(err.to_string()))
    }
}
