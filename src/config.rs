//! Simulation parameters and the declarative topology description consumed
//! by [`build_and_wire`](crate::topology::build_and_wire).

use crate::core::validate_probability;
use crate::errors::TopologyError;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Global knobs shared by every node of one simulation.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SimulationConfig {
    /// Period of each network's tick loop.
    pub tick_interval_ms: u64,
    /// How long a destination keeps an incomplete fragment set.
    pub reassembly_timeout_ms: u64,
    pub qkd: QkdConfig,
}

impl Default for SimulationConfig {
    fn default() -> Self {
        Self {
            tick_interval_ms: 10,
            reassembly_timeout_ms: 5_000,
            qkd: QkdConfig::default(),
        }
    }
}

impl SimulationConfig {
    pub fn tick_interval(&self) -> Duration {
        Duration::from_millis(self.tick_interval_ms.max(1))
    }

    pub fn reassembly_timeout(&self) -> Duration {
        Duration::from_millis(self.reassembly_timeout_ms)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct QkdConfig {
    /// Minimum back-off after a host's session completes or fails.
    pub retry_delay_ms: u64,
    /// Minimum spacing between QKD initiations requested by one adapter.
    pub attempt_interval_ms: u64,
    /// Share of the sifted positions disclosed for error estimation.
    pub sample_fraction: f64,
}

impl Default for QkdConfig {
    fn default() -> Self {
        Self {
            retry_delay_ms: 500,
            attempt_interval_ms: 250,
            sample_fraction: 0.5,
        }
    }
}

impl QkdConfig {
    pub fn retry_delay(&self) -> Duration {
        Duration::from_millis(self.retry_delay_ms)
    }

    pub fn attempt_interval(&self) -> Duration {
        Duration::from_millis(self.attempt_interval_ms)
    }
}

/// Physical parameters of a classical link.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ConnectionConfig {
    /// Bits per second.
    pub bandwidth_bps: f64,
    pub latency_ms: f64,
    pub packet_loss_rate: f64,
    pub packet_error_rate: f64,
    /// Largest payload in bytes; `None` is unlimited.
    pub mtu: Option<usize>,
    pub up: bool,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            bandwidth_bps: 1_000_000.0,
            latency_ms: 1.0,
            packet_loss_rate: 0.0,
            packet_error_rate: 0.0,
            mtu: Some(1500),
            up: true,
        }
    }
}

impl ConnectionConfig {
    /// `None` when `latency_ms` is too large for a [`Duration`].
    pub fn latency(&self) -> Option<Duration> {
        Duration::try_from_secs_f64(self.latency_ms.max(0.0) / 1000.0).ok()
    }

    pub fn validate(&self) -> Result<(), TopologyError> {
        for (name, p) in [
            ("packet_loss_rate", self.packet_loss_rate),
            ("packet_error_rate", self.packet_error_rate),
        ] {
            validate_probability(p)
                .map_err(|e| TopologyError::InvalidParameter(format!("{name}: {e}")))?;
        }
        if !(self.bandwidth_bps > 0.0 && self.bandwidth_bps.is_finite()) {
            return Err(TopologyError::InvalidParameter(format!(
                "bandwidth_bps must be positive and finite, got {}",
                self.bandwidth_bps
            )));
        }
        if !(self.latency_ms >= 0.0) || self.latency().is_none() {
            return Err(TopologyError::InvalidParameter(format!(
                "latency_ms must be a non-negative, finite duration, got {}",
                self.latency_ms
            )));
        }
        if self.mtu == Some(0) {
            return Err(TopologyError::InvalidParameter("mtu must be positive".into()));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NoiseModel {
    BitFlip,
    Depolarizing,
    AmplitudeDamping,
    PhaseDamping,
}

/// Physical parameters of a quantum link and the QKD session it carries.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct QuantumChannelConfig {
    pub length_km: f64,
    pub loss_per_km: f64,
    pub noise_model: Option<NoiseModel>,
    pub noise_strength: f64,
    pub error_rate_threshold: f64,
    /// Qubits exchanged per BB84 session.
    pub num_bits: usize,
}

impl Default for QuantumChannelConfig {
    fn default() -> Self {
        Self {
            length_km: 1.0,
            loss_per_km: 0.0,
            noise_model: None,
            noise_strength: 0.0,
            error_rate_threshold: 0.1,
            num_bits: 64,
        }
    }
}

impl QuantumChannelConfig {
    pub fn validate(&self) -> Result<(), TopologyError> {
        for (name, p) in [
            ("loss_per_km", self.loss_per_km),
            ("noise_strength", self.noise_strength),
        ] {
            validate_probability(p)
                .map_err(|e| TopologyError::InvalidParameter(format!("{name}: {e}")))?;
        }
        if !(self.length_km >= 0.0) {
            return Err(TopologyError::InvalidParameter(format!(
                "length_km must be non-negative, got {}",
                self.length_km
            )));
        }
        if self.num_bits == 0 {
            return Err(TopologyError::InvalidParameter("num_bits must be positive".into()));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum NetworkType {
    Classical,
    Quantum,
}

/// Root of a declarative topology.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TopologyDescription {
    pub name: String,
    #[serde(default)]
    pub size: (f64, f64),
    #[serde(default)]
    pub simulation: SimulationConfig,
    pub zones: Vec<ZoneDescription>,
    #[serde(default)]
    pub connections: Vec<LinkDescription<ConnectionConfig>>,
    #[serde(default)]
    pub quantum_channels: Vec<LinkDescription<QuantumChannelConfig>>,
    #[serde(default)]
    pub adapter_pairs: Vec<LinkDescription<ConnectionConfig>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ZoneDescription {
    pub name: String,
    pub networks: Vec<NetworkDescription>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NetworkDescription {
    pub name: String,
    #[serde(rename = "type")]
    pub kind: NetworkType,
    #[serde(default)]
    pub nodes: Vec<NodeDescription>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum NodeDescription {
    Host {
        name: String,
        address: String,
    },
    Router {
        name: String,
        address: String,
    },
    QuantumHost {
        name: String,
        address: String,
    },
    QuantumAdapter {
        name: String,
        address: String,
        /// Name of the quantum host this adapter drives.
        quantum_host: String,
    },
    QuantumRepeater {
        name: String,
        address: String,
        #[serde(default = "default_memories")]
        num_memories: usize,
    },
}

fn default_memories() -> usize {
    2
}

/// A link between two nodes named in the description.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LinkDescription<C> {
    pub from: String,
    pub to: String,
    #[serde(default)]
    pub config: C,
}
