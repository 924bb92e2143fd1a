//! Lossy, noisy quantum links.

use crate::config::{NoiseModel, QuantumChannelConfig};
use crate::core::errors::StateError;
use crate::core::{Gate, KrausChannel};
use crate::errors::{QuantumError, SimError, TopologyError};
use crate::identity::Address;
use crate::quantum::port::QuantumPort;
use crate::quantum::qubit::Qubit;
use rand::Rng;
use std::sync::Arc;

/// Noise transform applied to every surviving qubit.
#[derive(Debug, Clone)]
enum Noise {
    /// Pauli X with the given probability.
    BitFlip(f64),
    Kraus(KrausChannel),
}

impl Noise {
    fn from_config(config: &QuantumChannelConfig) -> Result<Option<Noise>, SimError> {
        let p = config.noise_strength;
        let noise = match config.noise_model {
            None => None,
            Some(NoiseModel::BitFlip) => Some(Noise::BitFlip(p)),
            Some(NoiseModel::Depolarizing) => Some(Noise::Kraus(KrausChannel::depolarizing(p)?)),
            Some(NoiseModel::AmplitudeDamping) => {
                Some(Noise::Kraus(KrausChannel::amplitude_damping(p)?))
            }
            Some(NoiseModel::PhaseDamping) => Some(Noise::Kraus(KrausChannel::phase_damping(p)?)),
        };
        Ok(noise)
    }

    fn apply(&self, qubit: &mut Qubit) -> Result<(), StateError> {
        match self {
            Noise::BitFlip(p) => {
                if *p > 0.0 && rand::rng().random_bool(*p) {
                    qubit.apply(&Gate::x())?;
                }
                Ok(())
            }
            Noise::Kraus(channel) => qubit.apply_channel(channel),
        }
    }
}

/// Undirected quantum link between two quantum-capable nodes.
#[derive(Debug)]
pub struct QuantumChannel {
    name: String,
    ends: [Arc<QuantumPort>; 2],
    config: QuantumChannelConfig,
    noise: Option<Noise>,
}

impl QuantumChannel {
    pub fn new(
        name: impl Into<String>,
        a: Arc<QuantumPort>,
        b: Arc<QuantumPort>,
        config: QuantumChannelConfig,
    ) -> Result<Arc<Self>, SimError> {
        config.validate()?;
        if a.address() == b.address() {
            return Err(TopologyError::InvalidParameter(format!(
                "quantum channel endpoints must differ, got {} twice",
                a.address()
            ))
            .into());
        }
        let noise = Noise::from_config(&config)?;
        Ok(Arc::new(Self {
            name: name.into(),
            ends: [a, b],
            config,
            noise,
        }))
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn config(&self) -> &QuantumChannelConfig {
        &self.config
    }

    pub fn num_bits(&self) -> usize {
        self.config.num_bits
    }

    pub fn error_rate_threshold(&self) -> f64 {
        self.config.error_rate_threshold
    }

    pub fn endpoints(&self) -> (&Address, &Address) {
        (self.ends[0].address(), self.ends[1].address())
    }

    /// The port opposite `address`.
    pub fn other_end(&self, address: &Address) -> Option<&Arc<QuantumPort>> {
        match &self.ends {
            [a, b] if a.address() == address => Some(b),
            [a, b] if b.address() == address => Some(a),
            _ => None,
        }
    }

    /// `1 - (1 - loss_per_km)^length_km`.
    pub fn loss_probability(&self) -> f64 {
        let survive = (1.0 - self.config.loss_per_km).powf(self.config.length_km);
        (1.0 - survive).clamp(0.0, 1.0)
    }

    /// Sends `qubit` from `sender` to the other end, applying loss then noise.
    /// Delivery is immediate.
    pub fn transmit_qubit(&self, mut qubit: Qubit, sender: &Address) -> Result<(), SimError> {
        let receiver = self
            .other_end(sender)
            .ok_or_else(|| TopologyError::NotAnEndpoint {
                node: sender.clone(),
                link: self.name.clone(),
            })?;

        let loss = self.loss_probability();
        if loss > 0.0 && rand::rng().random_bool(loss) {
            return Err(QuantumError::QubitLoss {
                channel: self.name.clone(),
            }
            .into());
        }

        if let Some(noise) = &self.noise {
            noise.apply(&mut qubit)?;
        }

        receiver.deliver_qubit(sender, qubit, &self.name)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::quantum::qubit::Basis;
    use approx::assert_relative_eq;

    fn ports() -> (Arc<QuantumPort>, Arc<QuantumPort>) {
        let a = Arc::new(QuantumPort::new(Address::from("qa")));
        let b = Arc::new(QuantumPort::new(Address::from("qb")));
        a.register(Address::from("qb"));
        b.register(Address::from("qa"));
        (a, b)
    }

    fn channel(config: QuantumChannelConfig) -> (Arc<QuantumChannel>, Arc<QuantumPort>) {
        let (a, b) = ports();
        (QuantumChannel::new("qa-qb", a, b.clone(), config).unwrap(), b)
    }

    #[test]
    fn zero_loss_never_loses_regardless_of_length() {
        let (ch, b) = channel(QuantumChannelConfig {
            length_km: 10_000.0,
            loss_per_km: 0.0,
            ..Default::default()
        });
        for _ in 0..200 {
            ch.transmit_qubit(Qubit::prepare(true, Basis::Z).unwrap(), &"qa".into())
                .unwrap();
        }
        assert_eq!(b.pending_qubits(), 200);
    }

    #[test]
    fn loss_probability_compounds_per_km() {
        let (ch, _) = channel(QuantumChannelConfig {
            length_km: 2.0,
            loss_per_km: 0.5,
            ..Default::default()
        });
        assert_relative_eq!(ch.loss_probability(), 0.75, epsilon = 1e-12);
    }

    #[test]
    fn certain_loss_raises_qubit_loss() {
        let (ch, b) = channel(QuantumChannelConfig {
            length_km: 1.0,
            loss_per_km: 1.0,
            ..Default::default()
        });
        let err = ch
            .transmit_qubit(Qubit::prepare(false, Basis::Z).unwrap(), &"qa".into())
            .unwrap_err();
        assert!(matches!(err, SimError::Quantum(QuantumError::QubitLoss { .. })));
        assert_eq!(b.pending_qubits(), 0);
    }

    #[test]
    fn full_bit_flip_inverts_z_states() {
        let (ch, b) = channel(QuantumChannelConfig {
            noise_model: Some(NoiseModel::BitFlip),
            noise_strength: 1.0,
            ..Default::default()
        });
        ch.transmit_qubit(Qubit::prepare(false, Basis::Z).unwrap(), &"qa".into())
            .unwrap();
        let (_, mut arrival) = b.drain_qubits().remove(0);
        assert!(arrival.qubit.measure(Basis::Z).unwrap());
        assert_eq!(arrival.channel, "qa-qb");
    }

    #[test]
    fn depolarizing_mixes_the_state() {
        let (ch, b) = channel(QuantumChannelConfig {
            noise_model: Some(NoiseModel::Depolarizing),
            noise_strength: 1.0,
            ..Default::default()
        });
        ch.transmit_qubit(Qubit::prepare(false, Basis::Z).unwrap(), &"qa".into())
            .unwrap();
        let (_, arrival) = b.drain_qubits().remove(0);
        let rho = arrival.qubit.reduced_state().unwrap().density_matrix;
        assert_relative_eq!(rho[[0, 0]].re, 0.5, epsilon = 1e-12);
        assert_relative_eq!(rho[[1, 1]].re, 0.5, epsilon = 1e-12);
    }

    #[test]
    fn full_amplitude_damping_relaxes_one_to_zero() {
        let (ch, b) = channel(QuantumChannelConfig {
            noise_model: Some(NoiseModel::AmplitudeDamping),
            noise_strength: 1.0,
            ..Default::default()
        });
        ch.transmit_qubit(Qubit::prepare(true, Basis::Z).unwrap(), &"qa".into())
            .unwrap();
        let (_, mut arrival) = b.drain_qubits().remove(0);
        let rho = arrival.qubit.reduced_state().unwrap().density_matrix;
        assert_relative_eq!(rho[[0, 0]].re, 1.0, epsilon = 1e-12);
        assert_relative_eq!(rho[[1, 1]].re, 0.0, epsilon = 1e-12);
        assert!(!arrival.qubit.measure(Basis::Z).unwrap());
    }

    #[test]
    fn full_phase_damping_removes_coherence_only() {
        let (ch, b) = channel(QuantumChannelConfig {
            noise_model: Some(NoiseModel::PhaseDamping),
            noise_strength: 1.0,
            ..Default::default()
        });
        // |+>
        ch.transmit_qubit(Qubit::prepare(false, Basis::X).unwrap(), &"qa".into())
            .unwrap();
        let (_, arrival) = b.drain_qubits().remove(0);
        let rho = arrival.qubit.reduced_state().unwrap().density_matrix;
        assert_relative_eq!(rho[[0, 0]].re, 0.5, epsilon = 1e-12);
        assert_relative_eq!(rho[[1, 1]].re, 0.5, epsilon = 1e-12);
        assert_relative_eq!(rho[[0, 1]].norm(), 0.0, epsilon = 1e-12);
        assert_relative_eq!(rho[[1, 0]].norm(), 0.0, epsilon = 1e-12);
    }

    #[test]
    fn noise_on_a_sent_half_reaches_the_kept_half() {
        let (ch, b) = channel(QuantumChannelConfig {
            noise_model: Some(NoiseModel::BitFlip),
            noise_strength: 1.0,
            ..Default::default()
        });
        let (kept, sent) = Qubit::entangled_pair().unwrap();
        ch.transmit_qubit(sent, &"qa".into()).unwrap();
        let (_, arrival) = b.drain_qubits().remove(0);
        let joint = Qubit::joint_state(&kept, &arrival.qubit).unwrap();
        assert_relative_eq!(
            joint.fidelity(&crate::core::BellState::PsiPlus.ket()).unwrap(),
            1.0,
            epsilon = 1e-12
        );
    }

    #[test]
    fn strangers_cannot_use_the_channel() {
        let (ch, _) = channel(QuantumChannelConfig::default());
        let err = ch
            .transmit_qubit(Qubit::prepare(false, Basis::Z).unwrap(), &"qz".into())
            .unwrap_err();
        assert!(matches!(err, SimError::Topology(TopologyError::NotAnEndpoint { .. })));
    }

    #[test]
    fn invalid_noise_strength_is_rejected() {
        let (a, b) = ports();
        let config = QuantumChannelConfig {
            noise_model: Some(NoiseModel::Depolarizing),
            noise_strength: 2.0,
            ..Default::default()
        };
        assert!(QuantumChannel::new("bad", a, b, config).is_err());
    }
}
