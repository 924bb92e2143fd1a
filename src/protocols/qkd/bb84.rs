use crate::core::errors::StateError;
use crate::identity::Address;
use crate::quantum::{Basis, Qubit};
use rand::Rng;
use rand::seq::index;
use serde::{Deserialize, Serialize};
use tokio::time::{Duration, Instant};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Bb84Role {
    /// Prepares and sends the qubits.
    Sender,
    /// Measures what arrives.
    Receiver,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Bb84Phase {
    Idle,
    Sending,
    Measuring,
    Reconciling,
    ErrorEstimating,
    Complete,
}

/// One disclosed position used to estimate the error rate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorSample {
    pub index: usize,
    pub bit: bool,
}

/// A qubit ready to go out together with the choices that produced it.
#[derive(Debug, Clone)]
pub struct PreparedQubit {
    pub basis: Basis,
    pub bit: bool,
    pub qubit: Qubit,
}

/// BB84 bookkeeping owned by one quantum host.
#[derive(Debug, Clone)]
pub struct Bb84Session {
    pub role: Option<Bb84Role>,
    pub phase: Bb84Phase,
    pub in_progress: bool,
    /// Bases in transmission order; prepared bases for the sender, measured
    /// bases for the receiver.
    pub bases: Vec<Basis>,
    /// Prepared bits for the sender, measurement outcomes for the receiver.
    pub bits: Vec<bool>,
    pub shared_bases_indices: Vec<usize>,
    /// Qubit count announced by the sender.
    pub expected: Option<usize>,
    pub peer: Option<Address>,
    pub started_at: Option<Instant>,
    pub last_finished: Option<Instant>,
}

impl Default for Bb84Session {
    fn default() -> Self {
        Self {
            role: None,
            phase: Bb84Phase::Idle,
            in_progress: false,
            bases: Vec::new(),
            bits: Vec::new(),
            shared_bases_indices: Vec::new(),
            expected: None,
            peer: None,
            started_at: None,
            last_finished: None,
        }
    }
}

impl Bb84Session {
    /// Whether a new session may start at `now`.
    ///
    /// A running session blocks new ones until it has been stalled for
    /// `retry_delay`; a finished one imposes the same back-off.
    pub fn can_start(&self, now: Instant, retry_delay: Duration) -> bool {
        if self.in_progress {
            return self
                .started_at
                .is_some_and(|started| now.duration_since(started) >= retry_delay);
        }
        self.last_finished
            .is_none_or(|finished| now.duration_since(finished) >= retry_delay)
    }

    pub fn begin(&mut self, role: Bb84Role, now: Instant) {
        let last_finished = self.last_finished;
        *self = Bb84Session {
            role: Some(role),
            phase: match role {
                Bb84Role::Sender => Bb84Phase::Sending,
                Bb84Role::Receiver => Bb84Phase::Measuring,
            },
            in_progress: true,
            started_at: Some(now),
            last_finished,
            ..Default::default()
        };
    }

    /// Ends the session; `phase` is `Complete` on success and `Idle` otherwise.
    pub fn finish(&mut self, succeeded: bool, now: Instant) {
        self.in_progress = false;
        self.phase = if succeeded {
            Bb84Phase::Complete
        } else {
            Bb84Phase::Idle
        };
        self.last_finished = Some(now);
    }

    pub fn is_active(&self, role: Bb84Role) -> bool {
        self.in_progress && self.role == Some(role)
    }

    /// `[bits[i] for i in shared_bases_indices]`.
    pub fn extract_key(&self) -> Vec<bool> {
        self.shared_bases_indices
            .iter()
            .filter_map(|&i| self.bits.get(i).copied())
            .collect()
    }
}

/// Number of shared positions disclosed for error estimation.
///
/// `fraction` of the shared positions, clamped to `[2, max(2, num_bits / 4)]`
/// and then to `[1, shared]`; zero when nothing is shared.
pub fn error_sample_size(shared: usize, num_bits: usize, fraction: f64) -> usize {
    if shared == 0 {
        return 0;
    }
    let wanted = (shared as f64 * fraction.clamp(0.0, 1.0)).floor() as usize;
    let upper = (num_bits / 4).max(2);
    wanted.clamp(2, upper).clamp(1, shared)
}

/// The four replaceable BB84 steps. The host keeps the session bookkeeping
/// and only asks the strategy to do the quantum and comparison work.
pub trait Bb84Protocol: Send + Sync {
    /// Draws `num_bits` random (basis, bit) pairs and prepares one qubit each.
    fn send_qubits(&self, num_bits: usize) -> Result<Vec<PreparedQubit>, StateError>;

    /// Measures an arriving qubit in a random basis.
    fn process_received_qubit(&self, qubit: &mut Qubit) -> Result<(Basis, bool), StateError>;

    /// Positions where both sides used the same basis.
    fn reconcile_bases(&self, own: &[Basis], peer: &[Basis]) -> Vec<usize>;

    /// Share of `samples` disagreeing with `own_bits`.
    fn estimate_error_rate(&self, own_bits: &[bool], samples: &[ErrorSample]) -> f64;

    /// Picks the positions disclosed for error estimation.
    fn select_error_sample(
        &self,
        shared: &[usize],
        bits: &[bool],
        num_bits: usize,
        fraction: f64,
    ) -> Vec<ErrorSample> {
        let size = error_sample_size(shared.len(), num_bits, fraction);
        let mut picked: Vec<usize> = index::sample(&mut rand::rng(), shared.len(), size)
            .into_iter()
            .map(|i| shared[i])
            .collect();
        picked.sort_unstable();
        picked
            .into_iter()
            .filter_map(|index| bits.get(index).map(|&bit| ErrorSample { index, bit }))
            .collect()
    }
}

/// Textbook BB84 with uniformly random bases and bits.
#[derive(Debug, Default, Clone, Copy)]
pub struct StandardBb84;

impl Bb84Protocol for StandardBb84 {
    fn send_qubits(&self, num_bits: usize) -> Result<Vec<PreparedQubit>, StateError> {
        let mut rng = rand::rng();
        (0..num_bits)
            .map(|_| {
                let basis = Basis::random(&mut rng);
                let bit = rng.random_bool(0.5);
                Ok(PreparedQubit {
                    basis,
                    bit,
                    qubit: Qubit::prepare(bit, basis)?,
                })
            })
            .collect()
    }

    fn process_received_qubit(&self, qubit: &mut Qubit) -> Result<(Basis, bool), StateError> {
        let basis = Basis::random(&mut rand::rng());
        let bit = qubit.measure(basis)?;
        Ok((basis, bit))
    }

    fn reconcile_bases(&self, own: &[Basis], peer: &[Basis]) -> Vec<usize> {
        own.iter()
            .zip(peer)
            .enumerate()
            .filter(|(_, (a, b))| a == b)
            .map(|(i, _)| i)
            .collect()
    }

    fn estimate_error_rate(&self, own_bits: &[bool], samples: &[ErrorSample]) -> f64 {
        if samples.is_empty() {
            return 0.0;
        }
        let mismatches = samples
            .iter()
            .filter(|s| own_bits.get(s.index) != Some(&s.bit))
            .count();
        mismatches as f64 / samples.len() as f64
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sample_size_is_clamped() {
        assert_eq!(error_sample_size(0, 64, 0.5), 0);
        assert_eq!(error_sample_size(1, 64, 0.5), 1);
        assert_eq!(error_sample_size(3, 64, 0.5), 2);
        assert_eq!(error_sample_size(25, 50, 0.5), 12);
        // capped at num_bits / 4
        assert_eq!(error_sample_size(60, 100, 0.5), 25);
        // tiny sessions never ask for more than is shared
        assert_eq!(error_sample_size(2, 4, 0.5), 2);
        assert_eq!(error_sample_size(1, 1, 0.5), 1);
    }

    #[test]
    fn sifting_keeps_matching_positions() {
        use Basis::*;
        let shared = StandardBb84.reconcile_bases(&[Z, X, X, Z], &[Z, Z, X, X]);
        assert_eq!(shared, vec![0, 2]);
    }

    #[test]
    fn error_rate_counts_mismatches() {
        let bits = [true, false, true, true];
        let samples = [
            ErrorSample { index: 0, bit: true },
            ErrorSample { index: 1, bit: true },
            ErrorSample { index: 3, bit: true },
            ErrorSample { index: 2, bit: false },
        ];
        assert_eq!(StandardBb84.estimate_error_rate(&bits, &samples), 0.5);
        assert_eq!(StandardBb84.estimate_error_rate(&bits, &[]), 0.0);
    }

    #[test]
    fn samples_come_from_shared_positions() {
        let bits: Vec<bool> = (0..40).map(|i| i % 3 == 0).collect();
        let shared: Vec<usize> = (0..40).step_by(2).collect();
        let samples = StandardBb84.select_error_sample(&shared, &bits, 40, 0.5);
        assert_eq!(samples.len(), 10);
        for s in samples {
            assert!(shared.contains(&s.index));
            assert_eq!(s.bit, bits[s.index]);
        }
    }

    #[test]
    fn ideal_exchange_yields_identical_keys() {
        let prepared = StandardBb84.send_qubits(64).unwrap();
        let mut bob_bases = Vec::new();
        let mut bob_bits = Vec::new();
        for p in prepared.iter() {
            let mut q = p.qubit.clone();
            let (basis, bit) = StandardBb84.process_received_qubit(&mut q).unwrap();
            bob_bases.push(basis);
            bob_bits.push(bit);
        }
        let alice_bases: Vec<Basis> = prepared.iter().map(|p| p.basis).collect();
        let shared = StandardBb84.reconcile_bases(&alice_bases, &bob_bases);

        let alice = Bb84Session {
            bits: prepared.iter().map(|p| p.bit).collect(),
            shared_bases_indices: shared.clone(),
            ..Default::default()
        };
        let bob = Bb84Session {
            bits: bob_bits,
            shared_bases_indices: shared,
            ..Default::default()
        };
        assert_eq!(alice.extract_key(), bob.extract_key());
    }

    #[test]
    fn back_off_applies_after_finish_and_stalls_expire() {
        let start = Instant::now();
        let delay = Duration::from_millis(500);
        let mut session = Bb84Session::default();
        assert!(session.can_start(start, delay));

        session.begin(Bb84Role::Sender, start);
        assert!(!session.can_start(start + Duration::from_millis(100), delay));
        assert!(session.can_start(start + delay, delay));

        session.finish(false, start + Duration::from_millis(10));
        assert!(!session.can_start(start + Duration::from_millis(20), delay));
        assert!(session.can_start(start + Duration::from_millis(600), delay));
    }
}
