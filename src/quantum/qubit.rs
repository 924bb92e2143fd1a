//! Qubits as handles into shared registers.
//!
//! A freshly prepared qubit owns a one-qubit register. Qubits created
//! together, or measured jointly, share a register so that later operations
//! on one of them are seen by the others.

use crate::core::bell::{self, BellState};
use crate::core::errors::StateError;
use crate::core::{Gate, KrausChannel, Measurement, QuantumState};
use parking_lot::Mutex;
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

static NEXT_QUBIT: AtomicU64 = AtomicU64::new(1);

/// BB84 preparation/measurement basis.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Basis {
    /// Computational basis {|0>, |1>}.
    Z,
    /// Hadamard basis {|+>, |->}.
    X,
}

impl Basis {
    pub fn random<R: Rng + ?Sized>(rng: &mut R) -> Basis {
        if rng.random_bool(0.5) { Basis::X } else { Basis::Z }
    }

    pub fn measurement(self) -> Measurement {
        match self {
            Basis::Z => Measurement::z_basis(),
            Basis::X => Measurement::x_basis(),
        }
    }
}

#[derive(Debug)]
struct Register {
    inner: Mutex<RegisterState>,
}

#[derive(Debug)]
struct RegisterState {
    state: QuantumState,
    /// Qubit id held at each register index.
    slots: Vec<u64>,
    /// Set once merged into a larger register; handles follow it.
    merged_into: Option<Arc<Register>>,
}

impl RegisterState {
    fn index_of(&self, id: u64) -> Result<usize, StateError> {
        self.slots
            .iter()
            .position(|&slot| slot == id)
            .ok_or(StateError::InvalidDimensions)
    }
}

impl Register {
    fn new(state: QuantumState, slots: Vec<u64>) -> Arc<Self> {
        Arc::new(Self {
            inner: Mutex::new(RegisterState {
                state,
                slots,
                merged_into: None,
            }),
        })
    }

    /// Follows merges to the register currently holding the state.
    fn live(self: &Arc<Self>) -> Arc<Register> {
        let mut current = self.clone();
        loop {
            let next = current.inner.lock().merged_into.clone();
            match next {
                Some(next) => current = next,
                None => return current,
            }
        }
    }
}

/// A single qubit. Clones are handles to the same physical qubit.
#[derive(Debug, Clone)]
pub struct Qubit {
    register: Arc<Register>,
    id: u64,
}

fn next_id() -> u64 {
    NEXT_QUBIT.fetch_add(1, Ordering::Relaxed)
}

impl Qubit {
    /// Encodes `bit` in `basis`: X for a one, then H for the X basis.
    pub fn prepare(bit: bool, basis: Basis) -> Result<Qubit, StateError> {
        let mut state = QuantumState::new(1);
        if bit {
            state.apply(&Gate::x(), &[0])?;
        }
        if basis == Basis::X {
            state.apply(&Gate::h(), &[0])?;
        }
        Qubit::from_state(state)
    }

    pub fn from_state(state: QuantumState) -> Result<Qubit, StateError> {
        if state.num_qubits != 1 {
            return Err(StateError::InvalidDimensions);
        }
        let id = next_id();
        Ok(Qubit {
            register: Register::new(state, vec![id]),
            id,
        })
    }

    /// Two qubits sharing |Φ+>.
    pub fn entangled_pair() -> Result<(Qubit, Qubit), StateError> {
        let (a, b) = (next_id(), next_id());
        let register = Register::new(bell::bell_pair()?, vec![a, b]);
        Ok((
            Qubit {
                register: register.clone(),
                id: a,
            },
            Qubit { register, id: b },
        ))
    }

    /// Runs `f` on the register holding this qubit, with the qubit's index.
    fn with_state<R>(
        &self,
        f: impl FnOnce(&mut QuantumState, usize) -> Result<R, StateError>,
    ) -> Result<R, StateError> {
        loop {
            let register = self.register.live();
            let mut inner = register.inner.lock();
            if inner.merged_into.is_some() {
                continue;
            }
            let index = inner.index_of(self.id)?;
            return f(&mut inner.state, index);
        }
    }

    /// Runs `f` on one register holding both qubits, merging theirs first if
    /// they differ.
    fn with_pair<R>(
        a: &Qubit,
        b: &Qubit,
        f: impl FnOnce(&mut QuantumState, usize, usize) -> Result<R, StateError>,
    ) -> Result<R, StateError> {
        if a.id == b.id {
            return Err(StateError::InvalidDimensions);
        }
        loop {
            let (ra, rb) = (a.register.live(), b.register.live());
            if Arc::ptr_eq(&ra, &rb) {
                let mut inner = ra.inner.lock();
                if inner.merged_into.is_some() {
                    continue;
                }
                let (ia, ib) = (inner.index_of(a.id)?, inner.index_of(b.id)?);
                return f(&mut inner.state, ia, ib);
            }

            // fixed lock order so two concurrent merges cannot deadlock
            let (high, low) = if Arc::as_ptr(&ra) < Arc::as_ptr(&rb) {
                (ra, rb)
            } else {
                (rb, ra)
            };
            let mut high_inner = high.inner.lock();
            let mut low_inner = low.inner.lock();
            if high_inner.merged_into.is_some() || low_inner.merged_into.is_some() {
                continue;
            }

            let mut state = high_inner.state.tensor(&low_inner.state);
            let mut slots = low_inner.slots.clone();
            slots.extend_from_slice(&high_inner.slots);
            let position = |id: u64| {
                slots
                    .iter()
                    .position(|&slot| slot == id)
                    .ok_or(StateError::InvalidDimensions)
            };
            let (ia, ib) = (position(a.id)?, position(b.id)?);
            let result = f(&mut state, ia, ib);

            let merged = Register::new(state, slots);
            high_inner.merged_into = Some(merged.clone());
            low_inner.merged_into = Some(merged);
            return result;
        }
    }

    pub fn apply(&mut self, gate: &Gate) -> Result<(), StateError> {
        self.with_state(|state, index| state.apply(gate, &[index]))
    }

    pub fn apply_channel(&mut self, channel: &KrausChannel) -> Result<(), StateError> {
        self.with_state(|state, index| state.apply_channel(channel, &[index]))
    }

    /// Measures in `basis`, collapsing the state. Returns the bit read.
    pub fn measure(&mut self, basis: Basis) -> Result<bool, StateError> {
        let result = self.with_state(|state, index| state.measure(&basis.measurement(), &[index]))?;
        Ok(result.index == 1)
    }

    /// Reduced single-qubit state.
    pub fn reduced_state(&self) -> Result<QuantumState, StateError> {
        self.with_state(|state, index| state.reduced(index))
    }

    /// Joint two-qubit state of `a` (qubit 0) and `b` (qubit 1).
    pub fn joint_state(a: &Qubit, b: &Qubit) -> Result<QuantumState, StateError> {
        Qubit::with_pair(a, b, |state, ia, ib| state.reduced_to(&[ia, ib]))
    }

    /// Bell measurement of `first` and `second`, collapsing whatever they are
    /// entangled with.
    pub fn bell_measure(
        first: &mut Qubit,
        second: &mut Qubit,
    ) -> Result<(BellState, [f64; 4]), StateError> {
        Qubit::with_pair(first, second, |state, a, b| bell::measure_pair(state, a, b))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn matching_basis_reads_back_the_bit() {
        for basis in [Basis::Z, Basis::X] {
            for bit in [false, true] {
                let mut q = Qubit::prepare(bit, basis).unwrap();
                assert_eq!(q.measure(basis).unwrap(), bit);
            }
        }
    }

    #[test]
    fn conjugate_basis_is_random() {
        let mut ones = 0;
        for _ in 0..400 {
            let mut q = Qubit::prepare(false, Basis::X).unwrap();
            if q.measure(Basis::Z).unwrap() {
                ones += 1;
            }
        }
        assert!((120..280).contains(&ones), "got {ones} ones");
    }

    #[test]
    fn multi_qubit_states_are_not_qubits() {
        assert!(Qubit::from_state(QuantumState::new(2)).is_err());
    }

    #[test]
    fn halves_of_a_pair_read_the_same_bit() {
        for _ in 0..20 {
            let (mut a, mut b) = Qubit::entangled_pair().unwrap();
            assert_eq!(a.measure(Basis::Z).unwrap(), b.measure(Basis::Z).unwrap());
        }
    }

    #[test]
    fn a_gate_on_one_half_is_seen_by_the_other() {
        let (mut a, b) = Qubit::entangled_pair().unwrap();
        a.apply(&Gate::x()).unwrap();
        let joint = Qubit::joint_state(&a, &b).unwrap();
        assert_relative_eq!(
            joint.fidelity(&BellState::PsiPlus.ket()).unwrap(),
            1.0,
            epsilon = 1e-12
        );
    }

    #[test]
    fn independent_qubits_form_a_product_state() {
        let a = Qubit::prepare(true, Basis::Z).unwrap();
        let b = Qubit::prepare(false, Basis::Z).unwrap();
        let joint = Qubit::joint_state(&a, &b).unwrap();
        // a is the low bit: |b a> = |01>
        assert_relative_eq!(joint.density_matrix[[1, 1]].re, 1.0, epsilon = 1e-12);
        assert!(Qubit::joint_state(&a, &a).is_err());
    }

    #[test]
    fn bell_measuring_two_pairs_swaps_entanglement() {
        for _ in 0..20 {
            let (a1, mut a2) = Qubit::entangled_pair().unwrap();
            let (mut b1, mut b2) = Qubit::entangled_pair().unwrap();
            let (outcome, _) = Qubit::bell_measure(&mut a2, &mut b2).unwrap();
            b1.apply(&outcome.correction().gate()).unwrap();

            let outer = Qubit::joint_state(&a1, &b1).unwrap();
            assert_relative_eq!(
                outer.fidelity(&BellState::PhiPlus.ket()).unwrap(),
                1.0,
                epsilon = 1e-9
            );
        }
    }
}
