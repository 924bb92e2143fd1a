//! Bell states, Bell-basis measurement and the Pauli corrections used by
//! entanglement swapping.
//!
//! Two-qubit kets are indexed `2a + b`, where `a` is the first factor of the
//! tensor product and `b` the second. Corrections always act on `b`.

use crate::core::errors::StateError;
use crate::core::gates::Gate;
use crate::core::measurements::Measurement;
use crate::core::state::QuantumState;
use ndarray::{Array1, array};
use num_complex::Complex64;
use serde::{Deserialize, Serialize};
use std::f64::consts::FRAC_1_SQRT_2;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum BellState {
    PhiPlus,
    PsiPlus,
    PhiMinus,
    PsiMinus,
}

impl BellState {
    /// Ordered by measurement outcome: 00, 01, 10, 11.
    pub const ALL: [BellState; 4] = [
        BellState::PhiPlus,
        BellState::PsiPlus,
        BellState::PhiMinus,
        BellState::PsiMinus,
    ];

    pub fn from_outcome(outcome: usize) -> Option<BellState> {
        Self::ALL.get(outcome).copied()
    }

    pub fn ket(self) -> Array1<Complex64> {
        let s = Complex64::new(FRAC_1_SQRT_2, 0.0);
        let o = Complex64::new(0.0, 0.0);
        match self {
            BellState::PhiPlus => array![s, o, o, s],
            BellState::PsiPlus => array![o, s, s, o],
            BellState::PhiMinus => array![s, o, o, -s],
            BellState::PsiMinus => array![o, s, -s, o],
        }
    }

    /// Pauli that maps this state back to |Φ+> when applied to the second qubit.
    pub fn correction(self) -> PauliCorrection {
        match self {
            BellState::PhiPlus => PauliCorrection::I,
            BellState::PsiPlus => PauliCorrection::X,
            BellState::PhiMinus => PauliCorrection::Z,
            BellState::PsiMinus => PauliCorrection::Y,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PauliCorrection {
    I,
    X,
    Z,
    Y,
}

impl PauliCorrection {
    pub fn gate(self) -> Gate {
        match self {
            PauliCorrection::I => Gate::i(),
            PauliCorrection::X => Gate::x(),
            PauliCorrection::Z => Gate::z(),
            PauliCorrection::Y => Gate::y(),
        }
    }
}

/// Result of projecting two qubits onto the Bell basis.
#[derive(Debug, Clone)]
pub struct BellMeasurement {
    pub outcome: BellState,
    /// Probability of each outcome, in [`BellState::ALL`] order.
    pub probabilities: [f64; 4],
    /// Joint two-qubit state after collapse.
    pub post_state: QuantumState,
}

impl BellMeasurement {
    pub fn correction(&self) -> PauliCorrection {
        self.outcome.correction()
    }
}

/// Prepares |Φ+> from |00> with H on the first qubit and a CNOT.
pub fn bell_pair() -> Result<QuantumState, StateError> {
    let mut state = QuantumState::new(2);
    state.apply(&Gate::h(), &[0])?;
    state.apply(&Gate::cnot(), &[0, 1])?;
    Ok(state)
}

/// Joint Bell measurement of two single-qubit states.
///
/// The pair is combined as `first ⊗ second`; the drawn outcome is weighted by
/// the overlap of the joint state with each Bell projector.
pub fn bell_measurement(
    first: &QuantumState,
    second: &QuantumState,
) -> Result<BellMeasurement, StateError> {
    if first.num_qubits != 1 || second.num_qubits != 1 {
        return Err(StateError::InvalidDimensions);
    }

    let mut joint = first.tensor(second);
    let (outcome, probabilities) = measure_pair(&mut joint, 1, 0)?;

    Ok(BellMeasurement {
        outcome,
        probabilities,
        post_state: joint,
    })
}

/// Bell measurement of qubits `first` and `second` of a larger register,
/// collapsing it in place. Returns the outcome and the probability of each
/// Bell state.
pub fn measure_pair(
    state: &mut QuantumState,
    first: usize,
    second: usize,
) -> Result<(BellState, [f64; 4]), StateError> {
    let basis = Measurement::bell_basis();
    let targets = [second, first];

    let (probs, _) = state.outcome_probabilities(&basis, &targets)?;
    let result = state.measure(&basis, &targets)?;
    let outcome = BellState::from_outcome(result.index).ok_or(StateError::InvalidDimensions)?;

    let mut probabilities = [0.0; 4];
    for (slot, p) in probabilities.iter_mut().zip(probs) {
        *slot = p;
    }
    Ok((outcome, probabilities))
}

/// Applies `correction` to the second qubit of a two-qubit state.
pub fn apply_correction(
    state: &mut QuantumState,
    correction: PauliCorrection,
) -> Result<(), StateError> {
    let local = Gate::i().tensor(&correction.gate());
    state.apply(&local, &[0, 1])
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn ket_state(a: Complex64, b: Complex64) -> QuantumState {
        QuantumState::from_state_vector(array![a, b]).unwrap()
    }

    #[test]
    fn bell_pair_is_phi_plus() {
        let pair = bell_pair().unwrap();
        assert_relative_eq!(
            pair.fidelity(&BellState::PhiPlus.ket()).unwrap(),
            1.0,
            epsilon = 1e-12
        );
    }

    #[test]
    fn outcome_distribution_sums_to_one() {
        let s = Complex64::new(FRAC_1_SQRT_2, 0.0);
        let inputs = [
            (QuantumState::new(1), QuantumState::new(1)),
            (ket_state(s, s), QuantumState::new(1)),
            (ket_state(s, -s), ket_state(s, Complex64::new(0.0, FRAC_1_SQRT_2))),
        ];
        for (a, b) in inputs {
            let m = bell_measurement(&a, &b).unwrap();
            let total: f64 = m.probabilities.iter().sum();
            assert_relative_eq!(total, 1.0, epsilon = 1e-9);
        }
    }

    #[test]
    fn correction_restores_phi_plus() {
        let s = Complex64::new(FRAC_1_SQRT_2, 0.0);
        for _ in 0..20 {
            let m = bell_measurement(&ket_state(s, s), &QuantumState::new(1)).unwrap();
            let mut post = m.post_state.clone();
            apply_correction(&mut post, m.correction()).unwrap();
            assert_relative_eq!(
                post.fidelity(&BellState::PhiPlus.ket()).unwrap(),
                1.0,
                epsilon = 1e-9
            );
        }
    }

    #[test]
    fn every_bell_state_maps_back_to_phi_plus() {
        for state in BellState::ALL {
            let mut rho = QuantumState::from_state_vector(state.ket()).unwrap();
            apply_correction(&mut rho, state.correction()).unwrap();
            assert_relative_eq!(
                rho.fidelity(&BellState::PhiPlus.ket()).unwrap(),
                1.0,
                epsilon = 1e-12
            );
        }
    }

    #[test]
    fn swapping_two_pairs_leaves_the_outer_qubits_entangled() {
        // qubits 3,2 and 1,0 each hold |Φ+>; measure the inner 2 and 1
        for _ in 0..20 {
            let mut register = bell_pair().unwrap().tensor(&bell_pair().unwrap());
            let (outcome, probabilities) = measure_pair(&mut register, 2, 1).unwrap();
            for p in probabilities {
                assert_relative_eq!(p, 0.25, epsilon = 1e-9);
            }
            register.apply(&outcome.correction().gate(), &[0]).unwrap();
            let outer = register.reduced_to(&[3, 0]).unwrap();
            assert_relative_eq!(
                outer.fidelity(&BellState::PhiPlus.ket()).unwrap(),
                1.0,
                epsilon = 1e-9
            );
        }
    }

    #[test]
    fn multi_qubit_inputs_are_rejected() {
        let pair = bell_pair().unwrap();
        assert!(bell_measurement(&pair, &QuantumState::new(1)).is_err());
    }
}
