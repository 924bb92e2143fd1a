use crate::core::channels::KrausChannel;
use crate::core::errors::{ChannelError, MeasurementError, StateError};
use crate::core::gates::Gate;
use crate::core::measurements::{Measurement, MeasurementResult};
use crate::core::utils::{self, find_duplicate, trace};
use ndarray::{Array1, Array2};
use num_complex::Complex64;
use rand::Rng;

/// A register of `num_qubits` qubits held as a density matrix.
#[derive(Clone, Debug)]
pub struct QuantumState {
    pub density_matrix: Array2<Complex64>,
    pub num_qubits: usize,
}

impl QuantumState {
    /// Creates a new quantum state initialized to |0...0>.
    pub fn new(num_qubits: usize) -> Self {
        let dim = 1 << num_qubits;
        let mut density_matrix = Array2::<Complex64>::zeros((dim, dim));
        density_matrix[[0, 0]] = Complex64::new(1.0, 0.0);

        Self {
            density_matrix,
            num_qubits,
        }
    }

    fn check_vector_state(vector: &Array1<Complex64>) -> Result<(), StateError> {
        if !vector.len().is_power_of_two() {
            return Err(StateError::InvalidDimensions);
        }

        let norm_sqr: f64 = vector.iter().map(|c| c.norm_sqr()).sum();
        if (norm_sqr - 1.0).abs() > 1e-12 {
            return Err(StateError::NotNormalized(norm_sqr));
        }

        Ok(())
    }

    fn check_density_matrix(matrix: &Array2<Complex64>) -> Result<(), StateError> {
        let (rows, cols) = matrix.dim();

        if rows != cols {
            return Err(StateError::DimensionMismatch {
                expected: rows,
                got_rows: rows,
                got_cols: cols,
            });
        }
        if !rows.is_power_of_two() {
            return Err(StateError::InvalidDimensions);
        }

        let tr = trace(matrix);
        if (tr - Complex64::new(1.0, 0.0)).norm() > 1e-9 {
            return Err(StateError::InvalidTrace(tr));
        }

        Ok(())
    }

    fn apply_operator(&mut self, u: &Array2<Complex64>) -> Result<(), StateError> {
        let (rows, cols) = u.dim();
        let dim = 1 << self.num_qubits;

        if rows != dim || cols != dim {
            return Err(StateError::DimensionMismatch {
                expected: dim,
                got_rows: rows,
                got_cols: cols,
            });
        }

        self.density_matrix = u.dot(&self.density_matrix).dot(&utils::dagger(u));
        Ok(())
    }

    fn validate_qubit_index(&self, index: usize) -> Result<(), StateError> {
        if index >= self.num_qubits {
            return Err(StateError::IndexOutOfBounds {
                index,
                num_qubits: self.num_qubits,
            });
        }
        Ok(())
    }

    /// Builds the pure state `|psi><psi|` from a ket.
    pub fn from_state_vector(vector: Array1<Complex64>) -> Result<Self, StateError> {
        Self::check_vector_state(&vector)?;

        let num_qubits = vector.len().trailing_zeros() as usize;
        Ok(Self {
            density_matrix: utils::outer_product(&vector, &vector),
            num_qubits,
        })
    }

    pub fn from_density_matrix(matrix: Array2<Complex64>) -> Result<Self, StateError> {
        Self::check_density_matrix(&matrix)?;
        let num_qubits = matrix.nrows().trailing_zeros() as usize;

        Ok(Self {
            density_matrix: matrix,
            num_qubits,
        })
    }

    /// Checks if a QuantumState is valid.
    pub fn is_valid(&self) -> Result<(), StateError> {
        Self::check_density_matrix(&self.density_matrix)
    }

    /// Joint state `self ⊗ other`; `other` occupies the low qubit indices.
    pub fn tensor(&self, other: &QuantumState) -> QuantumState {
        QuantumState {
            density_matrix: utils::kronecker_product(&self.density_matrix, &other.density_matrix),
            num_qubits: self.num_qubits + other.num_qubits,
        }
    }

    /// Reduced single-qubit state of qubit `keep`.
    pub fn reduced(&self, keep: usize) -> Result<QuantumState, StateError> {
        self.validate_qubit_index(keep)?;
        Ok(QuantumState {
            density_matrix: utils::reduce_to_qubit(&self.density_matrix, self.num_qubits, keep),
            num_qubits: 1,
        })
    }

    /// Reduced state of the qubits in `keep`; `keep[i]` becomes qubit `i`.
    pub fn reduced_to(&self, keep: &[usize]) -> Result<QuantumState, StateError> {
        for &q in keep {
            self.validate_qubit_index(q)?;
        }
        if let Some(dup) = find_duplicate(keep) {
            return Err(MeasurementError::DuplicateQubit(dup).into());
        }
        Ok(QuantumState {
            density_matrix: utils::reduce_to_qubits(&self.density_matrix, self.num_qubits, keep),
            num_qubits: keep.len(),
        })
    }

    /// Overlap `<psi|rho|psi>` with a pure state of matching dimension.
    pub fn fidelity(&self, ket: &Array1<Complex64>) -> Result<f64, StateError> {
        let dim = self.density_matrix.nrows();
        if ket.len() != dim {
            return Err(StateError::DimensionMismatch {
                expected: dim,
                got_rows: ket.len(),
                got_cols: 1,
            });
        }
        let rho_psi = self.density_matrix.dot(ket);
        let overlap: Complex64 = ket.iter().zip(rho_psi.iter()).map(|(a, b)| a.conj() * b).sum();
        Ok(overlap.re)
    }

    /// Applies a gate to `target_qubits`.
    pub fn apply(&mut self, gate: &Gate, target_qubits: &[usize]) -> Result<(), StateError> {
        if gate.num_qubits != target_qubits.len() {
            return Err(StateError::DimensionMismatch {
                expected: gate.num_qubits,
                got_rows: target_qubits.len(),
                got_cols: 0,
            });
        }
        for &q in target_qubits {
            self.validate_qubit_index(q)?;
        }

        let full = Gate::expand_gate(self.num_qubits, gate, target_qubits, &[])?;
        self.apply_operator(&full.matrix)
    }

    /// Outcome probabilities of `measurement` together with the lifted operators.
    pub fn outcome_probabilities(
        &self,
        measurement: &Measurement,
        target_qubits: &[usize],
    ) -> Result<(Vec<f64>, Vec<Array2<Complex64>>), StateError> {
        for &q in target_qubits {
            self.validate_qubit_index(q)?;
        }
        if let Some(dup) = find_duplicate(target_qubits) {
            return Err(MeasurementError::DuplicateQubit(dup).into());
        }

        let expanded_ops = measurement.get_expanded_operators(self.num_qubits, target_qubits)?;

        let mut probs: Vec<f64> = expanded_ops
            .iter()
            .map(|op| {
                let projected = op.dot(&self.density_matrix).dot(&utils::dagger(op));
                trace(&projected).re.max(0.0)
            })
            .collect();

        // renormalise against floating-point drift
        let total: f64 = probs.iter().sum();
        if total > 0.0 {
            for p in &mut probs {
                *p /= total;
            }
        }

        Ok((probs, expanded_ops))
    }

    fn pick_outcome(probs: &[f64]) -> usize {
        let roll: f64 = rand::rng().random();

        let mut cumulative = 0.0;
        for (i, &p) in probs.iter().enumerate() {
            cumulative += p;
            if roll < cumulative {
                return i;
            }
        }
        // rounding left the roll above the last bucket; take the last likely outcome
        probs.iter().rposition(|&p| p > 0.0).unwrap_or(0)
    }

    /// Measures `target_qubits` and collapses the state onto the drawn outcome.
    pub fn measure(
        &mut self,
        measurement: &Measurement,
        target_qubits: &[usize],
    ) -> Result<MeasurementResult, StateError> {
        let (probs, ops) = self.outcome_probabilities(measurement, target_qubits)?;

        let outcome_idx = Self::pick_outcome(&probs);
        let p_selected = probs[outcome_idx];
        if p_selected <= 1e-12 {
            return Err(StateError::ImpossibleOutcome);
        }

        // rho' = (M_k rho M_k†) / p_k
        let m_k = &ops[outcome_idx];
        let numerator = m_k.dot(&self.density_matrix).dot(&utils::dagger(m_k));
        self.density_matrix = numerator.mapv(|val| val / p_selected);

        Ok(MeasurementResult {
            index: outcome_idx,
            value: measurement.values[outcome_idx],
        })
    }

    /// Sends the targeted qubits through a Kraus channel.
    pub fn apply_channel(
        &mut self,
        channel: &KrausChannel,
        target_qubits: &[usize],
    ) -> Result<(), StateError> {
        if let Some(dup) = find_duplicate(target_qubits) {
            return Err(ChannelError::DuplicateQubit(dup).into());
        }

        let ops = channel.get_expanded_operators(self.num_qubits, target_qubits)?;

        let dim = self.density_matrix.nrows();
        let new_rho = ops
            .iter()
            .fold(Array2::<Complex64>::zeros((dim, dim)), |acc, k| {
                acc + k.dot(&self.density_matrix).dot(&utils::dagger(k))
            });

        self.density_matrix = new_rho;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use ndarray::array;

    #[test]
    fn x_then_measure_z_gives_one() {
        let mut state = QuantumState::new(1);
        state.apply(&Gate::x(), &[0]).unwrap();
        let result = state.measure(&Measurement::z_basis(), &[0]).unwrap();
        assert_eq!(result.index, 1);
    }

    #[test]
    fn plus_state_has_even_z_statistics() {
        let mut state = QuantumState::new(1);
        state.apply(&Gate::h(), &[0]).unwrap();
        let (probs, _) = state
            .outcome_probabilities(&Measurement::z_basis(), &[0])
            .unwrap();
        assert_relative_eq!(probs[0], 0.5, epsilon = 1e-12);
        assert_relative_eq!(probs[1], 0.5, epsilon = 1e-12);
    }

    #[test]
    fn depolarizing_keeps_trace() {
        let mut state = QuantumState::new(1);
        state
            .apply_channel(&KrausChannel::depolarizing(0.4).unwrap(), &[0])
            .unwrap();
        assert!(state.is_valid().is_ok());
        // |0><0| -> (1 - p/2)|0><0| + (p/2)|1><1|
        assert_relative_eq!(state.density_matrix[[1, 1]].re, 0.2, epsilon = 1e-12);
    }

    #[test]
    fn full_amplitude_damping_relaxes_to_ground() {
        let mut state = QuantumState::new(1);
        state.apply(&Gate::x(), &[0]).unwrap();
        state
            .apply_channel(&KrausChannel::amplitude_damping(1.0).unwrap(), &[0])
            .unwrap();
        assert_relative_eq!(state.density_matrix[[0, 0]].re, 1.0, epsilon = 1e-12);
    }

    #[test]
    fn unnormalized_vector_is_rejected() {
        let v = array![Complex64::new(1.0, 0.0), Complex64::new(1.0, 0.0)];
        assert!(matches!(
            QuantumState::from_state_vector(v),
            Err(StateError::NotNormalized(_))
        ));
    }

    #[test]
    fn fidelity_of_pure_state_with_itself_is_one() {
        let s = std::f64::consts::FRAC_1_SQRT_2;
        let ket = array![Complex64::new(s, 0.0), Complex64::new(s, 0.0)];
        let state = QuantumState::from_state_vector(ket.clone()).unwrap();
        assert_relative_eq!(state.fidelity(&ket).unwrap(), 1.0, epsilon = 1e-12);
    }
}
