use crate::core::errors::GateError;
use crate::core::utils;
use ndarray::{Array2, arr2};
use num_complex::Complex64;

/// Represents a quantum gate.
///
/// A gate is defined by its unitary matrix and the number of qubits it acts on.
#[derive(Clone, Debug)]
pub struct Gate {
    /// The unitary matrix of the gate.
    pub matrix: Array2<Complex64>,
    /// The number of qubits the gate acts on.
    pub num_qubits: usize,
}

impl Gate {
    /// Creates a new `Gate` from a unitary matrix.
    ///
    /// # Errors
    ///
    /// Returns a `GateError` if the matrix is not square, its dimension is not
    /// a power of 2, or it is not unitary.
    pub fn new(matrix: Array2<Complex64>) -> Result<Self, GateError> {
        let (rows, cols) = matrix.dim();

        if rows != cols {
            return Err(GateError::NotSquareMatrix);
        }

        if !rows.is_power_of_two() {
            return Err(GateError::InvalidDimensions);
        }

        if !Self::check_unitary(&matrix) {
            return Err(GateError::NonUnitary);
        }

        let num_qubits = rows.trailing_zeros() as usize;

        Ok(Self { matrix, num_qubits })
    }

    /// Wraps a matrix that is unitary by construction.
    fn known(matrix: Array2<Complex64>) -> Gate {
        let num_qubits = matrix.nrows().trailing_zeros() as usize;
        Gate { matrix, num_qubits }
    }

    fn check_unitary(matrix: &Array2<Complex64>) -> bool {
        let eye = Array2::<Complex64>::eye(matrix.nrows());
        let product = matrix.dot(&utils::dagger(matrix));

        product
            .iter()
            .zip(eye.iter())
            .all(|(a, b)| (*a - *b).norm() < 1e-6)
    }

    /// Lifts `gate` onto a `num_total_qubits` register, acting on `targets`
    /// when every qubit in `controls` is set and as identity elsewhere.
    ///
    /// # Errors
    ///
    /// Returns `GateError::DuplicateQubit` if an index repeats across
    /// `targets` and `controls`.
    pub fn expand_gate(
        num_total_qubits: usize,
        gate: &Gate,
        targets: &[usize],
        controls: &[usize],
    ) -> Result<Gate, GateError> {
        let all: Vec<usize> = targets.iter().chain(controls).copied().collect();
        if let Some(dup) = utils::find_duplicate(&all) {
            return Err(GateError::DuplicateQubit(dup));
        }

        Ok(Gate {
            matrix: utils::expand_operator(num_total_qubits, &gate.matrix, targets, controls),
            num_qubits: num_total_qubits,
        })
    }

    /// Tensor product `self ⊗ other`; `other` lands on the low qubits.
    pub fn tensor(&self, other: &Gate) -> Gate {
        Gate {
            matrix: utils::kronecker_product(&self.matrix, &other.matrix),
            num_qubits: self.num_qubits + other.num_qubits,
        }
    }

    // --- Standard Gates ---

    /// Identity.
    pub fn i() -> Gate {
        Gate::known(Array2::eye(2))
    }

    /// Pauli-X (NOT).
    pub fn x() -> Gate {
        Gate::known(arr2(&[
            [Complex64::new(0.0, 0.0), Complex64::new(1.0, 0.0)],
            [Complex64::new(1.0, 0.0), Complex64::new(0.0, 0.0)],
        ]))
    }

    /// Pauli-Y.
    pub fn y() -> Gate {
        Gate::known(arr2(&[
            [Complex64::new(0.0, 0.0), Complex64::new(0.0, -1.0)],
            [Complex64::new(0.0, 1.0), Complex64::new(0.0, 0.0)],
        ]))
    }

    /// Pauli-Z.
    pub fn z() -> Gate {
        Gate::known(arr2(&[
            [Complex64::new(1.0, 0.0), Complex64::new(0.0, 0.0)],
            [Complex64::new(0.0, 0.0), Complex64::new(-1.0, 0.0)],
        ]))
    }

    /// Hadamard.
    pub fn h() -> Gate {
        let factor = 1.0 / 2.0_f64.sqrt();
        Gate::known(arr2(&[
            [Complex64::new(factor, 0.0), Complex64::new(factor, 0.0)],
            [Complex64::new(factor, 0.0), Complex64::new(-factor, 0.0)],
        ]))
    }

    /// CNOT with qubit 0 as control and qubit 1 as target.
    pub fn cnot() -> Gate {
        Gate {
            matrix: utils::expand_operator(2, &Gate::x().matrix, &[1], &[0]),
            num_qubits: 2,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn standard_gates_are_unitary() {
        for gate in [Gate::i(), Gate::x(), Gate::y(), Gate::z(), Gate::h(), Gate::cnot()] {
            assert!(Gate::new(gate.matrix.clone()).is_ok());
        }
    }

    #[test]
    fn non_unitary_matrix_is_rejected() {
        let m = arr2(&[
            [Complex64::new(1.0, 0.0), Complex64::new(1.0, 0.0)],
            [Complex64::new(0.0, 0.0), Complex64::new(1.0, 0.0)],
        ]);
        assert!(matches!(Gate::new(m), Err(GateError::NonUnitary)));
    }

    #[test]
    fn overlapping_control_and_target_is_rejected() {
        let err = Gate::expand_gate(2, &Gate::x(), &[0], &[0]).unwrap_err();
        assert!(matches!(err, GateError::DuplicateQubit(0)));
    }

    #[test]
    fn tensor_adds_qubit_counts() {
        let g = Gate::i().tensor(&Gate::x());
        assert_eq!(g.num_qubits, 2);
        assert_eq!(g.matrix.dim(), (4, 4));
    }
}
