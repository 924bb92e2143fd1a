use crate::core::errors::MeasurementError;
use crate::core::utils;
use ndarray::{Array1, Array2, array};
use num_complex::Complex64;

#[derive(Clone, Debug)]
pub struct Measurement {
    /// Measurement operators, one per outcome
    pub operators: Vec<Array2<Complex64>>,
    /// Value reported for each outcome
    pub values: Vec<f64>,
    /// Number of qubits the measurement acts on
    pub num_qubits: usize,
}

impl Measurement {
    pub fn new(
        operators: Vec<Array2<Complex64>>,
        values: Vec<f64>,
    ) -> Result<Self, MeasurementError> {
        if operators.len() != values.len() {
            return Err(MeasurementError::CountMismatch {
                ops: operators.len(),
                vals: values.len(),
            });
        }

        let Some(first) = operators.first() else {
            return Err(MeasurementError::InvalidDimensions);
        };

        let (rows, cols) = first.dim();
        if rows != cols || !rows.is_power_of_two() {
            return Err(MeasurementError::InvalidDimensions);
        }
        if operators.iter().any(|op| op.dim() != (rows, cols)) {
            return Err(MeasurementError::InvalidDimensions);
        }

        if !utils::check_completeness(&operators, rows) {
            return Err(MeasurementError::NotComplete);
        }

        Ok(Self {
            operators,
            values,
            num_qubits: rows.trailing_zeros() as usize,
        })
    }

    /// Projective measurement onto an orthonormal basis known to be complete.
    fn projective(basis: &[Array1<Complex64>]) -> Measurement {
        let dim = basis.first().map_or(1, |v| v.len());
        Measurement {
            operators: basis.iter().map(|v| utils::outer_product(v, v)).collect(),
            values: (0..basis.len()).map(|i| i as f64).collect(),
            num_qubits: dim.trailing_zeros() as usize,
        }
    }

    /// Lifts every operator onto a `num_total_qubits` register.
    pub fn get_expanded_operators(
        &self,
        num_total_qubits: usize,
        targets: &[usize],
    ) -> Result<Vec<Array2<Complex64>>, MeasurementError> {
        if targets.len() != self.num_qubits {
            return Err(MeasurementError::InvalidDimensions);
        }

        Ok(self
            .operators
            .iter()
            .map(|op| utils::expand_operator(num_total_qubits, op, targets, &[]))
            .collect())
    }

    /// Z basis (Computational) -> {|0>, |1>}.
    pub fn z_basis() -> Measurement {
        let zero = Complex64::new(0.0, 0.0);
        let one = Complex64::new(1.0, 0.0);
        Measurement::projective(&[array![one, zero], array![zero, one]])
    }

    /// X basis (Hadamard) -> {|+>, |->}.
    pub fn x_basis() -> Measurement {
        let s = Complex64::new(std::f64::consts::FRAC_1_SQRT_2, 0.0);
        Measurement::projective(&[array![s, s], array![s, -s]])
    }

    /// Bell basis -> {|Φ+>, |Ψ+>, |Φ->, |Ψ->}, outcomes 0..=3.
    pub fn bell_basis() -> Measurement {
        let basis: Vec<Array1<Complex64>> = crate::core::bell::BellState::ALL
            .iter()
            .map(|state| state.ket())
            .collect();
        Measurement::projective(&basis)
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MeasurementResult {
    /// Index of the operator that fired
    pub index: usize,
    /// Measurement value
    pub value: f64,
}
