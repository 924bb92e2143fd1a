use crate::core::errors::ChannelError;
use crate::core::utils;
use ndarray::{Array2, array};
use num_complex::Complex64;

/// A completely positive, trace-preserving map given by its Kraus operators.
#[derive(Clone, Debug)]
pub struct KrausChannel {
    pub kraus_ops: Vec<Array2<Complex64>>,
    pub num_qubits: usize,
}

impl KrausChannel {
    pub fn new(kraus_ops: Vec<Array2<Complex64>>) -> Result<Self, ChannelError> {
        let Some(first) = kraus_ops.first() else {
            return Err(ChannelError::Empty);
        };

        let (rows, cols) = first.dim();
        if rows != cols || !rows.is_power_of_two() {
            return Err(ChannelError::InvalidDimensions);
        }
        if kraus_ops.iter().any(|op| op.dim() != (rows, cols)) {
            return Err(ChannelError::OperatorSizeMismatch);
        }

        if !utils::check_completeness(&kraus_ops, rows) {
            return Err(ChannelError::NotComplete);
        }

        Ok(Self {
            kraus_ops,
            num_qubits: rows.trailing_zeros() as usize,
        })
    }

    /// Lifts every Kraus operator onto a `num_total_qubits` register.
    pub fn get_expanded_operators(
        &self,
        num_total_qubits: usize,
        targets: &[usize],
    ) -> Result<Vec<Array2<Complex64>>, ChannelError> {
        if targets.len() != self.num_qubits {
            return Err(ChannelError::InvalidDimensions);
        }

        Ok(self
            .kraus_ops
            .iter()
            .map(|op| utils::expand_operator(num_total_qubits, op, targets, &[]))
            .collect())
    }

    /// Depolarizing channel with total error probability `p`.
    ///
    /// Kraus weights are `1 - 3p/4` for I and `p/4` for each of X, Y, Z.
    pub fn depolarizing(p: f64) -> Result<KrausChannel, ChannelError> {
        validate_probability(p)?;

        let w_i = (1.0 - 0.75 * p).sqrt();
        let w = (p / 4.0).sqrt();
        let zero = Complex64::new(0.0, 0.0);

        let k_i = array![
            [Complex64::new(w_i, 0.0), zero],
            [zero, Complex64::new(w_i, 0.0)]
        ];
        let k_x = array![
            [zero, Complex64::new(w, 0.0)],
            [Complex64::new(w, 0.0), zero]
        ];
        let k_y = array![
            [zero, Complex64::new(0.0, -w)],
            [Complex64::new(0.0, w), zero]
        ];
        let k_z = array![
            [Complex64::new(w, 0.0), zero],
            [zero, Complex64::new(-w, 0.0)]
        ];

        KrausChannel::new(vec![k_i, k_x, k_y, k_z])
    }

    /// Amplitude damping (T1 relaxation) with decay rate `gamma`.
    pub fn amplitude_damping(gamma: f64) -> Result<KrausChannel, ChannelError> {
        validate_probability(gamma)?;

        let zero = Complex64::new(0.0, 0.0);
        let k0 = array![
            [Complex64::new(1.0, 0.0), zero],
            [zero, Complex64::new((1.0 - gamma).sqrt(), 0.0)]
        ];
        let k1 = array![[zero, Complex64::new(gamma.sqrt(), 0.0)], [zero, zero]];

        KrausChannel::new(vec![k0, k1])
    }

    /// Phase damping (T2 relaxation) with rate `lambda`.
    pub fn phase_damping(lambda: f64) -> Result<KrausChannel, ChannelError> {
        validate_probability(lambda)?;

        let zero = Complex64::new(0.0, 0.0);
        let k0 = array![
            [Complex64::new(1.0, 0.0), zero],
            [zero, Complex64::new((1.0 - lambda).sqrt(), 0.0)]
        ];
        let k1 = array![[zero, zero], [zero, Complex64::new(lambda.sqrt(), 0.0)]];

        KrausChannel::new(vec![k0, k1])
    }
}

/// Rejects probabilities outside `[0, 1]` (NaN included).
pub fn validate_probability(p: f64) -> Result<(), ChannelError> {
    if !(0.0..=1.0).contains(&p) {
        return Err(ChannelError::InvalidProbability(p));
    }
    Ok(())
}
