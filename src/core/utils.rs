//! Matrix helpers shared by states, gates, measurements and noise channels.
//!
//! Qubit `k` of an `n`-qubit register is bit `k` of a basis-state index, so
//! qubit 0 is the least significant bit. The Kronecker product `A ⊗ B` places
//! `B` on the low bits.

use ndarray::{Array1, Array2};
use num_complex::Complex64;

/// Kronecker (tensor) product of two matrices.
///
/// An `m x n` matrix `A` and a `p x q` matrix `B` give an `mp x nq` result
/// whose block `(i, j)` is `A[i, j] * B`.
pub fn kronecker_product(a: &Array2<Complex64>, b: &Array2<Complex64>) -> Array2<Complex64> {
    let (m, n) = a.dim();
    let (p, q) = b.dim();
    let mut out = Array2::<Complex64>::zeros((m * p, n * q));

    for i in 0..m {
        for j in 0..n {
            let scale = a[[i, j]];
            if scale.norm_sqr() < f64::EPSILON {
                continue;
            }
            for k in 0..p {
                for l in 0..q {
                    out[[i * p + k, j * q + l]] = scale * b[[k, l]];
                }
            }
        }
    }
    out
}

/// Computes the trace of a matrix (sum of diagonal elements).
pub fn trace(matrix: &Array2<Complex64>) -> Complex64 {
    matrix.diag().sum()
}

/// Conjugate transpose.
pub fn dagger(matrix: &Array2<Complex64>) -> Array2<Complex64> {
    matrix.t().mapv(|c| c.conj())
}

/// Lifts an operator acting on `targets` to the full `num_total_qubits` register.
///
/// Basis states whose `controls` bits are not all set are left untouched.
pub fn expand_operator(
    num_total_qubits: usize,
    matrix: &Array2<Complex64>,
    targets: &[usize],
    controls: &[usize],
) -> Array2<Complex64> {
    let dim = 1 << num_total_qubits;
    let mut full_matrix = Array2::<Complex64>::zeros((dim, dim));

    let control_mask = controls.iter().fold(0usize, |mask, &c| mask | (1 << c));
    let target_mask = targets.iter().fold(0usize, |mask, &t| mask | (1 << t));
    let passive_mask = !target_mask;

    for col_idx in 0..dim {
        if (col_idx & control_mask) != control_mask {
            full_matrix[[col_idx, col_idx]] = Complex64::new(1.0, 0.0);
            continue;
        }

        let small_col = extract_bits(col_idx, targets);
        for small_row in 0..matrix.nrows() {
            let val = matrix[[small_row, small_col]];
            if val.norm_sqr() < f64::EPSILON {
                continue;
            }
            let row_idx = (col_idx & passive_mask) | deposit_bits(small_row, targets);
            full_matrix[[row_idx, col_idx]] = val;
        }
    }
    full_matrix
}

/// Gathers the bits of `value` found at `indices` into a compact integer.
fn extract_bits(value: usize, indices: &[usize]) -> usize {
    indices
        .iter()
        .enumerate()
        .filter(|&(_, &pos)| (value >> pos) & 1 == 1)
        .fold(0, |acc, (i, _)| acc | (1 << i))
}

/// Inverse of [`extract_bits`]: bit `i` of `compact_value` lands at `indices[i]`.
fn deposit_bits(compact_value: usize, indices: &[usize]) -> usize {
    indices
        .iter()
        .enumerate()
        .filter(|&(i, _)| (compact_value >> i) & 1 == 1)
        .fold(0, |acc, (_, &pos)| acc | (1 << pos))
}

/// Find duplicate in a slice of usize
pub fn find_duplicate(indices: &[usize]) -> Option<usize> {
    let mut seen = std::collections::HashSet::new();
    indices.iter().find(|&&idx| !seen.insert(idx)).copied()
}

/// Checks $\sum M_k^\dagger M_k = I$ for measurement or Kraus operators.
pub fn check_completeness(ops: &[Array2<Complex64>], dim: usize) -> bool {
    let eye = Array2::<Complex64>::eye(dim);
    let sum = ops
        .iter()
        .fold(Array2::<Complex64>::zeros((dim, dim)), |acc, op| {
            acc + dagger(op).dot(op)
        });
    sum.iter()
        .zip(eye.iter())
        .all(|(a, b)| (a - b).norm() < 1e-9)
}

/// Computes the outer product of two vectors $|a\rangle\langle b|$.
pub fn outer_product(a: &Array1<Complex64>, b: &Array1<Complex64>) -> Array2<Complex64> {
    let mut res = Array2::zeros((a.len(), b.len()));
    for (i, &ai) in a.iter().enumerate() {
        for (j, &bj) in b.iter().enumerate() {
            res[[i, j]] = ai * bj.conj();
        }
    }
    res
}

/// Traces out every qubit except `keep`, returning its 2x2 reduced density matrix.
pub fn reduce_to_qubit(
    rho: &Array2<Complex64>,
    num_qubits: usize,
    keep: usize,
) -> Array2<Complex64> {
    reduce_to_qubits(rho, num_qubits, &[keep])
}

/// Traces out every qubit not in `keep`. Qubit `keep[i]` becomes qubit `i`
/// of the result.
pub fn reduce_to_qubits(
    rho: &Array2<Complex64>,
    num_qubits: usize,
    keep: &[usize],
) -> Array2<Complex64> {
    let dim = 1 << num_qubits;
    let mask = keep.iter().fold(0usize, |mask, &k| mask | (1 << k));
    let small = 1 << keep.len();
    let mut reduced = Array2::<Complex64>::zeros((small, small));

    for i in 0..dim {
        for j in 0..dim {
            if (i & !mask) != (j & !mask) {
                continue;
            }
            reduced[[extract_bits(i, keep), extract_bits(j, keep)]] += rho[[i, j]];
        }
    }
    reduced
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use ndarray::array;

    fn c(re: f64) -> Complex64 {
        Complex64::new(re, 0.0)
    }

    #[test]
    fn kronecker_places_second_factor_on_low_bits() {
        let zero = array![[c(1.0), c(0.0)], [c(0.0), c(0.0)]];
        let one = array![[c(0.0), c(0.0)], [c(0.0), c(1.0)]];

        // |0><0| ⊗ |1><1| = |01><01|, basis index 1
        let product = kronecker_product(&zero, &one);
        assert_eq!(product.dim(), (4, 4));
        assert_relative_eq!(product[[1, 1]].re, 1.0);
        assert_relative_eq!(trace(&product).re, 1.0);
    }

    #[test]
    fn reduce_recovers_product_factors() {
        let zero = array![[c(1.0), c(0.0)], [c(0.0), c(0.0)]];
        let one = array![[c(0.0), c(0.0)], [c(0.0), c(1.0)]];
        let product = kronecker_product(&zero, &one);

        let low = reduce_to_qubit(&product, 2, 0);
        let high = reduce_to_qubit(&product, 2, 1);
        assert_relative_eq!(low[[1, 1]].re, 1.0);
        assert_relative_eq!(high[[0, 0]].re, 1.0);
    }

    #[test]
    fn reducing_to_a_pair_reorders_the_kept_qubits() {
        let zero = array![[c(1.0), c(0.0)], [c(0.0), c(0.0)]];
        let one = array![[c(0.0), c(0.0)], [c(0.0), c(1.0)]];
        // qubit 2 = |1>, qubit 1 = |0>, qubit 0 = |1>
        let product = kronecker_product(&kronecker_product(&one, &zero), &one);

        // keep qubit 2 as the low bit and qubit 1 as the high bit: |01>
        let pair = reduce_to_qubits(&product, 3, &[2, 1]);
        assert_eq!(pair.dim(), (4, 4));
        assert_relative_eq!(pair[[1, 1]].re, 1.0);
        assert_relative_eq!(trace(&pair).re, 1.0);
    }

    #[test]
    fn expanded_operator_acts_only_on_target() {
        let x = array![[c(0.0), c(1.0)], [c(1.0), c(0.0)]];
        let full = expand_operator(2, &x, &[1], &[]);
        // X on qubit 1 maps |00> (index 0) to |10> (index 2)
        assert_relative_eq!(full[[2, 0]].re, 1.0);
        assert_relative_eq!(full[[0, 0]].re, 0.0);
    }

    #[test]
    fn duplicates_are_reported() {
        assert_eq!(find_duplicate(&[0, 1, 0]), Some(0));
        assert_eq!(find_duplicate(&[0, 1, 2]), None);
    }
}
