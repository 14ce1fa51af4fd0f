//! Explicit dense counterparts of the Krylov engines.
//!
//! Everything here materializes the `n × n` Krylov matrices and costs
//! `O(n²)` per generator. It is the oracle the fast engines are checked
//! against and is only meant for small sizes.

use p3_matrix::{Matrix, dense::RowMajorMatrix};

use crate::{
    errors::KrylovError,
    krylov::{KrylovTensor, check_count, check_subdiag, check_width, log_size},
    spectral::Real,
};

/// Applies the subdiagonal operator: `y[0] = 0`, `y[i] = subdiag[i - 1] * x[i - 1]`.
#[must_use]
pub fn shift_subdiag<T: Real>(subdiag: &[T], x: &[T]) -> Vec<T> {
    debug_assert_eq!(subdiag.len() + 1, x.len());
    let mut y = Vec::with_capacity(x.len());
    if !x.is_empty() {
        y.push(T::zero());
        y.extend(subdiag.iter().zip(x).map(|(&s, &x)| s * x));
    }
    y
}

/// Builds `K(A, v)`: entry `(i, k)` is `(A^k v)[i]`.
#[must_use]
pub fn krylov_matrix<T: Real>(subdiag: &[T], v: &[T]) -> RowMajorMatrix<T> {
    let n = v.len();
    let mut values = vec![T::zero(); n * n];
    let mut column = v.to_vec();
    for k in 0..n {
        for (i, &x) in column.iter().enumerate() {
            values[i * n + k] = x;
        }
        column = shift_subdiag(subdiag, &column);
    }
    RowMajorMatrix::new(values, n.max(1))
}

/// Dense `K(A, v_r)ᵀ u_b` for every generator and batch vector.
pub fn transpose_multiply_dense<T: Real>(
    subdiag: &[T],
    generators: &RowMajorMatrix<T>,
    u: &RowMajorMatrix<T>,
) -> Result<KrylovTensor<T>, KrylovError> {
    let n = generators.width();
    log_size(n)?;
    check_width("batch vector length", u.width(), n)?;
    check_subdiag(subdiag, n)?;

    let krylov: Vec<_> = generators
        .row_slices()
        .map(|v| krylov_matrix(subdiag, v))
        .collect();
    let rows: Vec<&[T]> = u.row_slices().collect();

    Ok(KrylovTensor::from_fn(u.height(), krylov.len(), n, |b, r, k| {
        (0..n).fold(T::zero(), |acc, i| acc + krylov[r].values[i * n + k] * rows[b][i])
    }))
}

/// Dense `Σ_r K(A, v_r) w_{b,r}` for every batch element.
pub fn multiply_dense<T: Real>(
    subdiag: &[T],
    generators: &RowMajorMatrix<T>,
    w: &KrylovTensor<T>,
) -> Result<RowMajorMatrix<T>, KrylovError> {
    let n = generators.width();
    log_size(n)?;
    check_subdiag(subdiag, n)?;
    check_width("coefficient length", w.n(), n)?;
    check_count("coefficient rank", w.rank(), generators.height())?;

    let mut out = vec![T::zero(); w.batch() * n];
    for (r, v) in generators.row_slices().enumerate() {
        let krylov = krylov_matrix(subdiag, v);
        for (b, row) in out.chunks_exact_mut(n).enumerate() {
            let coefficients = w.lane(b, r);
            for (i, o) in row.iter_mut().enumerate() {
                let krylov_row = &krylov.values[i * n..(i + 1) * n];
                *o += krylov_row
                    .iter()
                    .zip(coefficients)
                    .fold(T::zero(), |acc, (&k, &c)| acc + k * c);
            }
        }
    }
    Ok(RowMajorMatrix::new(out, n))
}
