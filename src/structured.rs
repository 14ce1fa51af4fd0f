//! Low displacement rank operators built on the Krylov engines.

use p3_matrix::{Matrix, dense::RowMajorMatrix};
use tracing::instrument;

use crate::{
    dense::krylov_matrix,
    errors::KrylovError,
    krylov::{KrylovCache, KrylovEngine},
    spectral::Real,
};

/// The `n × n` operator `M = Σ_r K(A, g_r) K(B, h_r)ᵀ`.
///
/// `A` and `B` are subdiagonal operators and `G`, `H` are `(rank, n)`
/// generator matrices. The forward caches of `(A, G)` and `(B, H)` are
/// built when the parameters are set and reused by every application.
#[derive(Debug, Clone)]
pub struct SubdiagonalOperator<T: Real> {
    engine: KrylovEngine<T>,
    subd_a: Vec<T>,
    subd_b: Vec<T>,
    g: RowMajorMatrix<T>,
    h: RowMajorMatrix<T>,
    cache_a: KrylovCache<T>,
    cache_b: KrylovCache<T>,
}

fn check_generator_pair<T>(g: &RowMajorMatrix<T>, h: &RowMajorMatrix<T>) -> Result<(), KrylovError>
where
    T: Clone + Send + Sync,
{
    if g.width() != h.width() {
        return Err(KrylovError::ShapeMismatch {
            what: "second generator length",
            expected: g.width(),
            actual: h.width(),
        });
    }
    if g.height() != h.height() {
        return Err(KrylovError::RankOrBatchMismatch {
            what: "second generator rank",
            expected: g.height(),
            actual: h.height(),
        });
    }
    Ok(())
}

impl<T: Real> SubdiagonalOperator<T> {
    /// Creates the operator on the default engine.
    pub fn new(
        subd_a: Vec<T>,
        subd_b: Vec<T>,
        g: RowMajorMatrix<T>,
        h: RowMajorMatrix<T>,
    ) -> Result<Self, KrylovError> {
        Self::with_engine(KrylovEngine::default(), subd_a, subd_b, g, h)
    }

    pub fn with_engine(
        engine: KrylovEngine<T>,
        subd_a: Vec<T>,
        subd_b: Vec<T>,
        g: RowMajorMatrix<T>,
        h: RowMajorMatrix<T>,
    ) -> Result<Self, KrylovError> {
        check_generator_pair(&g, &h)?;
        let cache_a = engine.build_cache(&subd_a, &g)?;
        let cache_b = engine.build_cache(&subd_b, &h)?;
        Ok(Self {
            engine,
            subd_a,
            subd_b,
            g,
            h,
            cache_a,
            cache_b,
        })
    }

    #[must_use]
    pub fn n(&self) -> usize {
        self.g.width()
    }

    #[must_use]
    pub fn rank(&self) -> usize {
        self.g.height()
    }

    /// Computes `M x_b` for every row of `x`.
    #[instrument(skip_all, fields(n = self.n(), batch = x.height()))]
    pub fn apply(&self, x: &RowMajorMatrix<T>) -> Result<RowMajorMatrix<T>, KrylovError> {
        let projected = self.engine.transpose_multiply(&self.subd_b, &self.h, x)?;
        self.engine.multiply(&self.cache_a, &self.g, &projected)
    }

    /// Computes `Mᵀ y_b` for every row of `y`.
    ///
    /// This is also the gradient of [`apply`](Self::apply) with respect to `x`.
    #[instrument(skip_all, fields(n = self.n(), batch = y.height()))]
    pub fn apply_transpose(&self, y: &RowMajorMatrix<T>) -> Result<RowMajorMatrix<T>, KrylovError> {
        let projected = self.engine.transpose_multiply(&self.subd_a, &self.g, y)?;
        self.engine.multiply(&self.cache_b, &self.h, &projected)
    }

    /// Replaces both generator matrices and rebuilds the caches.
    ///
    /// On error the operator is left unchanged.
    pub fn set_generators(
        &mut self,
        g: RowMajorMatrix<T>,
        h: RowMajorMatrix<T>,
    ) -> Result<(), KrylovError> {
        check_generator_pair(&g, &h)?;
        let cache_a = self.engine.build_cache(&self.subd_a, &g)?;
        let cache_b = self.engine.build_cache(&self.subd_b, &h)?;
        (self.g, self.h, self.cache_a, self.cache_b) = (g, h, cache_a, cache_b);
        Ok(())
    }

    /// Replaces both subdiagonals and rebuilds the caches.
    ///
    /// On error the operator is left unchanged.
    pub fn set_subdiagonals(&mut self, subd_a: Vec<T>, subd_b: Vec<T>) -> Result<(), KrylovError> {
        let cache_a = self.engine.build_cache(&subd_a, &self.g)?;
        let cache_b = self.engine.build_cache(&subd_b, &self.h)?;
        (self.subd_a, self.subd_b, self.cache_a, self.cache_b) = (subd_a, subd_b, cache_a, cache_b);
        Ok(())
    }

    /// Materializes `M` as an `n × n` matrix. Quadratic; for tests and small sizes.
    #[must_use]
    pub fn to_dense(&self) -> RowMajorMatrix<T> {
        let n = self.n();
        let mut values = vec![T::zero(); n * n];
        for (g, h) in self.g.row_slices().zip(self.h.row_slices()) {
            let ka = krylov_matrix(&self.subd_a, g);
            let kb = krylov_matrix(&self.subd_b, h);
            for (i, row) in values.chunks_exact_mut(n).enumerate() {
                let a_row = &ka.values[i * n..(i + 1) * n];
                for (j, m) in row.iter_mut().enumerate() {
                    let b_row = &kb.values[j * n..(j + 1) * n];
                    *m += a_row
                        .iter()
                        .zip(b_row)
                        .fold(T::zero(), |acc, (&a, &b)| acc + a * b);
                }
            }
        }
        RowMajorMatrix::new(values, n)
    }
}

#[cfg(test)]
mod tests {
    use rand::{Rng, SeedableRng, rngs::StdRng};

    use super::*;

    fn random_matrix(rng: &mut StdRng, height: usize, width: usize) -> RowMajorMatrix<f64> {
        RowMajorMatrix::new(
            (0..height * width)
                .map(|_| rng.random_range(-1.0..1.0))
                .collect(),
            width,
        )
    }

    fn random_operator(rng: &mut StdRng, n: usize, rank: usize) -> SubdiagonalOperator<f64> {
        let subd_a = (0..n - 1).map(|_| rng.random_range(-1.0..1.0)).collect();
        let subd_b = (0..n - 1).map(|_| rng.random_range(-1.0..1.0)).collect();
        let g = random_matrix(rng, rank, n);
        let h = random_matrix(rng, rank, n);
        SubdiagonalOperator::new(subd_a, subd_b, g, h).unwrap()
    }

    /// `y[b] = M x[b]` with an explicit matrix.
    fn dense_apply(m: &RowMajorMatrix<f64>, x: &RowMajorMatrix<f64>, transpose: bool) -> Vec<f64> {
        let n = m.width;
        let mut out = vec![0.0; x.values.len()];
        for (y, x) in out.chunks_exact_mut(n).zip(x.values.chunks_exact(n)) {
            for (i, y) in y.iter_mut().enumerate() {
                *y = (0..n)
                    .map(|j| {
                        let entry = if transpose {
                            m.values[j * n + i]
                        } else {
                            m.values[i * n + j]
                        };
                        entry * x[j]
                    })
                    .sum();
            }
        }
        out
    }

    fn assert_close(a: &[f64], b: &[f64]) {
        assert_eq!(a.len(), b.len());
        for (x, y) in a.iter().zip(b) {
            assert!((x - y).abs() < 1e-9, "{x} != {y}");
        }
    }

    #[test]
    fn test_apply_matches_dense() {
        let mut rng = StdRng::seed_from_u64(1);
        let op = random_operator(&mut rng, 16, 2);
        let x = random_matrix(&mut rng, 3, 16);

        let fast = op.apply(&x).unwrap();
        assert_close(&fast.values, &dense_apply(&op.to_dense(), &x, false));
    }

    #[test]
    fn test_apply_transpose_matches_dense() {
        let mut rng = StdRng::seed_from_u64(2);
        let op = random_operator(&mut rng, 8, 3);
        let y = random_matrix(&mut rng, 2, 8);

        let fast = op.apply_transpose(&y).unwrap();
        assert_close(&fast.values, &dense_apply(&op.to_dense(), &y, true));
    }

    #[test]
    fn test_identity_like_operator() {
        // A = B = unit down-shift, g = h = e_0: K(A, e_0) = I, so M = I.
        let e0 = RowMajorMatrix::new(vec![1.0, 0.0, 0.0, 0.0], 4);
        let op =
            SubdiagonalOperator::new(vec![1.0; 3], vec![1.0; 3], e0.clone(), e0).unwrap();
        let x = RowMajorMatrix::new(vec![3.0, -1.0, 2.0, 0.5], 4);
        assert_close(&op.apply(&x).unwrap().values, &x.values);
    }

    #[test]
    fn test_set_generators_rebuilds_caches() {
        let mut rng = StdRng::seed_from_u64(3);
        let mut op = random_operator(&mut rng, 8, 2);
        let x = random_matrix(&mut rng, 1, 8);

        let g = random_matrix(&mut rng, 1, 8);
        let h = random_matrix(&mut rng, 1, 8);
        op.set_generators(g, h).unwrap();
        assert_eq!(op.rank(), 1);
        assert_close(&op.apply(&x).unwrap().values, &dense_apply(&op.to_dense(), &x, false));
    }

    #[test]
    fn test_set_subdiagonals_rebuilds_caches() {
        let mut rng = StdRng::seed_from_u64(4);
        let mut op = random_operator(&mut rng, 8, 2);
        let x = random_matrix(&mut rng, 2, 8);

        op.set_subdiagonals(vec![0.5; 7], vec![-2.0; 7]).unwrap();
        assert_close(&op.apply(&x).unwrap().values, &dense_apply(&op.to_dense(), &x, false));
    }

    #[test]
    fn test_mismatched_generators_are_rejected() {
        let mut rng = StdRng::seed_from_u64(5);
        let g = random_matrix(&mut rng, 2, 8);
        let h = random_matrix(&mut rng, 3, 8);
        let error = SubdiagonalOperator::new(vec![1.0; 7], vec![1.0; 7], g, h).unwrap_err();
        assert_eq!(
            error,
            KrylovError::RankOrBatchMismatch {
                what: "second generator rank",
                expected: 2,
                actual: 3,
            }
        );

        let mut op = random_operator(&mut rng, 8, 2);
        let before = op.to_dense();
        let error = op.set_subdiagonals(vec![1.0; 6], vec![1.0; 7]).unwrap_err();
        assert!(matches!(error, KrylovError::ShapeMismatch { .. }));
        assert_eq!(op.to_dense().values, before.values);
    }
}
