//! Fast multiplication by Krylov matrices of a subdiagonal operator.
//!
//! Let `A` be the `n × n` operator that is zero except on its subdiagonal,
//! `(A x)[0] = 0` and `(A x)[i] = subdiag[i - 1] * x[i - 1]`. A generator `v`
//! defines the Krylov matrix `K(A, v) = [v, A v, A² v, ..., A^(n-1) v]`.
//!
//! The engines never materialize `K(A, v)`. The recursion splits the index
//! range at dyadic boundaries: at each of the `m = log2(n)` levels, pairs of
//! neighbouring blocks are merged by multiplying their partial polynomials
//! with the spectral primitive, so that every product costs `O(n log n)`
//! time and `O(n)` memory per generator.
//!
//! - [`KrylovEngine::transpose_multiply`] computes `K(A, v_r)ᵀ u_b`.
//! - [`KrylovEngine::build_cache`] runs the generator side of the recursion once
//!   and keeps the spectral factors of every level.
//! - [`KrylovEngine::multiply`] computes `Σ_r K(A, v_r) w_{b,r}` from a cache.
//! - [`KrylovEngine::multiply_gradient`] is the vector-Jacobian product of
//!   `multiply` with respect to `w`, also computed from the cache.

use std::sync::Arc;

use p3_matrix::{Matrix, dense::RowMajorMatrix};
use p3_util::log2_strict_usize;
use tracing::{instrument, warn};

use crate::{
    errors::KrylovError,
    parameters::{BackendKind, KrylovConfig},
    spectral::{NaiveDft, Real, RustFftBackend, SpectralBackend},
};

mod blocks;
mod cache;
mod gradient;
mod multiply;
mod tensor;
mod transpose;


pub use cache::{KrylovCache, LevelSpectra};
pub use tensor::KrylovTensor;

/// Dimensions of one call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct Shape {
    pub(crate) n: usize,
    pub(crate) log_n: usize,
    pub(crate) rank: usize,
    pub(crate) batch: usize,
}

impl Shape {
    pub(crate) const fn of_cache<T>(cache: &KrylovCache<T>, batch: usize) -> Self {
        Self {
            n: cache.n,
            log_n: cache.log_n,
            rank: cache.rank,
            batch,
        }
    }
}

/// Returns `log2(n)`, rejecting sizes that are not a power of two.
pub(crate) fn log_size(n: usize) -> Result<usize, KrylovError> {
    if n.is_power_of_two() {
        Ok(log2_strict_usize(n))
    } else {
        Err(KrylovError::NonPowerOfTwoSize { n })
    }
}

pub(crate) fn check_subdiag<T>(subdiag: &[T], n: usize) -> Result<(), KrylovError> {
    if subdiag.len() + 1 == n {
        Ok(())
    } else {
        Err(KrylovError::ShapeMismatch {
            what: "subdiagonal length",
            expected: n - 1,
            actual: subdiag.len(),
        })
    }
}

pub(crate) fn check_width(
    what: &'static str,
    actual: usize,
    n: usize,
) -> Result<(), KrylovError> {
    if actual == n {
        Ok(())
    } else {
        Err(KrylovError::ShapeMismatch {
            what,
            expected: n,
            actual,
        })
    }
}

pub(crate) fn check_count(
    what: &'static str,
    actual: usize,
    expected: usize,
) -> Result<(), KrylovError> {
    if actual == expected {
        Ok(())
    } else {
        Err(KrylovError::RankOrBatchMismatch {
            what,
            expected,
            actual,
        })
    }
}

fn check_finite<T: Real>(argument: &'static str, values: &[T]) -> Result<(), KrylovError> {
    values
        .iter()
        .position(|x| !x.is_finite())
        .map_or(Ok(()), |index| {
            Err(KrylovError::NumericOverflow { argument, index })
        })
}

/// Runs the Krylov recursions on a configured spectral backend.
///
/// Cloning an engine is cheap; the backend is shared.
#[derive(Debug, Clone)]
pub struct KrylovEngine<T: Real> {
    backend: Arc<dyn SpectralBackend<T>>,
    config: KrylovConfig,
}

impl<T: Real> Default for KrylovEngine<T> {
    fn default() -> Self {
        Self::new(KrylovConfig::default())
    }
}

impl<T: Real> KrylovEngine<T> {
    /// Creates an engine with the backend selected by `config`.
    #[must_use]
    pub fn new(config: KrylovConfig) -> Self {
        let backend: Arc<dyn SpectralBackend<T>> = match config.backend {
            BackendKind::RustFft => RustFftBackend::<T>::new_from_cache(),
            BackendKind::Naive => Arc::new(NaiveDft),
        };
        Self { backend, config }
    }

    /// Creates an engine on a caller-supplied backend.
    ///
    /// `config.backend` is kept for reporting only.
    #[must_use]
    pub fn with_backend(backend: Arc<dyn SpectralBackend<T>>, config: KrylovConfig) -> Self {
        Self { backend, config }
    }

    #[must_use]
    pub const fn config(&self) -> &KrylovConfig {
        &self.config
    }

    #[must_use]
    pub fn backend(&self) -> &dyn SpectralBackend<T> {
        self.backend.as_ref()
    }

    fn check_finite(&self, argument: &'static str, values: &[T]) -> Result<(), KrylovError> {
        if self.config.check_finite {
            check_finite(argument, values)
        } else {
            Ok(())
        }
    }

    /// Validates a cache against the generators it is used with.
    fn check_cache(
        &self,
        cache: &KrylovCache<T>,
        generators: &RowMajorMatrix<T>,
    ) -> Result<(), KrylovError> {
        check_width("generator length", generators.width(), cache.n)?;
        check_count("generator rank", generators.height(), cache.rank)?;
        self.check_finite("generators", &generators.values)
    }

    /// Multiplies a batch by the transposes of the Krylov matrices.
    ///
    /// `generators` is `(rank, n)` and `u` is `(batch, n)`; entry `[b, r, :]` of
    /// the result is `K(A, v_r)ᵀ u_b`.
    #[instrument(skip_all, fields(n = generators.width(), rank = generators.height(), batch = u.height()))]
    pub fn transpose_multiply(
        &self,
        subdiag: &[T],
        generators: &RowMajorMatrix<T>,
        u: &RowMajorMatrix<T>,
    ) -> Result<KrylovTensor<T>, KrylovError> {
        let n = generators.width();
        let log_n = log_size(n)?;
        check_width("batch vector length", u.width(), n)?;
        check_subdiag(subdiag, n)?;
        self.check_finite("subdiagonal", subdiag)?;
        self.check_finite("generators", &generators.values)?;
        self.check_finite("batch vectors", &u.values)?;

        let shape = Shape {
            n,
            log_n,
            rank: generators.height(),
            batch: u.height(),
        };
        if shape.rank == 0 || shape.batch == 0 {
            warn!(rank = shape.rank, batch = shape.batch, "empty transpose multiply");
            return Ok(KrylovTensor::zeros(shape.batch, shape.rank, n));
        }

        let values = transpose::transpose_multiply(
            self.backend(),
            subdiag,
            &generators.values,
            &u.values,
            shape,
        );
        Ok(KrylovTensor::new(values, shape.batch, shape.rank, n))
    }

    /// Runs the generator side of the recursion and keeps its spectral factors.
    #[instrument(skip_all, fields(n = generators.width(), rank = generators.height()))]
    pub fn build_cache(
        &self,
        subdiag: &[T],
        generators: &RowMajorMatrix<T>,
    ) -> Result<KrylovCache<T>, KrylovError> {
        let n = generators.width();
        let log_n = log_size(n)?;
        check_subdiag(subdiag, n)?;
        self.check_finite("subdiagonal", subdiag)?;
        self.check_finite("generators", &generators.values)?;

        Ok(cache::build_cache(
            self.backend(),
            subdiag,
            &generators.values,
            generators.height(),
            n,
            log_n,
        ))
    }

    /// Computes `Σ_r K(A, v_r) w_{b,r}` for every batch element of `w`.
    ///
    /// `cache` must have been built from the same subdiagonal and `generators`.
    /// The result is `(batch, n)`.
    #[instrument(skip_all, fields(n = cache.n(), rank = cache.rank(), batch = w.batch()))]
    pub fn multiply(
        &self,
        cache: &KrylovCache<T>,
        generators: &RowMajorMatrix<T>,
        w: &KrylovTensor<T>,
    ) -> Result<RowMajorMatrix<T>, KrylovError> {
        self.check_cache(cache, generators)?;
        check_width("coefficient length", w.n(), cache.n)?;
        check_count("coefficient rank", w.rank(), cache.rank)?;
        self.check_finite("coefficients", w)?;

        let (n, batch) = (cache.n, w.batch());
        if cache.rank == 0 || batch == 0 {
            warn!(rank = cache.rank, batch, "empty multiply");
            return Ok(RowMajorMatrix::new(vec![T::zero(); batch * n], n));
        }

        let values = multiply::multiply(self.backend(), cache, &generators.values, w, batch);
        Ok(RowMajorMatrix::new(values, n))
    }

    /// Builds the cache and multiplies in one call.
    pub fn multiply_direct(
        &self,
        subdiag: &[T],
        generators: &RowMajorMatrix<T>,
        w: &KrylovTensor<T>,
    ) -> Result<RowMajorMatrix<T>, KrylovError> {
        let cache = self.build_cache(subdiag, generators)?;
        self.multiply(&cache, generators, w)
    }

    /// Gradient of [`multiply`](Self::multiply) with respect to its coefficients.
    ///
    /// `grad_out` is the `(batch, n)` cotangent of the multiply output; the
    /// result is the `(batch, rank, n)` cotangent of `w`.
    #[instrument(skip_all, fields(n = cache.n(), rank = cache.rank(), batch = grad_out.height()))]
    pub fn multiply_gradient(
        &self,
        cache: &KrylovCache<T>,
        generators: &RowMajorMatrix<T>,
        grad_out: &RowMajorMatrix<T>,
    ) -> Result<KrylovTensor<T>, KrylovError> {
        self.check_cache(cache, generators)?;
        check_width("output gradient length", grad_out.width(), cache.n)?;
        self.check_finite("output gradient", &grad_out.values)?;

        let (n, rank, batch) = (cache.n, cache.rank, grad_out.height());
        if rank == 0 || batch == 0 {
            warn!(rank, batch, "empty multiply gradient");
            return Ok(KrylovTensor::zeros(batch, rank, n));
        }

        let values = gradient::multiply_gradient(
            self.backend(),
            cache,
            &generators.values,
            &grad_out.values,
            batch,
        );
        Ok(KrylovTensor::new(values, batch, rank, n))
    }
}

/// [`KrylovEngine::transpose_multiply`] on the default engine.
pub fn transpose_multiply<T: Real>(
    subdiag: &[T],
    generators: &RowMajorMatrix<T>,
    u: &RowMajorMatrix<T>,
) -> Result<KrylovTensor<T>, KrylovError> {
    KrylovEngine::default().transpose_multiply(subdiag, generators, u)
}

/// [`KrylovEngine::build_cache`] on the default engine.
pub fn build_cache<T: Real>(
    subdiag: &[T],
    generators: &RowMajorMatrix<T>,
) -> Result<KrylovCache<T>, KrylovError> {
    KrylovEngine::default().build_cache(subdiag, generators)
}

/// [`KrylovEngine::multiply`] on the default engine.
pub fn multiply<T: Real>(
    cache: &KrylovCache<T>,
    generators: &RowMajorMatrix<T>,
    w: &KrylovTensor<T>,
) -> Result<RowMajorMatrix<T>, KrylovError> {
    KrylovEngine::default().multiply(cache, generators, w)
}

/// [`KrylovEngine::multiply_gradient`] on the default engine.
pub fn multiply_gradient<T: Real>(
    cache: &KrylovCache<T>,
    generators: &RowMajorMatrix<T>,
    grad_out: &RowMajorMatrix<T>,
) -> Result<KrylovTensor<T>, KrylovError> {
    KrylovEngine::default().multiply_gradient(cache, generators, grad_out)
}

/// [`KrylovEngine::multiply_direct`] on the default engine.
pub fn multiply_direct<T: Real>(
    subdiag: &[T],
    generators: &RowMajorMatrix<T>,
    w: &KrylovTensor<T>,
) -> Result<RowMajorMatrix<T>, KrylovError> {
    KrylovEngine::default().multiply_direct(subdiag, generators, w)
}
