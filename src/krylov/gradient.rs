use tracing::debug;

use super::{
    KrylovCache, Shape,
    blocks::{DataBlocks, Level, Scratch},
};
use crate::spectral::{Real, SpectralBackend};

/// Vector-Jacobian product of the multiply engine with respect to its coefficients.
///
/// The multiply engine is linear in the coefficients, so its VJP is the
/// transpose map applied to `grad_out`. It is computed with the data side of
/// the quad-block recursion alone, finest level first, reading the
/// generator-side factors from the cache instead of recomputing them.
/// Returns the `(batch, rank, n)` values.
pub(super) fn multiply_gradient<T, S>(
    backend: &S,
    cache: &KrylovCache<T>,
    generators: &[T],
    grad_out: &[T],
    batch: usize,
) -> Vec<T>
where
    T: Real,
    S: SpectralBackend<T> + ?Sized,
{
    let Shape { n, log_n, rank, .. } = Shape::of_cache(cache, batch);
    let mut blocks = DataBlocks::new(generators, grad_out, rank, batch, n);
    let mut scratch = Scratch::new(backend, batch * (rank + 1), n, log_n);

    for (d, level) in Level::finest_to_coarsest(log_n) {
        let spectra = &cache.levels[d];
        blocks.merge(
            &level,
            &cache.subdiag,
            backend,
            &mut scratch,
            &spectra.generator,
            &spectra.boundary,
        );
        debug!(level = d, block_len = level.fft_len(), "merged gradient blocks");
    }

    blocks.into_output()
}
