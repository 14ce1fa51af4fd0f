use tracing::debug;

use super::{
    KrylovCache,
    blocks::{AdjointBlocks, Level, Scratch},
};
use crate::spectral::{Real, SpectralBackend};

/// Computes `Σ_r Krylov(A, v_r) w_{b,r}` for every batch element.
///
/// This is the transpose of the transpose-multiply map: the cotangents walk the
/// levels coarsest first, correlating against the cached factors instead of
/// convolving with them, and are finally contracted against the generators.
/// Returns the `(batch, n)` values.
pub(super) fn multiply<T, S>(
    backend: &S,
    cache: &KrylovCache<T>,
    generators: &[T],
    coefficients: &[T],
    batch: usize,
) -> Vec<T>
where
    T: Real,
    S: SpectralBackend<T> + ?Sized,
{
    let (n, rank) = (cache.n, cache.rank);
    let mut blocks = AdjointBlocks::new(coefficients, rank, batch, n);
    let mut scratch = Scratch::new(backend, batch * (rank + 1), n, cache.log_n);

    for (d, level) in Level::coarsest_to_finest(cache.log_n) {
        let spectra = &cache.levels[d];
        blocks.split(
            &level,
            &cache.subdiag,
            backend,
            &mut scratch,
            &spectra.generator,
            &spectra.boundary,
        );
        debug!(level = d, block_len = level.fft_len(), "split adjoint blocks");
    }

    blocks.finish(generators)
}
