use rustfft::{num_complex::Complex, num_traits::Zero};
use tracing::debug;

use super::{
    Shape,
    blocks::{DataBlocks, GeneratorBlocks, Level, Scratch},
};
use crate::spectral::{Real, SpectralBackend};

/// Computes `Krylov(A, v_r)ᵀ u_b` for every generator and batch vector.
///
/// Both sides of the quad-block state advance together, finest level first.
/// The generator-side spectra of a level are consumed by the data side right
/// away and never retained. Returns the `(batch, rank, n)` values.
pub(super) fn transpose_multiply<T, S>(
    backend: &S,
    subdiag: &[T],
    generators: &[T],
    u: &[T],
    shape: Shape,
) -> Vec<T>
where
    T: Real,
    S: SpectralBackend<T> + ?Sized,
{
    let Shape {
        n,
        log_n,
        rank,
        batch,
    } = shape;

    let mut generator_blocks = GeneratorBlocks::new(generators, rank, n);
    let mut data_blocks = DataBlocks::new(generators, u, rank, batch, n);
    let mut scratch = Scratch::new(backend, (rank + 2).max(batch * (rank + 1)), n, log_n);
    let mut generator_spectra = vec![Complex::zero(); rank * n];
    let mut boundary_spectra = vec![Complex::zero(); n];

    for (d, level) in Level::finest_to_coarsest(log_n) {
        let generator_spectra = &mut generator_spectra[..level.spectra_len(rank)];
        let boundary_spectra = &mut boundary_spectra[..level.spectra_len(1)];
        generator_blocks.merge(
            &level,
            subdiag,
            backend,
            &mut scratch,
            generator_spectra,
            boundary_spectra,
        );
        data_blocks.merge(
            &level,
            subdiag,
            backend,
            &mut scratch,
            generator_spectra,
            boundary_spectra,
        );
        debug!(level = d, block_len = level.fft_len(), "merged quad blocks");
    }

    data_blocks.into_output()
}
