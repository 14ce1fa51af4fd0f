use rustfft::{num_complex::Complex, num_traits::Zero};
use tracing::debug;

use super::blocks::{GeneratorBlocks, Level, Scratch};
use crate::spectral::{Real, SpectralBackend};

/// Spectral factors saved by one level of the forward recursion.
#[derive(Debug, Clone, PartialEq)]
pub struct LevelSpectra<T> {
    /// Spectra of the zero-padded even generator half-blocks, `rank × n1 × (n2 + 1)`.
    pub(crate) generator: Vec<Complex<T>>,
    /// Spectra of the zero-padded even boundary half-blocks, `n1 × (n2 + 1)`.
    pub(crate) boundary: Vec<Complex<T>>,
}

impl<T> LevelSpectra<T> {
    #[must_use]
    pub fn generator(&self) -> &[Complex<T>] {
        &self.generator
    }

    #[must_use]
    pub fn boundary(&self) -> &[Complex<T>] {
        &self.boundary
    }
}

/// Save-for-backward cache of the Krylov recursion.
///
/// Holds, for each level `d`, the generator-side spectral factors that the
/// multiply and gradient engines consume, together with the subdiagonal they
/// were computed from. It is immutable once built and can be shared between
/// threads; it has to be rebuilt whenever the generators or the subdiagonal
/// change.
#[derive(Debug, Clone, PartialEq)]
pub struct KrylovCache<T> {
    pub(crate) n: usize,
    pub(crate) log_n: usize,
    pub(crate) rank: usize,
    pub(crate) subdiag: Vec<T>,
    /// Indexed by level `d`.
    pub(crate) levels: Vec<LevelSpectra<T>>,
}

impl<T> KrylovCache<T> {
    #[must_use]
    pub const fn n(&self) -> usize {
        self.n
    }

    #[must_use]
    pub const fn rank(&self) -> usize {
        self.rank
    }

    #[must_use]
    pub fn subdiag(&self) -> &[T] {
        &self.subdiag
    }

    /// Number of recursion levels, `log2(n)`.
    #[must_use]
    pub const fn num_levels(&self) -> usize {
        self.levels.len()
    }

    #[must_use]
    pub fn level(&self, d: usize) -> &LevelSpectra<T> {
        &self.levels[d]
    }
}

/// Runs the forward-side recursion without any data and keeps every level's factors.
pub(super) fn build_cache<T, S>(
    backend: &S,
    subdiag: &[T],
    generators: &[T],
    rank: usize,
    n: usize,
    log_n: usize,
) -> KrylovCache<T>
where
    T: Real,
    S: SpectralBackend<T> + ?Sized,
{
    let mut blocks = GeneratorBlocks::new(generators, rank, n);
    let mut scratch = Scratch::new(backend, rank + 2, n, log_n);

    let mut levels: Vec<_> = Level::finest_to_coarsest(log_n)
        .map(|(d, level)| {
            let mut spectra = LevelSpectra {
                generator: vec![Complex::zero(); level.spectra_len(rank)],
                boundary: vec![Complex::zero(); level.spectra_len(1)],
            };
            blocks.merge(
                &level,
                subdiag,
                backend,
                &mut scratch,
                &mut spectra.generator,
                &mut spectra.boundary,
            );
            debug!(level = d, block_len = level.fft_len(), "cached level spectra");
            spectra
        })
        .collect();
    // Collected finest first.
    levels.reverse();

    KrylovCache {
        n,
        log_n,
        rank,
        subdiag: subdiag.to_vec(),
        levels,
    }
}
