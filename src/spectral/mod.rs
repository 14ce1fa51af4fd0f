//! Spectral multiply primitive.
//!
//! Polynomial products are realized as linear convolutions: both operands are
//! zero-padded to a transform length at least as large as the product's
//! length, transformed with a real-to-complex DFT, multiplied pointwise, and
//! transformed back. Zero-padding is what keeps the convolution from wrapping
//! around.
//!
//! The transform itself lives behind [`SpectralBackend`] so the recursive
//! Krylov engines never depend on which implementation runs it.

use std::fmt::Debug;

use itertools::izip;
use rustfft::{
    FftNum,
    num_complex::Complex,
    num_traits::{Float, NumAssign, Zero},
};

mod fft;
mod naive;

pub use fft::RustFftBackend;
pub use naive::NaiveDft;

/// Real scalar supported by the engines (`f32` and `f64`).
pub trait Real: FftNum + Float + NumAssign {}

impl<T: FftNum + Float + NumAssign> Real for T {}

/// Converts a size into the scalar type, rounding to the nearest float.
///
/// # Panics
/// Panics if `T` cannot represent `x` at all. `f32` and `f64` cover the
/// whole `usize` range, so this never happens for the supported scalars.
#[inline]
pub(crate) fn from_usize<T: Real>(x: usize) -> T {
    T::from_usize(x).expect("every usize is representable by a float")
}

/// Converts an `f64` constant into the scalar type.
///
/// # Panics
/// Same conditions as [`from_usize`]; out-of-range values saturate to
/// infinity for `f32` instead of failing.
#[inline]
pub(crate) fn from_f64<T: Real>(x: f64) -> T {
    T::from_f64(x).expect("every f64 is representable by a float")
}

/// Number of non-redundant bins of a real transform of length `len`.
#[must_use]
pub const fn num_bins(len: usize) -> usize {
    len / 2 + 1
}

/// Complex working memory of a backend, owned by the caller.
///
/// `buffer` holds one full complex lane per transformed lane and `scratch`
/// the per-lane scratch the transform asks for. Both only ever grow, so a
/// workspace sized with [`with_capacity`](Self::with_capacity) for the widest
/// level is reused by every level without reallocating.
#[derive(Debug, Default)]
pub struct SpectralWorkspace<T> {
    buffer: Vec<Complex<T>>,
    scratch: Vec<Complex<T>>,
}

impl<T: Real> SpectralWorkspace<T> {
    #[must_use]
    pub fn new() -> Self {
        Self {
            buffer: Vec::new(),
            scratch: Vec::new(),
        }
    }

    /// Preallocates `buffer_len` lane entries and `scratch_len` scratch entries.
    #[must_use]
    pub fn with_capacity(buffer_len: usize, scratch_len: usize) -> Self {
        Self {
            buffer: Vec::with_capacity(buffer_len),
            scratch: Vec::with_capacity(scratch_len),
        }
    }

    /// Allocated `(buffer, scratch)` capacities.
    #[must_use]
    pub fn capacity(&self) -> (usize, usize) {
        (self.buffer.capacity(), self.scratch.capacity())
    }

    /// Borrows `buffer_len` lane entries and `scratch_len` scratch entries.
    pub(crate) fn split(
        &mut self,
        buffer_len: usize,
        scratch_len: usize,
    ) -> (&mut [Complex<T>], &mut [Complex<T>]) {
        if self.buffer.len() < buffer_len {
            self.buffer.resize(buffer_len, Complex::zero());
        }
        if self.scratch.len() < scratch_len {
            self.scratch.resize(scratch_len, Complex::zero());
        }
        (
            &mut self.buffer[..buffer_len],
            &mut self.scratch[..scratch_len],
        )
    }
}

/// A batched real-to-complex / complex-to-real transform pair.
///
/// Both methods operate on a batch of lanes stored back to back: the input of
/// [`forward`](Self::forward) holds `k` lanes of `len` reals and its output
/// `k` lanes of [`num_bins(len)`](num_bins) bins.
pub trait SpectralBackend<T: Real>: Debug + Send + Sync {
    /// Unnormalized real-to-complex transform of every lane.
    fn forward(
        &self,
        input: &[T],
        len: usize,
        output: &mut [Complex<T>],
        workspace: &mut SpectralWorkspace<T>,
    );

    /// Complex-to-real inverse transform of every lane, scaled by `1 / len`.
    ///
    /// Each input lane is the non-redundant half of a Hermitian spectrum.
    fn inverse(
        &self,
        input: &[Complex<T>],
        len: usize,
        output: &mut [T],
        workspace: &mut SpectralWorkspace<T>,
    );

    /// Scratch entries one lane of length `len` needs in a [`SpectralWorkspace`].
    fn scratch_len(&self, _len: usize) -> usize {
        0
    }
}

/// Multiplies two polynomials given by their coefficients (lowest degree first).
///
/// The result has `a.len() + b.len() - 1` coefficients, or none if either
/// operand is empty.
pub fn poly_mul<T, S>(backend: &S, a: &[T], b: &[T]) -> Vec<T>
where
    T: Real,
    S: SpectralBackend<T> + ?Sized,
{
    if a.is_empty() || b.is_empty() {
        return Vec::new();
    }
    let out_len = a.len() + b.len() - 1;
    let len = 2 * a.len().max(b.len());
    let bins = num_bins(len);

    // Two lanes: `a` then `b`, each zero-padded to `len`.
    let mut padded = vec![T::zero(); 2 * len];
    padded[..a.len()].copy_from_slice(a);
    padded[len..len + b.len()].copy_from_slice(b);

    let mut workspace = SpectralWorkspace::new();
    let mut spectra = vec![Complex::zero(); 2 * bins];
    backend.forward(&padded, len, &mut spectra, &mut workspace);
    let (fa, fb) = spectra.split_at_mut(bins);
    mul_pointwise_assign(fa, fb);

    let mut out = vec![T::zero(); len];
    backend.inverse(fa, len, &mut out, &mut workspace);
    out.truncate(out_len);
    out
}

/// `out[k] = a[k] * b[k]`.
#[inline]
pub(crate) fn mul_pointwise<T: Real>(out: &mut [Complex<T>], a: &[Complex<T>], b: &[Complex<T>]) {
    debug_assert_eq!(out.len(), a.len());
    debug_assert_eq!(out.len(), b.len());
    izip!(out, a, b).for_each(|(o, &x, &y)| *o = x * y);
}

/// `acc[k] *= b[k]`.
#[inline]
pub(crate) fn mul_pointwise_assign<T: Real>(acc: &mut [Complex<T>], b: &[Complex<T>]) {
    debug_assert_eq!(acc.len(), b.len());
    acc.iter_mut().zip(b).for_each(|(a, &y)| *a *= y);
}

/// `acc[k] += conj(f[k]) * x[k]`, the spectral form of a correlation with `f`.
#[inline]
pub(crate) fn correlate_accumulate<T: Real>(
    acc: &mut [Complex<T>],
    f: &[Complex<T>],
    x: &[Complex<T>],
) {
    debug_assert_eq!(acc.len(), f.len());
    debug_assert_eq!(acc.len(), x.len());
    izip!(acc, f, x).for_each(|(a, &f, &x)| *a += f.conj() * x);
}
