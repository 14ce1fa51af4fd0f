use std::f64::consts::TAU;

use p3_maybe_rayon::prelude::*;
use rustfft::{num_complex::Complex, num_traits::Zero};

use super::{Real, SpectralBackend, SpectralWorkspace, from_f64, from_usize, num_bins};

/// Direct-summation DFT.
///
/// Quadratic in the transform length; exists to cross-check the fast backend
/// and to pin down results independently of any FFT library.
#[derive(Debug, Default, Clone, Copy)]
pub struct NaiveDft;

/// `exp(sign * 2πi * k / len)`, with `k` reduced modulo `len` first.
#[inline]
fn twiddle<T: Real>(k: usize, len: usize, sign: f64) -> Complex<T> {
    let angle = sign * TAU * (k % len) as f64 / len as f64;
    Complex::from_polar(T::one(), from_f64(angle))
}

impl<T: Real> SpectralBackend<T> for NaiveDft {
    fn forward(
        &self,
        input: &[T],
        len: usize,
        output: &mut [Complex<T>],
        _workspace: &mut SpectralWorkspace<T>,
    ) {
        let bins = num_bins(len);
        debug_assert_eq!(output.len(), input.len() / len * bins);

        output
            .par_chunks_exact_mut(bins)
            .zip(input.par_chunks_exact(len))
            .for_each(|(out, lane)| {
                for (k, o) in out.iter_mut().enumerate() {
                    *o = lane
                        .iter()
                        .enumerate()
                        .fold(Complex::zero(), |acc, (t, &x)| {
                            acc + twiddle::<T>(k * t, len, -1.0) * x
                        });
                }
            });
    }

    fn inverse(
        &self,
        input: &[Complex<T>],
        len: usize,
        output: &mut [T],
        workspace: &mut SpectralWorkspace<T>,
    ) {
        let bins = num_bins(len);
        debug_assert_eq!(output.len(), input.len() / bins * len);

        let scale = T::one() / from_usize::<T>(len);
        let (buffer, _) = workspace.split(output.len(), 0);
        output
            .par_chunks_exact_mut(len)
            .zip(input.par_chunks_exact(bins))
            .zip(buffer.par_chunks_exact_mut(len))
            .for_each(|((out, lane), spectrum)| {
                for (k, x) in spectrum.iter_mut().enumerate() {
                    *x = if k < bins { lane[k] } else { lane[len - k].conj() };
                }
                for (t, o) in out.iter_mut().enumerate() {
                    let sum = spectrum
                        .iter()
                        .enumerate()
                        .fold(Complex::zero(), |acc: Complex<T>, (k, &x)| {
                            acc + twiddle::<T>(k * t, len, 1.0) * x
                        });
                    *o = sum.re * scale;
                }
            });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_forward_length_two() {
        // DFT of [a, b] is [a + b, a - b].
        let mut out = vec![Complex::zero(); 2];
        NaiveDft.forward(&[3.0f64, 1.0], 2, &mut out, &mut SpectralWorkspace::new());
        assert!((out[0] - Complex::new(4.0, 0.0)).norm() < 1e-15);
        assert!((out[1] - Complex::new(2.0, 0.0)).norm() < 1e-15);
    }

    #[test]
    fn test_forward_of_shifted_impulse() {
        // x = δ[t - 1] has X[k] = exp(-2πik/len).
        let len = 8;
        let mut input = vec![0.0f64; len];
        input[1] = 1.0;
        let mut out = vec![Complex::zero(); num_bins(len)];
        NaiveDft.forward(&input, len, &mut out, &mut SpectralWorkspace::new());
        for (k, x) in out.iter().enumerate() {
            let expected = twiddle::<f64>(k, len, -1.0);
            assert!((x - expected).norm() < 1e-14);
        }
    }

    #[test]
    fn test_roundtrip_odd_length() {
        let input = [1.0f64, -2.0, 0.5, 4.0, 3.0];
        let mut workspace = SpectralWorkspace::new();
        let mut spectrum = vec![Complex::zero(); num_bins(5)];
        NaiveDft.forward(&input, 5, &mut spectrum, &mut workspace);
        let mut out = vec![0.0; 5];
        NaiveDft.inverse(&spectrum, 5, &mut out, &mut workspace);
        for (x, y) in input.iter().zip(&out) {
            assert!((x - y).abs() < 1e-12);
        }
    }
}
