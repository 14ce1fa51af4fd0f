//! Quad-block state of the dyadic recursion.
//!
//! Every array is stored as `lanes × n`, and a level never moves data across
//! lanes: at level `d` a lane is a sequence of `2 * n1` blocks of `n2`
//! entries, and merging blocks `2j` and `2j + 1` yields block `j` of the next
//! level, which occupies exactly the same `2 * n2` positions. All updates
//! are therefore done in place.
//!
//! ```text
//!   T_00  (batch·rank) × n   data ⊗ generators       (transpose side)
//!   T_01   batch       × n   data                    (transpose side)
//!   T_10   rank        × n   generators              (forward side)
//!   T_11   1           × n   all ones at the leaves  (forward side)
//! ```

use p3_maybe_rayon::prelude::*;
use rustfft::{num_complex::Complex, num_traits::Zero};

use crate::spectral::{
    Real, SpectralBackend, SpectralWorkspace, correlate_accumulate, mul_pointwise,
    mul_pointwise_assign,
};

/// Geometry of one recursion level.
///
/// Level `d` merges `2 * n1` blocks of `n2 = 2^(m - d - 1)` entries into `n1 = 2^d`
/// blocks of `2 * n2` entries.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct Level {
    pub(crate) n1: usize,
    pub(crate) n2: usize,
}

impl Level {
    pub(crate) const fn new(log_n: usize, d: usize) -> Self {
        Self {
            n1: 1 << d,
            n2: 1 << (log_n - d - 1),
        }
    }

    /// Levels from the finest (`d = m - 1`) to the coarsest (`d = 0`).
    pub(crate) fn finest_to_coarsest(log_n: usize) -> impl Iterator<Item = (usize, Self)> {
        (0..log_n).rev().map(move |d| (d, Self::new(log_n, d)))
    }

    /// Levels from the coarsest (`d = 0`) to the finest (`d = m - 1`).
    pub(crate) fn coarsest_to_finest(log_n: usize) -> impl Iterator<Item = (usize, Self)> {
        (0..log_n).map(move |d| (d, Self::new(log_n, d)))
    }

    /// Length of the zero-padded transform, twice the input block size.
    pub(crate) const fn fft_len(&self) -> usize {
        2 * self.n2
    }

    /// Number of spectral bins per block.
    pub(crate) const fn bins(&self) -> usize {
        self.n2 + 1
    }

    /// Number of spectral coefficients held by `lanes` lanes at this level.
    pub(crate) const fn spectra_len(&self, lanes: usize) -> usize {
        lanes * self.n1 * self.bins()
    }

    /// Subdiagonal entries linking the last position of block `2j` to the first of
    /// block `2j + 1`, for `j = 0..n1`.
    pub(crate) fn boundaries<T: Copy>(self, subdiag: &[T]) -> impl Iterator<Item = T> + Clone + '_ {
        subdiag
            .iter()
            .skip(self.n2 - 1)
            .step_by(self.fft_len())
            .copied()
    }
}

/// Which old half-blocks are added back after a merge.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Carry {
    Nothing,
    EvenHalf,
    OddHalf,
    BothHalves,
}

/// Per-call scratch buffers, sized for the widest level and reused by all of them.
#[derive(Debug)]
pub(crate) struct Scratch<T: Real> {
    /// Zero-padded (or rescaled) time-domain blocks.
    time: Vec<T>,
    /// Spectra of `time`.
    spectra: Vec<Complex<T>>,
    /// Pointwise products of spectra.
    product: Vec<Complex<T>>,
    /// Inverse transforms of `product`.
    merged: Vec<T>,
    /// Complex lanes and transform scratch of the backend.
    workspace: SpectralWorkspace<T>,
}

impl<T: Real> Scratch<T> {
    /// Buffers for levels processing at most `max_lanes` lanes of length `n`.
    ///
    /// At every level `n1 * (n2 + 1) <= n`, so `max_lanes * n` bounds every buffer.
    /// The backend workspace is sized for the largest transform batch over all
    /// `log_n` levels, so no level allocates.
    pub(crate) fn new<S>(backend: &S, max_lanes: usize, n: usize, log_n: usize) -> Self
    where
        S: SpectralBackend<T> + ?Sized,
    {
        let size = max_lanes * n;
        let fft_scratch = Level::finest_to_coarsest(log_n)
            .map(|(_, level)| {
                let len = level.fft_len();
                size / len * backend.scratch_len(len).max(1)
            })
            .max()
            .unwrap_or(0);
        Self {
            time: vec![T::zero(); size],
            spectra: vec![Complex::zero(); size],
            product: vec![Complex::zero(); size],
            merged: vec![T::zero(); size],
            workspace: SpectralWorkspace::with_capacity(size, fft_scratch),
        }
    }

    /// Allocated `(buffer, scratch)` capacities of the backend workspace.
    #[cfg(test)]
    pub(crate) fn workspace_capacity(&self) -> (usize, usize) {
        self.workspace.capacity()
    }
}

/// Copies the even or odd half-blocks of every lane into zero-padded transform inputs.
///
/// Block `c` of `src` (length `2 * n2`) holds half-blocks `2c` and `2c + 1`, so the
/// padded lane `c` of `dst` is built from it alone.
fn pad_half_blocks<T: Real>(src: &[T], level: &Level, odd: bool, dst: &mut [T]) {
    let (n2, len) = (level.n2, level.fft_len());
    let offset = if odd { n2 } else { 0 };
    dst.par_chunks_exact_mut(len)
        .zip(src.par_chunks_exact(len))
        .for_each(|(padded, block)| {
            let (head, tail) = padded.split_at_mut(n2);
            head.copy_from_slice(&block[offset..offset + n2]);
            tail.fill(T::zero());
        });
}

/// Writes the merged blocks of one lane back in place.
///
/// `merged` holds the raw polynomial products of each block; they are scaled by
/// the block's boundary coefficient and the carried half-blocks are added to
/// the upper half. The upper half is written first since it reads the old
/// lower half.
fn merge_lane<T: Real>(lane: &mut [T], merged: &[T], level: &Level, subdiag: &[T], carry: Carry) {
    let (n2, len) = (level.n2, level.fft_len());
    for ((block, product), scale) in lane
        .chunks_exact_mut(len)
        .zip(merged.chunks_exact(len))
        .zip(level.boundaries(subdiag))
    {
        let (lo, hi) = block.split_at_mut(n2);
        let (p_lo, p_hi) = product.split_at(n2);
        for ((h, &l), &p) in hi.iter_mut().zip(lo.iter()).zip(p_hi) {
            let carried = match carry {
                Carry::Nothing => T::zero(),
                Carry::EvenHalf => l,
                Carry::OddHalf => *h,
                Carry::BothHalves => l + *h,
            };
            *h = p * scale + carried;
        }
        for (l, &p) in lo.iter_mut().zip(p_lo) {
            *l = p * scale;
        }
    }
}

/// Multiplies every block of a run of lanes by its boundary coefficient.
fn scale_blocks<T: Real>(dst: &mut [T], src: &[T], level: &Level, subdiag: &[T]) {
    let len = level.fft_len();
    for ((d, s), scale) in dst
        .chunks_exact_mut(len)
        .zip(src.chunks_exact(len))
        .zip(level.boundaries(subdiag).cycle())
    {
        d.iter_mut().zip(s).for_each(|(d, &s)| *d = s * scale);
    }
}

/// Forward-side blocks `T_10` and `T_11`; they depend only on the generators and `A`.
#[derive(Debug, Clone)]
pub(crate) struct GeneratorBlocks<T> {
    n: usize,
    rank: usize,
    t10: Vec<T>,
    t11: Vec<T>,
}

impl<T: Real> GeneratorBlocks<T> {
    /// Leaf state: `T_10 = v`, `T_11 = 1`.
    pub(crate) fn new(generators: &[T], rank: usize, n: usize) -> Self {
        debug_assert_eq!(generators.len(), rank * n);
        Self {
            n,
            rank,
            t10: generators.to_vec(),
            t11: vec![T::one(); n],
        }
    }

    /// Merges one level.
    ///
    /// Before consuming them, the spectra of the even generator half-blocks and of
    /// the even boundary half-blocks are written to `generator_spectra`
    /// (`rank × n1 × bins`) and `boundary_spectra` (`n1 × bins`).
    pub(crate) fn merge<S: SpectralBackend<T> + ?Sized>(
        &mut self,
        level: &Level,
        subdiag: &[T],
        backend: &S,
        scratch: &mut Scratch<T>,
        generator_spectra: &mut [Complex<T>],
        boundary_spectra: &mut [Complex<T>],
    ) {
        let (n, rank) = (self.n, self.rank);
        let len = level.fft_len();
        let block = level.spectra_len(1);

        // Lanes: even halves of T_10, even half of T_11, odd half of T_11.
        let time = &mut scratch.time[..(rank + 2) * n];
        let (generator_time, rest) = time.split_at_mut(rank * n);
        let (even_time, odd_time) = rest.split_at_mut(n);
        pad_half_blocks(&self.t10, level, false, generator_time);
        pad_half_blocks(&self.t11, level, false, even_time);
        pad_half_blocks(&self.t11, level, true, odd_time);

        let spectra = &mut scratch.spectra[..(rank + 2) * block];
        backend.forward(time, len, spectra, &mut scratch.workspace);
        let (even_spectra, odd_boundary) = spectra.split_at((rank + 1) * block);
        generator_spectra.copy_from_slice(&even_spectra[..rank * block]);
        boundary_spectra.copy_from_slice(&even_spectra[rank * block..]);

        // T_10 <- S1_11 * S0_10 and T_11 <- S1_11 * S0_11.
        let product = &mut scratch.product[..(rank + 1) * block];
        product
            .par_chunks_exact_mut(block)
            .zip(even_spectra.par_chunks_exact(block))
            .for_each(|(out, even)| mul_pointwise(out, odd_boundary, even));

        let merged = &mut scratch.merged[..(rank + 1) * n];
        backend.inverse(product, len, merged, &mut scratch.workspace);
        let (generator_merged, boundary_merged) = merged.split_at(rank * n);

        self.t10
            .par_chunks_exact_mut(n)
            .zip(generator_merged.par_chunks_exact(n))
            .for_each(|(lane, product)| merge_lane(lane, product, level, subdiag, Carry::OddHalf));
        merge_lane(&mut self.t11, boundary_merged, level, subdiag, Carry::Nothing);
    }
}

/// Transpose-side blocks `T_00` and `T_01`, driven by a batch of data vectors.
#[derive(Debug, Clone)]
pub(crate) struct DataBlocks<T> {
    n: usize,
    rank: usize,
    batch: usize,
    t00: Vec<T>,
    t01: Vec<T>,
}

impl<T: Real> DataBlocks<T> {
    /// Leaf state: `T_00[b, r] = u_b ⊙ v_r`, `T_01 = u`.
    ///
    /// Requires `rank > 0`; callers short-circuit empty problems.
    pub(crate) fn new(generators: &[T], data: &[T], rank: usize, batch: usize, n: usize) -> Self {
        debug_assert!(rank > 0);
        debug_assert_eq!(generators.len(), rank * n);
        debug_assert_eq!(data.len(), batch * n);

        let mut t00 = vec![T::zero(); batch * rank * n];
        t00.par_chunks_exact_mut(rank * n)
            .zip(data.par_chunks_exact(n))
            .for_each(|(lanes, u)| {
                for (lane, v) in lanes.chunks_exact_mut(n).zip(generators.chunks_exact(n)) {
                    for ((t, &x), &y) in lane.iter_mut().zip(u).zip(v) {
                        *t = x * y;
                    }
                }
            });

        Self {
            n,
            rank,
            batch,
            t00,
            t01: data.to_vec(),
        }
    }

    /// Merges one level using the generator-side spectra of that level.
    pub(crate) fn merge<S: SpectralBackend<T> + ?Sized>(
        &mut self,
        level: &Level,
        subdiag: &[T],
        backend: &S,
        scratch: &mut Scratch<T>,
        generator_spectra: &[Complex<T>],
        boundary_spectra: &[Complex<T>],
    ) {
        let (n, rank, batch) = (self.n, self.rank, self.batch);
        let len = level.fft_len();
        let block = level.spectra_len(1);
        debug_assert_eq!(generator_spectra.len(), rank * block);
        debug_assert_eq!(boundary_spectra.len(), block);

        // Odd halves of T_01.
        let time = &mut scratch.time[..batch * n];
        pad_half_blocks(&self.t01, level, true, time);
        let data_spectra = &mut scratch.spectra[..batch * block];
        backend.forward(time, len, data_spectra, &mut scratch.workspace);

        // Per batch element: rank lanes of S1_01 * S0_10, then one lane of S1_01 * S0_11.
        let product = &mut scratch.product[..batch * (rank + 1) * block];
        product
            .par_chunks_exact_mut((rank + 1) * block)
            .zip(data_spectra.par_chunks_exact(block))
            .for_each(|(out, data)| {
                let (cross, tail) = out.split_at_mut(rank * block);
                cross
                    .chunks_exact_mut(block)
                    .zip(generator_spectra.chunks_exact(block))
                    .for_each(|(out, generator)| mul_pointwise(out, data, generator));
                mul_pointwise(tail, data, boundary_spectra);
            });

        let merged = &mut scratch.merged[..batch * (rank + 1) * n];
        backend.inverse(product, len, merged, &mut scratch.workspace);

        self.t00
            .par_chunks_exact_mut(rank * n)
            .zip(self.t01.par_chunks_exact_mut(n))
            .zip(merged.par_chunks_exact((rank + 1) * n))
            .for_each(|((t00, t01), merged)| {
                let (merged_00, merged_01) = merged.split_at(rank * n);
                for (lane, product) in t00.chunks_exact_mut(n).zip(merged_00.chunks_exact(n)) {
                    merge_lane(lane, product, level, subdiag, Carry::BothHalves);
                }
                merge_lane(t01, merged_01, level, subdiag, Carry::EvenHalf);
            });
    }

    /// Final `(batch, rank, n)` values: `T_00` with each lane reversed, since `A`
    /// shifts towards higher indices while the merges accumulate towards them.
    pub(crate) fn into_output(mut self) -> Vec<T> {
        self.t00.par_chunks_exact_mut(self.n).for_each(<[T]>::reverse);
        self.t00
    }
}

/// Cotangents of `T_00` and `T_01`, walked from the coarsest level to the finest.
#[derive(Debug, Clone)]
pub(crate) struct AdjointBlocks<T> {
    n: usize,
    rank: usize,
    batch: usize,
    g00: Vec<T>,
    g01: Vec<T>,
}

impl<T: Real> AdjointBlocks<T> {
    /// Root state: the coefficient batch with each lane reversed, and no
    /// cotangent on `T_01`.
    ///
    /// Requires `rank > 0`; callers short-circuit empty problems.
    pub(crate) fn new(coefficients: &[T], rank: usize, batch: usize, n: usize) -> Self {
        debug_assert!(rank > 0);
        debug_assert_eq!(coefficients.len(), batch * rank * n);

        let mut g00 = coefficients.to_vec();
        g00.par_chunks_exact_mut(n).for_each(<[T]>::reverse);
        Self {
            n,
            rank,
            batch,
            g00,
            g01: vec![T::zero(); batch * n],
        }
    }

    /// Undoes one merge: maps cotangents of the merged blocks to cotangents of
    /// their even and odd halves.
    pub(crate) fn split<S: SpectralBackend<T> + ?Sized>(
        &mut self,
        level: &Level,
        subdiag: &[T],
        backend: &S,
        scratch: &mut Scratch<T>,
        generator_spectra: &[Complex<T>],
        boundary_spectra: &[Complex<T>],
    ) {
        let (n, rank, batch) = (self.n, self.rank, self.batch);
        let (n2, len) = (level.n2, level.fft_len());
        let block = level.spectra_len(1);
        debug_assert_eq!(generator_spectra.len(), rank * block);
        debug_assert_eq!(boundary_spectra.len(), block);

        // Per batch element: rank lanes of G_00 then one lane of G_01, each block
        // scaled by its boundary coefficient.
        let time = &mut scratch.time[..batch * (rank + 1) * n];
        time.par_chunks_exact_mut((rank + 1) * n)
            .zip(self.g00.par_chunks_exact(rank * n))
            .zip(self.g01.par_chunks_exact(n))
            .for_each(|((dst, g00), g01)| {
                let (dst_00, dst_01) = dst.split_at_mut(rank * n);
                scale_blocks(dst_00, g00, level, subdiag);
                scale_blocks(dst_01, g01, level, subdiag);
            });

        let spectra = &mut scratch.spectra[..batch * (rank + 1) * block];
        backend.forward(time, len, spectra, &mut scratch.workspace);

        // Correlate against the generator-side factors; this is the adjoint of the
        // products formed in `DataBlocks::merge`, summed over the rank.
        let accumulated = &mut scratch.product[..batch * block];
        accumulated
            .par_chunks_exact_mut(block)
            .zip(spectra.par_chunks_exact((rank + 1) * block))
            .for_each(|(acc, spectra)| {
                let (spectra_00, spectra_01) = spectra.split_at(rank * block);
                acc.copy_from_slice(boundary_spectra);
                acc.iter_mut().for_each(|a| *a = a.conj());
                mul_pointwise_assign(acc, spectra_01);
                for (x, generator) in spectra_00
                    .chunks_exact(block)
                    .zip(generator_spectra.chunks_exact(block))
                {
                    correlate_accumulate(acc, generator, x);
                }
            });

        let merged = &mut scratch.merged[..batch * n];
        backend.inverse(accumulated, len, merged, &mut scratch.workspace);

        // Both halves of T_00 were carried into the upper half of the merge.
        self.g00.par_chunks_exact_mut(len).for_each(|block| {
            let (lo, hi) = block.split_at_mut(n2);
            lo.copy_from_slice(hi);
        });
        // The even half of T_01 was carried; the odd half fed the products.
        self.g01
            .par_chunks_exact_mut(len)
            .zip(merged.par_chunks_exact(len))
            .for_each(|(block, correlation)| {
                let (lo, hi) = block.split_at_mut(n2);
                lo.copy_from_slice(hi);
                hi.copy_from_slice(&correlation[..n2]);
            });
    }

    /// Contracts the leaf cotangents against the generators:
    /// `out[b] = Σ_r G_00[b, r] ⊙ v_r + G_01[b]`.
    pub(crate) fn finish(self, generators: &[T]) -> Vec<T> {
        let n = self.n;
        let mut out = self.g01;
        out.par_chunks_exact_mut(n)
            .zip(self.g00.par_chunks_exact(self.rank * n))
            .for_each(|(out, g00)| {
                for (lane, v) in g00.chunks_exact(n).zip(generators.chunks_exact(n)) {
                    for ((o, &g), &x) in out.iter_mut().zip(lane).zip(v) {
                        *o += g * x;
                    }
                }
            });
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_level_geometry() {
        // n = 16, m = 4
        let finest = Level::new(4, 3);
        assert_eq!(finest, Level { n1: 8, n2: 1 });
        assert_eq!(finest.fft_len(), 2);
        assert_eq!(finest.bins(), 2);

        let coarsest = Level::new(4, 0);
        assert_eq!(coarsest, Level { n1: 1, n2: 8 });
        assert_eq!(coarsest.fft_len(), 16);
        assert_eq!(coarsest.spectra_len(3), 27);
    }

    #[test]
    fn test_level_order() {
        let down: Vec<_> = Level::finest_to_coarsest(3).map(|(d, _)| d).collect();
        let up: Vec<_> = Level::coarsest_to_finest(3).map(|(d, _)| d).collect();
        assert_eq!(down, vec![2, 1, 0]);
        assert_eq!(up, vec![0, 1, 2]);
        assert_eq!(Level::finest_to_coarsest(0).count(), 0);
    }

    #[test]
    fn test_boundaries() {
        // n = 8: subdiag indices 0..7
        let subdiag: Vec<f64> = (0..7).map(f64::from).collect();
        let b: Vec<_> = Level::new(3, 2).boundaries(&subdiag).collect();
        assert_eq!(b, vec![0.0, 2.0, 4.0, 6.0]);
        let b: Vec<_> = Level::new(3, 1).boundaries(&subdiag).collect();
        assert_eq!(b, vec![1.0, 5.0]);
        let b: Vec<_> = Level::new(3, 0).boundaries(&subdiag).collect();
        assert_eq!(b, vec![3.0]);
    }

    #[test]
    fn test_pad_half_blocks() {
        let src = [1.0, 2.0, 3.0, 4.0, 5.0, 6.0, 7.0, 8.0];
        let level = Level::new(3, 1); // n1 = 2, n2 = 2
        let mut dst = [f64::NAN; 8];
        pad_half_blocks(&src, &level, false, &mut dst);
        assert_eq!(dst, [1.0, 2.0, 0.0, 0.0, 5.0, 6.0, 0.0, 0.0]);
        pad_half_blocks(&src, &level, true, &mut dst);
        assert_eq!(dst, [3.0, 4.0, 0.0, 0.0, 7.0, 8.0, 0.0, 0.0]);
    }

    #[test]
    fn test_merge_lane_carries() {
        let level = Level::new(2, 0); // single block of 4, n2 = 2
        let subdiag = [9.0, 2.0, 9.0];
        let product = [1.0, 1.0, 1.0, 1.0];

        let mut lane = [10.0, 20.0, 30.0, 40.0];
        merge_lane(&mut lane, &product, &level, &subdiag, Carry::Nothing);
        assert_eq!(lane, [2.0, 2.0, 2.0, 2.0]);

        let mut lane = [10.0, 20.0, 30.0, 40.0];
        merge_lane(&mut lane, &product, &level, &subdiag, Carry::EvenHalf);
        assert_eq!(lane, [2.0, 2.0, 12.0, 22.0]);

        let mut lane = [10.0, 20.0, 30.0, 40.0];
        merge_lane(&mut lane, &product, &level, &subdiag, Carry::OddHalf);
        assert_eq!(lane, [2.0, 2.0, 32.0, 42.0]);

        let mut lane = [10.0, 20.0, 30.0, 40.0];
        merge_lane(&mut lane, &product, &level, &subdiag, Carry::BothHalves);
        assert_eq!(lane, [2.0, 2.0, 42.0, 62.0]);
    }

    #[test]
    fn test_scale_blocks_cycles_over_lanes() {
        let level = Level::new(2, 1); // two blocks of 2 per lane
        let subdiag = [2.0, 0.0, 3.0];
        let src = [1.0; 8];
        let mut dst = [0.0; 8];
        scale_blocks(&mut dst, &src, &level, &subdiag);
        assert_eq!(dst, [2.0, 2.0, 3.0, 3.0, 2.0, 2.0, 3.0, 3.0]);
    }

    #[test]
    fn test_scratch_workspace_is_sized_up_front() {
        use crate::spectral::RustFftBackend;

        let (log_n, rank, batch) = (8, 2, 3);
        let n = 1 << log_n;
        let backend = RustFftBackend::<f64>::new();
        let generators: Vec<f64> = (0..rank * n).map(|i| f64::from((i % 5) as u8) - 2.0).collect();
        let data: Vec<f64> = (0..batch * n).map(|i| f64::from((i % 3) as u8)).collect();
        let subdiag = vec![0.5; n - 1];

        let mut scratch = Scratch::new(&backend, (rank + 2).max(batch * (rank + 1)), n, log_n);
        let capacity = scratch.workspace_capacity();
        let mut generator_blocks = GeneratorBlocks::new(&generators, rank, n);
        let mut data_blocks = DataBlocks::new(&generators, &data, rank, batch, n);
        for (_, level) in Level::finest_to_coarsest(log_n) {
            let mut generator_spectra = vec![Complex::zero(); level.spectra_len(rank)];
            let mut boundary_spectra = vec![Complex::zero(); level.spectra_len(1)];
            generator_blocks.merge(
                &level,
                &subdiag,
                &backend,
                &mut scratch,
                &mut generator_spectra,
                &mut boundary_spectra,
            );
            data_blocks.merge(
                &level,
                &subdiag,
                &backend,
                &mut scratch,
                &generator_spectra,
                &boundary_spectra,
            );
            assert_eq!(scratch.workspace_capacity(), capacity);
        }
    }
}
