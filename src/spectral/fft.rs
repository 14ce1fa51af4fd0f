use std::{
    any::{Any, TypeId},
    collections::HashMap,
    fmt,
    sync::{Arc, LazyLock, Mutex, RwLock},
};

use p3_maybe_rayon::prelude::*;
use rustfft::{Fft, FftPlanner, num_complex::Complex};

use super::{Real, SpectralBackend, SpectralWorkspace, from_usize, num_bins};

/// Global cache for FFT backends, indexed by scalar type.
static BACKEND_CACHE: LazyLock<Mutex<HashMap<TypeId, Arc<dyn Any + Send + Sync>>>> =
    LazyLock::new(|| Mutex::new(HashMap::new()));

/// Forward and inverse plans for one transform length.
#[derive(Clone)]
struct Plan<T: Real> {
    forward: Arc<dyn Fft<T>>,
    inverse: Arc<dyn Fft<T>>,
}

/// Spectral backend built on `rustfft`.
///
/// Real lanes are promoted to complex buffers and run through a planned
/// complex FFT. Plans are created on first use of a transform length and
/// shared afterwards; lanes of one batch are transformed in parallel, each
/// in its own slice of the caller's [`SpectralWorkspace`].
pub struct RustFftBackend<T: Real> {
    plans: RwLock<HashMap<usize, Plan<T>>>,
}

impl<T: Real> RustFftBackend<T> {
    #[must_use]
    pub fn new() -> Self {
        Self {
            plans: RwLock::new(HashMap::new()),
        }
    }

    /// Returns the process-wide backend for `T`, creating it on first use.
    pub fn new_from_cache() -> Arc<Self> {
        let mut cache = BACKEND_CACHE.lock().unwrap();
        let type_id = TypeId::of::<T>();
        #[allow(clippy::option_if_let_else)]
        if let Some(backend) = cache.get(&type_id) {
            backend.clone().downcast::<Self>().unwrap()
        } else {
            let backend = Arc::new(Self::new());
            cache.insert(type_id, backend.clone());
            backend
        }
    }

    /// Returns the plans for transforms of length `len`, planning them if needed.
    fn plan(&self, len: usize) -> Plan<T> {
        {
            let plans = self.plans.read().unwrap();
            if let Some(plan) = plans.get(&len) {
                return plan.clone();
            }
        }
        let mut plans = self.plans.write().unwrap();
        // Another thread may have planned this length in the meantime.
        plans
            .entry(len)
            .or_insert_with(|| {
                let mut planner = FftPlanner::new();
                Plan {
                    forward: planner.plan_fft_forward(len),
                    inverse: planner.plan_fft_inverse(len),
                }
            })
            .clone()
    }

    /// Transform lengths planned so far, in increasing order.
    pub fn planned_lengths(&self) -> Vec<usize> {
        let mut lengths: Vec<_> = self.plans.read().unwrap().keys().copied().collect();
        lengths.sort_unstable();
        lengths
    }
}

impl<T: Real> Default for RustFftBackend<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: Real> fmt::Debug for RustFftBackend<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RustFftBackend")
            .field("planned_lengths", &self.planned_lengths())
            .finish()
    }
}

impl<T: Real> SpectralBackend<T> for RustFftBackend<T> {
    fn forward(
        &self,
        input: &[T],
        len: usize,
        output: &mut [Complex<T>],
        workspace: &mut SpectralWorkspace<T>,
    ) {
        let bins = num_bins(len);
        debug_assert_eq!(input.len() % len, 0);
        debug_assert_eq!(output.len(), input.len() / len * bins);

        let fft = self.plan(len).forward;
        let scratch_len = fft.get_inplace_scratch_len();
        let per_lane = scratch_len.max(1);
        let lanes = input.len() / len;
        let (buffer, scratch) = workspace.split(lanes * len, lanes * per_lane);
        output
            .par_chunks_exact_mut(bins)
            .zip(input.par_chunks_exact(len))
            .zip(buffer.par_chunks_exact_mut(len))
            .zip(scratch.par_chunks_exact_mut(per_lane))
            .for_each(|(((out, lane), buf), scratch)| {
                buf.iter_mut()
                    .zip(lane)
                    .for_each(|(b, &x)| *b = Complex::new(x, T::zero()));
                fft.process_with_scratch(buf, &mut scratch[..scratch_len]);
                out.copy_from_slice(&buf[..bins]);
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
        debug_assert_eq!(input.len() % bins, 0);
        debug_assert_eq!(output.len(), input.len() / bins * len);

        let fft = self.plan(len).inverse;
        let scratch_len = fft.get_inplace_scratch_len();
        let per_lane = scratch_len.max(1);
        let lanes = input.len() / bins;
        let scale = T::one() / from_usize::<T>(len);
        let (buffer, scratch) = workspace.split(lanes * len, lanes * per_lane);
        output
            .par_chunks_exact_mut(len)
            .zip(input.par_chunks_exact(bins))
            .zip(buffer.par_chunks_exact_mut(len))
            .zip(scratch.par_chunks_exact_mut(per_lane))
            .for_each(|(((out, lane), buf), scratch)| {
                // Rebuild the full spectrum from its Hermitian half.
                let (head, tail) = buf.split_at_mut(bins);
                head.copy_from_slice(lane);
                for (k, x) in tail.iter_mut().enumerate() {
                    *x = lane[len - bins - k].conj();
                }
                fft.process_with_scratch(buf, &mut scratch[..scratch_len]);
                out.iter_mut()
                    .zip(buf.iter())
                    .for_each(|(o, x)| *o = x.re * scale);
            });
    }

    fn scratch_len(&self, len: usize) -> usize {
        let plan = self.plan(len);
        plan.forward
            .get_inplace_scratch_len()
            .max(plan.inverse.get_inplace_scratch_len())
    }
}
