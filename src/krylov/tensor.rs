use std::ops::Deref;

use rustfft::num_traits::Zero;

/// A dense `(batch, rank, n)` tensor stored row-major.
///
/// Lane `(b, r)` holds the `n` entries `values[(b * rank + r) * n..][..n]`. This is
/// the layout of the transpose-multiply output and of the multiply coefficients.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KrylovTensor<T> {
    values: Vec<T>,
    batch: usize,
    rank: usize,
    n: usize,
}

impl<T> KrylovTensor<T> {
    /// Wraps `values` as a `(batch, rank, n)` tensor.
    ///
    /// # Panics
    /// Panics if `values.len() != batch * rank * n`.
    #[must_use]
    pub fn new(values: Vec<T>, batch: usize, rank: usize, n: usize) -> Self {
        assert_eq!(
            values.len(),
            batch * rank * n,
            "tensor of shape ({batch}, {rank}, {n}) needs {} values",
            batch * rank * n
        );
        Self {
            values,
            batch,
            rank,
            n,
        }
    }

    /// Builds a tensor with `f(b, r, i)` at every position.
    pub fn from_fn(
        batch: usize,
        rank: usize,
        n: usize,
        mut f: impl FnMut(usize, usize, usize) -> T,
    ) -> Self {
        let mut values = Vec::with_capacity(batch * rank * n);
        for b in 0..batch {
            for r in 0..rank {
                values.extend((0..n).map(|i| f(b, r, i)));
            }
        }
        Self::new(values, batch, rank, n)
    }

    #[must_use]
    pub const fn batch(&self) -> usize {
        self.batch
    }

    #[must_use]
    pub const fn rank(&self) -> usize {
        self.rank
    }

    #[must_use]
    pub const fn n(&self) -> usize {
        self.n
    }

    /// `(batch, rank, n)`.
    #[must_use]
    pub const fn shape(&self) -> (usize, usize, usize) {
        (self.batch, self.rank, self.n)
    }

    /// The `n` entries of lane `(b, r)`.
    #[must_use]
    pub fn lane(&self, b: usize, r: usize) -> &[T] {
        assert!(b < self.batch && r < self.rank, "lane ({b}, {r}) out of bounds");
        let start = (b * self.rank + r) * self.n;
        &self.values[start..start + self.n]
    }

    #[must_use]
    pub fn as_slice(&self) -> &[T] {
        &self.values
    }

    #[must_use]
    pub fn into_values(self) -> Vec<T> {
        self.values
    }
}

impl<T: Copy> KrylovTensor<T> {
    #[must_use]
    pub fn get(&self, b: usize, r: usize, i: usize) -> T {
        self.lane(b, r)[i]
    }
}

impl<T: Zero + Clone> KrylovTensor<T> {
    #[must_use]
    pub fn zeros(batch: usize, rank: usize, n: usize) -> Self {
        Self::new(vec![T::zero(); batch * rank * n], batch, rank, n)
    }
}

impl<T> Deref for KrylovTensor<T> {
    type Target = [T];

    fn deref(&self) -> &Self::Target {
        &self.values
    }
}
