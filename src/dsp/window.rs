use rustfft::num_traits::{Float, FloatConst};

use super::cast;

/// Periodic Hann window of length `n`, stored folded.
///
/// Only `n / 2 + 1` coefficients are kept because the window is symmetric
/// about `n / 2`; [`HannTable::at`] mirrors indices from the upper half.
#[derive(Clone, Debug)]
pub struct HannTable<T> {
    n: usize,
    values: Vec<T>,
}

impl<T: Float + FloatConst> HannTable<T> {
    pub fn new(n: usize) -> Self {
        let half: T = cast(0.5);
        let len: T = cast(n);
        let two_pi = T::PI() + T::PI();
        let values = (0..=n / 2)
            .map(|i| {
                let i: T = cast(i);
                half - half * (two_pi * i / len).cos()
            })
            .collect();
        Self { n, values }
    }

    /// Coefficient for natural index `i` in `0..=n`.
    #[inline]
    pub fn at(&self, i: usize) -> T {
        self.values[i.min(self.n - i)]
    }

    /// The stored half (`n / 2 + 1` coefficients).
    #[allow(dead_code)]
    pub fn folded(&self) -> &[T] {
        &self.values
    }
}
