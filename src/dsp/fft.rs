//! Fixed-size radix-2 FFT producing magnitude spectra of real input.
//!
//! The engine owns a [`TransformTable`] built once for its size. Each call to
//! [`TransformEngine::transform`] windows the input with a Hann window while
//! loading it in bit-reversed order, runs an in-place iterative Cooley-Tukey
//! butterfly network and returns the moduli of bins `0..=N/2`.

use rustfft::num_complex::Complex;

use super::window::HannTable;
use super::{cast, Sample};
use crate::error::{CoreError, CoreResult};

/// Precomputed twiddles, bit-reversal permutation and analysis window.
#[derive(Clone, Debug)]
pub struct TransformTable<T> {
    n: usize,
    twiddle: Vec<Complex<T>>,
    bit_reverse: Vec<usize>,
    window: HannTable<T>,
}

impl<T: Sample> TransformTable<T> {
    pub fn new(n: usize) -> CoreResult<Self> {
        if n < 2 || !n.is_power_of_two() {
            return Err(CoreError::InvalidTransformSize(n));
        }

        let step = -(T::PI() + T::PI()) / cast::<T, _>(n);
        let twiddle = (0..n / 2)
            .map(|k| Complex::from_polar(T::one(), step * cast(k)))
            .collect();

        let shift = usize::BITS - n.trailing_zeros();
        let bit_reverse = (0..n).map(|i| i.reverse_bits() >> shift).collect();

        Ok(Self {
            n,
            twiddle,
            bit_reverse,
            window: HannTable::new(n),
        })
    }

    /// `e^{-2πik/N}` for `k` in `0..N/2`.
    #[allow(dead_code)]
    pub fn twiddle(&self) -> &[Complex<T>] {
        &self.twiddle
    }

    #[allow(dead_code)]
    pub fn bit_reverse(&self) -> &[usize] {
        &self.bit_reverse
    }

    #[allow(dead_code)]
    pub fn window(&self) -> &HannTable<T> {
        &self.window
    }
}

/// Magnitude-spectrum FFT of a fixed power-of-two size.
///
/// The engine holds no per-call state, so one instance can be shared by
/// reference between pipelines running on different threads.
#[derive(Clone, Debug)]
pub struct TransformEngine<T> {
    table: TransformTable<T>,
}

impl<T: Sample> TransformEngine<T> {
    pub fn new(n: usize) -> CoreResult<Self> {
        Ok(Self {
            table: TransformTable::new(n)?,
        })
    }

    pub fn size(&self) -> usize {
        self.table.n
    }

    /// Number of output bins, DC through Nyquist inclusive.
    pub fn bins(&self) -> usize {
        self.table.n / 2 + 1
    }

    #[allow(dead_code)]
    pub fn table(&self) -> &TransformTable<T> {
        &self.table
    }

    /// Writes the unnormalized magnitude spectrum of `input` into `output`.
    ///
    /// `input` must hold exactly `size()` samples and `output` exactly
    /// `bins()` values.
    pub fn transform(&self, input: &[T], output: &mut [T]) -> CoreResult<()> {
        let n = self.table.n;
        if input.len() != n {
            return Err(CoreError::size_mismatch("transform input", n, input.len()));
        }
        if output.len() != self.bins() {
            return Err(CoreError::size_mismatch(
                "transform output",
                self.bins(),
                output.len(),
            ));
        }

        let mut work: Vec<Complex<T>> = self
            .table
            .bit_reverse
            .iter()
            .map(|&r| Complex::new(input[r] * self.table.window.at(r), T::zero()))
            .collect();

        self.butterflies(&mut work);

        for (out, bin) in output.iter_mut().zip(&work) {
            *out = bin.norm();
        }
        Ok(())
    }

    /// Convenience wrapper allocating the output spectrum.
    #[allow(dead_code)]
    pub fn magnitudes(&self, input: &[T]) -> CoreResult<Vec<T>> {
        let mut output = vec![T::zero(); self.bins()];
        self.transform(input, &mut output)?;
        Ok(output)
    }

    fn butterflies(&self, work: &mut [Complex<T>]) {
        let n = self.table.n;
        let mut stage = 1;
        while stage < n {
            let stride = n / (stage * 2);
            for block in work.chunks_exact_mut(stage * 2) {
                // Lower and upper halves of the block pair up element-wise,
                // which keeps the inner loop free of index arithmetic.
                let (lower, upper) = block.split_at_mut(stage);
                let twiddles = self.table.twiddle.iter().step_by(stride);
                for ((lo, hi), w) in lower.iter_mut().zip(upper.iter_mut()).zip(twiddles) {
                    let t = *w * *hi;
                    *hi = *lo - t;
                    *lo = *lo + t;
                }
            }
            stage <<= 1;
        }
    }
}
