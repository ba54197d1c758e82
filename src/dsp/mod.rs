pub mod fft;
pub mod tempo;
pub mod window;

use rustfft::num_traits::{Float, FloatConst, NumCast};
use std::fmt::Debug;

/// Floating-point element type the engines compute in (`f32` or `f64`).
pub trait Sample: Float + FloatConst + Send + Sync + Debug + 'static {}

impl<T: Float + FloatConst + Send + Sync + Debug + 'static> Sample for T {}

/// Lossy numeric conversion into the engine's float type.
#[inline]
pub(crate) fn cast<T: Float, V: NumCast>(value: V) -> T {
    <T as NumCast>::from(value).unwrap_or_else(T::zero)
}
