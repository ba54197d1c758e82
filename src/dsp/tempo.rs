//! Tempo estimation from a series of per-frame volumes.
//!
//! The series is turned into onset strength (half-wave rectified first
//! difference), then correlated against a complex exponential for every
//! candidate in the requested range. Local maxima of the correlation
//! magnitude are kept in a bounded set and returned strongest first.

use rustfft::num_complex::Complex;
use serde::{Deserialize, Serialize};

use super::window::HannTable;
use super::{cast, Sample};
use crate::error::{CoreError, CoreResult};

/// Weighting applied to each onset term of the correlation.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum TempoWindow {
    #[default]
    Hann,
    Rectangular,
}

/// One ranked tempo estimate. A zero `bpm` marks an unfilled slot.
#[derive(Clone, Copy, Debug, PartialEq, Serialize)]
pub struct TempoCandidate<T> {
    pub bpm: u32,
    pub strength: T,
}

impl<T: Sample> TempoCandidate<T> {
    pub fn empty() -> Self {
        Self {
            bpm: 0,
            strength: T::zero(),
        }
    }
}

/// Keeps the `S` strongest candidates seen so far.
#[derive(Debug)]
struct CandidateSet<T, const S: usize> {
    slots: [TempoCandidate<T>; S],
    len: usize,
}

impl<T: Sample, const S: usize> CandidateSet<T, S> {
    fn new() -> Self {
        Self {
            slots: [TempoCandidate::empty(); S],
            len: 0,
        }
    }

    fn insert(&mut self, candidate: TempoCandidate<T>) {
        if self.len < S {
            self.slots[self.len] = candidate;
            self.len += 1;
            return;
        }
        let weakest = self
            .slots
            .iter()
            .enumerate()
            .min_by(|a, b| a.1.strength.partial_cmp(&b.1.strength).unwrap_or(std::cmp::Ordering::Equal))
            .map(|(i, _)| i);
        if let Some(i) = weakest {
            if candidate.strength > self.slots[i].strength {
                self.slots[i] = candidate;
            }
        }
    }

    fn into_ranked(mut self) -> [TempoCandidate<T>; S] {
        self.slots[..self.len].sort_by(|a, b| {
            b.strength
                .partial_cmp(&a.strength)
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        self.slots
    }
}

/// Correlation-based BPM detector for a fixed series length.
#[derive(Clone, Debug)]
pub struct TempoDetector<T> {
    len: usize,
    frame_sample_rate: T,
    window: HannTable<T>,
    weighting: TempoWindow,
}

impl<T: Sample> TempoDetector<T> {
    /// `len` volumes per detection, each volume summarising `frame_size`
    /// samples of audio at `sample_rate`.
    pub fn new(len: usize, frame_size: usize, sample_rate: u32) -> CoreResult<Self> {
        if len < 2 {
            return Err(CoreError::InvalidCapacity);
        }
        if frame_size == 0 || sample_rate == 0 {
            return Err(CoreError::InvalidFrameRate(format!(
                "{} Hz over frames of {} samples",
                sample_rate, frame_size
            )));
        }
        Ok(Self {
            len,
            frame_sample_rate: cast::<T, _>(sample_rate) / cast::<T, _>(frame_size),
            window: HannTable::new(len),
            weighting: TempoWindow::default(),
        })
    }

    pub fn with_window(mut self, weighting: TempoWindow) -> Self {
        self.weighting = weighting;
        self
    }

    pub fn series_len(&self) -> usize {
        self.len
    }

    /// Volumes per second.
    pub fn frame_sample_rate(&self) -> T {
        self.frame_sample_rate
    }

    pub fn window(&self) -> TempoWindow {
        self.weighting
    }

    /// Replaces the series with its onset strength, in place. Index 0 has no
    /// predecessor and is left untouched.
    pub fn onset_strength(series: &mut [T]) {
        for n in (1..series.len()).rev() {
            series[n] = (series[n] - series[n - 1]).max(T::zero());
        }
    }

    /// Sweeps candidates in `[lower, upper)` and returns the `S` strongest
    /// local maxima, strongest first. The series is overwritten with its
    /// onset strength.
    pub fn detect_top<const S: usize>(
        &self,
        series: &mut [T],
        lower: u32,
        upper: u32,
    ) -> CoreResult<[TempoCandidate<T>; S]> {
        if series.len() != self.len {
            return Err(CoreError::size_mismatch("tempo series", self.len, series.len()));
        }
        if lower == 0 || lower >= upper {
            return Err(CoreError::InvalidTempoRange { lower, upper });
        }

        Self::onset_strength(series);

        let mut set = CandidateSet::<T, S>::new();
        let mut previous: Option<T> = None;
        let mut rising = false;
        for i in lower..upper {
            let result = self.correlate(series, i, lower);
            if let Some(prev) = previous {
                let slope = result - prev;
                if rising && slope <= T::zero() {
                    set.insert(TempoCandidate {
                        bpm: i - 1,
                        strength: prev,
                    });
                }
                rising = slope > T::zero();
            }
            previous = Some(result);
        }

        Ok(set.into_ranked())
    }

    /// Unnormalized correlation magnitude for candidate `i`.
    fn correlate(&self, onsets: &[T], i: u32, lower: u32) -> T {
        let ratio = cast::<T, _>(i) / cast::<T, _>(lower);
        let omega = -(T::PI() + T::PI()) * ratio / self.frame_sample_rate;
        let mut sum = Complex::new(T::zero(), T::zero());
        for (n, &x) in onsets.iter().enumerate() {
            if x == T::zero() {
                continue;
            }
            let weight = match self.weighting {
                TempoWindow::Hann => self.window.at(n),
                TempoWindow::Rectangular => T::one(),
            };
            sum = sum + Complex::from_polar(x * weight, omega * cast(n));
        }
        sum.norm()
    }
}
