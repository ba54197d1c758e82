use anyhow::{Context, Result};
use serde::Serialize;
use std::path::Path;

use crate::dsp::tempo::{TempoCandidate, TempoWindow};

/// Parameters and observed extrema of one analysis run.
#[derive(Debug, Serialize)]
pub struct RunSummary {
    pub input: String,
    pub source_sample_rate: u32,
    pub analysis_sample_rate: u32,
    pub channels: usize,
    pub frames_decoded: u64,
    pub spectrum: SpectrumSummary,
    pub tempo: TempoSummary,
}

#[derive(Debug, Serialize)]
pub struct SpectrumSummary {
    pub fft_size: usize,
    pub bins: usize,
    /// Spectra per second of audio.
    pub frame_rate: f64,
    pub files: Vec<String>,
    pub records: Vec<u64>,
    pub max_magnitude: f32,
}

#[derive(Debug, Serialize)]
pub struct TempoSummary {
    pub series_len: usize,
    pub frame_size: usize,
    pub lower: u32,
    pub upper: u32,
    pub candidates: usize,
    pub window: TempoWindow,
    pub file: String,
    pub records: u64,
    pub volume_frames: u64,
    pub max_volume: f32,
    pub estimated_bpm: Option<u32>,
    pub windows: Vec<Vec<TempoCandidate<f32>>>,
}

impl RunSummary {
    pub fn write_json(&self, path: &Path) -> Result<()> {
        let json = serde_json::to_string_pretty(self).context("Failed to serialize summary")?;
        std::fs::write(path, json)
            .with_context(|| format!("Failed to write summary: {}", path.display()))
    }

    /// Largest magnitude over every channel's spectra.
    pub fn max_magnitude(&self) -> f32 {
        self.spectrum.max_magnitude
    }
}
