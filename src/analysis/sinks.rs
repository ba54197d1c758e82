//! Chunk sinks that turn full pipeline chunks into output records.
//!
//! Records are written in encounter order as raw native-endian arrays:
//! `f32 x (N/2 + 1)` per spectrum and `i32 x S` per tempo window.

use anyhow::{Context, Result};
use serde::Serialize;
use std::io::Write;
use std::sync::Arc;

use crate::dsp::fft::TransformEngine;
use crate::dsp::tempo::{TempoCandidate, TempoDetector};
use crate::pipeline::{BufferPipeline, ChunkSink};

/// Running extrema and record counts of one spectrum output.
#[derive(Clone, Copy, Debug, Default, Serialize)]
pub struct SpectrumStats {
    pub records: u64,
    pub max_magnitude: f32,
}

/// Transforms each chunk of one channel and writes its magnitude spectrum.
pub struct SpectrumSink<W> {
    engine: Arc<TransformEngine<f32>>,
    spectrum: Vec<f32>,
    writer: W,
    stats: SpectrumStats,
}

impl<W: Write + Send + 'static> SpectrumSink<W> {
    pub fn new(engine: Arc<TransformEngine<f32>>, writer: W) -> Self {
        let spectrum = vec![0.0; engine.bins()];
        Self {
            engine,
            spectrum,
            writer,
            stats: SpectrumStats::default(),
        }
    }

    pub fn finish(mut self) -> Result<(W, SpectrumStats)> {
        self.writer.flush().context("Failed to flush spectrum output")?;
        Ok((self.writer, self.stats))
    }
}

impl<W: Write + Send + 'static> ChunkSink<f32> for SpectrumSink<W> {
    fn consume(&mut self, chunk: &mut [f32]) -> Result<()> {
        self.engine.transform(chunk, &mut self.spectrum)?;
        self.writer
            .write_all(bytemuck::cast_slice(self.spectrum.as_slice()))
            .context("Failed to write spectrum record")?;
        self.stats.records += 1;
        self.stats.max_magnitude = self
            .spectrum
            .iter()
            .copied()
            .fold(self.stats.max_magnitude, f32::max);
        Ok(())
    }
}

/// Statistics of one tempo output.
#[derive(Clone, Debug, Serialize)]
pub struct TempoStats<const S: usize> {
    pub records: u64,
    /// Candidates of every analysed window, strongest first.
    #[serde(skip)]
    pub windows: Vec<[TempoCandidate<f32>; S]>,
}

impl<const S: usize> TempoStats<S> {
    /// Most frequent best candidate across windows; ties go to the lower BPM.
    pub fn dominant_bpm(&self) -> Option<u32> {
        let mut counts = std::collections::BTreeMap::<u32, usize>::new();
        for window in &self.windows {
            if let Some(best) = window.first().filter(|c| c.bpm != 0) {
                *counts.entry(best.bpm).or_default() += 1;
            }
        }
        counts
            .into_iter()
            .fold(None, |best: Option<(u32, usize)>, (bpm, n)| match best {
                Some((_, m)) if m >= n => best,
                _ => Some((bpm, n)),
            })
            .map(|(bpm, _)| bpm)
    }
}

/// Runs tempo detection over each full series of volumes.
pub struct TempoSink<W, const S: usize> {
    detector: TempoDetector<f32>,
    lower: u32,
    upper: u32,
    writer: W,
    stats: TempoStats<S>,
}

impl<W: Write + Send + 'static, const S: usize> TempoSink<W, S> {
    pub fn new(detector: TempoDetector<f32>, lower: u32, upper: u32, writer: W) -> Self {
        Self {
            detector,
            lower,
            upper,
            writer,
            stats: TempoStats {
                records: 0,
                windows: Vec::new(),
            },
        }
    }

    pub fn finish(mut self) -> Result<(W, TempoStats<S>)> {
        self.writer.flush().context("Failed to flush tempo output")?;
        Ok((self.writer, self.stats))
    }
}

impl<W: Write + Send + 'static, const S: usize> ChunkSink<f32> for TempoSink<W, S> {
    fn consume(&mut self, chunk: &mut [f32]) -> Result<()> {
        let candidates = self.detector.detect_top::<S>(chunk, self.lower, self.upper)?;
        let record = candidates.map(|c| c.bpm as i32);
        self.writer
            .write_all(bytemuck::cast_slice(record.as_slice()))
            .context("Failed to write tempo record")?;
        log::debug!(
            "tempo window {}: {:?}",
            self.stats.records,
            candidates.iter().map(|c| c.bpm).collect::<Vec<_>>()
        );
        self.stats.records += 1;
        self.stats.windows.push(candidates);
        Ok(())
    }
}

/// Statistics of the volume series feeding the tempo detector.
#[derive(Clone, Copy, Debug, Default, Serialize)]
pub struct VolumeStats {
    pub frames: u64,
    pub max_volume: f32,
}

/// Reduces each frame of mono samples to its RMS volume and forwards the
/// volume into the nested tempo pipeline.
pub struct VolumeSink<W, const S: usize> {
    tempo: BufferPipeline<f32, TempoSink<W, S>>,
    stats: VolumeStats,
}

impl<W: Write + Send + 'static, const S: usize> VolumeSink<W, S> {
    pub fn new(tempo: BufferPipeline<f32, TempoSink<W, S>>) -> Self {
        Self {
            tempo,
            stats: VolumeStats::default(),
        }
    }

    /// Drains the nested tempo pipeline and returns both sinks' results.
    pub fn finish(self) -> Result<(VolumeStats, W, TempoStats<S>)> {
        let tempo = self.tempo.finish().context("Tempo pipeline failed")?;
        let (writer, tempo_stats) = tempo.finish()?;
        Ok((self.stats, writer, tempo_stats))
    }
}

impl<W: Write + Send + 'static, const S: usize> ChunkSink<f32> for VolumeSink<W, S> {
    fn consume(&mut self, chunk: &mut [f32]) -> Result<()> {
        let volume = rms(chunk);
        self.stats.frames += 1;
        self.stats.max_volume = self.stats.max_volume.max(volume);
        self.tempo.write(volume);
        Ok(())
    }
}

pub fn rms(samples: &[f32]) -> f32 {
    if samples.is_empty() {
        return 0.0;
    }
    (samples.iter().map(|s| s * s).sum::<f32>() / samples.len() as f32).sqrt()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn read_f32s(bytes: &[u8]) -> Vec<f32> {
        bytes
            .chunks_exact(4)
            .map(|b| f32::from_ne_bytes([b[0], b[1], b[2], b[3]]))
            .collect()
    }

    fn read_i32s(bytes: &[u8]) -> Vec<i32> {
        bytes
            .chunks_exact(4)
            .map(|b| i32::from_ne_bytes([b[0], b[1], b[2], b[3]]))
            .collect()
    }

    #[test]
    fn spectrum_sink_writes_fixed_size_records() {
        let engine = Arc::new(TransformEngine::new(8).unwrap());
        let mut sink = SpectrumSink::new(engine, Vec::<u8>::new());
        let mut tone: Vec<f32> = (0..8)
            .map(|n| (2.0 * std::f32::consts::PI * 2.0 * n as f32 / 8.0).cos())
            .collect();
        sink.consume(&mut tone).unwrap();
        sink.consume(&mut [0.0; 8]).unwrap();

        let (bytes, stats) = sink.finish().unwrap();
        let values = read_f32s(&bytes);
        assert_eq!(values.len(), 2 * 5);
        assert_eq!(stats.records, 2);
        assert!((stats.max_magnitude - 2.0).abs() < 1e-5);
        assert!((values[2] - 2.0).abs() < 1e-5);
        assert!(values[5..].iter().all(|&v| v == 0.0));
    }

    #[test]
    fn spectrum_sink_rejects_wrong_chunk_size() {
        let engine = Arc::new(TransformEngine::new(8).unwrap());
        let mut sink = SpectrumSink::new(engine, Vec::<u8>::new());
        assert!(sink.consume(&mut [0.0; 4]).is_err());
    }

    #[test]
    fn tempo_sink_records_candidate_bpms() {
        let detector = TempoDetector::new(256, 1024, 30 * 1024).unwrap();
        let mut sink = TempoSink::<_, 2>::new(detector, 60, 200, Vec::<u8>::new());
        let mut series: Vec<f32> = (0..256).map(|n| if n % 15 == 5 { 1.0 } else { 0.0 }).collect();
        sink.consume(&mut series).unwrap();

        let (bytes, stats) = sink.finish().unwrap();
        let record = read_i32s(&bytes);
        assert_eq!(record.len(), 2);
        assert_eq!(record[0], 120);
        assert_eq!(stats.records, 1);
        assert_eq!(stats.dominant_bpm(), Some(120));
    }

    #[test]
    fn dominant_bpm_prefers_most_frequent() {
        let c = |bpm| TempoCandidate { bpm, strength: 1.0 };
        let stats = TempoStats::<1> {
            records: 4,
            windows: vec![[c(128)], [c(120)], [c(128)], [c(0)]],
        };
        assert_eq!(stats.dominant_bpm(), Some(128));
        let empty = TempoStats::<1> {
            records: 0,
            windows: Vec::new(),
        };
        assert_eq!(empty.dominant_bpm(), None);
    }

    #[test]
    fn volume_sink_feeds_the_tempo_pipeline() {
        let detector = TempoDetector::new(4, 2, 8).unwrap();
        let tempo = BufferPipeline::new(4, TempoSink::<_, 1>::new(detector, 1, 3, Vec::<u8>::new())).unwrap();
        let mut sink = VolumeSink::new(tempo);
        for level in [0.0, 0.5, 1.0, 0.5, 0.25] {
            sink.consume(&mut [level, -level]).unwrap();
        }

        let (volume, bytes, tempo_stats) = sink.finish().unwrap();
        assert_eq!(volume.frames, 5);
        assert!((volume.max_volume - 1.0).abs() < 1e-6);
        assert_eq!(tempo_stats.records, 1);
        assert_eq!(bytes.len(), 4);
    }

    #[test]
    fn rms_of_square_wave() {
        assert_eq!(rms(&[]), 0.0);
        assert!((rms(&[0.5, -0.5, 0.5, -0.5]) - 0.5).abs() < 1e-6);
    }
}
