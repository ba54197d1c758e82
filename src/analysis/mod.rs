pub mod sinks;
pub mod summary;

use anyhow::{Context, Result};
use indicatif::ProgressBar;
use std::fs::File;
use std::io::BufWriter;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use crate::audio::decode::AudioSource;
use crate::audio::resample::StreamResampler;
use crate::dsp::fft::TransformEngine;
use crate::dsp::tempo::{TempoDetector, TempoWindow};
use crate::pipeline::BufferPipeline;
use sinks::{SpectrumSink, TempoSink, VolumeSink};
use summary::{RunSummary, SpectrumSummary, TempoSummary};

/// Number of ranked tempo candidates kept per window.
pub const TEMPO_CANDIDATES: usize = 5;

#[derive(Clone, Debug)]
pub struct AnalysisSettings {
    pub fft_size: usize,
    /// Spectra per second; resamples the input to `frame_rate * fft_size` Hz.
    pub frame_rate: Option<u32>,
    pub flush_tail: bool,
    pub tempo_series_len: usize,
    pub tempo_frame_size: usize,
    pub tempo_lower: u32,
    pub tempo_upper: u32,
    pub tempo_window: TempoWindow,
}

impl AnalysisSettings {
    pub fn validate(&self) -> Result<()> {
        if self.fft_size < 2 || !self.fft_size.is_power_of_two() {
            anyhow::bail!("FFT size must be a power of two greater than 1, got {}", self.fft_size);
        }
        if self.frame_rate == Some(0) {
            anyhow::bail!("Frame rate must be positive");
        }
        if self.tempo_frame_size == 0 {
            anyhow::bail!("Tempo frame size must be positive");
        }
        if self.tempo_series_len < 2 {
            anyhow::bail!("Tempo series length must be at least 2, got {}", self.tempo_series_len);
        }
        if self.tempo_lower == 0 || self.tempo_lower >= self.tempo_upper {
            anyhow::bail!(
                "Tempo range [{}, {}) is empty or starts at zero",
                self.tempo_lower,
                self.tempo_upper
            );
        }
        Ok(())
    }
}

/// Output file locations for one input.
struct OutputPaths {
    dir: PathBuf,
    stem: String,
}

impl OutputPaths {
    fn new(input: &Path, dir: &Path) -> Self {
        let stem = input
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "audio".to_string());
        Self {
            dir: dir.to_path_buf(),
            stem,
        }
    }

    fn spectrum(&self, channel: usize) -> PathBuf {
        self.dir.join(format!("{}_fft_{}.bin", self.stem, channel))
    }

    fn tempo(&self) -> PathBuf {
        self.dir.join(format!("{}_tempo.bin", self.stem))
    }

    fn summary(&self) -> PathBuf {
        self.dir.join(format!("{}_summary.json", self.stem))
    }
}

fn create_output(path: &Path) -> Result<BufWriter<File>> {
    let file = File::create(path)
        .with_context(|| format!("Failed to create output file: {}", path.display()))?;
    Ok(BufWriter::new(file))
}

type SpectrumPipeline = BufferPipeline<f32, SpectrumSink<BufWriter<File>>>;
type VolumePipeline = BufferPipeline<f32, VolumeSink<BufWriter<File>, TEMPO_CANDIDATES>>;

/// Fans interleaved frames out to one spectrum pipeline per channel and a
/// mono volume pipeline.
struct Router<'a> {
    spectra: &'a [SpectrumPipeline],
    volume: &'a VolumePipeline,
}

impl Router<'_> {
    fn route(&self, interleaved: &[f32]) -> Result<()> {
        let channels = self.spectra.len();
        let scale = 1.0 / channels as f32;
        for frame in interleaved.chunks_exact(channels) {
            for (pipeline, &sample) in self.spectra.iter().zip(frame) {
                pipeline.write(sample);
            }
            self.volume.write(frame.iter().sum::<f32>() * scale);
        }
        Ok(())
    }
}

pub fn format_timestamp(ts: Duration) -> String {
    let total_ms = ts.as_millis();
    format!(
        "{:02}:{:02}.{:03}",
        total_ms / 60_000,
        (total_ms % 60_000) / 1000,
        total_ms % 1000
    )
}

/// `frame_rate * fft_size` when a frame rate is requested, else the source rate.
fn analysis_rate(source_rate: u32, settings: &AnalysisSettings) -> Result<u32> {
    let Some(rate) = settings.frame_rate else {
        return Ok(source_rate);
    };
    let fft_size = u32::try_from(settings.fft_size)
        .with_context(|| format!("FFT size {} does not fit a sample rate", settings.fft_size))?;
    rate.checked_mul(fft_size)
        .context("Frame rate times FFT size overflows the sample rate")
}

/// Decodes `input`, streams it through the spectrum and tempo pipelines and
/// writes the outputs plus a JSON summary into `out_dir`.
pub fn run(
    input: &Path,
    out_dir: &Path,
    settings: &AnalysisSettings,
    progress: &ProgressBar,
) -> Result<RunSummary> {
    settings.validate()?;
    std::fs::create_dir_all(out_dir)
        .with_context(|| format!("Failed to create output directory: {}", out_dir.display()))?;
    let paths = OutputPaths::new(input, out_dir);

    let source = AudioSource::open(input)?;
    let channels = source.channels();
    let source_rate = source.sample_rate();
    let analysis_rate = analysis_rate(source_rate, settings)?;
    let mut resampler = if analysis_rate != source_rate {
        Some(StreamResampler::new(source_rate, analysis_rate, channels)?)
    } else {
        None
    };

    let engine = Arc::new(TransformEngine::<f32>::new(settings.fft_size)?);
    let spectra = (0..channels)
        .map(|ch| -> Result<SpectrumPipeline> {
            let writer = create_output(&paths.spectrum(ch))?;
            let sink = SpectrumSink::new(Arc::clone(&engine), writer);
            Ok(BufferPipeline::new(settings.fft_size, sink)?)
        })
        .collect::<Result<Vec<_>>>()?;

    let detector = TempoDetector::<f32>::new(
        settings.tempo_series_len,
        settings.tempo_frame_size,
        analysis_rate,
    )?
    .with_window(settings.tempo_window);
    log::info!(
        "Analysing at {}Hz: {} spectra/s, {} volumes/s, {:?} tempo window",
        analysis_rate,
        analysis_rate as f64 / engine.size() as f64,
        detector.frame_sample_rate(),
        detector.window()
    );
    let series_len = detector.series_len();
    let tempo_sink = TempoSink::<_, TEMPO_CANDIDATES>::new(
        detector,
        settings.tempo_lower,
        settings.tempo_upper,
        create_output(&paths.tempo())?,
    );
    let tempo = BufferPipeline::new(series_len, tempo_sink)?;
    let volume: VolumePipeline = BufferPipeline::new(settings.tempo_frame_size, VolumeSink::new(tempo))?;

    let router = Router {
        spectra: &spectra,
        volume: &volume,
    };
    let frames_decoded = source.stream(|samples, ts| {
        progress.set_message(format_timestamp(ts));
        progress.tick();
        match resampler.as_mut() {
            Some(r) => r.push(samples, |out| router.route(out)),
            None => router.route(samples),
        }
    })?;
    if let Some(r) = resampler.as_mut() {
        r.finish(|out| router.route(out))?;
    }

    if settings.flush_tail {
        for pipeline in &spectra {
            pipeline.flush_partial();
        }
    }

    let mut records = Vec::with_capacity(channels);
    let mut max_magnitude = 0.0f32;
    for (ch, pipeline) in spectra.into_iter().enumerate() {
        pipeline
            .await_drain()
            .with_context(|| format!("Spectrum pipeline for channel {} failed", ch))?;
        log::debug!(
            "channel {}: {} chunks processed, pool of {} x {}",
            ch,
            pipeline.chunks_processed(),
            pipeline.pool_size(),
            pipeline.capacity()
        );
        let sink = pipeline
            .finish()
            .with_context(|| format!("Spectrum pipeline for channel {} failed", ch))?;
        let (_, stats) = sink.finish()?;
        records.push(stats.records);
        max_magnitude = max_magnitude.max(stats.max_magnitude);
    }

    let (volume_stats, _, tempo_stats) = volume
        .finish()
        .context("Volume pipeline failed")?
        .finish()?;

    let summary = RunSummary {
        input: paths.stem.clone(),
        source_sample_rate: source_rate,
        analysis_sample_rate: analysis_rate,
        channels,
        frames_decoded,
        spectrum: SpectrumSummary {
            fft_size: settings.fft_size,
            bins: engine.bins(),
            frame_rate: analysis_rate as f64 / settings.fft_size as f64,
            files: (0..channels).map(|ch| display_name(&paths.spectrum(ch))).collect(),
            records,
            max_magnitude,
        },
        tempo: TempoSummary {
            series_len: settings.tempo_series_len,
            frame_size: settings.tempo_frame_size,
            lower: settings.tempo_lower,
            upper: settings.tempo_upper,
            candidates: TEMPO_CANDIDATES,
            window: settings.tempo_window,
            file: display_name(&paths.tempo()),
            records: tempo_stats.records,
            volume_frames: volume_stats.frames,
            max_volume: volume_stats.max_volume,
            estimated_bpm: tempo_stats.dominant_bpm(),
            windows: tempo_stats.windows.iter().map(|w| w.to_vec()).collect(),
        },
    };

    summary.write_json(&paths.summary())?;
    log::info!("Summary written to {}", paths.summary().display());
    Ok(summary)
}

fn display_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn settings() -> AnalysisSettings {
        AnalysisSettings {
            fft_size: 256,
            frame_rate: None,
            flush_tail: false,
            tempo_series_len: 128,
            tempo_frame_size: 256,
            tempo_lower: 60,
            tempo_upper: 200,
            tempo_window: TempoWindow::Hann,
        }
    }

    /// 16-bit PCM WAV with the given interleaved samples.
    fn write_wav(path: &Path, channels: u16, sample_rate: u32, samples: &[f32]) {
        let data_len = (samples.len() * 2) as u32;
        let mut bytes = Vec::with_capacity(44 + data_len as usize);
        bytes.extend_from_slice(b"RIFF");
        bytes.extend_from_slice(&(36 + data_len).to_le_bytes());
        bytes.extend_from_slice(b"WAVEfmt ");
        bytes.extend_from_slice(&16u32.to_le_bytes());
        bytes.extend_from_slice(&1u16.to_le_bytes());
        bytes.extend_from_slice(&channels.to_le_bytes());
        bytes.extend_from_slice(&sample_rate.to_le_bytes());
        bytes.extend_from_slice(&(sample_rate * channels as u32 * 2).to_le_bytes());
        bytes.extend_from_slice(&(channels * 2).to_le_bytes());
        bytes.extend_from_slice(&16u16.to_le_bytes());
        bytes.extend_from_slice(b"data");
        bytes.extend_from_slice(&data_len.to_le_bytes());
        for &s in samples {
            let v = (s.clamp(-1.0, 1.0) * i16::MAX as f32) as i16;
            bytes.extend_from_slice(&v.to_le_bytes());
        }
        std::fs::write(path, bytes).unwrap();
    }

    #[test]
    fn validate_rejects_bad_settings() {
        assert!(settings().validate().is_ok());
        let bad = [
            AnalysisSettings { fft_size: 1000, ..settings() },
            AnalysisSettings { frame_rate: Some(0), ..settings() },
            AnalysisSettings { tempo_frame_size: 0, ..settings() },
            AnalysisSettings { tempo_series_len: 1, ..settings() },
            AnalysisSettings { tempo_lower: 200, ..settings() },
            AnalysisSettings { tempo_lower: 0, ..settings() },
        ];
        for s in bad {
            assert!(s.validate().is_err(), "{:?}", s);
        }
    }

    #[test]
    fn analysis_rate_follows_frame_rate() {
        assert_eq!(analysis_rate(44_100, &settings()).unwrap(), 44_100);
        let framed = AnalysisSettings { frame_rate: Some(30), ..settings() };
        assert_eq!(analysis_rate(44_100, &framed).unwrap(), 7680);
        let huge = AnalysisSettings { frame_rate: Some(2), fft_size: usize::MAX, ..settings() };
        assert!(analysis_rate(44_100, &huge).is_err());
    }

    #[test]
    fn timestamps_render_as_minutes_seconds_millis() {
        assert_eq!(format_timestamp(Duration::from_millis(83_042)), "01:23.042");
        assert_eq!(format_timestamp(Duration::ZERO), "00:00.000");
    }

    #[test]
    fn stereo_wav_produces_spectra_tempo_and_summary() {
        let dir = tempfile::tempdir().unwrap();
        let input = dir.path().join("clicks.wav");
        let sample_rate = 7680; // 30 volumes per second with 256-sample frames
        let seconds = 6;
        let mut samples = Vec::new();
        for n in 0..sample_rate * seconds {
            // A short burst every half second on the left, a steady tone on the right.
            let left = if n % (sample_rate / 2) < 256 { 0.8 } else { 0.0 };
            let right = 0.25 * (2.0 * std::f32::consts::PI * 480.0 * n as f32 / sample_rate as f32).sin();
            samples.push(left);
            samples.push(right);
        }
        write_wav(&input, 2, sample_rate, &samples);

        let out = dir.path().join("out");
        let summary = run(&input, &out, &settings(), &ProgressBar::hidden()).unwrap();

        let frames = (sample_rate * seconds) as u64;
        assert_eq!(summary.channels, 2);
        assert_eq!(summary.frames_decoded, frames);
        assert_eq!(summary.spectrum.records, vec![frames / 256, frames / 256]);
        assert_eq!(summary.tempo.volume_frames, frames / 256);
        assert_eq!(summary.tempo.records, frames / 256 / 128);
        assert!(summary.max_magnitude() > 0.0);
        assert!(summary.tempo.max_volume > 0.0);

        let fft_len = std::fs::metadata(out.join("clicks.wav_fft_0.bin")).unwrap().len();
        assert_eq!(fft_len, frames / 256 * 129 * 4);
        let tempo_len = std::fs::metadata(out.join("clicks.wav_tempo.bin")).unwrap().len();
        assert_eq!(tempo_len, summary.tempo.records * TEMPO_CANDIDATES as u64 * 4);
        assert!(out.join("clicks.wav_summary.json").exists());
    }

    #[test]
    fn frame_rate_resamples_to_fft_multiples() {
        let dir = tempfile::tempdir().unwrap();
        let input = dir.path().join("tone.wav");
        let source_rate = 8000;
        let seconds = 6;
        let mut samples = Vec::new();
        for n in 0..source_rate * seconds {
            let t = n as f32 / source_rate as f32;
            let tone = 0.3 * (2.0 * std::f32::consts::PI * 440.0 * t).sin();
            samples.push(tone);
            samples.push(-tone);
        }
        write_wav(&input, 2, source_rate, &samples);

        let framed = AnalysisSettings { frame_rate: Some(30), ..settings() };
        let out = dir.path().join("out");
        let summary = run(&input, &out, &framed, &ProgressBar::hidden()).unwrap();

        // 48000 frames at 8 kHz become 46080 frames at 30 * 256 Hz.
        assert_eq!(summary.source_sample_rate, 8000);
        assert_eq!(summary.analysis_sample_rate, 7680);
        assert_eq!(summary.spectrum.records, vec![180, 180]);
        assert_eq!(summary.tempo.volume_frames, 180);
        assert_eq!(summary.tempo.records, 1);
        assert!((summary.spectrum.frame_rate - 30.0).abs() < 1e-9);
    }
}
