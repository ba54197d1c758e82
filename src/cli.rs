use clap::Parser;
use std::path::PathBuf;

use crate::config::{
    DEFAULT_FFT_SIZE, DEFAULT_FRAME_SIZE, DEFAULT_OUTPUT_DIR, DEFAULT_SERIES_LEN, DEFAULT_TEMPO_LOWER,
    DEFAULT_TEMPO_UPPER,
};
use crate::dsp::tempo::TempoWindow;

#[derive(Parser, Debug)]
#[command(name = "spectempo", about = "Streaming spectrum and tempo feature extractor")]
pub struct Cli {
    /// Input audio file (WAV, MP3, FLAC, OGG)
    pub input: PathBuf,

    /// Directory receiving the spectrum, tempo and summary files
    #[arg(short, long, default_value = DEFAULT_OUTPUT_DIR)]
    pub output: PathBuf,

    /// Config file (defaults to spectempo.toml or the user config directory)
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// FFT size in samples (power of two)
    #[arg(short = 'n', long, default_value_t = DEFAULT_FFT_SIZE)]
    pub fft_size: usize,

    /// Spectra per second; resamples the input to frame-rate * fft-size Hz
    #[arg(short, long)]
    pub frame_rate: Option<u32>,

    /// Zero-pad and analyse the last partial spectrum chunk
    #[arg(long)]
    pub flush_tail: bool,

    /// Volumes per tempo detection window
    #[arg(long, default_value_t = DEFAULT_SERIES_LEN)]
    pub tempo_series_len: usize,

    /// Samples summarised by one volume value
    #[arg(long, default_value_t = DEFAULT_FRAME_SIZE)]
    pub tempo_frame_size: usize,

    /// Lowest tempo candidate. Candidates are swept relative to this bound,
    /// so 60 makes candidate values read as beats per minute
    #[arg(long, default_value_t = DEFAULT_TEMPO_LOWER)]
    pub tempo_lower: u32,

    /// Upper tempo candidate bound (exclusive)
    #[arg(long, default_value_t = DEFAULT_TEMPO_UPPER)]
    pub tempo_upper: u32,

    /// Weighting of onset terms in the tempo correlation
    #[arg(long, value_enum, default_value_t = TempoWindow::Hann)]
    pub tempo_window: TempoWindow,

    /// Hide the progress spinner
    #[arg(long)]
    pub no_progress: bool,
}
