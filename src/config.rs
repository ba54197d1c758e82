use serde::Deserialize;
use std::path::{Path, PathBuf};

use crate::cli::Cli;
use crate::dsp::tempo::TempoWindow;

pub const DEFAULT_OUTPUT_DIR: &str = ".";
pub const DEFAULT_FFT_SIZE: usize = 1024;
pub const DEFAULT_SERIES_LEN: usize = 1024;
pub const DEFAULT_FRAME_SIZE: usize = 1024;
pub const DEFAULT_TEMPO_LOWER: u32 = 60;
pub const DEFAULT_TEMPO_UPPER: u32 = 240;

#[derive(Debug, Default, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub spectrum: SpectrumConfig,
    #[serde(default)]
    pub tempo: TempoConfig,
    #[serde(default)]
    pub output: OutputConfig,
}

#[derive(Debug, Deserialize)]
pub struct SpectrumConfig {
    #[serde(default = "default_fft_size")]
    pub fft_size: usize,
    #[serde(default)]
    pub frame_rate: Option<u32>,
    #[serde(default)]
    pub flush_tail: bool,
}

#[derive(Debug, Deserialize)]
pub struct TempoConfig {
    #[serde(default = "default_series_len")]
    pub series_len: usize,
    #[serde(default = "default_frame_size")]
    pub frame_size: usize,
    #[serde(default = "default_lower")]
    pub lower: u32,
    #[serde(default = "default_upper")]
    pub upper: u32,
    #[serde(default)]
    pub window: TempoWindow,
}

#[derive(Debug, Default, Deserialize)]
pub struct OutputConfig {
    #[serde(default)]
    pub dir: Option<PathBuf>,
}

impl Default for SpectrumConfig {
    fn default() -> Self {
        Self {
            fft_size: default_fft_size(),
            frame_rate: None,
            flush_tail: false,
        }
    }
}

impl Default for TempoConfig {
    fn default() -> Self {
        Self {
            series_len: default_series_len(),
            frame_size: default_frame_size(),
            lower: default_lower(),
            upper: default_upper(),
            window: TempoWindow::default(),
        }
    }
}

fn default_fft_size() -> usize { DEFAULT_FFT_SIZE }
fn default_series_len() -> usize { DEFAULT_SERIES_LEN }
fn default_frame_size() -> usize { DEFAULT_FRAME_SIZE }
fn default_lower() -> u32 { DEFAULT_TEMPO_LOWER }
fn default_upper() -> u32 { DEFAULT_TEMPO_UPPER }

impl Config {
    /// Merge: config values apply only where the CLI is at its default.
    pub fn apply_to(self, cli: &mut Cli) {
        if cli.output.as_os_str() == DEFAULT_OUTPUT_DIR {
            if let Some(dir) = self.output.dir {
                cli.output = dir;
            }
        }
        if cli.fft_size == DEFAULT_FFT_SIZE { cli.fft_size = self.spectrum.fft_size; }
        if cli.frame_rate.is_none() { cli.frame_rate = self.spectrum.frame_rate; }
        if !cli.flush_tail { cli.flush_tail = self.spectrum.flush_tail; }
        if cli.tempo_series_len == DEFAULT_SERIES_LEN { cli.tempo_series_len = self.tempo.series_len; }
        if cli.tempo_frame_size == DEFAULT_FRAME_SIZE { cli.tempo_frame_size = self.tempo.frame_size; }
        if cli.tempo_lower == DEFAULT_TEMPO_LOWER { cli.tempo_lower = self.tempo.lower; }
        if cli.tempo_upper == DEFAULT_TEMPO_UPPER { cli.tempo_upper = self.tempo.upper; }
        if cli.tempo_window == TempoWindow::default() { cli.tempo_window = self.tempo.window; }
    }
}

pub fn load_config(path: &Path) -> Option<Config> {
    let content = std::fs::read_to_string(path).ok()?;
    match toml::from_str(&content) {
        Ok(config) => Some(config),
        Err(err) => {
            log::warn!("Invalid config {}: {}", path.display(), err);
            None
        }
    }
}

/// Explicit path, else `./spectempo.toml`, else the user config directories.
pub fn discover(explicit: Option<&Path>) -> Option<PathBuf> {
    if let Some(path) = explicit {
        return Some(path.to_path_buf());
    }
    let local = PathBuf::from("spectempo.toml");
    if local.exists() {
        return Some(local);
    }
    if let Some(home) = dirs::home_dir() {
        let xdg = home.join(".config").join("spectempo").join("config.toml");
        if xdg.exists() {
            return Some(xdg);
        }
    }
    if let Some(config_dir) = dirs::config_dir() {
        let platform = config_dir.join("spectempo").join("config.toml");
        if platform.exists() {
            return Some(platform);
        }
    }
    None
}
