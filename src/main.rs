mod analysis;
mod audio;
mod cli;
mod config;
mod dsp;
mod error;
mod pipeline;

use anyhow::Result;
use clap::Parser;
use indicatif::{ProgressBar, ProgressStyle};
use std::time::Duration;

use analysis::AnalysisSettings;
use cli::Cli;

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .format_timestamp_millis()
        .init();

    let mut cli = Cli::parse();

    if let Some(ref path) = config::discover(cli.config.as_deref()) {
        if let Some(cfg) = config::load_config(path) {
            log::info!("Loaded config from {}", path.display());
            cfg.apply_to(&mut cli);
        } else {
            log::warn!("Failed to load config from {}", path.display());
        }
    }

    let input = &cli.input;
    if !input.exists() {
        anyhow::bail!("Input file not found: {}", input.display());
    }

    let settings = AnalysisSettings {
        fft_size: cli.fft_size,
        frame_rate: cli.frame_rate,
        flush_tail: cli.flush_tail,
        tempo_series_len: cli.tempo_series_len,
        tempo_frame_size: cli.tempo_frame_size,
        tempo_lower: cli.tempo_lower,
        tempo_upper: cli.tempo_upper,
        tempo_window: cli.tempo_window,
    };
    settings.validate()?;

    log::info!("spectempo - streaming spectrum and tempo extractor");
    log::info!("Input: {}", input.display());
    log::info!("Output: {}", cli.output.display());
    log::info!(
        "FFT size: {}, tempo window: {} volumes of {} samples, range [{}, {})",
        settings.fft_size,
        settings.tempo_series_len,
        settings.tempo_frame_size,
        settings.tempo_lower,
        settings.tempo_upper
    );

    let pb = if cli.no_progress {
        ProgressBar::hidden()
    } else {
        let pb = ProgressBar::new_spinner();
        pb.set_style(ProgressStyle::default_spinner().template("[{elapsed_precise}] {spinner} decoded {msg}")?);
        pb.enable_steady_tick(Duration::from_millis(120));
        pb
    };

    let summary = analysis::run(input, &cli.output, &settings, &pb)?;
    pb.finish_with_message("done");

    println!("Max FFT Value: {}", summary.max_magnitude());
    match summary.tempo.estimated_bpm {
        Some(bpm) => println!("Estimated tempo: {} BPM", bpm),
        None => println!("Estimated tempo: n/a ({} windows)", summary.tempo.records),
    }

    log::info!("Done! Output: {}", cli.output.display());
    Ok(())
}
