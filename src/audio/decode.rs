use anyhow::{Context, Result};
use std::path::Path;
use std::time::Duration;
use symphonia::core::audio::SampleBuffer;
use symphonia::core::codecs::{Decoder, DecoderOptions};
use symphonia::core::formats::{FormatOptions, FormatReader};
use symphonia::core::io::MediaSourceStream;
use symphonia::core::meta::MetadataOptions;
use symphonia::core::probe::Hint;

/// Decoded audio delivered packet by packet as interleaved f32 frames.
pub struct AudioSource {
    format: Box<dyn FormatReader>,
    decoder: Box<dyn Decoder>,
    track_id: u32,
    channels: usize,
    sample_rate: u32,
}

impl AudioSource {
    pub fn open(path: &Path) -> Result<Self> {
        let file = std::fs::File::open(path)
            .with_context(|| format!("Failed to open audio file: {}", path.display()))?;

        let mss = MediaSourceStream::new(Box::new(file), Default::default());

        let mut hint = Hint::new();
        if let Some(ext) = path.extension().and_then(|e| e.to_str()) {
            hint.with_extension(ext);
        }

        let probed = symphonia::default::get_probe()
            .format(&hint, mss, &FormatOptions::default(), &MetadataOptions::default())
            .context("Failed to probe audio format")?;

        let format = probed.format;

        let track = format
            .tracks()
            .iter()
            .find(|t| t.codec_params.codec != symphonia::core::codecs::CODEC_TYPE_NULL)
            .context("No audio tracks found")?;

        let track_id = track.id;
        let channels = track.codec_params.channels.map_or(1, |c| c.count());
        if channels == 0 {
            anyhow::bail!("Audio track has no channels: {}", path.display());
        }
        let sample_rate = track.codec_params.sample_rate.context("Unknown sample rate")?;

        let decoder = symphonia::default::get_codecs()
            .make(&track.codec_params, &DecoderOptions::default())
            .context("Failed to create audio decoder")?;

        log::info!("Opened {}: {} channel(s), {}Hz", path.display(), channels, sample_rate);

        Ok(Self {
            format,
            decoder,
            track_id,
            channels,
            sample_rate,
        })
    }

    pub fn channels(&self) -> usize {
        self.channels
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    /// Hands every decoded packet to `on_frames` as interleaved samples along
    /// with the media time of its first frame, until the source is exhausted.
    /// Returns the number of frames delivered.
    pub fn stream<F>(mut self, mut on_frames: F) -> Result<u64>
    where
        F: FnMut(&[f32], Duration) -> Result<()>,
    {
        let mut frames_delivered: u64 = 0;

        loop {
            let packet = match self.format.next_packet() {
                Ok(packet) => packet,
                Err(symphonia::core::errors::Error::IoError(ref e))
                    if e.kind() == std::io::ErrorKind::UnexpectedEof =>
                {
                    break;
                }
                Err(e) => return Err(e).context("Failed to read packet"),
            };

            if packet.track_id() != self.track_id {
                continue;
            }

            let decoded = match self.decoder.decode(&packet) {
                Ok(d) => d,
                Err(symphonia::core::errors::Error::DecodeError(msg)) => {
                    log::warn!("Skipping undecodable packet: {}", msg);
                    continue;
                }
                Err(e) => return Err(e).context("Failed to decode packet"),
            };

            let spec = *decoded.spec();
            let num_frames = decoded.frames();

            let mut sample_buf = SampleBuffer::<f32>::new(num_frames as u64, spec);
            sample_buf.copy_interleaved_ref(decoded);

            let samples = sample_buf.samples();
            if samples.is_empty() {
                continue;
            }

            let timestamp = Duration::from_secs_f64(frames_delivered as f64 / self.sample_rate as f64);
            on_frames(samples, timestamp)?;
            frames_delivered += (samples.len() / self.channels.max(1)) as u64;
        }

        log::info!(
            "Decoded audio: {} frames, {}Hz, {:.1}s",
            frames_delivered,
            self.sample_rate,
            frames_delivered as f64 / self.sample_rate as f64
        );

        Ok(frames_delivered)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// 16-bit PCM WAV header followed by `frames` frames of silence.
    fn wav_bytes(channels: u16, sample_rate: u32, frames: u32) -> Vec<u8> {
        let block_align = channels * 2;
        let data_len = frames * block_align as u32;
        let mut bytes = Vec::new();
        bytes.extend_from_slice(b"RIFF");
        bytes.extend_from_slice(&(36 + data_len).to_le_bytes());
        bytes.extend_from_slice(b"WAVEfmt ");
        bytes.extend_from_slice(&16u32.to_le_bytes());
        bytes.extend_from_slice(&1u16.to_le_bytes());
        bytes.extend_from_slice(&channels.to_le_bytes());
        bytes.extend_from_slice(&sample_rate.to_le_bytes());
        bytes.extend_from_slice(&(sample_rate * block_align as u32).to_le_bytes());
        bytes.extend_from_slice(&block_align.to_le_bytes());
        bytes.extend_from_slice(&16u16.to_le_bytes());
        bytes.extend_from_slice(b"data");
        bytes.extend_from_slice(&data_len.to_le_bytes());
        bytes.resize(44 + data_len as usize, 0);
        bytes
    }

    #[test]
    fn streams_every_frame_with_timestamps() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("silence.wav");
        std::fs::write(&path, wav_bytes(2, 8000, 8000)).unwrap();

        let source = AudioSource::open(&path).unwrap();
        assert_eq!(source.channels(), 2);
        assert_eq!(source.sample_rate(), 8000);

        let mut samples = 0;
        let mut last = Duration::ZERO;
        let frames = source
            .stream(|chunk, ts| {
                assert!(ts >= last);
                last = ts;
                samples += chunk.len();
                Ok(())
            })
            .unwrap();
        assert_eq!(frames, 8000);
        assert_eq!(samples, 16_000);
    }

    #[test]
    fn track_without_channels_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("empty.wav");
        std::fs::write(&path, wav_bytes(0, 8000, 0)).unwrap();
        assert!(AudioSource::open(&path).is_err());
    }
}
