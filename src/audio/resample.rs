use anyhow::{Context, Result};
use rubato::{
    Resampler, SincFixedIn, SincInterpolationParameters, SincInterpolationType, WindowFunction,
};

const CHUNK_FRAMES: usize = 1024;

/// Streaming sample-rate converter over interleaved frames.
///
/// Input is buffered per channel until the resampler's next chunk is
/// available; converted frames are handed out interleaved again. The filter
/// delay is trimmed from the start and the total output is capped at
/// `round(input_frames * ratio)`, so the zero padding rubato feeds itself at
/// the end never reaches the caller.
pub struct StreamResampler {
    inner: SincFixedIn<f32>,
    channels: usize,
    ratio: f64,
    pending: Vec<Vec<f32>>,
    interleaved: Vec<f32>,
    frames_in: u64,
    frames_out: u64,
    delay: usize,
}

impl StreamResampler {
    pub fn new(from_rate: u32, to_rate: u32, channels: usize) -> Result<Self> {
        if channels == 0 {
            anyhow::bail!("Cannot resample a stream without channels");
        }

        let params = SincInterpolationParameters {
            sinc_len: 256,
            f_cutoff: 0.95,
            interpolation: SincInterpolationType::Linear,
            oversampling_factor: 256,
            window: WindowFunction::BlackmanHarris2,
        };

        let ratio = to_rate as f64 / from_rate as f64;
        let inner = SincFixedIn::<f32>::new(ratio, 2.0, params, CHUNK_FRAMES, channels)
            .context("Failed to create resampler")?;
        let delay = inner.output_delay();

        log::info!("Resampling {}Hz -> {}Hz", from_rate, to_rate);

        Ok(Self {
            inner,
            channels,
            ratio,
            pending: vec![Vec::with_capacity(CHUNK_FRAMES * 2); channels],
            interleaved: Vec::new(),
            frames_in: 0,
            frames_out: 0,
            delay,
        })
    }

    /// Queues interleaved input and emits every chunk that became complete.
    pub fn push<F>(&mut self, input: &[f32], mut emit: F) -> Result<()>
    where
        F: FnMut(&[f32]) -> Result<()>,
    {
        for frame in input.chunks_exact(self.channels) {
            for (channel, &sample) in self.pending.iter_mut().zip(frame) {
                channel.push(sample);
            }
            self.frames_in += 1;
        }

        loop {
            let needed = self.inner.input_frames_next();
            if self.pending[0].len() < needed {
                return Ok(());
            }
            let output = {
                let block: Vec<&[f32]> = self.pending.iter().map(|c| &c[..needed]).collect();
                self.inner.process(block.as_slice(), None).context("Resampling failed")?
            };
            for channel in &mut self.pending {
                channel.drain(..needed);
            }
            self.deliver(&output, &mut emit)?;
        }
    }

    /// Converts whatever input is still buffered and flushes the filter
    /// until every expected output frame was emitted.
    pub fn finish<F>(&mut self, mut emit: F) -> Result<()>
    where
        F: FnMut(&[f32]) -> Result<()>,
    {
        if !self.pending[0].is_empty() {
            let output = {
                let block: Vec<&[f32]> = self.pending.iter().map(|c| c.as_slice()).collect();
                self.inner
                    .process_partial(Some(block.as_slice()), None)
                    .context("Resampling failed")?
            };
            for channel in &mut self.pending {
                channel.clear();
            }
            self.deliver(&output, &mut emit)?;
        }

        while self.frames_out < self.expected_frames() {
            let output = self
                .inner
                .process_partial(None::<&[Vec<f32>]>, None)
                .context("Resampling failed")?;
            if output.first().map_or(true, Vec::is_empty) {
                break;
            }
            self.deliver(&output, &mut emit)?;
        }
        Ok(())
    }

    /// Output frames the input pushed so far converts to.
    pub fn expected_frames(&self) -> u64 {
        (self.frames_in as f64 * self.ratio).round() as u64
    }

    /// Interleaves `planar` minus the outstanding filter delay and anything
    /// past the expected length, then hands it to `emit`.
    fn deliver<F>(&mut self, planar: &[Vec<f32>], emit: &mut F) -> Result<()>
    where
        F: FnMut(&[f32]) -> Result<()>,
    {
        let produced = planar.first().map_or(0, Vec::len);
        let skip = self.delay.min(produced);
        self.delay -= skip;

        let remaining = self.expected_frames().saturating_sub(self.frames_out);
        let take = (produced - skip).min(usize::try_from(remaining).unwrap_or(usize::MAX));
        if take == 0 {
            return Ok(());
        }

        self.interleaved.clear();
        self.interleaved.reserve(take * self.channels);
        for i in skip..skip + take {
            for channel in planar {
                self.interleaved.push(channel[i]);
            }
        }
        self.frames_out += take as u64;
        emit(&self.interleaved)
    }
}
