//! Time-stretch stage for non-normal playback speeds.
//!
//! Uses Rubato's streaming sinc resampler in varispeed mode: audio decoded at the output rate
//! is resampled by `100 / speed`, so it plays back faster or slower when the device consumes it
//! at the output rate. Output is re-chunked into one chunk per pts tick.
//!
//! The same stage converts sample rates for sources decoding at a rate other than the output
//! rate (see [`TimeStretch::with_ratio`]).

use anyhow::{Context, Result, anyhow};
use audioadapter_buffers::direct::InterleavedSlice;
use rubato::{
    Async, FixedAsync, Indexing, Resampler, SincInterpolationParameters, SincInterpolationType,
    WindowFunction, calculate_cutoff,
};

use crate::media::AudioChunk;
use crate::session::Speed;

pub struct TimeStretch {
    channels: usize,
    chunk_frames: usize,
    chunk_samples_out: usize,
    speed: Speed,
    ratio: f64,
    resampler: Option<Box<dyn Resampler<f32> + Send>>,
    pending_in: Vec<f32>,
    pending_out: Vec<f32>,
    scratch: Vec<f32>,
    finished: bool,
}

impl TimeStretch {
    /// Build a stage for `channels` interleaved channels.
    ///
    /// `chunk_frames` is the resampler input block; `frames_per_tick` the output chunk length.
    pub fn new(
        channels: usize,
        speed: Speed,
        chunk_frames: usize,
        frames_per_tick: usize,
    ) -> Result<Self> {
        let ratio = 100.0 / speed.percent() as f64;
        let mut stretch = Self::with_ratio(channels, ratio, chunk_frames, frames_per_tick)?;
        stretch.speed = speed;
        Ok(stretch)
    }

    /// Build a plain resampler producing `ratio` output frames per input frame.
    pub fn with_ratio(
        channels: usize,
        ratio: f64,
        chunk_frames: usize,
        frames_per_tick: usize,
    ) -> Result<Self> {
        let channels = channels.max(1);
        let chunk_frames = chunk_frames.max(1);
        let mut stretch = Self {
            channels,
            chunk_frames,
            chunk_samples_out: frames_per_tick.max(1) * channels,
            speed: Speed::NORMAL,
            ratio,
            resampler: None,
            pending_in: Vec::with_capacity(chunk_frames * channels * 2),
            pending_out: Vec::new(),
            scratch: vec![0.0; channels * output_capacity_frames(chunk_frames, ratio)],
            finished: false,
        };
        stretch.rebuild()?;
        Ok(stretch)
    }

    fn rebuild(&mut self) -> Result<()> {
        if (self.ratio - 1.0).abs() < f64::EPSILON {
            self.resampler = None;
            return Ok(());
        }

        let sinc_len = 128;
        let window = WindowFunction::BlackmanHarris2;
        let params = SincInterpolationParameters {
            sinc_len,
            f_cutoff: calculate_cutoff(sinc_len, window),
            interpolation: SincInterpolationType::Cubic,
            oversampling_factor: 256,
            window,
        };

        let resampler = Async::<f32>::new_sinc(
            self.ratio,
            1.1,
            &params,
            self.chunk_frames,
            self.channels,
            FixedAsync::Input,
        )
        .with_context(|| format!("create resampler with ratio {:.3}", self.ratio))?;
        self.resampler = Some(Box::new(resampler));
        Ok(())
    }

    pub fn speed(&self) -> Speed {
        self.speed
    }

    /// `true` when audio passes through untouched.
    pub fn is_passthrough(&self) -> bool {
        self.resampler.is_none()
    }

    /// Drop buffered audio and filter history.
    pub fn reset(&mut self) -> Result<()> {
        self.pending_in.clear();
        self.pending_out.clear();
        self.finished = false;
        self.rebuild()
    }

    /// Switch to a new speed; implies [`Self::reset`].
    pub fn set_speed(&mut self, speed: Speed) -> Result<()> {
        self.speed = speed;
        self.ratio = 100.0 / speed.percent() as f64;
        let frames = output_capacity_frames(self.chunk_frames, self.ratio);
        self.scratch.resize(frames * self.channels, 0.0);
        self.reset()
    }

    /// Feed the unread part of `chunk`.
    pub fn send(&mut self, chunk: &AudioChunk) -> Result<()> {
        debug_assert_eq!(chunk.channels(), self.channels, "channel count changed mid-stream");
        self.pending_in.extend_from_slice(chunk.unread());

        let block = self.chunk_frames * self.channels;
        let mut consumed = 0;
        while self.pending_in.len() - consumed >= block {
            self.process_block(consumed, self.chunk_frames, None)?;
            consumed += block;
        }
        self.pending_in.drain(..consumed);
        Ok(())
    }

    /// Process whatever input is left. Afterwards [`Self::receive`] also yields a short tail.
    pub fn finish(&mut self) -> Result<()> {
        let tail_frames = self.pending_in.len() / self.channels;
        if tail_frames > 0 {
            self.process_block(0, self.chunk_frames, Some(tail_frames))?;
        }
        self.pending_in.clear();
        self.finished = true;
        Ok(())
    }

    /// Next output chunk covering one pts tick, if enough audio is buffered.
    pub fn receive(&mut self) -> Option<AudioChunk> {
        let take = if self.pending_out.len() >= self.chunk_samples_out {
            self.chunk_samples_out
        } else if self.finished && !self.pending_out.is_empty() {
            self.pending_out.len() - self.pending_out.len() % self.channels
        } else {
            return None;
        };
        if take == 0 {
            self.pending_out.clear();
            return None;
        }
        let samples: Vec<f32> = self.pending_out.drain(..take).collect();
        Some(AudioChunk::new(self.channels, samples, None))
    }

    fn process_block(&mut self, offset: usize, frames: usize, partial: Option<usize>) -> Result<()> {
        let Some(resampler) = self.resampler.as_mut() else {
            let len = partial.unwrap_or(frames) * self.channels;
            self.pending_out
                .extend_from_slice(&self.pending_in[offset..offset + len]);
            return Ok(());
        };

        // A partial block still needs a full-size input buffer.
        let padded;
        let input: &[f32] = match partial {
            Some(valid) => {
                let mut buf = vec![0.0; frames * self.channels];
                let len = valid * self.channels;
                buf[..len].copy_from_slice(&self.pending_in[offset..offset + len]);
                padded = buf;
                &padded
            }
            None => &self.pending_in[offset..offset + frames * self.channels],
        };

        let input_adapter = InterleavedSlice::new(input, self.channels, frames)
            .map_err(|e| anyhow!("time stretch input buffer: {e}"))?;
        let out_capacity_frames = self.scratch.len() / self.channels;
        let mut output_adapter =
            InterleavedSlice::new_mut(&mut self.scratch, self.channels, out_capacity_frames)
                .map_err(|e| anyhow!("time stretch output buffer: {e}"))?;

        let indexing = Indexing {
            input_offset: 0,
            output_offset: 0,
            active_channels_mask: None,
            partial_len: partial,
        };

        let (_nbr_in, nbr_out) = resampler
            .process_into_buffer(&input_adapter, &mut output_adapter, Some(&indexing))
            .context("time stretch process")?;

        self.pending_out
            .extend_from_slice(&self.scratch[..nbr_out * self.channels]);
        Ok(())
    }
}

/// Output buffer size for one input block, with headroom for the filter delay.
fn output_capacity_frames(chunk_frames: usize, ratio: f64) -> usize {
    let scaled = (chunk_frames as f64 * ratio.max(1.0) * 1.1).ceil() as usize;
    (scaled + 256).max(chunk_frames * 3)
}
