//! Silent audio host.
//!
//! Drives the output callback from its own thread at the pace of the configured sample rate
//! and discards the audio. Used when no output device is available and in tests.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use anyhow::{Context, Result, anyhow};

use super::{AudioHost, AudioStream, OutputFormat};
use crate::clock::HostClock;
use crate::output::{AudioOutputCallback, CallbackFlow};

#[derive(Clone, Debug)]
pub struct NullAudioHost {
    period_frames: usize,
}

impl NullAudioHost {
    /// `period_frames` is the number of frames requested per callback.
    pub fn new(period_frames: usize) -> Self {
        Self {
            period_frames: period_frames.max(1),
        }
    }
}

impl Default for NullAudioHost {
    fn default() -> Self {
        Self::new(441)
    }
}

impl AudioHost for NullAudioHost {
    fn device_name(&self) -> Option<String> {
        Some("null".to_string())
    }

    fn negotiate(&self, wanted: OutputFormat) -> Result<OutputFormat> {
        if wanted.sample_rate == 0 || wanted.channels == 0 {
            return Err(anyhow!("invalid output format: {wanted:?}"));
        }
        Ok(wanted)
    }

    fn open(
        &self,
        format: OutputFormat,
        clock: Arc<dyn HostClock>,
        callback: AudioOutputCallback,
    ) -> Result<Box<dyn AudioStream>> {
        Ok(Box::new(NullStream {
            format,
            period_frames: self.period_frames,
            clock,
            callback: Some(callback),
            running: Arc::new(AtomicBool::new(false)),
            thread: None,
        }))
    }
}

struct NullStream {
    format: OutputFormat,
    period_frames: usize,
    clock: Arc<dyn HostClock>,
    callback: Option<AudioOutputCallback>,
    running: Arc<AtomicBool>,
    thread: Option<JoinHandle<()>>,
}

impl AudioStream for NullStream {
    fn start(&mut self) -> Result<()> {
        let Some(mut callback) = self.callback.take() else {
            return Ok(());
        };
        self.running.store(true, Ordering::SeqCst);

        let running = self.running.clone();
        let clock = self.clock.clone();
        let samples = self.period_frames * self.format.channels as usize;
        let period = Duration::from_secs_f64(
            self.period_frames as f64 / self.format.sample_rate as f64,
        );

        let handle = thread::Builder::new()
            .name("null-audio".to_string())
            .spawn(move || {
                let mut buf = vec![0.0f32; samples];
                let origin = clock.now();
                let mut ticks: u32 = 0;
                let mut stopped = false;
                while running.load(Ordering::SeqCst) {
                    if !stopped {
                        stopped = callback.fill(&mut buf, clock.now()) == CallbackFlow::Stop;
                    }
                    ticks = ticks.wrapping_add(1);
                    let next = origin + period * ticks;
                    let now = clock.now();
                    if next > now {
                        clock.sleep(next - now);
                    }
                }
            })
            .context("spawn null audio thread")?;
        self.thread = Some(handle);
        Ok(())
    }

    fn stop(&mut self) -> Result<()> {
        self.running.store(false, Ordering::SeqCst);
        if let Some(handle) = self.thread.take() {
            handle
                .join()
                .map_err(|_| anyhow!("null audio thread panicked"))?;
        }
        Ok(())
    }
}

impl Drop for NullStream {
    fn drop(&mut self) {
        if let Err(e) = self.stop() {
            tracing::warn!("null audio stream: {e:#}");
        }
    }
}
