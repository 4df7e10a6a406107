//! Audio host abstraction.
//!
//! An [`AudioHost`] negotiates an output format and opens a stream that drives an
//! [`AudioOutputCallback`] from its own real-time thread, passing the host clock time at
//! which each buffer will be heard.

pub mod device;
pub mod null;

use std::sync::Arc;

use anyhow::Result;

use crate::clock::HostClock;
use crate::output::AudioOutputCallback;

/// Interleaved `f32` format the pipeline produces for the host.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct OutputFormat {
    pub sample_rate: u32,
    pub channels: u16,
}

/// An open output stream. Dropping it closes the stream.
pub trait AudioStream {
    fn start(&mut self) -> Result<()>;
    fn stop(&mut self) -> Result<()>;
}

pub trait AudioHost {
    /// Human-readable output name for status reporting.
    fn device_name(&self) -> Option<String>;

    /// Return the closest format the host can accept to `wanted`.
    fn negotiate(&self, wanted: OutputFormat) -> Result<OutputFormat>;

    /// Open a stream at a format previously returned by [`Self::negotiate`].
    ///
    /// The stream is created stopped; `callback` runs only after [`AudioStream::start`].
    fn open(
        &self,
        format: OutputFormat,
        clock: Arc<dyn HostClock>,
        callback: AudioOutputCallback,
    ) -> Result<Box<dyn AudioStream>>;
}
