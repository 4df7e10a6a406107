//! Playback configuration.
//!
//! Every field has a default, so a TOML file only needs the values it overrides.

use std::path::Path;

use anyhow::{Context, Result, bail};
use serde::Deserialize;

use crate::display::PacingConfig;
use crate::media::FrameRate;
use crate::session::Speed;

/// Tuning parameters shared by the controller and its pipeline stages.
#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct PlaybackConfig {
    /// Requested output sample rate in Hz (the host may pick another).
    pub sample_rate: u32,
    /// Requested output channel count.
    pub channels: u16,
    /// Project frame rate used to convert pts to time.
    pub frame_rate: FrameRate,
    /// Presentation size frames are requested at.
    pub display_width: u32,
    pub display_height: u32,
    /// Request frames with an alpha channel.
    pub want_alpha: bool,
    /// Audio queue capacity in chunks.
    pub audio_queue: usize,
    /// Video queue capacity in frames.
    pub video_queue: usize,
    /// Time-stretch input block in frames.
    pub stretch_chunk_frames: usize,
    /// Initial playback speed in percent (clamped to 50..=200).
    pub speed_percent: u16,
    /// Frames whose computed sleep is below this many milliseconds are dropped as late.
    pub late_threshold_ms: i64,
    /// Frames whose computed sleep exceeds this many milliseconds are dropped as glitches.
    pub early_threshold_ms: i64,
    /// Frames per callback of the null audio host.
    pub null_period_frames: usize,
}

impl Default for PlaybackConfig {
    fn default() -> Self {
        Self {
            sample_rate: 44_100,
            channels: 2,
            frame_rate: FrameRate::default(),
            display_width: 640,
            display_height: 360,
            want_alpha: false,
            audio_queue: 1000,
            video_queue: 20,
            stretch_chunk_frames: 1024,
            speed_percent: 100,
            late_threshold_ms: 0,
            early_threshold_ms: 1000,
            null_period_frames: 441,
        }
    }
}

impl PlaybackConfig {
    /// Load configuration from a TOML file.
    pub fn load(path: &Path) -> Result<Self> {
        let raw =
            std::fs::read_to_string(path).with_context(|| format!("read config {:?}", path))?;
        Self::from_toml(&raw).with_context(|| format!("parse config {:?}", path))
    }

    pub fn from_toml(raw: &str) -> Result<Self> {
        let cfg = toml::from_str::<PlaybackConfig>(raw)?;
        cfg.validate()?;
        Ok(cfg)
    }

    /// Reject values the pipeline cannot run with.
    pub fn validate(&self) -> Result<()> {
        if self.audio_queue == 0 {
            bail!("audio_queue must hold at least one chunk");
        }
        if self.video_queue == 0 {
            bail!("video_queue must hold at least one frame");
        }
        Ok(())
    }

    pub fn speed(&self) -> Speed {
        Speed::new(self.speed_percent)
    }

    pub fn pacing(&self) -> PacingConfig {
        PacingConfig::from_millis(self.late_threshold_ms, self.early_threshold_ms)
    }
}
