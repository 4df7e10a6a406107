//! Preview runtime.
//!
//! Builds the source, audio host and controller from a [`PreviewConfig`], plays until the
//! session ends or Ctrl-C is pressed, and returns the final status.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use anyhow::{Context, Result};
use av_player::clock::MonotonicClock;
use av_player::controller::PlaybackController;
use av_player::display::DisplaySurface;
use av_player::events::{self, PlaybackEvent};
use av_player::host::AudioHost;
use av_player::host::device::{CpalHost, output_device_names};
use av_player::host::null::NullAudioHost;
use av_player::media::{MediaSource, VideoFrame};
use av_player::source::file::FileSource;
use av_player::source::pattern::TestPatternSource;
use av_player_types::PlayerStatus;
use crossbeam_channel::{Receiver, select};

use crate::config::{PreviewConfig, SourceKind};

const EVENT_CAPACITY: usize = 1024;

/// Print output device names to stdout.
pub fn list_devices() -> Result<()> {
    for (i, name) in output_device_names()?.iter().enumerate() {
        println!("#{i}: {name}");
    }
    Ok(())
}

/// Surface for a terminal: counts published frames and traces them.
#[derive(Default)]
struct FrameLog {
    published: AtomicU64,
}

impl DisplaySurface for FrameLog {
    fn publish(&self, frame: Arc<VideoFrame>) {
        self.published.fetch_add(1, Ordering::Relaxed);
        tracing::trace!(
            pts = frame.pts(),
            repeat = frame.repeat(),
            width = frame.width(),
            height = frame.height(),
            "frame"
        );
    }

    fn clear(&self) {
        tracing::trace!("surface cleared");
    }
}

fn open_source(config: &PreviewConfig) -> Result<Arc<dyn MediaSource>> {
    let frame_rate = config.playback.frame_rate;
    match &config.source {
        SourceKind::Pattern { seconds } => {
            let length = frame_rate.micros_to_pts(*seconds as i64 * 1_000_000);
            tracing::info!(seconds, frames = length, "test pattern");
            Ok(Arc::new(TestPatternSource::new(frame_rate, Some(length))))
        }
        SourceKind::File { path } => {
            let source = FileSource::open(path, frame_rate)?;
            Ok(Arc::new(source))
        }
    }
}

fn open_host(config: &PreviewConfig) -> Result<Box<dyn AudioHost>> {
    if config.null_audio {
        tracing::info!("audio output disabled (null host)");
        return Ok(Box::new(NullAudioHost::new(config.playback.null_period_frames)));
    }
    Ok(Box::new(CpalHost::new(config.device.as_deref())?))
}

/// Channel receiving one message per Ctrl-C.
pub fn ctrlc_channel() -> Result<Receiver<()>> {
    let (stop_tx, stop_rx) = crossbeam_channel::bounded::<()>(1);
    ctrlc::set_handler(move || {
        let _ = stop_tx.try_send(());
    })
    .context("install Ctrl-C handler")?;
    Ok(stop_rx)
}

/// Play the configured source until it ends or `stop_rx` fires, and return the final status.
///
/// A play range loops until stopped.
pub fn run(config: PreviewConfig, stop_rx: Receiver<()>) -> Result<PlayerStatus> {
    let source = open_source(&config)?;
    let host = open_host(&config)?;
    let (sink, rx) = events::channel(EVENT_CAPACITY);
    let surface = Arc::new(FrameLog::default());

    let mut controller = PlaybackController::new(
        config.playback.clone(),
        source,
        host,
        Arc::new(MonotonicClock::new()),
        surface.clone(),
        sink,
    );

    match config.range_end {
        Some(end) => controller.play_range(config.start_pts, end)?,
        None => {
            controller.move_to(config.start_pts)?;
            controller.play()?;
        }
    }

    loop {
        select! {
            recv(rx) -> event => match event {
                Ok(PlaybackEvent::Finished) => {
                    tracing::info!("end of source");
                    break;
                }
                Ok(PlaybackEvent::RangeEnd(pts)) => {
                    tracing::debug!(pts, "end of range; looping");
                    controller.restart_range()?;
                }
                Ok(PlaybackEvent::SourceError(msg)) => {
                    tracing::error!("playback failed: {msg}");
                    break;
                }
                Ok(PlaybackEvent::FrameDropped { pts, sleep_us }) => {
                    tracing::debug!(pts, sleep_us, "frame dropped");
                }
                Ok(PlaybackEvent::Underflow { samples }) => {
                    tracing::debug!(samples, "audio underflow");
                }
                Ok(_) => {}
                Err(_) => break,
            },
            recv(stop_rx) -> _ => {
                tracing::info!("interrupted");
                break;
            }
        }
    }

    controller.stop()?;
    tracing::info!(
        published = surface.published.load(Ordering::Relaxed),
        "preview finished"
    );
    Ok(controller.status())
}
