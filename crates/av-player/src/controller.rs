//! Playback controller: owns the pipeline and drives its lifecycle.
//!
//! All methods run on the owner thread. A session is started by [`PlaybackController::play`]
//! and torn down by [`PlaybackController::move_to`] (or anything built on it) in a fixed order,
//! so no worker is left blocked on a queue and no queue keeps data of an old session.

use std::sync::Arc;
use std::thread::JoinHandle;

use anyhow::Result;
use av_player_types::{PlaybackEndReason, PlayerStatus};

use crate::buffer::{AudioBufferWorker, AudioQueue, VideoBufferWorker, VideoQueue};
use crate::clock::HostClock;
use crate::config::PlaybackConfig;
use crate::display::{DisplaySurface, FrameSlot, VideoDisplayWorker};
use crate::events::{EventSink, PlaybackEvent};
use crate::host::{AudioHost, AudioStream, OutputFormat};
use crate::media::{AudioParams, MediaSource, Pts, StreamItem, VideoFrame, VideoParams};
use crate::output::AudioOutputCallback;
use crate::session::{PlaybackSession, Speed};
use crate::status::{OutputInfo, PlayerStats};
use crate::stretch::TimeStretch;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PlaybackState {
    Stopped,
    Playing,
}

/// What [`PlaybackController::pause`] interrupted.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ResumeInfo {
    pub was_playing: bool,
    pub position: Pts,
    pub range: Option<(Pts, Pts)>,
}

/// Threads and stream of the running session.
struct ActivePlayback {
    session: Arc<PlaybackSession>,
    format: OutputFormat,
    stream: Option<Box<dyn AudioStream>>,
    audio: Option<JoinHandle<TimeStretch>>,
    video: Option<JoinHandle<()>>,
    display: Option<JoinHandle<()>>,
}

pub struct PlaybackController {
    config: PlaybackConfig,
    source: Arc<dyn MediaSource>,
    host: Box<dyn AudioHost>,
    clock: Arc<dyn HostClock>,
    surface: Arc<dyn DisplaySurface>,
    events: EventSink,
    stats: Arc<PlayerStats>,
    slot: Arc<FrameSlot>,
    audio_queue: Arc<AudioQueue>,
    video_queue: Arc<VideoQueue>,
    /// Kept between sessions; rebuilt when the output format changes.
    stretch: Option<(OutputFormat, TimeStretch)>,
    active: Option<ActivePlayback>,
    speed: Speed,
    range: Option<(Pts, Pts)>,
    display_size: (u32, u32),
    sessions: u64,
}

impl PlaybackController {
    pub fn new(
        config: PlaybackConfig,
        source: Arc<dyn MediaSource>,
        host: Box<dyn AudioHost>,
        clock: Arc<dyn HostClock>,
        surface: Arc<dyn DisplaySurface>,
        events: EventSink,
    ) -> Self {
        let stats = Arc::new(PlayerStats::default());
        let speed = config.speed();
        stats.set_speed(speed.percent());

        Self {
            audio_queue: Arc::new(AudioQueue::new(config.audio_queue)),
            video_queue: Arc::new(VideoQueue::new(config.video_queue)),
            display_size: (config.display_width, config.display_height),
            config,
            source,
            host,
            clock,
            surface,
            events,
            stats,
            slot: Arc::new(FrameSlot::default()),
            stretch: None,
            active: None,
            speed,
            range: None,
            sessions: 0,
        }
    }

    pub fn state(&self) -> PlaybackState {
        if self.active.is_some() {
            PlaybackState::Playing
        } else {
            PlaybackState::Stopped
        }
    }

    /// Last position shown or moved to.
    pub fn position(&self) -> Pts {
        self.stats.position()
    }

    pub fn speed(&self) -> Speed {
        self.speed
    }

    pub fn range(&self) -> Option<(Pts, Pts)> {
        self.range
    }

    /// Frame currently on screen, for the paint path.
    pub fn current_frame(&self) -> Option<Arc<VideoFrame>> {
        self.slot.current()
    }

    pub fn status(&self) -> PlayerStatus {
        self.stats
            .snapshot(self.audio_queue.len(), self.video_queue.len())
    }

    /// Start a session from the current frame. No-op while playing.
    pub fn play(&mut self) -> Result<()> {
        if self.active.is_some() {
            tracing::debug!("play requested while playing");
            return Ok(());
        }

        let format = self.host.negotiate(OutputFormat {
            sample_rate: self.config.sample_rate,
            channels: self.config.channels,
        })?;
        self.stats.set_output(OutputInfo {
            sample_rate: Some(format.sample_rate),
            channels: Some(format.channels),
            device: self.host.device_name(),
        });

        let stretch = self.prepare_stretch(format)?;

        self.sessions += 1;
        let start_pts = self.slot.pts().unwrap_or_else(|| self.position());
        let session = Arc::new(PlaybackSession::new(
            self.sessions,
            start_pts,
            self.speed,
            self.config.frame_rate,
            self.range.map(|(_, end)| end),
        ));
        let mut active = ActivePlayback {
            session,
            format,
            stream: None,
            audio: None,
            video: None,
            display: None,
        };
        self.stats.session_started();

        let started = self.start_session(&mut active, stretch);
        self.active = Some(active);
        if let Err(e) = started {
            tracing::error!("failed to start playback: {e:#}");
            self.teardown();
            return Err(e);
        }

        self.stats.set_playing(true);
        self.events.emit(PlaybackEvent::PlaybackActive(true));
        tracing::info!(
            session = self.sessions,
            start_pts,
            speed = self.speed.percent(),
            sample_rate = format.sample_rate,
            channels = format.channels,
            "playback started"
        );
        Ok(())
    }

    /// Spawn the workers and start the host stream, recording every handle in `active`.
    fn start_session(&self, active: &mut ActivePlayback, stretch: TimeStretch) -> Result<()> {
        let session = active.session.clone();
        // The first frame must not wait behind a full queue.
        self.video_queue.resize(1);

        active.audio = Some(
            AudioBufferWorker {
                session: session.clone(),
                source: self.source.clone(),
                queue: self.audio_queue.clone(),
                params: AudioParams {
                    sample_rate: active.format.sample_rate,
                    channels: active.format.channels,
                },
                stretch,
                events: self.events.clone(),
                stats: self.stats.clone(),
            }
            .spawn()?,
        );

        active.video = Some(
            VideoBufferWorker {
                session: session.clone(),
                source: self.source.clone(),
                queue: self.video_queue.clone(),
                params: self.video_params(),
                events: self.events.clone(),
                stats: self.stats.clone(),
            }
            .spawn()?,
        );

        active.display = Some(
            VideoDisplayWorker {
                session: session.clone(),
                queue: self.video_queue.clone(),
                slot: self.slot.clone(),
                surface: self.surface.clone(),
                clock: self.clock.clone(),
                events: self.events.clone(),
                stats: self.stats.clone(),
                pacing: self.config.pacing(),
                video_capacity: self.config.video_queue,
            }
            .spawn()?,
        );

        let callback = AudioOutputCallback::new(
            session,
            self.audio_queue.clone(),
            self.events.clone(),
            self.stats.clone(),
        );
        let stream = self.host.open(active.format, self.clock.clone(), callback)?;
        active.stream.insert(stream).start()
    }

    /// Reuse the stretch stage kept from the last session when the format still matches.
    fn prepare_stretch(&mut self, format: OutputFormat) -> Result<TimeStretch> {
        let frames_per_tick = self.config.frame_rate.samples_per_pts(format.sample_rate);
        match self.stretch.take() {
            Some((kept, mut stretch)) if kept == format => {
                if stretch.speed() != self.speed {
                    stretch.set_speed(self.speed)?;
                } else {
                    stretch.reset()?;
                }
                Ok(stretch)
            }
            _ => TimeStretch::new(
                format.channels as usize,
                self.speed,
                self.config.stretch_chunk_frames,
                frames_per_tick,
            ),
        }
    }

    /// Stop the running session, if any.
    fn teardown(&mut self) {
        let Some(mut active) = self.active.take() else {
            return;
        };
        let session = active.session.clone();
        tracing::debug!(session = session.id(), "tearing down playback");

        session.abort();
        if let Some(mut stream) = active.stream.take() {
            if let Err(e) = stream.stop() {
                tracing::warn!("failed to stop audio stream: {e:#}");
            }
        }

        self.audio_queue.flush();
        self.video_queue.flush();

        if let Some(handle) = active.video.take() {
            if handle.join().is_err() {
                tracing::error!("video buffer worker panicked");
            }
        }
        if let Some(handle) = active.audio.take() {
            match handle.join() {
                Ok(stretch) => self.stretch = Some((active.format, stretch)),
                Err(_) => tracing::error!("audio buffer worker panicked"),
            }
        }
        if let Some((_, stretch)) = self.stretch.as_mut() {
            if let Err(e) = stretch.reset() {
                tracing::warn!("failed to reset time stretch: {e:#}");
                self.stretch = None;
            }
        }

        self.audio_queue.force_push(StreamItem::End);
        self.video_queue.force_push(StreamItem::End);
        session.cancel_start();

        if let Some(handle) = active.display.take() {
            if handle.join().is_err() {
                tracing::error!("video display worker panicked");
            }
        }

        self.audio_queue.flush();
        self.video_queue.flush();
        self.video_queue.resize(self.config.video_queue);

        self.stats.session_ended(PlaybackEndReason::Stopped);
        self.stats.set_playing(false);
        self.events.emit(PlaybackEvent::PlaybackActive(false));
        tracing::info!(session = session.id(), "playback stopped");
    }

    /// Stop (if playing) and show the frame at `pts`.
    ///
    /// Clears any play range. While stopped this touches no thread: the frame is fetched
    /// synchronously and published once.
    pub fn move_to(&mut self, pts: Pts) -> Result<()> {
        self.range = None;
        self.teardown();

        self.source.move_to(pts)?;
        self.stats.set_position(pts);
        self.events.emit(PlaybackEvent::Position(pts));

        match self.source.next_video(&self.video_params())? {
            Some(frame) => {
                let frame = Arc::new(frame);
                self.slot.store(Some(frame.clone()));
                self.surface.publish(frame);
            }
            None => {
                tracing::debug!(pts, "no frame at position");
                self.slot.store(None);
                self.surface.clear();
            }
        }
        Ok(())
    }

    /// Stop at the frame on screen.
    pub fn stop(&mut self) -> Result<()> {
        let at = self.slot.pts().unwrap_or_else(|| self.position());
        self.move_to(at)
    }

    /// Change the speed (clamped to 50..=200 percent), restarting playback if it was running.
    pub fn set_speed(&mut self, percent: u16) -> Result<()> {
        let speed = Speed::new(percent);
        if speed == self.speed {
            return Ok(());
        }
        let was_playing = self.active.is_some();
        let range = self.range;
        let at = self.position();

        self.speed = speed;
        self.stats.set_speed(speed.percent());
        tracing::info!(speed = speed.percent(), "playback speed changed");

        self.move_to(at)?;
        self.range = range;
        if was_playing {
            self.play()?;
        }
        Ok(())
    }

    /// Stop at `pts` before an edit of the timeline.
    pub fn pause(&mut self, pts: Pts) -> Result<ResumeInfo> {
        let info = ResumeInfo {
            was_playing: self.active.is_some(),
            position: pts,
            range: self.range,
        };
        self.move_to(pts)?;
        Ok(info)
    }

    /// Undo a [`Self::pause`]: re-read the frame and play again if playback was running.
    pub fn resume(&mut self, info: ResumeInfo) -> Result<()> {
        self.move_to(info.position)?;
        self.range = info.range;
        if info.was_playing {
            self.play()?;
        }
        Ok(())
    }

    /// Play `from..=to` in a loop.
    ///
    /// A session ends with [`PlaybackEvent::RangeEnd`] once it reaches a frame past `to`; the
    /// owner answers with [`Self::restart_range`].
    pub fn play_range(&mut self, from: Pts, to: Pts) -> Result<()> {
        debug_assert!(from < to, "play range must not be empty: {from}..{to}");
        self.move_to(from)?;
        self.range = Some((from, to));
        self.play()
    }

    /// Play the range again from its first frame. Does nothing without a range.
    pub fn restart_range(&mut self) -> Result<()> {
        let Some((from, _)) = self.range else {
            return Ok(());
        };
        tracing::debug!(from, "restarting play range");
        let info = self.pause(from)?;
        self.resume(ResumeInfo {
            was_playing: true,
            ..info
        })
    }

    /// Stop playback and forget the play range. Does nothing without a range.
    pub fn stop_range(&mut self) -> Result<()> {
        if self.range.is_none() {
            return Ok(());
        }
        self.stop()?;
        self.range = None;
        Ok(())
    }

    /// Change the presentation size; the current frame is fetched again at the new size.
    pub fn set_display_size(&mut self, width: u32, height: u32) -> Result<()> {
        if self.display_size == (width, height) {
            return Ok(());
        }
        let was_playing = self.active.is_some();
        let range = self.range;
        let at = self.slot.pts().unwrap_or_else(|| self.position());
        self.display_size = (width, height);

        self.move_to(at)?;
        self.range = range;
        if was_playing {
            self.play()?;
        }
        Ok(())
    }

    fn video_params(&self) -> VideoParams {
        VideoParams {
            width: self.display_size.0,
            height: self.display_size.1,
            want_alpha: self.config.want_alpha,
            skip: false,
        }
    }
}

impl Drop for PlaybackController {
    fn drop(&mut self) {
        self.teardown();
    }
}
