use std::sync::atomic::{AtomicBool, AtomicI64, AtomicU32, AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard};

use av_player_types::{PlaybackEndReason, PlayerStatus};

use crate::media::Pts;

/// Output format details recorded when a stream is opened.
#[derive(Clone, Debug, Default)]
pub struct OutputInfo {
    pub sample_rate: Option<u32>,
    pub channels: Option<u16>,
    pub device: Option<String>,
}

/// Counters updated by the controller, the workers and the audio callback.
///
/// Everything the real-time callback touches is a relaxed atomic.
#[derive(Debug, Default)]
pub struct PlayerStats {
    playing: AtomicBool,
    position: AtomicI64,
    speed_percent: AtomicU32,
    sessions_started: AtomicU64,
    frames_shown: AtomicU64,
    frames_dropped: AtomicU64,
    audio_chunks_played: AtomicU64,
    underrun_samples: AtomicU64,
    underrun_events: AtomicU64,
    output: Mutex<OutputInfo>,
    end_reason: Mutex<Option<PlaybackEndReason>>,
}

impl PlayerStats {
    fn output(&self) -> MutexGuard<'_, OutputInfo> {
        self.output.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn end(&self) -> MutexGuard<'_, Option<PlaybackEndReason>> {
        self.end_reason.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn set_playing(&self, playing: bool) {
        self.playing.store(playing, Ordering::Relaxed);
    }

    pub fn set_position(&self, pts: Pts) {
        self.position.store(pts, Ordering::Relaxed);
    }

    pub fn position(&self) -> Pts {
        self.position.load(Ordering::Relaxed)
    }

    pub fn set_speed(&self, percent: u16) {
        self.speed_percent.store(percent as u32, Ordering::Relaxed);
    }

    pub fn set_output(&self, info: OutputInfo) {
        *self.output() = info;
    }

    /// Count a new session and forget the previous end reason.
    pub fn session_started(&self) {
        self.sessions_started.fetch_add(1, Ordering::Relaxed);
        *self.end() = None;
    }

    /// Record why the session ended. The first reason wins until the next session.
    pub fn session_ended(&self, reason: PlaybackEndReason) {
        let mut end = self.end();
        if end.is_none() {
            *end = Some(reason);
        }
    }

    pub fn end_reason(&self) -> Option<PlaybackEndReason> {
        *self.end()
    }

    pub fn frame_shown(&self, pts: Pts) {
        self.frames_shown.fetch_add(1, Ordering::Relaxed);
        self.set_position(pts);
    }

    pub fn frame_dropped(&self) {
        self.frames_dropped.fetch_add(1, Ordering::Relaxed);
    }

    pub fn chunk_played(&self) {
        self.audio_chunks_played.fetch_add(1, Ordering::Relaxed);
    }

    pub fn underrun(&self, samples: usize, new_incident: bool) {
        self.underrun_samples
            .fetch_add(samples as u64, Ordering::Relaxed);
        if new_incident {
            self.underrun_events.fetch_add(1, Ordering::Relaxed);
        }
    }

    /// Build a status snapshot. Queue depths are supplied by the owner of the queues.
    pub fn snapshot(&self, audio_queued: usize, video_queued: usize) -> PlayerStatus {
        let output = self.output().clone();
        PlayerStatus {
            playing: self.playing.load(Ordering::Relaxed),
            position: self.position(),
            speed_percent: self.speed_percent.load(Ordering::Relaxed) as u16,
            sample_rate: output.sample_rate,
            channels: output.channels,
            device: output.device,
            sessions_started: self.sessions_started.load(Ordering::Relaxed),
            frames_shown: self.frames_shown.load(Ordering::Relaxed),
            frames_dropped: self.frames_dropped.load(Ordering::Relaxed),
            audio_chunks_played: self.audio_chunks_played.load(Ordering::Relaxed),
            underrun_samples: self.underrun_samples.load(Ordering::Relaxed),
            underrun_events: self.underrun_events.load(Ordering::Relaxed),
            audio_queued: audio_queued as u64,
            video_queued: video_queued as u64,
            end_reason: self.end_reason(),
        }
    }
}
