use serde::{Deserialize, Serialize};

/// Reason why a playback session ended.
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum PlaybackEndReason {
    /// Both streams reached the end of the source.
    Eof,
    /// The source reported a decode error and the session was aborted.
    Error,
    /// Playback was stopped by a seek, a speed change or an explicit stop.
    Stopped,
    /// The frame after the end of the requested play range was reached.
    RangeEnd,
}

/// Point-in-time view of the preview player.
///
/// Counters are cumulative over the lifetime of the controller, not per session.
#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct PlayerStatus {
    /// `true` while a playback session is active.
    pub playing: bool,
    /// Last position requested by a seek or shown by the display worker (pts).
    pub position: i64,
    /// Playback speed in percent (100 = normal).
    pub speed_percent: u16,
    /// Output sample rate negotiated with the host (Hz).
    pub sample_rate: Option<u32>,
    /// Output channel count negotiated with the host.
    pub channels: Option<u16>,
    /// Output device name, when a device backed host is in use.
    pub device: Option<String>,
    /// Number of playback sessions started.
    pub sessions_started: u64,
    /// Frames published to the display surface.
    pub frames_shown: u64,
    /// Frames dropped by the pacing policy.
    pub frames_dropped: u64,
    /// Audio chunks fully handed to the host.
    pub audio_chunks_played: u64,
    /// Samples emitted as silence because the audio queue was empty.
    pub underrun_samples: u64,
    /// Number of underrun incidents observed by the audio callback.
    pub underrun_events: u64,
    /// Items currently waiting in the audio queue.
    pub audio_queued: u64,
    /// Items currently waiting in the video queue.
    pub video_queued: u64,
    /// Terminal reason of the last session, if it ended.
    pub end_reason: Option<PlaybackEndReason>,
}
