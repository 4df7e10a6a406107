//! Real-time audio output callback.
//!
//! Invoked by the audio host on its real-time thread. It never blocks: the queue is only
//! polled with `try_pop`, and an empty queue is answered with silence.

use std::sync::Arc;
use std::time::Duration;

use crate::buffer::AudioQueue;
use crate::events::{EventSink, PlaybackEvent};
use crate::media::{AudioChunk, Pts, StreamItem};
use crate::session::PlaybackSession;
use crate::status::PlayerStats;

/// Minimum host time between two underflow warnings.
const UNDERFLOW_WARN_INTERVAL: Duration = Duration::from_secs(1);

/// What the host should do after a callback returns.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CallbackFlow {
    Continue,
    /// The session is over; the host outputs silence from now on.
    Stop,
}

pub struct AudioOutputCallback {
    session: Arc<PlaybackSession>,
    queue: Arc<AudioQueue>,
    events: EventSink,
    stats: Arc<PlayerStats>,
    current: Option<AudioChunk>,
    started: bool,
    /// Host time of the session start, when this callback started it.
    start_time: Option<Duration>,
    in_underflow: bool,
    last_warning: Option<Duration>,
}

impl AudioOutputCallback {
    pub fn new(
        session: Arc<PlaybackSession>,
        queue: Arc<AudioQueue>,
        events: EventSink,
        stats: Arc<PlayerStats>,
    ) -> Self {
        Self {
            session,
            queue,
            events,
            stats,
            current: None,
            started: false,
            start_time: None,
            in_underflow: false,
            last_warning: None,
        }
    }

    /// Fill `out` with interleaved samples at the session format.
    ///
    /// `host_time` is the host clock time at which `out` will be heard.
    pub fn fill(&mut self, out: &mut [f32], host_time: Duration) -> CallbackFlow {
        if self.session.is_aborted() {
            out.fill(0.0);
            return CallbackFlow::Stop;
        }

        if !self.started {
            self.started = true;
            if self.session.mark_started(host_time) {
                self.start_time = Some(host_time);
                tracing::debug!(
                    session = self.session.id(),
                    host_time_us = host_time.as_micros() as u64,
                    "audio output started"
                );
            }
        }

        let mut written = 0;
        while written < out.len() {
            if let Some(chunk) = self.current.as_mut() {
                if !chunk.is_exhausted() {
                    written += chunk.extract(&mut out[written..]);
                    continue;
                }
                self.current = None;
                self.stats.chunk_played();
            }

            if self.session.is_aborted() {
                out[written..].fill(0.0);
                return CallbackFlow::Stop;
            }

            match self.queue.try_pop() {
                Some(StreamItem::Data(chunk)) => {
                    if let Some(pts) = chunk.pts() {
                        self.track_latency(pts, host_time);
                        self.events.emit(PlaybackEvent::AudioPosition(pts));
                    }
                    self.in_underflow = false;
                    self.current = Some(chunk);
                }
                Some(StreamItem::End) => {
                    out[written..].fill(0.0);
                    tracing::debug!(session = self.session.id(), "audio stream ended");
                    return CallbackFlow::Stop;
                }
                None => {
                    let missing = out.len() - written;
                    out[written..].fill(0.0);
                    self.underflow(missing, host_time);
                    return CallbackFlow::Continue;
                }
            }
        }

        CallbackFlow::Continue
    }

    /// Record how far behind its schedule the chunk at `pts` is heard.
    fn track_latency(&self, pts: Pts, host_time: Duration) {
        let Some(start_time) = self.start_time else {
            return;
        };
        let expected_us = self.session.speed().scale_micros(
            self.session
                .frame_rate()
                .pts_to_micros(pts - self.session.start_pts()),
        );
        let actual_us =
            i64::try_from(host_time.saturating_sub(start_time).as_micros()).unwrap_or(i64::MAX);
        self.session
            .set_audio_latency_us(actual_us.saturating_sub(expected_us));
    }

    fn underflow(&mut self, samples: usize, host_time: Duration) {
        let new_incident = !self.in_underflow;
        self.in_underflow = true;
        self.stats.underrun(samples, new_incident);
        if new_incident {
            self.events.emit(PlaybackEvent::Underflow { samples });
        }

        let due = self
            .last_warning
            .is_none_or(|last| host_time.saturating_sub(last) >= UNDERFLOW_WARN_INTERVAL);
        if due {
            self.last_warning = Some(host_time);
            tracing::warn!(
                session = self.session.id(),
                samples,
                "audio underflow; writing silence"
            );
        }
    }
}
