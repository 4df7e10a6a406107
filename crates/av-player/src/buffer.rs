//! Buffer workers: pull decoded media from the source and feed the pipeline queues.
//!
//! Each worker runs on its own thread and is the only writer of its queue while a session is
//! active. Both exit on end of data (after pushing [`StreamItem::End`]), on abort, or on a
//! source error, which is fatal to the session.

use std::sync::Arc;
use std::thread::{self, JoinHandle};

use anyhow::{Context, Result};
use av_player_types::PlaybackEndReason;

use crate::events::{EventSink, PlaybackEvent};
use crate::media::{
    AudioChunk, AudioParams, MediaSource, Pts, StreamItem, VideoFrame, VideoParams,
};
use crate::queue::BoundedQueue;
use crate::session::PlaybackSession;
use crate::status::PlayerStats;
use crate::stretch::TimeStretch;

pub type AudioQueue = BoundedQueue<StreamItem<AudioChunk>>;
pub type VideoQueue = BoundedQueue<StreamItem<Arc<VideoFrame>>>;

/// Audio producer for one session. Owns the time-stretch stage while it runs.
pub struct AudioBufferWorker {
    pub session: Arc<PlaybackSession>,
    pub source: Arc<dyn MediaSource>,
    pub queue: Arc<AudioQueue>,
    pub params: AudioParams,
    pub stretch: TimeStretch,
    pub events: EventSink,
    pub stats: Arc<PlayerStats>,
}

impl AudioBufferWorker {
    /// Run on a new thread. Joining returns the time-stretch stage.
    pub fn spawn(self) -> Result<JoinHandle<TimeStretch>> {
        thread::Builder::new()
            .name("audio-buffer".to_string())
            .spawn(move || self.run())
            .context("spawn audio buffer thread")
    }

    pub fn run(mut self) -> TimeStretch {
        let mut frames_out: u64 = 0;
        tracing::debug!(
            session = self.session.id(),
            speed = self.session.speed().percent(),
            "audio buffer worker started"
        );

        while !self.session.is_aborted() {
            let chunk = match self.source.next_audio(&self.params) {
                Ok(Some(chunk)) => chunk,
                Ok(None) => {
                    if let Err(e) = self.stretch.finish() {
                        self.fail(e);
                        break;
                    }
                    self.push_stretched(&mut frames_out);
                    self.queue.push(StreamItem::End);
                    tracing::debug!(session = self.session.id(), "audio source exhausted");
                    break;
                }
                Err(e) => {
                    self.fail(e);
                    break;
                }
            };

            if self.stretch.is_passthrough() {
                let mut chunk = chunk;
                if chunk.pts().is_none() {
                    chunk.set_pts(self.position_at(frames_out));
                }
                frames_out += (chunk.unread_len() / chunk.channels()) as u64;
                self.queue.push(StreamItem::Data(chunk));
            } else {
                if let Err(e) = self.stretch.send(&chunk) {
                    self.fail(e);
                    break;
                }
                self.push_stretched(&mut frames_out);
            }
        }

        self.stretch
    }

    fn push_stretched(&mut self, frames_out: &mut u64) {
        while let Some(mut chunk) = self.stretch.receive() {
            if self.session.is_aborted() {
                return;
            }
            chunk.set_pts(self.position_at(*frames_out));
            *frames_out += (chunk.unread_len() / chunk.channels()) as u64;
            self.queue.push(StreamItem::Data(chunk));
        }
    }

    /// Source timeline position of the output frame `frames_out`.
    fn position_at(&self, frames_out: u64) -> Pts {
        let rate = self.params.sample_rate.max(1) as u64;
        let source_frames = frames_out * self.session.speed().percent() as u64 / 100;
        let micros = (source_frames * 1_000_000 / rate) as i64;
        self.session.start_pts() + self.session.frame_rate().micros_to_pts(micros)
    }

    fn fail(&self, err: anyhow::Error) {
        fail_session(&self.session, &self.queue, &self.events, &self.stats, "audio", err);
    }
}

/// Video producer for one session.
pub struct VideoBufferWorker {
    pub session: Arc<PlaybackSession>,
    pub source: Arc<dyn MediaSource>,
    pub queue: Arc<VideoQueue>,
    pub params: VideoParams,
    pub events: EventSink,
    pub stats: Arc<PlayerStats>,
}

impl VideoBufferWorker {
    pub fn spawn(self) -> Result<JoinHandle<()>> {
        thread::Builder::new()
            .name("video-buffer".to_string())
            .spawn(move || self.run())
            .context("spawn video buffer thread")
    }

    pub fn run(self) {
        let skip_params = VideoParams {
            skip: true,
            ..self.params
        };

        while !self.session.is_aborted() {
            let skip = self.session.take_skip();
            if skip > 0 {
                tracing::debug!(session = self.session.id(), frames = skip, "skipping frames");
            }
            for _ in 0..skip {
                if self.session.is_aborted() {
                    return;
                }
                match self.source.next_video(&skip_params) {
                    Ok(Some(_)) => {}
                    Ok(None) => {
                        self.queue.push(StreamItem::End);
                        return;
                    }
                    Err(e) => {
                        self.fail(e);
                        return;
                    }
                }
            }

            match self.source.next_video(&self.params) {
                Ok(Some(frame)) => self.queue.push(StreamItem::Data(Arc::new(frame))),
                Ok(None) => {
                    self.queue.push(StreamItem::End);
                    tracing::debug!(session = self.session.id(), "video source exhausted");
                    return;
                }
                Err(e) => {
                    self.fail(e);
                    return;
                }
            }
        }
    }

    fn fail(&self, err: anyhow::Error) {
        fail_session(&self.session, &self.queue, &self.events, &self.stats, "video", err);
    }
}

fn fail_session<T>(
    session: &PlaybackSession,
    queue: &BoundedQueue<StreamItem<T>>,
    events: &EventSink,
    stats: &PlayerStats,
    stream: &'static str,
    err: anyhow::Error,
) {
    tracing::error!(session = session.id(), stream, "source error: {err:#}");
    stats.session_ended(PlaybackEndReason::Error);
    session.abort();
    queue.force_push(StreamItem::End);
    events.emit(PlaybackEvent::SourceError(format!("{stream}: {err:#}")));
}
