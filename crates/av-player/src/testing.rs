//! Test doubles shared by the unit tests.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::{Result, anyhow};

use crate::clock::HostClock;
use crate::display::DisplaySurface;
use crate::media::{AudioChunk, AudioParams, MediaSource, Pts, VideoFrame, VideoParams};

/// Source producing `audio_chunks` chunks and `video_frames` frames, each stamped with its
/// index, starting from the last `move_to` position.
pub struct ScriptedSource {
    audio_chunks: usize,
    video_frames: usize,
    audio_frames: usize,
    stamp_audio: bool,
    fail_audio_at: Option<usize>,
    audio_pos: Mutex<usize>,
    video_pos: Mutex<usize>,
    video_calls: AtomicUsize,
    skipped_video: AtomicUsize,
    moves: Mutex<Vec<Pts>>,
}

impl ScriptedSource {
    pub fn new(audio_chunks: usize, video_frames: usize) -> Self {
        Self {
            audio_chunks,
            video_frames,
            audio_frames: 10,
            stamp_audio: true,
            fail_audio_at: None,
            audio_pos: Mutex::new(0),
            video_pos: Mutex::new(0),
            video_calls: AtomicUsize::new(0),
            skipped_video: AtomicUsize::new(0),
            moves: Mutex::new(Vec::new()),
        }
    }

    pub fn with_audio_frames(mut self, frames: usize) -> Self {
        self.audio_frames = frames;
        self
    }

    pub fn without_audio_pts(mut self) -> Self {
        self.stamp_audio = false;
        self
    }

    pub fn fail_audio_at(mut self, index: usize) -> Self {
        self.fail_audio_at = Some(index);
        self
    }

    /// Number of `next_video` calls, skipped ones included.
    pub fn video_calls(&self) -> usize {
        self.video_calls.load(Ordering::SeqCst)
    }

    pub fn skipped_video(&self) -> usize {
        self.skipped_video.load(Ordering::SeqCst)
    }

    pub fn moves(&self) -> Vec<Pts> {
        self.moves.lock().unwrap().clone()
    }
}

impl MediaSource for ScriptedSource {
    fn next_audio(&self, params: &AudioParams) -> Result<Option<AudioChunk>> {
        let mut pos = self.audio_pos.lock().unwrap();
        if *pos >= self.audio_chunks {
            return Ok(None);
        }
        if self.fail_audio_at == Some(*pos) {
            return Err(anyhow!("scripted failure at chunk {}", *pos));
        }
        let channels = params.channels as usize;
        let pts = self.stamp_audio.then_some(*pos as Pts);
        *pos += 1;
        Ok(Some(AudioChunk::new(
            channels,
            vec![0.25; self.audio_frames * channels],
            pts,
        )))
    }

    fn next_video(&self, params: &VideoParams) -> Result<Option<VideoFrame>> {
        self.video_calls.fetch_add(1, Ordering::SeqCst);
        let mut pos = self.video_pos.lock().unwrap();
        if *pos >= self.video_frames {
            return Ok(None);
        }
        if params.skip {
            self.skipped_video.fetch_add(1, Ordering::SeqCst);
        }
        let frame = VideoFrame::new(
            params.pixel_format(),
            params.width,
            params.height,
            *pos as Pts,
            1,
        );
        *pos += 1;
        Ok(Some(frame))
    }

    fn move_to(&self, pts: Pts) -> Result<()> {
        let pos = pts.max(0) as usize;
        *self.audio_pos.lock().unwrap() = pos;
        *self.video_pos.lock().unwrap() = pos;
        self.moves.lock().unwrap().push(pts);
        Ok(())
    }
}

/// Surface remembering every published frame and when it was published.
#[derive(Default)]
pub struct RecordingSurface {
    clock: Option<Arc<dyn HostClock>>,
    published: Mutex<Vec<(Pts, Duration)>>,
    clears: AtomicUsize,
}

impl RecordingSurface {
    pub fn with_clock(clock: Arc<dyn HostClock>) -> Self {
        Self {
            clock: Some(clock),
            ..Self::default()
        }
    }

    pub fn published_pts(&self) -> Vec<Pts> {
        self.published.lock().unwrap().iter().map(|(p, _)| *p).collect()
    }

    pub fn publish_times(&self) -> Vec<Duration> {
        self.published.lock().unwrap().iter().map(|(_, t)| *t).collect()
    }

    pub fn clears(&self) -> usize {
        self.clears.load(Ordering::SeqCst)
    }
}

impl DisplaySurface for RecordingSurface {
    fn publish(&self, frame: Arc<VideoFrame>) {
        let at = self.clock.as_ref().map(|c| c.now()).unwrap_or_default();
        self.published.lock().unwrap().push((frame.pts(), at));
    }

    fn clear(&self) {
        self.clears.fetch_add(1, Ordering::SeqCst);
    }
}

/// Clock that only moves when slept on or advanced explicitly.
#[derive(Default)]
pub struct ManualClock {
    now: Mutex<Duration>,
}

impl ManualClock {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn advance(&self, d: Duration) {
        *self.now.lock().unwrap() += d;
    }
}

impl HostClock for ManualClock {
    fn now(&self) -> Duration {
        *self.now.lock().unwrap()
    }

    fn sleep(&self, d: Duration) {
        self.advance(d);
        std::thread::yield_now();
    }
}
