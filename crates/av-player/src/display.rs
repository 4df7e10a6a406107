//! Video display worker: paces decoded frames against the audio clock.
//!
//! The worker waits until the audio callback marks the session started, then for every frame
//! computes how long to wait until its presentation time. Frames that are too late or
//! implausibly early are dropped without waiting.

use std::sync::{Arc, Mutex, MutexGuard};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use anyhow::{Context, Result};
use av_player_types::PlaybackEndReason;

use crate::buffer::VideoQueue;
use crate::clock::HostClock;
use crate::events::{EventSink, PlaybackEvent};
use crate::media::{FrameRate, Pts, StreamItem, VideoFrame};
use crate::session::{PlaybackSession, SessionStart, Speed};
use crate::status::PlayerStats;

const FIRST_SKIP_REQUEST: u32 = 5;
const MAX_SKIP_REQUEST: u32 = 80;

/// Receiver of displayed frames (a widget, a window, a recorder).
pub trait DisplaySurface: Send + Sync {
    /// Show `frame`. Called from the display worker and from `move_to` on the owner thread.
    fn publish(&self, frame: Arc<VideoFrame>);

    /// Show nothing.
    fn clear(&self);
}

/// The frame currently on screen, shared with the paint path.
#[derive(Debug, Default)]
pub struct FrameSlot {
    frame: Mutex<Option<Arc<VideoFrame>>>,
}

impl FrameSlot {
    fn lock(&self) -> MutexGuard<'_, Option<Arc<VideoFrame>>> {
        self.frame.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn store(&self, frame: Option<Arc<VideoFrame>>) {
        *self.lock() = frame;
    }

    pub fn current(&self) -> Option<Arc<VideoFrame>> {
        self.lock().clone()
    }

    pub fn pts(&self) -> Option<Pts> {
        self.lock().as_ref().map(|f| f.pts())
    }
}

/// Drop thresholds, in microseconds of computed sleep time.
///
/// A frame whose sleep is below `late_us` is too late to show; above `early_us` it is
/// considered a timing glitch and skipped as well.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PacingConfig {
    pub late_us: i64,
    pub early_us: i64,
}

impl PacingConfig {
    pub fn from_millis(late_ms: i64, early_ms: i64) -> Self {
        Self {
            late_us: late_ms.saturating_mul(1000),
            early_us: early_ms.saturating_mul(1000),
        }
    }
}

impl Default for PacingConfig {
    fn default() -> Self {
        Self::from_millis(0, 1000)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FrameDecision {
    Show { wait: Duration },
    Drop { sleep_us: i64 },
}

/// Decide what to do with the frame at `pts`, `elapsed` after the session start.
pub fn schedule(
    pacing: &PacingConfig,
    frame_rate: FrameRate,
    speed: Speed,
    start: &SessionStart,
    pts: Pts,
    elapsed: Duration,
) -> FrameDecision {
    let offset_us = speed.scale_micros(frame_rate.pts_to_micros(pts - start.pts));
    let elapsed_us = i64::try_from(elapsed.as_micros()).unwrap_or(i64::MAX);
    let sleep_us = offset_us.saturating_sub(elapsed_us);
    if sleep_us < pacing.late_us || sleep_us > pacing.early_us {
        FrameDecision::Drop { sleep_us }
    } else {
        FrameDecision::Show {
            wait: Duration::from_micros(sleep_us.max(0) as u64),
        }
    }
}

/// Time since the session start as heard on the audio output: host time less the measured
/// output latency.
fn audio_elapsed(now: Duration, start: &SessionStart, latency_us: i64) -> Duration {
    let wall_us = i64::try_from(now.saturating_sub(start.time).as_micros()).unwrap_or(i64::MAX);
    Duration::from_micros(wall_us.saturating_sub(latency_us).max(0) as u64)
}

pub struct VideoDisplayWorker {
    pub session: Arc<PlaybackSession>,
    pub queue: Arc<VideoQueue>,
    pub slot: Arc<FrameSlot>,
    pub surface: Arc<dyn DisplaySurface>,
    pub clock: Arc<dyn HostClock>,
    pub events: EventSink,
    pub stats: Arc<PlayerStats>,
    pub pacing: PacingConfig,
    /// Capacity the video queue gets back once the first frame arrived.
    pub video_capacity: usize,
}

impl VideoDisplayWorker {
    pub fn spawn(self) -> Result<JoinHandle<()>> {
        thread::Builder::new()
            .name("video-display".to_string())
            .spawn(move || self.run())
            .context("spawn video display thread")
    }

    pub fn run(self) {
        let Some(start) = self.session.wait_for_start() else {
            tracing::debug!(session = self.session.id(), "display start cancelled");
            return;
        };

        let mut capacity_restored = false;
        let mut next_skip = FIRST_SKIP_REQUEST;

        while !self.session.is_aborted() {
            let Some(item) = self.queue.pop() else {
                continue;
            };
            if !capacity_restored {
                self.queue.resize(self.video_capacity);
                capacity_restored = true;
            }

            let frame = match item {
                StreamItem::Data(frame) => frame,
                StreamItem::End => {
                    tracing::info!(session = self.session.id(), "video playback finished");
                    self.stats.session_ended(PlaybackEndReason::Eof);
                    self.events.emit(PlaybackEvent::Finished);
                    return;
                }
            };

            if self.session.range_end().is_some_and(|end| frame.pts() > end) {
                tracing::debug!(session = self.session.id(), pts = frame.pts(), "range end reached");
                self.stats.session_ended(PlaybackEndReason::RangeEnd);
                self.events.emit(PlaybackEvent::RangeEnd(frame.pts()));
                return;
            }

            let elapsed = audio_elapsed(
                self.clock.now(),
                &start,
                self.session.audio_latency_us(),
            );
            match schedule(
                &self.pacing,
                self.session.frame_rate(),
                self.session.speed(),
                &start,
                frame.pts(),
                elapsed,
            ) {
                FrameDecision::Drop { sleep_us } => {
                    tracing::debug!(
                        session = self.session.id(),
                        pts = frame.pts(),
                        sleep_us,
                        "dropping frame"
                    );
                    self.stats.frame_dropped();
                    self.events.emit(PlaybackEvent::FrameDropped {
                        pts: frame.pts(),
                        sleep_us,
                    });
                    if sleep_us < 0 && self.queue.is_empty() {
                        self.session.request_skip(next_skip);
                        next_skip = (next_skip * 2).min(MAX_SKIP_REQUEST);
                    }
                }
                FrameDecision::Show { wait } => {
                    if !self.session.sleep(self.clock.as_ref(), wait) {
                        break;
                    }
                    next_skip = FIRST_SKIP_REQUEST;
                    let pts = frame.pts();
                    self.slot.store(Some(frame.clone()));
                    self.surface.publish(frame);
                    self.stats.frame_shown(pts);
                    self.events.emit(PlaybackEvent::Position(pts));
                }
            }
        }

        tracing::debug!(session = self.session.id(), "display worker aborted");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use crate::events;
    use crate::media::PixelFormat;
    use crate::testing::{ManualClock, RecordingSurface};

    fn frame(pts: Pts) -> StreamItem<Arc<VideoFrame>> {
        StreamItem::Data(Arc::new(VideoFrame::new(PixelFormat::Rgb24, 2, 2, pts, 1)))
    }

    struct Harness {
        session: Arc<PlaybackSession>,
        queue: Arc<VideoQueue>,
        slot: Arc<FrameSlot>,
        surface: Arc<RecordingSurface>,
        clock: Arc<ManualClock>,
        stats: Arc<PlayerStats>,
        rx: crossbeam_channel::Receiver<PlaybackEvent>,
        worker: VideoDisplayWorker,
    }

    fn harness(speed: Speed, range_end: Option<Pts>) -> Harness {
        let session = Arc::new(PlaybackSession::new(
            1,
            0,
            speed,
            FrameRate::default(),
            range_end,
        ));
        let queue = Arc::new(VideoQueue::new(64));
        let slot = Arc::new(FrameSlot::default());
        let clock = Arc::new(ManualClock::new());
        let surface = Arc::new(RecordingSurface::with_clock(clock.clone()));
        let stats = Arc::new(PlayerStats::default());
        let (sink, rx) = events::channel(256);
        let worker = VideoDisplayWorker {
            session: session.clone(),
            queue: queue.clone(),
            slot: slot.clone(),
            surface: surface.clone(),
            clock: clock.clone(),
            events: sink,
            stats: stats.clone(),
            pacing: PacingConfig::default(),
            video_capacity: 20,
        };
        Harness {
            session,
            queue,
            slot,
            surface,
            clock,
            stats,
            rx,
            worker,
        }
    }

    #[test]
    fn schedule_applies_thresholds() {
        let pacing = PacingConfig::default();
        let rate = FrameRate::default();
        let start = SessionStart {
            time: Duration::ZERO,
            pts: 10,
        };
        let at = |pts, elapsed_ms| {
            schedule(
                &pacing,
                rate,
                Speed::NORMAL,
                &start,
                pts,
                Duration::from_millis(elapsed_ms),
            )
        };

        assert_eq!(at(11, 0), FrameDecision::Show {
            wait: Duration::from_millis(40)
        });
        assert_eq!(at(11, 40), FrameDecision::Show { wait: Duration::ZERO });
        assert_eq!(at(11, 50), FrameDecision::Drop { sleep_us: -10_000 });
        assert_eq!(at(40, 0), FrameDecision::Drop {
            sleep_us: 1_200_000
        });
    }

    #[test]
    fn schedule_scales_offset_by_speed() {
        let start = SessionStart {
            time: Duration::ZERO,
            pts: 0,
        };
        let fast = schedule(
            &PacingConfig::default(),
            FrameRate::default(),
            Speed::new(200),
            &start,
            10,
            Duration::ZERO,
        );
        assert_eq!(fast, FrameDecision::Show {
            wait: Duration::from_millis(200)
        });
    }

    #[test]
    fn audio_latency_holds_video_back() {
        let h = harness(Speed::NORMAL, None);
        h.session.mark_started(Duration::ZERO);
        // The first chunk was heard 200 ms late after underflowing callbacks.
        h.session.set_audio_latency_us(200_000);
        h.clock.advance(Duration::from_millis(200));
        for pts in 0..3 {
            h.queue.push(frame(pts));
        }
        h.queue.push(StreamItem::End);
        h.worker.run();

        assert_eq!(h.surface.published_pts(), vec![0, 1, 2]);
        assert_eq!(h.surface.publish_times(), vec![
            Duration::from_millis(200),
            Duration::from_millis(240),
            Duration::from_millis(280),
        ]);
        assert_eq!(h.stats.snapshot(0, 0).frames_dropped, 0);
    }

    #[test]
    fn audio_elapsed_subtracts_latency() {
        let start = SessionStart {
            time: Duration::from_millis(10),
            pts: 0,
        };
        let now = Duration::from_millis(250);
        assert_eq!(audio_elapsed(now, &start, 0), Duration::from_millis(240));
        assert_eq!(audio_elapsed(now, &start, 200_000), Duration::from_millis(40));
        assert_eq!(audio_elapsed(now, &start, -5_000), Duration::from_millis(245));
        assert_eq!(audio_elapsed(now, &start, 900_000), Duration::ZERO);
    }

    #[test]
    fn paces_frames_and_drops_outliers() {
        let h = harness(Speed::NORMAL, None);
        h.session.mark_started(Duration::ZERO);
        for pts in [0, 1, 2] {
            h.queue.push(frame(pts));
        }
        // Late: its time (40 ms) already passed when it arrives.
        h.queue.push(frame(1));
        // Too early: four seconds ahead of the clock.
        h.queue.push(frame(100));
        h.queue.push(frame(3));
        h.queue.push(StreamItem::End);

        h.worker.run();

        assert_eq!(h.surface.published_pts(), vec![0, 1, 2, 3]);
        assert_eq!(h.slot.pts(), Some(3));
        let snap = h.stats.snapshot(0, 0);
        assert_eq!(snap.frames_shown, 4);
        assert_eq!(snap.frames_dropped, 2);
        assert_eq!(snap.end_reason, Some(PlaybackEndReason::Eof));

        let events: Vec<_> = h.rx.try_iter().collect();
        assert!(events.contains(&PlaybackEvent::FrameDropped {
            pts: 1,
            sleep_us: -40_000
        }));
        assert!(events.contains(&PlaybackEvent::FrameDropped {
            pts: 100,
            sleep_us: 3_920_000
        }));
        assert_eq!(events.last(), Some(&PlaybackEvent::Finished));
        assert_eq!(h.clock.now(), Duration::from_millis(120));
    }

    #[test]
    fn elapsed_at_publish_never_decreases() {
        let h = harness(Speed::new(150), None);
        h.session.mark_started(Duration::ZERO);
        for pts in 0..30 {
            h.queue.push(frame(pts));
        }
        h.queue.push(StreamItem::End);
        h.worker.run();

        let times = h.surface.publish_times();
        assert_eq!(times.len(), 30);
        assert!(times.windows(2).all(|w| w[0] <= w[1]));
    }

    #[test]
    fn restores_capacity_after_first_frame() {
        let h = harness(Speed::NORMAL, None);
        h.queue.resize(1);
        h.session.mark_started(Duration::ZERO);
        h.queue.push(frame(0));
        h.queue.force_push(StreamItem::End);
        h.worker.run();
        assert_eq!(h.queue.capacity(), 20);
    }

    #[test]
    fn stops_at_range_end() {
        let h = harness(Speed::NORMAL, Some(2));
        h.session.mark_started(Duration::ZERO);
        for pts in 0..6 {
            h.queue.push(frame(pts));
        }
        h.worker.run();

        assert_eq!(h.surface.published_pts(), vec![0, 1, 2]);
        assert!(h.rx.try_iter().any(|e| e == PlaybackEvent::RangeEnd(3)));
        assert_eq!(h.stats.end_reason(), Some(PlaybackEndReason::RangeEnd));
    }

    #[test]
    fn late_frame_with_empty_queue_requests_skip() {
        let h = harness(Speed::NORMAL, None);
        h.session.mark_started(Duration::ZERO);
        h.clock.advance(Duration::from_millis(400));
        h.queue.push(frame(1));
        let queue = h.queue.clone();
        let session = h.session.clone();
        let worker = h.worker.spawn().unwrap();

        while session.take_skip() == 0 {
            thread::yield_now();
        }
        session.abort();
        queue.flush();
        worker.join().unwrap();
        assert!(h.surface.published_pts().is_empty());
    }

    #[test]
    fn cancelled_start_exits_without_popping() {
        let h = harness(Speed::NORMAL, None);
        h.queue.push(frame(0));
        h.session.cancel_start();
        h.worker.run();
        assert_eq!(h.queue.len(), 1);
        assert!(h.surface.published_pts().is_empty());
    }
}
