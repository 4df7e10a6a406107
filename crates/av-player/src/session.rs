//! State shared by the threads of one playback session.
//!
//! A [`PlaybackSession`] is created by `play()`, handed to every worker and the audio callback,
//! and dropped once teardown joined them. It is never reused: a new `play()` builds a new one.

use std::sync::atomic::{AtomicBool, AtomicI64, AtomicU32, Ordering};
use std::sync::{Condvar, Mutex, MutexGuard};
use std::time::Duration;

use crate::clock::HostClock;
use crate::media::{FrameRate, Pts};

/// Longest single wait of an abort-aware sleep.
const SLEEP_SLICE: Duration = Duration::from_millis(10);

/// Playback speed in percent of real time.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub struct Speed(u16);

impl Speed {
    pub const MIN: u16 = 50;
    pub const MAX: u16 = 200;
    pub const NORMAL: Speed = Speed(100);

    /// Clamp `percent` into the supported range.
    pub fn new(percent: u16) -> Self {
        Self(percent.clamp(Self::MIN, Self::MAX))
    }

    pub fn percent(&self) -> u16 {
        self.0
    }

    pub fn is_normal(&self) -> bool {
        self.0 == 100
    }

    /// Wall-clock duration of `micros` of media time played at this speed.
    pub fn scale_micros(&self, micros: i64) -> i64 {
        micros.saturating_mul(100) / self.0 as i64
    }
}

impl Default for Speed {
    fn default() -> Self {
        Self::NORMAL
    }
}

/// When and where the audio output began.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SessionStart {
    /// Host clock reading at the first audio callback.
    pub time: Duration,
    /// Timeline position the session started from.
    pub pts: Pts,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum StartMarker {
    Pending,
    Started(SessionStart),
    Cancelled,
}

pub struct PlaybackSession {
    id: u64,
    start_pts: Pts,
    speed: Speed,
    frame_rate: FrameRate,
    range_end: Option<Pts>,
    latency_us: AtomicI64,
    abort: AtomicBool,
    start: Mutex<StartMarker>,
    start_cv: Condvar,
    skip_frames: AtomicU32,
}

impl PlaybackSession {
    pub fn new(
        id: u64,
        start_pts: Pts,
        speed: Speed,
        frame_rate: FrameRate,
        range_end: Option<Pts>,
    ) -> Self {
        Self {
            id,
            start_pts,
            speed,
            frame_rate,
            range_end,
            latency_us: AtomicI64::new(0),
            abort: AtomicBool::new(false),
            start: Mutex::new(StartMarker::Pending),
            start_cv: Condvar::new(),
            skip_frames: AtomicU32::new(0),
        }
    }

    fn marker(&self) -> MutexGuard<'_, StartMarker> {
        self.start.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn start_pts(&self) -> Pts {
        self.start_pts
    }

    pub fn speed(&self) -> Speed {
        self.speed
    }

    pub fn frame_rate(&self) -> FrameRate {
        self.frame_rate
    }

    /// Last frame of the active play range, if any.
    pub fn range_end(&self) -> Option<Pts> {
        self.range_end
    }

    /// Host time by which the audio being heard trails its scheduled position.
    ///
    /// Updated by the output callback each time it starts a new chunk; negative when audio runs
    /// ahead of schedule.
    pub fn audio_latency_us(&self) -> i64 {
        self.latency_us.load(Ordering::Relaxed)
    }

    pub fn set_audio_latency_us(&self, micros: i64) {
        self.latency_us.store(micros, Ordering::Relaxed);
    }

    /// Raise the abort flag and wake a display worker still waiting for the start.
    pub fn abort(&self) {
        self.abort.store(true, Ordering::SeqCst);
        let _g = self.marker();
        self.start_cv.notify_all();
    }

    pub fn is_aborted(&self) -> bool {
        self.abort.load(Ordering::SeqCst)
    }

    /// Record the start of audio output. Only the first call has an effect.
    ///
    /// Returns `true` when this call started the session.
    pub fn mark_started(&self, host_time: Duration) -> bool {
        let mut g = self.marker();
        if *g != StartMarker::Pending {
            return false;
        }
        *g = StartMarker::Started(SessionStart {
            time: host_time,
            pts: self.start_pts,
        });
        drop(g);
        self.start_cv.notify_all();
        true
    }

    pub fn is_started(&self) -> bool {
        matches!(*self.marker(), StartMarker::Started(_))
    }

    /// Release a display worker waiting in [`Self::wait_for_start`] without starting.
    pub fn cancel_start(&self) {
        let mut g = self.marker();
        if *g == StartMarker::Pending {
            *g = StartMarker::Cancelled;
        }
        drop(g);
        self.start_cv.notify_all();
    }

    /// Block until the audio output started.
    ///
    /// Returns `None` when the start was cancelled or the session aborted first.
    pub fn wait_for_start(&self) -> Option<SessionStart> {
        let mut g = self.marker();
        loop {
            match *g {
                StartMarker::Started(start) => return Some(start),
                StartMarker::Cancelled => return None,
                StartMarker::Pending if self.is_aborted() => return None,
                StartMarker::Pending => {
                    g = self
                        .start_cv
                        .wait(g)
                        .unwrap_or_else(|poisoned| poisoned.into_inner());
                }
            }
        }
    }

    /// Ask the video buffer worker to discard the next `frames` frames.
    pub fn request_skip(&self, frames: u32) {
        self.skip_frames.store(frames, Ordering::Relaxed);
    }

    /// Take the pending skip request, leaving none behind.
    pub fn take_skip(&self) -> u32 {
        self.skip_frames.swap(0, Ordering::Relaxed)
    }

    /// Sleep for `d` on `clock`, waking early when the session is aborted.
    ///
    /// Returns `false` when the sleep was cut short by an abort.
    pub fn sleep(&self, clock: &dyn HostClock, d: Duration) -> bool {
        let deadline = clock.now() + d;
        loop {
            if self.is_aborted() {
                return false;
            }
            let now = clock.now();
            if now >= deadline {
                return true;
            }
            clock.sleep((deadline - now).min(SLEEP_SLICE));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    use crate::clock::MonotonicClock;

    fn session() -> Arc<PlaybackSession> {
        Arc::new(PlaybackSession::new(
            1,
            40,
            Speed::NORMAL,
            FrameRate::default(),
            None,
        ))
    }

    #[test]
    fn speed_is_clamped() {
        assert_eq!(Speed::new(10).percent(), 50);
        assert_eq!(Speed::new(500).percent(), 200);
        assert_eq!(Speed::new(150).percent(), 150);
        assert_eq!(Speed::new(200).scale_micros(40_000), 20_000);
        assert_eq!(Speed::new(50).scale_micros(40_000), 80_000);
    }

    #[test]
    fn only_first_start_counts() {
        let s = session();
        assert!(s.mark_started(Duration::from_millis(5)));
        assert!(!s.mark_started(Duration::from_millis(9)));
        assert_eq!(
            s.wait_for_start(),
            Some(SessionStart {
                time: Duration::from_millis(5),
                pts: 40,
            })
        );
    }

    #[test]
    fn start_wakes_waiter() {
        let s = session();
        let waiter = {
            let s = s.clone();
            thread::spawn(move || s.wait_for_start())
        };
        thread::sleep(Duration::from_millis(10));
        s.mark_started(Duration::from_millis(1));
        assert_eq!(waiter.join().unwrap().map(|st| st.pts), Some(40));
    }

    #[test]
    fn cancel_releases_waiter_and_blocks_late_start() {
        let s = session();
        let waiter = {
            let s = s.clone();
            thread::spawn(move || s.wait_for_start())
        };
        thread::sleep(Duration::from_millis(10));
        s.cancel_start();
        assert_eq!(waiter.join().unwrap(), None);
        assert!(!s.mark_started(Duration::ZERO));
        assert!(!s.is_started());
    }

    #[test]
    fn abort_releases_waiter() {
        let s = session();
        let waiter = {
            let s = s.clone();
            thread::spawn(move || s.wait_for_start())
        };
        thread::sleep(Duration::from_millis(10));
        s.abort();
        assert_eq!(waiter.join().unwrap(), None);
    }

    #[test]
    fn sleep_is_cut_short_by_abort() {
        let s = session();
        let clock = MonotonicClock::new();
        let aborter = {
            let s = s.clone();
            thread::spawn(move || {
                thread::sleep(Duration::from_millis(20));
                s.abort();
            })
        };
        let started = clock.now();
        assert!(!s.sleep(&clock, Duration::from_secs(10)));
        assert!(clock.now() - started < Duration::from_secs(5));
        aborter.join().unwrap();
    }

    #[test]
    fn latency_starts_at_zero() {
        let s = PlaybackSession::new(1, 10, Speed::new(200), FrameRate::default(), Some(12));
        assert_eq!(s.range_end(), Some(12));
        assert_eq!(s.audio_latency_us(), 0);
        s.set_audio_latency_us(-3_000);
        assert_eq!(s.audio_latency_us(), -3_000);
    }

    #[test]
    fn skip_request_is_taken_once() {
        let s = session();
        s.request_skip(5);
        assert_eq!(s.take_skip(), 5);
        assert_eq!(s.take_skip(), 0);
    }
}
