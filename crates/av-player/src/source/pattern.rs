use std::f32::consts::TAU;
use std::sync::{Mutex, MutexGuard};

use anyhow::Result;

use crate::media::{
    AudioChunk, AudioParams, FrameRate, MediaSource, PixelFormat, Pts, VideoFrame, VideoParams,
};

const BEEP_HZ: f32 = 1000.0;
const BEEP_LEVEL: f32 = 0.25;
/// Frames at the start of every second carrying the beep and the flash.
const SYNC_FRAMES: i64 = 2;

/// 75% color bars, left to right.
const BARS: [[u8; 3]; 7] = [
    [191, 191, 191],
    [191, 191, 0],
    [0, 191, 191],
    [0, 191, 0],
    [191, 0, 191],
    [191, 0, 0],
    [0, 0, 191],
];

/// Synthetic timeline of `length` frames (endless when `None`).
pub struct TestPatternSource {
    frame_rate: FrameRate,
    length: Option<Pts>,
    audio_pos: Mutex<Pts>,
    video_pos: Mutex<Pts>,
}

impl TestPatternSource {
    pub fn new(frame_rate: FrameRate, length: Option<Pts>) -> Self {
        Self {
            frame_rate,
            length,
            audio_pos: Mutex::new(0),
            video_pos: Mutex::new(0),
        }
    }

    fn is_past_end(&self, pts: Pts) -> bool {
        self.length.is_some_and(|len| pts >= len)
    }
}

fn lock(pos: &Mutex<Pts>) -> MutexGuard<'_, Pts> {
    pos.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Frames per second rounded to a whole number.
pub(crate) fn whole_fps(rate: FrameRate) -> i64 {
    let den = rate.den.max(1) as i64;
    ((rate.num as i64 + den / 2) / den).max(1)
}

fn is_sync_frame(rate: FrameRate, pts: Pts) -> bool {
    pts.rem_euclid(whole_fps(rate)) < SYNC_FRAMES
}

impl MediaSource for TestPatternSource {
    fn next_audio(&self, params: &AudioParams) -> Result<Option<AudioChunk>> {
        let mut pos = lock(&self.audio_pos);
        if self.is_past_end(*pos) {
            return Ok(None);
        }
        let pts = *pos;
        *pos += 1;
        drop(pos);

        let channels = params.channels.max(1) as usize;
        let rate = self.frame_rate;
        let frames = rate.samples_in_tick(pts, params.sample_rate);
        if !is_sync_frame(rate, pts) {
            return Ok(Some(AudioChunk::silence(channels, frames, Some(pts))));
        }

        let second = pts - pts.rem_euclid(whole_fps(rate));
        let first = (rate.samples_at(pts, params.sample_rate)
            - rate.samples_at(second, params.sample_rate)) as usize;
        let step = TAU * BEEP_HZ / params.sample_rate.max(1) as f32;
        let mut samples = Vec::with_capacity(frames * channels);
        for i in 0..frames {
            let v = BEEP_LEVEL * ((first + i) as f32 * step).sin();
            samples.extend(std::iter::repeat_n(v, channels));
        }
        Ok(Some(AudioChunk::new(channels, samples, Some(pts))))
    }

    fn next_video(&self, params: &VideoParams) -> Result<Option<VideoFrame>> {
        let mut pos = lock(&self.video_pos);
        if self.is_past_end(*pos) {
            return Ok(None);
        }
        let pts = *pos;
        *pos += 1;
        drop(pos);

        if params.skip {
            return Ok(Some(VideoFrame::new(params.pixel_format(), 0, 0, pts, 1)));
        }
        let flash = is_sync_frame(self.frame_rate, pts);
        Ok(Some(render_pattern(params, self.frame_rate, pts, flash)))
    }

    fn move_to(&self, pts: Pts) -> Result<()> {
        let pts = pts.max(0);
        *lock(&self.audio_pos) = pts;
        *lock(&self.video_pos) = pts;
        Ok(())
    }
}

/// Draw color bars with a marker sweeping across the bottom once per second.
///
/// A `flash` frame is plain white.
pub(crate) fn render_pattern(
    params: &VideoParams,
    frame_rate: FrameRate,
    pts: Pts,
    flash: bool,
) -> VideoFrame {
    let format = params.pixel_format();
    let (width, height) = (params.width, params.height);
    let mut frame = VideoFrame::new(format, width, height, pts, 1);
    if width == 0 || height == 0 {
        return frame;
    }

    let bpp = format.bytes_per_pixel();
    let fps = whole_fps(frame_rate);
    let marker_x = (pts.rem_euclid(fps) as u64 * width as u64 / fps as u64) as u32;
    let marker_w = (width / fps as u32).max(1);
    let band_y = height - height / 4;

    let data = frame.data_mut();
    for y in 0..height {
        for x in 0..width {
            let rgb = if flash {
                [255, 255, 255]
            } else if y >= band_y {
                if x >= marker_x && x < marker_x + marker_w {
                    [255, 255, 255]
                } else {
                    [16, 16, 16]
                }
            } else {
                BARS[(x as usize * BARS.len()) / width as usize]
            };
            let at = (y as usize * width as usize + x as usize) * bpp;
            data[at..at + 3].copy_from_slice(&rgb);
            if format == PixelFormat::Rgba32 {
                data[at + 3] = 255;
            }
        }
    }
    frame
}

#[cfg(test)]
mod tests {
    use super::*;

    fn video(width: u32, height: u32, want_alpha: bool) -> VideoParams {
        VideoParams {
            width,
            height,
            want_alpha,
            skip: false,
        }
    }

    const AUDIO: AudioParams = AudioParams {
        sample_rate: 48_000,
        channels: 2,
    };

    #[test]
    fn streams_end_at_length() {
        let source = TestPatternSource::new(FrameRate::default(), Some(3));
        let mut audio = 0;
        while source.next_audio(&AUDIO).unwrap().is_some() {
            audio += 1;
        }
        let mut frames = Vec::new();
        while let Some(f) = source.next_video(&video(8, 4, false)).unwrap() {
            frames.push(f.pts());
        }
        assert_eq!(audio, 3);
        assert_eq!(frames, vec![0, 1, 2]);
    }

    #[test]
    fn move_to_repositions_both_streams() {
        let source = TestPatternSource::new(FrameRate::default(), None);
        source.move_to(30).unwrap();
        assert_eq!(source.next_audio(&AUDIO).unwrap().unwrap().pts(), Some(30));
        assert_eq!(source.next_video(&video(8, 4, false)).unwrap().unwrap().pts(), 30);
    }

    #[test]
    fn beeps_only_on_sync_frames() {
        let source = TestPatternSource::new(FrameRate::default(), None);
        let first = source.next_audio(&AUDIO).unwrap().unwrap();
        assert_eq!(first.unread_len(), 1920 * 2);
        assert!(first.unread().iter().any(|s| s.abs() > 0.1));

        source.move_to(5).unwrap();
        let quiet = source.next_audio(&AUDIO).unwrap().unwrap();
        assert!(quiet.unread().iter().all(|s| *s == 0.0));
    }

    #[test]
    fn audio_keeps_pace_with_video_at_fractional_rates() {
        let ntsc = FrameRate::new(30_000, 1001);
        let source = TestPatternSource::new(ntsc, Some(1001));
        let params = AudioParams {
            sample_rate: 8000,
            channels: 1,
        };
        let mut frames = 0;
        while let Some(chunk) = source.next_audio(&params).unwrap() {
            frames += chunk.unread_len();
        }
        // 1001 ticks of 266.93 frames each, not 1001 * 266.
        assert_eq!(frames, 267_200);
        assert_eq!(frames as i64, ntsc.samples_at(1001, 8000));
    }

    #[test]
    fn flash_frame_is_white_and_bars_are_not() {
        let source = TestPatternSource::new(FrameRate::default(), None);
        let flash = source.next_video(&video(14, 8, true)).unwrap().unwrap();
        assert_eq!(flash.format(), PixelFormat::Rgba32);
        assert!(flash.data().iter().all(|b| *b == 255));

        source.move_to(10).unwrap();
        let bars = source.next_video(&video(14, 8, false)).unwrap().unwrap();
        assert_eq!(bars.data().len(), 14 * 8 * 3);
        assert_eq!(&bars.data()[..3], &BARS[0]);
        let last_bar = 13 * 3;
        assert_eq!(&bars.data()[last_bar..last_bar + 3], &BARS[6]);
    }

    #[test]
    fn skipped_frames_are_not_rendered() {
        let source = TestPatternSource::new(FrameRate::default(), None);
        let params = VideoParams {
            skip: true,
            ..video(640, 360, false)
        };
        let frame = source.next_video(&params).unwrap().unwrap();
        assert!(frame.data().is_empty());
        assert_eq!(frame.pts(), 0);
    }
}
