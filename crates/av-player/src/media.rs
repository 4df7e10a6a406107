//! Media data carried through the pipeline and the [`MediaSource`] seam.
//!
//! Audio travels as interleaved `f32` [`AudioChunk`]s and video as [`VideoFrame`]s.
//! Both are stamped with a [`Pts`]: a frame index on the project frame rate.

use std::fmt;

use anyhow::Result;
use serde::Deserialize;

/// Presentation timestamp: index of a frame tick on the project timeline.
pub type Pts = i64;

/// Item type of both pipeline queues: data, or the end-of-stream sentinel.
#[derive(Debug)]
pub enum StreamItem<T> {
    Data(T),
    End,
}

/// Project frame rate as a rational number of frames per second.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Deserialize)]
pub struct FrameRate {
    pub num: u32,
    pub den: u32,
}

impl Default for FrameRate {
    fn default() -> Self {
        Self { num: 25, den: 1 }
    }
}

impl FrameRate {
    pub fn new(num: u32, den: u32) -> Self {
        debug_assert!(num > 0 && den > 0, "frame rate must be positive");
        Self { num, den }
    }

    /// Wall-clock length of `pts` frame ticks, in microseconds (negative for negative pts).
    pub fn pts_to_micros(&self, pts: Pts) -> i64 {
        pts.saturating_mul(1_000_000).saturating_mul(self.den as i64) / self.num.max(1) as i64
    }

    /// Number of whole frame ticks covered by `micros`.
    pub fn micros_to_pts(&self, micros: i64) -> Pts {
        micros.saturating_mul(self.num as i64) / (1_000_000i64 * self.den.max(1) as i64)
    }

    /// Audio frames (samples per channel) covering one pts tick at `sample_rate`, rounded down.
    pub fn samples_per_pts(&self, sample_rate: u32) -> usize {
        let frames = sample_rate as u64 * self.den as u64 / self.num.max(1) as u64;
        frames.max(1) as usize
    }

    /// Audio frames from pts 0 to the start of tick `pts` at `sample_rate`.
    pub fn samples_at(&self, pts: Pts, sample_rate: u32) -> i64 {
        let scaled = pts as i128 * sample_rate as i128 * self.den as i128;
        scaled.div_euclid(self.num.max(1) as i128) as i64
    }

    /// Audio frames covering the tick at `pts`.
    ///
    /// Varies by one between ticks when the rate does not divide evenly, so that consecutive
    /// ticks add up to [`Self::samples_at`] without drifting.
    pub fn samples_in_tick(&self, pts: Pts, sample_rate: u32) -> usize {
        let frames = self.samples_at(pts + 1, sample_rate) - self.samples_at(pts, sample_rate);
        frames.max(0) as usize
    }
}

/// Decoded, interleaved audio owned by the pipeline.
///
/// Samples are consumed front to back through a read cursor. A chunk may be shortened once,
/// before any read, with [`AudioChunk::set_adjusted_length`]; the trimmed tail is never
/// handed out. Invariant: `read + skipped <= total`.
pub struct AudioChunk {
    samples: Vec<f32>,
    channels: usize,
    read: usize,
    skipped: usize,
    pts: Option<Pts>,
}

impl AudioChunk {
    pub fn new(channels: usize, samples: Vec<f32>, pts: Option<Pts>) -> Self {
        debug_assert!(channels > 0, "audio chunk needs at least one channel");
        debug_assert!(
            samples.len() % channels.max(1) == 0,
            "audio chunk must hold whole frames"
        );
        Self {
            samples,
            channels,
            read: 0,
            skipped: 0,
            pts,
        }
    }

    /// A chunk of `frames` silent frames.
    pub fn silence(channels: usize, frames: usize, pts: Option<Pts>) -> Self {
        Self::new(channels, vec![0.0; frames * channels], pts)
    }

    pub fn channels(&self) -> usize {
        self.channels
    }

    /// Total number of samples (all channels), including trimmed ones.
    pub fn total_samples(&self) -> usize {
        self.samples.len()
    }

    pub fn pts(&self) -> Option<Pts> {
        self.pts
    }

    /// Stamp the chunk. The pts can be written only once.
    pub fn set_pts(&mut self, pts: Pts) {
        debug_assert!(self.pts.is_none(), "audio chunk pts is write-once");
        self.pts = Some(pts);
    }

    /// Shorten the chunk to `samples` samples without reallocating.
    pub fn set_adjusted_length(&mut self, samples: usize) {
        debug_assert_eq!(self.read, 0, "adjusted length must be set before reading");
        debug_assert!(samples <= self.samples.len(), "adjusted length exceeds chunk");
        self.skipped = self.samples.len() - samples.min(self.samples.len());
    }

    pub fn unread_len(&self) -> usize {
        self.samples.len() - self.skipped - self.read
    }

    pub fn unread(&self) -> &[f32] {
        &self.samples[self.read..self.samples.len() - self.skipped]
    }

    pub fn is_exhausted(&self) -> bool {
        self.unread_len() == 0
    }

    /// Advance the read cursor by `samples`.
    pub fn read(&mut self, samples: usize) {
        debug_assert!(
            samples <= self.unread_len(),
            "read past end of chunk: {samples} > {}",
            self.unread_len()
        );
        self.read += samples.min(self.unread_len());
    }

    /// Copy as many unread samples as fit into `dst` and advance the cursor.
    pub fn extract(&mut self, dst: &mut [f32]) -> usize {
        let n = dst.len().min(self.unread_len());
        dst[..n].copy_from_slice(&self.unread()[..n]);
        self.read(n);
        n
    }
}

impl fmt::Debug for AudioChunk {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AudioChunk")
            .field("pts", &self.pts)
            .field("channels", &self.channels)
            .field("total", &self.samples.len())
            .field("skipped", &self.skipped)
            .field("read", &self.read)
            .finish()
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PixelFormat {
    Rgb24,
    Rgba32,
}

impl PixelFormat {
    pub fn bytes_per_pixel(&self) -> usize {
        match self {
            Self::Rgb24 => 3,
            Self::Rgba32 => 4,
        }
    }

    pub fn buffer_size(&self, width: u32, height: u32) -> usize {
        width as usize * height as usize * self.bytes_per_pixel()
    }
}

/// Decoded picture owned by the pipeline.
///
/// `repeat` is the number of output frame ticks this picture occupies (at least one).
pub struct VideoFrame {
    data: Vec<u8>,
    format: PixelFormat,
    width: u32,
    height: u32,
    pts: Pts,
    repeat: u32,
}

impl VideoFrame {
    /// Allocate a black frame.
    pub fn new(format: PixelFormat, width: u32, height: u32, pts: Pts, repeat: u32) -> Self {
        Self::from_data(
            format,
            width,
            height,
            pts,
            repeat,
            vec![0; format.buffer_size(width, height)],
        )
    }

    pub fn from_data(
        format: PixelFormat,
        width: u32,
        height: u32,
        pts: Pts,
        repeat: u32,
        data: Vec<u8>,
    ) -> Self {
        debug_assert!(repeat >= 1, "video frame repeat must be at least 1");
        debug_assert_eq!(data.len(), format.buffer_size(width, height));
        Self {
            data,
            format,
            width,
            height,
            pts,
            repeat: repeat.max(1),
        }
    }

    pub fn pts(&self) -> Pts {
        self.pts
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn format(&self) -> PixelFormat {
        self.format
    }

    pub fn repeat(&self) -> u32 {
        self.repeat
    }

    pub fn data(&self) -> &[u8] {
        &self.data
    }

    pub fn data_mut(&mut self) -> &mut [u8] {
        &mut self.data
    }
}

impl fmt::Debug for VideoFrame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("VideoFrame")
            .field("pts", &self.pts)
            .field("size", &(self.width, self.height))
            .field("format", &self.format)
            .field("repeat", &self.repeat)
            .finish()
    }
}

/// Output sample for `dst_ch` from one interleaved source frame.
///
/// Mapping rules:
/// - mono → stereo: duplicate channel 0
/// - stereo → mono: average L/R
/// - same layout: pass-through
/// - other layouts: best-effort "clamp to available channels"
pub fn map_channel(src: &[f32], dst_ch: usize, dst_channels: usize) -> f32 {
    let get = |ch: usize| src.get(ch).copied().unwrap_or(0.0);
    match (src.len(), dst_channels) {
        (2, 1) => 0.5 * (get(0) + get(1)),
        (1, _) => get(0),
        (n, _) => get(dst_ch.min(n.saturating_sub(1))),
    }
}

/// Audio request parameters handed to [`MediaSource::next_audio`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct AudioParams {
    pub sample_rate: u32,
    pub channels: u16,
}

/// Video request parameters handed to [`MediaSource::next_video`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct VideoParams {
    /// Bounding box of the display surface.
    pub width: u32,
    pub height: u32,
    pub want_alpha: bool,
    /// The frame will be discarded; sources may skip rendering it.
    pub skip: bool,
}

impl VideoParams {
    pub fn pixel_format(&self) -> PixelFormat {
        if self.want_alpha {
            PixelFormat::Rgba32
        } else {
            PixelFormat::Rgb24
        }
    }
}

/// Producer of decoded timeline media.
///
/// Audio and video are pulled by different threads, so implementations keep separate
/// decode state per stream behind their own locks. `move_to` is only called while no
/// buffer worker is running.
pub trait MediaSource: Send + Sync {
    /// Next audio chunk at the requested format, or `None` at end of data.
    fn next_audio(&self, params: &AudioParams) -> Result<Option<AudioChunk>>;

    /// Next frame fitted to the requested size, or `None` at end of data.
    fn next_video(&self, params: &VideoParams) -> Result<Option<VideoFrame>>;

    /// Reposition both streams at `pts`, discarding in-flight decode state.
    fn move_to(&self, pts: Pts) -> Result<()>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn frame_rate_converts_pts_to_micros() {
        let rate = FrameRate::default();
        assert_eq!(rate.pts_to_micros(1), 40_000);
        assert_eq!(rate.pts_to_micros(-2), -80_000);
        assert_eq!(rate.micros_to_pts(1_000_000), 25);

        let ntsc = FrameRate::new(30_000, 1001);
        assert_eq!(ntsc.pts_to_micros(30), 1_001_000);
    }

    #[test]
    fn samples_per_pts_uses_rate() {
        assert_eq!(FrameRate::default().samples_per_pts(44_100), 1764);
        assert_eq!(FrameRate::new(50, 1).samples_per_pts(48_000), 960);
    }

    #[test]
    fn tick_lengths_add_up_without_drift() {
        let ntsc = FrameRate::new(30_000, 1001);
        let total: usize = (0..1001).map(|pts| ntsc.samples_in_tick(pts, 44_100)).sum();
        assert_eq!(total as i64, ntsc.samples_at(1001, 44_100));
        assert_eq!(total, 1_472_941);
        assert!((0..1001).all(|pts| matches!(ntsc.samples_in_tick(pts, 44_100), 1471 | 1472)));

        // One hour of NTSC video and its audio stay within one sample of each other.
        let ticks = 107_880;
        let audio_us = ntsc.samples_at(ticks, 44_100) as f64 * 1e6 / 44_100.0;
        let video_us = ntsc.pts_to_micros(ticks) as f64;
        assert!((audio_us - video_us).abs() < 1e6 / 44_100.0);

        assert_eq!(FrameRate::default().samples_in_tick(3, 48_000), 1920);
    }

    #[test]
    fn chunk_extract_advances_cursor() {
        let mut chunk = AudioChunk::new(2, vec![1.0, 2.0, 3.0, 4.0, 5.0, 6.0], Some(7));
        let mut dst = [0.0; 4];
        assert_eq!(chunk.extract(&mut dst), 4);
        assert_eq!(dst, [1.0, 2.0, 3.0, 4.0]);
        assert_eq!(chunk.unread_len(), 2);

        let mut rest = [0.0; 4];
        assert_eq!(chunk.extract(&mut rest), 2);
        assert_eq!(&rest[..2], &[5.0, 6.0]);
        assert!(chunk.is_exhausted());
    }

    #[test]
    fn adjusted_length_hides_tail() {
        let mut chunk = AudioChunk::new(1, vec![1.0, 2.0, 3.0, 4.0], None);
        chunk.set_adjusted_length(3);
        assert_eq!(chunk.unread(), &[1.0, 2.0, 3.0]);
        assert_eq!(chunk.total_samples(), 4);
        chunk.read(3);
        assert!(chunk.is_exhausted());
    }

    #[test]
    fn pts_is_set_once() {
        let mut chunk = AudioChunk::silence(2, 4, None);
        chunk.set_pts(12);
        assert_eq!(chunk.pts(), Some(12));
    }

    #[test]
    #[should_panic(expected = "write-once")]
    fn pts_rewrite_is_rejected() {
        let mut chunk = AudioChunk::silence(2, 4, Some(1));
        chunk.set_pts(2);
    }

    #[test]
    #[should_panic(expected = "read past end")]
    fn reading_past_end_is_rejected() {
        let mut chunk = AudioChunk::silence(1, 2, None);
        chunk.read(3);
    }

    #[test]
    fn channel_mapping_rules() {
        assert_eq!(map_channel(&[0.4], 1, 2), 0.4);
        assert_eq!(map_channel(&[0.25, 0.75], 0, 1), 0.5);
        assert_eq!(map_channel(&[0.1, 0.9], 1, 2), 0.9);
        assert_eq!(map_channel(&[0.1, 0.9], 3, 6), 0.9);
        assert_eq!(map_channel(&[0.1, 0.2, 0.3], 1, 2), 0.2);
    }

    #[test]
    fn video_frame_allocates_for_format() {
        let frame = VideoFrame::new(PixelFormat::Rgba32, 4, 2, 3, 1);
        assert_eq!(frame.data().len(), 32);
        assert_eq!(frame.pts(), 3);
        assert_eq!(frame.repeat(), 1);
        let params = VideoParams {
            width: 4,
            height: 2,
            want_alpha: false,
            skip: false,
        };
        assert_eq!(params.pixel_format(), PixelFormat::Rgb24);
    }
}
