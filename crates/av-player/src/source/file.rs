//! Audio file source.
//!
//! Uses Symphonia to probe the container and decode the default track into interleaved `f32`,
//! then remixes to the requested channel count and converts to the requested rate with the
//! Rubato stage from [`crate::stretch`]. The picture is the test pattern.

use std::fs::File;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::{Mutex, MutexGuard};

use anyhow::{Context, Result, anyhow};
use symphonia::core::audio::SampleBuffer;
use symphonia::core::codecs::{CodecParameters, Decoder, DecoderOptions};
use symphonia::core::errors::Error as SymphoniaError;
use symphonia::core::formats::{FormatOptions, FormatReader, SeekMode, SeekTo};
use symphonia::core::io::MediaSourceStream;
use symphonia::core::meta::MetadataOptions;
use symphonia::core::probe::Hint;
use symphonia::core::units::Time;

use super::pattern::render_pattern;
use crate::media::{
    AudioChunk, AudioParams, FrameRate, MediaSource, Pts, VideoFrame, VideoParams, map_channel,
};
use crate::stretch::TimeStretch;

const RESAMPLE_CHUNK_FRAMES: usize = 1024;

/// Metadata captured while probing the file.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct FileInfo {
    pub sample_rate: u32,
    pub channels: u16,
    /// Codec name (best-effort).
    pub codec: Option<String>,
    /// Length in project frames, when the container reports it.
    pub length: Option<Pts>,
}

pub struct FileSource {
    path: PathBuf,
    info: FileInfo,
    frame_rate: FrameRate,
    audio: Mutex<AudioDecoder>,
    video_pos: Mutex<Pts>,
    /// Position the audio stream ended at; bounds the video when the length is unknown.
    audio_end: AtomicI64,
}

struct AudioDecoder {
    format: Box<dyn FormatReader>,
    decoder: Box<dyn Decoder>,
    track_id: u32,
    next_pts: Pts,
    /// Frames to discard after a seek landed before the requested position.
    skip_frames: u64,
    eof: bool,
    converter: Option<Converter>,
    out: Vec<f32>,
}

struct Converter {
    params: AudioParams,
    stretch: TimeStretch,
}

impl FileSource {
    pub fn open(path: &Path, frame_rate: FrameRate) -> Result<Self> {
        let file = File::open(path).with_context(|| format!("open {:?}", path))?;

        let mut hint = Hint::new();
        if let Some(ext) = path.extension().and_then(|e| e.to_str()) {
            hint.with_extension(ext);
        }

        let mss = MediaSourceStream::new(Box::new(file), Default::default());
        let probed = symphonia::default::get_probe()
            .format(&hint, mss, &FormatOptions::default(), &MetadataOptions::default())
            .with_context(|| format!("probe {:?}", path))?;
        let format = probed.format;

        let track = format
            .default_track()
            .ok_or_else(|| anyhow!("No default audio track"))?;
        let track_id = track.id;
        let codec_params: CodecParameters = track.codec_params.clone();

        let channels = codec_params
            .channels
            .ok_or_else(|| anyhow!("Unknown channels"))?
            .count();
        let sample_rate = codec_params
            .sample_rate
            .ok_or_else(|| anyhow!("Unknown sample rate"))?;

        let decoder = symphonia::default::get_codecs()
            .make(&codec_params, &DecoderOptions::default())
            .context("create decoder")?;

        let info = FileInfo {
            sample_rate,
            channels: channels as u16,
            codec: codec_name_from_params(&codec_params),
            length: length_from_codec_params(&codec_params, frame_rate),
        };
        tracing::info!(
            path = ?path,
            sample_rate,
            channels,
            codec = ?info.codec,
            length = ?info.length,
            "opened audio file"
        );

        Ok(Self {
            path: path.to_path_buf(),
            info,
            frame_rate,
            audio: Mutex::new(AudioDecoder {
                format,
                decoder,
                track_id,
                next_pts: 0,
                skip_frames: 0,
                eof: false,
                converter: None,
                out: Vec::new(),
            }),
            video_pos: Mutex::new(0),
            audio_end: AtomicI64::new(i64::MAX),
        })
    }

    pub fn info(&self) -> &FileInfo {
        &self.info
    }

    fn audio(&self) -> MutexGuard<'_, AudioDecoder> {
        self.audio.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn video_pos(&self) -> MutexGuard<'_, Pts> {
        self.video_pos.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn video_end(&self) -> Pts {
        self.info
            .length
            .unwrap_or_else(|| self.audio_end.load(Ordering::Relaxed))
    }
}

impl MediaSource for FileSource {
    fn next_audio(&self, params: &AudioParams) -> Result<Option<AudioChunk>> {
        let mut audio = self.audio();
        let channels = params.channels.max(1) as usize;
        let frames = self
            .frame_rate
            .samples_in_tick(audio.next_pts, params.sample_rate);
        let wanted = frames * channels;

        while audio.out.len() < wanted && !audio.eof {
            audio.decode_more(&self.info, params, frames)?;
        }

        if audio.out.is_empty() {
            self.audio_end.store(audio.next_pts, Ordering::Relaxed);
            return Ok(None);
        }

        let take = wanted.min(audio.out.len());
        let samples: Vec<f32> = audio.out.drain(..take).collect();
        let pts = audio.next_pts;
        audio.next_pts += 1;
        Ok(Some(AudioChunk::new(channels, samples, Some(pts))))
    }

    fn next_video(&self, params: &VideoParams) -> Result<Option<VideoFrame>> {
        let mut pos = self.video_pos();
        if *pos >= self.video_end() {
            return Ok(None);
        }
        let pts = *pos;
        *pos += 1;
        drop(pos);

        if params.skip {
            return Ok(Some(VideoFrame::new(params.pixel_format(), 0, 0, pts, 1)));
        }
        Ok(Some(render_pattern(params, self.frame_rate, pts, false)))
    }

    fn move_to(&self, pts: Pts) -> Result<()> {
        let pts = pts.max(0);
        let mut audio = self.audio();
        let micros = self.frame_rate.pts_to_micros(pts).max(0) as u64;
        let time = Time::new(micros / 1_000_000, (micros % 1_000_000) as f64 / 1_000_000.0);
        let track_id = audio.track_id;

        audio.eof = false;
        audio.skip_frames = 0;
        match audio.format.seek(
            SeekMode::Accurate,
            SeekTo::Time {
                time,
                track_id: Some(track_id),
            },
        ) {
            Ok(seeked) => {
                audio.skip_frames = seeked.required_ts.saturating_sub(seeked.actual_ts);
            }
            Err(SymphoniaError::SeekError(kind)) => {
                tracing::debug!(pts, ?kind, "seek past end of {:?}", self.path);
                audio.eof = true;
            }
            Err(e) => return Err(e).with_context(|| format!("seek {:?} to pts {pts}", self.path)),
        }
        audio.decoder.reset();
        audio.out.clear();
        if let Some(conv) = audio.converter.as_mut() {
            conv.stretch.reset()?;
        }
        audio.next_pts = pts;
        self.audio_end.store(i64::MAX, Ordering::Relaxed);

        *self.video_pos() = pts;
        Ok(())
    }
}

impl AudioDecoder {
    /// Decode one packet into `out`, or mark the end of the stream.
    fn decode_more(&mut self, info: &FileInfo, params: &AudioParams, frames_per_tick: usize) -> Result<()> {
        let packet = match self.format.next_packet() {
            Ok(p) => p,
            Err(SymphoniaError::IoError(e)) if e.kind() == std::io::ErrorKind::UnexpectedEof => {
                return self.finish(info, params, frames_per_tick);
            }
            Err(SymphoniaError::ResetRequired) => {
                self.decoder.reset();
                return Ok(());
            }
            Err(e) => return Err(e).context("read packet"),
        };
        if packet.track_id() != self.track_id {
            return Ok(());
        }

        let decoded = match self.decoder.decode(&packet) {
            Ok(d) => d,
            Err(SymphoniaError::DecodeError(msg)) => {
                tracing::warn!("skipping undecodable packet: {msg}");
                return Ok(());
            }
            Err(e) => return Err(e).context("decode packet"),
        };

        let spec = *decoded.spec();
        let src_channels = spec.channels.count().max(1);
        let mut sample_buf = SampleBuffer::<f32>::new(decoded.frames() as u64, spec);
        sample_buf.copy_interleaved_ref(decoded);

        let decoded_frames = sample_buf.samples().len() / src_channels;
        let skip = (self.skip_frames as usize).min(decoded_frames);
        self.skip_frames -= skip as u64;
        if skip == decoded_frames {
            return Ok(());
        }

        let dst_channels = params.channels.max(1) as usize;
        let remixed = remix(&sample_buf.samples()[skip * src_channels..], src_channels, dst_channels);
        let chunk = AudioChunk::new(dst_channels, remixed, None);

        let conv = converter_for(&mut self.converter, info, params, frames_per_tick)?;
        conv.stretch.send(&chunk)?;
        while let Some(out) = conv.stretch.receive() {
            self.out.extend_from_slice(out.unread());
        }
        Ok(())
    }

    fn finish(&mut self, info: &FileInfo, params: &AudioParams, frames_per_tick: usize) -> Result<()> {
        self.eof = true;
        let conv = converter_for(&mut self.converter, info, params, frames_per_tick)?;
        conv.stretch.finish()?;
        while let Some(out) = conv.stretch.receive() {
            self.out.extend_from_slice(out.unread());
        }
        Ok(())
    }
}

/// Converter for `params`, rebuilt when the requested format changes.
fn converter_for<'a>(
    slot: &'a mut Option<Converter>,
    info: &FileInfo,
    params: &AudioParams,
    frames_per_tick: usize,
) -> Result<&'a mut Converter> {
    let stale = slot.as_ref().is_none_or(|c| c.params != *params);
    if stale {
        let ratio = params.sample_rate as f64 / info.sample_rate.max(1) as f64;
        let stretch = TimeStretch::with_ratio(
            params.channels.max(1) as usize,
            ratio,
            RESAMPLE_CHUNK_FRAMES,
            frames_per_tick,
        )?;
        if !stretch.is_passthrough() {
            tracing::info!(
                from_hz = info.sample_rate,
                to_hz = params.sample_rate,
                "resampling file audio"
            );
        }
        *slot = Some(Converter {
            params: *params,
            stretch,
        });
    }
    slot.as_mut()
        .ok_or_else(|| anyhow!("no sample rate converter"))
}

/// Remix interleaved `src` from `src_channels` to `dst_channels`.
fn remix(src: &[f32], src_channels: usize, dst_channels: usize) -> Vec<f32> {
    if src_channels == dst_channels {
        return src.to_vec();
    }
    let frames = src.len() / src_channels;
    let mut out = Vec::with_capacity(frames * dst_channels);
    for frame in src.chunks_exact(src_channels) {
        for ch in 0..dst_channels {
            out.push(map_channel(frame, ch, dst_channels));
        }
    }
    out
}

/// Track length in project frames, rounded up.
fn length_from_codec_params(params: &CodecParameters, frame_rate: FrameRate) -> Option<Pts> {
    let frames = params.n_frames?;
    let rate = params.sample_rate? as u64;
    if rate == 0 {
        return None;
    }
    let micros = frames.saturating_mul(1_000_000) / rate;
    let whole = frame_rate.micros_to_pts(micros as i64);
    if frame_rate.pts_to_micros(whole) < micros as i64 {
        Some(whole + 1)
    } else {
        Some(whole)
    }
}

/// Best-effort codec label for logs.
fn codec_name_from_params(params: &CodecParameters) -> Option<String> {
    use symphonia::core::codecs::*;
    let name = match params.codec {
        CODEC_TYPE_FLAC => "FLAC",
        CODEC_TYPE_MP3 => "MP3",
        CODEC_TYPE_AAC => "AAC",
        CODEC_TYPE_ALAC => "ALAC",
        CODEC_TYPE_VORBIS => "VORBIS",
        CODEC_TYPE_PCM_S16LE | CODEC_TYPE_PCM_S16BE => "PCM_S16",
        CODEC_TYPE_PCM_S24LE | CODEC_TYPE_PCM_S24BE => "PCM_S24",
        CODEC_TYPE_PCM_S32LE | CODEC_TYPE_PCM_S32BE => "PCM_S32",
        CODEC_TYPE_PCM_F32LE | CODEC_TYPE_PCM_F32BE => "PCM_F32",
        _ => return None,
    };
    Some(name.to_string())
}
