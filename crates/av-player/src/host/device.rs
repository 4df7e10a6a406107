//! CPAL output device backend.
//!
//! Device selection and config negotiation, plus the real-time stream callback that:
//! - asks the [`AudioOutputCallback`] for interleaved `f32` audio at the session format
//! - maps channels to the device layout (mono↔stereo, best-effort otherwise)
//! - converts `f32` samples to the device sample format

use std::sync::Arc;

use anyhow::{Context, Result, anyhow};
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};

use super::{AudioHost, AudioStream, OutputFormat};
use crate::clock::HostClock;
use crate::media::map_channel;
use crate::output::{AudioOutputCallback, CallbackFlow};

/// Device buffer size we aim for, in frames.
const TARGET_BUFFER_FRAMES: u32 = 1024;

pub struct CpalHost {
    device: cpal::Device,
    name: Option<String>,
}

impl CpalHost {
    /// Open the default host and pick an output device (see [`pick_device`]).
    pub fn new(needle: Option<&str>) -> Result<Self> {
        let host = cpal::default_host();
        let device = pick_device(&host, needle)?;
        let name = device.description().ok().map(|d| d.name().to_string());
        tracing::info!(device = ?name, "output device");
        Ok(Self { device, name })
    }
}

impl AudioHost for CpalHost {
    fn device_name(&self) -> Option<String> {
        self.name.clone()
    }

    fn negotiate(&self, wanted: OutputFormat) -> Result<OutputFormat> {
        let config = pick_output_config(&self.device, Some(wanted.sample_rate), wanted.channels)?;
        Ok(OutputFormat {
            sample_rate: config.sample_rate(),
            channels: wanted.channels,
        })
    }

    fn open(
        &self,
        format: OutputFormat,
        clock: Arc<dyn HostClock>,
        callback: AudioOutputCallback,
    ) -> Result<Box<dyn AudioStream>> {
        let config = pick_output_config(&self.device, Some(format.sample_rate), format.channels)?;
        let sample_format = config.sample_format();
        let mut stream_config: cpal::StreamConfig = config.clone().into();
        if let Some(buf) = pick_buffer_size(&config, TARGET_BUFFER_FRAMES) {
            stream_config.buffer_size = buf;
        }
        tracing::info!(
            output_rate_hz = stream_config.sample_rate,
            device_channels = stream_config.channels,
            session_channels = format.channels,
            sample_format = ?sample_format,
            buffer_size = ?stream_config.buffer_size,
            "device output config"
        );

        let stream = build_output_stream(
            &self.device,
            &stream_config,
            sample_format,
            format.channels as usize,
            clock,
            callback,
        )?;
        Ok(Box::new(CpalStream { stream }))
    }
}

struct CpalStream {
    stream: cpal::Stream,
}

impl AudioStream for CpalStream {
    fn start(&mut self) -> Result<()> {
        self.stream.play().context("start output stream")
    }

    fn stop(&mut self) -> Result<()> {
        self.stream.pause().context("stop output stream")
    }
}

/// Pick a CPAL output device.
///
/// If `needle` is `Some`, chooses the first output device whose name contains the substring
/// (case-insensitive). Otherwise returns the host default output device.
pub fn pick_device(host: &cpal::Host, needle: Option<&str>) -> Result<cpal::Device> {
    if let Some(needle) = needle {
        let mut devices = host.output_devices().context("No output devices")?;
        return devices
            .find(|d| {
                d.description()
                    .ok()
                    .map(|n| matches_device_name(&n.name(), needle))
                    .unwrap_or(false)
            })
            .ok_or_else(|| anyhow!("No output device matched: {needle}"));
    }

    host.default_output_device()
        .ok_or_else(|| anyhow!("No default output device"))
}

/// Names of the output devices of the default host.
pub fn output_device_names() -> Result<Vec<String>> {
    let host = cpal::default_host();
    let devices = host.output_devices().context("No output devices")?;
    let mut names = Vec::new();
    for d in devices {
        names.push(d.description()?.name().to_string());
    }
    Ok(names)
}

/// Choose the output config closest to `target_rate` with `channels` channels.
///
/// Ranks candidates by: exact channel match, a rate at or below the target, the highest such
/// rate, then the sample format (float first).
pub fn pick_output_config(
    device: &cpal::Device,
    target_rate: Option<u32>,
    channels: u16,
) -> Result<cpal::SupportedStreamConfig> {
    let mut best: Option<(Candidate, cpal::SupportedStreamConfig)> = None;

    for range in device.supported_output_configs()? {
        let rate = pick_rate_for_range(range.min_sample_rate(), range.max_sample_rate(), target_rate);
        let candidate = Candidate {
            channel_match: range.channels() == channels,
            below: target_rate.map(|t| rate <= t).unwrap_or(true),
            rate,
            format_rank: sample_format_rank(range.sample_format()),
        };
        let replace = match &best {
            None => true,
            Some((b, _)) => candidate.is_better_than(b),
        };
        if replace {
            best = Some((candidate, range.with_sample_rate(rate)));
        }
    }

    best.map(|(_, cfg)| cfg)
        .ok_or_else(|| anyhow!("No supported output configs"))
}

/// Clamp `target` frames into the device's buffer size range.
///
/// Returns `None` when the device does not report a range, so CPAL uses its default.
pub fn pick_buffer_size(
    config: &cpal::SupportedStreamConfig,
    target: u32,
) -> Option<cpal::BufferSize> {
    match config.buffer_size() {
        cpal::SupportedBufferSize::Range { min, max } => {
            Some(cpal::BufferSize::Fixed(clamp_buffer_frames(*min, *max, target)))
        }
        cpal::SupportedBufferSize::Unknown => None,
    }
}

fn clamp_buffer_frames(min: u32, max: u32, target: u32) -> u32 {
    target.clamp(min, max.max(min))
}

fn pick_rate_for_range(min: u32, max: u32, target_rate: Option<u32>) -> u32 {
    match target_rate {
        Some(target) => target.clamp(min, max.max(min)),
        None => max,
    }
}

fn sample_format_rank(format: cpal::SampleFormat) -> u8 {
    match format {
        cpal::SampleFormat::F32 => 0,
        cpal::SampleFormat::I32 => 1,
        cpal::SampleFormat::I16 => 2,
        cpal::SampleFormat::U16 => 3,
        _ => 10,
    }
}

#[derive(Clone, Copy, Debug)]
struct Candidate {
    channel_match: bool,
    below: bool,
    rate: u32,
    format_rank: u8,
}

impl Candidate {
    fn is_better_than(&self, other: &Candidate) -> bool {
        if self.channel_match != other.channel_match {
            self.channel_match
        } else if self.below != other.below {
            self.below
        } else if self.rate != other.rate {
            self.rate > other.rate
        } else {
            self.format_rank < other.format_rank
        }
    }
}

fn matches_device_name(name: &str, needle: &str) -> bool {
    let needle = needle.trim();
    if needle.is_empty() {
        return false;
    }
    name.to_lowercase().contains(&needle.to_lowercase())
}

fn build_output_stream(
    device: &cpal::Device,
    config: &cpal::StreamConfig,
    sample_format: cpal::SampleFormat,
    src_channels: usize,
    clock: Arc<dyn HostClock>,
    callback: AudioOutputCallback,
) -> Result<cpal::Stream> {
    match sample_format {
        cpal::SampleFormat::F32 => build_stream::<f32>(device, config, src_channels, clock, callback),
        cpal::SampleFormat::I16 => build_stream::<i16>(device, config, src_channels, clock, callback),
        cpal::SampleFormat::I32 => build_stream::<i32>(device, config, src_channels, clock, callback),
        cpal::SampleFormat::U16 => build_stream::<u16>(device, config, src_channels, clock, callback),
        other => Err(anyhow!("Unsupported sample format: {other:?}")),
    }
}

/// Type-specialized stream builder for CPAL sample formats.
///
/// After the pipeline callback returns [`CallbackFlow::Stop`] the stream keeps running and
/// outputs silence until it is stopped or dropped.
fn build_stream<T>(
    device: &cpal::Device,
    config: &cpal::StreamConfig,
    src_channels: usize,
    clock: Arc<dyn HostClock>,
    mut callback: AudioOutputCallback,
) -> Result<cpal::Stream>
where
    T: cpal::Sample + cpal::SizedSample + cpal::FromSample<f32>,
{
    let dst_channels = config.channels as usize;
    let src_channels = src_channels.max(1);
    let mut scratch: Vec<f32> = Vec::new();
    let mut stopped = false;

    let err_fn = |err| tracing::warn!("stream error: {err}");

    let stream = device.build_output_stream(
        config,
        move |data: &mut [T], info: &cpal::OutputCallbackInfo| {
            if stopped {
                data.fill(<T as cpal::Sample>::from_sample::<f32>(0.0));
                return;
            }

            let frames = data.len() / dst_channels;
            scratch.resize(frames * src_channels, 0.0);

            let ts = info.timestamp();
            let latency = ts.playback.duration_since(&ts.callback).unwrap_or_default();
            let host_time = clock.now() + latency;

            if callback.fill(&mut scratch, host_time) == CallbackFlow::Stop {
                stopped = true;
            }

            for frame in 0..frames {
                let src = &scratch[frame * src_channels..(frame + 1) * src_channels];
                for ch in 0..dst_channels {
                    data[frame * dst_channels + ch] =
                        <T as cpal::Sample>::from_sample::<f32>(map_channel(src, ch, dst_channels));
                }
            }
        },
        err_fn,
        None,
    )?;

    Ok(stream)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn matches_device_name_is_case_insensitive() {
        assert!(matches_device_name("USB DAC", "dac"));
        assert!(matches_device_name("usb dac", "USB"));
        assert!(!matches_device_name("USB DAC", "speaker"));
        assert!(!matches_device_name("USB DAC", ""));
    }

    #[test]
    fn pick_rate_for_range_prefers_target_when_in_range() {
        assert_eq!(pick_rate_for_range(44_100, 96_000, Some(48_000)), 48_000);
    }

    #[test]
    fn pick_rate_for_range_clamps_to_range() {
        assert_eq!(pick_rate_for_range(44_100, 96_000, Some(22_050)), 44_100);
        assert_eq!(pick_rate_for_range(44_100, 96_000, Some(192_000)), 96_000);
        assert_eq!(pick_rate_for_range(44_100, 96_000, None), 96_000);
    }

    #[test]
    fn candidate_prefers_channel_match_over_rate() {
        let matching = Candidate {
            channel_match: true,
            below: false,
            rate: 48_000,
            format_rank: 2,
        };
        let other = Candidate {
            channel_match: false,
            below: true,
            rate: 44_100,
            format_rank: 0,
        };
        assert!(matching.is_better_than(&other));
        assert!(!other.is_better_than(&matching));
    }

    #[test]
    fn candidate_prefers_below_then_rate_then_format() {
        let base = Candidate {
            channel_match: true,
            below: true,
            rate: 44_100,
            format_rank: 2,
        };
        let above = Candidate { below: false, rate: 96_000, ..base };
        assert!(base.is_better_than(&above));
        let higher = Candidate { rate: 48_000, ..base };
        assert!(!base.is_better_than(&higher));
        let float = Candidate { format_rank: 0, ..base };
        assert!(float.is_better_than(&base));
    }

    #[test]
    fn buffer_frames_are_clamped_to_device_range() {
        assert_eq!(clamp_buffer_frames(64, 4096, 1024), 1024);
        assert_eq!(clamp_buffer_frames(2048, 4096, 1024), 2048);
        assert_eq!(clamp_buffer_frames(64, 512, 1024), 512);
    }
}
