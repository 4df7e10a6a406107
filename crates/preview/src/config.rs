use std::path::PathBuf;

use anyhow::{Context, Result, anyhow, bail};

pub use av_player::config::PlaybackConfig;
use av_player::media::Pts;

use crate::cli::{Args, Command};

/// What to play.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SourceKind {
    Pattern { seconds: u32 },
    File { path: PathBuf },
}

#[derive(Clone, Debug)]
pub struct PreviewConfig {
    pub source: SourceKind,
    pub device: Option<String>,
    pub null_audio: bool,
    pub start_pts: Pts,
    /// Last frame of a looped play range starting at `start_pts`.
    pub range_end: Option<Pts>,
    pub playback: PlaybackConfig,
}

impl PreviewConfig {
    /// Load the config file (if any) and apply the command-line overrides.
    pub fn from_args(args: &Args) -> Result<Self> {
        let base = match args.config.as_deref() {
            Some(path) => PlaybackConfig::load(path)?,
            None => PlaybackConfig::default(),
        };
        Self::with_base(args, base)
    }

    fn with_base(args: &Args, mut playback: PlaybackConfig) -> Result<Self> {
        let source = match &args.cmd {
            Some(Command::Pattern { seconds }) => SourceKind::Pattern { seconds: *seconds },
            Some(Command::Play { path }) => SourceKind::File { path: path.clone() },
            None => return Err(anyhow!("no command given (try `pattern` or `play <path>`)")),
        };

        if let Some(speed) = args.speed {
            playback.speed_percent = speed;
        }
        if let Some(width) = args.width {
            playback.display_width = width;
        }
        if let Some(height) = args.height {
            playback.display_height = height;
        }
        if let Some(n) = args.audio_queue {
            playback.audio_queue = n;
        }
        if let Some(n) = args.video_queue {
            playback.video_queue = n;
        }

        playback.validate().context("invalid playback settings")?;

        let to_pts = |ms: u64| {
            let micros = i64::try_from(ms.saturating_mul(1000)).unwrap_or(i64::MAX);
            playback.frame_rate.micros_to_pts(micros)
        };
        let start_pts = to_pts(args.start_ms);
        let range_end = args.range_end_ms.map(to_pts);
        if let Some(end) = range_end {
            if end <= start_pts {
                bail!("range end ({end}) must lie after the start position ({start_pts})");
            }
        }

        Ok(Self {
            source,
            device: normalize_device_name(args.device.clone()),
            null_audio: args.null_audio,
            start_pts,
            range_end,
            playback,
        })
    }
}

fn normalize_device_name(device: Option<String>) -> Option<String> {
    device.and_then(|name| {
        let trimmed = name.trim();
        if trimmed.is_empty() {
            None
        } else {
            Some(trimmed.to_string())
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;

    fn parse(argv: &[&str]) -> Args {
        Args::try_parse_from(argv).unwrap()
    }

    #[test]
    fn flags_override_config_values() {
        let args = parse(&[
            "preview",
            "--speed",
            "150",
            "--video-queue",
            "4",
            "--start-ms",
            "2000",
            "pattern",
            "--seconds",
            "3",
        ]);
        let base = PlaybackConfig {
            video_queue: 12,
            audio_queue: 50,
            ..PlaybackConfig::default()
        };
        let cfg = PreviewConfig::with_base(&args, base).unwrap();

        assert_eq!(cfg.source, SourceKind::Pattern { seconds: 3 });
        assert_eq!(cfg.playback.speed_percent, 150);
        assert_eq!(cfg.playback.video_queue, 4);
        assert_eq!(cfg.playback.audio_queue, 50);
        assert_eq!(cfg.start_pts, 50);
        assert_eq!(cfg.range_end, None);
        assert!(!cfg.null_audio);
    }

    #[test]
    fn zero_queue_flag_is_rejected() {
        let args = parse(&["preview", "--video-queue", "0", "pattern"]);
        let err = PreviewConfig::with_base(&args, PlaybackConfig::default()).unwrap_err();
        assert!(format!("{err:#}").contains("video_queue"));

        let args = parse(&["preview", "--audio-queue", "0", "pattern"]);
        assert!(PreviewConfig::from_args(&args).is_err());
    }

    #[test]
    fn range_must_end_after_start() {
        let args = parse(&["preview", "--start-ms", "1000", "--range-end-ms", "2000", "pattern"]);
        let cfg = PreviewConfig::from_args(&args).unwrap();
        assert_eq!((cfg.start_pts, cfg.range_end), (25, Some(50)));

        let args = parse(&["preview", "--start-ms", "1000", "--range-end-ms", "1000", "pattern"]);
        assert!(PreviewConfig::from_args(&args).is_err());
    }

    #[test]
    fn play_command_keeps_path() {
        let args = parse(&["preview", "--null-audio", "play", "clip.flac"]);
        let cfg = PreviewConfig::from_args(&args).unwrap();
        assert_eq!(
            cfg.source,
            SourceKind::File {
                path: PathBuf::from("clip.flac")
            }
        );
        assert!(cfg.null_audio);
    }

    #[test]
    fn missing_command_is_an_error() {
        let args = parse(&["preview"]);
        assert!(PreviewConfig::from_args(&args).is_err());
    }

    #[test]
    fn normalize_device_name_trims_and_drops_empty() {
        assert_eq!(normalize_device_name(None), None);
        assert_eq!(normalize_device_name(Some("  ".to_string())), None);
        assert_eq!(
            normalize_device_name(Some("  USB DAC ".to_string())),
            Some("USB DAC".to_string())
        );
    }
}
