use std::path::PathBuf;

use clap::{Parser, Subcommand};

#[derive(Parser, Debug)]
#[command(name = "preview", version)]
pub struct Args {
    #[command(subcommand)]
    pub cmd: Option<Command>,

    /// TOML file with playback settings; flags below override it
    #[arg(long)]
    pub config: Option<PathBuf>,

    /// List output devices and exit
    #[arg(long)]
    pub list_devices: bool,

    /// Use a specific output device by substring match
    #[arg(long)]
    pub device: Option<String>,

    /// Discard audio instead of opening a device (the audio clock still runs)
    #[arg(long)]
    pub null_audio: bool,

    /// Playback speed in percent (50..=200)
    #[arg(long)]
    pub speed: Option<u16>,

    /// Presentation width in pixels
    #[arg(long)]
    pub width: Option<u32>,

    /// Presentation height in pixels
    #[arg(long)]
    pub height: Option<u32>,

    /// Audio queue capacity in chunks
    #[arg(long)]
    pub audio_queue: Option<usize>,

    /// Video queue capacity in frames
    #[arg(long)]
    pub video_queue: Option<usize>,

    /// Start position in milliseconds
    #[arg(long, default_value_t = 0)]
    pub start_ms: u64,

    /// Loop from the start position to this position (milliseconds) until interrupted
    #[arg(long)]
    pub range_end_ms: Option<u64>,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Play the built-in sync test pattern (beep and flash once per second)
    Pattern {
        /// Length of the pattern in seconds
        #[arg(long, default_value_t = 10)]
        seconds: u32,
    },

    /// Play an audio file over the test pattern
    Play {
        /// Path to audio file
        path: PathBuf,
    },
}
