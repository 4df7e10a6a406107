//! Preview: plays a media source through the A/V pipeline from the command line.
//!
//! ## Pipeline
//! 1. **Buffer**: audio and video worker threads pull decoded media from the source into
//!    bounded queues (audio is time-stretched when the speed is not 100%).
//! 2. **Output**: the audio host callback drains the audio queue without blocking; its first
//!    invocation starts the session clock.
//! 3. **Display**: a worker paces frames against that clock and drops late ones.
//!
//! ## Modes
//! - `pattern`: built-in sync test pattern.
//! - `play`: an audio file over the test pattern.
//!
//! `--range-end-ms` loops from the start position to that point until Ctrl-C.

use anyhow::Result;
use clap::Parser;
use tracing_subscriber::EnvFilter;

use preview::cli::Args;
use preview::config::PreviewConfig;
use preview::runtime;

fn main() -> Result<()> {
    let args = Args::parse();
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| {
            EnvFilter::new("info,preview=info,av_player=info")
        }))
        .init();

    if args.list_devices {
        return runtime::list_devices();
    }

    let config = PreviewConfig::from_args(&args)?;
    let status = runtime::run(config, runtime::ctrlc_channel()?)?;
    println!("{}", serde_json::to_string_pretty(&status)?);
    Ok(())
}
