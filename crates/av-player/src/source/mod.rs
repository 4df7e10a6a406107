//! Concrete [`MediaSource`](crate::media::MediaSource) implementations.
//!
//! - [`pattern::TestPatternSource`]: synthetic color bars with a once-per-second beep and
//!   white flash, for checking A/V sync by eye and ear.
//! - [`file::FileSource`]: audio decoded from a file with Symphonia, with the test pattern as
//!   picture.

pub mod file;
pub mod pattern;
