pub mod buffer;
pub mod clock;
pub mod config;
pub mod controller;
pub mod display;
pub mod events;
pub mod host;
pub mod media;
pub mod output;
pub mod queue;
pub mod session;
pub mod source;
pub mod status;
pub mod stretch;

#[cfg(test)]
mod testing;
