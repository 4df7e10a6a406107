//! Timing events published by the pipeline threads.

use crossbeam_channel::{Receiver, Sender, TrySendError};

use crate::media::Pts;

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum PlaybackEvent {
    /// The controller entered (`true`) or left (`false`) the playing state.
    PlaybackActive(bool),
    /// A frame was shown, or a seek landed, at this position.
    Position(Pts),
    /// The audio callback started consuming the chunk stamped with this position.
    AudioPosition(Pts),
    /// The display worker discarded a frame. `sleep_us` is the computed wait (negative = late).
    FrameDropped { pts: Pts, sleep_us: i64 },
    /// The audio callback ran out of queued audio and emitted silence.
    Underflow { samples: usize },
    /// The display worker reached the end of the video stream.
    Finished,
    /// A frame past the end of the active play range was reached.
    RangeEnd(Pts),
    /// The source failed while decoding; the session was aborted.
    SourceError(String),
}

/// Non-blocking event publisher shared by the controller and worker threads.
///
/// A sink without a receiver discards everything. When the channel is full new events are
/// dropped rather than stalling a pipeline thread.
#[derive(Clone, Debug, Default)]
pub struct EventSink {
    tx: Option<Sender<PlaybackEvent>>,
}

impl EventSink {
    pub fn new(tx: Sender<PlaybackEvent>) -> Self {
        Self { tx: Some(tx) }
    }

    /// A sink that discards every event.
    pub fn disabled() -> Self {
        Self { tx: None }
    }

    pub fn emit(&self, event: PlaybackEvent) {
        let Some(tx) = &self.tx else {
            return;
        };
        match tx.try_send(event) {
            Ok(()) => {}
            Err(TrySendError::Full(event)) => {
                tracing::trace!(?event, "event channel full; dropping event");
            }
            Err(TrySendError::Disconnected(_)) => {}
        }
    }
}

/// Create a bounded event channel.
pub fn channel(capacity: usize) -> (EventSink, Receiver<PlaybackEvent>) {
    let (tx, rx) = crossbeam_channel::bounded(capacity.max(1));
    (EventSink::new(tx), rx)
}
