//! Device contracts between the pipeline and sound I/O backends.
//!
//! A `Source` produces frames at its own pace and can be paused,
//! resumed, and restarted; a `Sink` consumes frames and may block until
//! the device accepts them (internal clock mode).

use std::time::Duration;

use crate::sample::{Frame, FrameReader, SampleSpec};

/// Activity state reported by a source.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeviceState {
    /// The source is producing meaningful frames.
    Active,

    /// The source is alive but currently has nothing to play.
    Inactive,

    /// The source failed and will not recover.
    Broken,
}

/// A frame producer with transport controls.
///
/// `reclock` feeds the sink's current latency back so the source can
/// adjust its playback clock; sources without a clock ignore it.
pub trait Source: FrameReader {
    // ---
    fn state(&self) -> DeviceState;

    /// Pauses production. Returns `false` if the backend refused.
    fn pause(&mut self) -> bool;

    /// Resumes production after a pause.
    fn resume(&mut self) -> bool;

    /// Rewinds to the beginning where meaningful (files), otherwise
    /// behaves like `resume`.
    fn restart(&mut self) -> bool;

    /// Reports the moment the most recently read frame will actually be
    /// heard, as an NTP timestamp.
    fn reclock(&mut self, ntp_time: u64);
}

/// A frame consumer.
pub trait Sink {
    // ---
    /// Writes one frame. May block until the device accepts it.
    fn write(&mut self, frame: &Frame);

    /// Amount of audio currently buffered between `write` and the
    /// speaker.
    fn latency(&self) -> Duration;

    fn sample_spec(&self) -> SampleSpec;
}
