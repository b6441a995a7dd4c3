//! Watchdog: declares a session dead when its stream stops making
//! sense.
//!
//! Three detectors feed one monotonic `dead` flag:
//! - no-playback: no `has-signal` frame for too long;
//! - broken-playback: too large a fraction of incomplete/drop frames
//!   within a sliding window;
//! - jump: implausible sequence number or timestamp distance between
//!   consecutive packets (observed on the insert path).
//!
//! Once dead, `read` returns `false` and the flag is never cleared.

use std::cell::Cell;
use std::collections::VecDeque;
use std::rc::Rc;

use rtp_pcm_common::units::{seqnum_diff, seqnum_lt, timestamp_diff};
use rtp_pcm_common::{frame_flags, Frame, FrameReader, Packet};
use tracing::warn;

/// Frame-level supervisor, sitting above the latency monitor in the
/// session column.
pub struct Watchdog {
    // ---
    inner: Box<dyn FrameReader>,

    /// Shared death flag; the jump detector and the latency monitor
    /// poison it from outside the frame path.
    dead: Rc<Cell<bool>>,

    /// Frames without signal before the session is declared dead.
    max_blank_frames: u32,
    blank_countdown: u32,

    /// Sliding window of per-frame breakage.
    window: VecDeque<bool>,
    window_size: usize,
    broken_in_window: usize,
    breakage_threshold: f32,

    /// Log the death reason only once.
    reported: bool,
}

impl Watchdog {
    // ---
    pub fn new(
        inner: Box<dyn FrameReader>,
        dead: Rc<Cell<bool>>,
        max_blank_frames: u32,
        window_size: usize,
        breakage_threshold: f32,
    ) -> Self {
        // ---
        Self {
            inner,
            dead,
            max_blank_frames,
            blank_countdown: max_blank_frames,
            window: VecDeque::with_capacity(window_size),
            window_size,
            broken_in_window: 0,
            breakage_threshold,
            reported: false,
        }
    }

    pub fn is_alive(&self) -> bool {
        // ---
        !self.dead.get()
    }

    fn declare_dead(&mut self, reason: &str) {
        // ---
        if !self.reported {
            warn!("watchdog: session declared dead: {}", reason);
            self.reported = true;
        }
        self.dead.set(true);
    }

    fn observe_frame(&mut self, frame: &Frame) {
        // ---
        // No-playback detector.
        if frame.has_flags(frame_flags::HAS_SIGNAL) {
            self.blank_countdown = self.max_blank_frames;
        } else if self.blank_countdown > 0 {
            self.blank_countdown -= 1;
            if self.blank_countdown == 0 {
                self.declare_dead("no playback");
                return;
            }
        }

        // Broken-playback detector.
        let broken =
            frame.has_flags(frame_flags::INCOMPLETE) || frame.has_flags(frame_flags::DROPS);
        self.window.push_back(broken);
        if broken {
            self.broken_in_window += 1;
        }
        if self.window.len() > self.window_size {
            if self.window.pop_front() == Some(true) {
                self.broken_in_window -= 1;
            }
        }

        if self.window.len() >= self.window_size {
            let fraction = self.broken_in_window as f32 / self.window.len() as f32;
            if fraction >= self.breakage_threshold {
                self.declare_dead("broken playback");
            }
        }
    }
}

impl FrameReader for Watchdog {
    fn read(&mut self, frame: &mut Frame) -> bool {
        // ---
        if self.dead.get() {
            return false;
        }

        if !self.inner.read(frame) {
            self.declare_dead("end of stream");
            return false;
        }

        // The in-flight frame always completes; death is observed at
        // the next frame boundary.
        self.observe_frame(frame);
        true
    }
}

/// Packet-path jump detector.
///
/// Observes consecutive packets as the session inserts them and
/// poisons the shared death flag on an implausible jump.
pub struct JumpDetector {
    // ---
    dead: Rc<Cell<bool>>,
    max_seqnum_jump: u16,
    max_timestamp_jump: u32,
    prev: Option<(u16, u32)>,
}

impl JumpDetector {
    // ---
    pub fn new(dead: Rc<Cell<bool>>, max_seqnum_jump: u16, max_timestamp_jump: u32) -> Self {
        // ---
        Self {
            dead,
            max_seqnum_jump,
            max_timestamp_jump,
            prev: None,
        }
    }

    /// Feeds one inbound media packet.
    pub fn observe(&mut self, packet: &Packet) {
        // ---
        if let Some((prev_seq, prev_ts)) = self.prev {
            let sn_dist = seqnum_diff(packet.seqnum, prev_seq).unsigned_abs();
            if sn_dist > self.max_seqnum_jump {
                warn!(
                    "watchdog: seqnum jump: prev={} next={} dist={}",
                    prev_seq, packet.seqnum, sn_dist
                );
                self.dead.set(true);
                return;
            }

            let ts_dist = timestamp_diff(packet.timestamp, prev_ts).unsigned_abs();
            if ts_dist > self.max_timestamp_jump {
                warn!(
                    "watchdog: timestamp jump: prev={} next={} dist={}",
                    prev_ts, packet.timestamp, ts_dist
                );
                self.dead.set(true);
                return;
            }
        }

        // Track only forward progress so reordered packets don't reset
        // the reference.
        match self.prev {
            Some((prev_seq, _)) if !seqnum_lt(prev_seq, packet.seqnum) => {}
            _ => self.prev = Some((packet.seqnum, packet.timestamp)),
        }
    }
}
