//! Latency monitor: measures playback latency and steers the resampler.
//!
//! Playback latency is the wrap-aware distance between the newest RTP
//! timestamp seen on the packet path and the render timestamp, in
//! source-rate samples. A PI controller converts the latency error into
//! a scaling factor near 1.0 that the resampler applies to its input
//! rate. Latency outside the fatal bounds poisons the session.

use std::cell::Cell;
use std::rc::Rc;

use rtp_pcm_common::units::timestamp_diff;
use rtp_pcm_common::{Frame, FrameReader, SampleSpec};
use tracing::{debug, warn};

use crate::config::LatencyTunerConfig;

/// Frame-reader layer computing the resampler scale at a fixed cadence.
pub struct LatencyMonitor {
    // ---
    inner: Box<dyn FrameReader>,
    spec: SampleSpec,

    /// Target latency in timestamp units.
    target: i32,

    /// Fatal bounds relative to target, in timestamp units.
    max_overrun: i32,
    max_underrun: i32,

    kp: f64,
    ki: f64,
    max_scale_delta: f64,

    /// Controller cadence in timestamp units.
    update_every: u32,
    since_update: u32,

    /// Integrated latency error.
    integrator: f64,

    /// Written here, read by the resampler each frame.
    scale_cell: Rc<Cell<f64>>,

    /// Poisoned on fatal drift; observed by the watchdog.
    dead: Rc<Cell<bool>>,

    /// Updated by the session's packet insert path.
    newest_ts: Rc<Cell<u32>>,

    /// Updated by the depacketizer.
    render_ts: Rc<Cell<u32>>,
    started: Rc<Cell<bool>>,

    /// Last reclock report from the pump (NTP), shared with the
    /// session for reporting.
    reclock: Rc<Cell<u64>>,
}

impl LatencyMonitor {
    // ---
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        inner: Box<dyn FrameReader>,
        spec: SampleSpec,
        target: u32,
        max_overrun: u32,
        max_underrun: u32,
        tuner: LatencyTunerConfig,
        scale_cell: Rc<Cell<f64>>,
        dead: Rc<Cell<bool>>,
        newest_ts: Rc<Cell<u32>>,
        render_ts: Rc<Cell<u32>>,
        started: Rc<Cell<bool>>,
        reclock: Rc<Cell<u64>>,
    ) -> Self {
        // ---
        let update_every = spec.duration_to_samples(tuner.update_interval).max(1) as u32;

        Self {
            inner,
            spec,
            target: target as i32,
            max_overrun: max_overrun as i32,
            max_underrun: max_underrun as i32,
            kp: tuner.kp,
            ki: tuner.ki,
            max_scale_delta: tuner.max_scale_delta,
            update_every,
            since_update: 0,
            integrator: 0.0,
            scale_cell,
            dead,
            newest_ts,
            render_ts,
            started,
            reclock,
        }
    }

    /// Current playback latency in timestamp units.
    pub fn latency(&self) -> i32 {
        // ---
        timestamp_diff(self.newest_ts.get(), self.render_ts.get())
    }

    /// The pump's most recent playback-time report.
    pub fn last_reclock(&self) -> u64 {
        // ---
        self.reclock.get()
    }

    /// Runs one controller update for the given latency error.
    fn run_controller(&mut self, error: f64) {
        // ---
        let raw = self.kp * error + self.ki * (self.integrator + error);

        let correction = if raw > self.max_scale_delta {
            // Clamped: freeze the integrator (anti-windup).
            self.max_scale_delta
        } else if raw < -self.max_scale_delta {
            -self.max_scale_delta
        } else {
            self.integrator += error;
            raw
        };

        let scale = 1.0 + correction;
        self.scale_cell.set(scale);

        debug!(
            "latency monitor: latency={} target={} scale={:.6}",
            self.latency(),
            self.target,
            scale
        );
    }
}

impl FrameReader for LatencyMonitor {
    fn read(&mut self, frame: &mut Frame) -> bool {
        // ---
        if !self.inner.read(frame) {
            return false;
        }

        if !self.started.get() {
            return true;
        }

        let latency = self.latency();
        let error = latency - self.target;

        if error > self.max_overrun || error < -self.max_underrun {
            warn!(
                "latency monitor: latency {} outside fatal bounds (target {}, +{}/-{})",
                latency, self.target, self.max_overrun, self.max_underrun
            );
            self.dead.set(true);
            return false;
        }

        let frame_units = (frame.num_samples() / self.spec.channels as usize) as u32;
        self.since_update += frame_units;
        if self.since_update >= self.update_every {
            self.since_update = 0;
            self.run_controller(error as f64);
        }

        true
    }
}
