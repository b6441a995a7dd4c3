//! Windowed-sinc resampler with a tunable rate scale.
//!
//! Converts the session's source rate to the sink rate while applying
//! the latency monitor's scaling factor: the effective input rate is
//! `R_in * s`, piecewise-constant between control updates. The phase
//! accumulator is never reset, so scale changes are click-free. The
//! kernel introduces a fixed group delay of `taps / 2` input frames.

use std::cell::Cell;
use std::collections::VecDeque;
use std::f64::consts::PI;
use std::rc::Rc;

use rtp_pcm_common::{Frame, FrameReader, Sample};

/// Phases per unit step in the precomputed kernel table.
const KERNEL_PHASES: usize = 128;

/// Cutoff headroom below Nyquist.
const CUTOFF_MARGIN: f64 = 0.98;

/// Polyphase windowed-sinc fractional resampler.
pub struct SincResampler {
    // ---
    channels: usize,

    /// Input frames consumed per output frame at scale 1.0.
    ratio: f64,

    scale: f64,

    taps: usize,

    /// (KERNEL_PHASES + 1) rows of `taps` coefficients.
    table: Vec<f32>,

    /// Interleaved input history + lookahead.
    buf: VecDeque<Sample>,

    /// Fractional input frame index of the next output frame,
    /// relative to the start of `buf`.
    pos: f64,
}

impl SincResampler {
    // ---
    /// Builds a resampler converting `in_rate` to `out_rate`.
    ///
    /// `taps` must be even (the profiles guarantee it).
    pub fn new(in_rate: u32, out_rate: u32, channels: usize, taps: usize) -> Self {
        // ---
        assert!(taps >= 4 && taps % 2 == 0, "resampler: bad tap count");

        let ratio = in_rate as f64 / out_rate as f64;

        // Low-pass at the narrower of the two Nyquist frequencies.
        let cutoff = CUTOFF_MARGIN * (out_rate as f64 / in_rate as f64).min(1.0);

        let half = (taps / 2) as isize;
        let mut table = vec![0.0f32; (KERNEL_PHASES + 1) * taps];
        for phase in 0..=KERNEL_PHASES {
            let frac = phase as f64 / KERNEL_PHASES as f64;
            let row = &mut table[phase * taps..(phase + 1) * taps];

            let mut sum = 0.0f64;
            for (t, cell) in row.iter_mut().enumerate() {
                // Distance from the interpolation point to this input.
                let x = (t as isize - half + 1) as f64 - frac;
                let value = sinc(cutoff * x) * blackman(x / half as f64);
                *cell = value as f32;
                sum += value;
            }

            // Normalize for unity DC gain per phase.
            if sum != 0.0 {
                for cell in row.iter_mut() {
                    *cell = (*cell as f64 / sum) as f32;
                }
            }
        }

        let mut buf = VecDeque::new();
        // Pre-charge the history so the first outputs see a full
        // kernel of (zero) input: this is the declared group delay.
        buf.extend(std::iter::repeat(0.0).take(taps * channels));

        Self {
            channels,
            ratio,
            scale: 1.0,
            taps,
            table,
            buf,
            pos: half as f64,
        }
    }

    /// Fixed delay introduced by the kernel, in input frames.
    pub fn latency(&self) -> usize {
        // ---
        self.taps / 2
    }

    /// Updates the rate scale. The phase accumulator is untouched.
    pub fn set_scale(&mut self, scale: f64) {
        // ---
        self.scale = scale;
    }

    pub fn scale(&self) -> f64 {
        // ---
        self.scale
    }

    /// Appends interleaved input samples.
    pub fn push(&mut self, samples: &[Sample]) {
        // ---
        debug_assert_eq!(samples.len() % self.channels, 0);
        self.buf.extend(samples.iter().copied());
    }

    /// Produces one interleaved output frame into `out`.
    ///
    /// Returns `false` when more input is needed first.
    pub fn pop(&mut self, out: &mut [Sample]) -> bool {
        // ---
        debug_assert_eq!(out.len(), self.channels);

        let base = self.pos.floor() as usize;
        let half = self.taps / 2;
        let frames_needed = base + half + 1;
        if self.buf.len() / self.channels < frames_needed {
            return false;
        }

        let frac = self.pos - base as f64;
        let phase_pos = frac * KERNEL_PHASES as f64;
        let phase = phase_pos.floor() as usize;
        let blend = (phase_pos - phase as f64) as f32;

        let row_a = &self.table[phase * self.taps..(phase + 1) * self.taps];
        let row_b = &self.table[(phase + 1) * self.taps..(phase + 2) * self.taps];

        let first_frame = base + 1 - half;
        for (ch, slot) in out.iter_mut().enumerate() {
            let mut acc = 0.0f32;
            for t in 0..self.taps {
                let coeff = row_a[t] + (row_b[t] - row_a[t]) * blend;
                let sample = self.buf[(first_frame + t) * self.channels + ch];
                acc += coeff * sample;
            }
            *slot = acc;
        }

        self.pos += self.ratio * self.scale;

        // Retire history that no future output can reference.
        let retire = (self.pos.floor() as usize).saturating_sub(half);
        if retire > 0 {
            self.buf.drain(..retire * self.channels);
            self.pos -= retire as f64;
        }

        true
    }
}

fn sinc(x: f64) -> f64 {
    // ---
    if x.abs() < 1e-9 {
        1.0
    } else {
        (PI * x).sin() / (PI * x)
    }
}

/// Blackman window over x in [-1, 1].
fn blackman(x: f64) -> f64 {
    // ---
    if x.abs() >= 1.0 {
        return 0.0;
    }
    let a = PI * (x + 1.0);
    0.42 - 0.5 * a.cos() + 0.08 * (2.0 * a).cos()
}

/// Frame-reader layer driving a [`SincResampler`] from an upstream
/// reader, honoring the latency monitor's scale.
pub struct ResamplerReader {
    // ---
    inner: Box<dyn FrameReader>,
    resampler: SincResampler,
    scale_cell: Rc<Cell<f64>>,
    channels: usize,

    /// Scratch input frame pulled from upstream.
    in_frame: Frame,
}

impl ResamplerReader {
    // ---
    pub fn new(
        inner: Box<dyn FrameReader>,
        resampler: SincResampler,
        scale_cell: Rc<Cell<f64>>,
        in_frame_samples: usize,
    ) -> Self {
        // ---
        let channels = resampler.channels;
        Self {
            inner,
            resampler,
            scale_cell,
            channels,
            in_frame: Frame::new(in_frame_samples),
        }
    }
}

impl FrameReader for ResamplerReader {
    fn read(&mut self, frame: &mut Frame) -> bool {
        // ---
        self.resampler.set_scale(self.scale_cell.get());

        let mut flags = 0u8;
        let channels = self.channels;
        let out = frame.samples_mut();

        let mut pos = 0;
        while pos < out.len() {
            if self.resampler.pop(&mut out[pos..pos + channels]) {
                pos += channels;
                continue;
            }

            // Need more input.
            self.in_frame.clear();
            if !self.inner.read(&mut self.in_frame) {
                return false;
            }
            flags |= self.in_frame.flags();
            self.resampler.push(self.in_frame.samples());
        }

        frame.set_flags(flags);
        true
    }
}

#[cfg(test)]
mod tests {
    // ---
    use super::*;

    /// Feeds a deterministic sine from upstream.
    struct SineReader {
        rate: u32,
        at: usize,
        freq: f32,
    }

    impl FrameReader for SineReader {
        fn read(&mut self, frame: &mut Frame) -> bool {
            for s in frame.samples_mut() {
                *s = (self.at as f32 * std::f32::consts::TAU * self.freq / self.rate as f32).sin();
                self.at += 1;
            }
            frame.set_flags(rtp_pcm_common::frame_flags::HAS_SIGNAL);
            true
        }
    }

    #[test]
    fn test_identity_passthrough_is_delayed_copy() {
        // ---
        let mut rs = SincResampler::new(44100, 44100, 1, 32);
        let delay = rs.latency();

        // A slow ramp: interpolation error is tiny on smooth input.
        let input: Vec<f32> = (0..1000).map(|i| i as f32 / 1000.0).collect();
        rs.push(&input);

        let mut out = vec![0.0f32; 1];
        let mut produced = Vec::new();
        while rs.pop(&mut out) {
            produced.push(out[0]);
        }

        // Steady state after the pre-charge flushes.
        for (i, &v) in produced.iter().enumerate().skip(delay * 2).take(500) {
            let expect = (i - delay) as f32 / 1000.0;
            assert!(
                (v - expect).abs() < 0.01,
                "sample {}: {} vs {}",
                i,
                v,
                expect
            );
        }
    }

    #[test]
    fn test_output_count_follows_ratio() {
        // ---
        // 44.1k -> 48k upsampling produces more frames than consumed.
        let mut rs = SincResampler::new(44100, 48000, 1, 32);

        let input = vec![0.0f32; 44100];
        rs.push(&input);

        let mut out = vec![0.0f32; 1];
        let mut produced = 0usize;
        while rs.pop(&mut out) {
            produced += 1;
        }

        let expect = 48000.0;
        let tolerance = 64.0; // one kernel length
        assert!(
            (produced as f64 - expect).abs() < tolerance,
            "produced {}",
            produced
        );
    }

    #[test]
    fn test_scale_changes_consumption_rate() {
        // ---
        let mut rs = SincResampler::new(48000, 48000, 1, 32);
        rs.set_scale(1.005);

        let input = vec![0.0f32; 48000];
        rs.push(&input);

        let mut out = vec![0.0f32; 1];
        let mut produced = 0usize;
        while rs.pop(&mut out) {
            produced += 1;
        }

        // output/input -> 1 / scale.
        let expect = 48000.0 / 1.005;
        assert!(
            (produced as f64 - expect).abs() < 64.0,
            "produced {}",
            produced
        );
    }

    #[test]
    fn test_scale_update_keeps_phase() {
        // ---
        // A scale change mid-stream must not jump the output: feed a
        // sine and look for any sample-to-sample discontinuity.
        let mut rs = SincResampler::new(44100, 44100, 1, 32);

        let input: Vec<f32> = (0..8820)
            .map(|i| (i as f32 * std::f32::consts::TAU * 440.0 / 44100.0).sin())
            .collect();
        rs.push(&input);

        let mut out = vec![0.0f32; 1];
        let mut produced = Vec::new();
        for i in 0..4000 {
            if i == 2000 {
                rs.set_scale(1.005);
            }
            assert!(rs.pop(&mut out));
            produced.push(out[0]);
        }

        // Max per-sample step of a 440 Hz sine at 44.1k is ~0.063;
        // a phase reset would show up as a much larger jump.
        for pair in produced.windows(2).skip(64) {
            assert!(
                (pair[1] - pair[0]).abs() < 0.1,
                "discontinuity: {} -> {}",
                pair[0],
                pair[1]
            );
        }
    }

    #[test]
    fn test_stereo_channels_stay_independent() {
        // ---
        let mut rs = SincResampler::new(44100, 44100, 2, 32);

        // Left = +0.5, right = -0.25 constants.
        let mut input = Vec::new();
        for _ in 0..500 {
            input.push(0.5);
            input.push(-0.25);
        }
        rs.push(&input);

        let mut out = vec![0.0f32; 2];
        // Skip the pre-charge transient.
        for _ in 0..64 {
            assert!(rs.pop(&mut out));
        }
        for _ in 0..200 {
            assert!(rs.pop(&mut out));
            assert!((out[0] - 0.5).abs() < 0.01, "left {}", out[0]);
            assert!((out[1] + 0.25).abs() < 0.01, "right {}", out[1]);
        }
    }

    #[test]
    fn test_reader_propagates_flags_and_eof() {
        // ---
        struct CountedReader {
            left: usize,
        }
        impl FrameReader for CountedReader {
            fn read(&mut self, frame: &mut Frame) -> bool {
                if self.left == 0 {
                    return false;
                }
                self.left -= 1;
                frame.set_flags(rtp_pcm_common::frame_flags::INCOMPLETE);
                true
            }
        }

        let rs = SincResampler::new(44100, 44100, 1, 32);
        let scale = Rc::new(Cell::new(1.0));
        let mut reader = ResamplerReader::new(
            Box::new(CountedReader { left: 4 }),
            rs,
            Rc::clone(&scale),
            128,
        );

        let mut frame = Frame::new(128);
        assert!(reader.read(&mut frame));
        assert!(frame.has_flags(rtp_pcm_common::frame_flags::INCOMPLETE));

        // Upstream dries up eventually.
        let mut frames = 0;
        while reader.read(&mut frame) {
            frames += 1;
            assert!(frames < 100, "reader should hit eof");
        }
    }

    #[test]
    fn test_reader_honors_scale_cell() {
        // ---
        let rs = SincResampler::new(44100, 44100, 1, 32);
        let scale = Rc::new(Cell::new(1.004));
        let mut reader = ResamplerReader::new(
            Box::new(SineReader {
                rate: 44100,
                at: 0,
                freq: 220.0,
            }),
            rs,
            Rc::clone(&scale),
            441,
        );

        let mut frame = Frame::new(441);
        assert!(reader.read(&mut frame));
        assert!((reader.resampler.scale() - 1.004).abs() < 1e-12);
    }
}
