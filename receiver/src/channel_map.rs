//! Channel mapper: translates between channel layouts.
//!
//! A precomputed matrix maps input channels to output channels:
//! mono upmixes by duplication, stereo downmixes by averaging, equal
//! layouts pass through untouched. Sample rate never changes here.

use rtp_pcm_common::{Frame, FrameReader, SampleSpec};

/// Frame-reader layer applying a channel mapping matrix.
pub struct ChannelMapperReader {
    // ---
    inner: Box<dyn FrameReader>,
    in_spec: SampleSpec,
    out_spec: SampleSpec,

    /// Row-major `out_channels x in_channels` mixing matrix; empty in
    /// passthrough mode.
    matrix: Vec<f32>,

    /// Scratch input frame.
    in_frame: Frame,
}

impl ChannelMapperReader {
    // ---
    /// Builds a mapper for one output frame of `out_samples` samples.
    ///
    /// Input and output sample rates must match; rate conversion is the
    /// resampler's job.
    pub fn new(
        inner: Box<dyn FrameReader>,
        in_spec: SampleSpec,
        out_spec: SampleSpec,
        out_samples: usize,
    ) -> Self {
        // ---
        assert_eq!(
            in_spec.rate, out_spec.rate,
            "channel mapper: input and output sample rates must be equal"
        );

        let matrix = if in_spec.channels == out_spec.channels {
            Vec::new()
        } else {
            build_matrix(in_spec.channels as usize, out_spec.channels as usize)
        };

        let in_samples = out_samples / out_spec.channels as usize * in_spec.channels as usize;

        Self {
            inner,
            in_spec,
            out_spec,
            matrix,
            in_frame: Frame::new(in_samples),
        }
    }
}

/// Mixing matrix for an (in, out) channel pair.
fn build_matrix(in_ch: usize, out_ch: usize) -> Vec<f32> {
    // ---
    let mut matrix = vec![0.0f32; out_ch * in_ch];

    for out in 0..out_ch {
        let row = &mut matrix[out * in_ch..(out + 1) * in_ch];
        if in_ch == 1 {
            // Mono upmix: duplicate into every output channel.
            row[0] = 1.0;
        } else if out_ch == 1 {
            // Downmix: average all input channels.
            row.fill(1.0 / in_ch as f32);
        } else if out < in_ch {
            // Positional copy for matching channel indexes.
            row[out] = 1.0;
        } else {
            // Extra outputs mirror the last input channel.
            row[in_ch - 1] = 1.0;
        }
    }

    matrix
}

impl FrameReader for ChannelMapperReader {
    fn read(&mut self, frame: &mut Frame) -> bool {
        // ---
        debug_assert_eq!(
            frame.num_samples() % self.out_spec.channels as usize,
            0,
            "channel mapper: unexpected frame size"
        );

        if self.matrix.is_empty() {
            return self.inner.read(frame);
        }

        let in_ch = self.in_spec.channels as usize;
        let out_ch = self.out_spec.channels as usize;
        let n_frames = frame.num_samples() / out_ch;
        debug_assert_eq!(self.in_frame.num_samples(), n_frames * in_ch);

        self.in_frame.clear();
        if !self.inner.read(&mut self.in_frame) {
            return false;
        }

        let input = self.in_frame.samples();
        let output = frame.samples_mut();

        for i in 0..n_frames {
            let src = &input[i * in_ch..(i + 1) * in_ch];
            let dst = &mut output[i * out_ch..(i + 1) * out_ch];
            for (out, slot) in dst.iter_mut().enumerate() {
                let row = &self.matrix[out * in_ch..(out + 1) * in_ch];
                *slot = row.iter().zip(src.iter()).map(|(m, s)| m * s).sum();
            }
        }

        frame.set_flags(self.in_frame.flags());
        true
    }
}

#[cfg(test)]
mod tests {
    // ---
    use super::*;
    use rtp_pcm_common::frame_flags;

    /// Supplies a fixed repeating channel pattern.
    struct PatternReader {
        pattern: Vec<f32>,
        flags: u8,
    }

    impl FrameReader for PatternReader {
        fn read(&mut self, frame: &mut Frame) -> bool {
            for (i, s) in frame.samples_mut().iter_mut().enumerate() {
                *s = self.pattern[i % self.pattern.len()];
            }
            frame.set_flags(self.flags);
            true
        }
    }

    #[test]
    fn test_passthrough_same_layout() {
        // ---
        let mut mapper = ChannelMapperReader::new(
            Box::new(PatternReader {
                pattern: vec![0.25, -0.5],
                flags: frame_flags::HAS_SIGNAL,
            }),
            SampleSpec::new(44100, 2),
            SampleSpec::new(44100, 2),
            8,
        );

        let mut frame = Frame::new(8);
        assert!(mapper.read(&mut frame));
        assert_eq!(frame.samples(), &[0.25, -0.5, 0.25, -0.5, 0.25, -0.5, 0.25, -0.5]);
        assert!(frame.has_flags(frame_flags::HAS_SIGNAL));
    }

    #[test]
    fn test_mono_to_stereo_duplicates() {
        // ---
        let mut mapper = ChannelMapperReader::new(
            Box::new(PatternReader {
                pattern: vec![0.5],
                flags: frame_flags::HAS_SIGNAL,
            }),
            SampleSpec::new(44100, 1),
            SampleSpec::new(44100, 2),
            8,
        );

        let mut frame = Frame::new(8);
        assert!(mapper.read(&mut frame));
        assert!(frame.samples().iter().all(|&s| (s - 0.5).abs() < 1e-6));
    }

    #[test]
    fn test_stereo_to_mono_averages() {
        // ---
        let mut mapper = ChannelMapperReader::new(
            Box::new(PatternReader {
                pattern: vec![0.4, 0.2],
                flags: 0,
            }),
            SampleSpec::new(48000, 2),
            SampleSpec::new(48000, 1),
            4,
        );

        let mut frame = Frame::new(4);
        assert!(mapper.read(&mut frame));
        for &s in frame.samples() {
            assert!((s - 0.3).abs() < 1e-6, "got {}", s);
        }
    }

    #[test]
    fn test_flags_propagate_through_mapping() {
        // ---
        let mut mapper = ChannelMapperReader::new(
            Box::new(PatternReader {
                pattern: vec![0.1],
                flags: frame_flags::INCOMPLETE | frame_flags::DROPS,
            }),
            SampleSpec::new(44100, 1),
            SampleSpec::new(44100, 2),
            8,
        );

        let mut frame = Frame::new(8);
        assert!(mapper.read(&mut frame));
        assert!(frame.has_flags(frame_flags::INCOMPLETE));
        assert!(frame.has_flags(frame_flags::DROPS));
    }

    #[test]
    #[should_panic(expected = "sample rates must be equal")]
    fn test_rate_mismatch_panics() {
        // ---
        let _ = ChannelMapperReader::new(
            Box::new(PatternReader {
                pattern: vec![0.0],
                flags: 0,
            }),
            SampleSpec::new(44100, 1),
            SampleSpec::new(48000, 1),
            8,
        );
    }
}
