//! Audio file reading and preprocessing.
//!
//! Parses WAV input and converts it to a sample spec the L16 payload
//! types can carry: mono or stereo at 44.1 or 48 kHz, float samples.

use anyhow::{Context, Result};
use hound::{SampleFormat, WavReader, WavSpec};
use rtp_pcm_common::{rtp, Sample, SampleSpec};
use std::path::Path;
use tracing::info;

/// Audio data container with PCM samples and metadata.
#[derive(Debug)]
pub struct AudioData {
    // ---
    /// Interleaved float samples in [-1, 1]
    pub samples: Vec<Sample>,

    /// Spec of `samples` after conversion
    pub spec: SampleSpec,

    /// Original sample rate of the input file
    pub original_sample_rate: u32,

    /// Number of channels in the original file
    pub original_channels: u16,
}

impl AudioData {
    // ---
    /// Returns the total duration in seconds.
    pub fn duration_secs(&self) -> f64 {
        // ---
        let frames = self.samples.len() / self.spec.channels as usize;
        frames as f64 / self.spec.rate as f64
    }
}

/// Reads and preprocesses a WAV file for streaming.
///
/// Channel counts above two are downmixed to stereo; sample rates
/// without an L16 payload type are resampled to 44.1 kHz with linear
/// interpolation.
///
/// # Errors
///
/// Returns error if the file cannot be opened, the WAV format is
/// invalid, or the sample format is unsupported.
pub fn read_wav<P: AsRef<Path>>(path: P) -> Result<AudioData> {
    // ---
    let path = path.as_ref();
    info!("reading WAV file: {}", path.display());

    let mut reader = WavReader::open(path)
        .with_context(|| format!("failed to open WAV file: {}", path.display()))?;

    let wav_spec = reader.spec();
    info!(
        "WAV format: {}Hz, {} channels, {} bits",
        wav_spec.sample_rate, wav_spec.channels, wav_spec.bits_per_sample
    );

    let raw: Vec<Sample> = match (wav_spec.sample_format, wav_spec.bits_per_sample) {
        // --- Native integer path
        (SampleFormat::Int, 16) => reader
            .samples::<i16>()
            .collect::<Result<Vec<_>, _>>()
            .context("failed to read 16-bit PCM WAV samples")?
            .into_iter()
            .map(|s| s as Sample / i16::MAX as Sample)
            .collect(),

        // --- Float path
        (SampleFormat::Float, 32) => reader
            .samples::<f32>()
            .collect::<Result<Vec<_>, _>>()
            .context("failed to read 32-bit float WAV samples")?,

        // --- Explicit rejection
        (SampleFormat::Int, bits) => {
            anyhow::bail!(
                "unsupported integer PCM WAV format: {}-bit (only 16-bit PCM is supported)",
                bits
            );
        }

        (SampleFormat::Float, bits) => {
            anyhow::bail!(
                "unsupported float WAV format: {}-bit (only 32-bit float is supported)",
                bits
            );
        }
    };

    info!("read {} samples from file", raw.len());

    let (samples, spec) = convert_to_streamable(&raw, &wav_spec);

    Ok(AudioData {
        samples,
        spec,
        original_sample_rate: wav_spec.sample_rate,
        original_channels: wav_spec.channels,
    })
}

/// Converts to a spec with an L16 payload type.
fn convert_to_streamable(samples: &[Sample], wav_spec: &WavSpec) -> (Vec<Sample>, SampleSpec) {
    // ---
    let channels = wav_spec.channels.min(2);
    let mut converted = if wav_spec.channels as usize > channels as usize {
        info!("downmixing {} channels to {}", wav_spec.channels, channels);
        downmix(samples, wav_spec.channels as usize, channels as usize)
    } else {
        samples.to_vec()
    };

    let mut spec = SampleSpec::new(wav_spec.sample_rate, channels);
    if rtp::payload_type_for(spec).is_none() {
        info!("resampling from {}Hz to 44100Hz", spec.rate);
        converted = resample_linear(&converted, channels as usize, spec.rate, 44100);
        spec = SampleSpec::new(44100, channels);
    }

    (converted, spec)
}

/// Downmixes by averaging groups of input channels per output channel.
fn downmix(samples: &[Sample], in_ch: usize, out_ch: usize) -> Vec<Sample> {
    // ---
    let frames = samples.len() / in_ch;
    let mut out = Vec::with_capacity(frames * out_ch);

    for frame in samples.chunks(in_ch) {
        for ch in 0..out_ch {
            // Channels split round-robin over the outputs.
            let group: Vec<Sample> = frame
                .iter()
                .enumerate()
                .filter(|(i, _)| i % out_ch == ch)
                .map(|(_, &s)| s)
                .collect();
            out.push(group.iter().sum::<Sample>() / group.len() as Sample);
        }
    }

    out
}

/// Resamples interleaved audio with per-channel linear interpolation.
fn resample_linear(samples: &[Sample], channels: usize, from_rate: u32, to_rate: u32) -> Vec<Sample> {
    // ---
    if from_rate == to_rate || samples.len() < channels * 2 {
        return samples.to_vec();
    }

    let frames = samples.len() / channels;
    let ratio = from_rate as f64 / to_rate as f64;
    let out_frames = (frames as f64 / ratio) as usize;
    let mut out = Vec::with_capacity(out_frames * channels);

    for i in 0..out_frames {
        let src_pos = i as f64 * ratio;
        let src_idx = src_pos as usize;

        for ch in 0..channels {
            if src_idx >= frames - 1 {
                out.push(samples[(frames - 1) * channels + ch]);
            } else {
                let frac = (src_pos - src_idx as f64) as Sample;
                let s0 = samples[src_idx * channels + ch];
                let s1 = samples[(src_idx + 1) * channels + ch];
                out.push(s0 + (s1 - s0) * frac);
            }
        }
    }

    out
}
