//! Receiver configuration.
//!
//! All tunables of the pipeline in one typed struct. Durations have
//! nanosecond precision; the CLI exposes them in milliseconds.

use std::str::FromStr;
use std::time::Duration;

use anyhow::Result;
use rtp_pcm_common::{FecScheme, SampleSpec};

/// Who paces the pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ClockSource {
    // ---
    /// The sink blocks on `write`; the pump runs on its own thread.
    #[default]
    Internal,

    /// The caller paces `read`; the pipeline never blocks on time.
    External,
}

impl FromStr for ClockSource {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        // ---
        match s {
            "internal" => Ok(ClockSource::Internal),
            "external" => Ok(ClockSource::External),
            other => anyhow::bail!("unknown clock source: {}", other),
        }
    }
}

/// Resampler backend selection. Only the builtin exists today.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ResamplerBackend {
    // ---
    #[default]
    Builtin,
}

impl FromStr for ResamplerBackend {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        // ---
        match s {
            "builtin" => Ok(ResamplerBackend::Builtin),
            other => anyhow::bail!("unknown resampler backend: {}", other),
        }
    }
}

/// Resampler quality profile, trading kernel length for CPU.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ResamplerProfile {
    // ---
    /// 32-tap kernel.
    Low,

    /// 64-tap kernel.
    #[default]
    High,

    /// Bypass the resampler entirely (rates must match).
    Disable,
}

impl ResamplerProfile {
    // ---
    /// Kernel length in taps, or `None` when disabled.
    pub fn taps(&self) -> Option<usize> {
        // ---
        match self {
            ResamplerProfile::Low => Some(32),
            ResamplerProfile::High => Some(64),
            ResamplerProfile::Disable => None,
        }
    }
}

impl FromStr for ResamplerProfile {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        // ---
        match s {
            "low" => Ok(ResamplerProfile::Low),
            "high" => Ok(ResamplerProfile::High),
            "disable" => Ok(ResamplerProfile::Disable),
            other => anyhow::bail!("unknown resampler profile: {}", other),
        }
    }
}

/// FEC geometry for the session's repair stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FecConfig {
    // ---
    pub scheme: FecScheme,

    /// Source packets per block (K).
    pub n_source_packets: usize,

    /// Repair packets per block (R).
    pub n_repair_packets: usize,
}

impl Default for FecConfig {
    fn default() -> Self {
        // ---
        Self {
            scheme: FecScheme::Disable,
            n_source_packets: 20,
            n_repair_packets: 10,
        }
    }
}

/// Playback-clock control tunables (PI controller).
#[derive(Debug, Clone, Copy)]
pub struct LatencyTunerConfig {
    // ---
    /// Proportional gain, scale units per sample of error.
    pub kp: f64,

    /// Integral gain.
    pub ki: f64,

    /// Maximum deviation of the scaling factor from 1.0.
    pub max_scale_delta: f64,

    /// How often the scaling factor is recomputed.
    pub update_interval: Duration,
}

impl Default for LatencyTunerConfig {
    fn default() -> Self {
        // ---
        Self {
            kp: 1e-5,
            ki: 5e-8,
            max_scale_delta: 0.005,
            update_interval: Duration::from_millis(50),
        }
    }
}

/// Complete receiver configuration.
#[derive(Debug, Clone)]
pub struct ReceiverConfig {
    // ---
    /// Desired playback latency.
    pub target_latency: Duration,

    /// Fatal bound: latency this far above target kills the session.
    pub max_latency_overrun: Duration,

    /// Fatal bound: latency this far below target kills the session.
    pub max_latency_underrun: Duration,

    /// Watchdog: no `has-signal` frame for this long kills the session.
    pub no_playback_timeout: Duration,

    /// Watchdog: sliding window for the broken-playback detector.
    pub broken_playback_timeout: Duration,

    /// Watchdog: fraction of broken frames within the window that
    /// trips the detector.
    pub broken_playback_fraction: f32,

    /// Watchdog: maximum credible sequence number jump.
    pub max_seqnum_jump: u16,

    /// Watchdog: maximum credible timestamp jump.
    pub max_timestamp_jump: Duration,

    /// Sink frame cadence.
    pub frame_length: Duration,

    /// Sample spec delivered to the sink.
    pub output_spec: SampleSpec,

    pub resampler_backend: ResamplerBackend,
    pub resampler_profile: ResamplerProfile,

    pub fec: FecConfig,

    pub latency_tuner: LatencyTunerConfig,

    pub clock_source: ClockSource,

    /// Fill gaps with a diagnostic beep instead of silence.
    pub beep_on_loss: bool,

    /// Beep frequency in Hz.
    pub beep_frequency: f32,

    /// Maximum concurrent sessions.
    pub max_sessions: usize,
}

impl Default for ReceiverConfig {
    fn default() -> Self {
        // ---
        Self {
            target_latency: Duration::from_millis(200),
            max_latency_overrun: Duration::from_millis(500),
            max_latency_underrun: Duration::from_millis(200),
            no_playback_timeout: Duration::from_secs(2),
            broken_playback_timeout: Duration::from_secs(2),
            broken_playback_fraction: 0.95,
            max_seqnum_jump: 100,
            max_timestamp_jump: Duration::from_secs(1),
            frame_length: Duration::from_millis(10),
            output_spec: SampleSpec::new(44100, 2),
            resampler_backend: ResamplerBackend::default(),
            resampler_profile: ResamplerProfile::default(),
            fec: FecConfig::default(),
            latency_tuner: LatencyTunerConfig::default(),
            clock_source: ClockSource::default(),
            beep_on_loss: false,
            beep_frequency: 880.0,
            max_sessions: 16,
        }
    }
}

impl ReceiverConfig {
    // ---
    /// Sorted queue window: one FEC block plus slack.
    pub fn queue_window(&self) -> usize {
        // ---
        let block = self.fec.n_source_packets + self.fec.n_repair_packets;
        (block * 2).max(64)
    }
}

#[cfg(test)]
mod tests {
    // ---
    use super::*;

    #[test]
    fn test_enum_parsing() {
        // ---
        assert_eq!(
            "internal".parse::<ClockSource>().unwrap(),
            ClockSource::Internal
        );
        assert_eq!(
            "external".parse::<ClockSource>().unwrap(),
            ClockSource::External
        );
        assert!("ntp".parse::<ClockSource>().is_err());

        assert_eq!(
            "low".parse::<ResamplerProfile>().unwrap(),
            ResamplerProfile::Low
        );
        assert_eq!(
            "disable".parse::<ResamplerProfile>().unwrap(),
            ResamplerProfile::Disable
        );
        assert!("ultra".parse::<ResamplerProfile>().is_err());

        assert_eq!(
            "builtin".parse::<ResamplerBackend>().unwrap(),
            ResamplerBackend::Builtin
        );
        assert!("speex".parse::<ResamplerBackend>().is_err());
    }

    #[test]
    fn test_queue_window_scales_with_block() {
        // ---
        let mut config = ReceiverConfig::default();
        assert_eq!(config.queue_window(), 64);

        config.fec.n_source_packets = 40;
        config.fec.n_repair_packets = 20;
        assert_eq!(config.queue_window(), 120);
    }

    #[test]
    fn test_profile_taps() {
        // ---
        assert_eq!(ResamplerProfile::Low.taps(), Some(32));
        assert_eq!(ResamplerProfile::High.taps(), Some(64));
        assert_eq!(ResamplerProfile::Disable.taps(), None);
    }
}
