//! Audio playback sink using cpal.
//!
//! The pipeline thread pushes interleaved samples into a lock-free
//! ring; the cpal callback drains it. `write` blocks while the ring is
//! full, which is the pipeline's only timing source in internal-clock
//! mode.

use std::time::Duration;

use anyhow::{Context, Result};
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{Device, Stream, StreamConfig};
use ringbuf::{HeapConsumer, HeapProducer, HeapRb};
use rtp_pcm_common::{Frame, Sample, SampleSpec, Sink};
use tracing::{debug, info, warn};

/// How much audio the device-side ring holds.
const RING_LENGTH: Duration = Duration::from_millis(100);

/// Poll interval while the ring is full.
const FULL_BACKOFF: Duration = Duration::from_millis(1);

/// Real-time playback sink for the system's default output device.
pub struct CpalSink {
    // ---
    _stream: Stream,
    producer: HeapProducer<Sample>,
    spec: SampleSpec,
}

impl CpalSink {
    // ---
    /// Opens the default output device at the given spec.
    ///
    /// # Errors
    ///
    /// Returns error if no output device is available or the stream
    /// cannot be configured.
    pub fn new(spec: SampleSpec) -> Result<Self> {
        // ---
        info!("initializing audio playback at {}Hz/{}ch", spec.rate, spec.channels);

        let host = cpal::default_host();
        let device = host
            .default_output_device()
            .context("no output device available")?;

        info!("using audio device: {}", device.name()?);

        let ring_samples = spec.duration_to_samples_overall(RING_LENGTH).max(1024);
        let (producer, consumer) = HeapRb::<Sample>::new(ring_samples).split();

        let stream = Self::build_stream(&device, spec, consumer)?;

        Ok(Self {
            _stream: stream,
            producer,
            spec,
        })
    }

    fn build_stream(
        device: &Device,
        spec: SampleSpec,
        mut consumer: HeapConsumer<Sample>,
    ) -> Result<Stream> {
        // ---
        let config = StreamConfig {
            channels: spec.channels,
            sample_rate: cpal::SampleRate(spec.rate),
            buffer_size: cpal::BufferSize::Default,
        };

        debug!("stream config: {:?}", config);

        let stream = device
            .build_output_stream(
                &config,
                move |data: &mut [f32], _: &cpal::OutputCallbackInfo| {
                    for sample in data.iter_mut() {
                        *sample = consumer.pop().unwrap_or(0.0);
                    }
                },
                |err| {
                    warn!("audio stream error: {}", err);
                },
                None,
            )
            .context("failed to build output stream")?;

        stream.play().context("failed to start audio stream")?;
        info!("audio stream started");

        Ok(stream)
    }
}

impl Sink for CpalSink {
    fn write(&mut self, frame: &Frame) {
        // ---
        for &sample in frame.samples() {
            loop {
                if self.producer.push(sample).is_ok() {
                    break;
                }
                // The device drains the ring at its own pace.
                std::thread::sleep(FULL_BACKOFF);
            }
        }
    }

    fn latency(&self) -> Duration {
        // ---
        let buffered = self.producer.len() / self.spec.channels as usize;
        self.spec.samples_to_duration(buffered)
    }

    fn sample_spec(&self) -> SampleSpec {
        // ---
        self.spec
    }
}

#[cfg(test)]
mod tests {
    // ---
    use super::*;

    #[test]
    fn test_sink_creation() {
        // ---
        // Requires an audio device; skip in CI containers.
        let result = CpalSink::new(SampleSpec::new(44100, 2));

        if result.is_err() {
            println!("Skipping: no audio device available (expected in CI)");
            return;
        }

        let mut sink = result.unwrap();
        let frame = Frame::new(441 * 2);
        sink.write(&frame);
        assert!(sink.latency() >= Duration::ZERO);
        assert_eq!(sink.sample_spec(), SampleSpec::new(44100, 2));
    }
}
