//! Receiver pipeline library.
//!
//! Packets enter at the bottom (network task → router → per-session
//! rings); samples exit at the top (pump → sink). Each remote source
//! owns an independent session column; the mixer sums the live
//! columns into one stream. This crate can be embedded (external
//! clock: the caller paces `read`) or driven by its own pump thread
//! against a blocking sink (internal clock).

pub mod audio;
pub mod channel_map;
pub mod config;
pub mod depacketizer;
pub mod fec_reader;
pub mod latency;
pub mod mixer;
pub mod network;
pub mod pump;
pub mod queue;
pub mod resampler;
pub mod router;
pub mod session;
pub mod stats;
pub mod watchdog;

pub use audio::CpalSink;
pub use config::{ClockSource, FecConfig, ReceiverConfig, ResamplerProfile};
pub use mixer::Mixer;
pub use pump::{Pump, PumpHandle, PumpMode};
pub use queue::SortedQueue;
pub use router::{RouteError, Router, SessionEvent};
pub use session::{Session, SourceKey};
pub use stats::SessionStats;

use std::sync::mpsc::Receiver;

use rtp_pcm_common::{DeviceState, Frame, FrameReader, MetricsContext, Source};
use tracing::warn;

/// Frames between reception-report snapshots published to the router.
const REPORT_PUBLISH_FRAMES: u64 = 100;

/// The receiver's top-level frame source: builds session columns from
/// router announcements, mixes them, and reaps the dead.
pub struct ReceiverSource {
    // ---
    mixer: Mixer,
    events: Receiver<SessionEvent>,
    router: Router,
    config: ReceiverConfig,
    metrics: Option<MetricsContext>,
    frames: u64,
}

impl ReceiverSource {
    // ---
    pub fn new(
        config: ReceiverConfig,
        router: Router,
        events: Receiver<SessionEvent>,
        metrics: Option<MetricsContext>,
    ) -> Self {
        // ---
        let frame_samples = config
            .output_spec
            .duration_to_samples_overall(config.frame_length);

        Self {
            mixer: Mixer::new(frame_samples, metrics.clone()),
            events,
            router,
            config,
            metrics,
            frames: 0,
        }
    }

    /// Output samples per frame at the configured spec and cadence.
    pub fn frame_samples(&self) -> usize {
        // ---
        self.config
            .output_spec
            .duration_to_samples_overall(self.config.frame_length)
    }

    pub fn n_sessions(&self) -> usize {
        // ---
        self.mixer.n_sessions()
    }

    pub fn n_alive(&self) -> usize {
        // ---
        self.mixer.n_alive()
    }

    /// Sessions in stable key order.
    pub fn sessions(&self) -> impl Iterator<Item = &Session> {
        // ---
        self.mixer.sessions()
    }

    /// Builds columns for sessions the router admitted since the last
    /// frame.
    fn process_events(&mut self) {
        // ---
        while let Ok(event) = self.events.try_recv() {
            let key = event.key;
            match Session::new(
                key,
                event.payload_type,
                event.consumer,
                event.control,
                &self.config,
                self.metrics.clone(),
            ) {
                Ok(session) => self.mixer.add_session(session),
                Err(e) => {
                    warn!("failed to build session {}: {}", key, e);
                    self.router.forget(key);
                }
            }
        }
    }

    /// Drops dead sessions and tells the router to forget them so a
    /// reappearing source starts a fresh session.
    fn reap(&mut self) {
        // ---
        for key in self.mixer.reap() {
            self.router.forget(key);
        }
    }

    /// Snapshots every session's reception report into the router so
    /// the control loop can answer sender reports.
    fn publish_reports(&self) {
        // ---
        for session in self.mixer.sessions() {
            let block = session.stats().borrow().report_block(session.key().ssrc);
            self.router.publish_report(block);
        }
    }
}

impl FrameReader for ReceiverSource {
    fn read(&mut self, frame: &mut Frame) -> bool {
        // ---
        self.process_events();
        self.mixer.read(frame);
        self.reap();

        self.frames += 1;
        if self.frames % REPORT_PUBLISH_FRAMES == 0 {
            self.publish_reports();
        }

        true
    }
}

impl Source for ReceiverSource {
    fn state(&self) -> DeviceState {
        // ---
        if self.mixer.n_alive() > 0 {
            DeviceState::Active
        } else {
            DeviceState::Inactive
        }
    }

    fn pause(&mut self) -> bool {
        // ---
        true
    }

    fn resume(&mut self) -> bool {
        // ---
        true
    }

    fn restart(&mut self) -> bool {
        // ---
        true
    }

    fn reclock(&mut self, ntp_time: u64) {
        // ---
        self.mixer.reclock(ntp_time);
    }
}

#[cfg(test)]
mod tests {
    // ---
    use super::*;
    use bytes::Bytes;
    use rtp_pcm_common::rtp::{compose, PT_L16_MONO_44100};
    use rtp_pcm_common::{frame_flags, l16, packet_flags, Packet, SampleSpec};
    use std::sync::mpsc::channel;
    use std::time::Duration;

    fn test_config() -> ReceiverConfig {
        ReceiverConfig {
            target_latency: Duration::from_millis(0),
            frame_length: Duration::from_millis(10),
            output_spec: SampleSpec::new(44100, 1),
            resampler_profile: ResamplerProfile::Disable,
            ..Default::default()
        }
    }

    fn media_datagram(ssrc: u32, seq: u16, value: f32) -> Bytes {
        let samples = vec![value; 441];
        let mut payload = Vec::new();
        l16::encode(&samples, &mut payload);
        let packet = Packet {
            seqnum: seq,
            timestamp: seq as u32 * 441,
            payload_type: PT_L16_MONO_44100,
            ssrc,
            flags: packet_flags::AUDIO,
            blknum: 0,
            esi: 0,
            payload: Bytes::from(payload),
        };
        Bytes::from(compose(&packet, None))
    }

    #[test]
    fn test_source_goes_active_with_sessions() {
        // ---
        let (tx, rx) = channel();
        let router = Router::new(4, false, tx, None);
        let mut source = ReceiverSource::new(test_config(), router.clone(), rx, None);

        assert_eq!(source.state(), DeviceState::Inactive);

        let addr = "10.0.0.1:4000".parse().unwrap();
        for seq in 0..4u16 {
            router.route(media_datagram(1, seq, 0.5), addr).unwrap();
        }

        let mut frame = Frame::new(source.frame_samples());
        assert!(source.read(&mut frame));
        assert_eq!(source.state(), DeviceState::Active);
        assert!(frame.has_flags(frame_flags::HAS_SIGNAL));
    }

    #[test]
    fn test_reaped_session_is_forgotten_in_router() {
        // ---
        let (tx, rx) = channel();
        let router = Router::new(4, false, tx, None);
        let mut source = ReceiverSource::new(test_config(), router.clone(), rx, None);

        let addr = "10.0.0.1:4000".parse().unwrap();
        router.route(media_datagram(1, 0, 0.5), addr).unwrap();
        // A crazy jump kills the session.
        router.route(media_datagram(1, 30000, 0.5), addr).unwrap();

        let mut frame = Frame::new(source.frame_samples());
        assert!(source.read(&mut frame));

        assert_eq!(source.n_sessions(), 0);
        assert_eq!(router.n_sessions(), 0);
        assert_eq!(source.state(), DeviceState::Inactive);
    }
}
