//! Mixer: sums the output of all live sessions into one frame stream.
//!
//! Sessions are enumerated in stable key order. Each output sample is
//! the saturating sum of the sessions' samples at that index; frame
//! flags are ORed. A dead session contributes silence until reaped.

use std::collections::BTreeMap;

use rtp_pcm_common::{Frame, MetricsContext};
use tracing::info;

use crate::session::{Session, SourceKey};

/// Owns the session set and mixes their frames.
pub struct Mixer {
    // ---
    sessions: BTreeMap<SourceKey, Session>,

    /// Scratch frame reused across sessions.
    temp: Frame,

    metrics: Option<MetricsContext>,
}

impl Mixer {
    // ---
    pub fn new(frame_samples: usize, metrics: Option<MetricsContext>) -> Self {
        // ---
        Self {
            sessions: BTreeMap::new(),
            temp: Frame::new(frame_samples),
            metrics,
        }
    }

    pub fn add_session(&mut self, session: Session) {
        // ---
        if let Some(metrics) = &self.metrics {
            metrics.sessions_created_total.inc();
            metrics.sessions_live.inc();
        }
        self.sessions.insert(session.key(), session);
    }

    /// Number of sessions still alive.
    pub fn n_alive(&self) -> usize {
        // ---
        self.sessions.values().filter(|s| s.is_alive()).count()
    }

    pub fn n_sessions(&self) -> usize {
        // ---
        self.sessions.len()
    }

    /// Sessions in stable key order.
    pub fn sessions(&self) -> impl Iterator<Item = &Session> {
        // ---
        self.sessions.values()
    }

    /// Removes dead sessions, returning their keys so the router can
    /// forget them.
    pub fn reap(&mut self) -> Vec<SourceKey> {
        // ---
        let dead: Vec<SourceKey> = self
            .sessions
            .values()
            .filter(|s| !s.is_alive())
            .map(|s| s.key())
            .collect();

        for key in &dead {
            info!("mixer: reaping dead session {}", key);
            self.sessions.remove(key);
            if let Some(metrics) = &self.metrics {
                metrics.sessions_reaped_total.inc();
                metrics.sessions_live.dec();
            }
        }

        dead
    }

    /// Forwards the pump's playback-time report to every session.
    pub fn reclock(&mut self, ntp_time: u64) {
        // ---
        for session in self.sessions.values_mut() {
            session.reclock(ntp_time);
        }
    }

    /// Mixes one frame from all live sessions.
    ///
    /// Always succeeds; with no sessions the frame is silence with no
    /// flags.
    pub fn read(&mut self, frame: &mut Frame) -> bool {
        // ---
        frame.clear();
        let mut flags = 0u8;

        for session in self.sessions.values_mut() {
            if !session.is_alive() {
                continue;
            }

            self.temp.clear();
            if !session.read(&mut self.temp) {
                // Ended mid-stream: silence until reaped.
                continue;
            }

            flags |= self.temp.flags();
            for (out, add) in frame
                .samples_mut()
                .iter_mut()
                .zip(self.temp.samples().iter())
            {
                *out = (*out + add).clamp(-1.0, 1.0);
            }
        }

        frame.set_flags(flags);
        true
    }
}

#[cfg(test)]
mod tests {
    // ---
    use super::*;
    use crate::config::{ReceiverConfig, ResamplerProfile};
    use bytes::Bytes;
    use ringbuf::{HeapProducer, HeapRb};
    use rtp_pcm_common::rtcp::SenderReport;
    use rtp_pcm_common::rtp::PT_L16_MONO_44100;
    use rtp_pcm_common::{frame_flags, l16, packet_flags, Packet, SampleSpec};
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

    fn make_session(ssrc: u32, config: &ReceiverConfig) -> (Session, HeapProducer<Packet>) {
        let (producer, consumer) = HeapRb::<Packet>::new(512).split();
        let (_cp, ctl) = HeapRb::<SenderReport>::new(8).split();
        let key = SourceKey {
            addr: "127.0.0.1:5004".parse().unwrap(),
            ssrc,
        };
        let session =
            Session::new(key, PT_L16_MONO_44100, consumer, ctl, config, None).expect("session");
        (session, producer)
    }

    fn constant_packet(ssrc: u32, seq: u16, ts: u32, value: f32, len: usize) -> Packet {
        let samples = vec![value; len];
        let mut payload = Vec::new();
        l16::encode(&samples, &mut payload);
        Packet {
            seqnum: seq,
            timestamp: ts,
            payload_type: PT_L16_MONO_44100,
            ssrc,
            flags: packet_flags::AUDIO,
            blknum: 0,
            esi: 0,
            payload: Bytes::from(payload),
        }
    }

    #[test]
    fn test_empty_mixer_yields_silence() {
        // ---
        let mut mixer = Mixer::new(441, None);
        let mut frame = Frame::new(441);
        frame.samples_mut().fill(0.7);

        assert!(mixer.read(&mut frame));
        assert!(frame.samples().iter().all(|&s| s == 0.0));
        assert_eq!(frame.flags(), 0);
        assert_eq!(mixer.n_alive(), 0);
    }

    #[test]
    fn test_two_sessions_sum() {
        // ---
        let config = test_config();
        let mut mixer = Mixer::new(441, None);

        let (s1, mut p1) = make_session(1, &config);
        let (s2, mut p2) = make_session(2, &config);
        mixer.add_session(s1);
        mixer.add_session(s2);

        for seq in 0..4u16 {
            p1.push(constant_packet(1, seq, seq as u32 * 441, 0.25, 441))
                .unwrap();
            p2.push(constant_packet(2, seq, seq as u32 * 441, 0.5, 441))
                .unwrap();
        }

        let mut frame = Frame::new(441);
        assert!(mixer.read(&mut frame));
        assert!(frame.has_flags(frame_flags::HAS_SIGNAL));

        // Interior samples hold the plain sum.
        let mid = frame.samples()[100];
        assert!((mid - 0.75).abs() < 0.01, "got {}", mid);
    }

    #[test]
    fn test_sum_saturates() {
        // ---
        let config = test_config();
        let mut mixer = Mixer::new(441, None);

        let (s1, mut p1) = make_session(1, &config);
        let (s2, mut p2) = make_session(2, &config);
        mixer.add_session(s1);
        mixer.add_session(s2);

        for seq in 0..2u16 {
            p1.push(constant_packet(1, seq, seq as u32 * 441, 0.9, 441))
                .unwrap();
            p2.push(constant_packet(2, seq, seq as u32 * 441, 0.9, 441))
                .unwrap();
        }

        let mut frame = Frame::new(441);
        assert!(mixer.read(&mut frame));
        assert!(frame.samples().iter().all(|&s| s <= 1.0));
        let mid = frame.samples()[100];
        assert!((mid - 1.0).abs() < 0.01, "got {}", mid);
    }

    #[test]
    fn test_dead_session_contributes_silence_and_reaps() {
        // ---
        let config = test_config();
        let mut mixer = Mixer::new(441, None);

        let (s1, mut p1) = make_session(1, &config);
        mixer.add_session(s1);

        // A wild seqnum jump kills the session on drain.
        p1.push(constant_packet(1, 0, 0, 0.5, 441)).unwrap();
        p1.push(constant_packet(1, 30000, 30000 * 441, 0.5, 441))
            .unwrap();

        let mut frame = Frame::new(441);
        assert!(mixer.read(&mut frame));
        assert_eq!(mixer.n_alive(), 0);

        let reaped = mixer.reap();
        assert_eq!(reaped.len(), 1);
        assert_eq!(reaped[0].ssrc, 1);
        assert_eq!(mixer.n_sessions(), 0);
    }
}
