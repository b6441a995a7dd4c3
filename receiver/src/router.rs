//! Session router: classifies inbound datagrams and dispatches them to
//! per-session handoff rings.
//!
//! Runs on the network task. The session map is guarded by a
//! short-held mutex; the per-session handoff is a bounded lock-free
//! SPSC ring, so the network task never blocks on the pipeline. New
//! sessions are announced to the pipeline thread over a channel; the
//! pipeline builds the actual column.

use std::collections::HashMap;
use std::fmt;
use std::net::SocketAddr;
use std::sync::mpsc::Sender;
use std::sync::Arc;

use bytes::Bytes;
use parking_lot::Mutex;
use rtp_pcm_common::rtcp::{self, ReportBlock, RtcpPacket, SenderReport};
use rtp_pcm_common::{rtp, MetricsContext, Packet};
use ringbuf::{HeapConsumer, HeapProducer, HeapRb};
use tracing::{debug, info, warn};

use crate::session::SourceKey;

/// Capacity of the per-session media handoff ring.
const MEDIA_RING_CAP: usize = 1024;

/// Capacity of the per-session control handoff ring.
const CONTROL_RING_CAP: usize = 16;

/// Why a packet was refused.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RouteError {
    // ---
    /// Media packet with a payload type no session format matches.
    UnknownPayloadType,

    /// A new session was needed but the session cap is reached.
    SessionLimit,

    /// The datagram could not be parsed into a packet.
    MalformedAddress,
}

impl fmt::Display for RouteError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // ---
        let name = match self {
            RouteError::UnknownPayloadType => "unknown payload type",
            RouteError::SessionLimit => "session limit reached",
            RouteError::MalformedAddress => "malformed packet",
        };
        write!(f, "{}", name)
    }
}

/// Announcement of a newly admitted session.
pub struct SessionEvent {
    // ---
    pub key: SourceKey,
    pub payload_type: u8,
    pub consumer: HeapConsumer<Packet>,
    pub control: HeapConsumer<SenderReport>,
}

struct Entry {
    // ---
    media: HeapProducer<Packet>,
    control: HeapProducer<SenderReport>,
}

struct RouterInner {
    // ---
    sessions: HashMap<SourceKey, Entry>,
    max_sessions: usize,
    fec_active: bool,
    events: Sender<SessionEvent>,

    /// Packets dropped because a handoff ring was full.
    overflow_dropped: u64,

    /// Latest reception report per remote SSRC, published by the
    /// pipeline thread for the control loop's RTCP replies.
    reports: HashMap<u32, ReportBlock>,
}

/// Thread-safe packet classifier and dispatcher.
#[derive(Clone)]
pub struct Router {
    // ---
    inner: Arc<Mutex<RouterInner>>,
    metrics: Option<MetricsContext>,
}

impl Router {
    // ---
    pub fn new(
        max_sessions: usize,
        fec_active: bool,
        events: Sender<SessionEvent>,
        metrics: Option<MetricsContext>,
    ) -> Self {
        // ---
        Self {
            inner: Arc::new(Mutex::new(RouterInner {
                sessions: HashMap::new(),
                max_sessions,
                fec_active,
                events,
                overflow_dropped: 0,
                reports: HashMap::new(),
            })),
            metrics,
        }
    }

    /// Classifies one media datagram and hands it to its session.
    ///
    /// A new session is admitted only for a media (non-repair) packet
    /// with a recognized payload type, below the session cap.
    pub fn route(&self, data: Bytes, addr: SocketAddr) -> Result<(), RouteError> {
        // ---
        let fec_active = self.inner.lock().fec_active;

        let packet = rtp::parse(data, fec_active).map_err(|e| {
            debug!("router: dropping malformed packet from {}: {}", addr, e);
            RouteError::MalformedAddress
        })?;

        let key = SourceKey {
            addr,
            ssrc: packet.ssrc,
        };

        if packet.is_repair() {
            if !fec_active {
                return Err(RouteError::UnknownPayloadType);
            }

            // Repair packets never create sessions; without one they
            // are useless and silently dropped. The sender may emit the
            // repair stream from a different port, so fall back to SSRC
            // matching when the exact key misses.
            let mut inner = self.inner.lock();
            let ssrc = packet.ssrc;
            let entry = if inner.sessions.contains_key(&key) {
                inner.sessions.get_mut(&key)
            } else {
                inner
                    .sessions
                    .iter_mut()
                    .find(|(k, _)| k.ssrc == ssrc)
                    .map(|(_, e)| e)
            };
            if let Some(entry) = entry {
                if entry.media.push(packet).is_err() {
                    inner.overflow_dropped += 1;
                    self.count_drop();
                }
            }
            return Ok(());
        }

        let payload_type = packet.payload_type;
        if rtp::format(payload_type).is_none() {
            return Err(RouteError::UnknownPayloadType);
        }

        let mut inner = self.inner.lock();

        if !inner.sessions.contains_key(&key) {
            if inner.sessions.len() >= inner.max_sessions {
                return Err(RouteError::SessionLimit);
            }

            let (media_prod, media_cons) = HeapRb::<Packet>::new(MEDIA_RING_CAP).split();
            let (ctl_prod, ctl_cons) = HeapRb::<SenderReport>::new(CONTROL_RING_CAP).split();

            info!("router: admitting session {}", key);

            // The pipeline may already be gone during shutdown; the
            // packet is then dropped with the event.
            if inner
                .events
                .send(SessionEvent {
                    key,
                    payload_type,
                    consumer: media_cons,
                    control: ctl_cons,
                })
                .is_err()
            {
                warn!("router: pipeline gone, dropping session {}", key);
                return Ok(());
            }

            inner.sessions.insert(
                key,
                Entry {
                    media: media_prod,
                    control: ctl_prod,
                },
            );
        }

        let entry = inner.sessions.get_mut(&key).expect("inserted above");
        if entry.media.push(packet).is_err() {
            inner.overflow_dropped += 1;
            self.count_drop();
        }

        Ok(())
    }

    /// Feeds an RTCP datagram; sender reports reach the session whose
    /// SSRC they describe.
    ///
    /// Returns the SSRC of a handled sender report so the control loop
    /// can answer it with a reception report.
    pub fn route_control(&self, data: &[u8], addr: SocketAddr) -> Result<Option<u32>, RouteError> {
        // ---
        let parsed = rtcp::parse(data).map_err(|e| {
            debug!("router: dropping malformed RTCP from {}: {}", addr, e);
            RouteError::MalformedAddress
        })?;

        if let Some(RtcpPacket::SenderReport(report)) = parsed {
            let mut inner = self.inner.lock();
            for (key, entry) in inner.sessions.iter_mut() {
                if key.ssrc == report.ssrc {
                    let _ = entry.control.push(report);
                }
            }
            return Ok(Some(report.ssrc));
        }

        Ok(None)
    }

    /// Publishes the pipeline's reception report for a remote stream.
    pub fn publish_report(&self, block: ReportBlock) {
        // ---
        self.inner.lock().reports.insert(block.ssrc, block);
    }

    /// Latest reception report for a remote stream, if one was
    /// published.
    pub fn report_for(&self, ssrc: u32) -> Option<ReportBlock> {
        // ---
        self.inner.lock().reports.get(&ssrc).copied()
    }

    /// Forgets a reaped session so a reappearing source starts fresh.
    pub fn forget(&self, key: SourceKey) {
        // ---
        let mut inner = self.inner.lock();
        inner.sessions.remove(&key);
        inner.reports.remove(&key.ssrc);
    }

    pub fn n_sessions(&self) -> usize {
        // ---
        self.inner.lock().sessions.len()
    }

    fn count_drop(&self) {
        // ---
        if let Some(metrics) = &self.metrics {
            metrics.packets_dropped_total.inc();
        }
    }
}

#[cfg(test)]
mod tests {
    // ---
    use super::*;
    use rtp_pcm_common::packet_flags;
    use rtp_pcm_common::rtp::{compose, PT_L16_MONO_44100};
    use std::sync::mpsc::channel;

    fn addr(port: u16) -> SocketAddr {
        format!("127.0.0.1:{}", port).parse().unwrap()
    }

    fn media_datagram(ssrc: u32, seq: u16, pt: u8) -> Bytes {
        let packet = Packet {
            seqnum: seq,
            timestamp: seq as u32 * 441,
            payload_type: pt,
            ssrc,
            flags: packet_flags::AUDIO,
            blknum: 0,
            esi: 0,
            payload: Bytes::from_static(&[0u8; 4]),
        };
        Bytes::from(compose(&packet, None))
    }

    #[test]
    fn test_admits_session_and_delivers() {
        // ---
        let (tx, rx) = channel();
        let router = Router::new(4, false, tx, None);

        router
            .route(media_datagram(7, 0, PT_L16_MONO_44100), addr(1000))
            .expect("route failed");
        router
            .route(media_datagram(7, 1, PT_L16_MONO_44100), addr(1000))
            .expect("route failed");

        let mut event = rx.try_recv().expect("session event expected");
        assert_eq!(event.key.ssrc, 7);
        assert_eq!(event.payload_type, PT_L16_MONO_44100);

        assert_eq!(event.consumer.pop().unwrap().seqnum, 0);
        assert_eq!(event.consumer.pop().unwrap().seqnum, 1);
        assert_eq!(router.n_sessions(), 1);
    }

    #[test]
    fn test_distinct_ssrcs_get_distinct_sessions() {
        // ---
        let (tx, rx) = channel();
        let router = Router::new(4, false, tx, None);

        router
            .route(media_datagram(1, 0, PT_L16_MONO_44100), addr(1000))
            .unwrap();
        router
            .route(media_datagram(2, 0, PT_L16_MONO_44100), addr(1000))
            .unwrap();

        assert_eq!(router.n_sessions(), 2);
        assert_eq!(rx.try_iter().count(), 2);
    }

    #[test]
    fn test_session_limit() {
        // ---
        let (tx, _rx) = channel();
        let router = Router::new(1, false, tx, None);

        router
            .route(media_datagram(1, 0, PT_L16_MONO_44100), addr(1000))
            .unwrap();
        let err = router
            .route(media_datagram(2, 0, PT_L16_MONO_44100), addr(1000))
            .unwrap_err();
        assert_eq!(err, RouteError::SessionLimit);
    }

    #[test]
    fn test_unknown_payload_type_rejected() {
        // ---
        let (tx, _rx) = channel();
        let router = Router::new(4, false, tx, None);

        let err = router
            .route(media_datagram(1, 0, 77), addr(1000))
            .unwrap_err();
        assert_eq!(err, RouteError::UnknownPayloadType);
        assert_eq!(router.n_sessions(), 0);
    }

    #[test]
    fn test_malformed_datagram_rejected() {
        // ---
        let (tx, _rx) = channel();
        let router = Router::new(4, false, tx, None);

        let err = router
            .route(Bytes::from_static(&[1, 2, 3]), addr(1000))
            .unwrap_err();
        assert_eq!(err, RouteError::MalformedAddress);
    }

    #[test]
    fn test_repair_without_session_never_creates() {
        // ---
        let (tx, rx) = channel();
        let router = Router::new(4, true, tx, None);

        let repair = Packet {
            seqnum: 0,
            timestamp: 0,
            payload_type: rtp::PT_REPAIR,
            ssrc: 9,
            flags: packet_flags::REPAIR,
            blknum: 0,
            esi: 4,
            payload: Bytes::from_static(&[0u8; 8]),
        };
        let wire = Bytes::from(compose(&repair, Some((4, 2))));

        router.route(wire, addr(1000)).expect("route should accept");
        assert_eq!(router.n_sessions(), 0);
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_report_published_and_cleared_on_forget() {
        // ---
        let (tx, rx) = channel();
        let router = Router::new(4, false, tx, None);

        router
            .route(media_datagram(9, 0, PT_L16_MONO_44100), addr(1000))
            .unwrap();
        let event = rx.try_recv().unwrap();

        assert!(router.report_for(9).is_none());

        router.publish_report(ReportBlock {
            ssrc: 9,
            fraction_lost: 3,
            cumulative_lost: 12,
            highest_seqnum: 100,
            jitter: 0,
        });
        assert_eq!(router.report_for(9).unwrap().cumulative_lost, 12);

        router.forget(event.key);
        assert!(router.report_for(9).is_none());
    }

    #[test]
    fn test_forget_allows_fresh_session() {
        // ---
        let (tx, rx) = channel();
        let router = Router::new(4, false, tx, None);

        router
            .route(media_datagram(5, 0, PT_L16_MONO_44100), addr(1000))
            .unwrap();
        let event = rx.try_recv().unwrap();

        router.forget(event.key);
        assert_eq!(router.n_sessions(), 0);

        router
            .route(media_datagram(5, 10, PT_L16_MONO_44100), addr(1000))
            .unwrap();
        assert_eq!(router.n_sessions(), 1);
        assert!(rx.try_recv().is_ok());
    }
}
