//! Per-session reception statistics.
//!
//! Counters updated across the session's pipeline column and logged
//! periodically for observability. Transient stream errors never
//! surface past these counters.

use std::time::{Duration, Instant};

use rtp_pcm_common::rtcp::{ReportBlock, SenderReport};
use tracing::info;

/// Counters for one session.
///
/// Shared across the session's components via `Rc<RefCell<_>>`; the
/// column is single-threaded so the cell is never contended.
#[derive(Debug, Clone)]
pub struct SessionStats {
    // ---
    /// Packets accepted into the session's queues
    pub received: u64,

    /// Packets that arrived behind the playout cursor
    pub late: u64,

    /// Packets dropped (duplicates, queue overflow, out-of-window blocks)
    pub dropped: u64,

    /// Source packets rebuilt from repair data
    pub reconstructed: u64,

    /// FEC blocks that closed with unrecovered gaps
    pub blocks_incomplete: u64,

    /// FEC decoder internal errors
    pub fec_decode_errors: u64,

    /// Samples filled with silence or beep
    pub gap_samples: u64,

    /// Highest extended sequence number seen (for RTCP)
    pub highest_seqnum: u32,

    /// Last sender report received on the control stream
    pub last_sender_report: Option<SenderReport>,

    /// Start time for rate calculations
    start_time: Instant,

    /// Last time stats were logged
    last_log_time: Instant,

    /// Interval between periodic logs
    log_interval: Duration,
}

impl SessionStats {
    // ---
    /// Creates a stats tracker logging every `log_interval`.
    pub fn new(log_interval: Duration) -> Self {
        // ---
        let now = Instant::now();
        Self {
            received: 0,
            late: 0,
            dropped: 0,
            reconstructed: 0,
            blocks_incomplete: 0,
            fec_decode_errors: 0,
            gap_samples: 0,
            highest_seqnum: 0,
            last_sender_report: None,
            start_time: now,
            last_log_time: now,
            log_interval,
        }
    }

    /// Records an accepted packet.
    pub fn record_packet(&mut self, seqnum: u16) {
        // ---
        self.received += 1;

        // Extended sequence number: bump the cycle count on wrap.
        if self.received == 1 {
            self.highest_seqnum = seqnum as u32;
        } else {
            let cycles = self.highest_seqnum & 0xFFFF_0000;
            let prev = (self.highest_seqnum & 0xFFFF) as u16;
            let ahead = seqnum.wrapping_sub(prev) < 0x8000 && seqnum != prev;
            if ahead {
                if seqnum < prev {
                    self.highest_seqnum = cycles.wrapping_add(0x1_0000) | seqnum as u32;
                } else {
                    self.highest_seqnum = cycles | seqnum as u32;
                }
            }
        }

        self.maybe_log();
    }

    /// Folds a sender report from the control stream into the session.
    pub fn record_sender_report(&mut self, report: SenderReport) {
        // ---
        self.last_sender_report = Some(report);
    }

    /// Builds an RTCP reception report block for this session.
    pub fn report_block(&self, ssrc: u32) -> ReportBlock {
        // ---
        let expected = self
            .last_sender_report
            .map(|sr| sr.packet_count as u64)
            .unwrap_or(self.received);
        let lost = expected.saturating_sub(self.received);

        let fraction = if expected == 0 {
            0
        } else {
            ((lost * 256) / expected).min(255) as u8
        };

        ReportBlock {
            ssrc,
            fraction_lost: fraction,
            cumulative_lost: lost.min(0x00FF_FFFF) as u32,
            highest_seqnum: self.highest_seqnum,
            jitter: 0,
        }
    }

    /// Packets per second since session creation.
    pub fn packets_per_second(&self) -> f64 {
        // ---
        let elapsed = self.start_time.elapsed().as_secs_f64();
        if elapsed == 0.0 {
            0.0
        } else {
            self.received as f64 / elapsed
        }
    }

    /// Logs statistics if the interval has elapsed.
    fn maybe_log(&mut self) {
        // ---
        if self.last_log_time.elapsed() >= self.log_interval {
            self.log();
            self.last_log_time = Instant::now();
        }
    }

    /// Force log current statistics.
    pub fn log(&self) {
        // ---
        info!(
            "session stats: {} pkts ({:.1} pkt/s), {} late, {} dropped, {} reconstructed, {} gap samples",
            self.received,
            self.packets_per_second(),
            self.late,
            self.dropped,
            self.reconstructed,
            self.gap_samples,
        );
    }
}

impl Default for SessionStats {
    fn default() -> Self {
        // ---
        Self::new(Duration::from_secs(5))
    }
}

#[cfg(test)]
mod tests {
    // ---
    use super::*;

    #[test]
    fn test_counters_start_at_zero() {
        // ---
        let stats = SessionStats::default();
        assert_eq!(stats.received, 0);
        assert_eq!(stats.reconstructed, 0);
        assert_eq!(stats.gap_samples, 0);
    }

    #[test]
    fn test_extended_seqnum_tracks_wrap() {
        // ---
        let mut stats = SessionStats::default();

        stats.record_packet(65534);
        stats.record_packet(65535);
        stats.record_packet(0); // wrap

        assert_eq!(stats.highest_seqnum, 0x1_0000);

        stats.record_packet(1);
        assert_eq!(stats.highest_seqnum, 0x1_0001);
    }

    #[test]
    fn test_extended_seqnum_ignores_reordered() {
        // ---
        let mut stats = SessionStats::default();

        stats.record_packet(10);
        stats.record_packet(12);
        stats.record_packet(11); // behind highest, not a wrap

        assert_eq!(stats.highest_seqnum, 12);
    }

    #[test]
    fn test_report_block_loss_fraction() {
        // ---
        let mut stats = SessionStats::default();
        for seq in 0..50u16 {
            stats.record_packet(seq);
        }
        stats.record_sender_report(SenderReport {
            ssrc: 7,
            ntp_timestamp: 0,
            rtp_timestamp: 0,
            packet_count: 100,
            octet_count: 0,
        });

        let block = stats.report_block(7);
        assert_eq!(block.cumulative_lost, 50);
        assert_eq!(block.fraction_lost, 128);
        assert_eq!(block.highest_seqnum, 49);
    }
}
