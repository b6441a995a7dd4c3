//! Depacketizer: turns the recovered packet stream into a continuous
//! frame stream.
//!
//! Holds at most one current packet; everything else waits in the
//! queues below. The render timestamp advances by exactly the frame
//! length per read, whether or not packets are available: overlap with
//! the current packet is decoded, gaps are concealed with silence (or a
//! diagnostic beep), and packets that fell entirely behind the render
//! cursor are dropped.

use std::cell::{Cell, RefCell};
use std::f32::consts::TAU;
use std::rc::Rc;
use std::time::{Duration, Instant};

use rtp_pcm_common::units::{timestamp_diff, timestamp_le, timestamp_lt};
use rtp_pcm_common::{frame_flags, l16, Frame, FrameReader, Packet, PacketReader, SampleSpec};
use tracing::debug;

/// Gap fill amplitude for beep mode.
const BEEP_GAIN: f32 = 0.35;

/// Interval between periodic debug reports.
const REPORT_INTERVAL: Duration = Duration::from_secs(20);

#[derive(Default)]
struct FrameInfo {
    // ---
    /// Samples decoded from packets into the frame.
    n_decoded_samples: usize,

    /// Samples filled in for gaps.
    n_missing_samples: usize,

    /// Packets dropped during frame construction.
    n_dropped_packets: usize,
}

/// Reads packets, decodes L16 payloads, and produces an unbroken
/// stream of audio frames at the source sample spec.
pub struct Depacketizer {
    // ---
    reader: Box<dyn PacketReader>,
    spec: SampleSpec,

    /// Current packet being consumed
    packet: Option<Packet>,

    /// Render timestamp: next timestamp unit to produce
    timestamp: u32,

    /// How far behind the first packet the render clock is anchored,
    /// in timestamp units. This is the warm-up: the gap between the
    /// anchor and the first packet plays as silence while the queue
    /// fills to the target latency.
    anchor_offset: u32,

    first_packet_seen: bool,

    beep: bool,
    beep_frequency: f32,

    stats: Rc<RefCell<crate::stats::SessionStats>>,

    /// Shared with the latency monitor above.
    render_ts_cell: Rc<Cell<u32>>,
    started_cell: Rc<Cell<bool>>,

    // Lifetime sample counters for the periodic report.
    packet_samples: u64,
    missing_samples: u64,
    zero_samples: u64,

    last_report: Instant,
}

impl Depacketizer {
    // ---
    pub fn new(
        reader: Box<dyn PacketReader>,
        spec: SampleSpec,
        anchor_offset: u32,
        beep: bool,
        beep_frequency: f32,
        stats: Rc<RefCell<crate::stats::SessionStats>>,
        render_ts_cell: Rc<Cell<u32>>,
        started_cell: Rc<Cell<bool>>,
    ) -> Self {
        // ---
        Self {
            reader,
            spec,
            packet: None,
            timestamp: 0,
            anchor_offset,
            first_packet_seen: false,
            beep,
            beep_frequency,
            stats,
            render_ts_cell,
            started_cell,
            packet_samples: 0,
            missing_samples: 0,
            zero_samples: 0,
            last_report: Instant::now(),
        }
    }

    /// Whether the first packet has arrived and anchored the stream.
    pub fn started(&self) -> bool {
        // ---
        self.first_packet_seen
    }

    /// Next timestamp to be rendered. Meaningful once [`started`].
    ///
    /// [`started`]: Self::started
    pub fn timestamp(&self) -> u32 {
        // ---
        self.timestamp
    }

    /// Timestamp units spanned by a packet payload.
    fn packet_span(&self, packet: &Packet) -> u32 {
        // ---
        (l16::sample_count(&packet.payload) / self.spec.channels as usize) as u32
    }

    /// Ensures `self.packet` overlaps or follows the render cursor,
    /// dropping packets that fell entirely behind it.
    fn update_packet(&mut self, info: &mut FrameInfo) {
        // ---
        if self.packet.is_some() {
            return;
        }

        loop {
            let Some(packet) = self.reader.read() else {
                return;
            };

            if !self.first_packet_seen {
                // Anchor the render clock behind the first packet by
                // the warm-up offset.
                self.first_packet_seen = true;
                self.started_cell.set(true);
                self.timestamp = packet.timestamp.wrapping_sub(self.anchor_offset);
                debug!(
                    "depacketizer: got first packet ts={}, anchoring at ts={}",
                    packet.timestamp, self.timestamp
                );
                self.packet = Some(packet);
                return;
            }

            let end = packet.timestamp.wrapping_add(self.packet_span(&packet));
            if timestamp_le(end, self.timestamp) {
                // Entire packet span is behind the render cursor.
                info.n_dropped_packets += 1;
                self.stats.borrow_mut().late += 1;
                continue;
            }

            self.packet = Some(packet);
            return;
        }
    }

    /// Fills `out` with gap samples starting at timestamp `ts`.
    fn fill_gap(&self, out: &mut [f32], ts: u32) {
        // ---
        if !self.beep {
            out.fill(0.0);
            return;
        }

        // Beep phase follows the render timestamp so gaps are
        // continuous across frames.
        let channels = self.spec.channels as usize;
        let step = TAU * self.beep_frequency / self.spec.rate as f32;
        for (i, chunk) in out.chunks_mut(channels).enumerate() {
            let t = ts.wrapping_add(i as u32);
            let value = (t as f32 * step).sin() * BEEP_GAIN;
            chunk.fill(value);
        }
    }

    fn report_stats(&mut self) {
        // ---
        if self.last_report.elapsed() < REPORT_INTERVAL {
            return;
        }
        self.last_report = Instant::now();

        debug!(
            "depacketizer: ts={} decoded={} missing={} idle={}",
            self.timestamp, self.packet_samples, self.missing_samples, self.zero_samples,
        );
    }
}

impl FrameReader for Depacketizer {
    fn read(&mut self, frame: &mut Frame) -> bool {
        // ---
        let channels = self.spec.channels as usize;
        debug_assert_eq!(frame.num_samples() % channels, 0);

        let mut info = FrameInfo::default();
        let mut pos = 0;

        while pos < frame.num_samples() {
            self.update_packet(&mut info);

            let Some(packet) = self.packet.clone() else {
                // ---
                let rest = frame.num_samples() - pos;
                if self.first_packet_seen {
                    let ts = self.timestamp;
                    self.fill_gap(&mut frame.samples_mut()[pos..], ts);
                    self.timestamp = self.timestamp.wrapping_add((rest / channels) as u32);
                    info.n_missing_samples += rest;
                    self.missing_samples += rest as u64;
                } else {
                    frame.samples_mut()[pos..].fill(0.0);
                    self.zero_samples += rest as u64;
                }
                pos = frame.num_samples();
                break;
            };

            if timestamp_lt(self.timestamp, packet.timestamp) {
                // ---
                // Render cursor is in a gap before the packet.
                let gap_units = timestamp_diff(packet.timestamp, self.timestamp) as usize;
                let want_units = (frame.num_samples() - pos) / channels;
                let n_units = gap_units.min(want_units);
                let n = n_units * channels;

                let ts = self.timestamp;
                self.fill_gap(&mut frame.samples_mut()[pos..pos + n], ts);
                self.timestamp = self.timestamp.wrapping_add(n_units as u32);
                info.n_missing_samples += n;
                self.missing_samples += n as u64;
                pos += n;
            } else {
                // ---
                // Render cursor is inside the packet; decode overlap.
                let offset_units = timestamp_diff(self.timestamp, packet.timestamp) as usize;
                let span_units = self.packet_span(&packet) as usize;
                let remain_units = span_units - offset_units;
                let want_units = (frame.num_samples() - pos) / channels;
                let n_units = remain_units.min(want_units);
                let n = n_units * channels;

                let decoded = l16::decode(
                    &packet.payload,
                    offset_units * channels,
                    &mut frame.samples_mut()[pos..pos + n],
                );
                debug_assert_eq!(decoded, n);

                self.timestamp = self.timestamp.wrapping_add(n_units as u32);
                info.n_decoded_samples += n;
                self.packet_samples += n as u64;
                pos += n;

                if offset_units + n_units == span_units {
                    self.packet = None;
                }
            }
        }

        debug_assert_eq!(pos, frame.num_samples());

        let mut flags = 0u8;
        if info.n_decoded_samples > 0 {
            flags |= frame_flags::HAS_SIGNAL;
        }
        if info.n_missing_samples > 0 {
            flags |= frame_flags::INCOMPLETE;
        }
        if info.n_dropped_packets > 0 {
            flags |= frame_flags::DROPS;
        }
        frame.set_flags(flags);

        if info.n_missing_samples > 0 {
            self.stats.borrow_mut().gap_samples += info.n_missing_samples as u64;
        }

        self.render_ts_cell.set(self.timestamp);
        self.report_stats();

        true
    }
}

#[cfg(test)]
mod tests {
    // ---
    use super::*;
    use bytes::Bytes;
    use rtp_pcm_common::packet_flags;
    use rtp_pcm_common::rtp::PT_L16_MONO_44100;
    use std::collections::VecDeque;

    const RATE: u32 = 44100;

    /// Feed packets from a plain list.
    struct ListReader {
        packets: VecDeque<Packet>,
    }

    impl PacketReader for ListReader {
        fn read(&mut self) -> Option<Packet> {
            self.packets.pop_front()
        }
    }

    fn make_packet(seq: u16, ts: u32, samples: &[f32]) -> Packet {
        let mut payload = Vec::new();
        l16::encode(samples, &mut payload);
        Packet {
            seqnum: seq,
            timestamp: ts,
            payload_type: PT_L16_MONO_44100,
            ssrc: 1,
            flags: packet_flags::AUDIO,
            blknum: 0,
            esi: 0,
            payload: Bytes::from(payload),
        }
    }

    fn make_depacketizer(packets: Vec<Packet>, beep: bool) -> Depacketizer {
        Depacketizer::new(
            Box::new(ListReader {
                packets: packets.into(),
            }),
            SampleSpec::new(RATE, 1),
            0,
            beep,
            880.0,
            Rc::new(RefCell::new(crate::stats::SessionStats::default())),
            Rc::new(Cell::new(0)),
            Rc::new(Cell::new(false)),
        )
    }

    fn ramp(start: usize, len: usize) -> Vec<f32> {
        (0..len).map(|i| (start + i) as f32 / 1024.0).collect()
    }

    #[test]
    fn test_silence_before_first_packet() {
        // ---
        let mut d = make_depacketizer(vec![], false);
        let mut frame = Frame::new(64);

        assert!(d.read(&mut frame));
        assert_eq!(frame.flags(), 0);
        assert!(frame.samples().iter().all(|&s| s == 0.0));
        assert!(!d.started());
    }

    #[test]
    fn test_anchor_and_decode() {
        // ---
        let samples = ramp(0, 128);
        let packets = vec![
            make_packet(0, 1000, &samples[..64]),
            make_packet(1, 1064, &samples[64..]),
        ];
        let mut d = make_depacketizer(packets, false);

        let mut frame = Frame::new(64);
        assert!(d.read(&mut frame));
        assert!(d.started());
        assert!(frame.has_flags(frame_flags::HAS_SIGNAL));
        assert!(!frame.has_flags(frame_flags::INCOMPLETE));
        assert_eq!(d.timestamp(), 1064);

        assert!(d.read(&mut frame));
        assert_eq!(d.timestamp(), 1128);
        assert!(frame.has_flags(frame_flags::HAS_SIGNAL));
    }

    #[test]
    fn test_render_timestamp_advances_by_frame_length() {
        // ---
        let packets = vec![make_packet(0, 0, &ramp(0, 32))];
        let mut d = make_depacketizer(packets, false);

        let mut frame = Frame::new(48);
        d.read(&mut frame);
        let t0 = d.timestamp();

        // Subsequent reads find no packets; the cursor still advances.
        for i in 1..=5 {
            d.read(&mut frame);
            assert_eq!(d.timestamp(), t0.wrapping_add(48 * i));
        }
    }

    #[test]
    fn test_gap_fill_between_packets() {
        // ---
        // Packet at ts 0..32, then a 32-unit hole, then ts 64..96.
        let packets = vec![
            make_packet(0, 0, &ramp(0, 32)),
            make_packet(2, 64, &ramp(64, 32)),
        ];
        let mut d = make_depacketizer(packets, false);

        let mut frame = Frame::new(96);
        assert!(d.read(&mut frame));
        assert!(frame.has_flags(frame_flags::HAS_SIGNAL));
        assert!(frame.has_flags(frame_flags::INCOMPLETE));

        let s = frame.samples();
        assert!((s[0] - 0.0).abs() < 0.001);
        assert!((s[31] - 31.0 / 1024.0).abs() < 0.001);
        assert!(s[32..64].iter().all(|&v| v == 0.0), "gap must be silent");
        assert!((s[64] - 64.0 / 1024.0).abs() < 0.001);
    }

    #[test]
    fn test_beep_fill_is_nonzero_and_continuous() {
        // ---
        let packets = vec![make_packet(0, 0, &ramp(0, 16))];
        let mut d = make_depacketizer(packets, true);

        let mut frame = Frame::new(64);
        d.read(&mut frame);

        // After the 16 decoded samples the beep starts.
        let gap = &frame.samples()[16..];
        assert!(gap.iter().any(|&v| v != 0.0));

        // Phase continuity: the beep at ts t equals sin(t * step) * gain.
        let step = TAU * 880.0 / RATE as f32;
        for (i, &v) in gap.iter().enumerate() {
            let t = (16 + i) as f32;
            assert!((v - (t * step).sin() * BEEP_GAIN).abs() < 1e-4);
        }
    }

    #[test]
    fn test_late_packet_dropped_and_flagged() {
        // ---
        let packets = vec![
            make_packet(0, 0, &ramp(0, 32)),
            // Stale duplicate: its whole span is behind the cursor once
            // packet 0 is consumed.
            make_packet(1, 0, &ramp(0, 16)),
            make_packet(2, 64, &ramp(64, 32)),
        ];
        let mut d = make_depacketizer(packets, false);

        let mut frame = Frame::new(64);
        d.read(&mut frame);
        // Frame 1 decoded packet 0, skipped the stale packet while
        // looking for more, and gap-filled up to packet 2.
        assert!(frame.has_flags(frame_flags::DROPS));
        assert!(frame.has_flags(frame_flags::HAS_SIGNAL));
        assert!(frame.has_flags(frame_flags::INCOMPLETE));

        d.read(&mut frame);
        // Frame 2 starts on packet 2 cleanly.
        assert!(frame.has_flags(frame_flags::HAS_SIGNAL));
        assert!(!frame.has_flags(frame_flags::DROPS));
    }

    #[test]
    fn test_partial_overlap_decodes_from_offset() {
        // ---
        // First packet seen late: it spans 0..64 but only after the
        // anchor... anchor comes from it, so feed a second packet that
        // partially overlaps the cursor.
        let packets = vec![
            make_packet(0, 0, &ramp(0, 32)),
            // Spans 16..80; cursor will be at 32 after frame 1.
            make_packet(1, 16, &ramp(16, 64)),
        ];
        let mut d = make_depacketizer(packets, false);

        let mut frame = Frame::new(32);
        d.read(&mut frame); // cursor 32

        d.read(&mut frame);
        // Samples 32..64 come from packet 1 at offset 16.
        let s = frame.samples();
        assert!((s[0] - 32.0 / 1024.0).abs() < 0.001);
        assert!((s[31] - 63.0 / 1024.0).abs() < 0.001);
    }

    #[test]
    fn test_anchor_offset_plays_warmup_silence() {
        // ---
        let mut d = Depacketizer::new(
            Box::new(ListReader {
                packets: vec![make_packet(0, 100, &ramp(0, 32))].into(),
            }),
            SampleSpec::new(RATE, 1),
            64,
            false,
            880.0,
            Rc::new(RefCell::new(crate::stats::SessionStats::default())),
            Rc::new(Cell::new(0)),
            Rc::new(Cell::new(false)),
        );

        let mut frame = Frame::new(64);
        assert!(d.read(&mut frame));
        // Anchored at 100 - 64 = 36: the whole first frame is warm-up.
        assert_eq!(d.timestamp(), 100);
        assert!(frame.samples().iter().all(|&s| s == 0.0));
        assert!(frame.has_flags(frame_flags::INCOMPLETE));
        assert!(!frame.has_flags(frame_flags::HAS_SIGNAL));

        assert!(d.read(&mut frame));
        assert!(frame.has_flags(frame_flags::HAS_SIGNAL));
        assert!((frame.samples()[0] - 0.0).abs() < 0.001);
    }

    #[test]
    fn test_timestamp_wrap() {
        // ---
        let base = u32::MAX - 16;
        let packets = vec![
            make_packet(0, base, &ramp(0, 32)),
            make_packet(1, base.wrapping_add(32), &ramp(32, 32)),
        ];
        let mut d = make_depacketizer(packets, false);

        let mut frame = Frame::new(64);
        assert!(d.read(&mut frame));
        assert!(frame.has_flags(frame_flags::HAS_SIGNAL));
        assert!(!frame.has_flags(frame_flags::INCOMPLETE));
        assert_eq!(d.timestamp(), base.wrapping_add(64));
    }
}
