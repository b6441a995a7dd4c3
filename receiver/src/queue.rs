//! Sorted packet queue.
//!
//! Reorders packets by sequence number within a bounded window.
//! Comparison is wrap-aware signed modular arithmetic, so a wrap from
//! 65535 to 0 orders correctly.

use std::collections::VecDeque;

use rtp_pcm_common::units::{seqnum_diff, seqnum_lt};
use rtp_pcm_common::{Packet, PacketReader};
use tracing::debug;

/// Bounded reordering queue keyed by sequence number.
///
/// `write` inserts in order; `read` pops the packet with the lowest
/// sequence number at or after the read cursor. A packet at or behind
/// the cursor is late and dropped; a packet that would stretch the
/// window past its bound evicts the oldest entries, turning their slots
/// into permanent gaps.
pub struct SortedQueue {
    // ---
    /// Packets sorted ascending by (wrapped) sequence number
    packets: VecDeque<Packet>,

    /// Next sequence number eligible for `read`
    cursor: Option<u16>,

    /// Maximum seqnum span held at once
    window: usize,

    late: u64,
    dropped: u64,
    duplicates: u64,
}

impl SortedQueue {
    // ---
    /// Creates a queue holding at most a `window`-wide seqnum span.
    pub fn new(window: usize) -> Self {
        // ---
        Self {
            packets: VecDeque::new(),
            cursor: None,
            window,
            late: 0,
            dropped: 0,
            duplicates: 0,
        }
    }

    /// Inserts a packet.
    ///
    /// Returns `false` if the packet was discarded (late, duplicate, or
    /// evicted by window overflow).
    pub fn write(&mut self, packet: Packet) -> bool {
        // ---
        if let Some(cursor) = self.cursor {
            if seqnum_lt(packet.seqnum, cursor) {
                self.late += 1;
                return false;
            }
        }

        // Binary search for the insertion point.
        let seq = packet.seqnum;
        let mut left = 0;
        let mut right = self.packets.len();
        while left < right {
            let mid = (left + right) / 2;
            if seqnum_lt(self.packets[mid].seqnum, seq) {
                left = mid + 1;
            } else {
                right = mid;
            }
        }

        if left < self.packets.len() && self.packets[left].seqnum == seq {
            self.duplicates += 1;
            return false;
        }

        self.packets.insert(left, packet);

        // Window overflow: evict from the head and advance the cursor
        // past the evicted slots.
        let mut evicted = false;
        while self.span() > self.window as i16 {
            let gone = self.packets.pop_front().expect("span > 0 implies non-empty");
            self.dropped += 1;
            evicted |= seq == gone.seqnum;
            debug!(
                "sorted queue: window overflow, dropping seq={}",
                gone.seqnum
            );
            if let Some(front) = self.packets.front() {
                self.cursor = Some(front.seqnum);
            }
        }

        !evicted
    }

    /// Pops the packet with the lowest sequence number at or after the
    /// cursor, advancing the cursor past it.
    pub fn read(&mut self) -> Option<Packet> {
        // ---
        let packet = self.packets.pop_front()?;
        self.cursor = Some(packet.seqnum.wrapping_add(1));
        Some(packet)
    }

    /// Peeks at the next packet without consuming it.
    pub fn peek(&self) -> Option<&Packet> {
        // ---
        self.packets.front()
    }

    pub fn len(&self) -> usize {
        // ---
        self.packets.len()
    }

    pub fn is_empty(&self) -> bool {
        // ---
        self.packets.is_empty()
    }

    /// Packets that arrived behind the cursor.
    pub fn late(&self) -> u64 {
        // ---
        self.late
    }

    /// Packets evicted by window overflow.
    pub fn dropped(&self) -> u64 {
        // ---
        self.dropped
    }

    /// Duplicate inserts.
    pub fn duplicates(&self) -> u64 {
        // ---
        self.duplicates
    }

    /// Seqnum distance between newest and oldest held packet.
    fn span(&self) -> i16 {
        // ---
        match (self.packets.front(), self.packets.back()) {
            (Some(front), Some(back)) => seqnum_diff(back.seqnum, front.seqnum),
            _ => 0,
        }
    }
}

impl PacketReader for SortedQueue {
    fn read(&mut self) -> Option<Packet> {
        // ---
        SortedQueue::read(self)
    }
}

#[cfg(test)]
mod tests {
    // ---
    use super::*;
    use bytes::Bytes;
    use rtp_pcm_common::packet_flags;

    fn make_packet(seq: u16) -> Packet {
        Packet {
            seqnum: seq,
            timestamp: seq as u32 * 441,
            payload_type: 10,
            ssrc: 0x12345678,
            flags: packet_flags::AUDIO,
            blknum: 0,
            esi: 0,
            payload: Bytes::from_static(&[0, 0]),
        }
    }

    #[test]
    fn test_in_order() {
        // ---
        let mut queue = SortedQueue::new(64);
        for seq in 0..5 {
            assert!(queue.write(make_packet(seq)));
        }
        for seq in 0..5 {
            assert_eq!(queue.read().unwrap().seqnum, seq);
        }
        assert!(queue.read().is_none());
    }

    #[test]
    fn test_reordering() {
        // ---
        let mut queue = SortedQueue::new(64);
        for &seq in &[0, 2, 1, 4, 3] {
            queue.write(make_packet(seq));
        }
        for seq in 0..5 {
            assert_eq!(queue.read().unwrap().seqnum, seq);
        }
    }

    #[test]
    fn test_late_packet_dropped() {
        // ---
        let mut queue = SortedQueue::new(64);
        queue.write(make_packet(0));
        queue.write(make_packet(1));
        queue.read();
        queue.read();

        assert!(!queue.write(make_packet(0)));
        assert_eq!(queue.late(), 1);
    }

    #[test]
    fn test_duplicate_dropped() {
        // ---
        let mut queue = SortedQueue::new(64);
        assert!(queue.write(make_packet(3)));
        assert!(!queue.write(make_packet(3)));
        assert_eq!(queue.duplicates(), 1);
        assert_eq!(queue.len(), 1);
    }

    #[test]
    fn test_wraparound_ordering() {
        // ---
        let mut queue = SortedQueue::new(64);
        for &seq in &[65530, 2, 65535, 0, 5] {
            queue.write(make_packet(seq));
        }

        let order: Vec<u16> = std::iter::from_fn(|| queue.read().map(|p| p.seqnum)).collect();
        assert_eq!(order, vec![65530, 65535, 0, 2, 5]);
        assert_eq!(queue.late(), 0);
    }

    #[test]
    fn test_window_overflow_advances_cursor() {
        // ---
        let mut queue = SortedQueue::new(8);
        queue.write(make_packet(0));
        queue.write(make_packet(1));

        // Far ahead of the window: oldest entries are evicted.
        queue.write(make_packet(20));
        assert!(queue.dropped() > 0);

        // Evicted slots are now permanently behind the cursor.
        assert!(!queue.write(make_packet(0)));
        assert_eq!(queue.read().unwrap().seqnum, 20);
    }

    #[test]
    fn test_gap_is_skipped_on_read() {
        // ---
        let mut queue = SortedQueue::new(64);
        queue.write(make_packet(0));
        queue.write(make_packet(3));

        assert_eq!(queue.read().unwrap().seqnum, 0);
        // Seq 1 and 2 never arrived; read returns the next available.
        assert_eq!(queue.read().unwrap().seqnum, 3);
        // They are now late if they show up.
        assert!(!queue.write(make_packet(2)));
    }
}
