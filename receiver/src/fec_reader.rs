//! FEC reader: merges the source and repair streams back into a single
//! recovered source-packet stream.
//!
//! Blocks open on the first packet bearing their number, strictly in
//! increasing block order. Decoding is attempted opportunistically as
//! soon as a block holds K symbols; a block that falls behind the
//! newest opened block by the retention budget is closed with gaps.
//! Repair packets never leave this layer.

use std::cell::RefCell;
use std::collections::VecDeque;
use std::rc::Rc;

use bytes::Bytes;
use rtp_pcm_common::units::{blknum_diff, blknum_lt};
use rtp_pcm_common::{packet_flags, BlockCodec, FecError, Packet, PacketReader, SampleSpec};
use tracing::{debug, warn};

use crate::queue::SortedQueue;
use crate::stats::SessionStats;

/// Blocks a head block may lag behind the newest opened block before it
/// is closed with gaps.
const MAX_BLOCK_LAG: i16 = 2;

/// One open FEC block.
struct Block {
    // ---
    blknum: u16,
    source: Vec<Option<Packet>>,
    repair: Vec<Option<Packet>>,

    /// Symbol count at the last failed decode attempt, to avoid
    /// retrying with no new information.
    tried_with: usize,

    decode_failed: bool,
}

impl Block {
    // ---
    fn new(blknum: u16, k: usize, r: usize) -> Self {
        // ---
        Self {
            blknum,
            source: vec![None; k],
            repair: vec![None; r],
            tried_with: 0,
            decode_failed: false,
        }
    }

    /// Slots a packet by encoding symbol id. Returns `false` on a
    /// duplicate or an out-of-range id.
    fn insert(&mut self, packet: Packet) -> bool {
        // ---
        let esi = packet.esi as usize;
        let k = self.source.len();

        let slot = if packet.is_repair() {
            if esi < k || esi >= k + self.repair.len() {
                return false;
            }
            &mut self.repair[esi - k]
        } else {
            if esi >= k {
                return false;
            }
            &mut self.source[esi]
        };

        if slot.is_some() {
            return false;
        }
        *slot = Some(packet);
        true
    }

    fn n_present(&self) -> usize {
        // ---
        self.source.iter().flatten().count() + self.repair.iter().flatten().count()
    }

    fn source_complete(&self) -> bool {
        // ---
        self.source.iter().all(|s| s.is_some())
    }
}

/// Reads recovered source packets out of a FEC-protected stream pair.
pub struct FecReader {
    // ---
    codec: BlockCodec,
    k: usize,
    r: usize,
    spec: SampleSpec,

    source_queue: Rc<RefCell<SortedQueue>>,
    repair_queue: Rc<RefCell<SortedQueue>>,
    stats: Rc<RefCell<SessionStats>>,

    /// Open blocks, ascending block number (not necessarily contiguous)
    blocks: VecDeque<Block>,

    /// Emit cursor within the head block
    next_pos: usize,

    /// Lowest admissible block number; older packets are stale
    next_blknum: Option<u16>,

    /// Newest opened block number
    latest_blknum: Option<u16>,

    /// Seq/timestamp continuation anchor: (seqnum, timestamp, samples
    /// per packet) of the last emitted packet
    last_emitted: Option<(u16, u32, u32)>,

    /// Whether the head block accumulated any emitted gap
    head_has_gaps: bool,
}

impl FecReader {
    // ---
    pub fn new(
        codec: BlockCodec,
        k: usize,
        r: usize,
        spec: SampleSpec,
        source_queue: Rc<RefCell<SortedQueue>>,
        repair_queue: Rc<RefCell<SortedQueue>>,
        stats: Rc<RefCell<SessionStats>>,
    ) -> Self {
        // ---
        Self {
            codec,
            k,
            r,
            spec,
            source_queue,
            repair_queue,
            stats,
            blocks: VecDeque::new(),
            next_pos: 0,
            next_blknum: None,
            latest_blknum: None,
            last_emitted: None,
            head_has_gaps: false,
        }
    }

    /// Drains both queues into the open block set.
    fn fetch(&mut self) {
        // ---
        loop {
            let packet = self.source_queue.borrow_mut().read();
            match packet {
                Some(p) => self.slot_packet(p),
                None => break,
            }
        }
        loop {
            let packet = self.repair_queue.borrow_mut().read();
            match packet {
                Some(p) => self.slot_packet(p),
                None => break,
            }
        }
    }

    fn slot_packet(&mut self, packet: Packet) {
        // ---
        let bn = packet.blknum;

        if let Some(next) = self.next_blknum {
            if blknum_lt(bn, next) {
                self.stats.borrow_mut().dropped += 1;
                return;
            }
        }

        // Existing open block?
        if let Some(block) = self.blocks.iter_mut().find(|b| b.blknum == bn) {
            if !block.insert(packet) {
                self.stats.borrow_mut().dropped += 1;
            }
            return;
        }

        // Blocks open strictly in increasing order; a block number we
        // skipped past is out of window.
        if let Some(latest) = self.latest_blknum {
            if blknum_lt(bn, latest) || bn == latest {
                debug!("fec reader: dropping packet for out-of-window block {}", bn);
                self.stats.borrow_mut().dropped += 1;
                return;
            }
        }

        let mut block = Block::new(bn, self.k, self.r);
        block.insert(packet);
        self.blocks.push_back(block);
        self.latest_blknum = Some(bn);
        if self.next_blknum.is_none() {
            self.next_blknum = Some(bn);
        }
    }

    /// Whether the head block's retention budget is spent.
    fn head_expired(&self) -> bool {
        // ---
        match (self.blocks.front(), self.latest_blknum) {
            (Some(head), Some(latest)) => blknum_diff(latest, head.blknum) >= MAX_BLOCK_LAG,
            _ => false,
        }
    }

    /// Attempts to decode the head block. Returns `true` if any source
    /// slot was filled.
    fn try_decode_head(&mut self) -> bool {
        // ---
        let Some(head) = self.blocks.front_mut() else {
            return false;
        };
        if head.source_complete() || head.decode_failed {
            return false;
        }

        let present = head.n_present();
        if present < self.k || present == head.tried_with {
            return false;
        }
        head.tried_with = present;

        // Symbols must be equal length; a mismatched block is treated
        // as undecodable.
        let mut symbol_len = None;
        for packet in head.source.iter().chain(head.repair.iter()).flatten() {
            let len = packet.payload.len();
            if *symbol_len.get_or_insert(len) != len {
                warn!(
                    "fec reader: mismatched symbol lengths in block {}",
                    head.blknum
                );
                head.decode_failed = true;
                self.stats.borrow_mut().fec_decode_errors += 1;
                return false;
            }
        }

        let mut symbols: Vec<Option<Vec<u8>>> = head
            .source
            .iter()
            .chain(head.repair.iter())
            .map(|slot| slot.as_ref().map(|p| p.payload.to_vec()))
            .collect();

        match self.codec.decode(&mut symbols) {
            Ok(()) => {}
            Err(FecError::InsufficientRank) => return false,
            Err(e) => {
                warn!("fec reader: decoder error in block {}: {}", head.blknum, e);
                head.decode_failed = true;
                self.stats.borrow_mut().fec_decode_errors += 1;
                return false;
            }
        }

        // Materialize the recovered payloads as packets.
        let anchor = head
            .source
            .iter()
            .flatten()
            .next()
            .map(|p| (p.seqnum, p.timestamp, p.esi));
        let blknum = head.blknum;
        let payload_type = head
            .source
            .iter()
            .chain(head.repair.iter())
            .flatten()
            .next()
            .map(|p| p.payload_type)
            .unwrap_or_default();
        let ssrc = head
            .source
            .iter()
            .chain(head.repair.iter())
            .flatten()
            .next()
            .map(|p| p.ssrc)
            .unwrap_or_default();

        let mut recovered = 0u64;
        for esi in 0..self.k {
            if head.source[esi].is_some() {
                continue;
            }
            let Some(payload) = symbols[esi].take() else {
                continue;
            };

            let samples_per_packet =
                (payload.len() / 2 / self.spec.channels as usize) as u32;

            let (seqnum, timestamp) = match anchor {
                Some((seq, ts, sib_esi)) => {
                    let delta = esi as i32 - sib_esi as i32;
                    (
                        (seq as i32 + delta) as u16,
                        (ts as i64 + delta as i64 * samples_per_packet as i64) as u32,
                    )
                }
                None => match self.last_emitted {
                    Some((seq, ts, spp)) => (
                        seq.wrapping_add(1).wrapping_add(esi as u16),
                        ts.wrapping_add((esi as u32 + 1) * spp),
                    ),
                    None => {
                        // First block with no source sibling at all:
                        // take the media clock from a repair packet.
                        let base_ts = head
                            .repair
                            .iter()
                            .flatten()
                            .next()
                            .map(|p| p.timestamp)
                            .unwrap_or_default();
                        (
                            esi as u16,
                            base_ts.wrapping_add(esi as u32 * samples_per_packet),
                        )
                    }
                },
            };

            let mut flags = packet_flags::AUDIO;
            if esi == 0 {
                flags |= packet_flags::BLOCK_BEGIN;
            }
            if esi == self.k - 1 {
                flags |= packet_flags::BLOCK_END;
            }

            head.source[esi] = Some(Packet {
                seqnum,
                timestamp,
                payload_type,
                ssrc,
                flags,
                blknum,
                esi: esi as u16,
                payload: Bytes::from(payload),
            });
            recovered += 1;
        }

        if recovered > 0 {
            debug!(
                "fec reader: recovered {} packets in block {}",
                recovered, blknum
            );
            self.stats.borrow_mut().reconstructed += recovered;
            true
        } else {
            false
        }
    }

    /// Pops the head block and advances the admissible block number.
    fn close_head(&mut self) {
        // ---
        if let Some(head) = self.blocks.pop_front() {
            if self.head_has_gaps {
                self.stats.borrow_mut().blocks_incomplete += 1;
            }
            self.next_blknum = Some(head.blknum.wrapping_add(1));
        }
        self.next_pos = 0;
        self.head_has_gaps = false;
    }

    fn note_emitted(&mut self, packet: &Packet) {
        // ---
        let spp = (packet.payload.len() / 2 / self.spec.channels as usize) as u32;
        self.last_emitted = Some((packet.seqnum, packet.timestamp, spp));
    }
}

impl PacketReader for FecReader {
    /// Returns the next source packet in block/position order, either
    /// originally received or reconstructed.
    fn read(&mut self) -> Option<Packet> {
        // ---
        self.fetch();

        loop {
            if self.blocks.front().is_none() {
                return None;
            }

            if self.next_pos >= self.k {
                self.close_head();
                continue;
            }

            let have = self.blocks.front().expect("checked above").source[self.next_pos]
                .is_some();
            if have {
                let packet = self.blocks.front_mut().expect("checked above").source
                    [self.next_pos]
                    .clone()
                    .expect("checked present");
                self.note_emitted(&packet);
                self.next_pos += 1;
                return Some(packet);
            }

            if self.try_decode_head() {
                continue;
            }

            if self.head_expired() {
                // Permanent gap; the depacketizer conceals it.
                self.next_pos += 1;
                self.head_has_gaps = true;
                continue;
            }

            // The block may still complete; wait for more symbols.
            return None;
        }
    }
}
