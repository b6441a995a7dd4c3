//! FEC writer: stamps media packets with block coordinates and emits
//! repair packets at the end of each block.
//!
//! Every K source packets form a block; the codec produces R repair
//! symbols carried in their own packet stream (separate sequence
//! space, repair payload type). Repair packets inherit the block's
//! first media timestamp so a receiver can place a block on the media
//! clock even when every source packet was lost.

use anyhow::Result;
use bytes::Bytes;
use rtp_pcm_common::{packet_flags, rtp, BlockCodec, FecScheme, Packet};
use tracing::debug;

/// FEC geometry mirrored from the receiver configuration.
#[derive(Debug, Clone, Copy)]
pub struct FecWriterConfig {
    // ---
    pub scheme: FecScheme,
    pub n_source_packets: usize,
    pub n_repair_packets: usize,
}

/// Stamps source packets and generates the repair stream.
pub struct FecWriter {
    // ---
    codec: Option<BlockCodec>,
    k: usize,
    r: usize,

    blknum: u16,

    /// Position of the next source packet within the current block.
    pos: usize,

    /// Payloads of the current block's source packets.
    block_payloads: Vec<Bytes>,

    /// Media timestamp of the block's first packet.
    block_ts: u32,

    /// Repair stream sequence counter.
    repair_seqnum: u16,

    /// Stream SSRC, shared by media and repair packets.
    ssrc: u32,
}

impl FecWriter {
    // ---
    pub fn new(config: FecWriterConfig, ssrc: u32) -> Result<Self> {
        // ---
        let codec = BlockCodec::new(
            config.scheme,
            config.n_source_packets,
            config.n_repair_packets,
        )?;

        Ok(Self {
            codec,
            k: config.n_source_packets,
            r: config.n_repair_packets,
            blknum: 0,
            pos: 0,
            block_payloads: Vec::new(),
            block_ts: 0,
            repair_seqnum: 0,
            ssrc,
        })
    }

    /// Whether a FEC scheme is active.
    pub fn is_enabled(&self) -> bool {
        // ---
        self.codec.is_some()
    }

    /// `(K, R)` for wire framing, when active.
    pub fn fec_params(&self) -> Option<(u8, u8)> {
        // ---
        self.codec.as_ref().map(|_| (self.k as u8, self.r as u8))
    }

    /// Feeds one media packet; returns it (stamped) plus any repair
    /// packets completing a block.
    pub fn write(&mut self, mut packet: Packet) -> Vec<Packet> {
        // ---
        if self.codec.is_none() {
            return vec![packet];
        }

        if self.pos == 0 {
            self.block_ts = packet.timestamp;
            self.block_payloads.clear();
        }

        packet.blknum = self.blknum;
        packet.esi = self.pos as u16;
        if self.pos == 0 {
            packet.flags |= packet_flags::BLOCK_BEGIN;
        }
        if self.pos == self.k - 1 {
            packet.flags |= packet_flags::BLOCK_END;
        }

        self.block_payloads.push(packet.payload.clone());
        self.pos += 1;

        let mut out = vec![packet];
        if self.pos == self.k {
            out.extend(self.finish_block());
        }

        out
    }

    fn finish_block(&mut self) -> Vec<Packet> {
        // ---
        let codec = self.codec.as_ref().expect("called with codec active");

        let refs: Vec<&[u8]> = self.block_payloads.iter().map(|p| p.as_ref()).collect();
        let repair_symbols = codec.encode(&refs);

        debug!(
            "fec writer: block {} complete, emitting {} repair packets",
            self.blknum,
            repair_symbols.len()
        );

        let blknum = self.blknum;
        let block_ts = self.block_ts;
        let ssrc = self.ssrc;

        let repair: Vec<Packet> = repair_symbols
            .into_iter()
            .enumerate()
            .map(|(i, symbol)| {
                let packet = Packet {
                    seqnum: self.repair_seqnum,
                    timestamp: block_ts,
                    payload_type: rtp::PT_REPAIR,
                    ssrc,
                    flags: packet_flags::REPAIR,
                    blknum,
                    esi: (self.k + i) as u16,
                    payload: Bytes::from(symbol),
                };
                self.repair_seqnum = self.repair_seqnum.wrapping_add(1);
                packet
            })
            .collect();

        self.blknum = self.blknum.wrapping_add(1);
        self.pos = 0;

        repair
    }
}
