//! Typed media packet shared by the sender and receiver pipelines.
//!
//! Packets are immutable after parse. The payload is a `Bytes` handle,
//! so clones share the underlying buffer and subslicing never copies.

use bytes::Bytes;

/// Packet flags.
pub mod packet_flags {
    // ---
    /// The packet carries audio samples.
    pub const AUDIO: u8 = 1 << 0;

    /// The packet carries a FEC repair symbol.
    pub const REPAIR: u8 = 1 << 1;

    /// First packet of its FEC block (encoding symbol id 0).
    pub const BLOCK_BEGIN: u8 = 1 << 2;

    /// Last source packet of its FEC block (encoding symbol id K-1).
    pub const BLOCK_END: u8 = 1 << 3;
}

/// A parsed media or repair packet.
#[derive(Debug, Clone)]
pub struct Packet {
    // ---
    /// Stream sequence number (wraps at 65535)
    pub seqnum: u16,

    /// RTP timestamp in source-rate samples (wraps)
    pub timestamp: u32,

    /// RTP payload type
    pub payload_type: u8,

    /// Synchronization source identifier
    pub ssrc: u32,

    /// Packet flags (see [`packet_flags`])
    pub flags: u8,

    /// FEC block number; meaningful only when a FEC scheme is active
    pub blknum: u16,

    /// Encoding symbol id within the FEC block
    pub esi: u16,

    /// Media payload (L16 samples) or repair symbol
    pub payload: Bytes,
}

impl Packet {
    // ---
    pub fn has_flags(&self, flags: u8) -> bool {
        // ---
        self.flags & flags != 0
    }

    /// Whether this is a source (audio) packet.
    pub fn is_audio(&self) -> bool {
        // ---
        self.has_flags(packet_flags::AUDIO)
    }

    /// Whether this is a repair packet.
    pub fn is_repair(&self) -> bool {
        // ---
        self.has_flags(packet_flags::REPAIR)
    }
}

/// Capability to produce packets in stream order.
pub trait PacketReader {
    fn read(&mut self) -> Option<Packet>;
}
