//! Minimal RTCP Sender/Receiver Reports (RFC 3550).
//!
//! Only the fields the pipeline consumes are modeled: SR carries the
//! sender's wallclock/media clock mapping and send counters, RR carries
//! per-stream reception quality. Other RTCP packet types are ignored.

use anyhow::Result;

/// RTCP packet type: sender report
const PT_SENDER_REPORT: u8 = 200;

/// RTCP packet type: receiver report
const PT_RECEIVER_REPORT: u8 = 201;

const RTCP_VERSION: u8 = 2;

/// Sender report contents.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SenderReport {
    // ---
    pub ssrc: u32,

    /// Wallclock time of this report (NTP 64-bit).
    pub ntp_timestamp: u64,

    /// Media clock value corresponding to `ntp_timestamp`.
    pub rtp_timestamp: u32,

    pub packet_count: u32,
    pub octet_count: u32,
}

/// One reception report block.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReportBlock {
    // ---
    /// SSRC of the stream being reported on.
    pub ssrc: u32,

    /// Fraction of packets lost since the previous report (8-bit fixed point).
    pub fraction_lost: u8,

    /// Cumulative packets lost (24-bit, saturating).
    pub cumulative_lost: u32,

    /// Extended highest sequence number received.
    pub highest_seqnum: u32,

    /// Interarrival jitter in timestamp units.
    pub jitter: u32,
}

/// Receiver report contents.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReceiverReport {
    // ---
    pub ssrc: u32,
    pub blocks: Vec<ReportBlock>,
}

/// A parsed RTCP packet of a type the pipeline understands.
#[derive(Debug, Clone, PartialEq)]
pub enum RtcpPacket {
    // ---
    SenderReport(SenderReport),
    ReceiverReport(ReceiverReport),
}

impl SenderReport {
    // ---
    /// Serializes the report as a complete RTCP packet.
    pub fn compose(&self) -> Vec<u8> {
        // ---
        let mut buf = Vec::with_capacity(28);

        buf.push(RTCP_VERSION << 6); // V=2, P=0, RC=0
        buf.push(PT_SENDER_REPORT);
        buf.extend_from_slice(&6u16.to_be_bytes()); // length in words - 1
        buf.extend_from_slice(&self.ssrc.to_be_bytes());
        buf.extend_from_slice(&self.ntp_timestamp.to_be_bytes());
        buf.extend_from_slice(&self.rtp_timestamp.to_be_bytes());
        buf.extend_from_slice(&self.packet_count.to_be_bytes());
        buf.extend_from_slice(&self.octet_count.to_be_bytes());

        buf
    }
}

impl ReceiverReport {
    // ---
    /// Serializes the report as a complete RTCP packet.
    pub fn compose(&self) -> Vec<u8> {
        // ---
        let words = 1 + self.blocks.len() * 6;
        let mut buf = Vec::with_capacity(4 + words * 4);

        buf.push(RTCP_VERSION << 6 | self.blocks.len() as u8 & 0x1F);
        buf.push(PT_RECEIVER_REPORT);
        buf.extend_from_slice(&(words as u16).to_be_bytes());
        buf.extend_from_slice(&self.ssrc.to_be_bytes());

        for block in &self.blocks {
            buf.extend_from_slice(&block.ssrc.to_be_bytes());
            let lost = block.cumulative_lost.min(0x00FF_FFFF);
            buf.push(block.fraction_lost);
            buf.extend_from_slice(&lost.to_be_bytes()[1..]);
            buf.extend_from_slice(&block.highest_seqnum.to_be_bytes());
            buf.extend_from_slice(&block.jitter.to_be_bytes());
            // LSR / DLSR unused by this pipeline.
            buf.extend_from_slice(&[0u8; 8]);
        }

        buf
    }
}

/// Parses an RTCP datagram.
///
/// Returns `None` for valid RTCP of an unhandled packet type.
///
/// # Errors
///
/// Returns error on truncation or a bad version field.
pub fn parse(data: &[u8]) -> Result<Option<RtcpPacket>> {
    // ---
    if data.len() < 8 {
        anyhow::bail!("RTCP packet too small: {} bytes", data.len());
    }

    let version = data[0] >> 6;
    if version != RTCP_VERSION {
        anyhow::bail!("invalid RTCP version: {}", version);
    }

    let count = (data[0] & 0x1F) as usize;
    let packet_type = data[1];

    match packet_type {
        PT_SENDER_REPORT => {
            // ---
            if data.len() < 28 {
                anyhow::bail!("sender report truncated: {} bytes", data.len());
            }

            Ok(Some(RtcpPacket::SenderReport(SenderReport {
                ssrc: u32::from_be_bytes([data[4], data[5], data[6], data[7]]),
                ntp_timestamp: u64::from_be_bytes([
                    data[8], data[9], data[10], data[11], data[12], data[13], data[14], data[15],
                ]),
                rtp_timestamp: u32::from_be_bytes([data[16], data[17], data[18], data[19]]),
                packet_count: u32::from_be_bytes([data[20], data[21], data[22], data[23]]),
                octet_count: u32::from_be_bytes([data[24], data[25], data[26], data[27]]),
            })))
        }
        PT_RECEIVER_REPORT => {
            // ---
            let need = 8 + count * 24;
            if data.len() < need {
                anyhow::bail!("receiver report truncated: {} bytes", data.len());
            }

            let ssrc = u32::from_be_bytes([data[4], data[5], data[6], data[7]]);
            let mut blocks = Vec::with_capacity(count);

            for i in 0..count {
                let at = 8 + i * 24;
                let b = &data[at..at + 24];
                blocks.push(ReportBlock {
                    ssrc: u32::from_be_bytes([b[0], b[1], b[2], b[3]]),
                    fraction_lost: b[4],
                    cumulative_lost: u32::from_be_bytes([0, b[5], b[6], b[7]]),
                    highest_seqnum: u32::from_be_bytes([b[8], b[9], b[10], b[11]]),
                    jitter: u32::from_be_bytes([b[12], b[13], b[14], b[15]]),
                });
            }

            Ok(Some(RtcpPacket::ReceiverReport(ReceiverReport {
                ssrc,
                blocks,
            })))
        }
        _ => Ok(None),
    }
}
