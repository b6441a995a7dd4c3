//! RTP wire format (RFC 3550) for L16 media and repair packets.
//!
//! Implements the fixed 12-byte header plus this project's FEC framing:
//! when a FEC scheme is active, source packets carry a trailing FEC
//! payload id and repair packets carry the same id as a payload prefix.

use anyhow::Result;
use bytes::Bytes;

use crate::fec::FecPayloadId;
use crate::packet::{packet_flags, Packet};
use crate::sample::SampleSpec;

/// RTP packet version 2 (as per RFC 3550)
const RTP_VERSION: u8 = 2;

/// Fixed RTP header length in bytes
pub const RTP_HEADER_LEN: usize = 12;

/// Static payload type: L16 stereo at 44.1 kHz (RFC 3551)
pub const PT_L16_STEREO_44100: u8 = 10;

/// Static payload type: L16 mono at 44.1 kHz (RFC 3551)
pub const PT_L16_MONO_44100: u8 = 11;

/// Dynamic payload type: L16 stereo at 48 kHz
pub const PT_L16_STEREO_48000: u8 = 96;

/// Dynamic payload type: L16 mono at 48 kHz
pub const PT_L16_MONO_48000: u8 = 97;

/// Dynamic payload type: FEC repair stream
pub const PT_REPAIR: u8 = 99;

/// Returns the sample spec of a recognized media payload type.
///
/// Repair and unknown payload types return `None`.
pub fn format(payload_type: u8) -> Option<SampleSpec> {
    // ---
    match payload_type {
        PT_L16_STEREO_44100 => Some(SampleSpec::new(44100, 2)),
        PT_L16_MONO_44100 => Some(SampleSpec::new(44100, 1)),
        PT_L16_STEREO_48000 => Some(SampleSpec::new(48000, 2)),
        PT_L16_MONO_48000 => Some(SampleSpec::new(48000, 1)),
        _ => None,
    }
}

/// Returns the media payload type for a sample spec, if one exists.
pub fn payload_type_for(spec: SampleSpec) -> Option<u8> {
    // ---
    match (spec.rate, spec.channels) {
        (44100, 2) => Some(PT_L16_STEREO_44100),
        (44100, 1) => Some(PT_L16_MONO_44100),
        (48000, 2) => Some(PT_L16_STEREO_48000),
        (48000, 1) => Some(PT_L16_MONO_48000),
        _ => None,
    }
}

/// Serializes a packet into wire format.
///
/// `fec_params` carries `(k, r)` of the active FEC scheme; when set,
/// source packets get a trailing [`FecPayloadId`] and repair packets
/// get it as a payload prefix.
///
/// # Wire Format
///
/// ```text
///  0                   1                   2                   3
///  0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1
/// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
/// |V=2|P|X|  CC   |M|     PT      |       sequence number         |
/// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
/// |                           timestamp                           |
/// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
/// |           synchronization source (SSRC) identifier            |
/// +=+=+=+=+=+=+=+=+=+=+=+=+=+=+=+=+=+=+=+=+=+=+=+=+=+=+=+=+=+=+=+=+
/// |                           payload...                          |
/// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
/// ```
pub fn compose(packet: &Packet, fec_params: Option<(u8, u8)>) -> Vec<u8> {
    // ---
    let extra = if fec_params.is_some() {
        FecPayloadId::LEN
    } else {
        0
    };
    let mut buf = Vec::with_capacity(RTP_HEADER_LEN + packet.payload.len() + extra);

    // Byte 0: V(2) | P(1) | X(1) | CC(4)
    buf.push(RTP_VERSION << 6);

    // Byte 1: M(1) | PT(7)
    buf.push(packet.payload_type & 0x7F);

    buf.extend_from_slice(&packet.seqnum.to_be_bytes());
    buf.extend_from_slice(&packet.timestamp.to_be_bytes());
    buf.extend_from_slice(&packet.ssrc.to_be_bytes());

    if let Some((k, r)) = fec_params {
        let id = FecPayloadId {
            blknum: packet.blknum,
            esi: packet.esi,
            n_source: k,
            n_repair: r,
            payload_len: packet.payload.len() as u16,
        };

        if packet.is_repair() {
            id.write(&mut buf);
            buf.extend_from_slice(&packet.payload);
        } else {
            buf.extend_from_slice(&packet.payload);
            id.write(&mut buf);
        }
    } else {
        buf.extend_from_slice(&packet.payload);
    }

    buf
}

/// Parses a datagram into a typed packet.
///
/// When `fec_active` is set the FEC payload id is stripped from the
/// tail of source packets; repair packets always carry it as a payload
/// prefix.
///
/// # Errors
///
/// Returns error if the datagram is shorter than the fixed header, the
/// version is not 2, or the FEC payload id is inconsistent.
pub fn parse(data: Bytes, fec_active: bool) -> Result<Packet> {
    // ---
    if data.len() < RTP_HEADER_LEN {
        anyhow::bail!("packet too small: {} bytes", data.len());
    }

    let version = (data[0] >> 6) & 0x03;
    if version != RTP_VERSION {
        anyhow::bail!("invalid RTP version: {}", version);
    }

    let payload_type = data[1] & 0x7F;
    let seqnum = u16::from_be_bytes([data[2], data[3]]);
    let timestamp = u32::from_be_bytes([data[4], data[5], data[6], data[7]]);
    let ssrc = u32::from_be_bytes([data[8], data[9], data[10], data[11]]);

    let body = data.slice(RTP_HEADER_LEN..);

    let mut packet = Packet {
        seqnum,
        timestamp,
        payload_type,
        ssrc,
        flags: 0,
        blknum: 0,
        esi: 0,
        payload: body,
    };

    if payload_type == PT_REPAIR {
        // ---
        let id = FecPayloadId::parse(&packet.payload)?;
        let symbol = packet.payload.slice(FecPayloadId::LEN..);
        if symbol.len() != id.payload_len as usize {
            anyhow::bail!(
                "repair symbol length mismatch: declared {}, got {}",
                id.payload_len,
                symbol.len()
            );
        }
        packet.flags = packet_flags::REPAIR;
        packet.blknum = id.blknum;
        packet.esi = id.esi;
        packet.payload = symbol;
    } else {
        // ---
        packet.flags = packet_flags::AUDIO;

        if fec_active {
            if packet.payload.len() < FecPayloadId::LEN {
                anyhow::bail!("source packet too small for FEC payload id");
            }
            let split = packet.payload.len() - FecPayloadId::LEN;
            let id = FecPayloadId::parse(&packet.payload.slice(split..))?;
            if id.payload_len as usize != split {
                anyhow::bail!(
                    "source payload length mismatch: declared {}, got {}",
                    id.payload_len,
                    split
                );
            }
            packet.blknum = id.blknum;
            packet.esi = id.esi;
            packet.payload = packet.payload.slice(..split);

            if id.esi == 0 {
                packet.flags |= packet_flags::BLOCK_BEGIN;
            }
            if id.n_source > 0 && id.esi == id.n_source as u16 - 1 {
                packet.flags |= packet_flags::BLOCK_END;
            }
        }
    }

    Ok(packet)
}

#[cfg(test)]
mod tests {
    // ---
    use super::*;

    fn make_packet(payload: Vec<u8>) -> Packet {
        Packet {
            seqnum: 100,
            timestamp: 32000,
            payload_type: PT_L16_STEREO_44100,
            ssrc: 0x12345678,
            flags: packet_flags::AUDIO,
            blknum: 0,
            esi: 0,
            payload: Bytes::from(payload),
        }
    }

    #[test]
    fn test_compose_parse_roundtrip_plain() {
        // ---
        let packet = make_packet(vec![1, 2, 3, 4]);
        let wire = compose(&packet, None);

        assert_eq!(wire[0] >> 6, 2);
        assert_eq!(wire[1] & 0x7F, PT_L16_STEREO_44100);

        let parsed = parse(Bytes::from(wire), false).expect("parse failed");
        assert_eq!(parsed.seqnum, 100);
        assert_eq!(parsed.timestamp, 32000);
        assert_eq!(parsed.ssrc, 0x12345678);
        assert!(parsed.is_audio());
        assert_eq!(&parsed.payload[..], &[1, 2, 3, 4]);
    }

    #[test]
    fn test_parse_too_small() {
        // ---
        let result = parse(Bytes::from_static(&[0, 1, 2]), false);
        assert!(result.is_err());
    }

    #[test]
    fn test_parse_invalid_version() {
        // ---
        let mut data = vec![0u8; 12];
        data[0] = 1 << 6;
        assert!(parse(Bytes::from(data), false).is_err());
    }

    #[test]
    fn test_compose_parse_roundtrip_with_fec_id() {
        // ---
        let mut packet = make_packet(vec![0u8; 16]);
        packet.blknum = 7;
        packet.esi = 3;
        let wire = compose(&packet, Some((20, 10)));

        let parsed = parse(Bytes::from(wire), true).expect("parse failed");
        assert!(parsed.is_audio());
        assert_eq!(parsed.blknum, 7);
        assert_eq!(parsed.esi, 3);
        assert_eq!(parsed.payload.len(), 16);
        assert!(!parsed.has_flags(packet_flags::BLOCK_BEGIN));
        assert!(!parsed.has_flags(packet_flags::BLOCK_END));
    }

    #[test]
    fn test_block_edge_flags() {
        // ---
        let mut first = make_packet(vec![0u8; 8]);
        first.esi = 0;
        let parsed = parse(Bytes::from(compose(&first, Some((4, 2)))), true).unwrap();
        assert!(parsed.has_flags(packet_flags::BLOCK_BEGIN));

        let mut last = make_packet(vec![0u8; 8]);
        last.esi = 3;
        let parsed = parse(Bytes::from(compose(&last, Some((4, 2)))), true).unwrap();
        assert!(parsed.has_flags(packet_flags::BLOCK_END));
    }

    #[test]
    fn test_repair_roundtrip() {
        // ---
        let mut packet = make_packet(vec![9u8; 12]);
        packet.payload_type = PT_REPAIR;
        packet.flags = packet_flags::REPAIR;
        packet.blknum = 2;
        packet.esi = 21; // k=20, first repair position
        let wire = compose(&packet, Some((20, 10)));

        let parsed = parse(Bytes::from(wire), true).expect("parse failed");
        assert!(parsed.is_repair());
        assert_eq!(parsed.blknum, 2);
        assert_eq!(parsed.esi, 21);
        assert_eq!(parsed.payload.len(), 12);
    }

    #[test]
    fn test_format_recognition() {
        // ---
        assert_eq!(format(PT_L16_MONO_44100), Some(SampleSpec::new(44100, 1)));
        assert_eq!(format(PT_L16_STEREO_48000), Some(SampleSpec::new(48000, 2)));
        assert_eq!(format(PT_REPAIR), None);
        assert_eq!(format(42), None);
    }

    #[test]
    fn test_payload_type_roundtrip() {
        // ---
        for pt in [
            PT_L16_STEREO_44100,
            PT_L16_MONO_44100,
            PT_L16_STEREO_48000,
            PT_L16_MONO_48000,
        ] {
            let spec = format(pt).unwrap();
            assert_eq!(payload_type_for(spec), Some(pt));
        }
    }
}
