//! Packetizer: slices a PCM stream into fixed-length L16 RTP packets.
//!
//! Every packet carries the same number of samples, which keeps FEC
//! symbol sizes uniform. Sequence numbers increment by one per packet;
//! the timestamp advances by the per-channel sample count.

use std::time::Duration;

use anyhow::{Context, Result};
use bytes::Bytes;
use rtp_pcm_common::{l16, packet_flags, rtp, Packet, Sample, SampleSpec};

/// Slices samples into equal-sized media packets.
pub struct Packetizer {
    // ---
    spec: SampleSpec,
    payload_type: u8,
    ssrc: u32,

    /// Samples per packet, per channel.
    samples_per_packet: usize,

    /// Pending interleaved samples not yet forming a full packet.
    pending: Vec<Sample>,

    seqnum: u16,
    timestamp: u32,

    packets_built: u64,
}

impl Packetizer {
    // ---
    /// Creates a packetizer emitting packets of `packet_length` each.
    ///
    /// # Errors
    ///
    /// Fails when no payload type covers the sample spec.
    pub fn new(spec: SampleSpec, packet_length: Duration, ssrc: u32) -> Result<Self> {
        // ---
        let payload_type = rtp::payload_type_for(spec)
            .with_context(|| format!("no payload type for {}Hz/{}ch", spec.rate, spec.channels))?;

        let samples_per_packet = spec.duration_to_samples(packet_length).max(1);

        Ok(Self {
            spec,
            payload_type,
            ssrc,
            samples_per_packet,
            pending: Vec::new(),
            seqnum: 0,
            timestamp: 0,
            packets_built: 0,
        })
    }

    /// Samples per packet, per channel.
    pub fn samples_per_packet(&self) -> usize {
        // ---
        self.samples_per_packet
    }

    pub fn payload_type(&self) -> u8 {
        // ---
        self.payload_type
    }

    pub fn ssrc(&self) -> u32 {
        // ---
        self.ssrc
    }

    /// Wall-clock duration covered by one packet.
    pub fn packet_duration(&self) -> Duration {
        // ---
        self.spec.samples_to_duration(self.samples_per_packet)
    }

    /// Feeds interleaved samples; returns every full packet produced.
    pub fn write(&mut self, samples: &[Sample]) -> Vec<Packet> {
        // ---
        self.pending.extend_from_slice(samples);

        let per_packet = self.samples_per_packet * self.spec.channels as usize;
        let mut packets = Vec::new();

        while self.pending.len() >= per_packet {
            let chunk: Vec<Sample> = self.pending.drain(..per_packet).collect();
            packets.push(self.build_packet(&chunk));
        }

        packets
    }

    /// Flushes the tail, zero-padded to a full packet. Returns `None`
    /// when nothing is pending.
    pub fn flush(&mut self) -> Option<Packet> {
        // ---
        if self.pending.is_empty() {
            return None;
        }

        let per_packet = self.samples_per_packet * self.spec.channels as usize;
        let mut chunk: Vec<Sample> = self.pending.drain(..).collect();
        chunk.resize(per_packet, 0.0);
        Some(self.build_packet(&chunk))
    }

    fn build_packet(&mut self, samples: &[Sample]) -> Packet {
        // ---
        let mut payload = Vec::new();
        l16::encode(samples, &mut payload);

        let packet = Packet {
            seqnum: self.seqnum,
            timestamp: self.timestamp,
            payload_type: self.payload_type,
            ssrc: self.ssrc,
            flags: packet_flags::AUDIO,
            blknum: 0,
            esi: 0,
            payload: Bytes::from(payload),
        };

        self.seqnum = self.seqnum.wrapping_add(1);
        self.timestamp = self.timestamp.wrapping_add(self.samples_per_packet as u32);
        self.packets_built += 1;

        packet
    }
}
