//! Sender pipeline library.
//!
//! PCM frames flow through the packetizer (L16 RTP packets), the FEC
//! writer (block stamping + repair generation), and the interleaver
//! (burst-loss decorrelation) onto the UDP socket, paced in real time.

pub mod audio;
pub mod fec_writer;
pub mod interleaver;
pub mod network;
pub mod packetizer;

pub use audio::{read_wav, AudioData};
pub use fec_writer::{FecWriter, FecWriterConfig};
pub use interleaver::Interleaver;
pub use network::RtpSender;
pub use packetizer::Packetizer;

use anyhow::Result;
use rtp_pcm_common::rtcp::SenderReport;
use rtp_pcm_common::units::ntp_now;
use rtp_pcm_common::MetricsContext;
use tracing::info;

/// Interval between RTCP sender reports.
const REPORT_INTERVAL: std::time::Duration = std::time::Duration::from_secs(5);

/// Streams audio over RTP in real time.
///
/// Packets are paced to the media clock: after each source packet the
/// task sleeps for one packet duration. Repair packets ride along with
/// the block that produced them. When `control_addr` is set, an RTCP
/// sender report goes out every few seconds.
///
/// # Errors
///
/// Returns error if packetization or socket transmission fails
/// persistently.
pub async fn stream_audio(
    audio: &AudioData,
    packetizer: &mut Packetizer,
    fec_writer: &mut FecWriter,
    interleaver: &mut Interleaver,
    sender: &mut RtpSender,
    control_addr: Option<&str>,
    metrics: Option<&MetricsContext>,
    loop_audio: bool,
) -> Result<()> {
    // ---
    let packet_duration = packetizer.packet_duration();
    let samples_per_write = packetizer.samples_per_packet() * audio.spec.channels as usize;

    let mut media_packets = 0u32;
    let mut media_octets = 0u32;
    let mut last_report = std::time::Instant::now();
    let mut last_media_ts = 0u32;

    loop {
        // ---
        for chunk in audio.samples.chunks(samples_per_write) {
            for packet in packetizer.write(chunk) {
                last_media_ts = packet.timestamp;
                media_packets += 1;
                media_octets = media_octets.wrapping_add(packet.payload.len() as u32);

                for fec_out in fec_writer.write(packet) {
                    for wire in interleaver.write(fec_out) {
                        if let Some(m) = metrics {
                            m.packets_sent_total.inc();
                            m.bytes_sent_total.inc_by(wire.payload.len() as u64);
                        }
                        sender.send(&wire).await?;
                    }
                }
            }

            // Periodic RTCP sender report.
            if let Some(control) = control_addr {
                if last_report.elapsed() >= REPORT_INTERVAL {
                    last_report = std::time::Instant::now();
                    let report = SenderReport {
                        ssrc: packetizer.ssrc(),
                        ntp_timestamp: ntp_now(),
                        rtp_timestamp: last_media_ts,
                        packet_count: media_packets,
                        octet_count: media_octets,
                    };
                    sender.send_control(control, &report.compose()).await?;
                }
            }

            // Real-time pacing.
            tokio::time::sleep(packet_duration).await;
        }

        // Flush the partial tail through the whole chain.
        if let Some(tail) = packetizer.flush() {
            for fec_out in fec_writer.write(tail) {
                for wire in interleaver.write(fec_out) {
                    sender.send(&wire).await?;
                }
            }
        }
        for wire in interleaver.flush() {
            sender.send(&wire).await?;
        }

        if !loop_audio {
            break;
        }
    }

    let (packets, bytes) = sender.stats();
    info!("streamed {} packets ({} bytes)", packets, bytes);
    Ok(())
}
