//! UDP transmission of media and repair packets.
//!
//! One socket serves both streams, so the receiver sees a single
//! source address for the whole session. Network errors are logged and
//! swallowed; a streaming sender must outlive transient outages.

use anyhow::{Context, Result};
use rtp_pcm_common::{rtp, Packet};
use tokio::net::UdpSocket;
use tracing::{debug, error};

/// UDP sender for one media stream (plus its repair stream).
pub struct RtpSender {
    // ---
    socket: UdpSocket,
    media_addr: String,
    repair_addr: Option<String>,

    /// `(K, R)` when a FEC scheme frames the packets.
    fec_params: Option<(u8, u8)>,

    packets_sent: u64,
    bytes_sent: u64,
}

impl RtpSender {
    // ---
    /// Creates a sender bound to an ephemeral local port.
    ///
    /// # Errors
    ///
    /// Returns error if socket binding fails.
    pub async fn new(
        media_addr: impl Into<String>,
        repair_addr: Option<String>,
        fec_params: Option<(u8, u8)>,
    ) -> Result<Self> {
        // ---
        let socket = UdpSocket::bind("0.0.0.0:0")
            .await
            .context("failed to bind UDP socket")?;

        debug!("UDP socket bound to {}", socket.local_addr()?);

        Ok(Self {
            socket,
            media_addr: media_addr.into(),
            repair_addr,
            fec_params,
            packets_sent: 0,
            bytes_sent: 0,
        })
    }

    /// Sends one packet to its stream's destination.
    ///
    /// Repair packets go to the repair address; without one they are
    /// silently skipped (receiver-side FEC then simply never engages).
    pub async fn send(&mut self, packet: &Packet) -> Result<()> {
        // ---
        let dest = if packet.is_repair() {
            match &self.repair_addr {
                Some(addr) => addr,
                None => return Ok(()),
            }
        } else {
            &self.media_addr
        };

        let data = rtp::compose(packet, self.fec_params);

        match self.socket.send_to(&data, dest).await {
            Ok(bytes) => {
                self.packets_sent += 1;
                self.bytes_sent += bytes as u64;

                if self.packets_sent % 500 == 0 {
                    debug!(
                        "sent {} packets ({} bytes) - seq={}",
                        self.packets_sent, self.bytes_sent, packet.seqnum
                    );
                }
            }
            Err(e) => {
                // Keep streaming through transient network errors.
                error!("failed to send packet seq={}: {}", packet.seqnum, e);
            }
        }

        Ok(())
    }

    /// Sends a raw RTCP datagram to the control address.
    pub async fn send_control(&mut self, control_addr: &str, data: &[u8]) -> Result<()> {
        // ---
        self.socket
            .send_to(data, control_addr)
            .await
            .context("failed to send RTCP packet")?;
        Ok(())
    }

    /// Returns statistics about packets sent.
    pub fn stats(&self) -> (u64, u64) {
        // ---
        (self.packets_sent, self.bytes_sent)
    }
}
