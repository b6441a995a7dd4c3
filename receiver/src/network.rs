//! UDP reception tasks.
//!
//! Each socket gets one async task that reads datagrams, parses, and
//! routes into the per-session handoff rings. Rejections are counted
//! and logged at a sampled rate; the pipeline never hears about them.

use std::sync::Arc;

use anyhow::{Context, Result};
use bytes::Bytes;
use rtp_pcm_common::rtcp::ReceiverReport;
use tokio::net::UdpSocket;
use tracing::{debug, info, warn};

use crate::router::Router;

/// Max UDP datagram accepted for RTP media.
const RECV_BUF_LEN: usize = 2048;

/// Binds a UDP socket for the given address.
pub async fn bind(addr: &str) -> Result<Arc<UdpSocket>> {
    // ---
    let socket = UdpSocket::bind(addr)
        .await
        .with_context(|| format!("failed to bind UDP socket to {}", addr))?;
    info!("UDP socket bound to {}", socket.local_addr()?);
    Ok(Arc::new(socket))
}

/// Receives media (source or repair) datagrams until the socket fails.
///
/// Safe to run for multiple sockets against one router; each socket is
/// a single producer for the sessions it feeds.
pub async fn run_media_loop(socket: Arc<UdpSocket>, router: Router) -> Result<()> {
    // ---
    let mut buf = vec![0u8; RECV_BUF_LEN];
    let mut rejected: u64 = 0;

    loop {
        let (len, addr) = socket
            .recv_from(&mut buf)
            .await
            .context("failed to receive UDP packet")?;

        let data = Bytes::copy_from_slice(&buf[..len]);
        if let Err(e) = router.route(data, addr) {
            rejected += 1;
            if rejected.is_power_of_two() {
                warn!("rejected packet from {}: {} ({} total)", addr, e, rejected);
            } else {
                debug!("rejected packet from {}: {}", addr, e);
            }
        }
    }
}

/// Receives RTCP control datagrams until the socket fails.
///
/// Each handled sender report is answered with a receiver report
/// carrying the latest reception block the pipeline published for that
/// stream.
pub async fn run_control_loop(socket: Arc<UdpSocket>, router: Router, local_ssrc: u32) -> Result<()> {
    // ---
    let mut buf = vec![0u8; RECV_BUF_LEN];

    loop {
        let (len, addr) = socket
            .recv_from(&mut buf)
            .await
            .context("failed to receive RTCP packet")?;

        match router.route_control(&buf[..len], addr) {
            Ok(Some(ssrc)) => {
                if let Some(block) = router.report_for(ssrc) {
                    let reply = ReceiverReport {
                        ssrc: local_ssrc,
                        blocks: vec![block],
                    };
                    if let Err(e) = socket.send_to(&reply.compose(), addr).await {
                        debug!("failed to send receiver report to {}: {}", addr, e);
                    }
                }
            }
            Ok(None) => {}
            Err(e) => debug!("rejected RTCP from {}: {}", addr, e),
        }
    }
}
