//! One session: the pipeline column for a single remote source.
//!
//! A session owns its sorted queues, FEC reader, depacketizer, latency
//! monitor, watchdog, resampler, and channel mapper, assembled into a
//! pull chain at creation. Packets arrive through a lock-free handoff
//! ring filled by the network task; everything else is owned by the
//! pipeline thread.

use std::cell::{Cell, RefCell};
use std::fmt;
use std::net::SocketAddr;
use std::rc::Rc;
use std::time::Instant;

use anyhow::{Context, Result};
use ringbuf::HeapConsumer;
use rtp_pcm_common::rtcp::SenderReport;
use rtp_pcm_common::units::timestamp_lt;
use rtp_pcm_common::{
    BlockCodec, Frame, FrameReader, MetricsContext, Packet, PacketReader, SampleSpec,
};
use tracing::{info, warn};

use crate::channel_map::ChannelMapperReader;
use crate::config::{ReceiverConfig, ResamplerProfile};
use crate::depacketizer::Depacketizer;
use crate::fec_reader::FecReader;
use crate::latency::LatencyMonitor;
use crate::queue::SortedQueue;
use crate::resampler::{ResamplerReader, SincResampler};
use crate::stats::SessionStats;
use crate::watchdog::{JumpDetector, Watchdog};

/// Identity of a remote source: transport address plus RTP SSRC.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SourceKey {
    // ---
    pub addr: SocketAddr,
    pub ssrc: u32,
}

impl fmt::Display for SourceKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // ---
        write!(f, "{}/ssrc={:#010x}", self.addr, self.ssrc)
    }
}

/// Adapter exposing a shared sorted queue as a packet reader.
struct QueueReader(Rc<RefCell<SortedQueue>>);

impl PacketReader for QueueReader {
    fn read(&mut self) -> Option<Packet> {
        // ---
        self.0.borrow_mut().read()
    }
}

/// A live receiver session.
pub struct Session {
    // ---
    key: SourceKey,

    /// Top of the pipeline column.
    column: Box<dyn FrameReader>,

    source_queue: Rc<RefCell<SortedQueue>>,
    repair_queue: Option<Rc<RefCell<SortedQueue>>>,

    stats: Rc<RefCell<SessionStats>>,
    dead: Rc<Cell<bool>>,
    newest_ts: Rc<Cell<u32>>,
    has_media: bool,

    jump: JumpDetector,

    /// Inbound media handoff from the network task.
    consumer: HeapConsumer<Packet>,

    /// Inbound control handoff (sender reports).
    control: HeapConsumer<SenderReport>,

    monitor_reclock: Rc<Cell<u64>>,

    /// Diagnostic views into the column.
    render_ts: Rc<Cell<u32>>,
    scale: Rc<Cell<f64>>,

    metrics: Option<MetricsContext>,

    created_at: Instant,
}

impl Session {
    // ---
    /// Builds the session's pipeline column.
    ///
    /// # Errors
    ///
    /// Fails on an unrecognized payload type or an unrepresentable FEC
    /// geometry.
    pub fn new(
        key: SourceKey,
        payload_type: u8,
        consumer: HeapConsumer<Packet>,
        control: HeapConsumer<SenderReport>,
        config: &ReceiverConfig,
        metrics: Option<MetricsContext>,
    ) -> Result<Self> {
        // ---
        let spec = rtp_pcm_common::rtp::format(payload_type)
            .with_context(|| format!("unrecognized payload type {}", payload_type))?;
        let out_spec = config.output_spec;

        let stats = Rc::new(RefCell::new(SessionStats::default()));
        let dead = Rc::new(Cell::new(false));
        let newest_ts = Rc::new(Cell::new(0u32));
        let render_ts = Rc::new(Cell::new(0u32));
        let started = Rc::new(Cell::new(false));
        let scale = Rc::new(Cell::new(1.0f64));
        let monitor_reclock = Rc::new(Cell::new(0u64));

        let window = config.queue_window();
        let source_queue = Rc::new(RefCell::new(SortedQueue::new(window)));

        // Packet feed: plain queue, or the FEC reader merging both
        // streams.
        let (repair_queue, packet_reader): (Option<_>, Box<dyn PacketReader>) =
            if config.fec.scheme.is_enabled() {
                let codec = BlockCodec::new(
                    config.fec.scheme,
                    config.fec.n_source_packets,
                    config.fec.n_repair_packets,
                )?
                .expect("scheme checked enabled");
                let repair = Rc::new(RefCell::new(SortedQueue::new(window)));
                let reader = FecReader::new(
                    codec,
                    config.fec.n_source_packets,
                    config.fec.n_repair_packets,
                    spec,
                    Rc::clone(&source_queue),
                    Rc::clone(&repair),
                    Rc::clone(&stats),
                );
                (Some(repair), Box::new(reader))
            } else {
                (None, Box::new(QueueReader(Rc::clone(&source_queue))))
            };

        let anchor_offset = spec.duration_to_samples(config.target_latency) as u32;
        let depacketizer = Depacketizer::new(
            packet_reader,
            spec,
            anchor_offset,
            config.beep_on_loss,
            config.beep_frequency,
            Rc::clone(&stats),
            Rc::clone(&render_ts),
            Rc::clone(&started),
        );

        let monitor = LatencyMonitor::new(
            Box::new(depacketizer),
            spec,
            anchor_offset,
            spec.duration_to_samples(config.max_latency_overrun) as u32,
            spec.duration_to_samples(config.max_latency_underrun) as u32,
            config.latency_tuner,
            Rc::clone(&scale),
            Rc::clone(&dead),
            Rc::clone(&newest_ts),
            Rc::clone(&render_ts),
            Rc::clone(&started),
            Rc::clone(&monitor_reclock),
        );

        let watchdog = Watchdog::new(
            Box::new(monitor),
            Rc::clone(&dead),
            frames_in(config.no_playback_timeout, config.frame_length),
            frames_in(config.broken_playback_timeout, config.frame_length) as usize,
            config.broken_playback_fraction,
        );

        // Resampler: skipped only when disabled and the rates already
        // match.
        let taps = match config.resampler_profile.taps() {
            Some(taps) => Some(taps),
            None if spec.rate == out_spec.rate => None,
            None => {
                warn!(
                    "session {}: resampler disabled but rates differ ({} vs {}), forcing low profile",
                    key, spec.rate, out_spec.rate
                );
                ResamplerProfile::Low.taps()
            }
        };

        let out_samples = out_spec.duration_to_samples_overall(config.frame_length);

        let pre_mapper: Box<dyn FrameReader> = match taps {
            Some(taps) => {
                let resampler =
                    SincResampler::new(spec.rate, out_spec.rate, spec.channels as usize, taps);
                let in_chunk = spec.duration_to_samples_overall(config.frame_length);
                Box::new(ResamplerReader::new(
                    Box::new(watchdog),
                    resampler,
                    Rc::clone(&scale),
                    in_chunk.max(spec.channels as usize),
                ))
            }
            None => Box::new(watchdog),
        };

        let mapper = ChannelMapperReader::new(
            pre_mapper,
            SampleSpec::new(out_spec.rate, spec.channels),
            out_spec,
            out_samples,
        );

        let jump = JumpDetector::new(
            Rc::clone(&dead),
            config.max_seqnum_jump,
            spec.duration_to_samples(config.max_timestamp_jump) as u32,
        );

        info!("session {}: created (payload type {})", key, payload_type);

        Ok(Self {
            key,
            column: Box::new(mapper),
            source_queue,
            repair_queue,
            stats,
            dead,
            newest_ts,
            has_media: false,
            jump,
            consumer,
            control,
            monitor_reclock,
            render_ts,
            scale,
            metrics,
            created_at: Instant::now(),
        })
    }

    pub fn key(&self) -> SourceKey {
        // ---
        self.key
    }

    pub fn is_alive(&self) -> bool {
        // ---
        !self.dead.get()
    }

    pub fn stats(&self) -> Rc<RefCell<SessionStats>> {
        // ---
        Rc::clone(&self.stats)
    }

    pub fn created_at(&self) -> Instant {
        // ---
        self.created_at
    }

    /// Current playback latency in source-rate samples.
    pub fn playback_latency(&self) -> i32 {
        // ---
        rtp_pcm_common::units::timestamp_diff(self.newest_ts.get(), self.render_ts.get())
    }

    /// Current resampler scaling factor.
    pub fn scale(&self) -> f64 {
        // ---
        self.scale.get()
    }

    /// Moves packets from the network handoff into the sorted queues.
    ///
    /// Runs on the pipeline thread before each frame.
    pub fn drain(&mut self) {
        // ---
        while let Some(packet) = self.consumer.pop() {
            self.stats.borrow_mut().record_packet(packet.seqnum);

            if let Some(metrics) = &self.metrics {
                metrics.packets_received_total.inc();
                metrics.bytes_received_total.inc_by(packet.payload.len() as u64);
            }

            if packet.is_repair() {
                if let Some(repair) = &self.repair_queue {
                    if !repair.borrow_mut().write(packet) {
                        self.stats.borrow_mut().dropped += 1;
                    }
                } else {
                    self.stats.borrow_mut().dropped += 1;
                }
                continue;
            }

            self.jump.observe(&packet);

            // Newest media timestamp feeds the latency monitor.
            let ts = packet.timestamp;
            if !self.has_media || timestamp_lt(self.newest_ts.get(), ts) {
                self.newest_ts.set(ts);
                self.has_media = true;
            }

            if !self.source_queue.borrow_mut().write(packet) {
                if let Some(metrics) = &self.metrics {
                    metrics.packets_late_total.inc();
                }
            }
        }

        while let Some(report) = self.control.pop() {
            self.stats.borrow_mut().record_sender_report(report);
        }
    }

    /// Reads one output frame. Returns `false` once the session is
    /// dead; the mixer then contributes silence for it until reaping.
    pub fn read(&mut self, frame: &mut Frame) -> bool {
        // ---
        self.drain();
        self.column.read(frame)
    }

    /// Forwards the pump's playback-time report.
    pub fn reclock(&mut self, ntp_time: u64) {
        // ---
        self.monitor_reclock.set(ntp_time);
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        // ---
        let stats = self.stats.borrow();
        info!(
            "session {}: closing after {:?} ({} pkts, {} reconstructed)",
            self.key,
            self.created_at.elapsed(),
            stats.received,
            stats.reconstructed,
        );
    }
}

/// Number of whole frames covering a duration.
pub(crate) fn frames_in(duration: std::time::Duration, frame_length: std::time::Duration) -> u32 {
    // ---
    let frames = duration.as_nanos() / frame_length.as_nanos().max(1);
    (frames as u32).max(1)
}
