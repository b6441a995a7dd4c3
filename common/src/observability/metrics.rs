//! Prometheus metrics (Rust `prometheus` crate).
//!
//! One `MetricsContext` is intended per process. Each binary owns its
//! registry and controls which metrics it reports; pipeline hot paths
//! only ever touch counter increments and histogram observations.

use anyhow::Result;
use hyper::service::{make_service_fn, service_fn};
use hyper::{Body, Method, Request, Response, Server, StatusCode};
use prometheus::{
    Encoder, Histogram, HistogramOpts, IntCounter, IntGauge, Opts, Registry, TextEncoder,
};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::task::JoinHandle;

/// Configuration for the built-in Prometheus scrape endpoint.
#[derive(Debug, Clone)]
pub struct MetricsServerConfig {
    // ---
    /// Address to bind, e.g. `127.0.0.1:9100`.
    pub bind: SocketAddr,
}

impl MetricsServerConfig {
    // ---
    pub fn new(bind: SocketAddr) -> Self {
        // ---
        Self { bind }
    }
}

/// Prometheus metrics registry + handles.
#[derive(Clone)]
pub struct MetricsContext {
    // ---
    registry: Registry,

    // Packet path
    pub packets_sent_total: IntCounter,
    pub packets_received_total: IntCounter,
    pub packets_late_total: IntCounter,
    pub packets_dropped_total: IntCounter,
    pub packets_reconstructed_total: IntCounter,

    pub bytes_sent_total: IntCounter,
    pub bytes_received_total: IntCounter,

    // FEC
    pub fec_blocks_repaired_total: IntCounter,
    pub fec_decode_errors_total: IntCounter,

    // Sessions
    pub sessions_live: IntGauge,
    pub sessions_created_total: IntCounter,
    pub sessions_reaped_total: IntCounter,

    // Frame path (seconds)
    pub pump_frame_seconds: Histogram,
    pub sink_write_seconds: Histogram,
}

impl MetricsContext {
    // ---
    /// Create a new registry and register the standard metrics.
    ///
    /// `process_name` is applied as a constant label (`process=<name>`).
    pub fn new(process_name: &str) -> Result<Self> {
        // ---
        let registry = Registry::new_custom(
            Some("rtp_pcm_streamer".into()),
            Some(prometheus::labels! { "process".to_string() => process_name.to_string() }),
        )?;

        let packets_sent_total = IntCounter::with_opts(Opts::new(
            "rtp_packets_sent_total",
            "Total RTP packets sent",
        ))?;
        let packets_received_total = IntCounter::with_opts(Opts::new(
            "rtp_packets_received_total",
            "Total RTP packets accepted by the router",
        ))?;
        let packets_late_total = IntCounter::with_opts(Opts::new(
            "rtp_packets_late_total",
            "Total RTP packets that arrived behind the playout cursor",
        ))?;
        let packets_dropped_total = IntCounter::with_opts(Opts::new(
            "rtp_packets_dropped_total",
            "Total RTP packets dropped (malformed, rejected, or queue overflow)",
        ))?;
        let packets_reconstructed_total = IntCounter::with_opts(Opts::new(
            "rtp_packets_reconstructed_total",
            "Total source packets rebuilt from FEC repair data",
        ))?;

        let bytes_sent_total = IntCounter::with_opts(Opts::new(
            "rtp_bytes_sent_total",
            "Total RTP payload bytes sent",
        ))?;
        let bytes_received_total = IntCounter::with_opts(Opts::new(
            "rtp_bytes_received_total",
            "Total RTP payload bytes received",
        ))?;

        let fec_blocks_repaired_total = IntCounter::with_opts(Opts::new(
            "fec_blocks_repaired_total",
            "Total FEC blocks where decoding recovered at least one packet",
        ))?;
        let fec_decode_errors_total = IntCounter::with_opts(Opts::new(
            "fec_decode_errors_total",
            "Total FEC blocks where the decoder reported an internal error",
        ))?;

        let sessions_live = IntGauge::with_opts(Opts::new(
            "sessions_live",
            "Currently live receiver sessions",
        ))?;
        let sessions_created_total = IntCounter::with_opts(Opts::new(
            "sessions_created_total",
            "Total receiver sessions created",
        ))?;
        let sessions_reaped_total = IntCounter::with_opts(Opts::new(
            "sessions_reaped_total",
            "Total receiver sessions reaped after death",
        ))?;

        let pump_frame_seconds = Histogram::with_opts(HistogramOpts::new(
            "pump_frame_seconds",
            "Duration of one pump iteration (read + write) in seconds",
        ))?;
        let sink_write_seconds = Histogram::with_opts(HistogramOpts::new(
            "sink_write_seconds",
            "Duration of one sink write in seconds",
        ))?;

        // Register all metrics
        registry.register(Box::new(packets_sent_total.clone()))?;
        registry.register(Box::new(packets_received_total.clone()))?;
        registry.register(Box::new(packets_late_total.clone()))?;
        registry.register(Box::new(packets_dropped_total.clone()))?;
        registry.register(Box::new(packets_reconstructed_total.clone()))?;
        registry.register(Box::new(bytes_sent_total.clone()))?;
        registry.register(Box::new(bytes_received_total.clone()))?;
        registry.register(Box::new(fec_blocks_repaired_total.clone()))?;
        registry.register(Box::new(fec_decode_errors_total.clone()))?;
        registry.register(Box::new(sessions_live.clone()))?;
        registry.register(Box::new(sessions_created_total.clone()))?;
        registry.register(Box::new(sessions_reaped_total.clone()))?;
        registry.register(Box::new(pump_frame_seconds.clone()))?;
        registry.register(Box::new(sink_write_seconds.clone()))?;

        Ok(Self {
            registry,
            packets_sent_total,
            packets_received_total,
            packets_late_total,
            packets_dropped_total,
            packets_reconstructed_total,
            bytes_sent_total,
            bytes_received_total,
            fec_blocks_repaired_total,
            fec_decode_errors_total,
            sessions_live,
            sessions_created_total,
            sessions_reaped_total,
            pump_frame_seconds,
            sink_write_seconds,
        })
    }

    /// Gather metric families from this registry.
    pub fn gather(&self) -> Vec<prometheus::proto::MetricFamily> {
        // ---
        self.registry.gather()
    }

    /// Spawns a minimal HTTP server that serves `GET /metrics`.
    ///
    /// This is intentionally explicit (callers decide whether to run it).
    pub fn spawn_metrics_server(&self, cfg: MetricsServerConfig) -> JoinHandle<Result<()>> {
        // ---
        let registry = Arc::new(self.registry.clone());
        tokio::spawn(async move {
            // ---
            let make_svc = make_service_fn(move |_conn| {
                let registry = Arc::clone(&registry);
                async move {
                    Ok::<_, hyper::Error>(service_fn(move |req| {
                        let registry = Arc::clone(&registry);
                        async move { handle_metrics_request(req, registry).await }
                    }))
                }
            });

            let server = Server::bind(&cfg.bind).serve(make_svc);
            server.await.map_err(|e| anyhow::anyhow!(e))?;
            Ok(())
        })
    }
}

async fn handle_metrics_request(
    req: Request<Body>,
    registry: Arc<Registry>,
) -> Result<Response<Body>, hyper::Error> {
    match (req.method(), req.uri().path()) {
        (&Method::GET, "/metrics") => {
            let encoder = TextEncoder::new();
            let metric_families = registry.gather();
            let mut buffer = Vec::new();

            if let Err(e) = encoder.encode(&metric_families, &mut buffer) {
                let mut resp = Response::new(Body::from(format!("encode error: {e}")));
                *resp.status_mut() = StatusCode::INTERNAL_SERVER_ERROR;
                return Ok(resp);
            }

            let mut resp = Response::new(Body::from(buffer));
            resp.headers_mut().insert(
                hyper::header::CONTENT_TYPE,
                hyper::header::HeaderValue::from_static("text/plain; version=0.0.4"),
            );
            Ok(resp)
        }
        _ => {
            let mut resp = Response::new(Body::from("not found"));
            *resp.status_mut() = StatusCode::NOT_FOUND;
            Ok(resp)
        }
    }
}
