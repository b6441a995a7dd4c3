use std::sync::mpsc::channel;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use rand::Rng;
use rtp_pcm_common::{
    ColorWhen, Endpoint, FecScheme, MetricsContext, MetricsServerConfig, Proto, SampleSpec,
};
use tracing::{info, warn};

use receiver::config::{ClockSource, FecConfig, ReceiverConfig, ResamplerBackend};
use receiver::{network, CpalSink, Pump, PumpMode, ReceiverSource, ResamplerProfile, Router};

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Source endpoint, e.g. rtp://0.0.0.0:5004 or rtp+rs8m://0.0.0.0:5004
    #[arg(long, default_value = "rtp://0.0.0.0:5004")]
    source: String,

    /// Repair endpoint, e.g. rs8m://0.0.0.0:5005
    #[arg(long)]
    repair: Option<String>,

    /// Control endpoint, e.g. rtcp://0.0.0.0:5006
    #[arg(long)]
    control: Option<String>,

    /// Source packets per FEC block (K)
    #[arg(long, default_value = "20")]
    nsp: usize,

    /// Repair packets per FEC block (R)
    #[arg(long, default_value = "10")]
    nrp: usize,

    /// Target playback latency in milliseconds
    #[arg(long, default_value = "200")]
    target_latency_ms: u64,

    /// Fatal latency overrun bound in milliseconds
    #[arg(long, default_value = "500")]
    max_latency_overrun_ms: u64,

    /// Fatal latency underrun bound in milliseconds
    #[arg(long, default_value = "200")]
    max_latency_underrun_ms: u64,

    /// Watchdog no-playback timeout in milliseconds
    #[arg(long, default_value = "2000")]
    no_playback_timeout_ms: u64,

    /// Watchdog broken-playback window in milliseconds
    #[arg(long, default_value = "2000")]
    broken_playback_timeout_ms: u64,

    /// Sink frame length in milliseconds
    #[arg(long, default_value = "10")]
    frame_ms: u64,

    /// Output sample rate
    #[arg(long, default_value = "44100")]
    rate: u32,

    /// Output channel count
    #[arg(long, default_value = "2")]
    channels: u16,

    /// Resampler backend (builtin)
    #[arg(long, default_value = "builtin")]
    resampler_backend: ResamplerBackend,

    /// Resampler profile (low|high|disable)
    #[arg(long, default_value = "high")]
    resampler_profile: ResamplerProfile,

    /// Clock source (internal|external)
    #[arg(long, default_value = "internal")]
    clock: ClockSource,

    /// Fill gaps with a diagnostic beep instead of silence
    #[arg(long)]
    beep_on_loss: bool,

    /// Maximum concurrent sessions
    #[arg(long, default_value = "16")]
    max_sessions: usize,

    /// Serve Prometheus metrics on this address, e.g. 127.0.0.1:9100
    #[arg(long)]
    metrics_bind: Option<String>,

    /// ANSI color (auto|always|never)
    #[arg(long, default_value = "auto")]
    color: ColorWhen,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    rtp_pcm_common::init_tracing(args.color, "info")?;

    let source_ep: Endpoint = args.source.parse().context("bad source endpoint")?;
    let repair_ep: Option<Endpoint> = match &args.repair {
        Some(uri) => Some(uri.parse().context("bad repair endpoint")?),
        None => None,
    };
    let control_ep: Option<Endpoint> = match &args.control {
        Some(uri) => Some(uri.parse().context("bad control endpoint")?),
        None => None,
    };

    if source_ep.proto.is_repair() || matches!(source_ep.proto, Proto::Rtcp | Proto::Rtsp) {
        anyhow::bail!("source endpoint must carry a media protocol: {}", source_ep);
    }

    let scheme = source_ep.proto.fec_scheme();
    if let Some(repair) = &repair_ep {
        if !repair.proto.is_repair()
            || repair.proto.fec_scheme() != scheme
            || scheme == FecScheme::Disable
        {
            anyhow::bail!(
                "repair endpoint {} does not match source endpoint {}",
                repair,
                source_ep
            );
        }
    }
    if let Some(control) = &control_ep {
        if control.proto != Proto::Rtcp {
            anyhow::bail!("control endpoint must use rtcp: {}", control);
        }
    }
    if scheme.is_enabled() && repair_ep.is_none() {
        warn!("FEC scheme {} active but no repair endpoint given", scheme);
    }

    let metrics = match &args.metrics_bind {
        Some(bind) => {
            let ctx = MetricsContext::new("receiver")?;
            let bind = bind.parse().context("bad metrics bind address")?;
            ctx.spawn_metrics_server(MetricsServerConfig::new(bind));
            info!("metrics server listening on {}", bind);
            Some(ctx)
        }
        None => None,
    };

    if args.clock == ClockSource::External {
        warn!("external clock requested; this binary always paces via the sink");
    }

    let config = ReceiverConfig {
        target_latency: Duration::from_millis(args.target_latency_ms),
        max_latency_overrun: Duration::from_millis(args.max_latency_overrun_ms),
        max_latency_underrun: Duration::from_millis(args.max_latency_underrun_ms),
        no_playback_timeout: Duration::from_millis(args.no_playback_timeout_ms),
        broken_playback_timeout: Duration::from_millis(args.broken_playback_timeout_ms),
        frame_length: Duration::from_millis(args.frame_ms),
        output_spec: SampleSpec::new(args.rate, args.channels),
        resampler_backend: args.resampler_backend,
        resampler_profile: args.resampler_profile,
        fec: FecConfig {
            scheme,
            n_source_packets: args.nsp,
            n_repair_packets: args.nrp,
        },
        clock_source: args.clock,
        beep_on_loss: args.beep_on_loss,
        max_sessions: args.max_sessions,
        ..Default::default()
    };

    info!("starting receiver on {}", source_ep);
    info!(
        "target latency {} ms, FEC {}, {} Hz / {} ch output",
        args.target_latency_ms, scheme, args.rate, args.channels
    );

    let (events_tx, events_rx) = channel();
    let router = Router::new(
        config.max_sessions,
        scheme.is_enabled(),
        events_tx,
        metrics.clone(),
    );

    let media_socket = network::bind(&source_ep.socket_addr()).await?;
    tokio::spawn(network::run_media_loop(media_socket, router.clone()));

    if let Some(repair) = &repair_ep {
        let socket = network::bind(&repair.socket_addr()).await?;
        tokio::spawn(network::run_media_loop(socket, router.clone()));
    }

    if let Some(control) = &control_ep {
        // The RTCP replies need their own SSRC, never a fixed constant.
        let local_ssrc: u32 = rand::thread_rng().gen();
        let socket = network::bind(&control.socket_addr()).await?;
        tokio::spawn(network::run_control_loop(socket, router.clone(), local_ssrc));
    }

    // The pipeline runs on its own thread: the sink blocks on write
    // and paces everything above it.
    let pipeline_config = config.clone();
    let pipeline_router = router.clone();
    let pipeline_metrics = metrics.clone();
    let (handle_tx, handle_rx) = channel();

    let pipeline = std::thread::Builder::new()
        .name("pipeline".into())
        .spawn(move || -> Result<()> {
            let sink = CpalSink::new(pipeline_config.output_spec)?;
            let source = ReceiverSource::new(
                pipeline_config,
                pipeline_router,
                events_rx,
                pipeline_metrics.clone(),
            );
            let frame_samples = source.frame_samples();

            let mut pump = Pump::new(
                Box::new(source),
                None,
                Box::new(sink),
                frame_samples,
                PumpMode::Continuous,
                pipeline_metrics,
            );
            handle_tx.send(pump.handle()).ok();
            pump.run();
            Ok(())
        })
        .context("failed to spawn pipeline thread")?;

    let handle = handle_rx
        .recv()
        .context("pipeline thread died during startup")?;

    tokio::signal::ctrl_c().await?;
    info!("interrupted, stopping");
    handle.stop();

    match pipeline.join() {
        Ok(result) => result,
        Err(_) => anyhow::bail!("pipeline thread panicked"),
    }
}
