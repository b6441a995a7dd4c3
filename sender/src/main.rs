use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use rand::Rng;
use rtp_pcm_common::{ColorWhen, Endpoint, FecScheme, MetricsContext, MetricsServerConfig, Proto};
use tracing::info;

use sender::{
    read_wav, FecWriter, FecWriterConfig, Interleaver, Packetizer, RtpSender,
};

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// WAV file to stream
    #[arg(short, long)]
    input: String,

    /// Media destination, e.g. rtp://127.0.0.1:5004 or rtp+rs8m://...
    #[arg(long, default_value = "rtp://127.0.0.1:5004")]
    dest: String,

    /// Repair destination, e.g. rs8m://127.0.0.1:5005
    #[arg(long)]
    repair_dest: Option<String>,

    /// Control destination, e.g. rtcp://127.0.0.1:5006
    #[arg(long)]
    control_dest: Option<String>,

    /// Source packets per FEC block (K)
    #[arg(long, default_value = "20")]
    nsp: usize,

    /// Repair packets per FEC block (R)
    #[arg(long, default_value = "10")]
    nrp: usize,

    /// Packet length in milliseconds
    #[arg(long, default_value = "10")]
    packet_ms: u64,

    /// Interleave packet emission within each FEC block
    #[arg(long)]
    interleave: bool,

    /// Loop the file forever
    #[arg(long)]
    loop_audio: bool,

    /// Serve Prometheus metrics on this address, e.g. 127.0.0.1:9101
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

    let dest: Endpoint = args.dest.parse().context("bad media destination")?;
    let repair_dest: Option<Endpoint> = match &args.repair_dest {
        Some(uri) => Some(uri.parse().context("bad repair destination")?),
        None => None,
    };
    let control_dest: Option<Endpoint> = match &args.control_dest {
        Some(uri) => Some(uri.parse().context("bad control destination")?),
        None => None,
    };

    if dest.proto.is_repair() || matches!(dest.proto, Proto::Rtcp | Proto::Rtsp) {
        anyhow::bail!("media destination must carry a media protocol: {}", dest);
    }

    let scheme = dest.proto.fec_scheme();
    if let Some(repair) = &repair_dest {
        if !repair.proto.is_repair()
            || repair.proto.fec_scheme() != scheme
            || scheme == FecScheme::Disable
        {
            anyhow::bail!("repair destination {} does not match {}", repair, dest);
        }
    }
    if let Some(control) = &control_dest {
        if control.proto != Proto::Rtcp {
            anyhow::bail!("control destination must use rtcp: {}", control);
        }
    }

    let metrics = match &args.metrics_bind {
        Some(bind) => {
            let ctx = MetricsContext::new("sender")?;
            let bind = bind.parse().context("bad metrics bind address")?;
            ctx.spawn_metrics_server(MetricsServerConfig::new(bind));
            Some(ctx)
        }
        None => None,
    };

    let audio = read_wav(&args.input)?;
    info!(
        "streaming {} ({:.2}s at {}Hz/{}ch) to {}",
        args.input,
        audio.duration_secs(),
        audio.spec.rate,
        audio.spec.channels,
        dest
    );

    // SSRC comes from a secure random source, never a fixed constant.
    let ssrc: u32 = rand::thread_rng().gen();
    info!("session SSRC: {:#010x}", ssrc);

    let mut packetizer = Packetizer::new(
        audio.spec,
        Duration::from_millis(args.packet_ms),
        ssrc,
    )?;

    let mut fec_writer = FecWriter::new(
        FecWriterConfig {
            scheme,
            n_source_packets: args.nsp,
            n_repair_packets: args.nrp,
        },
        ssrc,
    )?;

    // Without --interleave the window is 1, which passes through.
    let depth = if args.interleave { args.nsp + args.nrp } else { 1 };
    let mut interleaver = Interleaver::new(depth);

    let mut rtp_sender = RtpSender::new(
        dest.socket_addr(),
        repair_dest.as_ref().map(|e| e.socket_addr()),
        fec_writer.fec_params(),
    )
    .await?;

    let control_addr = control_dest.as_ref().map(|e| e.socket_addr());

    sender::stream_audio(
        &audio,
        &mut packetizer,
        &mut fec_writer,
        &mut interleaver,
        &mut rtp_sender,
        control_addr.as_deref(),
        metrics.as_ref(),
        args.loop_audio,
    )
    .await
}
