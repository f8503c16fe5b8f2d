//! RTP PCM audio sender - CLI binary.
//!
//! Captures raw PCM from a recorder process (or a file / stdin), encodes
//! it as L16 or PCMU, packetizes into RTP, and transmits via UDP.

use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use tokio::io::AsyncRead;
use tracing::{info, warn};

use rtp_pcm_common::codec::FRAME_DURATION_MS;
use rtp_pcm_common::{
    init_tracing, Codec, ColorWhen, MetricsContext, MetricsServerConfig, SessionDescription,
};
use sender::capture::DEFAULT_CAPTURE_PROGRAM;
use sender::codec::DEFAULT_MTU;
use sender::{
    stream_audio, AudioFormat, ByteOrder, CaptureCommand, CaptureProcess, FrameSource,
    Packetizer, PayloadEncoder, RtpSender,
};

/// RTP PCM Sender - Stream captured audio over RTP
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    // ---
    /// Remote address (host:port) to send to
    #[arg(short, long, default_value = "127.0.0.1:6001")]
    remote: String,

    /// Read raw PCM from a file (or `-` for stdin) instead of spawning a recorder
    #[arg(short, long)]
    input: Option<PathBuf>,

    /// Capture device passed to the recorder, e.g. `my-sink.monitor`
    #[arg(short, long)]
    device: Option<String>,

    /// Recorder program producing raw PCM on stdout
    #[arg(long, default_value = DEFAULT_CAPTURE_PROGRAM)]
    capture_program: String,

    /// Source sample rate in Hz
    #[arg(long, default_value = "48000")]
    rate: u32,

    /// Source channel count; the receiver writes mono files by default
    #[arg(long, default_value = "1")]
    channels: u16,

    /// Source byte order (`be` or `le`)
    #[arg(long, default_value = "be")]
    byte_order: ByteOrder,

    /// Wire codec (`l16` or `pcmu`)
    #[arg(short, long, default_value = "l16")]
    codec: Codec,

    /// Maximum datagram size in bytes, RTP header included
    #[arg(long, default_value_t = DEFAULT_MTU)]
    mtu: usize,

    /// Pace file input at real time (default). Use `--no-pace` to send as fast as possible.
    #[arg(long = "no-pace", default_value_t = true, action = clap::ArgAction::SetFalse)]
    pace: bool,

    /// Write a session description (SDP) for this stream to the given path
    #[arg(long)]
    sdp: Option<PathBuf>,

    /// Prometheus metrics bind address (serves `GET /metrics`).
    #[arg(long, default_value = "127.0.0.1:9100")]
    metrics_bind: String,

    /// Coloring
    #[arg(long, value_enum, default_value = "auto")]
    color: ColorWhen,
}

/// Capture version number from Cargo.toml
const VERSION: &str = env!("CARGO_PKG_VERSION");

type ByteStream = Box<dyn AsyncRead + Unpin + Send>;

#[tokio::main]
async fn main() -> Result<()> {
    // ---
    let args = Args::parse();

    init_tracing(args.color)?;

    info!("Starting RTP PCM sender v{VERSION}");
    info!("Remote address: {}", args.remote);
    info!(
        "Source format: {}Hz, {} channels, {:?}",
        args.rate, args.channels, args.byte_order
    );
    info!("Codec: {}", args.codec);
    info!("MTU: {} bytes", args.mtu);
    info!("Metrics bind: {}", args.metrics_bind);

    let metrics = MetricsContext::new("sender")?;
    let metrics_bind = args.metrics_bind.parse().context("invalid metrics bind")?;
    let _metrics_task = metrics.spawn_metrics_server(MetricsServerConfig::new(metrics_bind));

    let format = AudioFormat::new(args.rate, args.channels, args.byte_order);
    let mut encoder =
        PayloadEncoder::new(args.codec, format, args.mtu).context("invalid encoder settings")?;
    let mut sender = RtpSender::new(&args.remote)
        .await
        .context("failed to create sender")?
        .with_metrics(metrics.clone());
    let mut packetizer = Packetizer::new(args.codec.payload_type(), &mut rand::thread_rng());
    info!("Session SSRC: 0x{:08X}", packetizer.ssrc());

    if let Some(path) = &args.sdp {
        let description = SessionDescription {
            session_name: "rtp-pcm-streamer".to_string(),
            destination: sender.remote_addr(),
            codec: args.codec,
            sample_rate: args.rate,
            channels: args.channels,
            ssrc: Some(packetizer.ssrc()),
        };
        description.write_to(path)?;
        info!("Session description written to {}", path.display());
    }

    // Open the byte stream: file, stdin, or a spawned recorder
    let mut capture = None;
    let mut pacing = None;
    let stream: ByteStream = match &args.input {
        Some(path) if path.as_os_str() == "-" => {
            info!("Reading PCM from stdin");
            Box::new(tokio::io::stdin())
        }
        Some(path) => {
            info!("Reading PCM from {}", path.display());
            if args.pace {
                pacing = Some(Duration::from_millis(FRAME_DURATION_MS as u64));
            }
            let file = tokio::fs::File::open(path)
                .await
                .with_context(|| format!("failed to open input: {}", path.display()))?;
            Box::new(file)
        }
        None => {
            let command =
                CaptureCommand::recorder(&args.capture_program, format, args.device.as_deref());
            let (process, stdout) = CaptureProcess::spawn(&command)?;
            capture = Some(process);
            Box::new(stdout)
        }
    };

    let mut source = FrameSource::new(stream, format)?;

    info!("Streaming {} audio to {}", args.codec, sender.remote_addr());
    let stream_metrics = metrics.clone();
    let mut stream_task = tokio::spawn(async move {
        let summary = stream_audio(
            &mut source,
            &mut encoder,
            &mut packetizer,
            &mut sender,
            &stream_metrics,
            pacing,
        )
        .await?;
        Ok::<_, anyhow::Error>((summary, sender.stats()))
    });

    let outcome = tokio::select! {
        result = &mut stream_task => result,
        signal = tokio::signal::ctrl_c() => {
            if let Err(e) = signal {
                warn!("Failed to listen for shutdown signal: {}", e);
            }
            info!("Received shutdown signal. Cleaning up...");

            // Killing the recorder closes its pipe and ends the stream task
            // at the next read; other inputs are stopped directly.
            match capture.take() {
                Some(mut process) => process.kill().await,
                None => stream_task.abort(),
            }
            stream_task.await
        }
    };

    if let Some(mut process) = capture.take() {
        process.kill().await;
    }

    match outcome {
        Ok(result) => {
            let (summary, (packets, bytes, errors)) = result?;
            info!(
                "Transmission complete: {} frames, {} packets, {} bytes, {} send errors",
                summary.frames, packets, bytes, errors
            );
        }
        Err(e) if e.is_cancelled() => info!("Transmission stopped"),
        Err(e) => return Err(e).context("streaming task failed"),
    }

    Ok(())
}
