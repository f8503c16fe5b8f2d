//! RTP PCM audio receiver - CLI binary.
//!
//! Receives RTP packets via UDP from any number of senders and writes
//! each sender's audio to its own WAV file.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use receiver::network::DEFAULT_BUFFER_SIZE;
use receiver::{receive_loop, OutputConfig, PeerTable, RtpReceiver, WavFormat};
use rtp_pcm_common::{init_tracing, Codec, ColorWhen, MetricsContext, MetricsServerConfig};

/// RTP PCM Receiver - Record incoming audio streams to WAV files
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    // ---
    /// Address to listen on
    #[arg(short, long, default_value = "0.0.0.0:6001")]
    listen: String,

    /// Directory for the per-sender WAV files
    #[arg(short, long, default_value = ".")]
    output_dir: PathBuf,

    /// Source sample rate of the senders (PCMU output is always 8000Hz)
    #[arg(long, default_value = "48000")]
    rate: u32,

    /// Source channel count of the senders (PCMU output is always mono)
    #[arg(long, default_value = "1")]
    channels: u16,

    /// Payload codec used by the senders (`l16` or `pcmu`)
    #[arg(short, long, default_value = "l16")]
    codec: Codec,

    /// Largest datagram accepted, in bytes
    #[arg(long, default_value_t = DEFAULT_BUFFER_SIZE)]
    buffer_size: usize,

    /// Prometheus metrics bind address (serves `GET /metrics`).
    #[arg(long, default_value = "127.0.0.1:9200")]
    metrics_bind: String,

    /// Coloring
    #[arg(long, value_enum, default_value = "auto")]
    color: ColorWhen,
}

/// Capture version number from Cargo.toml
const VERSION: &str = env!("CARGO_PKG_VERSION");

#[tokio::main]
async fn main() -> Result<()> {
    // ---
    let args = Args::parse();
    init_tracing(args.color)?;
    info!("Starting RTP PCM receiver v{VERSION}");
    info!("Listen address: {}", args.listen);
    info!("Output directory: {}", args.output_dir.display());
    info!("Metrics bind: {}", args.metrics_bind);

    let metrics = MetricsContext::new("receiver")?;
    let metrics_bind = args.metrics_bind.parse().context("invalid metrics bind")?;
    let _metrics_task = metrics.spawn_metrics_server(MetricsServerConfig::new(metrics_bind));

    let config = OutputConfig {
        directory: args.output_dir.clone(),
        format: WavFormat {
            sample_rate: args.rate,
            channels: args.channels,
            codec: args.codec,
        },
    };
    let wav_spec = config.format.wav_spec();
    info!(
        "Output format: {}Hz, {} channels, 16-bit, codec {}",
        wav_spec.sample_rate, wav_spec.channels, args.codec
    );
    let peers = Arc::new(
        PeerTable::new(config)
            .context("failed to prepare output directory")?
            .with_metrics(metrics.clone()),
    );
    let mut receiver = RtpReceiver::bind(args.listen.as_str(), args.buffer_size)
        .await
        .context("failed to create receiver")?
        .with_metrics(metrics.clone());

    info!("Ready to receive audio...");

    let shutdown = CancellationToken::new();
    let loop_peers = Arc::clone(&peers);
    let loop_shutdown = shutdown.clone();
    let mut receive_task = tokio::spawn(async move {
        receive_loop(&mut receiver, &loop_peers, loop_shutdown).await
    });

    let outcome = tokio::select! {
        result = &mut receive_task => result,
        signal = tokio::signal::ctrl_c() => {
            if let Err(e) = signal {
                warn!("Failed to listen for shutdown signal: {}", e);
            }
            info!("Received shutdown signal. Cleaning up...");
            shutdown.cancel();
            receive_task.await
        }
    };

    // Close every file even when the loop failed
    let finalized = peers.finalize_all();
    info!("Finalized {} WAV file(s)", finalized.len());

    match outcome {
        Ok(result) => result.context("receive loop failed")?,
        Err(e) => return Err(e).context("receive task failed"),
    }

    Ok(())
}
