//! Prometheus metrics (Rust `prometheus` crate).
//!
//! One `MetricsContext` is intended per process. Each binary owns its registry
//! and controls which metrics it reports.

use anyhow::{Context, Result};
use hyper::service::{make_service_fn, service_fn};
use hyper::{Body, Method, Request, Response, Server, StatusCode};
use prometheus::{
    Encoder, Histogram, HistogramOpts, IntCounter, IntGauge, Opts, Registry, TextEncoder,
};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

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
///
/// This is a thin, explicit wrapper around the `prometheus` crate so hot-path
/// instrumentation is just counter increments / histogram observations.
#[derive(Clone)]
pub struct MetricsContext {
    // ---
    registry: Registry,

    // Capture
    pub frames_captured_total: IntCounter,

    // Network counters
    pub packets_sent_total: IntCounter,
    pub bytes_sent_total: IntCounter,
    pub send_errors_total: IntCounter,

    pub packets_received_total: IntCounter,
    pub bytes_received_total: IntCounter,
    pub packets_malformed_total: IntCounter,
    pub receive_errors_total: IntCounter,
    pub output_errors_total: IntCounter,
    pub packets_lost_total: IntCounter,
    pub packets_reordered_total: IntCounter,

    // Peers with an open output file
    pub active_peers: IntGauge,

    // Latency histograms (seconds)
    pub encode_seconds: Histogram,
    pub decode_seconds: Histogram,
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

        let frames_captured_total = IntCounter::with_opts(Opts::new(
            "frames_captured_total",
            "Total PCM frames read from the capture source",
        ))?;

        let packets_sent_total = IntCounter::with_opts(Opts::new(
            "rtp_packets_sent_total",
            "Total RTP packets sent",
        ))?;
        let bytes_sent_total = IntCounter::with_opts(Opts::new(
            "rtp_bytes_sent_total",
            "Total RTP bytes sent, headers included",
        ))?;
        let send_errors_total = IntCounter::with_opts(Opts::new(
            "rtp_send_errors_total",
            "Total RTP datagrams that failed to send",
        ))?;

        let packets_received_total = IntCounter::with_opts(Opts::new(
            "rtp_packets_received_total",
            "Total valid RTP packets received",
        ))?;
        let bytes_received_total = IntCounter::with_opts(Opts::new(
            "rtp_bytes_received_total",
            "Total datagram bytes received",
        ))?;
        let packets_malformed_total = IntCounter::with_opts(Opts::new(
            "rtp_packets_malformed_total",
            "Total datagrams dropped because they failed RTP validation or overflowed the buffer",
        ))?;
        let receive_errors_total = IntCounter::with_opts(Opts::new(
            "rtp_receive_errors_total",
            "Total UDP socket read failures on the receiver",
        ))?;
        let output_errors_total = IntCounter::with_opts(Opts::new(
            "output_errors_total",
            "Total packets that could not be written to a peer's WAV file",
        ))?;
        let packets_lost_total = IntCounter::with_opts(Opts::new(
            "rtp_packets_lost_total",
            "Total RTP packets detected as lost from sequence gaps",
        ))?;
        let packets_reordered_total = IntCounter::with_opts(Opts::new(
            "rtp_packets_reordered_total",
            "Total RTP packets received out of order",
        ))?;

        let active_peers = IntGauge::with_opts(Opts::new(
            "active_peers",
            "Peers with an open output file",
        ))?;

        let encode_seconds = Histogram::with_opts(HistogramOpts::new(
            "encode_seconds",
            "Payload encode duration per frame in seconds",
        ))?;
        let decode_seconds = Histogram::with_opts(HistogramOpts::new(
            "decode_seconds",
            "Payload decode and append duration per packet in seconds",
        ))?;

        // Register all metrics
        registry.register(Box::new(frames_captured_total.clone()))?;
        registry.register(Box::new(packets_sent_total.clone()))?;
        registry.register(Box::new(bytes_sent_total.clone()))?;
        registry.register(Box::new(send_errors_total.clone()))?;
        registry.register(Box::new(packets_received_total.clone()))?;
        registry.register(Box::new(bytes_received_total.clone()))?;
        registry.register(Box::new(packets_malformed_total.clone()))?;
        registry.register(Box::new(receive_errors_total.clone()))?;
        registry.register(Box::new(output_errors_total.clone()))?;
        registry.register(Box::new(packets_lost_total.clone()))?;
        registry.register(Box::new(packets_reordered_total.clone()))?;
        registry.register(Box::new(active_peers.clone()))?;
        registry.register(Box::new(encode_seconds.clone()))?;
        registry.register(Box::new(decode_seconds.clone()))?;

        Ok(Self {
            registry,
            frames_captured_total,
            packets_sent_total,
            bytes_sent_total,
            send_errors_total,
            packets_received_total,
            bytes_received_total,
            packets_malformed_total,
            receive_errors_total,
            output_errors_total,
            packets_lost_total,
            packets_reordered_total,
            active_peers,
            encode_seconds,
            decode_seconds,
        })
    }

    /// Gather metric families from this registry.
    pub fn gather(&self) -> Vec<prometheus::proto::MetricFamily> {
        // ---
        self.registry.gather()
    }

    /// Renders the registry in the Prometheus text exposition format.
    pub fn encode_text(&self) -> Result<Vec<u8>> {
        // ---
        encode_registry(&self.registry)
    }

    /// Spawns a minimal HTTP server that serves `GET /metrics`.
    ///
    /// A bind failure is logged and ends the task; streaming carries on
    /// without a scrape endpoint.
    pub fn spawn_metrics_server(&self, cfg: MetricsServerConfig) -> JoinHandle<Result<()>> {
        // ---
        let registry = Arc::new(self.registry.clone());
        tokio::spawn(async move {
            // ---
            let builder = match Server::try_bind(&cfg.bind) {
                Ok(builder) => builder,
                Err(e) => {
                    warn!("Metrics endpoint disabled, cannot bind {}: {}", cfg.bind, e);
                    return Err(e).context("failed to bind metrics server");
                }
            };

            let make_svc = make_service_fn(move |_conn| {
                let registry = Arc::clone(&registry);
                async move {
                    Ok::<_, hyper::Error>(service_fn(move |req| {
                        let registry = Arc::clone(&registry);
                        async move { handle_metrics_request(req, registry).await }
                    }))
                }
            });

            info!("Serving metrics on http://{}/metrics", cfg.bind);
            if let Err(e) = builder.serve(make_svc).await {
                error!("Metrics server stopped: {}", e);
                return Err(e).context("metrics server failed");
            }
            Ok(())
        })
    }
}

fn encode_registry(registry: &Registry) -> Result<Vec<u8>> {
    // ---
    let mut buffer = Vec::new();
    TextEncoder::new()
        .encode(&registry.gather(), &mut buffer)
        .context("failed to encode metrics")?;
    Ok(buffer)
}

async fn handle_metrics_request(
    req: Request<Body>,
    registry: Arc<Registry>,
) -> Result<Response<Body>, hyper::Error> {
    // ---
    match (req.method(), req.uri().path()) {
        (&Method::GET, "/metrics") => match encode_registry(&registry) {
            Ok(buffer) => {
                let mut resp = Response::new(Body::from(buffer));
                resp.headers_mut().insert(
                    hyper::header::CONTENT_TYPE,
                    hyper::header::HeaderValue::from_static("text/plain; version=0.0.4"),
                );
                Ok(resp)
            }
            Err(e) => Ok(status_response(
                StatusCode::INTERNAL_SERVER_ERROR,
                format!("{e:#}"),
            )),
        },
        _ => Ok(status_response(StatusCode::NOT_FOUND, "not found".into())),
    }
}

fn status_response(status: StatusCode, body: String) -> Response<Body> {
    // ---
    let mut resp = Response::new(Body::from(body));
    *resp.status_mut() = status;
    resp
}
