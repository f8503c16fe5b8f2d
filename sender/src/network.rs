//! UDP network transmission for RTP packets.
//!
//! Provides async UDP socket handling for sending RTP packets
//! to the receiver. RTP over UDP is best effort: failed sends are
//! logged and counted, never retried.

use std::net::SocketAddr;

use anyhow::{Context, Result};
use rtp_pcm_common::{MetricsContext, RtpPacket};
use tokio::net::{lookup_host, UdpSocket};
use tracing::{debug, error, info};

/// UDP sender for RTP packet transmission.
///
/// The destination is resolved once at construction and the socket is
/// connected to it, so each send is a single datagram write.
///
/// # Example
///
/// ```no_run
/// use sender::network::RtpSender;
///
/// # async fn run() -> anyhow::Result<()> {
/// let sender = RtpSender::new("127.0.0.1:6001").await?;
/// println!("sending to {}", sender.remote_addr());
/// # Ok(())
/// # }
/// ```
pub struct RtpSender {
    // ---
    socket: UdpSocket,
    remote_addr: SocketAddr,
    packets_sent: u64,
    bytes_sent: u64,
    send_errors: u64,

    /// Whether the next failure should be logged at error level
    report_next_error: bool,

    metrics: Option<MetricsContext>,
}

impl RtpSender {
    // ---
    /// Creates a new RTP sender bound to any available port.
    ///
    /// # Arguments
    ///
    /// * `remote` - Destination in "host:port" format; resolved once
    ///
    /// # Errors
    ///
    /// Returns error if the destination cannot be resolved or the socket
    /// cannot be bound or connected.
    pub async fn new(remote: &str) -> Result<Self> {
        // ---
        let remote_addr = lookup_host(remote)
            .await
            .with_context(|| format!("failed to resolve destination: {}", remote))?
            .next()
            .with_context(|| format!("destination resolved to no addresses: {}", remote))?;

        let bind_addr = if remote_addr.is_ipv4() {
            "0.0.0.0:0"
        } else {
            "[::]:0"
        };

        let socket = UdpSocket::bind(bind_addr)
            .await
            .context("failed to bind UDP socket")?;
        socket
            .connect(remote_addr)
            .await
            .with_context(|| format!("failed to connect UDP socket to {}", remote_addr))?;

        info!(
            "UDP socket bound to {} -> {}",
            socket.local_addr()?,
            remote_addr
        );

        Ok(Self {
            socket,
            remote_addr,
            packets_sent: 0,
            bytes_sent: 0,
            send_errors: 0,
            report_next_error: true,
            metrics: None,
        })
    }

    /// Records sends and failures in `metrics`.
    pub fn with_metrics(mut self, metrics: MetricsContext) -> Self {
        // ---
        self.metrics = Some(metrics);
        self
    }

    /// Resolved destination address.
    pub fn remote_addr(&self) -> SocketAddr {
        // ---
        self.remote_addr
    }

    /// Local address of the sending socket.
    pub fn local_addr(&self) -> Result<SocketAddr> {
        // ---
        self.socket
            .local_addr()
            .context("failed to read local address")
    }

    /// Sends an RTP packet as one datagram.
    ///
    /// Returns whether the datagram was written. A failure is logged at
    /// error level once; further consecutive failures are logged at debug
    /// level until a send succeeds again. A dropped packet never stops the
    /// stream.
    pub async fn send(&mut self, packet: &RtpPacket) -> bool {
        // ---
        let data = packet.serialize();

        match self.socket.send(&data).await {
            Ok(bytes) => {
                self.packets_sent += 1;
                self.bytes_sent += bytes as u64;
                self.report_next_error = true;

                if let Some(metrics) = &self.metrics {
                    metrics.packets_sent_total.inc();
                    metrics.bytes_sent_total.inc_by(bytes as u64);
                }

                if self.packets_sent.is_multiple_of(500) {
                    debug!(
                        "Sent {} packets ({} bytes) - seq={}",
                        self.packets_sent, self.bytes_sent, packet.sequence
                    );
                }
                true
            }
            Err(e) => {
                self.send_errors += 1;
                if let Some(metrics) = &self.metrics {
                    metrics.send_errors_total.inc();
                }

                if self.report_next_error {
                    error!(
                        "Failed to send RTP packet seq={} to {}: {}",
                        packet.sequence, self.remote_addr, e
                    );
                    self.report_next_error = false;
                } else {
                    debug!("Send failed again seq={}: {}", packet.sequence, e);
                }
                false
            }
        }
    }

    /// Returns (packets_sent, bytes_sent, send_errors).
    pub fn stats(&self) -> (u64, u64, u64) {
        // ---
        (self.packets_sent, self.bytes_sent, self.send_errors)
    }
}
