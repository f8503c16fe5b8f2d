//! UDP network reception for RTP packets.
//!
//! Provides async UDP socket handling for receiving RTP packets
//! from any number of senders.

use std::net::SocketAddr;

use anyhow::{Context, Result};
use rtp_pcm_common::{MetricsContext, RtpPacket};
use tokio::net::{ToSocketAddrs, UdpSocket};
use tracing::{debug, info, warn};

/// Default receive buffer size; RTP datagrams stay under a 1500-byte MTU
pub const DEFAULT_BUFFER_SIZE: usize = 1600;

/// UDP receiver for RTP packet reception.
///
/// Wraps a tokio UDP socket, validates each datagram as RTP and reports
/// the sender's address with the parsed packet.
pub struct RtpReceiver {
    // ---
    socket: UdpSocket,
    buffer: Vec<u8>,
    packets_received: u64,
    bytes_received: u64,
    packets_dropped: u64,
    receive_errors: u64,

    /// Largest datagram accepted; the buffer holds one byte more so an
    /// oversized datagram is detected instead of silently truncated
    max_datagram: usize,

    metrics: Option<MetricsContext>,
}

impl RtpReceiver {
    // ---
    /// Creates a new RTP receiver bound to `addr`.
    ///
    /// # Arguments
    ///
    /// * `addr` - Address to listen on, e.g. `0.0.0.0:6001`
    /// * `buffer_size` - Largest datagram accepted; longer ones are dropped
    ///
    /// # Errors
    ///
    /// Returns error if socket binding fails.
    pub async fn bind<A: ToSocketAddrs + std::fmt::Debug>(
        addr: A,
        buffer_size: usize,
    ) -> Result<Self> {
        // ---
        let socket = UdpSocket::bind(&addr)
            .await
            .with_context(|| format!("failed to bind UDP socket to {:?}", addr))?;

        Self::from_socket(socket, buffer_size)
    }

    /// Wraps an already bound socket.
    ///
    /// # Errors
    ///
    /// Returns error if the socket's local address cannot be read.
    pub fn from_socket(socket: UdpSocket, buffer_size: usize) -> Result<Self> {
        // ---
        info!("Listening for RTP audio on {}", socket.local_addr()?);

        let max_datagram = buffer_size.max(1);
        Ok(Self {
            socket,
            buffer: vec![0u8; max_datagram + 1],
            packets_received: 0,
            bytes_received: 0,
            packets_dropped: 0,
            receive_errors: 0,
            max_datagram,
            metrics: None,
        })
    }

    /// Records received and malformed datagrams in `metrics`.
    pub fn with_metrics(mut self, metrics: MetricsContext) -> Self {
        // ---
        self.metrics = Some(metrics);
        self
    }

    /// Local address the socket is bound to.
    pub fn local_addr(&self) -> Result<SocketAddr> {
        // ---
        self.socket
            .local_addr()
            .context("failed to read local address")
    }

    /// Receives the next datagram and parses it as RTP.
    ///
    /// Blocks until a datagram arrives. Invalid and oversized datagrams
    /// are logged and counted as dropped.
    ///
    /// # Returns
    ///
    /// The sender's address and packet, or `None` if the datagram was not
    /// valid RTP.
    ///
    /// # Errors
    ///
    /// Returns error if reading from the socket fails. The error is
    /// counted; the socket stays usable for the next call.
    pub async fn receive(&mut self) -> Result<Option<(SocketAddr, RtpPacket)>> {
        // ---
        let (len, src) = match self.socket.recv_from(&mut self.buffer).await {
            Ok(received) => received,
            Err(e) => {
                self.receive_errors += 1;
                if let Some(metrics) = &self.metrics {
                    metrics.receive_errors_total.inc();
                }
                return Err(e).context("failed to receive UDP packet");
            }
        };

        self.bytes_received += len as u64;
        if let Some(metrics) = &self.metrics {
            metrics.bytes_received_total.inc_by(len as u64);
        }

        if len > self.max_datagram {
            self.drop_packet();
            warn!(
                "Dropped datagram from {}: larger than the {}-byte receive buffer",
                src, self.max_datagram
            );
            return Ok(None);
        }

        match RtpPacket::deserialize(&self.buffer[..len]) {
            Ok(packet) => {
                self.packets_received += 1;
                if let Some(metrics) = &self.metrics {
                    metrics.packets_received_total.inc();
                }

                if self.packets_received.is_multiple_of(500) {
                    debug!(
                        "Received {} packets ({} bytes, {} dropped) - last from {} seq={}",
                        self.packets_received,
                        self.bytes_received,
                        self.packets_dropped,
                        src,
                        packet.sequence
                    );
                }

                Ok(Some((src, packet)))
            }
            Err(e) => {
                self.drop_packet();
                warn!("Dropped invalid packet from {}: {}", src, e);
                Ok(None)
            }
        }
    }

    fn drop_packet(&mut self) {
        // ---
        self.packets_dropped += 1;
        if let Some(metrics) = &self.metrics {
            metrics.packets_malformed_total.inc();
        }
    }

    /// Socket read failures seen so far.
    pub fn receive_errors(&self) -> u64 {
        // ---
        self.receive_errors
    }

    /// Returns statistics about packets received.
    ///
    /// # Returns
    ///
    /// Tuple of (packets_received, bytes_received, packets_dropped)
    pub fn stats(&self) -> (u64, u64, u64) {
        // ---
        (
            self.packets_received,
            self.bytes_received,
            self.packets_dropped,
        )
    }
}
