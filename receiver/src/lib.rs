//! RTP PCM Receiver Library
//!
//! Receives RTP audio from any number of senders on one UDP socket and
//! reconstructs each sender's stream into its own WAV file. The pipeline
//! is driven by [`receive_loop`]; [`PeerTable::finalize_all`] closes the
//! files on shutdown.

pub mod codec;
pub mod network;
pub mod peer;
pub mod stats;

pub use codec::PayloadDecoder;
pub use network::RtpReceiver;
pub use peer::{FinalizedPeer, OutputConfig, PeerContext, PeerTable, WavFormat};
pub use rtp_pcm_common::RtpPacket;
pub use stats::{Arrival, PeerStats};

use std::time::Duration;

use anyhow::Result;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// Pause after a socket read failure so a persistent fault cannot spin
pub const RECEIVE_ERROR_BACKOFF: Duration = Duration::from_millis(10);

/// Runs the receive loop until `shutdown` is cancelled.
///
/// Each valid packet is routed to its sender's output. Malformed
/// datagrams, socket read failures and per-peer write failures are logged
/// and skipped, so one bad sender never stops the others. Only
/// cancellation ends the loop.
///
/// # Arguments
///
/// * `receiver` - Bound network receiver
/// * `peers` - Peer table owning the output files
/// * `shutdown` - Cancelled to stop the loop
///
/// # Returns
///
/// `Ok` once `shutdown` is cancelled.
pub async fn receive_loop(
    receiver: &mut RtpReceiver,
    peers: &PeerTable,
    shutdown: CancellationToken,
) -> Result<()> {
    // ---
    loop {
        let received = tokio::select! {
            _ = shutdown.cancelled() => break,
            received = receiver.receive() => received,
        };

        let received = match received {
            Ok(received) => received,
            Err(e) => {
                warn!("Receive failed, continuing: {:#}", e);
                tokio::select! {
                    _ = shutdown.cancelled() => break,
                    _ = tokio::time::sleep(RECEIVE_ERROR_BACKOFF) => {}
                }
                continue;
            }
        };

        // Invalid datagram, already logged by the receiver
        let Some((addr, packet)) = received else {
            continue;
        };

        if let Err(e) = peers.handle_packet(addr, &packet) {
            warn!(
                "Failed to handle packet seq={} from {}: {:#}",
                packet.sequence, addr, e
            );
        }
    }

    let (packets, bytes, dropped) = receiver.stats();
    info!(
        "Receive loop stopped: {} packets, {} bytes, {} dropped, {} receive errors",
        packets,
        bytes,
        dropped,
        receiver.receive_errors()
    );
    Ok(())
}
