//! RTP PCM Sender Library
//!
//! Captures raw PCM from a byte stream, encodes it as L16 or PCMU, and
//! streams it over RTP/UDP. The pipeline is driven by [`stream_audio`]:
//! frame source → payload encoder → packetizer → UDP sender.

pub mod capture;
pub mod codec;
pub mod network;
pub mod rtp;
pub mod source;

pub use capture::{CaptureCommand, CaptureProcess};
pub use codec::{EncodedFrame, PayloadEncoder};
pub use network::RtpSender;
pub use rtp::{Packetizer, SessionIdentity};
pub use rtp_pcm_common::RtpPacket;
pub use source::{AudioFormat, ByteOrder, FrameSource, PcmFrame};

use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use rtp_pcm_common::MetricsContext;
use tokio::io::AsyncRead;
use tracing::info;

/// Totals for a finished stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct StreamSummary {
    // ---
    /// Frames read from the source
    pub frames: u64,

    /// RTP packets emitted by the packetizer
    pub packets: u64,
}

/// Streams PCM frames over RTP until the source ends.
///
/// Each frame is encoded, split into packets and sent. Send failures are
/// absorbed by the sender so one dropped datagram never stops the stream.
/// When `pacing` is set the loop sleeps that long after each frame, which
/// plays file input back in real time; a live capture source paces itself.
///
/// # Arguments
///
/// * `source` - PCM frame source
/// * `encoder` - Payload encoder matching the source format
/// * `packetizer` - RTP packetizer owning the session identity
/// * `sender` - UDP sender
/// * `metrics` - Metrics to record frames and encode time in
/// * `pacing` - Optional delay between frames
///
/// # Errors
///
/// Returns error if the source fails with anything other than end of
/// stream, or a frame cannot be encoded.
pub async fn stream_audio<R: AsyncRead + Unpin>(
    source: &mut FrameSource<R>,
    encoder: &mut PayloadEncoder,
    packetizer: &mut Packetizer,
    sender: &mut RtpSender,
    metrics: &MetricsContext,
    pacing: Option<Duration>,
) -> Result<StreamSummary> {
    // ---
    let mut summary = StreamSummary::default();

    while let Some(frame) = source.next_frame().await? {
        metrics.frames_captured_total.inc();

        let started = Instant::now();
        let encoded = encoder
            .encode(&frame)
            .with_context(|| format!("failed to encode frame {}", summary.frames))?;
        metrics
            .encode_seconds
            .observe(started.elapsed().as_secs_f64());

        for packet in packetizer.packetize(encoded) {
            sender.send(&packet).await;
            summary.packets += 1;
        }
        summary.frames += 1;

        if let Some(delay) = pacing {
            tokio::time::sleep(delay).await;
        }
    }

    info!(
        "Audio stream ended: {} frames, {} packets",
        summary.frames, summary.packets
    );
    Ok(summary)
}

#[cfg(test)]
mod tests {
    // ---
    use super::*;
    use rtp_pcm_common::Codec;
    use tokio::net::UdpSocket;

    #[tokio::test]
    async fn test_stream_audio_counts_frames_and_fragments() {
        // ---
        let listener = UdpSocket::bind("127.0.0.1:0").await.expect("bind failed");
        let target = listener.local_addr().expect("local addr").to_string();

        // Stereo 48kHz L16 fragments into 3 packets per frame
        let format = AudioFormat::new(48000, 2, ByteOrder::BigEndian);
        let pcm = vec![0u8; format.frame_bytes() * 4 + 10];
        let mut source = FrameSource::new(pcm.as_slice(), format).expect("valid format");
        let mut encoder =
            PayloadEncoder::new(Codec::L16, format, codec::DEFAULT_MTU).expect("encoder");
        let mut packetizer = Packetizer::with_identity(
            Codec::L16.payload_type(),
            SessionIdentity {
                ssrc: 1,
                initial_sequence: 0,
                initial_timestamp: 0,
            },
        );
        let mut sender = RtpSender::new(&target).await.expect("sender");
        let metrics = MetricsContext::new("test").expect("metrics");

        let summary = stream_audio(
            &mut source,
            &mut encoder,
            &mut packetizer,
            &mut sender,
            &metrics,
            None,
        )
        .await
        .expect("stream failed");

        assert_eq!(summary, StreamSummary { frames: 4, packets: 12 });
        assert_eq!(packetizer.next_sequence(), 12);
        assert_eq!(packetizer.next_timestamp(), 4 * 960);
        assert_eq!(metrics.frames_captured_total.get(), 4);
    }
}
