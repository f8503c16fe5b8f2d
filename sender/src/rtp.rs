//! RTP packetization.
//!
//! Wraps each frame's payload chunks into RTP packets with a per-session
//! identity. Sequence numbers advance per packet; timestamps advance per
//! frame, so every fragment of a frame shares the frame's timestamp.

use rand::Rng;
use rtp_pcm_common::RtpPacket;

use crate::codec::EncodedFrame;

/// Per-session RTP identity, fixed for the life of the stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionIdentity {
    // ---
    /// Synchronization source identifier
    pub ssrc: u32,

    /// Sequence number of the first packet
    pub initial_sequence: u16,

    /// Timestamp of the first frame
    pub initial_timestamp: u32,
}

impl SessionIdentity {
    // ---
    /// Draws a random identity from `rng`.
    pub fn random<R: Rng + ?Sized>(rng: &mut R) -> Self {
        // ---
        Self {
            ssrc: rng.gen(),
            initial_sequence: rng.gen(),
            initial_timestamp: rng.gen(),
        }
    }
}

/// Stateful RTP packetizer for one outgoing stream.
///
/// # Example
///
/// ```
/// use rand::{rngs::StdRng, SeedableRng};
/// use sender::codec::EncodedFrame;
/// use sender::rtp::Packetizer;
///
/// let mut rng = StdRng::seed_from_u64(7);
/// let mut packetizer = Packetizer::new(96, &mut rng);
///
/// let frame = EncodedFrame { chunks: vec![vec![0; 1488], vec![0; 512]], samples: 960 };
/// let packets = packetizer.packetize(frame);
///
/// assert_eq!(packets.len(), 2);
/// assert_eq!(packets[0].timestamp, packets[1].timestamp);
/// assert_eq!(packets[1].sequence, packets[0].sequence.wrapping_add(1));
/// ```
#[derive(Debug, Clone)]
pub struct Packetizer {
    // ---
    payload_type: u8,
    identity: SessionIdentity,
    sequence: u16,
    timestamp: u32,
    packets_emitted: u64,
}

impl Packetizer {
    // ---
    /// Creates a packetizer with a random identity drawn from `rng`.
    pub fn new<R: Rng + ?Sized>(payload_type: u8, rng: &mut R) -> Self {
        // ---
        Self::with_identity(payload_type, SessionIdentity::random(rng))
    }

    /// Creates a packetizer with a fixed identity.
    pub fn with_identity(payload_type: u8, identity: SessionIdentity) -> Self {
        // ---
        Self {
            payload_type,
            identity,
            sequence: identity.initial_sequence,
            timestamp: identity.initial_timestamp,
            packets_emitted: 0,
        }
    }

    /// Session identity of this stream.
    pub fn identity(&self) -> SessionIdentity {
        // ---
        self.identity
    }

    /// Synchronization source identifier of this stream.
    pub fn ssrc(&self) -> u32 {
        // ---
        self.identity.ssrc
    }

    /// Sequence number the next packet will carry.
    pub fn next_sequence(&self) -> u16 {
        // ---
        self.sequence
    }

    /// Timestamp the next frame will carry.
    pub fn next_timestamp(&self) -> u32 {
        // ---
        self.timestamp
    }

    /// Total packets emitted.
    pub fn packets_emitted(&self) -> u64 {
        // ---
        self.packets_emitted
    }

    /// Emits one packet per chunk of `frame`.
    ///
    /// All packets carry the frame's timestamp; the last one has the
    /// marker bit set. The timestamp then advances by `frame.samples`,
    /// even for a frame with no chunks.
    pub fn packetize(&mut self, frame: EncodedFrame) -> Vec<RtpPacket> {
        // ---
        let count = frame.chunks.len();
        let mut packets = Vec::with_capacity(count);

        for (i, chunk) in frame.chunks.into_iter().enumerate() {
            let packet = RtpPacket::new(
                self.payload_type,
                self.sequence,
                self.timestamp,
                self.identity.ssrc,
                chunk,
            )
            .with_marker(i + 1 == count);

            packets.push(packet);
            self.sequence = self.sequence.wrapping_add(1);
        }

        self.packets_emitted += count as u64;
        self.timestamp = self.timestamp.wrapping_add(frame.samples);

        packets
    }
}
