//! Codec descriptors shared by sender, receiver and session description.

use std::fmt;
use std::str::FromStr;

/// Dynamic payload type used for L16
pub const PAYLOAD_TYPE_L16: u8 = 96;

/// Static payload type for PCMU (RFC 3551)
pub const PAYLOAD_TYPE_PCMU: u8 = 0;

/// RTP clock rate for PCMU
pub const PCMU_CLOCK_RATE: u32 = 8000;

/// Frame duration in milliseconds
pub const FRAME_DURATION_MS: u32 = 20;

/// Frames per second at the fixed frame duration
pub const FRAMES_PER_SECOND: u32 = 1000 / FRAME_DURATION_MS;

/// Wire encoding of an RTP audio session.
///
/// Fixed per session; both ends must agree out of band.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Codec {
    /// Linear 16-bit big-endian PCM at the source rate and channel count
    L16,

    /// G.711 μ-law, 8 kHz mono
    Pcmu,
}

impl Codec {
    // ---
    /// RTP payload type carried in every packet.
    pub fn payload_type(self) -> u8 {
        // ---
        match self {
            Codec::L16 => PAYLOAD_TYPE_L16,
            Codec::Pcmu => PAYLOAD_TYPE_PCMU,
        }
    }

    /// Encoding name as used in an SDP `rtpmap` attribute.
    pub fn encoding_name(self) -> &'static str {
        // ---
        match self {
            Codec::L16 => "L16",
            Codec::Pcmu => "PCMU",
        }
    }

    /// RTP clock rate for a source captured at `source_rate`.
    pub fn clock_rate(self, source_rate: u32) -> u32 {
        // ---
        match self {
            Codec::L16 => source_rate,
            Codec::Pcmu => PCMU_CLOCK_RATE,
        }
    }

    /// Channels carried on the wire for a source with `source_channels`.
    pub fn wire_channels(self, source_channels: u16) -> u16 {
        // ---
        match self {
            Codec::L16 => source_channels,
            Codec::Pcmu => 1,
        }
    }

    /// Bytes per encoded sample, per channel.
    pub fn bytes_per_sample(self) -> usize {
        // ---
        match self {
            Codec::L16 => 2,
            Codec::Pcmu => 1,
        }
    }
}

impl fmt::Display for Codec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.encoding_name())
    }
}

impl FromStr for Codec {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        // ---
        match s.to_ascii_lowercase().as_str() {
            "l16" | "pcm" => Ok(Codec::L16),
            "pcmu" | "ulaw" | "mulaw" => Ok(Codec::Pcmu),
            other => anyhow::bail!("unknown codec: {}", other),
        }
    }
}
