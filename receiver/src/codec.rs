//! Payload decoding.
//!
//! Converts RTP payloads back to linear 16-bit samples. The codec is
//! configured out of band and must match the sender's.

use rtp_pcm_common::{g711, Codec};

/// Decoder from RTP payload bytes to PCM samples.
#[derive(Debug, Clone, Copy)]
pub struct PayloadDecoder {
    // ---
    codec: Codec,
}

impl PayloadDecoder {
    // ---
    pub fn new(codec: Codec) -> Self {
        // ---
        Self { codec }
    }

    /// Configured codec.
    pub fn codec(&self) -> Codec {
        // ---
        self.codec
    }

    /// Decodes a payload into interleaved samples.
    ///
    /// L16 payloads are read as big-endian pairs; a trailing odd byte
    /// cannot form a sample and is ignored. PCMU payloads expand one
    /// sample per byte.
    pub fn decode(&self, payload: &[u8]) -> Vec<i16> {
        // ---
        match self.codec {
            Codec::L16 => payload
                .chunks_exact(2)
                .map(|b| i16::from_be_bytes([b[0], b[1]]))
                .collect(),
            Codec::Pcmu => g711::decode(payload),
        }
    }
}
