//! Payload encoding.
//!
//! Turns a raw PCM frame into wire payload chunks for one of the two
//! supported codecs:
//!
//! - **L16**: 16-bit big-endian PCM, passed through at the source rate
//!   and channel count.
//! - **PCMU**: G.711 μ-law at 8kHz mono. The first channel is decimated
//!   by keeping one of every `floor(rate / 8000)` samples. This is naive
//!   decimation without a low-pass filter, so content above 4kHz aliases.
//!
//! Payloads larger than the MTU are split into chunks that never divide
//! a sample.

use anyhow::Result;
use rtp_pcm_common::codec::PCMU_CLOCK_RATE;
use rtp_pcm_common::{g711, Codec, RTP_HEADER_SIZE};

use crate::source::{AudioFormat, ByteOrder, PcmFrame};

/// Default maximum datagram size, RTP header included
pub const DEFAULT_MTU: usize = 1500;

/// One frame's encoded payload, ready for packetization.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncodedFrame {
    // ---
    /// Payload chunks in emission order
    pub chunks: Vec<Vec<u8>>,

    /// Encoded samples per channel, in RTP clock units
    pub samples: u32,
}

/// Encoder from source PCM frames to RTP payload chunks.
///
/// Selected once at session start; the source format is fixed for the
/// life of the encoder.
///
/// # Example
///
/// ```
/// use rtp_pcm_common::Codec;
/// use sender::codec::PayloadEncoder;
/// use sender::source::{AudioFormat, ByteOrder, PcmFrame};
///
/// let format = AudioFormat::new(48000, 1, ByteOrder::BigEndian);
/// let mut encoder = PayloadEncoder::new(Codec::Pcmu, format, 1500).unwrap();
///
/// let frame = PcmFrame { data: vec![0u8; format.frame_bytes()], format };
/// let encoded = encoder.encode(&frame).unwrap();
///
/// // 960 samples at 48kHz decimate to 160 samples at 8kHz
/// assert_eq!(encoded.samples, 160);
/// assert_eq!(encoded.chunks[0].len(), 160);
/// ```
#[derive(Debug, Clone)]
pub struct PayloadEncoder {
    // ---
    codec: Codec,
    format: AudioFormat,

    /// Largest payload per packet, a whole number of samples
    max_chunk: usize,

    /// Keep one of every `decimation` samples (PCMU only)
    decimation: usize,

    /// Position within the decimation cycle, carried across frames
    phase: usize,
}

impl PayloadEncoder {
    // ---
    /// Creates an encoder for `codec` from a source in `format`.
    ///
    /// `mtu` bounds the whole datagram, so each chunk holds at most
    /// `mtu - 12` bytes.
    ///
    /// # Errors
    ///
    /// Returns error if:
    /// - The source format is invalid
    /// - The MTU cannot carry a single sample after the RTP header
    /// - PCMU is requested from a source slower than 8kHz
    pub fn new(codec: Codec, format: AudioFormat, mtu: usize) -> Result<Self> {
        // ---
        format.validate()?;

        let sample_bytes = Self::sample_bytes(codec, format);
        let max_payload = mtu.saturating_sub(RTP_HEADER_SIZE);
        if max_payload < sample_bytes {
            anyhow::bail!(
                "MTU of {} bytes leaves no room for a {}-byte sample after the RTP header",
                mtu,
                sample_bytes
            );
        }
        let max_chunk = max_payload - max_payload % sample_bytes;

        let decimation = match codec {
            Codec::L16 => 1,
            Codec::Pcmu => {
                let factor = (format.sample_rate / PCMU_CLOCK_RATE) as usize;
                if factor == 0 {
                    anyhow::bail!(
                        "PCMU needs a source rate of at least {}Hz, got {}Hz",
                        PCMU_CLOCK_RATE,
                        format.sample_rate
                    );
                }
                factor
            }
        };

        Ok(Self {
            codec,
            format,
            max_chunk,
            decimation,
            phase: 0,
        })
    }

    /// Wire codec of this encoder.
    pub fn codec(&self) -> Codec {
        // ---
        self.codec
    }

    /// Largest chunk this encoder emits.
    pub fn max_chunk(&self) -> usize {
        // ---
        self.max_chunk
    }

    /// Decimation factor applied before μ-law compression.
    pub fn decimation(&self) -> usize {
        // ---
        self.decimation
    }

    /// Encodes one frame into payload chunks.
    ///
    /// # Errors
    ///
    /// Returns error if the frame's format differs from the encoder's.
    pub fn encode(&mut self, frame: &PcmFrame) -> Result<EncodedFrame> {
        // ---
        if frame.format != self.format {
            anyhow::bail!(
                "frame format {:?} does not match encoder format {:?}",
                frame.format,
                self.format
            );
        }

        let (payload, samples) = match self.codec {
            Codec::L16 => (self.encode_l16(frame), frame.samples_per_channel()),
            Codec::Pcmu => {
                let payload = self.encode_pcmu(frame);
                let samples = payload.len();
                (payload, samples)
            }
        };

        let sample_bytes = Self::sample_bytes(self.codec, self.format);
        Ok(EncodedFrame {
            chunks: chunk_payload(&payload, self.max_chunk, sample_bytes),
            samples: samples as u32,
        })
    }

    fn encode_l16(&self, frame: &PcmFrame) -> Vec<u8> {
        // ---
        match self.format.byte_order {
            ByteOrder::BigEndian => frame.data.clone(),
            ByteOrder::LittleEndian => frame
                .data
                .chunks_exact(2)
                .flat_map(|b| [b[1], b[0]])
                .collect(),
        }
    }

    fn encode_pcmu(&mut self, frame: &PcmFrame) -> Vec<u8> {
        // ---
        let channels = self.format.channels as usize;
        let samples = frame.samples();
        let mut out = Vec::with_capacity(samples.len() / channels / self.decimation + 1);

        // First channel only; the others are discarded.
        for &sample in samples.iter().step_by(channels) {
            if self.phase == 0 {
                out.push(g711::linear_to_ulaw(sample));
            }
            self.phase = (self.phase + 1) % self.decimation;
        }

        out
    }

    fn sample_bytes(codec: Codec, format: AudioFormat) -> usize {
        // ---
        codec.bytes_per_sample() * codec.wire_channels(format.channels) as usize
    }
}

/// Splits `payload` into ordered chunks of at most `max_chunk` bytes.
///
/// Chunk boundaries fall on multiples of `sample_bytes`, so no sample is
/// split across packets. Concatenating the chunks yields `payload`.
pub fn chunk_payload(payload: &[u8], max_chunk: usize, sample_bytes: usize) -> Vec<Vec<u8>> {
    // ---
    let sample_bytes = sample_bytes.max(1);
    let chunk_size = (max_chunk - max_chunk % sample_bytes).max(sample_bytes);

    payload.chunks(chunk_size).map(<[u8]>::to_vec).collect()
}
