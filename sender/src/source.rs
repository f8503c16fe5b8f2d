//! PCM frame source.
//!
//! Slices a raw byte stream of interleaved 16-bit samples into fixed
//! 20ms frames. The stream is any `AsyncRead`: the stdout of a capture
//! process, a file, stdin, or an in-memory buffer in tests.

use std::io::ErrorKind;
use std::str::FromStr;

use anyhow::{Context, Result};
use rtp_pcm_common::codec::FRAMES_PER_SECOND;
use tokio::io::{AsyncRead, AsyncReadExt};
use tracing::debug;

/// Bytes per sample (16-bit PCM)
pub const BYTES_PER_SAMPLE: usize = 2;

/// Byte order of samples in the source stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ByteOrder {
    /// Network order, as produced by `parec --format=s16be`
    #[default]
    BigEndian,

    LittleEndian,
}

impl FromStr for ByteOrder {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        // ---
        match s.to_ascii_lowercase().as_str() {
            "be" | "s16be" | "big" => Ok(ByteOrder::BigEndian),
            "le" | "s16le" | "little" => Ok(ByteOrder::LittleEndian),
            other => anyhow::bail!("unknown byte order: {}", other),
        }
    }
}

/// Format of the raw PCM stream, agreed with the capture process.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AudioFormat {
    // ---
    /// Samples per second, per channel
    pub sample_rate: u32,

    /// Interleaved channel count
    pub channels: u16,

    /// Byte order of each 16-bit sample
    pub byte_order: ByteOrder,
}

impl AudioFormat {
    // ---
    pub fn new(sample_rate: u32, channels: u16, byte_order: ByteOrder) -> Self {
        // ---
        Self {
            sample_rate,
            channels,
            byte_order,
        }
    }

    /// Samples per channel in one 20ms frame.
    pub fn samples_per_frame(&self) -> usize {
        // ---
        (self.sample_rate / FRAMES_PER_SECOND) as usize
    }

    /// Bytes in one interleaved sample frame (all channels).
    pub fn bytes_per_sample_frame(&self) -> usize {
        // ---
        self.channels as usize * BYTES_PER_SAMPLE
    }

    /// Bytes in one 20ms frame.
    pub fn frame_bytes(&self) -> usize {
        // ---
        self.samples_per_frame() * self.bytes_per_sample_frame()
    }

    /// Checks the format can produce non-empty frames.
    pub fn validate(&self) -> Result<()> {
        // ---
        if self.channels == 0 {
            anyhow::bail!("channel count must be at least 1");
        }
        if self.samples_per_frame() == 0 {
            anyhow::bail!(
                "sample rate {}Hz is too low for {}ms frames",
                self.sample_rate,
                1000 / FRAMES_PER_SECOND
            );
        }
        Ok(())
    }

    /// Decodes one 16-bit sample from two bytes in this format's byte order.
    pub fn decode_sample(&self, bytes: [u8; 2]) -> i16 {
        // ---
        match self.byte_order {
            ByteOrder::BigEndian => i16::from_be_bytes(bytes),
            ByteOrder::LittleEndian => i16::from_le_bytes(bytes),
        }
    }
}

/// One 20ms slice of interleaved PCM.
#[derive(Debug, Clone)]
pub struct PcmFrame {
    // ---
    /// Raw bytes as read from the source
    pub data: Vec<u8>,

    /// Format of `data`
    pub format: AudioFormat,
}

impl PcmFrame {
    // ---
    /// Samples per channel in this frame.
    pub fn samples_per_channel(&self) -> usize {
        // ---
        self.data.len() / self.format.bytes_per_sample_frame()
    }

    /// Interleaved samples decoded from the source byte order.
    pub fn samples(&self) -> Vec<i16> {
        // ---
        self.data
            .chunks_exact(BYTES_PER_SAMPLE)
            .map(|b| self.format.decode_sample([b[0], b[1]]))
            .collect()
    }
}

/// Reads fixed-size PCM frames from a byte stream.
///
/// # Example
///
/// ```
/// use sender::source::{AudioFormat, ByteOrder, FrameSource};
///
/// # #[tokio::main]
/// # async fn main() -> anyhow::Result<()> {
/// let format = AudioFormat::new(8000, 1, ByteOrder::BigEndian);
/// let pcm = vec![0u8; format.frame_bytes() * 2];
/// let mut source = FrameSource::new(pcm.as_slice(), format)?;
///
/// assert!(source.next_frame().await?.is_some());
/// assert!(source.next_frame().await?.is_some());
/// assert!(source.next_frame().await?.is_none());
/// # Ok(())
/// # }
/// ```
pub struct FrameSource<R> {
    // ---
    reader: R,
    format: AudioFormat,
    frames_read: u64,
}

impl<R: AsyncRead + Unpin> FrameSource<R> {
    // ---
    /// Creates a frame source over `reader`.
    ///
    /// # Errors
    ///
    /// Returns error if the format cannot produce a non-empty frame.
    pub fn new(reader: R, format: AudioFormat) -> Result<Self> {
        // ---
        format.validate()?;

        Ok(Self {
            reader,
            format,
            frames_read: 0,
        })
    }

    /// Format of the frames this source yields.
    pub fn format(&self) -> AudioFormat {
        // ---
        self.format
    }

    /// Frames read so far.
    pub fn frames_read(&self) -> u64 {
        // ---
        self.frames_read
    }

    /// Reads the next full frame.
    ///
    /// Waits until a whole frame's bytes are available. Returns `Ok(None)`
    /// when the stream ends, including when it ends part-way through a
    /// frame; the partial frame is discarded.
    ///
    /// # Errors
    ///
    /// Returns error on any read fault other than end of stream.
    pub async fn next_frame(&mut self) -> Result<Option<PcmFrame>> {
        // ---
        let mut data = vec![0u8; self.format.frame_bytes()];

        match self.reader.read_exact(&mut data).await {
            Ok(_) => {
                self.frames_read += 1;
                Ok(Some(PcmFrame {
                    data,
                    format: self.format,
                }))
            }
            Err(e) if e.kind() == ErrorKind::UnexpectedEof => {
                debug!(
                    "Audio stream ended after {} frames (partial frame discarded)",
                    self.frames_read
                );
                Ok(None)
            }
            Err(e) => Err(e).context("failed to read PCM frame"),
        }
    }
}
