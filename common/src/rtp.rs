//! RTP packet structure and serialization.
//!
//! Implements the RTP fixed header according to RFC 3550. Packets are
//! always emitted without padding, extension or CSRC list; the parser
//! accepts all three so that packets from other stacks can be read.

use anyhow::Result;

/// RTP packet version 2 (as per RFC 3550)
pub const RTP_VERSION: u8 = 2;

/// Size of the fixed RTP header in bytes
pub const RTP_HEADER_SIZE: usize = 12;

/// RTP packet for audio transmission.
///
/// The packet contains timing information (sequence number and timestamp)
/// along with the encoded audio payload.
///
/// # Protocol Details
///
/// - Version: Always 2 (RFC 3550)
/// - Payload Type: 96 (dynamic, L16) or 0 (static, PCMU)
/// - Sequence: Increments by 1 for each packet, including fragments
/// - Timestamp: Increments by the encoded sample count of each frame
/// - SSRC: Synchronization source identifier (random per session)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RtpPacket {
    // ---
    /// Marker bit, set on the last packet of a frame
    pub marker: bool,

    /// Payload type (7 bits)
    pub payload_type: u8,

    /// Packet sequence number (wraps at 65535)
    pub sequence: u16,

    /// RTP timestamp in clock-rate units
    pub timestamp: u32,

    /// Synchronization source identifier
    pub ssrc: u32,

    /// Encoded audio payload
    pub payload: Vec<u8>,
}

impl RtpPacket {
    // ---
    /// Creates a new RTP packet with the marker bit cleared.
    ///
    /// # Arguments
    ///
    /// * `payload_type` - RTP payload type (only the low 7 bits are sent)
    /// * `sequence` - Packet sequence number
    /// * `timestamp` - RTP timestamp (in clock-rate units)
    /// * `ssrc` - Synchronization source identifier
    /// * `payload` - Encoded audio data
    pub fn new(
        payload_type: u8,
        sequence: u16,
        timestamp: u32,
        ssrc: u32,
        payload: Vec<u8>,
    ) -> Self {
        // ---
        Self {
            marker: false,
            payload_type: payload_type & 0x7F,
            sequence,
            timestamp,
            ssrc,
            payload,
        }
    }

    /// Returns the packet with the marker bit set as given.
    pub fn with_marker(mut self, marker: bool) -> Self {
        // ---
        self.marker = marker;
        self
    }

    /// Size of the packet on the wire.
    pub fn wire_len(&self) -> usize {
        // ---
        RTP_HEADER_SIZE + self.payload.len()
    }

    /// Serializes the RTP packet into wire format.
    ///
    /// Returns a byte vector ready for UDP transmission. The format follows
    /// RFC 3550 fixed header (12 bytes) followed by the payload.
    ///
    /// # Wire Format
    ///
    /// ```text
    ///  0                   1                   2                   3
    ///  0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1
    /// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
    /// |V=2|P|X|  CC   |M|     PT      |       sequence number         |
    /// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
    /// |                           timestamp                           |
    /// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
    /// |           synchronization source (SSRC) identifier            |
    /// +=+=+=+=+=+=+=+=+=+=+=+=+=+=+=+=+=+=+=+=+=+=+=+=+=+=+=+=+=+=+=+=+
    /// |                           payload...                          |
    /// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
    /// ```
    pub fn serialize(&self) -> Vec<u8> {
        // ---
        let mut buf = Vec::with_capacity(self.wire_len());

        // Byte 0: V(2) | P(1) | X(1) | CC(4)
        buf.push(RTP_VERSION << 6);

        // Byte 1: M(1) | PT(7)
        let marker = if self.marker { 0x80 } else { 0x00 };
        buf.push(marker | (self.payload_type & 0x7F));

        buf.extend_from_slice(&self.sequence.to_be_bytes());
        buf.extend_from_slice(&self.timestamp.to_be_bytes());
        buf.extend_from_slice(&self.ssrc.to_be_bytes());
        buf.extend_from_slice(&self.payload);

        buf
    }

    /// Deserializes an RTP packet from wire format.
    ///
    /// Parses the fixed 12-byte header, skips any CSRC list and header
    /// extension, and strips trailing padding. The payload type is not
    /// validated here; the receiver is configured with the codec out of band.
    ///
    /// # Errors
    ///
    /// Returns error if:
    /// - Packet is smaller than minimum header size (12 bytes)
    /// - RTP version is not 2
    /// - The CSRC list or header extension runs past the end of the packet
    /// - The padding count is zero or larger than the remaining payload
    pub fn deserialize(data: &[u8]) -> Result<Self> {
        // ---
        if data.len() < RTP_HEADER_SIZE {
            anyhow::bail!("packet too small: {} bytes", data.len());
        }

        let version = (data[0] >> 6) & 0x03;
        if version != RTP_VERSION {
            anyhow::bail!("invalid RTP version: {}", version);
        }

        let has_padding = data[0] & 0x20 != 0;
        let has_extension = data[0] & 0x10 != 0;
        let csrc_count = (data[0] & 0x0F) as usize;

        let marker = data[1] & 0x80 != 0;
        let payload_type = data[1] & 0x7F;
        let sequence = u16::from_be_bytes([data[2], data[3]]);
        let timestamp = u32::from_be_bytes([data[4], data[5], data[6], data[7]]);
        let ssrc = u32::from_be_bytes([data[8], data[9], data[10], data[11]]);

        let mut offset = RTP_HEADER_SIZE + csrc_count * 4;
        if data.len() < offset {
            anyhow::bail!(
                "packet too small for {} CSRC entries: {} bytes",
                csrc_count,
                data.len()
            );
        }

        if has_extension {
            if data.len() < offset + 4 {
                anyhow::bail!("truncated header extension");
            }
            let words = u16::from_be_bytes([data[offset + 2], data[offset + 3]]) as usize;
            offset += 4 + words * 4;
            if data.len() < offset {
                anyhow::bail!("header extension length {} exceeds packet", words);
            }
        }

        let mut end = data.len();
        if has_padding {
            let padding = data[end - 1] as usize;
            if padding == 0 || padding > end - offset {
                anyhow::bail!("invalid padding length: {}", padding);
            }
            end -= padding;
        }

        Ok(Self {
            marker,
            payload_type,
            sequence,
            timestamp,
            ssrc,
            payload: data[offset..end].to_vec(),
        })
    }
}
