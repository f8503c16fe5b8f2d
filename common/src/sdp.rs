//! Session description (SDP) for an outgoing stream.
//!
//! Consumers such as `ffplay` or VLC need the codec, clock rate, channel
//! count and destination to play the stream. These are rendered as a
//! minimal RFC 4566 description.

use std::net::{IpAddr, SocketAddr};
use std::path::Path;

use anyhow::{Context, Result};

use crate::codec::Codec;

/// Parameters of a single audio RTP session.
#[derive(Debug, Clone)]
pub struct SessionDescription {
    // ---
    /// Session name (`s=` line)
    pub session_name: String,

    /// Destination the stream is sent to
    pub destination: SocketAddr,

    /// Wire codec
    pub codec: Codec,

    /// Source sample rate (the L16 clock rate)
    pub sample_rate: u32,

    /// Source channel count
    pub channels: u16,

    /// Session SSRC, advertised with `a=ssrc` when known
    pub ssrc: Option<u32>,
}

impl SessionDescription {
    // ---
    /// Renders the description as SDP text with CRLF line endings.
    pub fn render(&self) -> String {
        // ---
        let (net_type, addr) = match self.destination.ip() {
            IpAddr::V4(ip) => ("IP4", ip.to_string()),
            IpAddr::V6(ip) => ("IP6", ip.to_string()),
        };
        let pt = self.codec.payload_type();
        let clock = self.codec.clock_rate(self.sample_rate);
        let channels = self.codec.wire_channels(self.channels);
        let session_id = self.ssrc.unwrap_or(0);

        let name = self.codec.encoding_name();
        let rtpmap = if channels > 1 {
            format!("a=rtpmap:{pt} {name}/{clock}/{channels}")
        } else {
            format!("a=rtpmap:{pt} {name}/{clock}")
        };

        let mut lines = vec![
            "v=0".to_string(),
            format!("o=- {session_id} {session_id} IN {net_type} {addr}"),
            format!("s={}", self.session_name),
            format!("c=IN {net_type} {addr}"),
            "t=0 0".to_string(),
            format!("m=audio {} RTP/AVP {pt}", self.destination.port()),
            rtpmap,
        ];
        if let Some(ssrc) = self.ssrc {
            lines.push(format!("a=ssrc:{ssrc}"));
        }
        lines.push("a=recvonly".to_string());

        let mut sdp = lines.join("\r\n");
        sdp.push_str("\r\n");
        sdp
    }

    /// Writes the rendered description to `path`.
    pub fn write_to<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        // ---
        let path = path.as_ref();
        std::fs::write(path, self.render())
            .with_context(|| format!("failed to write SDP file: {}", path.display()))
    }
}
