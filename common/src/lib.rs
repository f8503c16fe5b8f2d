//! Common RTP utilities shared between sender and receiver.
//!
//! This crate provides the RTP packet structure, the G.711 μ-law
//! primitives, the codec descriptor and session description shared by
//! both the sender and receiver components, plus the observability and
//! CLI policy both binaries use.

pub mod cli;
pub mod codec;
pub mod g711;
pub mod observability;
pub mod rtp;
pub mod sdp;

pub use cli::ColorWhen;
pub use codec::Codec;
pub use observability::{init_tracing, MetricsContext, MetricsServerConfig};
pub use rtp::{RtpPacket, RTP_HEADER_SIZE};
pub use sdp::SessionDescription;
