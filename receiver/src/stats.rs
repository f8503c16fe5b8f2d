//! Per-peer statistics tracking.
//!
//! Tracks packet reception for one sender: loss from sequence gaps,
//! out-of-order and duplicate arrivals. These are reported only; the
//! receiver writes packets in arrival order regardless.

use std::time::{Duration, Instant};

/// Reception statistics for a single peer.
#[derive(Debug, Clone)]
pub struct PeerStats {
    // ---
    /// Total packets received
    pub packets_received: u64,

    /// Packets missing from the sequence (net of late arrivals)
    pub packets_lost: u64,

    /// Packets that arrived after a later sequence number
    pub packets_reordered: u64,

    /// Packets repeating the last sequence number
    pub packets_duplicated: u64,

    /// Highest sequence number seen, in wraparound order
    highest_sequence: Option<u16>,

    /// Time the first packet arrived
    start_time: Instant,
}

/// Outcome of recording one packet.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Arrival {
    /// First packet or the next expected sequence number
    InOrder,

    /// Skipped ahead, leaving this many packets missing
    Gap(u16),

    /// Older than the highest sequence number seen
    Reordered,

    /// Same sequence number as the highest seen
    Duplicate,
}

impl PeerStats {
    // ---
    /// Creates a new stats tracker starting now.
    pub fn new() -> Self {
        // ---
        Self {
            packets_received: 0,
            packets_lost: 0,
            packets_reordered: 0,
            packets_duplicated: 0,
            highest_sequence: None,
            start_time: Instant::now(),
        }
    }

    /// Records a received packet by sequence number.
    ///
    /// Gaps count as loss. A late packet filling a gap is counted as
    /// reordered and taken back off the loss count.
    pub fn record_packet(&mut self, sequence: u16) -> Arrival {
        // ---
        self.packets_received += 1;

        let Some(highest) = self.highest_sequence else {
            self.highest_sequence = Some(sequence);
            return Arrival::InOrder;
        };

        // Signed distance handles 16-bit wraparound
        let delta = sequence.wrapping_sub(highest) as i16;
        match delta {
            1 => {
                self.highest_sequence = Some(sequence);
                Arrival::InOrder
            }
            d if d > 1 => {
                let missing = (d - 1) as u16;
                self.packets_lost += missing as u64;
                self.highest_sequence = Some(sequence);
                Arrival::Gap(missing)
            }
            0 => {
                self.packets_duplicated += 1;
                Arrival::Duplicate
            }
            _ => {
                self.packets_reordered += 1;
                self.packets_lost = self.packets_lost.saturating_sub(1);
                Arrival::Reordered
            }
        }
    }

    /// Calculates current packet loss percentage.
    pub fn loss_percentage(&self) -> f64 {
        // ---
        let total = self.packets_received + self.packets_lost;
        if total == 0 {
            0.0
        } else {
            (self.packets_lost as f64 / total as f64) * 100.0
        }
    }

    /// Calculates packets per second reception rate.
    pub fn packets_per_second(&self) -> f64 {
        // ---
        let elapsed = self.start_time.elapsed().as_secs_f64();
        if elapsed == 0.0 {
            0.0
        } else {
            self.packets_received as f64 / elapsed
        }
    }

    /// Time since the first packet.
    pub fn runtime(&self) -> Duration {
        // ---
        self.start_time.elapsed()
    }

    /// One-line summary for logs.
    pub fn summary(&self) -> String {
        // ---
        format!(
            "{} pkts ({:.2} pkt/s), {:.2}% loss, {} reordered, {} duplicated",
            self.packets_received,
            self.packets_per_second(),
            self.loss_percentage(),
            self.packets_reordered,
            self.packets_duplicated
        )
    }
}

impl Default for PeerStats {
    fn default() -> Self {
        // ---
        Self::new()
    }
}
