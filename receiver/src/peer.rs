//! Per-peer reassembly into WAV files.
//!
//! Each sender address gets its own WAV file, created on the first
//! packet from that address. Payloads are decoded and appended in
//! arrival order; nothing is reordered or concealed, so loss and
//! reordering on the network show up directly in the file.

use std::collections::HashMap;
use std::fs::File;
use std::io::BufWriter;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Instant, SystemTime, UNIX_EPOCH};

use anyhow::{Context, Result};
use hound::{SampleFormat, WavSpec, WavWriter};
use rtp_pcm_common::{Codec, MetricsContext, RtpPacket};
use tracing::{debug, error, info, warn};

use crate::codec::PayloadDecoder;
use crate::stats::{Arrival, PeerStats};

/// Bits per sample in every output file
pub const BITS_PER_SAMPLE: u16 = 16;

/// Packets between WAV header refreshes, so an interrupted run still
/// leaves a readable file
const FLUSH_INTERVAL_PACKETS: u64 = 250;

type Writer = WavWriter<BufWriter<File>>;
type PeerMap = HashMap<SocketAddr, Arc<Mutex<PeerContext>>>;

/// Audio format of the reconstructed files.
///
/// Must match the sender's configuration; nothing is negotiated.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WavFormat {
    // ---
    /// Samples per second, per channel
    pub sample_rate: u32,

    /// Interleaved channel count
    pub channels: u16,

    /// Payload codec used by the senders
    pub codec: Codec,
}

impl WavFormat {
    // ---
    /// Header of the files written for this format.
    ///
    /// PCMU always decodes to 8kHz mono whatever the configured rate and
    /// channel count; L16 uses them as given.
    pub fn wav_spec(&self) -> WavSpec {
        // ---
        WavSpec {
            channels: self.codec.wire_channels(self.channels),
            sample_rate: self.codec.clock_rate(self.sample_rate),
            bits_per_sample: BITS_PER_SAMPLE,
            sample_format: SampleFormat::Int,
        }
    }
}

/// Where and how peer output is written.
#[derive(Debug, Clone)]
pub struct OutputConfig {
    // ---
    /// Directory receiving one WAV file per peer
    pub directory: PathBuf,

    /// Format of every file
    pub format: WavFormat,
}

/// Summary of a peer whose file has been finalized.
#[derive(Debug, Clone)]
pub struct FinalizedPeer {
    // ---
    pub addr: SocketAddr,
    pub path: PathBuf,

    /// Interleaved samples written
    pub samples: u64,

    pub stats: PeerStats,
}

/// Reassembly state for one sender address.
pub struct PeerContext {
    // ---
    addr: SocketAddr,
    path: PathBuf,
    writer: Option<Writer>,
    decoder: PayloadDecoder,
    stats: PeerStats,
    samples_written: u64,
}

impl PeerContext {
    // ---
    /// Creates the output file for `addr`.
    ///
    /// # Errors
    ///
    /// Returns error if the WAV file cannot be created.
    pub fn create(addr: SocketAddr, config: &OutputConfig) -> Result<Self> {
        // ---
        let path = config.directory.join(output_file_name(addr, SystemTime::now()));
        let writer = WavWriter::create(&path, config.format.wav_spec())
            .with_context(|| format!("failed to create WAV file: {}", path.display()))?;

        Ok(Self {
            addr,
            path,
            writer: Some(writer),
            decoder: PayloadDecoder::new(config.format.codec),
            stats: PeerStats::new(),
            samples_written: 0,
        })
    }

    /// Sender address of this peer.
    pub fn addr(&self) -> SocketAddr {
        // ---
        self.addr
    }

    /// Output file path.
    pub fn path(&self) -> &Path {
        // ---
        &self.path
    }

    /// Interleaved samples written so far.
    pub fn samples_written(&self) -> u64 {
        // ---
        self.samples_written
    }

    /// Reception statistics for this peer.
    pub fn stats(&self) -> &PeerStats {
        // ---
        &self.stats
    }

    /// Decodes `packet` and appends its samples to the file.
    ///
    /// # Errors
    ///
    /// Returns error if the file was already finalized or a write fails.
    pub fn append(&mut self, packet: &RtpPacket) -> Result<Arrival> {
        // ---
        let arrival = self.stats.record_packet(packet.sequence);

        let writer = self
            .writer
            .as_mut()
            .with_context(|| format!("output for {} is already finalized", self.addr))?;

        let samples = self.decoder.decode(&packet.payload);
        for &sample in &samples {
            writer
                .write_sample(sample)
                .with_context(|| format!("failed to write WAV samples for {}", self.addr))?;
        }
        self.samples_written += samples.len() as u64;

        if self.stats.packets_received.is_multiple_of(FLUSH_INTERVAL_PACKETS) {
            writer
                .flush()
                .with_context(|| format!("failed to flush WAV file for {}", self.addr))?;
        }

        Ok(arrival)
    }

    /// Writes the final WAV header and closes the file.
    ///
    /// # Errors
    ///
    /// Returns error if the file was already finalized or the header
    /// cannot be written.
    pub fn finalize(&mut self) -> Result<FinalizedPeer> {
        // ---
        let writer = self
            .writer
            .take()
            .with_context(|| format!("output for {} is already finalized", self.addr))?;

        writer
            .finalize()
            .with_context(|| format!("failed to finalize WAV file: {}", self.path.display()))?;

        Ok(FinalizedPeer {
            addr: self.addr,
            path: self.path.clone(),
            samples: self.samples_written,
            stats: self.stats.clone(),
        })
    }
}

/// Deterministic output file name: `<ip>_<port>_<unix seconds>.wav`.
///
/// Characters that are awkward in file names (IPv6 colons, brackets and
/// zone separators) become underscores.
pub fn output_file_name(addr: SocketAddr, created: SystemTime) -> String {
    // ---
    let secs = created
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0);
    let ip: String = addr
        .ip()
        .to_string()
        .chars()
        .map(|c| match c {
            ':' | '[' | ']' | '%' | '/' | '\\' => '_',
            c => c,
        })
        .collect();

    format!("{}_{}_{}.wav", ip, addr.port(), secs)
}

/// Closes and deletes an output file that was never handed out.
fn discard_output(context: PeerContext) {
    // ---
    let path = context.path().to_path_buf();
    drop(context);
    if let Err(e) = std::fs::remove_file(&path) {
        debug!("Failed to remove {}: {}", path.display(), e);
    }
}

/// Map of sender address to reassembly state.
///
/// Owned by the receive loop and shared with shutdown through `Arc`.
/// The map lock is held only to look up or insert a peer; file I/O runs
/// under the peer's own lock.
pub struct PeerTable {
    // ---
    config: OutputConfig,
    peers: Mutex<PeerMap>,
    metrics: Option<MetricsContext>,
}

impl PeerTable {
    // ---
    /// Creates an empty table writing into `config.directory`.
    ///
    /// # Errors
    ///
    /// Returns error if the output directory cannot be created.
    pub fn new(config: OutputConfig) -> Result<Self> {
        // ---
        std::fs::create_dir_all(&config.directory).with_context(|| {
            format!(
                "failed to create output directory: {}",
                config.directory.display()
            )
        })?;

        Ok(Self {
            config,
            peers: Mutex::new(HashMap::new()),
            metrics: None,
        })
    }

    /// Records peer counts and decode timings in `metrics`.
    pub fn with_metrics(mut self, metrics: MetricsContext) -> Self {
        // ---
        self.metrics = Some(metrics);
        self
    }

    /// Output configuration.
    pub fn config(&self) -> &OutputConfig {
        // ---
        &self.config
    }

    /// Number of peers with an open file.
    pub fn len(&self) -> usize {
        // ---
        self.lock_peers().len()
    }

    pub fn is_empty(&self) -> bool {
        // ---
        self.len() == 0
    }

    /// Returns the context for `addr`, creating its file on first sight.
    ///
    /// # Errors
    ///
    /// Returns error if a new peer's file cannot be created.
    pub fn get_or_create(&self, addr: SocketAddr) -> Result<Arc<Mutex<PeerContext>>> {
        // ---
        if let Some(peer) = self.lock_peers().get(&addr) {
            return Ok(Arc::clone(peer));
        }

        let context = PeerContext::create(addr, &self.config)?;
        let path = context.path().to_path_buf();

        let mut peers = self.lock_peers();
        if let Some(existing) = peers.get(&addr) {
            // Another task inserted this peer while the file was created
            debug!("Discarding duplicate output for {}", addr);
            discard_output(context);
            return Ok(Arc::clone(existing));
        }

        info!("New client connected: {}. Writing {}", addr, path.display());
        let peer = Arc::new(Mutex::new(context));
        peers.insert(addr, Arc::clone(&peer));
        if let Some(metrics) = &self.metrics {
            metrics.active_peers.inc();
        }

        Ok(peer)
    }

    /// Routes one packet to its peer and appends the decoded audio.
    ///
    /// # Errors
    ///
    /// Returns error if the peer's file cannot be created or written.
    /// Callers log and continue; other peers are unaffected.
    pub fn handle_packet(&self, addr: SocketAddr, packet: &RtpPacket) -> Result<()> {
        // ---
        let result = self.append_to_peer(addr, packet);
        if result.is_err() {
            if let Some(metrics) = &self.metrics {
                metrics.output_errors_total.inc();
            }
        }
        result
    }

    fn append_to_peer(&self, addr: SocketAddr, packet: &RtpPacket) -> Result<()> {
        // ---
        let peer = self.get_or_create(addr)?;

        let started = Instant::now();
        let arrival = peer
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .append(packet)?;

        if let Some(metrics) = &self.metrics {
            metrics
                .decode_seconds
                .observe(started.elapsed().as_secs_f64());
            match arrival {
                Arrival::Gap(missing) => metrics.packets_lost_total.inc_by(missing as u64),
                Arrival::Reordered => metrics.packets_reordered_total.inc(),
                Arrival::InOrder | Arrival::Duplicate => {}
            }
        }

        if let Arrival::Gap(missing) = arrival {
            debug!(
                "{}: {} packets missing before seq={}",
                addr, missing, packet.sequence
            );
        }

        Ok(())
    }

    /// Finalizes and removes every peer.
    ///
    /// A failure for one peer is logged and the rest are still finalized.
    /// Returns the peers whose files were finalized successfully.
    pub fn finalize_all(&self) -> Vec<FinalizedPeer> {
        // ---
        let peers: Vec<_> = self.lock_peers().drain().collect();
        let mut finalized = Vec::with_capacity(peers.len());

        for (addr, peer) in peers {
            if let Some(metrics) = &self.metrics {
                metrics.active_peers.dec();
            }

            let mut peer = peer.lock().unwrap_or_else(PoisonError::into_inner);
            match peer.finalize() {
                Ok(done) => {
                    info!(
                        "Closed file: {} ({} samples; {})",
                        done.path.display(),
                        done.samples,
                        done.stats.summary()
                    );
                    finalized.push(done);
                }
                Err(e) => error!("Error closing WAV file for {}: {:#}", addr, e),
            }
        }

        if finalized.is_empty() {
            warn!("No peer outputs were finalized");
        }

        finalized
    }

    fn lock_peers(&self) -> MutexGuard<'_, PeerMap> {
        // ---
        self.peers.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[cfg(test)]
mod tests {
    // ---
    use super::*;
    use std::time::Duration;
    use tempfile::TempDir;

    fn config(dir: &TempDir, codec: Codec) -> OutputConfig {
        // ---
        OutputConfig {
            directory: dir.path().to_path_buf(),
            format: WavFormat {
                sample_rate: if codec == Codec::Pcmu { 8000 } else { 48000 },
                channels: 1,
                codec,
            },
        }
    }

    fn l16_packet(sequence: u16, samples: &[i16]) -> RtpPacket {
        // ---
        let payload = samples.iter().flat_map(|s| s.to_be_bytes()).collect();
        RtpPacket::new(96, sequence, 0, 1, payload)
    }

    fn read_samples(path: &Path) -> Vec<i16> {
        // ---
        hound::WavReader::open(path)
            .expect("open WAV")
            .samples::<i16>()
            .collect::<Result<_, _>>()
            .expect("read samples")
    }

    #[test]
    fn test_file_name() {
        // ---
        let created = UNIX_EPOCH + Duration::from_secs(1_700_000_000);

        let v4: SocketAddr = "127.0.0.1:5000".parse().expect("addr");
        assert_eq!(output_file_name(v4, created), "127.0.0.1_5000_1700000000.wav");

        let v6: SocketAddr = "[::1]:6000".parse().expect("addr");
        assert_eq!(output_file_name(v6, created), "__1_6000_1700000000.wav");
    }

    #[test]
    fn test_peer_created_lazily_and_appends_in_arrival_order() {
        // ---
        let dir = TempDir::new().expect("tempdir");
        let table = PeerTable::new(config(&dir, Codec::L16)).expect("table");
        let addr: SocketAddr = "10.0.0.1:4000".parse().expect("addr");
        assert!(table.is_empty());

        // Out of order on the wire stays out of order in the file
        table.handle_packet(addr, &l16_packet(2, &[3, 4])).expect("append");
        table.handle_packet(addr, &l16_packet(1, &[1, 2])).expect("append");
        assert_eq!(table.len(), 1);

        let finalized = table.finalize_all();
        assert_eq!(finalized.len(), 1);
        assert_eq!(finalized[0].samples, 4);
        assert_eq!(finalized[0].stats.packets_reordered, 1);
        assert!(table.is_empty());

        assert_eq!(read_samples(&finalized[0].path), vec![3, 4, 1, 2]);
    }

    #[test]
    fn test_two_peers_write_separate_files() {
        // ---
        let dir = TempDir::new().expect("tempdir");
        let table = PeerTable::new(config(&dir, Codec::L16)).expect("table");
        let a: SocketAddr = "10.0.0.1:4000".parse().expect("addr");
        let b: SocketAddr = "10.0.0.1:4001".parse().expect("addr");

        for seq in 0..3 {
            table.handle_packet(a, &l16_packet(seq, &[100; 10])).expect("append");
            table.handle_packet(b, &l16_packet(seq, &[-100; 5])).expect("append");
        }

        let mut finalized = table.finalize_all();
        finalized.sort_by_key(|p| p.addr);

        assert_eq!(finalized.len(), 2);
        assert_ne!(finalized[0].path, finalized[1].path);
        assert_eq!(read_samples(&finalized[0].path), vec![100; 30]);
        assert_eq!(read_samples(&finalized[1].path), vec![-100; 15]);
    }

    #[test]
    fn test_pcmu_output() {
        // ---
        let dir = TempDir::new().expect("tempdir");
        let table = PeerTable::new(config(&dir, Codec::Pcmu)).expect("table");
        let addr: SocketAddr = "10.0.0.2:4000".parse().expect("addr");

        let payload = rtp_pcm_common::g711::encode(&[0; 160]);
        table
            .handle_packet(addr, &RtpPacket::new(0, 0, 0, 1, payload))
            .expect("append");

        let finalized = table.finalize_all();
        let reader = hound::WavReader::open(&finalized[0].path).expect("open WAV");
        assert_eq!(reader.spec().sample_rate, 8000);
        assert_eq!(reader.spec().bits_per_sample, 16);
        assert_eq!(reader.len(), 160);
    }

    #[test]
    fn test_pcmu_header_ignores_configured_rate_and_channels() {
        // ---
        let dir = TempDir::new().expect("tempdir");
        let table = PeerTable::new(OutputConfig {
            directory: dir.path().to_path_buf(),
            format: WavFormat {
                sample_rate: 48000,
                channels: 2,
                codec: Codec::Pcmu,
            },
        })
        .expect("table");
        let addr: SocketAddr = "10.0.0.5:4000".parse().expect("addr");

        let payload = rtp_pcm_common::g711::encode(&[0; 160]);
        table
            .handle_packet(addr, &RtpPacket::new(0, 0, 0, 1, payload))
            .expect("append");

        let finalized = table.finalize_all();
        let spec = hound::WavReader::open(&finalized[0].path)
            .expect("open WAV")
            .spec();
        assert_eq!((spec.sample_rate, spec.channels), (8000, 1));
    }

    #[test]
    fn test_l16_header_uses_configured_format() {
        // ---
        let format = WavFormat {
            sample_rate: 44100,
            channels: 2,
            codec: Codec::L16,
        };
        let spec = format.wav_spec();
        assert_eq!((spec.sample_rate, spec.channels), (44100, 2));
        assert_eq!(spec.bits_per_sample, BITS_PER_SAMPLE);
    }

    #[test]
    fn test_empty_payload_appends_nothing() {
        // ---
        let dir = TempDir::new().expect("tempdir");
        let table = PeerTable::new(config(&dir, Codec::L16)).expect("table");
        let addr: SocketAddr = "10.0.0.3:4000".parse().expect("addr");

        table.handle_packet(addr, &l16_packet(0, &[])).expect("append");

        let finalized = table.finalize_all();
        assert_eq!(finalized[0].samples, 0);
        assert!(read_samples(&finalized[0].path).is_empty());
    }

    #[test]
    fn test_output_failure_is_counted_and_recoverable() {
        // ---
        let dir = TempDir::new().expect("tempdir");
        let out = dir.path().join("out");
        let metrics = MetricsContext::new("test").expect("metrics");
        let table = PeerTable::new(OutputConfig {
            directory: out.clone(),
            format: config(&dir, Codec::L16).format,
        })
        .expect("table")
        .with_metrics(metrics.clone());
        let addr: SocketAddr = "10.0.0.6:4000".parse().expect("addr");

        std::fs::remove_dir(&out).expect("remove dir");
        assert!(table.handle_packet(addr, &l16_packet(0, &[1])).is_err());
        assert_eq!(metrics.output_errors_total.get(), 1);
        assert!(table.is_empty());

        std::fs::create_dir(&out).expect("create dir");
        table.handle_packet(addr, &l16_packet(1, &[2, 3])).expect("append");

        let finalized = table.finalize_all();
        assert_eq!(read_samples(&finalized[0].path), vec![2, 3]);
        assert_eq!(metrics.output_errors_total.get(), 1);
    }

    #[test]
    fn test_discarded_output_is_removed() {
        // ---
        let dir = TempDir::new().expect("tempdir");
        let addr: SocketAddr = "10.0.0.7:4000".parse().expect("addr");

        let peer = PeerContext::create(addr, &config(&dir, Codec::L16)).expect("peer");
        let path = peer.path().to_path_buf();
        assert!(path.exists());
        discard_output(peer);
        assert!(!path.exists());

        // Already gone: logged, not fatal
        let peer = PeerContext::create(addr, &config(&dir, Codec::L16)).expect("peer");
        std::fs::remove_file(peer.path()).expect("remove");
        discard_output(peer);
    }

    #[test]
    fn test_finalize_twice_is_error() {
        // ---
        let dir = TempDir::new().expect("tempdir");
        let addr: SocketAddr = "10.0.0.4:4000".parse().expect("addr");
        let mut peer = PeerContext::create(addr, &config(&dir, Codec::L16)).expect("peer");

        peer.append(&l16_packet(0, &[1])).expect("append");
        assert!(peer.finalize().is_ok());
        assert!(peer.finalize().is_err());
        assert!(peer.append(&l16_packet(1, &[1])).is_err());
    }

    #[test]
    fn test_unwritable_directory_fails_setup() {
        // ---
        let dir = TempDir::new().expect("tempdir");
        let blocker = dir.path().join("file");
        std::fs::write(&blocker, b"x").expect("write");

        let bad = OutputConfig {
            directory: blocker.join("sub"),
            format: config(&dir, Codec::L16).format,
        };
        assert!(PeerTable::new(bad).is_err());
    }
}
