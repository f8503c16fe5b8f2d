//! End-to-end tests: raw PCM → sender pipeline → UDP loopback →
//! receiver pipeline → WAV file.

use std::net::SocketAddr;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tempfile::TempDir;
use tokio::net::UdpSocket;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use receiver::network::DEFAULT_BUFFER_SIZE;
use receiver::{receive_loop, FinalizedPeer, OutputConfig, PeerTable, RtpReceiver, WavFormat};
use rtp_pcm_common::{Codec, MetricsContext, RtpPacket};
use sender::codec::DEFAULT_MTU;
use sender::{
    stream_audio, AudioFormat, ByteOrder, FrameSource, Packetizer, PayloadEncoder, RtpSender,
    SessionIdentity,
};

/// Large enough for one unfragmented 20 ms frame of 48 kHz mono L16
const WHOLE_FRAME_MTU: usize = 2048;

const IDENTITY: SessionIdentity = SessionIdentity {
    ssrc: 0x1234_5678,
    initial_sequence: 65_500,
    initial_timestamp: 4_294_000_000,
};

struct RunningReceiver {
    // ---
    addr: SocketAddr,
    peers: Arc<PeerTable>,
    metrics: MetricsContext,
    shutdown: CancellationToken,
    task: JoinHandle<anyhow::Result<()>>,
}

impl RunningReceiver {
    // ---
    async fn start(dir: &TempDir, format: WavFormat, buffer_size: usize) -> Self {
        // ---
        let receiver = RtpReceiver::bind("127.0.0.1:0", buffer_size)
            .await
            .expect("bind failed");
        Self::start_with(receiver, dir, format)
    }

    fn start_with(receiver: RtpReceiver, dir: &TempDir, format: WavFormat) -> Self {
        // ---
        let metrics = MetricsContext::new("test-receiver").expect("metrics");
        let config = OutputConfig {
            directory: dir.path().to_path_buf(),
            format,
        };
        let peers = Arc::new(
            PeerTable::new(config)
                .expect("peer table")
                .with_metrics(metrics.clone()),
        );
        let mut receiver = receiver.with_metrics(metrics.clone());
        let addr = receiver.local_addr().expect("local addr");

        let shutdown = CancellationToken::new();
        let loop_peers = Arc::clone(&peers);
        let loop_shutdown = shutdown.clone();
        let task = tokio::spawn(async move {
            receive_loop(&mut receiver, &loop_peers, loop_shutdown).await
        });

        Self {
            addr,
            peers,
            metrics,
            shutdown,
            task,
        }
    }

    /// Waits until `count` valid packets have been received.
    async fn wait_for_packets(&self, count: u64) {
        // ---
        self.wait_for(|m| m.packets_received_total.get(), count)
            .await;
    }

    /// Waits until `counter` reaches `count`.
    async fn wait_for(&self, counter: impl Fn(&MetricsContext) -> u64, count: u64) {
        // ---
        tokio::time::timeout(Duration::from_secs(5), async {
            while counter(&self.metrics) < count {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .expect("timed out waiting for metrics");
    }

    async fn stop(self) -> Vec<FinalizedPeer> {
        // ---
        // Let the last packet get through the peer table
        tokio::time::sleep(Duration::from_millis(50)).await;
        self.shutdown.cancel();
        self.task
            .await
            .expect("receive task panicked")
            .expect("receive loop failed");

        let mut finalized = self.peers.finalize_all();
        finalized.sort_by_key(|p| p.addr);
        finalized
    }
}

fn be_bytes(samples: &[i16]) -> Vec<u8> {
    // ---
    samples.iter().flat_map(|s| s.to_be_bytes()).collect()
}

fn read_wav(path: &Path) -> (hound::WavSpec, Vec<i16>) {
    // ---
    let mut reader = hound::WavReader::open(path).expect("open WAV");
    let samples = reader
        .samples::<i16>()
        .collect::<Result<_, _>>()
        .expect("read samples");
    (reader.spec(), samples)
}

/// Streams `pcm` to `remote` through the full sender pipeline.
async fn send_pcm(
    remote: SocketAddr,
    format: AudioFormat,
    codec: Codec,
    mtu: usize,
    pcm: &[u8],
) -> u64 {
    // ---
    let mut source = FrameSource::new(pcm, format).expect("valid format");
    let mut encoder = PayloadEncoder::new(codec, format, mtu).expect("encoder");
    let mut packetizer = Packetizer::with_identity(codec.payload_type(), IDENTITY);
    let mut sender = RtpSender::new(&remote.to_string()).await.expect("sender");
    let metrics = MetricsContext::new("test-sender").expect("metrics");

    let summary = stream_audio(
        &mut source,
        &mut encoder,
        &mut packetizer,
        &mut sender,
        &metrics,
        Some(Duration::from_millis(1)),
    )
    .await
    .expect("stream failed");

    summary.packets
}

#[tokio::test]
async fn test_one_second_of_silence_on_the_wire() {
    // ---
    let listener = UdpSocket::bind("127.0.0.1:0").await.expect("bind failed");
    let remote = listener.local_addr().expect("local addr");

    let format = AudioFormat::new(48000, 1, ByteOrder::BigEndian);
    let pcm = vec![0u8; 48000 * 2];
    let sent = send_pcm(remote, format, Codec::L16, WHOLE_FRAME_MTU, &pcm).await;
    assert_eq!(sent, 50);

    let mut buf = [0u8; WHOLE_FRAME_MTU];
    for i in 0..50u32 {
        let len = tokio::time::timeout(Duration::from_secs(2), listener.recv(&mut buf))
            .await
            .expect("timed out")
            .expect("recv failed");
        let packet = RtpPacket::deserialize(&buf[..len]).expect("valid RTP");

        assert_eq!(packet.payload_type, 96);
        assert_eq!(packet.ssrc, IDENTITY.ssrc);
        assert_eq!(
            packet.sequence,
            IDENTITY.initial_sequence.wrapping_add(i as u16)
        );
        assert_eq!(
            packet.timestamp,
            IDENTITY.initial_timestamp.wrapping_add(i * 960)
        );
        assert!(packet.marker);
        assert_eq!(packet.payload, vec![0u8; 1920]);
    }
}

#[tokio::test]
async fn test_one_second_of_silence_end_to_end() {
    // ---
    let dir = TempDir::new().expect("tempdir");
    let running = RunningReceiver::start(
        &dir,
        WavFormat {
            sample_rate: 48000,
            channels: 1,
            codec: Codec::L16,
        },
        WHOLE_FRAME_MTU,
    )
    .await;

    let format = AudioFormat::new(48000, 1, ByteOrder::BigEndian);
    let pcm = vec![0u8; 48000 * 2];
    let sent = send_pcm(running.addr, format, Codec::L16, WHOLE_FRAME_MTU, &pcm).await;
    assert_eq!(sent, 50);

    running.wait_for_packets(sent).await;
    let finalized = running.stop().await;

    assert_eq!(finalized.len(), 1);
    assert_eq!(finalized[0].stats.packets_received, 50);

    let (spec, written) = read_wav(&finalized[0].path);
    assert_eq!(spec.sample_rate, 48000);
    assert_eq!(written, vec![0i16; 48000]);
}

#[tokio::test]
async fn test_wav_reconstruction_l16_mono() {
    // ---
    let dir = TempDir::new().expect("tempdir");
    let running = RunningReceiver::start(
        &dir,
        WavFormat {
            sample_rate: 48000,
            channels: 1,
            codec: Codec::L16,
        },
        DEFAULT_BUFFER_SIZE,
    )
    .await;

    let mut rng = StdRng::seed_from_u64(7);
    let samples: Vec<i16> = (0..48000).map(|_| rng.gen()).collect();
    let format = AudioFormat::new(48000, 1, ByteOrder::BigEndian);
    let pcm = be_bytes(&samples);
    let sent = send_pcm(running.addr, format, Codec::L16, DEFAULT_MTU, &pcm).await;

    running.wait_for_packets(sent).await;
    let finalized = running.stop().await;

    // Each 1920-byte frame splits in two at the default MTU
    assert_eq!(sent, 100);
    assert_eq!(finalized.len(), 1);
    assert_eq!(finalized[0].samples, 48000);
    assert_eq!(finalized[0].stats.packets_received, 100);
    assert_eq!(finalized[0].stats.packets_lost, 0);

    let (spec, written) = read_wav(&finalized[0].path);
    assert_eq!(spec.sample_rate, 48000);
    assert_eq!(spec.channels, 1);
    assert_eq!(spec.bits_per_sample, 16);
    assert_eq!(written, samples);
}

#[tokio::test]
async fn test_stereo_fragments_reassemble_in_order() {
    // ---
    let dir = TempDir::new().expect("tempdir");
    let running = RunningReceiver::start(
        &dir,
        WavFormat {
            sample_rate: 48000,
            channels: 2,
            codec: Codec::L16,
        },
        DEFAULT_BUFFER_SIZE,
    )
    .await;

    // 10 frames of interleaved stereo, 3 packets each
    let samples: Vec<i16> = (0..960 * 2 * 10).map(|i| (i % 30000) as i16).collect();
    let format = AudioFormat::new(48000, 2, ByteOrder::BigEndian);
    let pcm = be_bytes(&samples);
    let sent = send_pcm(running.addr, format, Codec::L16, DEFAULT_MTU, &pcm).await;
    assert_eq!(sent, 30);

    running.wait_for_packets(sent).await;
    let finalized = running.stop().await;

    let (spec, written) = read_wav(&finalized[0].path);
    assert_eq!(spec.channels, 2);
    assert_eq!(written, samples);
}

#[tokio::test]
async fn test_pcmu_downsamples_to_narrowband() {
    // ---
    let dir = TempDir::new().expect("tempdir");
    let running = RunningReceiver::start(
        &dir,
        WavFormat {
            sample_rate: 8000,
            channels: 1,
            codec: Codec::Pcmu,
        },
        DEFAULT_BUFFER_SIZE,
    )
    .await;

    let samples = vec![1000i16; 48000];
    let format = AudioFormat::new(48000, 1, ByteOrder::BigEndian);
    let pcm = be_bytes(&samples);
    let sent = send_pcm(running.addr, format, Codec::Pcmu, DEFAULT_MTU, &pcm).await;
    assert_eq!(sent, 50);

    running.wait_for_packets(sent).await;
    let finalized = running.stop().await;

    let (spec, written) = read_wav(&finalized[0].path);
    assert_eq!(spec.sample_rate, 8000);
    assert_eq!(written.len(), 8000);
    assert!(written.iter().all(|&s| (s - 1000).abs() <= 32));
}

#[tokio::test]
async fn test_two_senders_write_two_files() {
    // ---
    let dir = TempDir::new().expect("tempdir");
    let running = RunningReceiver::start(
        &dir,
        WavFormat {
            sample_rate: 48000,
            channels: 1,
            codec: Codec::L16,
        },
        DEFAULT_BUFFER_SIZE,
    )
    .await;

    let format = AudioFormat::new(48000, 1, ByteOrder::BigEndian);
    let first = be_bytes(&vec![100i16; 960 * 5]);
    let second = be_bytes(&vec![-100i16; 960 * 3]);

    let (a, b) = tokio::join!(
        send_pcm(running.addr, format, Codec::L16, DEFAULT_MTU, &first),
        send_pcm(running.addr, format, Codec::L16, DEFAULT_MTU, &second),
    );

    running.wait_for_packets(a + b).await;
    let finalized = running.stop().await;

    assert_eq!(finalized.len(), 2);
    assert_ne!(finalized[0].path, finalized[1].path);

    let mut lengths: Vec<_> = finalized
        .iter()
        .map(|peer| {
            let (_, written) = read_wav(&peer.path);
            assert!(written.iter().all(|&s| s == written[0]));
            written.len()
        })
        .collect();
    lengths.sort();
    assert_eq!(lengths, vec![960 * 3, 960 * 5]);
}

#[tokio::test]
async fn test_malformed_datagram_does_not_stop_reception() {
    // ---
    let dir = TempDir::new().expect("tempdir");
    let running = RunningReceiver::start(
        &dir,
        WavFormat {
            sample_rate: 48000,
            channels: 1,
            codec: Codec::L16,
        },
        DEFAULT_BUFFER_SIZE,
    )
    .await;

    let client = UdpSocket::bind("127.0.0.1:0").await.expect("bind failed");
    client
        .send_to(&[0x00, 0x01, 0x02], running.addr)
        .await
        .expect("send failed");
    let packet = RtpPacket::new(96, 1, 0, 9, be_bytes(&[5, 6, 7]));
    client
        .send_to(&packet.serialize(), running.addr)
        .await
        .expect("send failed");

    running.wait_for_packets(1).await;
    assert_eq!(running.metrics.packets_malformed_total.get(), 1);
    let finalized = running.stop().await;

    assert_eq!(finalized.len(), 1);
    assert_eq!(read_wav(&finalized[0].path).1, vec![5, 6, 7]);
}

#[tokio::test]
async fn test_shutdown_with_no_peers() {
    // ---
    let dir = TempDir::new().expect("tempdir");
    let running = RunningReceiver::start(
        &dir,
        WavFormat {
            sample_rate: 48000,
            channels: 1,
            codec: Codec::L16,
        },
        DEFAULT_BUFFER_SIZE,
    )
    .await;

    assert!(running.stop().await.is_empty());
    assert_eq!(
        std::fs::read_dir(dir.path()).expect("read dir").count(),
        0
    );
}

#[tokio::test]
async fn test_output_failure_does_not_stop_reception() {
    // ---
    let dir = TempDir::new().expect("tempdir");
    let running = RunningReceiver::start(
        &dir,
        WavFormat {
            sample_rate: 48000,
            channels: 1,
            codec: Codec::L16,
        },
        DEFAULT_BUFFER_SIZE,
    )
    .await;
    let client = UdpSocket::bind("127.0.0.1:0").await.expect("bind failed");

    // No directory, so the peer's file cannot be created
    std::fs::remove_dir(dir.path()).expect("remove dir");
    let first = RtpPacket::new(96, 1, 0, 9, be_bytes(&[1, 2]));
    client
        .send_to(&first.serialize(), running.addr)
        .await
        .expect("send failed");
    running.wait_for(|m| m.output_errors_total.get(), 1).await;
    assert!(!running.task.is_finished());

    std::fs::create_dir(dir.path()).expect("create dir");
    let second = RtpPacket::new(96, 2, 960, 9, be_bytes(&[3, 4]));
    client
        .send_to(&second.serialize(), running.addr)
        .await
        .expect("send failed");

    running.wait_for_packets(2).await;
    let finalized = running.stop().await;

    assert_eq!(finalized.len(), 1);
    assert_eq!(read_wav(&finalized[0].path).1, vec![3, 4]);
}

#[cfg(target_os = "linux")]
#[tokio::test]
async fn test_socket_error_does_not_stop_reception() {
    // ---
    let dir = TempDir::new().expect("tempdir");

    // A port with nobody listening
    let closed = UdpSocket::bind("127.0.0.1:0").await.expect("bind failed");
    let peer_addr = closed.local_addr().expect("local addr");
    drop(closed);

    // A connected socket reports the ICMP port unreachable on its next read
    let socket = UdpSocket::bind("127.0.0.1:0").await.expect("bind failed");
    socket.connect(peer_addr).await.expect("connect failed");
    socket.send(b"ping").await.expect("send failed");

    let receiver = RtpReceiver::from_socket(socket, DEFAULT_BUFFER_SIZE).expect("receiver");
    let running = RunningReceiver::start_with(
        receiver,
        &dir,
        WavFormat {
            sample_rate: 48000,
            channels: 1,
            codec: Codec::L16,
        },
    );

    // The connected peer comes up and sends real audio; the pending error
    // surfaces on the read before its datagram
    let peer = UdpSocket::bind(peer_addr).await.expect("rebind failed");
    let packet = RtpPacket::new(96, 1, 0, 9, be_bytes(&[7, 8, 9]));
    peer.send_to(&packet.serialize(), running.addr)
        .await
        .expect("send failed");

    running.wait_for_packets(1).await;
    assert_eq!(running.metrics.receive_errors_total.get(), 1);
    assert!(!running.task.is_finished());
    let finalized = running.stop().await;

    assert_eq!(finalized.len(), 1);
    assert_eq!(finalized[0].addr, peer_addr);
    assert_eq!(read_wav(&finalized[0].path).1, vec![7, 8, 9]);
}
