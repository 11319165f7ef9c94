use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use bytes::Bytes;
use klvlink_codec::{assemble_or_fallback, fallback_packet, is_fallback, LocalSetItem};
use klvlink_transport::{DatagramChannel, UdpChannel, MAX_DATAGRAM_SIZE};
use serde::Serialize;
use tracing::{debug, info, trace, warn};

use crate::config::{LineFormat, OutputPaths, ReceiverConfig};
use crate::error::{Result, SessionError};
use crate::image::FrameDecoder;
use crate::record::{FrameRecord, TEXT_LOG_HEADER};
use crate::wire::{decode_datagram, seconds_to_micros, Metadata};

/// Pause after a failed receive before trying again.
pub const RECV_ERROR_BACKOFF: Duration = Duration::from_millis(50);

/// A run of failed receives is reported at warn level once per this many.
const RECV_ERROR_WARN_EVERY: u64 = 100;

/// The four append-only receiver outputs.
#[derive(Debug)]
pub struct Outputs<W> {
    pub video: W,
    pub metadata: W,
    pub log: W,
    pub index: W,
}

impl Outputs<BufWriter<File>> {
    /// Create (truncating) all four files.
    pub fn create(paths: &OutputPaths) -> Result<Self> {
        Ok(Self {
            video: create(&paths.video)?,
            metadata: create(&paths.metadata)?,
            log: create(&paths.log)?,
            index: create(&paths.index)?,
        })
    }
}

fn create(path: &Path) -> Result<BufWriter<File>> {
    File::create(path)
        .map(BufWriter::new)
        .map_err(|source| SessionError::CreateOutput {
            path: path.to_path_buf(),
            source,
        })
}

/// Receiver counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ReceiverStats {
    /// Datagrams written to all outputs.
    pub stored: u64,
    /// Datagrams above the size ceiling, dropped unread.
    pub oversize: u64,
    /// Datagrams that failed to deserialize.
    pub malformed: u64,
    /// Datagrams whose image failed to decode.
    pub bad_images: u64,
    /// Stored frames whose metadata packet is the fallback packet.
    pub fallback_packets: u64,
    pub bytes_received: u64,
}

/// Turns datagrams into appended output records.
///
/// Everything a datagram contributes (video frame, metadata packet, log line
/// and index line) is encoded before the first write, so a skipped datagram
/// leaves no trace. An output I/O error partway through can still leave the
/// streams out of step; it is returned and ends the receive loop. The frame
/// index advances only for stored datagrams.
pub struct Reassembler<D, W> {
    decoder: D,
    outputs: Outputs<W>,
    config: ReceiverConfig,
    next_index: u64,
    video_offset: u64,
    metadata_offset: u64,
    stats: ReceiverStats,
}

impl<D: FrameDecoder, W: Write> Reassembler<D, W> {
    /// Wrap `outputs`, writing the text log header when needed.
    pub fn new(decoder: D, mut outputs: Outputs<W>, config: ReceiverConfig) -> Result<Self> {
        if config.log_format == LineFormat::Text {
            writeln!(outputs.log, "{TEXT_LOG_HEADER}")?;
        }
        Ok(Self {
            decoder,
            outputs,
            config,
            next_index: 0,
            video_offset: 0,
            metadata_offset: 0,
            stats: ReceiverStats::default(),
        })
    }

    /// Process one inbound datagram received at `received_at` (µs since epoch).
    ///
    /// Returns `Ok(None)` when the datagram is skipped. Errors are limited to
    /// output I/O failures.
    pub fn process(&mut self, datagram: &[u8], received_at: u64) -> Result<Option<FrameRecord>> {
        self.stats.bytes_received += datagram.len() as u64;

        if datagram.len() > MAX_DATAGRAM_SIZE {
            warn!(size = datagram.len(), max = MAX_DATAGRAM_SIZE, "oversize datagram, skipping");
            self.stats.oversize += 1;
            return Ok(None);
        }

        let decoded = match decode_datagram(datagram) {
            Ok(decoded) => decoded,
            Err(err) => {
                warn!(size = datagram.len(), error = %err, "deserialization error, skipping datagram");
                self.stats.malformed += 1;
                return Ok(None);
            }
        };

        let frame = match self.decoder.decode(&decoded.image) {
            Ok(frame) => frame.fit(self.config.width, self.config.height),
            Err(err) => {
                warn!(frame_id = ?decoded.frame_id, error = %err, "failed to decode frame, skipping datagram");
                self.stats.bad_images += 1;
                return Ok(None);
            }
        };

        let packet = canonical_packet(&decoded.metadata);
        let fallback = is_fallback(&packet);

        let record = FrameRecord {
            frame_index: self.next_index,
            frame_id: decoded.frame_id,
            kind: decoded.metadata.kind(),
            telemetry: if fallback {
                Default::default()
            } else {
                decoded.metadata.telemetry()
            },
            fallback,
            image_size: decoded.image.len(),
            datagram_size: datagram.len(),
            received_at,
            video_offset: self.video_offset,
            metadata_offset: self.metadata_offset,
            packet_size: packet.len(),
        };

        let log_line = record.log_line(self.config.log_format)?;
        let mut index_line = serde_json::to_vec(&record)?;
        index_line.push(b'\n');

        self.outputs.video.write_all(&frame.pixels)?;
        self.outputs.metadata.write_all(&packet)?;
        writeln!(self.outputs.log, "{log_line}")?;
        self.outputs.index.write_all(&index_line)?;

        self.next_index += 1;
        self.video_offset += frame.pixels.len() as u64;
        self.metadata_offset += packet.len() as u64;
        self.stats.stored += 1;
        if fallback {
            self.stats.fallback_packets += 1;
        }

        debug!(
            frame_index = record.frame_index,
            frame_id = ?record.frame_id,
            kind = %record.kind,
            size = record.datagram_size,
            "stored frame"
        );
        Ok(Some(record))
    }

    /// Flush all four outputs.
    pub fn flush(&mut self) -> Result<()> {
        self.outputs.video.flush()?;
        self.outputs.metadata.flush()?;
        self.outputs.log.flush()?;
        self.outputs.index.flush()?;
        Ok(())
    }

    /// Flush and hand back the outputs.
    pub fn finish(mut self) -> Result<Outputs<W>> {
        self.flush()?;
        Ok(self.outputs)
    }

    pub fn stats(&self) -> ReceiverStats {
        self.stats
    }

    pub fn config(&self) -> &ReceiverConfig {
        &self.config
    }
}

/// The metadata stream packet for one datagram's metadata.
///
/// Item sequences are re-encoded from their known fields, field maps become a
/// timestamp-only packet and anything else becomes the fallback packet.
pub fn canonical_packet(metadata: &Metadata) -> Bytes {
    match metadata {
        Metadata::Items(_) => match metadata.telemetry().to_items() {
            Ok(items) => assemble_or_fallback(&items),
            Err(err) => {
                warn!(error = %err, "telemetry items not encodable, writing fallback packet");
                fallback_packet()
            }
        },
        Metadata::Fields(fields) => match seconds_to_micros(fields.timestamp) {
            Some(micros) => assemble_or_fallback(&[LocalSetItem::precision_time_stamp(micros)]),
            None => {
                warn!(id = fields.id, timestamp = fields.timestamp, "invalid field map timestamp, writing fallback packet");
                fallback_packet()
            }
        },
        Metadata::Opaque(_) => fallback_packet(),
    }
}

/// Blocking receive loop over a datagram channel.
pub struct Receiver<C> {
    channel: C,
}

impl Receiver<UdpChannel> {
    /// Bind a UDP receiver on `addr`.
    pub fn bind(addr: &str) -> Result<Self> {
        Ok(Self::new(UdpChannel::bind(addr)?))
    }
}

impl<C: DatagramChannel> Receiver<C> {
    pub fn new(channel: C) -> Self {
        Self { channel }
    }

    pub fn channel(&self) -> &C {
        &self.channel
    }

    /// Receive and store datagrams until `cancel` is set or the configured
    /// frame limit is reached.
    ///
    /// Outputs are flushed on every exit path, including output errors.
    pub fn run<D: FrameDecoder, W: Write>(
        &self,
        reassembler: &mut Reassembler<D, W>,
        cancel: &AtomicBool,
    ) -> Result<ReceiverStats> {
        let outcome = self.pump(reassembler, cancel);
        let flushed = reassembler.flush();
        outcome?;
        flushed?;

        let stats = reassembler.stats();
        info!(
            stored = stats.stored,
            oversize = stats.oversize,
            malformed = stats.malformed,
            bad_images = stats.bad_images,
            "receiver finished"
        );
        Ok(stats)
    }

    fn pump<D: FrameDecoder, W: Write>(
        &self,
        reassembler: &mut Reassembler<D, W>,
        cancel: &AtomicBool,
    ) -> Result<()> {
        self.channel
            .set_read_timeout(Some(reassembler.config().read_timeout))?;
        let max_frames = reassembler.config().max_frames;
        let mut buf = vec![0u8; UdpChannel::RECV_BUFFER_SIZE];
        let mut failures = 0u64;

        loop {
            if cancel.load(Ordering::SeqCst) {
                info!("receiver cancelled");
                return Ok(());
            }
            if max_frames.is_some_and(|max| reassembler.stats().stored >= max) {
                return Ok(());
            }

            match self.channel.recv_datagram(&mut buf) {
                Ok((len, from)) => {
                    failures = 0;
                    trace!(%from, size = len, "received datagram");
                    reassembler.process(&buf[..len], crate::unix_time_micros())?;
                }
                Err(err) if err.is_timeout() => failures = 0,
                Err(err) => {
                    failures += 1;
                    if failures % RECV_ERROR_WARN_EVERY == 1 {
                        warn!(error = %err, failures, "receive failed");
                    } else {
                        debug!(error = %err, failures, "receive failed");
                    }
                    std::thread::sleep(RECV_ERROR_BACKOFF);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use klvlink_codec::{PacketScanner, Telemetry, UNIVERSAL_KEY};
    use klvlink_transport::MAX_DATAGRAM_SIZE;

    use super::*;
    use crate::image::RgbFrame;
    use crate::wire::{encode_datagram, Datagram, FieldMap, MetadataKind, TelemetryItem};

    /// Treats the image bytes as a 2x1 RGB frame; anything else fails.
    struct TinyDecoder;

    impl FrameDecoder for TinyDecoder {
        fn decode(&mut self, encoded: &[u8]) -> Result<RgbFrame> {
            RgbFrame::new(2, 1, encoded.to_vec())
        }
    }

    const IMAGE: [u8; 6] = [10, 20, 30, 40, 50, 60];

    fn small_config() -> ReceiverConfig {
        ReceiverConfig {
            width: 2,
            height: 1,
            ..ReceiverConfig::default()
        }
    }

    fn reassembler(config: ReceiverConfig) -> Reassembler<TinyDecoder, Vec<u8>> {
        let outputs = Outputs {
            video: Vec::new(),
            metadata: Vec::new(),
            log: Vec::new(),
            index: Vec::new(),
        };
        Reassembler::new(TinyDecoder, outputs, config).unwrap()
    }

    fn datagram(metadata: Metadata, image: &[u8], frame_id: u64) -> Vec<u8> {
        encode_datagram(
            &Datagram {
                metadata,
                image: image.to_vec(),
                frame_id: Some(frame_id),
            },
            MAX_DATAGRAM_SIZE,
        )
        .unwrap()
    }

    #[test]
    fn items_become_canonical_packet() {
        let telemetry = Telemetry::new(1_726_000_000_000_000, 21.5, 105.25, 14.0);
        let mut r = reassembler(small_config());

        let record = r
            .process(
                &datagram(
                    Metadata::Items(TelemetryItem::from_telemetry(&telemetry)),
                    &IMAGE,
                    3,
                ),
                99,
            )
            .unwrap()
            .unwrap();
        assert_eq!(record.frame_index, 0);
        assert_eq!(record.frame_id, Some(3));
        assert_eq!(record.kind, MetadataKind::Items);
        assert!(!record.fallback);
        assert_eq!(record.received_at, 99);

        let outputs = r.finish().unwrap();
        assert_eq!(outputs.video, IMAGE);

        let packets: Vec<_> = PacketScanner::new(outputs.metadata).collect();
        assert_eq!(packets.len(), 1);
        let decoded = packets[0].telemetry();
        assert_eq!(decoded.timestamp_micros, telemetry.timestamp_micros);
        assert_eq!(decoded.ground_speed, Some(14.0));
        assert!((decoded.latitude.unwrap() - 21.5).abs() < 1e-6);
    }

    #[test]
    fn field_map_becomes_timestamp_only_packet() {
        let mut r = reassembler(small_config());
        r.process(
            &datagram(Metadata::Fields(FieldMap::new(1, 2.5)), &IMAGE, 1),
            0,
        )
        .unwrap()
        .unwrap();

        let outputs = r.finish().unwrap();
        let packets: Vec<_> = PacketScanner::new(outputs.metadata).collect();
        assert_eq!(packets.len(), 1);
        assert_eq!(packets[0].telemetry(), Telemetry::timestamp_only(2_500_000));
    }

    #[test]
    fn opaque_and_unencodable_metadata_become_fallback() {
        let mut r = reassembler(small_config());
        let opaque = r
            .process(&datagram(Metadata::Opaque(b"?".to_vec()), &IMAGE, 0), 0)
            .unwrap()
            .unwrap();
        assert!(opaque.fallback);

        let bad_lat = Metadata::Items(vec![TelemetryItem::SensorLatitude(400.0)]);
        let bad = r.process(&datagram(bad_lat, &IMAGE, 1), 0).unwrap().unwrap();
        assert!(bad.fallback);
        assert_eq!(bad.telemetry, Telemetry::default());

        let empty = r
            .process(&datagram(Metadata::Items(Vec::new()), &IMAGE, 2), 0)
            .unwrap()
            .unwrap();
        assert!(empty.fallback);
        assert_eq!(r.stats().fallback_packets, 3);

        let outputs = r.finish().unwrap();
        let packets: Vec<_> = PacketScanner::new(outputs.metadata).collect();
        assert_eq!(packets.len(), 3);
        assert!(packets.iter().all(|p| p.is_fallback()));
    }

    #[test]
    fn skipped_datagrams_do_not_consume_an_index() {
        let mut r = reassembler(small_config());

        assert!(r.process(b"garbage", 0).unwrap().is_none());
        assert!(r
            .process(&datagram(Metadata::Opaque(Vec::new()), b"short", 0), 0)
            .unwrap()
            .is_none());
        let stored = r
            .process(&datagram(Metadata::Opaque(Vec::new()), &IMAGE, 1), 0)
            .unwrap()
            .unwrap();

        assert_eq!(stored.frame_index, 0);
        let stats = r.stats();
        assert_eq!((stats.stored, stats.malformed, stats.bad_images), (1, 1, 1));

        let outputs = r.finish().unwrap();
        assert_eq!(outputs.video.len(), IMAGE.len());
        assert_eq!(String::from_utf8(outputs.index).unwrap().lines().count(), 1);
    }

    #[test]
    fn offsets_and_index_lines_track_outputs() {
        let mut r = reassembler(small_config());
        for id in 0..3 {
            r.process(
                &datagram(Metadata::Fields(FieldMap::new(id, 1.0)), &IMAGE, id),
                0,
            )
            .unwrap();
        }
        let outputs = r.finish().unwrap();

        let index = String::from_utf8(outputs.index).unwrap();
        let records: Vec<FrameRecord> = index
            .lines()
            .map(|line| serde_json::from_str(line).unwrap())
            .collect();
        assert_eq!(records.len(), 3);
        for (i, record) in records.iter().enumerate() {
            assert_eq!(record.frame_index, i as u64);
            assert_eq!(record.video_offset, (i * IMAGE.len()) as u64);
            assert_eq!(record.metadata_offset, (i * record.packet_size) as u64);
            let start = record.metadata_offset as usize;
            assert_eq!(
                &outputs.metadata[start..start + UNIVERSAL_KEY.len()],
                &UNIVERSAL_KEY
            );
        }

        let log = String::from_utf8(outputs.log).unwrap();
        let mut lines = log.lines();
        assert_eq!(lines.next(), Some(TEXT_LOG_HEADER));
        assert!(lines.all(|line| line.starts_with("fields,")));
    }

    #[test]
    fn frames_are_resampled_to_output_resolution() {
        let config = ReceiverConfig {
            width: 4,
            height: 2,
            log_format: LineFormat::Json,
            ..ReceiverConfig::default()
        };
        let mut r = reassembler(config);
        r.process(&datagram(Metadata::Opaque(Vec::new()), &IMAGE, 0), 0)
            .unwrap()
            .unwrap();
        let outputs = r.finish().unwrap();
        assert_eq!(outputs.video.len(), RgbFrame::frame_len(4, 2));
        assert!(outputs.log.starts_with(b"{"));
    }

    #[test]
    fn receive_loop_over_udp() {
        let receiver = Receiver::bind("127.0.0.1:0").unwrap();
        let addr = receiver.channel().local_addr().to_string();
        let config = ReceiverConfig {
            read_timeout: Duration::from_millis(50),
            max_frames: Some(2),
            ..small_config()
        };
        let mut r = reassembler(config);
        let cancel = Arc::new(AtomicBool::new(false));

        let sender = std::thread::spawn(move || {
            let channel = UdpChannel::connect(&addr).unwrap();
            for id in 0..2 {
                let bytes = datagram(Metadata::Fields(FieldMap::new(id, 1.0)), &IMAGE, id);
                channel.send_datagram(&bytes).unwrap();
            }
        });

        let stats = receiver.run(&mut r, &cancel).unwrap();
        sender.join().unwrap();

        assert_eq!(stats.stored, 2);
        let outputs = r.finish().unwrap();
        assert_eq!(outputs.video.len(), 2 * IMAGE.len());
    }

    #[test]
    fn sender_to_receiver_end_to_end() {
        use std::collections::VecDeque;

        use crate::config::SenderConfig;
        use crate::sender::Sender;
        use crate::source::TelemetryReplay;

        let receiver = Receiver::bind("127.0.0.1:0").unwrap();
        let addr = receiver.channel().local_addr().to_string();
        let config = ReceiverConfig {
            read_timeout: Duration::from_millis(50),
            max_frames: Some(3),
            ..small_config()
        };
        let mut r = reassembler(config);

        let sender = std::thread::spawn(move || {
            let channel = UdpChannel::connect(&addr).unwrap();
            let config = SenderConfig {
                frame_interval: Duration::from_millis(1),
                ..SenderConfig::default()
            };
            let mut sender = Sender::new(channel, config);
            let mut frames: VecDeque<Vec<u8>> = (0..3).map(|_| IMAGE.to_vec()).collect();
            let mut telemetry = TelemetryReplay::new(vec![
                Telemetry::new(1_000_000, 10.0, 20.0, 5.0),
                Telemetry::new(2_000_000, 11.0, 21.0, 6.0),
            ]);
            sender
                .run(&mut frames, &mut telemetry, &AtomicBool::new(false))
                .unwrap()
        });

        let stats = receiver.run(&mut r, &AtomicBool::new(false)).unwrap();
        let sent = sender.join().unwrap();
        assert_eq!(sent.sent, 3);
        assert_eq!(stats.stored, 3);
        assert_eq!(stats.fallback_packets, 0);

        let outputs = r.finish().unwrap();
        let stamps: Vec<Option<u64>> = PacketScanner::new(outputs.metadata)
            .map(|p| p.telemetry().timestamp_micros)
            .collect();
        assert_eq!(stamps, vec![Some(1_000_000), Some(2_000_000), Some(2_000_000)]);
    }

    #[test]
    fn oversize_datagram_is_never_indexed() {
        let mut r = reassembler(small_config());
        let big = encode_datagram(
            &Datagram {
                metadata: Metadata::Opaque(vec![0; MAX_DATAGRAM_SIZE]),
                image: IMAGE.to_vec(),
                frame_id: Some(0),
            },
            usize::MAX,
        )
        .unwrap();
        assert!(big.len() > MAX_DATAGRAM_SIZE);

        assert!(r.process(&big, 0).unwrap().is_none());
        let stored = r
            .process(&datagram(Metadata::Opaque(Vec::new()), &IMAGE, 1), 0)
            .unwrap()
            .unwrap();
        assert_eq!(stored.frame_index, 0);
        assert_eq!(stored.frame_id, Some(1));

        let stats = r.stats();
        assert_eq!((stats.oversize, stats.malformed, stats.stored), (1, 0, 1));
        let outputs = r.finish().unwrap();
        assert_eq!(outputs.video, IMAGE);
        assert_eq!(String::from_utf8(outputs.index).unwrap().lines().count(), 1);
    }

    /// Buffers writes; refuses all of them when `fail` is set.
    #[derive(Default)]
    struct Sink {
        data: Vec<u8>,
        fail: bool,
    }

    impl Write for Sink {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            if self.fail {
                return Err(std::io::Error::other("disk full"));
            }
            self.data.extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    #[test]
    fn output_failure_is_returned_and_not_counted() {
        let outputs = Outputs {
            video: Sink {
                fail: true,
                ..Sink::default()
            },
            metadata: Sink::default(),
            log: Sink::default(),
            index: Sink::default(),
        };
        let mut r = Reassembler::new(TinyDecoder, outputs, small_config()).unwrap();

        let err = r
            .process(&datagram(Metadata::Opaque(Vec::new()), &IMAGE, 0), 0)
            .unwrap_err();
        assert!(matches!(err, SessionError::Io(_)));
        assert_eq!(r.stats().stored, 0);

        let outputs = r.finish().unwrap();
        assert!(outputs.metadata.data.is_empty());
        assert!(outputs.index.data.is_empty());
    }

    /// Fails every receive and cancels the loop after `limit` attempts.
    struct FailingChannel {
        attempts: std::cell::Cell<u64>,
        limit: u64,
        cancel: Arc<AtomicBool>,
    }

    impl DatagramChannel for FailingChannel {
        fn send_datagram(&self, payload: &[u8]) -> klvlink_transport::Result<usize> {
            Ok(payload.len())
        }

        fn recv_datagram(
            &self,
            _buf: &mut [u8],
        ) -> klvlink_transport::Result<(usize, std::net::SocketAddr)> {
            let attempts = self.attempts.get() + 1;
            self.attempts.set(attempts);
            if attempts >= self.limit {
                self.cancel.store(true, Ordering::SeqCst);
            }
            Err(klvlink_transport::TransportError::Receive(
                std::io::Error::from(std::io::ErrorKind::ConnectionRefused),
            ))
        }

        fn set_read_timeout(&self, _timeout: Option<Duration>) -> klvlink_transport::Result<()> {
            Ok(())
        }
    }

    #[test]
    fn persistent_receive_errors_back_off() {
        let cancel = Arc::new(AtomicBool::new(false));
        let receiver = Receiver::new(FailingChannel {
            attempts: std::cell::Cell::new(0),
            limit: 4,
            cancel: Arc::clone(&cancel),
        });
        let mut r = reassembler(small_config());

        let started = std::time::Instant::now();
        let stats = receiver.run(&mut r, &cancel).unwrap();
        assert_eq!(stats.stored, 0);
        assert_eq!(receiver.channel().attempts.get(), 4);
        assert!(started.elapsed() >= RECV_ERROR_BACKOFF * 4);
    }

    #[test]
    fn receive_loop_stops_on_cancel() {
        let receiver = Receiver::bind("127.0.0.1:0").unwrap();
        let config = ReceiverConfig {
            read_timeout: Duration::from_millis(20),
            ..small_config()
        };
        let mut r = reassembler(config);
        let cancel = Arc::new(AtomicBool::new(false));

        let flag = Arc::clone(&cancel);
        let canceller = std::thread::spawn(move || {
            std::thread::sleep(Duration::from_millis(100));
            flag.store(true, Ordering::SeqCst);
        });

        let stats = receiver.run(&mut r, &cancel).unwrap();
        canceller.join().unwrap();
        assert_eq!(stats.stored, 0);
    }
}
