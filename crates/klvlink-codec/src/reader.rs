use std::io::{ErrorKind, Read};

use bytes::{Buf, BytesMut};

use crate::error::Result;
use crate::key::KEY_LEN;
use crate::packet::KlvPacket;
use crate::scanner::{log_false_positive, probe, Probe, ScanConfig, ScanStats};

const INITIAL_BUFFER_CAPACITY: usize = 8 * 1024;
const READ_CHUNK_SIZE: usize = 8 * 1024;

/// Reads complete packets from any `Read` stream.
///
/// Produces the same packets, in the same order and at the same offsets, as
/// [`crate::PacketScanner`] over the whole input, without holding the whole
/// input in memory. A candidate whose payload is still in flight is held
/// until more bytes arrive; at end of input it is discarded as a false match.
pub struct PacketReader<R> {
    inner: R,
    buf: BytesMut,
    cursor: usize,
    base: u64,
    eof: bool,
    config: ScanConfig,
    stats: ScanStats,
}

impl<R: Read> PacketReader<R> {
    /// Create a new packet reader with default configuration.
    pub fn new(inner: R) -> Self {
        Self::with_config(inner, ScanConfig::default())
    }

    /// Create a new packet reader with explicit configuration.
    pub fn with_config(inner: R, config: ScanConfig) -> Self {
        Self {
            inner,
            buf: BytesMut::with_capacity(INITIAL_BUFFER_CAPACITY),
            cursor: 0,
            base: 0,
            eof: false,
            config,
            stats: ScanStats::default(),
        }
    }

    /// Read the next complete packet (blocking).
    ///
    /// Returns `Ok(None)` once the stream is exhausted.
    pub fn read_packet(&mut self) -> Result<Option<KlvPacket>> {
        loop {
            while self.buf.len() - self.cursor >= KEY_LEN {
                match probe(&self.buf, self.cursor, self.config.max_payload_size) {
                    Probe::NoMatch => {
                        self.cursor += 1;
                        self.stats.bytes_skipped += 1;
                    }
                    Probe::Complete {
                        header_len,
                        payload_len,
                    } => return Ok(Some(self.take_packet(header_len, payload_len))),
                    Probe::Incomplete(_) if !self.eof => break,
                    Probe::Incomplete(err) | Probe::Rejected(err) => {
                        let offset = Self::position(self);
                        log_false_positive(offset, &err, &self.buf[self.cursor..]);
                        self.cursor += 1;
                        self.stats.false_positives += 1;
                        self.stats.bytes_skipped += 1;
                    }
                }
            }

            if self.eof {
                let remaining = self.buf.len() - self.cursor;
                self.stats.bytes_skipped += remaining as u64;
                self.discard_consumed();
                self.buf.clear();
                self.base += remaining as u64;
                return Ok(None);
            }

            self.fill()?;
        }
    }

    fn take_packet(&mut self, header_len: usize, payload_len: usize) -> KlvPacket {
        // `Iterator::position` would shadow the inherent accessor on `&mut self`.
        let offset = Self::position(self);
        self.discard_consumed();
        let mut wire = self.buf.split_to(header_len + payload_len).freeze();
        self.base += wire.len() as u64;
        wire.advance(header_len);
        self.stats.packets += 1;
        KlvPacket {
            offset,
            length: payload_len,
            payload: wire,
        }
    }

    fn discard_consumed(&mut self) {
        self.buf.advance(self.cursor);
        self.base += self.cursor as u64;
        self.cursor = 0;
    }

    fn fill(&mut self) -> Result<()> {
        self.discard_consumed();
        let mut chunk = [0u8; READ_CHUNK_SIZE];
        loop {
            match self.inner.read(&mut chunk) {
                Ok(0) => {
                    self.eof = true;
                    return Ok(());
                }
                Ok(n) => {
                    self.buf.extend_from_slice(&chunk[..n]);
                    return Ok(());
                }
                Err(err) if err.kind() == ErrorKind::Interrupted => continue,
                Err(err) => return Err(err.into()),
            }
        }
    }

    /// Absolute stream offset of the next byte to be probed.
    pub fn position(&self) -> u64 {
        self.base + self.cursor as u64
    }

    /// Counters for the scan so far.
    pub fn stats(&self) -> ScanStats {
        self.stats
    }

    /// Current reader configuration.
    pub fn config(&self) -> &ScanConfig {
        &self.config
    }

    /// Borrow the underlying stream.
    pub fn get_ref(&self) -> &R {
        &self.inner
    }

    /// Consume the reader and return the inner stream.
    pub fn into_inner(self) -> R {
        self.inner
    }
}

impl<R: Read> Iterator for PacketReader<R> {
    type Item = Result<KlvPacket>;

    fn next(&mut self) -> Option<Self::Item> {
        self.read_packet().transpose()
    }
}
