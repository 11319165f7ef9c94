//! Resynchronizing packet framer.
//!
//! The stream has no outer framing, so every byte offset is a candidate key
//! position. Each step of the scan has one of three outcomes:
//!
//! ```text
//! no match            -> advance 1
//! match, decode fails -> advance 1 (never past the candidate)
//! match, decode ok    -> emit packet, jump to end of payload
//! ```

use std::iter::FusedIterator;

use bytes::Bytes;
use tracing::debug;

use crate::ber;
use crate::error::KlvError;
use crate::key::{self, KEY_LEN};
use crate::packet::KlvPacket;

/// Default maximum payload size: 16 MiB.
pub const DEFAULT_MAX_PAYLOAD: usize = 16 * 1024 * 1024;

const HEX_PREVIEW_LEN: usize = 24;

/// Configuration for packet scanning.
#[derive(Debug, Clone)]
pub struct ScanConfig {
    /// Declared payloads above this size are treated as false positives.
    pub max_payload_size: usize,
}

impl Default for ScanConfig {
    fn default() -> Self {
        Self {
            max_payload_size: DEFAULT_MAX_PAYLOAD,
        }
    }
}

/// Counters accumulated while scanning.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ScanStats {
    /// Complete packets emitted.
    pub packets: u64,
    /// Key matches whose length or payload could not be decoded.
    pub false_positives: u64,
    /// Bytes stepped over without belonging to an emitted packet.
    pub bytes_skipped: u64,
}

/// Result of probing a single offset.
#[derive(Debug)]
pub enum Probe {
    /// The bytes at the offset are not the universal key.
    NoMatch,
    /// A full packet starts at the offset.
    Complete {
        /// Key plus length field size.
        header_len: usize,
        /// Payload size in bytes.
        payload_len: usize,
    },
    /// The key matched but the length field or payload runs past the buffer.
    Incomplete(KlvError),
    /// The key matched but the length field is unusable.
    Rejected(KlvError),
}

/// Probe `buf` at `offset` for a complete packet.
pub fn probe(buf: &[u8], offset: usize, max_payload: usize) -> Probe {
    if !key::matches_at(buf, offset) {
        return Probe::NoMatch;
    }

    let (length, length_size) = match ber::decode(buf, offset + KEY_LEN) {
        Ok(decoded) => decoded,
        Err(err) if err.is_truncation() => return Probe::Incomplete(err),
        Err(err) => return Probe::Rejected(err),
    };

    if length > max_payload as u64 {
        return Probe::Rejected(KlvError::PayloadTooLarge {
            size: length,
            max: max_payload,
        });
    }

    let header_len = KEY_LEN + length_size;
    let available = buf.len() - offset - header_len;
    if length > available as u64 {
        return Probe::Incomplete(KlvError::Truncated {
            needed: length as usize,
            available,
        });
    }

    Probe::Complete {
        header_len,
        payload_len: length as usize,
    }
}

/// Lazily yields every complete packet in an in-memory buffer.
///
/// Payloads are zero-copy slices of the input. The scan can be resumed from
/// any offset with [`PacketScanner::from_offset`].
#[derive(Debug, Clone)]
pub struct PacketScanner {
    data: Bytes,
    cursor: usize,
    config: ScanConfig,
    stats: ScanStats,
}

impl PacketScanner {
    /// Scan `data` from the beginning with default configuration.
    pub fn new(data: impl Into<Bytes>) -> Self {
        Self::with_config(data, ScanConfig::default())
    }

    /// Scan `data` from the beginning with explicit configuration.
    pub fn with_config(data: impl Into<Bytes>, config: ScanConfig) -> Self {
        Self {
            data: data.into(),
            cursor: 0,
            config,
            stats: ScanStats::default(),
        }
    }

    /// Resume scanning `data` at `offset`.
    pub fn from_offset(data: impl Into<Bytes>, offset: usize) -> Self {
        let mut scanner = Self::new(data);
        scanner.cursor = offset.min(scanner.data.len());
        scanner
    }

    /// Offset the next step will probe.
    pub fn position(&self) -> usize {
        self.cursor
    }

    /// Counters for the scan so far.
    pub fn stats(&self) -> ScanStats {
        self.stats
    }

    /// Current scanner configuration.
    pub fn config(&self) -> &ScanConfig {
        &self.config
    }
}

impl Iterator for PacketScanner {
    type Item = KlvPacket;

    fn next(&mut self) -> Option<KlvPacket> {
        loop {
            let remaining = self.data.len() - self.cursor;
            if remaining < KEY_LEN {
                self.stats.bytes_skipped += remaining as u64;
                self.cursor = self.data.len();
                return None;
            }

            match probe(&self.data, self.cursor, self.config.max_payload_size) {
                Probe::NoMatch => {
                    self.cursor += 1;
                    self.stats.bytes_skipped += 1;
                }
                Probe::Complete {
                    header_len,
                    payload_len,
                } => {
                    let start = self.cursor + header_len;
                    let end = start + payload_len;
                    let packet = KlvPacket {
                        offset: self.cursor as u64,
                        length: payload_len,
                        payload: self.data.slice(start..end),
                    };
                    self.cursor = end;
                    self.stats.packets += 1;
                    return Some(packet);
                }
                Probe::Incomplete(err) | Probe::Rejected(err) => {
                    log_false_positive(self.cursor as u64, &err, &self.data[self.cursor..]);
                    self.cursor += 1;
                    self.stats.false_positives += 1;
                    self.stats.bytes_skipped += 1;
                }
            }
        }
    }
}

impl FusedIterator for PacketScanner {}

pub(crate) fn log_false_positive(offset: u64, err: &KlvError, candidate: &[u8]) {
    debug!(
        offset,
        error = %err,
        candidate_len = candidate.len(),
        hex = %hex_preview(candidate, HEX_PREVIEW_LEN),
        "discarding false key match"
    );
}

/// Lowercase hex of the first `limit` bytes, with `...` when truncated.
pub fn hex_preview(bytes: &[u8], limit: usize) -> String {
    let shown = &bytes[..bytes.len().min(limit)];
    let mut out: String = shown.iter().map(|b| format!("{b:02x}")).collect();
    if bytes.len() > limit {
        out.push_str("...");
    }
    out
}
