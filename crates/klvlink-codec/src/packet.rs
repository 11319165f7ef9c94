use bytes::{BufMut, Bytes, BytesMut};
use tracing::warn;

use crate::ber;
use crate::error::{KlvError, Result};
use crate::item::{decode_items, encode_items_into, LocalSetItem};
use crate::key::{KEY_LEN, UNIVERSAL_KEY};
use crate::telemetry::Telemetry;

/// Payload of the fallback packet: a 4-byte big-endian `1`.
pub const FALLBACK_SENTINEL: [u8; 4] = 1u32.to_be_bytes();

/// A complete KLV packet carved out of a byte stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KlvPacket {
    /// Absolute offset of the key in the scanned input.
    pub offset: u64,
    /// Decoded length field; always equal to `payload.len()`.
    pub length: usize,
    /// Local set bytes.
    pub payload: Bytes,
}

impl KlvPacket {
    /// Create a packet from a payload found at `offset`.
    pub fn new(offset: u64, payload: impl Into<Bytes>) -> Self {
        let payload = payload.into();
        Self {
            offset,
            length: payload.len(),
            payload,
        }
    }

    /// The packet key. Constant for every packet.
    pub fn key(&self) -> &'static [u8; KEY_LEN] {
        &UNIVERSAL_KEY
    }

    /// Key + length field + payload size.
    pub fn wire_size(&self) -> usize {
        KEY_LEN + ber::encoded_len(self.length as u64) + self.length
    }

    /// Decode the local set items in the payload.
    pub fn items(&self) -> Vec<LocalSetItem> {
        decode_items(&self.payload)
    }

    /// Typed telemetry fields carried by the payload.
    pub fn telemetry(&self) -> Telemetry {
        Telemetry::from_items(&self.items())
    }

    /// True if this is the fallback packet rather than real telemetry.
    pub fn is_fallback(&self) -> bool {
        self.payload.as_ref() == FALLBACK_SENTINEL
    }

    /// Canonical wire encoding of this packet.
    pub fn to_bytes(&self) -> Bytes {
        let mut dst = BytesMut::with_capacity(self.wire_size());
        dst.put_slice(&UNIVERSAL_KEY);
        ber::encode_into(self.length as u64, &mut dst);
        dst.put_slice(&self.payload);
        dst.freeze()
    }
}

/// Assemble a canonical packet: key ++ BER length ++ encoded items.
pub fn assemble(items: &[LocalSetItem]) -> Result<Bytes> {
    if items.is_empty() {
        return Err(KlvError::EmptyLocalSet);
    }

    let payload_len: usize = items.iter().map(LocalSetItem::encoded_len).sum();
    let mut dst =
        BytesMut::with_capacity(KEY_LEN + ber::encoded_len(payload_len as u64) + payload_len);
    dst.put_slice(&UNIVERSAL_KEY);
    ber::encode_into(payload_len as u64, &mut dst);
    encode_items_into(items, &mut dst);
    Ok(dst.freeze())
}

/// Assemble a packet from telemetry fields.
pub fn assemble_telemetry(telemetry: &Telemetry) -> Result<Bytes> {
    assemble(&telemetry.to_items()?)
}

/// Assemble a packet, substituting [`fallback_packet`] on failure.
pub fn assemble_or_fallback(items: &[LocalSetItem]) -> Bytes {
    match assemble(items) {
        Ok(packet) => packet,
        Err(err) => {
            warn!(error = %err, items = items.len(), "packet assembly failed; writing fallback packet");
            fallback_packet()
        }
    }
}

/// The minimal well-formed packet written when real metadata is unavailable.
///
/// Layout: key ++ `04` ++ `00 00 00 01`.
pub fn fallback_packet() -> Bytes {
    let mut dst = BytesMut::with_capacity(KEY_LEN + 1 + FALLBACK_SENTINEL.len());
    dst.put_slice(&UNIVERSAL_KEY);
    dst.put_u8(FALLBACK_SENTINEL.len() as u8);
    dst.put_slice(&FALLBACK_SENTINEL);
    dst.freeze()
}

/// True if `packet` is exactly the fallback packet.
pub fn is_fallback(packet: &[u8]) -> bool {
    packet.len() == KEY_LEN + 1 + FALLBACK_SENTINEL.len()
        && packet[..KEY_LEN] == UNIVERSAL_KEY
        && packet[KEY_LEN] == FALLBACK_SENTINEL.len() as u8
        && packet[KEY_LEN + 1..] == FALLBACK_SENTINEL
}
