//! MISB ST0601 "UAS Local Set" KLV codec.
//!
//! This is the core layer of klvlink. A metadata stream carries no outer
//! framing; every packet starts with a fixed 16-byte universal key:
//! - The 16-byte key [`UNIVERSAL_KEY`] for stream synchronization
//! - A BER-encoded payload length
//! - A payload of Tag-Length-Value local set items
//!
//! [`PacketScanner`] and [`PacketReader`] locate packets in untrusted bytes,
//! [`decode_items`]/[`encode_items`] handle the local set, and [`assemble`]
//! builds canonical packets.

pub mod ber;
pub mod error;
pub mod item;
pub mod key;
pub mod packet;
pub mod reader;
pub mod scanner;
pub mod telemetry;

pub use error::{KlvError, Result};
pub use item::{decode_items, encode_items, LocalSetItem, LocalSetTag};
pub use key::{count_key_occurrences, UNIVERSAL_KEY, KEY_LEN};
pub use packet::{
    assemble, assemble_or_fallback, assemble_telemetry, fallback_packet, is_fallback, KlvPacket,
    FALLBACK_SENTINEL,
};
pub use reader::PacketReader;
pub use scanner::{
    hex_preview, probe, PacketScanner, Probe, ScanConfig, ScanStats, DEFAULT_MAX_PAYLOAD,
};
pub use telemetry::Telemetry;
