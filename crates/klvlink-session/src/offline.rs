//! Offline analysis of recorded metadata streams.

use std::collections::BTreeMap;
use std::io::Read;

use klvlink_codec::item::decode_items_partial;
use klvlink_codec::{
    count_key_occurrences, hex_preview, KlvPacket, LocalSetItem, LocalSetTag, PacketReader,
};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, info};

use crate::error::Result;

/// Bytes of payload shown in an undecodable entry.
const RAW_HEX_PREVIEW: usize = 20;

/// Bytes of file head shown by the diagnostic scan.
const SCAN_HEX_PREVIEW: usize = 100;

/// One extracted packet.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExtractEntry {
    /// `frame_<seq>_<timestamp>` or `frame_<seq>`; absent when the payload
    /// held no decodable items.
    pub frame_id: Option<String>,
    pub metadata: ExtractMetadata,
    /// Expected still-image file for this packet.
    pub frame_file: String,
}

/// Decoded fields, or a raw summary when nothing decoded.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ExtractMetadata {
    Raw {
        raw_data_length: usize,
        packet_offset: u64,
        raw_data_hex: String,
    },
    Fields(BTreeMap<String, Value>),
}

/// Packet sequence number to entry, serialized as a JSON object.
pub type ExtractIndex = BTreeMap<u64, ExtractEntry>;

/// Scan a metadata stream and describe every packet found.
pub fn extract(input: impl Read) -> Result<ExtractIndex> {
    let mut index = ExtractIndex::new();
    for (seq, packet) in PacketReader::new(input).enumerate() {
        let packet = packet?;
        let seq = seq as u64;
        debug!(seq, offset = packet.offset, length = packet.length, "extracting packet");
        index.insert(seq, extract_entry(seq, &packet));
    }
    info!(packets = index.len(), "extraction complete");
    Ok(index)
}

/// Describe one packet found as number `seq` in its stream.
pub fn extract_entry(seq: u64, packet: &KlvPacket) -> ExtractEntry {
    let frame_file = format!("frames/frame_{seq:06}.png");
    let (items, failure) = decode_items_partial(&packet.payload);
    if let Some((offset, err)) = &failure {
        debug!(seq, offset, error = %err, "partial local set decode");
    }

    if items.is_empty() {
        return ExtractEntry {
            frame_id: None,
            metadata: ExtractMetadata::Raw {
                raw_data_length: packet.length,
                packet_offset: packet.offset,
                raw_data_hex: hex_preview(&packet.payload, RAW_HEX_PREVIEW),
            },
            frame_file,
        };
    }

    let timestamp = packet.telemetry().timestamp_micros;
    let frame_id = match timestamp {
        Some(micros) => format!("frame_{seq:06}_{micros}"),
        None => format!("frame_{seq:06}"),
    };
    let fields = items
        .iter()
        .map(|item| (field_name(item), field_value(item)))
        .collect();

    ExtractEntry {
        frame_id: Some(frame_id),
        metadata: ExtractMetadata::Fields(fields),
        frame_file,
    }
}

fn field_name(item: &LocalSetItem) -> String {
    match item.kind() {
        LocalSetTag::Unknown(tag) => format!("Tag {tag}"),
        kind => kind.name().to_string(),
    }
}

fn field_value(item: &LocalSetItem) -> Value {
    let typed = match item.kind() {
        LocalSetTag::PrecisionTimeStamp => item.as_time_stamp().ok().map(Value::from),
        LocalSetTag::SensorLatitude | LocalSetTag::SensorLongitude => {
            item.as_angle().ok().map(|angle| angle.map_or(Value::Null, Value::from))
        }
        LocalSetTag::PlatformGroundSpeed => item.as_ground_speed().ok().map(Value::from),
        LocalSetTag::Unknown(_) => None,
    };
    typed.unwrap_or_else(|| Value::from(hex_preview(&item.value, usize::MAX)))
}

/// Summary of a metadata file for troubleshooting.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ScanReport {
    pub file_size: usize,
    /// Universal key occurrences found by plain substring search.
    pub key_occurrences: usize,
    /// Complete packets the framer recovers.
    pub packets: u64,
    pub false_positives: u64,
    pub bytes_skipped: u64,
    /// Hex of the first 100 bytes, with `...` appended when the file is longer.
    pub head_hex: String,
}

/// Diagnose an in-memory metadata file.
pub fn scan(data: &[u8]) -> ScanReport {
    let mut reader = PacketReader::new(data);
    for _ in reader.by_ref() {}
    let stats = reader.stats();

    ScanReport {
        file_size: data.len(),
        key_occurrences: count_key_occurrences(data),
        packets: stats.packets,
        false_positives: stats.false_positives,
        bytes_skipped: stats.bytes_skipped,
        head_hex: hex_preview(data, SCAN_HEX_PREVIEW),
    }
}
