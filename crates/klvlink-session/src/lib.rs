//! Frame/metadata pairing sessions.
//!
//! A sender pairs each encoded video frame with the telemetry current at
//! capture time and ships both in one datagram. A receiver re-encodes the
//! telemetry as canonical KLV and appends to four outputs: a raw video
//! stream, a KLV metadata stream, a per-frame log and a JSON-lines frame
//! index. Offline tools inspect recorded metadata streams.

pub mod config;
pub mod error;
pub mod image;
pub mod offline;
pub mod receiver;
pub mod record;
pub mod sender;
pub mod source;
pub mod wire;

use std::time::{SystemTime, UNIX_EPOCH};

pub use config::{LineFormat, OutputPaths, ReceiverConfig, SenderConfig};
pub use error::{Result, SessionError};
#[cfg(feature = "jpeg")]
pub use image::JpegFrameDecoder;
pub use image::{FrameDecoder, RgbFrame};
pub use offline::{extract, scan, ExtractEntry, ExtractIndex, ExtractMetadata, ScanReport};
pub use receiver::{canonical_packet, Outputs, Reassembler, Receiver, ReceiverStats};
pub use record::FrameRecord;
pub use sender::{build_metadata, SendOutcome, Sender, SenderStats};
pub use source::{DirectoryFrames, FrameSource, NoTelemetry, TelemetryReplay, TelemetrySource};
pub use wire::{
    decode_datagram, encode_datagram, Datagram, FieldMap, Metadata, MetadataKind, TelemetryItem,
};

/// Wall-clock time in microseconds since the Unix epoch.
pub fn unix_time_micros() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_micros() as u64)
        .unwrap_or_default()
}

/// Wall-clock time in fractional seconds since the Unix epoch.
pub fn unix_time_secs() -> f64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs_f64())
        .unwrap_or_default()
}
