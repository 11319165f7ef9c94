use klvlink_codec::Telemetry;
use serde::{Deserialize, Serialize};

use crate::config::LineFormat;
use crate::error::Result;
use crate::wire::MetadataKind;

/// Header row of the text log.
pub const TEXT_LOG_HEADER: &str =
    "kind,frame_index,frame_id,timestamp,latitude,longitude,ground_speed,datagram_size";

/// Everything the receiver stored for one datagram.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FrameRecord {
    /// Receive-order counter assigned by the receiver.
    pub frame_index: u64,
    /// Sender-assigned id, when the datagram carried one.
    pub frame_id: Option<u64>,
    pub kind: MetadataKind,
    pub telemetry: Telemetry,
    /// True when the metadata stream received the fallback packet.
    pub fallback: bool,
    /// Encoded image size as received.
    pub image_size: usize,
    pub datagram_size: usize,
    /// Microseconds since the Unix epoch.
    pub received_at: u64,
    /// Byte offset of this frame in the video stream.
    pub video_offset: u64,
    /// Byte offset of this frame's packet in the metadata stream.
    pub metadata_offset: u64,
    pub packet_size: usize,
}

impl FrameRecord {
    /// Render one log line (without trailing newline).
    pub fn log_line(&self, format: LineFormat) -> Result<String> {
        match format {
            LineFormat::Json => Ok(serde_json::to_string(&LogEntry::from(self))?),
            LineFormat::Text => {
                let t = &self.telemetry;
                Ok(format!(
                    "{},{},{},{},{},{},{},{}",
                    self.kind,
                    self.frame_index,
                    opt(self.frame_id),
                    t.timestamp_secs().map(|s| format!("{s:.6}")).unwrap_or_default(),
                    t.latitude.map(|v| format!("{v:.7}")).unwrap_or_default(),
                    t.longitude.map(|v| format!("{v:.7}")).unwrap_or_default(),
                    t.ground_speed.map(|v| format!("{v:.1}")).unwrap_or_default(),
                    self.datagram_size,
                ))
            }
        }
    }
}

fn opt(value: Option<u64>) -> String {
    value.map(|v| v.to_string()).unwrap_or_default()
}

#[derive(Serialize)]
struct LogEntry {
    kind: MetadataKind,
    frame_index: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    frame_id: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    timestamp: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    latitude: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    longitude: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    ground_speed: Option<f64>,
    datagram_size: usize,
}

impl From<&FrameRecord> for LogEntry {
    fn from(record: &FrameRecord) -> Self {
        Self {
            kind: record.kind,
            frame_index: record.frame_index,
            frame_id: record.frame_id,
            timestamp: record.telemetry.timestamp_secs(),
            latitude: record.telemetry.latitude,
            longitude: record.telemetry.longitude,
            ground_speed: record.telemetry.ground_speed,
            datagram_size: record.datagram_size,
        }
    }
}
