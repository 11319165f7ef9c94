//! Datagram wire format.
//!
//! One datagram carries one frame: `(metadata, image, frame_id)` serialized
//! with bincode using fixed-width integers. Datagrams above
//! [`MAX_DATAGRAM_SIZE`] are refused on both sides, and decoding carries the
//! same byte limit so a hostile length prefix cannot force a large
//! allocation.

use bincode::Options;
use klvlink_codec::Telemetry;
use klvlink_transport::MAX_DATAGRAM_SIZE;
use serde::{Deserialize, Serialize};

use crate::error::{Result, SessionError};

/// One telemetry value carried in an [`Metadata::Items`] sequence.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum TelemetryItem {
    /// Microseconds since the Unix epoch.
    PrecisionTimeStamp(u64),
    /// Degrees.
    SensorLatitude(f64),
    /// Degrees.
    SensorLongitude(f64),
    /// Platform ground speed.
    PlatformGroundSpeed(f64),
    /// Any other local set tag, passed through untouched.
    Raw { tag: u8, value: Vec<u8> },
}

impl TelemetryItem {
    /// Items for every present field, in time, latitude, longitude, speed order.
    pub fn from_telemetry(telemetry: &Telemetry) -> Vec<TelemetryItem> {
        let mut items = Vec::with_capacity(4);
        if let Some(micros) = telemetry.timestamp_micros {
            items.push(TelemetryItem::PrecisionTimeStamp(micros));
        }
        if let Some(lat) = telemetry.latitude {
            items.push(TelemetryItem::SensorLatitude(lat));
        }
        if let Some(lon) = telemetry.longitude {
            items.push(TelemetryItem::SensorLongitude(lon));
        }
        if let Some(speed) = telemetry.ground_speed {
            items.push(TelemetryItem::PlatformGroundSpeed(speed));
        }
        items
    }
}

/// The fallback metadata shape used when no telemetry is available.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldMap {
    pub id: u64,
    /// Seconds since the Unix epoch.
    pub timestamp: f64,
    pub note: String,
}

impl FieldMap {
    pub fn new(id: u64, timestamp: f64) -> Self {
        Self {
            id,
            timestamp,
            note: format!("frame_metadata_{id}"),
        }
    }
}

/// Metadata attached to a frame. Exactly one shape per datagram.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Metadata {
    Items(Vec<TelemetryItem>),
    Fields(FieldMap),
    Opaque(Vec<u8>),
}

/// Which [`Metadata`] shape a datagram carried.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MetadataKind {
    Items,
    Fields,
    Opaque,
}

impl MetadataKind {
    pub fn as_str(self) -> &'static str {
        match self {
            MetadataKind::Items => "items",
            MetadataKind::Fields => "fields",
            MetadataKind::Opaque => "opaque",
        }
    }
}

impl std::fmt::Display for MetadataKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Metadata {
    pub fn kind(&self) -> MetadataKind {
        match self {
            Metadata::Items(_) => MetadataKind::Items,
            Metadata::Fields(_) => MetadataKind::Fields,
            Metadata::Opaque(_) => MetadataKind::Opaque,
        }
    }

    /// Known telemetry fields. For item sequences the last occurrence wins.
    pub fn telemetry(&self) -> Telemetry {
        match self {
            Metadata::Items(items) => {
                let mut telemetry = Telemetry::default();
                for item in items {
                    match *item {
                        TelemetryItem::PrecisionTimeStamp(v) => telemetry.timestamp_micros = Some(v),
                        TelemetryItem::SensorLatitude(v) => telemetry.latitude = Some(v),
                        TelemetryItem::SensorLongitude(v) => telemetry.longitude = Some(v),
                        TelemetryItem::PlatformGroundSpeed(v) => telemetry.ground_speed = Some(v),
                        TelemetryItem::Raw { .. } => {}
                    }
                }
                telemetry
            }
            Metadata::Fields(fields) => seconds_to_micros(fields.timestamp)
                .map(Telemetry::timestamp_only)
                .unwrap_or_default(),
            Metadata::Opaque(_) => Telemetry::default(),
        }
    }
}

/// Convert fractional epoch seconds to whole microseconds.
///
/// Returns `None` for negative or non-finite input.
pub fn seconds_to_micros(seconds: f64) -> Option<u64> {
    if seconds.is_finite() && seconds >= 0.0 {
        Some((seconds * 1_000_000.0).round() as u64)
    } else {
        None
    }
}

/// One frame and its metadata as carried by a single datagram.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Datagram {
    pub metadata: Metadata,
    /// Encoded (JPEG) frame bytes.
    pub image: Vec<u8>,
    pub frame_id: Option<u64>,
}

fn options() -> impl Options {
    bincode::DefaultOptions::new().with_fixint_encoding()
}

/// Serialize `datagram`, failing with [`SessionError::OversizeDatagram`] if
/// the result would exceed `max` bytes.
pub fn encode_datagram(datagram: &Datagram, max: usize) -> Result<Vec<u8>> {
    let size = options().serialized_size(datagram)? as usize;
    if size > max {
        return Err(SessionError::OversizeDatagram { size, max });
    }
    Ok(options().serialize(datagram)?)
}

/// Deserialize one datagram. Inputs above [`MAX_DATAGRAM_SIZE`] fail with
/// [`SessionError::OversizeDatagram`].
pub fn decode_datagram(bytes: &[u8]) -> Result<Datagram> {
    if bytes.len() > MAX_DATAGRAM_SIZE {
        return Err(SessionError::OversizeDatagram {
            size: bytes.len(),
            max: MAX_DATAGRAM_SIZE,
        });
    }
    Ok(options()
        .with_limit(MAX_DATAGRAM_SIZE as u64)
        .deserialize(bytes)?)
}
