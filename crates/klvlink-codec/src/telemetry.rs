use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::Result;
use crate::item::{LocalSetItem, LocalSetTag};

/// Typed view of the four local set fields klvlink understands.
///
/// Every field is optional: a decoded packet may carry any subset of them.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Telemetry {
    /// Microseconds since the Unix epoch.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timestamp_micros: Option<u64>,
    /// Degrees, [-90, 90].
    #[serde(skip_serializing_if = "Option::is_none")]
    pub latitude: Option<f64>,
    /// Degrees, [-180, 180].
    #[serde(skip_serializing_if = "Option::is_none")]
    pub longitude: Option<f64>,
    /// Ground speed, [0, 255].
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ground_speed: Option<f64>,
}

impl Telemetry {
    /// Telemetry with all four fields present.
    pub fn new(timestamp_micros: u64, latitude: f64, longitude: f64, ground_speed: f64) -> Self {
        Self {
            timestamp_micros: Some(timestamp_micros),
            latitude: Some(latitude),
            longitude: Some(longitude),
            ground_speed: Some(ground_speed),
        }
    }

    /// Telemetry carrying only a time stamp.
    pub fn timestamp_only(timestamp_micros: u64) -> Self {
        Self {
            timestamp_micros: Some(timestamp_micros),
            ..Self::default()
        }
    }

    /// True when no field is present.
    pub fn is_empty(&self) -> bool {
        self.timestamp_micros.is_none()
            && self.latitude.is_none()
            && self.longitude.is_none()
            && self.ground_speed.is_none()
    }

    /// Time stamp in fractional seconds.
    pub fn timestamp_secs(&self) -> Option<f64> {
        self.timestamp_micros.map(|us| us as f64 / 1_000_000.0)
    }

    /// Encode present fields as items: time, latitude, longitude, speed.
    pub fn to_items(&self) -> Result<Vec<LocalSetItem>> {
        let mut items = Vec::with_capacity(4);
        if let Some(micros) = self.timestamp_micros {
            items.push(LocalSetItem::precision_time_stamp(micros));
        }
        if let Some(lat) = self.latitude {
            items.push(LocalSetItem::sensor_latitude(lat)?);
        }
        if let Some(lon) = self.longitude {
            items.push(LocalSetItem::sensor_longitude(lon)?);
        }
        if let Some(speed) = self.ground_speed {
            items.push(LocalSetItem::platform_ground_speed(speed)?);
        }
        Ok(items)
    }

    /// Extract known fields from decoded items.
    ///
    /// Unknown tags are ignored; a known tag with a malformed value leaves its
    /// field empty. When a tag repeats, the last occurrence wins.
    pub fn from_items(items: &[LocalSetItem]) -> Self {
        let mut telemetry = Self::default();
        for item in items {
            let outcome = match item.kind() {
                LocalSetTag::PrecisionTimeStamp => item
                    .as_time_stamp()
                    .map(|v| telemetry.timestamp_micros = Some(v)),
                LocalSetTag::SensorLatitude => item.as_angle().map(|v| telemetry.latitude = v),
                LocalSetTag::SensorLongitude => item.as_angle().map(|v| telemetry.longitude = v),
                LocalSetTag::PlatformGroundSpeed => item
                    .as_ground_speed()
                    .map(|v| telemetry.ground_speed = Some(v)),
                LocalSetTag::Unknown(_) => Ok(()),
            };
            if let Err(err) = outcome {
                debug!(tag = item.tag, error = %err, "ignoring malformed telemetry value");
            }
        }
        telemetry
    }
}
