//! UAS Local Set items: `tag (1 byte) ++ BER length ++ value`.

use bytes::{BufMut, Bytes, BytesMut};
use tracing::debug;

use crate::ber;
use crate::error::{KlvError, Result};

/// Full-scale value for 4-byte signed angle mappings (2^31 - 1).
const ANGLE_FULL_SCALE: f64 = i32::MAX as f64;

/// Reserved 4-byte value meaning "no measurement".
const ANGLE_ERROR_INDICATOR: i32 = i32::MIN;

/// Local set tags understood by this codec.
///
/// Everything else round-trips as [`LocalSetTag::Unknown`] with opaque bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum LocalSetTag {
    /// Precision time stamp (tag 2), microseconds since the Unix epoch.
    PrecisionTimeStamp,
    /// Sensor latitude (tag 13), degrees.
    SensorLatitude,
    /// Sensor longitude (tag 14), degrees.
    SensorLongitude,
    /// Platform ground speed (tag 56).
    PlatformGroundSpeed,
    /// Any other tag.
    Unknown(u8),
}

impl LocalSetTag {
    /// Human-readable tag name.
    pub fn name(self) -> &'static str {
        match self {
            LocalSetTag::PrecisionTimeStamp => "Precision Time Stamp",
            LocalSetTag::SensorLatitude => "Sensor Latitude",
            LocalSetTag::SensorLongitude => "Sensor Longitude",
            LocalSetTag::PlatformGroundSpeed => "Platform Ground Speed",
            LocalSetTag::Unknown(_) => "Unknown",
        }
    }
}

impl From<LocalSetTag> for u8 {
    fn from(tag: LocalSetTag) -> u8 {
        match tag {
            LocalSetTag::PrecisionTimeStamp => 2,
            LocalSetTag::SensorLatitude => 13,
            LocalSetTag::SensorLongitude => 14,
            LocalSetTag::PlatformGroundSpeed => 56,
            LocalSetTag::Unknown(v) => v,
        }
    }
}

impl From<u8> for LocalSetTag {
    fn from(v: u8) -> Self {
        match v {
            2 => LocalSetTag::PrecisionTimeStamp,
            13 => LocalSetTag::SensorLatitude,
            14 => LocalSetTag::SensorLongitude,
            56 => LocalSetTag::PlatformGroundSpeed,
            v => LocalSetTag::Unknown(v),
        }
    }
}

/// One Tag-Length-Value item inside a packet payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LocalSetItem {
    /// Raw 1-byte tag.
    pub tag: u8,
    /// Value bytes; the length field is derived from these.
    pub value: Bytes,
}

impl LocalSetItem {
    /// Create an item with an arbitrary tag and value.
    pub fn new(tag: impl Into<u8>, value: impl Into<Bytes>) -> Self {
        Self {
            tag: tag.into(),
            value: value.into(),
        }
    }

    /// Typed view of the tag.
    pub fn kind(&self) -> LocalSetTag {
        LocalSetTag::from(self.tag)
    }

    /// Bytes this item occupies once encoded.
    pub fn encoded_len(&self) -> usize {
        1 + ber::encoded_len(self.value.len() as u64) + self.value.len()
    }

    /// Precision time stamp item.
    pub fn precision_time_stamp(micros: u64) -> Self {
        Self::new(
            LocalSetTag::PrecisionTimeStamp,
            micros.to_be_bytes().to_vec(),
        )
    }

    /// Sensor latitude item. Fails outside [-90, 90].
    pub fn sensor_latitude(degrees: f64) -> Result<Self> {
        let raw = encode_angle(LocalSetTag::SensorLatitude, degrees, 90.0)?;
        Ok(Self::new(
            LocalSetTag::SensorLatitude,
            raw.to_be_bytes().to_vec(),
        ))
    }

    /// Sensor longitude item. Fails outside [-180, 180].
    pub fn sensor_longitude(degrees: f64) -> Result<Self> {
        let raw = encode_angle(LocalSetTag::SensorLongitude, degrees, 180.0)?;
        Ok(Self::new(
            LocalSetTag::SensorLongitude,
            raw.to_be_bytes().to_vec(),
        ))
    }

    /// Platform ground speed item. Fails outside [0, 255].
    pub fn platform_ground_speed(speed: f64) -> Result<Self> {
        if !speed.is_finite() || !(0.0..=255.0).contains(&speed) {
            return Err(KlvError::ValueOutOfRange {
                tag: LocalSetTag::PlatformGroundSpeed.into(),
                value: speed,
            });
        }
        Ok(Self::new(
            LocalSetTag::PlatformGroundSpeed,
            vec![speed.round() as u8],
        ))
    }

    /// Decode a precision time stamp value.
    pub fn as_time_stamp(&self) -> Result<u64> {
        let bytes: [u8; 8] = self.fixed_width()?;
        Ok(u64::from_be_bytes(bytes))
    }

    /// Decode a latitude or longitude value; `None` is the error indicator.
    pub fn as_angle(&self) -> Result<Option<f64>> {
        let bytes: [u8; 4] = self.fixed_width()?;
        let raw = i32::from_be_bytes(bytes);
        if raw == ANGLE_ERROR_INDICATOR {
            return Ok(None);
        }
        let half_range = match self.kind() {
            LocalSetTag::SensorLongitude => 180.0,
            _ => 90.0,
        };
        Ok(Some(f64::from(raw) * half_range / ANGLE_FULL_SCALE))
    }

    /// Decode a ground speed value.
    pub fn as_ground_speed(&self) -> Result<f64> {
        let [speed]: [u8; 1] = self.fixed_width()?;
        Ok(f64::from(speed))
    }

    fn fixed_width<const N: usize>(&self) -> Result<[u8; N]> {
        self.value
            .as_ref()
            .try_into()
            .map_err(|_| KlvError::InvalidValueLength {
                tag: self.tag,
                expected: N,
                actual: self.value.len(),
            })
    }
}

fn encode_angle(tag: LocalSetTag, degrees: f64, half_range: f64) -> Result<i32> {
    if !degrees.is_finite() || !(-half_range..=half_range).contains(&degrees) {
        return Err(KlvError::ValueOutOfRange {
            tag: tag.into(),
            value: degrees,
        });
    }
    Ok((degrees / half_range * ANGLE_FULL_SCALE).round() as i32)
}

/// Decode local set items from a packet payload.
///
/// Stops at the first malformed item and returns everything decoded before it.
pub fn decode_items(payload: &[u8]) -> Vec<LocalSetItem> {
    let (items, failure) = decode_items_partial(payload);
    if let Some((offset, err)) = failure {
        debug!(
            offset,
            error = %err,
            decoded = items.len(),
            "local set decode stopped early"
        );
    }
    items
}

/// Like [`decode_items`], but also reports where and why decoding stopped.
pub fn decode_items_partial(payload: &[u8]) -> (Vec<LocalSetItem>, Option<(usize, KlvError)>) {
    let mut items = Vec::new();
    let mut cursor = 0usize;

    while cursor < payload.len() {
        match decode_item_at(payload, cursor) {
            Ok((item, next)) => {
                items.push(item);
                cursor = next;
            }
            Err(err) => return (items, Some((cursor, err))),
        }
    }

    (items, None)
}

fn decode_item_at(payload: &[u8], cursor: usize) -> Result<(LocalSetItem, usize)> {
    let tag = payload[cursor];
    let (len, len_size) = ber::decode(payload, cursor + 1)?;
    let start = cursor + 1 + len_size;
    let available = payload.len() - start;
    if len > available as u64 {
        return Err(KlvError::Truncated {
            needed: usize::try_from(len).unwrap_or(usize::MAX),
            available,
        });
    }
    let end = start + len as usize;
    let item = LocalSetItem {
        tag,
        value: Bytes::copy_from_slice(&payload[start..end]),
    };
    Ok((item, end))
}

/// Encode items in caller order.
pub fn encode_items(items: &[LocalSetItem]) -> Bytes {
    let mut dst = BytesMut::with_capacity(items.iter().map(LocalSetItem::encoded_len).sum());
    encode_items_into(items, &mut dst);
    dst.freeze()
}

/// Append encoded items to `dst`.
pub fn encode_items_into(items: &[LocalSetItem], dst: &mut impl BufMut) {
    for item in items {
        dst.put_u8(item.tag);
        ber::encode_into(item.value.len() as u64, dst);
        dst.put_slice(&item.value);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encode_single_item() {
        let items = vec![LocalSetItem::new(2u8, vec![0x00, 0x00, 0x00, 0x01])];
        let bytes = encode_items(&items);
        assert_eq!(bytes.as_ref(), &[0x02, 0x04, 0x00, 0x00, 0x00, 0x01]);
    }

    #[test]
    fn decode_preserves_tags_values_and_order() {
        let items = vec![
            LocalSetItem::precision_time_stamp(1_700_000_000_123_456),
            LocalSetItem::new(200u8, vec![0xAB; 300]),
            LocalSetItem::sensor_latitude(21.0285).unwrap(),
            LocalSetItem::new(99u8, Vec::<u8>::new()),
            LocalSetItem::sensor_longitude(105.8542).unwrap(),
            LocalSetItem::platform_ground_speed(12.4).unwrap(),
        ];
        let encoded = encode_items(&items);
        assert_eq!(decode_items(&encoded), items);
    }

    #[test]
    fn long_values_use_long_form_length() {
        let item = LocalSetItem::new(7u8, vec![0x55; 200]);
        let encoded = encode_items(std::slice::from_ref(&item));
        assert_eq!(&encoded[..3], &[0x07, 0x81, 0xC8]);
        assert_eq!(encoded.len(), item.encoded_len());
    }

    #[test]
    fn truncated_item_keeps_earlier_items() {
        let mut encoded = encode_items(&[
            LocalSetItem::precision_time_stamp(42),
            LocalSetItem::platform_ground_speed(3.0).unwrap(),
        ])
        .to_vec();
        encoded.extend_from_slice(&[13, 0x04, 0x00, 0x01]);

        let (items, failure) = decode_items_partial(&encoded);
        assert_eq!(items.len(), 2);
        let (offset, err) = failure.expect("tail should fail");
        assert_eq!(offset, 13);
        assert!(err.is_truncation());
    }

    #[test]
    fn tag_without_length_is_truncated() {
        let (items, failure) = decode_items_partial(&[0x02]);
        assert!(items.is_empty());
        assert!(failure.unwrap().1.is_truncation());
    }

    #[test]
    fn unknown_tags_pass_through() {
        let items = decode_items(&[0xF0, 0x02, 0xDE, 0xAD]);
        assert_eq!(items.len(), 1);
        assert_eq!(items[0].kind(), LocalSetTag::Unknown(0xF0));
        assert_eq!(items[0].value.as_ref(), &[0xDE, 0xAD]);
    }

    #[test]
    fn tag_conversion() {
        assert_eq!(u8::from(LocalSetTag::PrecisionTimeStamp), 2);
        assert_eq!(u8::from(LocalSetTag::PlatformGroundSpeed), 56);
        assert_eq!(LocalSetTag::from(13), LocalSetTag::SensorLatitude);
        assert_eq!(LocalSetTag::from(14), LocalSetTag::SensorLongitude);
        assert_eq!(LocalSetTag::from(100), LocalSetTag::Unknown(100));
    }

    #[test]
    fn latitude_mapping() {
        let zero = LocalSetItem::sensor_latitude(0.0).unwrap();
        assert_eq!(zero.value.as_ref(), &[0, 0, 0, 0]);

        let max = LocalSetItem::sensor_latitude(90.0).unwrap();
        assert_eq!(max.value.as_ref(), &i32::MAX.to_be_bytes());

        let decoded = LocalSetItem::sensor_latitude(-33.8688)
            .unwrap()
            .as_angle()
            .unwrap()
            .unwrap();
        assert!((decoded + 33.8688).abs() < 1e-6);
    }

    #[test]
    fn longitude_mapping() {
        let decoded = LocalSetItem::sensor_longitude(151.2093)
            .unwrap()
            .as_angle()
            .unwrap()
            .unwrap();
        assert!((decoded - 151.2093).abs() < 1e-6);

        let min = LocalSetItem::sensor_longitude(-180.0).unwrap();
        assert_eq!(min.value.as_ref(), &(-i32::MAX).to_be_bytes());
    }

    #[test]
    fn angle_error_indicator_decodes_to_none() {
        let item = LocalSetItem::new(LocalSetTag::SensorLatitude, i32::MIN.to_be_bytes().to_vec());
        assert_eq!(item.as_angle().unwrap(), None);
    }

    #[test]
    fn out_of_domain_values_are_rejected() {
        assert!(matches!(
            LocalSetItem::sensor_latitude(90.5),
            Err(KlvError::ValueOutOfRange { tag: 13, .. })
        ));
        assert!(LocalSetItem::sensor_longitude(-181.0).is_err());
        assert!(LocalSetItem::sensor_latitude(f64::NAN).is_err());
        assert!(LocalSetItem::platform_ground_speed(-1.0).is_err());
        assert!(LocalSetItem::platform_ground_speed(255.6).is_err());
    }

    #[test]
    fn ground_speed_rounds() {
        let item = LocalSetItem::platform_ground_speed(17.6).unwrap();
        assert_eq!(item.value.as_ref(), &[18]);
        assert_eq!(item.as_ground_speed().unwrap(), 18.0);
    }

    #[test]
    fn wrong_width_value_is_reported() {
        let item = LocalSetItem::new(LocalSetTag::PrecisionTimeStamp, vec![0x00, 0x01]);
        assert!(matches!(
            item.as_time_stamp(),
            Err(KlvError::InvalidValueLength {
                tag: 2,
                expected: 8,
                actual: 2
            })
        ));
    }
}
