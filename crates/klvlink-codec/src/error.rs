/// Errors that can occur while encoding or decoding KLV data.
#[derive(Debug, thiserror::Error)]
pub enum KlvError {
    /// Not enough bytes remain for a length field, item or payload.
    #[error("truncated input (needed {needed} bytes, {available} available)")]
    Truncated { needed: usize, available: usize },

    /// A long-form BER length declares more length octets than supported.
    #[error("BER length uses {octets} length octets (max 8)")]
    LengthOverflow { octets: usize },

    /// The declared payload exceeds the configured maximum size.
    #[error("payload too large ({size} bytes, max {max})")]
    PayloadTooLarge { size: u64, max: usize },

    /// A known tag carries a value of the wrong width.
    #[error("tag {tag} expects {expected} value bytes, got {actual}")]
    InvalidValueLength {
        tag: u8,
        expected: usize,
        actual: usize,
    },

    /// A telemetry value lies outside the domain of its tag.
    #[error("value {value} out of range for tag {tag}")]
    ValueOutOfRange { tag: u8, value: f64 },

    /// Packet assembly was asked to encode an empty local set.
    #[error("local set has no items")]
    EmptyLocalSet,

    /// An I/O error occurred while reading a metadata stream.
    #[error("KLV I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl KlvError {
    /// True for errors caused by running out of input rather than bad bytes.
    pub fn is_truncation(&self) -> bool {
        matches!(self, KlvError::Truncated { .. })
    }
}

pub type Result<T> = std::result::Result<T, KlvError>;
