/// Errors that can occur in sender, receiver and offline operations.
#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    /// Transport-level error.
    #[error("transport error: {0}")]
    Transport(#[from] klvlink_transport::TransportError),

    /// KLV encode or decode error.
    #[error("klv error: {0}")]
    Klv(#[from] klvlink_codec::KlvError),

    /// Datagram (de)serialization error.
    #[error("serialization error: {0}")]
    Serialization(#[from] bincode::Error),

    /// A serialized datagram exceeds the transport ceiling.
    #[error("datagram too large ({size} bytes, max {max})")]
    OversizeDatagram { size: usize, max: usize },

    /// The frame image could not be decoded.
    #[error("image decode failed: {0}")]
    ImageDecode(String),

    /// A frame or telemetry source could not produce input.
    #[error("source error: {0}")]
    Source(String),

    /// An output file could not be created.
    #[error("failed to create {path}: {source}")]
    CreateOutput {
        path: std::path::PathBuf,
        source: std::io::Error,
    },

    /// File or stream I/O error.
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization error.
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, SessionError>;
