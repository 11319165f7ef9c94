/// Errors that can occur in datagram transport operations.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    /// Failed to bind to the specified address.
    #[error("failed to bind to {addr}: {source}")]
    Bind {
        addr: String,
        source: std::io::Error,
    },

    /// Failed to resolve or connect to the specified peer.
    #[error("failed to connect to {addr}: {source}")]
    Connect {
        addr: String,
        source: std::io::Error,
    },

    /// Sending a datagram failed.
    #[error("failed to send datagram: {0}")]
    Send(std::io::Error),

    /// Receiving a datagram failed.
    #[error("failed to receive datagram: {0}")]
    Receive(std::io::Error),

    /// No datagram arrived within the read timeout.
    #[error("receive timed out")]
    TimedOut,

    /// The payload exceeds the maximum datagram size.
    #[error("datagram too large ({size} bytes, max {max})")]
    DatagramTooLarge { size: usize, max: usize },

    /// An I/O error occurred on the socket.
    #[error("transport I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl TransportError {
    /// True when the error only signals an elapsed read timeout.
    pub fn is_timeout(&self) -> bool {
        matches!(self, TransportError::TimedOut)
    }
}

pub type Result<T> = std::result::Result<T, TransportError>;
