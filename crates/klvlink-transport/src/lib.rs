//! Datagram transport for klvlink.
//!
//! Frames and their metadata travel as single self-contained datagrams:
//! - Best-effort delivery (loss, duplication and reordering are tolerated)
//! - No acknowledgement and no retransmission
//! - A hard upper bound of [`MAX_DATAGRAM_SIZE`] bytes per datagram
//!
//! This is the lowest layer of klvlink. The session layer builds on the
//! [`DatagramChannel`] trait and its UDP implementation [`UdpChannel`].

pub mod error;
pub mod traits;
pub mod udp;

pub use error::{Result, TransportError};
pub use traits::DatagramChannel;
pub use udp::UdpChannel;

/// Largest datagram the sender will emit, in bytes.
pub const MAX_DATAGRAM_SIZE: usize = 65_000;
