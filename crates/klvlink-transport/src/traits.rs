use std::net::SocketAddr;
use std::time::Duration;

use crate::error::Result;

/// A message-oriented, unreliable channel.
///
/// Each call to [`send_datagram`](DatagramChannel::send_datagram) produces at
/// most one datagram at the peer; each call to
/// [`recv_datagram`](DatagramChannel::recv_datagram) yields exactly one.
pub trait DatagramChannel {
    /// Send `payload` as one datagram to the connected peer.
    fn send_datagram(&self, payload: &[u8]) -> Result<usize>;

    /// Receive one datagram into `buf`, returning its size and sender.
    ///
    /// Returns [`crate::TransportError::TimedOut`] when a read timeout is set
    /// and elapses.
    fn recv_datagram(&self, buf: &mut [u8]) -> Result<(usize, SocketAddr)>;

    /// Set the receive timeout. `None` blocks indefinitely.
    fn set_read_timeout(&self, timeout: Option<Duration>) -> Result<()>;
}

impl<T: DatagramChannel + ?Sized> DatagramChannel for &T {
    fn send_datagram(&self, payload: &[u8]) -> Result<usize> {
        (**self).send_datagram(payload)
    }

    fn recv_datagram(&self, buf: &mut [u8]) -> Result<(usize, SocketAddr)> {
        (**self).recv_datagram(buf)
    }

    fn set_read_timeout(&self, timeout: Option<Duration>) -> Result<()> {
        (**self).set_read_timeout(timeout)
    }
}
