use std::io::ErrorKind;
use std::net::{Ipv4Addr, Ipv6Addr, SocketAddr, ToSocketAddrs, UdpSocket};
use std::time::Duration;

use tracing::{debug, info};

use crate::error::{Result, TransportError};
use crate::traits::DatagramChannel;
use crate::MAX_DATAGRAM_SIZE;

/// UDP datagram transport.
///
/// A receiver binds a local address with [`UdpChannel::bind`]; a sender binds
/// an ephemeral port and fixes its peer with [`UdpChannel::connect`].
#[derive(Debug)]
pub struct UdpChannel {
    socket: UdpSocket,
    local_addr: SocketAddr,
    peer_addr: Option<SocketAddr>,
}

impl UdpChannel {
    /// Receive buffer size that fits any UDP payload.
    pub const RECV_BUFFER_SIZE: usize = 65_536;

    /// Bind a UDP socket on `addr` (e.g. `127.0.0.1:5000`).
    pub fn bind(addr: &str) -> Result<Self> {
        let socket = UdpSocket::bind(addr).map_err(|e| TransportError::Bind {
            addr: addr.to_string(),
            source: e,
        })?;
        let local_addr = socket.local_addr()?;

        info!(%local_addr, "listening on udp socket");

        Ok(Self {
            socket,
            local_addr,
            peer_addr: None,
        })
    }

    /// Bind an ephemeral local port and connect it to `peer`.
    pub fn connect(peer: &str) -> Result<Self> {
        let connect_err = |source: std::io::Error| TransportError::Connect {
            addr: peer.to_string(),
            source,
        };

        let peer_addr = peer
            .to_socket_addrs()
            .map_err(connect_err)?
            .next()
            .ok_or_else(|| {
                connect_err(std::io::Error::new(
                    ErrorKind::AddrNotAvailable,
                    "address resolved to nothing",
                ))
            })?;

        let unspecified: SocketAddr = if peer_addr.is_ipv4() {
            (Ipv4Addr::UNSPECIFIED, 0).into()
        } else {
            (Ipv6Addr::UNSPECIFIED, 0).into()
        };
        let socket = UdpSocket::bind(unspecified).map_err(|e| TransportError::Bind {
            addr: unspecified.to_string(),
            source: e,
        })?;
        socket.connect(peer_addr).map_err(connect_err)?;
        let local_addr = socket.local_addr()?;

        debug!(%local_addr, %peer_addr, "connected udp socket");

        Ok(Self {
            socket,
            local_addr,
            peer_addr: Some(peer_addr),
        })
    }

    /// The local address this socket is bound to.
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// The connected peer, if any.
    pub fn peer_addr(&self) -> Option<SocketAddr> {
        self.peer_addr
    }

    /// Transport name for diagnostics.
    pub fn transport_name(&self) -> &'static str {
        "udp"
    }
}

impl DatagramChannel for UdpChannel {
    fn send_datagram(&self, payload: &[u8]) -> Result<usize> {
        if payload.len() > MAX_DATAGRAM_SIZE {
            return Err(TransportError::DatagramTooLarge {
                size: payload.len(),
                max: MAX_DATAGRAM_SIZE,
            });
        }
        loop {
            match self.socket.send(payload) {
                Ok(sent) => return Ok(sent),
                Err(err) if err.kind() == ErrorKind::Interrupted => continue,
                Err(err) => return Err(TransportError::Send(err)),
            }
        }
    }

    fn recv_datagram(&self, buf: &mut [u8]) -> Result<(usize, SocketAddr)> {
        loop {
            match self.socket.recv_from(buf) {
                Ok(received) => return Ok(received),
                Err(err) if err.kind() == ErrorKind::Interrupted => continue,
                Err(err) if matches!(err.kind(), ErrorKind::WouldBlock | ErrorKind::TimedOut) => {
                    return Err(TransportError::TimedOut)
                }
                Err(err) => return Err(TransportError::Receive(err)),
            }
        }
    }

    fn set_read_timeout(&self, timeout: Option<Duration>) -> Result<()> {
        self.socket.set_read_timeout(timeout).map_err(Into::into)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pair() -> (UdpChannel, UdpChannel) {
        let receiver = UdpChannel::bind("127.0.0.1:0").unwrap();
        let sender = UdpChannel::connect(&receiver.local_addr().to_string()).unwrap();
        receiver
            .set_read_timeout(Some(Duration::from_secs(5)))
            .unwrap();
        (receiver, sender)
    }

    #[test]
    fn send_and_receive_one_datagram() {
        let (receiver, sender) = pair();

        let sent = sender.send_datagram(b"frame-0").unwrap();
        assert_eq!(sent, 7);

        let mut buf = vec![0u8; UdpChannel::RECV_BUFFER_SIZE];
        let (len, from) = receiver.recv_datagram(&mut buf).unwrap();
        assert_eq!(&buf[..len], b"frame-0");
        assert_eq!(from.port(), sender.local_addr().port());
        assert_eq!(sender.peer_addr(), Some(receiver.local_addr()));
    }

    #[test]
    fn datagram_boundaries_are_preserved() {
        let (receiver, sender) = pair();
        sender.send_datagram(b"one").unwrap();
        sender.send_datagram(b"three").unwrap();

        let mut buf = vec![0u8; UdpChannel::RECV_BUFFER_SIZE];
        let (first, _) = receiver.recv_datagram(&mut buf).unwrap();
        assert_eq!(&buf[..first], b"one");
        let (second, _) = receiver.recv_datagram(&mut buf).unwrap();
        assert_eq!(&buf[..second], b"three");
    }

    #[test]
    #[cfg(target_os = "linux")]
    fn largest_datagram_is_accepted() {
        let (receiver, sender) = pair();
        let payload = vec![0x5A; MAX_DATAGRAM_SIZE];
        assert_eq!(sender.send_datagram(&payload).unwrap(), MAX_DATAGRAM_SIZE);

        let mut buf = vec![0u8; UdpChannel::RECV_BUFFER_SIZE];
        let (len, _) = receiver.recv_datagram(&mut buf).unwrap();
        assert_eq!(len, MAX_DATAGRAM_SIZE);
    }

    #[test]
    fn oversize_datagram_is_rejected_before_sending() {
        let (_receiver, sender) = pair();
        let err = sender
            .send_datagram(&vec![0u8; MAX_DATAGRAM_SIZE + 1])
            .unwrap_err();
        assert!(matches!(
            err,
            TransportError::DatagramTooLarge {
                size: 65_001,
                max: 65_000
            }
        ));
    }

    #[test]
    fn read_timeout_reports_timed_out() {
        let receiver = UdpChannel::bind("127.0.0.1:0").unwrap();
        receiver
            .set_read_timeout(Some(Duration::from_millis(20)))
            .unwrap();

        let mut buf = [0u8; 16];
        let err = receiver.recv_datagram(&mut buf).unwrap_err();
        assert!(err.is_timeout());
    }

    #[test]
    fn bind_invalid_address_fails() {
        let err = UdpChannel::bind("not-an-address").unwrap_err();
        assert!(matches!(err, TransportError::Bind { ref addr, .. } if addr == "not-an-address"));
    }

    #[test]
    fn connect_invalid_address_fails() {
        let err = UdpChannel::connect("127.0.0.1").unwrap_err();
        assert!(matches!(err, TransportError::Connect { .. }));
    }

    #[test]
    fn channel_usable_through_reference() {
        fn send_via(channel: impl DatagramChannel) -> usize {
            channel.send_datagram(b"ref").unwrap()
        }

        let (receiver, sender) = pair();
        assert_eq!(send_via(&sender), 3);
        let mut buf = [0u8; 8];
        let (len, _) = receiver.recv_datagram(&mut buf).unwrap();
        assert_eq!(&buf[..len], b"ref");
        assert_eq!(sender.transport_name(), "udp");
    }
}
