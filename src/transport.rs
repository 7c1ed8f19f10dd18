//! Dual-stack UDP transport.
//!
//! The node listens on one IPv4 and one IPv6 socket so it can exchange
//! datagrams with peers of either family; outbound datagrams go through
//! the socket whose family matches the destination. Both sockets are bound
//! with address reuse, and the IPv6 socket is bound v6-only so the two can
//! share a port number.

use std::io;
use std::net::SocketAddr;

use socket2::{Domain, Protocol, Socket, Type};
use tokio::net::{lookup_host, UdpSocket};
use tracing::debug;

use crate::error::Error;

/// Largest datagram the transport will accept (covers the UDP IPv4
/// maximum payload of 65 507 bytes).
pub const MAX_DATAGRAM_SIZE: usize = 65536;

/// The pair of UDP sockets a node speaks through.
pub struct Transport {
    v4: UdpSocket,
    v6: UdpSocket,
}

impl Transport {
    /// Binds both sockets. `v4` must be an IPv4 address and `v6` an IPv6
    /// address; must be called from within a tokio runtime.
    pub fn bind(v4: SocketAddr, v6: SocketAddr) -> Result<Self, Error> {
        let v4 = bind_udp(v4)?;
        let v6 = bind_udp(v6)?;

        debug!(
            "transport bound to {} and {}",
            v4.local_addr()?,
            v6.local_addr()?
        );

        Ok(Self { v4, v6 })
    }

    /// Sends one datagram through the socket matching the destination's
    /// family.
    pub async fn send(&self, datagram: &[u8], to: SocketAddr) -> io::Result<()> {
        let socket = match to {
            SocketAddr::V4(_) => &self.v4,
            SocketAddr::V6(_) => &self.v6,
        };
        socket.send_to(datagram, to).await?;
        Ok(())
    }

    /// Waits for the next datagram on either socket.
    ///
    /// Connection-reset errors are swallowed and the wait continues: on
    /// some systems a UDP socket reports a previous send's ICMP
    /// port-unreachable feedback this way.
    pub async fn recv(&self, buf: &mut [u8]) -> io::Result<(usize, SocketAddr)> {
        loop {
            let socket = tokio::select! {
                ready = self.v4.readable() => {
                    ready?;
                    &self.v4
                }
                ready = self.v6.readable() => {
                    ready?;
                    &self.v6
                }
            };

            match socket.try_recv_from(buf) {
                Ok((len, sender)) => return Ok((len, sender)),
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => continue,
                Err(e) if e.kind() == io::ErrorKind::ConnectionReset => continue,
                Err(e) => return Err(e),
            }
        }
    }

    pub fn local_v4(&self) -> io::Result<SocketAddr> {
        self.v4.local_addr()
    }

    pub fn local_v6(&self) -> io::Result<SocketAddr> {
        self.v6.local_addr()
    }
}

fn bind_udp(addr: SocketAddr) -> io::Result<UdpSocket> {
    let domain = if addr.is_ipv6() {
        Domain::IPV6
    } else {
        Domain::IPV4
    };

    let socket = Socket::new(domain, Type::DGRAM, Some(Protocol::UDP))?;
    socket.set_reuse_address(true)?;
    if addr.is_ipv6() {
        socket.set_only_v6(true)?;
    }
    socket.set_nonblocking(true)?;
    socket.bind(&addr.into())?;

    UdpSocket::from_std(socket.into())
}

/// Resolves `"host:port"` to its candidate addresses; accepts IPv4/IPv6
/// literals as well as host names.
pub async fn resolve(endpoint: &str) -> io::Result<Vec<SocketAddr>> {
    Ok(lookup_host(endpoint).await?.collect())
}

/// Resolves an endpoint and picks the first IPv4 address.
pub async fn resolve_v4(endpoint: &str) -> Result<SocketAddr, Error> {
    resolve(endpoint)
        .await?
        .into_iter()
        .find(SocketAddr::is_ipv4)
        .ok_or(Error::InvalidIpv4Address)
}

/// Resolves an endpoint and picks the first IPv6 address.
pub async fn resolve_v6(endpoint: &str) -> Result<SocketAddr, Error> {
    resolve(endpoint)
        .await?
        .into_iter()
        .find(SocketAddr::is_ipv6)
        .ok_or(Error::InvalidIpv6Address)
}
