//! UDP socket setup for multicast primary/FEC feeds and unicast
//! repair/RTCP traffic.
//!
//! Grounded on spec.md §5 "Shared-resource policy": multicast-input
//! sockets use `SO_REUSEADDR` + `IP_ADD_MEMBERSHIP` on the interface
//! matching the channel's configured input address; multicast-output
//! sockets set `IP_MULTICAST_IF` and a configurable TTL. Built on
//! `socket2` (as the rest of this crate's dependency stack already
//! pulls in for low-level socket options retina itself doesn't need).

use std::net::{Ipv4Addr, SocketAddr, SocketAddrV4};

use socket2::{Domain, Protocol, Socket, Type};

use crate::{bail, ErrorInt};

fn io_err(what: &str, e: std::io::Error) -> crate::Error {
    crate::wrap!(ErrorInt::Internal {
        ctx: crate::ChannelContext::default(),
        description: format!("{what}: {e}"),
    })
}

/// A UDP socket joined to a multicast group on a specific local
/// interface, for receiving a channel's primary/FEC0/FEC1 feed.
pub struct McastRecvSocket {
    inner: std::net::UdpSocket,
}

impl McastRecvSocket {
    /// Binds `port` on `iface` and joins `group`, matching
    /// `vqec_dp_input_shim`'s multicast join path: `SO_REUSEADDR` (so
    /// multiple channels sharing a port/group on the same interface
    /// don't collide) then `IP_ADD_MEMBERSHIP`.
    pub fn join(group: Ipv4Addr, iface: Ipv4Addr, port: u16) -> Result<Self, crate::Error> {
        if !group.is_multicast() {
            bail!(ErrorInt::InvalidArgs {
                description: format!("{group} is not a multicast address"),
            });
        }
        let socket = Socket::new(Domain::IPV4, Type::DGRAM, Some(Protocol::UDP))
            .map_err(|e| io_err("socket", e))?;
        socket
            .set_reuse_address(true)
            .map_err(|e| io_err("SO_REUSEADDR", e))?;
        let bind_addr = SocketAddrV4::new(Ipv4Addr::UNSPECIFIED, port);
        socket
            .bind(&bind_addr.into())
            .map_err(|e| io_err("bind", e))?;
        socket
            .join_multicast_v4(&group, &iface)
            .map_err(|e| io_err("IP_ADD_MEMBERSHIP", e))?;
        socket
            .set_nonblocking(true)
            .map_err(|e| io_err("set_nonblocking", e))?;
        Ok(McastRecvSocket {
            inner: socket.into(),
        })
    }

    /// Non-blocking receive; `Ok(None)` means nothing was ready
    /// (`EWOULDBLOCK`), matching the dispatch thread's non-blocking
    /// `recvmsg` loop (spec.md §5 "Dispatch thread never suspends on the
    /// core lock for I/O").
    pub fn try_recv(&self, buf: &mut [u8]) -> Result<Option<(usize, SocketAddr)>, crate::Error> {
        match self.inner.recv_from(buf) {
            Ok((n, addr)) => Ok(Some((n, addr))),
            Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => Ok(None),
            Err(e) => Err(io_err("recv_from", e)),
        }
    }

    pub fn local_addr(&self) -> Result<SocketAddr, crate::Error> {
        self.inner.local_addr().map_err(|e| io_err("local_addr", e))
    }
}

/// A unicast UDP socket used for repair requests, RTCP feedback, and
/// NAT/repair-source keepalive sends (`repair_inject`/`primary_inject`
/// in spec.md §4.6).
pub struct UnicastSocket {
    inner: std::net::UdpSocket,
}

impl UnicastSocket {
    pub fn bind(local: SocketAddrV4) -> Result<Self, crate::Error> {
        let socket = Socket::new(Domain::IPV4, Type::DGRAM, Some(Protocol::UDP))
            .map_err(|e| io_err("socket", e))?;
        socket
            .set_reuse_address(true)
            .map_err(|e| io_err("SO_REUSEADDR", e))?;
        socket.bind(&local.into()).map_err(|e| io_err("bind", e))?;
        socket
            .set_nonblocking(true)
            .map_err(|e| io_err("set_nonblocking", e))?;
        Ok(UnicastSocket {
            inner: socket.into(),
        })
    }

    /// Configures this socket as a multicast sender: outgoing interface
    /// plus TTL, for keepalive/NAT-punch sends toward a multicast
    /// source (spec.md §5 "multicast-output sockets set
    /// `IP_MULTICAST_IF` and a configurable TTL").
    pub fn set_multicast_out(&self, iface: Ipv4Addr, ttl: u32) -> Result<(), crate::Error> {
        let socket = socket2::SockRef::from(&self.inner);
        socket
            .set_multicast_if_v4(&iface)
            .map_err(|e| io_err("IP_MULTICAST_IF", e))?;
        socket
            .set_multicast_ttl_v4(ttl)
            .map_err(|e| io_err("IP_MULTICAST_TTL", e))?;
        Ok(())
    }

    pub fn send_to(&self, buf: &[u8], dst: SocketAddr) -> Result<usize, crate::Error> {
        self.inner.send_to(buf, dst).map_err(|e| io_err("send_to", e))
    }

    pub fn try_recv(&self, buf: &mut [u8]) -> Result<Option<(usize, SocketAddr)>, crate::Error> {
        match self.inner.recv_from(buf) {
            Ok((n, addr)) => Ok(Some((n, addr))),
            Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => Ok(None),
            Err(e) => Err(io_err("recv_from", e)),
        }
    }

    pub fn local_addr(&self) -> Result<SocketAddr, crate::Error> {
        self.inner.local_addr().map_err(|e| io_err("local_addr", e))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_non_multicast_group() {
        let err = McastRecvSocket::join(Ipv4Addr::new(10, 0, 0, 1), Ipv4Addr::UNSPECIFIED, 5004)
            .unwrap_err();
        assert!(matches!(err.into_inner(), ErrorInt::InvalidArgs { .. }));
    }

    #[test]
    fn unicast_socket_binds_ephemeral_port() {
        let sock = UnicastSocket::bind(SocketAddrV4::new(Ipv4Addr::LOCALHOST, 0)).unwrap();
        assert!(sock.local_addr().unwrap().port() > 0);
    }

    #[test]
    fn unicast_roundtrip_send_recv() {
        let a = UnicastSocket::bind(SocketAddrV4::new(Ipv4Addr::LOCALHOST, 0)).unwrap();
        let b = UnicastSocket::bind(SocketAddrV4::new(Ipv4Addr::LOCALHOST, 0)).unwrap();
        let b_addr = b.local_addr().unwrap();
        a.send_to(b"hi", b_addr).unwrap();
        std::thread::sleep(std::time::Duration::from_millis(20));
        let mut buf = [0u8; 16];
        let (n, _) = b.try_recv(&mut buf).unwrap().unwrap();
        assert_eq!(&buf[..n], b"hi");
    }
}
